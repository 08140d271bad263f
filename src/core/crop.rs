use crate::core::reproject::Reprojector;
use crate::types::{MultiBandProduct, OptramError, OptramResult, RasterBand, RasterElement, StudyAreaPolygon};
use geo::{Contains, LineString, Point, Polygon};
use ndarray::{s, Array2, Zip};

/// Pixel window `[row_start, row_end) x [col_start, col_end)` of a crop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl CropWindow {
    pub fn height(&self) -> usize {
        self.row_end - self.row_start
    }

    pub fn width(&self) -> usize {
        self.col_end - self.col_start
    }
}

/// Restricts an aligned product to the study area.
///
/// The ring is reprojected into the raster CRS, the stack is cut to the
/// ring's bounding box and every pixel whose centre falls outside the ring
/// becomes nodata.
#[derive(Debug, Clone)]
pub struct SpatialCropper {
    polygon: StudyAreaPolygon,
}

impl SpatialCropper {
    pub fn new(polygon: StudyAreaPolygon) -> Self {
        Self { polygon }
    }

    pub fn polygon(&self) -> &StudyAreaPolygon {
        &self.polygon
    }

    pub fn crop(&self, product: &MultiBandProduct) -> OptramResult<MultiBandProduct> {
        if !product.is_aligned() {
            return Err(OptramError::Alignment(format!(
                "{}: bands must share one grid before cropping",
                product.product_id
            )));
        }
        let reference = product.band(0)?;

        let reprojector = Reprojector::new(self.polygon.crs(), reference.crs())?;
        let ring = reprojector.transform_points(self.polygon.vertices())?;

        let window = Self::window(&ring, reference).ok_or_else(|| {
            OptramError::Alignment(format!(
                "{}: study area does not intersect the raster",
                product.product_id
            ))
        })?;

        let mask = Self::inside_mask(&ring, reference, &window);
        let inside = mask.iter().filter(|&&m| m).count();
        if inside == 0 {
            return Err(OptramError::Alignment(format!(
                "{}: no pixel centre lies inside the study area",
                product.product_id
            )));
        }

        log::info!(
            "Cropping {} to {}x{} window at ({}, {}), {} pixels inside study area",
            product.product_id,
            window.width(),
            window.height(),
            window.col_start,
            window.row_start,
            inside
        );

        let bands = product
            .bands
            .iter()
            .map(|band| Self::crop_band(band, &window, &mask))
            .collect();

        Ok(product.with_bands(bands))
    }

    /// Bounding box of the ring in pixel space, clipped to the raster
    pub fn window<T: RasterElement>(
        ring: &[(f64, f64)],
        band: &RasterBand<T>,
    ) -> Option<CropWindow> {
        let gt = band.geo_transform();
        let (mut min_c, mut min_r) = (f64::INFINITY, f64::INFINITY);
        let (mut max_c, mut max_r) = (f64::NEG_INFINITY, f64::NEG_INFINITY);

        for &(x, y) in ring {
            let (c, r) = gt.geo_to_pixel(x, y)?;
            min_c = min_c.min(c);
            max_c = max_c.max(c);
            min_r = min_r.min(r);
            max_r = max_r.max(r);
        }

        let col_start = min_c.floor().max(0.0);
        let row_start = min_r.floor().max(0.0);
        let col_end = max_c.ceil().min(band.width() as f64);
        let row_end = max_r.ceil().min(band.height() as f64);

        if !(col_start < col_end && row_start < row_end) {
            return None;
        }

        Some(CropWindow {
            row_start: row_start as usize,
            row_end: row_end as usize,
            col_start: col_start as usize,
            col_end: col_end as usize,
        })
    }

    fn inside_mask<T: RasterElement>(
        ring: &[(f64, f64)],
        band: &RasterBand<T>,
        window: &CropWindow,
    ) -> Array2<bool> {
        let polygon = Polygon::new(LineString::from(ring.to_vec()), vec![]);
        let gt = band.geo_transform();

        Array2::from_shape_fn((window.height(), window.width()), |(r, c)| {
            let (x, y) = gt.pixel_center(window.col_start + c, window.row_start + r);
            polygon.contains(&Point::new(x, y))
        })
    }

    fn crop_band<T: RasterElement>(
        band: &RasterBand<T>,
        window: &CropWindow,
        mask: &Array2<bool>,
    ) -> RasterBand<T> {
        let nodata = band.nodata();
        let view = band
            .data()
            .slice(s![window.row_start..window.row_end, window.col_start..window.col_end]);

        let data = Zip::from(&view)
            .and(mask)
            .map_collect(|&v, &inside| if inside { v } else { nodata });

        let gt = band.geo_transform().with_offset(window.col_start, window.row_start);
        RasterBand::new(data, gt, band.crs().clone(), nodata)
    }
}
