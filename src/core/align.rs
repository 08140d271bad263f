use crate::types::{MultiBandProduct, OptramError, OptramResult, RasterBand, RasterElement};
use ndarray::Array2;

/// Brings every band of a product onto one reference pixel grid
#[derive(Debug, Clone, Copy, Default)]
pub struct GridAligner;

impl GridAligner {
    pub fn new() -> Self {
        Self
    }

    /// Band with the most pixels (the finest resolution); the first one wins ties
    pub fn reference_index<T: RasterElement>(bands: &[RasterBand<T>]) -> Option<usize> {
        bands
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, usize)>, (i, band)| match best {
                Some((_, count)) if count >= band.pixel_count() => best,
                _ => Some((i, band.pixel_count())),
            })
            .map(|(i, _)| i)
    }

    /// Integer ratio of reference pixel count to the band's pixel count
    pub fn resample_factor<T: RasterElement, U: RasterElement>(
        reference: &RasterBand<T>,
        band: &RasterBand<U>,
    ) -> usize {
        if band.pixel_count() == 0 {
            return 0;
        }
        reference.pixel_count() / band.pixel_count()
    }

    /// Align all bands of `product` to its finest band
    pub fn align(&self, product: &MultiBandProduct) -> OptramResult<MultiBandProduct> {
        let ref_idx = Self::reference_index(&product.bands).ok_or_else(|| {
            OptramError::Alignment(format!("{}: product has no bands", product.product_id))
        })?;
        let reference = &product.bands[ref_idx];

        log::info!(
            "Aligning {} bands of {} to band {} ({}x{})",
            product.band_count(),
            product.product_id,
            ref_idx,
            reference.width(),
            reference.height()
        );

        let mut aligned = Vec::with_capacity(product.band_count());
        for (i, band) in product.bands.iter().enumerate() {
            let factor = Self::resample_factor(reference, band);

            if factor == 1 && band.same_grid(reference) {
                log::debug!("Band {} already on reference grid", i);
                aligned.push(band.clone());
                continue;
            }

            if factor == 1 {
                log::warn!(
                    "Band {} has a resample factor of 1 but a different grid ({}x{}), resampling",
                    i,
                    band.width(),
                    band.height()
                );
            } else {
                log::debug!("Band {}: resample factor {}", i, factor);
            }

            let resampled = Self::resample_nearest(band, reference).map_err(|e| match e {
                OptramError::Alignment(msg) => {
                    OptramError::Alignment(format!("{} band {}: {}", product.product_id, i, msg))
                }
                other => other,
            })?;
            aligned.push(resampled);
        }

        Ok(product.with_bands(aligned))
    }

    /// Nearest-neighbour resampling of `band` onto the grid of `reference`.
    ///
    /// Each reference pixel takes the band sample whose footprint contains the
    /// reference pixel centre. Reference pixels outside the band get the
    /// band's nodata value.
    pub fn resample_nearest<T: RasterElement, U: RasterElement>(
        band: &RasterBand<T>,
        reference: &RasterBand<U>,
    ) -> OptramResult<RasterBand<T>> {
        if !band.crs().is_same(reference.crs()) {
            return Err(OptramError::Alignment(format!(
                "CRS {} differs from reference CRS {}",
                band.crs(),
                reference.crs()
            )));
        }

        let ref_gt = reference.geo_transform();
        let band_gt = band.geo_transform();
        let (width, height) = (band.width() as f64, band.height() as f64);
        let nodata = band.nodata();
        let mut inside = 0usize;

        let data = Array2::from_shape_fn((reference.height(), reference.width()), |(row, col)| {
            let (x, y) = ref_gt.pixel_center(col, row);
            match band_gt.geo_to_pixel(x, y) {
                Some((c, r)) if c >= 0.0 && r >= 0.0 && c < width && r < height => {
                    inside += 1;
                    band.data()[[r.floor() as usize, c.floor() as usize]]
                }
                _ => nodata,
            }
        });

        if inside == 0 {
            return Err(OptramError::Alignment(
                "band has no spatial overlap with the reference grid".to_string(),
            ));
        }

        log::debug!(
            "Resampled {}x{} -> {}x{} ({} pixels inside source)",
            band.width(),
            band.height(),
            reference.width(),
            reference.height(),
            inside
        );

        Ok(RasterBand::new(data, *ref_gt, reference.crs().clone(), nodata))
    }
}
