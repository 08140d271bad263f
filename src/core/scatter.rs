use crate::types::{GeoTransform, IndexRaster, OptramError, OptramResult, RasterBand};
use ndarray::Array2;
use serde::Serialize;
use std::path::Path;

/// One valid pixel in NDVI-STR space
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub ndvi: f64,
    #[serde(rename = "str")]
    pub str_index: f64,
}

/// Block mean of `factor`×`factor` pixels, ignoring nodata. Edge blocks are
/// partial; a block without valid pixels is NaN.
pub fn coarsen(band: &RasterBand<f64>, factor: usize) -> OptramResult<RasterBand<f64>> {
    if factor == 0 {
        return Err(OptramError::Config("coarsening factor must be >= 1".to_string()));
    }
    if factor == 1 {
        return Ok(band.clone());
    }

    let rows = (band.height() + factor - 1) / factor;
    let cols = (band.width() + factor - 1) / factor;
    let source = band.data();
    let nodata = band.nodata();

    let data = Array2::from_shape_fn((rows, cols), |(r, c)| {
        let (mut sum, mut count) = (0.0, 0usize);
        for row in r * factor..((r + 1) * factor).min(band.height()) {
            for col in c * factor..((c + 1) * factor).min(band.width()) {
                let v = source[[row, col]];
                if !(v.is_nan() || v == nodata) {
                    sum += v;
                    count += 1;
                }
            }
        }
        if count == 0 {
            f64::NAN
        } else {
            sum / count as f64
        }
    });

    let gt = band.geo_transform();
    let f = factor as f64;
    let coarse_gt = GeoTransform {
        pixel_width: gt.pixel_width * f,
        rotation_x: gt.rotation_x * f,
        rotation_y: gt.rotation_y * f,
        pixel_height: gt.pixel_height * f,
        ..*gt
    };

    Ok(RasterBand::new(data, coarse_gt, band.crs().clone(), f64::NAN))
}

/// Collects (NDVI, STR) pairs for fitting the trapezoid edges
#[derive(Debug, Clone, Copy)]
pub struct IndexScatter {
    coarsen: usize,
}

impl Default for IndexScatter {
    fn default() -> Self {
        Self { coarsen: 1 }
    }
}

impl IndexScatter {
    /// `coarsen` of `None` or 1 samples native pixels
    pub fn new(coarsen: Option<usize>) -> Self {
        Self {
            coarsen: coarsen.unwrap_or(1).max(1),
        }
    }

    pub fn sample(&self, indices: &IndexRaster) -> OptramResult<Vec<ScatterPoint>> {
        let ndvi = coarsen(indices.ndvi(), self.coarsen)?;
        let str_band = coarsen(indices.str_band(), self.coarsen)?;

        let points: Vec<ScatterPoint> = ndvi
            .data()
            .iter()
            .zip(str_band.data().iter())
            .filter(|(n, s)| n.is_finite() && s.is_finite())
            .map(|(&ndvi, &str_index)| ScatterPoint { ndvi, str_index })
            .collect();

        log::debug!("Sampled {} scatter points (coarsen {})", points.len(), self.coarsen);
        Ok(points)
    }
}

/// Write points as `ndvi,str` CSV
pub fn write_scatter_csv<P: AsRef<Path>>(points: &[ScatterPoint], path: P) -> OptramResult<()> {
    log::info!(
        "Writing {} NDVI-STR points: {}",
        points.len(),
        path.as_ref().display()
    );

    let mut writer = csv::Writer::from_path(path)?;
    for point in points {
        writer.serialize(point)?;
    }
    writer.flush()?;
    Ok(())
}
