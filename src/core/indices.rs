use crate::config::IndexParams;
use crate::types::{DnSample, IndexRaster, MultiBandProduct, OptramError, OptramResult, RasterElement};
use ndarray::{Array2, Zip};

/// NDVI and STR from the red, near-infrared and short-wave-infrared bands
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexCalculator {
    params: IndexParams,
}

impl IndexCalculator {
    pub fn new(params: IndexParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    /// (NIR − RED) / (NIR + RED); `None` when the sum is zero
    pub fn ndvi(red: f64, nir: f64) -> Option<f64> {
        let sum = nir + red;
        if sum == 0.0 {
            return None;
        }
        Some((nir - red) / sum).filter(|v| v.is_finite())
    }

    /// (1 − SWIR)² / (2·SWIR); `None` when SWIR is zero
    pub fn str_index(swir: f64) -> Option<f64> {
        if swir == 0.0 {
            return None;
        }
        Some((1.0 - swir).powi(2) / (2.0 * swir)).filter(|v| v.is_finite())
    }

    /// Both indices of one pixel from digital numbers, or `None` when the
    /// pixel is nodata, degenerate or outside the outlier bounds
    pub fn pixel(&self, red: DnSample, nir: DnSample, swir: DnSample) -> Option<(f64, f64)> {
        let scale = self.params.scale_factor;
        let ndvi = Self::ndvi(red as f64 / scale, nir as f64 / scale)?;
        let str_value = Self::str_index(swir as f64 / scale)?;

        let o = &self.params.outliers;
        let in_bounds = ndvi >= o.ndvi_min
            && ndvi <= o.ndvi_max
            && str_value >= o.str_min
            && str_value <= o.str_max;
        in_bounds.then_some((ndvi, str_value))
    }

    pub fn compute(&self, product: &MultiBandProduct) -> OptramResult<IndexRaster> {
        let roles = self.params.bands;
        let red = product.band(roles.red)?;
        let nir = product.band(roles.nir)?;
        let swir = product.band(roles.swir)?;

        if !red.same_grid(nir) || !red.same_grid(swir) {
            return Err(OptramError::Alignment(format!(
                "{}: reflectance bands are not co-registered",
                product.product_id
            )));
        }

        log::info!(
            "Computing NDVI/STR for {} ({}x{})",
            product.product_id,
            red.width(),
            red.height()
        );

        let (red_nd, nir_nd, swir_nd) = (red.nodata(), nir.nodata(), swir.nodata());
        let pixel = |&r: &DnSample, &n: &DnSample, &s: &DnSample| -> (f64, f64) {
            if r.is_nodata(red_nd) || n.is_nodata(nir_nd) || s.is_nodata(swir_nd) {
                return (f64::NAN, f64::NAN);
            }
            self.pixel(r, n, s).unwrap_or((f64::NAN, f64::NAN))
        };

        #[cfg(feature = "parallel")]
        let pairs: Array2<(f64, f64)> = Zip::from(red.data())
            .and(nir.data())
            .and(swir.data())
            .par_map_collect(pixel);

        #[cfg(not(feature = "parallel"))]
        let pairs: Array2<(f64, f64)> = Zip::from(red.data())
            .and(nir.data())
            .and(swir.data())
            .map_collect(pixel);

        let ndvi = red.derive(pairs.mapv(|p| p.0), f64::NAN)?;
        let str_band = red.derive(pairs.mapv(|p| p.1), f64::NAN)?;
        let indices = IndexRaster::new(ndvi, str_band)?;

        log::debug!(
            "{}: {} of {} pixels with valid indices",
            product.product_id,
            indices.valid_count(),
            red.pixel_count()
        );
        Ok(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform, RasterBand};
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;
    use ndarray::array;

    fn product(red: Array2<i16>, nir: Array2<i16>, swir: Array2<i16>) -> MultiBandProduct {
        let gt = GeoTransform::north_up(0.0, 20.0, 10.0, -10.0);
        let band = |d| RasterBand::new(d, gt, Crs::epsg(32631), 0);
        MultiBandProduct {
            product_id: "TEST".to_string(),
            acquired: NaiveDate::from_ymd_opt(2016, 5, 8)
                .unwrap()
                .and_hms_opt(10, 40, 27)
                .unwrap(),
            cloud_cover: None,
            bands: vec![band(red), band(nir), band(swir)],
        }
    }

    #[test]
    fn test_index_formulas() {
        assert_abs_diff_eq!(IndexCalculator::ndvi(0.05, 0.30).unwrap(), 0.25 / 0.35, epsilon = 1e-12);
        assert_abs_diff_eq!(IndexCalculator::str_index(0.2).unwrap(), 1.6, epsilon = 1e-12);
        assert!(IndexCalculator::ndvi(0.0, 0.0).is_none());
        assert!(IndexCalculator::str_index(0.0).is_none());
    }

    #[test]
    fn test_finite_for_valid_reflectances() {
        let calc = IndexCalculator::default();
        for red in [1i16, 250, 1000, 4000, 9999] {
            for nir in [1i16, 500, 3000, 9999] {
                for swir in [1i16, 100, 2000, 9999] {
                    if let Some((ndvi, s)) = calc.pixel(red, nir, swir) {
                        assert!(ndvi.is_finite() && s.is_finite());
                        assert!((0.0..=2.0).contains(&ndvi));
                        assert!((0.0..=40.0).contains(&s));
                    }
                }
            }
        }
    }

    #[test]
    fn test_outliers_invalidate_both_indices() {
        // (0,0) valid; (0,1) negative NDVI; (1,0) STR above 40; (1,1) nodata SWIR
        let indices = IndexCalculator::default()
            .compute(&product(
                array![[500, 3000], [500, 500]],
                array![[3000, 1000], [3000, 3000]],
                array![[2000, 2000], [100, 0]],
            ))
            .unwrap();

        assert_eq!(indices.valid_count(), 1);
        assert!(indices.valid()[[0, 0]]);
        for (r, c) in [(0, 1), (1, 0), (1, 1)] {
            assert!(indices.ndvi().data()[[r, c]].is_nan());
            assert!(indices.str_band().data()[[r, c]].is_nan());
        }
        assert_abs_diff_eq!(indices.str_band().data()[[0, 0]], 1.6, epsilon = 1e-12);
    }

    #[test]
    fn test_custom_band_roles() {
        let mut params = IndexParams::default();
        params.bands.red = 1;
        params.bands.nir = 0;
        let indices = IndexCalculator::new(params)
            .compute(&product(array![[3000]], array![[500]], array![[2000]]))
            .unwrap();
        assert_abs_diff_eq!(indices.ndvi().data()[[0, 0]], 2500.0 / 3500.0, epsilon = 1e-12);
    }
}
