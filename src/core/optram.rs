use crate::config::OptramParams;
use crate::types::{IndexRaster, MoistureUnits, OptramResult, SoilMoistureRaster};
use chrono::NaiveDateTime;
use ndarray::Zip;

/// Relative wetness from the NDVI-STR trapezoid
#[derive(Debug, Clone, Copy, Default)]
pub struct OptramRetriever {
    params: OptramParams,
}

impl OptramRetriever {
    pub fn new(params: OptramParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &OptramParams {
        &self.params
    }

    /// W = (i_d + s_d·NDVI − STR) / (i_d − i_w + (s_d − s_w)·NDVI), clamped to [0, 1].
    ///
    /// `None` for non-finite inputs or a denominator within the configured
    /// epsilon of zero.
    pub fn wetness(&self, ndvi: f64, str_value: f64) -> Option<f64> {
        if !ndvi.is_finite() || !str_value.is_finite() {
            return None;
        }

        let p = &self.params;
        let numerator = p.dry_intercept + p.dry_slope * ndvi - str_value;
        let denominator = p.dry_intercept - p.wet_intercept + (p.dry_slope - p.wet_slope) * ndvi;
        if !denominator.is_finite() || denominator.abs() < p.denominator_epsilon {
            return None;
        }

        let w = numerator / denominator;
        w.is_finite().then(|| w.clamp(0.0, 1.0))
    }

    pub fn retrieve(
        &self,
        indices: &IndexRaster,
        product_id: &str,
        acquired: NaiveDateTime,
    ) -> OptramResult<SoilMoistureRaster> {
        let ndvi = indices.ndvi();
        log::info!("Retrieving OPTRAM wetness for {}", product_id);

        let wetness = |&n: &f64, &s: &f64| self.wetness(n, s).unwrap_or(f64::NAN);

        #[cfg(feature = "parallel")]
        let data = Zip::from(ndvi.data())
            .and(indices.str_band().data())
            .par_map_collect(wetness);

        #[cfg(not(feature = "parallel"))]
        let data = Zip::from(ndvi.data())
            .and(indices.str_band().data())
            .map_collect(wetness);

        let band = ndvi.derive(data, f64::NAN)?;
        log::debug!("{}: {} pixels with wetness", product_id, band.valid_count());

        Ok(SoilMoistureRaster::new(
            product_id,
            acquired,
            MoistureUnits::RelativeWetness,
            band,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_wetness_inside_trapezoid() {
        let retriever = OptramRetriever::default();
        // NDVI 0.5: dry edge STR 1.25, wet edge STR 10.75
        let w = retriever.wetness(0.5, 6.0).unwrap();
        assert_abs_diff_eq!(w, 4.75 / 9.5, epsilon = 1e-12);

        assert_abs_diff_eq!(retriever.wetness(0.5, 1.25).unwrap(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(retriever.wetness(0.5, 10.75).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_clamped_at_boundaries() {
        let retriever = OptramRetriever::default();
        // raw W = 1.4 at NDVI 0
        assert_eq!(retriever.wetness(0.0, 5.6).unwrap(), 1.0);
        // raw W below zero
        assert_eq!(retriever.wetness(0.0, -1.0).unwrap(), 0.0);

        for ndvi in [0.0, 0.1, 0.4, 0.8, 1.5] {
            for s in [0.0, 0.5, 3.0, 12.0, 39.0] {
                let w = retriever.wetness(ndvi, s).unwrap();
                assert!((0.0..=1.0).contains(&w));
            }
        }
    }

    #[test]
    fn test_degenerate_denominator_is_nodata() {
        // equal edges: denominator vanishes for every NDVI
        let params = OptramParams {
            dry_intercept: 1.0,
            dry_slope: 2.0,
            wet_intercept: 1.0,
            wet_slope: 2.0,
            ..OptramParams::default()
        };
        let retriever = OptramRetriever::new(params);
        assert!(retriever.wetness(0.5, 1.0).is_none());
        assert!(OptramRetriever::default().wetness(f64::NAN, 1.0).is_none());
    }
}
