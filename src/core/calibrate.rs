//! Linear rescaling of OPTRAM wetness to volumetric water content.
//!
//! The wetness range is taken over the whole scene corpus and the water
//! content range over the ground measurements, so calibration can only run
//! once every scene has been retrieved.

use crate::config::{CalibrationAnchor, CalibrationParams, ThetaRange};
use crate::core::validation::rounded_acquisition;
use crate::types::{MoistureUnits, OptramError, OptramResult, SoilMoistureRaster, StationRecord};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeSet;

/// Fitted line `θ = a·W + b` and the statistics it was derived from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationCoefficients {
    pub a: f64,
    pub b: f64,
    pub w_min: f64,
    pub w_max: f64,
    pub theta_min: f64,
    pub theta_max: f64,
    /// Plausible wetness pixels behind `w_min`/`w_max`
    pub wetness_samples: usize,
    /// Ground measurements behind `theta_min`/`theta_max`
    pub theta_samples: usize,
}

impl CalibrationCoefficients {
    pub fn theta(&self, w: f64) -> f64 {
        self.a * w + self.b
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Calibrator {
    params: CalibrationParams,
}

impl Calibrator {
    pub fn new(params: CalibrationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    /// Inside the empirical plausibility band
    pub fn is_plausible(&self, w: f64) -> bool {
        w.is_finite() && w >= self.params.plausible_min && w <= self.params.plausible_max
    }

    /// (W_min, W_max, count) over plausible pixels of every raster
    pub fn wetness_range(&self, rasters: &[SoilMoistureRaster]) -> OptramResult<(f64, f64, usize)> {
        let mut range = (f64::INFINITY, f64::NEG_INFINITY, 0usize);
        for raster in rasters {
            if raster.units != MoistureUnits::RelativeWetness {
                return Err(OptramError::Calibration(format!(
                    "{} is already in volumetric units",
                    raster.product_id
                )));
            }
            for w in raster.band().valid_values().filter(|&w| self.is_plausible(w)) {
                range = (range.0.min(w), range.1.max(w), range.2 + 1);
            }
        }

        if range.2 == 0 {
            return Err(OptramError::Calibration(
                "no plausible wetness pixels in the corpus".to_string(),
            ));
        }
        Ok(range)
    }

    /// (θ_min, θ_max, count) from the configured depth of the station series
    pub fn theta_range(
        &self,
        stations: &[StationRecord],
        acquisitions: &BTreeSet<NaiveDateTime>,
    ) -> OptramResult<(f64, f64, usize)> {
        let depth = self.params.depth;
        let values: Vec<f64> = match self.params.theta_range {
            ThetaRange::Acquisitions => stations
                .iter()
                .flat_map(|s| acquisitions.iter().filter_map(move |&t| s.water_content_at(t, depth)))
                .collect(),
            ThetaRange::FullSeries => stations
                .iter()
                .flat_map(|s| s.series().iter().filter_map(move |m| m.water_content(depth)))
                .collect(),
        };

        let range = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY, 0usize), |acc, &v| {
                (acc.0.min(v), acc.1.max(v), acc.2 + 1)
            });

        if range.2 == 0 {
            return Err(OptramError::Calibration(format!(
                "no {} ground measurements to calibrate against",
                depth
            )));
        }
        Ok(range)
    }

    /// Line through the two ranges under the configured anchor
    pub fn coefficients(
        &self,
        w_min: f64,
        w_max: f64,
        theta_min: f64,
        theta_max: f64,
    ) -> OptramResult<CalibrationCoefficients> {
        if !(w_max > w_min) {
            return Err(OptramError::Calibration(format!(
                "wetness range [{}, {}] is degenerate",
                w_min, w_max
            )));
        }

        let a = (theta_max - theta_min) / (w_max - w_min);
        let b = match self.params.anchor {
            CalibrationAnchor::MinimumWetness => theta_min - a * w_min,
            CalibrationAnchor::Origin => theta_min,
        };

        Ok(CalibrationCoefficients {
            a,
            b,
            w_min,
            w_max,
            theta_min,
            theta_max,
            wetness_samples: 0,
            theta_samples: 0,
        })
    }

    /// Fit against the whole corpus
    pub fn fit(
        &self,
        rasters: &[SoilMoistureRaster],
        stations: &[StationRecord],
    ) -> OptramResult<CalibrationCoefficients> {
        log::info!(
            "Calibrating {} scenes against {} stations at {}",
            rasters.len(),
            stations.len(),
            self.params.depth
        );

        let (w_min, w_max, w_count) = self.wetness_range(rasters)?;
        let acquisitions: BTreeSet<NaiveDateTime> = rasters.iter().map(rounded_acquisition).collect();
        let (theta_min, theta_max, theta_count) = self.theta_range(stations, &acquisitions)?;

        if theta_max == theta_min {
            log::warn!("Ground measurements span a single value {}, slope is zero", theta_min);
        }

        let mut coefficients = self.coefficients(w_min, w_max, theta_min, theta_max)?;
        coefficients.wetness_samples = w_count;
        coefficients.theta_samples = theta_count;

        log::info!(
            "Calibration: W [{:.4}, {:.4}] -> θ [{:.4}, {:.4}], a = {:.4}, b = {:.4}",
            w_min,
            w_max,
            theta_min,
            theta_max,
            coefficients.a,
            coefficients.b
        );
        Ok(coefficients)
    }

    /// θ raster of one scene
    pub fn apply(
        &self,
        coefficients: &CalibrationCoefficients,
        raster: &SoilMoistureRaster,
    ) -> OptramResult<SoilMoistureRaster> {
        if raster.units != MoistureUnits::RelativeWetness {
            return Err(OptramError::Calibration(format!(
                "{} is already in volumetric units",
                raster.product_id
            )));
        }

        let band = raster.band();
        let nodata = band.nodata();
        let mask_implausible = self.params.mask_implausible;

        let theta = band.data().mapv(|w| {
            if w.is_nan() || w == nodata {
                f64::NAN
            } else if mask_implausible && !self.is_plausible(w) {
                f64::NAN
            } else {
                coefficients.theta(w)
            }
        });

        let calibrated = band.derive(theta, f64::NAN)?;
        log::debug!(
            "{}: {} calibrated pixels",
            raster.product_id,
            calibrated.valid_count()
        );
        Ok(raster.replace_band(calibrated, MoistureUnits::VolumetricWaterContent))
    }

    pub fn apply_corpus(
        &self,
        coefficients: &CalibrationCoefficients,
        rasters: &[SoilMoistureRaster],
    ) -> OptramResult<Vec<SoilMoistureRaster>> {
        rasters.iter().map(|r| self.apply(coefficients, r)).collect()
    }
}
