//! Matching of retrieved rasters with ground-station measurements.
//!
//! Stations log on a quarter-hour cadence while satellite passes fall at
//! arbitrary seconds, so every acquisition time is first rounded to the
//! station clock before the series is looked up.

use crate::config::{Neighborhood, ValidationParams};
use crate::core::reproject::Reprojector;
use crate::io::product::parse_acquisition_time;
use crate::types::{Crs, OptramResult, RasterBand, SoilMoistureRaster, StationRecord, ValidationSample};
use chrono::{Duration, NaiveDateTime, Timelike};

/// Minute and second within the hour encoded as `MMSS` (10:07:30 -> 730)
pub fn offset_code(time: NaiveDateTime) -> u32 {
    time.minute() * 100 + time.second()
}

/// Quarter-hour minute an `MMSS` offset rounds to, and whether it rolls over
/// into the next hour.
///
/// | offset          | minute | next hour |
/// |-----------------|--------|-----------|
/// | [0, 730)        | 0      | no        |
/// | [730, 2230)     | 15     | no        |
/// | [2230, 3730)    | 30     | no        |
/// | [3730, 5230)    | 45     | no        |
/// | [5230, 5960)    | 0      | yes       |
///
/// The last band rounds forward to the nearest quarter hour, so 10:53 maps
/// to 11:00 rather than truncating back to 10:00 of the same hour.
pub fn round_offset_code(code: u32) -> (u32, bool) {
    match code {
        0..=729 => (0, false),
        730..=2229 => (15, false),
        2230..=3729 => (30, false),
        3730..=5229 => (45, false),
        _ => (0, true),
    }
}

/// Round to the station cadence
pub fn round_to_quarter_hour(time: NaiveDateTime) -> NaiveDateTime {
    let hour_start = time
        - Duration::seconds(i64::from(time.minute() * 60 + time.second()))
        - Duration::nanoseconds(i64::from(time.nanosecond()));

    let (minute, next_hour) = round_offset_code(offset_code(time));
    let rounded = hour_start + Duration::minutes(i64::from(minute));
    if next_hour {
        rounded + Duration::hours(1)
    } else {
        rounded
    }
}

/// Acquisition time of a scene, read from its identifier when possible
pub fn acquisition_time(raster: &SoilMoistureRaster) -> NaiveDateTime {
    parse_acquisition_time(&raster.product_id).unwrap_or(raster.acquired)
}

/// Station-clock time of a scene
pub fn rounded_acquisition(raster: &SoilMoistureRaster) -> NaiveDateTime {
    round_to_quarter_hour(acquisition_time(raster))
}

/// Median of the finite values; the mean of the two central values for an
/// even count
pub fn median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(|a, b| a.total_cmp(b));

    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        Some((finite[mid - 1] + finite[mid]) / 2.0)
    } else {
        Some(finite[mid])
    }
}

/// Produces one validation sample per (scene, station)
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationMatcher {
    params: ValidationParams,
}

impl ValidationMatcher {
    pub fn new(params: ValidationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ValidationParams {
        &self.params
    }

    /// (row, col) of the pixel containing a station, `None` outside the raster
    pub fn station_pixel(
        station: &StationRecord,
        band: &RasterBand<f64>,
        reprojector: &Reprojector,
    ) -> OptramResult<Option<(usize, usize)>> {
        let (x, y) = reprojector.transform_point(station.longitude, station.latitude)?;
        let pixel = band.geo_transform().geo_to_pixel(x, y).and_then(|(c, r)| {
            let (c, r) = (c.floor(), r.floor());
            let inside = c >= 0.0 && r >= 0.0 && c < band.width() as f64 && r < band.height() as f64;
            inside.then(|| (r as usize, c as usize))
        });
        Ok(pixel)
    }

    /// Estimate at (row, col) under the configured neighbourhood
    pub fn estimate_at(&self, band: &RasterBand<f64>, row: usize, col: usize) -> Option<f64> {
        match self.params.neighborhood {
            Neighborhood::Pixel => band.value(row, col),
            Neighborhood::Median { window } => {
                let half = window / 2;
                let rows = row.saturating_sub(half)..=(row + half).min(band.height().saturating_sub(1));
                let cols = col.saturating_sub(half)..=(col + half).min(band.width().saturating_sub(1));

                let values: Vec<f64> = rows
                    .flat_map(|r| cols.clone().map(move |c| (r, c)))
                    .filter_map(|(r, c)| band.value(r, c))
                    .collect();
                median(&values)
            }
        }
    }

    pub fn match_scene(
        &self,
        raster: &SoilMoistureRaster,
        stations: &[StationRecord],
    ) -> OptramResult<Vec<ValidationSample>> {
        let band = raster.band();
        let rounded = rounded_acquisition(raster);
        let reprojector = Reprojector::new(&Crs::wgs84(), band.crs())?;
        let depth = self.params.depth;

        log::info!(
            "Matching {} against {} stations at {}",
            raster.product_id,
            stations.len(),
            rounded
        );

        let mut samples = Vec::with_capacity(stations.len());
        for station in stations {
            let measured = station.water_content_at(rounded, depth);
            let estimated = match Self::station_pixel(station, band, &reprojector)? {
                Some((row, col)) => self.estimate_at(band, row, col),
                None => {
                    log::warn!("Station {} lies outside {}", station.id, raster.product_id);
                    None
                }
            };

            // a sample without ground truth carries no estimate either
            let estimated = measured.and(estimated);
            if measured.is_none() {
                log::debug!("Station {}: no {} measurement at {}", station.id, depth, rounded);
            }

            samples.push(ValidationSample {
                product_id: raster.product_id.clone(),
                acquired: rounded,
                station_id: station.id.clone(),
                depth,
                measured,
                estimated,
            });
        }

        log::debug!(
            "{}: {} of {} samples paired",
            raster.product_id,
            samples.iter().filter(|s| s.is_paired()).count(),
            samples.len()
        );
        Ok(samples)
    }

    pub fn match_corpus(
        &self,
        rasters: &[SoilMoistureRaster],
        stations: &[StationRecord],
    ) -> OptramResult<Vec<ValidationSample>> {
        let mut samples = Vec::with_capacity(rasters.len() * stations.len());
        for raster in rasters {
            samples.extend(self.match_scene(raster, stations)?);
        }
        Ok(samples)
    }
}
