use crate::config::StationSources;
use crate::types::{Depth, DepthReading, Measurement, OptramError, OptramResult, StationRecord};
use chrono::NaiveDateTime;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Timestamp layout of the station series files (`08-May-16 10:45:00`)
pub const SERIES_TIME_FORMAT: &str = "%d-%b-%y %H:%M:%S";

/// Station id and WGS84 position from the metadata table
#[derive(Debug, Clone, PartialEq)]
pub struct StationLocation {
    pub id: String,
    pub longitude: f64,
    pub latitude: f64,
}

/// Parse a decimal that may use a comma separator (`5,7281`)
pub fn parse_decimal(field: &str) -> OptramResult<f64> {
    let normalized = field.trim().replace(',', ".");
    normalized
        .parse::<f64>()
        .map_err(|e| OptramError::InvalidFormat(format!("invalid number '{}': {}", field, e)))
}

fn parse_optional(field: &str) -> OptramResult<Option<f64>> {
    let trimmed = field.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let value = parse_decimal(trimmed)?;
    Ok(Some(value).filter(|v| v.is_finite()))
}

fn parse_series_time(field: &str) -> OptramResult<NaiveDateTime> {
    let trimmed = field.trim();
    NaiveDateTime::parse_from_str(trimmed, SERIES_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| OptramError::InvalidFormat(format!("invalid measurement time '{}': {}", field, e)))
}

/// `id;longitude;latitude` rows after a header line
pub fn parse_station_metadata<R: Read>(reader: R) -> OptramResult<Vec<StationLocation>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut locations = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        if record.len() < 3 {
            return Err(OptramError::InvalidFormat(format!(
                "station metadata row has {} columns, expected 3",
                record.len()
            )));
        }

        locations.push(StationLocation {
            id: record[0].trim().to_string(),
            longitude: parse_decimal(&record[1])?,
            latitude: parse_decimal(&record[2])?,
        });
    }

    Ok(locations)
}

/// Measurement time followed by (water content, temperature) for 5/10/20/40/80 cm
pub fn parse_station_series<R: Read>(reader: R) -> OptramResult<Vec<Measurement>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let expected = 1 + 2 * Depth::ALL.len();
    let mut series = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        if record.len() < expected {
            return Err(OptramError::InvalidFormat(format!(
                "station series row has {} columns, expected {}",
                record.len(),
                expected
            )));
        }

        let mut readings = [DepthReading::default(); 5];
        for (i, reading) in readings.iter_mut().enumerate() {
            reading.water_content = parse_optional(&record[1 + 2 * i])?;
            reading.temperature = parse_optional(&record[2 + 2 * i])?;
        }

        series.push(Measurement {
            time: parse_series_time(&record[0])?,
            readings,
        });
    }

    Ok(series)
}

pub fn read_station_metadata<P: AsRef<Path>>(path: P) -> OptramResult<Vec<StationLocation>> {
    parse_station_metadata(File::open(path)?)
}

pub fn read_station_series<P: AsRef<Path>>(path: P) -> OptramResult<Vec<Measurement>> {
    parse_station_series(File::open(path)?)
}

/// Load every station listed in the metadata with its series. A station
/// whose series file is absent keeps an empty series; its samples will be
/// unmatched.
pub fn load_stations(sources: &StationSources) -> OptramResult<Vec<StationRecord>> {
    log::info!("Reading station metadata: {}", sources.metadata.display());
    let locations = read_station_metadata(&sources.metadata)?;

    let mut stations = Vec::with_capacity(locations.len());
    for location in locations {
        let path = sources.series_path(&location.id);
        let series = if path.exists() {
            read_station_series(&path)?
        } else {
            log::warn!("No series file for station {} ({})", location.id, path.display());
            Vec::new()
        };

        log::debug!("Station {}: {} measurements", location.id, series.len());
        stations.push(StationRecord::new(
            location.id,
            location.longitude,
            location.latitude,
            series,
        ));
    }

    log::info!("Loaded {} stations", stations.len());
    Ok(stations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_metadata_comma_decimals() {
        let text = "Station;Longitude;Latitude\n01;5,7281;51,6392\n02;5,6930;51,6717\n";
        let locations = parse_station_metadata(text.as_bytes()).unwrap();

        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].id, "01");
        assert!((locations[0].longitude - 5.7281).abs() < 1e-12);
        assert!((locations[1].latitude - 51.6717).abs() < 1e-12);
    }

    #[test]
    fn test_series_with_missing_cells() {
        let text = "Measurement Time,5 cm VWC [m3/m3],5 cm Temp [oC],10 cm VWC [m3/m3],10 cm Temp [oC],20 cm VWC [m3/m3],20 cm Temp [oC],40 cm VWC [m3/m3],40 cm Temp [oC],80 cm VWC [m3/m3],80 cm Temp [oC]\n\
08-May-16 10:45:00,0.251,14.2,0.262,13.1,NaN,12.0,0.301,11.5,,10.9\n";
        let series = parse_station_series(text.as_bytes()).unwrap();

        assert_eq!(series.len(), 1);
        let m = &series[0];
        assert_eq!(
            m.time,
            NaiveDate::from_ymd_opt(2016, 5, 8).unwrap().and_hms_opt(10, 45, 0).unwrap()
        );
        assert_eq!(m.water_content(Depth::Cm5), Some(0.251));
        assert_eq!(m.temperature(Depth::Cm10), Some(13.1));
        assert_eq!(m.water_content(Depth::Cm20), None);
        assert_eq!(m.water_content(Depth::Cm80), None);
        assert_eq!(m.temperature(Depth::Cm80), Some(10.9));
    }

    #[test]
    fn test_short_series_row_rejected() {
        let text = "Measurement Time,5 cm VWC\n08-May-16 10:45:00,0.25\n";
        assert!(parse_station_series(text.as_bytes()).is_err());
    }
}
