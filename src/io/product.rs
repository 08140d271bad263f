use crate::config::SceneSource;
use crate::types::{OptramError, OptramResult};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::sync::LazyLock;

static TIMESTAMP_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(\d{8})-(\d{6})"));

/// Acquisition timestamp embedded in a product identifier or output name.
///
/// Recognises the `YYYYMMDD-HHMMSS` group of identifiers such as
/// `SENTINEL2A_20160508-104027-456_L2A_T31UFT_D` and `SM_20160508-104027.tif`.
pub fn parse_acquisition_time(identifier: &str) -> OptramResult<NaiveDateTime> {
    let pattern = TIMESTAMP_PATTERN
        .as_ref()
        .map_err(|e| OptramError::InvalidFormat(format!("timestamp pattern: {}", e)))?;

    let captures = pattern.captures(identifier).ok_or_else(|| {
        OptramError::InvalidFormat(format!("no acquisition timestamp in '{}'", identifier))
    })?;

    let date = NaiveDate::parse_from_str(&captures[1], "%Y%m%d")
        .map_err(|e| OptramError::InvalidFormat(format!("bad date in '{}': {}", identifier, e)))?;
    let time = NaiveTime::parse_from_str(&captures[2], "%H%M%S")
        .map_err(|e| OptramError::InvalidFormat(format!("bad time in '{}': {}", identifier, e)))?;

    Ok(NaiveDateTime::new(date, time))
}

/// Output name of a scene's soil moisture raster
pub fn sm_file_name(acquired: NaiveDateTime) -> String {
    format!("SM_{}.tif", acquired.format("%Y%m%d-%H%M%S"))
}

/// Outcome of the cloud-cover filter over the catalogue
#[derive(Debug, Clone, Default)]
pub struct SceneSelection {
    pub accepted: Vec<SceneSource>,
    pub rejected: Vec<SceneSource>,
}

/// Keep scenes with `cloud_cover <= max_cloud_cover`. Scenes without a
/// cloud-cover figure are kept.
pub fn select_scenes(scenes: &[SceneSource], max_cloud_cover: f64) -> SceneSelection {
    let mut selection = SceneSelection::default();

    for scene in scenes {
        match scene.cloud_cover {
            Some(cover) if cover > max_cloud_cover => {
                log::warn!(
                    "Skipping {}: cloud cover {:.1}% above {:.1}%",
                    scene.product_id,
                    cover,
                    max_cloud_cover
                );
                selection.rejected.push(scene.clone());
            }
            _ => selection.accepted.push(scene.clone()),
        }
    }

    log::info!(
        "Scene selection: {} accepted, {} rejected",
        selection.accepted.len(),
        selection.rejected.len()
    );
    selection
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(id: &str, cover: Option<f64>) -> SceneSource {
        SceneSource {
            product_id: id.to_string(),
            cloud_cover: cover,
            band_files: Vec::new(),
        }
    }

    #[test]
    fn test_parse_product_identifier() {
        let t = parse_acquisition_time("SENTINEL2A_20160508-104027-456_L2A_T31UFT_D").unwrap();
        assert_eq!(t.format("%Y-%m-%d %H:%M:%S").to_string(), "2016-05-08 10:40:27");
    }

    #[test]
    fn test_sm_name_roundtrips_through_parser() {
        let t = parse_acquisition_time("SENTINEL2B_20170826-105518-000_L2A_T31UFT_D").unwrap();
        let name = sm_file_name(t);
        assert_eq!(name, "SM_20170826-105518.tif");
        assert_eq!(parse_acquisition_time(&name).unwrap(), t);
    }

    #[test]
    fn test_shared_pattern_across_threads() {
        let handles: Vec<_> = (1..=4u32)
            .map(|day| {
                std::thread::spawn(move || {
                    parse_acquisition_time(&format!("SENTINEL2A_201605{:02}-104027-456_L2A_T31UFT_D", day))
                })
            })
            .collect();

        for (day, handle) in (1..=4u32).zip(handles) {
            let t = handle.join().unwrap().unwrap();
            assert_eq!(t.format("%d %H%M%S").to_string(), format!("{:02} 104027", day));
        }
        assert!(TIMESTAMP_PATTERN.is_ok());
    }

    #[test]
    fn test_identifier_without_timestamp() {
        assert!(parse_acquisition_time("SENTINEL2A_L2A_T31UFT").is_err());
        // month 13 matches the pattern but is not a date
        assert!(parse_acquisition_time("S2_20161308-104027").is_err());
    }

    #[test]
    fn test_cloud_cover_selection() {
        let scenes = vec![
            scene("clear", Some(3.0)),
            scene("edge", Some(20.0)),
            scene("cloudy", Some(80.0)),
            scene("unknown", None),
        ];

        let selection = select_scenes(&scenes, 20.0);
        let accepted: Vec<_> = selection.accepted.iter().map(|s| s.product_id.as_str()).collect();
        assert_eq!(accepted, vec!["clear", "edge", "unknown"]);
        assert_eq!(selection.rejected.len(), 1);
        assert_eq!(selection.rejected[0].product_id, "cloudy");
    }
}
