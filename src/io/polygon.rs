use crate::types::{Crs, OptramError, OptramResult, StudyAreaPolygon};
use geo::{Geometry, Polygon};
use geojson::GeoJson;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Load the study-area ring from a GeoJSON file.
///
/// Accepts a bare Polygon/MultiPolygon geometry, a Feature, a
/// FeatureCollection or a JSON array of geometries; the exterior ring of the
/// first polygon found is used.
pub fn read_study_area<P: AsRef<Path>>(path: P, crs: &Crs) -> OptramResult<StudyAreaPolygon> {
    log::info!("Reading study area: {}", path.as_ref().display());
    let text = fs::read_to_string(path)?;
    parse_study_area(&text, crs)
}

pub fn parse_study_area(text: &str, crs: &Crs) -> OptramResult<StudyAreaPolygon> {
    let documents = if text.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<GeoJson>>(text)?
    } else {
        vec![GeoJson::from_str(text)?]
    };

    let mut polygon = None;
    for document in documents {
        polygon = first_polygon(document)?;
        if polygon.is_some() {
            break;
        }
    }
    let polygon = polygon.ok_or_else(|| {
        OptramError::InvalidFormat("no polygon geometry found in study area GeoJSON".to_string())
    })?;

    let vertices: Vec<(f64, f64)> = polygon.exterior().coords().map(|c| (c.x, c.y)).collect();
    log::debug!("Study area ring has {} vertices", vertices.len());
    StudyAreaPolygon::new(vertices, crs.clone())
}

fn first_polygon(document: GeoJson) -> OptramResult<Option<Polygon<f64>>> {
    let geometries = match document {
        GeoJson::Geometry(geometry) => vec![geometry],
        GeoJson::Feature(feature) => feature.geometry.into_iter().collect(),
        GeoJson::FeatureCollection(collection) => collection
            .features
            .into_iter()
            .filter_map(|feature| feature.geometry)
            .collect(),
    };

    for geometry in geometries {
        match Geometry::<f64>::try_from(geometry)? {
            Geometry::Polygon(polygon) => return Ok(Some(polygon)),
            Geometry::MultiPolygon(multi) => {
                if let Some(polygon) = multi.0.into_iter().next() {
                    return Ok(Some(polygon));
                }
            }
            _ => {}
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_collection() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[5.6, 51.6], [5.8, 51.6], [5.8, 51.7], [5.6, 51.7], [5.6, 51.6]]]
                }
            }]
        }"#;

        let polygon = parse_study_area(json, &Crs::wgs84()).unwrap();
        assert_eq!(polygon.vertices().len(), 5);
        assert_eq!(polygon.bounds(), (5.6, 51.6, 5.8, 51.7));
    }

    #[test]
    fn test_geometry_list_and_open_ring() {
        // geo closes the ring
        let json = r#"[{"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1]]]}]"#;

        let polygon = parse_study_area(json, &Crs::wgs84()).unwrap();
        let vertices = polygon.vertices();
        assert_eq!(vertices.len(), 4);
        assert_eq!(vertices.first(), vertices.last());
    }

    #[test]
    fn test_multipolygon_uses_first_member() {
        let json = r#"{"type": "MultiPolygon", "coordinates": [
            [[[0, 0], [2, 0], [2, 2], [0, 0]]],
            [[[10, 10], [12, 10], [12, 12], [10, 10]]]
        ]}"#;

        let polygon = parse_study_area(json, &Crs::wgs84()).unwrap();
        assert_eq!(polygon.bounds(), (0.0, 0.0, 2.0, 2.0));
    }

    #[test]
    fn test_point_geometry_rejected() {
        let json = r#"{"type": "Point", "coordinates": [5.6, 51.6]}"#;
        assert!(parse_study_area(json, &Crs::wgs84()).is_err());
    }

    #[test]
    fn test_malformed_geojson_rejected() {
        let json = r#"{"type": "Polygon", "coordinates": "nope"}"#;
        assert!(matches!(parse_study_area(json, &Crs::wgs84()), Err(OptramError::GeoJson(_))));
    }
}
