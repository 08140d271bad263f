use crate::types::{Crs, OptramResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};

/// Point transform between two coordinate reference systems.
///
/// Both sides use traditional GIS axis order (x = easting/longitude,
/// y = northing/latitude). When the two definitions are the same the
/// transform is the identity and GDAL is not involved.
pub struct Reprojector {
    source: Crs,
    target: Crs,
    transform: Option<CoordTransform>,
}

impl Reprojector {
    pub fn new(source: &Crs, target: &Crs) -> OptramResult<Self> {
        let transform = if source.is_same(target) {
            None
        } else {
            log::debug!("Building coordinate transform {} -> {}", source, target);
            let src = traditional_order(source)?;
            let dst = traditional_order(target)?;
            Some(CoordTransform::new(&src, &dst)?)
        };

        Ok(Self {
            source: source.clone(),
            target: target.clone(),
            transform,
        })
    }

    pub fn source(&self) -> &Crs {
        &self.source
    }

    pub fn target(&self) -> &Crs {
        &self.target
    }

    pub fn is_identity(&self) -> bool {
        self.transform.is_none()
    }

    pub fn transform_points(&self, points: &[(f64, f64)]) -> OptramResult<Vec<(f64, f64)>> {
        let transform = match &self.transform {
            Some(t) => t,
            None => return Ok(points.to_vec()),
        };

        let mut xs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let mut ys: Vec<f64> = points.iter().map(|p| p.1).collect();
        let mut zs = vec![0.0; points.len()];
        transform.transform_coords(&mut xs, &mut ys, &mut zs)?;

        Ok(xs.into_iter().zip(ys).collect())
    }

    pub fn transform_point(&self, x: f64, y: f64) -> OptramResult<(f64, f64)> {
        let transformed = self.transform_points(&[(x, y)])?;
        Ok(transformed.first().copied().unwrap_or((x, y)))
    }
}

fn traditional_order(crs: &Crs) -> OptramResult<SpatialRef> {
    let srs = SpatialRef::from_definition(crs.definition())?;
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(srs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_crs_is_identity() {
        let reprojector = Reprojector::new(&Crs::epsg(32631), &Crs::new("epsg:32631")).unwrap();
        assert!(reprojector.is_identity());

        let points = vec![(682_000.5, 5_722_000.25), (683_000.0, 5_721_000.0)];
        assert_eq!(reprojector.transform_points(&points).unwrap(), points);
    }

    #[test]
    fn test_wgs84_to_utm_central_meridian() {
        // 3°E on the equator is the false origin of UTM zone 31N
        let reprojector = Reprojector::new(&Crs::wgs84(), &Crs::epsg(32631)).unwrap();
        assert!(!reprojector.is_identity());

        let (x, y) = reprojector.transform_point(3.0, 0.0).unwrap();
        assert!((x - 500_000.0).abs() < 1e-3, "x = {}", x);
        assert!(y.abs() < 1e-3, "y = {}", y);
    }
}
