use crate::types::{Crs, DnSample, GeoTransform, MultiBandProduct, OptramError, OptramResult, RasterBand, RasterElement};
use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use num_traits::NumCast;
use std::path::Path;

/// Read the first band of a raster file with its georeferencing.
///
/// `fallback_nodata` is used when the file declares no nodata value or the
/// declared one does not fit `T`.
pub fn read_band<T, P>(path: P, fallback_nodata: T) -> OptramResult<RasterBand<T>>
where
    T: RasterElement + GdalType + NumCast,
    P: AsRef<Path>,
{
    log::debug!("Reading raster band: {}", path.as_ref().display());

    let dataset = Dataset::open(path.as_ref())?;
    let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let projection = dataset.projection();
    if projection.is_empty() {
        return Err(OptramError::InvalidFormat(format!(
            "{} carries no coordinate reference system",
            path.as_ref().display()
        )));
    }

    let (width, height) = dataset.raster_size();
    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband
        .no_data_value()
        .and_then(|v| <T as NumCast>::from(v))
        .unwrap_or(fallback_nodata);

    let buffer = rasterband.read_as::<T>((0, 0), (width, height), (width, height), None)?;
    let data = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| OptramError::InvalidFormat(format!("Failed to reshape raster data: {}", e)))?;

    log::debug!("Read {}x{} band, nodata {:?}", width, height, nodata);
    Ok(RasterBand::new(data, geo_transform, Crs::new(projection), nodata))
}

/// Read every band file of a scene into one product, in the given order
pub fn read_product<P: AsRef<Path>>(
    product_id: &str,
    acquired: chrono::NaiveDateTime,
    cloud_cover: Option<f64>,
    band_files: &[P],
    nodata: DnSample,
) -> OptramResult<MultiBandProduct> {
    log::info!("Loading {} band files for {}", band_files.len(), product_id);

    let bands = band_files
        .iter()
        .map(|path| read_band::<DnSample, _>(path, nodata))
        .collect::<OptramResult<Vec<_>>>()?;

    Ok(MultiBandProduct {
        product_id: product_id.to_string(),
        acquired,
        cloud_cover,
        bands,
    })
}

/// Write bands sharing one grid into a multi-band GeoTIFF
pub fn write_bands<T, P>(bands: &[&RasterBand<T>], output_path: P) -> OptramResult<()>
where
    T: RasterElement + GdalType,
    P: AsRef<Path>,
{
    let first = bands
        .first()
        .ok_or_else(|| OptramError::InvalidFormat("no bands to write".to_string()))?;
    if bands.iter().any(|b| !b.same_grid(first)) {
        return Err(OptramError::Alignment(format!(
            "bands written to {} do not share a grid",
            output_path.as_ref().display()
        )));
    }

    log::info!(
        "Writing {}-band GeoTIFF: {}",
        bands.len(),
        output_path.as_ref().display()
    );

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (width, height) = (first.width(), first.height());

    let mut dataset = driver.create_with_band_type::<T, _>(
        output_path.as_ref(),
        width as isize,
        height as isize,
        bands.len() as isize,
    )?;
    dataset.set_geo_transform(&first.geo_transform().to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_definition(first.crs().definition())?)?;

    for (i, band) in bands.iter().enumerate() {
        let mut rasterband = dataset.rasterband(i as isize + 1)?;
        let flat_data: Vec<T> = band.data().iter().copied().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
        rasterband.set_no_data_value(band.nodata().to_f64())?;
    }

    Ok(())
}

/// Write a single floating-point band (W or θ map)
pub fn write_band<P: AsRef<Path>>(band: &RasterBand<f64>, output_path: P) -> OptramResult<()> {
    write_bands(&[band], output_path)
}
