use chrono::NaiveDateTime;
use ndarray::Array2;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Digital number as delivered in the surface reflectance products (16-bit signed)
pub type DnSample = i16;

/// Floating point sample grid used for indices, wetness and water content
pub type FloatGrid = Array2<f64>;

/// Sample types a raster band can hold
pub trait RasterElement: Copy + PartialEq + ToPrimitive + Send + Sync + fmt::Debug {
    /// Whether this sample should be treated as missing
    fn is_nodata(self, nodata: Self) -> bool {
        self == nodata
    }
}

impl RasterElement for u8 {}
impl RasterElement for u16 {}
impl RasterElement for i16 {}
impl RasterElement for i32 {}

impl RasterElement for f32 {
    fn is_nodata(self, nodata: Self) -> bool {
        self.is_nan() || self == nodata
    }
}

impl RasterElement for f64 {
    fn is_nodata(self, nodata: Self) -> bool {
        self.is_nan() || self == nodata
    }
}

/// Coordinate reference system, kept as the definition string GDAL understands
/// (`EPSG:32631`, WKT, PROJ string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs(String);

impl Crs {
    pub fn new(definition: impl Into<String>) -> Self {
        Self(definition.into())
    }

    pub fn epsg(code: u32) -> Self {
        Self(format!("EPSG:{}", code))
    }

    /// Geographic longitude/latitude on WGS84
    pub fn wgs84() -> Self {
        Self::epsg(4326)
    }

    pub fn definition(&self) -> &str {
        &self.0
    }

    /// Textual equivalence, ignoring surrounding whitespace and case
    pub fn is_same(&self, other: &Crs) -> bool {
        self.0.trim().eq_ignore_ascii_case(other.0.trim())
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // WKT definitions are long; the first line is enough to identify them
        match self.0.lines().next() {
            Some(first) if first.len() < self.0.len() => write!(f, "{}...", first),
            _ => write!(f, "{}", self.0),
        }
    }
}

/// Affine mapping between pixel (col, row) and map (x, y) coordinates,
/// laid out like GDAL's six coefficients
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation terms
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinate of a fractional pixel position (col, row)
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Map coordinate of the centre of pixel (col, row)
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        self.pixel_to_geo(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Inverse mapping to a fractional (col, row); `None` for a singular transform
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < f64::EPSILON {
            return None;
        }

        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (-self.rotation_y * dx + self.pixel_width * dy) / det;
        Some((col, row))
    }

    /// Transform of a sub-window whose top-left pixel is (col_off, row_off)
    pub fn with_offset(&self, col_off: usize, row_off: usize) -> Self {
        let (x, y) = self.pixel_to_geo(col_off as f64, row_off as f64);
        Self {
            top_left_x: x,
            top_left_y: y,
            ..*self
        }
    }

    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        let tol = 1e-9 * self.pixel_width.abs().max(1.0);
        self.to_gdal()
            .iter()
            .zip(other.to_gdal().iter())
            .all(|(a, b)| (a - b).abs() <= tol)
    }
}

/// One 2-D grid of samples with its georeferencing. Stages never mutate a
/// band; they build a new one.
#[derive(Debug, Clone)]
pub struct RasterBand<T> {
    data: Array2<T>,
    geo_transform: GeoTransform,
    crs: Crs,
    nodata: T,
}

impl<T: RasterElement> RasterBand<T> {
    pub fn new(data: Array2<T>, geo_transform: GeoTransform, crs: Crs, nodata: T) -> Self {
        Self {
            data,
            geo_transform,
            crs,
            nodata,
        }
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn into_data(self) -> Array2<T> {
        self.data
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn pixel_count(&self) -> usize {
        self.data.len()
    }

    pub fn geo_transform(&self) -> &GeoTransform {
        &self.geo_transform
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn nodata(&self) -> T {
        self.nodata
    }

    pub fn is_nodata_at(&self, row: usize, col: usize) -> bool {
        self.data
            .get((row, col))
            .map_or(true, |v| v.is_nodata(self.nodata))
    }

    /// Sample at (row, col) unless it is out of range or nodata
    pub fn value(&self, row: usize, col: usize) -> Option<T> {
        self.data
            .get((row, col))
            .copied()
            .filter(|v| !v.is_nodata(self.nodata))
    }

    /// All samples that are not nodata
    pub fn valid_values(&self) -> impl Iterator<Item = T> + '_ {
        let nodata = self.nodata;
        self.data.iter().copied().filter(move |v| !v.is_nodata(nodata))
    }

    pub fn valid_count(&self) -> usize {
        self.valid_values().count()
    }

    /// New band on the same grid carrying different samples
    pub fn derive<U: RasterElement>(&self, data: Array2<U>, nodata: U) -> OptramResult<RasterBand<U>> {
        if data.dim() != self.data.dim() {
            return Err(OptramError::Alignment(format!(
                "derived grid {:?} does not match source grid {:?}",
                data.dim(),
                self.data.dim()
            )));
        }
        Ok(RasterBand::new(data, self.geo_transform, self.crs.clone(), nodata))
    }

    /// Same shape, geotransform and CRS
    pub fn same_grid<U: RasterElement>(&self, other: &RasterBand<U>) -> bool {
        self.data.dim() == other.data.dim()
            && self.geo_transform.approx_eq(&other.geo_transform)
            && self.crs.is_same(&other.crs)
    }
}

/// Multi-band surface reflectance scene. The last band is the quality
/// (cloud) mask until the Cloud Masker removes it.
#[derive(Debug, Clone)]
pub struct MultiBandProduct {
    pub product_id: String,
    pub acquired: NaiveDateTime,
    pub cloud_cover: Option<f64>,
    pub bands: Vec<RasterBand<DnSample>>,
}

impl MultiBandProduct {
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn band(&self, index: usize) -> OptramResult<&RasterBand<DnSample>> {
        self.bands.get(index).ok_or_else(|| {
            OptramError::Alignment(format!(
                "{}: band {} requested but product has {} bands",
                self.product_id,
                index,
                self.bands.len()
            ))
        })
    }

    /// True when every band shares the first band's grid
    pub fn is_aligned(&self) -> bool {
        match self.bands.split_first() {
            Some((first, rest)) => rest.iter().all(|b| b.same_grid(first)),
            None => true,
        }
    }

    /// Same identity, different bands
    pub fn with_bands(&self, bands: Vec<RasterBand<DnSample>>) -> Self {
        Self {
            product_id: self.product_id.clone(),
            acquired: self.acquired,
            cloud_cover: self.cloud_cover,
            bands,
        }
    }
}

/// Closed exterior ring delimiting the study area
#[derive(Debug, Clone, PartialEq)]
pub struct StudyAreaPolygon {
    vertices: Vec<(f64, f64)>,
    crs: Crs,
}

impl StudyAreaPolygon {
    /// Builds the ring, closing it when the last vertex does not repeat the first
    pub fn new(mut vertices: Vec<(f64, f64)>, crs: Crs) -> OptramResult<Self> {
        if let (Some(&first), Some(&last)) = (vertices.first(), vertices.last()) {
            if first != last {
                vertices.push(first);
            }
        }

        // three distinct corners plus the closing vertex
        if vertices.len() < 4 {
            return Err(OptramError::InvalidFormat(format!(
                "study area ring needs at least 3 distinct vertices, got {}",
                vertices.len().saturating_sub(1)
            )));
        }

        if vertices.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(OptramError::InvalidFormat(
                "study area ring contains non-finite coordinates".to_string(),
            ));
        }

        Ok(Self { vertices, crs })
    }

    pub fn vertices(&self) -> &[(f64, f64)] {
        &self.vertices
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    /// (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.vertices.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(min_x, min_y, max_x, max_y), &(x, y)| {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            },
        )
    }
}

/// NDVI and STR on a shared grid. A pixel invalid in either index is
/// nodata (NaN) in both.
#[derive(Debug, Clone)]
pub struct IndexRaster {
    ndvi: RasterBand<f64>,
    str_band: RasterBand<f64>,
    valid: Array2<bool>,
}

impl IndexRaster {
    /// Joins the two bands, propagating nodata from either into both
    pub fn new(ndvi: RasterBand<f64>, str_band: RasterBand<f64>) -> OptramResult<Self> {
        if !ndvi.same_grid(&str_band) {
            return Err(OptramError::Alignment(
                "NDVI and STR bands are not co-registered".to_string(),
            ));
        }

        let valid = ndarray::Zip::from(ndvi.data())
            .and(str_band.data())
            .map_collect(|&n, &s| !n.is_nodata(ndvi.nodata()) && !s.is_nodata(str_band.nodata()));

        let mut ndvi_data = ndvi.data().clone();
        let mut str_data = str_band.data().clone();
        ndarray::Zip::from(&mut ndvi_data)
            .and(&mut str_data)
            .and(&valid)
            .for_each(|n, s, &ok| {
                if !ok {
                    *n = f64::NAN;
                    *s = f64::NAN;
                }
            });

        Ok(Self {
            ndvi: ndvi.derive(ndvi_data, f64::NAN)?,
            str_band: str_band.derive(str_data, f64::NAN)?,
            valid,
        })
    }

    pub fn ndvi(&self) -> &RasterBand<f64> {
        &self.ndvi
    }

    pub fn str_band(&self) -> &RasterBand<f64> {
        &self.str_band
    }

    pub fn valid(&self) -> &Array2<bool> {
        &self.valid
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }
}

/// Physical meaning of the samples in a [`SoilMoistureRaster`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoistureUnits {
    /// OPTRAM wetness W in [0, 1]
    RelativeWetness,
    /// Volumetric water content θ in m³/m³
    VolumetricWaterContent,
}

/// Single-band soil moisture estimate of one scene
#[derive(Debug, Clone)]
pub struct SoilMoistureRaster {
    pub product_id: String,
    pub acquired: NaiveDateTime,
    pub units: MoistureUnits,
    band: RasterBand<f64>,
}

impl SoilMoistureRaster {
    pub fn new(
        product_id: impl Into<String>,
        acquired: NaiveDateTime,
        units: MoistureUnits,
        band: RasterBand<f64>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            acquired,
            units,
            band,
        }
    }

    pub fn band(&self) -> &RasterBand<f64> {
        &self.band
    }

    /// Same scene, new samples and units
    pub fn replace_band(&self, band: RasterBand<f64>, units: MoistureUnits) -> Self {
        Self {
            product_id: self.product_id.clone(),
            acquired: self.acquired,
            units,
            band,
        }
    }
}

/// Sensor depths of the ground stations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Depth {
    #[serde(rename = "5cm")]
    Cm5,
    #[serde(rename = "10cm")]
    Cm10,
    #[serde(rename = "20cm")]
    Cm20,
    #[serde(rename = "40cm")]
    Cm40,
    #[serde(rename = "80cm")]
    Cm80,
}

impl Depth {
    /// Column order of the station series files
    pub const ALL: [Depth; 5] = [Depth::Cm5, Depth::Cm10, Depth::Cm20, Depth::Cm40, Depth::Cm80];

    pub fn centimetres(self) -> u32 {
        match self {
            Depth::Cm5 => 5,
            Depth::Cm10 => 10,
            Depth::Cm20 => 20,
            Depth::Cm40 => 40,
            Depth::Cm80 => 80,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Depth::Cm5 => 0,
            Depth::Cm10 => 1,
            Depth::Cm20 => 2,
            Depth::Cm40 => 3,
            Depth::Cm80 => 4,
        }
    }
}

impl Default for Depth {
    fn default() -> Self {
        Depth::Cm5
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cm", self.centimetres())
    }
}

/// Water content (m³/m³) and temperature (°C) at one depth
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthReading {
    pub water_content: Option<f64>,
    pub temperature: Option<f64>,
}

/// One row of a station series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub time: NaiveDateTime,
    pub readings: [DepthReading; 5],
}

impl Measurement {
    pub fn water_content(&self, depth: Depth) -> Option<f64> {
        self.readings[depth.index()].water_content
    }

    pub fn temperature(&self, depth: Depth) -> Option<f64> {
        self.readings[depth.index()].temperature
    }
}

/// Ground station with its WGS84 position and time-ordered series
#[derive(Debug, Clone)]
pub struct StationRecord {
    pub id: String,
    pub longitude: f64,
    pub latitude: f64,
    series: Vec<Measurement>,
}

impl StationRecord {
    pub fn new(id: impl Into<String>, longitude: f64, latitude: f64, mut series: Vec<Measurement>) -> Self {
        series.sort_by_key(|m| m.time);
        Self {
            id: id.into(),
            longitude,
            latitude,
            series,
        }
    }

    pub fn series(&self) -> &[Measurement] {
        &self.series
    }

    /// Measurement recorded exactly at `time`
    pub fn measurement_at(&self, time: NaiveDateTime) -> Option<&Measurement> {
        self.series
            .binary_search_by_key(&time, |m| m.time)
            .ok()
            .map(|i| &self.series[i])
    }

    pub fn water_content_at(&self, time: NaiveDateTime, depth: Depth) -> Option<f64> {
        self.measurement_at(time).and_then(|m| m.water_content(depth))
    }
}

/// Estimate/measurement pair for one (scene, station)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationSample {
    pub product_id: String,
    /// Acquisition time rounded to the station's quarter-hour cadence
    pub acquired: NaiveDateTime,
    pub station_id: String,
    pub depth: Depth,
    pub measured: Option<f64>,
    pub estimated: Option<f64>,
}

impl ValidationSample {
    /// Both sides present
    pub fn pair(&self) -> Option<(f64, f64)> {
        match (self.measured, self.estimated) {
            (Some(m), Some(e)) => Some((m, e)),
            _ => None,
        }
    }

    pub fn is_paired(&self) -> bool {
        self.pair().is_some()
    }
}

/// Error types for soil moisture processing
#[derive(Debug, thiserror::Error)]
pub enum OptramError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Alignment error: {0}")]
    Alignment(String),

    #[error("Calibration error: {0}")]
    Calibration(String),

    #[error("Metric precondition failed: {measured} measured vs {estimated} estimated values")]
    MetricPrecondition { measured: usize, estimated: usize },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for soil moisture operations
pub type OptramResult<T> = Result<T, OptramError>;
