//! Pipeline configuration.
//!
//! Every tunable the retrieval chain uses is carried here and handed to the
//! stages explicitly; defaults reproduce the Raam study-area workflow.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::types::{Crs, Depth, DnSample, OptramError, OptramResult};

/// Position of each reflectance band in the aligned stack. The quality mask
/// is always the last band and cannot be given a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandRoles {
    pub red: usize,
    pub nir: usize,
    pub swir: usize,
}

impl Default for BandRoles {
    fn default() -> Self {
        Self { red: 0, nir: 1, swir: 2 }
    }
}

impl BandRoles {
    pub fn max_index(&self) -> usize {
        self.red.max(self.nir).max(self.swir)
    }
}

/// Plausible index ranges; pixels outside become nodata in both indices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierBounds {
    pub ndvi_min: f64,
    pub ndvi_max: f64,
    pub str_min: f64,
    pub str_max: f64,
}

impl Default for OutlierBounds {
    fn default() -> Self {
        Self {
            ndvi_min: 0.0,
            ndvi_max: 2.0,
            str_min: 0.0,
            str_max: 40.0,
        }
    }
}

/// Index Calculator parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Digital number to reflectance divisor
    pub scale_factor: f64,
    pub bands: BandRoles,
    pub outliers: OutlierBounds,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            scale_factor: 10_000.0,
            bands: BandRoles::default(),
            outliers: OutlierBounds::default(),
        }
    }
}

/// Site-calibrated dry and wet edges of the NDVI-STR trapezoid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptramParams {
    pub dry_intercept: f64,
    pub dry_slope: f64,
    pub wet_intercept: f64,
    pub wet_slope: f64,
    /// Denominators smaller than this in magnitude yield nodata
    pub denominator_epsilon: f64,
}

impl Default for OptramParams {
    fn default() -> Self {
        Self {
            dry_intercept: 0.0,
            dry_slope: 2.5,
            wet_intercept: 4.0,
            wet_slope: 13.5,
            denominator_epsilon: 1e-9,
        }
    }
}

/// Where the calibration line crosses the wetness axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationAnchor {
    /// `b = θ_min − a·W_min`: W_min maps to θ_min and W_max to θ_max
    #[default]
    MinimumWetness,
    /// `b = θ_min`: θ = a·W + θ_min
    Origin,
}

/// Which ground measurements bound the water-content range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThetaRange {
    /// Only measurements at the corpus' rounded acquisition times
    #[default]
    Acquisitions,
    /// Every measurement in the station series
    FullSeries,
}

/// Calibrator parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    pub depth: Depth,
    pub plausible_min: f64,
    pub plausible_max: f64,
    pub anchor: CalibrationAnchor,
    pub theta_range: ThetaRange,
    /// Write implausible wetness pixels as nodata in the final θ raster.
    /// Off by default: they only drop out of the wetness range statistics.
    pub mask_implausible: bool,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            depth: Depth::Cm5,
            plausible_min: 0.01,
            plausible_max: 0.35,
            anchor: CalibrationAnchor::default(),
            theta_range: ThetaRange::default(),
            mask_implausible: false,
        }
    }
}

/// How an estimate is read at a station location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Neighborhood {
    /// The pixel containing the station
    Pixel,
    /// Median of the valid pixels in a square window centred on the station
    Median { window: usize },
}

impl Default for Neighborhood {
    fn default() -> Self {
        Neighborhood::Median { window: 3 }
    }
}

/// Validation Matcher parameters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationParams {
    pub neighborhood: Neighborhood,
    pub depth: Depth,
}

/// Numeric parameters of the retrieval chain, free of any paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Sentinel for masked or missing digital numbers
    pub nodata: DnSample,
    pub indices: IndexParams,
    pub optram: OptramParams,
    pub calibration: CalibrationParams,
    pub validation: ValidationParams,
    /// Keep each scene's cloud-masked DN stack in its output
    pub retain_raw: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            nodata: 0,
            indices: IndexParams::default(),
            optram: OptramParams::default(),
            calibration: CalibrationParams::default(),
            validation: ValidationParams::default(),
            retain_raw: false,
        }
    }
}

impl ProcessingConfig {
    pub fn validate(&self) -> OptramResult<()> {
        let idx = &self.indices;
        if !(idx.scale_factor.is_finite() && idx.scale_factor > 0.0) {
            return Err(OptramError::Config(format!(
                "scale_factor must be positive, got {}",
                idx.scale_factor
            )));
        }

        let roles = idx.bands;
        if roles.red == roles.nir || roles.red == roles.swir || roles.nir == roles.swir {
            return Err(OptramError::Config(format!(
                "band roles must be distinct, got {:?}",
                roles
            )));
        }

        let o = &idx.outliers;
        if o.ndvi_min > o.ndvi_max || o.str_min > o.str_max {
            return Err(OptramError::Config(format!("inverted outlier bounds: {:?}", o)));
        }

        let p = &self.optram;
        let edges = [p.dry_intercept, p.dry_slope, p.wet_intercept, p.wet_slope];
        if edges.iter().any(|v| !v.is_finite()) {
            return Err(OptramError::Config("OPTRAM edge parameters must be finite".to_string()));
        }
        if !(p.denominator_epsilon >= 0.0) {
            return Err(OptramError::Config(
                "denominator_epsilon must be non-negative".to_string(),
            ));
        }

        let c = &self.calibration;
        if !(c.plausible_min < c.plausible_max) {
            return Err(OptramError::Config(format!(
                "plausibility band [{}, {}] is empty",
                c.plausible_min, c.plausible_max
            )));
        }

        if let Neighborhood::Median { window } = self.validation.neighborhood {
            if window == 0 || window % 2 == 0 {
                return Err(OptramError::Config(format!(
                    "neighborhood window must be odd and positive, got {}",
                    window
                )));
            }
        }

        Ok(())
    }
}

/// A scene as handed over by the catalogue/extraction collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSource {
    pub product_id: String,
    #[serde(default)]
    pub cloud_cover: Option<f64>,
    /// Reflectance bands in stack order, quality mask last
    pub band_files: Vec<PathBuf>,
}

/// Ground station inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSources {
    /// `;`-delimited station locations
    pub metadata: PathBuf,
    pub series_dir: PathBuf,
    /// File name of a station series, `{id}` replaced by the station id
    #[serde(default = "default_series_pattern")]
    pub series_pattern: String,
}

fn default_series_pattern() -> String {
    "{id}.csv".to_string()
}

impl StationSources {
    pub fn series_path(&self, station_id: &str) -> PathBuf {
        self.series_dir
            .join(self.series_pattern.replace("{id}", station_id))
    }
}

/// NDVI-STR scatter export used to fit the trapezoid edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScatterParams {
    pub output: PathBuf,
    /// Block-average the index grids by this factor before sampling
    #[serde(default)]
    pub coarsen: Option<usize>,
}

fn default_max_cloud_cover() -> f64 {
    101.0
}

/// Complete run description, loaded from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// GeoJSON file holding the study-area polygon
    pub study_area: PathBuf,
    #[serde(default = "Crs::wgs84")]
    pub study_area_crs: Crs,
    pub scenes: Vec<SceneSource>,
    /// Scenes with a higher cloud-cover percentage are skipped
    #[serde(default = "default_max_cloud_cover")]
    pub max_cloud_cover: f64,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub stations: Option<StationSources>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Also write the uncalibrated W rasters
    #[serde(default)]
    pub write_wetness: bool,
    #[serde(default)]
    pub scatter: Option<ScatterParams>,
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> OptramResult<Self> {
        log::info!("Loading pipeline configuration: {}", path.as_ref().display());

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: PipelineConfig = serde_json::from_reader(reader)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> OptramResult<()> {
        self.processing.validate()?;

        if !(self.max_cloud_cover >= 0.0) {
            return Err(OptramError::Config(format!(
                "max_cloud_cover must be non-negative, got {}",
                self.max_cloud_cover
            )));
        }

        // reflectance bands plus the trailing quality mask
        let required = self.processing.indices.bands.max_index() + 2;
        for scene in &self.scenes {
            if scene.band_files.len() < required {
                return Err(OptramError::Config(format!(
                    "{} lists {} band files, at least {} needed (mask last)",
                    scene.product_id,
                    scene.band_files.len(),
                    required
                )));
            }
        }

        if let Some(scatter) = &self.scatter {
            if scatter.coarsen == Some(0) {
                return Err(OptramError::Config("scatter coarsen factor must be >= 1".to_string()));
            }
        }

        Ok(())
    }
}
