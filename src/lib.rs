//! optram: soil moisture retrieval from optical satellite reflectance
//!
//! Turns Sentinel-2 surface reflectance scenes into relative wetness maps
//! with the OPTRAM trapezoid model, calibrates them to volumetric water
//! content over the scene corpus and validates the result against ground
//! station series.

pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

// Re-export main types and functions for easier access
pub use config::{PipelineConfig, ProcessingConfig};
pub use pipeline::{run, RetrievalPipeline, RunReport};
pub use types::{
    Crs, Depth, GeoTransform, IndexRaster, MoistureUnits, MultiBandProduct, OptramError, OptramResult,
    RasterBand, SoilMoistureRaster, StationRecord, StudyAreaPolygon, ValidationSample,
};
