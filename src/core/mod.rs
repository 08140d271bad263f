//! Core retrieval and validation stages

pub mod align;
pub mod calibrate;
pub mod cloud_mask;
pub mod crop;
pub mod indices;
pub mod metrics;
pub mod optram;
pub mod reproject;
pub mod scatter;
pub mod validation;

// Re-export main types
pub use align::GridAligner;
pub use calibrate::{CalibrationCoefficients, Calibrator};
pub use cloud_mask::CloudMasker;
pub use crop::{CropWindow, SpatialCropper};
pub use indices::IndexCalculator;
pub use metrics::{evaluate, mae, r_squared, residuals_by_acquisition, rmse, AcquisitionResiduals, ErrorSummary};
pub use optram::OptramRetriever;
pub use reproject::Reprojector;
pub use scatter::{coarsen, write_scatter_csv, IndexScatter, ScatterPoint};
pub use validation::{round_to_quarter_hour, ValidationMatcher};
