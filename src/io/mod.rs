//! File readers and writers for rasters, study areas, stations and scene identifiers

pub mod polygon;
pub mod product;
pub mod raster;
pub mod station;

// Re-export main functions
pub use polygon::{parse_study_area, read_study_area};
pub use product::{parse_acquisition_time, select_scenes, sm_file_name, SceneSelection};
pub use raster::{read_band, read_product, write_band, write_bands};
pub use station::{load_stations, parse_station_metadata, parse_station_series, StationLocation};
