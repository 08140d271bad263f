use approx::assert_abs_diff_eq;
use chrono::{NaiveDate, NaiveDateTime};
use ndarray::{array, Array2};
use optram::config::{Neighborhood, ProcessingConfig, ThetaRange};
use optram::types::{DepthReading, Measurement, MoistureUnits};
use optram::{
    Crs, GeoTransform, MultiBandProduct, PipelineConfig, RasterBand, RetrievalPipeline, StationRecord,
    StudyAreaPolygon,
};
use tempfile::TempDir;

const PRODUCT_ID: &str = "SENTINEL2A_20160508-104027-456_L2A_T31UFT_D";

// Hand-computed from the default trapezoid (i_d 0, s_d 2.5, i_w 4, s_w 13.5)
const NDVI: [[f64; 2]; 2] = [[2500.0 / 3500.0, 1.0 / 3.0], [0.5, 0.8]];
const STR: [[f64; 2]; 2] = [[1.6, 1.125], [2.205, 4.05]];
const W: [[f64; 2]; 2] = [[0.0, 7.0 / 184.0], [0.955 / 9.5, 2.05 / 12.8]];

fn grid() -> GeoTransform {
    GeoTransform::north_up(5.0, 52.0, 0.001, -0.001)
}

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2016, 5, 8).unwrap().and_hms_opt(h, m, 0).unwrap()
}

fn band(data: Array2<i16>) -> RasterBand<i16> {
    RasterBand::new(data, grid(), Crs::wgs84(), 0)
}

fn scene_bands(mask: Array2<i16>) -> Vec<RasterBand<i16>> {
    vec![
        band(array![[500, 1000], [800, 400]]),
        band(array![[3000, 2000], [2400, 3600]]),
        band(array![[2000, 2500], [1600, 1000]]),
        band(mask),
    ]
}

fn scene(mask: Array2<i16>) -> MultiBandProduct {
    MultiBandProduct {
        product_id: PRODUCT_ID.to_string(),
        acquired: NaiveDate::from_ymd_opt(2016, 5, 8)
            .unwrap()
            .and_hms_opt(10, 40, 27)
            .unwrap(),
        cloud_cover: Some(4.2),
        bands: scene_bands(mask),
    }
}

fn study_area() -> StudyAreaPolygon {
    StudyAreaPolygon::new(
        vec![(4.999, 52.001), (5.003, 52.001), (5.003, 51.997), (4.999, 51.997)],
        Crs::wgs84(),
    )
    .unwrap()
}

fn station() -> StationRecord {
    let reading = |theta: f64| {
        let mut readings = [DepthReading::default(); 5];
        readings[0].water_content = Some(theta);
        readings[0].temperature = Some(14.0);
        readings
    };
    StationRecord::new(
        "01",
        5.0015,
        51.9985,
        vec![
            Measurement { time: at(10, 45), readings: reading(0.35) },
            Measurement { time: at(11, 0), readings: reading(0.10) },
            Measurement { time: at(11, 15), readings: reading(0.40) },
        ],
    )
}

fn processing() -> ProcessingConfig {
    let mut config = ProcessingConfig::default();
    config.calibration.theta_range = ThetaRange::FullSeries;
    config.validation.neighborhood = Neighborhood::Pixel;
    config
}

#[test]
fn test_two_by_two_scene_hand_computed() {
    let pipeline = RetrievalPipeline::new(processing(), study_area()).unwrap();
    let run = pipeline.process_corpus(&[scene(Array2::zeros((2, 2)))]);

    assert!(run.failures.is_empty());
    assert_eq!(run.outputs.len(), 1);

    let wetness = &run.outputs[0].wetness;
    assert_eq!(wetness.units, MoistureUnits::RelativeWetness);
    assert_eq!(wetness.band().geo_transform(), &grid());
    for r in 0..2 {
        for c in 0..2 {
            assert_abs_diff_eq!(wetness.band().data()[[r, c]], W[r][c], epsilon = 1e-9);
        }
    }

    let stations = vec![station()];
    let calibrated = pipeline.calibrate(&run, &stations).unwrap();
    let coeffs = calibrated.coefficients;
    assert_abs_diff_eq!(coeffs.w_min, W[0][1], epsilon = 1e-9);
    assert_abs_diff_eq!(coeffs.w_max, W[1][1], epsilon = 1e-9);
    assert_eq!((coeffs.theta_min, coeffs.theta_max), (0.10, 0.40));

    let theta = calibrated.rasters[0].band().data();
    // W = 0 is outside the plausibility band but still calibrated
    assert_abs_diff_eq!(theta[[0, 0]], coeffs.b, epsilon = 1e-9);
    assert_abs_diff_eq!(theta[[0, 1]], 0.10, epsilon = 1e-9);
    assert_abs_diff_eq!(theta[[1, 1]], 0.40, epsilon = 1e-9);
    let expected = 0.10 + 0.30 * (W[1][0] - W[0][1]) / (W[1][1] - W[0][1]);
    assert_abs_diff_eq!(theta[[1, 0]], expected, epsilon = 1e-9);

    let report = pipeline.validate(&calibrated, &stations).unwrap();
    assert_eq!(report.samples.len(), 1);
    assert_eq!(report.samples[0].acquired, at(10, 45));
    let (measured, estimated) = report.samples[0].pair().unwrap();
    assert_abs_diff_eq!(measured, 0.35, epsilon = 1e-12);
    assert_abs_diff_eq!(estimated, 0.40, epsilon = 1e-9);
    assert_abs_diff_eq!(report.summary.rmse, 0.05, epsilon = 1e-9);
    assert_abs_diff_eq!(report.summary.mae, 0.05, epsilon = 1e-9);
    assert_abs_diff_eq!(report.summary.r_squared, 1.0 - 0.0025 / 0.1225, epsilon = 1e-9);
}

#[test]
fn test_indices_of_hand_computed_scene() {
    let pipeline = RetrievalPipeline::new(processing(), study_area())
        .unwrap()
        .with_scatter(None);
    let output = pipeline.process_scene(&scene(Array2::zeros((2, 2)))).unwrap();

    assert_eq!(output.scatter.len(), 4);
    for point in &output.scatter {
        let hit = (0..2)
            .flat_map(|r| (0..2).map(move |c| (r, c)))
            .any(|(r, c)| (point.ndvi - NDVI[r][c]).abs() < 1e-9 && (point.str_index - STR[r][c]).abs() < 1e-9);
        assert!(hit, "unexpected point {:?}", point);
    }
}

#[test]
fn test_cloud_flag_removes_pixel() {
    let mut config = processing();
    config.retain_raw = true;
    let pipeline = RetrievalPipeline::new(config, study_area()).unwrap();

    let output = pipeline.process_scene(&scene(array![[0, 0], [0, 8]])).unwrap();
    assert!(output.wetness.band().data()[[1, 1]].is_nan());
    assert_eq!(output.wetness.band().valid_count(), 3);

    let raw = output.raw.unwrap();
    assert_eq!(raw.band_count(), 3);
    assert_eq!(raw.bands[0].data()[[1, 1]], 0);
    assert_eq!(raw.bands[0].data()[[0, 1]], 1000);
}

#[test]
fn test_failed_scene_does_not_halt_batch() {
    let pipeline = RetrievalPipeline::new(processing(), study_area()).unwrap();

    let mut misplaced = scene(Array2::zeros((2, 2)));
    misplaced.product_id = "SENTINEL2B_20160511-105012-000_L2A_T31UFT_D".to_string();
    let far = GeoTransform::north_up(10.0, 45.0, 0.001, -0.001);
    misplaced.bands = misplaced
        .bands
        .iter()
        .map(|b| RasterBand::new(b.data().clone(), far, Crs::wgs84(), 0))
        .collect();

    let run = pipeline.process_corpus(&[scene(Array2::zeros((2, 2))), misplaced]);
    assert_eq!(run.outputs.len(), 1);
    assert_eq!(run.failures.len(), 1);
    assert!(run.failures[0].product_id.starts_with("SENTINEL2B"));
}

#[test]
fn test_full_run_from_files() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = TempDir::new().unwrap();
    let root = dir.path();

    let names = ["B4.tif", "B8.tif", "B11.tif", "CLM.tif"];
    let bands = scene_bands(Array2::zeros((2, 2)));
    for (name, band) in names.iter().zip(&bands) {
        optram::io::write_bands(&[band], root.join(name)).unwrap();
    }

    let area = root.join("area.geojson");
    std::fs::write(
        &area,
        r#"{"type": "Polygon", "coordinates": [[[4.999, 52.001], [5.003, 52.001], [5.003, 51.997], [4.999, 51.997], [4.999, 52.001]]]}"#,
    )
    .unwrap();

    let series_dir = root.join("series");
    std::fs::create_dir_all(&series_dir).unwrap();
    std::fs::write(root.join("stations.csv"), "Station;Longitude;Latitude\n01;5,0015;51,9985\n").unwrap();
    std::fs::write(
        series_dir.join("01.csv"),
        "Time,VWC5,T5,VWC10,T10,VWC20,T20,VWC40,T40,VWC80,T80\n\
08-May-16 10:45:00,0.35,14.0,,,,,,,,\n\
08-May-16 11:00:00,0.10,14.1,,,,,,,,\n\
08-May-16 11:15:00,0.40,14.3,,,,,,,,\n",
    )
    .unwrap();

    let out = root.join("out");
    let band_files: Vec<String> = names
        .iter()
        .map(|n| root.join(n).to_string_lossy().into_owned())
        .collect();
    let config_json = serde_json::json!({
        "study_area": area,
        "scenes": [
            { "product_id": PRODUCT_ID, "cloud_cover": 4.2, "band_files": band_files },
            { "product_id": "SENTINEL2A_20160518-103020-461_L2A_T31UFT_D", "cloud_cover": 93.0, "band_files": band_files }
        ],
        "max_cloud_cover": 50.0,
        "processing": {
            "calibration": { "theta_range": "full_series" },
            "validation": { "neighborhood": { "mode": "pixel" } }
        },
        "stations": { "metadata": root.join("stations.csv"), "series_dir": series_dir },
        "output_dir": out,
        "write_wetness": true,
        "scatter": { "output": root.join("scatter.csv") }
    });
    let config_path = root.join("config.json");
    std::fs::write(&config_path, config_json.to_string()).unwrap();

    let config = PipelineConfig::from_file(&config_path).unwrap();
    let report = optram::run(&config).unwrap();

    assert_eq!(report.scenes_processed, vec![PRODUCT_ID.to_string()]);
    assert_eq!(report.scenes_rejected.len(), 1);
    assert!(report.failures.is_empty());
    let metrics = report.metrics.unwrap();
    assert_eq!(metrics.paired, 1);
    assert_abs_diff_eq!(metrics.rmse, 0.05, epsilon = 1e-6);

    let sm = optram::io::read_band::<f64, _>(out.join("SM_20160508-104027.tif"), f64::NAN).unwrap();
    assert_eq!((sm.width(), sm.height()), (2, 2));
    assert!(sm.data()[[0, 0]] < 0.10);
    assert_abs_diff_eq!(sm.data()[[1, 1]], 0.40, epsilon = 1e-6);

    assert!(out.join("wetness").join("SM_20160508-104027.tif").exists());
    assert!(out.join("validation_samples.csv").exists());

    let metrics_json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("metrics.json")).unwrap()).unwrap();
    assert!(metrics_json["calibration"]["a"].as_f64().unwrap() > 0.0);

    let scatter = std::fs::read_to_string(root.join("scatter.csv")).unwrap();
    assert_eq!(scatter.lines().count(), 5);
}
