//! Two-phase retrieval run.
//!
//! Phase one turns every scene independently into a wetness raster (in
//! parallel with the `parallel` feature). Phase two waits for the whole
//! corpus, fits the calibration, converts every scene to water content and
//! validates the result against the ground stations.

use crate::config::{PipelineConfig, ProcessingConfig, SceneSource};
use crate::core::calibrate::{CalibrationCoefficients, Calibrator};
use crate::core::metrics::{evaluate, residuals_by_acquisition, AcquisitionResiduals, ErrorSummary};
use crate::core::scatter::{write_scatter_csv, IndexScatter, ScatterPoint};
use crate::core::validation::{acquisition_time, ValidationMatcher};
use crate::core::{CloudMasker, GridAligner, IndexCalculator, OptramRetriever, SpatialCropper};
use crate::io::{self, parse_acquisition_time, read_product, select_scenes, sm_file_name};
use crate::types::{
    MultiBandProduct, OptramError, OptramResult, SoilMoistureRaster, StationRecord, StudyAreaPolygon,
    ValidationSample,
};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

/// Everything phase one keeps of a scene
#[derive(Debug, Clone)]
pub struct SceneOutput {
    pub product_id: String,
    pub wetness: SoilMoistureRaster,
    /// Cloud-masked DN stack, kept only with `retain_raw`
    pub raw: Option<MultiBandProduct>,
    /// Empty unless a scatter export was requested
    pub scatter: Vec<ScatterPoint>,
}

/// A scene that could not be processed; the rest of the batch continues
#[derive(Debug, Clone, Serialize)]
pub struct SceneFailure {
    pub product_id: String,
    pub error: String,
}

/// Result of phase one over the corpus
#[derive(Debug, Clone, Default)]
pub struct CorpusRun {
    pub outputs: Vec<SceneOutput>,
    pub failures: Vec<SceneFailure>,
}

impl CorpusRun {
    pub fn wetness_rasters(&self) -> Vec<SoilMoistureRaster> {
        self.outputs.iter().map(|o| o.wetness.clone()).collect()
    }

    pub fn scatter_points(&self) -> Vec<ScatterPoint> {
        self.outputs.iter().flat_map(|o| o.scatter.iter().copied()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct CalibratedCorpus {
    pub coefficients: CalibrationCoefficients,
    pub rasters: Vec<SoilMoistureRaster>,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub samples: Vec<ValidationSample>,
    pub summary: ErrorSummary,
    pub residuals: Vec<AcquisitionResiduals>,
}

/// Summary of a complete run, written as `metrics.json`
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scenes_rejected: Vec<String>,
    pub scenes_processed: Vec<String>,
    pub failures: Vec<SceneFailure>,
    pub calibration: Option<CalibrationCoefficients>,
    pub metrics: Option<ErrorSummary>,
    pub residuals: Vec<AcquisitionResiduals>,
}

/// Scene chain from raw product to wetness, plus the corpus-level phases
pub struct RetrievalPipeline {
    config: ProcessingConfig,
    aligner: GridAligner,
    cropper: SpatialCropper,
    masker: CloudMasker,
    indices: IndexCalculator,
    retriever: OptramRetriever,
    scatter: Option<IndexScatter>,
}

impl RetrievalPipeline {
    pub fn new(config: ProcessingConfig, polygon: StudyAreaPolygon) -> OptramResult<Self> {
        config.validate()?;

        Ok(Self {
            aligner: GridAligner::new(),
            cropper: SpatialCropper::new(polygon),
            masker: CloudMasker::new(config.nodata),
            indices: IndexCalculator::new(config.indices),
            retriever: OptramRetriever::new(config.optram),
            scatter: None,
            config,
        })
    }

    /// Also collect NDVI-STR points of every scene
    pub fn with_scatter(mut self, coarsen: Option<usize>) -> Self {
        self.scatter = Some(IndexScatter::new(coarsen));
        self
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Align, crop, mask, compute indices and retrieve wetness for one scene
    pub fn process_scene(&self, product: &MultiBandProduct) -> OptramResult<SceneOutput> {
        log::info!("Processing scene {}", product.product_id);

        let aligned = self.aligner.align(product)?;
        let cropped = self.cropper.crop(&aligned)?;
        let masked = self.masker.apply(&cropped)?;
        let indices = self.indices.compute(&masked)?;

        let scatter = match &self.scatter {
            Some(scatter) => scatter.sample(&indices)?,
            None => Vec::new(),
        };

        let wetness = self
            .retriever
            .retrieve(&indices, &product.product_id, product.acquired)?;

        Ok(SceneOutput {
            product_id: product.product_id.clone(),
            wetness,
            raw: self.config.retain_raw.then_some(masked),
            scatter,
        })
    }

    /// Phase one over products already in memory
    pub fn process_corpus(&self, products: &[MultiBandProduct]) -> CorpusRun {
        log::info!("Processing {} scenes", products.len());

        #[cfg(feature = "parallel")]
        let results: Vec<(String, OptramResult<SceneOutput>)> = {
            use rayon::prelude::*;
            products
                .par_iter()
                .map(|p| (p.product_id.clone(), self.process_scene(p)))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let results: Vec<(String, OptramResult<SceneOutput>)> = products
            .iter()
            .map(|p| (p.product_id.clone(), self.process_scene(p)))
            .collect();

        Self::collect(results)
    }

    /// Phase one reading each scene from its band files
    pub fn process_sources(&self, scenes: &[SceneSource]) -> CorpusRun {
        log::info!("Processing {} scenes from disk", scenes.len());

        let load_and_process = |scene: &SceneSource| -> OptramResult<SceneOutput> {
            let acquired = parse_acquisition_time(&scene.product_id)?;
            let product = read_product(
                &scene.product_id,
                acquired,
                scene.cloud_cover,
                &scene.band_files,
                self.config.nodata,
            )?;
            self.process_scene(&product)
        };

        #[cfg(feature = "parallel")]
        let results: Vec<(String, OptramResult<SceneOutput>)> = {
            use rayon::prelude::*;
            scenes
                .par_iter()
                .map(|s| (s.product_id.clone(), load_and_process(s)))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let results: Vec<(String, OptramResult<SceneOutput>)> = scenes
            .iter()
            .map(|s| (s.product_id.clone(), load_and_process(s)))
            .collect();

        Self::collect(results)
    }

    fn collect(results: Vec<(String, OptramResult<SceneOutput>)>) -> CorpusRun {
        let mut run = CorpusRun::default();
        for (product_id, result) in results {
            match result {
                Ok(output) => run.outputs.push(output),
                Err(e) => {
                    log::warn!("Scene {} failed: {}", product_id, e);
                    run.failures.push(SceneFailure {
                        product_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "Phase one complete: {} scenes retrieved, {} failed",
            run.outputs.len(),
            run.failures.len()
        );
        run
    }

    /// Phase two barrier: fit on the complete corpus, then convert every scene
    pub fn calibrate(&self, run: &CorpusRun, stations: &[StationRecord]) -> OptramResult<CalibratedCorpus> {
        let wetness = run.wetness_rasters();
        if wetness.is_empty() {
            return Err(OptramError::Calibration("no scene was retrieved".to_string()));
        }

        let calibrator = Calibrator::new(self.config.calibration);
        let coefficients = calibrator.fit(&wetness, stations)?;
        let rasters = calibrator.apply_corpus(&coefficients, &wetness)?;

        Ok(CalibratedCorpus {
            coefficients,
            rasters,
        })
    }

    pub fn validate(
        &self,
        calibrated: &CalibratedCorpus,
        stations: &[StationRecord],
    ) -> OptramResult<ValidationReport> {
        let matcher = ValidationMatcher::new(self.config.validation);
        let samples = matcher.match_corpus(&calibrated.rasters, stations)?;
        let summary = evaluate(&samples)?;
        let residuals = residuals_by_acquisition(&samples);

        Ok(ValidationReport {
            samples,
            summary,
            residuals,
        })
    }
}

fn write_samples_csv(samples: &[ValidationSample], path: &Path) -> OptramResult<()> {
    log::info!("Writing {} validation samples: {}", samples.len(), path.display());
    let mut writer = csv::Writer::from_path(path)?;
    for sample in samples {
        writer.serialize(sample)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_rasters(rasters: &[SoilMoistureRaster], dir: &Path) -> OptramResult<()> {
    fs::create_dir_all(dir)?;
    for raster in rasters {
        let path = dir.join(sm_file_name(acquisition_time(raster)));
        io::write_band(raster.band(), &path)?;
    }
    Ok(())
}

/// Execute a complete run described by `config`
pub fn run(config: &PipelineConfig) -> OptramResult<RunReport> {
    config.validate()?;

    let polygon = io::read_study_area(&config.study_area, &config.study_area_crs)?;
    let selection = select_scenes(&config.scenes, config.max_cloud_cover);

    let mut pipeline = RetrievalPipeline::new(config.processing.clone(), polygon)?;
    if let Some(scatter) = &config.scatter {
        pipeline = pipeline.with_scatter(scatter.coarsen);
    }

    let corpus = pipeline.process_sources(&selection.accepted);

    if let Some(dir) = &config.output_dir {
        fs::create_dir_all(dir)?;

        if config.write_wetness {
            write_rasters(&corpus.wetness_rasters(), &dir.join("wetness"))?;
        }

        let raw: Vec<&MultiBandProduct> = corpus.outputs.iter().filter_map(|o| o.raw.as_ref()).collect();
        if !raw.is_empty() {
            let raw_dir = dir.join("raw");
            fs::create_dir_all(&raw_dir)?;
            for product in raw {
                let bands: Vec<_> = product.bands.iter().collect();
                io::write_bands(&bands, raw_dir.join(format!("{}.tif", product.product_id)))?;
            }
        }
    }

    if let Some(scatter) = &config.scatter {
        write_scatter_csv(&corpus.scatter_points(), &scatter.output)?;
    }

    let mut report = RunReport {
        scenes_rejected: selection.rejected.iter().map(|s| s.product_id.clone()).collect(),
        scenes_processed: corpus.outputs.iter().map(|o| o.product_id.clone()).collect(),
        failures: corpus.failures.clone(),
        calibration: None,
        metrics: None,
        residuals: Vec::new(),
    };

    match &config.stations {
        Some(sources) => {
            let stations = io::load_stations(sources)?;
            let calibrated = pipeline.calibrate(&corpus, &stations)?;
            let validation = pipeline.validate(&calibrated, &stations)?;

            if let Some(dir) = &config.output_dir {
                write_rasters(&calibrated.rasters, dir)?;
                write_samples_csv(&validation.samples, &dir.join("validation_samples.csv"))?;
            }

            report.calibration = Some(calibrated.coefficients);
            report.metrics = Some(validation.summary);
            report.residuals = validation.residuals;
        }
        None => {
            log::warn!("No station data configured, skipping calibration and validation");
        }
    }

    if let Some(dir) = &config.output_dir {
        let path = dir.join("metrics.json");
        log::info!("Writing run report: {}", path.display());
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &report)?;
    }

    Ok(report)
}
