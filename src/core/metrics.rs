use crate::core::validation::median;
use crate::types::{OptramError, OptramResult, ValidationSample};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

/// Aggregate accuracy of the matched samples. Undefined statistics are NaN
/// (serialised as `null`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub rmse: f64,
    pub mae: f64,
    pub r_squared: f64,
    /// Samples with both a measurement and an estimate
    pub paired: usize,
    pub total: usize,
}

/// Estimated minus measured θ of the samples sharing one acquisition time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionResiduals {
    pub acquired: NaiveDateTime,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub residuals: Vec<f64>,
}

/// Jointly finite (measured, estimated) pairs, or `None` when the metric is
/// undefined (nothing paired, or all measurements zero)
fn defined_pairs(measured: &[f64], estimated: &[f64]) -> OptramResult<Option<Vec<(f64, f64)>>> {
    if measured.len() != estimated.len() {
        return Err(OptramError::MetricPrecondition {
            measured: measured.len(),
            estimated: estimated.len(),
        });
    }

    let pairs: Vec<(f64, f64)> = measured
        .iter()
        .zip(estimated)
        .filter(|(m, e)| m.is_finite() && e.is_finite())
        .map(|(&m, &e)| (m, e))
        .collect();

    if pairs.is_empty() || pairs.iter().all(|&(m, _)| m == 0.0) {
        return Ok(None);
    }
    Ok(Some(pairs))
}

/// sqrt(mean((measured − estimated)²))
pub fn rmse(measured: &[f64], estimated: &[f64]) -> OptramResult<f64> {
    Ok(match defined_pairs(measured, estimated)? {
        Some(pairs) => {
            let sse: f64 = pairs.iter().map(|(m, e)| (m - e).powi(2)).sum();
            (sse / pairs.len() as f64).sqrt()
        }
        None => f64::NAN,
    })
}

/// mean(|measured − estimated|)
pub fn mae(measured: &[f64], estimated: &[f64]) -> OptramResult<f64> {
    Ok(match defined_pairs(measured, estimated)? {
        Some(pairs) => pairs.iter().map(|(m, e)| (m - e).abs()).sum::<f64>() / pairs.len() as f64,
        None => f64::NAN,
    })
}

/// 1 − Σ(measured − estimated)² / Σ measured²
pub fn r_squared(measured: &[f64], estimated: &[f64]) -> OptramResult<f64> {
    Ok(match defined_pairs(measured, estimated)? {
        Some(pairs) => {
            let ssr: f64 = pairs.iter().map(|(m, e)| (m - e).powi(2)).sum();
            let sst: f64 = pairs.iter().map(|(m, _)| m * m).sum();
            1.0 - ssr / sst
        }
        None => f64::NAN,
    })
}

/// Measured and estimated values of the paired samples, in sample order
pub fn paired_values(samples: &[ValidationSample]) -> (Vec<f64>, Vec<f64>) {
    samples.iter().filter_map(ValidationSample::pair).unzip()
}

pub fn evaluate(samples: &[ValidationSample]) -> OptramResult<ErrorSummary> {
    let (measured, estimated) = paired_values(samples);

    let summary = ErrorSummary {
        rmse: rmse(&measured, &estimated)?,
        mae: mae(&measured, &estimated)?,
        r_squared: r_squared(&measured, &estimated)?,
        paired: measured.len(),
        total: samples.len(),
    };

    log::info!(
        "Validation over {}/{} paired samples: RMSE {:.4}, MAE {:.4}, R² {:.4}",
        summary.paired,
        summary.total,
        summary.rmse,
        summary.mae,
        summary.r_squared
    );
    Ok(summary)
}

/// Residuals grouped by rounded acquisition time, in time order
pub fn residuals_by_acquisition(samples: &[ValidationSample]) -> Vec<AcquisitionResiduals> {
    let mut groups: BTreeMap<NaiveDateTime, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        if let Some((measured, estimated)) = sample.pair() {
            groups.entry(sample.acquired).or_default().push(estimated - measured);
        }
    }

    groups
        .into_iter()
        .map(|(acquired, residuals)| AcquisitionResiduals {
            acquired,
            count: residuals.len(),
            mean: residuals.iter().sum::<f64>() / residuals.len() as f64,
            median: median(&residuals).unwrap_or(f64::NAN),
            residuals,
        })
        .collect()
}
