//! Bootstrap confidence bands for decision curves.
//!
//! Draws B index sets with replacement, re-runs every instrument on each
//! resample (re-fitting models where fitting applies), and reduces the
//! per-replicate metric values to pointwise quantile pairs. The same B
//! index sets are reused across all instruments so that cross-instrument
//! contrasts stay valid within a replicate.
//!
//! Under a cohort design resampling is not stratified by outcome, so
//! replicate-level prevalence varies with the draw; that is intentional
//! and mirrors how a fresh cohort would be collected. Under a case-control
//! design cases and controls are resampled separately, because their split
//! is fixed by the study, not estimated from it.

use ndarray::ArrayView1;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::curve::DcaError;
use crate::data::CohortData;
use crate::glm::GlmOptions;
use crate::metrics::{MetricPoint, decision_metrics};
use crate::risk::Instrument;
use crate::types::{Policy, StudyDesign};

/// Replicate count, confidence level, and RNG seed for one band estimate.
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub replicates: usize,
    /// Central interval level in (0, 1), e.g. 0.95.
    pub confidence_level: f64,
    pub seed: u64,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            replicates: 500,
            confidence_level: 0.95,
            seed: 42,
        }
    }
}

/// Pointwise interval for one metric at one threshold. Both bounds are
/// `None` when no replicate defined the metric there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalBounds {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

/// Bounds for every banded metric at one threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdBands {
    pub threshold: f64,
    pub tpr: IntervalBounds,
    pub fpr: IntervalBounds,
    pub rho: IntervalBounds,
    pub dp: IntervalBounds,
    pub nb: IntervalBounds,
    pub snb: IntervalBounds,
}

/// One instrument's bands, threshold-ordered to match its curve rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBands {
    pub label: String,
    pub rows: Vec<ThresholdBands>,
}

/// Bands for every instrument plus the count of replicates whose model
/// re-fit failed outright and contributed to no cell.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapBands {
    pub models: Vec<ModelBands>,
    pub skipped_replicates: usize,
}

/// Estimate pointwise confidence bands for every instrument.
///
/// Replicates are evaluated on the rayon global pool; results are grouped
/// by (instrument, threshold, metric) and reduced after all replicates
/// finish, so completion order never matters. Quantiles use the type-1
/// estimator: bounds are always observed replicate values, never
/// interpolated between two of them.
pub fn bootstrap_bands(
    data: &CohortData,
    instruments: &[Instrument<'_>],
    outcome: &str,
    thresholds: &[f64],
    policy: Policy,
    design: StudyDesign,
    glm_options: &GlmOptions,
    options: &BootstrapOptions,
) -> Result<BootstrapBands, DcaError> {
    if options.replicates == 0 {
        return Err(DcaError::InvalidInput(
            "bootstrap requires at least one replicate".to_string(),
        ));
    }
    if !(options.confidence_level > 0.0 && options.confidence_level < 1.0) {
        return Err(DcaError::InvalidInput(format!(
            "confidence level must lie strictly between 0 and 1, got {}",
            options.confidence_level
        )));
    }
    let outcomes = data
        .column(outcome)
        .ok_or_else(|| DcaError::MissingVariable {
            name: outcome.to_string(),
        })?;

    let index_sets = draw_index_sets(outcomes, design, options.replicates, options.seed);
    let population_prevalence = design.population_prevalence();

    // One entry per replicate: per-instrument, per-threshold metric points,
    // or `None` when a re-fit failed and the whole replicate is skipped so
    // that cross-instrument covariance is not distorted.
    let replicate_points: Vec<Option<Vec<Vec<MetricPoint>>>> = index_sets
        .par_iter()
        .map(|indices| -> Option<Vec<Vec<MetricPoint>>> {
            let sample = data.select_rows(indices);
            let sample_outcomes = sample.column(outcome)?;
            let mut per_instrument = Vec::with_capacity(instruments.len());
            for instrument in instruments {
                let risks = instrument.risk(&sample, &sample, glm_options).ok()?;
                per_instrument.push(decision_metrics(
                    sample_outcomes,
                    risks.view(),
                    thresholds,
                    policy,
                    population_prevalence,
                ));
            }
            Some(per_instrument)
        })
        .collect();

    let skipped = replicate_points.iter().filter(|r| r.is_none()).count();
    if skipped > 0 {
        log::warn!(
            "{skipped} of {} bootstrap replicates failed to re-fit and were excluded",
            options.replicates
        );
    }

    let alpha = 1.0 - options.confidence_level;
    let models = instruments
        .iter()
        .enumerate()
        .map(|(i, instrument)| ModelBands {
            label: instrument.label().to_string(),
            rows: thresholds
                .iter()
                .enumerate()
                .map(|(j, &threshold)| ThresholdBands {
                    threshold,
                    tpr: reduce_cell(&replicate_points, i, j, alpha, |p| p.tpr),
                    fpr: reduce_cell(&replicate_points, i, j, alpha, |p| p.fpr),
                    rho: reduce_cell(&replicate_points, i, j, alpha, |p| p.rho),
                    dp: reduce_cell(&replicate_points, i, j, alpha, |p| p.dp),
                    nb: reduce_cell(&replicate_points, i, j, alpha, |p| p.nb),
                    snb: reduce_cell(&replicate_points, i, j, alpha, |p| p.snb),
                })
                .collect(),
        })
        .collect();

    Ok(BootstrapBands {
        models,
        skipped_replicates: skipped,
    })
}

/// B index multisets of size n, all drawn up front from one seeded stream
/// so the sets depend only on (n, design, replicates, seed), never on
/// which instruments are evaluated over them.
fn draw_index_sets(
    outcomes: ArrayView1<f64>,
    design: StudyDesign,
    replicates: usize,
    seed: u64,
) -> Vec<Vec<usize>> {
    use rand::Rng;

    let n = outcomes.len();
    let mut rng = StdRng::seed_from_u64(seed);
    match design {
        StudyDesign::Cohort => (0..replicates)
            .map(|_| (0..n).map(|_| rng.random_range(0..n)).collect())
            .collect(),
        StudyDesign::CaseControl { .. } => {
            let cases: Vec<usize> = (0..n).filter(|&i| outcomes[i] == 1.0).collect();
            let controls: Vec<usize> = (0..n).filter(|&i| outcomes[i] != 1.0).collect();
            (0..replicates)
                .map(|_| {
                    let mut indices = Vec::with_capacity(n);
                    for _ in 0..cases.len() {
                        indices.push(cases[rng.random_range(0..cases.len())]);
                    }
                    for _ in 0..controls.len() {
                        indices.push(controls[rng.random_range(0..controls.len())]);
                    }
                    indices
                })
                .collect()
        }
    }
}

/// Keyed reduction for one (instrument, threshold, metric) cell: collect
/// the metric across replicates where it is defined, then take the
/// alpha/2 and 1 - alpha/2 type-1 quantiles.
fn reduce_cell(
    replicates: &[Option<Vec<Vec<MetricPoint>>>],
    instrument_idx: usize,
    threshold_idx: usize,
    alpha: f64,
    pick: impl Fn(&MetricPoint) -> Option<f64>,
) -> IntervalBounds {
    let mut values: Vec<f64> = replicates
        .iter()
        .flatten()
        .filter_map(|per_instrument| pick(&per_instrument[instrument_idx][threshold_idx]))
        .collect();
    if values.is_empty() {
        return IntervalBounds {
            lower: None,
            upper: None,
        };
    }
    values.sort_by(|a, b| a.total_cmp(b));
    IntervalBounds {
        lower: Some(quantile_type1(&values, alpha / 2.0)),
        upper: Some(quantile_type1(&values, 1.0 - alpha / 2.0)),
    }
}

/// Type-1 (inverse empirical CDF) quantile of a sorted slice: the smallest
/// order statistic whose cumulative share reaches `p`.
fn quantile_type1(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    let rank = ((n as f64 * p).ceil() as usize).max(1);
    sorted[rank.min(n) - 1]
}
