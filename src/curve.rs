//! Decision-curve assembly.
//!
//! [`decision_curve`] is the main entry point: it validates the inputs,
//! drops incomplete rows, computes the per-threshold metric rows for every
//! declared model plus the "All" and "None" reference strategies, merges
//! bootstrap confidence bands when requested, and returns the long-form
//! table together with an explicit record of the invocation.
//!
//! Each instrument's row block is built independently and the blocks are
//! concatenated, so the table layout falls out of construction order
//! rather than index bookkeeping into a pre-sized buffer.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bootstrap::{BootstrapBands, BootstrapOptions, bootstrap_bands};
use crate::data::CohortData;
use crate::glm::{GlmError, GlmOptions};
use crate::metrics::{MetricPoint, cost_benefit_label, decision_metrics};
use crate::risk::{Instrument, ReferenceStrategy};
use crate::types::{LinkFunction, ModelSpec, Policy, StudyDesign};

/// Errors for the whole decision-curve pipeline.
///
/// Every variant is fatal: the computation aborts and no partial table is
/// returned. Undefined per-cell metrics are not errors; they surface as
/// `None` values in rows and are excluded from every aggregation.
#[derive(Debug, Error)]
pub enum DcaError {
    #[error("variable '{name}' is not a column of the observation set")]
    MissingVariable { name: String },

    #[error("invalid fitted-risk input: {0}")]
    InvalidRiskInput(String),

    #[error("invalid thresholds: {0}")]
    InvalidThresholds(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("model fit failed: {0}")]
    FitFailed(#[from] GlmError),
}

/// One output row: every derived quantity for one (model, threshold) pair.
///
/// Serialized field names are the wire contract consumed by plotting and
/// summary collaborators; `None` serializes as null, never as a fabricated
/// zero. The bound fields stay `None` unless bootstrap bands were
/// requested and defined for the cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    #[serde(rename = "thresholds")]
    pub threshold: f64,
    #[serde(rename = "FPR")]
    pub fpr: Option<f64>,
    #[serde(rename = "TPR")]
    pub tpr: Option<f64>,
    #[serde(rename = "NB")]
    pub nb: Option<f64>,
    #[serde(rename = "sNB")]
    pub snb: Option<f64>,
    pub rho: Option<f64>,
    #[serde(rename = "prob.high.risk")]
    pub prob_high_risk: Option<f64>,
    #[serde(rename = "DP")]
    pub dp: Option<f64>,
    pub model: String,
    #[serde(rename = "cost.benefit.ratio")]
    pub cost_benefit_ratio: String,
    #[serde(rename = "TPR_lower", default)]
    pub tpr_lower: Option<f64>,
    #[serde(rename = "TPR_upper", default)]
    pub tpr_upper: Option<f64>,
    #[serde(rename = "FPR_lower", default)]
    pub fpr_lower: Option<f64>,
    #[serde(rename = "FPR_upper", default)]
    pub fpr_upper: Option<f64>,
    #[serde(default)]
    pub rho_lower: Option<f64>,
    #[serde(default)]
    pub rho_upper: Option<f64>,
    #[serde(rename = "DP_lower", default)]
    pub dp_lower: Option<f64>,
    #[serde(rename = "DP_upper", default)]
    pub dp_upper: Option<f64>,
    #[serde(rename = "NB_lower", default)]
    pub nb_lower: Option<f64>,
    #[serde(rename = "NB_upper", default)]
    pub nb_upper: Option<f64>,
    #[serde(rename = "sNB_lower", default)]
    pub snb_lower: Option<f64>,
    #[serde(rename = "sNB_upper", default)]
    pub snb_upper: Option<f64>,
}

impl MetricRow {
    fn from_point(point: MetricPoint, model: &str, cost_benefit_ratio: String) -> Self {
        Self {
            threshold: point.threshold,
            fpr: point.fpr,
            tpr: point.tpr,
            nb: point.nb,
            snb: point.snb,
            rho: point.rho,
            prob_high_risk: point.prob_high_risk,
            dp: point.dp,
            model: model.to_string(),
            cost_benefit_ratio,
            tpr_lower: None,
            tpr_upper: None,
            fpr_lower: None,
            fpr_upper: None,
            rho_lower: None,
            rho_upper: None,
            dp_lower: None,
            dp_upper: None,
            nb_lower: None,
            nb_upper: None,
            snb_lower: None,
            snb_upper: None,
        }
    }
}

/// Explicit record of one invocation, returned alongside the results so
/// downstream display code never has to capture caller state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveCall {
    /// Labels of the declared models, in table order (references excluded).
    pub models: Vec<String>,
    pub outcome: String,
    pub thresholds: Vec<f64>,
    pub policy: Policy,
    pub design: StudyDesign,
    pub link: LinkFunction,
    pub confidence_level: Option<f64>,
    pub bootstrap_replicates: Option<usize>,
    pub seed: Option<u64>,
    pub folds: Option<usize>,
}

/// Knobs for one curve computation.
#[derive(Debug, Clone, Default)]
pub struct CurveOptions {
    pub policy: Policy,
    pub design: StudyDesign,
    pub glm: GlmOptions,
    /// When set, pointwise confidence bands are estimated and merged into
    /// the table rows.
    pub bootstrap: Option<BootstrapOptions>,
}

/// Result envelope for [`decision_curve`].
#[derive(Debug, Clone)]
pub struct DecisionCurveResult {
    /// Long-form table: one row per (instrument, threshold), instruments
    /// ordered {declared models…, "All", "None"}, thresholds in the given
    /// order within each block.
    pub table: Vec<MetricRow>,
    /// Level of the merged confidence bands, `None` when none were
    /// requested.
    pub confidence_level: Option<f64>,
    pub call: CurveCall,
    /// Rows removed because a referenced column had a missing value.
    pub dropped_rows: usize,
}

/// Estimate decision curves for `models` against the "All" and "None"
/// reference strategies.
///
/// Rows with a missing value in the outcome or any referenced predictor
/// are dropped first; the count is logged and reported in the envelope.
/// Fatal validation errors abort the whole computation before any model
/// is fit.
pub fn decision_curve(
    data: &CohortData,
    models: &[ModelSpec],
    thresholds: &[f64],
    options: &CurveOptions,
) -> Result<DecisionCurveResult, DcaError> {
    let outcome = validate_models(models)?;
    validate_thresholds(thresholds, options.policy)?;
    validate_design(options.design)?;
    let (clean, dropped_rows) = prepare_data(data, models, &outcome)?;

    let instruments = instruments_for(models);
    let mut table = assemble_table(&clean, &clean, &outcome, &instruments, thresholds, options)?;

    if let Some(bootstrap) = &options.bootstrap {
        let bands = bootstrap_bands(
            &clean,
            &instruments,
            &outcome,
            thresholds,
            options.policy,
            options.design,
            &options.glm,
            bootstrap,
        )?;
        merge_bands(&mut table, &bands, thresholds.len());
    }

    let call = CurveCall {
        models: models.iter().map(|spec| spec.label.clone()).collect(),
        outcome,
        thresholds: thresholds.to_vec(),
        policy: options.policy,
        design: options.design,
        link: options.glm.link,
        confidence_level: options.bootstrap.as_ref().map(|b| b.confidence_level),
        bootstrap_replicates: options.bootstrap.as_ref().map(|b| b.replicates),
        seed: options.bootstrap.as_ref().map(|b| b.seed),
        folds: None,
    };
    Ok(DecisionCurveResult {
        confidence_level: call.confidence_level,
        table,
        call,
        dropped_rows,
    })
}

/// Check the model list and return the shared outcome column name.
pub(crate) fn validate_models(models: &[ModelSpec]) -> Result<String, DcaError> {
    let Some(first) = models.first() else {
        return Err(DcaError::InvalidInput(
            "at least one model is required".to_string(),
        ));
    };
    for spec in models {
        if spec.outcome != first.outcome {
            return Err(DcaError::InvalidInput(format!(
                "all models must share one outcome column: '{}' vs '{}'",
                first.outcome, spec.outcome
            )));
        }
        if spec.label == ReferenceStrategy::TreatAll.label()
            || spec.label == ReferenceStrategy::TreatNone.label()
        {
            return Err(DcaError::InvalidInput(format!(
                "model label '{}' is reserved for the reference strategies",
                spec.label
            )));
        }
    }
    for (i, spec) in models.iter().enumerate() {
        if models[..i].iter().any(|other| other.label == spec.label) {
            return Err(DcaError::InvalidInput(format!(
                "duplicate model label '{}'",
                spec.label
            )));
        }
    }
    Ok(first.outcome.clone())
}

/// Every threshold must be usable under the policy; the endpoint with
/// infinite cost:benefit odds gets its own message.
pub(crate) fn validate_thresholds(thresholds: &[f64], policy: Policy) -> Result<(), DcaError> {
    if thresholds.is_empty() {
        return Err(DcaError::InvalidThresholds(
            "at least one threshold is required".to_string(),
        ));
    }
    for &t in thresholds {
        if !policy.admits_threshold(t) {
            let reason = match policy {
                Policy::OptIn if t == 1.0 => {
                    "threshold 1 makes the opt-in cost:benefit odds t/(1-t) infinite".to_string()
                }
                Policy::OptOut if t == 0.0 => {
                    "threshold 0 makes the opt-out cost:benefit odds (1-t)/t infinite".to_string()
                }
                _ => format!(
                    "threshold {t} lies outside the valid interval {}",
                    policy.threshold_interval()
                ),
            };
            return Err(DcaError::InvalidThresholds(reason));
        }
    }
    Ok(())
}

pub(crate) fn validate_design(design: StudyDesign) -> Result<(), DcaError> {
    if let StudyDesign::CaseControl {
        population_prevalence,
    } = design
    {
        if !(population_prevalence > 0.0 && population_prevalence < 1.0) {
            return Err(DcaError::InvalidInput(format!(
                "case-control population prevalence must lie strictly between 0 and 1, got {population_prevalence}"
            )));
        }
    }
    Ok(())
}

/// Resolve referenced columns, drop incomplete rows, and validate the
/// outcome coding. The dropped-row count is a warning, never an error,
/// unless nothing is left to analyze.
pub(crate) fn prepare_data(
    data: &CohortData,
    models: &[ModelSpec],
    outcome: &str,
) -> Result<(CohortData, usize), DcaError> {
    let mut referenced: Vec<String> = vec![outcome.to_string()];
    for spec in models {
        for predictor in &spec.predictors {
            if !referenced.contains(predictor) {
                referenced.push(predictor.clone());
            }
        }
    }
    for name in &referenced {
        if !data.has_column(name) {
            return Err(DcaError::MissingVariable { name: name.clone() });
        }
    }

    let (clean, dropped) = data.drop_incomplete(&referenced);
    if dropped > 0 {
        log::warn!(
            "dropped {dropped} of {} rows with missing values in referenced columns",
            data.n_rows()
        );
    }
    if clean.n_rows() == 0 {
        return Err(DcaError::InvalidInput(
            "every row has a missing value in a referenced column".to_string(),
        ));
    }
    clean.validate_outcome(outcome)?;
    Ok((clean, dropped))
}

/// The instruments of one computation, in table order.
pub(crate) fn instruments_for(models: &[ModelSpec]) -> Vec<Instrument<'_>> {
    models
        .iter()
        .map(Instrument::Model)
        .chain([
            Instrument::Reference(ReferenceStrategy::TreatAll),
            Instrument::Reference(ReferenceStrategy::TreatNone),
        ])
        .collect()
}

/// Build the row blocks for every instrument, training on `train` and
/// evaluating on `eval` (the two coincide outside cross-validation).
pub(crate) fn assemble_table(
    train: &CohortData,
    eval: &CohortData,
    outcome: &str,
    instruments: &[Instrument<'_>],
    thresholds: &[f64],
    options: &CurveOptions,
) -> Result<Vec<MetricRow>, DcaError> {
    let eval_outcomes: ArrayView1<f64> =
        eval.column(outcome).ok_or_else(|| DcaError::MissingVariable {
            name: outcome.to_string(),
        })?;
    let labels: Vec<String> = thresholds
        .iter()
        .map(|&t| cost_benefit_label(t, options.policy))
        .collect();

    let mut table = Vec::with_capacity(instruments.len() * thresholds.len());
    for instrument in instruments {
        let risks = instrument.risk(train, eval, &options.glm)?;
        let points = decision_metrics(
            eval_outcomes,
            risks.view(),
            thresholds,
            options.policy,
            options.design.population_prevalence(),
        );
        for (point, label) in points.into_iter().zip(&labels) {
            table.push(MetricRow::from_point(point, instrument.label(), label.clone()));
        }
    }
    Ok(table)
}

/// Attach band cells to their rows. Blocks line up by construction: both
/// the table and the bands iterate the same instrument list in order.
fn merge_bands(table: &mut [MetricRow], bands: &BootstrapBands, block: usize) {
    for (rows, model_bands) in table.chunks_mut(block).zip(&bands.models) {
        debug_assert_eq!(rows[0].model, model_bands.label);
        for (row, cell) in rows.iter_mut().zip(&model_bands.rows) {
            row.tpr_lower = cell.tpr.lower;
            row.tpr_upper = cell.tpr.upper;
            row.fpr_lower = cell.fpr.lower;
            row.fpr_upper = cell.fpr.upper;
            row.rho_lower = cell.rho.lower;
            row.rho_upper = cell.rho.upper;
            row.dp_lower = cell.dp.lower;
            row.dp_upper = cell.dp.upper;
            row.nb_lower = cell.nb.lower;
            row.nb_upper = cell.nb.upper;
            row.snb_lower = cell.snb.lower;
            row.snb_upper = cell.snb.upper;
        }
    }
}
