//! Risk sources: per-observation event probabilities for each instrument.
//!
//! An instrument is either a declared model (fit the binomial GLM, or pass
//! a precomputed risk column through) or one of the two synthetic reference
//! strategies, "All" (constant risk 1) and "None" (constant risk 0). Every
//! instrument exposes the same contract: given a training set and an
//! evaluation set, return one probability per evaluation row.

use ndarray::{Array1, Array2};

use crate::curve::DcaError;
use crate::data::CohortData;
use crate::glm::{GlmOptions, fit_binomial};
use crate::types::ModelSpec;

/// The two reference strategies every curve is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceStrategy {
    /// Treat every observation: constant risk 1, high risk at every
    /// threshold below 1.
    TreatAll,
    /// Treat no observation: constant risk 0, never high risk.
    TreatNone,
}

impl ReferenceStrategy {
    pub fn label(self) -> &'static str {
        match self {
            ReferenceStrategy::TreatAll => "All",
            ReferenceStrategy::TreatNone => "None",
        }
    }

    fn constant_risk(self) -> f64 {
        match self {
            ReferenceStrategy::TreatAll => 1.0,
            ReferenceStrategy::TreatNone => 0.0,
        }
    }
}

/// Constant risk assignment for a reference strategy, without any fitting.
pub fn reference_risk(strategy: ReferenceStrategy, n: usize) -> Array1<f64> {
    Array1::from_elem(n, strategy.constant_risk())
}

/// One evaluand in a curve computation: a declared model or a reference.
#[derive(Debug, Clone, Copy)]
pub enum Instrument<'a> {
    Model(&'a ModelSpec),
    Reference(ReferenceStrategy),
}

impl Instrument<'_> {
    /// Label carried into the `model` column of the output table.
    pub fn label(&self) -> &str {
        match self {
            Instrument::Model(spec) => &spec.label,
            Instrument::Reference(strategy) => strategy.label(),
        }
    }

    /// Risk per evaluation row, training on `train` where fitting applies.
    pub fn risk(
        &self,
        train: &CohortData,
        eval: &CohortData,
        options: &GlmOptions,
    ) -> Result<Array1<f64>, DcaError> {
        match self {
            Instrument::Model(spec) => risk_assignment(train, eval, spec, options),
            Instrument::Reference(strategy) => Ok(reference_risk(*strategy, eval.n_rows())),
        }
    }
}

/// Intercept-plus-predictors design matrix from named columns.
pub fn build_design(data: &CohortData, predictors: &[String]) -> Result<Array2<f64>, DcaError> {
    let mut x = Array2::<f64>::ones((data.n_rows(), predictors.len() + 1));
    for (j, name) in predictors.iter().enumerate() {
        let col = data.column(name).ok_or_else(|| DcaError::MissingVariable {
            name: name.clone(),
        })?;
        x.column_mut(j + 1).assign(&col);
    }
    Ok(x)
}

/// Risk assignment for one declared model.
///
/// With `fitted_risk` the single predictor column already holds risks and
/// no fitting occurs; the column is validated to lie in [0, 1] on every
/// call, so resampled and fold views are checked too. Otherwise the
/// binomial GLM is fit on the training rows and evaluated on the
/// evaluation rows.
pub fn risk_assignment(
    train: &CohortData,
    eval: &CohortData,
    spec: &ModelSpec,
    options: &GlmOptions,
) -> Result<Array1<f64>, DcaError> {
    if spec.fitted_risk {
        if spec.predictors.len() != 1 {
            return Err(DcaError::InvalidRiskInput(format!(
                "fitted-risk model '{}' must name exactly one risk column, got {}",
                spec.label,
                spec.predictors.len()
            )));
        }
        let name = &spec.predictors[0];
        let col = eval.column(name).ok_or_else(|| DcaError::MissingVariable {
            name: name.clone(),
        })?;
        for (i, &value) in col.iter().enumerate() {
            if !(0.0..=1.0).contains(&value) {
                return Err(DcaError::InvalidRiskInput(format!(
                    "fitted-risk column '{name}' has value {value} outside [0, 1] at row {i}"
                )));
            }
        }
        return Ok(col.to_owned());
    }

    let x_train = build_design(train, &spec.predictors)?;
    let y_train = train
        .column(&spec.outcome)
        .ok_or_else(|| DcaError::MissingVariable {
            name: spec.outcome.clone(),
        })?;
    let fit = fit_binomial(x_train.view(), y_train, options)?;
    let x_eval = build_design(eval, &spec.predictors)?;
    Ok(fit.predict(x_eval.view())?)
}
