use serde::{Deserialize, Serialize};

/// Link selector for the binomial risk model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkFunction {
    Logit,
    Probit,
    CLogLog,
}

impl Default for LinkFunction {
    fn default() -> Self {
        LinkFunction::Logit
    }
}

/// Direction of the treatment decision a threshold encodes.
///
/// Under `OptIn` the default is no treatment and observations with risk above
/// the threshold are flagged for treatment; under `OptOut` the default is
/// treatment and observations below the threshold are opted out of it. The
/// two policies use different net-benefit weightings and admit different
/// threshold ranges: [0, 1) for opt-in, (0, 1] for opt-out, excluding in each
/// case the endpoint whose cost:benefit odds are infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Policy {
    OptIn,
    OptOut,
}

impl Default for Policy {
    fn default() -> Self {
        Policy::OptIn
    }
}

impl Policy {
    /// Whether `t` is a usable threshold under this policy.
    pub fn admits_threshold(self, t: f64) -> bool {
        match self {
            Policy::OptIn => t.is_finite() && (0.0..1.0).contains(&t),
            Policy::OptOut => t.is_finite() && t > 0.0 && t <= 1.0,
        }
    }

    /// Human-readable valid interval, used in threshold error messages.
    pub fn threshold_interval(self) -> &'static str {
        match self {
            Policy::OptIn => "[0, 1)",
            Policy::OptOut => "(0, 1]",
        }
    }
}

/// Sampling design of the observation set.
///
/// Under a cohort design the outcome prevalence `rho` is estimated from the
/// sample. Under a case-control design the case:control split is fixed by
/// the investigator, so `rho` must be supplied as the population prevalence
/// and bootstrap resampling is stratified by outcome to keep the split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StudyDesign {
    Cohort,
    CaseControl { population_prevalence: f64 },
}

impl Default for StudyDesign {
    fn default() -> Self {
        StudyDesign::Cohort
    }
}

impl StudyDesign {
    /// The supplied population prevalence under case-control, `None` when
    /// prevalence is estimated from the sample.
    pub fn population_prevalence(self) -> Option<f64> {
        match self {
            StudyDesign::Cohort => None,
            StudyDesign::CaseControl {
                population_prevalence,
            } => Some(population_prevalence),
        }
    }
}

/// Declaration of one risk instrument to evaluate.
///
/// No formula parsing happens here: the outcome and predictor columns are
/// named explicitly. With `fitted_risk` set, the single predictor column is
/// taken to already contain predicted risks in [0, 1] and no model is fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Label carried into the `model` column of the output table.
    pub label: String,
    /// Name of the 0/1 outcome column.
    pub outcome: String,
    /// Predictor column names (exactly one when `fitted_risk`).
    pub predictors: Vec<String>,
    /// Treat the single predictor column as precomputed risk.
    #[serde(default)]
    pub fitted_risk: bool,
}

impl ModelSpec {
    /// Model whose risk is obtained by fitting the binomial GLM.
    pub fn fitted(
        label: impl Into<String>,
        outcome: impl Into<String>,
        predictors: &[&str],
    ) -> Self {
        Self {
            label: label.into(),
            outcome: outcome.into(),
            predictors: predictors.iter().map(|p| (*p).to_string()).collect(),
            fitted_risk: false,
        }
    }

    /// Model whose risk column is supplied directly by the caller.
    pub fn precomputed(
        label: impl Into<String>,
        outcome: impl Into<String>,
        risk_column: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            outcome: outcome.into(),
            predictors: vec![risk_column.into()],
            fitted_risk: true,
        }
    }
}

/// Default threshold grid for a policy: 100 evenly spaced valid thresholds.
pub fn default_thresholds(policy: Policy) -> Vec<f64> {
    match policy {
        Policy::OptIn => (0..100).map(|i| i as f64 / 100.0).collect(),
        Policy::OptOut => (1..=100).map(|i| i as f64 / 100.0).collect(),
    }
}
