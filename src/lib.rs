#![deny(dead_code)]
#![deny(unused_imports)]

pub mod bootstrap;
pub mod crossval;
pub mod curve;
pub mod data;
pub mod glm;
pub mod linalg;
pub mod metrics;
pub mod risk;
pub mod types;

pub use bootstrap::{
    BootstrapBands, BootstrapOptions, IntervalBounds, ModelBands, ThresholdBands, bootstrap_bands,
};
pub use crossval::{CvDecisionCurveResult, cv_decision_curve};
pub use curve::{CurveCall, CurveOptions, DcaError, DecisionCurveResult, MetricRow, decision_curve};
pub use data::CohortData;
pub use glm::{BinomialFit, GlmError, GlmOptions, GlmStatus, fit_binomial};
pub use metrics::{MetricPoint, cost_benefit_label, decision_metrics};
pub use risk::{Instrument, ReferenceStrategy, reference_risk};
pub use types::{LinkFunction, ModelSpec, Policy, StudyDesign, default_thresholds};
