//! Per-threshold decision metrics for one risk assignment.
//!
//! Given an outcome vector, an index-aligned risk vector, and a threshold
//! sequence, [`decision_metrics`] produces the classification rates and the
//! (standardized) net benefit at each threshold. Classification is strict:
//! an observation is high risk at threshold `t` exactly when its risk
//! exceeds `t`, so a risk of 0 is never high risk, even at `t = 0`.
//!
//! Every quantity with a data-dependent denominator is an `Option<f64>`:
//! a sample with no events leaves TPR (and everything derived from it)
//! undefined rather than zero. Callers aggregate over defined cells only.

use ndarray::{ArrayView1, Zip};

use crate::types::Policy;

/// Metrics for one (risk assignment, threshold) pair.
///
/// `None` marks an undefined cell (zero denominator), never a zero estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricPoint {
    pub threshold: f64,
    /// P(high risk | event); undefined when the sample has no events.
    pub tpr: Option<f64>,
    /// P(high risk | no event); undefined when the sample has no non-events.
    pub fpr: Option<f64>,
    /// Outcome prevalence: estimated from the sample, or supplied by the
    /// caller under a case-control design.
    pub rho: Option<f64>,
    /// Fraction of the sample classified high risk.
    pub prob_high_risk: Option<f64>,
    /// Detection probability, TPR * rho.
    pub dp: Option<f64>,
    /// Net benefit under the active policy's weighting.
    pub nb: Option<f64>,
    /// Net benefit standardized by prevalence (opt-in: NB / rho).
    pub snb: Option<f64>,
}

/// Compute one [`MetricPoint`] per threshold.
///
/// `outcomes` must be coded 0/1 and index-aligned with `risks`; callers
/// validate both before reaching this function, which is a pure fold over
/// its inputs and returns bit-identical output on identical input.
///
/// `population_prevalence` overrides the sample prevalence wherever `rho`
/// enters a formula; it is `Some` only under a case-control design, where
/// the sample's case:control split is fixed by the investigator and carries
/// no information about prevalence.
///
/// Thresholds whose cost:benefit odds are infinite (1 under opt-in, 0 under
/// opt-out) are rejected by the assembler up front, so no division by zero
/// occurs here.
pub fn decision_metrics(
    outcomes: ArrayView1<f64>,
    risks: ArrayView1<f64>,
    thresholds: &[f64],
    policy: Policy,
    population_prevalence: Option<f64>,
) -> Vec<MetricPoint> {
    let n = outcomes.len();
    if n == 0 {
        return thresholds
            .iter()
            .map(|&t| MetricPoint {
                threshold: t,
                tpr: None,
                fpr: None,
                rho: None,
                prob_high_risk: None,
                dp: None,
                nb: None,
                snb: None,
            })
            .collect();
    }

    let n_events = outcomes.iter().filter(|&&d| d == 1.0).count();
    let n_controls = n - n_events;
    let rho = population_prevalence.unwrap_or(n_events as f64 / n as f64);

    thresholds
        .iter()
        .map(|&t| {
            let (n_high, n_true_pos) = Zip::from(outcomes).and(risks).fold(
                (0usize, 0usize),
                |(high, tp), &d, &y| {
                    if y > t {
                        (high + 1, tp + usize::from(d == 1.0))
                    } else {
                        (high, tp)
                    }
                },
            );

            let tpr = (n_events > 0).then(|| n_true_pos as f64 / n_events as f64);
            let fpr = (n_controls > 0).then(|| (n_high - n_true_pos) as f64 / n_controls as f64);
            let prob_high_risk = Some(n_high as f64 / n as f64);
            let dp = tpr.map(|tpr| tpr * rho);

            let nb = match (tpr, fpr) {
                (Some(tpr), Some(fpr)) => Some(match policy {
                    Policy::OptIn => tpr * rho - fpr * (1.0 - rho) * (t / (1.0 - t)),
                    Policy::OptOut => {
                        (1.0 - fpr) * (1.0 - rho) - (1.0 - tpr) * rho * ((1.0 - t) / t)
                    }
                }),
                _ => None,
            };
            let snb = nb.and_then(|nb| match policy {
                Policy::OptIn => (rho > 0.0).then(|| nb / rho),
                Policy::OptOut => (rho < 1.0).then(|| nb / (1.0 - rho)),
            });

            MetricPoint {
                threshold: t,
                tpr,
                fpr,
                rho: Some(rho),
                prob_high_risk,
                dp,
                nb,
                snb,
            }
        })
        .collect()
}

/// Cost:benefit odds of a threshold as a reduced-fraction label, e.g.
/// `t = 0.25` under opt-in renders `1:3`.
///
/// Opt-in thresholds map to odds `t / (1 - t)`, opt-out to `(1 - t) / t`.
/// The label is presentational arithmetic on the threshold alone, not a
/// statistical quantity.
pub fn cost_benefit_label(threshold: f64, policy: Policy) -> String {
    let odds = match policy {
        Policy::OptIn => threshold / (1.0 - threshold),
        Policy::OptOut => (1.0 - threshold) / threshold,
    };
    let (num, den) = rational_odds(odds);
    format!("{num}:{den}")
}

/// Best reduced fraction `p/q` for a non-negative ratio, via continued
/// fractions. Convergents are already in lowest terms, so no separate
/// reduction pass is needed. Denominators are capped so that a threshold
/// that is not close to any small rational still gets a stable label, and
/// odds beyond the cap saturate rather than produce a zero denominator.
fn rational_odds(x: f64) -> (u64, u64) {
    const MAX_DEN: u64 = 1_000_000;
    const TOL: f64 = 1e-9;

    if x <= 0.0 || x.is_nan() {
        return (0, 1);
    }
    if !x.is_finite() || x >= MAX_DEN as f64 {
        return (MAX_DEN, 1);
    }

    let mut p_prev: u64 = 1;
    let mut p_prev2: u64 = 0;
    let mut q_prev: u64 = 0;
    let mut q_prev2: u64 = 1;
    let mut value = x;

    for _ in 0..64 {
        let a = value.floor() as u64;
        let Some(p) = a.checked_mul(p_prev).and_then(|v| v.checked_add(p_prev2)) else {
            break;
        };
        let Some(q) = a.checked_mul(q_prev).and_then(|v| v.checked_add(q_prev2)) else {
            break;
        };
        if q > MAX_DEN {
            break;
        }
        p_prev2 = p_prev;
        p_prev = p;
        q_prev2 = q_prev;
        q_prev = q;

        if (p as f64 / q as f64 - x).abs() <= TOL * x.max(1.0) {
            break;
        }
        let frac = value - a as f64;
        if frac < f64::EPSILON {
            break;
        }
        value = 1.0 / frac;
    }

    // The first convergent always commits (its denominator is 1), so a zero
    // denominator can only mean the loop never ran.
    if q_prev == 0 { (0, 1) } else { (p_prev, q_prev) }
}
