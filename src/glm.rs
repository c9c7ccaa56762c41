//! Binomial GLM fitting via iteratively reweighted least squares.
//!
//! Risk models here are plain fixed-effect logistic-family regressions:
//! each IRLS step forms the weighted normal equations `X^T W X beta = X^T W z`
//! and solves them with a symmetric factorization. Convergence is judged on
//! the relative change in deviance.

use ndarray::{Array1, ArrayView1, ArrayView2, Zip};
use thiserror::Error;

use crate::linalg::{LinalgError, solve_spd};
use crate::types::LinkFunction;

#[derive(Debug, Error)]
pub enum GlmError {
    #[error("design matrix has no rows or no columns")]
    EmptyDesign,
    #[error("design matrix has {x_rows} rows but the response has {y_len} values")]
    DimensionMismatch { x_rows: usize, y_len: usize },
    #[error("fit has {expected} coefficients but the prediction matrix has {got} columns")]
    CoefficientMismatch { expected: usize, got: usize },
    #[error("linear solve failed: {0}")]
    Solve(#[from] LinalgError),
}

/// Controls for the IRLS fit.
#[derive(Debug, Clone)]
pub struct GlmOptions {
    pub link: LinkFunction,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for GlmOptions {
    fn default() -> Self {
        Self {
            link: LinkFunction::default(),
            max_iterations: 50,
            tolerance: 1e-8,
        }
    }
}

/// How the IRLS loop terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlmStatus {
    Converged,
    MaxIterationsReached,
}

/// A fitted binomial regression.
#[derive(Debug, Clone)]
pub struct BinomialFit {
    pub beta: Array1<f64>,
    pub link: LinkFunction,
    pub deviance: f64,
    pub iterations: usize,
    pub status: GlmStatus,
}

impl BinomialFit {
    /// Predicted event probabilities for a new design matrix.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, GlmError> {
        if x.ncols() != self.beta.len() {
            return Err(GlmError::CoefficientMismatch {
                expected: self.beta.len(),
                got: x.ncols(),
            });
        }
        let eta = x.dot(&self.beta);
        Ok(mean_response(&eta, self.link))
    }
}

/// Fit a binomial GLM by IRLS.
///
/// `x` must already carry its intercept column. The response is clamped
/// nowhere; callers are expected to pass values in `[0, 1]`.
pub fn fit_binomial(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    options: &GlmOptions,
) -> Result<BinomialFit, GlmError> {
    let (n, p) = x.dim();
    if n == 0 || p == 0 {
        return Err(GlmError::EmptyDesign);
    }
    if y.len() != n {
        return Err(GlmError::DimensionMismatch {
            x_rows: n,
            y_len: y.len(),
        });
    }

    let link = options.link;
    let mut beta = Array1::<f64>::zeros(p);
    let mut eta = Array1::<f64>::zeros(n);
    let mut mu = mean_response(&eta, link);
    let mut deviance = binomial_deviance(y, &mu);
    let mut weights = Array1::<f64>::zeros(n);
    let mut z = Array1::<f64>::zeros(n);
    let mut status = GlmStatus::MaxIterationsReached;
    let mut iterations = options.max_iterations;

    for iter in 1..=options.max_iterations {
        update_irls_vectors(y, &eta, link, &mut mu, &mut weights, &mut z);

        // Row-scale a copy of X by the working weights; then
        // (WX)^T X = X^T W X and (WX)^T z = X^T W z.
        let mut xw = x.to_owned();
        for (mut row, &w) in xw.rows_mut().into_iter().zip(weights.iter()) {
            row *= w;
        }
        let xtwx = xw.t().dot(&x);
        let xtwz = xw.t().dot(&z);

        beta = solve_spd(&xtwx, &xtwz)?;
        eta = x.dot(&beta);
        mu = mean_response(&eta, link);

        let new_deviance = binomial_deviance(y, &mu);
        let change = (new_deviance - deviance).abs() / (0.1 + new_deviance.abs());
        log::debug!(
            "IRLS iteration {iter}: deviance {new_deviance:.6e}, relative change {change:.3e}"
        );
        deviance = new_deviance;
        if change < options.tolerance {
            status = GlmStatus::Converged;
            iterations = iter;
            break;
        }
    }

    if status == GlmStatus::MaxIterationsReached {
        log::warn!(
            "IRLS did not converge within {} iterations (deviance {deviance:.6e})",
            options.max_iterations
        );
    }

    Ok(BinomialFit {
        beta,
        link,
        deviance,
        iterations,
        status,
    })
}

/// One IRLS update of the mean, working weights, and working response.
fn update_irls_vectors(
    y: ArrayView1<f64>,
    eta: &Array1<f64>,
    link: LinkFunction,
    mu: &mut Array1<f64>,
    weights: &mut Array1<f64>,
    z: &mut Array1<f64>,
) {
    const MIN_WEIGHT: f64 = 1e-12;
    const MIN_D_FOR_Z: f64 = 1e-6;
    const PROB_EPS: f64 = 1e-8;

    let n = eta.len();
    match link {
        LinkFunction::Logit => {
            for i in 0..n {
                let e = eta[i].clamp(-700.0, 700.0);
                let mu_i = (1.0 / (1.0 + (-e).exp())).clamp(PROB_EPS, 1.0 - PROB_EPS);
                mu[i] = mu_i;
                // dmu/deta = mu(1-mu), which is also the binomial variance
                let dmu = mu_i * (1.0 - mu_i);
                weights[i] = dmu.max(MIN_WEIGHT);
                z[i] = e + (y[i] - mu_i) / dmu.max(MIN_D_FOR_Z);
            }
        }
        LinkFunction::Probit => {
            for i in 0..n {
                let e = eta[i].clamp(-30.0, 30.0);
                let mu_i = normal_cdf_approx(e).clamp(PROB_EPS, 1.0 - PROB_EPS);
                mu[i] = mu_i;
                let dmu = normal_pdf(e).max(MIN_D_FOR_Z);
                let variance = (mu_i * (1.0 - mu_i)).max(PROB_EPS);
                weights[i] = ((dmu * dmu) / variance).max(MIN_WEIGHT);
                z[i] = e + (y[i] - mu_i) / dmu;
            }
        }
        LinkFunction::CLogLog => {
            for i in 0..n {
                let e = eta[i].clamp(-30.0, 30.0);
                let exp_eta = e.exp();
                let surv = (-exp_eta).exp();
                let mu_i = (1.0 - surv).clamp(PROB_EPS, 1.0 - PROB_EPS);
                mu[i] = mu_i;
                // dmu/deta = exp(eta) * exp(-exp(eta))
                let dmu = (exp_eta * surv).max(MIN_D_FOR_Z);
                let variance = (mu_i * (1.0 - mu_i)).max(PROB_EPS);
                weights[i] = ((dmu * dmu) / variance).max(MIN_WEIGHT);
                z[i] = e + (y[i] - mu_i) / dmu;
            }
        }
    }
}

/// Clamped inverse link applied elementwise.
fn mean_response(eta: &Array1<f64>, link: LinkFunction) -> Array1<f64> {
    const PROB_EPS: f64 = 1e-8;
    eta.mapv(|e| match link {
        LinkFunction::Logit => {
            let e = e.clamp(-700.0, 700.0);
            (1.0 / (1.0 + (-e).exp())).clamp(PROB_EPS, 1.0 - PROB_EPS)
        }
        LinkFunction::Probit => {
            normal_cdf_approx(e.clamp(-30.0, 30.0)).clamp(PROB_EPS, 1.0 - PROB_EPS)
        }
        LinkFunction::CLogLog => {
            let e = e.clamp(-30.0, 30.0);
            (1.0 - (-e.exp()).exp()).clamp(PROB_EPS, 1.0 - PROB_EPS)
        }
    })
}

/// Binomial deviance with the log terms split for stability near 0 and 1.
fn binomial_deviance(y: ArrayView1<f64>, mu: &Array1<f64>) -> f64 {
    const EPS: f64 = 1e-8;
    let total = Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mui| {
        let mui_c = mui.clamp(EPS, 1.0 - EPS);
        let term1 = if yi > EPS {
            yi * (yi.ln() - mui_c.ln())
        } else {
            0.0
        };
        let term2 = if yi < 1.0 - EPS {
            (1.0 - yi) * ((1.0 - yi).ln() - (1.0 - mui_c).ln())
        } else {
            0.0
        };
        acc + term1 + term2
    });
    2.0 * total
}

fn normal_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF via the Abramowitz-Stegun polynomial tail expansion.
fn normal_cdf_approx(x: f64) -> f64 {
    let z = x.abs().clamp(0.0, 30.0);
    let t = 1.0 / (1.0 + 0.231_641_9 * z);
    let poly = (((((1.330_274_429 * t - 1.821_255_978) * t) + 1.781_477_937) * t - 0.356_563_782)
        * t
        + 0.319_381_530)
        * t;
    let cdf_pos = 1.0 - normal_pdf(z) * poly;
    if x >= 0.0 { cdf_pos } else { 1.0 - cdf_pos }
}
