//! K-fold cross-validated decision curves.
//!
//! Every fold's curves are estimated out of sample: models are re-fit on
//! the complementary training rows and evaluated on the held-out fold, and
//! the fold tables are then averaged cell by cell. A cell left undefined
//! in some folds is averaged over the folds that defined it; a cell
//! undefined in every fold stays undefined. Reference strategies need no
//! fitting but are evaluated per fold all the same, so their averaged rows
//! sit on the same footing as the model rows.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::curve::{
    CurveCall, CurveOptions, DcaError, MetricRow, assemble_table, instruments_for, prepare_data,
    validate_design, validate_models, validate_thresholds,
};
use crate::data::CohortData;
use crate::types::ModelSpec;

/// Result envelope for [`cv_decision_curve`].
#[derive(Debug, Clone)]
pub struct CvDecisionCurveResult {
    /// Cross-validated table: the per-cell arithmetic mean over folds,
    /// laid out exactly like a single-run table.
    pub table: Vec<MetricRow>,
    /// The full per-fold tables, in fold order.
    pub fold_tables: Vec<Vec<MetricRow>>,
    pub call: CurveCall,
    /// Rows removed because a referenced column had a missing value.
    pub dropped_rows: usize,
}

/// Estimate k-fold cross-validated decision curves.
///
/// Complete rows are shuffled once under `seed` and split into `folds`
/// parts whose sizes differ by at most one, so the partition is
/// reproducible for a given seed and fold count. Models declared with
/// precomputed risks are rejected: there is nothing to re-fit, and
/// evaluating a fixed column out of sample would only relabel the
/// apparent curve as cross-validated.
pub fn cv_decision_curve(
    data: &CohortData,
    models: &[ModelSpec],
    thresholds: &[f64],
    folds: usize,
    seed: u64,
    options: &CurveOptions,
) -> Result<CvDecisionCurveResult, DcaError> {
    let outcome = validate_models(models)?;
    validate_thresholds(thresholds, options.policy)?;
    validate_design(options.design)?;
    for spec in models {
        if spec.fitted_risk {
            return Err(DcaError::InvalidRiskInput(format!(
                "model '{}' supplies precomputed risks; cross-validation requires refittable models",
                spec.label
            )));
        }
    }
    if folds < 2 {
        return Err(DcaError::InvalidInput(format!(
            "cross-validation requires at least 2 folds, got {folds}"
        )));
    }

    let (clean, dropped_rows) = prepare_data(data, models, &outcome)?;
    let n = clean.n_rows();
    if folds > n {
        return Err(DcaError::InvalidInput(format!(
            "cannot split {n} complete rows into {folds} folds"
        )));
    }
    if options.bootstrap.is_some() {
        log::warn!("bootstrap options are ignored under cross-validation");
    }

    let instruments = instruments_for(models);
    let assignments = build_folds(n, folds, seed);

    let mut fold_tables = Vec::with_capacity(folds);
    for fold in &assignments {
        let mut held_out = vec![false; n];
        for &row in fold {
            held_out[row] = true;
        }
        let train_rows: Vec<usize> = (0..n).filter(|&row| !held_out[row]).collect();
        let train = clean.select_rows(&train_rows);
        let eval = clean.select_rows(fold);
        let table = assemble_table(&train, &eval, &outcome, &instruments, thresholds, options)?;
        fold_tables.push(table);
    }

    let table = (0..fold_tables[0].len())
        .map(|index| average_rows(&fold_tables, index))
        .collect();

    let call = CurveCall {
        models: models.iter().map(|spec| spec.label.clone()).collect(),
        outcome,
        thresholds: thresholds.to_vec(),
        policy: options.policy,
        design: options.design,
        link: options.glm.link,
        confidence_level: None,
        bootstrap_replicates: None,
        seed: Some(seed),
        folds: Some(folds),
    };
    Ok(CvDecisionCurveResult {
        table,
        fold_tables,
        call,
        dropped_rows,
    })
}

/// Shuffle row indices and split them into `k` contiguous chunks. The
/// first `n % k` folds take one extra row, so sizes differ by at most one.
fn build_folds(n: usize, k: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let base = n / k;
    let extra = n % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for fold_index in 0..k {
        let len = base + usize::from(fold_index < extra);
        folds.push(indices[start..start + len].to_vec());
        start += len;
    }
    folds
}

/// Average one table cell across folds. The identifying fields and the
/// band placeholders come from the first fold's row; every fold table has
/// the same shape because folds share instruments and thresholds.
fn average_rows(fold_tables: &[Vec<MetricRow>], index: usize) -> MetricRow {
    let template = fold_tables[0][index].clone();
    let over = |pick: fn(&MetricRow) -> Option<f64>| {
        mean_defined(fold_tables.iter().map(|table| pick(&table[index])))
    };
    MetricRow {
        fpr: over(|row| row.fpr),
        tpr: over(|row| row.tpr),
        nb: over(|row| row.nb),
        snb: over(|row| row.snb),
        rho: over(|row| row.rho),
        prob_high_risk: over(|row| row.prob_high_risk),
        dp: over(|row| row.dp),
        ..template
    }
}

/// Mean of the defined values only; `None` when nothing is defined.
fn mean_defined(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .flatten()
        .fold((0.0f64, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { None } else { Some(sum / count as f64) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_partition_the_rows() {
        let folds = build_folds(10, 3, 7);
        assert_eq!(folds.len(), 3);
        let sizes: Vec<usize> = folds.iter().map(Vec::len).collect();
        assert_eq!(sizes, [4, 3, 3]);

        let mut seen = folds.concat();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<usize>>());
    }

    #[test]
    fn fold_assignment_is_reproducible() {
        assert_eq!(build_folds(25, 4, 11), build_folds(25, 4, 11));
        let even = build_folds(12, 4, 1);
        assert!(even.iter().all(|fold| fold.len() == 3));
    }

    #[test]
    fn undefined_cells_are_left_out_of_the_mean() {
        assert_eq!(mean_defined(std::iter::empty::<Option<f64>>()), None);
        assert_eq!(mean_defined([None, None].into_iter()), None);
        assert_eq!(
            mean_defined([Some(1.0), None, Some(3.0)].into_iter()),
            Some(2.0)
        );
    }
}
