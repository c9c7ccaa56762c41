use dca::{
    BootstrapOptions, CohortData, CurveOptions, GlmOptions, Instrument, MetricRow, ModelSpec,
    Policy, ReferenceStrategy, StudyDesign, bootstrap_bands, decision_curve,
};

/// 40 observations, 10 events. `risk` separates the classes, `risk2` is a
/// noisier score, and `x` overlaps between classes so the logistic fit
/// stays finite on resamples.
fn banded_cohort() -> CohortData {
    let mut outcome = Vec::with_capacity(40);
    let mut risk = Vec::with_capacity(40);
    let mut risk2 = Vec::with_capacity(40);
    let mut x = Vec::with_capacity(40);
    for i in 0..40 {
        let event = i < 10;
        outcome.push(if event { 1.0 } else { 0.0 });
        risk.push(if event { 0.85 } else { 0.15 });
        risk2.push(if i % 4 == 0 { 0.7 } else { 0.25 });
        x.push(if event {
            1.0 + (i % 5) as f64 * 0.2
        } else {
            0.2 + (i % 8) as f64 * 0.2
        });
    }
    CohortData::new(vec![
        ("d".to_string(), outcome),
        ("risk".to_string(), risk),
        ("risk2".to_string(), risk2),
        ("x".to_string(), x),
    ])
    .unwrap()
}

fn with_bootstrap(replicates: usize, seed: u64) -> CurveOptions {
    CurveOptions {
        bootstrap: Some(BootstrapOptions {
            replicates,
            confidence_level: 0.9,
            seed,
        }),
        ..CurveOptions::default()
    }
}

fn assert_brackets(row: &MetricRow) {
    let triples = [
        ("TPR", row.tpr, row.tpr_lower, row.tpr_upper),
        ("FPR", row.fpr, row.fpr_lower, row.fpr_upper),
        ("rho", row.rho, row.rho_lower, row.rho_upper),
        ("DP", row.dp, row.dp_lower, row.dp_upper),
        ("NB", row.nb, row.nb_lower, row.nb_upper),
        ("sNB", row.snb, row.snb_lower, row.snb_upper),
    ];
    for (what, point, lower, upper) in triples {
        if let (Some(p), Some(lo), Some(hi)) = (point, lower, upper) {
            assert!(
                lo <= hi,
                "{what} bounds inverted for {} at {}: [{lo}, {hi}]",
                row.model,
                row.threshold
            );
            assert!(
                lo <= p && p <= hi,
                "{what} point {p} outside [{lo}, {hi}] for {} at {}",
                row.model,
                row.threshold
            );
        }
    }
}

#[test]
fn bands_bracket_the_point_estimates() {
    let data = banded_cohort();
    let models = [
        ModelSpec::precomputed("score", "d", "risk"),
        ModelSpec::fitted("glm", "d", &["x"]),
    ];
    let thresholds = [0.1, 0.3, 0.6];
    let result = decision_curve(&data, &models, &thresholds, &with_bootstrap(80, 5))
        .expect("banded estimation should succeed");

    assert_eq!(result.confidence_level, Some(0.9));
    assert_eq!(result.call.bootstrap_replicates, Some(80));
    assert_eq!(result.call.seed, Some(5));
    assert_eq!(result.table.len(), 4 * thresholds.len());
    for row in &result.table {
        assert_brackets(row);
    }

    // The separating score finds every event in every resample, so its TPR
    // band is degenerate at 1.
    for row in &result.table[0..thresholds.len()] {
        assert_eq!(row.model, "score");
        assert_eq!(row.tpr, Some(1.0));
        assert_eq!(row.tpr_lower, Some(1.0));
        assert_eq!(row.tpr_upper, Some(1.0));
    }

    // "None" has exactly zero net benefit in every resample.
    let none_rows = &result.table[3 * thresholds.len()..];
    for row in none_rows {
        assert_eq!(row.model, "None");
        assert_eq!(row.nb_lower, Some(0.0));
        assert_eq!(row.nb_upper, Some(0.0));
    }
}

#[test]
fn same_seed_reproduces_the_bands_exactly() {
    let data = banded_cohort();
    let models = [
        ModelSpec::precomputed("score", "d", "risk"),
        ModelSpec::fitted("glm", "d", &["x"]),
    ];
    let options = with_bootstrap(60, 11);
    let first = decision_curve(&data, &models, &[0.2, 0.4], &options)
        .expect("banded estimation should succeed");
    let second = decision_curve(&data, &models, &[0.2, 0.4], &options)
        .expect("banded estimation should succeed");
    assert_eq!(first.table, second.table);
}

#[test]
fn replicates_are_shared_across_the_instrument_list() {
    let data = banded_cohort();
    let thresholds = [0.2, 0.5];
    let options = with_bootstrap(50, 9);

    let score = ModelSpec::precomputed("score", "d", "risk");
    let second = ModelSpec::precomputed("noisy", "d", "risk2");
    let both = decision_curve(&data, &[score.clone(), second], &thresholds, &options)
        .expect("banded estimation should succeed");
    let alone = decision_curve(&data, &[score], &thresholds, &options)
        .expect("banded estimation should succeed");

    // The index sets depend on the seed and the data, never on which
    // instruments are evaluated over them, so shared blocks agree exactly.
    let t = thresholds.len();
    assert_eq!(both.table[0..t], alone.table[0..t]);
    assert_eq!(both.table[2 * t..3 * t], alone.table[t..2 * t]);
    assert_eq!(both.table[3 * t..4 * t], alone.table[2 * t..3 * t]);
}

#[test]
fn eventless_outcomes_leave_event_metrics_unbounded() {
    let data = CohortData::new(vec![
        ("d".to_string(), vec![0.0; 12]),
        ("risk".to_string(), vec![0.3; 12]),
    ])
    .unwrap();
    let models = [ModelSpec::precomputed("score", "d", "risk")];
    let result = decision_curve(&data, &models, &[0.2], &with_bootstrap(30, 2))
        .expect("banded estimation should succeed");

    let score_row = &result.table[0];
    assert_eq!(score_row.tpr, None);
    assert_eq!(score_row.nb, None);
    assert_eq!(score_row.snb, None);
    assert_eq!(score_row.dp, None);
    assert_eq!(score_row.tpr_lower, None);
    assert_eq!(score_row.tpr_upper, None);
    assert_eq!(score_row.nb_lower, None);
    assert_eq!(score_row.dp_upper, None);
    assert_eq!(score_row.snb_lower, None);

    // Control-side quantities stay defined and degenerate.
    assert_eq!(score_row.fpr, Some(1.0));
    assert_eq!(score_row.fpr_lower, Some(1.0));
    assert_eq!(score_row.fpr_upper, Some(1.0));
    assert_eq!(score_row.rho, Some(0.0));
    assert_eq!(score_row.rho_lower, Some(0.0));
    assert_eq!(score_row.rho_upper, Some(0.0));
}

#[test]
fn case_control_resampling_fixes_prevalence_and_case_count() {
    let mut risk = vec![0.2; 8];
    risk[0] = 0.8;
    risk[1] = 0.8;
    risk[2] = 0.8;
    risk[3] = 0.4;
    let data = CohortData::new(vec![
        ("d".to_string(), vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        ("risk".to_string(), risk),
    ])
    .unwrap();
    let models = [ModelSpec::precomputed("score", "d", "risk")];
    let options = CurveOptions {
        design: StudyDesign::CaseControl {
            population_prevalence: 0.05,
        },
        bootstrap: Some(BootstrapOptions {
            replicates: 40,
            confidence_level: 0.9,
            seed: 13,
        }),
        ..CurveOptions::default()
    };
    let result = decision_curve(&data, &models, &[0.3], &options)
        .expect("banded estimation should succeed");

    for row in &result.table {
        // Supplied prevalence is a constant of the analysis, not a sample
        // statistic, so its band collapses onto it.
        assert_eq!(row.rho, Some(0.05));
        assert_eq!(row.rho_lower, Some(0.05));
        assert_eq!(row.rho_upper, Some(0.05));
        // Stratified draws keep all three cases, so TPR is always defined.
        assert!(row.tpr.is_some());
        assert!(row.tpr_lower.is_some());
        assert_brackets(row);
    }

    // All flags every resampled observation, so its NB is the same
    // deterministic function of the supplied prevalence each time.
    let all_row = &result.table[1];
    assert_eq!(all_row.model, "All");
    assert_eq!(all_row.nb_lower, all_row.nb);
    assert_eq!(all_row.nb_upper, all_row.nb);
}

#[test]
fn unfittable_resamples_are_skipped_and_counted() {
    // Four of the five rows carry predictor 0, so a resample that misses
    // row 4 has a constant-zero predictor column. The normal equations
    // are then exactly singular and the re-fit fails, which skips the
    // whole replicate instead of poisoning its cells.
    let data = CohortData::new(vec![
        ("d".to_string(), vec![0.0, 0.0, 0.0, 0.0, 1.0]),
        ("x".to_string(), vec![0.0, 0.0, 0.0, 0.0, 5.0]),
    ])
    .unwrap();
    let spec = ModelSpec::fitted("glm", "d", &["x"]);
    let instruments = [
        Instrument::Model(&spec),
        Instrument::Reference(ReferenceStrategy::TreatAll),
        Instrument::Reference(ReferenceStrategy::TreatNone),
    ];
    let bands = bootstrap_bands(
        &data,
        &instruments,
        "d",
        &[0.5],
        Policy::OptIn,
        StudyDesign::Cohort,
        &GlmOptions::default(),
        &BootstrapOptions {
            replicates: 100,
            confidence_level: 0.9,
            seed: 17,
        },
    )
    .expect("band estimation should succeed");

    assert!(bands.skipped_replicates > 0);
    assert!(bands.skipped_replicates < 100);

    // Bands are reduced over the surviving replicates, all of which drew
    // the event row.
    let glm_row = &bands.models[0].rows[0];
    assert!(glm_row.tpr.lower.is_some() && glm_row.tpr.upper.is_some());
    assert!(glm_row.fpr.lower.is_some());
    assert!(glm_row.rho.lower.is_some() && glm_row.rho.upper.is_some());

    // The skip covers the references too: "All" flags everyone, and over
    // the survivors with controls its FPR is identically 1.
    let all_row = &bands.models[1].rows[0];
    assert_eq!(all_row.fpr.lower, Some(1.0));
    assert_eq!(all_row.fpr.upper, Some(1.0));
}

#[test]
fn band_envelope_reports_instruments_in_table_order() {
    let data = banded_cohort();
    let spec = ModelSpec::precomputed("score", "d", "risk");
    let instruments = [
        Instrument::Model(&spec),
        Instrument::Reference(ReferenceStrategy::TreatAll),
        Instrument::Reference(ReferenceStrategy::TreatNone),
    ];
    let bands = bootstrap_bands(
        &data,
        &instruments,
        "d",
        &[0.3],
        Policy::OptIn,
        StudyDesign::Cohort,
        &GlmOptions::default(),
        &BootstrapOptions {
            replicates: 25,
            confidence_level: 0.95,
            seed: 3,
        },
    )
    .expect("band estimation should succeed");

    let labels: Vec<&str> = bands.models.iter().map(|m| m.label.as_str()).collect();
    assert_eq!(labels, ["score", "All", "None"]);
    assert_eq!(bands.skipped_replicates, 0);
    assert_eq!(bands.models[0].rows.len(), 1);
    assert_eq!(bands.models[0].rows[0].threshold, 0.3);
}
