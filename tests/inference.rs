use approx::assert_abs_diff_eq;
use pretty_assertions::assert_eq;
use weight_posterior::{
    run_inference, CancelToken, Dataset, DiagnosticsMethod, InferenceError, InferenceSession,
    InputMode, Phase, ProgressCallback, SamplerSettings,
};

fn tul_xoph() -> Vec<Dataset> {
    vec![Dataset::new([("tul", 2030), ("xoph", 2007)]).with_inputs(["esh"])]
}

#[test]
fn nearly_equal_counts() -> anyhow::Result<()> {
    let datasets = tul_xoph();
    let settings = SamplerSettings {
        seed: 42,
        ..Default::default()
    };
    let result = run_inference(&datasets, settings, None)?;

    assert_eq!(result.items(), ["tul", "xoph"]);
    assert_eq!(
        result.model_assumptions.datasets[0].mode,
        InputMode::Single {
            input: "esh".to_string()
        }
    );
    assert_eq!(result.model_assumptions.single_input, 1);

    let tul = result.summary("tul").unwrap();
    let xoph = result.summary("xoph").unwrap();
    assert_abs_diff_eq!(tul.median, 0.5, epsilon = 0.05);
    assert_abs_diff_eq!(xoph.median, 0.5, epsilon = 0.05);
    assert_abs_diff_eq!(tul.median + xoph.median, 1., epsilon = 1e-9);
    assert_eq!(tul.map_approx, tul.median);
    assert!(tul.credible_interval.lower < tul.median);
    assert!(tul.credible_interval.upper > tul.median);

    assert_eq!(result.samples("tul").unwrap().len(), 2 * 2000);
    assert_eq!(result.metadata.num_datasets, 1);
    assert_eq!(result.metadata.burn_in, 500);
    assert_eq!(result.chains.len(), 2);
    assert!(result.chains.iter().all(|chain| chain.acceptance_rate > 0.));
    assert_eq!(result.densities["xoph"].len(), 100);
    assert!(result.convergence_diagnostics.overall.converged);
    Ok(())
}

#[test]
fn excluded_input_gets_weight_from_other_datasets() -> anyhow::Result<()> {
    // "a" can not come out of the second dataset, so its counts say nothing
    // about the weight of "a".
    let datasets = vec![
        Dataset::new([("a", 200), ("b", 200), ("c", 200)]),
        Dataset::new([("b", 400), ("c", 400)]).with_inputs(["a"]),
    ];
    let settings = SamplerSettings {
        seed: 3,
        num_samples: 1500,
        burn_in: 1000,
        ..Default::default()
    };
    let result = run_inference(&datasets, settings, None)?;
    for item in ["a", "b", "c"] {
        assert_abs_diff_eq!(result.summary(item).unwrap().median, 1. / 3., epsilon = 0.05);
    }
    Ok(())
}

#[test]
fn single_item_is_certain() -> anyhow::Result<()> {
    let datasets = vec![
        Dataset::new([("only", 12)]).with_inputs(["other"]),
        Dataset::new([("only", 3)]),
    ];
    let settings = SamplerSettings {
        num_samples: 100,
        num_chains: 3,
        ..Default::default()
    };
    let (callback, events) = ProgressCallback::channel();
    let result = run_inference(&datasets, settings, Some(callback))?;

    let samples = result.samples("only").unwrap();
    assert_eq!(samples.len(), 300);
    assert!(samples.iter().all(|&w| w == 1.));
    let summary = result.summary("only").unwrap();
    assert_eq!(summary.median, 1.);
    assert_eq!(summary.map_approx, 1.);
    assert_eq!(summary.credible_interval.lower, 1.);
    assert_eq!(summary.credible_interval.upper, 1.);
    assert!(result.convergence_diagnostics.items["only"].converged);
    assert!(result.convergence_diagnostics.overall.converged);

    let last = events.try_iter().last().unwrap();
    assert_eq!(last.phase, Phase::Done);
    assert_eq!(last.percent, 100.);
    Ok(())
}

#[test]
fn no_outputs_at_all() {
    let datasets = vec![Dataset::default().with_inputs(["a"])];
    let err = run_inference(&datasets, SamplerSettings::default(), None).unwrap_err();
    assert!(matches!(err, InferenceError::EmptyUniverse));
}

#[test]
fn invalid_settings_fail_before_sampling() {
    let settings = SamplerSettings {
        num_chains: 0,
        ..Default::default()
    };
    let err = run_inference(&tul_xoph(), settings, None).unwrap_err();
    assert!(matches!(err, InferenceError::InvalidSettings(_)));
}

#[test]
fn empty_datasets_are_tolerated() -> anyhow::Result<()> {
    let datasets = vec![
        Dataset::new([("a", 0), ("b", 0)]),
        Dataset::new([("a", 5), ("b", 5)]),
    ];
    assert!(weight_posterior::validate_datasets(&datasets).is_err());
    let settings = SamplerSettings {
        num_samples: 300,
        burn_in: 100,
        ..Default::default()
    };
    let result = run_inference(&datasets, settings, None)?;
    assert_eq!(result.metadata.num_datasets, 2);
    Ok(())
}

#[test]
fn same_seed_same_draws() -> anyhow::Result<()> {
    let datasets = tul_xoph();
    let settings = SamplerSettings {
        num_samples: 300,
        burn_in: 100,
        num_chains: 4,
        seed: 1234,
        ..Default::default()
    };
    let first = run_inference(&datasets, settings, None)?;
    let second = run_inference(&datasets, settings, None)?;
    assert_eq!(first.posterior_samples, second.posterior_samples);
    assert_eq!(first.summary_statistics, second.summary_statistics);
    Ok(())
}

#[test]
fn gelman_rubin_diagnostics() -> anyhow::Result<()> {
    let settings = SamplerSettings {
        seed: 5,
        num_chains: 4,
        diagnostics: DiagnosticsMethod::GelmanRubin,
        ..Default::default()
    };
    let result = run_inference(&tul_xoph(), settings, None)?;
    let diagnostics = &result.convergence_diagnostics;
    assert_eq!(diagnostics.method, DiagnosticsMethod::GelmanRubin);
    for item in result.items() {
        let diag = diagnostics.items[item];
        assert!(diag.rhat.is_finite());
        assert!(diag.ess > 0. && diag.ess <= 8000. * 4.);
    }
    Ok(())
}

#[test]
fn cancellation() {
    let datasets = tul_xoph();
    let token = CancelToken::new();
    token.cancel();
    let err = InferenceSession::new(&datasets, SamplerSettings::default())
        .with_cancel_token(token)
        .run()
        .unwrap_err();
    assert!(matches!(err, InferenceError::Cancelled));
}

#[test]
fn request_json() -> anyhow::Result<()> {
    let request = r#"{
        "datasets": [
            {"items": [{"id": "x", "count": 4}, {"id": "y", "count": 1}]},
            {"items": [{"id": "y", "count": 2}], "inputItems": [{"id": "x"}, {"id": "z"}]}
        ],
        "options": {"numSamples": 200, "burnIn": 50, "numChains": 1, "seed": 9}
    }"#;
    let value: serde_json::Value = serde_json::from_str(request)?;
    let datasets: Vec<Dataset> = serde_json::from_value(value["datasets"].clone())?;
    let settings: SamplerSettings = serde_json::from_value(value["options"].clone())?;
    let result = run_inference(&datasets, settings, None)?;

    assert_eq!(result.model_assumptions.multiple_inputs, 1);
    assert_eq!(result.model_assumptions.notes.len(), 2);
    let json = serde_json::to_value(&result)?;
    assert_eq!(json["metadata"]["numSamples"], 200);
    assert_eq!(json["posteriorSamples"]["x"].as_array().unwrap().len(), 200);
    assert_eq!(
        json["modelAssumptions"]["datasets"][1]["mode"]["kind"],
        "multiple"
    );
    Ok(())
}
