//! End-to-end weighting runs through the public surface only.

use anyhow::Result;
use rimrake::{
    scheme_from_dict, scheme_from_long_df, validate_scheme_dict, weight_dataframe,
    weighting_efficiency, Column, Dataset, RimParams, SchemeDict, WeightEngine,
};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// A skewed panel: region 1 oversamples men, region 2 oversamples women.
fn panel() -> Result<Dataset> {
    let mut region = Vec::new();
    let mut gender = Vec::new();
    let mut age = Vec::new();
    for (r, g, a, n) in [
        (1i64, "Male", "18-34", 30),
        (1, "Male", "35+", 25),
        (1, "Female", "18-34", 10),
        (1, "Female", "35+", 5),
        (2, "Male", "18-34", 5),
        (2, "Male", "35+", 10),
        (2, "Female", "18-34", 25),
        (2, "Female", "35+", 20),
    ] {
        for _ in 0..n {
            region.push(r);
            gender.push(g);
            age.push(a);
        }
    }
    Ok(Dataset::from_columns([
        ("region", Column::from(region)),
        ("gender", Column::from(gender)),
        ("age", Column::from(age)),
    ])?)
}

#[test]
fn segmented_json_scheme_end_to_end() -> Result<()> {
    init_tracing();
    let df = panel()?;

    // JSON keys are strings; the numeric region column matches anyway.
    let json = r#"{
        "segment_by": "region",
        "segment_targets": {"1": 60.0, "2": 40.0},
        "segments": {
            "1": {"gender": {"Male": 50.0, "Female": 50.0},
                  "age": {"18-34": 40.0, "35+": 60.0}},
            "2": {"gender": {"Male": 50.0, "Female": 50.0},
                  "age": {"18-34": 40.0, "35+": 60.0}}
        }
    }"#;
    let dict = SchemeDict::from_json(json)?;

    let report = validate_scheme_dict(&df, &dict)?;
    assert!(!report.has_errors(), "unexpected errors:\n{report}");

    let scheme = scheme_from_dict(&dict, Some("regional_rim"), RimParams::default())?;
    let outcome = WeightEngine::new(&df).run(&scheme)?;
    assert!(outcome.converged());
    assert!(outcome.unassigned.is_empty());

    // Inter-segment shares hit the declared 60/40 split.
    let total: f64 = outcome.weights.iter().sum();
    let region_col = df.column("region").unwrap();
    let in_1: f64 = (0..df.n_rows())
        .filter(|&row| region_col.value(row) == rimrake::Value::Int(1))
        .map(|row| outcome.weights[row])
        .sum();
    assert!((in_1 / total - 0.60).abs() < 1e-6);

    // Weighting always costs efficiency on a skewed panel.
    let eff = weighting_efficiency(&outcome.weights)?;
    assert!(eff > 10.0 && eff < 100.0);

    // The outcome's own efficiency agrees with the standalone computation.
    assert!((outcome.efficiency - eff).abs() < 1e-12);
    Ok(())
}

#[test]
fn long_form_census_to_weighted_dataframe() -> Result<()> {
    init_tracing();
    let df = panel()?;

    // Aggregate census targets in long form, one block per region.
    let census = Dataset::from_columns([
        (
            "region",
            Column::from(vec![1i64, 1, 1, 1, 2, 2, 2, 2]),
        ),
        (
            "variable",
            Column::from(vec![
                "gender", "gender", "age", "age", "gender", "gender", "age", "age",
            ]),
        ),
        (
            "category",
            Column::from(vec![
                "Male", "Female", "18-34", "35+", "Male", "Female", "18-34", "35+",
            ]),
        ),
        (
            "count",
            Column::from(vec![500.0, 500.0, 450.0, 550.0, 300.0, 300.0, 270.0, 330.0]),
        ),
    ])?;

    let scheme = scheme_from_long_df(
        &census,
        "variable",
        "category",
        "count",
        Some("region"),
        Some("census_rim"),
        RimParams::default(),
    )?;

    let weighted = weight_dataframe(&df, &scheme, None)?;
    let weights = match weighted.column("weights").unwrap() {
        Column::Float(w) => w.clone(),
        other => panic!("expected float weight column, got {other:?}"),
    };
    assert_eq!(weights.len(), df.n_rows());
    assert!(weights.iter().all(|&w| w > 0.0));

    // Region 1 carries 1000 of 1600 census units.
    let total: f64 = weights.iter().sum();
    let region_col = df.column("region").unwrap();
    let in_1: f64 = (0..df.n_rows())
        .filter(|&row| region_col.value(row) == rimrake::Value::Int(1))
        .map(|row| weights[row])
        .sum();
    assert!((in_1 / total - 1000.0 / 1600.0).abs() < 1e-6);
    Ok(())
}
