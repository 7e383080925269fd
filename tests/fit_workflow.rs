//! End-to-end fits on the demonstration grid through the public API.

use approx::assert_relative_eq;
use nebula_fit::data::{demo_grid, demo_grid_table, mock_spectrum, DEMO_LINES};
use nebula_fit::domain::{
    AxisUncertainty, Detection, LineObservation, ObservedSpectrum, ParamAxis, ParameterVector,
};
use nebula_fit::error::FitError;
use nebula_fit::fit::{fit, fit_with, FitOptions};
use nebula_fit::grid::GridSchema;
use nebula_fit::io::{load_grid, read_observations_csv, write_grid_csv, write_observations_csv};

fn truth() -> ParameterVector {
    ParameterVector::new([0.006, -2.7, 0.3, 2.0, 0.6])
}

fn generous() -> FitOptions {
    FitOptions {
        max_iters: 4000,
        ..FitOptions::default()
    }
}

/// Copy of `s` with every flux and uncertainty multiplied by `c`.
fn scaled(s: &ObservedSpectrum, c: f64) -> ObservedSpectrum {
    let mut out = ObservedSpectrum::new(s.id());
    for (line, obs) in s.lines() {
        let obs = match obs.detection {
            Detection::Detected => LineObservation::detected(obs.flux * c, obs.uncertainty * c),
            Detection::UpperLimit => {
                LineObservation::upper_limit(obs.flux * c, obs.uncertainty * c)
            }
            Detection::NotObserved => LineObservation::not_observed(),
        };
        out.insert(line, obs).unwrap();
    }
    out
}

#[test]
fn noise_free_mock_is_recovered_with_small_chi2() {
    let grid = demo_grid().unwrap();
    let observed = mock_spectrum(&grid, "mock", &truth(), 0.0, 0.05, 7).unwrap();
    let result = fit_with(&grid, &observed, None, &generous()).unwrap();

    assert!(result.chi2 < 1e-4, "chi2 = {}", result.chi2);
    assert_eq!(result.target, "mock");
    assert!(result.scale_solved);
    assert_eq!(result.dof, DEMO_LINES.len() - 6);
    assert!((result.best[ParamAxis::LogU] - truth()[ParamAxis::LogU]).abs() < 0.5);
    for axis in ParamAxis::ALL {
        assert!(matches!(result.uncertainty(axis), AxisUncertainty::Interval { .. }));
    }
}

#[test]
fn scaling_the_observation_scales_only_the_normalisation() {
    let grid = demo_grid().unwrap();
    let observed = mock_spectrum(&grid, "mock", &truth(), 0.01, 0.05, 11).unwrap();
    let opts = FitOptions {
        curvature: false,
        ..FitOptions::default()
    };

    let base = fit_with(&grid, &observed, None, &opts).unwrap();
    let quad = fit_with(&grid, &scaled(&observed, 4.0), None, &opts).unwrap();

    assert_eq!(base.best, quad.best);
    assert_relative_eq!(base.chi2, quad.chi2, max_relative = 1e-12);
    assert_relative_eq!(quad.scale, 4.0 * base.scale, max_relative = 1e-12);
}

#[test]
fn single_node_axis_reports_its_value_unconstrained() {
    let grid = demo_grid().unwrap().fix(ParamAxis::Xi, 0.3).unwrap();
    let observed = mock_spectrum(&grid, "mock", &truth(), 0.0, 0.05, 3).unwrap();
    let result = fit(&grid, &observed, None).unwrap();

    assert_eq!(result.best[ParamAxis::Xi], 0.3);
    assert_eq!(result.uncertainty(ParamAxis::Xi), AxisUncertainty::Unconstrained);
    assert_eq!(result.dof, DEMO_LINES.len() - 5);
}

#[test]
fn too_few_lines_for_the_free_parameters() {
    let grid = demo_grid().unwrap();
    let mut observed = mock_spectrum(&grid, "thin", &truth(), 0.0, 0.05, 1).unwrap();
    let keep: Vec<String> = DEMO_LINES[..6].iter().map(|l| l.to_string()).collect();
    observed.retain_lines(&keep);

    let err = fit(&grid, &observed, None).unwrap_err();
    assert_eq!(err, FitError::InsufficientData { lines: 6, free: 6 });

    // A fixed scale frees one line.
    let opts = FitOptions {
        scale: Some(1.0),
        curvature: false,
        ..FitOptions::default()
    };
    assert!(fit_with(&grid, &observed, None, &opts).is_ok());
}

#[test]
fn generous_upper_limit_costs_nothing() {
    let grid = demo_grid().unwrap();
    let mut observed = mock_spectrum(&grid, "mock", &truth(), 0.0, 0.05, 5).unwrap();
    let model_hb = observed.get("HB").unwrap().flux;
    observed
        .insert("HB", LineObservation::upper_limit(1e6 * model_hb.abs().max(1.0), 1.0))
        .unwrap();

    let result = fit_with(&grid, &observed, None, &generous()).unwrap();
    let hb = result.residuals.iter().find(|r| r.line == "HB").unwrap();
    assert_eq!(hb.detection, Detection::UpperLimit);
    assert_eq!(hb.contribution, 0.0);
}

#[test]
fn grid_and_catalogue_survive_a_csv_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let grid_path = dir.path().join("grid.csv");
    let obs_path = dir.path().join("obs.csv");

    write_grid_csv(&grid_path, &demo_grid_table()).unwrap();
    let loaded = load_grid(&grid_path, &GridSchema::new(&DEMO_LINES)).unwrap();
    assert_eq!(loaded, demo_grid().unwrap());

    let observed = mock_spectrum(&loaded, "T1", &truth(), 0.0, 0.05, 9).unwrap();
    write_observations_csv(&obs_path, std::slice::from_ref(&observed)).unwrap();
    let ingested = read_observations_csv(&obs_path).unwrap();
    assert!(ingested.row_errors.is_empty());
    assert_eq!(ingested.spectra, vec![observed.clone()]);

    let from_disk = fit(&loaded, &ingested.spectra[0], None).unwrap();
    let in_memory = fit(&loaded, &observed, None).unwrap();
    assert_eq!(from_disk.best, in_memory.best);
}
