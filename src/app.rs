//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - loads grids and observation catalogues
//! - runs the per-target fits (see `pipeline`)
//! - prints reports and writes optional exports

use clap::Parser;
use tracing::info;

use crate::cli::{
    Command, DemoGridArgs, FitArgs, GridArgs, GridInfoArgs, ShowArgs, SimulateArgs,
};
use crate::domain::{AxisScale, ParamAxis, ParameterVector, RunConfig, N_PARAMS};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `nebula` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();
    crate::logging::init(cli.verbose);

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::GridInfo(args) => handle_grid_info(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::DemoGrid(args) => handle_demo_grid(args),
        Command::Show(args) => handle_show(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = run_config_from_args(&args);
    let run = pipeline::run_fit(&config)?;

    for outcome in &run.outcomes {
        if let Ok(result) = &outcome.result {
            println!("{}", crate::report::format_fit_result(result));
        }
    }
    println!("{}", crate::report::format_batch_summary(&run.outcomes));
    if !run.row_errors.is_empty() {
        println!(
            "{} of {} catalogue rows skipped (run with -v for details)",
            run.row_errors.len(),
            run.rows_read
        );
    }

    if let Some(path) = &config.export_json {
        let file = crate::io::export::ResultsFile::new(&config.grid_path, &run.outcomes);
        crate::io::export::write_results_json(path, &file)?;
        info!(path = %path.display(), "wrote results JSON");
    }
    if let Some(path) = &config.export_csv {
        crate::io::export::write_results_csv(path, &run.outcomes)?;
        info!(path = %path.display(), "wrote results CSV");
    }

    if run.fitted() == 0 {
        return Err(AppError::new(3, "No target could be fitted."));
    }
    Ok(())
}

fn handle_grid_info(args: GridInfoArgs) -> Result<(), AppError> {
    let grid = load_grid(&args.grid)?;
    println!("{}", crate::report::format_grid_info(&grid));
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let grid = load_grid(&args.grid)?;

    // Degenerate axes may be left out of `--at`.
    let mut at = ParameterVector::new([f64::NAN; N_PARAMS]);
    for &(axis, value) in &args.at {
        at.set(axis, value);
    }
    for axis in ParamAxis::ALL {
        if at[axis].is_nan() {
            let grid_axis = grid.axis(axis);
            if !grid_axis.is_degenerate() {
                return Err(AppError::new(2, format!("--at is missing a value for {axis}")));
            }
            at.set(axis, grid_axis.min());
        }
    }

    let spectrum =
        crate::data::mock_spectrum(&grid, &args.id, &at, args.noise, args.rel_err, args.seed)?;
    crate::io::export::write_observations_csv(&args.out, std::slice::from_ref(&spectrum))?;
    println!(
        "Wrote {} lines for '{}' to {}",
        spectrum.len(),
        spectrum.id(),
        args.out.display()
    );
    Ok(())
}

fn handle_demo_grid(args: DemoGridArgs) -> Result<(), AppError> {
    let table = crate::data::demo_grid_table();
    crate::io::export::write_grid_csv(&args.out, &table)?;
    println!(
        "Wrote demo grid ({} nodes, {} columns) to {}",
        table.rows.len(),
        table.columns.len(),
        args.out.display()
    );
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<(), AppError> {
    let file = crate::io::export::read_results_json(&args.results)?;
    print!("{}", crate::report::format_saved_results(&file));
    Ok(())
}

fn load_grid(args: &GridArgs) -> Result<crate::grid::Grid, AppError> {
    pipeline::load_grid_for_inspection(
        &args.grid,
        &args.lines,
        args.reference_line.as_deref(),
        axis_scales(args),
    )
}

fn axis_scales(args: &GridArgs) -> [AxisScale; N_PARAMS] {
    let mut scales = ParamAxis::ALL.map(ParamAxis::default_scale);
    for &(axis, scale) in &args.axis_scales {
        scales[axis.index()] = scale;
    }
    scales
}

pub fn run_config_from_args(args: &FitArgs) -> RunConfig {
    RunConfig {
        grid_path: args.grid.grid.clone(),
        observed_path: args.observed.clone(),
        targets: args.targets.clone(),
        lines: args.grid.lines.clone(),
        reference_line: args.grid.reference_line.clone(),
        axis_scales: axis_scales(&args.grid),

        min_snr: args.min_snr,
        low_snr: args.low_snr,
        fixed: args.fix.clone(),

        scale: args.scale,
        max_iters: args.max_iters,
        delta_chi2: args.delta_chi2,
        max_scan_nodes: args.max_scan_nodes,
        curvature: !args.no_curvature,

        export_json: args.export_json.clone(),
        export_csv: args.export_csv.clone(),
    }
}
