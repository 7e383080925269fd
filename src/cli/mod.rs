//! Command-line parsing for the `nebula` grid fitter.
//!
//! Argument parsing and command dispatch stay separate from the fitting code:
//! this module only describes flags, `app` turns them into a `RunConfig`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::domain::{AxisScale, LowSnrPolicy, ParamAxis};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "nebula",
    version,
    about = "Fit photoionization model grids to observed emission-line fluxes"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every target in an observations catalogue against a model grid.
    Fit(FitArgs),
    /// Print axis ranges and line list of a grid file.
    GridInfo(GridInfoArgs),
    /// Write a mock observation of a grid at a chosen parameter vector.
    Simulate(SimulateArgs),
    /// Write the built-in demonstration grid as CSV.
    DemoGrid(DemoGridArgs),
    /// Print the reports stored in a results JSON file.
    Show(ShowArgs),
}

/// Options shared by every command that loads a grid.
#[derive(Debug, Parser, Clone)]
pub struct GridArgs {
    /// Grid table (CSV with Z/LOGZ, LOGU, XI, NH, CO and one column per line).
    #[arg(long, value_name = "CSV")]
    pub grid: PathBuf,

    /// Lines to use (comma separated). Defaults depend on the command.
    #[arg(long, value_delimiter = ',')]
    pub lines: Vec<String>,

    /// Normalise every grid line by this line, node by node.
    #[arg(long)]
    pub reference_line: Option<String>,

    /// Override an axis spacing, e.g. `--axis-scale Z=linear`.
    #[arg(long = "axis-scale", value_name = "AXIS=SCALE", value_parser = parse_axis_scale)]
    pub axis_scales: Vec<(ParamAxis, AxisScale)>,
}

/// Options for `nebula fit`.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    #[command(flatten)]
    pub grid: GridArgs,

    /// Observations catalogue (CSV, one row per target).
    #[arg(long, value_name = "CSV")]
    pub observed: PathBuf,

    /// Only fit these target ids (repeatable).
    #[arg(long = "target", value_name = "ID")]
    pub targets: Vec<String>,

    /// Detections with flux/σ at or below this are demoted (0 disables).
    #[arg(long, default_value_t = 3.0)]
    pub min_snr: f64,

    /// What to do with detections below `--min-snr`.
    #[arg(long, value_enum, default_value_t = LowSnrPolicy::Exclude)]
    pub low_snr: LowSnrPolicy,

    /// Pin an axis to one of its grid nodes, e.g. `--fix CO=1.0` (repeatable).
    #[arg(long, value_name = "AXIS=VALUE", value_parser = parse_axis_value)]
    pub fix: Vec<(ParamAxis, f64)>,

    /// Use a fixed scale factor instead of solving for it.
    #[arg(long)]
    pub scale: Option<f64>,

    /// Nelder-Mead iteration budget.
    #[arg(long, default_value_t = 500)]
    pub max_iters: u64,

    /// χ² increase defining the uncertainty interval.
    #[arg(long, default_value_t = 1.0)]
    pub delta_chi2: f64,

    /// Node budget for the coarse scan.
    #[arg(long, default_value_t = 200_000)]
    pub max_scan_nodes: usize,

    /// Skip the curvature-based covariance estimate.
    #[arg(long)]
    pub no_curvature: bool,

    /// Write full results to JSON.
    #[arg(long, value_name = "JSON")]
    pub export_json: Option<PathBuf>,

    /// Write one summary row per target to CSV.
    #[arg(long, value_name = "CSV")]
    pub export_csv: Option<PathBuf>,
}

/// Options for `nebula grid-info`.
#[derive(Debug, Parser, Clone)]
pub struct GridInfoArgs {
    #[command(flatten)]
    pub grid: GridArgs,
}

/// Options for `nebula simulate`.
#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub grid: GridArgs,

    /// Parameter vector, e.g. `--at Z=0.008,LOGU=-2.5,XI=0.3,NH=2,CO=0.6`.
    #[arg(long, value_delimiter = ',', required = true, value_parser = parse_axis_value)]
    pub at: Vec<(ParamAxis, f64)>,

    /// Gaussian noise, as a fraction of each line flux.
    #[arg(long, default_value_t = 0.05)]
    pub noise: f64,

    /// Reported 1σ uncertainty, as a fraction of each line flux.
    #[arg(long, default_value_t = 0.05)]
    pub rel_err: f64,

    /// Random seed for the noise draw.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Target id written to the catalogue.
    #[arg(long, default_value = "mock")]
    pub id: String,

    /// Output observations CSV.
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,
}

/// Options for `nebula demo-grid`.
#[derive(Debug, Parser, Clone)]
pub struct DemoGridArgs {
    /// Output grid CSV.
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,
}

/// Options for `nebula show`.
#[derive(Debug, Parser, Clone)]
pub struct ShowArgs {
    /// Results JSON written by `nebula fit --export-json`.
    #[arg(long, value_name = "JSON")]
    pub results: PathBuf,
}

fn split_pair(s: &str) -> Result<(ParamAxis, &str), String> {
    let (axis, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected AXIS=VALUE, got '{s}'"))?;
    Ok((axis.parse::<ParamAxis>()?, value.trim()))
}

/// Parse `AXIS=VALUE`.
pub fn parse_axis_value(s: &str) -> Result<(ParamAxis, f64), String> {
    let (axis, value) = split_pair(s)?;
    let v: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if !v.is_finite() {
        return Err(format!("'{value}' is not finite"));
    }
    Ok((axis, v))
}

/// Parse `AXIS=linear|logarithmic`.
pub fn parse_axis_scale(s: &str) -> Result<(ParamAxis, AxisScale), String> {
    let (axis, value) = split_pair(s)?;
    let scale = AxisScale::from_str(value, true)?;
    Ok((axis, scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_value_pairs_parse() {
        assert_eq!(parse_axis_value("CO=1.0").unwrap(), (ParamAxis::CO, 1.0));
        assert_eq!(parse_axis_value("logU=-2.5").unwrap(), (ParamAxis::LogU, -2.5));
        assert!(parse_axis_value("CO").is_err());
        assert!(parse_axis_value("age=3").is_err());
        assert!(parse_axis_value("Z=abc").is_err());
    }

    #[test]
    fn axis_scale_pairs_parse() {
        assert_eq!(
            parse_axis_scale("Z=linear").unwrap(),
            (ParamAxis::Z, AxisScale::Linear)
        );
        assert!(parse_axis_scale("Z=cubic").is_err());
    }

    #[test]
    fn fit_command_parses() {
        let cli = Cli::try_parse_from([
            "nebula", "-vv", "fit", "--grid", "g.csv", "--observed", "o.csv", "--lines",
            "HB,OIII5007", "--fix", "CO=1", "--fix", "XI=0.3", "--no-curvature",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.grid.lines, vec!["HB", "OIII5007"]);
        assert_eq!(args.fix.len(), 2);
        assert!(args.no_curvature);
        assert_eq!(args.min_snr, 3.0);
    }

    #[test]
    fn show_takes_a_results_file() {
        let cli = Cli::try_parse_from(["nebula", "show", "--results", "r.json"]).unwrap();
        let Command::Show(args) = cli.command else {
            panic!("expected show");
        };
        assert_eq!(args.results, PathBuf::from("r.json"));
        assert!(Cli::try_parse_from(["nebula", "show"]).is_err());
    }

    #[test]
    fn simulate_requires_at() {
        let err = Cli::try_parse_from(["nebula", "simulate", "--grid", "g.csv", "--out", "o.csv"]);
        assert!(err.is_err());
        let ok = Cli::try_parse_from([
            "nebula", "simulate", "--grid", "g.csv", "--out", "o.csv", "--at",
            "Z=0.008,LOGU=-2.5,XI=0.3,NH=2,CO=0.6",
        ])
        .unwrap();
        let Command::Simulate(args) = ok.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.at.len(), 5);
    }
}
