//! Formatted terminal output.
//!
//! Formatting lives here so the fitting code stays free of presentation
//! concerns and output changes stay localized.

use crate::domain::{AxisUncertainty, Bound, FitResult, ParamAxis, TargetOutcome};
use crate::grid::Grid;
use crate::io::export::ResultsFile;
use crate::report::worst_lines;

/// Full report for one fitted target.
pub fn format_fit_result(result: &FitResult) -> String {
    let mut out = String::new();

    out.push_str(&format!("=== {} ===\n", result.target));
    out.push_str(&format!(
        "chi2={:.3} dof={} reduced={:.3} scale={:.4e}{}\n",
        result.chi2,
        result.dof,
        result.reduced_chi2,
        result.scale,
        if result.scale_solved { " (solved)" } else { " (fixed)" }
    ));

    out.push_str("\nParameters:\n");
    for axis in ParamAxis::ALL {
        out.push_str(&format!(
            "  {:<8} {:>10} {}\n",
            axis.label(),
            fmt_num(result.best[axis]),
            fmt_uncertainty(result.uncertainty(axis)),
        ));
    }
    out.push_str(&format!("  {:<8} {:>10.3}\n", "log Z/Zsun", result.log_z_solar()));

    if let Some(curv) = &result.curvature {
        out.push_str("\nCurvature 1-sigma (interpolation space):\n");
        for (axis, s) in curv.axes.iter().zip(&curv.sigma) {
            out.push_str(&format!("  {:<8} {:>10.4}\n", axis.label(), s));
        }
    }

    out.push_str("\nLines:\n");
    out.push_str(&format!(
        "  {:<14} {:>12} {:>12} {:>10} {:>9} {:<12}\n",
        "line", "observed", "model", "sigma", "chi2", "status"
    ));
    for r in &result.residuals {
        out.push_str(&format!(
            "  {:<14} {:>12.4} {:>12.4} {:>10.4} {:>9.3} {:<12}\n",
            truncate(&r.line, 14),
            r.observed,
            r.model,
            r.uncertainty,
            r.contribution,
            format!("{:?}", r.detection),
        ));
    }
    let worst = worst_lines(result, 1);
    if let Some(w) = worst.first().filter(|w| w.contribution > 0.0) {
        out.push_str(&format!("  worst line: {} (chi2 {:.3})\n", w.line, w.contribution));
    }

    let c = &result.convergence;
    out.push_str(&format!(
        "\nSearch: scanned={} start_chi2={:.4} refined_chi2={:.4} iters={} {}\n",
        c.nodes_scanned,
        c.start_cost,
        c.refined_cost,
        c.iterations,
        if c.converged { "converged" } else { "did not fully converge" }
    ));

    out
}

/// One row per target, failures included.
pub fn format_batch_summary(outcomes: &[TargetOutcome]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<20} {:>9} {:>9} {:>7} {:>9} {:>7} {:>6} {:>6} {:<10}\n",
            "target", "Z", "log U", "xi", "log nH", "C/O", "chi2r", "dof", "status"
        )
        .trim_end(),
    );
    out.push('\n');

    for o in outcomes {
        let line = match &o.result {
            Ok(r) => format!(
                "{:<20} {:>9.5} {:>9.3} {:>7.3} {:>9.3} {:>7.3} {:>6.2} {:>6} {:<10}",
                truncate(&o.target, 20),
                r.best[ParamAxis::Z],
                r.best[ParamAxis::LogU],
                r.best[ParamAxis::Xi],
                r.best[ParamAxis::LogNh],
                r.best[ParamAxis::CO],
                r.reduced_chi2,
                r.dof,
                if r.convergence.converged { "ok" } else { "unconverged" },
            ),
            Err(e) => format!("{:<20} error: {e}", truncate(&o.target, 20)),
        };
        out.push_str(line.trim_end());
        out.push('\n');
    }

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    out.push_str(&format!("{} fitted, {} failed\n", outcomes.len() - failed, failed));
    out
}

/// Axis ranges and line list of a loaded grid.
pub fn format_grid_info(grid: &Grid) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Grid: {} nodes x {} lines\n",
        grid.node_count(),
        grid.n_lines()
    ));
    for axis in grid.axes() {
        out.push_str(&format!(
            "  {:<8} n={:<4} [{}, {}] {:?}{}\n",
            axis.param().label(),
            axis.len(),
            fmt_num(axis.min()),
            fmt_num(axis.max()),
            axis.scale(),
            if axis.is_degenerate() { " (fixed)" } else { "" }
        ));
    }
    out.push_str(&format!("Lines: {}\n", grid.lines().join(", ")));
    out
}

/// Reports for every target stored in a results JSON file.
pub fn format_saved_results(file: &ResultsFile) -> String {
    let mut out = format!(
        "{} {} results for grid {} (written {})\n\n",
        file.tool,
        file.version,
        file.grid,
        file.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let mut failed = 0;
    for entry in &file.targets {
        match (&entry.result, &entry.error) {
            (Some(result), _) => out.push_str(&format_fit_result(result)),
            (None, error) => {
                failed += 1;
                out.push_str(&format!("=== {} ===\n", entry.target));
                out.push_str(&format!(
                    "error: {}\n",
                    error.as_deref().unwrap_or("no result recorded")
                ));
            }
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "{} fitted, {} failed\n",
        file.targets.len() - failed,
        failed
    ));
    out
}

fn fmt_uncertainty(u: AxisUncertainty) -> String {
    match u {
        AxisUncertainty::Unconstrained => "(not varied)".to_string(),
        AxisUncertainty::Interval { lower, upper } => {
            format!("[{}, {}]", fmt_bound(lower), fmt_bound(upper))
        }
    }
}

fn fmt_bound(b: Bound) -> String {
    match b {
        Bound::Value(v) => fmt_num(v),
        Bound::GridEdge => "edge".to_string(),
    }
}

fn fmt_num(v: f64) -> String {
    if v != 0.0 && v.abs() < 1e-2 {
        format!("{v:.4e}")
    } else {
        format!("{v:.4}")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
