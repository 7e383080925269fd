//! Coarse node scan.
//!
//! The first optimisation phase scores every grid node directly from the flux
//! arena, without interpolation. That gives a start point near the global
//! minimum for the local refinement, which on its own can get trapped by the
//! piecewise-linear cost surface.
//!
//! When the grid has more nodes than `max_nodes`, axes are subsampled with a
//! per-axis stride (the outermost nodes are always kept) until the budget fits.

use rayon::prelude::*;

use crate::domain::N_PARAMS;
use crate::fit::likelihood::BoundSpectrum;
use crate::grid::{Grid, NodeIndex};

/// Best node from the coarse scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanOutcome {
    pub best: NodeIndex,
    pub cost: f64,
    pub nodes_scanned: usize,
}

/// Node indices visited on each axis.
pub fn scan_nodes(shape: &NodeIndex, max_nodes: usize) -> [Vec<usize>; N_PARAMS] {
    let mut strides = [1usize; N_PARAMS];
    let sampled = |strides: &[usize; N_PARAMS]| -> [Vec<usize>; N_PARAMS] {
        std::array::from_fn(|i| {
            let n = shape[i];
            let mut idx: Vec<usize> = (0..n).step_by(strides[i]).collect();
            if idx.last() != Some(&(n - 1)) {
                idx.push(n - 1);
            }
            idx
        })
    };
    let mut nodes = sampled(&strides);
    loop {
        let total: usize = nodes.iter().map(Vec::len).product();
        if total <= max_nodes.max(1) {
            break;
        }
        // Thin the densest axis that still has interior nodes.
        let Some(axis) = (0..N_PARAMS)
            .filter(|&i| nodes[i].len() > 2)
            .max_by_key(|&i| (nodes[i].len(), std::cmp::Reverse(i)))
        else {
            break;
        };
        strides[axis] += 1;
        nodes = sampled(&strides);
    }
    nodes
}

/// Score the (possibly subsampled) grid nodes in parallel.
///
/// Ties are broken by the lowest linear node index, so the result does not
/// depend on thread scheduling.
pub fn coarse_scan(
    grid: &Grid,
    spectrum: &BoundSpectrum,
    scale: Option<f64>,
    max_nodes: usize,
) -> ScanOutcome {
    let nodes = scan_nodes(&grid.shape(), max_nodes);
    let counts: [usize; N_PARAMS] = std::array::from_fn(|i| nodes[i].len());
    let total: usize = counts.iter().product();

    let (linear, cost) = (0..total)
        .into_par_iter()
        .map(|k| {
            let mut rem = k;
            let mut idx = [0usize; N_PARAMS];
            for i in (0..N_PARAMS).rev() {
                idx[i] = nodes[i][rem % counts[i]];
                rem /= counts[i];
            }
            let linear = grid.linear_index(&idx).unwrap_or(usize::MAX);
            let cost = if linear == usize::MAX {
                f64::INFINITY
            } else {
                let c = spectrum.chi_square(grid.fluxes_at(linear), scale).chi2;
                if c.is_nan() { f64::INFINITY } else { c }
            };
            (linear, cost)
        })
        .reduce(
            || (usize::MAX, f64::INFINITY),
            |a, b| {
                if b.1 < a.1 || (b.1 == a.1 && b.0 < a.0) {
                    b
                } else {
                    a
                }
            },
        );

    // An all-infinite scan still yields a valid start: the first node.
    let linear = if linear == usize::MAX { 0 } else { linear };
    ScanOutcome {
        best: grid.unravel(linear),
        cost,
        nodes_scanned: total,
    }
}
