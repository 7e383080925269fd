//! Swappable handle to the current grid.
//!
//! Fits never lock: they take an `Arc<Grid>` snapshot up front and keep using
//! it even if the grid is replaced mid-run.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::grid::Grid;

#[derive(Debug)]
pub struct SharedGrid {
    current: RwLock<Arc<Grid>>,
}

impl SharedGrid {
    pub fn new(grid: Grid) -> Self {
        Self {
            current: RwLock::new(Arc::new(grid)),
        }
    }

    /// The grid to use for a fit that starts now.
    pub fn snapshot(&self) -> Arc<Grid> {
        Arc::clone(&self.current.read())
    }

    /// Publish a newly loaded grid; returns the one it replaced.
    pub fn replace(&self, grid: Grid) -> Arc<Grid> {
        let next = Arc::new(grid);
        let prev = std::mem::replace(&mut *self.current.write(), next);
        info!(nodes = self.current.read().node_count(), "grid replaced");
        prev
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ParamAxis;
    use crate::grid::store::tests::toy_grid;

    #[test]
    fn snapshots_survive_replacement() {
        let shared = SharedGrid::new(toy_grid());
        let before = shared.snapshot();
        let fixed = toy_grid().fix(ParamAxis::CO, 1.0).unwrap();
        let prev = shared.replace(fixed);

        assert_eq!(before.node_count(), 72);
        assert!(Arc::ptr_eq(&before, &prev));
        assert_eq!(shared.snapshot().node_count(), 36);
    }
}
