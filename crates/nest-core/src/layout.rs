//! Layout contract for placing nodes the text gives no position for.
//!
//! The engine never runs a full layout pass: positions come from overrides
//! or from the canvas as the user arranged it. Only nodes that first appear
//! through text need a placement, and a `Layout` supplies it.

use crate::config::EngineConfig;
use crate::model::{Bounds, Canvas, Point, Size};

/// Chooses a canvas-local position for a node about to be added.
pub trait Layout {
    /// `canvas` holds the nodes already placed; must be deterministic.
    fn place(&self, canvas: &Canvas, size: Size) -> Point;
}

/// Reference layout: row-major grid, first cell not overlapping any
/// existing node wins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    pub cell: Size,
    pub gap: f32,
    pub columns: usize,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl GridLayout {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            cell: config.default_node_size,
            gap: config.layout_gap,
            columns: 4,
        }
    }

    fn cell_origin(&self, index: usize) -> Point {
        let columns = self.columns.max(1);
        let (col, row) = (index % columns, index / columns);
        Point::new(
            self.gap + col as f32 * (self.cell.width + self.gap),
            self.gap + row as f32 * (self.cell.height + self.gap),
        )
    }
}

impl Layout for GridLayout {
    fn place(&self, canvas: &Canvas, size: Size) -> Point {
        let occupied: Vec<Bounds> = canvas.nodes.values().map(|n| n.bounds()).collect();
        // A cell-sized node overlaps at most four cells.
        let limit = occupied.len() * 4;
        (0..=limit)
            .map(|i| self.cell_origin(i))
            .find(|origin| {
                let candidate = Bounds::new(*origin, size);
                !occupied.iter().any(|b| b.intersects(&candidate))
            })
            .unwrap_or_else(|| self.cell_origin(limit + 1))
    }
}
