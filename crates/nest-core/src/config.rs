//! Engine configuration.
//!
//! Every field has a documented default so a partial JSON document (or none
//! at all) yields a usable config.

use crate::error::CoreError;
use crate::model::Size;
use serde::{Deserialize, Serialize};

// ─── Config ───────────────────────────────────────────────────────────────

/// Tunables shared by the editor engine, the hierarchy and the painter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum retained history entries; whole oldest groups are dropped
    /// beyond this. Default: **200**.
    pub history_limit: usize,

    /// Quiet time after the last keystroke before text is parsed back into
    /// the visual model. Default: **300** ms.
    pub debounce_ms: u64,

    /// X-ray opacity per relative nesting depth. Default: **[1.0, 0.6, 0.35, 0.2]**.
    pub opacity_table: Vec<f32>,

    /// Lower bound for depths beyond the table. Default: **0.01**.
    pub opacity_floor: f32,

    /// Background grid spacing in world units; `0` disables the grid. Default: **20**.
    pub grid_size: f32,

    /// Default: **0.1**.
    pub min_zoom: f32,

    /// Default: **8.0**.
    pub max_zoom: f32,

    /// Size of nodes created without a size override. Default: **120 × 60**.
    pub default_node_size: Size,

    /// Spacing used by the reference grid layout. Default: **40**.
    pub layout_gap: f32,

    /// Pointer travel (screen px) before a press turns into a drag. Default: **3**.
    pub drag_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: 200,
            debounce_ms: 300,
            opacity_table: vec![1.0, 0.6, 0.35, 0.2],
            opacity_floor: 0.01,
            grid_size: 20.0,
            min_zoom: 0.1,
            max_zoom: 8.0,
            default_node_size: Size::new(120.0, 60.0),
            layout_gap: 40.0,
            drag_threshold: 3.0,
        }
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON config and validate it.
    ///
    /// # Errors
    /// Returns `CoreError::Json` on malformed JSON and `CoreError::Config`
    /// when a value is out of range.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.history_limit == 0 {
            return Err(CoreError::Config("history_limit must be at least 1".into()));
        }
        if !(self.min_zoom > 0.0 && self.min_zoom <= self.max_zoom) {
            return Err(CoreError::Config(format!(
                "zoom range [{}, {}] is empty or non-positive",
                self.min_zoom, self.max_zoom
            )));
        }
        if !(self.opacity_floor > 0.0 && self.opacity_floor <= 1.0) {
            return Err(CoreError::Config("opacity_floor must be in (0, 1]".into()));
        }
        if self.opacity_table.iter().any(|v| !(*v > 0.0 && *v <= 1.0))
            || self.opacity_table.windows(2).any(|w| w[1] >= w[0])
        {
            return Err(CoreError::Config(
                "opacity_table must be strictly decreasing within (0, 1]".into(),
            ));
        }
        if let Some(last) = self.opacity_table.last() {
            let next = 0.5f32.powi(self.opacity_table.len() as i32);
            if next >= *last || self.opacity_floor >= *last {
                return Err(CoreError::Config(format!(
                    "opacity_table must end above both 0.5^{} and opacity_floor",
                    self.opacity_table.len()
                )));
            }
        }
        Ok(())
    }

    pub fn debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.debounce_ms)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
