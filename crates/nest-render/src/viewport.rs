//! Surface sizing and the world ↔ screen transform.
//!
//! Three coordinate spaces are in play:
//! - **world**: canvas-local coordinates of the active canvas (`f32`, nest-core)
//! - **screen**: CSS pixels, what pointer events report
//! - **device**: backing-store pixels, `screen * device_pixel_ratio`

use kurbo::{Affine, Vec2};
use nest_core::{Point, UiState};

/// Drawing surface with its CSS size and device pixel ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Surface {
    pub css_width: f64,
    pub css_height: f64,
    pub device_pixel_ratio: f64,
}

impl Surface {
    /// Non-positive or non-finite ratios fall back to 1.
    pub fn new(css_width: f64, css_height: f64, device_pixel_ratio: f64) -> Self {
        let dpr = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
            device_pixel_ratio
        } else {
            1.0
        };
        Self {
            css_width: css_width.max(0.0),
            css_height: css_height.max(0.0),
            device_pixel_ratio: dpr,
        }
    }

    /// Backing-store size in device pixels: `round(css * dpr)`.
    pub fn backing_size(&self) -> (u32, u32) {
        (
            (self.css_width * self.device_pixel_ratio).round() as u32,
            (self.css_height * self.device_pixel_ratio).round() as u32,
        )
    }

    pub fn resize(&mut self, css_width: f64, css_height: f64) {
        *self = Self::new(css_width, css_height, self.device_pixel_ratio);
    }

    pub fn set_device_pixel_ratio(&mut self, dpr: f64) {
        *self = Self::new(self.css_width, self.css_height, dpr);
    }

    /// Screen → device scale.
    pub fn device_transform(&self) -> Affine {
        Affine::scale(self.device_pixel_ratio)
    }
}

/// Round to the nearest device pixel and add half a pixel, so a 1px line
/// drawn at the result covers exactly one device pixel row/column.
pub fn snap_to_device_pixel(v: f64, dpr: f64) -> f64 {
    ((v * dpr).round() + 0.5) / dpr
}

/// Pan/zoom of the active canvas: `screen = pan + world * zoom`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub zoom: f64,
    pub pan: Vec2,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: Vec2::ZERO,
        }
    }
}

impl Viewport {
    pub fn from_ui(ui: &UiState) -> Self {
        Self {
            zoom: ui.zoom as f64,
            pan: Vec2::new(ui.pan.x as f64, ui.pan.y as f64),
        }
    }

    /// World → screen.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.pan) * Affine::scale(self.zoom)
    }

    pub fn to_screen(&self, world: Point) -> kurbo::Point {
        self.transform() * to_kurbo(world)
    }

    pub fn to_world(&self, screen: kurbo::Point) -> Point {
        from_kurbo(self.transform().inverse() * screen)
    }

    /// Zoom by `factor` keeping the world point under `anchor` (screen
    /// coordinates) fixed. The resulting zoom is clamped to `[min, max]`.
    #[must_use]
    pub fn zoom_at(&self, anchor: kurbo::Point, factor: f64, min: f64, max: f64) -> Viewport {
        let zoom = (self.zoom * factor).clamp(min, max);
        let world = self.transform().inverse() * anchor;
        let pan = anchor.to_vec2() - world.to_vec2() * zoom;
        Viewport { zoom, pan }
    }

    #[must_use]
    pub fn panned(&self, delta: Vec2) -> Viewport {
        Viewport {
            pan: self.pan + delta,
            ..*self
        }
    }
}

pub fn to_kurbo(p: Point) -> kurbo::Point {
    kurbo::Point::new(p.x as f64, p.y as f64)
}

pub fn from_kurbo(p: kurbo::Point) -> Point {
    Point::new(p.x as f32, p.y as f32)
}
