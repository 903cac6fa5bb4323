//! Input abstraction layer.
//!
//! Normalizes pointer, keyboard and wheel events from the host into one
//! `InputEvent` enum. Positions are in CSS pixels relative to the canvas
//! element (screen space); the interaction machine converts them to world
//! coordinates with the current viewport.

use crate::bus::topics;
use nest_core::Point;

/// Modifier keys held during an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        shift: false,
        ctrl: false,
        alt: false,
        meta: false,
    };

    pub const SHIFT: Modifiers = Modifiers {
        shift: true,
        ..Modifiers::NONE
    };

    /// ⌘ on macOS, Ctrl elsewhere.
    pub fn command(&self) -> bool {
        self.ctrl || self.meta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerButton {
    #[default]
    Primary,
    Middle,
    Secondary,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    PointerDown {
        position: Point,
        button: PointerButton,
        modifiers: Modifiers,
    },
    PointerMove {
        position: Point,
        modifiers: Modifiers,
    },
    PointerUp {
        position: Point,
        modifiers: Modifiers,
    },
    PointerLeave,
    /// `key` is the `KeyboardEvent.key` value (e.g. `"z"`, `"Escape"`).
    KeyDown {
        key: String,
        modifiers: Modifiers,
    },
    KeyUp {
        key: String,
        modifiers: Modifiers,
    },
    /// Positive `delta_y` scrolls down (zooms out).
    Wheel {
        position: Point,
        delta_y: f32,
        modifiers: Modifiers,
    },
    /// The window lost focus.
    Blur,
}

impl InputEvent {
    pub fn pointer_down(x: f32, y: f32) -> Self {
        Self::PointerDown {
            position: Point::new(x, y),
            button: PointerButton::Primary,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn pointer_move(x: f32, y: f32) -> Self {
        Self::PointerMove {
            position: Point::new(x, y),
            modifiers: Modifiers::NONE,
        }
    }

    pub fn pointer_up(x: f32, y: f32) -> Self {
        Self::PointerUp {
            position: Point::new(x, y),
            modifiers: Modifiers::NONE,
        }
    }

    pub fn key(key: &str) -> Self {
        Self::KeyDown {
            key: key.to_string(),
            modifiers: Modifiers::NONE,
        }
    }

    /// The bus topic this event is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::PointerDown { .. } => topics::POINTER_DOWN,
            Self::PointerMove { .. } => topics::POINTER_MOVE,
            Self::PointerUp { .. } => topics::POINTER_UP,
            Self::PointerLeave => topics::POINTER_LEAVE,
            Self::KeyDown { .. } => topics::KEY_DOWN,
            Self::KeyUp { .. } => topics::KEY_UP,
            Self::Wheel { .. } => topics::WHEEL,
            Self::Blur => topics::WINDOW_BLUR,
        }
    }

    /// Screen position, if this is a positioned event.
    pub fn position(&self) -> Option<Point> {
        match self {
            Self::PointerDown { position, .. }
            | Self::PointerMove { position, .. }
            | Self::PointerUp { position, .. }
            | Self::Wheel { position, .. } => Some(*position),
            _ => None,
        }
    }
}
