//! Keyboard shortcut mapping.
//!
//! Maps key + modifier combos to semantic `ShortcutAction`s. `key` is the
//! `KeyboardEvent.key` value; `ctrl` and `meta` both count as the command
//! modifier so the same table serves macOS and other platforms.

use nest_core::ShapeKind;

/// Actions that keyboard shortcuts can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutAction {
    // ── Tool switching ──
    ToolSelect,
    ToolConnect,
    ToolPan,
    ToolDraw(ShapeKind),

    // ── Edit ──
    Undo,
    Redo,
    Delete,
    SelectAll,

    // ── Hierarchy ──
    /// Open the nested canvas of the single selected node.
    EnterCanvas,
    ExitCanvas,
    /// Off ↔ one level.
    ToggleXray,
    XrayDeeper,
    XrayShallower,

    // ── View ──
    ZoomIn,
    ZoomOut,
    ZoomReset,

    // ── Z-order ──
    BringToFront,
    SendToBack,

    // ── UI ──
    Deselect,
}

pub struct ShortcutMap;

impl ShortcutMap {
    /// Resolve a key event to an action, `None` if the combo is unbound.
    pub fn resolve(key: &str, ctrl: bool, shift: bool, _alt: bool, meta: bool) -> Option<ShortcutAction> {
        let cmd = ctrl || meta;

        // ── Modifier combos first (most specific) ──
        if cmd && shift {
            return match key {
                "z" | "Z" => Some(ShortcutAction::Redo),
                "]" | "}" => Some(ShortcutAction::BringToFront),
                "[" | "{" => Some(ShortcutAction::SendToBack),
                _ => None,
            };
        }

        if cmd {
            return match key {
                "z" | "Z" => Some(ShortcutAction::Undo),
                "y" | "Y" => Some(ShortcutAction::Redo),
                "a" | "A" => Some(ShortcutAction::SelectAll),
                "=" | "+" => Some(ShortcutAction::ZoomIn),
                "-" => Some(ShortcutAction::ZoomOut),
                "0" => Some(ShortcutAction::ZoomReset),
                _ => None,
            };
        }

        if shift {
            return match key {
                "Enter" => Some(ShortcutAction::ExitCanvas),
                _ => None,
            };
        }

        // ── Single keys (no modifiers) ──
        match key {
            "v" | "V" => Some(ShortcutAction::ToolSelect),
            "c" | "C" => Some(ShortcutAction::ToolConnect),
            "h" | "H" => Some(ShortcutAction::ToolPan),
            "r" | "R" => Some(ShortcutAction::ToolDraw(ShapeKind::Rect)),
            "o" | "O" => Some(ShortcutAction::ToolDraw(ShapeKind::Circle)),
            "d" | "D" => Some(ShortcutAction::ToolDraw(ShapeKind::Diamond)),
            "x" | "X" => Some(ShortcutAction::ToggleXray),
            "." => Some(ShortcutAction::XrayDeeper),
            "," => Some(ShortcutAction::XrayShallower),
            "Enter" => Some(ShortcutAction::EnterCanvas),
            "Delete" | "Backspace" => Some(ShortcutAction::Delete),
            "Escape" => Some(ShortcutAction::Deselect),
            _ => None,
        }
    }
}
