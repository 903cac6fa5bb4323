//! Pointer/keyboard interaction state machine.
//!
//! Translates `InputEvent`s into `Intent`s against the current snapshot. The
//! machine never touches the store itself; the engine applies the intents,
//! which keeps every transition testable without one.
//!
//! ## Exits
//!
//! | State        | pointer-leave / Escape / blur            |
//! |--------------|------------------------------------------|
//! | Dragging     | commit what was moved (`EndGesture`)     |
//! | Resizing     | commit the current size (`EndGesture`)   |
//! | Connecting   | discard                                  |
//! | BoxSelecting | discard                                  |
//! | Panning      | stop                                     |

use crate::input::{InputEvent, Modifiers, PointerButton};
use crate::shortcuts::{ShortcutAction, ShortcutMap};
use nest_core::{Bounds, Canvas, EngineConfig, NodeId, Point, ShapeKind, Size, Snapshot, Tool};
use nest_render::viewport::to_kurbo;
use nest_render::{Overlay, Viewport, node_at, nodes_in_rect, resize_handle_at};
use smallvec::SmallVec;

/// Smallest size a resize gesture can produce.
const MIN_NODE_SIZE: f32 = 10.0;

/// Wheel delta (pixels) that zooms by a factor of e.
const WHEEL_ZOOM_SCALE: f32 = 200.0;

/// What the engine should do in response to an input event.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Replace the selection.
    Select(SmallVec<[NodeId; 4]>),
    ToggleSelect(NodeId),
    ClearSelection,
    /// Open a history group spanning the gesture.
    BeginGesture(&'static str),
    EndGesture,
    MoveNodes {
        ids: SmallVec<[NodeId; 4]>,
        dx: f32,
        dy: f32,
    },
    ResizeNode {
        id: NodeId,
        size: Size,
    },
    Connect {
        from: NodeId,
        to: NodeId,
    },
    AddNode {
        shape: ShapeKind,
        at: Point,
    },
    /// Screen-space pan delta.
    PanBy {
        dx: f32,
        dy: f32,
    },
    /// Zoom about a screen-space anchor.
    ZoomAt {
        anchor: Point,
        factor: f32,
    },
    Shortcut(ShortcutAction),
}

/// Current interaction. World coordinates are in the active canvas's frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum InteractionState {
    #[default]
    Idle,
    Dragging {
        /// Screen position of the press, for the drag threshold.
        press: Point,
        last: Point,
        started: bool,
    },
    Resizing {
        id: NodeId,
        start: Point,
        origin_size: Size,
    },
    Connecting {
        from: NodeId,
        to: Point,
    },
    BoxSelecting {
        from: Point,
        to: Point,
        additive: bool,
    },
    Panning {
        /// Screen position.
        last: Point,
    },
}

/// State tag without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Dragging,
    Resizing,
    Connecting,
    BoxSelecting,
    Panning,
}

#[derive(Debug, Default)]
pub struct Interaction {
    state: InteractionState,
}

impl Interaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    pub fn mode(&self) -> Mode {
        match self.state {
            InteractionState::Idle => Mode::Idle,
            InteractionState::Dragging { .. } => Mode::Dragging,
            InteractionState::Resizing { .. } => Mode::Resizing,
            InteractionState::Connecting { .. } => Mode::Connecting,
            InteractionState::BoxSelecting { .. } => Mode::BoxSelecting,
            InteractionState::Panning { .. } => Mode::Panning,
        }
    }

    /// Transient feedback for the painter.
    pub fn overlay(&self) -> Overlay {
        match &self.state {
            InteractionState::BoxSelecting { from, to, .. } => Overlay::Marquee {
                from: *from,
                to: *to,
            },
            InteractionState::Connecting { from, to } => Overlay::ConnectionPreview {
                from: *from,
                to: *to,
            },
            _ => Overlay::None,
        }
    }

    /// Feed one event. `snapshot` must be the state the previous intents
    /// produced.
    pub fn handle(&mut self, event: &InputEvent, snapshot: &Snapshot, config: &EngineConfig) -> Vec<Intent> {
        let viewport = Viewport::from_ui(&snapshot.ui);
        let world = |p: Point| viewport.to_world(to_kurbo(p));
        let canvas = snapshot.active_canvas();

        match event {
            InputEvent::PointerDown {
                position,
                button,
                modifiers,
            } => self.pointer_down(*position, world(*position), *button, *modifiers, snapshot, canvas),
            InputEvent::PointerMove { position, .. } => {
                self.pointer_move(*position, world(*position), snapshot, config)
            }
            InputEvent::PointerUp { position, .. } => self.pointer_up(world(*position), snapshot, canvas),
            InputEvent::PointerLeave | InputEvent::Blur => self.abort(),
            InputEvent::KeyDown { key, modifiers } => {
                if key == "Escape" && self.state != InteractionState::Idle {
                    return self.abort();
                }
                if self.state != InteractionState::Idle {
                    return Vec::new();
                }
                ShortcutMap::resolve(key, modifiers.ctrl, modifiers.shift, modifiers.alt, modifiers.meta)
                    .map(Intent::Shortcut)
                    .into_iter()
                    .collect()
            }
            InputEvent::KeyUp { .. } => Vec::new(),
            InputEvent::Wheel {
                position,
                delta_y,
                modifiers,
            } => wheel(*position, *delta_y, *modifiers),
        }
    }

    fn pointer_down(
        &mut self,
        screen: Point,
        world: Point,
        button: PointerButton,
        modifiers: Modifiers,
        snapshot: &Snapshot,
        canvas: Option<&Canvas>,
    ) -> Vec<Intent> {
        let ui = &snapshot.ui;
        if button == PointerButton::Middle || ui.tool == Tool::Pan {
            self.state = InteractionState::Panning { last: screen };
            return Vec::new();
        }
        if button != PointerButton::Primary {
            return Vec::new();
        }

        match ui.tool {
            Tool::Select => {
                if let Some(c) = canvas
                    && let Some(id) = resize_handle_at(c, &ui.selection, world, ui.zoom)
                    && let Some(node) = c.node(id)
                {
                    self.state = InteractionState::Resizing {
                        id,
                        start: world,
                        origin_size: node.size,
                    };
                    return vec![Intent::BeginGesture("resize")];
                }

                match canvas.and_then(|c| node_at(c, world)) {
                    Some(id) => {
                        self.state = InteractionState::Dragging {
                            press: screen,
                            last: world,
                            started: false,
                        };
                        if modifiers.shift {
                            vec![Intent::ToggleSelect(id)]
                        } else if !ui.selection.contains(&id) {
                            vec![Intent::Select(SmallVec::from_elem(id, 1))]
                        } else {
                            Vec::new()
                        }
                    }
                    None => {
                        self.state = InteractionState::BoxSelecting {
                            from: world,
                            to: world,
                            additive: modifiers.shift,
                        };
                        if modifiers.shift {
                            Vec::new()
                        } else {
                            vec![Intent::ClearSelection]
                        }
                    }
                }
            }
            Tool::Connect => {
                if let Some(from) = canvas.and_then(|c| node_at(c, world)) {
                    self.state = InteractionState::Connecting { from, to: world };
                }
                Vec::new()
            }
            Tool::Draw(shape) => vec![Intent::AddNode { shape, at: world }],
            Tool::Pan => Vec::new(),
        }
    }

    fn pointer_move(&mut self, screen: Point, world: Point, snapshot: &Snapshot, config: &EngineConfig) -> Vec<Intent> {
        match &mut self.state {
            InteractionState::Idle => Vec::new(),
            InteractionState::Dragging {
                press,
                last,
                started,
            } => {
                let mut out = Vec::new();
                if !*started {
                    if press.distance(screen) < config.drag_threshold {
                        return out;
                    }
                    *started = true;
                    out.push(Intent::BeginGesture("move"));
                }
                let (dx, dy) = (world.x - last.x, world.y - last.y);
                *last = world;
                if !snapshot.ui.selection.is_empty() && (dx != 0.0 || dy != 0.0) {
                    out.push(Intent::MoveNodes {
                        ids: snapshot.ui.selection.iter().copied().collect(),
                        dx,
                        dy,
                    });
                }
                out
            }
            InteractionState::Resizing {
                id,
                start,
                origin_size,
            } => vec![Intent::ResizeNode {
                id: *id,
                size: Size::new(
                    (origin_size.width + world.x - start.x).max(MIN_NODE_SIZE),
                    (origin_size.height + world.y - start.y).max(MIN_NODE_SIZE),
                ),
            }],
            InteractionState::Connecting { to, .. } => {
                *to = world;
                Vec::new()
            }
            InteractionState::BoxSelecting { to, .. } => {
                *to = world;
                Vec::new()
            }
            InteractionState::Panning { last } => {
                let (dx, dy) = (screen.x - last.x, screen.y - last.y);
                *last = screen;
                vec![Intent::PanBy { dx, dy }]
            }
        }
    }

    fn pointer_up(&mut self, world: Point, snapshot: &Snapshot, canvas: Option<&Canvas>) -> Vec<Intent> {
        match std::mem::take(&mut self.state) {
            InteractionState::Dragging { started: true, .. } | InteractionState::Resizing { .. } => {
                vec![Intent::EndGesture]
            }
            InteractionState::Connecting { from, .. } => match canvas.and_then(|c| node_at(c, world)) {
                Some(to) if to != from => vec![Intent::Connect { from, to }],
                _ => Vec::new(),
            },
            InteractionState::BoxSelecting { from, additive, .. } => {
                let mut ids: SmallVec<[NodeId; 4]> = if additive {
                    snapshot.ui.selection.iter().copied().collect()
                } else {
                    SmallVec::new()
                };
                let inside = canvas.map(|c| nodes_in_rect(c, Bounds::spanning(from, world)));
                for id in inside.unwrap_or_default() {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                vec![Intent::Select(ids)]
            }
            _ => Vec::new(),
        }
    }

    /// Leave the current state through its exit path.
    pub fn abort(&mut self) -> Vec<Intent> {
        match std::mem::take(&mut self.state) {
            InteractionState::Dragging { started: true, .. } | InteractionState::Resizing { .. } => {
                log::debug!("interaction aborted; committing gesture");
                vec![Intent::EndGesture]
            }
            _ => Vec::new(),
        }
    }
}

fn wheel(position: Point, delta_y: f32, modifiers: Modifiers) -> Vec<Intent> {
    if modifiers.command() {
        vec![Intent::ZoomAt {
            anchor: position,
            factor: (-delta_y / WHEEL_ZOOM_SCALE).exp(),
        }]
    } else if modifiers.shift {
        vec![Intent::PanBy { dx: -delta_y, dy: 0.0 }]
    } else {
        vec![Intent::PanBy { dx: 0.0, dy: -delta_y }]
    }
}
