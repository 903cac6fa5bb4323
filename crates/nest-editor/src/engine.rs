//! The editor engine: one object wiring bus, store, history, hierarchy,
//! sync and interaction together.
//!
//! Every public command validates its references and applies one store
//! update. Content and hierarchy commands record one history step each;
//! selection, tool and view changes are not recorded. Failures are returned
//! to the caller and also published on the `error` topic.
//!
//! Bus notifications are derived from store commits, never emitted by the
//! commands themselves, so undo, redo, text sync and load produce exactly
//! the same events as the edits they replay.

use crate::bus::{EventBus, Payload, Subscription, topics};
use crate::error::{EngineError, EngineResult, HistoryError};
use crate::hierarchy::Hierarchy;
use crate::history::History;
use crate::input::InputEvent;
use crate::shortcuts::ShortcutAction;
use crate::store::{StatePath, Store, UiPatch};
use crate::sync::SyncEngine;
use crate::tools::{Intent, Interaction, Mode};
use nest_core::tree;
use nest_core::{
    Canvas, CanvasId, Change, Connection, ConnectionId, DiagramSyntax, EngineConfig, GridLayout, Layout,
    LineSyntax, Node, NodeId, NodeRef, Point, ShapeKind, Size, Snapshot, Style, Tool, diff, persist,
};
use nest_render::viewport::to_kurbo;
use nest_render::{DisplayList, Overlay, Surface, Viewport, paint};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

/// Zoom step for the keyboard zoom shortcuts.
const ZOOM_STEP: f32 = 1.25;

const INPUT_TOPICS: [&str; 8] = [
    topics::POINTER_DOWN,
    topics::POINTER_MOVE,
    topics::POINTER_UP,
    topics::POINTER_LEAVE,
    topics::KEY_DOWN,
    topics::KEY_UP,
    topics::WHEEL,
    topics::WINDOW_BLUR,
];

/// What one `pump` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Input events consumed from the bus.
    pub events: usize,
    /// Pending text was applied.
    pub synced: bool,
    /// Something visible changed since the last pump.
    pub frame_due: bool,
}

pub struct Engine {
    config: EngineConfig,
    bus: EventBus,
    store: Rc<Store>,
    history: Rc<History>,
    hierarchy: Hierarchy,
    sync: Rc<SyncEngine>,
    layout: Rc<dyn Layout>,
    interaction: RefCell<Interaction>,
    queue: Rc<RefCell<VecDeque<InputEvent>>>,
    frame_due: Rc<Cell<bool>>,
    /// Last pointer position (screen), anchor for keyboard zoom.
    pointer: Cell<Point>,
    _inputs: Vec<Subscription>,
}

impl Engine {
    /// An empty document with the built-in line grammar and grid layout.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let layout = Rc::new(GridLayout::from_config(&config));
        Self::with_parts(config, Box::new(LineSyntax), layout)
    }

    /// An empty document with a custom text grammar and layout.
    ///
    /// # Errors
    /// `EngineError::Core` if `config` does not validate.
    pub fn with_parts(
        config: EngineConfig,
        syntax: Box<dyn DiagramSyntax>,
        layout: Rc<dyn Layout>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let bus = EventBus::new();
        let store = Rc::new(Store::new(Snapshot::default()));
        let history = Rc::new(History::new(store.clone(), bus.clone(), config.history_limit));
        let hierarchy = Hierarchy::new(store.clone(), history.clone(), config.clone());
        let sync = SyncEngine::install(
            store.clone(),
            history.clone(),
            bus.clone(),
            syntax,
            layout.clone(),
            config.clone(),
        );
        let frame_due = Rc::new(Cell::new(true));
        bridge_store_to_bus(&store, &bus, &sync, &frame_due);

        let queue: Rc<RefCell<VecDeque<InputEvent>>> = Rc::default();
        let inputs = INPUT_TOPICS
            .iter()
            .map(|topic| {
                let queue = queue.clone();
                bus.subscribe(topic, move |payload| {
                    if let Payload::Input(event) = payload {
                        queue.borrow_mut().push_back(event.clone());
                    }
                    Ok(())
                })
            })
            .collect();

        log::info!("engine ready (history limit {})", config.history_limit);
        Ok(Self {
            config,
            bus,
            store,
            history,
            hierarchy,
            sync,
            layout,
            interaction: RefCell::new(Interaction::new()),
            queue,
            frame_due,
            pointer: Cell::new(Point::ZERO),
            _inputs: inputs,
        })
    }

    // ─── Accessors ────────────────────────────────────────────────────────

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.get()
    }

    pub fn interaction_mode(&self) -> Mode {
        self.interaction.borrow().mode()
    }

    fn active(&self) -> CanvasId {
        self.store.get().ui.active_canvas
    }

    /// Publish a failed command on the `error` topic and hand it back.
    fn report<T>(&self, command: &str, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(err) = &result {
            log::warn!("{command} failed: {err}");
            self.bus.publish(
                topics::ERROR,
                Payload::Error {
                    topic: command.to_string(),
                    message: err.to_string(),
                },
            );
        }
        result
    }

    /// One recorded edit of a single canvas.
    fn edit_canvas<F>(&self, action: &str, canvas: CanvasId, edit: F) -> EngineResult<bool>
    where
        F: FnOnce(&mut Canvas) -> EngineResult<()>,
    {
        let result = self.history.transact(action, |s: &Snapshot| -> EngineResult<Snapshot> {
            let mut next = s.clone();
            let c = next
                .diagram
                .canvas_mut(canvas)
                .ok_or(EngineError::UnknownCanvas(canvas))?;
            edit(c)?;
            Ok(next)
        });
        self.report(action, result)
    }

    // ─── Content ──────────────────────────────────────────────────────────

    /// Add a node to `canvas`. `label` defaults to the generated id; `at`
    /// pins the position, otherwise the layout chooses one.
    pub fn add_node(
        &self,
        canvas: CanvasId,
        shape: ShapeKind,
        label: Option<&str>,
        at: Option<Point>,
    ) -> EngineResult<NodeRef> {
        let mut added = None;
        self.edit_canvas("add-node", canvas, |c| {
            if let Some(p) = at {
                check_point(p)?;
            }
            let id = fresh_node_id(c);
            let mut node = Node::new(id, shape, label.unwrap_or(id.as_str()));
            node.size = self.config.default_node_size;
            node.z = c.max_z();
            node.position = match at {
                Some(p) => {
                    c.override_mut(id).position = Some(p);
                    p
                }
                None => self.layout.place(c, node.size),
            };
            added = Some(c.insert_node(node));
            Ok(())
        })?;
        added
            .map(|node| NodeRef::new(canvas, node))
            .ok_or(EngineError::UnknownCanvas(canvas))
    }

    pub fn add_connection(
        &self,
        canvas: CanvasId,
        from: NodeId,
        to: NodeId,
        label: Option<&str>,
    ) -> EngineResult<ConnectionId> {
        let mut added = None;
        self.edit_canvas("add-connection", canvas, |c| {
            for node in [from, to] {
                if !c.contains(node) {
                    return Err(EngineError::UnknownNode { canvas, node });
                }
            }
            let id = c.next_connection_id(from, to);
            c.connections.push(Connection {
                id,
                from,
                to,
                label: label.map(str::to_string),
                style: Style::default(),
            });
            added = Some(id);
            Ok(())
        })?;
        added.ok_or(EngineError::UnknownCanvas(canvas))
    }

    /// Translate `ids` by `(dx, dy)`. All or nothing.
    pub fn move_nodes(&self, canvas: CanvasId, ids: &[NodeId], dx: f32, dy: f32) -> EngineResult<()> {
        self.edit_canvas("move", canvas, |c| {
            for &id in ids {
                let node = c.node_mut(id).ok_or(EngineError::UnknownNode { canvas, node: id })?;
                let to = node.position.offset(dx, dy);
                check_point(to)?;
                node.position = to;
                c.override_mut(id).position = Some(to);
            }
            Ok(())
        })?;
        Ok(())
    }

    pub fn move_node(&self, at: NodeRef, to: Point) -> EngineResult<()> {
        self.edit_canvas("move", at.canvas, |c| {
            check_point(to)?;
            let node = c.node_mut(at.node).ok_or(unknown(at))?;
            node.position = to;
            c.override_mut(at.node).position = Some(to);
            Ok(())
        })?;
        Ok(())
    }

    pub fn resize_node(&self, at: NodeRef, size: Size) -> EngineResult<()> {
        self.edit_canvas("resize", at.canvas, |c| {
            check_size(size)?;
            let node = c.node_mut(at.node).ok_or(unknown(at))?;
            node.size = size;
            c.override_mut(at.node).size = Some(size);
            Ok(())
        })?;
        Ok(())
    }

    pub fn set_style(&self, at: NodeRef, style: Style) -> EngineResult<()> {
        self.edit_canvas("style", at.canvas, |c| {
            if let Some(w) = style.stroke_width
                && !(w.is_finite() && w >= 0.0)
            {
                return Err(EngineError::InvalidGeometry(format!("stroke width {w}")));
            }
            let node = c.node_mut(at.node).ok_or(unknown(at))?;
            node.style = style.clone();
            c.override_mut(at.node).style = Some(style);
            Ok(())
        })?;
        Ok(())
    }

    pub fn set_label(&self, at: NodeRef, label: &str) -> EngineResult<()> {
        self.edit_canvas("label", at.canvas, |c| {
            c.node_mut(at.node).ok_or(unknown(at))?.label = label.to_string();
            Ok(())
        })?;
        Ok(())
    }

    /// Delete nodes and connections of `canvas` as one step. Connections
    /// touching a deleted node go with it, and so do the nested canvases
    /// the deleted nodes own.
    pub fn delete_entities(
        &self,
        canvas: CanvasId,
        nodes: &[NodeId],
        connections: &[ConnectionId],
    ) -> EngineResult<()> {
        let result = self.history.transact("delete", |s: &Snapshot| -> EngineResult<Snapshot> {
            let current = s.diagram.canvas(canvas).ok_or(EngineError::UnknownCanvas(canvas))?;
            for &node in nodes {
                if !current.contains(node) {
                    return Err(EngineError::UnknownNode { canvas, node });
                }
            }
            for &connection in connections {
                if current.connection(connection).is_none() {
                    return Err(EngineError::UnknownConnection { canvas, connection });
                }
            }

            let mut next = s.clone();
            let c = next
                .diagram
                .canvas_mut(canvas)
                .ok_or(EngineError::UnknownCanvas(canvas))?;
            c.connections.retain(|conn| !connections.contains(&conn.id));
            let mut nested = Vec::new();
            for &id in nodes {
                if let Some((node, pruned)) = c.remove_node(id) {
                    log::debug!("delete {id}: pruned {} connection(s)", pruned.len());
                    nested.extend(node.canvas);
                }
                c.overrides.remove(&id);
            }
            let mut removed = Vec::new();
            for id in nested {
                removed.extend(tree::remove_subtree(&mut next.diagram, id));
            }
            if removed.contains(&next.ui.active_canvas) {
                next.switch_canvas(canvas);
            }
            Ok(next)
        });
        self.report("delete", result)?;
        Ok(())
    }

    pub fn bring_to_front(&self, canvas: CanvasId, ids: &[NodeId]) -> EngineResult<()> {
        self.edit_canvas("z-order", canvas, |c| {
            let mut z = c.max_z();
            for &id in ids {
                z += 1;
                c.node_mut(id).ok_or(EngineError::UnknownNode { canvas, node: id })?.z = z;
            }
            Ok(())
        })?;
        Ok(())
    }

    pub fn send_to_back(&self, canvas: CanvasId, ids: &[NodeId]) -> EngineResult<()> {
        self.edit_canvas("z-order", canvas, |c| {
            let mut z = c.min_z();
            for &id in ids.iter().rev() {
                z -= 1;
                c.node_mut(id).ok_or(EngineError::UnknownNode { canvas, node: id })?.z = z;
            }
            Ok(())
        })?;
        Ok(())
    }

    // ─── Hierarchy ────────────────────────────────────────────────────────

    /// Give `owner` a nested canvas (or return the one it has).
    pub fn create_nested_canvas(&self, owner: NodeRef) -> EngineResult<CanvasId> {
        self.report("register-canvas", self.hierarchy.register(owner))
    }

    pub fn remove_nested_canvas(&self, id: CanvasId) -> EngineResult<Vec<CanvasId>> {
        self.report("unregister-canvas", self.hierarchy.unregister(id))
    }

    pub fn transfer_nodes(&self, ids: &[NodeId], source: CanvasId, target: CanvasId) -> EngineResult<()> {
        self.report(
            "transfer-nodes",
            self.hierarchy.transfer_nodes(ids, source, target),
        )
    }

    pub fn set_active_canvas(&self, id: CanvasId) -> EngineResult<()> {
        self.report("activate-canvas", self.hierarchy.set_active_canvas(id))
    }

    /// Open the nested canvas of `node` in the active canvas, creating it
    /// if the node has none yet.
    pub fn enter_canvas(&self, node: NodeId) -> EngineResult<CanvasId> {
        let at = NodeRef::new(self.active(), node);
        self.history.begin_group("enter-canvas");
        let result = self
            .create_nested_canvas(at)
            .and_then(|nested| self.set_active_canvas(nested).map(|()| nested));
        self.history.end_group();
        result
    }

    pub fn exit_canvas(&self) -> EngineResult<CanvasId> {
        self.report("exit-canvas", self.hierarchy.exit())
    }

    pub fn set_xray_level(&self, level: u32) -> EngineResult<()> {
        self.report("xray", self.hierarchy.set_xray_level(level))
    }

    // ─── History ──────────────────────────────────────────────────────────

    /// Undo one step. Pending text is applied first so it becomes a step
    /// of its own. `Ok(false)` when there is nothing to undo.
    pub fn undo(&self) -> EngineResult<bool> {
        self.report("undo", self.sync.flush_now())?;
        match self.history.undo() {
            Ok(()) => Ok(true),
            Err(HistoryError::Underflow) => Ok(false),
            Err(err) => self.report("undo", Err(err.into())),
        }
    }

    /// `Ok(false)` when there is nothing to redo.
    pub fn redo(&self) -> EngineResult<bool> {
        self.report("redo", self.sync.flush_now())?;
        match self.history.redo() {
            Ok(()) => Ok(true),
            Err(HistoryError::Overflow) => Ok(false),
            Err(err) => self.report("redo", Err(err.into())),
        }
    }

    // ─── Selection & view ─────────────────────────────────────────────────
    //
    // UI-only state: committed to the store, never recorded.

    /// Select `ids` of the active canvas; unknown ids are ignored.
    pub fn select(&self, ids: &[NodeId]) -> EngineResult<()> {
        let s = self.store.get();
        let selection = match s.active_canvas() {
            Some(c) => ids.iter().copied().filter(|id| c.contains(*id)).collect(),
            None => Vec::new(),
        };
        self.patch_ui(UiPatch {
            selection: Some(selection),
            ..UiPatch::default()
        })
    }

    pub fn toggle_select(&self, id: NodeId) -> EngineResult<()> {
        let mut selection = self.store.get().ui.selection.clone();
        match selection.iter().position(|s| *s == id) {
            Some(i) => {
                selection.remove(i);
            }
            None => selection.push(id),
        }
        self.select(&selection)
    }

    pub fn select_all(&self) -> EngineResult<()> {
        let s = self.store.get();
        let all: Vec<NodeId> = s
            .active_canvas()
            .map(|c| c.nodes_in_order().iter().map(|n| n.id).collect())
            .unwrap_or_default();
        self.select(&all)
    }

    pub fn clear_selection(&self) -> EngineResult<()> {
        self.select(&[])
    }

    pub fn set_tool(&self, tool: Tool) -> EngineResult<()> {
        self.patch_ui(UiPatch {
            tool: Some(tool),
            ..UiPatch::default()
        })
    }

    /// Zoom by `factor` keeping the world point under `anchor` (screen) fixed.
    pub fn zoom_at(&self, anchor: Point, factor: f32) -> EngineResult<()> {
        let s = self.store.get();
        let viewport = Viewport::from_ui(&s.ui).zoom_at(
            to_kurbo(anchor),
            factor as f64,
            self.config.min_zoom as f64,
            self.config.max_zoom as f64,
        );
        self.set_viewport(viewport)
    }

    /// Pan by a screen-space delta.
    pub fn pan_by(&self, dx: f32, dy: f32) -> EngineResult<()> {
        let s = self.store.get();
        let viewport = Viewport::from_ui(&s.ui).panned(kurbo::Vec2::new(dx as f64, dy as f64));
        self.set_viewport(viewport)
    }

    pub fn reset_view(&self) -> EngineResult<()> {
        self.set_viewport(Viewport::default())
    }

    fn set_viewport(&self, viewport: Viewport) -> EngineResult<()> {
        self.patch_ui(UiPatch {
            zoom: Some(viewport.zoom as f32),
            pan: Some(Point::new(viewport.pan.x as f32, viewport.pan.y as f32)),
            ..UiPatch::default()
        })
    }

    fn patch_ui(&self, patch: UiPatch) -> EngineResult<()> {
        self.report("ui", self.store.patch(patch).map_err(EngineError::from))?;
        Ok(())
    }

    // ─── Text ─────────────────────────────────────────────────────────────

    /// Current text of the document.
    pub fn text(&self) -> String {
        self.store.get().diagram.source.to_string()
    }

    /// Replace the document text immediately, as one `text-edit` step.
    /// `Ok(false)` if nothing changed or the text did not parse; parse
    /// failures are published on `sync:diagnostic`.
    pub fn set_text(&self, text: &str) -> EngineResult<bool> {
        self.report("text-edit", self.sync.apply_text(text))
    }

    /// Typed text; applied by `pump` once input has been quiet long enough.
    pub fn text_input(&self, text: &str, now: Instant) {
        self.sync.text_input(text, now);
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    // ─── Runtime ──────────────────────────────────────────────────────────

    /// Publish `event` on its input topic; `pump` consumes it.
    pub fn post_input(&self, event: InputEvent) {
        self.bus.publish(event.topic(), Payload::Input(event));
    }

    /// Drain queued input, then apply pending text whose quiet period has
    /// elapsed.
    pub fn pump(&self, now: Instant) -> PumpReport {
        let mut report = PumpReport::default();
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            report.events += 1;
            if let Err(err) = self.handle_input(&event) {
                log::debug!("input {:?} dropped: {err}", event.topic());
            }
        }
        report.synced = matches!(self.report("text-edit", self.sync.flush(now)), Ok(true));
        report.frame_due = self.frame_due.replace(false);
        report
    }

    /// Run one input event through the interaction machine and apply the
    /// resulting intents.
    pub fn handle_input(&self, event: &InputEvent) -> EngineResult<()> {
        if let Some(p) = event.position() {
            self.pointer.set(p);
        }
        let snapshot = self.store.get();
        let (intents, before, after) = {
            let mut interaction = self.interaction.borrow_mut();
            let before = interaction.overlay();
            let intents = interaction.handle(event, &snapshot, &self.config);
            (intents, before, interaction.overlay())
        };
        if before != after {
            self.frame_due.set(true);
        }
        for intent in intents {
            self.apply_intent(intent)?;
        }
        Ok(())
    }

    fn apply_intent(&self, intent: Intent) -> EngineResult<()> {
        let canvas = self.active();
        match intent {
            Intent::Select(ids) => self.select(&ids),
            Intent::ToggleSelect(id) => self.toggle_select(id),
            Intent::ClearSelection => self.clear_selection(),
            Intent::BeginGesture(name) => {
                self.history.begin_group(name);
                Ok(())
            }
            Intent::EndGesture => {
                self.history.end_group();
                Ok(())
            }
            Intent::MoveNodes { ids, dx, dy } => self.move_nodes(canvas, &ids, dx, dy),
            Intent::ResizeNode { id, size } => self.resize_node(NodeRef::new(canvas, id), size),
            Intent::Connect { from, to } => self.add_connection(canvas, from, to, None).map(|_| ()),
            Intent::AddNode { shape, at } => {
                let added = self.add_node(canvas, shape, None, Some(at))?;
                self.select(&[added.node])
            }
            Intent::PanBy { dx, dy } => self.pan_by(dx, dy),
            Intent::ZoomAt { anchor, factor } => self.zoom_at(anchor, factor),
            Intent::Shortcut(action) => self.run_shortcut(action),
        }
    }

    pub fn run_shortcut(&self, action: ShortcutAction) -> EngineResult<()> {
        let s = self.store.get();
        let canvas = s.ui.active_canvas;
        let selection = s.ui.selection.clone();
        match action {
            ShortcutAction::ToolSelect => self.set_tool(Tool::Select),
            ShortcutAction::ToolConnect => self.set_tool(Tool::Connect),
            ShortcutAction::ToolPan => self.set_tool(Tool::Pan),
            ShortcutAction::ToolDraw(shape) => self.set_tool(Tool::Draw(shape)),
            ShortcutAction::Undo => self.undo().map(|_| ()),
            ShortcutAction::Redo => self.redo().map(|_| ()),
            ShortcutAction::Delete if !selection.is_empty() => self.delete_entities(canvas, &selection, &[]),
            ShortcutAction::Delete => Ok(()),
            ShortcutAction::SelectAll => self.select_all(),
            ShortcutAction::EnterCanvas => match selection.as_slice() {
                [node] => self.enter_canvas(*node).map(|_| ()),
                _ => Ok(()),
            },
            ShortcutAction::ExitCanvas => self.exit_canvas().map(|_| ()),
            ShortcutAction::ToggleXray => self.set_xray_level(if s.ui.xray_level == 0 { 1 } else { 0 }),
            ShortcutAction::XrayDeeper => self.set_xray_level(s.ui.xray_level + 1),
            ShortcutAction::XrayShallower => self.set_xray_level(s.ui.xray_level.saturating_sub(1)),
            ShortcutAction::ZoomIn => self.zoom_at(self.pointer.get(), ZOOM_STEP),
            ShortcutAction::ZoomOut => self.zoom_at(self.pointer.get(), 1.0 / ZOOM_STEP),
            ShortcutAction::ZoomReset => self.reset_view(),
            ShortcutAction::BringToFront => self.bring_to_front(canvas, &selection),
            ShortcutAction::SendToBack => self.send_to_back(canvas, &selection),
            ShortcutAction::Deselect => self.clear_selection(),
        }
    }

    /// Paint the current state, including gesture feedback.
    pub fn render(&self, surface: &Surface) -> DisplayList {
        let overlay = self.interaction.borrow().overlay();
        paint(&self.store.get(), surface, &overlay, &self.config)
    }

    pub fn overlay(&self) -> Overlay {
        self.interaction.borrow().overlay()
    }

    // ─── Persistence ──────────────────────────────────────────────────────

    /// Write the document (pending text applied first). JSON or MessagePack
    /// by extension.
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        self.report("text-edit", self.sync.flush_now())?;
        let result = persist::save(&self.store.get(), path).map_err(EngineError::from);
        self.report("save", result)
    }

    /// Replace the document with the one at `path`. History starts over.
    pub fn load(&self, path: &Path) -> EngineResult<()> {
        let result = persist::load(path)
            .map_err(EngineError::from)
            .and_then(|snapshot| {
                self.sync.cancel();
                *self.interaction.borrow_mut() = Interaction::new();
                self.store.replace(snapshot).map_err(EngineError::from)
            });
        self.report("load", result)?;
        self.history.reset();
        log::info!("loaded {}", path.display());
        Ok(())
    }
}

/// Store commits → bus events.
fn bridge_store_to_bus(store: &Store, bus: &EventBus, sync: &Rc<SyncEngine>, frame_due: &Rc<Cell<bool>>) {
    let b = bus.clone();
    store.subscribe(StatePath::Canvases, move |next, prev| {
        for change in diff(&prev.diagram, &next.diagram) {
            let (topic, payload) = change_event(change);
            b.publish(topic, payload);
        }
    });

    let b = bus.clone();
    let weak = Rc::downgrade(sync);
    store.subscribe(StatePath::Source, move |next, _| {
        if weak.upgrade().is_some_and(|sync| !sync.is_locked()) {
            b.publish(topics::SYNC_TEXT, Payload::Text(next.diagram.source.to_string()));
        }
    });

    let b = bus.clone();
    store.subscribe(StatePath::ActiveCanvas, move |next, _| {
        b.publish(topics::CANVAS_ACTIVATED, Payload::Canvas(next.ui.active_canvas));
    });

    let b = bus.clone();
    store.subscribe(StatePath::XrayLevel, move |next, _| {
        let level = next.ui.xray_level;
        let topic = if level > 0 {
            topics::XRAY_ACTIVATED
        } else {
            topics::XRAY_DEACTIVATED
        };
        b.publish(topic, Payload::Xray { level });
    });

    let due = frame_due.clone();
    store.subscribe(StatePath::All, move |_, _| due.set(true));
}

fn change_event(change: Change) -> (&'static str, Payload) {
    match change {
        Change::NodeAdded(at) => (topics::NODE_ADDED, Payload::Node(at)),
        Change::NodeRemoved(at) => (topics::NODE_REMOVED, Payload::Node(at)),
        Change::NodeUpdated(at) => (topics::NODE_UPDATED, Payload::Node(at)),
        Change::ConnectionAdded(canvas, id) => (topics::CONNECTION_ADDED, Payload::Connection { canvas, id }),
        Change::ConnectionRemoved(canvas, id) => (topics::CONNECTION_REMOVED, Payload::Connection { canvas, id }),
        Change::ConnectionUpdated(canvas, id) => (topics::CONNECTION_UPDATED, Payload::Connection { canvas, id }),
        Change::CanvasRegistered(id) => (topics::CANVAS_REGISTERED, Payload::Canvas(id)),
        Change::CanvasUnregistered(id) => (topics::CANVAS_UNREGISTERED, Payload::Canvas(id)),
    }
}

/// First `n{k}` not used in `canvas`.
fn fresh_node_id(canvas: &Canvas) -> NodeId {
    let mut k = canvas.nodes.len() + 1;
    loop {
        let id = NodeId::intern(&format!("n{k}"));
        if !canvas.contains(id) {
            return id;
        }
        k += 1;
    }
}

fn check_point(p: Point) -> EngineResult<()> {
    if p.x.is_finite() && p.y.is_finite() {
        Ok(())
    } else {
        Err(EngineError::InvalidGeometry(format!("position ({}, {})", p.x, p.y)))
    }
}

/// Sizes must be finite and strictly positive to survive the text form.
fn check_size(size: Size) -> EngineResult<()> {
    let ok = |v: f32| v.is_finite() && v > 0.0;
    if ok(size.width) && ok(size.height) {
        Ok(())
    } else {
        Err(EngineError::InvalidGeometry(format!(
            "size {} x {}",
            size.width, size.height
        )))
    }
}

fn unknown(at: NodeRef) -> EngineError {
    EngineError::UnknownNode {
        canvas: at.canvas,
        node: at.node,
    }
}
