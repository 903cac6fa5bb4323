//! State store: one immutable `Snapshot`, replaced wholesale on each commit.
//!
//! `update` hands the current snapshot to a recipe, runs the result through
//! the middleware chain and commits it only if it differs by value.
//! Listeners subscribe to a `StatePath` and fire only when the value at
//! that path changed. Unchanged subtrees are shared `Arc`s, so most path
//! comparisons are a pointer check.

use crate::error::StoreError;
use nest_core::{Canvas, CanvasId, Diagram, NodeId, Point, Snapshot, Tool, UiState, tree};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::Arc;

// ─── Paths & slices ───────────────────────────────────────────────────────

/// Address of a part of the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatePath {
    All,
    Diagram,
    Source,
    Canvases,
    Canvas(CanvasId),
    Ui,
    Selection,
    Tool,
    Zoom,
    Pan,
    XrayLevel,
    ActiveCanvas,
}

impl StatePath {
    /// Parse `"*"`, `"diagram"`, `"diagram.source"`, `"canvases"`,
    /// `"canvas.3"` / `"canvas.c3"`, `"ui"` and `"ui.<field>"`.
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        let unknown = || StoreError::UnknownPath(path.to_string());
        Ok(match path {
            "*" => StatePath::All,
            "diagram" => StatePath::Diagram,
            "diagram.source" => StatePath::Source,
            "canvases" => StatePath::Canvases,
            "ui" => StatePath::Ui,
            "ui.selection" => StatePath::Selection,
            "ui.tool" => StatePath::Tool,
            "ui.zoom" => StatePath::Zoom,
            "ui.pan" => StatePath::Pan,
            "ui.xray_level" => StatePath::XrayLevel,
            "ui.active_canvas" => StatePath::ActiveCanvas,
            other => {
                let id = other.strip_prefix("canvas.").ok_or_else(unknown)?;
                let id = id.strip_prefix('c').unwrap_or(id);
                StatePath::Canvas(CanvasId(id.parse().map_err(|_| unknown())?))
            }
        })
    }
}

impl FromStr for StatePath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatePath::parse(s)
    }
}

/// The value found at a `StatePath`.
#[derive(Debug, Clone, PartialEq)]
pub enum Slice {
    All(Snapshot),
    Diagram(Diagram),
    Source(Arc<str>),
    Canvases(Arc<BTreeMap<CanvasId, Arc<Canvas>>>),
    Canvas(Option<Arc<Canvas>>),
    Ui(Arc<UiState>),
    Selection(Vec<NodeId>),
    Tool(Tool),
    Zoom(f32),
    Pan(Point),
    XrayLevel(u32),
    ActiveCanvas(CanvasId),
}

impl Slice {
    fn at(snapshot: &Snapshot, path: StatePath) -> Slice {
        let ui = &snapshot.ui;
        match path {
            StatePath::All => Slice::All(snapshot.clone()),
            StatePath::Diagram => Slice::Diagram(snapshot.diagram.clone()),
            StatePath::Source => Slice::Source(snapshot.diagram.source.clone()),
            StatePath::Canvases => Slice::Canvases(snapshot.diagram.canvases.clone()),
            StatePath::Canvas(id) => Slice::Canvas(snapshot.diagram.canvases.get(&id).cloned()),
            StatePath::Ui => Slice::Ui(ui.clone()),
            StatePath::Selection => Slice::Selection(ui.selection.clone()),
            StatePath::Tool => Slice::Tool(ui.tool),
            StatePath::Zoom => Slice::Zoom(ui.zoom),
            StatePath::Pan => Slice::Pan(ui.pan),
            StatePath::XrayLevel => Slice::XrayLevel(ui.xray_level),
            StatePath::ActiveCanvas => Slice::ActiveCanvas(ui.active_canvas),
        }
    }

    /// Value equality, short-circuiting on shared `Arc`s.
    pub fn same_as(&self, other: &Slice) -> bool {
        match (self, other) {
            (Slice::All(a), Slice::All(b)) => a.same_as(b),
            (Slice::Diagram(a), Slice::Diagram(b)) => a.same_as(b),
            (Slice::Source(a), Slice::Source(b)) => Arc::ptr_eq(a, b) || a == b,
            (Slice::Canvases(a), Slice::Canvases(b)) => Arc::ptr_eq(a, b) || a == b,
            (Slice::Canvas(Some(a)), Slice::Canvas(Some(b))) => Arc::ptr_eq(a, b) || a == b,
            (Slice::Ui(a), Slice::Ui(b)) => Arc::ptr_eq(a, b) || a == b,
            (a, b) => a == b,
        }
    }
}

/// Partial update of UI fields; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiPatch {
    pub selection: Option<Vec<NodeId>>,
    pub tool: Option<Tool>,
    pub zoom: Option<f32>,
    pub pan: Option<Point>,
    pub xray_level: Option<u32>,
    pub active_canvas: Option<CanvasId>,
}

impl UiPatch {
    fn apply(self, ui: &mut UiState) {
        if let Some(v) = self.selection {
            ui.selection = v;
        }
        if let Some(v) = self.tool {
            ui.tool = v;
        }
        if let Some(v) = self.zoom {
            ui.zoom = v;
        }
        if let Some(v) = self.pan {
            ui.pan = v;
        }
        if let Some(v) = self.xray_level {
            ui.xray_level = v;
        }
        if let Some(v) = self.active_canvas {
            ui.active_canvas = v;
        }
    }
}

// ─── Store ────────────────────────────────────────────────────────────────

/// `(prev, next) -> next'`, run before every commit.
pub type Middleware = Rc<dyn Fn(&Snapshot, Snapshot) -> Result<Snapshot, StoreError>>;

/// Called with `(next, prev)` after a commit that changed the listener's path.
pub type Listener = Rc<dyn Fn(&Snapshot, &Snapshot)>;

pub type ListenerId = u64;

#[derive(Clone)]
struct ListenerEntry {
    id: ListenerId,
    path: StatePath,
    listener: Listener,
}

pub struct Store {
    state: RefCell<Snapshot>,
    middleware: RefCell<Vec<Middleware>>,
    listeners: RefCell<Vec<ListenerEntry>>,
    next_id: Cell<ListenerId>,
}

impl Store {
    /// A store holding `initial`, with the canvas-tree middleware installed.
    pub fn new(initial: Snapshot) -> Self {
        let store = Self {
            state: RefCell::new(initial),
            middleware: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        };
        store.add_middleware(canvas_tree);
        store
    }

    /// The current snapshot. Cheap: every subtree is shared.
    pub fn get(&self) -> Snapshot {
        self.state.borrow().clone()
    }

    pub fn get_path(&self, path: StatePath) -> Slice {
        Slice::at(&self.state.borrow(), path)
    }

    /// Apply `recipe` to the current snapshot and commit the result.
    ///
    /// Returns `Ok(false)` when the result equals the current snapshot (no
    /// commit, no notifications). On any error the current snapshot stays.
    pub fn update<E, F>(&self, recipe: F) -> Result<bool, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Snapshot) -> Result<Snapshot, E>,
    {
        let prev = self.get();
        let next = recipe(&prev)?;
        let next = self.run_middleware(&prev, next)?;
        Ok(self.commit(prev, next))
    }

    /// Replace the whole snapshot (history restore, load).
    pub fn replace(&self, snapshot: Snapshot) -> Result<bool, StoreError> {
        self.update(|_| Ok::<_, StoreError>(snapshot))
    }

    pub fn patch(&self, patch: UiPatch) -> Result<bool, StoreError> {
        self.update(|s| {
            let mut next = s.clone();
            patch.apply(next.ui_mut());
            Ok::<_, StoreError>(next)
        })
    }

    /// Append to the middleware chain; it runs after everything already added.
    pub fn add_middleware<F>(&self, middleware: F)
    where
        F: Fn(&Snapshot, Snapshot) -> Result<Snapshot, StoreError> + 'static,
    {
        self.middleware.borrow_mut().push(Rc::new(middleware));
    }

    pub fn subscribe<F>(&self, path: StatePath, listener: F) -> ListenerId
    where
        F: Fn(&Snapshot, &Snapshot) + 'static,
    {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().push(ListenerEntry {
            id,
            path,
            listener: Rc::new(listener),
        });
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        before != listeners.len()
    }

    fn run_middleware(&self, prev: &Snapshot, mut next: Snapshot) -> Result<Snapshot, StoreError> {
        let chain: Vec<Middleware> = self.middleware.borrow().clone();
        for middleware in chain {
            next = middleware(prev, next)?;
        }
        debug_assert!(
            !tree::has_ownership_cycle(&next.diagram),
            "middleware produced a cyclic canvas tree"
        );
        Ok(next)
    }

    fn commit(&self, prev: Snapshot, next: Snapshot) -> bool {
        if next.same_as(&prev) {
            return false;
        }
        *self.state.borrow_mut() = next.clone();
        log::debug!(
            "commit: {} canvases, active {}",
            next.diagram.canvases.len(),
            next.ui.active_canvas
        );

        let listeners: Vec<ListenerEntry> = self.listeners.borrow().clone();
        for entry in listeners {
            if !Slice::at(&prev, entry.path).same_as(&Slice::at(&next, entry.path)) {
                (entry.listener)(&next, &prev);
            }
        }
        true
    }
}

// ─── Built-in middleware ──────────────────────────────────────────────────

/// Keeps the canvas tree well-formed: recomputes derived levels, rejects
/// structurally invalid trees, falls back to the root when the active
/// canvas disappeared and drops selected ids that left the active canvas.
pub fn canvas_tree(prev: &Snapshot, mut next: Snapshot) -> Result<Snapshot, StoreError> {
    if !Arc::ptr_eq(&prev.diagram.canvases, &next.diagram.canvases) {
        tree::recompute_levels(&mut next.diagram);
        tree::validate(&next.diagram)?;
    }

    if next.diagram.canvas(next.ui.active_canvas).is_none() {
        next.ui_mut().active_canvas = CanvasId::ROOT;
    }

    let kept: Option<Vec<NodeId>> = next.active_canvas().and_then(|canvas| {
        let selection = &next.ui.selection;
        selection
            .iter()
            .any(|id| !canvas.contains(*id))
            .then(|| selection.iter().copied().filter(|id| canvas.contains(*id)).collect())
    });
    if let Some(kept) = kept {
        next.ui_mut().selection = kept;
    }
    Ok(next)
}
