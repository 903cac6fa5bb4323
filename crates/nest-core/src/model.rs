//! Core data model for Nest diagrams.
//!
//! A diagram is an arena of canvases indexed by `CanvasId`. Each canvas owns
//! its nodes, connections and a visual-override side-table. Containment is
//! expressed with id references only: a node may point at the nested canvas
//! it owns, and that canvas points back at its owner via a `NodeRef`.
//!
//! Every canvas sits behind an `Arc`, and so does the canvas map itself, so a
//! cloned `Snapshot` shares all untouched canvases with its predecessor.
//! Mutation goes through `Arc::make_mut` (copy-on-write).

use crate::id::{CanvasId, ConnectionId, NodeId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::ops::{Add, Sub};
use std::sync::Arc;

// ─── Geometry ────────────────────────────────────────────────────────────

/// A position in canvas-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn distance(self, other: Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    pub fn new(origin: Point, size: Size) -> Self {
        Self {
            x: origin.x,
            y: origin.y,
            width: size.width,
            height: size.height,
        }
    }

    /// Normalized rectangle spanned by two corner points (box selection).
    pub fn spanning(a: Point, b: Point) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (b.x - a.x).abs(),
            height: (b.y - a.y).abs(),
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// AABB overlap test.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }

    pub fn translate(&self, by: Point) -> Self {
        Self {
            x: self.x + by.x,
            y: self.y + by.y,
            ..*self
        }
    }
}

// ─── Colors & Style ──────────────────────────────────────────────────────

/// RGBA color. Stored as 4 × f32 [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl Color {
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#RGB`, `#RRGGBB` or `#RRGGBBAA`. The `#` is optional.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        let bytes = hex.as_bytes();
        let byte = |i: usize| -> Option<f32> {
            Some((hex_val(bytes[i])? << 4 | hex_val(bytes[i + 1])?) as f32 / 255.0)
        };

        match bytes.len() {
            3 => {
                let r = hex_val(bytes[0])?;
                let g = hex_val(bytes[1])?;
                let b = hex_val(bytes[2])?;
                Some(Self::rgba(
                    (r * 17) as f32 / 255.0,
                    (g * 17) as f32 / 255.0,
                    (b * 17) as f32 / 255.0,
                    1.0,
                ))
            }
            6 => Some(Self::rgba(byte(0)?, byte(2)?, byte(4)?, 1.0)),
            8 => Some(Self::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    /// Emit as `#RRGGBB`, or `#RRGGBBAA` when not fully opaque.
    pub fn to_hex(&self) -> String {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        let (r, g, b, a) = (channel(self.r), channel(self.g), channel(self.b), channel(self.a));
        if a == 255 {
            format!("#{r:02X}{g:02X}{b:02X}")
        } else {
            format!("#{r:02X}{g:02X}{b:02X}{a:02X}")
        }
    }

    /// Same color with alpha multiplied by `factor` (X-ray compositing).
    pub fn faded(&self, factor: f32) -> Self {
        Self {
            a: self.a * factor,
            ..*self
        }
    }
}

/// Visual style of a node or connection. Every field is optional so a
/// style can act as a partial override on top of the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub fill: Option<Color>,
    pub stroke: Option<Color>,
    pub text: Option<Color>,
    pub stroke_width: Option<f32>,
    #[serde(default)]
    pub dashed: bool,
}

impl Style {
    pub fn is_empty(&self) -> bool {
        *self == Style::default()
    }

    /// Overlay `over` on top of `self`: `Some` fields in `over` win.
    #[must_use]
    pub fn merged(&self, over: &Style) -> Style {
        Style {
            fill: over.fill.or(self.fill),
            stroke: over.stroke.or(self.stroke),
            text: over.text.or(self.text),
            stroke_width: over.stroke_width.or(self.stroke_width),
            dashed: over.dashed || self.dashed,
        }
    }
}

// ─── Nodes & Connections ─────────────────────────────────────────────────

/// The enumerated shape kinds a node can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    #[default]
    Rect,
    Round,
    Stadium,
    Diamond,
    Circle,
}

impl ShapeKind {
    pub const ALL: [ShapeKind; 5] = [
        ShapeKind::Rect,
        ShapeKind::Round,
        ShapeKind::Stadium,
        ShapeKind::Diamond,
        ShapeKind::Circle,
    ];

    /// Opening and closing delimiters of the label in the line grammar.
    pub fn delimiters(self) -> (&'static str, &'static str) {
        match self {
            ShapeKind::Rect => ("[", "]"),
            ShapeKind::Round => ("(", ")"),
            ShapeKind::Stadium => ("([", "])"),
            ShapeKind::Diamond => ("{", "}"),
            ShapeKind::Circle => ("((", "))"),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShapeKind::Rect => "rect",
            ShapeKind::Round => "round",
            ShapeKind::Stadium => "stadium",
            ShapeKind::Diamond => "diamond",
            ShapeKind::Circle => "circle",
        }
    }
}

/// A single diagram node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable id, unique within the owning canvas.
    pub id: NodeId,
    pub shape: ShapeKind,
    pub label: String,
    /// Top-left corner in owning-canvas-local coordinates.
    pub position: Point,
    pub size: Size,
    pub style: Style,
    /// Explicit z-order; higher paints later.
    pub z: i32,
    /// Insertion order within the canvas, breaks z ties and orders emitted text.
    pub order: u64,
    /// The nested canvas this node owns, if any.
    pub canvas: Option<CanvasId>,
}

impl Node {
    pub fn new(id: NodeId, shape: ShapeKind, label: impl Into<String>) -> Self {
        Self {
            id,
            shape,
            label: label.into(),
            position: Point::ZERO,
            size: Size::new(120.0, 60.0),
            style: Style::default(),
            z: 0,
            order: 0,
            canvas: None,
        }
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.position, self.size)
    }
}

/// A directed relation between two nodes of the same canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub from: NodeId,
    pub to: NodeId,
    pub label: Option<String>,
    pub style: Style,
}

/// User-applied visual values the text cannot derive on its own. Stored in
/// the owning canvas's side-table keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualOverride {
    pub position: Option<Point>,
    pub size: Option<Size>,
    pub style: Option<Style>,
}

impl VisualOverride {
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.size.is_none() && self.style.is_none()
    }
}

/// Global address of a node: the canvas that owns it plus its id there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    pub canvas: CanvasId,
    pub node: NodeId,
}

impl NodeRef {
    pub fn new(canvas: CanvasId, node: NodeId) -> Self {
        Self { canvas, node }
    }
}

/// Independent pan/zoom of one canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub zoom: f32,
    pub pan: Point,
}

impl Default for View {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: Point::ZERO,
        }
    }
}

// ─── Canvas ──────────────────────────────────────────────────────────────

/// A coordinate space holding nodes and connections; nested canvases are
/// owned by a node of their parent canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub id: CanvasId,
    /// Owning node (`None` for the root canvas).
    pub owner: Option<NodeRef>,
    /// Derived: root is 0, otherwise the owner canvas's level + 1.
    /// Recomputed by `tree::recompute_levels`, never set by hand.
    pub level: u32,
    /// Ordered nested canvases whose owner node lives in this canvas.
    pub children: SmallVec<[CanvasId; 4]>,
    pub nodes: BTreeMap<NodeId, Node>,
    pub connections: Vec<Connection>,
    pub overrides: BTreeMap<NodeId, VisualOverride>,
    pub view: View,
    pub next_order: u64,
}

impl Canvas {
    pub fn new(id: CanvasId, owner: Option<NodeRef>) -> Self {
        Self {
            id,
            owner,
            level: 0,
            children: SmallVec::new(),
            nodes: BTreeMap::new(),
            connections: Vec::new(),
            overrides: BTreeMap::new(),
            view: View::default(),
            next_order: 0,
        }
    }

    /// The canvas that owns this one's owner node.
    pub fn parent(&self) -> Option<CanvasId> {
        self.owner.map(|o| o.canvas)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Insert a node, stamping it with the next insertion order.
    pub fn insert_node(&mut self, mut node: Node) -> NodeId {
        node.order = self.next_order;
        self.next_order += 1;
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node together with every connection touching it.
    /// Returns the node and the pruned connections.
    pub fn remove_node(&mut self, id: NodeId) -> Option<(Node, Vec<Connection>)> {
        let node = self.nodes.remove(&id)?;
        let (pruned, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.connections)
            .into_iter()
            .partition(|c| c.from == id || c.to == id);
        self.connections = kept;
        Some((node, pruned))
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// Next free stable id for a connection `from -> to`.
    pub fn next_connection_id(&self, from: NodeId, to: NodeId) -> ConnectionId {
        (0..)
            .map(|n| ConnectionId::between(from, to, n))
            .find(|id| self.connection(*id).is_none())
            .unwrap_or_else(|| ConnectionId::between(from, to, self.connections.len() + 1))
    }

    /// Nodes sorted for painting: z-order, ties broken by insertion order.
    pub fn nodes_in_paint_order(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by_key(|n| (n.z, n.order));
        nodes
    }

    /// Nodes sorted by insertion order (emit order).
    pub fn nodes_in_order(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by_key(|n| n.order);
        nodes
    }

    pub fn max_z(&self) -> i32 {
        self.nodes.values().map(|n| n.z).max().unwrap_or(0)
    }

    pub fn min_z(&self) -> i32 {
        self.nodes.values().map(|n| n.z).min().unwrap_or(0)
    }

    /// Mutable override entry for `id`, created empty if missing.
    pub fn override_mut(&mut self, id: NodeId) -> &mut VisualOverride {
        self.overrides.entry(id).or_default()
    }
}

// ─── Diagram ─────────────────────────────────────────────────────────────

/// The persisted unit: textual source plus the visual canvas arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagram {
    /// Text as of the last sync in either direction.
    pub source: Arc<str>,
    pub canvases: Arc<BTreeMap<CanvasId, Arc<Canvas>>>,
    pub next_canvas: u32,
}

impl Default for Diagram {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagram {
    /// A diagram holding only the empty root canvas.
    pub fn new() -> Self {
        let mut canvases = BTreeMap::new();
        canvases.insert(CanvasId::ROOT, Arc::new(Canvas::new(CanvasId::ROOT, None)));
        Self {
            source: Arc::from(""),
            canvases: Arc::new(canvases),
            next_canvas: 1,
        }
    }

    /// The root canvas, missing only after a malformed deserialization.
    pub fn root(&self) -> Option<&Canvas> {
        self.canvas(CanvasId::ROOT)
    }

    pub fn canvas(&self, id: CanvasId) -> Option<&Canvas> {
        self.canvases.get(&id).map(Arc::as_ref)
    }

    /// Copy-on-write access to one canvas; other canvases stay shared.
    pub fn canvas_mut(&mut self, id: CanvasId) -> Option<&mut Canvas> {
        Arc::make_mut(&mut self.canvases)
            .get_mut(&id)
            .map(Arc::make_mut)
    }

    pub fn canvas_ids(&self) -> impl Iterator<Item = CanvasId> + '_ {
        self.canvases.keys().copied()
    }

    pub fn allocate_canvas_id(&mut self) -> CanvasId {
        let id = CanvasId(self.next_canvas);
        self.next_canvas += 1;
        id
    }

    pub fn insert_canvas(&mut self, canvas: Canvas) {
        Arc::make_mut(&mut self.canvases).insert(canvas.id, Arc::new(canvas));
    }

    pub fn remove_canvas(&mut self, id: CanvasId) -> Option<Arc<Canvas>> {
        Arc::make_mut(&mut self.canvases).remove(&id)
    }

    pub fn node(&self, at: NodeRef) -> Option<&Node> {
        self.canvas(at.canvas)?.node(at.node)
    }

    /// True when canvas `id` is the very same allocation in both diagrams.
    pub fn shares_canvas(&self, other: &Diagram, id: CanvasId) -> bool {
        match (self.canvases.get(&id), other.canvases.get(&id)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Value equality with pointer fast paths on shared subtrees.
    pub fn same_as(&self, other: &Diagram) -> bool {
        if self.source != other.source || self.next_canvas != other.next_canvas {
            return false;
        }
        if Arc::ptr_eq(&self.canvases, &other.canvases) {
            return true;
        }
        self.canvases.len() == other.canvases.len()
            && self
                .canvases
                .iter()
                .zip(other.canvases.iter())
                .all(|((ka, a), (kb, b))| ka == kb && (Arc::ptr_eq(a, b) || a == b))
    }
}

// ─── UI state & snapshot ─────────────────────────────────────────────────

/// The active interaction tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    #[default]
    Select,
    Connect,
    Pan,
    Draw(ShapeKind),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiState {
    /// Selected nodes of the active canvas.
    pub selection: Vec<NodeId>,
    pub tool: Tool,
    pub zoom: f32,
    pub pan: Point,
    /// 0 = X-ray off; n = composite n nested levels below the active canvas.
    pub xray_level: u32,
    pub active_canvas: CanvasId,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            selection: Vec::new(),
            tool: Tool::Select,
            zoom: 1.0,
            pan: Point::ZERO,
            xray_level: 0,
            active_canvas: CanvasId::ROOT,
        }
    }
}

/// One immutable value of the whole application state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub diagram: Diagram,
    pub ui: Arc<UiState>,
}

impl Snapshot {
    pub fn new(diagram: Diagram) -> Self {
        Self {
            diagram,
            ui: Arc::new(UiState::default()),
        }
    }

    pub fn ui_mut(&mut self) -> &mut UiState {
        Arc::make_mut(&mut self.ui)
    }

    pub fn active_canvas(&self) -> Option<&Canvas> {
        self.diagram.canvas(self.ui.active_canvas)
    }

    /// Make `id` the active canvas and clear the selection. The canvas being
    /// left keeps the current pan/zoom; `id` brings back its own.
    pub fn switch_canvas(&mut self, id: CanvasId) {
        let leaving = self.ui.active_canvas;
        let current = View {
            zoom: self.ui.zoom,
            pan: self.ui.pan,
        };
        if self.diagram.canvas(leaving).is_some_and(|c| c.view != current)
            && let Some(c) = self.diagram.canvas_mut(leaving)
        {
            c.view = current;
        }
        let restored = self.diagram.canvas(id).map(|c| c.view).unwrap_or_default();
        let ui = self.ui_mut();
        ui.active_canvas = id;
        ui.zoom = restored.zoom;
        ui.pan = restored.pan;
        ui.selection.clear();
    }

    /// Value equality with pointer fast paths on shared subtrees.
    pub fn same_as(&self, other: &Snapshot) -> bool {
        (Arc::ptr_eq(&self.ui, &other.ui) || self.ui == other.ui)
            && self.diagram.same_as(&other.diagram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let c = Color::from_hex("#FF8000").unwrap();
        assert_eq!(c.to_hex(), "#FF8000");
        let short = Color::from_hex("#fff").unwrap();
        assert_eq!(short.to_hex(), "#FFFFFF");
        let alpha = Color::from_hex("00000080").unwrap();
        assert_eq!(alpha.to_hex(), "#00000080");
        assert!(Color::from_hex("#12").is_none());
    }

    #[test]
    fn remove_node_prunes_connections() {
        let mut canvas = Canvas::new(CanvasId::ROOT, None);
        let a = canvas.insert_node(Node::new(NodeId::intern("a"), ShapeKind::Rect, "A"));
        let b = canvas.insert_node(Node::new(NodeId::intern("b"), ShapeKind::Rect, "B"));
        let id = canvas.next_connection_id(a, b);
        canvas.connections.push(Connection {
            id,
            from: a,
            to: b,
            label: None,
            style: Style::default(),
        });

        let (_, pruned) = canvas.remove_node(a).unwrap();
        assert_eq!(pruned.len(), 1);
        assert!(canvas.connections.is_empty());
    }

    #[test]
    fn paint_order_uses_z_then_insertion() {
        let mut canvas = Canvas::new(CanvasId::ROOT, None);
        let mut top = Node::new(NodeId::intern("top"), ShapeKind::Rect, "");
        top.z = 5;
        canvas.insert_node(top);
        canvas.insert_node(Node::new(NodeId::intern("first"), ShapeKind::Rect, ""));
        canvas.insert_node(Node::new(NodeId::intern("second"), ShapeKind::Rect, ""));

        let order: Vec<&str> = canvas
            .nodes_in_paint_order()
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(order, vec!["first", "second", "top"]);
    }

    #[test]
    fn canvas_mut_is_copy_on_write() {
        let mut d1 = Diagram::new();
        let child = d1.allocate_canvas_id();
        d1.insert_canvas(Canvas::new(child, None));
        let mut d2 = d1.clone();

        d2.canvas_mut(child)
            .unwrap()
            .insert_node(Node::new(NodeId::intern("x"), ShapeKind::Rect, "X"));

        assert!(d1.shares_canvas(&d2, CanvasId::ROOT));
        assert!(!d1.shares_canvas(&d2, child));
        assert!(d1.canvas(child).unwrap().nodes.is_empty());
        assert!(!d1.same_as(&d2));
    }

    #[test]
    fn root_is_absent_after_malformed_load() {
        let mut d = Diagram::new();
        assert!(d.root().is_some());
        d.remove_canvas(CanvasId::ROOT);
        let json = serde_json::to_string(&d).unwrap();
        let loaded: Diagram = serde_json::from_str(&json).unwrap();
        assert!(loaded.root().is_none());
    }

    #[test]
    fn switching_canvas_swaps_views() {
        let mut s = Snapshot::default();
        let child = s.diagram.allocate_canvas_id();
        s.diagram.insert_canvas(Canvas::new(child, None));
        {
            let ui = s.ui_mut();
            ui.zoom = 2.0;
            ui.pan = Point::new(30.0, -40.0);
            ui.selection.push(NodeId::intern("a"));
        }

        s.switch_canvas(child);
        assert_eq!((s.ui.zoom, s.ui.pan), (1.0, Point::ZERO));
        assert!(s.ui.selection.is_empty());
        assert_eq!(s.diagram.root().unwrap().view.zoom, 2.0);

        s.ui_mut().zoom = 0.5;
        s.switch_canvas(CanvasId::ROOT);
        assert_eq!((s.ui.zoom, s.ui.pan), (2.0, Point::new(30.0, -40.0)));
        assert_eq!(s.diagram.canvas(child).unwrap().view.zoom, 0.5);
    }
}
