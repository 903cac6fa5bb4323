//! Snapshot → display list.
//!
//! Walks the visible canvas layers and emits backend-agnostic drawing
//! commands in device pixels. Paint order is fixed:
//! background → grid → (per layer) connections → nodes → selection →
//! interaction overlay. X-ray layers follow the active canvas in pre-order,
//! each translated by its owner chain and faded by its level opacity.

use crate::hit::resize_handle_bounds;
use crate::viewport::{Surface, Viewport, snap_to_device_pixel, to_kurbo};
use kurbo::{Affine, BezPath, Ellipse, Line, Rect, RoundedRect, Shape, Vec2};
use nest_core::tree::{absolute_origin, visible_layers};
use nest_core::{
    Bounds, CanvasId, Color, ConnectionId, EngineConfig, Node, NodeId, NodeRef, Point, ShapeKind,
    Snapshot,
};

const BACKGROUND: Color = Color::WHITE;
const GRID: Color = Color::rgba(0.0, 0.0, 0.0, 0.06);
const NODE_FILL: Color = Color::WHITE;
const NODE_STROKE: Color = Color::rgba(0.2, 0.2, 0.24, 1.0);
const EDGE_STROKE: Color = Color::rgba(0.42, 0.44, 0.5, 1.0);
const SELECTION: Color = Color::rgba(0.1, 0.45, 0.95, 1.0);
const MARQUEE_FILL: Color = Color::rgba(0.1, 0.45, 0.95, 0.12);

/// Grid lines closer than this many screen pixels are skipped.
const MIN_GRID_SPACING: f64 = 4.0;

/// Transient interaction feedback drawn on top of everything, in world
/// coordinates of the active canvas.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Overlay {
    #[default]
    None,
    Marquee { from: Point, to: Point },
    ConnectionPreview { from: NodeId, to: Point },
}

/// A single drawing operation, geometry in device pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCmd {
    Clear {
        color: Color,
    },
    GridLine {
        line: Line,
        color: Color,
    },
    Connection {
        canvas: CanvasId,
        id: ConnectionId,
        line: Line,
        color: Color,
        width: f64,
        dashed: bool,
        label: Option<String>,
    },
    Node {
        node: NodeRef,
        shape: ShapeKind,
        path: BezPath,
        fill: Color,
        stroke: Color,
        stroke_width: f64,
        text: Color,
        label: String,
        label_at: kurbo::Point,
    },
    SelectionOutline {
        node: NodeId,
        rect: Rect,
        color: Color,
    },
    ResizeHandle {
        node: NodeId,
        rect: Rect,
        color: Color,
    },
    Marquee {
        rect: Rect,
        fill: Color,
        stroke: Color,
    },
    ConnectionPreview {
        line: Line,
        color: Color,
    },
}

impl DrawCmd {
    /// Short name of the command kind, handy for asserting paint order.
    pub fn kind(&self) -> &'static str {
        match self {
            DrawCmd::Clear { .. } => "clear",
            DrawCmd::GridLine { .. } => "grid",
            DrawCmd::Connection { .. } => "connection",
            DrawCmd::Node { .. } => "node",
            DrawCmd::SelectionOutline { .. } => "selection",
            DrawCmd::ResizeHandle { .. } => "handle",
            DrawCmd::Marquee { .. } => "marquee",
            DrawCmd::ConnectionPreview { .. } => "preview",
        }
    }
}

/// Output of one paint pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayList {
    /// Backing-store size the commands were laid out for.
    pub size: (u32, u32),
    pub commands: Vec<DrawCmd>,
}

/// Paint the active canvas of `snapshot` (plus X-ray layers) for `surface`.
pub fn paint(
    snapshot: &Snapshot,
    surface: &Surface,
    overlay: &Overlay,
    config: &EngineConfig,
) -> DisplayList {
    let ui = &snapshot.ui;
    let diagram = &snapshot.diagram;
    let viewport = Viewport::from_ui(ui);
    let world_to_device = surface.device_transform() * viewport.transform();

    let mut list = DisplayList {
        size: surface.backing_size(),
        commands: Vec::new(),
    };
    list.commands.push(DrawCmd::Clear { color: BACKGROUND });

    paint_grid(&mut list, surface, &viewport, config.grid_size as f64);

    let active_origin = absolute_origin(diagram, ui.active_canvas);
    for (layer, opacity) in visible_layers(diagram, ui.active_canvas, ui.xray_level, config) {
        let Some(canvas) = diagram.canvas(layer) else {
            continue;
        };
        let offset = absolute_origin(diagram, layer) - active_origin;
        let transform = world_to_device * Affine::translate((offset.x as f64, offset.y as f64));
        log::trace!("paint layer {layer} at opacity {opacity}");

        for conn in &canvas.connections {
            let (Some(from), Some(to)) = (canvas.node(conn.from), canvas.node(conn.to)) else {
                continue;
            };
            let stroke = conn.style.stroke.unwrap_or(EDGE_STROKE);
            list.commands.push(DrawCmd::Connection {
                canvas: layer,
                id: conn.id,
                line: transform * connection_line(from.bounds(), to.bounds()),
                color: stroke.faded(opacity),
                width: conn.style.stroke_width.unwrap_or(1.5) as f64 * scale_of(&transform),
                dashed: conn.style.dashed,
                label: conn.label.clone(),
            });
        }

        for node in canvas.nodes_in_paint_order() {
            list.commands.push(node_cmd(layer, node, &transform, opacity));
        }
    }

    if let Some(active) = snapshot.active_canvas() {
        for id in &ui.selection {
            let Some(node) = active.node(*id) else {
                continue;
            };
            let rect = world_to_device.transform_rect_bbox(to_rect(node.bounds()));
            list.commands.push(DrawCmd::SelectionOutline {
                node: *id,
                rect,
                color: SELECTION,
            });
            let handle = resize_handle_bounds(node.bounds(), ui.zoom);
            list.commands.push(DrawCmd::ResizeHandle {
                node: *id,
                rect: world_to_device.transform_rect_bbox(to_rect(handle)),
                color: SELECTION,
            });
        }

        match overlay {
            Overlay::None => {}
            Overlay::Marquee { from, to } => {
                let rect = to_rect(Bounds::spanning(*from, *to));
                list.commands.push(DrawCmd::Marquee {
                    rect: world_to_device.transform_rect_bbox(rect),
                    fill: MARQUEE_FILL,
                    stroke: SELECTION,
                });
            }
            Overlay::ConnectionPreview { from, to } => {
                if let Some(source) = active.node(*from) {
                    let start = to_kurbo(source.bounds().center());
                    list.commands.push(DrawCmd::ConnectionPreview {
                        line: world_to_device * Line::new(start, to_kurbo(*to)),
                        color: SELECTION,
                    });
                }
            }
        }
    }

    list
}

// ─── Grid ────────────────────────────────────────────────────────────────────

fn paint_grid(list: &mut DisplayList, surface: &Surface, viewport: &Viewport, spacing: f64) {
    let step = spacing * viewport.zoom;
    if spacing <= 0.0 || step < MIN_GRID_SPACING {
        return;
    }
    let dpr = surface.device_pixel_ratio;
    let (w, h) = (surface.css_width, surface.css_height);

    // First grid line at or after the screen's left/top edge.
    let first = |pan: f64| pan.rem_euclid(step);

    let mut x = first(viewport.pan.x);
    while x <= w {
        let sx = snap_to_device_pixel(x, dpr) * dpr;
        list.commands.push(DrawCmd::GridLine {
            line: Line::new((sx, 0.0), (sx, h * dpr)),
            color: GRID,
        });
        x += step;
    }
    let mut y = first(viewport.pan.y);
    while y <= h {
        let sy = snap_to_device_pixel(y, dpr) * dpr;
        list.commands.push(DrawCmd::GridLine {
            line: Line::new((0.0, sy), (w * dpr, sy)),
            color: GRID,
        });
        y += step;
    }
}

// ─── Shapes ──────────────────────────────────────────────────────────────────

fn node_cmd(layer: CanvasId, node: &Node, transform: &Affine, opacity: f32) -> DrawCmd {
    let rect = to_rect(node.bounds());
    let path = *transform * shape_path(node.shape, rect);
    let style = &node.style;
    DrawCmd::Node {
        node: NodeRef::new(layer, node.id),
        shape: node.shape,
        path,
        fill: style.fill.unwrap_or(NODE_FILL).faded(opacity),
        stroke: style.stroke.unwrap_or(NODE_STROKE).faded(opacity),
        stroke_width: style.stroke_width.unwrap_or(1.0) as f64 * scale_of(transform),
        text: style.text.unwrap_or(Color::BLACK).faded(opacity),
        label: node.label.clone(),
        label_at: *transform * rect.center(),
    }
}

/// Outline of a node shape inside `rect`.
pub fn shape_path(shape: ShapeKind, rect: Rect) -> BezPath {
    const TOLERANCE: f64 = 0.1;
    match shape {
        ShapeKind::Rect => rect.to_path(TOLERANCE),
        ShapeKind::Round => RoundedRect::from_rect(rect, 8.0_f64.min(rect.height() / 2.0)).to_path(TOLERANCE),
        ShapeKind::Stadium => RoundedRect::from_rect(rect, rect.height() / 2.0).to_path(TOLERANCE),
        ShapeKind::Diamond => {
            let c = rect.center();
            let mut path = BezPath::new();
            path.move_to((c.x, rect.y0));
            path.line_to((rect.x1, c.y));
            path.line_to((c.x, rect.y1));
            path.line_to((rect.x0, c.y));
            path.close_path();
            path
        }
        ShapeKind::Circle => Ellipse::from_rect(rect).to_path(TOLERANCE),
    }
}

/// Straight line between two nodes, clipped to their bounding boxes.
fn connection_line(from: Bounds, to: Bounds) -> Line {
    let (a, b) = (to_kurbo(from.center()), to_kurbo(to.center()));
    Line::new(clip_to_edge(a, b - a, from), clip_to_edge(b, a - b, to))
}

/// Where the ray from the center `c` of `bounds` along `dir` leaves the box.
fn clip_to_edge(c: kurbo::Point, dir: Vec2, bounds: Bounds) -> kurbo::Point {
    let (hw, hh) = (bounds.width as f64 / 2.0, bounds.height as f64 / 2.0);
    let tx = if dir.x != 0.0 { hw / dir.x.abs() } else { f64::INFINITY };
    let ty = if dir.y != 0.0 { hh / dir.y.abs() } else { f64::INFINITY };
    let t = tx.min(ty).min(1.0);
    if t.is_finite() { c + dir * t } else { c }
}

fn to_rect(b: Bounds) -> Rect {
    Rect::new(
        b.x as f64,
        b.y as f64,
        (b.x + b.width) as f64,
        (b.y + b.height) as f64,
    )
}

fn scale_of(transform: &Affine) -> f64 {
    transform.as_coeffs()[0].abs()
}
