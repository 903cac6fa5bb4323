//! Hit testing: world point → node lookup.
//!
//! Reverse-walks the paint order (front-to-back) of one canvas, so the
//! node drawn last is the one that gets hit.

use nest_core::{Bounds, Canvas, NodeId, Point};

/// Screen-space size of the square resize handle at a node's bottom-right corner.
pub const HANDLE_SIZE: f32 = 8.0;

/// Find the topmost node containing `p`. `None` means background.
pub fn node_at(canvas: &Canvas, p: Point) -> Option<NodeId> {
    let hit = canvas
        .nodes_in_paint_order()
        .into_iter()
        .rev()
        .find(|n| n.bounds().contains(p))
        .map(|n| n.id);
    log::trace!("hit {:?} -> {hit:?}", p);
    hit
}

/// All nodes whose bounds intersect `rect`, in paint order. Used for
/// marquee (box) selection.
pub fn nodes_in_rect(canvas: &Canvas, rect: Bounds) -> Vec<NodeId> {
    canvas
        .nodes_in_paint_order()
        .into_iter()
        .filter(|n| n.bounds().intersects(&rect))
        .map(|n| n.id)
        .collect()
}

/// Bounds of the resize handle for a node with bounds `b`, at `zoom`.
pub fn resize_handle_bounds(b: Bounds, zoom: f32) -> Bounds {
    let size = HANDLE_SIZE / zoom.max(f32::EPSILON);
    Bounds {
        x: b.x + b.width - size / 2.0,
        y: b.y + b.height - size / 2.0,
        width: size,
        height: size,
    }
}

/// The selected node whose resize handle lies under `p`, topmost first.
/// Only selected nodes show handles.
pub fn resize_handle_at(canvas: &Canvas, selection: &[NodeId], p: Point, zoom: f32) -> Option<NodeId> {
    canvas
        .nodes_in_paint_order()
        .into_iter()
        .rev()
        .filter(|n| selection.contains(&n.id))
        .find(|n| resize_handle_bounds(n.bounds(), zoom).contains(p))
        .map(|n| n.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nest_core::{CanvasId, Node, ShapeKind, Size};
    use pretty_assertions::assert_eq;

    fn node(id: &str, x: f32, y: f32, w: f32, h: f32) -> Node {
        let mut n = Node::new(NodeId::intern(id), ShapeKind::Rect, id);
        n.position = Point::new(x, y);
        n.size = Size::new(w, h);
        n
    }

    fn canvas() -> Canvas {
        let mut c = Canvas::new(CanvasId::ROOT, None);
        c.insert_node(node("a", 0.0, 0.0, 100.0, 100.0));
        c.insert_node(node("b", 50.0, 50.0, 100.0, 100.0));
        c
    }

    #[test]
    fn topmost_node_wins() {
        let mut c = canvas();
        assert_eq!(node_at(&c, Point::new(75.0, 75.0)), Some(NodeId::intern("b")));
        assert_eq!(node_at(&c, Point::new(10.0, 10.0)), Some(NodeId::intern("a")));
        assert_eq!(node_at(&c, Point::new(400.0, 400.0)), None);

        c.node_mut(NodeId::intern("a")).unwrap().z = 1;
        assert_eq!(node_at(&c, Point::new(75.0, 75.0)), Some(NodeId::intern("a")));
    }

    #[test]
    fn marquee_collects_intersections() {
        let c = canvas();
        let all = nodes_in_rect(&c, Bounds::spanning(Point::new(-10.0, -10.0), Point::new(60.0, 60.0)));
        assert_eq!(all, vec![NodeId::intern("a"), NodeId::intern("b")]);
        let one = nodes_in_rect(&c, Bounds::spanning(Point::new(140.0, 140.0), Point::new(120.0, 120.0)));
        assert_eq!(one, vec![NodeId::intern("b")]);
    }

    #[test]
    fn handle_only_on_selected_nodes() {
        let c = canvas();
        let corner = Point::new(150.0, 150.0);
        assert_eq!(resize_handle_at(&c, &[], corner, 1.0), None);
        assert_eq!(
            resize_handle_at(&c, &[NodeId::intern("b")], corner, 1.0),
            Some(NodeId::intern("b"))
        );
        // Handle shrinks in world units when zoomed in.
        assert_eq!(
            resize_handle_at(&c, &[NodeId::intern("b")], Point::new(153.0, 153.0), 4.0),
            None
        );
    }
}
