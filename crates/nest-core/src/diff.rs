//! Structural change detection between two diagrams.
//!
//! Compares canvases by id; canvases shared by both diagrams (same `Arc`)
//! are skipped without looking inside, so diffing two snapshots that differ
//! in one canvas costs one canvas.

use crate::id::{CanvasId, ConnectionId};
use crate::model::{Canvas, Diagram, NodeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    NodeAdded(NodeRef),
    NodeRemoved(NodeRef),
    NodeUpdated(NodeRef),
    ConnectionAdded(CanvasId, ConnectionId),
    ConnectionRemoved(CanvasId, ConnectionId),
    ConnectionUpdated(CanvasId, ConnectionId),
    CanvasRegistered(CanvasId),
    CanvasUnregistered(CanvasId),
}

/// Everything that differs between `prev` and `next`, canvas by canvas in
/// id order. Registrations come before the contents of the new canvas;
/// removals of a canvas's contents come before its unregistration.
pub fn diff(prev: &Diagram, next: &Diagram) -> Vec<Change> {
    let mut out = Vec::new();
    if std::sync::Arc::ptr_eq(&prev.canvases, &next.canvases) {
        return out;
    }

    for (&id, canvas) in next.canvases.iter() {
        match prev.canvas(id) {
            None => {
                out.push(Change::CanvasRegistered(id));
                diff_canvas(&empty(id), canvas, &mut out);
            }
            Some(_) if prev.shares_canvas(next, id) => {}
            Some(old) => diff_canvas(old, canvas, &mut out),
        }
    }

    for (&id, canvas) in prev.canvases.iter() {
        if next.canvas(id).is_none() {
            diff_canvas(canvas, &empty(id), &mut out);
            out.push(Change::CanvasUnregistered(id));
        }
    }
    out
}

fn empty(id: CanvasId) -> Canvas {
    Canvas::new(id, None)
}

fn diff_canvas(old: &Canvas, new: &Canvas, out: &mut Vec<Change>) {
    let at = |node| NodeRef::new(new.id, node);

    for (id, node) in &new.nodes {
        match old.node(*id) {
            None => out.push(Change::NodeAdded(at(*id))),
            Some(prev) if prev != node => out.push(Change::NodeUpdated(at(*id))),
            Some(_) => {}
        }
    }
    for id in old.nodes.keys() {
        if !new.contains(*id) {
            out.push(Change::NodeRemoved(at(*id)));
        }
    }

    for conn in &new.connections {
        match old.connection(conn.id) {
            None => out.push(Change::ConnectionAdded(new.id, conn.id)),
            Some(prev) if prev != conn => out.push(Change::ConnectionUpdated(new.id, conn.id)),
            Some(_) => {}
        }
    }
    for conn in &old.connections {
        if new.connection(conn.id).is_none() {
            out.push(Change::ConnectionRemoved(new.id, conn.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeId;
    use crate::model::{Connection, Node, ShapeKind, Style};

    fn with_nodes(ids: &[&str]) -> Diagram {
        let mut d = Diagram::new();
        let root = d.canvas_mut(CanvasId::ROOT).unwrap();
        for id in ids {
            root.insert_node(Node::new(NodeId::intern(id), ShapeKind::Rect, *id));
        }
        d
    }

    #[test]
    fn identical_diagrams_have_no_changes() {
        let d = with_nodes(&["a", "b"]);
        assert!(diff(&d, &d.clone()).is_empty());
    }

    #[test]
    fn node_add_remove_update() {
        let prev = with_nodes(&["a", "b"]);
        let mut next = prev.clone();
        let root = next.canvas_mut(CanvasId::ROOT).unwrap();
        root.remove_node(NodeId::intern("a"));
        root.node_mut(NodeId::intern("b")).unwrap().label = "B!".into();
        root.insert_node(Node::new(NodeId::intern("c"), ShapeKind::Round, "C"));

        let changes = diff(&prev, &next);
        let r = |s| NodeRef::new(CanvasId::ROOT, NodeId::intern(s));
        assert_eq!(
            changes,
            vec![
                Change::NodeUpdated(r("b")),
                Change::NodeAdded(r("c")),
                Change::NodeRemoved(r("a")),
            ]
        );
    }

    #[test]
    fn connection_and_canvas_changes() {
        let prev = with_nodes(&["a", "b"]);
        let mut next = prev.clone();
        let (a, b) = (NodeId::intern("a"), NodeId::intern("b"));
        let child = next.allocate_canvas_id();
        next.insert_canvas(Canvas::new(child, Some(NodeRef::new(CanvasId::ROOT, a))));
        let root = next.canvas_mut(CanvasId::ROOT).unwrap();
        let id = root.next_connection_id(a, b);
        root.connections.push(Connection {
            id,
            from: a,
            to: b,
            label: None,
            style: Style::default(),
        });

        let changes = diff(&prev, &next);
        assert!(changes.contains(&Change::ConnectionAdded(CanvasId::ROOT, id)));
        assert!(changes.contains(&Change::CanvasRegistered(child)));

        let back = diff(&next, &prev);
        assert!(back.contains(&Change::ConnectionRemoved(CanvasId::ROOT, id)));
        assert_eq!(back.last(), Some(&Change::CanvasUnregistered(child)));
    }
}
