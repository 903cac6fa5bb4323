//! Text → visual reconciliation.
//!
//! Merges a freshly parsed candidate tree into the current diagram with the
//! smallest change set: nodes and nested canvases are matched by stable id,
//! untouched nodes keep their geometry, and canvases that end up equal stay
//! shared with the previous snapshot.

use crate::config::EngineConfig;
use crate::id::{CanvasId, ConnectionId, NodeId};
use crate::layout::Layout;
use crate::model::{Canvas, Connection, Diagram, Node, NodeRef, Style};
use crate::parser::{ParsedCanvas, ParsedDiagram};
use crate::tree;
use std::collections::HashSet;

/// Produce the diagram `parsed` describes, starting from `current`.
///
/// - Nodes present in both keep position, size, z-order and style; their
///   shape and label follow the text.
/// - New nodes take an annotated `%% pos` if present, else a `layout` placement.
/// - Nodes missing from the text are removed together with their
///   connections and nested canvases. Their overrides stay in the side-table
///   so re-adding the node restores its geometry.
/// - Overlay values stated in the text are written to the side-table and
///   applied; overlays absent from the text are kept.
///
/// `source` is left as is; the caller owns it.
pub fn reconcile(
    current: &Diagram,
    parsed: &ParsedDiagram,
    layout: &dyn Layout,
    config: &EngineConfig,
) -> Diagram {
    let mut next = current.clone();
    let mut queue = vec![(CanvasId::ROOT, &parsed.root)];
    while let Some((id, parsed_canvas)) = queue.pop() {
        queue.extend(reconcile_canvas(&mut next, id, parsed_canvas, layout, config));
    }
    tree::recompute_levels(&mut next);
    next
}

/// Reconcile one canvas; returns the nested canvases still to visit.
fn reconcile_canvas<'p>(
    next: &mut Diagram,
    id: CanvasId,
    parsed: &'p ParsedCanvas,
    layout: &dyn Layout,
    config: &EngineConfig,
) -> Vec<(CanvasId, &'p ParsedCanvas)> {
    let Some(old) = next.canvas(id).cloned() else {
        return Vec::new();
    };
    let mut canvas = old.clone();
    let mut dropped: Vec<CanvasId> = Vec::new();
    let mut pending = Vec::new();

    // Structure from text: drop what the text no longer mentions.
    let mentioned: HashSet<NodeId> = parsed.nodes.iter().map(|n| n.id).collect();
    let gone: Vec<NodeId> = canvas
        .nodes
        .keys()
        .filter(|n| !mentioned.contains(n))
        .copied()
        .collect();
    for node_id in gone {
        if let Some((node, _)) = canvas.remove_node(node_id) {
            dropped.extend(node.canvas);
        }
    }

    for (node_id, ov) in &parsed.overrides {
        let entry = canvas.override_mut(*node_id);
        if ov.position.is_some() {
            entry.position = ov.position;
        }
        if ov.size.is_some() {
            entry.size = ov.size;
        }
        if let Some(style) = &ov.style {
            entry.style = Some(style.clone());
        }
    }

    for (order, pn) in parsed.nodes.iter().enumerate() {
        let stated = parsed.overrides.get(&pn.id);
        let kept = canvas.overrides.get(&pn.id).cloned().unwrap_or_default();

        if let Some(node) = canvas.nodes.get_mut(&pn.id) {
            node.shape = pn.shape;
            node.label.clone_from(&pn.label);
            if let Some(ov) = stated {
                if let Some(p) = ov.position {
                    node.position = p;
                }
                if let Some(s) = ov.size {
                    node.size = s;
                }
                if let Some(style) = &ov.style {
                    node.style = style.clone();
                }
            }
        } else {
            let mut node = Node::new(pn.id, pn.shape, pn.label.clone());
            node.size = kept.size.unwrap_or(config.default_node_size);
            node.position = kept
                .position
                .unwrap_or_else(|| layout.place(&canvas, node.size));
            node.style = kept.style.unwrap_or_default();
            canvas.nodes.insert(pn.id, node);
        }

        let Some(node) = canvas.nodes.get_mut(&pn.id) else {
            continue;
        };
        node.order = order as u64;

        match (&pn.nested, node.canvas) {
            (Some(inner), Some(nested)) if next.canvas(nested).is_some() => {
                pending.push((nested, inner));
            }
            (Some(inner), _) => {
                let nested = next.allocate_canvas_id();
                next.insert_canvas(Canvas::new(nested, Some(NodeRef::new(id, pn.id))));
                node.canvas = Some(nested);
                canvas.children.push(nested);
                pending.push((nested, inner));
            }
            (None, Some(nested)) => {
                node.canvas = None;
                dropped.push(nested);
            }
            (None, None) => {}
        }
    }
    canvas.next_order = parsed.nodes.len() as u64;

    let mut connections: Vec<Connection> = Vec::with_capacity(parsed.connections.len());
    for pc in &parsed.connections {
        let ordinal = connections
            .iter()
            .filter(|c| c.from == pc.from && c.to == pc.to)
            .count();
        let conn_id = ConnectionId::between(pc.from, pc.to, ordinal);
        let mut style = old
            .connection(conn_id)
            .map(|c| c.style.clone())
            .unwrap_or_else(Style::default);
        style.dashed = pc.dashed;
        connections.push(Connection {
            id: conn_id,
            from: pc.from,
            to: pc.to,
            label: pc.label.clone(),
            style,
        });
    }
    canvas.connections = connections;
    canvas.children.retain(|c| !dropped.contains(c));

    if canvas != old {
        log::trace!("reconcile: canvas {id} changed");
        next.insert_canvas(canvas);
    }
    for nested in dropped {
        tree::remove_subtree(next, nested);
    }
    pending
}
