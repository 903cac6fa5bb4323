//! Canvas tree queries and structural validation.
//!
//! The canvas arena encodes containment through id references only
//! (`Canvas::owner`, `Canvas::children`, `Node::canvas`). These helpers walk
//! those references and check that they describe a single rooted tree.

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::id::CanvasId;
use crate::model::{Diagram, Point};
use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;
use std::collections::HashSet;

// ─── Queries ──────────────────────────────────────────────────────────────

/// Canvases above `id`, nearest first, ending at the root.
/// Stops early if the owner chain loops back on itself.
pub fn ancestors(diagram: &Diagram, id: CanvasId) -> Vec<CanvasId> {
    let mut out = Vec::new();
    let mut seen = HashSet::from([id]);
    let mut current = diagram.canvas(id).and_then(|c| c.parent());
    while let Some(parent) = current {
        if !seen.insert(parent) {
            break;
        }
        out.push(parent);
        current = diagram.canvas(parent).and_then(|c| c.parent());
    }
    out
}

/// Canvases below `id` in pre-order, following each canvas's ordered children.
pub fn descendants(diagram: &Diagram, id: CanvasId) -> Vec<CanvasId> {
    let mut out = Vec::new();
    let mut seen = HashSet::from([id]);
    let mut stack: Vec<CanvasId> = match diagram.canvas(id) {
        Some(c) => c.children.iter().rev().copied().collect(),
        None => return out,
    };
    while let Some(next) = stack.pop() {
        if !seen.insert(next) {
            continue;
        }
        out.push(next);
        if let Some(c) = diagram.canvas(next) {
            stack.extend(c.children.iter().rev().copied());
        }
    }
    out
}

/// True if `a` is a proper ancestor of `b`.
pub fn is_ancestor_of(diagram: &Diagram, a: CanvasId, b: CanvasId) -> bool {
    a != b && ancestors(diagram, b).contains(&a)
}

/// Depth of `id` measured along the owner chain (root is 0).
pub fn depth(diagram: &Diagram, id: CanvasId) -> u32 {
    ancestors(diagram, id).len() as u32
}

/// Origin of canvas `id` expressed in root coordinates: the sum of the
/// owner node positions along the chain.
pub fn absolute_origin(diagram: &Diagram, id: CanvasId) -> Point {
    let mut origin = Point::ZERO;
    let mut current = diagram.canvas(id).and_then(|c| c.owner);
    let mut hops = 0;
    while let Some(owner) = current {
        if hops > diagram.canvases.len() {
            break;
        }
        hops += 1;
        if let Some(node) = diagram.node(owner) {
            origin = origin + node.position;
        }
        current = diagram.canvas(owner.canvas).and_then(|c| c.owner);
    }
    origin
}

/// Rewrite every canvas's derived `level`. Canvases whose level is already
/// right are left untouched so they stay shared with earlier snapshots.
pub fn recompute_levels(diagram: &mut Diagram) {
    let stale: Vec<(CanvasId, u32)> = diagram
        .canvas_ids()
        .filter_map(|id| {
            let level = depth(diagram, id);
            let current = diagram.canvas(id)?.level;
            (current != level).then_some((id, level))
        })
        .collect();

    for (id, level) in stale {
        if let Some(canvas) = diagram.canvas_mut(id) {
            log::trace!("canvas {id}: level {} -> {level}", canvas.level);
            canvas.level = level;
        }
    }
}

/// Remove canvas `id` and everything nested below it, children before
/// parents, then detach it from its owner (child list and node link).
/// Returns the removed ids in removal order. The root is never removed.
pub fn remove_subtree(diagram: &mut Diagram, id: CanvasId) -> Vec<CanvasId> {
    if id.is_root() || diagram.canvas(id).is_none() {
        return Vec::new();
    }
    let owner = diagram.canvas(id).and_then(|c| c.owner);

    let mut doomed = descendants(diagram, id);
    doomed.reverse();
    doomed.push(id);
    for c in &doomed {
        diagram.remove_canvas(*c);
    }

    if let Some(owner) = owner {
        let attached = diagram.canvas(owner.canvas).is_some_and(|p| {
            p.children.contains(&id) || p.node(owner.node).is_some_and(|n| n.canvas == Some(id))
        });
        if attached && let Some(parent) = diagram.canvas_mut(owner.canvas) {
            parent.children.retain(|c| *c != id);
            if let Some(node) = parent.node_mut(owner.node)
                && node.canvas == Some(id)
            {
                node.canvas = None;
            }
        }
    }
    doomed
}

// ─── Validation ───────────────────────────────────────────────────────────

/// Check that the canvas arena is one rooted, acyclic tree with consistent
/// owner/child links and that every connection's endpoints live in its canvas.
///
/// # Errors
/// Returns `CoreError::InvalidTree` describing the first violation found.
pub fn validate(diagram: &Diagram) -> Result<(), CoreError> {
    let invalid = |msg: String| Err(CoreError::InvalidTree(msg));

    let Some(root) = diagram.canvas(CanvasId::ROOT) else {
        return invalid("missing root canvas".into());
    };
    if root.owner.is_some() {
        return invalid("root canvas has an owner".into());
    }

    for (&id, canvas) in diagram.canvases.iter() {
        if canvas.id != id {
            return invalid(format!("canvas stored under {id} claims id {}", canvas.id));
        }

        if let Some(owner) = canvas.owner {
            let Some(parent) = diagram.canvas(owner.canvas) else {
                return invalid(format!("{id} is owned by unknown canvas {}", owner.canvas));
            };
            let Some(node) = parent.node(owner.node) else {
                return invalid(format!("{id} is owned by unknown node {}", owner.node));
            };
            if node.canvas != Some(id) {
                return invalid(format!("owner {} of {id} does not link back", owner.node));
            }
            if parent.children.iter().filter(|c| **c == id).count() != 1 {
                return invalid(format!("{} must list {id} exactly once", owner.canvas));
            }
        } else if !id.is_root() {
            return invalid(format!("{id} has no owner"));
        }

        for child in &canvas.children {
            match diagram.canvas(*child).and_then(|c| c.owner) {
                Some(owner) if owner.canvas == id => {}
                _ => return invalid(format!("{id} lists {child} which it does not own")),
            }
        }

        for node in canvas.nodes.values() {
            if let Some(nested) = node.canvas {
                match diagram.canvas(nested).and_then(|c| c.owner) {
                    Some(owner) if owner.canvas == id && owner.node == node.id => {}
                    _ => {
                        return invalid(format!(
                            "node {} links to {nested} which it does not own",
                            node.id
                        ));
                    }
                }
            }
        }

        for conn in &canvas.connections {
            if !canvas.contains(conn.from) || !canvas.contains(conn.to) {
                return invalid(format!("connection {} dangles in {id}", conn.id));
            }
        }
    }

    if has_ownership_cycle(diagram) {
        return invalid("canvas ownership contains a cycle".into());
    }

    Ok(())
}

/// True if following owner links from some canvas leads back to it.
pub fn has_ownership_cycle(diagram: &Diagram) -> bool {
    let mut graph: DiGraphMap<CanvasId, ()> = DiGraphMap::new();
    for (&id, canvas) in diagram.canvases.iter() {
        graph.add_node(id);
        if let Some(owner) = canvas.owner {
            graph.add_edge(owner.canvas, id, ());
        }
    }
    is_cyclic_directed(&graph)
}

// ─── X-ray ────────────────────────────────────────────────────────────────

/// Opacity multiplier for content `level` nesting steps below the viewer.
///
/// Within the configured table: `table[level] * base`. Beyond it:
/// `max(floor, 0.5^level) * base`. Once the exponential has reached the
/// floor, deeper levels keep shrinking as `floor / (1 + steps past the floor)`
/// so the result never reaches zero.
///
/// Computed in `f64`, where every `u32` level is exact, and rounded once.
/// The `f32` result is strictly decreasing while the steps past the floor
/// stay below 2^22 and non-increasing beyond.
pub fn calculate_level_opacity(level: u32, base: f32, config: &EngineConfig) -> f32 {
    let table = &config.opacity_table;
    let floor = f64::from(config.opacity_floor);

    let factor = if let Some(v) = table.get(level as usize) {
        f64::from(*v)
    } else {
        let exp = 0.5f64.powf(f64::from(level));
        if exp > floor {
            exp
        } else {
            let knee = (table.len() as u32).max((1.0 / floor).log2().ceil() as u32);
            floor / (1.0 + f64::from(level.saturating_sub(knee)))
        }
    };
    (factor * f64::from(base)) as f32
}

/// Layers composited for an X-ray view of `active`: the active canvas at full
/// opacity plus descendants up to `xray_level` steps deeper, each at its
/// relative-depth opacity. Pre-order, so owners precede their contents.
pub fn visible_layers(
    diagram: &Diagram,
    active: CanvasId,
    xray_level: u32,
    config: &EngineConfig,
) -> Vec<(CanvasId, f32)> {
    if diagram.canvas(active).is_none() {
        return Vec::new();
    }
    let mut layers = vec![(active, 1.0)];
    if xray_level == 0 {
        return layers;
    }

    let base = depth(diagram, active);
    for id in descendants(diagram, active) {
        let relative = depth(diagram, id).saturating_sub(base);
        if relative <= xray_level {
            layers.push((id, calculate_level_opacity(relative, 1.0, config)));
        }
    }
    layers
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeId;
    use crate::model::{Canvas, Node, NodeRef, ShapeKind};

    /// root ─ box → c1 ─ inner → c2
    fn nested_diagram() -> (Diagram, CanvasId, CanvasId) {
        let mut d = Diagram::new();
        let c1 = d.allocate_canvas_id();
        let c2 = d.allocate_canvas_id();

        let mut outer = Node::new(NodeId::intern("box"), ShapeKind::Rect, "Box");
        outer.position = Point::new(100.0, 50.0);
        outer.canvas = Some(c1);
        let mut inner = Node::new(NodeId::intern("inner"), ShapeKind::Rect, "Inner");
        inner.position = Point::new(10.0, 5.0);
        inner.canvas = Some(c2);

        let root = d.canvas_mut(CanvasId::ROOT).unwrap();
        root.insert_node(outer);
        root.children.push(c1);

        let mut canvas1 = Canvas::new(c1, Some(NodeRef::new(CanvasId::ROOT, NodeId::intern("box"))));
        canvas1.insert_node(inner);
        canvas1.children.push(c2);
        d.insert_canvas(canvas1);
        d.insert_canvas(Canvas::new(c2, Some(NodeRef::new(c1, NodeId::intern("inner")))));

        recompute_levels(&mut d);
        (d, c1, c2)
    }

    #[test]
    fn levels_and_ancestry() {
        let (d, c1, c2) = nested_diagram();
        assert_eq!(d.canvas(c2).unwrap().level, 2);
        assert_eq!(ancestors(&d, c2), vec![c1, CanvasId::ROOT]);
        assert_eq!(descendants(&d, CanvasId::ROOT), vec![c1, c2]);
        assert!(is_ancestor_of(&d, CanvasId::ROOT, c2));
        assert!(!is_ancestor_of(&d, c2, c1));
        assert!(!is_ancestor_of(&d, c1, c1));
    }

    #[test]
    fn absolute_origin_sums_owner_positions() {
        let (d, c1, c2) = nested_diagram();
        assert_eq!(absolute_origin(&d, CanvasId::ROOT), Point::ZERO);
        assert_eq!(absolute_origin(&d, c1), Point::new(100.0, 50.0));
        assert_eq!(absolute_origin(&d, c2), Point::new(110.0, 55.0));
    }

    #[test]
    fn validate_accepts_tree() {
        let (d, _, _) = nested_diagram();
        validate(&d).unwrap();
    }

    #[test]
    fn validate_rejects_broken_back_link() {
        let (mut d, c1, _) = nested_diagram();
        d.canvas_mut(CanvasId::ROOT)
            .unwrap()
            .node_mut(NodeId::intern("box"))
            .unwrap()
            .canvas = None;
        let err = validate(&d).unwrap_err().to_string();
        assert!(err.contains(&c1.to_string()), "{err}");
    }

    #[test]
    fn validate_rejects_cycle() {
        let (mut d, c1, c2) = nested_diagram();
        // Make c1 claim to be owned by a node in c2, and that node own c1.
        let mut loop_node = Node::new(NodeId::intern("loop"), ShapeKind::Rect, "");
        loop_node.canvas = Some(c1);
        let canvas2 = d.canvas_mut(c2).unwrap();
        canvas2.insert_node(loop_node);
        canvas2.children.push(c1);
        d.canvas_mut(c1).unwrap().owner = Some(NodeRef::new(c2, NodeId::intern("loop")));
        let root = d.canvas_mut(CanvasId::ROOT).unwrap();
        root.children.clear();
        root.node_mut(NodeId::intern("box")).unwrap().canvas = None;

        assert!(validate(&d).is_err());
    }

    #[test]
    fn remove_subtree_detaches_owner() {
        let (mut d, c1, c2) = nested_diagram();
        let removed = remove_subtree(&mut d, c1);
        assert_eq!(removed, vec![c2, c1]);
        assert!(d.canvas(c1).is_none());
        let root = d.root().unwrap();
        assert!(root.children.is_empty());
        assert_eq!(root.node(NodeId::intern("box")).unwrap().canvas, None);
        validate(&d).unwrap();
        assert!(remove_subtree(&mut d, CanvasId::ROOT).is_empty());
    }

    #[test]
    fn opacity_table_then_exponential() {
        let config = EngineConfig::default();
        assert_eq!(calculate_level_opacity(0, 1.0, &config), 1.0);
        assert_eq!(calculate_level_opacity(1, 1.0, &config), 0.6);
        assert_eq!(calculate_level_opacity(3, 0.5, &config), 0.1);
        assert_eq!(calculate_level_opacity(4, 1.0, &config), 0.0625);
        assert_eq!(calculate_level_opacity(7, 1.0, &config), 0.01);
    }

    #[test]
    fn opacity_strictly_decreasing_and_positive() {
        let config = EngineConfig::default();
        let mut prev = f32::INFINITY;
        for level in 0..4096 {
            let v = calculate_level_opacity(level, 1.0, &config);
            assert!(v > 0.0, "level {level} gave {v}");
            assert!(v < prev, "level {level}: {v} !< {prev}");
            prev = v;
        }
        assert!(calculate_level_opacity(u32::MAX, 1.0, &config) > 0.0);
    }

    #[test]
    fn deep_levels_round_once() {
        let config = EngineConfig::default();
        let floor = f64::from(config.opacity_floor);
        // Levels past 2^24, where `1 + level` is no longer exact in f32.
        for level in [(1u32 << 24) + 7, (1 << 25) + 1, (1 << 25) + 2, u32::MAX - 1, u32::MAX] {
            let want = (floor / (1.0 + f64::from(level - 7))) as f32;
            assert_eq!(calculate_level_opacity(level, 1.0, &config), want, "level {level}");
        }

        let mut prev = f32::INFINITY;
        for level in (1u32 << 22)..(1 << 22) + 64 {
            let v = calculate_level_opacity(level, 1.0, &config);
            assert!(v < prev, "level {level}: {v} !< {prev}");
            prev = v;
        }
        let mut prev = f32::INFINITY;
        for level in (u32::MAX - 64)..=u32::MAX {
            let v = calculate_level_opacity(level, 1.0, &config);
            assert!(v > 0.0 && v <= prev, "level {level}: {v} > {prev}");
            prev = v;
        }
    }

    #[test]
    fn visible_layers_respect_xray_depth() {
        let (d, c1, c2) = nested_diagram();
        let config = EngineConfig::default();
        assert_eq!(visible_layers(&d, CanvasId::ROOT, 0, &config), vec![(CanvasId::ROOT, 1.0)]);
        assert_eq!(
            visible_layers(&d, CanvasId::ROOT, 1, &config),
            vec![(CanvasId::ROOT, 1.0), (c1, 0.6)]
        );
        assert_eq!(
            visible_layers(&d, c1, 3, &config),
            vec![(c1, 1.0), (c2, 0.6)]
        );
    }
}
