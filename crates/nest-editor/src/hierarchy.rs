//! Canvas hierarchy operations on top of the store.
//!
//! Every operation that changes something is one history step, navigation
//! included, so undo walks back through the canvases the user visited.
//! Bus notifications come from the engine's store bridge.

use crate::error::{EngineError, EngineResult};
use crate::history::History;
use crate::store::Store;
use nest_core::tree::{self, absolute_origin};
use nest_core::{Canvas, CanvasId, EngineConfig, NodeId, NodeRef, Snapshot};
use std::collections::BTreeSet;
use std::rc::Rc;

pub struct Hierarchy {
    store: Rc<Store>,
    history: Rc<History>,
    config: EngineConfig,
}

impl Hierarchy {
    pub fn new(store: Rc<Store>, history: Rc<History>, config: EngineConfig) -> Self {
        Self {
            store,
            history,
            config,
        }
    }

    // ─── Structure ────────────────────────────────────────────────────────

    /// Give `owner` a nested canvas, or return the one it already owns.
    pub fn register(&self, owner: NodeRef) -> EngineResult<CanvasId> {
        let mut created = None;
        self.history.transact("register-canvas", |s: &Snapshot| -> EngineResult<Snapshot> {
            let node = s.diagram.node(owner).ok_or(EngineError::UnknownNode {
                canvas: owner.canvas,
                node: owner.node,
            })?;
            if let Some(existing) = node.canvas {
                created = Some(existing);
                return Ok(s.clone());
            }

            let mut next = s.clone();
            let id = next.diagram.allocate_canvas_id();
            next.diagram.insert_canvas(Canvas::new(id, Some(owner)));
            let parent = next
                .diagram
                .canvas_mut(owner.canvas)
                .ok_or(EngineError::UnknownCanvas(owner.canvas))?;
            parent.children.push(id);
            if let Some(node) = parent.node_mut(owner.node) {
                node.canvas = Some(id);
            }
            created = Some(id);
            Ok(next)
        })?;
        created.ok_or(EngineError::UnknownCanvas(owner.canvas))
    }

    /// Remove canvas `id` and everything below it, deepest first. If the
    /// active canvas was inside the removed subtree, the removed canvas's
    /// parent becomes active.
    pub fn unregister(&self, id: CanvasId) -> EngineResult<Vec<CanvasId>> {
        if id.is_root() {
            return Err(EngineError::RootCanvas);
        }
        let mut removed = Vec::new();
        self.history.transact("unregister-canvas", |s: &Snapshot| -> EngineResult<Snapshot> {
            let parent = s
                .diagram
                .canvas(id)
                .ok_or(EngineError::UnknownCanvas(id))?
                .parent()
                .unwrap_or(CanvasId::ROOT);
            let mut next = s.clone();
            removed = tree::remove_subtree(&mut next.diagram, id);
            if removed.contains(&next.ui.active_canvas) {
                next.switch_canvas(parent);
            }
            Ok(next)
        })?;
        log::debug!("unregistered {removed:?}");
        Ok(removed)
    }

    /// Move `ids` from `source` to `target`, keeping their on-screen place.
    ///
    /// Positions are re-expressed in the target frame, connections between
    /// two moved nodes come along, connections left spanning both canvases
    /// are dropped and nested canvases follow their owners. Nothing changes
    /// if any id is unknown, already present in `target`, or owns `target`
    /// (directly or further up).
    pub fn transfer_nodes(&self, ids: &[NodeId], source: CanvasId, target: CanvasId) -> EngineResult<()> {
        self.history
            .transact("transfer-nodes", |s: &Snapshot| transfer(s, ids, source, target))?;
        Ok(())
    }

    // ─── Queries ──────────────────────────────────────────────────────────

    pub fn level(&self, id: CanvasId) -> Option<u32> {
        self.store.get().diagram.canvas(id).map(|c| c.level)
    }

    pub fn ancestors(&self, id: CanvasId) -> Vec<CanvasId> {
        tree::ancestors(&self.store.get().diagram, id)
    }

    pub fn descendants(&self, id: CanvasId) -> Vec<CanvasId> {
        tree::descendants(&self.store.get().diagram, id)
    }

    pub fn is_ancestor_of(&self, a: CanvasId, b: CanvasId) -> bool {
        tree::is_ancestor_of(&self.store.get().diagram, a, b)
    }

    pub fn calculate_level_opacity(&self, level: u32, base: f32) -> f32 {
        tree::calculate_level_opacity(level, base, &self.config)
    }

    /// `(canvas, opacity)` layers for the current active canvas and X-ray level.
    pub fn visible_layers(&self) -> Vec<(CanvasId, f32)> {
        let s = self.store.get();
        tree::visible_layers(&s.diagram, s.ui.active_canvas, s.ui.xray_level, &self.config)
    }

    // ─── Navigation ───────────────────────────────────────────────────────

    /// Switch the active canvas; the selection is cleared and each canvas
    /// keeps its own pan/zoom.
    pub fn set_active_canvas(&self, id: CanvasId) -> EngineResult<()> {
        self.history.transact("activate-canvas", |s: &Snapshot| -> EngineResult<Snapshot> {
            if s.diagram.canvas(id).is_none() {
                return Err(EngineError::UnknownCanvas(id));
            }
            if s.ui.active_canvas == id {
                return Ok(s.clone());
            }
            let mut next = s.clone();
            next.switch_canvas(id);
            Ok(next)
        })?;
        Ok(())
    }

    /// Make the nested canvas of `node` (in the active canvas) active.
    pub fn enter(&self, node: NodeId) -> EngineResult<CanvasId> {
        let s = self.store.get();
        let at = NodeRef::new(s.ui.active_canvas, node);
        let nested = s
            .diagram
            .node(at)
            .ok_or(EngineError::UnknownNode {
                canvas: at.canvas,
                node,
            })?
            .canvas
            .ok_or(EngineError::UnknownCanvas(at.canvas))?;
        self.set_active_canvas(nested)?;
        Ok(nested)
    }

    /// Make the parent of the active canvas active. No-op at the root.
    pub fn exit(&self) -> EngineResult<CanvasId> {
        let s = self.store.get();
        let parent = s
            .active_canvas()
            .and_then(Canvas::parent)
            .unwrap_or(CanvasId::ROOT);
        self.set_active_canvas(parent)?;
        Ok(parent)
    }

    /// 0 turns X-ray off.
    pub fn set_xray_level(&self, level: u32) -> EngineResult<()> {
        self.history.transact("xray", |s: &Snapshot| -> EngineResult<Snapshot> {
            let mut next = s.clone();
            if next.ui.xray_level != level {
                next.ui_mut().xray_level = level;
            }
            Ok(next)
        })?;
        Ok(())
    }
}

fn transfer(s: &Snapshot, ids: &[NodeId], source: CanvasId, target: CanvasId) -> EngineResult<Snapshot> {
    let diagram = &s.diagram;
    let src = diagram.canvas(source).ok_or(EngineError::UnknownCanvas(source))?;
    let tgt = diagram.canvas(target).ok_or(EngineError::UnknownCanvas(target))?;

    let mut moving = BTreeSet::new();
    for &id in ids {
        let node = src.node(id).ok_or(EngineError::UnknownNode {
            canvas: source,
            node: id,
        })?;
        if let Some(nested) = node.canvas
            && (nested == target || tree::is_ancestor_of(diagram, nested, target))
        {
            return Err(EngineError::Cycle { node: id, target });
        }
        if source != target && tgt.contains(id) {
            return Err(EngineError::DuplicateId {
                canvas: target,
                node: id,
            });
        }
        moving.insert(id);
    }
    if source == target || moving.is_empty() {
        return Ok(s.clone());
    }

    let offset = absolute_origin(diagram, source) - absolute_origin(diagram, target);
    let carried: Vec<_> = src
        .connections
        .iter()
        .filter(|c| moving.contains(&c.from) && moving.contains(&c.to))
        .cloned()
        .collect();
    let mut in_order: Vec<NodeId> = moving.iter().copied().collect();
    in_order.sort_by_key(|id| src.node(*id).map(|n| n.order));

    let mut next = s.clone();
    let mut moved = Vec::new();
    let src_mut = next
        .diagram
        .canvas_mut(source)
        .ok_or(EngineError::UnknownCanvas(source))?;
    for id in &in_order {
        if let Some((node, _pruned)) = src_mut.remove_node(*id) {
            if let Some(nested) = node.canvas {
                src_mut.children.retain(|c| *c != nested);
            }
            let ov = src_mut.overrides.remove(id).unwrap_or_default();
            moved.push((node, ov));
        }
    }

    let tgt_mut = next
        .diagram
        .canvas_mut(target)
        .ok_or(EngineError::UnknownCanvas(target))?;
    let mut nested_owners = Vec::new();
    for (mut node, mut ov) in moved {
        node.position = node.position + offset;
        ov.position = Some(node.position);
        if let Some(nested) = node.canvas {
            tgt_mut.children.push(nested);
            nested_owners.push((nested, node.id));
        }
        tgt_mut.overrides.insert(node.id, ov);
        tgt_mut.insert_node(node);
    }
    for mut conn in carried {
        conn.id = tgt_mut.next_connection_id(conn.from, conn.to);
        tgt_mut.connections.push(conn);
    }

    for (nested, owner) in nested_owners {
        if let Some(canvas) = next.diagram.canvas_mut(nested) {
            canvas.owner = Some(NodeRef::new(target, owner));
        }
    }
    log::debug!("transferred {} node(s) {source} -> {target}", in_order.len());
    Ok(next)
}
