//! Bidirectional text ↔ visual synchronization.
//!
//! **Text → visual** (`apply_text`): parse, reconcile the candidate tree into
//! the current diagram by stable id, commit as one `text-edit` history step.
//! Typing goes through `text_input`, which debounces: the parse runs once the
//! input has been quiet for the configured delay.
//!
//! **Visual → text**: a store middleware re-serializes `diagram.source`
//! whenever a commit changes the canvases without touching the source, so
//! every visual edit carries its text in the same snapshot.
//!
//! A `Cell<bool>` lock is held while text is being applied; the middleware
//! and the engine's `sync:text` bridge stay quiet under it, so neither
//! direction triggers the other.
//!
//! When visual edits land while typed text is still pending, the pending
//! text is merged on top of them: node positions, sizes and styles that were
//! changed visually since typing started win over the text's overlays;
//! labels and structure come from the text. If the pending text does not
//! parse, the visual edits are written back to the text instead.

use crate::bus::{EventBus, Payload, topics};
use crate::debounce::Debouncer;
use crate::error::{EngineResult, StoreError};
use crate::history::History;
use crate::store::Store;
use nest_core::{
    CanvasId, Diagram, DiagramSyntax, EngineConfig, Layout, ParsedCanvas, ParsedDiagram, Snapshot,
    reconcile,
};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;

pub struct SyncEngine {
    store: Rc<Store>,
    history: Rc<History>,
    bus: EventBus,
    syntax: Box<dyn DiagramSyntax>,
    layout: Rc<dyn Layout>,
    config: EngineConfig,
    lock: Cell<bool>,
    pending: RefCell<Option<String>>,
    debouncer: Debouncer,
    /// Diagram when the pending text started; conflict reference.
    baseline: RefCell<Option<Diagram>>,
    visual_dirty: Cell<bool>,
}

impl SyncEngine {
    /// Build the engine and hook its serializer into `store`.
    pub fn install(
        store: Rc<Store>,
        history: Rc<History>,
        bus: EventBus,
        syntax: Box<dyn DiagramSyntax>,
        layout: Rc<dyn Layout>,
        config: EngineConfig,
    ) -> Rc<Self> {
        let sync = Rc::new(Self {
            debouncer: Debouncer::new(config.debounce()),
            store: store.clone(),
            history,
            bus,
            syntax,
            layout,
            config,
            lock: Cell::new(false),
            pending: RefCell::new(None),
            baseline: RefCell::new(None),
            visual_dirty: Cell::new(false),
        });

        let weak: Weak<Self> = Rc::downgrade(&sync);
        store.add_middleware(move |prev, next| match weak.upgrade() {
            Some(sync) => sync.serialize_visual(prev, next),
            None => Ok(next),
        });
        sync
    }

    pub fn is_locked(&self) -> bool {
        self.lock.get()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.borrow().is_some()
    }

    /// When the pending text will be applied, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    pub fn syntax(&self) -> &dyn DiagramSyntax {
        self.syntax.as_ref()
    }

    // ─── Visual → text ────────────────────────────────────────────────────

    fn serialize_visual(&self, prev: &Snapshot, mut next: Snapshot) -> Result<Snapshot, StoreError> {
        if self.lock.get() || Arc::ptr_eq(&prev.diagram.canvases, &next.diagram.canvases) {
            return Ok(next);
        }
        if prev.diagram.source != next.diagram.source {
            // Restores and loads bring their own text.
            return Ok(next);
        }
        if self.has_pending() {
            self.visual_dirty.set(true);
            return Ok(next);
        }
        let text = self.syntax.serialize(&next.diagram);
        log::debug!("sync visual -> text ({} bytes)", text.len());
        next.diagram.source = Arc::from(text);
        Ok(next)
    }

    // ─── Text → visual ────────────────────────────────────────────────────

    /// Record a keystroke's worth of text. The parse runs on the first
    /// `flush` at least `debounce_ms` after the last call.
    pub fn text_input(&self, text: &str, now: Instant) {
        let first = self.pending.borrow_mut().replace(text.to_string()).is_none();
        if first {
            *self.baseline.borrow_mut() = Some(self.store.get().diagram);
        }
        self.debouncer.schedule(now);
    }

    /// Apply pending text if its quiet period has elapsed.
    pub fn flush(&self, now: Instant) -> EngineResult<bool> {
        if !self.debouncer.fire(now) {
            return Ok(false);
        }
        self.flush_now()
    }

    /// Apply pending text immediately, if there is any.
    pub fn flush_now(&self) -> EngineResult<bool> {
        let pending = self.pending.borrow_mut().take();
        match pending {
            Some(text) => self.apply_text(&text),
            None => Ok(false),
        }
    }

    /// Drop pending text without applying it.
    pub fn cancel(&self) {
        self.debouncer.cancel();
        self.pending.borrow_mut().take();
        self.baseline.borrow_mut().take();
        self.visual_dirty.set(false);
    }

    /// Parse `text` and reconcile it into the diagram as one history step.
    ///
    /// A parse error publishes `sync:diagnostic`, keeps the current diagram
    /// and returns `Ok(false)`.
    pub fn apply_text(&self, text: &str) -> EngineResult<bool> {
        self.debouncer.cancel();
        self.pending.borrow_mut().take();
        let baseline = self.baseline.borrow_mut().take();
        let conflict = self.visual_dirty.replace(false);

        let mut parsed = match self.syntax.parse(text) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::debug!("sync text -> visual failed: {err}");
                if conflict {
                    self.catch_up_source()?;
                }
                self.bus.publish(topics::SYNC_DIAGNOSTIC, Payload::Diagnostic(err));
                return Ok(false);
            }
        };

        self.lock.set(true);
        let result = self
            .history
            .transact("text-edit", |s: &Snapshot| -> EngineResult<Snapshot> {
                if conflict && let Some(baseline) = &baseline {
                    drop_overridden_overlays(&mut parsed, baseline, &s.diagram);
                }
                let mut next = s.clone();
                next.diagram = reconcile(&s.diagram, &parsed, self.layout.as_ref(), &self.config);
                next.diagram.source = if conflict {
                    Arc::from(self.syntax.serialize(&next.diagram))
                } else {
                    Arc::from(text)
                };
                Ok(next)
            });
        self.lock.set(false);
        let changed = result?;

        log::debug!("sync text -> visual (changed: {changed}, merged: {conflict})");
        if conflict {
            let source = self.store.get().diagram.source.to_string();
            self.bus.publish(topics::SYNC_TEXT, Payload::Text(source));
        }
        Ok(changed)
    }

    /// Re-serialize after visual edits whose text was deferred behind a
    /// pending input that never applied. Not recorded; history restores
    /// re-serialize on their own.
    fn catch_up_source(&self) -> EngineResult<()> {
        self.store.update(|s: &Snapshot| -> EngineResult<Snapshot> {
            let mut next = s.clone();
            next.diagram.source = Arc::from(self.syntax.serialize(&s.diagram));
            Ok(next)
        })?;
        Ok(())
    }
}

/// Remove overlay fields from `parsed` wherever the visual value changed
/// between `baseline` and `current`, so the visual edit survives the merge.
fn drop_overridden_overlays(parsed: &mut ParsedDiagram, baseline: &Diagram, current: &Diagram) {
    let mut stack: Vec<(&mut ParsedCanvas, CanvasId)> = vec![(&mut parsed.root, CanvasId::ROOT)];
    while let Some((canvas, id)) = stack.pop() {
        let (Some(now), then) = (current.canvas(id), baseline.canvas(id)) else {
            continue;
        };
        let ParsedCanvas {
            nodes, overrides, ..
        } = canvas;
        for (node_id, ov) in overrides.iter_mut() {
            let (Some(a), Some(b)) = (now.node(*node_id), then.and_then(|c| c.node(*node_id))) else {
                continue;
            };
            if a.position != b.position {
                ov.position = None;
            }
            if a.size != b.size {
                ov.size = None;
            }
            if a.style != b.style {
                ov.style = None;
            }
        }
        for node in nodes {
            if let (Some(nested), Some(owned)) = (
                node.nested.as_mut(),
                now.node(node.id).and_then(|n| n.canvas),
            ) {
                stack.push((nested, owned));
            }
        }
    }
}
