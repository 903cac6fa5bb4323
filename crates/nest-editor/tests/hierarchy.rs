//! Integration tests: canvas hierarchy, navigation and X-ray.

use nest_core::{CanvasId, EngineConfig, NodeId, NodeRef, Point, ShapeKind};
use nest_editor::{Engine, EngineError, Payload, topics};
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;

const ROOT: CanvasId = CanvasId::ROOT;

fn id(s: &str) -> NodeId {
    NodeId::intern(s)
}

fn events(engine: &Engine, topic: &str) -> Rc<RefCell<Vec<Payload>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    engine.bus().subscribe(topic, move |payload| {
        sink.borrow_mut().push(payload.clone());
        Ok(())
    });
    seen
}

/// `container` at (100, 100) owning an empty canvas, `item` at (150, 130).
fn container_and_item() -> (Engine, NodeRef, NodeRef, CanvasId) {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let container = engine
        .add_node(ROOT, ShapeKind::Rect, Some("Container"), Some(Point::new(100.0, 100.0)))
        .unwrap();
    let item = engine
        .add_node(ROOT, ShapeKind::Round, Some("Item"), Some(Point::new(150.0, 130.0)))
        .unwrap();
    let nested = engine.create_nested_canvas(container).unwrap();
    (engine, container, item, nested)
}

// ─── Structure ──────────────────────────────────────────────────────────

#[test]
fn register_is_idempotent_and_publishes_once() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let registered = events(&engine, topics::CANVAS_REGISTERED);
    let owner = engine.add_node(ROOT, ShapeKind::Rect, None, None).unwrap();

    let first = engine.create_nested_canvas(owner).unwrap();
    let second = engine.create_nested_canvas(owner).unwrap();

    assert_eq!(first, second);
    assert_eq!(*registered.borrow(), vec![Payload::Canvas(first)]);
    assert_eq!(engine.hierarchy().level(first), Some(1));
    assert_eq!(engine.hierarchy().ancestors(first), vec![ROOT]);
}

#[test]
fn nesting_into_container_translates_positions() {
    let (engine, container, item, nested) = container_and_item();

    engine.transfer_nodes(&[item.node], ROOT, nested).unwrap();

    let s = engine.snapshot();
    assert!(s.diagram.node(item).is_none());
    let moved = s.diagram.node(NodeRef::new(nested, item.node)).unwrap();
    assert_eq!(moved.position, Point::new(50.0, 30.0));
    assert_eq!(s.diagram.canvas(nested).unwrap().level, 1);
    assert_eq!(
        s.diagram.node(container).unwrap().canvas,
        Some(nested)
    );

    let text = engine.text();
    assert!(text.contains("  n2(Item)"), "text was:\n{text}");

    engine.undo().unwrap();
    assert_eq!(
        engine.snapshot().diagram.node(item).unwrap().position,
        Point::new(150.0, 130.0)
    );
}

#[test]
fn transfer_keeps_inner_connections_and_drops_split_ones() {
    let (engine, container, item, nested) = container_and_item();
    let other = engine.add_node(ROOT, ShapeKind::Rect, None, None).unwrap();
    engine.add_connection(ROOT, item.node, other.node, None).unwrap();
    engine.add_connection(ROOT, container.node, item.node, None).unwrap();
    engine.add_connection(ROOT, item.node, item.node, Some("self")).unwrap();

    engine.transfer_nodes(&[item.node], ROOT, nested).unwrap();

    let s = engine.snapshot();
    assert!(s.diagram.root().unwrap().connections.is_empty());
    let inner = &s.diagram.canvas(nested).unwrap().connections;
    assert_eq!(inner.len(), 1);
    assert_eq!(inner[0].label.as_deref(), Some("self"));
}

#[test]
fn transfer_into_own_canvas_is_rejected() {
    let (engine, container, _item, nested) = container_and_item();
    let before = engine.snapshot();
    let errors = events(&engine, topics::ERROR);

    let err = engine
        .transfer_nodes(&[container.node], ROOT, nested)
        .unwrap_err();

    assert!(matches!(err, EngineError::Cycle { .. }));
    assert!(engine.snapshot().same_as(&before));
    assert_eq!(errors.borrow().len(), 1);
}

#[test]
fn transfer_rejects_duplicate_ids() {
    let (engine, _container, item, nested) = container_and_item();
    // Give the nested canvas a node with the same id as `item`.
    let text = engine.text().replace("{\n}", "{\n  n2\n}");
    engine.set_text(&text).unwrap();
    assert!(engine.snapshot().diagram.canvas(nested).unwrap().contains(item.node));

    let err = engine.transfer_nodes(&[item.node], ROOT, nested).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateId { .. }));
}

#[test]
fn unregister_moves_active_canvas_to_parent() {
    let (engine, _container, _item, nested) = container_and_item();
    let unregistered = events(&engine, topics::CANVAS_UNREGISTERED);
    engine.set_active_canvas(nested).unwrap();

    let removed = engine.remove_nested_canvas(nested).unwrap();

    assert_eq!(removed, vec![nested]);
    assert_eq!(engine.snapshot().ui.active_canvas, ROOT);
    assert_eq!(*unregistered.borrow(), vec![Payload::Canvas(nested)]);
    assert!(matches!(
        engine.remove_nested_canvas(ROOT),
        Err(EngineError::RootCanvas)
    ));
}

#[test]
fn deleting_owner_removes_nested_subtree() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    engine.set_text(include_str!("fixtures/system.nest")).unwrap();
    let unregistered = events(&engine, topics::CANVAS_UNREGISTERED);
    assert_eq!(engine.snapshot().diagram.canvases.len(), 3);

    engine.delete_entities(ROOT, &[id("api")], &[]).unwrap();

    assert_eq!(engine.snapshot().diagram.canvases.len(), 1);
    assert_eq!(unregistered.borrow().len(), 2);
}

// ─── Navigation ─────────────────────────────────────────────────────────

#[test]
fn enter_and_exit_publish_activation() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    engine.set_text(include_str!("fixtures/system.nest")).unwrap();
    let activated = events(&engine, topics::CANVAS_ACTIVATED);

    let api = engine.enter_canvas(id("api")).unwrap();
    let users = engine.enter_canvas(id("users")).unwrap();
    assert_eq!(engine.hierarchy().level(users), Some(2));
    assert!(engine.hierarchy().is_ancestor_of(api, users));

    assert_eq!(engine.exit_canvas().unwrap(), api);
    assert_eq!(engine.exit_canvas().unwrap(), ROOT);
    assert_eq!(engine.exit_canvas().unwrap(), ROOT);

    assert_eq!(
        *activated.borrow(),
        vec![
            Payload::Canvas(api),
            Payload::Canvas(users),
            Payload::Canvas(api),
            Payload::Canvas(ROOT),
        ]
    );
    // One step for the text, one per canvas switch.
    assert_eq!(engine.history().entries().len(), 5);
    engine.undo().unwrap();
    assert_eq!(engine.snapshot().ui.active_canvas, api);
}

#[test]
fn each_canvas_keeps_its_own_pan_and_zoom() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    engine.set_text(include_str!("fixtures/system.nest")).unwrap();
    let view = |e: &Engine| {
        let s = e.snapshot();
        (s.ui.zoom, s.ui.pan)
    };

    engine.zoom_at(Point::new(40.0, 40.0), 2.0).unwrap();
    engine.pan_by(15.0, -25.0).unwrap();
    let root_view = view(&engine);

    engine.enter_canvas(id("api")).unwrap();
    assert_eq!(view(&engine), (1.0, Point::ZERO));
    engine.pan_by(-300.0, 120.0).unwrap();
    engine.zoom_at(Point::ZERO, 0.5).unwrap();
    let api_view = view(&engine);
    assert_ne!(api_view, root_view);

    engine.exit_canvas().unwrap();
    assert_eq!(view(&engine), root_view);

    engine.enter_canvas(id("api")).unwrap();
    assert_eq!(view(&engine), api_view);
}

#[test]
fn activating_unknown_canvas_fails() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    assert!(matches!(
        engine.set_active_canvas(CanvasId(9)),
        Err(EngineError::UnknownCanvas(CanvasId(9)))
    ));
}

// ─── X-ray ──────────────────────────────────────────────────────────────

#[test]
fn xray_levels_publish_and_fade_by_depth() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    engine.set_text(include_str!("fixtures/system.nest")).unwrap();
    let on = events(&engine, topics::XRAY_ACTIVATED);
    let off = events(&engine, topics::XRAY_DEACTIVATED);

    assert_eq!(engine.hierarchy().visible_layers().len(), 1);

    engine.set_xray_level(1).unwrap();
    let layers = engine.hierarchy().visible_layers();
    assert_eq!(layers.len(), 2);
    assert_eq!(layers[1].1, 0.6);

    engine.set_xray_level(2).unwrap();
    let opacities: Vec<f32> = engine
        .hierarchy()
        .visible_layers()
        .iter()
        .map(|(_, o)| *o)
        .collect();
    assert_eq!(opacities, vec![1.0, 0.6, 0.35]);

    engine.set_xray_level(0).unwrap();
    assert_eq!(
        *on.borrow(),
        vec![Payload::Xray { level: 1 }, Payload::Xray { level: 2 }]
    );
    assert_eq!(*off.borrow(), vec![Payload::Xray { level: 0 }]);
}

#[test]
fn level_opacity_strictly_decreases() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let h = engine.hierarchy();
    let values: Vec<f32> = (0..20).map(|l| h.calculate_level_opacity(l, 1.0)).collect();
    assert_eq!(values[0], 1.0);
    for pair in values.windows(2) {
        assert!(pair[1] < pair[0], "{values:?}");
        assert!(pair[1] > 0.0);
    }
    assert_eq!(h.calculate_level_opacity(1, 0.5), 0.3);
}
