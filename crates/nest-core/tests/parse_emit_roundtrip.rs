//! Integration tests: parse → reconcile → emit round-trip.
//!
//! Canonical text must come back byte-for-byte; hand-written text must
//! normalize to canonical form and then stay fixed.

use nest_core::tree::validate;
use nest_core::*;
use pretty_assertions::assert_eq;

// ─── Helpers ─────────────────────────────────────────────────────────────

fn load(text: &str) -> Diagram {
    let config = EngineConfig::default();
    let parsed = LineSyntax.parse(text).expect("parse failed");
    let mut diagram = reconcile(
        &Diagram::new(),
        &parsed,
        &GridLayout::from_config(&config),
        &config,
    );
    diagram.source = text.into();
    diagram
}

fn roundtrip(text: &str) -> String {
    LineSyntax.serialize(&load(text))
}

// ─── Fixture-based tests ─────────────────────────────────────────────────

#[test]
fn roundtrip_without_overrides() {
    let input = include_str!("fixtures/flowchart.nest");
    assert_eq!(roundtrip(input), input);
}

#[test]
fn roundtrip_with_overrides_and_nesting() {
    let input = include_str!("fixtures/nested.nest");
    assert_eq!(roundtrip(input), input);
}

#[test]
fn messy_input_normalizes_then_is_stable() {
    let input = include_str!("fixtures/messy.nest");
    let once = roundtrip(input);
    assert_eq!(
        once,
        "a\nb{Decide}\nc\na --> b\nb -.-> c : maybe\n%% pos c 10.5 -4\n"
    );
    assert_eq!(roundtrip(&once), once);
}

// ─── Structure ───────────────────────────────────────────────────────────

#[test]
fn nested_fixture_builds_valid_tree() {
    let diagram = load(include_str!("fixtures/nested.nest"));
    validate(&diagram).unwrap();

    let api = diagram.root().unwrap().node(NodeId::intern("api")).unwrap();
    assert_eq!(api.position, Point::new(200.0, 100.0));
    assert_eq!(api.size, Size::new(400.0, 300.0));

    let level1 = diagram.canvas(api.canvas.unwrap()).unwrap();
    assert_eq!(level1.level, 1);
    assert_eq!(
        level1.node(NodeId::intern("auth")).unwrap().position,
        Point::new(20.0, 30.0)
    );

    let users = level1.node(NodeId::intern("users")).unwrap();
    let level2 = diagram.canvas(users.canvas.unwrap()).unwrap();
    assert_eq!(level2.level, 2);
    assert_eq!(level2.connections.len(), 1);
    assert_eq!(
        tree::ancestors(&diagram, level2.id),
        vec![level1.id, CanvasId::ROOT]
    );
}

#[test]
fn client_style_override_applies() {
    let diagram = load(include_str!("fixtures/nested.nest"));
    let client = diagram.root().unwrap().node(NodeId::intern("client")).unwrap();
    assert_eq!(client.style.fill, Color::from_hex("#FFEEAA"));
    assert_eq!(client.style.stroke_width, Some(2.0));
}

#[test]
fn parse_error_points_at_line() {
    let err = LineSyntax
        .parse("a[A]\nb[B\n")
        .expect_err("unterminated label must fail");
    assert_eq!(err.line, 2);
}
