//! Emitter: Diagram → line grammar text.
//!
//! Produces canonical text that round-trips through the parser: nodes in
//! insertion order (nested blocks inline), then connections, then `%%`
//! overlays for every override of a node that still exists.
//!
//! Labels that the plain form cannot carry are written as quoted strings
//! with `\"`, `\\`, `\n`, `\r`, `\t` and `\u{..}` escapes.

use crate::id::CanvasId;
use crate::model::*;
use std::fmt::Write;

/// Emit a `Diagram` as text.
#[must_use]
pub fn emit_diagram(diagram: &Diagram) -> String {
    let mut out = String::with_capacity(1024);
    emit_canvas(&mut out, diagram, CanvasId::ROOT, 0);
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn emit_canvas(out: &mut String, diagram: &Diagram, id: CanvasId, depth: usize) {
    let Some(canvas) = diagram.canvas(id) else {
        return;
    };

    for node in canvas.nodes_in_order() {
        indent(out, depth);
        emit_node_decl(out, node);
        match node.canvas {
            Some(nested) if diagram.canvas(nested).is_some() => {
                out.push_str(" {\n");
                emit_canvas(out, diagram, nested, depth + 1);
                indent(out, depth);
                out.push_str("}\n");
            }
            _ => out.push('\n'),
        }
    }

    for conn in &canvas.connections {
        indent(out, depth);
        let arrow = if conn.style.dashed { "-.->" } else { "-->" };
        let _ = write!(out, "{} {arrow} {}", conn.from, conn.to);
        if let Some(label) = conn.label.as_deref() {
            out.push_str(" : ");
            if is_plain_connection_label(label) {
                out.push_str(label);
            } else {
                write_quoted(out, label);
            }
        }
        out.push('\n');
    }

    for node in canvas.nodes_in_order() {
        if let Some(ov) = canvas.overrides.get(&node.id) {
            emit_overlays(out, node, ov, depth);
        }
    }
}

fn emit_node_decl(out: &mut String, node: &Node) {
    // A rect labelled with its own id is the bare form.
    if node.shape == ShapeKind::Rect && node.label == node.id.as_str() {
        out.push_str(node.id.as_str());
        return;
    }
    let (open, close) = node.shape.delimiters();
    let _ = write!(out, "{}{open}", node.id);
    if is_plain_node_label(&node.label) {
        out.push_str(&node.label);
    } else {
        write_quoted(out, &node.label);
    }
    out.push_str(close);
}

/// Inside shape delimiters: no bracket of any shape, no quote, single line.
fn is_plain_node_label(label: &str) -> bool {
    !label
        .chars()
        .any(|c| matches!(c, '[' | ']' | '(' | ')' | '{' | '}' | '"') || c.is_control())
}

/// After ` : ` the rest of the line is taken trimmed.
fn is_plain_connection_label(label: &str) -> bool {
    !label.is_empty()
        && label.trim() == label
        && !label.starts_with('"')
        && !label.chars().any(char::is_control)
}

fn write_quoted(out: &mut String, label: &str) {
    out.push('"');
    for c in label.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn emit_overlays(out: &mut String, node: &Node, ov: &VisualOverride, depth: usize) {
    let id = node.id;
    if let Some(p) = ov.position {
        indent(out, depth);
        let _ = writeln!(out, "%% pos {id} {} {}", format_num(p.x), format_num(p.y));
    }
    if let Some(s) = ov.size {
        indent(out, depth);
        let _ = writeln!(
            out,
            "%% size {id} {} {}",
            format_num(s.width),
            format_num(s.height)
        );
    }
    if let Some(style) = ov.style.as_ref().filter(|s| !s.is_empty()) {
        indent(out, depth);
        let _ = write!(out, "%% style {id}");
        if let Some(c) = style.fill {
            let _ = write!(out, " fill:{}", c.to_hex());
        }
        if let Some(c) = style.stroke {
            let _ = write!(out, " stroke:{}", c.to_hex());
        }
        if let Some(c) = style.text {
            let _ = write!(out, " color:{}", c.to_hex());
        }
        if let Some(w) = style.stroke_width {
            let _ = write!(out, " width:{}", format_num(w));
        }
        if style.dashed {
            out.push_str(" dashed");
        }
        out.push('\n');
    }
}

/// Shortest text that parses back to the same `f32`. Never an exponent,
/// and `-0` prints as `0`.
pub fn format_num(n: f32) -> String {
    if n == 0.0 { "0".to_string() } else { n.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeId;
    use pretty_assertions::assert_eq;

    #[test]
    fn format_num_trims() {
        assert_eq!(format_num(10.0), "10");
        assert_eq!(format_num(-2.5), "-2.5");
        assert_eq!(format_num(0.125), "0.125");
        assert_eq!(format_num(-0.0), "0");
        assert_eq!(format_num(0.001), "0.001");
        assert_eq!(format_num(1e-7), "0.0000001");
        for n in [10.125_f32, -3.3333, 0.1, 1.0 / 3.0, 123456.79] {
            assert_eq!(format_num(n).parse::<f32>().unwrap(), n);
        }
    }

    #[test]
    fn labels_the_plain_form_cannot_carry_are_quoted() {
        let mut d = Diagram::new();
        let root = d.canvas_mut(CanvasId::ROOT).unwrap();
        let a = root.insert_node(Node::new(NodeId::intern("a"), ShapeKind::Rect, "x]y"));
        let b = root.insert_node(Node::new(NodeId::intern("b"), ShapeKind::Circle, "say \"hi\"\nnow"));
        let c = root.insert_node(Node::new(NodeId::intern("c"), ShapeKind::Round, "back\\slash"));
        for (to, label) in [(b, " padded "), (c, "")] {
            let id = root.next_connection_id(a, to);
            root.connections.push(Connection {
                id,
                from: a,
                to,
                label: Some(label.into()),
                style: Style::default(),
            });
        }

        assert_eq!(
            emit_diagram(&d),
            "a[\"x]y\"]\nb((\"say \\\"hi\\\"\\nnow\"))\nc(back\\slash)\na --> b : \" padded \"\na --> c : \"\"\n"
        );
    }

    #[test]
    fn emit_shapes_connections_and_overlays() {
        let mut d = Diagram::new();
        let root = d.canvas_mut(CanvasId::ROOT).unwrap();
        let a = root.insert_node(Node::new(NodeId::intern("a"), ShapeKind::Round, "Start"));
        let b = root.insert_node(Node::new(NodeId::intern("b"), ShapeKind::Rect, "b"));
        let id = root.next_connection_id(a, b);
        root.connections.push(Connection {
            id,
            from: a,
            to: b,
            label: Some("go".into()),
            style: Style {
                dashed: true,
                ..Style::default()
            },
        });
        root.override_mut(a).position = Some(Point::new(10.0, 20.5));
        root.override_mut(a).style = Some(Style {
            fill: Color::from_hex("#FF0000"),
            stroke_width: Some(2.0),
            ..Style::default()
        });
        // Override of a node no longer present is kept but not emitted.
        root.override_mut(NodeId::intern("gone")).position = Some(Point::ZERO);

        assert_eq!(
            emit_diagram(&d),
            "a(Start)\nb\na -.-> b : go\n%% pos a 10 20.5\n%% style a fill:#FF0000 width:2\n"
        );
    }

    #[test]
    fn emit_nested_block() {
        let mut d = Diagram::new();
        let nested = d.allocate_canvas_id();
        let mut owner = Node::new(NodeId::intern("box"), ShapeKind::Rect, "Box");
        owner.canvas = Some(nested);
        let root = d.canvas_mut(CanvasId::ROOT).unwrap();
        root.insert_node(owner);
        root.children.push(nested);
        let mut inner = Canvas::new(nested, Some(NodeRef::new(CanvasId::ROOT, NodeId::intern("box"))));
        inner.insert_node(Node::new(NodeId::intern("x"), ShapeKind::Circle, "X"));
        d.insert_canvas(inner);

        assert_eq!(emit_diagram(&d), "box[Box] {\n  x((X))\n}\n");
    }
}
