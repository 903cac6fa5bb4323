//! Parser for the Nest line grammar → `ParsedDiagram`.
//!
//! Built on `winnow` 0.7. The grammar is line oriented: every line is a
//! comment, a node declaration, a connection, an overlay annotation or a
//! block delimiter. A node declaration ending in `{` opens the block of the
//! nested canvas that node owns; a lone `}` closes it.
//!
//! ```text
//! # comment
//! a[Rect]  b(Round)  c([Stadium])  d{Diamond}  e((Circle))
//! group[Group] {
//!   inner[Inner]
//! }
//! a --> b : label
//! a -.-> c
//! q["label with ] or \"quotes\"\n"] --> a : " padded "
//! %% pos a 10 20
//! %% size a 120 60
//! %% style a fill:#FF0000 stroke:#333333 color:#000000 width:2
//! ```

use crate::error::ParseError;
use crate::id::NodeId;
use crate::model::{Color, Point, ShapeKind, Size, Style, VisualOverride};
use std::collections::BTreeMap;
use winnow::combinator::{alt, delimited, opt, preceded, repeat};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{none_of, take_while};

// ─── Parsed tree ──────────────────────────────────────────────────────────

/// Candidate tree produced from text, before reconciliation with the
/// visual model. Carries no positions except explicit overlays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDiagram {
    pub root: ParsedCanvas,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCanvas {
    /// Nodes in declaration order.
    pub nodes: Vec<ParsedNode>,
    pub connections: Vec<ParsedConnection>,
    /// `%%` overlays of this block, keyed by node id.
    pub overrides: BTreeMap<NodeId, VisualOverride>,
}

impl ParsedCanvas {
    pub fn node(&self, id: NodeId) -> Option<&ParsedNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNode {
    pub id: NodeId,
    pub shape: ShapeKind,
    pub label: String,
    /// Contents of the nested block, if the node opened one.
    pub nested: Option<ParsedCanvas>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedConnection {
    pub from: NodeId,
    pub to: NodeId,
    pub label: Option<String>,
    pub dashed: bool,
}

// ─── Entry point ──────────────────────────────────────────────────────────

/// One open block: the canvas being filled and the node that owns it.
struct Frame {
    canvas: ParsedCanvas,
    index: BTreeMap<NodeId, usize>,
    /// Index of the owner node in the parent frame plus the opening line.
    owner: Option<(usize, usize)>,
}

impl Frame {
    fn new(owner: Option<(usize, usize)>) -> Self {
        Self {
            canvas: ParsedCanvas::default(),
            index: BTreeMap::new(),
            owner,
        }
    }

    /// Declare or update a node. A declaration with an explicit shape wins
    /// over an earlier bare mention.
    fn declare(&mut self, decl: NodeDecl) -> usize {
        if let Some(&i) = self.index.get(&decl.id) {
            if let Some((shape, label)) = decl.shape {
                let node = &mut self.canvas.nodes[i];
                node.shape = shape;
                node.label = label;
            }
            return i;
        }
        let (shape, label) = decl
            .shape
            .unwrap_or_else(|| (ShapeKind::Rect, decl.id.as_str().to_string()));
        self.canvas.nodes.push(ParsedNode {
            id: decl.id,
            shape,
            label,
            nested: None,
        });
        let i = self.canvas.nodes.len() - 1;
        self.index.insert(decl.id, i);
        i
    }
}

/// Parse diagram text into a candidate tree.
///
/// # Errors
/// Returns a `ParseError` pointing at the first offending line and column.
#[must_use = "parsing result should be used"]
pub fn parse_diagram(input: &str) -> Result<ParsedDiagram, ParseError> {
    let mut stack = vec![Frame::new(None)];

    for (i, raw) in input.lines().enumerate() {
        let line_no = i + 1;
        let indent = raw.len() - raw.trim_start().len();
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let at = |rest: &str, message: String| {
            ParseError::new(line_no, indent + (line.len() - rest.len()) + 1, message)
        };

        if let Some(body) = line.strip_prefix("%%") {
            let Some(frame) = stack.last_mut() else { break };
            parse_overlay(body, &mut frame.canvas.overrides).map_err(|(rest, msg)| at(rest, msg))?;
            continue;
        }

        if let Some(rest) = line.strip_prefix('}') {
            if !rest.trim().is_empty() {
                return Err(at(rest.trim_start(), format!("unexpected `{}` after `}}`", rest.trim())));
            }
            if stack.len() == 1 {
                return Err(at(line, "unmatched `}`".into()));
            }
            close_block(&mut stack);
            continue;
        }

        let mut rest = line;
        let statement = parse_statement(&mut rest).map_err(|msg| at(rest, msg))?;
        let Some(frame) = stack.last_mut() else { break };

        match statement {
            Statement::Node { decl, opens_block } => {
                let id = decl.id;
                let idx = frame.declare(decl);
                if opens_block {
                    if frame.canvas.nodes[idx].nested.is_some() {
                        return Err(at(line, format!("node `{id}` already owns a nested block")));
                    }
                    stack.push(Frame::new(Some((idx, line_no))));
                }
            }
            Statement::Connection {
                from,
                to,
                dashed,
                label,
            } => {
                let (from_id, to_id) = (from.id, to.id);
                frame.declare(from);
                frame.declare(to);
                frame.canvas.connections.push(ParsedConnection {
                    from: from_id,
                    to: to_id,
                    label,
                    dashed,
                });
            }
        }
    }

    if stack.len() > 1 {
        let open_line = stack.last().and_then(|f| f.owner).map_or(0, |(_, l)| l);
        return Err(ParseError::new(open_line, 1, "unclosed `{` block"));
    }

    let root = stack.pop().map(|f| f.canvas).unwrap_or_default();
    Ok(ParsedDiagram { root })
}

fn close_block(stack: &mut Vec<Frame>) {
    let Some(done) = stack.pop() else { return };
    if let (Some((idx, _)), Some(parent)) = (done.owner, stack.last_mut()) {
        parent.canvas.nodes[idx].nested = Some(done.canvas);
    }
}

// ─── Statements ───────────────────────────────────────────────────────────

struct NodeDecl {
    id: NodeId,
    shape: Option<(ShapeKind, String)>,
}

enum Statement {
    Node {
        decl: NodeDecl,
        opens_block: bool,
    },
    Connection {
        from: NodeDecl,
        to: NodeDecl,
        dashed: bool,
        label: Option<String>,
    },
}

/// On failure `input` is left where parsing stopped, for column reporting.
fn parse_statement(input: &mut &str) -> Result<Statement, String> {
    let from = parse_node_decl
        .parse_next(input)
        .map_err(|_| "expected a node id".to_string())?;
    skip_space(input);

    let arrow: Option<bool> = opt(parse_arrow).parse_next(input).map_err(|_| "bad arrow")?;
    if let Some(dashed) = arrow {
        skip_space(input);
        let to = parse_node_decl
            .parse_next(input)
            .map_err(|_| "expected a target node id after the arrow".to_string())?;
        skip_space(input);

        let mut label = None;
        if let Some(text) = input.strip_prefix(':') {
            let text = text.trim();
            let mut quoted = text;
            if let Ok(unescaped) = parse_quoted.parse_next(&mut quoted)
                && quoted.trim().is_empty()
            {
                label = Some(unescaped);
            } else if !text.is_empty() {
                label = Some(text.to_string());
            }
            *input = "";
        }
        expect_end(input)?;
        return Ok(Statement::Connection {
            from,
            to,
            dashed,
            label,
        });
    }

    let opens_block = if let Some(after) = input.strip_prefix('{') {
        *input = after;
        skip_space(input);
        true
    } else {
        false
    };
    expect_end(input)?;

    Ok(Statement::Node {
        decl: from,
        opens_block,
    })
}

fn expect_end(input: &str) -> Result<(), String> {
    if input.is_empty() {
        Ok(())
    } else {
        Err(format!("unexpected `{input}`"))
    }
}

fn parse_node_decl(input: &mut &str) -> ModalResult<NodeDecl> {
    let id = parse_identifier.map(NodeId::intern).parse_next(input)?;
    let shape = opt(parse_shape).parse_next(input)?;
    Ok(NodeDecl { id, shape })
}

/// Two-character openers are tried before their one-character prefixes.
const SHAPES: [(&str, &str, ShapeKind); 5] = [
    ("((", "))", ShapeKind::Circle),
    ("([", "])", ShapeKind::Stadium),
    ("[", "]", ShapeKind::Rect),
    ("(", ")", ShapeKind::Round),
    ("{", "}", ShapeKind::Diamond),
];

/// A quoted label must be followed directly by the closer; otherwise the
/// label runs up to the first closer.
fn parse_shape(input: &mut &str) -> ModalResult<(ShapeKind, String)> {
    for (open, close, kind) in SHAPES {
        let Some(after) = input.strip_prefix(open) else {
            continue;
        };
        let mut cursor = after;
        if let Ok(label) = parse_quoted.parse_next(&mut cursor)
            && let Some(rest) = cursor.strip_prefix(close)
        {
            *input = rest;
            return Ok((kind, label));
        }
        if let Some(end) = after.find(close) {
            *input = &after[end + close.len()..];
            return Ok((kind, after[..end].to_string()));
        }
    }
    Err(ErrMode::Backtrack(ContextError::new()))
}

/// `"..."` with `\"`, `\\`, `\n`, `\r`, `\t` and `\u{hex}` escapes.
fn parse_quoted(input: &mut &str) -> ModalResult<String> {
    delimited(
        '"',
        repeat(0.., alt((none_of(['"', '\\']), preceded('\\', parse_escape)))).fold(
            String::new,
            |mut acc: String, c: char| {
                acc.push(c);
                acc
            },
        ),
        '"',
    )
    .parse_next(input)
}

fn parse_escape(input: &mut &str) -> ModalResult<char> {
    alt((
        '"'.value('"'),
        '\\'.value('\\'),
        'n'.value('\n'),
        'r'.value('\r'),
        't'.value('\t'),
        delimited("u{", take_while(1..=6, |c: char| c.is_ascii_hexdigit()), '}')
            .verify_map(|hex: &str| u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)),
    ))
    .parse_next(input)
}

/// `-->` solid, `-.->` dashed. Returns `true` for dashed.
fn parse_arrow(input: &mut &str) -> ModalResult<bool> {
    alt(("-->".value(false), "-.->".value(true))).parse_next(input)
}

// ─── Overlays ─────────────────────────────────────────────────────────────

/// Parse the body of a `%%` line. Unknown directives are plain comments.
/// Errors carry the unparsed remainder for column reporting.
fn parse_overlay<'a>(
    body: &'a str,
    overrides: &mut BTreeMap<NodeId, VisualOverride>,
) -> Result<(), (&'a str, String)> {
    let mut input = body.trim_start();
    let Ok(keyword) = parse_identifier.parse_next(&mut input) else {
        return Ok(());
    };
    if !matches!(keyword, "pos" | "size" | "style") {
        return Ok(());
    }

    skip_space(&mut input);
    let id = parse_identifier
        .map(NodeId::intern)
        .parse_next(&mut input)
        .map_err(|_| (input, format!("`%% {keyword}` expects a node id")))?;
    skip_space(&mut input);

    match keyword {
        "pos" => {
            let (x, y) = parse_pair(&mut input).map_err(|_| (input, "`%% pos` expects `x y`".to_string()))?;
            overrides.entry(id).or_default().position = Some(Point::new(x, y));
        }
        "size" => {
            let (w, h) = parse_pair(&mut input).map_err(|_| (input, "`%% size` expects `w h`".to_string()))?;
            if w <= 0.0 || h <= 0.0 {
                return Err((input, "size must be positive".to_string()));
            }
            overrides.entry(id).or_default().size = Some(Size::new(w, h));
        }
        _ => {
            let mut style = Style::default();
            while !input.trim().is_empty() {
                parse_style_entry(&mut input, &mut style)?;
                skip_space(&mut input);
            }
            let entry = overrides.entry(id).or_default();
            let merged = entry.style.take().unwrap_or_default().merged(&style);
            entry.style = Some(merged);
        }
    }

    skip_space(&mut input);
    if !input.is_empty() {
        return Err((input, format!("unexpected `{input}`")));
    }
    Ok(())
}

fn parse_style_entry<'a>(input: &mut &'a str, style: &mut Style) -> Result<(), (&'a str, String)> {
    let start = *input;
    let key = parse_identifier
        .parse_next(input)
        .map_err(|_| (start, "expected a style key".to_string()))?;

    if key == "dashed" {
        style.dashed = true;
        return Ok(());
    }

    if !input.starts_with(':') {
        return Err((*input, format!("expected `:` after `{key}`")));
    }
    *input = &input[1..];
    let value_at = *input;

    match key {
        "fill" | "stroke" | "color" => {
            let color = parse_hex_color
                .parse_next(input)
                .map_err(|_| (value_at, format!("`{key}` expects a hex color")))?;
            match key {
                "fill" => style.fill = Some(color),
                "stroke" => style.stroke = Some(color),
                _ => style.text = Some(color),
            }
        }
        "width" => {
            style.stroke_width = Some(
                parse_number
                    .parse_next(input)
                    .map_err(|_| (value_at, "`width` expects a number".to_string()))?,
            );
        }
        _ => return Err((start, format!("unknown style key `{key}`"))),
    }
    Ok(())
}

// ─── Low-level parsers ──────────────────────────────────────────────────

/// Consume optional whitespace (concrete error type avoids inference issues).
fn skip_space(input: &mut &str) {
    use winnow::ascii::space0;
    let _: Result<&str, ErrMode<ContextError>> = space0.parse_next(input);
}

fn parse_identifier<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., |c: char| c.is_alphanumeric() || c == '_').parse_next(input)
}

fn parse_hex_color(input: &mut &str) -> ModalResult<Color> {
    let _ = '#'.parse_next(input)?;
    let hex_digits: &str = take_while(1..=8, |c: char| c.is_ascii_hexdigit()).parse_next(input)?;
    Color::from_hex(hex_digits).ok_or_else(|| ErrMode::Backtrack(ContextError::new()))
}

fn parse_number(input: &mut &str) -> ModalResult<f32> {
    let start = *input;
    if input.starts_with('-') {
        *input = &input[1..];
    }
    let _ = take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    if input.starts_with('.') {
        *input = &input[1..];
        let _ =
            take_while::<_, _, ContextError>(0.., |c: char| c.is_ascii_digit()).parse_next(input);
    }
    let matched = &start[..start.len() - input.len()];
    matched
        .parse::<f32>()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))
}

fn parse_pair(input: &mut &str) -> ModalResult<(f32, f32)> {
    let a = parse_number.parse_next(input)?;
    let _ = winnow::ascii::space1.parse_next(input)?;
    let b = parse_number.parse_next(input)?;
    Ok((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> NodeId {
        NodeId::intern(s)
    }

    #[test]
    fn parse_all_shapes() {
        let parsed = parse_diagram("a[Rect]\nb(Round)\nc([Stadium])\nd{Diamond}\ne((Circle))").unwrap();
        let shapes: Vec<(ShapeKind, &str)> = parsed
            .root
            .nodes
            .iter()
            .map(|n| (n.shape, n.label.as_str()))
            .collect();
        assert_eq!(
            shapes,
            vec![
                (ShapeKind::Rect, "Rect"),
                (ShapeKind::Round, "Round"),
                (ShapeKind::Stadium, "Stadium"),
                (ShapeKind::Diamond, "Diamond"),
                (ShapeKind::Circle, "Circle"),
            ]
        );
    }

    #[test]
    fn parse_connections() {
        let parsed = parse_diagram("a --> b : yes\nb -.-> c").unwrap();
        let root = &parsed.root;
        assert_eq!(root.nodes.len(), 3);
        assert_eq!(root.node(id("c")).unwrap().label, "c");
        assert_eq!(
            root.connections,
            vec![
                ParsedConnection {
                    from: id("a"),
                    to: id("b"),
                    label: Some("yes".into()),
                    dashed: false,
                },
                ParsedConnection {
                    from: id("b"),
                    to: id("c"),
                    label: None,
                    dashed: true,
                },
            ]
        );
    }

    #[test]
    fn explicit_declaration_upgrades_bare_mention() {
        let parsed = parse_diagram("a --> b\nb{Decide}").unwrap();
        let b = parsed.root.node(id("b")).unwrap();
        assert_eq!(b.shape, ShapeKind::Diamond);
        assert_eq!(b.label, "Decide");
    }

    #[test]
    fn parse_nested_blocks() {
        let input = "\
outer[Outer] {
  inner[Inner] {
    deep
  }
  x --> inner
}
";
        let parsed = parse_diagram(input).unwrap();
        let outer = parsed.root.node(id("outer")).unwrap();
        let level1 = outer.nested.as_ref().unwrap();
        assert_eq!(level1.nodes.len(), 2);
        assert_eq!(level1.connections.len(), 1);
        let level2 = level1.node(id("inner")).unwrap().nested.as_ref().unwrap();
        assert_eq!(level2.nodes[0].id, id("deep"));
    }

    #[test]
    fn diamond_vs_block_open() {
        let parsed = parse_diagram("a{\n}\nb{Q} {\n}").unwrap();
        let a = parsed.root.node(id("a")).unwrap();
        assert_eq!(a.shape, ShapeKind::Rect);
        assert!(a.nested.is_some());
        let b = parsed.root.node(id("b")).unwrap();
        assert_eq!(b.shape, ShapeKind::Diamond);
        assert!(b.nested.is_some());
    }

    #[test]
    fn parse_overlays() {
        let input = "\
a[A]
%% pos a 10 -20.5
%% size a 200 80
%% style a fill:#FF0000 width:2 dashed
%% style a color:#000
%% just a comment
";
        let parsed = parse_diagram(input).unwrap();
        let ov = parsed.root.overrides.get(&id("a")).unwrap();
        assert_eq!(ov.position, Some(Point::new(10.0, -20.5)));
        assert_eq!(ov.size, Some(Size::new(200.0, 80.0)));
        let style = ov.style.as_ref().unwrap();
        assert_eq!(style.fill.unwrap().to_hex(), "#FF0000");
        assert_eq!(style.text.unwrap().to_hex(), "#000000");
        assert_eq!(style.stroke_width, Some(2.0));
        assert!(style.dashed);
    }

    #[test]
    fn comments_and_blank_lines() {
        let parsed = parse_diagram("# title\n\n   # indented\na").unwrap();
        assert_eq!(parsed.root.nodes.len(), 1);
    }

    #[test]
    fn error_reports_line_and_column() {
        let err = parse_diagram("a[A]\n  b[B] junk").unwrap_err();
        assert_eq!((err.line, err.column), (2, 8));

        let err = parse_diagram("a\n}").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unmatched"));

        let err = parse_diagram("a {\nb").unwrap_err();
        assert_eq!(err.line, 1);

        let err = parse_diagram("a --> ").unwrap_err();
        assert_eq!(err.line, 1);

        let err = parse_diagram("%% style a bogus:1").unwrap_err();
        assert!(err.message.contains("bogus"), "{}", err.message);
    }

    #[test]
    fn second_nested_block_is_rejected() {
        let err = parse_diagram("a {\n}\na {\n}").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn quoted_labels_unescape() {
        let input = "a[\"x]y\"]\nb((\"say \\\"hi\\\"\\nnow\"))\nc{\"}{\"} {\n}\na --> b : \" padded \"\na --> c : \"\"\nb --> c : a : b\n";
        let parsed = parse_diagram(input).unwrap();
        let root = &parsed.root;
        assert_eq!(root.node(id("a")).unwrap().label, "x]y");
        assert_eq!(root.node(id("b")).unwrap().label, "say \"hi\"\nnow");
        let c = root.node(id("c")).unwrap();
        assert_eq!((c.shape, c.label.as_str()), (ShapeKind::Diamond, "}{"));
        assert!(c.nested.is_some());
        let labels: Vec<Option<&str>> = root.connections.iter().map(|c| c.label.as_deref()).collect();
        assert_eq!(labels, vec![Some(" padded "), Some(""), Some("a : b")]);
    }

    #[test]
    fn unquoted_labels_stay_literal() {
        let parsed = parse_diagram("a[back\\slash]\nb(f \"x)\nc --> a : say \"hi\" there").unwrap();
        let root = &parsed.root;
        assert_eq!(root.node(id("a")).unwrap().label, "back\\slash");
        assert_eq!(root.node(id("b")).unwrap().label, "f \"x");
        assert_eq!(root.connections[0].label.as_deref(), Some("say \"hi\" there"));

        let parsed = parse_diagram("u[\"\\u{263a}\"]").unwrap();
        assert_eq!(parsed.root.nodes[0].label, "\u{263a}");
    }

    #[test]
    fn parse_empty_document() {
        assert_eq!(parse_diagram("").unwrap(), ParsedDiagram::default());
    }
}
