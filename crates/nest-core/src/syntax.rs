//! Text format contract.
//!
//! The sync engine talks to the textual side only through `DiagramSyntax`,
//! so another grammar can be plugged in without touching reconciliation.

use crate::emitter::emit_diagram;
use crate::error::ParseError;
use crate::model::Diagram;
use crate::parser::{ParsedDiagram, parse_diagram};

/// A textual diagram language. Both directions must be pure; `serialize`
/// must be total and its output must parse back to the same structure.
pub trait DiagramSyntax {
    fn parse(&self, text: &str) -> Result<ParsedDiagram, ParseError>;
    fn serialize(&self, diagram: &Diagram) -> String;
}

/// The built-in line grammar (`a[Label]`, `a --> b`, `%% pos a x y`, ...).
#[derive(Debug, Clone, Copy, Default)]
pub struct LineSyntax;

impl DiagramSyntax for LineSyntax {
    fn parse(&self, text: &str) -> Result<ParsedDiagram, ParseError> {
        parse_diagram(text)
    }

    fn serialize(&self, diagram: &Diagram) -> String {
        emit_diagram(diagram)
    }
}
