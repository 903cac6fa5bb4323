pub mod config;
pub mod diff;
pub mod emitter;
pub mod error;
pub mod id;
pub mod layout;
pub mod model;
pub mod parser;
pub mod persist;
pub mod reconcile;
pub mod syntax;
pub mod tree;

pub use config::EngineConfig;
pub use diff::{Change, diff};
pub use emitter::emit_diagram;
pub use error::{CoreError, CoreResult, ParseError};
pub use id::{CanvasId, ConnectionId, NodeId};
pub use layout::{GridLayout, Layout};
pub use model::*;
pub use parser::{ParsedCanvas, ParsedConnection, ParsedDiagram, ParsedNode, parse_diagram};
pub use reconcile::reconcile;
pub use syntax::{DiagramSyntax, LineSyntax};
pub use tree::{calculate_level_opacity, visible_layers};
