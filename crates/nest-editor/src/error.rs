use nest_core::{CanvasId, ConnectionId, CoreError, NodeId};
use std::time::Duration;
use thiserror::Error;

/// Failures of the bus's `wait_for` futures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusError {
    #[error("timed out after {after:?} waiting for `{topic}`")]
    Timeout { topic: String, after: Duration },
}

/// Store commits that did not happen. The previous snapshot is kept.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("update rejected: {0}")]
    Rejected(String),
    #[error("canvas tree invalid: {0}")]
    InvalidTree(#[from] CoreError),
    #[error("unknown state path `{0}`")]
    UnknownPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("nothing to undo")]
    Underflow,
    #[error("nothing to redo")]
    Overflow,
    /// The store refused the recorded snapshot; the cursor did not move.
    #[error("restore rejected: {0}")]
    Restore(String),
}

/// Everything an engine command can fail with. Reference errors leave the
/// state untouched.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown node {node} in {canvas}")]
    UnknownNode { canvas: CanvasId, node: NodeId },
    #[error("unknown canvas {0}")]
    UnknownCanvas(CanvasId),
    #[error("unknown connection {connection} in {canvas}")]
    UnknownConnection {
        canvas: CanvasId,
        connection: ConnectionId,
    },
    #[error("moving {node} into {target} would nest it inside itself")]
    Cycle { node: NodeId, target: CanvasId },
    #[error("{node} already exists in {canvas}")]
    DuplicateId { canvas: CanvasId, node: NodeId },
    #[error("the root canvas cannot be unregistered")]
    RootCanvas,
    /// Non-finite coordinates, or a size or stroke width out of range.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl EngineError {
    /// Reference errors: the command named something that does not exist or
    /// asked for an impossible containment.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownNode { .. }
                | EngineError::UnknownCanvas(_)
                | EngineError::UnknownConnection { .. }
                | EngineError::Cycle { .. }
                | EngineError::DuplicateId { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
