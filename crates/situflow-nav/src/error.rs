use crate::tree::FlowNodeId;
use situflow_core::error::{GuardViolation, TransitionError};

/// Errors raised while editing a navigation topology.
///
/// Navigation requests themselves never fail with this type; they return a
/// rejected [`TransitionHandle`](situflow_core::transition::TransitionHandle)
/// carrying a [`TransitionError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavError {
    #[error("unknown flow node {0:?}")]
    UnknownNode(FlowNodeId),
    #[error("the tree already has a root")]
    RootAlreadySet,
    #[error("an edge to {kind} already exists from this node")]
    DuplicateEdge { kind: &'static str },
    #[error("no edge to {kind} from this node")]
    NotConnected { kind: &'static str },
    #[error(transparent)]
    Register(#[from] GuardViolation),
    #[error(transparent)]
    Container(#[from] TransitionError),
}
