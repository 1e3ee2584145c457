//! Situflow Nav -- navigation layers over a
//! [`SituationContainer`](situflow_core::container::SituationContainer).
//!
//! The container knows how to move between two chains of situations; this
//! crate decides which chain comes next:
//!
//! - [`stack::SituationStack`] -- visit history with back navigation. A
//!   revisited type reuses its instance and drops everything above it.
//! - [`tree::SituationTree`] -- explicit typed parent/child edges, plus
//!   fallback routes reachable from a whole subtree or from anywhere.
//!
//! Both own their container and forward the frame passes to it. Navigation
//! requests return the container's
//! [`TransitionHandle`](situflow_core::transition::TransitionHandle); a type
//! with no route is rejected with `TransitionError::NoRoute`. Topology edits
//! fail with [`NavError`].

pub mod error;
pub mod stack;
pub mod tree;

pub use error::NavError;
pub use stack::{SituationStack, StackEntry};
pub use tree::{FallbackScope, FlowNodeId, SituationTree};
