//! Error types shared across the situation machinery.
//!
//! Three families are handled differently:
//! [`TransitionError`] travels on a [`TransitionHandle`](crate::transition::TransitionHandle),
//! [`PhaseFault`] is what a phase body returns, and [`GuardViolation`] marks
//! programmer errors which are logged and otherwise ignored.

use crate::id::ContainerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Phase tags
// ---------------------------------------------------------------------------

/// The asynchronous segment in which a fault occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Load,
    Setup,
    Open,
    Close,
    EffectEnter,
    EffectExit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Load => "load",
            Phase::Setup => "setup",
            Phase::Open => "open",
            Phase::Close => "close",
            Phase::EffectEnter => "effect enter",
            Phase::EffectExit => "effect exit",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// Why a transition was rejected or did not finish.
///
/// Rejections are returned before any state is touched. `PhaseFailed` is set
/// on a live transition and leaves the tree where the fault happened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("a transition is already in flight")]
    AlreadyTransitioning,
    #[error("situation not found: {0}")]
    TargetNotFound(String),
    #[error("situation '{0}' is already current")]
    AlreadyCurrent(String),
    #[error("protocol '{protocol}' overlaps lifetimes across scene-owning situation '{situation}'")]
    SceneOwnershipConflict { protocol: String, situation: String },
    #[error("reset requires a sequential protocol, '{0}' overlaps prev/next lifetimes")]
    ResetOverlap(String),
    #[error("protocol '{protocol}' overlaps lifetimes but '{situation}' is in both chains")]
    SharedChainOverlap { protocol: String, situation: String },
    #[error("nothing is running, there is nothing to reset")]
    NothingRunning,
    #[error("no route to '{0}' from the current node")]
    NoRoute(String),
    #[error("{situation} failed during {phase}: {message}")]
    PhaseFailed {
        situation: String,
        phase: Phase,
        message: String,
    },
    #[error("transition was canceled")]
    Canceled,
}

// ---------------------------------------------------------------------------
// PhaseFault
// ---------------------------------------------------------------------------

/// An error raised by a phase body (load, setup, open, close).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PhaseFault(pub String);

impl PhaseFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Capture any error as a fault, keeping its display text.
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        Self(err.to_string())
    }

    pub(crate) fn into_transition_error(self, situation: &str, phase: Phase) -> TransitionError {
        TransitionError::PhaseFailed {
            situation: situation.to_string(),
            phase,
            message: self.0,
        }
    }
}

// ---------------------------------------------------------------------------
// GuardViolation
// ---------------------------------------------------------------------------

/// Misuse of a situation that is reported but never aborts the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardViolation {
    #[error("situation '{situation}' is bound to container {bound:?}, not {requested:?}")]
    ForeignContainer {
        situation: String,
        bound: ContainerId,
        requested: ContainerId,
    },
    #[error("situation '{0}' is not bound to a container")]
    Unbound(String),
    #[error("situation '{0}' is in the invalid state")]
    InvalidState(String),
    #[error("situation '{0}' still has children attached")]
    HasChildren(String),
    #[error("situation {0} is not in this container")]
    UnknownSituation(String),
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors raised while loading a [`ContainerConfig`](crate::config::ContainerConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported config format: {file}")]
    UnsupportedFormat { file: PathBuf },
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
