//! Transition bookkeeping shared between the driver and its observers.
//!
//! A [`TransitionInfo`] is created when a navigation call is accepted and is
//! shared (via `Rc`) with every [`TransitionHandle`] and every phase body run
//! on its behalf. Only the container's driver writes to it; the single
//! external lever is [`TransitionHandle::next_step`], which can only raise
//! the step ceiling.

use crate::error::TransitionError;
use crate::id::SituationId;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

// ---------------------------------------------------------------------------
// State and step
// ---------------------------------------------------------------------------

/// Progress of a transition. Monotonic; `Completed` and `Canceled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TransitionState {
    Standby,
    Initializing,
    Opening,
    Completed,
    Canceled,
}

impl TransitionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransitionState::Completed | TransitionState::Canceled)
    }
}

/// Ceiling a transition will not cross until raised.
///
/// With `Load` the transition holds after loading, before setup. With
/// `Setup` it runs setup and open, then holds before activation. `Complete`
/// lets it run to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStep {
    Load,
    Setup,
    #[default]
    Complete,
}

/// What started the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    /// A navigation to a new target.
    Navigate,
    /// A close/open cycle over the current chain.
    Reset,
    /// Synthetic context for a forced teardown.
    Release,
    /// Synthetic context for preloading outside any transition.
    Preload,
}

// ---------------------------------------------------------------------------
// TransitionInfo
// ---------------------------------------------------------------------------

/// The live record of one transition.
#[derive(Debug)]
pub struct TransitionInfo {
    prev: Vec<SituationId>,
    next: Vec<SituationId>,
    back: bool,
    kind: TransitionKind,
    state: Cell<TransitionState>,
    step: Cell<TransitionStep>,
    error: RefCell<Option<TransitionError>>,
}

impl TransitionInfo {
    pub(crate) fn new(
        prev: Vec<SituationId>,
        next: Vec<SituationId>,
        back: bool,
        kind: TransitionKind,
        step: TransitionStep,
    ) -> Self {
        Self {
            prev,
            next,
            back,
            kind,
            state: Cell::new(TransitionState::Standby),
            step: Cell::new(step),
            error: RefCell::new(None),
        }
    }

    /// A context with no chains, used outside real transitions.
    pub(crate) fn detached(kind: TransitionKind) -> Self {
        let info = Self::new(Vec::new(), Vec::new(), false, kind, TransitionStep::Complete);
        if kind == TransitionKind::Release {
            info.state.set(TransitionState::Canceled);
        }
        info
    }

    /// Situations being closed, innermost first.
    pub fn prev(&self) -> &[SituationId] {
        &self.prev
    }

    /// Situations being opened, outermost first; the last one is the target.
    pub fn next(&self) -> &[SituationId] {
        &self.next
    }

    pub fn is_back(&self) -> bool {
        self.back
    }

    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    pub fn state(&self) -> TransitionState {
        self.state.get()
    }

    pub fn step(&self) -> TransitionStep {
        self.step.get()
    }

    pub fn error(&self) -> Option<TransitionError> {
        self.error.borrow().clone()
    }

    /// Whether phase bodies are being driven by a forced teardown or a
    /// canceled transition rather than a graceful one.
    pub fn is_forced(&self) -> bool {
        self.kind == TransitionKind::Release || self.state.get() == TransitionState::Canceled
    }

    /// Whether `id` takes part in this transition.
    pub fn involves(&self, id: SituationId) -> bool {
        self.prev.contains(&id) || self.next.contains(&id)
    }

    /// Advance the state. Lower states and changes after a terminal state
    /// are ignored.
    pub(crate) fn set_state(&self, state: TransitionState) {
        let current = self.state.get();
        if current.is_terminal() || state < current {
            return;
        }
        self.state.set(state);
    }

    /// Raise the step ceiling. Returns whether it changed.
    pub(crate) fn raise_step(&self, step: TransitionStep) -> bool {
        if step > self.step.get() {
            self.step.set(step);
            true
        } else {
            false
        }
    }

    pub(crate) fn fail(&self, error: TransitionError) {
        let mut slot = self.error.borrow_mut();
        if slot.is_none() {
            *slot = Some(error);
        }
    }
}

// ---------------------------------------------------------------------------
// TransitionHandle
// ---------------------------------------------------------------------------

/// A cheap, clonable view of a transition, or the reason it was rejected.
#[derive(Debug, Clone)]
pub struct TransitionHandle {
    info: Option<Rc<TransitionInfo>>,
    rejection: Option<TransitionError>,
}

impl TransitionHandle {
    pub(crate) fn live(info: Rc<TransitionInfo>) -> Self {
        Self {
            info: Some(info),
            rejection: None,
        }
    }

    /// A handle for a request that never started.
    pub fn rejected(error: TransitionError) -> Self {
        Self {
            info: None,
            rejection: Some(error),
        }
    }

    /// A finished handle for a request that had nothing to do.
    pub fn idle() -> Self {
        Self {
            info: None,
            rejection: None,
        }
    }

    /// True when there is no live transition, it reached a terminal state,
    /// or it failed.
    pub fn is_done(&self) -> bool {
        match &self.info {
            None => true,
            Some(info) => info.state().is_terminal() || info.error.borrow().is_some(),
        }
    }

    /// The rejection or fault, if any.
    pub fn error(&self) -> Option<TransitionError> {
        if let Some(err) = &self.rejection {
            return Some(err.clone());
        }
        self.info.as_ref().and_then(|info| info.error())
    }

    /// `Err` if the request was rejected or the transition faulted.
    pub fn check(&self) -> Result<(), TransitionError> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Whether the request was accepted and a transition started.
    pub fn is_started(&self) -> bool {
        self.info.is_some()
    }

    /// The innermost situation being closed.
    pub fn prev(&self) -> Option<SituationId> {
        self.info.as_ref()?.prev.first().copied()
    }

    /// The target situation.
    pub fn next(&self) -> Option<SituationId> {
        self.info.as_ref()?.next.last().copied()
    }

    pub fn is_back(&self) -> bool {
        self.info.as_ref().is_some_and(|info| info.back)
    }

    pub fn state(&self) -> Option<TransitionState> {
        self.info.as_ref().map(|info| info.state())
    }

    pub fn step(&self) -> Option<TransitionStep> {
        self.info.as_ref().map(|info| info.step())
    }

    pub fn info(&self) -> Option<&TransitionInfo> {
        self.info.as_deref()
    }

    /// Raise the transition's step ceiling. Lowering is ignored.
    pub fn next_step(&self, step: TransitionStep) -> bool {
        match &self.info {
            Some(info) => {
                let raised = info.raise_step(step);
                if raised {
                    tracing::debug!(?step, "transition step raised");
                }
                raised
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn ids(n: usize) -> Vec<SituationId> {
        let mut sm = SlotMap::<SituationId, ()>::with_key();
        (0..n).map(|_| sm.insert(())).collect()
    }

    fn info(step: TransitionStep) -> Rc<TransitionInfo> {
        let ids = ids(3);
        Rc::new(TransitionInfo::new(
            vec![ids[0]],
            vec![ids[1], ids[2]],
            true,
            TransitionKind::Navigate,
            step,
        ))
    }

    #[test]
    fn state_is_monotonic_and_terminal_is_sticky() {
        let info = info(TransitionStep::Complete);
        info.set_state(TransitionState::Opening);
        info.set_state(TransitionState::Initializing);
        assert_eq!(info.state(), TransitionState::Opening);
        info.set_state(TransitionState::Completed);
        info.set_state(TransitionState::Canceled);
        assert_eq!(info.state(), TransitionState::Completed);
    }

    #[test]
    fn next_step_only_raises() {
        let handle = TransitionHandle::live(info(TransitionStep::Load));
        assert!(handle.next_step(TransitionStep::Setup));
        assert!(!handle.next_step(TransitionStep::Load));
        assert_eq!(handle.step(), Some(TransitionStep::Setup));
    }

    #[test]
    fn handle_exposes_endpoints_and_direction() {
        let info = info(TransitionStep::Complete);
        let handle = TransitionHandle::live(info.clone());
        assert_eq!(handle.prev(), Some(info.prev()[0]));
        assert_eq!(handle.next(), Some(info.next()[1]));
        assert!(handle.is_back());
        assert!(!handle.is_done());
        info.set_state(TransitionState::Completed);
        assert!(handle.is_done());
    }

    #[test]
    fn rejected_handle_is_done_with_error() {
        let handle = TransitionHandle::rejected(TransitionError::AlreadyTransitioning);
        assert!(handle.is_done());
        assert!(!handle.is_started());
        assert_eq!(handle.error(), Some(TransitionError::AlreadyTransitioning));
        assert!(handle.check().is_err());
        assert!(!handle.next_step(TransitionStep::Complete));
    }

    #[test]
    fn first_fault_wins() {
        let info = info(TransitionStep::Complete);
        info.fail(TransitionError::Canceled);
        info.fail(TransitionError::AlreadyTransitioning);
        assert_eq!(info.error(), Some(TransitionError::Canceled));
        assert!(TransitionHandle::live(info).is_done());
    }

    #[test]
    fn release_context_reads_as_forced() {
        let info = TransitionInfo::detached(TransitionKind::Release);
        assert!(info.is_forced());
        assert_eq!(info.state(), TransitionState::Canceled);
        assert!(!TransitionInfo::detached(TransitionKind::Preload).is_forced());
    }
}
