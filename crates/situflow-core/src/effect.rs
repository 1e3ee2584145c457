//! Transition effects: screen wipes, fades and similar overlays driven by
//! the orchestrator around the close and open phases.

use crate::behavior::{FrameContext, PhaseResult, Progress};
use crate::transition::TransitionInfo;

/// A visual collaborator run alongside a transition.
///
/// `poll_enter` covers the screen before (or while) the previous chain
/// closes; `poll_exit` uncovers it after (or while) the next chain opens.
/// `update` is called once per frame between the two.
pub trait TransitionEffect {
    fn name(&self) -> &str {
        "effect"
    }

    fn on_transition_begin(&mut self, _info: &TransitionInfo) {}

    fn poll_enter(&mut self, _info: &TransitionInfo) -> PhaseResult {
        Ok(Progress::Done)
    }

    fn update(&mut self, _frame: &FrameContext) {}

    fn poll_exit(&mut self, _info: &TransitionInfo) -> PhaseResult {
        Ok(Progress::Done)
    }

    fn on_transition_end(&mut self, _info: &TransitionInfo) {}
}
