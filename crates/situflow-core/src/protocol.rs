//! Transition protocols: the ordering of phases for one state change.
//!
//! The container exposes the individual steps of a transition through the
//! [`TransitionResolver`] boundary. A [`TransitionProtocol`] is polled once
//! per tick and sequences those steps. Every routine on the resolver is
//! idempotent once finished, so a protocol can keep polling a completed
//! routine while waiting on its partner.

use crate::behavior::Progress;
use crate::error::TransitionError;
use serde::{Deserialize, Serialize};

/// Result of polling one routine of a transition.
pub type RoutineResult = Result<Progress, TransitionError>;

/// The routines a protocol orders. Ten of them, because the effect enter
/// and exit are driven apart from the chain close and open.
pub trait TransitionResolver {
    /// Mark the transition as started and notify effects.
    fn start(&mut self);
    /// Deactivate every situation in the previous chain.
    fn deactivate_prev(&mut self);
    /// Run the effects' enter routines.
    fn enter_effects(&mut self) -> RoutineResult;
    /// Run the close phase of the previous chain.
    fn close_prev(&mut self) -> RoutineResult;
    /// Cleanup then unload every situation in the previous chain.
    fn unload_prev(&mut self) -> RoutineResult;
    /// Load the next chain concurrently, then set it up in order.
    fn load_next(&mut self) -> RoutineResult;
    /// Run the open phase of the next chain.
    fn open_next(&mut self) -> RoutineResult;
    /// Run the effects' exit routines.
    fn exit_effects(&mut self) -> RoutineResult;
    /// Activate every situation in the next chain.
    fn activate_next(&mut self);
    /// Notify effects and mark the transition completed.
    fn finish(&mut self);
}

/// A strategy sequencing a transition's routines.
pub trait TransitionProtocol {
    fn name(&self) -> &str;

    /// Whether the previous and next chains are alive at the same time.
    /// Such protocols are refused for scene-owning situations and for resets.
    fn overlaps_lifetimes(&self) -> bool;

    /// Advance the transition. Called once per tick until `Done` or `Err`.
    fn poll(&mut self, resolver: &mut dyn TransitionResolver) -> RoutineResult;
}

/// Wait for two routines polled in the same tick. The first error wins.
pub fn join(a: RoutineResult, b: RoutineResult) -> RoutineResult {
    Ok(a?.and(b?))
}

/// Run `first` to completion, then `second`.
fn sequence(
    resolver: &mut dyn TransitionResolver,
    first: fn(&mut dyn TransitionResolver) -> RoutineResult,
    second: fn(&mut dyn TransitionResolver) -> RoutineResult,
) -> RoutineResult {
    match first(resolver)? {
        Progress::Done => second(resolver),
        Progress::Pending => Ok(Progress::Pending),
    }
}

// ---------------------------------------------------------------------------
// OutIn
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutInStage {
    Start,
    Close,
    Unload,
    Load,
    Open,
    Finish,
    Done,
}

/// Close fully, then load and open the next chain.
///
/// With `concurrent_close` the closing animations play while the enter
/// effect runs; otherwise the effect covers the screen first and the chain
/// closes behind it. `concurrent_open` does the same for opening and the
/// exit effect; otherwise the chain opens first and the effect reveals it.
#[derive(Debug, Clone)]
pub struct OutIn {
    pub concurrent_close: bool,
    pub concurrent_open: bool,
    stage: OutInStage,
}

impl OutIn {
    pub fn new(concurrent_close: bool, concurrent_open: bool) -> Self {
        Self {
            concurrent_close,
            concurrent_open,
            stage: OutInStage::Start,
        }
    }
}

impl Default for OutIn {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl TransitionProtocol for OutIn {
    fn name(&self) -> &str {
        "out-in"
    }

    fn overlaps_lifetimes(&self) -> bool {
        false
    }

    fn poll(&mut self, r: &mut dyn TransitionResolver) -> RoutineResult {
        loop {
            match self.stage {
                OutInStage::Start => {
                    r.start();
                    r.deactivate_prev();
                    self.stage = OutInStage::Close;
                }
                OutInStage::Close => {
                    let progress = if self.concurrent_close {
                        join(r.enter_effects(), r.close_prev())?
                    } else {
                        sequence(r, |r| r.enter_effects(), |r| r.close_prev())?
                    };
                    if !progress.is_done() {
                        return Ok(Progress::Pending);
                    }
                    self.stage = OutInStage::Unload;
                }
                OutInStage::Unload => {
                    if !r.unload_prev()?.is_done() {
                        return Ok(Progress::Pending);
                    }
                    self.stage = OutInStage::Load;
                }
                OutInStage::Load => {
                    if !r.load_next()?.is_done() {
                        return Ok(Progress::Pending);
                    }
                    self.stage = OutInStage::Open;
                }
                OutInStage::Open => {
                    let progress = if self.concurrent_open {
                        join(r.open_next(), r.exit_effects())?
                    } else {
                        sequence(r, |r| r.open_next(), |r| r.exit_effects())?
                    };
                    if !progress.is_done() {
                        return Ok(Progress::Pending);
                    }
                    self.stage = OutInStage::Finish;
                }
                OutInStage::Finish => {
                    r.activate_next();
                    r.finish();
                    self.stage = OutInStage::Done;
                }
                OutInStage::Done => return Ok(Progress::Done),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CrossFade
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossFadeStage {
    Start,
    Load,
    Swap,
    Unload,
    Finish,
    Done,
}

/// Load the next chain while the previous one is still open, then close
/// and open them together. Effects only receive begin/end notifications.
#[derive(Debug, Clone)]
pub struct CrossFade {
    stage: CrossFadeStage,
}

impl CrossFade {
    pub fn new() -> Self {
        Self {
            stage: CrossFadeStage::Start,
        }
    }
}

impl Default for CrossFade {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionProtocol for CrossFade {
    fn name(&self) -> &str {
        "cross-fade"
    }

    fn overlaps_lifetimes(&self) -> bool {
        true
    }

    fn poll(&mut self, r: &mut dyn TransitionResolver) -> RoutineResult {
        loop {
            match self.stage {
                CrossFadeStage::Start => {
                    r.start();
                    r.deactivate_prev();
                    self.stage = CrossFadeStage::Load;
                }
                CrossFadeStage::Load => {
                    if !r.load_next()?.is_done() {
                        return Ok(Progress::Pending);
                    }
                    self.stage = CrossFadeStage::Swap;
                }
                CrossFadeStage::Swap => {
                    if !join(r.close_prev(), r.open_next())?.is_done() {
                        return Ok(Progress::Pending);
                    }
                    self.stage = CrossFadeStage::Unload;
                }
                CrossFadeStage::Unload => {
                    if !r.unload_prev()?.is_done() {
                        return Ok(Progress::Pending);
                    }
                    self.stage = CrossFadeStage::Finish;
                }
                CrossFadeStage::Finish => {
                    r.activate_next();
                    r.finish();
                    self.stage = CrossFadeStage::Done;
                }
                CrossFadeStage::Done => return Ok(Progress::Done),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which protocol a container uses when a request does not override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    #[default]
    OutIn,
    CrossFade,
}

/// Serializable description of the default protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub kind: ProtocolKind,
    pub concurrent_close: bool,
    pub concurrent_open: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            kind: ProtocolKind::OutIn,
            concurrent_close: true,
            concurrent_open: true,
        }
    }
}

impl ProtocolConfig {
    /// Build a fresh protocol instance for one transition.
    pub fn build(&self) -> Box<dyn TransitionProtocol> {
        match self.kind {
            ProtocolKind::OutIn => Box::new(OutIn::new(self.concurrent_close, self.concurrent_open)),
            ProtocolKind::CrossFade => Box::new(CrossFade::new()),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
