//! The extension surface implemented by concrete situations.
//!
//! A [`SituationBehavior`] supplies the phase bodies. Asynchronous phases
//! (load, setup, open, close) are poll functions called at most once per
//! tick until they return [`Progress::Done`]; a body that needs to wait N
//! frames counts its own polls. The remaining hooks are synchronous. All
//! hooks have no-op defaults, so a behavior only overrides what it needs.

use crate::error::PhaseFault;
use crate::id::SituationId;
use crate::scope::Scope;
use crate::services::ServiceScope;
use crate::transition::TransitionInfo;
use std::any::Any;
use std::rc::Rc;

/// Result of polling an asynchronous body once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Progress {
    Pending,
    Done,
}

impl Progress {
    pub fn is_done(self) -> bool {
        self == Progress::Done
    }

    /// `Done` only if both are done.
    pub fn and(self, other: Progress) -> Progress {
        if self.is_done() && other.is_done() {
            Progress::Done
        } else {
            Progress::Pending
        }
    }
}

/// What a phase body returns.
pub type PhaseResult = Result<Progress, PhaseFault>;

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// Passed to every phase hook.
pub struct PhaseContext<'a> {
    /// The situation running the hook.
    pub situation: SituationId,
    /// The transition driving this phase. For forced teardown this is a
    /// synthetic context with [`TransitionInfo::is_forced`] set.
    pub transition: &'a TransitionInfo,
    /// The scope of the segment the hook belongs to. Actions registered here
    /// fire when the segment ends.
    pub scope: &'a mut Scope,
    /// The situation's service scope. `None` before load and after unload.
    pub services: Option<&'a Rc<ServiceScope>>,
}

impl PhaseContext<'_> {
    /// Resolve a service through the situation's scope chain.
    pub fn resolve<T: 'static>(&self) -> Option<Rc<T>> {
        self.services?.resolve::<T>()
    }

    /// Whether this hook runs for a backward navigation.
    pub fn is_back(&self) -> bool {
        self.transition.is_back()
    }

    pub fn is_forced(&self) -> bool {
        self.transition.is_forced()
    }
}

/// Which of the three per-frame passes is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePass {
    Update,
    LateUpdate,
    FixedUpdate,
}

/// Passed to per-frame hooks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    pub pass: FramePass,
    /// Frames elapsed since the container was created.
    pub frame: u64,
    /// Seconds since the previous call of the same pass.
    pub delta: f32,
}

// ---------------------------------------------------------------------------
// SituationBehavior
// ---------------------------------------------------------------------------

/// Phase bodies and capabilities of one kind of situation.
pub trait SituationBehavior: Any {
    /// Human-readable name for logs and snapshots.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Whether the situation may be loaded ahead of being targeted.
    fn is_preloadable(&self) -> bool {
        false
    }

    /// Whether the situation claims exclusive ownership of the outer
    /// environment. Such situations can never coexist, so overlapping
    /// protocols are rejected for chains containing them.
    fn owns_scene(&self) -> bool {
        false
    }

    fn load(&mut self, ctx: &mut PhaseContext<'_>) -> PhaseResult {
        let _ = ctx;
        Ok(Progress::Done)
    }

    fn setup(&mut self, ctx: &mut PhaseContext<'_>) -> PhaseResult {
        let _ = ctx;
        Ok(Progress::Done)
    }

    /// Opening animation. `ctx.scope` is the animation scope, cleared as
    /// soon as the body reports done.
    fn open(&mut self, ctx: &mut PhaseContext<'_>) -> PhaseResult {
        let _ = ctx;
        Ok(Progress::Done)
    }

    /// Closing animation. Skipped on forced teardown.
    fn close(&mut self, ctx: &mut PhaseContext<'_>) -> PhaseResult {
        let _ = ctx;
        Ok(Progress::Done)
    }

    fn on_pre_open(&mut self, _ctx: &mut PhaseContext<'_>) {}
    fn on_post_open(&mut self, _ctx: &mut PhaseContext<'_>) {}
    fn on_pre_close(&mut self, _ctx: &mut PhaseContext<'_>) {}
    fn on_post_close(&mut self, _ctx: &mut PhaseContext<'_>) {}
    fn on_activate(&mut self, _ctx: &mut PhaseContext<'_>) {}
    /// Drop focus-like state here; runs before the active flag is cleared.
    fn on_deactivate(&mut self, _ctx: &mut PhaseContext<'_>) {}
    fn on_cleanup(&mut self, _ctx: &mut PhaseContext<'_>) {}
    fn on_unload(&mut self, _ctx: &mut PhaseContext<'_>) {}

    fn update(&mut self, _frame: &FrameContext) {}
    fn late_update(&mut self, _frame: &FrameContext) {}
    fn fixed_update(&mut self, _frame: &FrameContext) {}

    /// Downcast to `&dyn Any` for typed access to the concrete behavior.
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_and_requires_both() {
        assert_eq!(Progress::Done.and(Progress::Done), Progress::Done);
        assert_eq!(Progress::Done.and(Progress::Pending), Progress::Pending);
        assert_eq!(Progress::Pending.and(Progress::Done), Progress::Pending);
    }

    struct Bare;

    impl SituationBehavior for Bare {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn defaults_are_inert() {
        let bare = Bare;
        assert!(bare.name().ends_with("Bare"));
        assert!(!bare.is_preloadable());
        assert!(!bare.owns_scene());
        assert!(bare.as_any().is::<Bare>());
    }
}
