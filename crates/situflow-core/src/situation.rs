//! The per-situation lifecycle state machine.
//!
//! A [`Situation`] wraps a [`SituationBehavior`] and enforces the ordering
//! of its phases:
//!
//! ```text
//! Standby -> Loading -> Loaded -> SetupFinished -> Opening -> OpenFinished
//!    ^                     |            |                         |
//!    +------ unload -------+-- cleanup -+------- post_close ------+
//! ```
//!
//! Every operation is guarded by a state comparison, so calling a phase
//! twice, or calling an exit before its enter was reached, is a no-op.
//! Preloading is tracked separately in [`PreloadState`]; when a preload and
//! a transition both ask for a load, only the first caller runs the body and
//! the other one waits for `Loaded`.

use crate::behavior::{FrameContext, PhaseContext, PhaseResult, Progress, SituationBehavior};
use crate::error::{GuardViolation, PhaseFault};
use crate::id::{ContainerId, SituationId};
use crate::scope::{ScopeKind, SituationScopes};
use crate::services::ServiceScope;
use crate::transition::TransitionInfo;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;
use std::rc::Rc;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Lifecycle position of a situation. Ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SituationState {
    #[default]
    Invalid,
    Standby,
    Loading,
    Loaded,
    SetupFinished,
    Opening,
    OpenFinished,
}

/// Preload position, orthogonal to [`SituationState`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PreloadState {
    #[default]
    None,
    PreLoading,
    PreLoaded,
}

/// Which kind of caller is running the load body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadOwner {
    Transition,
    Preload,
}

/// Everything a lifecycle call needs from its surroundings.
#[derive(Clone, Copy)]
pub struct PhaseEnv<'a> {
    pub id: SituationId,
    pub info: &'a TransitionInfo,
    /// Service scope the situation's own scope is chained to on load.
    pub parent_services: &'a Rc<ServiceScope>,
}

// ---------------------------------------------------------------------------
// Situation
// ---------------------------------------------------------------------------

pub struct Situation {
    name: String,
    kind: TypeId,
    behavior: Box<dyn SituationBehavior>,
    state: SituationState,
    preload: PreloadState,
    active: bool,
    /// Set between `pre_close` and `post_close`.
    closing: bool,
    container: Option<ContainerId>,
    load_owner: Option<LoadOwner>,
    scopes: SituationScopes,
    services: Option<Rc<ServiceScope>>,
}

impl Situation {
    pub fn new<S: SituationBehavior>(behavior: S) -> Self {
        Self::from_boxed(Box::new(behavior))
    }

    pub fn from_boxed(behavior: Box<dyn SituationBehavior>) -> Self {
        let kind = behavior.as_any().type_id();
        Self {
            name: behavior.name().to_string(),
            kind,
            behavior,
            state: SituationState::Invalid,
            preload: PreloadState::None,
            active: false,
            closing: false,
            container: None,
            load_owner: None,
            scopes: SituationScopes::default(),
            services: None,
        }
    }

    // -- Accessors --

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type id of the concrete behavior.
    pub fn kind(&self) -> TypeId {
        self.kind
    }

    pub fn state(&self) -> SituationState {
        self.state
    }

    pub fn preload_state(&self) -> PreloadState {
        self.preload
    }

    pub fn is_preloaded(&self) -> bool {
        self.preload != PreloadState::None
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn container(&self) -> Option<ContainerId> {
        self.container
    }

    pub fn services(&self) -> Option<&Rc<ServiceScope>> {
        self.services.as_ref()
    }

    pub fn scopes(&self) -> &SituationScopes {
        &self.scopes
    }

    pub fn behavior(&self) -> &dyn SituationBehavior {
        self.behavior.as_ref()
    }

    pub fn behavior_mut(&mut self) -> &mut dyn SituationBehavior {
        self.behavior.as_mut()
    }

    pub fn downcast_ref<T: SituationBehavior>(&self) -> Option<&T> {
        self.behavior.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: SituationBehavior>(&mut self) -> Option<&mut T> {
        self.behavior.as_any_mut().downcast_mut::<T>()
    }

    // -- Internals --

    fn set_state(&mut self, state: SituationState) {
        tracing::debug!(situation = %self.name, from = ?self.state, to = ?state, "situation state");
        self.state = state;
    }

    fn usable(&self, op: &'static str) -> bool {
        if self.state == SituationState::Invalid {
            tracing::warn!(
                op,
                error = %GuardViolation::InvalidState(self.name.clone()),
                "guard violation ignored"
            );
            return false;
        }
        true
    }

    /// Run a behavior hook with a context over the given segment scope.
    fn hook<R>(
        &mut self,
        env: &PhaseEnv<'_>,
        kind: ScopeKind,
        f: impl FnOnce(&mut dyn SituationBehavior, &mut PhaseContext<'_>) -> R,
    ) -> R {
        let Situation {
            behavior,
            scopes,
            services,
            ..
        } = self;
        let mut ctx = PhaseContext {
            situation: env.id,
            transition: env.info,
            scope: scopes.get_mut(kind),
            services: services.as_ref(),
        };
        f(behavior.as_mut(), &mut ctx)
    }

    // -----------------------------------------------------------------------
    // Standby
    // -----------------------------------------------------------------------

    /// Bind to `container`. Binding to a second container is refused.
    pub fn standby(&mut self, container: ContainerId) -> Result<(), GuardViolation> {
        if let Some(bound) = self.container {
            if bound != container {
                return Err(GuardViolation::ForeignContainer {
                    situation: self.name.clone(),
                    bound,
                    requested: container,
                });
            }
        }
        self.container = Some(container);
        if self.state < SituationState::Standby {
            self.set_state(SituationState::Standby);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Load / Setup
    // -----------------------------------------------------------------------

    /// Poll the load phase. Waits instead of running the body when the
    /// other kind of caller already owns the current load run.
    pub fn poll_load(&mut self, env: &PhaseEnv<'_>, preload: bool) -> PhaseResult {
        if !self.usable("load") || self.state >= SituationState::Loaded {
            return Ok(Progress::Done);
        }
        let owner = if preload {
            LoadOwner::Preload
        } else {
            LoadOwner::Transition
        };
        match self.load_owner {
            Some(running) if running != owner => return Ok(Progress::Pending),
            Some(_) => {}
            None => {
                if self.state == SituationState::Standby {
                    self.services = Some(ServiceScope::child(env.parent_services, &self.name));
                    self.set_state(SituationState::Loading);
                }
                self.load_owner = Some(owner);
            }
        }

        match self.hook(env, ScopeKind::Load, |b, ctx| b.load(ctx)) {
            Ok(Progress::Done) => {
                self.load_owner = None;
                self.set_state(SituationState::Loaded);
                Ok(Progress::Done)
            }
            Ok(Progress::Pending) => Ok(Progress::Pending),
            Err(fault) => {
                // Let whichever caller polls next resume the body.
                self.load_owner = None;
                Err(fault)
            }
        }
    }

    pub fn poll_setup(&mut self, env: &PhaseEnv<'_>) -> PhaseResult {
        if !self.usable("setup") || self.state >= SituationState::SetupFinished {
            return Ok(Progress::Done);
        }
        if self.state < SituationState::Loaded {
            return Err(PhaseFault::new(format!(
                "setup requested before load finished ({:?})",
                self.state
            )));
        }
        let progress = self.hook(env, ScopeKind::Setup, |b, ctx| b.setup(ctx))?;
        if progress.is_done() {
            self.set_state(SituationState::SetupFinished);
        }
        Ok(progress)
    }

    // -----------------------------------------------------------------------
    // Activate / Deactivate
    // -----------------------------------------------------------------------

    pub fn activate(&mut self, env: &PhaseEnv<'_>) {
        if !self.usable("activate") || self.active {
            return;
        }
        self.active = true;
        self.hook(env, ScopeKind::Active, |b, ctx| b.on_activate(ctx));
    }

    /// Focus-like state is dropped before the flag flips.
    pub fn deactivate(&mut self, env: &PhaseEnv<'_>) {
        if !self.active {
            return;
        }
        self.hook(env, ScopeKind::Active, |b, ctx| b.on_deactivate(ctx));
        self.scopes.active.clear();
        self.active = false;
    }

    // -----------------------------------------------------------------------
    // Open
    // -----------------------------------------------------------------------

    pub fn pre_open(&mut self, env: &PhaseEnv<'_>) {
        if self.state != SituationState::SetupFinished {
            return;
        }
        self.set_state(SituationState::Opening);
        self.hook(env, ScopeKind::Open, |b, ctx| b.on_pre_open(ctx));
    }

    pub fn poll_open(&mut self, env: &PhaseEnv<'_>) -> PhaseResult {
        if self.state != SituationState::Opening {
            return Ok(Progress::Done);
        }
        let result = self.hook(env, ScopeKind::Animation, |b, ctx| b.open(ctx));
        if !matches!(result, Ok(Progress::Pending)) {
            self.scopes.animation.clear();
        }
        result
    }

    pub fn post_open(&mut self, env: &PhaseEnv<'_>) {
        if self.state != SituationState::Opening {
            return;
        }
        self.set_state(SituationState::OpenFinished);
        self.hook(env, ScopeKind::Open, |b, ctx| b.on_post_open(ctx));
    }

    // -----------------------------------------------------------------------
    // Close
    // -----------------------------------------------------------------------

    pub fn pre_close(&mut self, env: &PhaseEnv<'_>) {
        if self.state <= SituationState::SetupFinished || self.closing {
            return;
        }
        self.closing = true;
        self.hook(env, ScopeKind::Open, |b, ctx| b.on_pre_close(ctx));
    }

    pub fn poll_close(&mut self, env: &PhaseEnv<'_>) -> PhaseResult {
        if !self.closing {
            return Ok(Progress::Done);
        }
        let result = self.hook(env, ScopeKind::Animation, |b, ctx| b.close(ctx));
        if !matches!(result, Ok(Progress::Pending)) {
            self.scopes.animation.clear();
        }
        result
    }

    /// Rewinds to `SetupFinished` and expires the open scope.
    pub fn post_close(&mut self, env: &PhaseEnv<'_>) {
        if self.state <= SituationState::SetupFinished {
            return;
        }
        self.hook(env, ScopeKind::Open, |b, ctx| b.on_post_close(ctx));
        self.scopes.open.clear();
        self.closing = false;
        self.set_state(SituationState::SetupFinished);
    }

    // -----------------------------------------------------------------------
    // Cleanup / Unload
    // -----------------------------------------------------------------------

    /// Rewinds `SetupFinished` to `Loaded` and expires the setup scope.
    pub fn cleanup(&mut self, env: &PhaseEnv<'_>) {
        if self.state < SituationState::SetupFinished {
            return;
        }
        if self.state > SituationState::SetupFinished {
            tracing::warn!(situation = %self.name, state = ?self.state, "cleanup while still open ignored");
            return;
        }
        self.hook(env, ScopeKind::Setup, |b, ctx| b.on_cleanup(ctx));
        self.scopes.setup.clear();
        self.set_state(SituationState::Loaded);
    }

    /// Rewinds to `Standby`, expires the load scope and disposes the service
    /// scope. Deferred while the situation is preloaded.
    pub fn unload(&mut self, env: &PhaseEnv<'_>) {
        if self.state <= SituationState::Standby {
            return;
        }
        if self.is_preloaded() {
            tracing::debug!(situation = %self.name, "unload deferred, situation is preloaded");
            return;
        }
        if self.state > SituationState::Loaded {
            tracing::warn!(situation = %self.name, state = ?self.state, "unload before cleanup ignored");
            return;
        }
        self.hook(env, ScopeKind::Load, |b, ctx| b.on_unload(ctx));
        self.scopes.load.clear();
        if let Some(services) = self.services.take() {
            services.dispose();
        }
        self.load_owner = None;
        self.set_state(SituationState::Standby);
    }

    // -----------------------------------------------------------------------
    // Release
    // -----------------------------------------------------------------------

    /// Forced teardown: close (without the animated body), deactivate,
    /// cleanup, and unload unless preloaded. `env.info` should be a forced
    /// context so hooks can tell this apart from a graceful close.
    pub fn release(&mut self, container: ContainerId, env: &PhaseEnv<'_>) -> Result<(), GuardViolation> {
        match self.container {
            None => return Err(GuardViolation::Unbound(self.name.clone())),
            Some(bound) if bound != container => {
                return Err(GuardViolation::ForeignContainer {
                    situation: self.name.clone(),
                    bound,
                    requested: container,
                });
            }
            Some(_) => {}
        }
        tracing::debug!(situation = %self.name, state = ?self.state, "releasing");
        self.pre_close(env);
        self.scopes.animation.clear();
        self.post_close(env);
        self.deactivate(env);
        self.cleanup(env);
        if !self.is_preloaded() {
            self.unload(env);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Preload
    // -----------------------------------------------------------------------

    /// Mark the situation as preloading. Returns false when the behavior is
    /// not preloadable or a preload is already recorded.
    pub fn begin_preload(&mut self) -> bool {
        if !self.behavior.is_preloadable() {
            tracing::debug!(situation = %self.name, "not preloadable");
            return false;
        }
        if self.preload != PreloadState::None {
            return false;
        }
        self.preload = PreloadState::PreLoading;
        true
    }

    /// Drive a preload started with [`begin_preload`](Self::begin_preload).
    pub fn poll_preload(&mut self, env: &PhaseEnv<'_>) -> PhaseResult {
        match self.preload {
            PreloadState::None => Ok(Progress::Done),
            PreloadState::PreLoaded => Ok(Progress::Done),
            PreloadState::PreLoading => {
                let progress = self.poll_load(env, true)?;
                if progress.is_done() {
                    self.preload = PreloadState::PreLoaded;
                    tracing::debug!(situation = %self.name, "preloaded");
                }
                Ok(progress)
            }
        }
    }

    /// Abandon a preload whose load body failed. The partial load is undone
    /// unless a live chain is about to take it over (`in_use`).
    pub fn fail_preload(&mut self, env: &PhaseEnv<'_>, in_use: bool) {
        if self.preload == PreloadState::None {
            return;
        }
        self.preload = PreloadState::None;
        if self.load_owner == Some(LoadOwner::Preload) {
            self.load_owner = None;
        }
        tracing::debug!(situation = %self.name, "preload abandoned");
        if !in_use {
            self.unload(env);
        }
    }

    /// Clear the preload flag. When the situation never became part of a
    /// live chain (`in_use` false, state at most `SetupFinished`) it is
    /// unloaded as well. A preloaded situation may have been set up by a
    /// transition that later closed it, and unload only accepts `Loaded`,
    /// so cleanup runs first.
    pub fn unpreload(&mut self, env: &PhaseEnv<'_>, in_use: bool) {
        if self.preload == PreloadState::None {
            return;
        }
        self.preload = PreloadState::None;
        if self.load_owner == Some(LoadOwner::Preload) {
            self.load_owner = None;
        }
        if !in_use && self.state <= SituationState::SetupFinished {
            self.cleanup(env);
            self.unload(env);
        }
    }

    // -----------------------------------------------------------------------
    // Per-frame hooks
    // -----------------------------------------------------------------------

    pub fn update(&mut self, frame: &FrameContext) {
        self.behavior.update(frame);
    }

    pub fn late_update(&mut self, frame: &FrameContext) {
        self.behavior.late_update(frame);
    }

    pub fn fixed_update(&mut self, frame: &FrameContext) {
        self.behavior.fixed_update(frame);
    }
}

impl fmt::Debug for Situation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Situation")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("preload", &self.preload)
            .field("active", &self.active)
            .field("closing", &self.closing)
            .field("container", &self.container)
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
