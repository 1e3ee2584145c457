//! Shared test helpers for unit and integration tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so the helpers
//! are available in this crate's unit tests and, through the `test-utils`
//! feature, in the navigation and integration test crates.

use crate::behavior::{FrameContext, FramePass, PhaseContext, PhaseResult, Progress, SituationBehavior};
use crate::container::SituationContainer;
use crate::effect::TransitionEffect;
use crate::error::{Phase, PhaseFault};
use crate::transition::TransitionInfo;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

// ===========================================================================
// Call log
// ===========================================================================

/// Shared, ordered record of `"label:event"` entries.
pub type CallLog = Rc<RefCell<Vec<String>>>;

pub fn call_log() -> CallLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// Events recorded for `label`, without the prefix, in order.
pub fn events(log: &CallLog, label: &str) -> Vec<String> {
    let prefix = format!("{label}:");
    log.borrow()
        .iter()
        .filter_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
        .collect()
}

/// How many times `entry` was recorded.
pub fn count(log: &CallLog, entry: &str) -> usize {
    log.borrow().iter().filter(|e| e.as_str() == entry).count()
}

/// Position of the first `entry`, if recorded.
pub fn position(log: &CallLog, entry: &str) -> Option<usize> {
    log.borrow().iter().position(|e| e == entry)
}

// ===========================================================================
// Marker types
// ===========================================================================

// Distinct type parameters so several scripted situations can live in one
// container and still be found by type.

pub struct Home;
pub struct Settings;
pub struct Audio;
pub struct Video;
pub struct Title;
pub struct Game;
pub struct Pause;
pub struct Shop;
pub struct Inventory;
pub struct Map;

// ===========================================================================
// Scripted situation
// ===========================================================================

/// Poll counts and switches for a [`ScriptedSituation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    /// Polls until the body reports done (minimum 1).
    pub load_ticks: u32,
    pub setup_ticks: u32,
    pub open_ticks: u32,
    pub close_ticks: u32,
    /// Fail the first poll of this phase's body.
    pub fail_on: Option<Phase>,
    pub preloadable: bool,
    pub owns_scene: bool,
    /// Register an action on every scope a hook sees, logging
    /// `"label:<scope>_scope_expired"` when it fires.
    pub track_scopes: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            load_ticks: 1,
            setup_ticks: 1,
            open_ticks: 1,
            close_ticks: 1,
            fail_on: None,
            preloadable: false,
            owns_scene: false,
            track_scopes: false,
        }
    }
}

/// A behavior that records every hook into a [`CallLog`].
///
/// Entries are `"label:event"`, or `"label:forced_event"` when the hook runs
/// for a forced teardown. Phase bodies record once per run, on their first
/// poll.
pub struct ScriptedSituation<M: 'static = ()> {
    label: String,
    script: Script,
    log: CallLog,
    polls: HashMap<Phase, u32>,
    frames: u64,
    _marker: PhantomData<fn() -> M>,
}

impl<M: 'static> ScriptedSituation<M> {
    pub fn new(label: &str, log: &CallLog) -> Self {
        Self::with_script(label, log, Script::default())
    }

    pub fn with_script(label: &str, log: &CallLog, script: Script) -> Self {
        Self {
            label: label.to_string(),
            script,
            log: log.clone(),
            polls: HashMap::new(),
            frames: 0,
            _marker: PhantomData,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn script_mut(&mut self) -> &mut Script {
        &mut self.script
    }

    /// Number of `update` passes received.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn record(&self, event: &str, ctx: &mut PhaseContext<'_>) {
        let entry = if ctx.is_forced() {
            format!("{}:forced_{event}", self.label)
        } else {
            format!("{}:{event}", self.label)
        };
        self.log.borrow_mut().push(entry);
        if self.script.track_scopes {
            let log = self.log.clone();
            let expired = format!("{}:{}_scope_expired", self.label, ctx.scope.label());
            ctx.scope.on_expire(move || log.borrow_mut().push(expired));
        }
    }

    fn body(&mut self, phase: Phase, ticks: u32, event: &str, ctx: &mut PhaseContext<'_>) -> PhaseResult {
        let first = self.polls.get(&phase).copied().unwrap_or(0) == 0;
        if first {
            self.record(event, ctx);
        }
        if self.script.fail_on == Some(phase) {
            self.polls.remove(&phase);
            return Err(PhaseFault::new(format!("{} scripted {phase} fault", self.label)));
        }
        let polls = self.polls.entry(phase).or_insert(0);
        *polls += 1;
        if *polls >= ticks.max(1) {
            self.polls.remove(&phase);
            Ok(Progress::Done)
        } else {
            Ok(Progress::Pending)
        }
    }
}

impl<M: 'static> SituationBehavior for ScriptedSituation<M> {
    fn name(&self) -> &str {
        &self.label
    }

    fn is_preloadable(&self) -> bool {
        self.script.preloadable
    }

    fn owns_scene(&self) -> bool {
        self.script.owns_scene
    }

    fn load(&mut self, ctx: &mut PhaseContext<'_>) -> PhaseResult {
        let ticks = self.script.load_ticks;
        self.body(Phase::Load, ticks, "load", ctx)
    }

    fn setup(&mut self, ctx: &mut PhaseContext<'_>) -> PhaseResult {
        let ticks = self.script.setup_ticks;
        self.body(Phase::Setup, ticks, "setup", ctx)
    }

    fn open(&mut self, ctx: &mut PhaseContext<'_>) -> PhaseResult {
        let ticks = self.script.open_ticks;
        self.body(Phase::Open, ticks, "open", ctx)
    }

    fn close(&mut self, ctx: &mut PhaseContext<'_>) -> PhaseResult {
        let ticks = self.script.close_ticks;
        self.body(Phase::Close, ticks, "close", ctx)
    }

    fn on_pre_open(&mut self, ctx: &mut PhaseContext<'_>) {
        self.record("pre_open", ctx);
    }

    fn on_post_open(&mut self, ctx: &mut PhaseContext<'_>) {
        self.record("post_open", ctx);
    }

    fn on_pre_close(&mut self, ctx: &mut PhaseContext<'_>) {
        self.record("pre_close", ctx);
    }

    fn on_post_close(&mut self, ctx: &mut PhaseContext<'_>) {
        self.record("post_close", ctx);
        self.polls.remove(&Phase::Close);
    }

    fn on_activate(&mut self, ctx: &mut PhaseContext<'_>) {
        self.record("activate", ctx);
    }

    fn on_deactivate(&mut self, ctx: &mut PhaseContext<'_>) {
        self.record("deactivate", ctx);
    }

    fn on_cleanup(&mut self, ctx: &mut PhaseContext<'_>) {
        self.record("cleanup", ctx);
        self.polls.remove(&Phase::Setup);
    }

    fn on_unload(&mut self, ctx: &mut PhaseContext<'_>) {
        self.record("unload", ctx);
        // An interrupted load starts over next time.
        self.polls.clear();
    }

    fn update(&mut self, frame: &FrameContext) {
        if frame.pass == FramePass::Update {
            self.frames += 1;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ===========================================================================
// Scripted effect
// ===========================================================================

/// An effect logging `"label:begin"`, `"label:enter"`, `"label:update"`,
/// `"label:exit"` and `"label:end"`.
pub struct ScriptedEffect {
    label: String,
    log: CallLog,
    enter_ticks: u32,
    exit_ticks: u32,
    enter_polls: u32,
    exit_polls: u32,
    fail_enter: bool,
}

impl ScriptedEffect {
    pub fn new(label: &str, log: &CallLog, enter_ticks: u32, exit_ticks: u32) -> Self {
        Self {
            label: label.to_string(),
            log: log.clone(),
            enter_ticks,
            exit_ticks,
            enter_polls: 0,
            exit_polls: 0,
            fail_enter: false,
        }
    }

    /// Fail on the first enter poll.
    pub fn failing(mut self) -> Self {
        self.fail_enter = true;
        self
    }

    fn push(&self, event: &str) {
        self.log.borrow_mut().push(format!("{}:{event}", self.label));
    }
}

impl TransitionEffect for ScriptedEffect {
    fn name(&self) -> &str {
        &self.label
    }

    fn on_transition_begin(&mut self, _info: &TransitionInfo) {
        self.push("begin");
    }

    fn poll_enter(&mut self, _info: &TransitionInfo) -> PhaseResult {
        if self.enter_polls == 0 {
            self.push("enter");
        }
        if self.fail_enter {
            return Err(PhaseFault::new("effect target missing"));
        }
        self.enter_polls += 1;
        Ok(if self.enter_polls >= self.enter_ticks.max(1) {
            Progress::Done
        } else {
            Progress::Pending
        })
    }

    fn update(&mut self, _frame: &FrameContext) {
        self.push("update");
    }

    fn poll_exit(&mut self, _info: &TransitionInfo) -> PhaseResult {
        if self.exit_polls == 0 {
            self.push("exit");
        }
        self.exit_polls += 1;
        Ok(if self.exit_polls >= self.exit_ticks.max(1) {
            Progress::Done
        } else {
            Progress::Pending
        })
    }

    fn on_transition_end(&mut self, _info: &TransitionInfo) {
        self.push("end");
    }
}

// ===========================================================================
// Frame drivers
// ===========================================================================

const DELTA: f32 = 1.0 / 60.0;

/// Run `n` full frames (update, late update, fixed update).
pub fn run_frames(container: &mut SituationContainer, n: usize) {
    for _ in 0..n {
        container.update(DELTA);
        container.late_update(DELTA);
        container.fixed_update(DELTA);
    }
}

/// Run frames until no transition or preload is in flight. Returns the number
/// of frames run.
///
/// # Panics
///
/// Panics if the container is still busy after `max_frames`.
pub fn run_until_idle(container: &mut SituationContainer, max_frames: usize) -> usize {
    let mut frames = 0;
    while container.is_transitioning() || container.has_pending_preloads() {
        assert!(
            frames < max_frames,
            "container still busy after {max_frames} frames"
        );
        run_frames(container, 1);
        frames += 1;
    }
    frames
}
