//! The situation container: owns the situation tree and orchestrates
//! transitions between its chains.
//!
//! # Architecture
//!
//! The `SituationContainer` owns:
//! - An arena of [`Situation`]s (`SlotMap<SituationId, _>`) with explicit
//!   parent/children links
//! - The running chain (root to current leaf)
//! - At most one in-flight transition, driven by a [`TransitionProtocol`]
//! - A side list of preload runs, independent of transitions
//!
//! # Frame passes
//!
//! The host calls [`update`](SituationContainer::update),
//! [`late_update`](SituationContainer::late_update) and
//! [`fixed_update`](SituationContainer::fixed_update) once per frame.
//! `update` first advances preload runs, then the in-flight transition,
//! then the per-frame hooks. Requests made between frames are only
//! validated and recorded; nothing runs until the next `update`.
//!
//! # Transition pipeline
//!
//! Given a target, the container finds the deepest situation shared by the
//! running chain and the target's chain. Everything below it on the running
//! side is the *prev* chain (innermost first), everything below it on the
//! target side is the *next* chain (outermost first). The protocol then
//! sequences the [`TransitionResolver`] routines over those chains.

use crate::behavior::{FrameContext, FramePass, PhaseResult, Progress, SituationBehavior};
use crate::config::ContainerConfig;
use crate::effect::TransitionEffect;
use crate::error::{GuardViolation, Phase, TransitionError};
use crate::id::{ContainerId, SituationId};
use crate::protocol::{OutIn, RoutineResult, TransitionProtocol, TransitionResolver};
use crate::services::ServiceScope;
use crate::situation::{PhaseEnv, Situation, SituationState};
use crate::transition::{
    TransitionHandle, TransitionInfo, TransitionKind, TransitionState, TransitionStep,
};
use slotmap::SlotMap;
use std::any::TypeId;
use std::collections::HashMap;
use std::rc::Rc;

/// Called with the target's behavior once the next chain is set up.
pub type SetupCallback = Box<dyn FnOnce(&mut dyn SituationBehavior)>;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Options for one transition or reset.
#[derive(Default)]
pub struct TransitionRequest {
    /// Treat the common ancestor as empty and rebuild the whole chain.
    pub refresh: bool,
    /// Mark the transition as a backward navigation.
    pub back: bool,
    /// Initial step ceiling. Defaults to the container's configured step.
    pub step: Option<TransitionStep>,
    /// Protocol for this transition instead of the configured default.
    pub protocol: Option<Box<dyn TransitionProtocol>>,
    pub effects: Vec<Box<dyn TransitionEffect>>,
    pub on_setup: Option<SetupCallback>,
}

impl TransitionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(mut self) -> Self {
        self.refresh = true;
        self
    }

    pub fn back(mut self) -> Self {
        self.back = true;
        self
    }

    pub fn with_step(mut self, step: TransitionStep) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_protocol(mut self, protocol: impl TransitionProtocol + 'static) -> Self {
        self.protocol = Some(Box::new(protocol));
        self
    }

    pub fn with_effect(mut self, effect: impl TransitionEffect + 'static) -> Self {
        self.effects.push(Box::new(effect));
        self
    }

    pub fn on_setup(mut self, callback: impl FnOnce(&mut dyn SituationBehavior) + 'static) -> Self {
        self.on_setup = Some(Box::new(callback));
        self
    }
}

// ---------------------------------------------------------------------------
// Driver state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
enum ChainRun {
    #[default]
    Idle,
    Running(Vec<bool>),
    Done,
}

#[derive(Debug, Default)]
enum LoadRun {
    #[default]
    Idle,
    Loading(Vec<bool>),
    AwaitSetup,
    SettingUp(usize),
    Done,
}

#[derive(Debug, Default)]
enum OpenRun {
    #[default]
    Idle,
    Opening(Vec<bool>),
    AwaitComplete,
    Done,
}

/// Per-routine progress of one transition.
struct TransitionRun {
    info: Rc<TransitionInfo>,
    target: SituationId,
    effects: Vec<Box<dyn TransitionEffect>>,
    effect_active: bool,
    on_setup: Option<SetupCallback>,
    started: bool,
    deactivated: bool,
    enter: ChainRun,
    close: ChainRun,
    unloaded: bool,
    load: LoadRun,
    open: OpenRun,
    exit: ChainRun,
    activated: bool,
    finished: bool,
}

impl TransitionRun {
    fn new(
        info: Rc<TransitionInfo>,
        target: SituationId,
        effects: Vec<Box<dyn TransitionEffect>>,
        on_setup: Option<SetupCallback>,
    ) -> Self {
        Self {
            info,
            target,
            effects,
            effect_active: false,
            on_setup,
            started: false,
            deactivated: false,
            enter: ChainRun::Idle,
            close: ChainRun::Idle,
            unloaded: false,
            load: LoadRun::Idle,
            open: OpenRun::Idle,
            exit: ChainRun::Idle,
            activated: false,
            finished: false,
        }
    }
}

struct TransitionDriver {
    protocol: Box<dyn TransitionProtocol>,
    run: TransitionRun,
}

struct SituationSlot {
    situation: Situation,
    parent: Option<SituationId>,
    children: Vec<SituationId>,
}

// ---------------------------------------------------------------------------
// SituationContainer
// ---------------------------------------------------------------------------

pub struct SituationContainer {
    id: ContainerId,
    config: ContainerConfig,
    slots: SlotMap<SituationId, SituationSlot>,
    roots: Vec<SituationId>,
    /// Root to current leaf.
    running: Vec<SituationId>,
    driver: Option<TransitionDriver>,
    preloads: Vec<SituationId>,
    /// Last load fault of a preload run, until the next preload request.
    preload_errors: HashMap<SituationId, TransitionError>,
    root_services: Rc<ServiceScope>,
    preload_info: Rc<TransitionInfo>,
    release_info: Rc<TransitionInfo>,
    frame: u64,
}

impl Default for SituationContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl SituationContainer {
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        let root_services = ServiceScope::root(config.label.clone());
        Self {
            id: ContainerId::next(),
            config,
            slots: SlotMap::with_key(),
            roots: Vec::new(),
            running: Vec::new(),
            driver: None,
            preloads: Vec::new(),
            preload_errors: HashMap::new(),
            root_services,
            preload_info: Rc::new(TransitionInfo::detached(TransitionKind::Preload)),
            release_info: Rc::new(TransitionInfo::detached(TransitionKind::Release)),
            frame: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Tree management
    // -----------------------------------------------------------------------

    /// Add a situation under `parent` (or as a root) and bind it to this
    /// container.
    pub fn register<S: SituationBehavior>(
        &mut self,
        behavior: S,
        parent: Option<SituationId>,
    ) -> Result<SituationId, GuardViolation> {
        self.attach(Situation::new(behavior), parent)
    }

    pub fn register_boxed(
        &mut self,
        behavior: Box<dyn SituationBehavior>,
        parent: Option<SituationId>,
    ) -> Result<SituationId, GuardViolation> {
        self.attach(Situation::from_boxed(behavior), parent)
    }

    /// Adopt an existing situation. Refused if it is bound to another
    /// container.
    pub fn attach(
        &mut self,
        mut situation: Situation,
        parent: Option<SituationId>,
    ) -> Result<SituationId, GuardViolation> {
        if let Some(parent) = parent {
            if !self.slots.contains_key(parent) {
                return Err(GuardViolation::UnknownSituation(format!("{parent:?}")));
            }
        }
        if let Err(violation) = situation.standby(self.id) {
            tracing::warn!(error = %violation, "attach refused");
            return Err(violation);
        }
        let id = self.slots.insert(SituationSlot {
            situation,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(parent) => self.slots[parent].children.push(id),
            None => self.roots.push(id),
        }
        Ok(id)
    }

    /// Release a leaf situation and hand it back. The situation stays bound
    /// to this container.
    pub fn detach(&mut self, id: SituationId) -> Result<Situation, GuardViolation> {
        let slot = self
            .slots
            .get(id)
            .ok_or_else(|| GuardViolation::UnknownSituation(format!("{id:?}")))?;
        if !slot.children.is_empty() {
            return Err(GuardViolation::HasChildren(slot.situation.name().to_string()));
        }
        self.cancel_if_involved(&[id]);
        self.release_one(id);
        self.unlink(id);
        self.running.retain(|r| *r != id);
        self.preloads.retain(|p| *p != id);
        self.preload_errors.remove(&id);
        let slot = self
            .slots
            .remove(id)
            .ok_or_else(|| GuardViolation::UnknownSituation(format!("{id:?}")))?;
        Ok(slot.situation)
    }

    /// Force-release and remove `id` with its whole subtree, leaves first.
    /// An in-flight transition touching the subtree is canceled.
    pub fn remove_subtree(&mut self, id: SituationId) -> Result<Vec<SituationId>, TransitionError> {
        if !self.slots.contains_key(id) {
            return Err(TransitionError::TargetNotFound(format!("{id:?}")));
        }
        let order = self.post_order(id);
        self.cancel_if_involved(&order);
        for &sid in &order {
            self.release_one(sid);
        }
        self.unlink(id);
        for &sid in &order {
            self.slots.remove(sid);
        }
        self.running.retain(|r| !order.contains(r));
        self.preloads.retain(|p| !order.contains(p));
        self.preload_errors.retain(|id, _| !order.contains(id));
        tracing::debug!(removed = order.len(), "subtree removed");
        Ok(order)
    }

    fn unlink(&mut self, id: SituationId) {
        match self.slots.get(id).and_then(|slot| slot.parent) {
            Some(parent) => {
                if let Some(parent) = self.slots.get_mut(parent) {
                    parent.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }
    }

    /// Unpreload then release one situation with the forced context.
    fn release_one(&mut self, id: SituationId) {
        let container = self.id;
        let info = self.release_info.clone();
        self.with_situation(id, &info, |s, env| {
            s.unpreload(env, false);
            if let Err(violation) = s.release(container, env) {
                tracing::warn!(error = %violation, "release refused");
            }
        });
    }

    /// Children before parents.
    fn post_order(&self, id: SituationId) -> Vec<SituationId> {
        let mut out = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                out.push(node);
                continue;
            }
            stack.push((node, true));
            if let Some(slot) = self.slots.get(node) {
                for &child in slot.children.iter().rev() {
                    stack.push((child, false));
                }
            }
        }
        out
    }

    /// Root to `id`, inclusive.
    pub fn chain_of(&self, id: SituationId) -> Vec<SituationId> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            let Some(slot) = self.slots.get(node) else {
                break;
            };
            chain.push(node);
            cursor = slot.parent;
        }
        chain.reverse();
        chain
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: SituationId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn situation(&self, id: SituationId) -> Option<&Situation> {
        self.slots.get(id).map(|slot| &slot.situation)
    }

    pub fn situation_mut(&mut self, id: SituationId) -> Option<&mut Situation> {
        self.slots.get_mut(id).map(|slot| &mut slot.situation)
    }

    /// Typed access to a situation's behavior.
    pub fn behavior<T: SituationBehavior>(&self, id: SituationId) -> Option<&T> {
        self.situation(id)?.downcast_ref::<T>()
    }

    pub fn behavior_mut<T: SituationBehavior>(&mut self, id: SituationId) -> Option<&mut T> {
        self.situation_mut(id)?.downcast_mut::<T>()
    }

    pub fn state(&self, id: SituationId) -> Option<SituationState> {
        self.situation(id).map(|s| s.state())
    }

    pub fn parent(&self, id: SituationId) -> Option<SituationId> {
        self.slots.get(id)?.parent
    }

    pub fn children(&self, id: SituationId) -> &[SituationId] {
        self.slots
            .get(id)
            .map(|slot| slot.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn roots(&self) -> &[SituationId] {
        &self.roots
    }

    /// Iterate over all situations in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (SituationId, &Situation)> {
        self.slots.iter().map(|(id, slot)| (id, &slot.situation))
    }

    /// First situation whose behavior has the given type id.
    pub fn find_kind(&self, kind: TypeId) -> Option<SituationId> {
        self.slots
            .iter()
            .find(|(_, slot)| slot.situation.kind() == kind)
            .map(|(id, _)| id)
    }

    pub fn find<T: SituationBehavior>(&self) -> Option<SituationId> {
        self.find_kind(TypeId::of::<T>())
    }

    /// The deepest running situation.
    pub fn current(&self) -> Option<SituationId> {
        self.running.last().copied()
    }

    /// The running chain, root first.
    pub fn running(&self) -> &[SituationId] {
        &self.running
    }

    pub fn is_transitioning(&self) -> bool {
        self.driver.is_some()
    }

    /// A handle to the in-flight transition.
    pub fn current_transition(&self) -> Option<TransitionHandle> {
        self.driver
            .as_ref()
            .map(|driver| TransitionHandle::live(driver.run.info.clone()))
    }

    pub fn is_preloading(&self, id: SituationId) -> bool {
        self.preloads.contains(&id)
    }

    pub fn has_pending_preloads(&self) -> bool {
        !self.preloads.is_empty()
    }

    /// The fault that ended the last preload run of `id`, if it failed.
    pub fn preload_error(&self, id: SituationId) -> Option<&TransitionError> {
        self.preload_errors.get(&id)
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn root_services(&self) -> &Rc<ServiceScope> {
        &self.root_services
    }

    pub(crate) fn transition_info(&self) -> Option<&TransitionInfo> {
        self.driver.as_ref().map(|driver| driver.run.info.as_ref())
    }

    /// Register a service visible to every situation's scope chain.
    pub fn inject_root_service<T: 'static>(&self, value: T) {
        self.root_services.inject(value);
    }

    pub fn resolve_root_service<T: 'static>(&self) -> Option<Rc<T>> {
        self.root_services.resolve::<T>()
    }

    // -----------------------------------------------------------------------
    // Situation access with environment
    // -----------------------------------------------------------------------

    fn parent_services(&self, id: SituationId) -> Rc<ServiceScope> {
        self.slots
            .get(id)
            .and_then(|slot| slot.parent)
            .and_then(|parent| self.slots.get(parent))
            .and_then(|parent| parent.situation.services().cloned())
            .unwrap_or_else(|| self.root_services.clone())
    }

    fn with_situation<R>(
        &mut self,
        id: SituationId,
        info: &TransitionInfo,
        f: impl FnOnce(&mut Situation, &PhaseEnv<'_>) -> R,
    ) -> Option<R> {
        let parent_services = self.parent_services(id);
        let slot = self.slots.get_mut(id)?;
        let env = PhaseEnv {
            id,
            info,
            parent_services: &parent_services,
        };
        Some(f(&mut slot.situation, &env))
    }

    // -----------------------------------------------------------------------
    // Transition requests
    // -----------------------------------------------------------------------

    /// Start a transition to `target`. Rejections come back as a handle
    /// carrying the error; nothing is mutated in that case.
    pub fn transition(&mut self, target: SituationId, request: TransitionRequest) -> TransitionHandle {
        match self.begin_transition(target, request) {
            Ok(handle) => handle,
            Err(err) => self.reject(err),
        }
    }

    /// Transition to the first situation whose behavior is `T`.
    pub fn transition_to<T: SituationBehavior>(&mut self, request: TransitionRequest) -> TransitionHandle {
        match self.find::<T>() {
            Some(target) => self.transition(target, request),
            None => self.reject(TransitionError::TargetNotFound(
                std::any::type_name::<T>().to_string(),
            )),
        }
    }

    /// Close and reopen the whole running chain. Only protocols that keep
    /// prev and next lifetimes apart are accepted.
    pub fn reset(&mut self, request: TransitionRequest) -> TransitionHandle {
        match self.begin_reset(request) {
            Ok(handle) => handle,
            Err(err) => self.reject(err),
        }
    }

    fn reject(&self, err: TransitionError) -> TransitionHandle {
        if self.config.log_rejections {
            tracing::warn!(error = %err, "transition rejected");
        }
        TransitionHandle::rejected(err)
    }

    fn begin_transition(
        &mut self,
        target: SituationId,
        request: TransitionRequest,
    ) -> Result<TransitionHandle, TransitionError> {
        if self.driver.is_some() {
            return Err(TransitionError::AlreadyTransitioning);
        }
        let target_name = self
            .situation(target)
            .ok_or_else(|| TransitionError::TargetNotFound(format!("{target:?}")))?
            .name()
            .to_string();
        if self.current() == Some(target) && !request.refresh {
            return Err(TransitionError::AlreadyCurrent(target_name));
        }

        let target_chain = self.chain_of(target);
        let shared = if request.refresh {
            0
        } else {
            common_prefix_len(&self.running, &target_chain)
        };
        let prev: Vec<SituationId> = self.running[shared..].iter().rev().copied().collect();
        let next: Vec<SituationId> = target_chain[shared..].to_vec();

        let protocol = request
            .protocol
            .unwrap_or_else(|| self.config.protocol.build());
        self.validate_protocol(protocol.as_ref(), &prev, &next)?;

        let step = request.step.unwrap_or(self.config.initial_step);
        let info = Rc::new(TransitionInfo::new(
            prev,
            next,
            request.back,
            TransitionKind::Navigate,
            step,
        ));
        tracing::info!(
            situation = %target_name,
            protocol = protocol.name(),
            prev = info.prev().len(),
            next = info.next().len(),
            back = request.back,
            refresh = request.refresh,
            "transition accepted"
        );
        self.driver = Some(TransitionDriver {
            protocol,
            run: TransitionRun::new(info.clone(), target, request.effects, request.on_setup),
        });
        Ok(TransitionHandle::live(info))
    }

    fn begin_reset(&mut self, request: TransitionRequest) -> Result<TransitionHandle, TransitionError> {
        if self.driver.is_some() {
            return Err(TransitionError::AlreadyTransitioning);
        }
        let target = self.current().ok_or(TransitionError::NothingRunning)?;
        let protocol = request.protocol.unwrap_or_else(|| -> Box<dyn TransitionProtocol> {
            Box::new(OutIn::new(
                self.config.protocol.concurrent_close,
                self.config.protocol.concurrent_open,
            ))
        });
        if protocol.overlaps_lifetimes() {
            return Err(TransitionError::ResetOverlap(protocol.name().to_string()));
        }
        let prev: Vec<SituationId> = self.running.iter().rev().copied().collect();
        let next = self.running.clone();
        let step = request.step.unwrap_or(self.config.initial_step);
        let info = Rc::new(TransitionInfo::new(
            prev,
            next,
            request.back,
            TransitionKind::Reset,
            step,
        ));
        tracing::info!(chain = info.next().len(), protocol = protocol.name(), "reset accepted");
        self.driver = Some(TransitionDriver {
            protocol,
            run: TransitionRun::new(info.clone(), target, request.effects, request.on_setup),
        });
        Ok(TransitionHandle::live(info))
    }

    /// Protocols overlapping the two chains are refused when a situation
    /// sits in both chains (a refresh), or when either chain contains a
    /// scene-owning situation.
    fn validate_protocol(
        &self,
        protocol: &dyn TransitionProtocol,
        prev: &[SituationId],
        next: &[SituationId],
    ) -> Result<(), TransitionError> {
        if !protocol.overlaps_lifetimes() {
            return Ok(());
        }
        if let Some(shared) = prev.iter().find(|id| next.contains(id)) {
            let situation = self
                .situation(*shared)
                .map(|s| s.name().to_string())
                .unwrap_or_else(|| format!("{shared:?}"));
            return Err(TransitionError::SharedChainOverlap {
                protocol: protocol.name().to_string(),
                situation,
            });
        }
        let owner = prev
            .iter()
            .chain(next)
            .filter_map(|id| self.situation(*id))
            .find(|s| s.behavior().owns_scene());
        match owner {
            Some(situation) => Err(TransitionError::SceneOwnershipConflict {
                protocol: protocol.name().to_string(),
                situation: situation.name().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Mark the in-flight transition canceled and drop it.
    pub fn cancel_transition(&mut self) -> bool {
        let Some(mut driver) = self.driver.take() else {
            return false;
        };
        let info = driver.run.info.clone();
        info.set_state(TransitionState::Canceled);
        for effect in &mut driver.run.effects {
            effect.on_transition_end(&info);
        }
        tracing::info!("transition canceled");
        true
    }

    fn cancel_if_involved(&mut self, ids: &[SituationId]) {
        let involved = self.driver.as_ref().is_some_and(|driver| {
            ids.iter()
                .any(|id| driver.run.info.involves(*id) || *id == driver.run.target)
        });
        if involved {
            self.cancel_transition();
        }
    }

    // -----------------------------------------------------------------------
    // Preload
    // -----------------------------------------------------------------------

    /// Start loading `id` ahead of time. Returns immediately when it is
    /// already preloaded or not preloadable.
    pub fn preload(&mut self, id: SituationId) -> Result<(), TransitionError> {
        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| TransitionError::TargetNotFound(format!("{id:?}")))?;
        if slot.situation.begin_preload() {
            tracing::debug!(situation = %slot.situation.name(), "preload queued");
            self.preloads.push(id);
            self.preload_errors.remove(&id);
        }
        Ok(())
    }

    pub fn preload_type<T: SituationBehavior>(&mut self) -> Result<(), TransitionError> {
        let id = self
            .find::<T>()
            .ok_or_else(|| TransitionError::TargetNotFound(std::any::type_name::<T>().to_string()))?;
        self.preload(id)
    }

    /// Drop the preload mark. The situation is unloaded unless it is running
    /// or being opened by the in-flight transition. A situation the
    /// transition is closing is unloaded by the transition itself.
    pub fn unpreload(&mut self, id: SituationId) -> Result<(), TransitionError> {
        if !self.slots.contains_key(id) {
            return Err(TransitionError::TargetNotFound(format!("{id:?}")));
        }
        let in_use = self.in_use(id);
        let info = self.preload_info.clone();
        self.with_situation(id, &info, |s, env| s.unpreload(env, in_use));
        self.preloads.retain(|p| *p != id);
        Ok(())
    }

    /// Running and staying so, or about to be opened by the transition.
    fn in_use(&self, id: SituationId) -> bool {
        let closing = self
            .transition_info()
            .is_some_and(|info| info.prev().contains(&id));
        let opening = self
            .transition_info()
            .is_some_and(|info| info.next().contains(&id));
        (self.running.contains(&id) && !closing) || opening
    }

    pub fn unpreload_type<T: SituationBehavior>(&mut self) -> Result<(), TransitionError> {
        let id = self
            .find::<T>()
            .ok_or_else(|| TransitionError::TargetNotFound(std::any::type_name::<T>().to_string()))?;
        self.unpreload(id)
    }

    fn advance_preloads(&mut self) {
        if self.preloads.is_empty() {
            return;
        }
        let info = self.preload_info.clone();
        for id in std::mem::take(&mut self.preloads) {
            let result = self.with_situation(id, &info, |s, env| {
                s.poll_preload(env)
                    .map_err(|fault| fault.into_transition_error(s.name(), Phase::Load))
            });
            match result {
                Some(Ok(Progress::Pending)) => self.preloads.push(id),
                Some(Ok(Progress::Done)) | None => {}
                Some(Err(err)) => {
                    tracing::error!(error = %err, "preload failed");
                    let in_use = self.in_use(id);
                    self.with_situation(id, &info, |s, env| s.fail_preload(env, in_use));
                    self.preload_errors.insert(id, err);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Frame passes
    // -----------------------------------------------------------------------

    /// Advance preloads and the in-flight transition, then run `update`
    /// hooks.
    pub fn update(&mut self, delta: f32) {
        self.frame += 1;
        self.advance_preloads();
        self.advance_transition();
        self.drive_frame(FrameContext {
            pass: FramePass::Update,
            frame: self.frame,
            delta,
        });
    }

    pub fn late_update(&mut self, delta: f32) {
        self.drive_frame(FrameContext {
            pass: FramePass::LateUpdate,
            frame: self.frame,
            delta,
        });
    }

    pub fn fixed_update(&mut self, delta: f32) {
        self.drive_frame(FrameContext {
            pass: FramePass::FixedUpdate,
            frame: self.frame,
            delta,
        });
    }

    /// Mid-transition only the situations named by the transition (and
    /// loaded) are driven, plus active effects; otherwise the running chain.
    fn frame_targets(&self) -> Vec<SituationId> {
        match &self.driver {
            Some(driver) => driver
                .run
                .info
                .prev()
                .iter()
                .chain(driver.run.info.next())
                .copied()
                .filter(|id| {
                    self.state(*id)
                        .is_some_and(|state| state >= SituationState::Loaded)
                })
                .collect(),
            None => self.running.clone(),
        }
    }

    fn drive_frame(&mut self, frame: FrameContext) {
        for id in self.frame_targets() {
            let Some(slot) = self.slots.get_mut(id) else {
                continue;
            };
            match frame.pass {
                FramePass::Update => slot.situation.update(&frame),
                FramePass::LateUpdate => slot.situation.late_update(&frame),
                FramePass::FixedUpdate => slot.situation.fixed_update(&frame),
            }
        }
        if frame.pass == FramePass::Update {
            if let Some(driver) = &mut self.driver {
                if driver.run.effect_active {
                    for effect in &mut driver.run.effects {
                        effect.update(&frame);
                    }
                }
            }
        }
    }

    fn advance_transition(&mut self) {
        let Some(mut driver) = self.driver.take() else {
            return;
        };
        let result = {
            let TransitionDriver { protocol, run } = &mut driver;
            let mut resolver = Resolver {
                container: self,
                run,
            };
            protocol.poll(&mut resolver)
        };
        match result {
            Ok(Progress::Pending) => self.driver = Some(driver),
            Ok(Progress::Done) => {
                if !driver.run.finished {
                    tracing::warn!(
                        protocol = driver.protocol.name(),
                        "protocol completed without finishing"
                    );
                    driver.run.info.set_state(TransitionState::Completed);
                }
            }
            Err(err) => {
                tracing::error!(error = %err, state = ?driver.run.info.state(), "transition faulted");
                driver.run.info.fail(err);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Clear
    // -----------------------------------------------------------------------

    /// Cancel any transition, force-unpreload and force-release every
    /// situation (leaves first), and drop all state.
    pub fn clear(&mut self) {
        self.cancel_transition();
        let order: Vec<SituationId> = self
            .roots
            .clone()
            .into_iter()
            .flat_map(|root| self.post_order(root))
            .collect();
        for id in order {
            self.release_one(id);
        }
        self.slots.clear();
        self.roots.clear();
        self.running.clear();
        self.preloads.clear();
        self.preload_errors.clear();
        tracing::debug!("container cleared");
    }
}

impl Drop for SituationContainer {
    fn drop(&mut self) {
        if !self.slots.is_empty() {
            self.clear();
        }
    }
}

fn common_prefix_len(a: &[SituationId], b: &[SituationId]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// The container seen through one transition's routines.
struct Resolver<'a> {
    container: &'a mut SituationContainer,
    run: &'a mut TransitionRun,
}

/// Poll every unfinished situation in `ids` once.
fn poll_chain(
    container: &mut SituationContainer,
    info: &TransitionInfo,
    ids: &[SituationId],
    done: &mut [bool],
    phase: Phase,
    poll: fn(&mut Situation, &PhaseEnv<'_>) -> PhaseResult,
) -> RoutineResult {
    let mut progress = Progress::Done;
    for (index, &id) in ids.iter().enumerate() {
        if done[index] {
            continue;
        }
        let result = container.with_situation(id, info, |s, env| {
            poll(s, env).map_err(|fault| fault.into_transition_error(s.name(), phase))
        });
        match result {
            Some(Ok(Progress::Pending)) => progress = Progress::Pending,
            Some(Ok(Progress::Done)) | None => done[index] = true,
            Some(Err(err)) => return Err(err),
        }
    }
    Ok(progress)
}

fn poll_effects(
    effects: &mut [Box<dyn TransitionEffect>],
    info: &TransitionInfo,
    done: &mut [bool],
    phase: Phase,
    poll: fn(&mut dyn TransitionEffect, &TransitionInfo) -> PhaseResult,
) -> RoutineResult {
    let mut progress = Progress::Done;
    for (index, effect) in effects.iter_mut().enumerate() {
        if done[index] {
            continue;
        }
        match poll(effect.as_mut(), info) {
            Ok(Progress::Pending) => progress = Progress::Pending,
            Ok(Progress::Done) => done[index] = true,
            Err(fault) => return Err(fault.into_transition_error(effect.name(), phase)),
        }
    }
    Ok(progress)
}

impl Resolver<'_> {
    fn each(&mut self, ids: &[SituationId], f: fn(&mut Situation, &PhaseEnv<'_>)) {
        let info = self.run.info.clone();
        for &id in ids {
            self.container.with_situation(id, &info, |s, env| f(s, env));
        }
    }
}

impl TransitionResolver for Resolver<'_> {
    fn start(&mut self) {
        if self.run.started {
            return;
        }
        self.run.started = true;
        let info = self.run.info.clone();
        info.set_state(TransitionState::Standby);
        for effect in &mut self.run.effects {
            effect.on_transition_begin(&info);
        }
        tracing::debug!(kind = ?info.kind(), "transition started");
    }

    fn deactivate_prev(&mut self) {
        if self.run.deactivated {
            return;
        }
        self.run.deactivated = true;
        let info = self.run.info.clone();
        self.each(info.prev(), |s, env| s.deactivate(env));
    }

    fn enter_effects(&mut self) -> RoutineResult {
        let info = self.run.info.clone();
        loop {
            match &mut self.run.enter {
                ChainRun::Idle => {
                    self.run.effect_active = !self.run.effects.is_empty();
                    self.run.enter = ChainRun::Running(vec![false; self.run.effects.len()]);
                }
                ChainRun::Running(done) => {
                    let progress = poll_effects(
                        &mut self.run.effects,
                        &info,
                        done,
                        Phase::EffectEnter,
                        |e, i| e.poll_enter(i),
                    )?;
                    if !progress.is_done() {
                        return Ok(Progress::Pending);
                    }
                    self.run.enter = ChainRun::Done;
                }
                ChainRun::Done => return Ok(Progress::Done),
            }
        }
    }

    fn close_prev(&mut self) -> RoutineResult {
        let info = self.run.info.clone();
        loop {
            match &mut self.run.close {
                ChainRun::Idle => {
                    self.each(info.prev(), |s, env| s.pre_close(env));
                    self.run.close = ChainRun::Running(vec![false; info.prev().len()]);
                }
                ChainRun::Running(done) => {
                    let progress = poll_chain(
                        self.container,
                        &info,
                        info.prev(),
                        done,
                        Phase::Close,
                        |s, env| s.poll_close(env),
                    )?;
                    if !progress.is_done() {
                        return Ok(Progress::Pending);
                    }
                    self.each(info.prev(), |s, env| s.post_close(env));
                    self.run.close = ChainRun::Done;
                }
                ChainRun::Done => return Ok(Progress::Done),
            }
        }
    }

    fn unload_prev(&mut self) -> RoutineResult {
        if self.run.unloaded {
            return Ok(Progress::Done);
        }
        let info = self.run.info.clone();
        self.each(info.prev(), |s, env| {
            s.cleanup(env);
            s.unload(env);
        });
        self.container.running.retain(|id| !info.prev().contains(id));
        self.run.unloaded = true;
        Ok(Progress::Done)
    }

    fn load_next(&mut self) -> RoutineResult {
        let info = self.run.info.clone();
        info.set_state(TransitionState::Initializing);
        loop {
            match &mut self.run.load {
                LoadRun::Idle => {
                    self.run.load = LoadRun::Loading(vec![false; info.next().len()]);
                }
                LoadRun::Loading(done) => {
                    let progress = poll_chain(
                        self.container,
                        &info,
                        info.next(),
                        done,
                        Phase::Load,
                        |s, env| s.poll_load(env, false),
                    )?;
                    if !progress.is_done() {
                        return Ok(Progress::Pending);
                    }
                    self.run.load = LoadRun::AwaitSetup;
                }
                LoadRun::AwaitSetup => {
                    if info.step() < TransitionStep::Setup {
                        return Ok(Progress::Pending);
                    }
                    self.run.load = LoadRun::SettingUp(0);
                }
                LoadRun::SettingUp(index) => {
                    let index = *index;
                    let Some(&id) = info.next().get(index) else {
                        self.invoke_on_setup();
                        self.run.load = LoadRun::Done;
                        continue;
                    };
                    let result = self.container.with_situation(id, &info, |s, env| {
                        s.poll_setup(env)
                            .map_err(|fault| fault.into_transition_error(s.name(), Phase::Setup))
                    });
                    match result {
                        Some(Ok(Progress::Pending)) => return Ok(Progress::Pending),
                        Some(Ok(Progress::Done)) | None => {
                            self.run.load = LoadRun::SettingUp(index + 1);
                        }
                        Some(Err(err)) => return Err(err),
                    }
                }
                LoadRun::Done => return Ok(Progress::Done),
            }
        }
    }

    fn open_next(&mut self) -> RoutineResult {
        let info = self.run.info.clone();
        info.set_state(TransitionState::Opening);
        loop {
            match &mut self.run.open {
                OpenRun::Idle => {
                    self.each(info.next(), |s, env| s.pre_open(env));
                    self.run.open = OpenRun::Opening(vec![false; info.next().len()]);
                }
                OpenRun::Opening(done) => {
                    let progress = poll_chain(
                        self.container,
                        &info,
                        info.next(),
                        done,
                        Phase::Open,
                        |s, env| s.poll_open(env),
                    )?;
                    if !progress.is_done() {
                        return Ok(Progress::Pending);
                    }
                    self.each(info.next(), |s, env| s.post_open(env));
                    for &id in info.next() {
                        if !self.container.running.contains(&id) {
                            self.container.running.push(id);
                        }
                    }
                    self.run.open = OpenRun::AwaitComplete;
                }
                OpenRun::AwaitComplete => {
                    if info.step() < TransitionStep::Complete {
                        return Ok(Progress::Pending);
                    }
                    self.run.open = OpenRun::Done;
                }
                OpenRun::Done => return Ok(Progress::Done),
            }
        }
    }

    fn exit_effects(&mut self) -> RoutineResult {
        let info = self.run.info.clone();
        loop {
            match &mut self.run.exit {
                ChainRun::Idle => {
                    self.run.exit = ChainRun::Running(vec![false; self.run.effects.len()]);
                }
                ChainRun::Running(done) => {
                    let progress = poll_effects(
                        &mut self.run.effects,
                        &info,
                        done,
                        Phase::EffectExit,
                        |e, i| e.poll_exit(i),
                    )?;
                    if !progress.is_done() {
                        return Ok(Progress::Pending);
                    }
                    self.run.effect_active = false;
                    self.run.exit = ChainRun::Done;
                }
                ChainRun::Done => return Ok(Progress::Done),
            }
        }
    }

    fn activate_next(&mut self) {
        if self.run.activated {
            return;
        }
        self.run.activated = true;
        let info = self.run.info.clone();
        self.each(info.next(), |s, env| s.activate(env));
    }

    fn finish(&mut self) {
        if self.run.finished {
            return;
        }
        self.run.finished = true;
        let info = self.run.info.clone();
        for effect in &mut self.run.effects {
            effect.on_transition_end(&info);
        }
        self.run.effect_active = false;
        self.container.running = self.container.chain_of(self.run.target);
        info.set_state(TransitionState::Completed);
        tracing::info!(
            situation = self
                .container
                .situation(self.run.target)
                .map(|s| s.name())
                .unwrap_or("<removed>"),
            "transition completed"
        );
    }
}

impl Resolver<'_> {
    fn invoke_on_setup(&mut self) {
        if self.run.info.next().is_empty() {
            return;
        }
        if let Some(callback) = self.run.on_setup.take() {
            if let Some(situation) = self.container.situation_mut(self.run.target) {
                callback(situation.behavior_mut());
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
