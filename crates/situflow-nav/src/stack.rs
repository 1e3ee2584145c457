//! Stack navigation: visited situations in order, with back navigation.
//!
//! Every entry is registered as a child of the entry below it, so the stack
//! is also the container's running chain. Pushing opens the new entry on top
//! of the current one; going back closes everything above the target.
//! Entries dropped from the stack are released and removed from the
//! container once the transition that dropped them has finished.

use situflow_core::behavior::SituationBehavior;
use situflow_core::container::{SituationContainer, TransitionRequest};
use situflow_core::error::TransitionError;
use situflow_core::id::SituationId;
use situflow_core::transition::TransitionHandle;
use std::any::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEntry {
    pub id: SituationId,
    pub kind: TypeId,
}

pub struct SituationStack {
    container: SituationContainer,
    entries: Vec<StackEntry>,
    /// Dropped entries waiting for the current transition to finish.
    released: Vec<SituationId>,
}

impl Default for SituationStack {
    fn default() -> Self {
        Self::new()
    }
}

impl SituationStack {
    pub fn new() -> Self {
        Self::with_container(SituationContainer::new())
    }

    /// Wrap an empty container.
    pub fn with_container(container: SituationContainer) -> Self {
        Self {
            container,
            entries: Vec::new(),
            released: Vec::new(),
        }
    }

    pub fn container(&self) -> &SituationContainer {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut SituationContainer {
        &mut self.container
    }

    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn top(&self) -> Option<SituationId> {
        self.entries.last().map(|entry| entry.id)
    }

    pub fn position<T: SituationBehavior>(&self) -> Option<usize> {
        self.position_kind(TypeId::of::<T>())
    }

    pub fn contains<T: SituationBehavior>(&self) -> bool {
        self.position::<T>().is_some()
    }

    pub fn is_transitioning(&self) -> bool {
        self.container.is_transitioning()
    }

    fn position_kind(&self, kind: TypeId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.kind == kind)
    }

    /// Navigate to the entry of type `T`.
    ///
    /// If `T` is already on the stack the existing instance is reused and
    /// every entry above it is dropped; `make` is not called. Otherwise `make`
    /// builds a new situation which is pushed on top.
    pub fn transition_with<T: SituationBehavior>(
        &mut self,
        make: impl FnOnce() -> T,
        request: TransitionRequest,
    ) -> TransitionHandle {
        self.collect_released();
        if self.container.is_transitioning() {
            return TransitionHandle::rejected(TransitionError::AlreadyTransitioning);
        }

        if let Some(index) = self.position_kind(TypeId::of::<T>()) {
            let handle = self.container.transition(self.entries[index].id, request);
            if handle.is_started() {
                self.truncate(index + 1);
            }
            return handle;
        }

        let id = match self.container.register(make(), self.top()) {
            Ok(id) => id,
            Err(violation) => {
                tracing::warn!(error = %violation, "stack push refused");
                return TransitionHandle::rejected(TransitionError::TargetNotFound(
                    std::any::type_name::<T>().to_string(),
                ));
            }
        };
        let handle = self.container.transition(id, request);
        if handle.is_started() {
            self.entries.push(StackEntry {
                id,
                kind: TypeId::of::<T>(),
            });
            tracing::debug!(depth = self.entries.len(), "stack push");
        } else if let Err(violation) = self.container.detach(id) {
            tracing::warn!(error = %violation, "rejected stack entry not removed");
        }
        handle
    }

    /// Navigate to a default-constructed `T`, reusing an existing entry.
    pub fn transition<T: SituationBehavior + Default>(&mut self, request: TransitionRequest) -> TransitionHandle {
        self.transition_with(T::default, request)
    }

    /// Pop `depth` entries (always leaving one) and go back to the new top.
    /// Does nothing with one entry or fewer.
    pub fn back(&mut self, depth: usize, request: TransitionRequest) -> TransitionHandle {
        self.collect_released();
        if self.entries.len() <= 1 || depth == 0 {
            return TransitionHandle::idle();
        }
        let depth = depth.min(self.entries.len() - 1);
        let index = self.entries.len() - 1 - depth;
        let handle = self.container.transition(self.entries[index].id, request.back());
        if handle.is_started() {
            self.truncate(index + 1);
        }
        handle
    }

    /// Close and reopen the current chain without touching the entries.
    pub fn reset(&mut self, request: TransitionRequest) -> TransitionHandle {
        self.collect_released();
        self.container.reset(request)
    }

    pub fn update(&mut self, delta: f32) {
        self.container.update(delta);
        self.collect_released();
    }

    pub fn late_update(&mut self, delta: f32) {
        self.container.late_update(delta);
    }

    pub fn fixed_update(&mut self, delta: f32) {
        self.container.fixed_update(delta);
    }

    /// Release every situation and forget all entries.
    pub fn clear(&mut self) {
        self.container.clear();
        self.entries.clear();
        self.released.clear();
    }

    fn truncate(&mut self, len: usize) {
        let dropped = self.entries.split_off(len);
        tracing::debug!(dropped = dropped.len(), depth = len, "stack truncated");
        self.released.extend(dropped.into_iter().map(|entry| entry.id));
    }

    /// Remove dropped entries once no transition is using them. Entries are
    /// ordered bottom first, so removing the first subtree takes the rest.
    fn collect_released(&mut self) {
        if self.released.is_empty() || self.container.is_transitioning() {
            return;
        }
        for id in std::mem::take(&mut self.released) {
            if !self.container.contains(id) {
                continue;
            }
            if let Err(err) = self.container.remove_subtree(id) {
                tracing::warn!(error = %err, "dropped stack entry not removed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use situflow_core::protocol::CrossFade;
    use situflow_core::situation::SituationState;
    use situflow_core::test_utils::*;
    use situflow_core::transition::TransitionState;
    use std::cell::Cell;
    use std::rc::Rc;

    fn settle(stack: &mut SituationStack) {
        for _ in 0..50 {
            stack.update(1.0 / 60.0);
            if !stack.is_transitioning() {
                return;
            }
        }
        panic!("stack never settled");
    }

    fn push<M: 'static>(stack: &mut SituationStack, label: &str, log: &CallLog) -> TransitionHandle {
        let handle = stack.transition_with(
            || ScriptedSituation::<M>::new(label, log),
            TransitionRequest::new(),
        );
        settle(stack);
        handle
    }

    fn home_settings_audio(log: &CallLog) -> SituationStack {
        let mut stack = SituationStack::new();
        push::<Home>(&mut stack, "home", log);
        push::<Settings>(&mut stack, "settings", log);
        push::<Audio>(&mut stack, "audio", log);
        stack
    }

    #[test]
    fn pushes_nest_on_the_running_chain() {
        let log = call_log();
        let stack = home_settings_audio(&log);
        assert_eq!(stack.len(), 3);
        let ids: Vec<SituationId> = stack.entries().iter().map(|e| e.id).collect();
        assert_eq!(stack.container().running(), ids.as_slice());
        assert_eq!(stack.container().current(), stack.top());
    }

    #[test]
    fn back_two_returns_home_closing_inner_first() {
        let log = call_log();
        let mut stack = home_settings_audio(&log);
        let home = stack.entries()[0].id;
        let audio = stack.entries()[2].id;
        log.borrow_mut().clear();

        let handle = stack.back(2, TransitionRequest::new());
        assert!(handle.is_back());
        assert_eq!(handle.prev(), Some(audio));
        settle(&mut stack);

        assert_eq!(handle.state(), Some(TransitionState::Completed));
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.top(), Some(home));
        assert_eq!(stack.container().len(), 1);
        let audio_cleanup = position(&log, "audio:cleanup").unwrap();
        let settings_cleanup = position(&log, "settings:cleanup").unwrap();
        assert!(audio_cleanup < settings_cleanup);
        assert_eq!(count(&log, "settings:unload"), 1);
        assert_eq!(count(&log, "settings:forced_unload"), 0);
    }

    #[test]
    fn revisiting_reuses_the_instance() {
        let log = call_log();
        let mut stack = home_settings_audio(&log);
        let settings = stack.entries()[1].id;
        let built = Rc::new(Cell::new(false));
        let flag = built.clone();
        let handle = stack.transition_with(
            move || {
                flag.set(true);
                ScriptedSituation::<Settings>::new("settings-2", &call_log())
            },
            TransitionRequest::new(),
        );
        settle(&mut stack);
        assert!(handle.check().is_ok());
        assert!(!built.get());
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.top(), Some(settings));
        assert_eq!(count(&log, "settings:load"), 1);
    }

    #[test]
    fn back_with_single_entry_is_a_noop() {
        let log = call_log();
        let mut stack = SituationStack::new();
        push::<Home>(&mut stack, "home", &log);
        let handle = stack.back(1, TransitionRequest::new());
        assert!(handle.is_done());
        assert!(!handle.is_started());
        assert!(handle.error().is_none());
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn back_depth_is_clamped() {
        let log = call_log();
        let mut stack = home_settings_audio(&log);
        let handle = stack.back(10, TransitionRequest::new());
        settle(&mut stack);
        assert!(handle.check().is_ok());
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn push_while_transitioning_is_rejected_without_side_effects() {
        let log = call_log();
        let mut stack = SituationStack::new();
        stack.transition_with(|| ScriptedSituation::<Home>::new("home", &log), TransitionRequest::new());
        let handle = stack.transition_with(
            || ScriptedSituation::<Settings>::new("settings", &log),
            TransitionRequest::new(),
        );
        assert_eq!(handle.error(), Some(TransitionError::AlreadyTransitioning));
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.container().len(), 1);
    }

    #[test]
    fn rejected_push_is_removed_from_container() {
        let log = call_log();
        let mut stack = SituationStack::new();
        let scene = Script {
            owns_scene: true,
            ..Script::default()
        };
        let title_script = scene.clone();
        stack.transition_with(
            || ScriptedSituation::<Title>::with_script("title", &log, title_script),
            TransitionRequest::new(),
        );
        settle(&mut stack);
        let handle = stack.transition_with(
            || ScriptedSituation::<Game>::with_script("game", &log, scene),
            TransitionRequest::new().with_protocol(CrossFade::new()),
        );
        assert!(handle.error().is_some());
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.container().len(), 1);
    }

    #[test]
    fn reset_reopens_top_without_changing_entries() {
        let log = call_log();
        let mut stack = SituationStack::new();
        push::<Home>(&mut stack, "home", &log);
        push::<Settings>(&mut stack, "settings", &log);
        let handle = stack.reset(TransitionRequest::new());
        settle(&mut stack);
        assert!(handle.check().is_ok());
        assert_eq!(stack.len(), 2);
        assert_eq!(count(&log, "settings:load"), 2);
        let top = stack.top().unwrap();
        assert_eq!(
            stack.container().state(top),
            Some(SituationState::OpenFinished)
        );
    }
}
