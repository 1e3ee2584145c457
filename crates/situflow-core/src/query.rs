//! Read-only snapshots of a container for debugging UIs and logs.
//!
//! All types are owned copies, no references into the container.

use crate::container::SituationContainer;
use crate::id::SituationId;
use crate::situation::{PreloadState, SituationState};
use crate::transition::{TransitionKind, TransitionState, TransitionStep};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Situation snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SituationSnapshot {
    pub id: SituationId,
    pub name: String,
    pub state: SituationState,
    pub preload: PreloadState,
    pub active: bool,
    pub parent: Option<SituationId>,
    /// Whether the situation is part of the running chain.
    pub running: bool,
}

// ---------------------------------------------------------------------------
// Transition snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionSnapshot {
    pub kind: TransitionKind,
    pub prev: Vec<SituationId>,
    pub next: Vec<SituationId>,
    pub state: TransitionState,
    pub step: TransitionStep,
    pub back: bool,
    /// Display form of the recorded error, if any.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Container snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerSnapshot {
    pub label: String,
    pub frame: u64,
    /// Tree order: parents before children, siblings in insertion order.
    pub situations: Vec<SituationSnapshot>,
    pub running: Vec<SituationId>,
    pub transition: Option<TransitionSnapshot>,
}

impl ContainerSnapshot {
    pub fn situation(&self, id: SituationId) -> Option<&SituationSnapshot> {
        self.situations.iter().find(|s| s.id == id)
    }
}

impl SituationContainer {
    /// Snapshot one situation.
    pub fn situation_snapshot(&self, id: SituationId) -> Option<SituationSnapshot> {
        let situation = self.situation(id)?;
        Some(SituationSnapshot {
            id,
            name: situation.name().to_string(),
            state: situation.state(),
            preload: situation.preload_state(),
            active: situation.is_active(),
            parent: self.parent(id),
            running: self.running().contains(&id),
        })
    }

    /// Snapshot the whole container.
    pub fn snapshot(&self) -> ContainerSnapshot {
        let mut situations = Vec::with_capacity(self.len());
        let mut pending: Vec<SituationId> = self.roots().iter().rev().copied().collect();
        while let Some(id) = pending.pop() {
            if let Some(snapshot) = self.situation_snapshot(id) {
                situations.push(snapshot);
            }
            pending.extend(self.children(id).iter().rev().copied());
        }

        let transition = self.transition_info().map(|info| TransitionSnapshot {
            kind: info.kind(),
            prev: info.prev().to_vec(),
            next: info.next().to_vec(),
            state: info.state(),
            step: info.step(),
            back: info.is_back(),
            error: info.error().map(|e| e.to_string()),
        });

        ContainerSnapshot {
            label: self.config().label.clone(),
            frame: self.frame(),
            situations,
            running: self.running().to_vec(),
            transition,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::container::{SituationContainer, TransitionRequest};
    use crate::situation::SituationState;
    use crate::test_utils::*;
    use crate::transition::TransitionState;

    #[test]
    fn snapshot_lists_tree_in_order() {
        let log = call_log();
        let mut c = SituationContainer::new();
        let r = c.register(ScriptedSituation::<Home>::new("r", &log), None).unwrap();
        let a = c.register(ScriptedSituation::<Settings>::new("a", &log), Some(r)).unwrap();
        let b = c.register(ScriptedSituation::<Audio>::new("b", &log), Some(r)).unwrap();
        c.transition(a, TransitionRequest::new());
        run_until_idle(&mut c, 10);

        let snapshot = c.snapshot();
        let names: Vec<&str> = snapshot.situations.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["r", "a", "b"]);
        assert_eq!(snapshot.running, vec![r, a]);
        assert!(snapshot.transition.is_none());
        let b_view = snapshot.situation(b).unwrap();
        assert_eq!(b_view.state, SituationState::Standby);
        assert_eq!(b_view.parent, Some(r));
        assert!(!b_view.running);
        assert!(snapshot.situation(a).unwrap().active);
    }

    #[test]
    fn snapshot_includes_in_flight_transition() {
        let log = call_log();
        let mut c = SituationContainer::new();
        let slow = Script {
            load_ticks: 5,
            ..Script::default()
        };
        let home = c
            .register(ScriptedSituation::<Home>::with_script("home", &log, slow), None)
            .unwrap();
        c.transition(home, TransitionRequest::new());
        run_frames(&mut c, 2);

        let snapshot = c.snapshot();
        let transition = snapshot.transition.clone().unwrap();
        assert_eq!(transition.next, vec![home]);
        assert_eq!(transition.state, TransitionState::Initializing);
        assert!(transition.error.is_none());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["situations"][0]["name"], "home");
        assert_eq!(json["situations"][0]["state"], "Loading");
        assert_eq!(json["transition"]["state"], "Initializing");
    }
}
