//! End-to-end transition scenarios driven frame by frame.

use situflow_core::behavior::{PhaseContext, PhaseResult, Progress, SituationBehavior};
use situflow_core::container::{SituationContainer, TransitionRequest};
use situflow_core::error::{Phase, TransitionError};
use situflow_core::protocol::{CrossFade, OutIn};
use situflow_core::situation::{PreloadState, SituationState};
use situflow_core::test_utils::*;
use situflow_core::transition::{TransitionState, TransitionStep};
use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ===========================================================================
// Scenario 1: sibling transition keeps the shared parent open
// ===========================================================================

#[test]
fn sibling_transition_closes_only_the_leaf() {
    init_tracing();
    let log = call_log();
    let mut c = SituationContainer::new();
    let r = c.register(ScriptedSituation::<Home>::new("r", &log), None).unwrap();
    let a = c.register(ScriptedSituation::<Settings>::new("a", &log), Some(r)).unwrap();
    let b = c.register(ScriptedSituation::<Audio>::new("b", &log), Some(r)).unwrap();

    c.transition(a, TransitionRequest::new());
    run_until_idle(&mut c, 20);
    log.borrow_mut().clear();

    let handle = c.transition(b, TransitionRequest::new());
    assert_eq!(handle.info().unwrap().prev(), &[a]);
    assert_eq!(handle.info().unwrap().next(), &[b]);
    assert_eq!(handle.prev(), Some(a));
    assert_eq!(handle.next(), Some(b));
    run_until_idle(&mut c, 20);

    assert_eq!(
        events(&log, "a"),
        vec!["deactivate", "pre_close", "close", "post_close", "cleanup", "unload"]
    );
    assert_eq!(
        events(&log, "b"),
        vec!["load", "setup", "pre_open", "open", "post_open", "activate"]
    );
    assert!(events(&log, "r").is_empty());
    assert_eq!(c.running(), &[r, b]);
}

// ===========================================================================
// Scenario 2: a second request while one is in flight is rejected
// ===========================================================================

#[test]
fn overlapping_request_is_rejected_and_first_completes() {
    init_tracing();
    let log = call_log();
    let mut c = SituationContainer::new();
    let slow = Script {
        load_ticks: 4,
        ..Script::default()
    };
    let title = c
        .register(ScriptedSituation::<Title>::with_script("title", &log, slow), None)
        .unwrap();
    let game = c.register(ScriptedSituation::<Game>::new("game", &log), None).unwrap();

    let first = c.transition(title, TransitionRequest::new());
    run_frames(&mut c, 2);
    let second = c.transition(game, TransitionRequest::new());
    assert!(second.is_done());
    assert_eq!(second.error(), Some(TransitionError::AlreadyTransitioning));
    assert_eq!(c.state(game), Some(SituationState::Standby));

    run_until_idle(&mut c, 20);
    assert_eq!(first.state(), Some(TransitionState::Completed));
    assert!(first.check().is_ok());
    assert_eq!(c.current(), Some(title));
}

// ===========================================================================
// Scenario 4: step control holds the transition between phases
// ===========================================================================

#[test]
fn step_control_pauses_then_resumes() {
    init_tracing();
    let log = call_log();
    let mut c = SituationContainer::new();
    let title = c.register(ScriptedSituation::<Title>::new("title", &log), None).unwrap();
    let game = c.register(ScriptedSituation::<Game>::new("game", &log), None).unwrap();
    c.transition(title, TransitionRequest::new());
    run_until_idle(&mut c, 20);

    let handle = c.transition(game, TransitionRequest::new().with_step(TransitionStep::Load));
    run_frames(&mut c, 10);
    assert_eq!(handle.state(), Some(TransitionState::Initializing));
    assert_eq!(c.state(game), Some(SituationState::Loaded));
    assert_eq!(c.state(title), Some(SituationState::Standby));
    assert!(!handle.is_done());

    assert!(handle.next_step(TransitionStep::Setup));
    assert!(!handle.next_step(TransitionStep::Load));
    run_frames(&mut c, 5);
    assert_eq!(handle.state(), Some(TransitionState::Opening));
    assert_eq!(c.state(game), Some(SituationState::OpenFinished));

    handle.next_step(TransitionStep::Complete);
    run_until_idle(&mut c, 5);
    assert_eq!(handle.state(), Some(TransitionState::Completed));
    assert!(c.situation(game).unwrap().is_active());
}

// ===========================================================================
// Protocol validity
// ===========================================================================

#[test]
fn cross_fade_between_scene_owners_is_refused_but_out_in_works() {
    init_tracing();
    let log = call_log();
    let mut c = SituationContainer::new();
    let scene = Script {
        owns_scene: true,
        ..Script::default()
    };
    let title = c
        .register(ScriptedSituation::<Title>::with_script("title", &log, scene.clone()), None)
        .unwrap();
    let game = c
        .register(ScriptedSituation::<Game>::with_script("game", &log, scene), None)
        .unwrap();
    c.transition(title, TransitionRequest::new());
    run_until_idle(&mut c, 20);

    let refused = c.transition(game, TransitionRequest::new().with_protocol(CrossFade::new()));
    assert_eq!(
        refused.error(),
        Some(TransitionError::SceneOwnershipConflict {
            protocol: "cross-fade".to_string(),
            situation: "title".to_string(),
        })
    );
    assert_eq!(c.current(), Some(title));

    let accepted = c.transition(game, TransitionRequest::new().with_protocol(OutIn::new(false, true)));
    run_until_idle(&mut c, 20);
    assert!(accepted.check().is_ok());
    assert_eq!(c.current(), Some(game));
}

// ===========================================================================
// Faults
// ===========================================================================

#[test]
fn open_fault_leaves_tree_where_it_stopped() {
    init_tracing();
    let log = call_log();
    let mut c = SituationContainer::new();
    let home = c.register(ScriptedSituation::<Home>::new("home", &log), None).unwrap();
    let broken = Script {
        fail_on: Some(Phase::Open),
        ..Script::default()
    };
    let shop = c
        .register(ScriptedSituation::<Shop>::with_script("shop", &log, broken), Some(home))
        .unwrap();
    c.transition(home, TransitionRequest::new());
    run_until_idle(&mut c, 20);

    let handle = c.transition(shop, TransitionRequest::new());
    run_until_idle(&mut c, 20);
    assert!(handle.is_done());
    match handle.check() {
        Err(TransitionError::PhaseFailed { situation, phase, .. }) => {
            assert_eq!(situation, "shop");
            assert_eq!(phase, Phase::Open);
        }
        other => panic!("expected open fault, got {other:?}"),
    }
    assert_eq!(c.state(shop), Some(SituationState::Opening));
    assert_eq!(c.current(), Some(home));

    // The caller recovers by force-releasing the broken subtree.
    c.remove_subtree(shop).unwrap();
    assert_eq!(count(&log, "shop:forced_unload"), 1);
    assert_eq!(c.len(), 1);
    let recovery = c.transition(home, TransitionRequest::new().refresh());
    assert!(recovery.is_started());
}

#[test]
fn effect_fault_surfaces_on_handle() {
    init_tracing();
    let log = call_log();
    let mut c = SituationContainer::new();
    let home = c.register(ScriptedSituation::<Home>::new("home", &log), None).unwrap();
    let handle = c.transition(
        home,
        TransitionRequest::new().with_effect(ScriptedEffect::new("wipe", &log, 1, 1).failing()),
    );
    run_until_idle(&mut c, 5);
    assert!(matches!(
        handle.error(),
        Some(TransitionError::PhaseFailed {
            phase: Phase::EffectEnter,
            ..
        })
    ));
}

// ===========================================================================
// Preload rendezvous
// ===========================================================================

#[test]
fn preload_racing_a_transition_loads_once() {
    init_tracing();
    let log = call_log();
    let mut c = SituationContainer::new();
    let home = c.register(ScriptedSituation::<Home>::new("home", &log), None).unwrap();
    let slow = Script {
        load_ticks: 5,
        preloadable: true,
        ..Script::default()
    };
    let map = c
        .register(ScriptedSituation::<Map>::with_script("map", &log, slow), Some(home))
        .unwrap();
    c.transition(home, TransitionRequest::new());
    run_until_idle(&mut c, 20);

    // Transition first, preload joins the same load run.
    let handle = c.transition(map, TransitionRequest::new());
    run_frames(&mut c, 1);
    c.preload(map).unwrap();
    run_until_idle(&mut c, 20);
    assert!(handle.check().is_ok());
    assert_eq!(count(&log, "map:load"), 1);
    assert_eq!(c.situation(map).unwrap().preload_state(), PreloadState::PreLoaded);

    // Leaving keeps it loaded while preloaded; unpreloading frees it.
    c.transition(home, TransitionRequest::new().back());
    run_until_idle(&mut c, 20);
    assert_eq!(c.state(map), Some(SituationState::Loaded));
    c.unpreload(map).unwrap();
    assert_eq!(c.state(map), Some(SituationState::Standby));
    assert_eq!(count(&log, "map:unload"), 1);
}

// ===========================================================================
// Services and scopes through a hand-written behavior
// ===========================================================================

struct Catalog {
    items: Vec<&'static str>,
}

/// Loads for `frames` ticks, then publishes a catalog service.
struct Storefront {
    frames: u32,
    waited: u32,
    released: Rc<Cell<u32>>,
}

impl SituationBehavior for Storefront {
    fn name(&self) -> &str {
        "storefront"
    }

    fn load(&mut self, ctx: &mut PhaseContext<'_>) -> PhaseResult {
        self.waited += 1;
        if self.waited < self.frames {
            return Ok(Progress::Pending);
        }
        if let Some(services) = ctx.services {
            services.inject(Catalog {
                items: vec!["sword", "shield"],
            });
        }
        let released = self.released.clone();
        ctx.scope.on_expire(move || released.set(released.get() + 1));
        Ok(Progress::Done)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Reads the parent's catalog during setup.
#[derive(Default)]
struct Checkout {
    seen: Vec<&'static str>,
}

impl SituationBehavior for Checkout {
    fn setup(&mut self, ctx: &mut PhaseContext<'_>) -> PhaseResult {
        let catalog = ctx
            .resolve::<Catalog>()
            .ok_or_else(|| situflow_core::error::PhaseFault::new("catalog missing"))?;
        self.seen = catalog.items.clone();
        Ok(Progress::Done)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[test]
fn child_resolves_service_published_by_parent_load() {
    init_tracing();
    let released = Rc::new(Cell::new(0));
    let mut c = SituationContainer::new();
    let store = c
        .register(
            Storefront {
                frames: 3,
                waited: 0,
                released: released.clone(),
            },
            None,
        )
        .unwrap();
    let checkout = c.register(Checkout::default(), Some(store)).unwrap();

    let handle = c.transition_to::<Checkout>(TransitionRequest::new());
    run_until_idle(&mut c, 20);
    assert!(handle.check().is_ok());
    assert_eq!(c.behavior::<Checkout>(checkout).unwrap().seen, vec!["sword", "shield"]);
    assert_eq!(released.get(), 0);

    c.clear();
    assert_eq!(released.get(), 1);
}
