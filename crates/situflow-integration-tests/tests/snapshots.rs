//! Snapshots taken through the navigation layers, checked as JSON.

use situflow_core::config::ContainerConfig;
use situflow_core::container::{SituationContainer, TransitionRequest};
use situflow_core::test_utils::*;
use situflow_core::transition::TransitionStep;
use situflow_nav::{SituationStack, SituationTree};

#[test]
fn stack_snapshot_during_back_navigation() {
    let config = ContainerConfig::from_toml_str("label = \"menus\"\n").unwrap();
    let log = call_log();
    let mut stack = SituationStack::with_container(SituationContainer::with_config(config));
    let slow_close = Script {
        close_ticks: 4,
        ..Script::default()
    };
    stack.transition_with(|| ScriptedSituation::<Home>::new("home", &log), TransitionRequest::new());
    run_until_idle(stack.container_mut(), 20);
    stack.transition_with(
        || ScriptedSituation::<Settings>::with_script("settings", &log, slow_close),
        TransitionRequest::new(),
    );
    run_until_idle(stack.container_mut(), 20);

    stack.back(1, TransitionRequest::new());
    stack.update(1.0 / 60.0);
    stack.update(1.0 / 60.0);

    let json = serde_json::to_value(stack.container().snapshot()).unwrap();
    assert_eq!(json["label"], "menus");
    assert_eq!(json["transition"]["kind"], "Navigate");
    assert_eq!(json["transition"]["back"], true);
    assert_eq!(json["transition"]["step"], "complete");
    assert_eq!(json["situations"][1]["name"], "settings");
    assert_eq!(json["situations"][1]["active"], false);
    assert_eq!(json["situations"][1]["state"], "OpenFinished");
    assert_eq!(json["running"].as_array().unwrap().len(), 2);

    run_until_idle(stack.container_mut(), 20);
    stack.update(1.0 / 60.0);
    let json = serde_json::to_value(stack.container().snapshot()).unwrap();
    assert!(json["transition"].is_null());
    assert_eq!(json["situations"].as_array().unwrap().len(), 1);
}

#[test]
fn tree_snapshot_shows_held_transition_and_preload() {
    let log = call_log();
    let mut tree = SituationTree::new();
    let title = tree.set_root(ScriptedSituation::<Title>::new("title", &log)).unwrap();
    let preloadable = Script {
        preloadable: true,
        ..Script::default()
    };
    let game = tree
        .connect(title, ScriptedSituation::<Game>::with_script("game", &log, preloadable))
        .unwrap();
    tree.open_root(TransitionRequest::new());
    run_until_idle(tree.container_mut(), 20);

    let game_id = tree.situation(game).unwrap();
    tree.container_mut().preload(game_id).unwrap();
    let handle = tree.transition::<ScriptedSituation<Game>>(TransitionRequest::new().with_step(TransitionStep::Setup));
    run_frames(tree.container_mut(), 10);

    let snapshot = tree.container().snapshot();
    let view = snapshot.situation(game_id).unwrap();
    assert!(!view.active);
    assert!(view.running);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["transition"]["state"], "Opening");
    assert_eq!(json["transition"]["step"], "setup");
    assert_eq!(json["situations"][1]["state"], "OpenFinished");
    assert_eq!(json["situations"][1]["preload"], "PreLoaded");

    handle.next_step(TransitionStep::Complete);
    run_until_idle(tree.container_mut(), 10);
    let json = serde_json::to_value(tree.container().snapshot()).unwrap();
    assert_eq!(json["situations"][1]["active"], true);
    assert!(json["transition"].is_null());
}
