use glam::{Vec2, Vec3};
use rig_animation_rs::*;
use wasm_bindgen_test::*;

mod common;

fn root(animator: &AnimatorRc) -> Vec3 {
    return Vec3::from(animator.local_pose()[0].translation);
}

#[test]
#[wasm_bindgen_test]
fn test_transition_after_exit_time() {
    let mut clips = ClipLibrary::new();
    let idle = clips.insert(common::translation_clip("idle", 0, Vec3::ZERO, Vec3::ZERO));
    let run = clips.insert(common::translation_clip("run", 0, Vec3::Z, Vec3::Z));
    let mut animator = AnimatorRc::with_skeleton(common::two_bone_skeleton(), AnimatorConfig::default());

    let mut machine = AnimationStateMachine::new();
    let a = machine.add_state("idle", StateMotion::Clip(idle));
    let b = machine.add_state("run", StateMotion::Clip(run));
    assert!(machine.add_transition(
        AnimationTransition::new(a, b, 0.3)
            .with_exit_time(0.5)
            .with_condition(Condition::new("speed", Comparator::Greater, 0.5)),
    ));
    machine.set_float("speed", 0.0);

    machine.update(0.3, &mut animator, &clips);
    machine.update(0.3, &mut animator, &clips);
    assert_eq!(machine.current_state(), Some(a));
    assert!(machine.layers()[0].state_time() > 0.5);
    assert!(!machine.is_transitioning());

    machine.set_float("speed", 1.0);
    machine.update(0.1, &mut animator, &clips);
    assert!(machine.is_transitioning());
    assert_eq!(machine.layers()[0].transition_target(), Some(b));

    machine.update(0.15, &mut animator, &clips);
    assert!(machine.is_transitioning());
    assert!(root(&animator).abs_diff_eq(Vec3::new(0.0, 0.0, 0.5), 1e-4));

    machine.update(0.15, &mut animator, &clips);
    assert!(!machine.is_transitioning());
    assert_eq!(machine.current_state(), Some(b));
    assert!(root(&animator).abs_diff_eq(Vec3::Z, 1e-5));
}

#[test]
#[wasm_bindgen_test]
fn test_exit_time_blocks_early_transition() {
    let mut clips = ClipLibrary::new();
    let idle = clips.insert(common::translation_clip("idle", 0, Vec3::ZERO, Vec3::ZERO));
    let run = clips.insert(common::translation_clip("run", 0, Vec3::Z, Vec3::Z));
    let mut animator = AnimatorRc::with_skeleton(common::two_bone_skeleton(), AnimatorConfig::default());

    let mut machine = AnimationStateMachine::new();
    let a = machine.add_state("idle", StateMotion::Clip(idle));
    let b = machine.add_state("run", StateMotion::Clip(run));
    machine.add_transition(
        AnimationTransition::new(a, b, 0.3)
            .with_exit_time(0.45)
            .with_condition(Condition::new("speed", Comparator::Greater, 0.5)),
    );
    machine.set_float("speed", 1.0);
    for _ in 0..4 {
        machine.update(0.1, &mut animator, &clips);
        assert!(!machine.is_transitioning());
    }
    machine.update(0.1, &mut animator, &clips);
    assert!(machine.is_transitioning());
}

#[test]
#[wasm_bindgen_test]
fn test_blend_tree_state() {
    let mut clips = ClipLibrary::new();
    let walk = clips.insert(common::translation_clip("walk", 0, Vec3::X, Vec3::X));
    let run = clips.insert(common::translation_clip("run", 0, Vec3::Z, Vec3::Z));
    let mut animator = AnimatorRc::with_skeleton(common::two_bone_skeleton(), AnimatorConfig::default());

    let tree = BlendNode::blend_2d(vec![
        (Vec2::new(0.0, 0.0), BlendNode::clip(walk)),
        (Vec2::new(1.0, 0.0), BlendNode::clip(run)),
    ]);
    let mut machine = AnimationStateMachine::new();
    let locomotion = machine.add_state("locomotion", StateMotion::BlendTree(tree));
    machine.update(0.1, &mut animator, &clips);
    assert!(root(&animator).abs_diff_eq(Vec3::X, 1e-5));

    if let Some(StateMotion::BlendTree(tree)) = machine.state_mut(locomotion).and_then(|s| s.motion_mut()) {
        tree.set_parameter_2d(Vec2::new(1.0, 0.0));
    }
    machine.update(0.1, &mut animator, &clips);
    assert!(root(&animator).abs_diff_eq(Vec3::Z, 1e-5));
}

#[test]
#[wasm_bindgen_test]
fn test_state_events_and_root_motion() {
    let mut clips = ClipLibrary::new();
    let mut clip = common::translation_clip("walk", 0, Vec3::ZERO, Vec3::new(0.0, 0.0, 2.0));
    clip.add_event(AnimationEvent::new(0.25, "left"));
    clip.add_event(AnimationEvent::new(0.75, "right"));
    clip.set_root_motion(true, 0);
    let walk = clips.insert(clip);

    let mut animator = AnimatorRc::with_skeleton(common::two_bone_skeleton(), AnimatorConfig::default());
    animator.set_root_motion_enabled(true);

    let mut machine = AnimationStateMachine::new();
    machine.add_state("walk", StateMotion::Clip(walk));
    machine.update(0.1, &mut animator, &clips);
    machine.update(0.5, &mut animator, &clips);
    assert!(animator.root_motion_delta().abs_diff_eq(Vec3::new(0.0, 0.0, 1.0), 1e-4));

    let names: Vec<String> = animator.drain_events().into_iter().map(|e| e.event.name).collect();
    assert_eq!(names, vec!["left".to_string()]);
    machine.update(0.5, &mut animator, &clips);
    let names: Vec<String> = animator.drain_events().into_iter().map(|e| e.event.name).collect();
    assert_eq!(names, vec!["right".to_string()]);
}

#[test]
#[wasm_bindgen_test]
fn test_reentered_state_fires_events_again() {
    let mut clips = ClipLibrary::new();
    let mut step = common::translation_clip("walk", 0, Vec3::ZERO, Vec3::ZERO);
    step.add_event(AnimationEvent::new(0.5, "step"));
    let walk = clips.insert(step);
    let idle = clips.insert(common::translation_clip("idle", 0, Vec3::X, Vec3::X));
    let mut animator = AnimatorRc::with_skeleton(common::two_bone_skeleton(), AnimatorConfig::default());

    let mut machine = AnimationStateMachine::new();
    let a = machine.add_state("walk", StateMotion::Clip(walk));
    let b = machine.add_state("idle", StateMotion::Clip(idle));
    machine.add_transition(AnimationTransition::new(a, b, 0.0).with_condition(Condition::is_true("stop")));
    machine.add_transition(AnimationTransition::new(b, a, 0.0).with_condition(Condition::is_false("stop")));
    machine.set_bool("stop", false);

    machine.update(0.6, &mut animator, &clips);
    assert_eq!(animator.drain_events().len(), 1);

    // leave walk in the middle of its loop, then come back
    machine.set_bool("stop", true);
    machine.update(0.1, &mut animator, &clips);
    assert_eq!(machine.current_state(), Some(b));
    machine.set_bool("stop", false);
    machine.update(0.1, &mut animator, &clips);
    assert_eq!(machine.current_state(), Some(a));
    assert_eq!(machine.layers()[0].state_time(), 0.0);
    animator.drain_events();

    machine.update(0.7, &mut animator, &clips);
    let names: Vec<String> = animator.drain_events().into_iter().map(|e| e.event.name).collect();
    assert_eq!(names, vec!["step".to_string()]);
}

#[test]
#[wasm_bindgen_test]
fn test_looping_exit_time_counts_cycles() {
    let mut clips = ClipLibrary::new();
    let idle = clips.insert(common::translation_clip("idle", 0, Vec3::ZERO, Vec3::ZERO));
    let run = clips.insert(common::translation_clip("run", 0, Vec3::Z, Vec3::Z));
    let mut animator = AnimatorRc::with_skeleton(common::two_bone_skeleton(), AnimatorConfig::default());

    // end of the first loop
    let mut machine = AnimationStateMachine::new();
    let a = machine.add_state("idle", StateMotion::Clip(idle));
    let b = machine.add_state("run", StateMotion::Clip(run));
    machine.add_transition(AnimationTransition::new(a, b, 0.2).with_exit_time(1.0));
    for _ in 0..3 {
        machine.update(0.25, &mut animator, &clips);
        assert!(!machine.is_transitioning());
    }
    machine.update(0.25, &mut animator, &clips);
    assert!(machine.is_transitioning());
    assert_eq!(machine.layers()[0].transition_target(), Some(b));

    // a step wrapping across the gate still opens it
    let mut machine = AnimationStateMachine::new();
    let a = machine.add_state("idle", StateMotion::Clip(idle));
    let b = machine.add_state("run", StateMotion::Clip(run));
    machine.add_transition(AnimationTransition::new(a, b, 0.2).with_exit_time(0.95));
    for _ in 0..3 {
        machine.update(0.3, &mut animator, &clips);
        assert!(!machine.is_transitioning());
    }
    machine.update(0.3, &mut animator, &clips);
    assert!(machine.layers()[0].state_time() < 0.5);
    assert!(machine.is_transitioning());
}

#[test]
#[wasm_bindgen_test]
fn test_interrupted_transition_keeps_shown_pose() {
    let mut clips = ClipLibrary::new();
    let idle = clips.insert(common::translation_clip("idle", 0, Vec3::ZERO, Vec3::ZERO));
    let walk = clips.insert(common::translation_clip("walk", 0, Vec3::X, Vec3::X));
    let jump = clips.insert(common::translation_clip("jump", 0, Vec3::Y, Vec3::Y));
    let mut animator = AnimatorRc::with_skeleton(common::two_bone_skeleton(), AnimatorConfig::default());

    let mut machine = AnimationStateMachine::new();
    let a = machine.add_state("idle", StateMotion::Clip(idle));
    let b = machine.add_state("walk", StateMotion::Clip(walk));
    let c = machine.add_state("jump", StateMotion::Clip(jump));
    machine.add_transition(
        AnimationTransition::new(a, b, 1.0).with_condition(Condition::is_true("move")).with_interrupt(0.2),
    );
    machine.add_transition(AnimationTransition::new(b, c, 1.0).with_condition(Condition::is_true("jump")));
    machine.set_bool("move", true);

    machine.update(0.0, &mut animator, &clips);
    machine.update(0.1, &mut animator, &clips);
    let before = root(&animator);
    assert!(before.abs_diff_eq(Vec3::new(0.1, 0.0, 0.0), 1e-5));

    machine.set_bool("jump", true);
    machine.update(0.1, &mut animator, &clips);
    assert_eq!(machine.current_state(), Some(b));
    assert_eq!(machine.layers()[0].transition_target(), Some(c));
    assert!(root(&animator).abs_diff_eq(before, 1e-5));

    machine.update(0.5, &mut animator, &clips);
    assert!(root(&animator).abs_diff_eq(before.lerp(Vec3::Y, 0.5), 1e-4));

    machine.update(0.5, &mut animator, &clips);
    assert!(!machine.is_transitioning());
    assert_eq!(machine.current_state(), Some(c));
    assert!(root(&animator).abs_diff_eq(Vec3::Y, 1e-5));
}

#[test]
#[wasm_bindgen_test]
fn test_transition_root_motion_across_wrap() {
    let mut clips = ClipLibrary::new();
    let mut walk = common::translation_clip("walk", 0, Vec3::ZERO, Vec3::new(0.0, 0.0, 2.0));
    walk.set_root_motion(true, 0);
    let mut run = common::translation_clip("run", 0, Vec3::ZERO, Vec3::new(0.0, 0.0, 6.0));
    run.set_root_motion(true, 0);
    let walk = clips.insert(walk);
    let run = clips.insert(run);
    let mut animator = AnimatorRc::with_skeleton(common::two_bone_skeleton(), AnimatorConfig::default());
    animator.set_root_motion_enabled(true);

    let mut machine = AnimationStateMachine::new();
    let a = machine.add_state("walk", StateMotion::Clip(walk));
    let b = machine.add_state("run", StateMotion::Clip(run));
    machine.add_transition(AnimationTransition::new(a, b, 0.5).with_condition(Condition::is_true("run")));
    machine.update(0.75, &mut animator, &clips);
    machine.set_bool("run", true);

    // unwrapped walk time, run time and blend factor after each step, walk wraps on the last
    let steps = [(0.85, 0.0, 0.0), (0.95, 0.1, 0.2), (1.05, 0.2, 0.4)];
    let mut previous = 1.5;
    for (walk_time, run_time, t) in steps {
        machine.update(0.1, &mut animator, &clips);
        let z = (1.0 - t) * 2.0 * walk_time + t * 6.0 * run_time;
        assert!((animator.root_motion_delta().z - (z - previous)).abs() < 1e-3);
        previous = z;
    }
}
