use glam::{Mat4, Vec3};
use rig_animation_rs::*;
use wasm_bindgen_test::*;

mod common;

#[test]
#[wasm_bindgen_test]
fn test_sample_two_bones() {
    let skeleton = common::two_bone_skeleton();
    let mut clips = ClipLibrary::new();
    let walk = clips.insert(common::translation_clip("walk", 0, Vec3::ZERO, Vec3::X));

    let mut animator = AnimatorRc::with_skeleton(skeleton.clone(), AnimatorConfig::default());
    animator.play_animation(walk, true);
    animator.update(0.5, &clips);

    assert!(animator.local_pose()[0].translation.abs_diff_eq(Vec3::new(0.5, 0.0, 0.0).into(), 1e-6));
    assert_eq!(animator.final_bone_matrices().len(), skeleton.num_bones());
    let child = animator.global_bone_matrices()[1];
    assert!(child.w_axis.truncate().abs_diff_eq(Vec3::new(0.5, 1.0, 0.0), 1e-6));
}

#[test]
#[wasm_bindgen_test]
fn test_linear_channel_is_proportional() {
    let skeleton = common::two_bone_skeleton();
    let v = Vec3::new(2.0, -1.0, 0.5);
    let clip = common::translation_clip("move", 0, Vec3::ZERO, v);
    for i in 0..=20 {
        let t = i as f32 / 20.0;
        let pose = sample_clip(&clip, t, false, skeleton.rest_pose()).unwrap();
        assert!(Vec3::from(pose[0].translation).abs_diff_eq(v * t, 1e-5), "t={}", t);
    }
}

#[test]
#[wasm_bindgen_test]
fn test_looping_wraps_time() {
    let skeleton = common::two_bone_skeleton();
    let mut clips = ClipLibrary::new();
    let walk = clips.insert(common::translation_clip("walk", 0, Vec3::ZERO, Vec3::X));

    let mut animator = AnimatorRc::with_skeleton(skeleton, AnimatorConfig::default());
    animator.play_animation(walk, true);
    animator.update(3.75, &clips);
    assert!((animator.current_time() - 0.75).abs() < 1e-5);
    for _ in 0..1000 {
        animator.update(0.37, &clips);
        assert!(animator.current_time() >= 0.0 && animator.current_time() < 1.0);
    }

    animator.play_animation(walk, false);
    animator.update(3.75, &clips);
    assert_eq!(animator.current_time(), 1.0);
}

#[test]
#[wasm_bindgen_test]
fn test_event_fires_once_per_loop() {
    let skeleton = common::two_bone_skeleton();
    let mut clips = ClipLibrary::new();
    let mut clip = common::translation_clip("walk", 0, Vec3::ZERO, Vec3::X);
    clip.add_event(AnimationEvent::new(0.5, "footstep").with_payload(EventPayload::Int(1)));
    let walk = clips.insert(clip);

    let mut animator = AnimatorRc::with_skeleton(skeleton, AnimatorConfig::default());
    animator.play_animation(walk, true);

    let mut frames = Vec::new();
    for frame in 0..50 {
        animator.update(0.1, &clips);
        let events = animator.drain_events();
        assert!(events.len() <= 1);
        if let Some(event) = events.first() {
            assert_eq!(event.source, EventSource::Main);
            assert_eq!(event.clip, walk);
            assert_eq!(event.event.payload, EventPayload::Int(1));
            frames.push(frame);
        }
    }
    assert_eq!(frames.len(), 5);
    for w in frames.windows(2) {
        assert!((9..=11).contains(&(w[1] - w[0])), "{:?}", frames);
    }
}

#[test]
#[wasm_bindgen_test]
fn test_node_based_clip() {
    let mut clips = ClipLibrary::new();
    let mut clip = AnimationClip::new("door", 0.0, AnimationType::NodeBased);
    let track = Track::step(vec![0.0, 0.5], vec![Vec3::ZERO, Vec3::Z]).unwrap();
    clip.add_node_channel(NodeAnimationChannel::new(2).with_translation(track));
    let door = clips.insert(clip);

    let mut animator = AnimatorRc::with_skeleton(common::two_bone_skeleton(), AnimatorConfig::default());
    animator.play_animation(door, false);
    animator.update(0.25, &clips);
    assert_eq!(animator.node_transform(2), Mat4::IDENTITY);
    animator.update(0.5, &clips);
    assert_eq!(animator.node_transforms().len(), 3);
    assert_eq!(animator.node_transform(2), Mat4::from_translation(Vec3::Z));
    assert_eq!(animator.node_transform(0), Mat4::IDENTITY);
    // skeletal pose is left at rest
    assert!(animator.local_pose()[0].translation.abs_diff_eq(Vec3::ZERO.into(), 1e-6));
}
