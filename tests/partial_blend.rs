use rig_animation_rs::*;
use wasm_bindgen_test::*;

mod common;

#[test]
#[wasm_bindgen_test]
fn test_masked_layer() {
    let skeleton = common::chain_skeleton(4);
    let mut clips = ClipLibrary::new();
    let x = common::pose_clip("x", &[0, 1, 2, 3], 0.3);
    let y = common::pose_clip("y", &[0, 1, 2, 3], -0.5);
    let x_pose = sample_clip(&x, 0.25, true, skeleton.rest_pose()).unwrap();
    let y_pose = sample_clip(&y, 0.25, true, skeleton.rest_pose()).unwrap();
    let x = clips.insert(x);
    let y = clips.insert(y);

    let mut animator = AnimatorRc::with_skeleton(skeleton, AnimatorConfig::default());
    let upper = animator.create_layer(1);
    let base = animator.create_layer(0);
    animator.play_animation_on_layer(base, x, true);
    animator.play_animation_on_layer(upper, y, true);
    animator.set_bone_mask(upper, vec![2, 3]);
    animator.set_layer_weight(upper, 1.0);
    animator.update(0.25, &clips);

    let pose = animator.local_pose();
    common::compare_poses(&pose[0..2], &x_pose[0..2], 1e-6).unwrap();
    common::compare_poses(&pose[2..4], &y_pose[2..4], 1e-5).unwrap();

    // half weight lands halfway on the masked bones only
    animator.set_layer_weight(upper, 0.5);
    animator.update(0.0, &clips);
    let pose = animator.local_pose();
    common::compare_poses(&pose[0..2], &x_pose[0..2], 1e-6).unwrap();
    let half = glam::Quat::from_rotation_z(-0.1);
    assert!(pose[3].rotation.abs_diff_eq(half, 1e-5));

    // inactive layers are skipped
    animator.set_layer_active(upper, false);
    animator.update(0.0, &clips);
    common::compare_poses(animator.local_pose(), &x_pose, 1e-6).unwrap();
}

#[test]
#[wasm_bindgen_test]
fn test_layer_time_scale() {
    let skeleton = common::chain_skeleton(2);
    let mut clips = ClipLibrary::new();
    let x = clips.insert(common::pose_clip("x", &[0], 0.3));

    let mut animator = AnimatorRc::with_skeleton(skeleton, AnimatorConfig::default());
    let layer = animator.create_layer(0);
    animator.play_animation_on_layer(layer, x, true);
    animator.set_layer_time_scale(layer, 0.5);
    animator.update(0.5, &clips);
    assert_eq!(animator.layer(layer).map(|l| l.time()), Some(0.25));
    animator.stop_layer(layer);
    assert_eq!(animator.layer(layer).and_then(|l| l.clip()), None);
}
