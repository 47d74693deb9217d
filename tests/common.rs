#![allow(unused_imports)]
#![allow(dead_code)]

use glam::{Mat4, Quat, Vec3};
use glam_ext::Transform3A;
use rig_animation_rs::*;
use std::error::Error;
use std::rc::Rc;

/// Straight chain of `count` bones along +X, each one unit from its parent.
pub fn chain_skeleton(count: usize) -> Rc<Skeleton> {
    let bones = (0..count)
        .map(|i| {
            let local = if i == 0 {
                Mat4::IDENTITY
            } else {
                Mat4::from_translation(Vec3::X)
            };
            let inverse_bind = Mat4::from_translation(Vec3::new(-(i as f32), 0.0, 0.0));
            return Bone::new(format!("bone{}", i), i as i32 - 1, local, inverse_bind);
        })
        .collect();
    return Rc::new(Skeleton::new(bones).unwrap());
}

/// Root with a child, the child one unit along +Y.
pub fn two_bone_skeleton() -> Rc<Skeleton> {
    let bones = vec![
        Bone::new("root", -1, Mat4::IDENTITY, Mat4::IDENTITY),
        Bone::new("child", 0, Mat4::from_translation(Vec3::Y), Mat4::IDENTITY),
    ];
    return Rc::new(Skeleton::new(bones).unwrap());
}

/// One second clip moving `bone` from `from` to `to`.
pub fn translation_clip(name: &str, bone: usize, from: Vec3, to: Vec3) -> AnimationClip {
    let mut clip = AnimationClip::new(name, 1.0, AnimationType::Skeletal);
    let track = Track::linear(vec![0.0, 1.0], vec![from, to]).unwrap();
    clip.add_channel(AnimationChannel::new(bone).with_translation(track));
    return clip;
}

/// One second clip rotating every listed bone by `angle` around +Z, held constant.
pub fn pose_clip(name: &str, bones: &[usize], angle: f32) -> AnimationClip {
    let mut clip = AnimationClip::new(name, 1.0, AnimationType::Skeletal);
    let rotation = Quat::from_rotation_z(angle);
    for &bone in bones {
        let track = Track::linear(vec![0.0, 1.0], vec![rotation, rotation]).unwrap();
        clip.add_channel(AnimationChannel::new(bone).with_rotation(track));
    }
    return clip;
}

pub fn compare_poses(actual: &[Transform3A], expected: &[Transform3A], diff: f32) -> Result<(), Box<dyn Error>> {
    if actual.len() != expected.len() {
        return Err(format!("compare_poses() size:{} expected:{}", actual.len(), expected.len()).into());
    }
    for i in 0..expected.len() {
        if !transform_abs_diff_eq(&actual[i], &expected[i], diff) {
            println!("actual: {:?}", actual[i]);
            println!("expected: {:?}", expected[i]);
            return Err(format!("compare_poses() idx:{}", i).into());
        }
    }
    Ok(())
}

pub fn compare_matrices(actual: &[Mat4], expected: &[Mat4], diff: f32) -> Result<(), Box<dyn Error>> {
    if actual.len() != expected.len() {
        return Err(format!("compare_matrices() size:{} expected:{}", actual.len(), expected.len()).into());
    }
    for i in 0..expected.len() {
        if !Mat4::abs_diff_eq(&actual[i], expected[i], diff) {
            println!("actual: {:?}", actual[i]);
            println!("expected: {:?}", expected[i]);
            return Err(format!("compare_matrices() idx:{}", i).into());
        }
    }
    Ok(())
}
