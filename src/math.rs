//!
//! Math helpers shared by sampling, blending and IK.
//!
//! Poses are stored as `Transform3A` (translation, rotation, scale) in bone local space,
//! and converted to `Mat4` only when the hierarchy is composed.
//!

use glam::{Mat4, Quat, Vec3, Vec3A, Vec4};
use glam_ext::Transform3A;
use static_assertions::const_assert_eq;
use std::mem;

/// Above this dot product, `quat_slerp` falls back to normalized lerp.
pub const SLERP_NLERP_THRESHOLD: f32 = 0.9995;

/// Lengths below this are treated as zero vectors.
pub const EPSILON_LENGTH: f32 = 1e-6;

const_assert_eq!(mem::size_of::<Mat4>(), 64);
const_assert_eq!(mem::size_of::<Vec3A>(), 16);

/// Flips `q` to the hemisphere of `reference`.
#[inline]
pub fn quat_align(reference: Quat, q: Quat) -> Quat {
    if reference.dot(q) < 0.0 {
        return -q;
    }
    return q;
}

/// Forces a positive w component, so that the quaternion describes the shortest path.
#[inline]
pub fn quat_positive_w(q: Quat) -> Quat {
    if q.w < 0.0 {
        return -q;
    }
    return q;
}

/// Normalized linear interpolation, hemisphere corrected.
#[inline]
pub fn quat_nlerp(from: Quat, to: Quat, t: f32) -> Quat {
    let to = quat_align(from, to);
    let v = Vec4::from(from).lerp(Vec4::from(to), t);
    let len2 = v.length_squared();
    if len2 < EPSILON_LENGTH {
        return from;
    }
    return Quat::from_vec4(v / len2.sqrt());
}

/// Shortest path spherical interpolation.
///
/// Nearly identical quaternions fall back to `quat_nlerp`, since `sin(theta)` gets too small
/// to divide by.
pub fn quat_slerp(from: Quat, to: Quat, t: f32) -> Quat {
    let to = quat_align(from, to);
    let dot = from.dot(to);
    if dot > SLERP_NLERP_THRESHOLD {
        return quat_nlerp(from, to, t);
    }

    let theta = dot.clamp(-1.0, 1.0).acos();
    let sin_theta = theta.sin();
    let a = ((1.0 - t) * theta).sin() / sin_theta;
    let b = (t * theta).sin() / sin_theta;
    return (from * a + to * b).normalize();
}

/// Shortest rotation from `from` to `to`. Vectors don't need to be normalized.
/// Degenerated inputs return identity.
pub fn quat_from_vectors(from: Vec3, to: Vec3) -> Quat {
    let from_len2 = from.length_squared();
    let to_len2 = to.length_squared();
    if from_len2 < EPSILON_LENGTH || to_len2 < EPSILON_LENGTH {
        return Quat::IDENTITY;
    }
    return Quat::from_rotation_arc(from / from_len2.sqrt(), to / to_len2.sqrt());
}

/// Decomposes `q` into a swing and a twist around `axis` (normalized), `q = swing * twist`.
pub fn quat_swing_twist(q: Quat, axis: Vec3) -> (Quat, Quat) {
    let r = Vec3::new(q.x, q.y, q.z);
    let p = axis * r.dot(axis);
    let twist = Quat::from_xyzw(p.x, p.y, p.z, q.w);
    let len2 = Vec4::from(twist).length_squared();
    let twist = if len2 < EPSILON_LENGTH {
        Quat::IDENTITY
    } else {
        Quat::from_vec4(Vec4::from(twist) / len2.sqrt())
    };
    let swing = q * twist.conjugate();
    return (swing, twist);
}

/// Signed rotation angle of `q` around `axis`, in [-PI, PI].
pub fn quat_angle_around(q: Quat, axis: Vec3) -> f32 {
    let (_, twist) = quat_swing_twist(q, axis);
    let twist = quat_positive_w(twist);
    let sin = Vec3::new(twist.x, twist.y, twist.z).dot(axis);
    return 2.0 * sin.atan2(twist.w);
}

/// Heading of a rotation: the angle around +Y of its forward (+Z) vector projected on the
/// horizontal plane.
pub fn quat_yaw(q: Quat) -> f32 {
    let forward = q * Vec3::Z;
    let flat = Vec3::new(forward.x, 0.0, forward.z);
    if flat.length_squared() < EPSILON_LENGTH {
        return 0.0;
    }
    return flat.x.atan2(flat.z);
}

/// Hermite basis evaluated at `t`, returned as `(h00, h10, h01, h11)`.
#[inline]
pub fn hermite_basis(t: f32) -> (f32, f32, f32, f32) {
    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    return (h00, h10, h01, h11);
}

/// Composes a local transform into a matrix.
#[inline]
pub fn transform_to_mat4(t: &Transform3A) -> Mat4 {
    return Mat4::from_scale_rotation_translation(Vec3::from(t.scale), t.rotation, Vec3::from(t.translation));
}

/// Decomposes an affine matrix into a transform. Shearing is lost.
#[inline]
pub fn mat4_to_transform(m: &Mat4) -> Transform3A {
    let (scale, rotation, translation) = m.to_scale_rotation_translation();
    return Transform3A::new(translation, rotation.normalize(), scale);
}

/// Rotation part of an affine matrix.
#[inline]
pub fn mat4_rotation(m: &Mat4) -> Quat {
    let (_, rotation, _) = m.to_scale_rotation_translation();
    return rotation.normalize();
}

/// Translation part of an affine matrix.
#[inline]
pub fn mat4_translation(m: &Mat4) -> Vec3 {
    return m.w_axis.truncate();
}

/// Interpolates two transforms: lerp on translation and scale, slerp on rotation.
#[inline]
pub fn transform_lerp(from: &Transform3A, to: &Transform3A, t: f32) -> Transform3A {
    let mut out = *from;
    out.translation = from.translation.lerp(to.translation, t);
    out.rotation = quat_slerp(from.rotation, to.rotation, t);
    out.scale = from.scale.lerp(to.scale, t);
    return out;
}

/// Compares two transforms with a maximum difference.
#[inline]
pub fn transform_abs_diff_eq(a: &Transform3A, b: &Transform3A, diff: f32) -> bool {
    return a.translation.abs_diff_eq(b.translation, diff)
        && (a.rotation.abs_diff_eq(b.rotation, diff) || a.rotation.abs_diff_eq(-b.rotation, diff))
        && a.scale.abs_diff_eq(b.scale, diff);
}
