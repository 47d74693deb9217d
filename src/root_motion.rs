//!
//! Root motion extraction.
//!
//! The root bone displacement between two updates is measured in model space, handed to the
//! application as a delta, and optionally removed from the pose so that the character animates
//! in place.
//!

use core::f32::consts;
use glam::{Mat4, Quat, Vec3};
use glam_ext::Transform3A;

use crate::clip_library::ClipHandle;
use crate::math::{mat4_rotation, mat4_translation, quat_yaw};

/// Clip driving the root bone during an update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootMotionSource {
    pub clip: ClipHandle,
    /// The clip looped around its end during the update.
    pub wrapped: bool,
    /// Share of the clip in the pose, 1 for a clip played alone.
    pub weight: f32,
}

impl RootMotionSource {
    pub fn new(clip: ClipHandle, wrapped: bool) -> RootMotionSource {
        return RootMotionSource {
            clip,
            wrapped,
            weight: 1.0,
        };
    }

    pub fn with_weight(mut self, weight: f32) -> RootMotionSource {
        self.weight = weight;
        return self;
    }
}

/// Model space position and heading of the root bone at a given time.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RootSample {
    pub position: Vec3,
    /// Heading around +Y, in radians.
    pub yaw: f32,
}

impl RootSample {
    pub fn new(position: Vec3, yaw: f32) -> RootSample {
        return RootSample { position, yaw };
    }

    /// Motion of a full cycle, from `start` to `end`, scaled by `weight`.
    pub fn cycle(start: &RootSample, end: &RootSample, weight: f32) -> RootSample {
        return RootSample {
            position: (end.position - start.position) * weight,
            yaw: wrap_angle(end.yaw - start.yaw) * weight,
        };
    }

    /// Reads position and heading from a model space bone matrix.
    pub fn from_matrix(global: &Mat4) -> RootSample {
        return RootSample {
            position: mat4_translation(global),
            yaw: quat_yaw(mat4_rotation(global)),
        };
    }
}

/// Wraps an angle into [-PI, PI].
fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + consts::PI).rem_euclid(consts::TAU) - consts::PI;
    return wrapped;
}

///
/// Root motion accumulator of an animator.
///
/// The delta is measured each update from the previous root sample. When clips wrapped during
/// the update, the root jumped back by their cycle motion, which is added back to the delta.
///
#[derive(Debug, Clone)]
pub struct RootMotion {
    extract: bool,
    bone: Option<usize>,
    scale: Vec3,
    previous: Option<RootSample>,
    delta: Vec3,
    delta_rotation: Quat,
}

impl Default for RootMotion {
    fn default() -> RootMotion {
        return RootMotion {
            extract: false,
            bone: None,
            scale: Vec3::ONE,
            previous: None,
            delta: Vec3::ZERO,
            delta_rotation: Quat::IDENTITY,
        };
    }
}

impl RootMotion {
    /// Test if the root motion is stripped from the pose.
    #[inline]
    pub fn extract(&self) -> bool {
        return self.extract;
    }

    #[inline]
    pub fn set_extract(&mut self, extract: bool) {
        self.extract = extract;
    }

    /// Gets the explicit root bone, overriding the one declared by clips.
    #[inline]
    pub fn bone(&self) -> Option<usize> {
        return self.bone;
    }

    #[inline]
    pub fn set_bone(&mut self, bone: Option<usize>) {
        if self.bone != bone {
            self.previous = None;
        }
        self.bone = bone;
    }

    /// Gets the per axis scale applied to deltas.
    #[inline]
    pub fn scale(&self) -> Vec3 {
        return self.scale;
    }

    #[inline]
    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
    }

    /// Translation delta of the last update, scaled.
    #[inline]
    pub fn delta(&self) -> Vec3 {
        return self.delta;
    }

    /// Heading delta of the last update, as a rotation around +Y.
    #[inline]
    pub fn delta_rotation(&self) -> Quat {
        return self.delta_rotation;
    }

    /// Forgets the previous sample, the next update yields a zero delta.
    pub fn reset(&mut self) {
        self.previous = None;
        self.delta = Vec3::ZERO;
        self.delta_rotation = Quat::IDENTITY;
    }

    ///
    /// Accumulates the motion between the previous sample and `current`.
    ///
    /// * `wrap` - Cycle motion of the clips that wrapped since the previous update, weighted
    ///   by their share of the pose. See `RootSample::cycle`.
    ///
    pub fn update(&mut self, current: RootSample, wrap: Option<RootSample>) {
        let wrap = wrap.unwrap_or_default();
        let (delta, yaw) = match self.previous {
            None => (Vec3::ZERO, 0.0),
            Some(prev) => (
                current.position - prev.position + wrap.position,
                wrap_angle(current.yaw - prev.yaw) + wrap.yaw,
            ),
        };
        self.delta = delta * self.scale;
        self.delta_rotation = Quat::from_rotation_y(yaw);
        self.previous = Some(current);
    }

    /// Removes the horizontal translation and the heading from a root bone local transform.
    pub fn strip(local: &mut Transform3A) {
        local.translation.x = 0.0;
        local.translation.z = 0.0;
        let yaw = quat_yaw(local.rotation);
        local.rotation = (Quat::from_rotation_y(-yaw) * local.rotation).normalize();
    }
}
