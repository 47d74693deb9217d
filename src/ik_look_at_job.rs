//!
//! Look at IK job.
//!

use glam::{Mat4, Quat, Vec3};

use crate::base::RigError;
use crate::math::{mat4_rotation, mat4_translation, quat_from_vectors, EPSILON_LENGTH};

///
/// Rotates a joint so that its forward axis points at a target.
///
/// The rotation is the shortest arc between the current forward direction and the joint to
/// target direction, so the twist around the forward axis is kept.
///
#[derive(Debug)]
pub struct IKLookAtJob {
    target: Vec3,
    forward: Vec3,
    joint: Mat4,

    joint_correction: Quat,
    reached: bool,
}

impl Default for IKLookAtJob {
    fn default() -> Self {
        return Self {
            target: Vec3::ZERO,
            forward: Vec3::Z,
            joint: Mat4::IDENTITY,

            joint_correction: Quat::IDENTITY,
            reached: false,
        };
    }
}

impl IKLookAtJob {
    #[inline]
    pub fn target(&self) -> Vec3 {
        return self.target;
    }

    /// Sets target of `IKLookAtJob`, in model space.
    #[inline]
    pub fn set_target(&mut self, target: Vec3) {
        self.target = target;
    }

    #[inline]
    pub fn forward(&self) -> Vec3 {
        return self.forward;
    }

    /// Sets forward of `IKLookAtJob`, the joint local axis to aim. Must be normalized.
    #[inline]
    pub fn set_forward(&mut self, forward: Vec3) {
        self.forward = forward;
    }

    #[inline]
    pub fn joint(&self) -> Mat4 {
        return self.joint;
    }

    /// Sets joint of `IKLookAtJob`, model space matrix.
    #[inline]
    pub fn set_joint(&mut self, joint: Mat4) {
        self.joint = joint;
    }

    /// Gets joint correction of `IKLookAtJob`, to be post multiplied to the joint local rotation.
    #[inline]
    pub fn joint_correction(&self) -> Quat {
        return self.joint_correction;
    }

    /// Test if the forward axis could be aligned. False when the target is on the joint.
    #[inline]
    pub fn reached(&self) -> bool {
        return self.reached;
    }

    /// Validates `IKLookAtJob` parameters.
    pub fn validate(&self) -> bool {
        return self.forward.is_normalized() && self.target.is_finite();
    }

    /// Runs look at IK job's task.
    /// The validate job before any operation is performed.
    pub fn run(&mut self) -> Result<(), RigError> {
        if !self.validate() {
            return Err(RigError::InvalidJob);
        }

        let to_target = self.target - mat4_translation(&self.joint);
        if to_target.length_squared() < EPSILON_LENGTH {
            self.joint_correction = Quat::IDENTITY;
            self.reached = false;
            return Ok(());
        }

        let rotation = mat4_rotation(&self.joint);
        let delta = quat_from_vectors(rotation * self.forward, to_target);
        self.joint_correction = (rotation.inverse() * delta * rotation).normalize();
        self.reached = true;
        return Ok(());
    }
}
