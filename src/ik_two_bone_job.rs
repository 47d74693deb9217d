//!
//! Two bone IK job.
//!

use glam::{Mat4, Quat, Vec3};

use crate::base::RigError;
use crate::math::{mat4_rotation, mat4_translation, quat_from_vectors, EPSILON_LENGTH};

///
/// Closed form IK for a 3 joints chain (shoulder, elbow, wrist for instance).
///
/// The job takes model space joint matrices and outputs local corrections to be multiplied
/// with the start and mid joints local rotations. The elbow angle comes from the law of
/// cosines. The bend plane contains the root to target direction and either the pole target
/// or, without pole, the current mid joint.
///
#[derive(Debug)]
pub struct IKTwoBoneJob {
    target: Vec3,
    pole_target: Option<Vec3>,
    epsilon: f32,
    start_joint: Mat4,
    mid_joint: Mat4,
    end_joint: Mat4,

    start_joint_correction: Quat,
    mid_joint_correction: Quat,
    reached: bool,
}

impl Default for IKTwoBoneJob {
    fn default() -> Self {
        return Self {
            target: Vec3::ZERO,
            pole_target: None,
            epsilon: 0.001,
            start_joint: Mat4::IDENTITY,
            mid_joint: Mat4::IDENTITY,
            end_joint: Mat4::IDENTITY,

            start_joint_correction: Quat::IDENTITY,
            mid_joint_correction: Quat::IDENTITY,
            reached: false,
        };
    }
}

impl IKTwoBoneJob {
    /// Gets target of `IKTwoBoneJob`.
    #[inline]
    pub fn target(&self) -> Vec3 {
        return self.target;
    }

    /// Sets target of `IKTwoBoneJob`, in model space.
    #[inline]
    pub fn set_target(&mut self, target: Vec3) {
        self.target = target;
    }

    /// Gets pole target of `IKTwoBoneJob`.
    #[inline]
    pub fn pole_target(&self) -> Option<Vec3> {
        return self.pole_target;
    }

    /// Sets pole target of `IKTwoBoneJob`, the model space point the mid joint bends toward.
    #[inline]
    pub fn set_pole_target(&mut self, pole_target: Option<Vec3>) {
        self.pole_target = pole_target;
    }

    /// Gets epsilon of `IKTwoBoneJob`.
    #[inline]
    pub fn epsilon(&self) -> f32 {
        return self.epsilon;
    }

    /// Sets epsilon of `IKTwoBoneJob`.
    ///
    /// Targets further than `upper + lower - epsilon` produce a straight chain.
    #[inline]
    pub fn set_epsilon(&mut self, epsilon: f32) {
        self.epsilon = epsilon;
    }

    #[inline]
    pub fn start_joint(&self) -> Mat4 {
        return self.start_joint;
    }

    /// Sets start joint of `IKTwoBoneJob`, model space matrix.
    #[inline]
    pub fn set_start_joint(&mut self, start_joint: Mat4) {
        self.start_joint = start_joint;
    }

    #[inline]
    pub fn mid_joint(&self) -> Mat4 {
        return self.mid_joint;
    }

    /// Sets mid joint of `IKTwoBoneJob`, model space matrix.
    #[inline]
    pub fn set_mid_joint(&mut self, mid_joint: Mat4) {
        self.mid_joint = mid_joint;
    }

    #[inline]
    pub fn end_joint(&self) -> Mat4 {
        return self.end_joint;
    }

    /// Sets end joint of `IKTwoBoneJob`, model space matrix.
    #[inline]
    pub fn set_end_joint(&mut self, end_joint: Mat4) {
        self.end_joint = end_joint;
    }

    /// Gets start joint correction of `IKTwoBoneJob`, to be post multiplied to the start
    /// joint local rotation.
    #[inline]
    pub fn start_joint_correction(&self) -> Quat {
        return self.start_joint_correction;
    }

    /// Gets mid joint correction of `IKTwoBoneJob`, to be post multiplied to the mid joint
    /// local rotation.
    #[inline]
    pub fn mid_joint_correction(&self) -> Quat {
        return self.mid_joint_correction;
    }

    /// Test if the target is within reach of the chain.
    #[inline]
    pub fn reached(&self) -> bool {
        return self.reached;
    }

    pub fn clear_outs(&mut self) {
        self.start_joint_correction = Quat::IDENTITY;
        self.mid_joint_correction = Quat::IDENTITY;
        self.reached = false;
    }

    /// Validates `IKTwoBoneJob` parameters.
    pub fn validate(&self) -> bool {
        return self.epsilon >= 0.0 && self.target.is_finite() && self.pole_target.map_or(true, |p| p.is_finite());
    }

    /// Runs two bone IK job's task.
    /// The validate job before any operation is performed.
    pub fn run(&mut self) -> Result<(), RigError> {
        if !self.validate() {
            return Err(RigError::InvalidJob);
        }
        self.clear_outs();

        let start = mat4_translation(&self.start_joint);
        let mid = mat4_translation(&self.mid_joint);
        let end = mat4_translation(&self.end_joint);

        let upper = (mid - start).length();
        let lower = (end - mid).length();
        if upper < EPSILON_LENGTH || lower < EPSILON_LENGTH {
            return Ok(());
        }

        let to_target = self.target - start;
        let distance = to_target.length();
        let dir = if distance > EPSILON_LENGTH {
            to_target / distance
        } else {
            (end - start).try_normalize().unwrap_or(Vec3::X)
        };

        let max_reach = upper + lower - self.epsilon;
        let min_reach = (upper - lower).abs() + self.epsilon;
        self.reached = distance <= upper + lower + self.epsilon && distance >= (upper - lower).abs();

        let (new_mid, new_end) = if distance >= max_reach {
            (start + dir * upper, start + dir * (upper + lower))
        } else {
            let d = distance.max(min_reach).min(max_reach);
            let hint = match self.pole_target {
                Some(pole) => pole - start,
                None => mid - start,
            };
            let bend = (hint - dir * hint.dot(dir))
                .try_normalize()
                .unwrap_or_else(|| dir.any_orthonormal_vector());
            let cos_a = ((upper * upper + d * d - lower * lower) / (2.0 * upper * d)).clamp(-1.0, 1.0);
            let sin_a = (1.0 - cos_a * cos_a).max(0.0).sqrt();
            (start + (dir * cos_a + bend * sin_a) * upper, start + dir * d)
        };

        let start_delta = quat_from_vectors(mid - start, new_mid - start);
        let end_rotated = start + start_delta * (end - start);
        let mid_delta = quat_from_vectors(end_rotated - new_mid, new_end - new_mid);

        let start_rot = mat4_rotation(&self.start_joint);
        let mid_rot = start_delta * mat4_rotation(&self.mid_joint);
        self.start_joint_correction = (start_rot.inverse() * start_delta * start_rot).normalize();
        self.mid_joint_correction = (mid_rot.inverse() * mid_delta * mid_rot).normalize();
        return Ok(());
    }
}
