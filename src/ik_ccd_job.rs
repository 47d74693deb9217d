//!
//! CCD (cyclic coordinate descent) IK job.
//!

use glam::{Mat4, Quat, Vec3};

use crate::base::RigError;
use crate::ik::ChainState;
use crate::math::quat_from_vectors;

///
/// Iterative IK rotating one joint at a time, from the joint before the tip up to the root,
/// so that the tip points toward the target. The whole chain below a joint follows every
/// single joint update.
///
#[derive(Debug)]
pub struct IKCcdJob {
    joints: Vec<Mat4>,
    target: Vec3,
    target_rotation: Option<Quat>,
    max_iterations: u32,
    tolerance: f32,

    corrections: Vec<Quat>,
    positions: Vec<Vec3>,
    iterations: u32,
    reached: bool,
}

impl Default for IKCcdJob {
    fn default() -> Self {
        return Self {
            joints: Vec::new(),
            target: Vec3::ZERO,
            target_rotation: None,
            max_iterations: 10,
            tolerance: 0.001,

            corrections: Vec::new(),
            positions: Vec::new(),
            iterations: 0,
            reached: false,
        };
    }
}

impl IKCcdJob {
    #[inline]
    pub fn joints(&self) -> &[Mat4] {
        return &self.joints;
    }

    /// Gets mutable joints of `IKCcdJob`.
    ///
    /// Model space matrices of the chain joints, root first.
    #[inline]
    pub fn joints_mut(&mut self) -> &mut Vec<Mat4> {
        return &mut self.joints;
    }

    #[inline]
    pub fn target(&self) -> Vec3 {
        return self.target;
    }

    #[inline]
    pub fn set_target(&mut self, target: Vec3) {
        self.target = target;
    }

    #[inline]
    pub fn target_rotation(&self) -> Option<Quat> {
        return self.target_rotation;
    }

    #[inline]
    pub fn set_target_rotation(&mut self, target_rotation: Option<Quat>) {
        self.target_rotation = target_rotation;
    }

    #[inline]
    pub fn max_iterations(&self) -> u32 {
        return self.max_iterations;
    }

    #[inline]
    pub fn set_max_iterations(&mut self, max_iterations: u32) {
        self.max_iterations = max_iterations;
    }

    #[inline]
    pub fn tolerance(&self) -> f32 {
        return self.tolerance;
    }

    #[inline]
    pub fn set_tolerance(&mut self, tolerance: f32) {
        self.tolerance = tolerance;
    }

    /// Gets corrections of `IKCcdJob`, one per joint.
    #[inline]
    pub fn corrections(&self) -> &[Quat] {
        return &self.corrections;
    }

    #[inline]
    pub fn positions(&self) -> &[Vec3] {
        return &self.positions;
    }

    #[inline]
    pub fn iterations(&self) -> u32 {
        return self.iterations;
    }

    #[inline]
    pub fn reached(&self) -> bool {
        return self.reached;
    }

    /// Validates `IKCcdJob` parameters.
    pub fn validate(&self) -> bool {
        return self.joints.len() >= 2 && self.tolerance > 0.0 && self.target.is_finite();
    }

    /// Runs CCD job's task.
    /// The validate job before any operation is performed.
    pub fn run(&mut self) -> Result<(), RigError> {
        if !self.validate() {
            return Err(RigError::InvalidJob);
        }

        let mut state = ChainState::new(&self.joints);
        let count = state.positions.len();
        self.iterations = 0;
        while self.iterations < self.max_iterations {
            if (state.tip() - self.target).length() <= self.tolerance {
                break;
            }
            self.iterations += 1;
            for i in (0..count - 1).rev() {
                let pivot = state.positions[i];
                let delta = quat_from_vectors(state.tip() - pivot, self.target - pivot);
                state.rotate(i, delta);
            }
        }
        if let Some(rotation) = self.target_rotation {
            state.orient_tip(rotation);
        }

        self.reached = (state.tip() - self.target).length() <= self.tolerance;
        self.positions = state.positions;
        self.corrections = state.corrections;
        return Ok(());
    }
}
