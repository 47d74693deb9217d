//!
//! FABRIK (forward and backward reaching) IK job.
//!

use glam::{Mat4, Quat, Vec3};

use crate::base::RigError;
use crate::ik::ChainState;
use crate::math::{quat_from_vectors, EPSILON_LENGTH};

///
/// Iterative IK for chains of any length.
///
/// Joint positions are solved first, alternating a backward pass (tip pinned to the target)
/// and a forward pass (root pinned back) until the tip is within tolerance or the iteration
/// cap is hit. A target out of reach stretches the chain straight toward it. Joint rotations
/// are then recovered from the position changes with shortest arcs, which keeps the twist of
/// each bone.
///
#[derive(Debug)]
pub struct IKFabrikJob {
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

impl Default for IKFabrikJob {
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

impl IKFabrikJob {
    /// Gets joints of `IKFabrikJob`.
    #[inline]
    pub fn joints(&self) -> &[Mat4] {
        return &self.joints;
    }

    /// Gets mutable joints of `IKFabrikJob`.
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

    /// Sets target rotation of `IKFabrikJob`, the model space rotation given to the last joint.
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

    /// Gets corrections of `IKFabrikJob`, one per joint, to be post multiplied to the joints
    /// local rotations.
    #[inline]
    pub fn corrections(&self) -> &[Quat] {
        return &self.corrections;
    }

    /// Gets the solved model space joint positions.
    #[inline]
    pub fn positions(&self) -> &[Vec3] {
        return &self.positions;
    }

    /// Number of iterations used by the last run.
    #[inline]
    pub fn iterations(&self) -> u32 {
        return self.iterations;
    }

    #[inline]
    pub fn reached(&self) -> bool {
        return self.reached;
    }

    /// Validates `IKFabrikJob` parameters.
    pub fn validate(&self) -> bool {
        return self.joints.len() >= 2 && self.tolerance > 0.0 && self.target.is_finite();
    }

    /// Runs FABRIK job's task.
    /// The validate job before any operation is performed.
    pub fn run(&mut self) -> Result<(), RigError> {
        if !self.validate() {
            return Err(RigError::InvalidJob);
        }

        let mut state = ChainState::new(&self.joints);
        let count = state.positions.len();
        let lengths: Vec<f32> = state.positions.windows(2).map(|w| (w[1] - w[0]).length()).collect();
        let total: f32 = lengths.iter().sum();
        let root = state.positions[0];

        let mut points = state.positions.clone();
        self.iterations = 0;
        let to_target = self.target - root;
        if to_target.length() >= total {
            let dir = to_target.try_normalize().unwrap_or(Vec3::X);
            let mut reach = 0.0;
            for i in 1..count {
                reach += lengths[i - 1];
                points[i] = root + dir * reach;
            }
        } else {
            while self.iterations < self.max_iterations {
                if (points[count - 1] - self.target).length() <= self.tolerance {
                    break;
                }
                self.iterations += 1;

                points[count - 1] = self.target;
                for i in (0..count - 1).rev() {
                    let dir = segment_dir(points[i] - points[i + 1], state.positions[i] - state.positions[i + 1]);
                    points[i] = points[i + 1] + dir * lengths[i];
                }

                points[0] = root;
                for i in 1..count {
                    let dir = segment_dir(points[i] - points[i - 1], state.positions[i] - state.positions[i - 1]);
                    points[i] = points[i - 1] + dir * lengths[i - 1];
                }
            }
        }

        for i in 0..count - 1 {
            let delta = quat_from_vectors(state.positions[i + 1] - state.positions[i], points[i + 1] - points[i]);
            state.rotate(i, delta);
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

fn segment_dir(dir: Vec3, fallback: Vec3) -> Vec3 {
    if dir.length_squared() > EPSILON_LENGTH {
        return dir.normalize();
    }
    return fallback.try_normalize().unwrap_or(Vec3::X);
}
