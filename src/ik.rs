//!
//! IK chains, joint constraints and the chain solving pipeline.
//!
//! Solvers work on model space matrices and output one local correction per chain bone
//! (`local.rotation * correction`). The pipeline applies corrections by chain weight against
//! the pre IK pose (or the captured rest rotations), clamps them with joint constraints, then
//! recomposes the hierarchy before the next chain.
//!

use glam::{Mat4, Quat, Vec3};
use glam_ext::Transform3A;
use std::collections::VecDeque;

use crate::base::RigError;
use crate::config::AnimatorConfig;
use crate::ik_ccd_job::IKCcdJob;
use crate::ik_fabrik_job::IKFabrikJob;
use crate::ik_look_at_job::IKLookAtJob;
use crate::ik_two_bone_job::IKTwoBoneJob;
use crate::math::{
    mat4_rotation, mat4_translation, quat_angle_around, quat_positive_w, quat_slerp, quat_swing_twist,
    transform_to_mat4,
};
use crate::skeleton::Skeleton;

/// IK solving algorithm of a chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IKSolver {
    /// Closed form solver for exactly 3 bones.
    #[default]
    TwoBone,
    /// Orients the last bone of the chain toward the target.
    LookAt,
    Fabrik,
    Ccd,
}

impl IKSolver {
    /// Minimum number of bones of a chain using this solver.
    pub fn min_bones(&self) -> usize {
        return match self {
            IKSolver::TwoBone => 3,
            IKSolver::LookAt => 1,
            IKSolver::Fabrik | IKSolver::Ccd => 2,
        };
    }

    /// Maximum number of bones of a chain using this solver.
    pub fn max_bones(&self) -> usize {
        return match self {
            IKSolver::TwoBone => 3,
            _ => usize::MAX,
        };
    }
}

/// Limits applied to a joint local rotation after solving. Angles are in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JointConstraint {
    /// Rotation around a single axis within `[min_angle, max_angle]`.
    Hinge { axis: Vec3, min_angle: f32, max_angle: f32 },
    /// The joint axis stays within a cone of half angle `max_angle`, twist is free.
    Cone { axis: Vec3, max_angle: f32 },
    /// Swing within `swing_limit` and twist around the axis within `[-twist_limit, twist_limit]`.
    BallAndSocket { axis: Vec3, swing_limit: f32, twist_limit: f32 },
}

impl JointConstraint {
    /// Clamps a local rotation.
    pub fn apply(&self, rotation: Quat) -> Quat {
        return match *self {
            JointConstraint::Hinge {
                axis,
                min_angle,
                max_angle,
            } => {
                let axis = axis.normalize_or_zero();
                if axis == Vec3::ZERO {
                    return rotation;
                }
                let angle = quat_angle_around(rotation, axis).clamp(min_angle, max_angle);
                Quat::from_axis_angle(axis, angle)
            }
            JointConstraint::Cone { axis, max_angle } => {
                let axis = axis.normalize_or_zero();
                if axis == Vec3::ZERO {
                    return rotation;
                }
                let (swing, twist) = quat_swing_twist(rotation, axis);
                (limit_swing(swing, max_angle) * twist).normalize()
            }
            JointConstraint::BallAndSocket {
                axis,
                swing_limit,
                twist_limit,
            } => {
                let axis = axis.normalize_or_zero();
                if axis == Vec3::ZERO {
                    return rotation;
                }
                let (swing, _) = quat_swing_twist(rotation, axis);
                let twist_angle = quat_angle_around(rotation, axis).clamp(-twist_limit, twist_limit);
                let twist = Quat::from_axis_angle(axis, twist_angle);
                (limit_swing(swing, swing_limit) * twist).normalize()
            }
        };
    }
}

fn limit_swing(swing: Quat, max_angle: f32) -> Quat {
    let swing = quat_positive_w(swing);
    let angle = 2.0 * swing.w.clamp(-1.0, 1.0).acos();
    if angle <= max_angle || angle <= 0.0 {
        return swing;
    }
    return quat_slerp(Quat::IDENTITY, swing, max_angle.max(0.0) / angle);
}

///
/// An ordered bone chain (root to tip) solved toward a target.
///
/// Bones don't need to be direct children of each other, but each one must descend from the
/// previous one.
///
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IKChain {
    pub solver: IKSolver,
    pub bones: Vec<usize>,
    /// Target position in model space.
    pub target: Vec3,
    /// Model space rotation the tip is oriented to by FABRIK and CCD.
    pub target_rotation: Option<Quat>,
    /// Blend weight in [0, 1] between the input pose and the solved pose.
    pub weight: f32,
    pub enabled: bool,
    /// Model space point the two bone solver bends toward.
    pub pole_target: Option<Vec3>,
    /// Constraints keyed by bone index.
    pub constraints: Vec<(usize, JointConstraint)>,
    /// Local rotations the solution is blended from instead of the animated pose.
    pub rest_rotations: Option<Vec<Quat>>,
    /// Iteration cap, 0 uses the animator configuration.
    pub max_iterations: u32,
    /// Reach tolerance, non positive uses the animator configuration.
    pub tolerance: f32,
    /// Bone local axis aimed by the look at solver.
    pub forward_axis: Vec3,
}

impl IKChain {
    pub fn new(solver: IKSolver, bones: Vec<usize>) -> IKChain {
        return IKChain {
            solver,
            bones,
            target: Vec3::ZERO,
            target_rotation: None,
            weight: 1.0,
            enabled: true,
            pole_target: None,
            constraints: Vec::new(),
            rest_rotations: None,
            max_iterations: 0,
            tolerance: 0.0,
            forward_axis: Vec3::Z,
        };
    }

    pub fn with_target(mut self, target: Vec3) -> IKChain {
        self.target = target;
        return self;
    }

    pub fn with_pole_target(mut self, pole: Vec3) -> IKChain {
        self.pole_target = Some(pole);
        return self;
    }

    pub fn with_forward_axis(mut self, axis: Vec3) -> IKChain {
        self.forward_axis = axis;
        return self;
    }

    /// Last bone of the chain.
    #[inline]
    pub fn tip(&self) -> Option<usize> {
        return self.bones.last().copied();
    }

    /// Gets the constraint of `bone`, if any.
    pub fn constraint(&self, bone: usize) -> Option<&JointConstraint> {
        return self.constraints.iter().find(|(b, _)| *b == bone).map(|(_, c)| c);
    }

    /// Sets the constraint of `bone`, replacing the previous one.
    pub fn set_constraint(&mut self, bone: usize, constraint: JointConstraint) {
        match self.constraints.iter_mut().find(|(b, _)| *b == bone) {
            Some(entry) => entry.1 = constraint,
            None => self.constraints.push((bone, constraint)),
        }
    }

    /// Checks the chain against a skeleton: bone count for the solver, indices in range, and
    /// each bone descending from the previous one.
    pub fn validate(&self, skeleton: &Skeleton) -> Result<(), RigError> {
        let count = self.bones.len();
        if count < self.solver.min_bones() || count > self.solver.max_bones() {
            return Err(RigError::InvalidJob);
        }
        if self.bones.iter().any(|&b| b >= skeleton.num_bones()) {
            return Err(RigError::InvalidIndex);
        }
        if self.bones.windows(2).any(|w| !skeleton.is_ancestor(w[0], w[1])) {
            return Err(RigError::InvalidJob);
        }
        return Ok(());
    }

    /// Test if the chain takes part in solving.
    #[inline]
    pub fn is_active(&self) -> bool {
        return self.enabled && self.weight > 0.0;
    }
}

///
/// Orders chains so that a chain is solved before any chain whose bones it drives.
///
/// Chain `a` precedes chain `b` when a bone of `a` is a skeleton ancestor of a bone of `b`.
/// Ties keep declaration order. If the dependencies form a cycle, declaration order is returned.
///
pub fn solve_order(chains: &[IKChain], skeleton: &Skeleton) -> Vec<usize> {
    let count = chains.len();
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut in_degree = vec![0usize; count];
    for a in 0..count {
        for b in 0..count {
            if a == b {
                continue;
            }
            let drives = chains[a]
                .bones
                .iter()
                .any(|&ab| chains[b].bones.iter().any(|&bb| ab != bb && skeleton.is_ancestor(ab, bb)));
            if drives {
                edges[a].push(b);
                in_degree[b] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(idx) = queue.pop_front() {
        order.push(idx);
        for &next in &edges[idx] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != count {
        log::warn!("IK chains have cyclic dependencies, solved in declaration order");
        return (0..count).collect();
    }
    return order;
}

///
/// Model space state of a chain while an iterative solver runs, with the local corrections
/// accumulated so far.
///
#[derive(Debug, Clone)]
pub(crate) struct ChainState {
    pub positions: Vec<Vec3>,
    pub rotations: Vec<Quat>,
    pub corrections: Vec<Quat>,
}

impl ChainState {
    pub fn new(joints: &[Mat4]) -> ChainState {
        return ChainState {
            positions: joints.iter().map(mat4_translation).collect(),
            rotations: joints.iter().map(mat4_rotation).collect(),
            corrections: vec![Quat::IDENTITY; joints.len()],
        };
    }

    #[inline]
    pub fn tip(&self) -> Vec3 {
        return self.positions.last().copied().unwrap_or(Vec3::ZERO);
    }

    /// Rotates joint `idx` by the model space rotation `delta` around its position. Joints
    /// after `idx` are carried along.
    pub fn rotate(&mut self, idx: usize, delta: Quat) {
        let pivot = self.positions[idx];
        let rotation = self.rotations[idx];
        self.corrections[idx] = (self.corrections[idx] * rotation.inverse() * delta * rotation).normalize();
        self.rotations[idx] = (delta * rotation).normalize();
        for j in (idx + 1)..self.positions.len() {
            self.positions[j] = pivot + delta * (self.positions[j] - pivot);
            self.rotations[j] = (delta * self.rotations[j]).normalize();
        }
    }

    /// Orients the last joint to a model space rotation.
    pub fn orient_tip(&mut self, rotation: Quat) {
        if let Some(tip) = self.rotations.len().checked_sub(1) {
            let delta = rotation * self.rotations[tip].inverse();
            self.rotate(tip, delta);
        }
    }
}

/// Composes `locals` into model space and skinning matrices.
pub fn compose_pose(
    skeleton: &Skeleton,
    locals: &[Transform3A],
    local_matrices: &mut Vec<Mat4>,
    globals: &mut Vec<Mat4>,
    finals: &mut Vec<Mat4>,
) {
    local_matrices.clear();
    local_matrices.extend(locals.iter().map(transform_to_mat4));
    skeleton.compute_global_matrices(local_matrices, globals, finals);
}

///
/// Mutable view over a pose being solved.
///
/// `globals` and `finals` are kept consistent with `locals` by `solve_chains`.
///
#[derive(Debug)]
pub struct IKPose<'t> {
    pub skeleton: &'t Skeleton,
    pub locals: &'t mut [Transform3A],
    pub globals: &'t mut Vec<Mat4>,
    pub finals: &'t mut Vec<Mat4>,
}

impl<'t> IKPose<'t> {
    fn recompose(&mut self, scratch: &mut Vec<Mat4>) {
        compose_pose(self.skeleton, self.locals, scratch, self.globals, self.finals);
    }

    fn chain_globals(&self, chain: &IKChain) -> Vec<Mat4> {
        return chain.bones.iter().map(|&b| self.globals[b]).collect();
    }
}

fn solve_corrections(chain: &IKChain, joints: &[Mat4], config: &AnimatorConfig) -> Result<Vec<Quat>, RigError> {
    let max_iterations = if chain.max_iterations > 0 {
        chain.max_iterations
    } else {
        config.ik_max_iterations
    };
    let tolerance = if chain.tolerance > 0.0 {
        chain.tolerance
    } else {
        config.ik_tolerance
    };

    match chain.solver {
        IKSolver::TwoBone => {
            let mut job = IKTwoBoneJob::default();
            job.set_start_joint(joints[0]);
            job.set_mid_joint(joints[1]);
            job.set_end_joint(joints[2]);
            job.set_target(chain.target);
            job.set_pole_target(chain.pole_target);
            job.set_epsilon(config.two_bone_epsilon);
            job.run()?;
            return Ok(vec![job.start_joint_correction(), job.mid_joint_correction(), Quat::IDENTITY]);
        }
        IKSolver::LookAt => {
            let mut job = IKLookAtJob::default();
            let tip = joints.len() - 1;
            job.set_joint(joints[tip]);
            job.set_forward(chain.forward_axis.normalize_or_zero());
            job.set_target(chain.target);
            job.run()?;
            let mut corrections = vec![Quat::IDENTITY; joints.len()];
            corrections[tip] = job.joint_correction();
            return Ok(corrections);
        }
        IKSolver::Fabrik => {
            let mut job = IKFabrikJob::default();
            job.joints_mut().extend_from_slice(joints);
            job.set_target(chain.target);
            job.set_target_rotation(chain.target_rotation);
            job.set_max_iterations(max_iterations);
            job.set_tolerance(tolerance);
            job.run()?;
            return Ok(job.corrections().to_vec());
        }
        IKSolver::Ccd => {
            let mut job = IKCcdJob::default();
            job.joints_mut().extend_from_slice(joints);
            job.set_target(chain.target);
            job.set_target_rotation(chain.target_rotation);
            job.set_max_iterations(max_iterations);
            job.set_tolerance(tolerance);
            job.run()?;
            return Ok(job.corrections().to_vec());
        }
    }
}

///
/// Solves every active chain in dependency order.
///
/// Invalid chains are skipped with a warning. On return `pose.globals` and `pose.finals`
/// match `pose.locals`.
///
pub fn solve_chains(pose: &mut IKPose, chains: &[IKChain], config: &AnimatorConfig) {
    let mut scratch = Vec::with_capacity(pose.locals.len());
    pose.recompose(&mut scratch);

    let order = solve_order(chains, pose.skeleton);
    log::trace!("IK solve order {:?}", order);
    for idx in order {
        let chain = &chains[idx];
        if !chain.is_active() {
            continue;
        }
        if let Err(err) = chain.validate(pose.skeleton) {
            log::warn!("IK chain {} skipped: {}", idx, err);
            continue;
        }
        if chain.bones.iter().any(|&b| b >= pose.locals.len()) {
            continue;
        }

        let joints = pose.chain_globals(chain);
        let corrections = match solve_corrections(chain, &joints, config) {
            Ok(corrections) => corrections,
            Err(err) => {
                log::warn!("IK chain {} failed: {}", idx, err);
                continue;
            }
        };

        let weight = chain.weight.clamp(0.0, 1.0);
        for (pos, &bone) in chain.bones.iter().enumerate() {
            let local = pose.locals[bone].rotation;
            let solved = (local * corrections[pos]).normalize();
            let anchor = chain
                .rest_rotations
                .as_ref()
                .and_then(|rest| rest.get(pos).copied())
                .unwrap_or(local);
            let mut rotation = quat_slerp(anchor, solved, weight);
            if let Some(constraint) = chain.constraint(bone) {
                rotation = constraint.apply(rotation);
            }
            pose.locals[bone].rotation = rotation;
        }
        pose.recompose(&mut scratch);
    }
}
