mod animation;
mod animator;
mod base;
mod blend_tree;
mod blending_job;
mod clip_library;
mod config;
mod event;
mod ik;
mod ik_ccd_job;
mod ik_fabrik_job;
mod ik_look_at_job;
mod ik_two_bone_job;
mod math;
mod root_motion;
mod sampling_job;
mod skeleton;
mod state_machine;
mod track;

pub use animation::{
    wrap_time, AnimationChannel, AnimationClip, AnimationEvent, AnimationType, EventPayload, MorphWeightChannel,
    NodeAnimationChannel,
};
pub use animator::{AnimationLayer, Animator, AnimatorArc, AnimatorRc, AnimatorRef, LayerId, MorphTarget};
pub use base::*;
pub use blend_tree::{BlendContext, BlendNode};
pub use blending_job::{apply_additive, blend_poses, BlendMode, BlendingJob, BlendingLayer};
pub use clip_library::{ClipHandle, ClipLibrary};
pub use config::AnimatorConfig;
pub use event::{
    collect_events, EventLog, EventSource, EventTriggeringJob, EventTriggeringJobArc, EventTriggeringJobRc,
    EventTriggeringJobRef, FiredEvent,
};
pub use ik::{compose_pose, solve_chains, solve_order, IKChain, IKPose, IKSolver, JointConstraint};
pub use ik_ccd_job::IKCcdJob;
pub use ik_fabrik_job::IKFabrikJob;
pub use ik_look_at_job::IKLookAtJob;
pub use ik_two_bone_job::IKTwoBoneJob;
pub use math::{quat_nlerp, quat_slerp, transform_abs_diff_eq, transform_lerp, transform_to_mat4};
pub use root_motion::{RootMotion, RootMotionSource, RootSample};
pub use sampling_job::{
    sample_clip, sample_morph_weights, sample_node_transforms, SamplingJob, SamplingJobArc, SamplingJobRc,
    SamplingJobRef,
};
pub use skeleton::{Bone, Skeleton};
pub use state_machine::{
    AnimationState, AnimationStateMachine, AnimationTransition, Comparator, Condition, Parameter, StateId,
    StateMachineLayer, StateMotion,
};
pub use track::{find_keyframe_index, Interpolation, Track, TrackValue};
