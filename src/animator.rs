//!
//! Animator: per character playback state and pose evaluation pipeline.
//!
//! Each `update` runs, in order: clip sampling and blending (crossfade, blend tree, layers or
//! single clip, whichever is active first), root motion, IK, then queues the crossed events.
//!

use glam::{Mat4, Quat, Vec3};
use glam_ext::Transform3A;
use std::rc::Rc;
use std::sync::Arc;

use crate::animation::{wrap_time, AnimationClip, AnimationType};
use crate::base::{Hook, RigObj};
use crate::blend_tree::{BlendContext, BlendNode};
use crate::blending_job::{blend_poses, BlendMode, BlendingJob, BlendingLayer};
use crate::clip_library::{ClipHandle, ClipLibrary};
use crate::config::AnimatorConfig;
use crate::event::{collect_events, EventLog, EventSource, FiredEvent};
use crate::ik::{compose_pose, solve_chains, IKChain, IKPose, JointConstraint};
use crate::math::transform_to_mat4;
use crate::root_motion::{RootMotion, RootMotionSource, RootSample};
use crate::sampling_job::{sample_clip, sample_morph_weights, sample_node_transforms};
use crate::skeleton::Skeleton;
use slotmap::Key;

/// Receiver of sampled morph target weights, implemented by the caller meshes.
pub trait MorphTarget {
    fn set_morph_weights(&mut self, weights: &[f32]);
}

/// Identifier of an animator layer.
pub type LayerId = u32;

/// A clip playing on top of (or under) other layers, with its own time, weight and mask.
#[derive(Debug, Clone)]
pub struct AnimationLayer {
    id: LayerId,
    clip: Option<ClipHandle>,
    weight: f32,
    time_scale: f32,
    time: f32,
    looping: bool,
    blend_mode: BlendMode,
    priority: i32,
    active: bool,
    bone_mask: Vec<usize>,
    additive_reference: Option<ClipHandle>,
    reference_pose: Option<Vec<Transform3A>>,
    pose: Vec<Transform3A>,
    sampled: bool,
}

impl AnimationLayer {
    fn new(id: LayerId, priority: i32) -> AnimationLayer {
        return AnimationLayer {
            id,
            clip: None,
            weight: 1.0,
            time_scale: 1.0,
            time: 0.0,
            looping: true,
            blend_mode: BlendMode::Override,
            priority,
            active: true,
            bone_mask: Vec::new(),
            additive_reference: None,
            reference_pose: None,
            pose: Vec::new(),
            sampled: false,
        };
    }

    #[inline]
    pub fn id(&self) -> LayerId {
        return self.id;
    }

    #[inline]
    pub fn clip(&self) -> Option<ClipHandle> {
        return self.clip;
    }

    #[inline]
    pub fn weight(&self) -> f32 {
        return self.weight;
    }

    #[inline]
    pub fn time_scale(&self) -> f32 {
        return self.time_scale;
    }

    /// Playback time, in seconds.
    #[inline]
    pub fn time(&self) -> f32 {
        return self.time;
    }

    #[inline]
    pub fn looping(&self) -> bool {
        return self.looping;
    }

    #[inline]
    pub fn blend_mode(&self) -> BlendMode {
        return self.blend_mode;
    }

    #[inline]
    pub fn priority(&self) -> i32 {
        return self.priority;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        return self.active;
    }

    /// Bones affected by the layer, empty for every bone.
    #[inline]
    pub fn bone_mask(&self) -> &[usize] {
        return &self.bone_mask;
    }

    #[inline]
    pub fn additive_reference(&self) -> Option<ClipHandle> {
        return self.additive_reference;
    }
}

#[derive(Debug, Clone)]
struct Crossfade {
    to: ClipHandle,
    to_time: f32,
    looping: bool,
    elapsed: f32,
    duration: f32,
}

/// End of the event window. A one shot clip reaching its end includes events at the end.
fn event_window_end(prev: f32, time: f32, duration: f32, looping: bool) -> f32 {
    if !looping && time >= duration && prev < duration {
        return f32::MAX;
    }
    return time;
}

///
/// Plays clips on a skeleton and produces skinning matrices.
///
/// Clips are referenced by `ClipHandle` and looked up in the `ClipLibrary` passed to `update`.
/// Setters called with unknown layers, chains or null handles are ignored with a warning.
///
/// Events crossed during `update` are queued. They are either drained with `drain_events`,
/// or handed to the callback registered with `set_event_callback` by `dispatch_events`.
///
#[derive(Debug)]
pub struct Animator<S = Rc<Skeleton>>
where
    S: RigObj<Skeleton>,
{
    skeleton: Option<S>,
    config: AnimatorConfig,

    current_clip: Option<ClipHandle>,
    current_time: f32,
    previous_time: f32,
    speed: f32,
    looping: bool,
    playing: bool,
    paused: bool,

    crossfade: Option<Crossfade>,
    blend_tree: Option<BlendNode>,
    blend_tree_time: f32,
    layers: Vec<AnimationLayer>,
    next_layer_id: LayerId,

    ik_chains: Vec<IKChain>,
    ik_enabled: bool,
    root_motion: RootMotion,

    event_log: EventLog,
    pending_events: Vec<FiredEvent>,
    event_callback: Option<Hook<FiredEvent>>,

    local_pose: Vec<Transform3A>,
    solved_pose: Vec<Transform3A>,
    local_matrices: Vec<Mat4>,
    global_matrices: Vec<Mat4>,
    final_matrices: Vec<Mat4>,
    node_transforms: Vec<Mat4>,
    morph_weights: Vec<Vec<f32>>,
}

pub type AnimatorRef<'t> = Animator<&'t Skeleton>;
pub type AnimatorRc = Animator<Rc<Skeleton>>;
pub type AnimatorArc = Animator<Arc<Skeleton>>;

impl<S> Default for Animator<S>
where
    S: RigObj<Skeleton>,
{
    fn default() -> Animator<S> {
        return Animator::new(AnimatorConfig::default());
    }
}

impl<S> Animator<S>
where
    S: RigObj<Skeleton>,
{
    /// Creates an animator without skeleton.
    pub fn new(config: AnimatorConfig) -> Animator<S> {
        let config = config.sanitized();
        let mut root_motion = RootMotion::default();
        root_motion.set_scale(config.root_motion_scale);
        return Animator {
            skeleton: None,
            config,

            current_clip: None,
            current_time: 0.0,
            previous_time: 0.0,
            speed: 1.0,
            looping: true,
            playing: false,
            paused: false,

            crossfade: None,
            blend_tree: None,
            blend_tree_time: 0.0,
            layers: Vec::new(),
            next_layer_id: 0,

            ik_chains: Vec::new(),
            ik_enabled: true,
            root_motion,

            event_log: EventLog::new(config.event_log_capacity),
            pending_events: Vec::new(),
            event_callback: None,

            local_pose: Vec::new(),
            solved_pose: Vec::new(),
            local_matrices: Vec::new(),
            global_matrices: Vec::new(),
            final_matrices: Vec::new(),
            node_transforms: Vec::new(),
            morph_weights: Vec::new(),
        };
    }

    /// Creates an animator bound to a skeleton, posed at rest.
    pub fn with_skeleton(skeleton: S, config: AnimatorConfig) -> Animator<S> {
        let mut animator = Animator::new(config);
        animator.set_skeleton(skeleton);
        return animator;
    }

    #[inline]
    pub fn config(&self) -> &AnimatorConfig {
        return &self.config;
    }

    pub fn set_config(&mut self, config: AnimatorConfig) {
        self.config = config.sanitized();
        self.event_log.set_capacity(self.config.event_log_capacity);
        self.root_motion.set_scale(self.config.root_motion_scale);
    }

    //
    // skeleton
    //

    #[inline]
    pub fn skeleton(&self) -> Option<&Skeleton> {
        return self.skeleton.as_ref().map(|s| s.obj());
    }

    /// Binds a skeleton. The pose is reset to the rest pose and layer caches are dropped.
    pub fn set_skeleton(&mut self, skeleton: S) {
        let rest = skeleton.obj().rest_pose().to_vec();
        for layer in self.layers.iter_mut() {
            layer.reference_pose = None;
            layer.pose.clear();
        }
        self.local_pose = rest;
        self.root_motion.reset();
        self.skeleton = Some(skeleton);
        self.refresh_rest_matrices();
    }

    fn refresh_rest_matrices(&mut self) {
        if let Some(skeleton) = self.skeleton.as_ref().map(|s| s.obj()) {
            self.solved_pose.clear();
            self.solved_pose.extend_from_slice(&self.local_pose);
            compose_pose(
                skeleton,
                &self.solved_pose,
                &mut self.local_matrices,
                &mut self.global_matrices,
                &mut self.final_matrices,
            );
        }
    }

    //
    // single clip playback
    //

    /// Plays a clip from its start, cancelling any crossfade.
    pub fn play_animation(&mut self, clip: ClipHandle, looping: bool) {
        if clip.is_null() {
            log::warn!("Animator::play_animation() null clip");
            return;
        }
        self.current_clip = Some(clip);
        self.current_time = 0.0;
        self.previous_time = 0.0;
        self.looping = looping;
        self.playing = true;
        self.paused = false;
        self.crossfade = None;
        self.event_log.clear_source(EventSource::Main);
        self.event_log.clear_source(EventSource::Crossfade);
        self.root_motion.reset();
    }

    /// Stops playback and returns to the rest pose.
    pub fn stop_animation(&mut self) {
        self.current_clip = None;
        self.current_time = 0.0;
        self.previous_time = 0.0;
        self.playing = false;
        self.paused = false;
        self.crossfade = None;
        self.root_motion.reset();
        if let Some(skeleton) = self.skeleton.as_ref().map(|s| s.obj()) {
            self.local_pose = skeleton.rest_pose().to_vec();
        }
        self.refresh_rest_matrices();
    }

    /// Freezes every playback time. Updates still evaluate the pose.
    pub fn pause_animation(&mut self) {
        self.paused = true;
    }

    pub fn resume_animation(&mut self) {
        self.paused = false;
    }

    /// Jumps the main clip to `time`. Events between the old and new time are not fired.
    pub fn set_time(&mut self, time: f32) {
        if !time.is_finite() {
            log::warn!("Animator::set_time() invalid time {}", time);
            return;
        }
        self.current_time = time.max(0.0);
        self.previous_time = self.current_time;
        self.event_log.clear_source(EventSource::Main);
        self.root_motion.reset();
    }

    /// Sets the playback speed of the main clip, crossfades and blend trees.
    pub fn set_speed(&mut self, speed: f32) {
        if !speed.is_finite() {
            log::warn!("Animator::set_speed() invalid speed {}", speed);
            return;
        }
        self.speed = speed;
    }

    #[inline]
    pub fn speed(&self) -> f32 {
        return self.speed;
    }

    #[inline]
    pub fn current_clip(&self) -> Option<ClipHandle> {
        return self.current_clip;
    }

    /// Main clip time, in seconds.
    #[inline]
    pub fn current_time(&self) -> f32 {
        return self.current_time;
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        return self.playing;
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        return self.paused;
    }

    #[inline]
    pub fn is_looping(&self) -> bool {
        return self.looping;
    }

    //
    // crossfade
    //

    /// Fades from the current clip to `clip` over `duration` seconds.
    ///
    /// Without a playing clip, or with a non positive duration, `clip` is played directly.
    pub fn crossfade_to_animation(&mut self, clip: ClipHandle, duration: f32, looping: bool) {
        if clip.is_null() {
            log::warn!("Animator::crossfade_to_animation() null clip");
            return;
        }
        if !self.playing || self.current_clip.is_none() || !(duration > 0.0) {
            self.play_animation(clip, looping);
            return;
        }
        self.event_log.clear_source(EventSource::Crossfade);
        self.crossfade = Some(Crossfade {
            to: clip,
            to_time: 0.0,
            looping,
            elapsed: 0.0,
            duration,
        });
    }

    #[inline]
    pub fn is_crossfading(&self) -> bool {
        return self.crossfade.is_some();
    }

    /// Crossfade progress in [0, 1], `None` when not crossfading.
    pub fn crossfade_progress(&self) -> Option<f32> {
        return self.crossfade.as_ref().map(|c| (c.elapsed / c.duration).clamp(0.0, 1.0));
    }

    //
    // blend tree
    //

    #[inline]
    pub fn blend_tree(&self) -> Option<&BlendNode> {
        return self.blend_tree.as_ref();
    }

    #[inline]
    pub fn blend_tree_mut(&mut self) -> Option<&mut BlendNode> {
        return self.blend_tree.as_mut();
    }

    /// Sets the blend tree root. The tree takes over layers and single clip playback.
    pub fn set_blend_tree(&mut self, root: BlendNode) {
        self.blend_tree = Some(root);
        self.blend_tree_time = 0.0;
        self.event_log.clear_source(EventSource::BlendTree);
    }

    pub fn clear_blend_tree(&mut self) -> Option<BlendNode> {
        return self.blend_tree.take();
    }

    #[inline]
    pub fn blend_tree_time(&self) -> f32 {
        return self.blend_tree_time;
    }

    //
    // layers
    //

    /// Creates an empty layer. Layers are evaluated by ascending priority, layers of equal
    /// priority in creation order.
    pub fn create_layer(&mut self, priority: i32) -> LayerId {
        let id = self.next_layer_id;
        self.next_layer_id = self.next_layer_id.wrapping_add(1);
        self.insert_layer(AnimationLayer::new(id, priority));
        return id;
    }

    fn insert_layer(&mut self, layer: AnimationLayer) {
        let pos = self.layers.partition_point(|l| l.priority <= layer.priority);
        self.layers.insert(pos, layer);
    }

    pub fn remove_layer(&mut self, id: LayerId) -> bool {
        match self.layers.iter().position(|l| l.id == id) {
            Some(pos) => {
                self.layers.remove(pos);
                self.event_log.clear_source(EventSource::Layer(id));
                return true;
            }
            None => {
                log::warn!("Animator::remove_layer() unknown layer {}", id);
                return false;
            }
        }
    }

    #[inline]
    pub fn layers(&self) -> &[AnimationLayer] {
        return &self.layers;
    }

    pub fn layer(&self, id: LayerId) -> Option<&AnimationLayer> {
        return self.layers.iter().find(|l| l.id == id);
    }

    fn layer_mut(&mut self, id: LayerId, caller: &str) -> Option<&mut AnimationLayer> {
        let layer = self.layers.iter_mut().find(|l| l.id == id);
        if layer.is_none() {
            log::warn!("Animator::{}() unknown layer {}", caller, id);
        }
        return layer;
    }

    /// Plays a clip on a layer from its start.
    pub fn play_animation_on_layer(&mut self, id: LayerId, clip: ClipHandle, looping: bool) -> bool {
        if clip.is_null() {
            log::warn!("Animator::play_animation_on_layer() null clip");
            return false;
        }
        let layer = match self.layer_mut(id, "play_animation_on_layer") {
            Some(layer) => layer,
            None => return false,
        };
        layer.clip = Some(clip);
        layer.time = 0.0;
        layer.looping = looping;
        layer.reference_pose = None;
        self.event_log.clear_source(EventSource::Layer(id));
        return true;
    }

    pub fn stop_layer(&mut self, id: LayerId) {
        if let Some(layer) = self.layer_mut(id, "stop_layer") {
            layer.clip = None;
            layer.time = 0.0;
            layer.reference_pose = None;
        }
    }

    pub fn set_layer_weight(&mut self, id: LayerId, weight: f32) {
        if !weight.is_finite() {
            log::warn!("Animator::set_layer_weight() invalid weight {}", weight);
            return;
        }
        if let Some(layer) = self.layer_mut(id, "set_layer_weight") {
            layer.weight = weight.clamp(0.0, 1.0);
        }
    }

    pub fn set_layer_time_scale(&mut self, id: LayerId, time_scale: f32) {
        if !time_scale.is_finite() {
            log::warn!("Animator::set_layer_time_scale() invalid time scale {}", time_scale);
            return;
        }
        if let Some(layer) = self.layer_mut(id, "set_layer_time_scale") {
            layer.time_scale = time_scale;
        }
    }

    pub fn set_layer_time(&mut self, id: LayerId, time: f32) {
        if !time.is_finite() {
            return;
        }
        if let Some(layer) = self.layer_mut(id, "set_layer_time") {
            layer.time = time.max(0.0);
        }
        self.event_log.clear_source(EventSource::Layer(id));
    }

    pub fn set_layer_blend_mode(&mut self, id: LayerId, mode: BlendMode) {
        if let Some(layer) = self.layer_mut(id, "set_layer_blend_mode") {
            layer.blend_mode = mode;
            layer.reference_pose = None;
        }
    }

    /// Changes a layer priority, the layer moves after the layers of equal priority.
    pub fn set_layer_priority(&mut self, id: LayerId, priority: i32) {
        match self.layers.iter().position(|l| l.id == id) {
            Some(pos) => {
                let mut layer = self.layers.remove(pos);
                layer.priority = priority;
                self.insert_layer(layer);
            }
            None => log::warn!("Animator::set_layer_priority() unknown layer {}", id),
        }
    }

    pub fn set_layer_active(&mut self, id: LayerId, active: bool) {
        if let Some(layer) = self.layer_mut(id, "set_layer_active") {
            layer.active = active;
        }
    }

    /// Restricts a layer to some bones. Indices outside the skeleton are dropped.
    pub fn set_bone_mask(&mut self, id: LayerId, bones: Vec<usize>) {
        let num_bones = self.skeleton().map(|s| s.num_bones());
        let mut bones = bones;
        if let Some(num_bones) = num_bones {
            let before = bones.len();
            bones.retain(|&b| b < num_bones);
            if bones.len() != before {
                log::warn!("Animator::set_bone_mask() dropped {} invalid bones", before - bones.len());
            }
        }
        if let Some(layer) = self.layer_mut(id, "set_bone_mask") {
            layer.bone_mask = bones;
        }
    }

    pub fn clear_bone_mask(&mut self, id: LayerId) {
        self.set_bone_mask(id, Vec::new());
    }

    /// Sets the clip whose first frame is the reference of an additive layer. Without one, the
    /// layer clip first frame is used.
    pub fn set_additive_reference(&mut self, id: LayerId, clip: Option<ClipHandle>) {
        if let Some(layer) = self.layer_mut(id, "set_additive_reference") {
            layer.additive_reference = clip.filter(|c| !c.is_null());
            layer.reference_pose = None;
        }
    }

    //
    // IK
    //

    /// Adds an IK chain, returns its index. Chains invalid for the current skeleton are rejected.
    pub fn add_ik_chain(&mut self, chain: IKChain) -> Option<usize> {
        if let Some(skeleton) = self.skeleton() {
            if let Err(err) = chain.validate(skeleton) {
                log::warn!("Animator::add_ik_chain() invalid chain: {}", err);
                return None;
            }
        }
        self.ik_chains.push(chain);
        return Some(self.ik_chains.len() - 1);
    }

    /// Removes an IK chain. Indices of the following chains shift down by one.
    pub fn remove_ik_chain(&mut self, index: usize) -> Option<IKChain> {
        if index >= self.ik_chains.len() {
            log::warn!("Animator::remove_ik_chain() invalid chain {}", index);
            return None;
        }
        return Some(self.ik_chains.remove(index));
    }

    #[inline]
    pub fn ik_chains(&self) -> &[IKChain] {
        return &self.ik_chains;
    }

    #[inline]
    pub fn ik_chain(&self, index: usize) -> Option<&IKChain> {
        return self.ik_chains.get(index);
    }

    fn ik_chain_mut(&mut self, index: usize, caller: &str) -> Option<&mut IKChain> {
        let chain = self.ik_chains.get_mut(index);
        if chain.is_none() {
            log::warn!("Animator::{}() invalid chain {}", caller, index);
        }
        return chain;
    }

    pub fn set_ik_target(&mut self, index: usize, target: Vec3) {
        if !target.is_finite() {
            log::warn!("Animator::set_ik_target() invalid target");
            return;
        }
        if let Some(chain) = self.ik_chain_mut(index, "set_ik_target") {
            chain.target = target;
        }
    }

    pub fn set_ik_target_rotation(&mut self, index: usize, rotation: Option<Quat>) {
        if let Some(chain) = self.ik_chain_mut(index, "set_ik_target_rotation") {
            chain.target_rotation = rotation.map(|r| r.normalize());
        }
    }

    pub fn set_ik_weight(&mut self, index: usize, weight: f32) {
        if !weight.is_finite() {
            log::warn!("Animator::set_ik_weight() invalid weight {}", weight);
            return;
        }
        if let Some(chain) = self.ik_chain_mut(index, "set_ik_weight") {
            chain.weight = weight.clamp(0.0, 1.0);
        }
    }

    pub fn set_ik_enabled(&mut self, index: usize, enabled: bool) {
        if let Some(chain) = self.ik_chain_mut(index, "set_ik_enabled") {
            chain.enabled = enabled;
        }
    }

    pub fn set_ik_pole_target(&mut self, index: usize, pole: Option<Vec3>) {
        if let Some(chain) = self.ik_chain_mut(index, "set_ik_pole_target") {
            chain.pole_target = pole;
        }
    }

    /// Constrains a bone of a chain. Bones outside the chain are rejected.
    pub fn add_ik_constraint(&mut self, index: usize, bone: usize, constraint: JointConstraint) {
        if let Some(chain) = self.ik_chain_mut(index, "add_ik_constraint") {
            if !chain.bones.contains(&bone) {
                log::warn!("Animator::add_ik_constraint() bone {} is not in chain {}", bone, index);
                return;
            }
            chain.set_constraint(bone, constraint);
        }
    }

    /// Captures the current local rotations of the chain bones. Solutions are then blended
    /// from these rotations instead of the animated pose.
    pub fn capture_ik_rest_pose(&mut self, index: usize) {
        let rotations: Option<Vec<Quat>> = match self.ik_chains.get(index) {
            Some(chain) => chain
                .bones
                .iter()
                .map(|&b| self.local_pose.get(b).map(|t| t.rotation))
                .collect(),
            None => {
                log::warn!("Animator::capture_ik_rest_pose() invalid chain {}", index);
                return;
            }
        };
        match rotations {
            Some(rotations) => self.ik_chains[index].rest_rotations = Some(rotations),
            None => log::warn!("Animator::capture_ik_rest_pose() no pose for chain {}", index),
        }
    }

    pub fn set_ik_enabled_globally(&mut self, enabled: bool) {
        self.ik_enabled = enabled;
    }

    #[inline]
    pub fn is_ik_enabled_globally(&self) -> bool {
        return self.ik_enabled;
    }

    //
    // root motion
    //

    /// Enables root motion extraction: the root bone horizontal motion and heading are removed
    /// from the pose. The delta is measured either way.
    pub fn set_root_motion_enabled(&mut self, enabled: bool) {
        self.root_motion.set_extract(enabled);
    }

    #[inline]
    pub fn is_root_motion_enabled(&self) -> bool {
        return self.root_motion.extract();
    }

    /// Overrides the root bone declared by clips.
    pub fn set_root_motion_bone(&mut self, bone: Option<usize>) {
        self.root_motion.set_bone(bone);
    }

    pub fn set_root_motion_scale(&mut self, scale: Vec3) {
        if !scale.is_finite() {
            log::warn!("Animator::set_root_motion_scale() invalid scale");
            return;
        }
        self.root_motion.set_scale(scale);
    }

    #[inline]
    pub fn root_motion_scale(&self) -> Vec3 {
        return self.root_motion.scale();
    }

    /// Root translation delta of the last update, in model space.
    #[inline]
    pub fn root_motion_delta(&self) -> Vec3 {
        return self.root_motion.delta();
    }

    /// Root heading delta of the last update.
    #[inline]
    pub fn root_motion_rotation(&self) -> Quat {
        return self.root_motion.delta_rotation();
    }

    //
    // events
    //

    /// Takes the events queued by the previous updates.
    pub fn drain_events(&mut self) -> Vec<FiredEvent> {
        return std::mem::take(&mut self.pending_events);
    }

    #[inline]
    pub fn pending_events(&self) -> &[FiredEvent] {
        return &self.pending_events;
    }

    pub fn set_event_callback<F: FnMut(&FiredEvent) + 'static>(&mut self, callback: F) {
        self.event_callback = Some(Hook::new(callback));
    }

    pub fn clear_event_callback(&mut self) {
        self.event_callback = None;
    }

    /// Hands the queued events to the event callback, returns how many were dispatched.
    /// Without callback, events stay queued.
    pub fn dispatch_events(&mut self) -> usize {
        let callback = match self.event_callback.as_mut() {
            Some(callback) => callback,
            None => return 0,
        };
        let events = std::mem::take(&mut self.pending_events);
        for event in &events {
            callback.call(event);
        }
        return events.len();
    }

    //
    // outputs
    //

    /// Skinning matrices (`global * inverse_bind`), one per bone.
    #[inline]
    pub fn final_bone_matrices(&self) -> &[Mat4] {
        return &self.final_matrices;
    }

    /// Model space bone matrices, one per bone.
    #[inline]
    pub fn global_bone_matrices(&self) -> &[Mat4] {
        return &self.global_matrices;
    }

    /// Animated local pose, before root motion extraction and IK.
    #[inline]
    pub fn local_pose(&self) -> &[Transform3A] {
        return &self.local_pose;
    }

    /// Local pose after root motion extraction and IK.
    #[inline]
    pub fn solved_pose(&self) -> &[Transform3A] {
        return &self.solved_pose;
    }

    #[inline]
    pub fn node_transforms(&self) -> &[Mat4] {
        return &self.node_transforms;
    }

    /// Gets a node matrix, identity for unknown nodes.
    pub fn node_transform(&self, node: usize) -> Mat4 {
        return self.node_transforms.get(node).copied().unwrap_or(Mat4::IDENTITY);
    }

    /// Gets the morph weights of a mesh, empty for unknown meshes.
    pub fn morph_weights(&self, target: usize) -> &[f32] {
        return self.morph_weights.get(target).map(|w| w.as_slice()).unwrap_or(&[]);
    }

    /// Pushes morph weights to meshes, mesh `i` receiving the weights of target `i`.
    pub fn apply_morph_weights<M: MorphTarget>(&self, meshes: &mut [M]) {
        for (mesh, weights) in meshes.iter_mut().zip(self.morph_weights.iter()) {
            if !weights.is_empty() {
                mesh.set_morph_weights(weights);
            }
        }
    }

    //
    // update
    //

    /// Advances playback by `dt` seconds and evaluates the pose.
    pub fn update(&mut self, dt: f32, clips: &ClipLibrary) {
        let dt = if self.paused || !dt.is_finite() { 0.0 } else { dt };
        let skeleton = self.skeleton.take();
        self.update_impl(skeleton.as_ref().map(|s| s.obj()), dt, clips);
        self.skeleton = skeleton;
    }

    fn update_impl(&mut self, skeleton: Option<&Skeleton>, dt: f32, clips: &ClipLibrary) {
        let rest = skeleton.map(|s| s.rest_pose());
        let mut fired = Vec::new();

        let (pose, sources) = if self.crossfade.is_some() {
            self.update_crossfade(rest, dt, clips, &mut fired)
        } else if self.blend_tree.is_some() {
            self.update_blend_tree(rest, dt, clips, &mut fired)
        } else if self.layers.iter().any(|l| l.active && l.clip.is_some()) {
            self.update_layers(rest, dt, clips, &mut fired)
        } else if self.playing && self.current_clip.is_some() {
            self.update_single(rest, dt, clips, &mut fired)
        } else {
            (None, Vec::new())
        };

        if let Some(pose) = pose {
            self.local_pose = pose;
        }
        if let Some(skeleton) = skeleton {
            self.finish_pose(skeleton, clips, &sources);
        }
        self.pending_events.extend(fired);
    }

    fn sample_extras(&mut self, clip: &AnimationClip, time: f32, looping: bool) {
        sample_node_transforms(clip, time, looping, &mut self.node_transforms);
        sample_morph_weights(clip, time, looping, &mut self.morph_weights);
    }

    fn sample_pose(clip: &AnimationClip, time: f32, looping: bool, rest: Option<&[Transform3A]>) -> Option<Vec<Transform3A>> {
        if clip.animation_type() != AnimationType::Skeletal {
            return None;
        }
        let rest = rest?;
        return match sample_clip(clip, time, looping, rest) {
            Ok(pose) => Some(pose),
            Err(err) => {
                log::warn!("Animator: sampling '{}' failed: {}", clip.name(), err);
                None
            }
        };
    }

    fn update_single(
        &mut self,
        rest: Option<&[Transform3A]>,
        dt: f32,
        clips: &ClipLibrary,
        fired: &mut Vec<FiredEvent>,
    ) -> (Option<Vec<Transform3A>>, Vec<RootMotionSource>) {
        let handle = match self.current_clip {
            Some(handle) => handle,
            None => return (None, Vec::new()),
        };
        let clip = match clips.get(handle) {
            Some(clip) => clip,
            None => {
                log::warn!("Animator: current clip was removed from the library");
                self.current_clip = None;
                self.playing = false;
                return (None, Vec::new());
            }
        };

        let prev = self.current_time;
        let time = wrap_time(prev + dt * self.speed, clip.duration(), self.looping);
        self.previous_time = prev;
        self.current_time = time;

        let to = event_window_end(prev, time, clip.duration(), self.looping);
        if let Err(err) = collect_events(&mut self.event_log, EventSource::Main, handle, clip, prev, to, fired) {
            log::warn!("Animator: event collection failed: {}", err);
        }
        self.sample_extras(clip, time, self.looping);

        let source = RootMotionSource::new(handle, self.looping && time < prev);
        return (Self::sample_pose(clip, time, self.looping, rest), vec![source]);
    }

    fn update_crossfade(
        &mut self,
        rest: Option<&[Transform3A]>,
        dt: f32,
        clips: &ClipLibrary,
        fired: &mut Vec<FiredEvent>,
    ) -> (Option<Vec<Transform3A>>, Vec<RootMotionSource>) {
        let mut fade = match self.crossfade.take() {
            Some(fade) => fade,
            None => return (None, Vec::new()),
        };
        let to_clip = match clips.get(fade.to) {
            Some(clip) => clip,
            None => {
                log::warn!("Animator: crossfade target was removed from the library");
                return self.update_single(rest, dt, clips, fired);
            }
        };
        let from = self.current_clip.and_then(|h| clips.get(h).map(|c| (h, c)));

        // the outgoing clip keeps running
        let mut from_pose = None;
        let mut from_wrapped = false;
        if let Some((handle, clip)) = from {
            let prev = self.current_time;
            let time = wrap_time(prev + dt * self.speed, clip.duration(), self.looping);
            self.previous_time = prev;
            self.current_time = time;
            let to = event_window_end(prev, time, clip.duration(), self.looping);
            if let Err(err) = collect_events(&mut self.event_log, EventSource::Main, handle, clip, prev, to, fired) {
                log::warn!("Animator: event collection failed: {}", err);
            }
            from_pose = Self::sample_pose(clip, time, self.looping, rest);
            from_wrapped = self.looping && time < prev;
        }

        let prev = fade.to_time;
        fade.to_time = wrap_time(prev + dt * self.speed, to_clip.duration(), fade.looping);
        let to_wrapped = fade.looping && fade.to_time < prev;
        let to = event_window_end(prev, fade.to_time, to_clip.duration(), fade.looping);
        if let Err(err) = collect_events(&mut self.event_log, EventSource::Crossfade, fade.to, to_clip, prev, to, fired) {
            log::warn!("Animator: event collection failed: {}", err);
        }
        let to_pose = Self::sample_pose(to_clip, fade.to_time, fade.looping, rest);

        fade.elapsed += dt.abs();
        let t = if from.is_none() {
            1.0
        } else {
            (fade.elapsed / fade.duration).clamp(0.0, 1.0)
        };

        if t < 0.5 {
            if let Some((_, clip)) = from {
                self.sample_extras(clip, self.current_time, self.looping);
            }
        } else {
            self.sample_extras(to_clip, fade.to_time, fade.looping);
        }

        let pose = match (from_pose, to_pose) {
            (Some(from_pose), Some(to_pose)) => {
                let mut out = Vec::with_capacity(to_pose.len());
                match blend_poses(&from_pose, &to_pose, t, &mut out) {
                    Ok(()) => Some(out),
                    Err(err) => {
                        log::warn!("Animator: crossfade blend failed: {}", err);
                        Some(to_pose)
                    }
                }
            }
            (from_pose, to_pose) => to_pose.or(from_pose),
        };

        // the outgoing clip drives the root bone choice until the fade completes
        let mut sources = Vec::with_capacity(2);
        if let Some((handle, _)) = from.filter(|_| t < 1.0) {
            sources.push(RootMotionSource::new(handle, from_wrapped).with_weight(1.0 - t));
        }
        sources.push(RootMotionSource::new(fade.to, to_wrapped).with_weight(t));

        if t >= 1.0 {
            log::debug!("Animator: crossfade to '{}' complete", to_clip.name());
            self.current_clip = Some(fade.to);
            self.current_time = fade.to_time;
            self.previous_time = fade.to_time;
            self.looping = fade.looping;
            self.event_log.clear_source(EventSource::Main);
            self.event_log.clear_source(EventSource::Crossfade);
        } else {
            self.crossfade = Some(fade);
        }
        return (pose, sources);
    }

    fn update_blend_tree(
        &mut self,
        rest: Option<&[Transform3A]>,
        dt: f32,
        clips: &ClipLibrary,
        fired: &mut Vec<FiredEvent>,
    ) -> (Option<Vec<Transform3A>>, Vec<RootMotionSource>) {
        let tree = match self.blend_tree.as_ref() {
            Some(tree) => tree,
            None => return (None, Vec::new()),
        };
        let prev = self.blend_tree_time;
        let time = prev + dt * self.speed;
        self.blend_tree_time = time;

        // leaves loop the tree time into their own duration
        let mut weights = Vec::new();
        tree.clip_weights(1.0, &mut weights);
        weights.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut sources = Vec::with_capacity(weights.len());
        for &(handle, weight) in &weights {
            if let Some(clip) = clips.get(handle) {
                let wrapped = time > prev && wrap_time(time, clip.duration(), true) < wrap_time(prev, clip.duration(), true);
                sources.push(RootMotionSource::new(handle, wrapped).with_weight(weight));
            }
        }

        let pose = match rest {
            Some(rest) => {
                let ctx = BlendContext {
                    clips,
                    rest_pose: rest,
                    time,
                };
                match tree.evaluate(&ctx) {
                    Ok(pose) => Some(pose),
                    Err(err) => {
                        log::warn!("Animator: blend tree evaluation failed: {}", err);
                        None
                    }
                }
            }
            None => None,
        };

        // the dominant leaf fires events and drives nodes and morph targets
        if let Some((handle, clip)) = sources.first().and_then(|s| clips.get(s.clip).map(|c| (s.clip, c))) {
            let from = wrap_time(prev, clip.duration(), true);
            let to = wrap_time(time, clip.duration(), true);
            if let Err(err) = collect_events(&mut self.event_log, EventSource::BlendTree, handle, clip, from, to, fired) {
                log::warn!("Animator: event collection failed: {}", err);
            }
            self.sample_extras(clip, to, true);
        }
        return (pose, sources);
    }

    fn update_layers(
        &mut self,
        rest: Option<&[Transform3A]>,
        dt: f32,
        clips: &ClipLibrary,
        fired: &mut Vec<FiredEvent>,
    ) -> (Option<Vec<Transform3A>>, Vec<RootMotionSource>) {
        let mut source: Option<RootMotionSource> = None;
        for layer in self.layers.iter_mut() {
            layer.sampled = false;
            if !layer.active {
                continue;
            }
            let handle = match layer.clip {
                Some(handle) => handle,
                None => continue,
            };
            let clip = match clips.get(handle) {
                Some(clip) => clip,
                None => {
                    log::warn!("Animator: clip of layer {} was removed from the library", layer.id);
                    continue;
                }
            };

            let prev = layer.time;
            layer.time = wrap_time(prev + dt * layer.time_scale, clip.duration(), layer.looping);
            let to = event_window_end(prev, layer.time, clip.duration(), layer.looping);
            let event_source = EventSource::Layer(layer.id);
            if let Err(err) = collect_events(&mut self.event_log, event_source, handle, clip, prev, to, fired) {
                log::warn!("Animator: event collection failed: {}", err);
            }
            if source.is_none() {
                source = Some(RootMotionSource::new(handle, layer.looping && layer.time < prev));
            }

            let pose = match Self::sample_pose(clip, layer.time, layer.looping, rest) {
                Some(pose) => pose,
                None => continue,
            };
            if layer.blend_mode == BlendMode::Additive
                && layer.reference_pose.as_ref().map_or(true, |r| r.len() != pose.len())
            {
                let reference = layer.additive_reference.and_then(|h| clips.get(h)).unwrap_or(clip);
                layer.reference_pose = Self::sample_pose(reference, 0.0, false, rest);
            }
            layer.pose = pose;
            layer.sampled = true;
        }

        let mut job = BlendingJob::default();
        for layer in self.layers.iter().filter(|l| l.sampled) {
            let mut input = BlendingLayer::new(&layer.pose, layer.weight)
                .with_mode(layer.blend_mode)
                .with_mask(&layer.bone_mask);
            if layer.blend_mode == BlendMode::Additive {
                match &layer.reference_pose {
                    Some(reference) => input = input.with_reference(reference),
                    None => {
                        log::warn!("Animator: additive layer {} has no reference pose", layer.id);
                        continue;
                    }
                }
            }
            job.layers_mut().push(input);
        }
        let sources = source.into_iter().collect();
        if job.layers().is_empty() {
            return (None, sources);
        }
        return match job.run() {
            Ok(()) => (Some(job.into_output()), sources),
            Err(err) => {
                log::warn!("Animator: layer blending failed: {}", err);
                (None, sources)
            }
        };
    }

    ///
    /// Applies a local pose computed outside the animator, typically by a state machine, then
    /// runs root motion and IK, and queues `events`.
    ///
    /// * `sources` - Clips blended into `pose` with their weight. The first one with root
    ///   motion chooses the root bone.
    ///
    pub fn apply_pose(
        &mut self,
        pose: Vec<Transform3A>,
        sources: &[RootMotionSource],
        events: Vec<FiredEvent>,
        clips: &ClipLibrary,
    ) {
        self.local_pose = pose;
        let skeleton = self.skeleton.take();
        if let Some(skeleton) = skeleton.as_ref().map(|s| s.obj()) {
            self.finish_pose(skeleton, clips, sources);
        }
        self.skeleton = skeleton;
        self.pending_events.extend(events);
    }

    fn finish_pose(&mut self, skeleton: &Skeleton, clips: &ClipLibrary, sources: &[RootMotionSource]) {
        if self.local_pose.len() != skeleton.num_bones() {
            log::warn!(
                "Animator: pose has {} bones, skeleton has {}, reset to rest pose",
                self.local_pose.len(),
                skeleton.num_bones()
            );
            self.local_pose = skeleton.rest_pose().to_vec();
        }
        self.solved_pose.clear();
        self.solved_pose.extend_from_slice(&self.local_pose);
        compose_pose(
            skeleton,
            &self.solved_pose,
            &mut self.local_matrices,
            &mut self.global_matrices,
            &mut self.final_matrices,
        );

        self.update_root_motion(skeleton, clips, sources);

        if self.ik_enabled && !self.ik_chains.is_empty() {
            let mut pose = IKPose {
                skeleton,
                locals: &mut self.solved_pose,
                globals: &mut self.global_matrices,
                finals: &mut self.final_matrices,
            };
            solve_chains(&mut pose, &self.ik_chains, &self.config);
        }
    }

    fn update_root_motion(&mut self, skeleton: &Skeleton, clips: &ClipLibrary, sources: &[RootMotionSource]) {
        let sources: Vec<(RootMotionSource, &AnimationClip)> = sources
            .iter()
            .filter_map(|s| clips.get(s.clip).map(|clip| (*s, clip)))
            .collect();
        let bone = self.root_motion.bone().or_else(|| {
            sources
                .iter()
                .find(|(_, clip)| clip.has_root_motion())
                .map(|(_, clip)| clip.root_bone())
        });
        let bone = match bone {
            Some(bone) if bone < skeleton.num_bones() => bone,
            _ => {
                self.root_motion.reset();
                return;
            }
        };

        let current = RootSample::from_matrix(&self.global_matrices[bone]);
        let mut wrap: Option<RootSample> = None;
        for (source, clip) in sources.iter().filter(|(s, _)| s.wrapped && s.weight > 0.0) {
            let parent = skeleton.bone_parent(bone);
            let parent_global = if parent >= 0 {
                self.global_matrices[parent as usize]
            } else {
                Mat4::IDENTITY
            };
            let rest = skeleton.rest_pose()[bone];
            let sample_at = |time: f32| {
                let local = clip.channel_for_bone(bone).map(|c| c.sample(time, &rest)).unwrap_or(rest);
                return RootSample::from_matrix(&(parent_global * transform_to_mat4(&local)));
            };
            let cycle = RootSample::cycle(&sample_at(0.0), &sample_at(clip.duration()), source.weight);
            let total = wrap.get_or_insert_with(RootSample::default);
            total.position += cycle.position;
            total.yaw += cycle.yaw;
        }
        self.root_motion.update(current, wrap);

        if self.root_motion.extract() {
            RootMotion::strip(&mut self.solved_pose[bone]);
            compose_pose(
                skeleton,
                &self.solved_pose,
                &mut self.local_matrices,
                &mut self.global_matrices,
                &mut self.final_matrices,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use wasm_bindgen_test::*;

    use super::*;
    use crate::animation::{AnimationChannel, AnimationEvent, MorphWeightChannel};
    use crate::ik::IKSolver;
    use crate::math::{mat4_translation, transform_abs_diff_eq};
    use crate::skeleton::Bone;
    use crate::track::{Interpolation, Track};

    fn skeleton() -> Rc<Skeleton> {
        let bones = vec![
            Bone::new("root", -1, Mat4::IDENTITY, Mat4::IDENTITY),
            Bone::new("child", 0, Mat4::from_translation(Vec3::Y), Mat4::IDENTITY),
        ];
        return Rc::new(Skeleton::new(bones).unwrap());
    }

    fn move_clip(name: &str, to: Vec3) -> AnimationClip {
        let mut clip = AnimationClip::new(name, 1.0, AnimationType::Skeletal);
        clip.add_channel(AnimationChannel::new(0).with_translation(Track::linear(vec![0.0, 1.0], vec![Vec3::ZERO, to]).unwrap()));
        return clip;
    }

    fn root_translation(animator: &AnimatorRc) -> Vec3 {
        return mat4_translation(&animator.global_bone_matrices()[0]);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_rest_pose_without_clip() {
        let clips = ClipLibrary::new();
        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());
        assert_eq!(animator.final_bone_matrices().len(), 2);
        animator.update(0.1, &clips);
        assert!(mat4_translation(&animator.global_bone_matrices()[1]).abs_diff_eq(Vec3::Y, 1e-6));

        let empty = AnimatorRc::default();
        assert!(empty.final_bone_matrices().is_empty());
        assert_eq!(empty.node_transform(3), Mat4::IDENTITY);
        assert!(empty.morph_weights(0).is_empty());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_play_pause_stop() {
        let mut clips = ClipLibrary::new();
        let walk = clips.insert(move_clip("walk", Vec3::X));
        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());

        animator.play_animation(ClipHandle::null(), true);
        assert!(!animator.is_playing());

        animator.play_animation(walk, true);
        animator.update(0.5, &clips);
        assert!(root_translation(&animator).abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-5));

        animator.pause_animation();
        animator.update(0.25, &clips);
        assert_eq!(animator.current_time(), 0.5);

        animator.resume_animation();
        animator.set_speed(2.0);
        animator.update(0.125, &clips);
        assert!((animator.current_time() - 0.75).abs() < 1e-6);

        animator.update(0.5, &clips);
        assert!((animator.current_time() - 0.75).abs() < 1e-5);

        animator.stop_animation();
        assert!(!animator.is_playing());
        assert!(root_translation(&animator).abs_diff_eq(Vec3::ZERO, 1e-6));
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_one_shot_clamps() {
        let mut clips = ClipLibrary::new();
        let mut clip = move_clip("jump", Vec3::X);
        clip.add_event(AnimationEvent::new(1.0, "land"));
        let jump = clips.insert(clip);
        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());
        animator.play_animation(jump, false);
        for _ in 0..30 {
            animator.update(0.1, &clips);
        }
        assert_eq!(animator.current_time(), 1.0);
        assert!(root_translation(&animator).abs_diff_eq(Vec3::X, 1e-5));
        let events = animator.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.name, "land");
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_crossfade_continuity() {
        let mut clips = ClipLibrary::new();
        let a = clips.insert(move_clip("a", Vec3::ZERO));
        let b = clips.insert(move_clip("b", Vec3::new(0.0, 0.0, 4.0)));
        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());
        animator.play_animation(a, true);
        animator.update(0.0, &clips);

        animator.crossfade_to_animation(b, 0.5, true);
        assert!(animator.is_crossfading());
        animator.update(0.0, &clips);
        assert!(root_translation(&animator).abs_diff_eq(Vec3::ZERO, 1e-6));

        animator.update(0.25, &clips);
        assert_eq!(animator.crossfade_progress(), Some(0.5));
        // b at 0.25s is z=1, blended by half
        assert!(root_translation(&animator).abs_diff_eq(Vec3::new(0.0, 0.0, 0.5), 1e-5));

        animator.update(0.25, &clips);
        assert!(!animator.is_crossfading());
        assert_eq!(animator.current_clip(), Some(b));
        assert!((animator.current_time() - 0.5).abs() < 1e-6);
        assert!(root_translation(&animator).abs_diff_eq(Vec3::new(0.0, 0.0, 2.0), 1e-5));
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_crossfade_without_current_plays() {
        let mut clips = ClipLibrary::new();
        let b = clips.insert(move_clip("b", Vec3::Z));
        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());
        animator.crossfade_to_animation(b, 0.5, true);
        assert!(!animator.is_crossfading());
        assert_eq!(animator.current_clip(), Some(b));
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_layers_api() {
        let mut clips = ClipLibrary::new();
        let a = clips.insert(move_clip("a", Vec3::X));
        let still = clips.insert(move_clip("still", Vec3::ZERO));
        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());

        let upper = animator.create_layer(5);
        let base = animator.create_layer(0);
        let ids: Vec<LayerId> = animator.layers().iter().map(|l| l.id()).collect();
        assert_eq!(ids, vec![base, upper]);

        animator.set_layer_priority(base, 10);
        let ids: Vec<LayerId> = animator.layers().iter().map(|l| l.id()).collect();
        assert_eq!(ids, vec![upper, base]);

        animator.set_layer_weight(upper, 3.0);
        assert_eq!(animator.layer(upper).map(|l| l.weight()), Some(1.0));
        animator.set_layer_weight(99, 0.5);
        animator.set_bone_mask(upper, vec![1, 7]);
        assert_eq!(animator.layer(upper).map(|l| l.bone_mask().to_vec()), Some(vec![1]));

        animator.set_layer_priority(base, -1);
        assert!(!animator.play_animation_on_layer(99, a, true));
        assert!(animator.play_animation_on_layer(base, still, true));
        assert!(animator.play_animation_on_layer(upper, a, true));
        animator.update(0.5, &clips);
        assert!(root_translation(&animator).abs_diff_eq(Vec3::ZERO, 1e-6));
        animator.clear_bone_mask(upper);
        animator.update(0.0, &clips);
        assert!(root_translation(&animator).abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-5));

        assert!(animator.remove_layer(upper));
        assert!(!animator.remove_layer(upper));
        assert!(animator.layer(upper).is_none());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_additive_layer() {
        let mut clips = ClipLibrary::new();
        let base = clips.insert(move_clip("base", Vec3::X));
        let lean = clips.insert(move_clip("lean", Vec3::Y));
        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());

        let l0 = animator.create_layer(0);
        let l1 = animator.create_layer(1);
        animator.play_animation_on_layer(l0, base, true);
        animator.play_animation_on_layer(l1, lean, true);
        animator.set_layer_blend_mode(l1, BlendMode::Additive);
        animator.set_layer_weight(l1, 0.5);
        animator.update(0.5, &clips);
        // base x=0.5, plus half of (y=0.5 - reference y=0)
        assert!(root_translation(&animator).abs_diff_eq(Vec3::new(0.5, 0.25, 0.0), 1e-5));
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_blend_tree_mode() {
        let mut clips = ClipLibrary::new();
        let a = clips.insert(move_clip("a", Vec3::ZERO));
        let b = clips.insert(move_clip("b", Vec3::new(2.0, 0.0, 0.0)));
        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());
        animator.set_blend_tree(BlendNode::blend_1d(vec![(0.0, BlendNode::clip(a)), (1.0, BlendNode::clip(b))]));
        if let Some(tree) = animator.blend_tree_mut() {
            tree.set_parameter(0.5);
        }
        animator.update(0.5, &clips);
        assert!(root_translation(&animator).abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-5));
        assert!(animator.clear_blend_tree().is_some());
        assert!(animator.blend_tree().is_none());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_events_queue_and_callback() {
        let mut clips = ClipLibrary::new();
        let mut clip = move_clip("walk", Vec3::X);
        clip.add_event(AnimationEvent::new(0.5, "step"));
        let walk = clips.insert(clip);

        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());
        animator.play_animation(walk, true);
        for _ in 0..30 {
            animator.update(0.1, &clips);
        }
        assert_eq!(animator.pending_events().len(), 3);
        assert_eq!(animator.dispatch_events(), 0);

        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        animator.set_event_callback(move |e| sink.borrow_mut().push(e.event.name.clone()));
        assert_eq!(animator.dispatch_events(), 3);
        assert_eq!(received.borrow().len(), 3);
        assert!(animator.drain_events().is_empty());
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_root_motion() {
        let mut clips = ClipLibrary::new();
        let mut clip = move_clip("walk", Vec3::new(0.0, 0.0, 2.0));
        clip.set_root_motion(true, 0);
        let walk = clips.insert(clip);

        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());
        animator.set_root_motion_enabled(true);
        animator.play_animation(walk, true);
        animator.update(0.1, &clips);
        assert_eq!(animator.root_motion_delta(), Vec3::ZERO);

        animator.update(0.5, &clips);
        assert!(animator.root_motion_delta().abs_diff_eq(Vec3::new(0.0, 0.0, 1.0), 1e-4));
        assert!(root_translation(&animator).abs_diff_eq(Vec3::ZERO, 1e-6));
        assert!(animator.local_pose()[0].translation.z > 1.0);

        // wrap from 0.6 to 0.2 is 0.6 seconds of motion
        animator.update(0.6, &clips);
        assert!(animator.root_motion_delta().abs_diff_eq(Vec3::new(0.0, 0.0, 1.2), 1e-4));

        animator.set_root_motion_scale(Vec3::new(1.0, 1.0, 0.5));
        animator.update(0.1, &clips);
        assert!(animator.root_motion_delta().abs_diff_eq(Vec3::new(0.0, 0.0, 0.1), 1e-4));
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_ik_api() {
        let clips = ClipLibrary::new();
        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());
        assert!(animator.add_ik_chain(IKChain::new(IKSolver::TwoBone, vec![0, 1])).is_none());

        let chain = IKChain::new(IKSolver::LookAt, vec![0]).with_forward_axis(Vec3::Y);
        let idx = animator.add_ik_chain(chain).unwrap();
        animator.set_ik_target(idx, Vec3::new(5.0, 0.0, 0.0));
        animator.update(0.0, &clips);
        assert!(mat4_translation(&animator.global_bone_matrices()[1]).abs_diff_eq(Vec3::X, 1e-5));
        assert!(transform_abs_diff_eq(&animator.local_pose()[0], &Transform3A::IDENTITY, 1e-6));

        animator.set_ik_weight(idx, 0.0);
        animator.update(0.0, &clips);
        assert!(mat4_translation(&animator.global_bone_matrices()[1]).abs_diff_eq(Vec3::Y, 1e-5));

        animator.set_ik_weight(idx, 1.0);
        animator.set_ik_enabled_globally(false);
        animator.update(0.0, &clips);
        assert!(mat4_translation(&animator.global_bone_matrices()[1]).abs_diff_eq(Vec3::Y, 1e-5));

        animator.set_ik_enabled_globally(true);
        animator.set_ik_target(7, Vec3::ZERO);
        animator.add_ik_constraint(idx, 1, JointConstraint::Cone { axis: Vec3::Y, max_angle: 0.1 });
        assert!(animator.ik_chain(idx).map_or(false, |c| c.constraints.is_empty()));
        animator.capture_ik_rest_pose(idx);
        assert_eq!(animator.ik_chain(idx).and_then(|c| c.rest_rotations.clone()), Some(vec![Quat::IDENTITY]));
        assert!(animator.remove_ik_chain(idx).is_some());
        assert!(animator.ik_chains().is_empty());
    }

    struct Mesh {
        weights: Vec<f32>,
    }

    impl MorphTarget for Mesh {
        fn set_morph_weights(&mut self, weights: &[f32]) {
            self.weights = weights.to_vec();
        }
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_node_and_morph_outputs() {
        let mut clips = ClipLibrary::new();
        let mut clip = AnimationClip::new("door", 0.0, AnimationType::NodeBased);
        clip.add_node_channel(
            AnimationChannel::new(1).with_translation(Track::linear(vec![0.0, 1.0], vec![Vec3::ZERO, Vec3::X]).unwrap()),
        );
        clip.add_morph_channel(
            MorphWeightChannel::new(0, vec![0.0, 1.0], vec![vec![0.0, 1.0], vec![1.0, 0.0]], Interpolation::Linear)
                .unwrap(),
        );
        let door = clips.insert(clip);

        let mut animator = AnimatorRc::default();
        animator.play_animation(door, true);
        animator.update(0.5, &clips);
        assert_eq!(animator.node_transforms().len(), 2);
        assert!(mat4_translation(&animator.node_transform(1)).abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-5));
        assert_eq!(animator.morph_weights(0), &[0.5, 0.5]);

        let mut meshes = vec![Mesh { weights: Vec::new() }, Mesh { weights: Vec::new() }];
        animator.apply_morph_weights(&mut meshes);
        assert_eq!(meshes[0].weights, vec![0.5, 0.5]);
        assert!(meshes[1].weights.is_empty());
    }
}
