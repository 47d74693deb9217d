//!
//! Animation state machine driving an `Animator`.
//!
//! States play a clip or a blend tree. Transitions between states are gated by an exit time
//! and by conditions over named parameters, and cross blend both states over their duration.
//!

use glam_ext::Transform3A;
use std::collections::HashMap;

use crate::animation::wrap_time;
use crate::animator::Animator;
use crate::base::{Hook, RigObj};
use crate::blend_tree::{BlendContext, BlendNode};
use crate::blending_job::{blend_poses, BlendMode, BlendingJob, BlendingLayer};
use crate::clip_library::{ClipHandle, ClipLibrary};
use crate::event::{collect_events, EventLog, EventSource, FiredEvent};
use crate::root_motion::RootMotionSource;
use crate::sampling_job::sample_clip;
use crate::skeleton::Skeleton;

/// Index of a state in its state machine.
pub type StateId = usize;

const EQUAL_TOLERANCE: f32 = 1e-4;

/// A named parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Parameter {
    Float(f32),
    Bool(bool),
}

impl Parameter {
    fn as_f32(&self) -> f32 {
        return match *self {
            Parameter::Float(v) => v,
            Parameter::Bool(b) => b as u8 as f32,
        };
    }

    fn as_bool(&self) -> bool {
        return match *self {
            Parameter::Float(v) => v != 0.0,
            Parameter::Bool(b) => b,
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Comparator {
    Greater,
    Less,
    /// Equal within 1e-4.
    Equal,
    NotEqual,
    /// The parameter is true, or a non zero float.
    True,
    False,
}

/// Test of one parameter. A missing parameter fails every comparator.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub parameter: String,
    pub comparator: Comparator,
    pub threshold: f32,
}

impl Condition {
    pub fn new(parameter: impl Into<String>, comparator: Comparator, threshold: f32) -> Condition {
        return Condition {
            parameter: parameter.into(),
            comparator,
            threshold,
        };
    }

    pub fn is_true(parameter: impl Into<String>) -> Condition {
        return Condition::new(parameter, Comparator::True, 0.0);
    }

    pub fn is_false(parameter: impl Into<String>) -> Condition {
        return Condition::new(parameter, Comparator::False, 0.0);
    }

    pub fn evaluate(&self, parameters: &HashMap<String, Parameter>) -> bool {
        let value = match parameters.get(&self.parameter) {
            Some(value) => value,
            None => return false,
        };
        return match self.comparator {
            Comparator::Greater => value.as_f32() > self.threshold,
            Comparator::Less => value.as_f32() < self.threshold,
            Comparator::Equal => (value.as_f32() - self.threshold).abs() < EQUAL_TOLERANCE,
            Comparator::NotEqual => (value.as_f32() - self.threshold).abs() >= EQUAL_TOLERANCE,
            Comparator::True => value.as_bool(),
            Comparator::False => !value.as_bool(),
        };
    }
}

///
/// Edge between two states.
///
/// A transition is taken when the source state normalized time reached `exit_time` (if any)
/// and every condition holds. Without exit time nor conditions, it is taken immediately.
///
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationTransition {
    pub from: StateId,
    pub to: StateId,
    /// Cross blend duration, in seconds. Zero switches immediately.
    pub duration: f32,
    /// Normalized time of the source state after which the transition may fire. Looping
    /// states count completed cycles, so 1.0 is reached at the end of the first loop.
    pub exit_time: Option<f32>,
    pub can_interrupt: bool,
    /// Elapsed transition time after which an interruption is allowed.
    pub interruptible_after: f32,
    /// Conditions, all of which must hold.
    pub conditions: Vec<Condition>,
}

impl AnimationTransition {
    pub fn new(from: StateId, to: StateId, duration: f32) -> AnimationTransition {
        return AnimationTransition {
            from,
            to,
            duration: duration.max(0.0),
            exit_time: None,
            can_interrupt: false,
            interruptible_after: 0.0,
            conditions: Vec::new(),
        };
    }

    pub fn with_exit_time(mut self, exit_time: f32) -> AnimationTransition {
        self.exit_time = Some(exit_time);
        return self;
    }

    pub fn with_condition(mut self, condition: Condition) -> AnimationTransition {
        self.conditions.push(condition);
        return self;
    }

    /// Allows the transition to be interrupted once `after` seconds elapsed.
    pub fn with_interrupt(mut self, after: f32) -> AnimationTransition {
        self.can_interrupt = true;
        self.interruptible_after = after.max(0.0);
        return self;
    }

    fn is_ready(&self, progress: f32, parameters: &HashMap<String, Parameter>) -> bool {
        if let Some(exit_time) = self.exit_time {
            if progress < exit_time {
                return false;
            }
        }
        return self.conditions.iter().all(|c| c.evaluate(parameters));
    }
}

/// What a state plays.
#[derive(Debug, Clone)]
pub enum StateMotion {
    Clip(ClipHandle),
    BlendTree(BlendNode),
}

impl StateMotion {
    fn duration(&self, clips: &ClipLibrary) -> f32 {
        return match self {
            StateMotion::Clip(handle) => clips.get(*handle).map(|c| c.duration()).unwrap_or(0.0),
            StateMotion::BlendTree(tree) => tree.duration(clips),
        };
    }

    fn sample(&self, time: f32, looping: bool, clips: &ClipLibrary, rest: &[Transform3A]) -> Option<Vec<Transform3A>> {
        let result = match self {
            StateMotion::Clip(handle) => {
                let clip = clips.get(*handle)?;
                sample_clip(clip, time, looping, rest)
            }
            StateMotion::BlendTree(tree) => tree.evaluate(&BlendContext {
                clips,
                rest_pose: rest,
                time,
            }),
        };
        return match result {
            Ok(pose) => Some(pose),
            Err(err) => {
                log::warn!("AnimationStateMachine: sampling failed: {}", err);
                None
            }
        };
    }
}

/// A node of the state machine.
#[derive(Debug)]
pub struct AnimationState {
    id: StateId,
    name: String,
    motion: Option<StateMotion>,
    speed: f32,
    looping: bool,
    layer: usize,
    transitions: Vec<AnimationTransition>,
    on_enter: Option<Hook<str>>,
    on_exit: Option<Hook<str>>,
    on_update: Option<Hook<f32>>,
}

impl AnimationState {
    #[inline]
    pub fn id(&self) -> StateId {
        return self.id;
    }

    #[inline]
    pub fn name(&self) -> &str {
        return &self.name;
    }

    #[inline]
    pub fn motion(&self) -> Option<&StateMotion> {
        return self.motion.as_ref();
    }

    #[inline]
    pub fn motion_mut(&mut self) -> Option<&mut StateMotion> {
        return self.motion.as_mut();
    }

    pub fn set_motion(&mut self, motion: Option<StateMotion>) {
        self.motion = motion;
    }

    #[inline]
    pub fn speed(&self) -> f32 {
        return self.speed;
    }

    pub fn set_speed(&mut self, speed: f32) {
        if speed.is_finite() {
            self.speed = speed;
        }
    }

    #[inline]
    pub fn looping(&self) -> bool {
        return self.looping;
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// State machine layer the state plays on.
    #[inline]
    pub fn layer(&self) -> usize {
        return self.layer;
    }

    /// Outgoing transitions, in evaluation order.
    #[inline]
    pub fn transitions(&self) -> &[AnimationTransition] {
        return &self.transitions;
    }

    /// Called with the state name when the state becomes current.
    pub fn set_on_enter<F: FnMut(&str) + 'static>(&mut self, f: F) {
        self.on_enter = Some(Hook::new(f));
    }

    /// Called with the state name when the state stops being current.
    pub fn set_on_exit<F: FnMut(&str) + 'static>(&mut self, f: F) {
        self.on_exit = Some(Hook::new(f));
    }

    /// Called each update with the state normalized time.
    pub fn set_on_update<F: FnMut(&f32) + 'static>(&mut self, f: F) {
        self.on_update = Some(Hook::new(f));
    }

    fn enter(&mut self) {
        if let Some(hook) = self.on_enter.as_mut() {
            hook.call(&self.name);
        }
    }

    fn exit(&mut self) {
        if let Some(hook) = self.on_exit.as_mut() {
            hook.call(&self.name);
        }
    }

    fn duration(&self, clips: &ClipLibrary) -> f32 {
        return self.motion.as_ref().map(|m| m.duration(clips)).unwrap_or(0.0);
    }

    fn normalized_time(&self, time: f32, clips: &ClipLibrary) -> f32 {
        let duration = self.duration(clips);
        if duration <= 0.0 {
            return 1.0;
        }
        return time / duration;
    }

    fn advance(&self, time: f32, dt: f32, clips: &ClipLibrary) -> f32 {
        return wrap_time(time + dt * self.speed, self.duration(clips), self.looping);
    }

    /// Normalized time since the state was entered, not wrapped for looping states.
    fn progress(&self, progress: f32, time: f32, dt: f32, clips: &ClipLibrary) -> f32 {
        let duration = self.duration(clips);
        if duration <= 0.0 {
            return 1.0;
        }
        if self.looping {
            return progress + dt * self.speed / duration;
        }
        return time / duration;
    }

    fn clip(&self) -> Option<ClipHandle> {
        return match self.motion {
            Some(StateMotion::Clip(handle)) => Some(handle),
            _ => None,
        };
    }

    /// Clips driving the root bone while the state time moved from `from` to `to`, the
    /// dominant one first.
    fn root_sources(&self, from: f32, to: f32, weight: f32, clips: &ClipLibrary, out: &mut Vec<RootMotionSource>) {
        match &self.motion {
            Some(StateMotion::Clip(handle)) => {
                out.push(RootMotionSource::new(*handle, self.looping && to < from).with_weight(weight));
            }
            Some(StateMotion::BlendTree(tree)) => {
                let mut leaves = Vec::new();
                tree.clip_weights(weight, &mut leaves);
                leaves.sort_by(|a, b| b.1.total_cmp(&a.1));
                for (handle, leaf_weight) in leaves {
                    if let Some(clip) = clips.get(handle) {
                        let a = wrap_time(from, clip.duration(), true);
                        let b = wrap_time(to, clip.duration(), true);
                        let wrapped = self.speed > 0.0 && from != to && b < a;
                        out.push(RootMotionSource::new(handle, wrapped).with_weight(leaf_weight));
                    }
                }
            }
            None => {}
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveTransition {
    transition: AnimationTransition,
    elapsed: f32,
    to_time: f32,
    to_progress: f32,
    /// Pose shown when an earlier transition was interrupted, faded out instead of the source
    /// state.
    from_pose: Option<Vec<Transform3A>>,
}

///
/// A layer of the state machine, running its own current state.
///
/// Layers are composed by index like animator layers: layer 0 seeds the pose, the following
/// layers are blended on top with their weight, mode and bone mask.
///
#[derive(Debug)]
pub struct StateMachineLayer {
    weight: f32,
    blend_mode: BlendMode,
    bone_mask: Vec<usize>,
    entry: Option<StateId>,
    current: Option<StateId>,
    state_time: f32,
    progress: f32,
    transition: Option<ActiveTransition>,
    pose: Vec<Transform3A>,
    sampled: bool,
}

impl StateMachineLayer {
    fn new(weight: f32, blend_mode: BlendMode) -> StateMachineLayer {
        return StateMachineLayer {
            weight,
            blend_mode,
            bone_mask: Vec::new(),
            entry: None,
            current: None,
            state_time: 0.0,
            progress: 0.0,
            transition: None,
            pose: Vec::new(),
            sampled: false,
        };
    }

    #[inline]
    pub fn weight(&self) -> f32 {
        return self.weight;
    }

    #[inline]
    pub fn blend_mode(&self) -> BlendMode {
        return self.blend_mode;
    }

    #[inline]
    pub fn bone_mask(&self) -> &[usize] {
        return &self.bone_mask;
    }

    #[inline]
    pub fn current_state(&self) -> Option<StateId> {
        return self.current;
    }

    /// Time in the current state, in seconds.
    #[inline]
    pub fn state_time(&self) -> f32 {
        return self.state_time;
    }

    #[inline]
    pub fn is_transitioning(&self) -> bool {
        return self.transition.is_some();
    }

    /// Destination state of the transition in progress.
    #[inline]
    pub fn transition_target(&self) -> Option<StateId> {
        return self.transition.as_ref().map(|t| t.transition.to);
    }
}

///
/// A graph of animation states driving an `Animator`.
///
/// The first state added to a layer is its entry state, entered on the first update. Each
/// `update` advances every layer, composes the layer poses and hands the result to the
/// animator, which then applies root motion and IK.
///
/// # Examples
///
/// ```
/// use rig_animation_rs::*;
///
/// let mut clips = ClipLibrary::new();
/// let idle = clips.insert(AnimationClip::new("idle", 1.0, AnimationType::Skeletal));
/// let run = clips.insert(AnimationClip::new("run", 1.0, AnimationType::Skeletal));
///
/// let mut machine = AnimationStateMachine::new();
/// let a = machine.add_state("idle", StateMotion::Clip(idle));
/// let b = machine.add_state("run", StateMotion::Clip(run));
/// machine.add_transition(
///     AnimationTransition::new(a, b, 0.3).with_condition(Condition::new("speed", Comparator::Greater, 0.5)),
/// );
/// machine.set_float("speed", 1.0);
/// ```
///
#[derive(Debug)]
pub struct AnimationStateMachine {
    states: Vec<AnimationState>,
    layers: Vec<StateMachineLayer>,
    parameters: HashMap<String, Parameter>,
    event_log: EventLog,
}

impl Default for AnimationStateMachine {
    fn default() -> AnimationStateMachine {
        return AnimationStateMachine::new();
    }
}

impl AnimationStateMachine {
    /// Creates a state machine with a single full weight layer.
    pub fn new() -> AnimationStateMachine {
        return AnimationStateMachine {
            states: Vec::new(),
            layers: vec![StateMachineLayer::new(1.0, BlendMode::Override)],
            parameters: HashMap::new(),
            event_log: EventLog::default(),
        };
    }

    //
    // states and transitions
    //

    /// Adds a looping state on layer 0 playing at normal speed.
    pub fn add_state(&mut self, name: impl Into<String>, motion: StateMotion) -> StateId {
        return self.add_state_on_layer(name, Some(motion), 0);
    }

    /// Adds a state on a layer. An unknown layer falls back to layer 0.
    pub fn add_state_on_layer(&mut self, name: impl Into<String>, motion: Option<StateMotion>, layer: usize) -> StateId {
        let layer = if layer < self.layers.len() {
            layer
        } else {
            log::warn!("AnimationStateMachine::add_state_on_layer() unknown layer {}", layer);
            0
        };
        let id = self.states.len();
        self.states.push(AnimationState {
            id,
            name: name.into(),
            motion,
            speed: 1.0,
            looping: true,
            layer,
            transitions: Vec::new(),
            on_enter: None,
            on_exit: None,
            on_update: None,
        });
        if self.layers[layer].entry.is_none() {
            self.layers[layer].entry = Some(id);
        }
        return id;
    }

    #[inline]
    pub fn states(&self) -> &[AnimationState] {
        return &self.states;
    }

    #[inline]
    pub fn state(&self, id: StateId) -> Option<&AnimationState> {
        return self.states.get(id);
    }

    #[inline]
    pub fn state_mut(&mut self, id: StateId) -> Option<&mut AnimationState> {
        return self.states.get_mut(id);
    }

    pub fn find_state(&self, name: &str) -> Option<StateId> {
        return self.states.iter().position(|s| s.name == name);
    }

    /// Adds a transition to its source state. Transitions between unknown states, or states
    /// of different layers, are rejected.
    pub fn add_transition(&mut self, transition: AnimationTransition) -> bool {
        let (from, to) = match (self.states.get(transition.from), self.states.get(transition.to)) {
            (Some(from), Some(to)) => (from, to),
            _ => {
                log::warn!(
                    "AnimationStateMachine::add_transition() unknown state {} -> {}",
                    transition.from,
                    transition.to
                );
                return false;
            }
        };
        if from.layer != to.layer {
            log::warn!(
                "AnimationStateMachine::add_transition() '{}' and '{}' are on different layers",
                from.name,
                to.name
            );
            return false;
        }
        self.states[transition.from].transitions.push(transition);
        return true;
    }

    //
    // layers
    //

    /// Adds a layer, returns its index.
    pub fn add_layer(&mut self, weight: f32, blend_mode: BlendMode) -> usize {
        self.layers.push(StateMachineLayer::new(weight.clamp(0.0, 1.0), blend_mode));
        return self.layers.len() - 1;
    }

    #[inline]
    pub fn layers(&self) -> &[StateMachineLayer] {
        return &self.layers;
    }

    #[inline]
    pub fn layer(&self, index: usize) -> Option<&StateMachineLayer> {
        return self.layers.get(index);
    }

    fn layer_mut(&mut self, index: usize, caller: &str) -> Option<&mut StateMachineLayer> {
        let layer = self.layers.get_mut(index);
        if layer.is_none() {
            log::warn!("AnimationStateMachine::{}() unknown layer {}", caller, index);
        }
        return layer;
    }

    pub fn set_layer_weight(&mut self, index: usize, weight: f32) {
        if !weight.is_finite() {
            return;
        }
        if let Some(layer) = self.layer_mut(index, "set_layer_weight") {
            layer.weight = weight.clamp(0.0, 1.0);
        }
    }

    pub fn set_layer_blend_mode(&mut self, index: usize, blend_mode: BlendMode) {
        if let Some(layer) = self.layer_mut(index, "set_layer_blend_mode") {
            layer.blend_mode = blend_mode;
        }
    }

    /// Restricts a layer to some bones, empty for every bone.
    pub fn set_layer_bone_mask(&mut self, index: usize, bones: Vec<usize>) {
        if let Some(layer) = self.layer_mut(index, "set_layer_bone_mask") {
            layer.bone_mask = bones;
        }
    }

    //
    // parameters
    //

    pub fn set_float(&mut self, name: impl Into<String>, value: f32) {
        self.parameters.insert(name.into(), Parameter::Float(value));
    }

    pub fn set_bool(&mut self, name: impl Into<String>, value: bool) {
        self.parameters.insert(name.into(), Parameter::Bool(value));
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        return self.parameters.get(name).map(|p| p.as_f32());
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        return self.parameters.get(name).map(|p| p.as_bool());
    }

    #[inline]
    pub fn parameter(&self, name: &str) -> Option<Parameter> {
        return self.parameters.get(name).copied();
    }

    //
    // playback
    //

    /// Current state of layer 0.
    pub fn current_state(&self) -> Option<StateId> {
        return self.layers.first().and_then(|l| l.current);
    }

    pub fn is_transitioning(&self) -> bool {
        return self.layers.first().map_or(false, |l| l.is_transitioning());
    }

    /// Switches a state's layer to that state immediately, cancelling any transition.
    pub fn set_current_state(&mut self, id: StateId) -> bool {
        let layer_index = match self.states.get(id) {
            Some(state) => state.layer,
            None => {
                log::warn!("AnimationStateMachine::set_current_state() unknown state {}", id);
                return false;
            }
        };
        let layer = &mut self.layers[layer_index];
        if let Some(current) = layer.current {
            self.states[current].exit();
        }
        layer.current = Some(id);
        layer.state_time = 0.0;
        layer.progress = 0.0;
        layer.transition = None;
        self.event_log.clear_source(EventSource::StateLayer(layer_index));
        self.states[id].enter();
        return true;
    }

    ///
    /// Advances every layer by `dt` seconds, then hands the composed pose, the crossed events
    /// and the weighted root motion sources of layer 0 to `animator`.
    ///
    pub fn update<S: RigObj<Skeleton>>(&mut self, dt: f32, animator: &mut Animator<S>, clips: &ClipLibrary) {
        let dt = if dt.is_finite() { dt } else { 0.0 };
        let rest: Option<Vec<Transform3A>> = animator.skeleton().map(|s| s.rest_pose().to_vec());

        let mut fired = Vec::new();
        let mut root_sources = Vec::new();
        for (index, layer) in self.layers.iter_mut().enumerate() {
            let sources = update_layer(
                &mut self.states,
                layer,
                index,
                &self.parameters,
                &mut self.event_log,
                dt,
                clips,
                rest.as_deref(),
                &mut fired,
            );
            if index == 0 {
                root_sources = sources;
            }
        }

        let pose = match rest {
            Some(rest) => self.compose_layers(rest),
            None => Vec::new(),
        };
        animator.apply_pose(pose, &root_sources, fired, clips);
    }

    fn compose_layers(&self, rest: Vec<Transform3A>) -> Vec<Transform3A> {
        let mut job = BlendingJob::default();
        for layer in self.layers.iter().filter(|l| l.sampled) {
            let input = BlendingLayer::new(&layer.pose, layer.weight)
                .with_mode(layer.blend_mode)
                .with_mask(&layer.bone_mask)
                .with_reference(&rest);
            job.layers_mut().push(input);
        }
        if job.layers().is_empty() {
            return rest.clone();
        }
        return match job.run() {
            Ok(()) => job.into_output(),
            Err(err) => {
                log::warn!("AnimationStateMachine: layer blending failed: {}", err);
                rest.clone()
            }
        };
    }
}

fn find_transition(
    state: &AnimationState,
    progress: f32,
    parameters: &HashMap<String, Parameter>,
) -> Option<AnimationTransition> {
    return state.transitions.iter().find(|t| t.is_ready(progress, parameters)).cloned();
}

fn start_transition(
    states: &mut [AnimationState],
    layer: &mut StateMachineLayer,
    log: &mut EventLog,
    event_source: EventSource,
    transition: AnimationTransition,
    from_pose: Option<Vec<Transform3A>>,
) {
    log::debug!(
        "AnimationStateMachine: '{}' -> '{}' over {}s",
        states[transition.from].name,
        states[transition.to].name,
        transition.duration
    );
    // the destination starts a new pass over its clip
    if let Some(clip) = states[transition.to].clip() {
        log.clear_clip(event_source, clip);
    }
    if transition.duration <= 0.0 {
        states[transition.from].exit();
        layer.current = Some(transition.to);
        layer.state_time = 0.0;
        layer.progress = 0.0;
        layer.transition = None;
        states[transition.to].enter();
        return;
    }
    layer.transition = Some(ActiveTransition {
        transition,
        elapsed: 0.0,
        to_time: 0.0,
        to_progress: 0.0,
        from_pose,
    });
}

#[allow(clippy::too_many_arguments)]
fn update_layer(
    states: &mut [AnimationState],
    layer: &mut StateMachineLayer,
    index: usize,
    parameters: &HashMap<String, Parameter>,
    log: &mut EventLog,
    dt: f32,
    clips: &ClipLibrary,
    rest: Option<&[Transform3A]>,
    fired: &mut Vec<FiredEvent>,
) -> Vec<RootMotionSource> {
    layer.sampled = false;
    if layer.current.is_none() {
        let entry = match layer.entry {
            Some(entry) => entry,
            None => return Vec::new(),
        };
        layer.current = Some(entry);
        layer.state_time = 0.0;
        layer.progress = 0.0;
        states[entry].enter();
    }
    let current = match layer.current {
        Some(current) => current,
        None => return Vec::new(),
    };
    let event_source = EventSource::StateLayer(index);

    // current state
    let prev = layer.state_time;
    layer.state_time = states[current].advance(prev, dt, clips);
    layer.progress = states[current].progress(layer.progress, layer.state_time, dt, clips);
    let mut span = (prev, layer.state_time);
    collect_state_events(&states[current], log, event_source, prev, layer.state_time, clips, fired);
    let normalized = states[current].normalized_time(layer.state_time, clips);
    if let Some(hook) = states[current].on_update.as_mut() {
        hook.call(&normalized);
    }

    // transition
    let mut to_span = (0.0, 0.0);
    match layer.transition.as_mut() {
        Some(active) => {
            let to = active.transition.to;
            let prev = active.to_time;
            active.to_time = states[to].advance(prev, dt, clips);
            active.to_progress = states[to].progress(active.to_progress, active.to_time, dt, clips);
            active.elapsed += dt.abs();
            to_span = (prev, active.to_time);
            collect_state_events(&states[to], log, event_source, prev, active.to_time, clips, fired);

            if active.transition.can_interrupt && active.elapsed >= active.transition.interruptible_after {
                if let Some(next) = find_transition(&states[to], active.to_progress, parameters) {
                    let (to_time, to_progress) = (active.to_time, active.to_progress);
                    // fade out of what was shown, not out of the interrupted destination
                    let shown = if layer.pose.is_empty() {
                        None
                    } else {
                        Some(layer.pose.clone())
                    };
                    states[current].exit();
                    layer.current = Some(to);
                    layer.state_time = to_time;
                    layer.progress = to_progress;
                    states[to].enter();
                    span = to_span;
                    to_span = (0.0, 0.0);
                    start_transition(states, layer, log, event_source, next, shown);
                }
            }
        }
        None => {
            if let Some(transition) = find_transition(&states[current], layer.progress, parameters) {
                start_transition(states, layer, log, event_source, transition, None);
            }
        }
    }

    let current = match layer.current {
        Some(current) => current,
        None => return Vec::new(),
    };
    let blend = layer
        .transition
        .as_ref()
        .map(|a| (a.elapsed / a.transition.duration).clamp(0.0, 1.0));

    // pose
    if let Some(rest) = rest {
        let frozen = layer.transition.as_ref().and_then(|a| a.from_pose.as_ref());
        let from_pose = match frozen {
            Some(pose) => Some(pose.clone()),
            None => states[current]
                .motion
                .as_ref()
                .and_then(|m| m.sample(layer.state_time, states[current].looping, clips, rest)),
        };
        let pose = match (&layer.transition, blend) {
            (Some(active), Some(t)) => {
                let to = &states[active.transition.to];
                let to_pose = to.motion.as_ref().and_then(|m| m.sample(active.to_time, to.looping, clips, rest));
                match (from_pose, to_pose) {
                    (Some(from_pose), Some(to_pose)) if from_pose.len() == to_pose.len() => {
                        let mut out = Vec::with_capacity(to_pose.len());
                        match blend_poses(&from_pose, &to_pose, t, &mut out) {
                            Ok(()) => Some(out),
                            Err(err) => {
                                log::warn!("AnimationStateMachine: transition blend failed: {}", err);
                                Some(to_pose)
                            }
                        }
                    }
                    (from_pose, to_pose) => to_pose.or(from_pose),
                }
            }
            _ => from_pose,
        };
        if let Some(pose) = pose {
            layer.pose = pose;
            layer.sampled = true;
        }
    }

    // root motion sources, weighted like the poses
    let mut sources = Vec::with_capacity(2);
    match (&layer.transition, blend) {
        (Some(active), Some(t)) => {
            if active.from_pose.is_none() && t < 1.0 {
                states[current].root_sources(span.0, span.1, 1.0 - t, clips, &mut sources);
            }
            states[active.transition.to].root_sources(to_span.0, to_span.1, t, clips, &mut sources);
        }
        _ => states[current].root_sources(span.0, span.1, 1.0, clips, &mut sources),
    }

    // completion
    if blend.map_or(false, |t| t >= 1.0) {
        if let Some(active) = layer.transition.take() {
            let to = active.transition.to;
            log::debug!("AnimationStateMachine: entered '{}'", states[to].name);
            states[current].exit();
            if let Some(clip) = states[current].clip().filter(|c| states[to].clip() != Some(*c)) {
                log.clear_clip(event_source, clip);
            }
            layer.current = Some(to);
            layer.state_time = active.to_time;
            layer.progress = active.to_progress;
            states[to].enter();
        }
    }
    return sources;
}

fn collect_state_events(
    state: &AnimationState,
    log: &mut EventLog,
    source: EventSource,
    from: f32,
    to: f32,
    clips: &ClipLibrary,
    fired: &mut Vec<FiredEvent>,
) {
    let handle = match state.clip() {
        Some(handle) => handle,
        None => return,
    };
    let clip = match clips.get(handle) {
        Some(clip) => clip,
        None => return,
    };
    let to = if !state.looping && to >= clip.duration() && from < clip.duration() {
        f32::MAX
    } else {
        to
    };
    if let Err(err) = collect_events(log, source, handle, clip, from, to, fired) {
        log::warn!("AnimationStateMachine: event collection failed: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};
    use std::cell::RefCell;
    use std::rc::Rc;
    use wasm_bindgen_test::*;

    use super::*;
    use crate::animation::{AnimationChannel, AnimationClip, AnimationEvent, AnimationType};
    use crate::animator::AnimatorRc;
    use crate::config::AnimatorConfig;
    use crate::math::mat4_translation;
    use crate::skeleton::Bone;
    use crate::track::Track;

    fn skeleton() -> Rc<Skeleton> {
        let bones = vec![Bone::new("root", -1, Mat4::IDENTITY, Mat4::IDENTITY)];
        return Rc::new(Skeleton::new(bones).unwrap());
    }

    fn hold_clip(name: &str, at: Vec3) -> AnimationClip {
        let mut clip = AnimationClip::new(name, 1.0, AnimationType::Skeletal);
        clip.add_channel(AnimationChannel::new(0).with_translation(Track::linear(vec![0.0, 1.0], vec![at, at]).unwrap()));
        return clip;
    }

    fn root(animator: &AnimatorRc) -> Vec3 {
        return mat4_translation(&animator.global_bone_matrices()[0]);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_conditions() {
        let mut params = HashMap::new();
        params.insert("speed".to_string(), Parameter::Float(1.0));
        params.insert("grounded".to_string(), Parameter::Bool(true));

        assert!(Condition::new("speed", Comparator::Greater, 0.5).evaluate(&params));
        assert!(!Condition::new("speed", Comparator::Less, 0.5).evaluate(&params));
        assert!(Condition::new("speed", Comparator::Equal, 1.00005).evaluate(&params));
        assert!(Condition::new("speed", Comparator::NotEqual, 1.001).evaluate(&params));
        assert!(Condition::is_true("grounded").evaluate(&params));
        assert!(!Condition::is_false("grounded").evaluate(&params));
        assert!(!Condition::is_true("missing").evaluate(&params));
        assert!(!Condition::is_false("missing").evaluate(&params));
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_add_transition_checks_states() {
        let mut machine = AnimationStateMachine::new();
        let a = machine.add_state_on_layer("a", None, 0);
        let upper = machine.add_layer(1.0, BlendMode::Override);
        let b = machine.add_state_on_layer("b", None, upper);
        assert!(!machine.add_transition(AnimationTransition::new(a, 9, 0.1)));
        assert!(!machine.add_transition(AnimationTransition::new(a, b, 0.1)));
        assert!(machine.add_transition(AnimationTransition::new(a, a, 0.1)));
        assert_eq!(machine.find_state("b"), Some(b));
        assert_eq!(machine.layer(upper).and_then(|l| l.entry), Some(b));
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_exit_time_and_condition() {
        let mut clips = ClipLibrary::new();
        let ca = clips.insert(hold_clip("a", Vec3::ZERO));
        let cb = clips.insert(hold_clip("b", Vec3::X));
        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());

        let mut machine = AnimationStateMachine::new();
        let a = machine.add_state("a", StateMotion::Clip(ca));
        let b = machine.add_state("b", StateMotion::Clip(cb));
        machine.add_transition(
            AnimationTransition::new(a, b, 0.3)
                .with_exit_time(0.5)
                .with_condition(Condition::new("speed", Comparator::Greater, 0.5)),
        );

        machine.set_float("speed", 1.0);
        machine.update(0.25, &mut animator, &clips);
        assert_eq!(machine.current_state(), Some(a));
        assert!(!machine.is_transitioning());

        machine.set_float("speed", 0.0);
        machine.update(0.35, &mut animator, &clips);
        assert!(!machine.is_transitioning());

        machine.set_float("speed", 1.0);
        machine.update(0.05, &mut animator, &clips);
        assert!(machine.is_transitioning());
        assert!(root(&animator).abs_diff_eq(Vec3::ZERO, 1e-6));

        machine.update(0.15, &mut animator, &clips);
        assert!(root(&animator).abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-4));

        machine.update(0.15, &mut animator, &clips);
        assert!(!machine.is_transitioning());
        assert_eq!(machine.current_state(), Some(b));
        assert!(root(&animator).abs_diff_eq(Vec3::X, 1e-5));
        assert!((machine.layers()[0].state_time() - 0.3).abs() < 1e-5);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_hooks() {
        let mut clips = ClipLibrary::new();
        let ca = clips.insert(hold_clip("a", Vec3::ZERO));
        let cb = clips.insert(hold_clip("b", Vec3::X));
        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());

        let trace = Rc::new(RefCell::new(Vec::<String>::new()));
        let mut machine = AnimationStateMachine::new();
        let a = machine.add_state("a", StateMotion::Clip(ca));
        let b = machine.add_state("b", StateMotion::Clip(cb));
        for id in [a, b] {
            let state = machine.state_mut(id).unwrap();
            let (enter, exit) = (trace.clone(), trace.clone());
            state.set_on_enter(move |name| enter.borrow_mut().push(format!("enter {}", name)));
            state.set_on_exit(move |name| exit.borrow_mut().push(format!("exit {}", name)));
        }
        let updates = Rc::new(RefCell::new(0));
        let counter = updates.clone();
        machine.state_mut(a).unwrap().set_on_update(move |_| *counter.borrow_mut() += 1);
        machine.add_transition(AnimationTransition::new(a, b, 0.0).with_condition(Condition::is_true("go")));

        machine.update(0.1, &mut animator, &clips);
        machine.update(0.1, &mut animator, &clips);
        machine.set_bool("go", true);
        machine.update(0.1, &mut animator, &clips);
        assert_eq!(machine.current_state(), Some(b));
        assert_eq!(*updates.borrow(), 3);

        machine.set_current_state(a);
        assert_eq!(
            *trace.borrow(),
            vec!["enter a", "exit a", "enter b", "exit b", "enter a"]
        );
        assert_eq!(machine.layers()[0].state_time(), 0.0);
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_interruption() {
        let mut clips = ClipLibrary::new();
        let ca = clips.insert(hold_clip("a", Vec3::ZERO));
        let cb = clips.insert(hold_clip("b", Vec3::X));
        let cc = clips.insert(hold_clip("c", Vec3::Y));
        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());

        let mut machine = AnimationStateMachine::new();
        let a = machine.add_state("a", StateMotion::Clip(ca));
        let b = machine.add_state("b", StateMotion::Clip(cb));
        let c = machine.add_state("c", StateMotion::Clip(cc));
        machine.add_transition(
            AnimationTransition::new(a, b, 1.0).with_condition(Condition::is_true("go")).with_interrupt(0.2),
        );
        machine.add_transition(AnimationTransition::new(b, c, 1.0).with_condition(Condition::is_true("jump")));
        machine.set_bool("go", true);
        machine.set_bool("jump", true);

        machine.update(0.0, &mut animator, &clips);
        assert_eq!(machine.layers()[0].transition_target(), Some(b));
        machine.update(0.1, &mut animator, &clips);
        assert_eq!(machine.layers()[0].transition_target(), Some(b));
        machine.update(0.1, &mut animator, &clips);
        assert_eq!(machine.current_state(), Some(b));
        assert_eq!(machine.layers()[0].transition_target(), Some(c));
    }

    #[test]
    #[wasm_bindgen_test]
    fn test_layers_and_events() {
        let mut clips = ClipLibrary::new();
        let mut base_clip = hold_clip("base", Vec3::X);
        base_clip.add_event(AnimationEvent::new(0.5, "step"));
        let base = clips.insert(base_clip);
        let lean = clips.insert(hold_clip("lean", Vec3::Y));
        let mut animator = AnimatorRc::with_skeleton(skeleton(), AnimatorConfig::default());

        let mut machine = AnimationStateMachine::new();
        machine.add_state("base", StateMotion::Clip(base));
        let upper = machine.add_layer(0.5, BlendMode::Additive);
        machine.add_state_on_layer("lean", Some(StateMotion::Clip(lean)), upper);

        for _ in 0..10 {
            machine.update(0.1, &mut animator, &clips);
        }
        // lean holds y=1 from a reference of y=0, added at half weight
        assert!(root(&animator).abs_diff_eq(Vec3::new(1.0, 0.5, 0.0), 1e-5));
        let events = animator.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, EventSource::StateLayer(0));
    }
}
