//!
//! Animation clip data structure definition.
//!

use glam::{Quat, Vec3};
use glam_ext::Transform3A;

use crate::base::RigError;
use crate::track::{find_keyframe_index, Interpolation, Track, TrackValue};

/// Consumption path of a clip. Skeletal clips drive bones, node based clips drive scene nodes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AnimationType {
    #[default]
    Skeletal,
    NodeBased,
}

/// Translation, rotation and scale tracks targeting a bone (or a node).
///
/// Every track is optional, components without a track keep the rest value.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnimationChannel {
    /// Bone index for skeletal channels, node index for node channels.
    pub target: usize,
    pub translation: Option<Track<Vec3>>,
    pub rotation: Option<Track<Quat>>,
    pub scale: Option<Track<Vec3>>,
}

/// Channel targeting a non-bone node index.
pub type NodeAnimationChannel = AnimationChannel;

impl AnimationChannel {
    pub fn new(target: usize) -> AnimationChannel {
        return AnimationChannel {
            target,
            ..Default::default()
        };
    }

    pub fn with_translation(mut self, track: Track<Vec3>) -> AnimationChannel {
        self.translation = Some(track);
        return self;
    }

    pub fn with_rotation(mut self, track: Track<Quat>) -> AnimationChannel {
        self.rotation = Some(track);
        return self;
    }

    pub fn with_scale(mut self, track: Track<Vec3>) -> AnimationChannel {
        self.scale = Some(track);
        return self;
    }

    /// Time of the last key over all tracks.
    pub fn end_time(&self) -> f32 {
        let t = self.translation.as_ref().map(|t| t.end_time()).unwrap_or(0.0);
        let r = self.rotation.as_ref().map(|t| t.end_time()).unwrap_or(0.0);
        let s = self.scale.as_ref().map(|t| t.end_time()).unwrap_or(0.0);
        return t.max(r).max(s);
    }

    /// Samples the channel at `time`, components without a track are taken from `rest`.
    pub fn sample(&self, time: f32, rest: &Transform3A) -> Transform3A {
        let mut out = *rest;
        if let Some(track) = &self.translation {
            if track.key_count() > 0 {
                out.translation = track.sample(time).into();
            }
        }
        if let Some(track) = &self.rotation {
            if track.key_count() > 0 {
                out.rotation = track.sample(time);
            }
        }
        if let Some(track) = &self.scale {
            if track.key_count() > 0 {
                out.scale = track.sample(time).into();
            }
        }
        return out;
    }
}

/// Morph target weights track. Every keyframe stores one weight per morph target.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MorphWeightChannel {
    /// Index of the mesh whose morph targets are driven.
    pub target: usize,
    times: Vec<f32>,
    weights: Vec<Vec<f32>>,
    in_tangents: Vec<Vec<f32>>,
    out_tangents: Vec<Vec<f32>>,
    interpolation: Interpolation,
}

impl MorphWeightChannel {
    /// Creates a linear or step morph weight channel.
    pub fn new(
        target: usize,
        times: Vec<f32>,
        weights: Vec<Vec<f32>>,
        interpolation: Interpolation,
    ) -> Result<MorphWeightChannel, RigError> {
        if interpolation == Interpolation::CubicSpline {
            return Err(RigError::InvalidTrack("cubic spline morph channel requires tangents".into()));
        }
        let channel = MorphWeightChannel {
            target,
            times,
            weights,
            in_tangents: Vec::new(),
            out_tangents: Vec::new(),
            interpolation,
        };
        channel.validate()?;
        return Ok(channel);
    }

    /// Creates a cubic spline morph weight channel.
    pub fn cubic_spline(
        target: usize,
        times: Vec<f32>,
        weights: Vec<Vec<f32>>,
        in_tangents: Vec<Vec<f32>>,
        out_tangents: Vec<Vec<f32>>,
    ) -> Result<MorphWeightChannel, RigError> {
        let channel = MorphWeightChannel {
            target,
            times,
            weights,
            in_tangents,
            out_tangents,
            interpolation: Interpolation::CubicSpline,
        };
        channel.validate()?;
        return Ok(channel);
    }

    fn validate(&self) -> Result<(), RigError> {
        if self.times.len() != self.weights.len() {
            return Err(RigError::InvalidTrack("morph times/weights count mismatch".into()));
        }
        if self.times.windows(2).any(|w| !(w[0] <= w[1])) {
            return Err(RigError::InvalidTrack("morph times are not sorted".into()));
        }
        let width = self.weights.first().map(|w| w.len()).unwrap_or(0);
        if self.weights.iter().any(|w| w.len() != width) {
            return Err(RigError::InvalidTrack("morph weight vectors differ in length".into()));
        }
        if self.interpolation == Interpolation::CubicSpline {
            let tangents_ok = self.in_tangents.len() == self.times.len()
                && self.out_tangents.len() == self.times.len()
                && self.in_tangents.iter().chain(self.out_tangents.iter()).all(|t| t.len() == width);
            if !tangents_ok {
                return Err(RigError::InvalidTrack("morph tangent count mismatch".into()));
            }
        }
        return Ok(());
    }

    #[inline]
    pub fn times(&self) -> &[f32] {
        return &self.times;
    }

    /// Number of morph targets driven by this channel.
    #[inline]
    pub fn width(&self) -> usize {
        return self.weights.first().map(|w| w.len()).unwrap_or(0);
    }

    #[inline]
    pub fn end_time(&self) -> f32 {
        return self.times.last().copied().unwrap_or(0.0);
    }

    /// Samples weights at `time` into `out`, which is resized to the channel width.
    pub fn sample(&self, time: f32, out: &mut Vec<f32>) {
        let width = self.width();
        out.clear();
        out.resize(width, 0.0);
        let len = self.times.len();
        if len == 0 {
            return;
        }
        if len == 1 || time <= self.times[0] {
            out.copy_from_slice(&self.weights[0]);
            return;
        }

        let idx = find_keyframe_index(&self.times, time);
        if idx >= len - 1 {
            out.copy_from_slice(&self.weights[len - 1]);
            return;
        }

        let dt = self.times[idx + 1] - self.times[idx];
        let t = if dt > 0.0 {
            ((time - self.times[idx]) / dt).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let (w0, w1) = (&self.weights[idx], &self.weights[idx + 1]);
        for i in 0..width {
            out[i] = match self.interpolation {
                Interpolation::Step => w0[i],
                Interpolation::Linear => f32::lerp(w0[i], w1[i], t),
                Interpolation::CubicSpline => {
                    let m0 = self.out_tangents[idx][i] * dt;
                    let m1 = self.in_tangents[idx + 1][i] * dt;
                    f32::hermite(w0[i], m0, w1[i], m1, t)
                }
            };
        }
    }
}

/// Optional value attached to an `AnimationEvent`.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventPayload {
    #[default]
    None,
    Float(f32),
    Int(i32),
    Text(String),
}

/// A named marker on the clip timeline.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnimationEvent {
    /// Event time in seconds.
    pub time: f32,
    pub name: String,
    pub payload: EventPayload,
}

impl AnimationEvent {
    pub fn new(time: f32, name: impl Into<String>) -> AnimationEvent {
        return AnimationEvent {
            time,
            name: name.into(),
            payload: EventPayload::None,
        };
    }

    pub fn with_payload(mut self, payload: EventPayload) -> AnimationEvent {
        self.payload = payload;
        return self;
    }
}

///
/// Immutable bundle of keyframe channels, plus duration, events and root motion settings.
///
/// Clips are built once by the loader layer, registered in a `ClipLibrary`, and referenced by
/// handle afterwards.
///
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnimationClip {
    name: String,
    duration: f32,
    animation_type: AnimationType,
    channels: Vec<AnimationChannel>,
    node_channels: Vec<NodeAnimationChannel>,
    morph_channels: Vec<MorphWeightChannel>,
    events: Vec<AnimationEvent>,
    root_motion: bool,
    root_bone: usize,
}

impl AnimationClip {
    /// Creates an empty clip. A non positive `duration` is derived from the channels added later.
    pub fn new(name: impl Into<String>, duration: f32, animation_type: AnimationType) -> AnimationClip {
        return AnimationClip {
            name: name.into(),
            duration: duration.max(0.0),
            animation_type,
            ..Default::default()
        };
    }

    /// Adds a bone channel, extending the duration to cover its keys.
    pub fn add_channel(&mut self, channel: AnimationChannel) {
        self.duration = self.duration.max(channel.end_time());
        self.channels.push(channel);
    }

    /// Adds a node channel, extending the duration to cover its keys.
    pub fn add_node_channel(&mut self, channel: NodeAnimationChannel) {
        self.duration = self.duration.max(channel.end_time());
        self.node_channels.push(channel);
    }

    /// Adds a morph weight channel, extending the duration to cover its keys.
    pub fn add_morph_channel(&mut self, channel: MorphWeightChannel) {
        self.duration = self.duration.max(channel.end_time());
        self.morph_channels.push(channel);
    }

    /// Adds an event, events are kept sorted by time.
    pub fn add_event(&mut self, event: AnimationEvent) {
        let pos = self.events.partition_point(|e| e.time <= event.time);
        self.events.insert(pos, event);
    }

    /// Marks `root_bone` as the bone root motion is extracted from.
    pub fn set_root_motion(&mut self, enabled: bool, root_bone: usize) {
        self.root_motion = enabled;
        self.root_bone = root_bone;
    }

    #[inline]
    pub fn name(&self) -> &str {
        return &self.name;
    }

    /// Clip duration in seconds.
    #[inline]
    pub fn duration(&self) -> f32 {
        return self.duration;
    }

    #[inline]
    pub fn animation_type(&self) -> AnimationType {
        return self.animation_type;
    }

    #[inline]
    pub fn channels(&self) -> &[AnimationChannel] {
        return &self.channels;
    }

    #[inline]
    pub fn node_channels(&self) -> &[NodeAnimationChannel] {
        return &self.node_channels;
    }

    #[inline]
    pub fn morph_channels(&self) -> &[MorphWeightChannel] {
        return &self.morph_channels;
    }

    #[inline]
    pub fn events(&self) -> &[AnimationEvent] {
        return &self.events;
    }

    #[inline]
    pub fn has_root_motion(&self) -> bool {
        return self.root_motion;
    }

    #[inline]
    pub fn root_bone(&self) -> usize {
        return self.root_bone;
    }

    /// Gets the first channel targeting `bone`.
    pub fn channel_for_bone(&self, bone: usize) -> Option<&AnimationChannel> {
        return self.channels.iter().find(|c| c.target == bone);
    }

    /// Number of node slots required by node channels.
    pub fn num_nodes(&self) -> usize {
        return self.node_channels.iter().map(|c| c.target + 1).max().unwrap_or(0);
    }

    /// Number of mesh slots required by morph channels.
    pub fn num_morph_targets(&self) -> usize {
        return self.morph_channels.iter().map(|c| c.target + 1).max().unwrap_or(0);
    }
}

///
/// Reduces a playback time into the clip range.
///
/// Looping time is wrapped into `[0, duration)`, one-shot time is clamped into `[0, duration]`.
/// A zero duration always maps to 0.
///
pub fn wrap_time(time: f32, duration: f32, looping: bool) -> f32 {
    if !(duration > 0.0) || !time.is_finite() {
        return 0.0;
    }
    if !looping {
        return time.clamp(0.0, duration);
    }
    let wrapped = time.rem_euclid(duration);
    if wrapped >= duration {
        return 0.0;
    }
    return wrapped;
}
