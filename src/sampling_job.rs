//!
//! Sampling of animation clips into local poses, node transforms and morph weights.
//!

use glam::Mat4;
use glam_ext::Transform3A;
use std::rc::Rc;
use std::sync::Arc;

use crate::animation::{wrap_time, AnimationClip, AnimationType};
use crate::base::{RigError, RigObj};
use crate::math::transform_to_mat4;

///
/// Samples a skeletal clip at a given time into a local pose.
///
/// Bones without a channel, and components without a track, keep the rest pose value. Channels
/// targeting bones outside the rest pose are ignored.
///
#[derive(Debug)]
pub struct SamplingJob<A = Rc<AnimationClip>>
where
    A: RigObj<AnimationClip>,
{
    clip: Option<A>,
    time: f32,
    looping: bool,
    output: Vec<Transform3A>,
}

pub type SamplingJobRef<'t> = SamplingJob<&'t AnimationClip>;
pub type SamplingJobRc = SamplingJob<Rc<AnimationClip>>;
pub type SamplingJobArc = SamplingJob<Arc<AnimationClip>>;

impl<A> Default for SamplingJob<A>
where
    A: RigObj<AnimationClip>,
{
    fn default() -> SamplingJob<A> {
        return SamplingJob {
            clip: None,
            time: 0.0,
            looping: true,
            output: Vec::new(),
        };
    }
}

impl<A> SamplingJob<A>
where
    A: RigObj<AnimationClip>,
{
    /// Gets clip of `SamplingJob`.
    #[inline]
    pub fn clip(&self) -> Option<&A> {
        return self.clip.as_ref();
    }

    /// Sets clip of `SamplingJob`.
    #[inline]
    pub fn set_clip(&mut self, clip: A) {
        self.clip = Some(clip);
    }

    /// Clears clip of `SamplingJob`.
    #[inline]
    pub fn clear_clip(&mut self) {
        self.clip = None;
    }

    /// Gets time of `SamplingJob`.
    #[inline]
    pub fn time(&self) -> f32 {
        return self.time;
    }

    /// Sets time of `SamplingJob`, in seconds. Wrapped or clamped into the clip range by `run`.
    #[inline]
    pub fn set_time(&mut self, time: f32) {
        self.time = time;
    }

    /// Gets looping of `SamplingJob`.
    #[inline]
    pub fn looping(&self) -> bool {
        return self.looping;
    }

    /// Sets looping of `SamplingJob`.
    #[inline]
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Gets output of `SamplingJob`.
    #[inline]
    pub fn output(&self) -> &[Transform3A] {
        return &self.output;
    }

    /// Takes the output buffer out of the job.
    #[inline]
    pub fn into_output(self) -> Vec<Transform3A> {
        return self.output;
    }

    /// Validates `SamplingJob` parameters.
    pub fn validate(&self) -> bool {
        let clip = match &self.clip {
            Some(clip) => clip.obj(),
            None => return false,
        };
        return clip.animation_type() == AnimationType::Skeletal && self.time.is_finite();
    }

    /// Runs sampling job's task.
    /// The validate job before any operation is performed.
    ///
    /// * `rest_pose` - Rest pose of the skeleton, it defines the output size.
    pub fn run(&mut self, rest_pose: &[Transform3A]) -> Result<(), RigError> {
        if !self.validate() {
            return Err(RigError::InvalidJob);
        }
        let clip = match &self.clip {
            Some(clip) => clip.obj(),
            None => return Err(RigError::InvalidJob),
        };

        let time = wrap_time(self.time, clip.duration(), self.looping);
        self.output.clear();
        self.output.extend_from_slice(rest_pose);
        for channel in clip.channels() {
            if let Some(rest) = rest_pose.get(channel.target) {
                self.output[channel.target] = channel.sample(time, rest);
            }
        }
        return Ok(());
    }
}

/// Samples a skeletal clip into a new pose, shorthand for a `SamplingJobRef` run.
pub fn sample_clip(
    clip: &AnimationClip,
    time: f32,
    looping: bool,
    rest_pose: &[Transform3A],
) -> Result<Vec<Transform3A>, RigError> {
    let mut job = SamplingJobRef::default();
    job.set_clip(clip);
    job.set_time(time);
    job.set_looping(looping);
    job.run(rest_pose)?;
    return Ok(job.into_output());
}

///
/// Samples node channels into node matrices.
///
/// The output has one slot per node index up to the highest targeted one, slots without a
/// channel are identity.
///
pub fn sample_node_transforms(clip: &AnimationClip, time: f32, looping: bool, output: &mut Vec<Mat4>) {
    let time = wrap_time(time, clip.duration(), looping);
    output.clear();
    output.resize(clip.num_nodes(), Mat4::IDENTITY);
    for channel in clip.node_channels() {
        let local = channel.sample(time, &Transform3A::IDENTITY);
        output[channel.target] = transform_to_mat4(&local);
    }
}

/// Samples morph channels, one weight vector per mesh index. Meshes without a channel get
/// an empty vector.
pub fn sample_morph_weights(clip: &AnimationClip, time: f32, looping: bool, output: &mut Vec<Vec<f32>>) {
    let time = wrap_time(time, clip.duration(), looping);
    output.clear();
    output.resize(clip.num_morph_targets(), Vec::new());
    for channel in clip.morph_channels() {
        channel.sample(time, &mut output[channel.target]);
    }
}
