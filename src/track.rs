//!
//! Keyframe track data structure definition.
//!

use glam::{Quat, Vec3, Vec4};
use std::fmt::Debug;

use crate::base::RigError;
use crate::math::{hermite_basis, quat_slerp};

/// Keyframe interpolation mode of a `Track`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Interpolation {
    /// Lerp for vectors, shortest path slerp for rotations.
    #[default]
    Linear,
    /// Holds the previous key until the next one is reached.
    Step,
    /// Hermite spline, with per-key in/out tangents.
    CubicSpline,
}

/// Value type that can be stored in a `Track`.
pub trait TrackValue
where
    Self: Debug + Default + Copy + Clone + PartialEq,
{
    /// Linear interpolation between two values.
    fn lerp(a: Self, b: Self, t: f32) -> Self;

    /// Hermite interpolation, tangents are already scaled by the keyframe time delta.
    fn hermite(v0: Self, m0: Self, v1: Self, m1: Self, t: f32) -> Self;

    /// Component-wise scaling, used on spline tangents.
    fn scale(v: Self, s: f32) -> Self;

    // Compare two values with a maximum difference.
    fn abs_diff_eq(a: Self, b: Self, diff: f32) -> bool;
}

impl TrackValue for f32 {
    #[inline]
    fn lerp(a: f32, b: f32, t: f32) -> f32 {
        a + (b - a) * t
    }

    #[inline]
    fn hermite(v0: f32, m0: f32, v1: f32, m1: f32, t: f32) -> f32 {
        let (h00, h10, h01, h11) = hermite_basis(t);
        h00 * v0 + h10 * m0 + h01 * v1 + h11 * m1
    }

    #[inline]
    fn scale(v: f32, s: f32) -> f32 {
        v * s
    }

    #[inline]
    fn abs_diff_eq(a: f32, b: f32, diff: f32) -> bool {
        (a - b).abs() <= diff
    }
}

impl TrackValue for Vec3 {
    #[inline]
    fn lerp(a: Vec3, b: Vec3, t: f32) -> Vec3 {
        Vec3::lerp(a, b, t)
    }

    #[inline]
    fn hermite(v0: Vec3, m0: Vec3, v1: Vec3, m1: Vec3, t: f32) -> Vec3 {
        let (h00, h10, h01, h11) = hermite_basis(t);
        v0 * h00 + m0 * h10 + v1 * h01 + m1 * h11
    }

    #[inline]
    fn scale(v: Vec3, s: f32) -> Vec3 {
        v * s
    }

    #[inline]
    fn abs_diff_eq(a: Vec3, b: Vec3, diff: f32) -> bool {
        Vec3::abs_diff_eq(a, b, diff)
    }
}

impl TrackValue for Quat {
    #[inline]
    fn lerp(a: Quat, b: Quat, t: f32) -> Quat {
        quat_slerp(a, b, t)
    }

    fn hermite(v0: Quat, m0: Quat, v1: Quat, m1: Quat, t: f32) -> Quat {
        let (h00, h10, h01, h11) = hermite_basis(t);
        let v = Vec4::from(v0) * h00 + Vec4::from(m0) * h10 + Vec4::from(v1) * h01 + Vec4::from(m1) * h11;
        if v.length_squared() == 0.0 {
            return v0;
        }
        Quat::from_vec4(v.normalize())
    }

    #[inline]
    fn scale(v: Quat, s: f32) -> Quat {
        Quat::from_vec4(Vec4::from(v) * s)
    }

    #[inline]
    fn abs_diff_eq(a: Quat, b: Quat, diff: f32) -> bool {
        Quat::abs_diff_eq(a, b, diff) || Quat::abs_diff_eq(a, -b, diff)
    }
}

///
/// Finds the keyframe `i` such that `time` is in `[times[i], times[i + 1])`.
///
/// Time before the first key returns 0, time at or after the last key returns the last index.
/// The lookup clamps and never wraps: looping must be resolved by the caller before sampling.
///
pub fn find_keyframe_index(times: &[f32], time: f32) -> usize {
    if times.len() < 2 {
        return 0;
    }
    for i in 0..times.len() - 1 {
        if time < times[i + 1] {
            return i;
        }
    }
    return times.len() - 1;
}

/// Runtime keyframe track.
///
/// Key times, values and (for cubic spline) tangents are stored as separate buffers.
/// Times are in seconds and sorted ascending.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Track<V: TrackValue> {
    times: Vec<f32>,
    values: Vec<V>,
    in_tangents: Vec<V>,
    out_tangents: Vec<V>,
    interpolation: Interpolation,
}

impl<V: TrackValue> Track<V> {
    /// Creates a linear or step track.
    pub fn new(times: Vec<f32>, values: Vec<V>, interpolation: Interpolation) -> Result<Track<V>, RigError> {
        if interpolation == Interpolation::CubicSpline {
            return Err(RigError::InvalidTrack("cubic spline track requires tangents".into()));
        }
        let track = Track {
            times,
            values,
            in_tangents: Vec::new(),
            out_tangents: Vec::new(),
            interpolation,
        };
        track.validate()?;
        return Ok(track);
    }

    /// Creates a linear track.
    pub fn linear(times: Vec<f32>, values: Vec<V>) -> Result<Track<V>, RigError> {
        return Track::new(times, values, Interpolation::Linear);
    }

    /// Creates a step track.
    pub fn step(times: Vec<f32>, values: Vec<V>) -> Result<Track<V>, RigError> {
        return Track::new(times, values, Interpolation::Step);
    }

    /// Creates a cubic spline track. Tangent arrays must match keyframe count.
    pub fn cubic_spline(
        times: Vec<f32>,
        values: Vec<V>,
        in_tangents: Vec<V>,
        out_tangents: Vec<V>,
    ) -> Result<Track<V>, RigError> {
        let track = Track {
            times,
            values,
            in_tangents,
            out_tangents,
            interpolation: Interpolation::CubicSpline,
        };
        track.validate()?;
        return Ok(track);
    }

    fn validate(&self) -> Result<(), RigError> {
        if self.times.len() != self.values.len() {
            return Err(RigError::InvalidTrack(format!(
                "{} times for {} values",
                self.times.len(),
                self.values.len()
            )));
        }
        if self.times.windows(2).any(|w| !(w[0] <= w[1])) {
            return Err(RigError::InvalidTrack("times are not sorted".into()));
        }
        if self.interpolation == Interpolation::CubicSpline
            && (self.in_tangents.len() != self.times.len() || self.out_tangents.len() != self.times.len())
        {
            return Err(RigError::InvalidTrack("tangent count mismatch".into()));
        }
        return Ok(());
    }
}

impl<V: TrackValue> Track<V> {
    /// The key count in the track.
    #[inline]
    pub fn key_count(&self) -> usize {
        return self.times.len();
    }

    /// Keyframe times in seconds.
    #[inline]
    pub fn times(&self) -> &[f32] {
        return &self.times;
    }

    /// Keyframe values.
    #[inline]
    pub fn values(&self) -> &[V] {
        return &self.values;
    }

    #[inline]
    pub fn in_tangents(&self) -> &[V] {
        return &self.in_tangents;
    }

    #[inline]
    pub fn out_tangents(&self) -> &[V] {
        return &self.out_tangents;
    }

    #[inline]
    pub fn interpolation(&self) -> Interpolation {
        return self.interpolation;
    }

    /// Time of the last key, 0 for an empty track.
    #[inline]
    pub fn end_time(&self) -> f32 {
        return self.times.last().copied().unwrap_or(0.0);
    }

    /// Samples the track at `time` (seconds). Out of range times are clamped.
    ///
    /// An empty track samples to `V::default()`.
    pub fn sample(&self, time: f32) -> V {
        let len = self.times.len();
        if len == 0 {
            return V::default();
        }
        if len == 1 || time <= self.times[0] {
            return self.values[0];
        }

        let idx = find_keyframe_index(&self.times, time);
        if idx >= len - 1 {
            return self.values[len - 1];
        }

        let t0 = self.times[idx];
        let t1 = self.times[idx + 1];
        let dt = t1 - t0;
        let t = if dt > 0.0 { ((time - t0) / dt).clamp(0.0, 1.0) } else { 0.0 };

        return match self.interpolation {
            Interpolation::Step => self.values[idx],
            Interpolation::Linear => V::lerp(self.values[idx], self.values[idx + 1], t),
            Interpolation::CubicSpline => {
                let m0 = V::scale(self.out_tangents[idx], dt);
                let m1 = V::scale(self.in_tangents[idx + 1], dt);
                V::hermite(self.values[idx], m0, self.values[idx + 1], m1, t)
            }
        };
    }
}
