//!
//! Tunable runtime parameters of the animator.
//!

use glam::Vec3;

/// Default number of iterations for iterative IK solvers.
pub const DEFAULT_IK_ITERATIONS: u32 = 10;

/// Default distance under which iterative IK solvers stop.
pub const DEFAULT_IK_TOLERANCE: f32 = 0.001;

/// Default reach margin of the two bone solver.
pub const DEFAULT_TWO_BONE_EPSILON: f32 = 0.001;

/// Default capacity of the fired event log.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 100;

/// Default crossfade duration used by the state machine, in seconds.
pub const DEFAULT_CROSSFADE_DURATION: f32 = 0.2;

///
/// Animator configuration.
///
/// Every value has a sensible default, so usually only a few fields are overridden:
///
/// ```
/// use rig_animation_rs::AnimatorConfig;
///
/// let config = AnimatorConfig {
///     ik_max_iterations: 20,
///     ..Default::default()
/// };
/// assert_eq!(config.event_log_capacity, 100);
/// ```
///
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AnimatorConfig {
    /// Iteration cap for FABRIK and CCD.
    pub ik_max_iterations: u32,
    /// Distance to target at which FABRIK and CCD stop.
    pub ik_tolerance: f32,
    /// A two bone chain is fully extended once the target is further than the chain length
    /// minus this margin.
    pub two_bone_epsilon: f32,
    /// Maximum number of remembered fired events before the log is cleared.
    pub event_log_capacity: usize,
    /// Per axis scale applied to the extracted root motion delta.
    pub root_motion_scale: Vec3,
    /// Crossfade duration used when no explicit one is given.
    pub default_crossfade_duration: f32,
}

impl Default for AnimatorConfig {
    fn default() -> AnimatorConfig {
        return AnimatorConfig {
            ik_max_iterations: DEFAULT_IK_ITERATIONS,
            ik_tolerance: DEFAULT_IK_TOLERANCE,
            two_bone_epsilon: DEFAULT_TWO_BONE_EPSILON,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            root_motion_scale: Vec3::ONE,
            default_crossfade_duration: DEFAULT_CROSSFADE_DURATION,
        };
    }
}

impl AnimatorConfig {
    /// Returns a copy with out of range values replaced by defaults.
    pub fn sanitized(&self) -> AnimatorConfig {
        let mut config = *self;
        if config.ik_max_iterations == 0 {
            log::warn!("AnimatorConfig: ik_max_iterations is 0, using {}", DEFAULT_IK_ITERATIONS);
            config.ik_max_iterations = DEFAULT_IK_ITERATIONS;
        }
        if !(config.ik_tolerance > 0.0) {
            log::warn!("AnimatorConfig: invalid ik_tolerance {}", config.ik_tolerance);
            config.ik_tolerance = DEFAULT_IK_TOLERANCE;
        }
        if !(config.two_bone_epsilon >= 0.0) {
            log::warn!("AnimatorConfig: invalid two_bone_epsilon {}", config.two_bone_epsilon);
            config.two_bone_epsilon = DEFAULT_TWO_BONE_EPSILON;
        }
        if config.event_log_capacity == 0 {
            config.event_log_capacity = DEFAULT_EVENT_LOG_CAPACITY;
        }
        if !config.root_motion_scale.is_finite() {
            config.root_motion_scale = Vec3::ONE;
        }
        if !(config.default_crossfade_duration >= 0.0) {
            config.default_crossfade_duration = DEFAULT_CROSSFADE_DURATION;
        }
        return config;
    }
}

#[cfg(test)]
mod tests {
    use wasm_bindgen_test::*;

    use super::*;

    #[test]
    #[wasm_bindgen_test]
    fn test_sanitized() {
        let config = AnimatorConfig {
            ik_max_iterations: 0,
            ik_tolerance: -1.0,
            two_bone_epsilon: f32::NAN,
            event_log_capacity: 0,
            root_motion_scale: Vec3::new(f32::INFINITY, 1.0, 1.0),
            default_crossfade_duration: 0.5,
        };
        let config = config.sanitized();
        assert_eq!(config.ik_max_iterations, DEFAULT_IK_ITERATIONS);
        assert_eq!(config.ik_tolerance, DEFAULT_IK_TOLERANCE);
        assert_eq!(config.two_bone_epsilon, DEFAULT_TWO_BONE_EPSILON);
        assert_eq!(config.event_log_capacity, DEFAULT_EVENT_LOG_CAPACITY);
        assert_eq!(config.root_motion_scale, Vec3::ONE);
        assert_eq!(config.default_crossfade_duration, 0.5);
    }

    #[cfg(feature = "serde")]
    #[test]
    #[wasm_bindgen_test]
    fn test_serde() {
        let config: AnimatorConfig = serde_json::from_str(r#"{"ik_max_iterations": 4}"#).unwrap();
        assert_eq!(config.ik_max_iterations, 4);
        assert_eq!(config.ik_tolerance, DEFAULT_IK_TOLERANCE);

        let json = serde_json::to_string(&AnimatorConfig::default()).unwrap();
        let back: AnimatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AnimatorConfig::default());
    }
}
