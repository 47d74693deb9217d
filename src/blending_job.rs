//!
//! Layered pose blending: override, blend and additive layers with optional bone masks.
//!

use glam::{Quat, Vec3A};
use glam_ext::Transform3A;

use crate::base::RigError;
use crate::math::{quat_slerp, transform_lerp};

/// How a layer combines with the pose accumulated by the layers below it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BlendMode {
    /// Interpolates toward the layer pose by the layer weight.
    #[default]
    Override,
    /// Applies the difference between the layer pose and a reference pose, scaled by the weight.
    Additive,
    /// Interpolates toward the layer pose by the layer weight.
    Blend,
}

/// Defines a layer of blending input data and its weight.
#[derive(Debug, Clone, Copy)]
pub struct BlendingLayer<'t> {
    /// Local pose of the layer.
    pub input: &'t [Transform3A],
    /// Layer weight in [0, 1].
    pub weight: f32,
    pub mode: BlendMode,
    /// Bones affected by the layer. Empty means every bone.
    pub mask: &'t [usize],
    /// Pose the additive delta is computed against. Required by additive layers.
    pub reference: Option<&'t [Transform3A]>,
}

impl<'t> BlendingLayer<'t> {
    pub fn new(input: &'t [Transform3A], weight: f32) -> BlendingLayer<'t> {
        return BlendingLayer {
            input,
            weight,
            mode: BlendMode::Override,
            mask: &[],
            reference: None,
        };
    }

    pub fn with_mode(mut self, mode: BlendMode) -> BlendingLayer<'t> {
        self.mode = mode;
        return self;
    }

    pub fn with_mask(mut self, mask: &'t [usize]) -> BlendingLayer<'t> {
        self.mask = mask;
        return self;
    }

    pub fn with_reference(mut self, reference: &'t [Transform3A]) -> BlendingLayer<'t> {
        self.reference = Some(reference);
        return self;
    }
}

///
/// Blends an ordered stack of layers into a single local pose.
///
/// The first layer seeds the output whatever its mode and weight. Each following layer is
/// combined with the accumulated pose on the bones of its mask (every bone when the mask is
/// empty). Layers whose pose size differs from the seed are skipped with a warning.
///
#[derive(Debug, Default)]
pub struct BlendingJob<'t> {
    layers: Vec<BlendingLayer<'t>>,
    output: Vec<Transform3A>,
}

impl<'t> BlendingJob<'t> {
    /// Gets layers of `BlendingJob`.
    #[inline]
    pub fn layers(&self) -> &[BlendingLayer<'t>] {
        return &self.layers;
    }

    /// Gets mutable layers of `BlendingJob`, in bottom to top order.
    #[inline]
    pub fn layers_mut(&mut self) -> &mut Vec<BlendingLayer<'t>> {
        return &mut self.layers;
    }

    /// Gets output of `BlendingJob`.
    #[inline]
    pub fn output(&self) -> &[Transform3A] {
        return &self.output;
    }

    /// Takes the output buffer out of the job.
    #[inline]
    pub fn into_output(self) -> Vec<Transform3A> {
        return self.output;
    }

    /// Validates `BlendingJob` parameters.
    pub fn validate(&self) -> bool {
        if self.layers.is_empty() {
            return false;
        }
        return self.layers.iter().all(|layer| {
            layer.weight.is_finite() && (layer.mode != BlendMode::Additive || layer.reference.is_some())
        });
    }

    /// Runs blending job's task.
    /// The validate job before any operation is performed.
    pub fn run(&mut self) -> Result<(), RigError> {
        if !self.validate() {
            return Err(RigError::InvalidJob);
        }

        let seed = self.layers[0].input;
        self.output.clear();
        self.output.extend_from_slice(seed);

        for layer in self.layers.iter().skip(1) {
            if layer.input.len() != self.output.len() {
                log::warn!(
                    "BlendingJob: layer has {} bones, expected {}, layer skipped",
                    layer.input.len(),
                    self.output.len()
                );
                continue;
            }
            let weight = layer.weight.clamp(0.0, 1.0);
            if weight <= 0.0 {
                continue;
            }

            match layer.mode {
                BlendMode::Override | BlendMode::Blend => {
                    for_each_masked(layer.mask, self.output.len(), |idx| {
                        self.output[idx] = transform_lerp(&self.output[idx], &layer.input[idx], weight);
                    });
                }
                BlendMode::Additive => {
                    let reference = match layer.reference {
                        Some(reference) if reference.len() == self.output.len() => reference,
                        _ => {
                            log::warn!("BlendingJob: additive reference size mismatch, layer skipped");
                            continue;
                        }
                    };
                    for_each_masked(layer.mask, self.output.len(), |idx| {
                        self.output[idx] =
                            apply_additive(&self.output[idx], &layer.input[idx], &reference[idx], weight);
                    });
                }
            }
        }
        return Ok(());
    }
}

fn for_each_masked<F: FnMut(usize)>(mask: &[usize], len: usize, mut f: F) {
    if mask.is_empty() {
        (0..len).for_each(f);
    } else {
        mask.iter().copied().filter(|&idx| idx < len).for_each(&mut f);
    }
}

///
/// Adds the local delta `pose - reference` to `base`, scaled by `weight`.
///
/// Translation deltas are added, rotation deltas are post multiplied (`base * slerp(I, ref⁻¹ * pose, w)`)
/// and scale ratios are multiplied.
///
pub fn apply_additive(base: &Transform3A, pose: &Transform3A, reference: &Transform3A, weight: f32) -> Transform3A {
    let mut out = *base;
    out.translation = base.translation + (pose.translation - reference.translation) * weight;

    let delta = reference.rotation.conjugate() * pose.rotation;
    out.rotation = (base.rotation * quat_slerp(Quat::IDENTITY, delta, weight)).normalize();

    let ratio = Vec3A::select(reference.scale.abs().cmpgt(Vec3A::splat(1e-6)), pose.scale / reference.scale, Vec3A::ONE);
    out.scale = base.scale * Vec3A::ONE.lerp(ratio, weight);
    return out;
}

/// Interpolates two poses bone by bone into `output`. Poses of different sizes are a
/// `MismatchedBoneCount` error.
pub fn blend_poses(
    from: &[Transform3A],
    to: &[Transform3A],
    t: f32,
    output: &mut Vec<Transform3A>,
) -> Result<(), RigError> {
    if from.len() != to.len() {
        return Err(RigError::MismatchedBoneCount {
            expected: from.len(),
            actual: to.len(),
        });
    }
    output.clear();
    output.extend(from.iter().zip(to.iter()).map(|(a, b)| transform_lerp(a, b, t)));
    return Ok(());
}
