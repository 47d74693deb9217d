//!
//! Blend tree: a tree of clip leaves combined by 1D, 2D and additive blend nodes.
//!

use glam::Vec2;
use glam_ext::Transform3A;

use crate::base::RigError;
use crate::blending_job::apply_additive;
use crate::clip_library::{ClipHandle, ClipLibrary};
use crate::math::transform_lerp;
use crate::sampling_job::sample_clip;

/// Squared distance under which a 2D sample is considered exactly hit.
const BLEND_2D_EXACT_HIT: f32 = 1e-8;

/// Inputs shared by a whole tree evaluation.
#[derive(Debug, Clone, Copy)]
pub struct BlendContext<'t> {
    pub clips: &'t ClipLibrary,
    /// Rest pose of the skeleton, also the reference of additive nodes.
    pub rest_pose: &'t [Transform3A],
    /// Tree time in seconds. Each clip leaf loops it into its own duration.
    pub time: f32,
}

///
/// A blend tree node. Children are owned by their parent.
///
/// Blend parameters are stored in the nodes themselves and updated through
/// `set_parameter`/`set_parameter_2d`, usually every frame from gameplay code.
///
#[derive(Debug, Clone, PartialEq)]
pub enum BlendNode {
    /// Samples a clip, looped.
    Clip { clip: ClipHandle },
    /// Blends the two children whose thresholds bracket the parameter. Children are sorted
    /// by threshold.
    Blend1D {
        parameter: f32,
        children: Vec<(f32, BlendNode)>,
    },
    /// Blends the three children nearest to the parameter by inverse distance.
    Blend2D {
        parameter: Vec2,
        children: Vec<(Vec2, BlendNode)>,
    },
    /// Adds the difference between `additive` and the rest pose on top of `base`.
    Additive {
        base: Box<BlendNode>,
        additive: Box<BlendNode>,
        weight: f32,
    },
}

impl BlendNode {
    pub fn clip(clip: ClipHandle) -> BlendNode {
        return BlendNode::Clip { clip };
    }

    /// Creates a 1D node, children are sorted by threshold.
    pub fn blend_1d(mut children: Vec<(f32, BlendNode)>) -> BlendNode {
        children.sort_by(|a, b| a.0.total_cmp(&b.0));
        return BlendNode::Blend1D {
            parameter: 0.0,
            children,
        };
    }

    pub fn blend_2d(children: Vec<(Vec2, BlendNode)>) -> BlendNode {
        return BlendNode::Blend2D {
            parameter: Vec2::ZERO,
            children,
        };
    }

    pub fn additive(base: BlendNode, additive: BlendNode, weight: f32) -> BlendNode {
        return BlendNode::Additive {
            base: Box::new(base),
            additive: Box::new(additive),
            weight,
        };
    }

    /// Sets the parameter of a 1D node. No-op on other nodes.
    pub fn set_parameter(&mut self, value: f32) {
        match self {
            BlendNode::Blend1D { parameter, .. } => *parameter = value,
            _ => log::warn!("BlendNode::set_parameter() on a non 1D node"),
        }
    }

    /// Sets the parameter of a 2D node. No-op on other nodes.
    pub fn set_parameter_2d(&mut self, value: Vec2) {
        match self {
            BlendNode::Blend2D { parameter, .. } => *parameter = value,
            _ => log::warn!("BlendNode::set_parameter_2d() on a non 2D node"),
        }
    }

    /// Sets the weight of an additive node. No-op on other nodes.
    pub fn set_additive_weight(&mut self, value: f32) {
        match self {
            BlendNode::Additive { weight, .. } => *weight = value.clamp(0.0, 1.0),
            _ => log::warn!("BlendNode::set_additive_weight() on a non additive node"),
        }
    }

    /// Gets the `index`th child of a blend node.
    pub fn child_mut(&mut self, index: usize) -> Option<&mut BlendNode> {
        return match self {
            BlendNode::Clip { .. } => None,
            BlendNode::Blend1D { children, .. } => children.get_mut(index).map(|(_, n)| n),
            BlendNode::Blend2D { children, .. } => children.get_mut(index).map(|(_, n)| n),
            BlendNode::Additive { base, additive, .. } => match index {
                0 => Some(base.as_mut()),
                1 => Some(additive.as_mut()),
                _ => None,
            },
        };
    }

    /// Longest duration of the clips under this node, 0 if none is found.
    pub fn duration(&self, clips: &ClipLibrary) -> f32 {
        return match self {
            BlendNode::Clip { clip } => clips.get(*clip).map(|c| c.duration()).unwrap_or(0.0),
            BlendNode::Blend1D { children, .. } => {
                children.iter().map(|(_, n)| n.duration(clips)).fold(0.0, f32::max)
            }
            BlendNode::Blend2D { children, .. } => {
                children.iter().map(|(_, n)| n.duration(clips)).fold(0.0, f32::max)
            }
            BlendNode::Additive { base, additive, .. } => base.duration(clips).max(additive.duration(clips)),
        };
    }

    ///
    /// Appends the clip leaves of this node with their share of the evaluated pose, `weight`
    /// being the share of the node itself. Additive operands are not counted.
    ///
    pub fn clip_weights(&self, weight: f32, out: &mut Vec<(ClipHandle, f32)>) {
        match self {
            BlendNode::Clip { clip } => out.push((*clip, weight)),
            BlendNode::Blend1D { parameter, children } => {
                let (first, last) = match (children.first(), children.last()) {
                    (Some(first), Some(last)) => (first, last),
                    _ => return,
                };
                if *parameter <= first.0 {
                    first.1.clip_weights(weight, out);
                } else if *parameter >= last.0 {
                    last.1.clip_weights(weight, out);
                } else {
                    let upper = children.partition_point(|(threshold, _)| *threshold <= *parameter);
                    let (t0, n0) = &children[upper - 1];
                    let (t1, n1) = &children[upper];
                    let range = t1 - t0;
                    let t = if range > 0.0 { (parameter - t0) / range } else { 0.0 };
                    n0.clip_weights(weight * (1.0 - t), out);
                    n1.clip_weights(weight * t, out);
                }
            }
            BlendNode::Blend2D { parameter, children } => {
                let nearest = nearest_2d(*parameter, children);
                match nearest.first() {
                    Some(&(distance2, idx)) if distance2 <= BLEND_2D_EXACT_HIT => {
                        children[idx].1.clip_weights(weight, out);
                    }
                    _ => {
                        let total: f32 = nearest.iter().map(|(d2, _)| 1.0 / d2.sqrt()).sum();
                        for &(distance2, idx) in &nearest {
                            children[idx].1.clip_weights(weight / distance2.sqrt() / total, out);
                        }
                    }
                }
            }
            BlendNode::Additive { base, .. } => base.clip_weights(weight, out),
        }
    }

    ///
    /// Evaluates the node into a local pose.
    ///
    /// A blend whose operand fails, or whose operands differ in bone count, degrades to its
    /// first valid operand.
    ///
    pub fn evaluate(&self, ctx: &BlendContext) -> Result<Vec<Transform3A>, RigError> {
        return match self {
            BlendNode::Clip { clip } => {
                let clip = ctx.clips.get(*clip).ok_or(RigError::InvalidClip)?;
                sample_clip(clip, ctx.time, true, ctx.rest_pose)
            }
            BlendNode::Blend1D { parameter, children } => evaluate_1d(*parameter, children, ctx),
            BlendNode::Blend2D { parameter, children } => evaluate_2d(*parameter, children, ctx),
            BlendNode::Additive {
                base,
                additive,
                weight,
            } => {
                let base_pose = base.evaluate(ctx)?;
                let additive_pose = match additive.evaluate(ctx) {
                    Ok(pose) => pose,
                    Err(err) => {
                        log::warn!("Additive node: additive operand failed: {}", err);
                        return Ok(base_pose);
                    }
                };
                if additive_pose.len() != base_pose.len() || ctx.rest_pose.len() != base_pose.len() {
                    log::warn!(
                        "Additive node: mismatched bone count {} vs {}",
                        base_pose.len(),
                        additive_pose.len()
                    );
                    return Ok(base_pose);
                }
                let weight = weight.clamp(0.0, 1.0);
                Ok(base_pose
                    .iter()
                    .zip(additive_pose.iter())
                    .zip(ctx.rest_pose.iter())
                    .map(|((b, a), r)| apply_additive(b, a, r, weight))
                    .collect())
            }
        };
    }
}

/// Blends `b` into `a` by `t`. Operands that failed or differ in size degrade to the other.
fn blend_operands(
    a: Result<Vec<Transform3A>, RigError>,
    b: Result<Vec<Transform3A>, RigError>,
    t: f32,
) -> Result<Vec<Transform3A>, RigError> {
    return match (a, b) {
        (Ok(a), Ok(b)) => {
            if a.len() != b.len() {
                log::warn!("Blend node: mismatched bone count {} vs {}", a.len(), b.len());
                return Ok(a);
            }
            Ok(a.iter().zip(b.iter()).map(|(x, y)| transform_lerp(x, y, t)).collect())
        }
        (Ok(a), Err(_)) => Ok(a),
        (Err(_), Ok(b)) => Ok(b),
        (Err(err), Err(_)) => Err(err),
    };
}

fn evaluate_1d(
    parameter: f32,
    children: &[(f32, BlendNode)],
    ctx: &BlendContext,
) -> Result<Vec<Transform3A>, RigError> {
    let (first, last) = match (children.first(), children.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(RigError::InvalidJob),
    };
    if parameter <= first.0 {
        return first.1.evaluate(ctx);
    }
    if parameter >= last.0 {
        return last.1.evaluate(ctx);
    }

    let upper = children.partition_point(|(threshold, _)| *threshold <= parameter);
    let (t0, n0) = &children[upper - 1];
    let (t1, n1) = &children[upper];
    let range = t1 - t0;
    let t = if range > 0.0 { (parameter - t0) / range } else { 0.0 };
    return blend_operands(n0.evaluate(ctx), n1.evaluate(ctx), t);
}

/// Three children nearest to `parameter`, as (squared distance, index), nearest first.
fn nearest_2d(parameter: Vec2, children: &[(Vec2, BlendNode)]) -> Vec<(f32, usize)> {
    let mut nearest: Vec<(f32, usize)> = children
        .iter()
        .enumerate()
        .map(|(idx, (position, _))| (position.distance_squared(parameter), idx))
        .collect();
    nearest.sort_by(|a, b| a.0.total_cmp(&b.0));
    nearest.truncate(3);
    return nearest;
}

fn evaluate_2d(
    parameter: Vec2,
    children: &[(Vec2, BlendNode)],
    ctx: &BlendContext,
) -> Result<Vec<Transform3A>, RigError> {
    if children.is_empty() {
        return Err(RigError::InvalidJob);
    }

    let nearest = nearest_2d(parameter, children);
    if nearest[0].0 <= BLEND_2D_EXACT_HIT {
        return children[nearest[0].1].1.evaluate(ctx);
    }

    // incremental weighted blend, exact for translation and scale, approximate for rotation
    let mut result: Option<Vec<Transform3A>> = None;
    let mut accumulated = 0.0;
    let mut last_err = RigError::InvalidJob;
    for (distance2, idx) in nearest {
        let weight = 1.0 / distance2.sqrt();
        let pose = match children[idx].1.evaluate(ctx) {
            Ok(pose) => pose,
            Err(err) => {
                last_err = err;
                continue;
            }
        };
        accumulated += weight;
        result = match result {
            None => Some(pose),
            Some(acc) => Some(blend_operands(Ok(acc), Ok(pose), weight / accumulated)?),
        };
    }
    return result.ok_or(last_err);
}
