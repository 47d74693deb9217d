//!
//! Bone hierarchy and bind pose.
//!
//! Model space matrices are computed by walking the hierarchy recursively from the root bones.
//!

use bimap::BiMap;
use glam::Mat4;
use glam_ext::Transform3A;

use crate::base::{RigError, RigIndex, SKELETON_MAX_BONES, SKELETON_NO_PARENT};
use crate::math::mat4_to_transform;

/// A node of the bone hierarchy.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bone {
    /// Bone name, unique inside a skeleton.
    pub name: String,
    /// Parent bone index, `SKELETON_NO_PARENT` for roots.
    pub parent: i32,
    /// Child bone indices, derived from parents by `Skeleton::new`.
    pub children: Vec<usize>,
    /// Transforms mesh space vertices into bone space.
    pub inverse_bind_matrix: Mat4,
    /// Local rest transform, relative to the parent bone.
    pub local_transform: Mat4,
}

impl Bone {
    /// Creates a bone without children, they are filled in by `Skeleton::new`.
    pub fn new(name: impl Into<String>, parent: i32, local_transform: Mat4, inverse_bind_matrix: Mat4) -> Bone {
        return Bone {
            name: name.into(),
            parent,
            children: Vec::new(),
            inverse_bind_matrix,
            local_transform,
        };
    }

    /// Test if the bone is a hierarchy root.
    #[inline]
    pub fn is_root(&self) -> bool {
        return self.parent < 0;
    }
}

///
/// Runtime skeleton: bone hierarchy, bone names, rest pose and skinning matrices.
///
/// Bones form a forest. The hierarchy is walked by recursive descent from the roots, so
/// parents are always composed before their children whatever the bone order is.
///
#[derive(Debug, Clone)]
pub struct Skeleton {
    bones: Vec<Bone>,
    bone_names: BiMap<String, usize>,
    roots: Vec<usize>,
    rest_pose: Vec<Transform3A>,
    final_matrices: Vec<Mat4>,
}

impl Skeleton {
    /// Builds a skeleton from bones.
    ///
    /// Children lists are rebuilt from parent indices. A parent index out of range, or pointing
    /// to the bone itself, turns the bone into a root.
    pub fn new(mut bones: Vec<Bone>) -> Result<Skeleton, RigError> {
        if bones.len() > SKELETON_MAX_BONES {
            return Err(RigError::InvalidIndex);
        }

        let count = bones.len();
        for bone in bones.iter_mut() {
            bone.children.clear();
        }

        let mut roots = Vec::new();
        for idx in 0..count {
            let parent = bones[idx].parent;
            if parent < 0 {
                roots.push(idx);
            } else if parent as usize >= count || parent as usize == idx {
                log::warn!("Bone '{}' has invalid parent {}, treated as root", bones[idx].name, parent);
                bones[idx].parent = SKELETON_NO_PARENT;
                roots.push(idx);
            } else {
                bones[parent as usize].children.push(idx);
            }
        }

        let mut bone_names = BiMap::new();
        for (idx, bone) in bones.iter().enumerate() {
            if bone_names.insert_no_overwrite(bone.name.clone(), idx).is_err() {
                log::warn!("Duplicated bone name '{}', index {} isn't reachable by name", bone.name, idx);
            }
        }

        let rest_pose = bones.iter().map(|b| mat4_to_transform(&b.local_transform)).collect();

        let mut skeleton = Skeleton {
            bones,
            bone_names,
            roots,
            rest_pose,
            final_matrices: vec![Mat4::IDENTITY; count],
        };
        skeleton.update_final_matrices();
        return Ok(skeleton);
    }
}

impl Skeleton {
    /// Gets the number of bones of `Skeleton`.
    #[inline]
    pub fn num_bones(&self) -> usize {
        return self.bones.len();
    }

    /// Gets bones.
    #[inline]
    pub fn bones(&self) -> &[Bone] {
        return &self.bones;
    }

    /// Gets a bone by index.
    #[inline]
    pub fn bone(&self, idx: impl RigIndex) -> Option<&Bone> {
        return self.bones.get(idx.usize());
    }

    /// Gets bone's parent by index, `SKELETON_NO_PARENT` for roots and invalid indices.
    #[inline]
    pub fn bone_parent(&self, idx: impl RigIndex) -> i32 {
        return self.bones.get(idx.usize()).map(|b| b.parent).unwrap_or(SKELETON_NO_PARENT);
    }

    /// Gets root bone indices.
    #[inline]
    pub fn roots(&self) -> &[usize] {
        return &self.roots;
    }

    /// Gets bone's name map.
    #[inline]
    pub fn bone_names(&self) -> &BiMap<String, usize> {
        return &self.bone_names;
    }

    /// Gets bone's index by name.
    #[inline]
    pub fn bone_by_name(&self, name: &str) -> Option<usize> {
        return self.bone_names.get_by_left(name).copied();
    }

    /// Gets bone's name by index.
    #[inline]
    pub fn bone_name(&self, idx: impl RigIndex) -> Option<&str> {
        return self.bone_names.get_by_right(&idx.usize()).map(|s| s.as_str());
    }

    /// Gets the decomposed local rest transforms.
    #[inline]
    pub fn rest_pose(&self) -> &[Transform3A] {
        return &self.rest_pose;
    }

    /// Gets skinning matrices computed by the last `update_final_matrices`.
    #[inline]
    pub fn final_matrices(&self) -> &[Mat4] {
        return &self.final_matrices;
    }

    /// Test if `ancestor` is a strict ancestor of `bone`.
    pub fn is_ancestor(&self, ancestor: impl RigIndex, bone: impl RigIndex) -> bool {
        let ancestor = ancestor.i32();
        let mut current = self.bone_parent(bone.usize());
        let mut guard = 0;
        while current >= 0 && guard <= self.bones.len() {
            if current == ancestor {
                return true;
            }
            current = self.bone_parent(current);
            guard += 1;
        }
        return false;
    }

    /// Iterates through the bone hierarchy in depth-first order.
    ///
    /// * `from` - The bone index to start from. If negative, the iteration covers every root.
    /// * `f` - The function to call for each bone. The function takes arguments `(bone: usize, parent: i32)`.
    pub fn iter_depth_first<F>(&self, from: impl RigIndex, mut f: F)
    where
        F: FnMut(usize, i32),
    {
        let mut stack: Vec<usize> = Vec::with_capacity(self.bones.len());
        if from.i32() < 0 {
            stack.extend(self.roots.iter().rev());
        } else if from.usize() < self.bones.len() {
            stack.push(from.usize());
        }
        while let Some(idx) = stack.pop() {
            let bone = &self.bones[idx];
            f(idx, bone.parent);
            stack.extend(bone.children.iter().rev());
        }
    }

    /// Recomputes `final_matrices` from the bones' local rest transforms.
    ///
    /// Safe to call again after any local transform edit, the output length always matches
    /// the bone count.
    pub fn update_final_matrices(&mut self) {
        let locals: Vec<Mat4> = self.bones.iter().map(|b| b.local_transform).collect();
        let mut globals = Vec::new();
        let mut finals = std::mem::take(&mut self.final_matrices);
        self.compute_global_matrices(&locals, &mut globals, &mut finals);
        self.final_matrices = finals;
    }

    /// Sets the local rest transform of a bone. Invalid indices are ignored.
    pub fn set_local_transform(&mut self, idx: impl RigIndex, local: Mat4) {
        let idx = idx.usize();
        match self.bones.get_mut(idx) {
            Some(bone) => {
                bone.local_transform = local;
                self.rest_pose[idx] = mat4_to_transform(&local);
            }
            None => log::warn!("Skeleton::set_local_transform() invalid bone {}", idx),
        }
    }

    ///
    /// Composes local matrices into model space (`globals`) and skinning (`finals`) matrices.
    ///
    /// For each root, recursively `global = parent_global * local` and
    /// `final = global * inverse_bind`. Missing local matrices count as identity. Both outputs
    /// are resized to the bone count.
    ///
    pub fn compute_global_matrices(&self, locals: &[Mat4], globals: &mut Vec<Mat4>, finals: &mut Vec<Mat4>) {
        globals.resize(self.bones.len(), Mat4::IDENTITY);
        finals.resize(self.bones.len(), Mat4::IDENTITY);
        for &root in &self.roots {
            self.compose_bone(root, &Mat4::IDENTITY, locals, globals, finals);
        }
    }

    fn compose_bone(&self, idx: usize, parent: &Mat4, locals: &[Mat4], globals: &mut [Mat4], finals: &mut [Mat4]) {
        let local = locals.get(idx).copied().unwrap_or(Mat4::IDENTITY);
        let global = *parent * local;
        globals[idx] = global;
        finals[idx] = global * self.bones[idx].inverse_bind_matrix;
        for &child in &self.bones[idx].children {
            self.compose_bone(child, &global, locals, globals, finals);
        }
    }
}
