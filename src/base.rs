//!
//! Base types, traits and utils.
//!

use std::fmt::Debug;
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;

/// Rig error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RigError {
    /// Validates job failed.
    #[error("Invalid job")]
    InvalidJob,
    /// Invalid bone, layer, chain or state index.
    #[error("Invalid index")]
    InvalidIndex,
    /// Clip handle is stale, or the clip doesn't fit the consumer.
    #[error("Invalid clip")]
    InvalidClip,
    /// Two poses that must be combined have different bone counts.
    #[error("Mismatched bone count: expected {expected}, actual {actual}")]
    MismatchedBoneCount { expected: usize, actual: usize },
    /// Keyframe track data is inconsistent.
    #[error("Invalid track: {0}")]
    InvalidTrack(String),
}

impl RigError {
    pub fn is_invalid_job(&self) -> bool {
        matches!(self, RigError::InvalidJob)
    }

    pub fn is_invalid_index(&self) -> bool {
        matches!(self, RigError::InvalidIndex)
    }

    pub fn is_invalid_clip(&self) -> bool {
        matches!(self, RigError::InvalidClip)
    }

    pub fn is_mismatched_bone_count(&self) -> bool {
        matches!(self, RigError::MismatchedBoneCount { .. })
    }

    pub fn is_invalid_track(&self) -> bool {
        matches!(self, RigError::InvalidTrack(_))
    }
}

/// Defines the maximum number of bones.
/// Keeps stack usage of per-bone scratch bounded, and matches the size of the
/// skinning palette accepted by the renderer.
pub const SKELETON_MAX_BONES: usize = 1024;

/// Defines the index of the parent of a root bone (which has no parent in fact).
pub const SKELETON_NO_PARENT: i32 = -1;

/// Allow usize/i32/i16 use as rig index.
pub trait RigIndex {
    fn usize(&self) -> usize;
    fn i32(&self) -> i32;
}

macro_rules! rig_index {
    ($type:ty) => {
        impl RigIndex for $type {
            #[inline(always)]
            fn usize(&self) -> usize {
                *self as usize
            }

            #[inline(always)]
            fn i32(&self) -> i32 {
                *self as i32
            }
        }
    };
}

rig_index!(usize);
rig_index!(u32);
rig_index!(i32);
rig_index!(i16);

/// Represents a non-owning reference to a rig resource object.
/// `T` usually is `Skeleton`.
///
/// We use `RigObj` to support `T`, `&T`, `Rc<T>` and `Arc<T>` at same time.
/// Or you can implement this trait to support your own reference type.
pub trait RigObj<T: Debug> {
    fn obj(&self) -> &T;
}

impl<T: Debug> RigObj<T> for T {
    #[inline(always)]
    fn obj(&self) -> &T {
        self
    }
}

impl<T: Debug> RigObj<T> for &T {
    #[inline(always)]
    fn obj(&self) -> &T {
        self
    }
}

impl<T: Debug> RigObj<T> for Rc<T> {
    #[inline(always)]
    fn obj(&self) -> &T {
        self.as_ref()
    }
}

impl<T: Debug> RigObj<T> for Arc<T> {
    #[inline(always)]
    fn obj(&self) -> &T {
        self.as_ref()
    }
}

/// A boxed user hook that can live inside `Debug` structures.
pub struct Hook<A: ?Sized>(Box<dyn FnMut(&A)>);

impl<A: ?Sized> Hook<A> {
    /// Wraps a closure.
    pub fn new<F: FnMut(&A) + 'static>(f: F) -> Hook<A> {
        return Hook(Box::new(f));
    }

    #[inline]
    pub fn call(&mut self, arg: &A) {
        (self.0)(arg);
    }
}

impl<A: ?Sized> Debug for Hook<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return f.write_str("Hook");
    }
}
