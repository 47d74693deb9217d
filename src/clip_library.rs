//!
//! Registry of animation clips, addressed by generational handles.
//!

use slotmap::{new_key_type, SlotMap};

use crate::animation::AnimationClip;

new_key_type! {
    /// Handle to a clip registered in a `ClipLibrary`.
    ///
    /// A handle outlives its clip safely: once the clip is removed, lookups return `None`.
    pub struct ClipHandle;
}

/// Owns animation clips. Animators and state machines refer to clips by `ClipHandle` and get
/// the library passed on every update.
#[derive(Debug, Default, Clone)]
pub struct ClipLibrary {
    clips: SlotMap<ClipHandle, AnimationClip>,
}

impl ClipLibrary {
    pub fn new() -> ClipLibrary {
        return ClipLibrary::default();
    }

    /// Registers a clip.
    pub fn insert(&mut self, clip: AnimationClip) -> ClipHandle {
        return self.clips.insert(clip);
    }

    /// Unregisters a clip, handles to it become dangling.
    pub fn remove(&mut self, handle: ClipHandle) -> Option<AnimationClip> {
        return self.clips.remove(handle);
    }

    #[inline]
    pub fn get(&self, handle: ClipHandle) -> Option<&AnimationClip> {
        return self.clips.get(handle);
    }

    #[inline]
    pub fn contains(&self, handle: ClipHandle) -> bool {
        return self.clips.contains_key(handle);
    }

    /// Finds the first clip named `name`.
    pub fn find_by_name(&self, name: &str) -> Option<ClipHandle> {
        return self.clips.iter().find(|(_, clip)| clip.name() == name).map(|(handle, _)| handle);
    }

    #[inline]
    pub fn len(&self) -> usize {
        return self.clips.len();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        return self.clips.is_empty();
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClipHandle, &AnimationClip)> {
        return self.clips.iter();
    }

    pub fn clear(&mut self) {
        self.clips.clear();
    }
}

#[cfg(test)]
mod tests {
    use slotmap::Key;
    use wasm_bindgen_test::*;

    use super::*;
    use crate::animation::AnimationType;

    #[test]
    #[wasm_bindgen_test]
    fn test_library() {
        let mut library = ClipLibrary::new();
        assert!(library.is_empty());

        let idle = library.insert(AnimationClip::new("idle", 1.0, AnimationType::Skeletal));
        let run = library.insert(AnimationClip::new("run", 0.5, AnimationType::Skeletal));
        assert_eq!(library.len(), 2);
        assert_eq!(library.get(run).map(|c| c.duration()), Some(0.5));
        assert_eq!(library.find_by_name("idle"), Some(idle));
        assert_eq!(library.find_by_name("jump"), None);

        assert!(library.remove(idle).is_some());
        assert!(!library.contains(idle));
        assert!(library.get(idle).is_none());

        let jump = library.insert(AnimationClip::new("jump", 1.0, AnimationType::Skeletal));
        assert_ne!(jump, idle);
        assert!(library.get(idle).is_none());

        assert!(ClipHandle::null().is_null());
        assert!(library.get(ClipHandle::null()).is_none());
    }
}
