//!
//! Detection of clip events crossed during a time step, and deduplication of fired events.
//!

use std::rc::Rc;
use std::sync::Arc;

use crate::animation::{AnimationClip, AnimationEvent};
use crate::base::{RigError, RigObj};
use crate::clip_library::ClipHandle;
use crate::config::DEFAULT_EVENT_LOG_CAPACITY;

/// Playback slot an event comes from. Two slots playing the same clip fire independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    /// The animator main clip.
    Main,
    /// The clip faded in by a crossfade.
    Crossfade,
    /// The dominant clip of the animator blend tree.
    BlendTree,
    /// An animator layer, by layer id.
    Layer(u32),
    /// A state machine layer, by layer index.
    StateLayer(usize),
}

/// An event crossed by the playback head, queued for the application.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredEvent {
    pub source: EventSource,
    pub clip: ClipHandle,
    pub event: AnimationEvent,
}

///
/// Finds the events of a clip crossed when moving the playback head from `from` to `to`.
///
/// Both times are in `[0, duration]`. Moving forward tests the half open window `[from, to)`.
/// When `to < from` the head wrapped around the clip end, and the windows `[from, duration]`
/// then `[0, to)` are tested.
///
#[derive(Debug)]
pub struct EventTriggeringJob<A = Rc<AnimationClip>>
where
    A: RigObj<AnimationClip>,
{
    clip: Option<A>,
    from: f32,
    to: f32,
}

pub type EventTriggeringJobRef<'t> = EventTriggeringJob<&'t AnimationClip>;
pub type EventTriggeringJobRc = EventTriggeringJob<Rc<AnimationClip>>;
pub type EventTriggeringJobArc = EventTriggeringJob<Arc<AnimationClip>>;

impl<A> Default for EventTriggeringJob<A>
where
    A: RigObj<AnimationClip>,
{
    fn default() -> EventTriggeringJob<A> {
        return EventTriggeringJob {
            clip: None,
            from: 0.0,
            to: 0.0,
        };
    }
}

impl<A> EventTriggeringJob<A>
where
    A: RigObj<AnimationClip>,
{
    /// Gets clip of `EventTriggeringJob`.
    #[inline]
    pub fn clip(&self) -> Option<&A> {
        return self.clip.as_ref();
    }

    /// Sets clip of `EventTriggeringJob`.
    #[inline]
    pub fn set_clip(&mut self, clip: A) {
        self.clip = Some(clip);
    }

    /// Clears clip of `EventTriggeringJob`.
    #[inline]
    pub fn clear_clip(&mut self) {
        self.clip = None;
    }

    /// Gets from of `EventTriggeringJob`.
    #[inline]
    pub fn from(&self) -> f32 {
        return self.from;
    }

    /// Sets from of `EventTriggeringJob`, the previous playback time in seconds.
    #[inline]
    pub fn set_from(&mut self, from: f32) {
        self.from = from;
    }

    /// Gets to of `EventTriggeringJob`.
    #[inline]
    pub fn to(&self) -> f32 {
        return self.to;
    }

    /// Sets to of `EventTriggeringJob`, the current playback time in seconds.
    #[inline]
    pub fn set_to(&mut self, to: f32) {
        self.to = to;
    }

    /// Test if the step wrapped around the clip end.
    #[inline]
    pub fn wrapped(&self) -> bool {
        return self.to < self.from;
    }

    /// Validates `EventTriggeringJob` parameters.
    #[inline]
    pub fn validate(&self) -> bool {
        return self.clip.is_some() && self.from.is_finite() && self.to.is_finite();
    }

    /// Runs event triggering job's task.
    /// The validate job before any operation is performed.
    ///
    /// Returns the indices of the crossed events, in firing order.
    pub fn run(&self) -> Result<Vec<usize>, RigError> {
        if !self.validate() {
            return Err(RigError::InvalidJob);
        }
        let clip = match &self.clip {
            Some(clip) => clip.obj(),
            None => return Err(RigError::InvalidJob),
        };

        let events = clip.events();
        let mut fired = Vec::new();
        if self.wrapped() {
            let duration = clip.duration();
            fired.extend((0..events.len()).filter(|&i| events[i].time >= self.from && events[i].time <= duration));
            fired.extend((0..events.len()).filter(|&i| events[i].time < self.to));
        } else {
            fired.extend((0..events.len()).filter(|&i| events[i].time >= self.from && events[i].time < self.to));
        }
        return Ok(fired);
    }
}

///
/// Bounded memory of fired events, so that an event is not fired twice during the same pass
/// over the clip.
///
/// Entries of a playback slot are forgotten when it wraps. The whole log is cleared once it
/// reaches its capacity.
///
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: Vec<(EventSource, ClipHandle, usize)>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> EventLog {
        return EventLog::new(DEFAULT_EVENT_LOG_CAPACITY);
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> EventLog {
        return EventLog {
            entries: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        };
    }

    #[inline]
    pub fn len(&self) -> usize {
        return self.entries.len();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        return self.entries.is_empty();
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        return self.capacity;
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        if self.entries.len() >= self.capacity {
            self.entries.clear();
        }
    }

    /// Records an event, returns false if it was already recorded.
    pub fn record(&mut self, source: EventSource, clip: ClipHandle, index: usize) -> bool {
        let key = (source, clip, index);
        if self.entries.contains(&key) {
            return false;
        }
        if self.entries.len() >= self.capacity {
            self.entries.clear();
        }
        self.entries.push(key);
        return true;
    }

    /// Forgets every event fired by `source`.
    pub fn clear_source(&mut self, source: EventSource) {
        self.entries.retain(|(s, _, _)| *s != source);
    }

    /// Forgets the events of `clip` fired by `source`.
    pub fn clear_clip(&mut self, source: EventSource, clip: ClipHandle) {
        self.entries.retain(|(s, c, _)| *s != source || *c != clip);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

///
/// Collects the events of `clip` crossed between `from` and `to` into `out`.
///
/// Events already in `log` for this pass are skipped. A wrap (`to < from`) starts a new pass.
///
pub fn collect_events(
    log: &mut EventLog,
    source: EventSource,
    handle: ClipHandle,
    clip: &AnimationClip,
    from: f32,
    to: f32,
    out: &mut Vec<FiredEvent>,
) -> Result<(), RigError> {
    let mut job = EventTriggeringJobRef::default();
    job.set_clip(clip);
    job.set_from(from);
    job.set_to(to);
    let indices = job.run()?;

    if job.wrapped() {
        // events before the wrap point belong to the previous pass
        let split = indices.iter().position(|&i| clip.events()[i].time < from).unwrap_or(indices.len());
        for &idx in &indices[..split] {
            if log.record(source, handle, idx) {
                out.push(FiredEvent {
                    source,
                    clip: handle,
                    event: clip.events()[idx].clone(),
                });
            }
        }
        log.clear_source(source);
        for &idx in &indices[split..] {
            if log.record(source, handle, idx) {
                out.push(FiredEvent {
                    source,
                    clip: handle,
                    event: clip.events()[idx].clone(),
                });
            }
        }
    } else {
        for idx in indices {
            if log.record(source, handle, idx) {
                out.push(FiredEvent {
                    source,
                    clip: handle,
                    event: clip.events()[idx].clone(),
                });
            }
        }
    }
    return Ok(());
}
