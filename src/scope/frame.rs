//! Scope Frames - State containers mirroring the component tree.
//!
//! During a build the [`ScopeFrameStack`] holds one entry per open component:
//! - the frame with the same identifier from the previous snapshot (if any)
//! - the new frame being assembled (state + finished children)
//!
//! Popping an entry freezes its new frame and attaches it to the entry below.
//! The bottom entry is the root frame and is only taken by [`ScopeFrameStack::finish`].

use std::collections::HashSet;
use std::sync::Arc;

use super::identifier::Identifier;
use super::snapshot::Snapshot;
use super::updates::PendingUpdates;
use crate::component::{ComponentClass, StateValue};
use crate::error::{ScopeError, ScopeResult};

// =============================================================================
// Frame Origin (bitflags)
// =============================================================================

bitflags::bitflags! {
    /// Where a frame's state came from.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameOrigin: u8 {
        /// Carried over from the previous snapshot.
        const CARRIED = 1 << 0;
        /// First appearance, seeded from the initial state.
        const SEEDED = 1 << 1;
        /// Pending updates were folded in.
        const UPDATED = 1 << 2;
    }
}

// =============================================================================
// Frame
// =============================================================================

/// Finalized frame. Immutable once built.
#[derive(Debug)]
pub struct Frame {
    identifier: Identifier,
    controller: Option<ComponentClass>,
    state: Option<StateValue>,
    origin: FrameOrigin,
    children: Vec<Arc<Frame>>,
}

impl Frame {
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn class(&self) -> Option<ComponentClass> {
        self.identifier.class()
    }

    pub fn controller(&self) -> Option<ComponentClass> {
        self.controller
    }

    pub fn state(&self) -> Option<&StateValue> {
        self.state.as_ref()
    }

    /// Typed view of the state.
    pub fn state_as<T: 'static>(&self) -> Option<&T> {
        self.state.as_ref().and_then(|state| state.downcast_ref::<T>())
    }

    pub fn origin(&self) -> FrameOrigin {
        self.origin
    }

    /// Child frames in build order. Empty for leaves.
    pub fn children(&self) -> &[Arc<Frame>] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// The previous/new pair for the innermost open frame.
#[derive(Debug, Clone)]
pub struct FramePair {
    pub identifier: Identifier,
    /// Same-identifier frame from the previous snapshot.
    pub previous: Option<Arc<Frame>>,
    /// State of the new frame so far.
    pub state: Option<StateValue>,
    pub origin: FrameOrigin,
}

impl FramePair {
    pub fn state_as<T: 'static>(&self) -> Option<&T> {
        self.state.as_ref().and_then(|state| state.downcast_ref::<T>())
    }

    pub fn previous_state_as<T: 'static>(&self) -> Option<&T> {
        self.previous.as_deref().and_then(|frame| frame.state_as::<T>())
    }
}

// =============================================================================
// Frame Stack
// =============================================================================

#[derive(Debug)]
struct OpenFrame {
    identifier: Identifier,
    controller: Option<ComponentClass>,
    previous: Option<Arc<Frame>>,
    state: Option<StateValue>,
    origin: FrameOrigin,
    children: Vec<Arc<Frame>>,
}

impl OpenFrame {
    fn pair(&self) -> FramePair {
        FramePair {
            identifier: self.identifier.clone(),
            previous: self.previous.clone(),
            state: self.state.clone(),
            origin: self.origin,
        }
    }

    fn freeze(self) -> Frame {
        Frame {
            identifier: self.identifier,
            controller: self.controller,
            state: self.state,
            origin: self.origin,
            children: self.children,
        }
    }
}

/// Counters collected while frames are pushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounts {
    pub frames: usize,
    pub carried: usize,
    pub updated: usize,
}

/// Stack of open frames for one session.
#[derive(Debug)]
pub struct ScopeFrameStack {
    stack: Vec<OpenFrame>,
    pushed: HashSet<Identifier>,
    consumed: HashSet<Identifier>,
    counts: FrameCounts,
}

impl ScopeFrameStack {
    /// Stack holding only the root frame.
    pub fn new(previous: Option<&Snapshot>) -> Self {
        let root = OpenFrame {
            identifier: Identifier::root(),
            controller: None,
            previous: previous.map(|snapshot| snapshot.root().clone()),
            state: None,
            origin: FrameOrigin::empty(),
            children: Vec::new(),
        };
        Self {
            stack: vec![root],
            pushed: HashSet::new(),
            consumed: HashSet::new(),
            counts: FrameCounts::default(),
        }
    }

    /// Open frames above the root.
    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Fail if a frame for `identifier` cannot be pushed: bookkeeping
    /// identifiers hold no state, and each frame is pushed once per session.
    pub fn check_push(&self, identifier: &Identifier) -> ScopeResult<()> {
        if !identifier.is_stateful() {
            return Err(ScopeError::violation(format!(
                "frame pushed for bookkeeping identifier `{identifier}`"
            )));
        }
        if self.pushed.contains(identifier) {
            return Err(ScopeError::violation(format!(
                "frame `{identifier}` pushed twice in one session"
            )));
        }
        Ok(())
    }

    /// Open a frame for `identifier`.
    ///
    /// State is the previous snapshot's state for the identifier, or
    /// `initial()` on first appearance, with this identifier's pending
    /// updates folded in order.
    pub fn push_frame(
        &mut self,
        identifier: Identifier,
        controller: Option<ComponentClass>,
        initial: impl FnOnce() -> Option<StateValue>,
        previous: Option<&Snapshot>,
        pending: &PendingUpdates,
    ) -> ScopeResult<FramePair> {
        self.check_push(&identifier)?;
        self.pushed.insert(identifier.clone());

        let previous = previous.and_then(|snapshot| snapshot.get(&identifier)).cloned();
        let (mut state, mut origin) = match &previous {
            Some(frame) => (frame.state().cloned(), FrameOrigin::CARRIED),
            None => (initial(), FrameOrigin::SEEDED),
        };

        let updates = pending.get(&identifier);
        if !updates.is_empty() && self.consumed.insert(identifier.clone()) {
            for update in updates {
                state = update.apply(state);
            }
            origin |= FrameOrigin::UPDATED;
            self.counts.updated += 1;
        }

        self.counts.frames += 1;
        if origin.contains(FrameOrigin::CARRIED) {
            self.counts.carried += 1;
        }

        tracing::trace!(%identifier, ?origin, depth = self.stack.len(), "push frame");
        let frame = OpenFrame {
            identifier,
            controller,
            previous,
            state,
            origin,
            children: Vec::new(),
        };
        let pair = frame.pair();
        self.stack.push(frame);
        Ok(pair)
    }

    /// Close the innermost frame and attach it to its parent.
    pub fn pop_frame(&mut self) -> ScopeResult<Identifier> {
        // The root entry is only taken by `finish`.
        if self.stack.len() < 2 {
            return Err(ScopeError::violation("pop_frame with no open frame"));
        }
        let Some(frame) = self.stack.pop() else {
            return Err(ScopeError::violation("pop_frame with no open frame"));
        };
        let identifier = frame.identifier.clone();
        tracing::trace!(%identifier, "pop frame");

        let parent = self.top_mut();
        parent.children.push(Arc::new(frame.freeze()));
        Ok(identifier)
    }

    fn top(&self) -> &OpenFrame {
        &self.stack[self.stack.len() - 1]
    }

    fn top_mut(&mut self) -> &mut OpenFrame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    /// Previous/new pair of the innermost open frame (the root at depth 0).
    pub fn current_frame_pair(&self) -> FramePair {
        self.top().pair()
    }

    /// Replace the innermost frame's new state.
    pub fn set_state(&mut self, state: Option<StateValue>) -> ScopeResult<()> {
        if self.stack.len() == 1 {
            return Err(ScopeError::violation("set_state on the root frame"));
        }
        self.top_mut().state = state;
        Ok(())
    }

    /// Identifiers whose pending updates were folded.
    pub fn consumed(&self) -> &HashSet<Identifier> {
        &self.consumed
    }

    pub fn counts(&self) -> FrameCounts {
        self.counts
    }

    /// Take the finished root frame. Every pushed frame must be popped.
    pub fn finish(&mut self) -> ScopeResult<Frame> {
        if self.stack.len() != 1 {
            return Err(ScopeError::violation(format!(
                "{} frame(s) still open at session end, innermost `{}`",
                self.depth(),
                self.top().identifier
            )));
        }
        let Some(root) = self.stack.pop() else {
            return Err(ScopeError::violation("session already finished"));
        };
        Ok(root.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::IdentityAllocator;
    use crate::component::StateUpdate;

    const COUNTER: ComponentClass = ComponentClass::named("Counter");

    fn seed(value: u32) -> impl FnOnce() -> Option<StateValue> {
        move || Some(StateValue::new(value))
    }

    #[test]
    fn test_push_seeds_first_appearance() {
        let mut alloc = IdentityAllocator::new();
        let mut frames = ScopeFrameStack::new(None);
        let id = alloc.next(COUNTER, true);

        let pair = frames
            .push_frame(id.clone(), None, seed(5), None, &PendingUpdates::new())
            .unwrap();
        assert!(pair.previous.is_none());
        assert_eq!(pair.state_as::<u32>(), Some(&5));
        assert_eq!(pair.origin, FrameOrigin::SEEDED);
        assert_eq!(frames.depth(), 1);

        assert_eq!(frames.pop_frame().unwrap(), id);
        let root = frames.finish().unwrap();
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.children()[0].state_as::<u32>(), Some(&5));
        assert!(root.children()[0].is_leaf());
    }

    #[test]
    fn test_updates_fold_once() {
        let mut alloc = IdentityAllocator::new();
        let mut frames = ScopeFrameStack::new(None);
        let id = alloc.next(COUNTER, true);
        let pending = PendingUpdates::new()
            .with(id.clone(), StateUpdate::map(|n: &u32| n + 1))
            .with(id.clone(), StateUpdate::map(|n: &u32| n * 3));

        let pair = frames.push_frame(id.clone(), None, seed(1), None, &pending).unwrap();
        assert_eq!(pair.state_as::<u32>(), Some(&6));
        assert_eq!(pair.origin, FrameOrigin::SEEDED | FrameOrigin::UPDATED);
        assert!(frames.consumed().contains(&id));
        assert_eq!(frames.counts().updated, 1);
    }

    #[test]
    fn test_set_state() {
        let mut alloc = IdentityAllocator::new();
        let mut frames = ScopeFrameStack::new(None);
        assert!(frames.set_state(None).is_err());

        let id = alloc.next(COUNTER, true);
        frames.push_frame(id, None, seed(1), None, &PendingUpdates::new()).unwrap();
        frames.set_state(Some(StateValue::new(9u32))).unwrap();
        assert_eq!(frames.current_frame_pair().state_as::<u32>(), Some(&9));
    }

    #[test]
    fn test_protocol_violations() {
        let mut alloc = IdentityAllocator::new();
        let mut frames = ScopeFrameStack::new(None);
        let pending = PendingUpdates::new();

        assert!(frames.pop_frame().is_err());

        let bookkeeping = alloc.next(COUNTER, false);
        assert!(frames.push_frame(bookkeeping, None, seed(0), None, &pending).is_err());

        let id = alloc.next(COUNTER, true);
        frames.push_frame(id.clone(), None, seed(0), None, &pending).unwrap();
        frames.pop_frame().unwrap();
        assert!(frames.push_frame(id.clone(), None, seed(0), None, &pending).is_err());

        let other = alloc.next(COUNTER, true);
        frames.push_frame(other, None, seed(0), None, &pending).unwrap();
        assert!(frames.finish().is_err());
    }

    #[test]
    fn test_root_pair() {
        let frames = ScopeFrameStack::new(None);
        let pair = frames.current_frame_pair();
        assert!(pair.identifier.is_root());
        assert!(pair.state.is_none());
        assert!(pair.previous.is_none());
    }
}
