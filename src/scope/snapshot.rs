//! Snapshot - The finalized frame tree of a finished build.
//!
//! Snapshots are immutable and cheap to clone (shared pointer). They are
//! `Send + Sync`, so builder threads can all read the same snapshot as the
//! "previous" input of their own sessions.

use std::collections::HashMap;
use std::sync::Arc;

use super::frame::Frame;
use super::identifier::Identifier;
use crate::component::ComponentClass;

/// What happened during the build that produced a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// Frames pushed (root excluded).
    pub frames: usize,
    /// Frames whose state was carried over from the previous snapshot.
    pub carried: usize,
    /// Frames that had pending updates folded in.
    pub updated: usize,
    /// Identifiers with pending updates that never got a frame, sorted.
    pub orphaned_updates: Vec<Identifier>,
}

#[derive(Debug)]
struct SnapshotInner {
    root: Arc<Frame>,
    index: HashMap<Identifier, Arc<Frame>>,
    generation: u64,
    summary: BuildSummary,
}

/// Immutable frame tree produced by [`Session::end`](crate::Session::end).
#[derive(Debug, Clone)]
pub struct Snapshot(Arc<SnapshotInner>);

impl Snapshot {
    pub(crate) fn finalize(root: Frame, generation: u64, summary: BuildSummary) -> Self {
        let root = Arc::new(root);
        let mut index = HashMap::new();
        let mut pending: Vec<&Arc<Frame>> = root.children().iter().rev().collect();
        while let Some(frame) = pending.pop() {
            index.insert(frame.identifier().clone(), frame.clone());
            pending.extend(frame.children().iter().rev());
        }

        Self(Arc::new(SnapshotInner {
            root,
            index,
            generation,
            summary,
        }))
    }

    /// The stateless root frame.
    pub fn root(&self) -> &Arc<Frame> {
        &self.0.root
    }

    pub fn get(&self, identifier: &Identifier) -> Option<&Arc<Frame>> {
        self.0.index.get(identifier)
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.0.index.contains_key(identifier)
    }

    /// Typed state of the frame for `identifier`.
    pub fn state<T: 'static>(&self, identifier: &Identifier) -> Option<&T> {
        self.get(identifier).and_then(|frame| frame.state_as::<T>())
    }

    /// Number of frames, root excluded.
    pub fn len(&self) -> usize {
        self.0.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.index.is_empty()
    }

    /// 1 for the first build, previous generation + 1 afterwards.
    pub fn generation(&self) -> u64 {
        self.0.generation
    }

    pub fn summary(&self) -> &BuildSummary {
        &self.0.summary
    }

    /// Visit every frame depth-first in build order, root excluded.
    ///
    /// The callback receives the frame and its depth (1 for root children).
    pub fn walk(&self, mut visit: impl FnMut(&Frame, usize)) {
        let mut pending: Vec<(&Arc<Frame>, usize)> =
            self.0.root.children().iter().rev().map(|frame| (frame, 1)).collect();
        while let Some((frame, depth)) = pending.pop() {
            visit(&**frame, depth);
            pending.extend(frame.children().iter().rev().map(|child| (child, depth + 1)));
        }
    }

    /// All identifiers, depth-first in build order.
    pub fn identifiers(&self) -> Vec<Identifier> {
        let mut identifiers = Vec::with_capacity(self.len());
        self.walk(|frame, _| identifiers.push(frame.identifier().clone()));
        identifiers
    }

    /// Frames that declare a controller, depth-first.
    pub fn controllers(&self) -> Vec<(Identifier, ComponentClass)> {
        let mut controllers = Vec::new();
        self.walk(|frame, _| {
            if let Some(controller) = frame.controller() {
                controllers.push((frame.identifier().clone(), controller));
            }
        });
        controllers
    }

    /// True if both handles refer to the same snapshot.
    pub fn ptr_eq(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
