//! Pending state updates queued between builds.

use std::collections::HashMap;

use super::identifier::Identifier;
use crate::component::StateUpdate;

/// Read-only input to a session: identifier → ordered state mutations.
///
/// A session folds each entry into the frame with the same identifier, once.
/// Entries whose component does not appear are reported as orphaned.
#[derive(Debug, Clone, Default)]
pub struct PendingUpdates {
    updates: HashMap<Identifier, Vec<StateUpdate>>,
}

impl PendingUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `update` after any already queued for `identifier`.
    pub fn enqueue(&mut self, identifier: Identifier, update: StateUpdate) {
        self.updates.entry(identifier).or_default().push(update);
    }

    /// Builder form of [`enqueue`](Self::enqueue).
    pub fn with(mut self, identifier: Identifier, update: StateUpdate) -> Self {
        self.enqueue(identifier, update);
        self
    }

    /// Updates for `identifier`, in enqueue order.
    pub fn get(&self, identifier: &Identifier) -> &[StateUpdate] {
        self.updates.get(identifier).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.updates.contains_key(identifier)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &Identifier> {
        self.updates.keys()
    }

    /// Number of identifiers with queued updates.
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}
