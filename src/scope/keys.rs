//! Key Stack - Caller-supplied disambiguators for keyed children.
//!
//! Every key push opens a matching key scope in the identity allocator, so
//! the stack depth here always equals the number of open key scopes.

use crate::component::Key;
use crate::error::{ScopeError, ScopeResult};

#[derive(Debug, Default)]
pub struct KeyStack {
    keys: Vec<Key>,
}

impl KeyStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: Key) {
        self.keys.push(key);
    }

    pub fn pop(&mut self) -> ScopeResult<Key> {
        self.keys
            .pop()
            .ok_or_else(|| ScopeError::violation("pop_key with empty key stack"))
    }

    /// Innermost active key.
    pub fn top(&self) -> Option<&Key> {
        self.keys.last()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
