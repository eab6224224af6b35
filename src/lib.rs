//! # spark-scope
//!
//! Deterministic component identity and state scoping for declarative tree builds.
//!
//! A UI tree is rebuilt from scratch on every change. For component state to
//! survive a rebuild, each component needs a name that comes out the same
//! every time the same structure is built. spark-scope provides that name and
//! carries state from one build to the next:
//!
//! ```text
//! previous Snapshot ─┐
//! PendingUpdates ────┼─► Session (push/pop during descent) ─► new Snapshot
//! ```
//!
//! ## Modules
//!
//! - [`component`] - Component protocol (class, key, state, updates)
//! - [`scope`] - Identity allocator, key stack, frame stack, snapshot
//! - [`session`] - Thread-bound build session and thread-scoped API
//! - [`config`] - Session options
//! - [`error`] - Protocol errors (fatal)
//!
//! Nothing here renders, lays out, or performs I/O.

pub mod component;
pub mod config;
pub mod error;
pub mod scope;
pub mod session;

// Re-export commonly used items
pub use component::{Component, ComponentClass, Key, StateUpdate, StateValue};

pub use config::{DuplicateKeys, SessionConfig};

pub use error::{ScopeError, ScopeResult};

pub use scope::{
    BuildSummary, Frame, FrameOrigin, FramePair, Identifier, IdentityAllocator, KeyStack,
    PendingUpdates, ScopeFrameStack, ScopeKind, Snapshot,
};

pub use session::{
    current_frame_pair, current_session, next_identifier, pop_frame, pop_identifier_scope,
    pop_key, push_component, push_frame, push_identifier_scope, push_key, Session,
    SessionHandle,
};
