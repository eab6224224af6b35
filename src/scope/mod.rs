//! Scope Engine - Identity allocation and frame bookkeeping for a build pass.
//!
//! The pieces a [`Session`](crate::Session) drives:
//! - IdentityAllocator: path + class + ordinal → [`Identifier`]
//! - KeyStack: caller keys composed into the identifier path
//! - ScopeFrameStack: previous/new frame pairs following the descent
//! - Snapshot: the frozen frame tree handed to the next build
//! - PendingUpdates: queued state mutations folded at frame push
//!
//! # Descent
//!
//! ```text
//! push_key(k)?           opens key scope      #k
//! next(Class, true)      allocates            #k/Class:0
//! push_frame(id)         seeds state, opens   #k/Class:0
//!   ... children ...
//! pop_frame()            attaches frame to parent
//! pop_key()?
//! ```

mod frame;
mod identifier;
mod keys;
mod snapshot;
mod updates;

pub use frame::*;
pub use identifier::*;
pub use keys::*;
pub use snapshot::*;
pub use updates::*;
