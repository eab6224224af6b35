//! Scope Errors - Protocol failures of a build pass.
//!
//! Every error here means the tree builder driving the session is broken:
//! a push without a pop, an operation outside any session, a second session
//! opened by accident. None of them are recoverable, so the public session
//! API turns them into panics via [`ScopeError::fatal`]. Internal stack code
//! still returns `Result` so the failure point is reported once, with context.

use thiserror::Error;

/// A broken scoping protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// Unbalanced or out-of-order push/pop, or use of a finalized session.
    #[error("scope protocol violation: {0}")]
    ProtocolViolation(String),

    /// `Session::begin` while another session is active on this thread.
    #[error("session reentrancy: a build session is already active on this thread (use Session::begin_nested to stack sessions)")]
    SessionReentrancy,

    /// A thread-scoped operation was called outside any session.
    #[error("missing session: `{operation}` called with no active build session")]
    MissingSession { operation: &'static str },
}

impl ScopeError {
    pub(crate) fn violation(detail: impl Into<String>) -> Self {
        Self::ProtocolViolation(detail.into())
    }

    /// Log the error and abort the build pass.
    #[track_caller]
    pub fn fatal(self) -> ! {
        tracing::error!(error = %self, "aborting build pass");
        panic!("{self}")
    }
}

/// Result alias for stack operations.
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Unwrap a [`ScopeResult`], aborting the build on error.
pub(crate) trait OrFatal<T> {
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for ScopeResult<T> {
    #[track_caller]
    fn or_fatal(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => err.fatal(),
        }
    }
}
