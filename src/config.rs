//! Session configuration.

/// What to do when the same key is pushed twice among siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateKeys {
    /// Suffix repeated keys with their occurrence (`#'a'~1`) and log a warning.
    #[default]
    Disambiguate,
    /// Treat a repeated key as a protocol violation.
    Reject,
}

/// Options for one build session.
///
/// ```
/// use spark_scope::{DuplicateKeys, SessionConfig};
///
/// let config = SessionConfig::default().with_duplicate_keys(DuplicateKeys::Reject);
/// assert!(config.report_orphaned_updates);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub duplicate_keys: DuplicateKeys,
    /// Warn at `end` about pending updates whose component never appeared.
    pub report_orphaned_updates: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duplicate_keys: DuplicateKeys::default(),
            report_orphaned_updates: true,
        }
    }
}

impl SessionConfig {
    pub fn with_duplicate_keys(mut self, duplicate_keys: DuplicateKeys) -> Self {
        self.duplicate_keys = duplicate_keys;
        self
    }

    pub fn with_orphan_reporting(mut self, enabled: bool) -> Self {
        self.report_orphaned_updates = enabled;
        self
    }
}
