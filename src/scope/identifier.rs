//! Identity Allocator - Deterministic identifiers for one build pass.
//!
//! An identifier is the path of segments from the root to a component:
//!
//! ```text
//! Foo:0                 first stateful Foo at the root
//! Foo:0/Bar:1           second stateful Bar inside it
//! Foo:0/#'row'/Bar:0    first Bar under key 'row'
//! Foo:0/Spacer@0        bookkeeping identifier (not used for state)
//! ```
//!
//! Each open scope level owns its own class-ordinal counters. Pushing a level
//! starts from zero, popping drops the counters, so a keyed branch visited in
//! one pass numbers its children exactly like the same branch in the next.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::component::{ComponentClass, Key};
use crate::config::DuplicateKeys;
use crate::error::{ScopeError, ScopeResult};

const SEPARATOR: char = '/';
const STATEFUL_MARK: char = ':';
const BOOKKEEPING_MARK: char = '@';
const KEY_MARK: char = '#';

// =============================================================================
// Identifier
// =============================================================================

/// Path-derived name of a component within one build pass.
///
/// Equal structure in two passes gives equal identifiers, which is what lets
/// a frame find its state in the previous snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier {
    repr: Arc<str>,
    class: Option<ComponentClass>,
    depth: u32,
    ordinal: u32,
    stateful: bool,
}

impl Identifier {
    /// Identifier of the (stateless) root frame.
    pub fn root() -> Self {
        Self {
            repr: Arc::from(""),
            class: None,
            depth: 0,
            ordinal: 0,
            stateful: false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.repr
    }

    pub fn is_root(&self) -> bool {
        self.repr.is_empty()
    }

    /// Class the identifier was allocated for. `None` for the root.
    pub fn class(&self) -> Option<ComponentClass> {
        self.class
    }

    /// Component nesting depth. Key segments do not count.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Position among same-class siblings in the same scope.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn is_stateful(&self) -> bool {
        self.stateful
    }

    /// Raw path segments, keys included.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.repr.split(SEPARATOR).filter(|segment| !segment.is_empty())
    }

    /// True if `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &Identifier) -> bool {
        if ancestor.is_root() {
            return !self.is_root();
        }
        self.repr.len() > ancestor.repr.len()
            && self.repr.starts_with(&*ancestor.repr)
            && self.repr[ancestor.repr.len()..].starts_with(SEPARATOR)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.repr)
        }
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '#' => out.push_str("%23"),
            _ => out.push(ch),
        }
    }
    out
}

fn join(path: &str, segment: &str) -> Arc<str> {
    if path.is_empty() {
        Arc::from(segment)
    } else {
        Arc::from(format!("{path}{SEPARATOR}{segment}"))
    }
}

// =============================================================================
// Scope Levels
// =============================================================================

/// What opened a scope level. Pops must name the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Root,
    /// Opened by a frame push.
    Frame,
    /// Opened by a key push.
    Key,
    /// Opened explicitly through `push_identifier_scope`.
    Explicit,
}

#[derive(Debug)]
struct ScopeLevel {
    kind: ScopeKind,
    path: Arc<str>,
    depth: u32,
    ordinals: HashMap<(ComponentClass, bool), u32>,
    keys: HashMap<Key, u32>,
}

impl ScopeLevel {
    fn new(kind: ScopeKind, path: Arc<str>, depth: u32) -> Self {
        Self {
            kind,
            path,
            depth,
            ordinals: HashMap::new(),
            keys: HashMap::new(),
        }
    }
}

// =============================================================================
// Allocator
// =============================================================================

/// Stack machine handing out identifiers during one descent.
#[derive(Debug)]
pub struct IdentityAllocator {
    levels: Vec<ScopeLevel>,
    /// Paths of every scope opened so far. Reopening one would restart its
    /// ordinals and hand out identifiers a second time.
    opened: HashSet<Arc<str>>,
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityAllocator {
    pub fn new() -> Self {
        Self {
            levels: vec![ScopeLevel::new(ScopeKind::Root, Arc::from(""), 0)],
            opened: HashSet::new(),
        }
    }

    fn top(&self) -> &ScopeLevel {
        // The root level is never popped.
        &self.levels[self.levels.len() - 1]
    }

    fn top_mut(&mut self) -> &mut ScopeLevel {
        let last = self.levels.len() - 1;
        &mut self.levels[last]
    }

    /// Number of open levels above the root.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn current_path(&self) -> &str {
        &self.top().path
    }

    /// Kind of the innermost open level.
    pub fn current_kind(&self) -> ScopeKind {
        self.top().kind
    }

    /// Allocate the next identifier for `class` in the current scope.
    ///
    /// Stateful and bookkeeping identifiers count ordinals separately.
    pub fn next(&mut self, class: ComponentClass, stateful: bool) -> Identifier {
        let level = self.top_mut();
        let counter = level.ordinals.entry((class, stateful)).or_insert(0);
        let ordinal = *counter;
        *counter += 1;

        let mark = if stateful { STATEFUL_MARK } else { BOOKKEEPING_MARK };
        let segment = format!("{}{mark}{ordinal}", escape(class.name()));

        Identifier {
            repr: join(&level.path, &segment),
            class: Some(class),
            depth: level.depth + 1,
            ordinal,
            stateful,
        }
    }

    /// Open a scope named by `identifier`, which must be a direct product of
    /// the current scope.
    pub fn push_scope(&mut self, kind: ScopeKind, identifier: &Identifier) -> ScopeResult<()> {
        let parent = self.top();
        let rest = identifier.repr.strip_prefix(&*parent.path).unwrap_or("");
        let direct = if parent.path.is_empty() {
            !rest.is_empty() && !rest.contains(SEPARATOR)
        } else {
            rest.strip_prefix(SEPARATOR)
                .is_some_and(|segment| !segment.is_empty() && !segment.contains(SEPARATOR))
        };
        if !direct {
            return Err(ScopeError::violation(format!(
                "identifier `{identifier}` was not allocated in the current scope `{}`",
                parent.path
            )));
        }
        if !self.opened.insert(identifier.repr.clone()) {
            return Err(ScopeError::violation(format!(
                "identifier scope `{identifier}` opened twice in one session"
            )));
        }

        tracing::trace!(%identifier, ?kind, "push identifier scope");
        self.levels.push(ScopeLevel::new(
            kind,
            identifier.repr.clone(),
            identifier.depth,
        ));
        Ok(())
    }

    /// Open a key scope under the current path.
    ///
    /// A key repeated at the same level either gets an occurrence suffix or
    /// is rejected, depending on `duplicates`.
    pub fn push_key_scope(&mut self, key: &Key, duplicates: DuplicateKeys) -> ScopeResult<()> {
        let level = self.top_mut();
        let seen = level.keys.entry(key.clone()).or_insert(0);
        let occurrence = *seen;
        *seen += 1;

        let mut segment = format!("{KEY_MARK}{}", escape(&key.to_string()));
        if occurrence > 0 {
            match duplicates {
                DuplicateKeys::Reject => {
                    return Err(ScopeError::violation(format!(
                        "duplicate key {key} under `{}`",
                        level.path
                    )));
                }
                DuplicateKeys::Disambiguate => {
                    tracing::warn!(%key, path = %level.path, occurrence, "duplicate key among siblings");
                    segment.push_str(&format!("~{occurrence}"));
                }
            }
        }

        let path = join(&level.path, &segment);
        let depth = level.depth;
        tracing::trace!(%key, %path, "push key scope");
        self.levels.push(ScopeLevel::new(ScopeKind::Key, path, depth));
        Ok(())
    }

    /// Close the innermost scope, which must be of `kind`.
    pub fn pop_scope(&mut self, kind: ScopeKind) -> ScopeResult<()> {
        if self.levels.len() == 1 {
            return Err(ScopeError::violation(format!(
                "pop of {kind:?} scope with no open identifier scope"
            )));
        }
        let top = self.top();
        if top.kind != kind {
            return Err(ScopeError::violation(format!(
                "pop of {kind:?} scope while innermost scope `{}` is {:?}",
                top.path, top.kind
            )));
        }
        tracing::trace!(path = %top.path, ?kind, "pop identifier scope");
        self.levels.pop();
        Ok(())
    }
}
