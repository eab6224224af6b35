//! Build Session - The thread-bound context of one tree-build pass.
//!
//! A [`Session`] owns the identity allocator, key stack and frame stack of a
//! single synchronous descent. It is created from the previous build's
//! [`Snapshot`] (or nothing) plus the [`PendingUpdates`] to apply, and ends by
//! producing the next snapshot.
//!
//! Two ways to reach the session during the descent:
//! - explicitly, through the [`SessionHandle`] it hands out (pass it down)
//! - implicitly, through the free functions in this module, which act on the
//!   calling thread's active session
//!
//! # Example
//!
//! ```
//! use spark_scope::{ComponentClass, PendingUpdates, Session, StateValue};
//!
//! const FOO: ComponentClass = ComponentClass::named("Foo");
//!
//! let session = Session::begin(None, PendingUpdates::new());
//! let id = session.next_identifier(FOO, true);
//! session.push_frame(&id, || Some(StateValue::new(1u32)));
//! session.pop_frame();
//! let first = session.end();
//!
//! let session = Session::begin(Some(first), PendingUpdates::new());
//! let id = session.next_identifier(FOO, true);
//! let pair = session.push_frame(&id, || Some(StateValue::new(0u32)));
//! assert_eq!(pair.state_as::<u32>(), Some(&1)); // carried over
//! session.pop_frame();
//! session.end();
//! ```
//!
//! # Nesting
//!
//! Only one session is active per thread. [`Session::begin`] while another is
//! active is fatal; [`Session::begin_nested`] saves the active session and
//! restores it when the nested one ends or is dropped. Sessions that ended
//! out of order are skipped, so the nearest live outer session comes back.

use std::cell::RefCell;
use std::collections::HashSet;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;

use crate::component::{Component, ComponentClass, Key, StateValue};
use crate::config::SessionConfig;
use crate::error::{OrFatal, ScopeError, ScopeResult};
use crate::scope::{
    BuildSummary, FramePair, Identifier, IdentityAllocator, KeyStack, PendingUpdates,
    ScopeFrameStack, ScopeKind, Snapshot,
};

// =============================================================================
// Session State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Finalized,
}

#[derive(Debug)]
struct SessionState {
    phase: Phase,
    config: SessionConfig,
    previous: Option<Snapshot>,
    pending: Arc<PendingUpdates>,
    allocator: IdentityAllocator,
    keys: KeyStack,
    frames: ScopeFrameStack,
    /// Session that was active when this one began (nesting only).
    saved: Option<Rc<SessionCell>>,
}

impl SessionState {
    fn new(config: SessionConfig, previous: Option<Snapshot>, pending: Arc<PendingUpdates>) -> Self {
        let frames = ScopeFrameStack::new(previous.as_ref());
        Self {
            phase: Phase::Active,
            config,
            previous,
            pending,
            allocator: IdentityAllocator::new(),
            keys: KeyStack::new(),
            frames,
            saved: None,
        }
    }

    fn push_frame(
        &mut self,
        identifier: &Identifier,
        controller: Option<ComponentClass>,
        initial: impl FnOnce() -> Option<StateValue>,
    ) -> ScopeResult<FramePair> {
        // Allocator and frame stack move together or not at all.
        self.frames.check_push(identifier)?;
        self.allocator.push_scope(ScopeKind::Frame, identifier)?;
        let pushed = self.frames.push_frame(
            identifier.clone(),
            controller,
            initial,
            self.previous.as_ref(),
            &self.pending,
        );
        if pushed.is_err() {
            self.allocator.pop_scope(ScopeKind::Frame)?;
        }
        pushed
    }

    fn pop_frame(&mut self) -> ScopeResult<Identifier> {
        if self.frames.depth() == 0 {
            return Err(ScopeError::violation("pop_frame with no open frame"));
        }
        self.allocator.pop_scope(ScopeKind::Frame)?;
        self.frames.pop_frame()
    }

    fn push_key(&mut self, key: Key) -> ScopeResult<()> {
        self.allocator.push_key_scope(&key, self.config.duplicate_keys)?;
        self.keys.push(key);
        Ok(())
    }

    fn pop_key(&mut self) -> ScopeResult<Key> {
        if self.keys.is_empty() {
            return Err(ScopeError::violation("pop_key with empty key stack"));
        }
        self.allocator.pop_scope(ScopeKind::Key)?;
        self.keys.pop()
    }

    fn finalize(&mut self) -> ScopeResult<Snapshot> {
        if !self.keys.is_empty() {
            return Err(ScopeError::violation(format!(
                "{} key(s) still pushed at session end",
                self.keys.len()
            )));
        }
        // Open frames are reported by `finish`; this catches bare scopes.
        if self.frames.depth() == 0 && self.allocator.depth() != 0 {
            return Err(ScopeError::violation(format!(
                "identifier scope `{}` still open at session end",
                self.allocator.current_path()
            )));
        }
        let root = self.frames.finish()?;

        let consumed: &HashSet<Identifier> = self.frames.consumed();
        let mut orphaned_updates: Vec<Identifier> = self
            .pending
            .identifiers()
            .filter(|identifier| !consumed.contains(*identifier))
            .cloned()
            .collect();
        orphaned_updates.sort();
        if self.config.report_orphaned_updates {
            for identifier in &orphaned_updates {
                tracing::warn!(%identifier, "pending state update dropped: component not built");
            }
        }

        let counts = self.frames.counts();
        let summary = BuildSummary {
            frames: counts.frames,
            carried: counts.carried,
            updated: counts.updated,
            orphaned_updates,
        };
        let generation = self.previous.as_ref().map_or(1, |snapshot| snapshot.generation() + 1);

        self.phase = Phase::Finalized;
        tracing::debug!(
            generation,
            frames = summary.frames,
            carried = summary.carried,
            updated = summary.updated,
            orphaned = summary.orphaned_updates.len(),
            "build session finalized"
        );
        Ok(Snapshot::finalize(root, generation, summary))
    }
}

type SessionCell = RefCell<SessionState>;

thread_local! {
    /// Innermost active session on this thread.
    static ACTIVE_SESSION: RefCell<Option<Rc<SessionCell>>> = const { RefCell::new(None) };
}

fn active_cell() -> Option<Rc<SessionCell>> {
    ACTIVE_SESSION.with(|active| active.borrow().clone())
}

fn is_active_cell(cell: &Rc<SessionCell>) -> bool {
    ACTIVE_SESSION.with(|active| {
        active
            .borrow()
            .as_ref()
            .is_some_and(|current| Rc::ptr_eq(current, cell))
    })
}

fn replace_active(cell: Option<Rc<SessionCell>>) -> Option<Rc<SessionCell>> {
    ACTIVE_SESSION.with(|active| std::mem::replace(&mut *active.borrow_mut(), cell))
}

fn saved_link(cell: &Rc<SessionCell>) -> Option<Rc<SessionCell>> {
    cell.try_borrow().ok().and_then(|state| state.saved.clone())
}

/// Reinstall the nearest session below `cell` that has not ended.
///
/// Sessions dropped out of order stay in the chain as ended links, so the
/// walk skips them until it reaches a live session or the bottom.
fn restore_below(cell: &Rc<SessionCell>) {
    let mut next = saved_link(cell);
    while let Some(candidate) = next {
        let ended = candidate
            .try_borrow()
            .is_ok_and(|state| state.phase == Phase::Finalized);
        if !ended {
            replace_active(Some(candidate));
            return;
        }
        next = saved_link(&candidate);
    }
    replace_active(None);
}

// =============================================================================
// Session Handle
// =============================================================================

/// Shared, non-owning access to a session.
///
/// Cloneable and meant to be passed down the build recursion. Handles are
/// bound to their thread (`!Send`). Every operation is fatal once the session
/// has ended, or while a nested session is active on top of it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cell: Rc<SessionCell>,
}

impl SessionHandle {
    #[track_caller]
    fn with_active<R>(
        &self,
        operation: &'static str,
        op: impl FnOnce(&mut SessionState) -> ScopeResult<R>,
    ) -> R {
        let result = match self.cell.try_borrow_mut() {
            Ok(mut state) => {
                if state.phase != Phase::Active {
                    Err(ScopeError::violation(format!("`{operation}` on a finalized session")))
                } else if !is_active_cell(&self.cell) {
                    Err(ScopeError::violation(format!(
                        "`{operation}` on a session that is not the innermost active session"
                    )))
                } else {
                    op(&mut *state)
                }
            }
            Err(_) => Err(ScopeError::violation(format!(
                "`{operation}` re-entered the session from a state initializer or update"
            ))),
        };
        result.or_fatal()
    }

    /// Allocate the next identifier for `class` in the current scope.
    #[track_caller]
    pub fn next_identifier(&self, class: ComponentClass, stateful: bool) -> Identifier {
        self.with_active("next_identifier", |state| Ok(state.allocator.next(class, stateful)))
    }

    /// Open an identifier scope without a frame (structural grouping).
    ///
    /// `identifier` must have been allocated in the current scope.
    #[track_caller]
    pub fn push_identifier_scope(&self, identifier: &Identifier) {
        self.with_active("push_identifier_scope", |state| {
            state.allocator.push_scope(ScopeKind::Explicit, identifier)
        })
    }

    #[track_caller]
    pub fn pop_identifier_scope(&self) {
        self.with_active("pop_identifier_scope", |state| {
            state.allocator.pop_scope(ScopeKind::Explicit)
        })
    }

    /// Push a key; identifiers allocated until the matching `pop_key` live
    /// under it.
    #[track_caller]
    pub fn push_key(&self, key: impl Into<Key>) {
        let key = key.into();
        self.with_active("push_key", |state| state.push_key(key))
    }

    #[track_caller]
    pub fn pop_key(&self) -> Key {
        self.with_active("pop_key", SessionState::pop_key)
    }

    /// Innermost pushed key.
    #[track_caller]
    pub fn current_key(&self) -> Option<Key> {
        self.with_active("current_key", |state| Ok(state.keys.top().cloned()))
    }

    /// Push the frame for `identifier`.
    ///
    /// `initial` runs only on first appearance. It must not touch the session.
    #[track_caller]
    pub fn push_frame(
        &self,
        identifier: &Identifier,
        initial: impl FnOnce() -> Option<StateValue>,
    ) -> FramePair {
        self.with_active("push_frame", |state| state.push_frame(identifier, None, initial))
    }

    /// [`push_frame`](Self::push_frame) for a component with a controller.
    #[track_caller]
    pub fn push_frame_with_controller(
        &self,
        identifier: &Identifier,
        controller: ComponentClass,
        initial: impl FnOnce() -> Option<StateValue>,
    ) -> FramePair {
        self.with_active("push_frame", |state| {
            state.push_frame(identifier, Some(controller), initial)
        })
    }

    /// Allocate a stateful identifier for `C` and push its frame.
    #[track_caller]
    pub fn push_component<C: Component>(&self) -> FramePair {
        self.with_active("push_component", |state| {
            let identifier = state.allocator.next(C::class(), true);
            state.push_frame(&identifier, C::controller_class(), || {
                C::initial_state().map(StateValue::new)
            })
        })
    }

    /// Close the innermost frame, attaching it to its parent.
    #[track_caller]
    pub fn pop_frame(&self) -> Identifier {
        self.with_active("pop_frame", SessionState::pop_frame)
    }

    #[track_caller]
    pub fn current_frame_pair(&self) -> FramePair {
        self.with_active("current_frame_pair", |state| Ok(state.frames.current_frame_pair()))
    }

    /// Replace the innermost frame's state.
    #[track_caller]
    pub fn set_state<T: Send + Sync + 'static>(&self, value: T) {
        let value = StateValue::new(value);
        self.with_active("set_state", |state| state.frames.set_state(Some(value)))
    }

    /// Open frames above the root.
    #[track_caller]
    pub fn depth(&self) -> usize {
        self.with_active("depth", |state| Ok(state.frames.depth()))
    }

    /// True until the session ends. Never fatal.
    pub fn is_active(&self) -> bool {
        self.cell
            .try_borrow()
            .map(|state| state.phase == Phase::Active)
            .unwrap_or(true)
    }

    /// True if both handles refer to the same session.
    pub fn ptr_eq(&self, other: &SessionHandle) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

// =============================================================================
// Session
// =============================================================================

/// Owner of a build session. Ending it yields the next [`Snapshot`];
/// dropping it without `end` cancels the build.
#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    finished: bool,
}

impl Session {
    /// Begin a session on this thread. Fatal if one is already active.
    #[track_caller]
    pub fn begin(previous: Option<Snapshot>, pending: impl Into<Arc<PendingUpdates>>) -> Self {
        Self::begin_with_config(previous, pending, SessionConfig::default())
    }

    #[track_caller]
    pub fn begin_with_config(
        previous: Option<Snapshot>,
        pending: impl Into<Arc<PendingUpdates>>,
        config: SessionConfig,
    ) -> Self {
        if active_cell().is_some() {
            ScopeError::SessionReentrancy.fatal();
        }
        Self::install(previous, pending.into(), config)
    }

    /// Begin a session on top of the active one (if any), which is restored
    /// when this session ends or is dropped.
    pub fn begin_nested(previous: Option<Snapshot>, pending: impl Into<Arc<PendingUpdates>>) -> Self {
        Self::begin_nested_with_config(previous, pending, SessionConfig::default())
    }

    pub fn begin_nested_with_config(
        previous: Option<Snapshot>,
        pending: impl Into<Arc<PendingUpdates>>,
        config: SessionConfig,
    ) -> Self {
        Self::install(previous, pending.into(), config)
    }

    fn install(previous: Option<Snapshot>, pending: Arc<PendingUpdates>, config: SessionConfig) -> Self {
        tracing::debug!(
            previous_generation = ?previous.as_ref().map(Snapshot::generation),
            pending = pending.len(),
            "build session begin"
        );
        let mut state = SessionState::new(config, previous, pending);
        state.saved = active_cell();
        let cell = Rc::new(RefCell::new(state));
        replace_active(Some(cell.clone()));
        Self {
            handle: SessionHandle { cell },
            finished: false,
        }
    }

    /// A handle to pass down the build.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Finalize the frame tree into a [`Snapshot`].
    ///
    /// Fatal if any frame, key or identifier scope is still open, or if a
    /// session nested on top of this one has not ended.
    #[track_caller]
    pub fn end(mut self) -> Snapshot {
        let snapshot = self.handle.with_active("end", SessionState::finalize);
        restore_below(&self.handle.cell);
        self.finished = true;
        snapshot
    }
}

impl Deref for Session {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Cancelled: discard partial frames and restore the outer session.
        if let Ok(mut state) = self.handle.cell.try_borrow_mut() {
            state.phase = Phase::Finalized;
        }
        if is_active_cell(&self.handle.cell) {
            restore_below(&self.handle.cell);
        }
        tracing::debug!("build session cancelled");
    }
}

// =============================================================================
// Thread-scoped API
// =============================================================================

/// The calling thread's active session, if any.
pub fn current_session() -> Option<SessionHandle> {
    active_cell().map(|cell| SessionHandle { cell })
}

#[track_caller]
fn require_session(operation: &'static str) -> SessionHandle {
    match current_session() {
        Some(handle) => handle,
        None => ScopeError::MissingSession { operation }.fatal(),
    }
}

/// [`SessionHandle::next_identifier`] on the active session.
#[track_caller]
pub fn next_identifier(class: ComponentClass, stateful: bool) -> Identifier {
    require_session("next_identifier").next_identifier(class, stateful)
}

#[track_caller]
pub fn push_identifier_scope(identifier: &Identifier) {
    require_session("push_identifier_scope").push_identifier_scope(identifier)
}

#[track_caller]
pub fn pop_identifier_scope() {
    require_session("pop_identifier_scope").pop_identifier_scope()
}

#[track_caller]
pub fn push_key(key: impl Into<Key>) {
    require_session("push_key").push_key(key)
}

#[track_caller]
pub fn pop_key() -> Key {
    require_session("pop_key").pop_key()
}

/// [`SessionHandle::push_frame`] on the active session.
#[track_caller]
pub fn push_frame(identifier: &Identifier, initial: impl FnOnce() -> Option<StateValue>) -> FramePair {
    require_session("push_frame").push_frame(identifier, initial)
}

#[track_caller]
pub fn push_component<C: Component>() -> FramePair {
    require_session("push_component").push_component::<C>()
}

#[track_caller]
pub fn pop_frame() -> Identifier {
    require_session("pop_frame").pop_frame()
}

#[track_caller]
pub fn current_frame_pair() -> FramePair {
    require_session("current_frame_pair").current_frame_pair()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::StateUpdate;
    use crate::config::DuplicateKeys;
    use crate::scope::FrameOrigin;
    use pretty_assertions::assert_eq;

    const FOO: ComponentClass = ComponentClass::named("Foo");
    const BAR: ComponentClass = ComponentClass::named("Bar");

    struct Counter;

    impl Component for Counter {
        type State = u32;

        fn initial_state() -> Option<u32> {
            Some(0)
        }

        fn controller_class() -> Option<ComponentClass> {
            Some(ComponentClass::named("CounterController"))
        }
    }

    fn leaf(session: &SessionHandle, class: ComponentClass) -> Identifier {
        let id = session.next_identifier(class, true);
        session.push_frame(&id, || None);
        session.pop_frame()
    }

    #[test]
    fn test_foo_with_two_bars() {
        let session = Session::begin(None, PendingUpdates::new());

        let foo = session.next_identifier(FOO, true);
        session.push_frame(&foo, || None);
        let bar0 = leaf(&session, BAR);
        let bar1 = leaf(&session, BAR);
        assert_eq!(session.pop_frame(), foo);
        let snapshot = session.end();

        assert_eq!((foo.depth(), foo.ordinal()), (1, 0));
        assert_eq!((bar0.depth(), bar0.ordinal()), (2, 0));
        assert_eq!((bar1.depth(), bar1.ordinal()), (2, 1));
        assert_ne!(bar0, bar1);
        assert_eq!(snapshot.identifiers(), vec![foo.clone(), bar0, bar1]);
        assert_eq!(snapshot.root().children().len(), 1);
        assert_eq!(snapshot.get(&foo).unwrap().children().len(), 2);
        assert!(current_session().is_none());
    }

    #[test]
    fn test_state_carries_over() {
        let session = Session::begin(None, PendingUpdates::new());
        let pair = session.push_component::<Counter>();
        assert_eq!(pair.state_as::<u32>(), Some(&0));
        session.set_state(41u32);
        session.pop_frame();
        let first = session.end();

        let session = Session::begin(Some(first.clone()), PendingUpdates::new());
        let pair = session.push_component::<Counter>();
        assert_eq!(pair.state_as::<u32>(), Some(&41));
        assert_eq!(pair.previous_state_as::<u32>(), Some(&41));
        assert_eq!(pair.origin, FrameOrigin::CARRIED);
        session.pop_frame();
        let second = session.end();

        assert_eq!(second.generation(), 2);
        assert_eq!(second.summary().carried, 1);
        // The previous snapshot is untouched.
        assert_eq!(first.state::<u32>(&pair.identifier), Some(&41));
        assert_eq!(second.controllers().len(), 1);
    }

    #[test]
    fn test_pending_update_applies_once() {
        let session = Session::begin(None, PendingUpdates::new());
        let counter = session.push_component::<Counter>().identifier;
        session.pop_frame();
        let sibling = session.push_component::<Counter>().identifier;
        session.pop_frame();
        let first = session.end();

        let pending = PendingUpdates::new().with(counter.clone(), StateUpdate::map(|n: &u32| n + 5));
        let session = Session::begin(Some(first), pending);
        session.push_component::<Counter>();
        session.pop_frame();
        session.push_component::<Counter>();
        session.pop_frame();
        let second = session.end();

        assert_eq!(second.state::<u32>(&counter), Some(&5));
        assert_eq!(second.state::<u32>(&sibling), Some(&0));
        assert_eq!(second.summary().updated, 1);
        assert!(second.summary().orphaned_updates.is_empty());
    }

    #[test]
    fn test_orphaned_updates_are_reported() {
        let session = Session::begin(None, PendingUpdates::new());
        let gone = session.push_component::<Counter>().identifier;
        session.pop_frame();
        let first = session.end();

        let pending = PendingUpdates::new().with(gone.clone(), StateUpdate::replace(9u32));
        let session = Session::begin_with_config(
            Some(first),
            pending,
            SessionConfig::default().with_orphan_reporting(false),
        );
        let snapshot = session.end();
        assert_eq!(snapshot.summary().orphaned_updates, vec![gone]);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_keys_disambiguate_rows() {
        let session = Session::begin(None, PendingUpdates::new());
        let mut rows = Vec::new();
        for key in ["a", "b"] {
            session.push_key(key);
            assert_eq!(session.current_key(), Some(Key::from(key)));
            rows.push(leaf(&session, BAR));
            assert_eq!(session.pop_key(), Key::from(key));
        }
        session.end();

        assert_eq!(rows[0].as_str(), "#'a'/Bar:0");
        assert_eq!(rows[1].as_str(), "#'b'/Bar:0");
    }

    #[test]
    fn test_thread_scoped_functions() {
        let session = Session::begin(None, PendingUpdates::new());
        let foo = next_identifier(FOO, true);
        push_frame(&foo, || Some(StateValue::new("foo")));
        assert_eq!(current_frame_pair().identifier, foo);
        push_key(3u64);
        let counter = push_component::<Counter>().identifier;
        pop_frame();
        assert_eq!(pop_key(), Key::Index(3));
        let group = next_identifier(BAR, false);
        push_identifier_scope(&group);
        pop_identifier_scope();
        pop_frame();
        let snapshot = session.end();

        assert_eq!(counter.as_str(), format!("Foo:0/#3/{}:0", Counter::class().name()));
        assert!(snapshot.contains(&counter));
    }

    #[test]
    fn test_nested_session_restores_outer() {
        let outer = Session::begin(None, PendingUpdates::new());
        let inner = Session::begin_nested(None, PendingUpdates::new());
        assert!(current_session().unwrap().ptr_eq(&inner.handle()));

        leaf(&inner, FOO);
        let inner_snapshot = inner.end();
        assert_eq!(inner_snapshot.len(), 1);

        assert!(current_session().unwrap().ptr_eq(&outer.handle()));
        let id = leaf(&outer, FOO);
        assert_eq!(id.as_str(), "Foo:0");
        outer.end();
        assert!(current_session().is_none());
    }

    #[test]
    fn test_drop_cancels_and_restores() {
        let outer = Session::begin(None, PendingUpdates::new());
        {
            let inner = Session::begin_nested(None, PendingUpdates::new());
            let id = inner.next_identifier(FOO, true);
            inner.push_frame(&id, || None);
            // dropped mid-build
        }
        assert!(current_session().unwrap().ptr_eq(&outer.handle()));
        let handle = outer.handle();
        drop(outer);
        assert!(current_session().is_none());
        assert!(!handle.is_active());
    }

    #[test]
    fn test_out_of_order_drop_leaves_no_dead_session() {
        let outer = Session::begin(None, PendingUpdates::new());
        let inner = Session::begin_nested(None, PendingUpdates::new());
        drop(outer);
        assert!(current_session().unwrap().ptr_eq(&inner.handle()));
        drop(inner);
        assert!(current_session().is_none());
    }

    #[test]
    fn test_out_of_order_drop_restores_live_ancestor() {
        let bottom = Session::begin(None, PendingUpdates::new());
        let middle = Session::begin_nested(None, PendingUpdates::new());
        let top = Session::begin_nested(None, PendingUpdates::new());

        let middle_handle = middle.handle();
        drop(middle);
        assert!(!middle_handle.is_active());
        assert!(current_session().unwrap().ptr_eq(&top.handle()));

        top.end();
        assert!(current_session().unwrap().ptr_eq(&bottom.handle()));
        let id = leaf(&bottom, FOO);
        assert_eq!(id.as_str(), "Foo:0");
        assert_eq!(bottom.end().len(), 1);
        assert!(current_session().is_none());
    }

    #[test]
    fn test_failed_frame_push_leaves_scopes_balanced() {
        let mut state = SessionState::new(SessionConfig::default(), None, Arc::new(PendingUpdates::new()));

        let bookkeeping = state.allocator.next(FOO, false);
        assert!(state.push_frame(&bookkeeping, None, || None).is_err());
        assert_eq!(state.allocator.depth(), 0);
        assert_eq!(state.frames.depth(), 0);

        let id = state.allocator.next(BAR, true);
        state.push_frame(&id, None, || None).unwrap();
        state.pop_frame().unwrap();
        assert!(state.push_frame(&id, None, || None).is_err());
        assert_eq!(state.allocator.depth(), 0);
        assert_eq!(state.frames.depth(), 0);

        // The rejected bookkeeping identifier never opened a scope.
        state.allocator.push_scope(ScopeKind::Explicit, &bookkeeping).unwrap();
        state.allocator.pop_scope(ScopeKind::Explicit).unwrap();
        assert!(state.finalize().is_ok());
    }

    #[test]
    #[should_panic(expected = "opened twice in one session")]
    fn test_reopened_identifier_scope_is_fatal() {
        let session = Session::begin(None, PendingUpdates::new());
        let id = session.next_identifier(FOO, false);
        session.push_identifier_scope(&id);
        session.pop_identifier_scope();
        session.push_identifier_scope(&id);
    }

    #[test]
    #[should_panic(expected = "session reentrancy")]
    fn test_begin_twice_is_fatal() {
        let _first = Session::begin(None, PendingUpdates::new());
        let _second = Session::begin(None, PendingUpdates::new());
    }

    #[test]
    #[should_panic(expected = "missing session: `pop_frame`")]
    fn test_missing_session_is_fatal() {
        pop_frame();
    }

    #[test]
    #[should_panic(expected = "pop_frame with no open frame")]
    fn test_extra_pop_is_fatal() {
        let session = Session::begin(None, PendingUpdates::new());
        session.pop_frame();
    }

    #[test]
    #[should_panic(expected = "still open at session end")]
    fn test_unbalanced_end_is_fatal() {
        let session = Session::begin(None, PendingUpdates::new());
        let id = session.next_identifier(FOO, true);
        session.push_frame(&id, || None);
        session.end();
    }

    #[test]
    #[should_panic(expected = "key(s) still pushed")]
    fn test_unpopped_key_is_fatal() {
        let session = Session::begin(None, PendingUpdates::new());
        session.push_key("row");
        session.end();
    }

    #[test]
    #[should_panic(expected = "pop of Frame scope while innermost scope")]
    fn test_interleaved_pops_are_fatal() {
        let session = Session::begin(None, PendingUpdates::new());
        let id = session.next_identifier(FOO, true);
        session.push_frame(&id, || None);
        session.push_key("row");
        session.pop_frame();
    }

    #[test]
    #[should_panic(expected = "on a finalized session")]
    fn test_handle_after_end_is_fatal() {
        let session = Session::begin(None, PendingUpdates::new());
        let handle = session.handle();
        session.end();
        handle.next_identifier(FOO, true);
    }

    #[test]
    #[should_panic(expected = "not the innermost active session")]
    fn test_outer_handle_while_nested_is_fatal() {
        let outer = Session::begin(None, PendingUpdates::new());
        let _inner = Session::begin_nested(None, PendingUpdates::new());
        outer.next_identifier(FOO, true);
    }

    #[test]
    #[should_panic(expected = "re-entered the session")]
    fn test_initializer_reentry_is_fatal() {
        let session = Session::begin(None, PendingUpdates::new());
        let id = session.next_identifier(FOO, true);
        session.push_frame(&id, || {
            next_identifier(BAR, true);
            None
        });
    }

    #[test]
    #[should_panic(expected = "duplicate key")]
    fn test_rejected_duplicate_key() {
        let config = SessionConfig::default().with_duplicate_keys(DuplicateKeys::Reject);
        let session = Session::begin_with_config(None, PendingUpdates::new(), config);
        session.push_key("row");
        session.pop_key();
        session.push_key("row");
    }
}
