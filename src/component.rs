//! Component protocol types.
//!
//! The scope runtime never sees concrete components. It sees:
//! - [`ComponentClass`] - a stable name for a component type
//! - [`Key`] - a caller-supplied disambiguator for repeated siblings
//! - [`StateValue`] - type-erased, shareable component state
//! - [`StateUpdate`] - a queued mutation folded into state at frame push
//!
//! Component variants opt in through the [`Component`] capability trait.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Component Class
// =============================================================================

/// Stable name for a component type.
///
/// Two classes are equal when their names are equal. Names come from
/// [`std::any::type_name`] by default, which is stable within one binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentClass {
    name: &'static str,
}

impl ComponentClass {
    /// Class with an explicit name.
    pub const fn named(name: &'static str) -> Self {
        Self { name }
    }

    /// Class derived from a Rust type.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self { name: type_name::<T>() }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for ComponentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// =============================================================================
// Key
// =============================================================================

/// Disambiguator for keyed children (list rows, tabs, ...).
///
/// `Index(1)` and `Name("1")` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Index(u64),
    Name(Arc<str>),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(index) => write!(f, "{index}"),
            Key::Name(name) => write!(f, "'{name}'"),
        }
    }
}

impl From<u64> for Key {
    fn from(index: u64) -> Self {
        Key::Index(index)
    }
}

impl From<u32> for Key {
    fn from(index: u32) -> Self {
        Key::Index(index.into())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        // usize is at most 64 bits on every supported target.
        Key::Index(u64::try_from(index).unwrap_or(u64::MAX))
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.into())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name.into())
    }
}

// =============================================================================
// State
// =============================================================================

/// Type-erased component state.
///
/// Cloning is cheap (shared pointer). State is immutable once stored in a
/// frame; updates produce a new value.
#[derive(Clone)]
pub struct StateValue(Arc<dyn Any + Send + Sync>);

impl StateValue {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the state as `T`, if it is one.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.0.is::<T>()
    }

    /// True if both values are the same allocation.
    pub fn ptr_eq(&self, other: &StateValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StateValue(..)")
    }
}

type UpdateFn = dyn Fn(Option<&StateValue>) -> Option<StateValue> + Send + Sync;

/// A queued state mutation.
///
/// Receives the frame's state so far (carried over or freshly seeded) and
/// returns the replacement.
#[derive(Clone)]
pub struct StateUpdate(Arc<UpdateFn>);

impl StateUpdate {
    pub fn new(
        update: impl Fn(Option<&StateValue>) -> Option<StateValue> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(update))
    }

    /// Replace the state with `value` regardless of what it was.
    pub fn replace<T: Clone + Send + Sync + 'static>(value: T) -> Self {
        Self::new(move |_| Some(StateValue::new(value.clone())))
    }

    /// Transform state of type `T`.
    ///
    /// Missing state or state of another type is left unchanged.
    pub fn map<T, F>(update: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> T + Send + Sync + 'static,
    {
        Self::new(move |current| match current {
            Some(state) => match state.downcast_ref::<T>() {
                Some(typed) => Some(StateValue::new(update(typed))),
                None => {
                    tracing::warn!(
                        expected = type_name::<T>(),
                        "state update skipped: frame state has a different type"
                    );
                    Some(state.clone())
                }
            },
            None => {
                tracing::warn!(
                    expected = type_name::<T>(),
                    "state update skipped: frame has no state"
                );
                None
            }
        })
    }

    pub fn apply(&self, current: Option<StateValue>) -> Option<StateValue> {
        (self.0)(current.as_ref())
    }
}

impl fmt::Debug for StateUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StateUpdate(..)")
    }
}

// =============================================================================
// Component Protocol
// =============================================================================

/// Capability interface implemented by each component variant.
///
/// # Example
///
/// ```
/// use spark_scope::{Component, ComponentClass};
///
/// struct Counter;
///
/// impl Component for Counter {
///     type State = u32;
///
///     fn initial_state() -> Option<u32> {
///         Some(0)
///     }
/// }
///
/// assert!(Counter::class().name().ends_with("Counter"));
/// assert_eq!(Counter::controller_class(), None::<ComponentClass>);
/// ```
pub trait Component: 'static {
    /// State stored in this component's frame.
    type State: Send + Sync + 'static;

    /// State for the first appearance of the component. `None` = stateless.
    fn initial_state() -> Option<Self::State> {
        None
    }

    /// Controller type attached to the component's scope, if any.
    fn controller_class() -> Option<ComponentClass> {
        None
    }

    fn class() -> ComponentClass {
        ComponentClass::of::<Self>()
    }

    /// Diagnostic identifier.
    fn identifier(&self) -> Option<&str> {
        None
    }
}
