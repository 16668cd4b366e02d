//! Store Module - The external state container contract
//!
//! A connected component reads, dispatches to, and subscribes to exactly one
//! store. The contract is deliberately narrow:
//!
//! - `state()` - current state snapshot (identity is the `Rc` allocation)
//! - `dispatch(action)` - forward an action; may notify listeners before returning
//! - `subscribe(listener)` - register a change listener, returns an [`Unsubscribe`]
//!
//! [`ReducerStore`] is a small in-process implementation of the contract, and
//! [`provider`] supplies the ambient store lookup used when a component is not
//! handed a store explicitly.
//!
//! # Example
//!
//! ```ignore
//! use spark_connect::store::{ReducerStore, Store};
//!
//! let store = ReducerStore::new(0_i64, |count, delta: &i64| std::rc::Rc::new(**count + delta));
//! let unsubscribe = store.subscribe(std::rc::Rc::new(|| println!("changed")));
//! store.dispatch(5);
//! unsubscribe();
//! ```

pub mod provider;
mod reducer_store;

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::types::PropValue;

pub use provider::{current_store, pop_store_context, provide_store, push_store_context};
pub use reducer_store::ReducerStore;

// =============================================================================
// TYPES
// =============================================================================

/// Store change listener.
pub type Listener = Rc<dyn Fn()>;

/// Detaches a listener. Calling it consumes it, so it runs at most once.
pub type Unsubscribe = Box<dyn FnOnce()>;

/// The read-model/dispatch container a component is bound to.
pub trait Store: 'static {
    type State: 'static;
    type Action: 'static;

    /// Current state snapshot.
    fn state(&self) -> Rc<Self::State>;

    /// Forward an action. Listeners may be notified before this returns.
    fn dispatch(&self, action: Self::Action) -> Self::Action;

    /// Register a change listener.
    fn subscribe(&self, listener: Listener) -> Unsubscribe;
}

// =============================================================================
// DISPATCH HANDLE
// =============================================================================

struct DispatchFn<A>(Box<dyn Fn(A) -> A>);

/// A clonable handle to a store's `dispatch`.
///
/// Every clone shares one allocation, so the handle has a stable identity when
/// it is passed around as a prop and shallow comparisons see it as unchanged.
pub struct Dispatch<A: 'static> {
    inner: Rc<DispatchFn<A>>,
}

impl<A: 'static> Dispatch<A> {
    pub fn new(f: impl Fn(A) -> A + 'static) -> Self {
        Self {
            inner: Rc::new(DispatchFn(Box::new(f))),
        }
    }

    /// Dispatch handle bound to `store`.
    pub fn for_store<St: Store<Action = A>>(store: &Rc<St>) -> Self {
        let store = Rc::clone(store);
        Self::new(move |action| store.dispatch(action))
    }

    /// Forward an action to the store.
    pub fn call(&self, action: A) -> A {
        (self.inner.0)(action)
    }

    /// Recover a dispatch handle that was passed down as a prop.
    pub fn from_prop(value: &PropValue) -> Option<Self> {
        value.downcast::<DispatchFn<A>>().map(|inner| Self { inner })
    }

    /// Whether two handles are the same dispatch function.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<A: 'static> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A: 'static> fmt::Debug for Dispatch<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dispatch({:p})", Rc::as_ptr(&self.inner))
    }
}

impl<A: 'static> From<Dispatch<A>> for PropValue {
    fn from(dispatch: Dispatch<A>) -> Self {
        let inner: Rc<dyn Any> = dispatch.inner;
        PropValue::Opaque(inner)
    }
}

impl<A: 'static> From<&Dispatch<A>> for PropValue {
    fn from(dispatch: &Dispatch<A>) -> Self {
        dispatch.clone().into()
    }
}
