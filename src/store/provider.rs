//! Provider - ambient store context.
//!
//! Components instantiated without an explicit store look one up here. The
//! context is a thread-local stack, so nested providers shadow outer ones and
//! stores of different types can be provided side by side.
//!
//! # Example
//!
//! ```ignore
//! use spark_connect::store::{provide_store, current_store, ReducerStore};
//!
//! let store = ReducerStore::new(0_i64, |s, _: &()| s.clone());
//! provide_store(store, || {
//!     let found = current_store::<ReducerStore<i64, ()>>();
//!     assert!(found.is_some());
//! });
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use super::Store;

thread_local! {
    static STORE_STACK: RefCell<Vec<Rc<dyn Any>>> = const { RefCell::new(Vec::new()) };
}

/// Push a store onto the ambient context.
///
/// Must be balanced by [`pop_store_context`]. Prefer [`provide_store`].
pub fn push_store_context<St: Store>(store: Rc<St>) {
    STORE_STACK.with(|stack| stack.borrow_mut().push(store));
}

/// Pop the innermost ambient store.
pub fn pop_store_context() {
    STORE_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
}

/// Innermost ambient store of type `St`, if any.
pub fn current_store<St: Store>() -> Option<Rc<St>> {
    STORE_STACK.with(|stack| {
        stack
            .borrow()
            .iter()
            .rev()
            .find_map(|entry| Rc::clone(entry).downcast::<St>().ok())
    })
}

struct ContextGuard;

impl Drop for ContextGuard {
    fn drop(&mut self) {
        pop_store_context();
    }
}

/// Run `f` with `store` provided as the ambient store.
///
/// The context is popped even if `f` panics.
pub fn provide_store<St: Store, R>(store: Rc<St>, f: impl FnOnce() -> R) -> R {
    push_store_context(store);
    let _guard = ContextGuard;
    f()
}
