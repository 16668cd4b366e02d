//! Subscription - attach/detach bookkeeping for one component instance.
//!
//! The presence of an [`Unsubscribe`] handle is the only record of whether
//! the instance is subscribed. The store is never called while the handle
//! cell is borrowed, so a store that notifies synchronously during
//! subscribe or unsubscribe cannot trip a borrow conflict.

use std::cell::RefCell;

use crate::store::Unsubscribe;

#[derive(Default)]
pub(crate) struct Subscription {
    handle: RefCell<Option<Unsubscribe>>,
}

impl Subscription {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        self.handle.borrow().is_some()
    }

    /// Attach via `subscribe` unless already attached.
    ///
    /// Returns `true` only when a new subscription was made.
    pub(crate) fn try_subscribe(&self, subscribe: impl FnOnce() -> Unsubscribe) -> bool {
        if self.is_subscribed() {
            return false;
        }
        let handle = subscribe();
        let mut slot = self.handle.borrow_mut();
        if slot.is_some() {
            // Subscribed reentrantly while `subscribe` ran; keep the first one.
            drop(slot);
            handle();
            return false;
        }
        *slot = Some(handle);
        true
    }

    /// Detach if attached. Safe to call any number of times.
    ///
    /// Returns `true` only when a subscription was actually ended.
    pub(crate) fn try_unsubscribe(&self) -> bool {
        let handle = self.handle.borrow_mut().take();
        match handle {
            Some(unsubscribe) => {
                unsubscribe();
                true
            }
            None => false,
        }
    }
}
