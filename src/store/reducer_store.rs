//! ReducerStore - a minimal in-process store.
//!
//! State is replaced wholesale by a reducer. A reducer that hands back the
//! same `Rc` leaves the snapshot reference-unchanged, which is what lets
//! connected components skip all work for unrelated actions.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::{Listener, Store, Unsubscribe};

type Reducer<S, A> = Box<dyn Fn(&Rc<S>, &A) -> Rc<S>>;

// =============================================================================
// LISTENER REGISTRY
// =============================================================================

struct ListenerRegistry {
    listeners: Vec<(usize, Listener)>,
    next_id: usize,
}

impl ListenerRegistry {
    fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

// =============================================================================
// STORE
// =============================================================================

/// A reducer-driven store.
pub struct ReducerStore<S: 'static, A: 'static> {
    state: RefCell<Rc<S>>,
    reducer: Reducer<S, A>,
    registry: Rc<RefCell<ListenerRegistry>>,
    dispatch_count: Cell<usize>,
}

impl<S: 'static, A: 'static> ReducerStore<S, A> {
    pub fn new(initial: S, reducer: impl Fn(&Rc<S>, &A) -> Rc<S> + 'static) -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(Rc::new(initial)),
            reducer: Box::new(reducer),
            registry: Rc::new(RefCell::new(ListenerRegistry::new())),
            dispatch_count: Cell::new(0),
        })
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.registry.borrow().listeners.len()
    }

    /// Number of actions dispatched so far.
    pub fn dispatch_count(&self) -> usize {
        self.dispatch_count.get()
    }

    /// Replace the state without running the reducer, then notify.
    pub fn replace_state(&self, state: Rc<S>) {
        *self.state.borrow_mut() = state;
        self.notify();
    }

    fn notify(&self) {
        // Snapshot so listeners may subscribe or unsubscribe while being notified.
        let listeners: Vec<Listener> = self
            .registry
            .borrow()
            .listeners
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

impl<S: 'static, A: 'static> Store for ReducerStore<S, A> {
    type State = S;
    type Action = A;

    fn state(&self) -> Rc<S> {
        Rc::clone(&self.state.borrow())
    }

    fn dispatch(&self, action: A) -> A {
        let current = self.state();
        let next = (self.reducer)(&current, &action);
        *self.state.borrow_mut() = next;
        self.dispatch_count.set(self.dispatch_count.get() + 1);
        self.notify();
        action
    }

    fn subscribe(&self, listener: Listener) -> Unsubscribe {
        let id = {
            let mut registry = self.registry.borrow_mut();
            let id = registry.next_id();
            registry.listeners.push((id, listener));
            id
        };

        let registry: Weak<RefCell<ListenerRegistry>> = Rc::downgrade(&self.registry);
        Box::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.borrow_mut().listeners.retain(|(i, _)| *i != id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> Rc<ReducerStore<i64, i64>> {
        ReducerStore::new(0, |count, delta| {
            if *delta == 0 {
                Rc::clone(count)
            } else {
                Rc::new(**count + delta)
            }
        })
    }

    #[test]
    fn test_dispatch_runs_reducer_and_notifies() {
        let store = counter();
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let _unsubscribe = store.subscribe(Rc::new(move || calls_clone.set(calls_clone.get() + 1)));

        assert_eq!(store.dispatch(2), 2);
        assert_eq!(*store.state(), 2);
        assert_eq!(calls.get(), 1);
        assert_eq!(store.dispatch_count(), 1);
    }

    #[test]
    fn test_noop_reducer_keeps_identity() {
        let store = counter();
        let before = store.state();
        store.dispatch(0);
        assert!(Rc::ptr_eq(&before, &store.state()));
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let store = counter();
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let unsubscribe = store.subscribe(Rc::new(move || calls_clone.set(calls_clone.get() + 1)));
        assert_eq!(store.listener_count(), 1);

        unsubscribe();
        store.dispatch(1);
        assert_eq!(calls.get(), 0);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_unsubscribe_during_notification() {
        let store = counter();
        let calls = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Unsubscribe>>> = Rc::new(RefCell::new(None));

        let slot_clone = slot.clone();
        let calls_clone = calls.clone();
        let unsubscribe = store.subscribe(Rc::new(move || {
            calls_clone.set(calls_clone.get() + 1);
            if let Some(unsubscribe) = slot_clone.borrow_mut().take() {
                unsubscribe();
            }
        }));
        *slot.borrow_mut() = Some(unsubscribe);

        store.dispatch(1);
        store.dispatch(1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_reentrant_dispatch_from_listener() {
        let store = counter();
        let weak = Rc::downgrade(&store);
        let _unsubscribe = store.subscribe(Rc::new(move || {
            if let Some(store) = weak.upgrade() {
                if *store.state() < 3 {
                    store.dispatch(1);
                }
            }
        }));

        store.dispatch(1);
        assert_eq!(*store.state(), 3);
    }
}
