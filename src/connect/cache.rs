//! Memoization cache - per-instance stage results and dirty flags.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::ConnectError;
use crate::types::{shallow_equal_values, PropValue};

bitflags::bitflags! {
    /// Why the next render has work to do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirtyFlags: u8 {
        const OWN_PROPS_CHANGED = 1 << 0;
        const STORE_STATE_CHANGED = 1 << 1;
        /// State props were already recomputed by a store notification.
        const STATE_PROPS_PRECALCULATED = 1 << 2;
    }
}

// =============================================================================
// Memo slot
// =============================================================================

/// One memoized stage result.
#[derive(Default)]
pub(crate) struct Memo {
    value: RefCell<Option<PropValue>>,
}

impl Memo {
    /// Store `next` unless it is shallow equal to the current value.
    ///
    /// Returns whether the slot changed. An empty slot always changes. With
    /// `check_equals` off every value is stored.
    pub(crate) fn update_if_needed(&self, next: PropValue, check_equals: bool) -> bool {
        let mut slot = self.value.borrow_mut();
        let unchanged = slot
            .as_ref()
            .is_some_and(|previous| shallow_equal_values(&next, previous));
        if check_equals && unchanged {
            return false;
        }
        *slot = Some(next);
        true
    }

    pub(crate) fn get(&self) -> Option<PropValue> {
        self.value.borrow().clone()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.value.borrow().is_none()
    }

    pub(crate) fn clear(&self) {
        *self.value.borrow_mut() = None;
    }
}

// =============================================================================
// Stage cache
// =============================================================================

/// Everything a component instance memoizes between renders.
pub(crate) struct StageCache<O> {
    pub(crate) state_props: Memo,
    pub(crate) dispatch_props: Memo,
    pub(crate) merged_props: Memo,
    rendered: RefCell<Option<Rc<O>>>,
    flags: Cell<DirtyFlags>,
    precalculation_error: RefCell<Option<ConnectError>>,
}

impl<O> StageCache<O> {
    pub(crate) fn new() -> Self {
        let cache = Self {
            state_props: Memo::default(),
            dispatch_props: Memo::default(),
            merged_props: Memo::default(),
            rendered: RefCell::new(None),
            flags: Cell::new(DirtyFlags::empty()),
            precalculation_error: RefCell::new(None),
        };
        cache.clear();
        cache
    }

    pub(crate) fn rendered(&self) -> Option<Rc<O>> {
        self.rendered.borrow().clone()
    }

    pub(crate) fn set_rendered(&self, output: Rc<O>) {
        *self.rendered.borrow_mut() = Some(output);
    }

    pub(crate) fn flags(&self) -> DirtyFlags {
        self.flags.get()
    }

    pub(crate) fn mark(&self, flags: DirtyFlags) {
        self.flags.set(self.flags.get() | flags);
    }

    /// Return the current flags and reset them to empty.
    pub(crate) fn take_flags(&self) -> DirtyFlags {
        self.flags.replace(DirtyFlags::empty())
    }

    /// Keep an error captured off the render path for the next render.
    pub(crate) fn defer_error(&self, error: ConnectError) {
        *self.precalculation_error.borrow_mut() = Some(error);
    }

    pub(crate) fn take_error(&self) -> Option<ConnectError> {
        self.precalculation_error.borrow_mut().take()
    }

    /// Drop every derived value. The next render recomputes all stages.
    pub(crate) fn clear(&self) {
        self.state_props.clear();
        self.dispatch_props.clear();
        self.merged_props.clear();
        *self.rendered.borrow_mut() = None;
        *self.precalculation_error.borrow_mut() = None;
        self.flags
            .set(DirtyFlags::OWN_PROPS_CHANGED | DirtyFlags::STORE_STATE_CHANGED);
    }
}
