//! Connected instance - one mounted binding between a store and a component.
//!
//! # Reentrancy
//!
//! Derivers, the wrapped component and the store may all call back into the
//! instance synchronously (a deriver that dispatches, a store that notifies
//! while subscribing). No `RefCell` borrow is held across a call into user
//! code or into the store, and the render pass snapshots and clears the
//! dirty flags before doing any work, so a nested update only ever sees a
//! consistent instance.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace};

use super::attempt::{attempt, Attempt};
use super::cache::{DirtyFlags, StageCache};
use super::derive::{check_shape, StageCell};
use super::subscription::Subscription;
use super::{Component, ConnectedComponent, ConnectorInner};
use crate::error::{ConnectError, Result};
use crate::store::{Dispatch, Store};
use crate::types::{shallow_equal, PropValue, Props};

// =============================================================================
// Instance state
// =============================================================================

type RenderRequest = Rc<dyn Fn()>;

struct Instance<St: Store, C: Component> {
    class: ConnectedComponent<St, C>,
    store: Rc<St>,
    dispatch: Dispatch<St::Action>,
    own_props: RefCell<Rc<Props>>,
    store_state: RefCell<Rc<St::State>>,
    state_stage: StageCell<St::State>,
    dispatch_stage: StageCell<Dispatch<St::Action>>,
    cache: StageCache<C::Output>,
    subscription: Subscription,
    /// The configuration generation this instance adopted.
    config: RefCell<Rc<ConnectorInner<St>>>,
    render_request: RefCell<Option<RenderRequest>>,
}

impl<St: Store, C: Component> Instance<St, C> {
    fn config(&self) -> Rc<ConnectorInner<St>> {
        Rc::clone(&self.config.borrow())
    }

    fn display_name(&self) -> &str {
        self.class.display_name()
    }

    fn own_props(&self) -> Rc<Props> {
        Rc::clone(&self.own_props.borrow())
    }

    fn clear_cache(&self) {
        self.cache.clear();
        self.state_stage.clear();
        self.dispatch_stage.clear();
    }

    // -------------------------------------------------------------------------
    // Subscription
    // -------------------------------------------------------------------------

    fn try_subscribe(self: &Rc<Self>) {
        if !self.config().should_subscribe {
            return;
        }

        let weak = Rc::downgrade(self);
        let subscribed = self.subscription.try_subscribe(|| {
            self.store.subscribe(Rc::new(move || {
                if let Some(instance) = weak.upgrade() {
                    instance.handle_change();
                }
            }))
        });

        if subscribed {
            debug!(display_name = self.display_name(), "subscribed to store");
            // The store may have changed between construction and now.
            self.handle_change();
        }
    }

    fn try_unsubscribe(&self) {
        if self.subscription.try_unsubscribe() {
            debug!(display_name = self.display_name(), "unsubscribed from store");
        }
    }

    /// Store listener.
    fn handle_change(&self) {
        if !self.subscription.is_subscribed() {
            return;
        }

        let config = self.config();
        let pure = config.options.pure;
        let state = self.store.state();
        let previous = Rc::clone(&self.store_state.borrow());
        if pure && Rc::ptr_eq(&state, &previous) {
            return;
        }

        // Only a resolved, own-props-insensitive state stage can be computed
        // ahead of the render: its result cannot depend on props that may
        // still change before the render happens.
        if pure && self.state_stage.depends_on_own_props() == Some(false) {
            let outcome = attempt(self.state_stage.method(), self.display_name(), || {
                self.update_state_props_if_needed()
            });
            match outcome {
                Attempt::Completed(false) => {
                    trace!(
                        display_name = self.display_name(),
                        "store update left state props unchanged"
                    );
                    return;
                }
                Attempt::Completed(true) => {}
                Attempt::Captured(error) => {
                    debug!(
                        display_name = self.display_name(),
                        error = %error,
                        "deferring precalculation error"
                    );
                    self.cache.defer_error(error);
                }
            }
            self.cache.mark(DirtyFlags::STATE_PROPS_PRECALCULATED);
        }

        self.cache.mark(DirtyFlags::STORE_STATE_CHANGED);
        *self.store_state.borrow_mut() = state;

        let request = self.render_request.borrow().clone();
        if let Some(request) = request {
            request();
        }
    }

    // -------------------------------------------------------------------------
    // Stages
    // -------------------------------------------------------------------------

    fn compute_state_props(&self, config: &ConnectorInner<St>) -> Result<PropValue> {
        let state = self.store.state();
        let own_props = self.own_props();
        self.state_stage
            .compute(&config.map_state, &state, &own_props, self.display_name())
    }

    fn compute_dispatch_props(&self, config: &ConnectorInner<St>) -> Result<PropValue> {
        let own_props = self.own_props();
        self.dispatch_stage
            .compute(&config.map_dispatch, &self.dispatch, &own_props, self.display_name())
    }

    fn update_state_props_if_needed(&self) -> Result<bool> {
        let next = self.compute_state_props(&self.config())?;
        Ok(self.cache.state_props.update_if_needed(next, true))
    }

    fn update_dispatch_props_if_needed(&self) -> Result<bool> {
        let next = self.compute_dispatch_props(&self.config())?;
        Ok(self.cache.dispatch_props.update_if_needed(next, true))
    }

    fn update_merged_props_if_needed(&self, config: &ConnectorInner<St>) -> Result<bool> {
        let state_props = self.cache.state_props.get().unwrap_or_default();
        let dispatch_props = self.cache.dispatch_props.get().unwrap_or_default();
        let own_props = self.own_props();

        let merged = config
            .merge(&state_props, &dispatch_props, &own_props)
            .map_err(|source| ConnectError::Derive {
                method: "merge_props",
                display_name: self.display_name().to_string(),
                source,
            })?;
        check_shape(&merged, "merge_props", self.display_name());
        Ok(self
            .cache
            .merged_props
            .update_if_needed(merged, config.check_merged_equals()))
    }

    // -------------------------------------------------------------------------
    // Render
    // -------------------------------------------------------------------------

    fn render(&self) -> Result<Rc<C::Output>> {
        let flags = self.cache.take_flags();
        let precalculation_error = self.cache.take_error();
        let rendered = self.cache.rendered();

        if let Some(error) = precalculation_error {
            return Err(error);
        }

        let config = self.config();
        let own_props_changed = flags.contains(DirtyFlags::OWN_PROPS_CHANGED);
        let store_state_changed = flags.contains(DirtyFlags::STORE_STATE_CHANGED);

        let incremental = config.options.pure && rendered.is_some();
        let (should_update_state, should_update_dispatch) = if incremental {
            let state_sensitive = self.state_stage.depends_on_own_props().unwrap_or(true);
            let dispatch_sensitive = self.dispatch_stage.depends_on_own_props().unwrap_or(true);
            (
                store_state_changed || (own_props_changed && state_sensitive),
                own_props_changed && dispatch_sensitive,
            )
        } else {
            (true, true)
        };

        let state_changed = if flags.contains(DirtyFlags::STATE_PROPS_PRECALCULATED) {
            true
        } else if should_update_state {
            self.update_state_props_if_needed()?
        } else {
            false
        };

        let dispatch_changed = if should_update_dispatch {
            self.update_dispatch_props_if_needed()?
        } else {
            false
        };

        let merged_changed = if state_changed || dispatch_changed || own_props_changed {
            self.update_merged_props_if_needed(&config)?
        } else {
            false
        };

        if !merged_changed {
            if let Some(output) = rendered {
                trace!(display_name = self.display_name(), "reusing rendered output");
                return Ok(output);
            }
        }

        let merged = self.cache.merged_props.get().unwrap_or_default();
        let empty = Props::new();
        let props = merged.as_props().unwrap_or(&empty);
        let output = Rc::new(self.class.component().render(props));
        self.cache.set_rendered(Rc::clone(&output));
        Ok(output)
    }
}

// =============================================================================
// Connected
// =============================================================================

/// A live connected component instance.
///
/// Dropping it ends its store subscription.
pub struct Connected<St: Store, C: Component> {
    inner: Rc<Instance<St, C>>,
}

impl<St: Store, C: Component> Connected<St, C> {
    pub(crate) fn create(
        class: ConnectedComponent<St, C>,
        store: Rc<St>,
        own_props: Props,
    ) -> Self {
        let config = class.config();
        let dispatch = Dispatch::for_store(&store);
        let store_state = store.state();
        let inner = Instance {
            state_stage: StageCell::new("map_state_to_props"),
            dispatch_stage: StageCell::new("map_dispatch_to_props"),
            cache: StageCache::new(),
            subscription: Subscription::new(),
            config: RefCell::new(config),
            render_request: RefCell::new(None),
            own_props: RefCell::new(Rc::new(own_props)),
            store_state: RefCell::new(store_state),
            class,
            store,
            dispatch,
        };
        let connected = Self { inner: Rc::new(inner) };
        connected.inner.clear_cache();
        connected
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Attached to the tree: start listening to the store.
    pub fn did_mount(&self) {
        self.inner.try_subscribe();
    }

    /// New own props from the parent. Marks them dirty unless shallow equal
    /// to the current ones in pure mode.
    pub fn will_receive_props(&self, next: Props) {
        let pure = self.inner.config().options.pure;
        if !pure || !shallow_equal(&next, &self.inner.own_props()) {
            self.inner.cache.mark(DirtyFlags::OWN_PROPS_CHANGED);
        }
        *self.inner.own_props.borrow_mut() = Rc::new(next);
    }

    /// Whether the engine should render this instance again.
    pub fn should_update(&self) -> bool {
        let flags = self.inner.cache.flags();
        !self.inner.config().options.pure
            || flags.intersects(DirtyFlags::OWN_PROPS_CHANGED | DirtyFlags::STORE_STATE_CHANGED)
    }

    /// Pre-render hook. Picks up a hot-swapped configuration.
    ///
    /// Until then the instance keeps running the generation it adopted last,
    /// derivers and options alike.
    pub fn will_update(&self) {
        let adopted = self.inner.config();
        let current = self.inner.class.config();
        if !adopted.options.hot_reload || adopted.version == current.version {
            return;
        }

        debug!(
            display_name = self.inner.display_name(),
            from = adopted.version,
            to = current.version,
            "hot reloading"
        );
        *self.inner.config.borrow_mut() = current;
        self.inner.try_subscribe();
        self.inner.clear_cache();
    }

    /// Produce the wrapped component's output, reusing the previous output
    /// when no derived props changed.
    ///
    /// An error captured while precalculating state props on a store
    /// notification is returned here.
    pub fn render(&self) -> Result<Rc<C::Output>> {
        self.inner.render()
    }

    /// Detached from the tree: stop listening and drop derived data.
    pub fn will_unmount(&self) {
        self.inner.try_unsubscribe();
        self.inner.clear_cache();
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscription.is_subscribed()
    }

    /// Register the callback a store change uses to ask for a render.
    pub fn on_render_request(&self, request: impl Fn() + 'static) {
        *self.inner.render_request.borrow_mut() = Some(Rc::new(request));
    }

    /// The last output of the wrapped component.
    ///
    /// Fails unless `with_ref` was enabled.
    pub fn wrapped_instance(&self) -> Result<Option<Rc<C::Output>>> {
        if !self.inner.config().options.with_ref {
            return Err(ConnectError::WrappedInstanceDisabled {
                display_name: self.inner.display_name().to_string(),
            });
        }
        Ok(self.inner.cache.rendered())
    }

    pub fn display_name(&self) -> &str {
        self.inner.display_name()
    }

    pub fn store(&self) -> &Rc<St> {
        &self.inner.store
    }

    pub fn own_props(&self) -> Rc<Props> {
        self.inner.own_props()
    }

    pub fn state_props(&self) -> Option<PropValue> {
        self.inner.cache.state_props.get()
    }

    pub fn dispatch_props(&self) -> Option<PropValue> {
        self.inner.cache.dispatch_props.get()
    }

    pub fn merged_props(&self) -> Option<PropValue> {
        self.inner.cache.merged_props.get()
    }

    /// Version of the configuration this instance last adopted.
    pub fn version(&self) -> u64 {
        self.inner.config().version
    }

    /// Whether the state stage resolved through a factory.
    pub fn is_state_factory_derived(&self) -> bool {
        self.inner.state_stage.is_factory_derived()
    }

    /// Whether the dispatch stage resolved through a factory.
    pub fn is_dispatch_factory_derived(&self) -> bool {
        self.inner.dispatch_stage.is_factory_derived()
    }

    /// Pending dirty flags.
    pub fn dirty_flags(&self) -> DirtyFlags {
        self.inner.cache.flags()
    }
}

impl<St: Store, C: Component> Drop for Connected<St, C> {
    fn drop(&mut self) {
        self.inner.try_unsubscribe();
    }
}
