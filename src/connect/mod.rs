//! Connect - bind a store to a component through memoized derivations.
//!
//! A connected component derives the props of the component it wraps in
//! three stages:
//!
//! ```text
//! store state + own props ──► map_state ──► state props ─┐
//! dispatch    + own props ──► map_dispatch ► dispatch props ├─► merge ──► merged props ──► render
//! own props ─────────────────────────────────────────────┘
//! ```
//!
//! Each stage is memoized per instance. In pure mode (the default) a stage
//! only reruns when one of its inputs changed, and an update that changes no
//! derived value hands back the previously rendered output unchanged.
//!
//! # Example
//!
//! ```ignore
//! use spark_connect::{connect, Connect, MapState, Props, ReducerStore};
//!
//! type Counter = ReducerStore<i64, i64>;
//!
//! let store = ReducerStore::new(1, |count, delta: &i64| std::rc::Rc::new(**count + delta));
//! let connector = connect::<Counter>(Connect {
//!     map_state: Some(MapState::new(|count: &i64| Ok(Props::new().with("count", *count)))),
//!     ..Default::default()
//! });
//!
//! let view = connector.wrap(|props: &Props| format!("{:?}", props.get("count")));
//! let instance = view.instantiate_with_store(Props::new(), store.clone())?;
//! instance.did_mount();
//! let output = instance.render()?;
//! ```
//!
//! # Lifecycle
//!
//! The rendering engine drives a [`Connected`] instance through:
//!
//! - `instantiate*` - resolve the store, snapshot its state, clear the cache
//! - `did_mount` - subscribe to the store (only if `map_state` was given)
//! - `will_receive_props` - record new own props
//! - `should_update` / `will_update` / `render` - the per-update pass
//! - `will_unmount` - unsubscribe and clear the cache

mod attempt;
mod cache;
pub mod derive;
mod instance;
mod subscription;

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::{ConnectError, Result};
use crate::store::{current_store, Store};
use crate::types::{PropValue, Props};

pub use cache::DirtyFlags;
pub use derive::{
    bind_action_creators, check_shape, default_map_dispatch, default_map_state, default_merge,
    ActionCreator, ActionCreators, BoundActionCreator, Deriver, MapDispatch, MapState, Mapped,
    MergeProps, ShapeWarning,
};
pub use instance::Connected;

// =============================================================================
// Component
// =============================================================================

/// The rendering unit a connector wraps.
pub trait Component: 'static {
    type Output: 'static;

    /// Produce output from the merged props.
    fn render(&self, props: &Props) -> Self::Output;

    /// Name used in the connected component's display name.
    fn display_name(&self) -> &str {
        "Component"
    }
}

impl<F, O> Component for F
where
    F: Fn(&Props) -> O + 'static,
    O: 'static,
{
    type Output = O;

    fn render(&self, props: &Props) -> O {
        self(props)
    }
}

/// A component with an explicit display name.
pub struct Named<C> {
    name: String,
    component: C,
}

impl<C: Component> Named<C> {
    pub fn new(name: impl Into<String>, component: C) -> Self {
        Self {
            name: name.into(),
            component,
        }
    }

    pub fn inner(&self) -> &C {
        &self.component
    }
}

impl<C: Component> Component for Named<C> {
    type Output = C::Output;

    fn render(&self, props: &Props) -> C::Output {
        self.component.render(props)
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// Options
// =============================================================================

/// Behaviour switches for a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Skip recomputation and re-rendering when inputs are shallow equal.
    pub pure: bool,
    /// Expose the last rendered output through [`Connected::wrapped_instance`].
    pub with_ref: bool,
    /// Let live instances pick up a [`ConnectedComponent::hot_swap`].
    pub hot_reload: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            pure: true,
            with_ref: false,
            hot_reload: cfg!(debug_assertions),
        }
    }
}

impl ConnectOptions {
    pub fn pure(mut self, pure: bool) -> Self {
        self.pure = pure;
        self
    }

    pub fn with_ref(mut self, with_ref: bool) -> Self {
        self.with_ref = with_ref;
        self
    }

    pub fn hot_reload(mut self, hot_reload: bool) -> Self {
        self.hot_reload = hot_reload;
        self
    }
}

// =============================================================================
// Connect configuration
// =============================================================================

/// The derivation functions and options given to [`connect`].
///
/// Leaving a stage `None` selects its default: no state props (and no store
/// subscription), `{ dispatch }`, and `{ ...own, ...state, ...dispatch }`.
pub struct Connect<S: 'static, A: 'static> {
    pub map_state: Option<MapState<S>>,
    pub map_dispatch: Option<MapDispatch<A>>,
    pub merge_props: Option<MergeProps>,
    pub options: ConnectOptions,
}

impl<S: 'static, A: 'static> Default for Connect<S, A> {
    fn default() -> Self {
        Self {
            map_state: None,
            map_dispatch: None,
            merge_props: None,
            options: ConnectOptions::default(),
        }
    }
}

thread_local! {
    static NEXT_VERSION: Cell<u64> = const { Cell::new(0) };
}

fn next_version() -> u64 {
    NEXT_VERSION.with(|next| {
        let version = next.get();
        next.set(version + 1);
        version
    })
}

/// Build a connector for stores of type `St`.
///
/// Every call stamps a new version; instances compare against it to detect
/// that their configuration was hot swapped.
pub fn connect<St: Store>(config: Connect<St::State, St::Action>) -> Connector<St> {
    let should_subscribe = config.map_state.is_some();
    let inner = ConnectorInner {
        map_state: config.map_state.unwrap_or_else(default_map_state),
        map_dispatch: config.map_dispatch.unwrap_or_else(default_map_dispatch),
        merge_props: config.merge_props,
        should_subscribe,
        options: config.options,
        version: next_version(),
    };
    Connector { inner: Rc::new(inner) }
}

// =============================================================================
// Connector
// =============================================================================

pub(crate) struct ConnectorInner<St: Store> {
    pub(crate) map_state: MapState<St::State>,
    pub(crate) map_dispatch: MapDispatch<St::Action>,
    merge_props: Option<MergeProps>,
    pub(crate) should_subscribe: bool,
    pub(crate) options: ConnectOptions,
    pub(crate) version: u64,
}

impl<St: Store> ConnectorInner<St> {
    /// Merged props are compared only for a custom merge in pure mode.
    pub(crate) fn check_merged_equals(&self) -> bool {
        self.options.pure && self.merge_props.is_some()
    }

    pub(crate) fn merge(
        &self,
        state_props: &PropValue,
        dispatch_props: &PropValue,
        own_props: &Props,
    ) -> anyhow::Result<PropValue> {
        match &self.merge_props {
            Some(merge) => merge.call(state_props, dispatch_props, own_props),
            None => Ok(default_merge(state_props, dispatch_props, own_props)),
        }
    }
}

/// A configured binding, ready to wrap a component.
pub struct Connector<St: Store> {
    inner: Rc<ConnectorInner<St>>,
}

impl<St: Store> Clone for Connector<St> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<St: Store> fmt::Debug for Connector<St> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("version", &self.inner.version)
            .field("options", &self.inner.options)
            .field("should_subscribe", &self.inner.should_subscribe)
            .finish_non_exhaustive()
    }
}

impl<St: Store> Connector<St> {
    pub fn version(&self) -> u64 {
        self.inner.version
    }

    pub fn options(&self) -> ConnectOptions {
        self.inner.options
    }

    /// Whether instances subscribe to the store at all.
    pub fn should_subscribe(&self) -> bool {
        self.inner.should_subscribe
    }

    /// Wrap `component`.
    pub fn wrap<C: Component>(&self, component: C) -> ConnectedComponent<St, C> {
        let display_name = format!("Connect({})", component.display_name());
        ConnectedComponent {
            shared: Rc::new(Shared {
                connector: RefCell::new(self.clone()),
                component,
                display_name,
            }),
        }
    }

    pub(crate) fn inner(&self) -> Rc<ConnectorInner<St>> {
        Rc::clone(&self.inner)
    }
}

// =============================================================================
// Connected component
// =============================================================================

struct Shared<St: Store, C: Component> {
    connector: RefCell<Connector<St>>,
    component: C,
    display_name: String,
}

/// A wrapped component. Instantiate it once per place it is mounted.
///
/// Clones share the wrapped component and the current configuration.
pub struct ConnectedComponent<St: Store, C: Component> {
    shared: Rc<Shared<St, C>>,
}

impl<St: Store, C: Component> Clone for ConnectedComponent<St, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<St: Store, C: Component> ConnectedComponent<St, C> {
    /// `Connect(<wrapped display name>)`.
    pub fn display_name(&self) -> &str {
        &self.shared.display_name
    }

    /// The component being wrapped.
    pub fn wrapped_component(&self) -> &C {
        &self.shared.component
    }

    /// Version of the configuration currently in effect.
    pub fn version(&self) -> u64 {
        self.connector().version()
    }

    /// The configuration currently in effect.
    pub fn connector(&self) -> Ref<'_, Connector<St>> {
        self.shared.connector.borrow()
    }

    /// Replace the configuration, as when the binding is redefined during
    /// development. Live instances adopt it on their next `will_update` when
    /// `hot_reload` is enabled.
    pub fn hot_swap(&self, connector: Connector<St>) {
        debug!(
            display_name = %self.shared.display_name,
            from = self.version(),
            to = connector.version(),
            "configuration swapped"
        );
        *self.shared.connector.borrow_mut() = connector;
    }

    /// Instantiate against the ambient store (see [`crate::store::provider`]).
    pub fn instantiate(&self, own_props: Props) -> Result<Connected<St, C>> {
        self.instantiate_with(own_props, None)
    }

    /// Instantiate against an explicit store.
    pub fn instantiate_with_store(
        &self,
        own_props: Props,
        store: Rc<St>,
    ) -> Result<Connected<St, C>> {
        self.instantiate_with(own_props, Some(store))
    }

    /// Instantiate with an optional store override, falling back to the
    /// ambient store.
    pub fn instantiate_with(
        &self,
        own_props: Props,
        store: Option<Rc<St>>,
    ) -> Result<Connected<St, C>> {
        let store = store
            .or_else(current_store::<St>)
            .ok_or_else(|| ConnectError::MissingStore {
                display_name: self.shared.display_name.clone(),
            })?;
        Ok(Connected::create(self.clone(), store, own_props))
    }

    pub(crate) fn config(&self) -> Rc<ConnectorInner<St>> {
        self.shared.connector.borrow().inner()
    }

    pub(crate) fn component(&self) -> &C {
        &self.shared.component
    }
}
