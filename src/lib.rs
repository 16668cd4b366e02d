//! # spark-connect
//!
//! Selective store subscriptions for reactive UI components.
//!
//! A connected component binds one external store to one wrapped component.
//! The wrapped component's props are derived from the store state and from
//! the props its parent supplies, through a three-stage pipeline that is
//! memoized per instance so that store updates unrelated to a component cost
//! (almost) nothing and produce no re-render.
//!
//! ## Architecture
//!
//! ```text
//! Store ──notify──► Subscription ──precalculate?──► dirty flags
//!                                                        │
//! own props ──will_receive_props──────────────────────► render
//!                                                        │
//!        map_state ─► map_dispatch ─► merge ─► wrapped component output
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Props, prop values, shallow equality and shape checks
//! - [`store`] - The store contract, a reducer store, and the ambient provider
//! - [`connect`] - Derivers, connectors and connected instances
//! - [`error`] - Error types

pub mod connect;
pub mod error;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use types::{is_plain_object, shallow_equal, shallow_equal_values, PropValue, Props};

pub use error::{ConnectError, Result};

pub use store::{
    current_store, pop_store_context, provide_store, push_store_context, Dispatch, Listener,
    ReducerStore, Store, Unsubscribe,
};

pub use connect::{
    bind_action_creators, connect, ActionCreator, ActionCreators, BoundActionCreator, Component,
    Connect, ConnectOptions, Connected, ConnectedComponent, Connector, Deriver, DirtyFlags,
    MapDispatch, MapState, Mapped, MergeProps, Named, ShapeWarning,
};
