//! Derivers - State, dispatch and merge stage functions.
//!
//! A [`Deriver`] maps a stage input (store state, or the dispatch handle) plus
//! the component's own props to a prop mapping. Whether a deriver reads own
//! props is declared up front by how it is constructed:
//!
//! - [`Deriver::new`] - one argument, insensitive to own props
//! - [`Deriver::with_props`] - two arguments, recomputed when own props change
//! - [`Deriver::from_fn`] - explicit flag
//!
//! A deriver may return [`Mapped::Factory`] from its first call. The returned
//! deriver then permanently replaces the original for that component
//! instance, which is how per-instance memoized selectors are built.
//!
//! # Known limitation
//!
//! A deriver built with [`Deriver::new`] that captures own props some other
//! way (a shared cell, say) will not be recomputed when they change. The
//! sensitivity flag is the only signal the pipeline has.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

use crate::error::ConnectError;
use crate::store::Dispatch;
use crate::types::{is_plain_object, PropValue, Props};

// =============================================================================
// Deriver
// =============================================================================

/// What a deriver produced.
pub enum Mapped<I: 'static> {
    /// The stage's props. Expected to be a mapping.
    Props(PropValue),
    /// A deriver to use from now on instead of the one that returned it.
    Factory(Deriver<I>),
}

impl<I: 'static> From<Props> for Mapped<I> {
    fn from(props: Props) -> Self {
        Mapped::Props(props.into())
    }
}

impl<I: 'static> From<PropValue> for Mapped<I> {
    fn from(value: PropValue) -> Self {
        Mapped::Props(value)
    }
}

impl<I: 'static> From<Deriver<I>> for Mapped<I> {
    fn from(factory: Deriver<I>) -> Self {
        Mapped::Factory(factory)
    }
}

type DeriveFn<I> = dyn Fn(&I, &Props) -> anyhow::Result<Mapped<I>>;

/// A stage derivation function with a declared own-props sensitivity.
pub struct Deriver<I: 'static> {
    depends_on_own_props: bool,
    f: Rc<DeriveFn<I>>,
}

/// Derives state props from the store state.
pub type MapState<S> = Deriver<S>;

/// Derives dispatch props from the store's dispatch handle.
pub type MapDispatch<A> = Deriver<Dispatch<A>>;

impl<I: 'static> Deriver<I> {
    /// Deriver that reads only the stage input.
    pub fn new<M>(f: impl Fn(&I) -> anyhow::Result<M> + 'static) -> Self
    where
        M: Into<Mapped<I>>,
    {
        Self {
            depends_on_own_props: false,
            f: Rc::new(move |input: &I, _own: &Props| -> anyhow::Result<Mapped<I>> {
                f(input).map(Into::into)
            }),
        }
    }

    /// Deriver that also reads the component's own props.
    pub fn with_props<M>(f: impl Fn(&I, &Props) -> anyhow::Result<M> + 'static) -> Self
    where
        M: Into<Mapped<I>>,
    {
        Self::from_fn(true, f)
    }

    /// Deriver with an explicitly declared sensitivity.
    pub fn from_fn<M>(
        depends_on_own_props: bool,
        f: impl Fn(&I, &Props) -> anyhow::Result<M> + 'static,
    ) -> Self
    where
        M: Into<Mapped<I>>,
    {
        Self {
            depends_on_own_props,
            f: Rc::new(move |input: &I, own: &Props| -> anyhow::Result<Mapped<I>> {
                f(input, own).map(Into::into)
            }),
        }
    }

    pub fn depends_on_own_props(&self) -> bool {
        self.depends_on_own_props
    }

    pub fn call(&self, input: &I, own_props: &Props) -> anyhow::Result<Mapped<I>> {
        (self.f)(input, own_props)
    }

    /// Whether two handles wrap the same function.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.f, &other.f)
    }
}

impl<I: 'static> Clone for Deriver<I> {
    fn clone(&self) -> Self {
        Self {
            depends_on_own_props: self.depends_on_own_props,
            f: Rc::clone(&self.f),
        }
    }
}

impl<I: 'static> fmt::Debug for Deriver<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deriver")
            .field("depends_on_own_props", &self.depends_on_own_props)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Defaults
// =============================================================================

/// Default state stage: no state props.
pub fn default_map_state<S: 'static>() -> MapState<S> {
    Deriver::new(|_state: &S| Ok(Props::new()))
}

/// Default dispatch stage: `{ dispatch }`.
pub fn default_map_dispatch<A: 'static>() -> MapDispatch<A> {
    Deriver::new(|dispatch: &Dispatch<A>| Ok(Props::new().with("dispatch", dispatch)))
}

/// Default merge: `{ ...own, ...state, ...dispatch }`.
pub fn default_merge(
    state_props: &PropValue,
    dispatch_props: &PropValue,
    own_props: &Props,
) -> PropValue {
    let mut merged = own_props.clone();
    merged.spread_value(state_props);
    merged.spread_value(dispatch_props);
    merged.into()
}

// =============================================================================
// Merge
// =============================================================================

type MergeFn = dyn Fn(&PropValue, &PropValue, &Props) -> anyhow::Result<PropValue>;

/// Combines state props, dispatch props and own props into the final props.
#[derive(Clone)]
pub struct MergeProps {
    f: Rc<MergeFn>,
}

impl MergeProps {
    pub fn new<M>(f: impl Fn(&PropValue, &PropValue, &Props) -> anyhow::Result<M> + 'static) -> Self
    where
        M: Into<PropValue>,
    {
        let f: Rc<MergeFn> = Rc::new(
            move |state: &PropValue, dispatch: &PropValue, own: &Props| -> anyhow::Result<_> {
                f(state, dispatch, own).map(Into::<PropValue>::into)
            },
        );
        Self { f }
    }

    pub fn call(
        &self,
        state_props: &PropValue,
        dispatch_props: &PropValue,
        own_props: &Props,
    ) -> anyhow::Result<PropValue> {
        (self.f)(state_props, dispatch_props, own_props)
    }
}

impl fmt::Debug for MergeProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeProps").finish_non_exhaustive()
    }
}

// =============================================================================
// Action creators
// =============================================================================

/// Builds an action from call arguments.
pub type ActionCreator<A> = Rc<dyn Fn(&[PropValue]) -> A>;

/// Named action creators, bound to dispatch by [`MapDispatch::creators`].
pub type ActionCreators<A> = BTreeMap<String, ActionCreator<A>>;

struct BoundFn<A>(Box<dyn Fn(&[PropValue]) -> A>);

/// An action creator whose result is dispatched when called.
pub struct BoundActionCreator<A: 'static> {
    inner: Rc<BoundFn<A>>,
}

impl<A: 'static> BoundActionCreator<A> {
    /// Build the action, dispatch it, and return what dispatch returned.
    pub fn call(&self, args: &[PropValue]) -> A {
        (self.inner.0)(args)
    }

    /// Recover a bound creator that was passed down as a prop.
    pub fn from_prop(value: &PropValue) -> Option<Self> {
        value.downcast::<BoundFn<A>>().map(|inner| Self { inner })
    }
}

/// Bind every creator in `creators` to `dispatch`.
pub fn bind_action_creators<A: 'static>(
    creators: &ActionCreators<A>,
    dispatch: &Dispatch<A>,
) -> Props {
    creators
        .iter()
        .map(|(name, creator)| {
            let creator = Rc::clone(creator);
            let dispatch = dispatch.clone();
            let bound = BoundFn(Box::new(move |args: &[PropValue]| dispatch.call(creator(args))));
            (name.clone(), PropValue::opaque(Rc::new(bound)))
        })
        .collect()
}

impl<A: 'static> Deriver<Dispatch<A>> {
    /// Dispatch stage that binds a set of action creators.
    pub fn creators(creators: ActionCreators<A>) -> Self {
        Deriver::new(move |dispatch: &Dispatch<A>| Ok(bind_action_creators(&creators, dispatch)))
    }
}

// =============================================================================
// Shape check
// =============================================================================

/// A non-fatal shape violation in a stage result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeWarning {
    pub method: &'static str,
    pub display_name: String,
    pub received: &'static str,
}

impl fmt::Display for ShapeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}() in {} must return a plain object. Instead received {}.",
            self.method, self.display_name, self.received
        )
    }
}

/// Check that a stage result is a plain mapping, warning if not.
pub fn check_shape(
    value: &PropValue,
    method: &'static str,
    display_name: &str,
) -> Option<ShapeWarning> {
    if is_plain_object(value) {
        return None;
    }
    Some(shape_warning(method, display_name, value.kind()))
}

fn shape_warning(method: &'static str, display_name: &str, received: &'static str) -> ShapeWarning {
    let warning = ShapeWarning {
        method,
        display_name: display_name.to_string(),
        received,
    };
    warn!(method, display_name, received, "{warning}");
    warning
}

// =============================================================================
// Stage resolution
// =============================================================================

/// Where a stage stands for one component instance.
enum Resolution<I: 'static> {
    Unresolved,
    Resolved {
        deriver: Deriver<I>,
        from_factory: bool,
    },
}

/// Per-instance resolution state of one derivation stage.
///
/// Transitions once from unresolved to resolved per cache lifetime; only
/// [`StageCell::clear`] resets it.
pub(crate) struct StageCell<I: 'static> {
    method: &'static str,
    resolution: RefCell<Resolution<I>>,
}

impl<I: 'static> StageCell<I> {
    pub(crate) fn new(method: &'static str) -> Self {
        Self {
            method,
            resolution: RefCell::new(Resolution::Unresolved),
        }
    }

    pub(crate) fn method(&self) -> &'static str {
        self.method
    }

    /// Sensitivity of the resolved deriver; `None` until first resolution.
    pub(crate) fn depends_on_own_props(&self) -> Option<bool> {
        match &*self.resolution.borrow() {
            Resolution::Unresolved => None,
            Resolution::Resolved { deriver, .. } => Some(deriver.depends_on_own_props()),
        }
    }

    pub(crate) fn is_factory_derived(&self) -> bool {
        matches!(&*self.resolution.borrow(), Resolution::Resolved { from_factory: true, .. })
    }

    pub(crate) fn clear(&self) {
        *self.resolution.borrow_mut() = Resolution::Unresolved;
    }

    fn resolved(&self) -> Option<Deriver<I>> {
        match &*self.resolution.borrow() {
            Resolution::Unresolved => None,
            Resolution::Resolved { deriver, .. } => Some(deriver.clone()),
        }
    }

    fn derive_error(&self, display_name: &str, source: anyhow::Error) -> ConnectError {
        ConnectError::Derive {
            method: self.method,
            display_name: display_name.to_string(),
            source,
        }
    }

    /// Compute this stage's props, resolving the deriver on first use.
    ///
    /// No borrow is held while user code runs, so a deriver may dispatch.
    pub(crate) fn compute(
        &self,
        raw: &Deriver<I>,
        input: &I,
        own_props: &Props,
        display_name: &str,
    ) -> Result<PropValue, ConnectError> {
        let Some(deriver) = self.resolved() else {
            return self.configure(raw, input, own_props, display_name);
        };

        let value = match deriver.call(input, own_props) {
            Ok(Mapped::Props(value)) => value,
            Ok(Mapped::Factory(nested)) => {
                // Factories are only honoured on the first call. A later one
                // is passed through as an opaque handle.
                shape_warning(self.method, display_name, "factory");
                return Ok(PropValue::opaque(Rc::new(nested)));
            }
            Err(source) => return Err(self.derive_error(display_name, source)),
        };
        check_shape(&value, self.method, display_name);
        Ok(value)
    }

    fn configure(
        &self,
        raw: &Deriver<I>,
        input: &I,
        own_props: &Props,
        display_name: &str,
    ) -> Result<PropValue, ConnectError> {
        let mapped = raw
            .call(input, own_props)
            .map_err(|source| self.derive_error(display_name, source))?;

        match mapped {
            Mapped::Factory(factory) => {
                *self.resolution.borrow_mut() = Resolution::Resolved {
                    deriver: factory,
                    from_factory: true,
                };
                self.compute(raw, input, own_props, display_name)
            }
            Mapped::Props(value) => {
                *self.resolution.borrow_mut() = Resolution::Resolved {
                    deriver: raw.clone(),
                    from_factory: false,
                };
                check_shape(&value, self.method, display_name);
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn count_of(value: &PropValue) -> Option<i64> {
        value.as_props()?.get("count")?.as_int()
    }

    #[test]
    fn test_sensitivity_declared_by_constructor() {
        let one: MapState<i64> = Deriver::new(|_: &i64| Ok(Props::new()));
        let two: MapState<i64> = Deriver::with_props(|_: &i64, _: &Props| Ok(Props::new()));
        let explicit: MapState<i64> =
            Deriver::from_fn(false, |_: &i64, _: &Props| Ok(Props::new()));
        assert!(!one.depends_on_own_props());
        assert!(two.depends_on_own_props());
        assert!(!explicit.depends_on_own_props());
    }

    #[test]
    fn test_plain_deriver_resolves_to_itself() {
        let raw: MapState<i64> = Deriver::new(|state: &i64| Ok(Props::new().with("count", *state)));
        let cell = StageCell::new("map_state_to_props");
        assert_eq!(cell.depends_on_own_props(), None);

        let value = cell.compute(&raw, &3, &Props::new(), "Connect(Test)").unwrap();
        assert_eq!(count_of(&value), Some(3));
        assert_eq!(cell.depends_on_own_props(), Some(false));
        assert!(!cell.is_factory_derived());
    }

    #[test]
    fn test_factory_is_sticky() {
        let outer_calls = Rc::new(Cell::new(0));
        let outer_calls_clone = outer_calls.clone();
        let raw: MapState<i64> = Deriver::with_props(move |_: &i64, _: &Props| {
            outer_calls_clone.set(outer_calls_clone.get() + 1);
            let factory: MapState<i64> =
                Deriver::new(|state: &i64| Ok(Props::new().with("count", state * 10)));
            Ok(factory)
        });

        let cell = StageCell::new("map_state_to_props");
        let first = cell.compute(&raw, &1, &Props::new(), "Connect(Test)").unwrap();
        let second = cell.compute(&raw, &2, &Props::new(), "Connect(Test)").unwrap();

        assert_eq!(count_of(&first), Some(10));
        assert_eq!(count_of(&second), Some(20));
        assert_eq!(outer_calls.get(), 1);
        assert!(cell.is_factory_derived());
        // Sensitivity comes from the factory, not from the original.
        assert_eq!(cell.depends_on_own_props(), Some(false));
    }

    #[test]
    fn test_late_factory_passes_through_as_handle() {
        fn empty() -> MapState<i64> {
            Deriver::new(|_: &i64| Ok(Props::new()))
        }
        let raw: MapState<i64> = Deriver::new(|_: &i64| {
            let resolved: MapState<i64> = Deriver::new(|_: &i64| Ok(empty()));
            Ok(resolved)
        });

        let cell = StageCell::new("map_state_to_props");
        let value = cell.compute(&raw, &1, &Props::new(), "Connect(Test)").unwrap();
        assert!(!is_plain_object(&value));
        assert!(value.downcast::<Deriver<i64>>().is_some());
        // The late factory is never adopted.
        let again = cell.compute(&raw, &2, &Props::new(), "Connect(Test)").unwrap();
        assert!(again.downcast::<Deriver<i64>>().is_some());
    }

    #[test]
    fn test_clear_resets_resolution() {
        let outer_calls = Rc::new(Cell::new(0));
        let outer_calls_clone = outer_calls.clone();
        let raw: MapState<i64> = Deriver::new(move |_: &i64| {
            outer_calls_clone.set(outer_calls_clone.get() + 1);
            Ok(Deriver::new(|_: &i64| Ok(Props::new())))
        });

        let cell = StageCell::new("map_state_to_props");
        cell.compute(&raw, &1, &Props::new(), "Connect(Test)").unwrap();
        cell.clear();
        assert_eq!(cell.depends_on_own_props(), None);
        cell.compute(&raw, &1, &Props::new(), "Connect(Test)").unwrap();
        assert_eq!(outer_calls.get(), 2);
    }

    #[test]
    fn test_errors_carry_method_and_name() {
        let raw: MapState<i64> =
            Deriver::new(|_: &i64| -> anyhow::Result<Props> { anyhow::bail!("boom") });
        let cell = StageCell::new("map_state_to_props");
        let err = cell.compute(&raw, &1, &Props::new(), "Connect(Test)").unwrap_err();
        match err {
            ConnectError::Derive { method, display_name, source } => {
                assert_eq!(method, "map_state_to_props");
                assert_eq!(display_name, "Connect(Test)");
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // A failed first call leaves the stage unresolved.
        assert_eq!(cell.depends_on_own_props(), None);
    }

    #[test]
    fn test_check_shape() {
        assert!(check_shape(&Props::new().into(), "merge_props", "Connect(Test)").is_none());
        let warning =
            check_shape(&PropValue::from(vec![]), "merge_props", "Connect(Test)").unwrap();
        assert_eq!(warning.received, "list");
        assert_eq!(
            warning.to_string(),
            "merge_props() in Connect(Test) must return a plain object. Instead received list."
        );
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_shape_violation_is_logged() {
        check_shape(&PropValue::from(7), "map_state_to_props", "Connect(Logged)");
        assert!(logs_contain("map_state_to_props() in Connect(Logged) must return a plain object"));
    }

    #[test]
    fn test_non_mapping_result_still_returned() {
        let raw: MapState<i64> = Deriver::new(|state: &i64| Ok(PropValue::from(*state)));
        let cell = StageCell::new("map_state_to_props");
        let value = cell.compute(&raw, &4, &Props::new(), "Connect(Test)").unwrap();
        assert_eq!(value.as_int(), Some(4));
    }

    #[test]
    fn test_default_merge_spreads_in_order() {
        let own = Props::new().with("a", 1).with("b", 1).with("c", 1);
        let state = PropValue::from(Props::new().with("b", 2).with("c", 2));
        let dispatch = PropValue::from(Props::new().with("c", 3));
        let merged = default_merge(&state, &dispatch, &own);
        let merged = merged.as_props().unwrap();
        assert_eq!(merged.get("a").and_then(PropValue::as_int), Some(1));
        assert_eq!(merged.get("b").and_then(PropValue::as_int), Some(2));
        assert_eq!(merged.get("c").and_then(PropValue::as_int), Some(3));
    }

    #[test]
    fn test_default_dispatch_exposes_handle() {
        let dispatch = Dispatch::new(|action: i32| action + 1);
        let cell = StageCell::new("map_dispatch_to_props");
        let value = cell
            .compute(&default_map_dispatch(), &dispatch, &Props::new(), "Connect(Test)")
            .unwrap();
        let handle = value
            .as_props()
            .and_then(|p| p.get("dispatch"))
            .and_then(Dispatch::<i32>::from_prop);
        assert!(handle.is_some_and(|h| h.ptr_eq(&dispatch)));
    }

    #[test]
    fn test_bound_action_creators_dispatch() {
        let seen = Rc::new(Cell::new(0));
        let seen_clone = seen.clone();
        let dispatch = Dispatch::new(move |action: i64| {
            seen_clone.set(action);
            action
        });

        let mut creators: ActionCreators<i64> = BTreeMap::new();
        creators.insert(
            "add".into(),
            Rc::new(|args: &[PropValue]| -> i64 {
                args.iter().filter_map(PropValue::as_int).sum()
            }),
        );

        let props = bind_action_creators(&creators, &dispatch);
        let add = props.get("add").and_then(BoundActionCreator::<i64>::from_prop).unwrap();
        assert_eq!(add.call(&[PropValue::from(2), PropValue::from(3)]), 5);
        assert_eq!(seen.get(), 5);
        assert!(!MapDispatch::creators(creators).depends_on_own_props());
    }
}
