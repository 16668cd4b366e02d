//! Core types for spark-connect.
//!
//! Props are what flows out of the derivation pipeline and into the wrapped
//! component. Equality here is *identity* equality, the same notion the
//! change detection relies on: scalars and strings compare by value, shared
//! values (lists, nested maps, opaque handles) compare by pointer.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

// =============================================================================
// PropValue
// =============================================================================

/// A single property value.
///
/// Composite variants are reference counted so that cloning a prop set is
/// cheap and so that "did this value change" can be answered by pointer.
#[derive(Clone, Default)]
pub enum PropValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<[PropValue]>),
    Map(Rc<Props>),
    /// Anything else: callbacks, dispatch handles, domain objects.
    Opaque(Rc<dyn Any>),
}

impl PropValue {
    /// Wrap an arbitrary shared value. Identity is the `Rc` allocation.
    pub fn opaque<T: Any>(value: Rc<T>) -> Self {
        PropValue::Opaque(value)
    }

    /// Identity equality (`===` semantics).
    ///
    /// Floats follow IEEE rules, so `NaN` is never the same as itself.
    pub fn same(&self, other: &PropValue) -> bool {
        match (self, other) {
            (PropValue::Null, PropValue::Null) => true,
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            (PropValue::Float(a), PropValue::Float(b)) => a == b,
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            (PropValue::List(a), PropValue::List(b)) => Rc::ptr_eq(a, b),
            (PropValue::Map(a), PropValue::Map(b)) => Rc::ptr_eq(a, b),
            (PropValue::Opaque(a), PropValue::Opaque(b)) => {
                std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
            }
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PropValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropValue::Float(f) => Some(*f),
            PropValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropValue]> {
        match self {
            PropValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the mapping if this value is one.
    pub fn as_props(&self) -> Option<&Props> {
        match self {
            PropValue::Map(props) => Some(props),
            _ => None,
        }
    }

    /// Downcast an opaque value back to its concrete type.
    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        match self {
            PropValue::Opaque(value) => Rc::clone(value).downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Short human-readable name of the variant, used in warnings.
    pub fn kind(&self) -> &'static str {
        match self {
            PropValue::Null => "null",
            PropValue::Bool(_) => "bool",
            PropValue::Int(_) => "int",
            PropValue::Float(_) => "float",
            PropValue::Str(_) => "string",
            PropValue::List(_) => "list",
            PropValue::Map(_) => "map",
            PropValue::Opaque(_) => "opaque",
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Null => write!(f, "null"),
            PropValue::Bool(b) => write!(f, "{b}"),
            PropValue::Int(i) => write!(f, "{i}"),
            PropValue::Float(x) => write!(f, "{x}"),
            PropValue::Str(s) => write!(f, "{s:?}"),
            PropValue::List(items) => f.debug_list().entries(items.iter()).finish(),
            PropValue::Map(props) => fmt::Debug::fmt(props, f),
            PropValue::Opaque(value) => write!(f, "<opaque {:p}>", Rc::as_ptr(value)),
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::Int(i64::from(value))
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<Vec<PropValue>> for PropValue {
    fn from(value: Vec<PropValue>) -> Self {
        PropValue::List(Rc::from(value))
    }
}

impl From<Props> for PropValue {
    fn from(value: Props) -> Self {
        PropValue::Map(Rc::new(value))
    }
}

impl From<Rc<Props>> for PropValue {
    fn from(value: Rc<Props>) -> Self {
        PropValue::Map(value)
    }
}

// =============================================================================
// Props
// =============================================================================

/// A plain key-value property mapping.
#[derive(Clone, Default)]
pub struct Props {
    entries: BTreeMap<String, PropValue>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a value, returning the previous one for that key.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropValue>,
    ) -> Option<PropValue> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropValue> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy every entry of `other` over this mapping (object spread).
    pub fn spread(&mut self, other: &Props) {
        for (key, value) in other.iter() {
            self.entries.insert(key.to_string(), value.clone());
        }
    }

    /// Spread a value if it is a mapping. Anything else contributes nothing.
    pub fn spread_value(&mut self, value: &PropValue) {
        if let Some(props) = value.as_props() {
            self.spread(props);
        }
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl<K: Into<String>, V: Into<PropValue>> FromIterator<(K, V)> for Props {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut props = Props::new();
        for (key, value) in iter {
            props.insert(key, value);
        }
        props
    }
}

// =============================================================================
// Equality & Shape
// =============================================================================

/// Shallow key/value equality: same key set, every value [`PropValue::same`].
pub fn shallow_equal(a: &Props, b: &Props) -> bool {
    if std::ptr::eq(a, b) {
        return true;
    }
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .all(|(key, value)| b.get(key).is_some_and(|other| value.same(other)))
}

/// Shallow equality lifted to stage results.
///
/// Identical values are equal; two mappings are compared key by key; any
/// other pair is unequal.
pub fn shallow_equal_values(a: &PropValue, b: &PropValue) -> bool {
    if a.same(b) {
        return true;
    }
    match (a, b) {
        (PropValue::Map(a), PropValue::Map(b)) => shallow_equal(a, b),
        _ => false,
    }
}

/// Whether a derivation result is a plain key-value mapping.
pub fn is_plain_object(value: &PropValue) -> bool {
    matches!(value, PropValue::Map(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_scalars_by_value() {
        assert!(PropValue::from(1).same(&PropValue::from(1)));
        assert!(PropValue::from("a").same(&PropValue::from("a")));
        assert!(!PropValue::from(1).same(&PropValue::from(2)));
        assert!(!PropValue::from(1).same(&PropValue::from(1.0)));
        assert!(!PropValue::Float(f64::NAN).same(&PropValue::Float(f64::NAN)));
        assert!(PropValue::Null.same(&PropValue::Null));
    }

    #[test]
    fn test_same_composites_by_pointer() {
        let map = PropValue::from(Props::new().with("a", 1));
        let copy = map.clone();
        let lookalike = PropValue::from(Props::new().with("a", 1));
        assert!(map.same(&copy));
        assert!(!map.same(&lookalike));

        let handle = Rc::new(5_u8);
        let a = PropValue::opaque(Rc::clone(&handle));
        let b = PropValue::opaque(handle);
        assert!(a.same(&b));
        assert!(!a.same(&PropValue::opaque(Rc::new(5_u8))));
    }

    #[test]
    fn test_shallow_equal() {
        let shared = PropValue::from(vec![PropValue::from(1)]);
        let a = Props::new().with("x", 1).with("list", shared.clone());
        let b = Props::new().with("list", shared).with("x", 1);
        assert!(shallow_equal(&a, &b));

        let c = Props::new().with("x", 1).with("list", vec![PropValue::from(1)]);
        assert!(!shallow_equal(&a, &c));

        let d = Props::new().with("x", 1);
        assert!(!shallow_equal(&a, &d));
        assert!(!shallow_equal(&d, &a));
    }

    #[test]
    fn test_shallow_equal_values_nested_maps() {
        let a = PropValue::from(Props::new().with("a", 1).with("b", 2));
        let b = PropValue::from(Props::new().with("a", 1).with("b", 2));
        assert!(shallow_equal_values(&a, &b));
        assert!(!shallow_equal_values(&a, &PropValue::from(1)));
        assert!(shallow_equal_values(&PropValue::from(3), &PropValue::from(3)));
    }

    #[test]
    fn test_is_plain_object() {
        assert!(is_plain_object(&Props::new().into()));
        assert!(!is_plain_object(&vec![PropValue::Null].into()));
        assert!(!is_plain_object(&PropValue::from("text")));
        assert!(!is_plain_object(&PropValue::Null));
    }

    #[test]
    fn test_spread_overrides_left_to_right() {
        let mut merged = Props::new().with("a", 1).with("b", 1);
        merged.spread(&Props::new().with("b", 2));
        merged.spread_value(&PropValue::from("ignored"));
        assert_eq!(merged.get("a").and_then(PropValue::as_int), Some(1));
        assert_eq!(merged.get("b").and_then(PropValue::as_int), Some(2));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_downcast_opaque() {
        let value = PropValue::opaque(Rc::new(String::from("hello")));
        assert_eq!(value.downcast::<String>().as_deref().map(String::as_str), Some("hello"));
        assert!(value.downcast::<i32>().is_none());
        assert!(PropValue::from(1).downcast::<i32>().is_none());
    }
}
