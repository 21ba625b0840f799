//! Dynamic data nodes.
//!
//! A [`Value`] is one node of the data graph the runtime observes. Scalars are
//! stored inline; containers are shared handles, so cloning a `Value` never
//! copies an object or list and every clone observes the same node.
//!
//! Nothing stops a container from holding itself. Printing such a graph
//! writes `[..]` or `{..}` where the cycle closes, and serializing it fails.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::list::List;
use super::object::Object;

/// A node of an observable data graph.
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(f64),
    /// An immutable string.
    String(Rc<str>),
    /// An ordered list.
    List(List),
    /// A keyed object.
    Object(Object),
}

impl Value {
    /// Name of the value's kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }

    /// Whether the value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether the value is a list or an object.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::List(_) | Self::Object(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Identity used to skip redundant writes.
    ///
    /// Like `==`, except that `NaN` is the same as `NaN`, so writing `NaN`
    /// over `NaN` does not notify.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }

    /// Snapshot the value as JSON without recording any reads.
    ///
    /// A cyclic value cannot be represented and yields `Null`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

thread_local! {
    /// Containers being printed or serialized, outermost first.
    static VISITING: RefCell<Vec<*const ()>> = RefCell::new(Vec::new());
}

/// Marks a container as being walked until dropped.
pub(super) struct Visit;

impl Visit {
    /// `None` if the container is already being walked further up.
    pub(super) fn enter(node: *const ()) -> Option<Self> {
        VISITING.with(|visiting| {
            let mut visiting = visiting.borrow_mut();
            if visiting.contains(&node) {
                return None;
            }
            visiting.push(node);
            Some(Visit)
        })
    }
}

impl Drop for Visit {
    fn drop(&mut self) {
        VISITING.with(|visiting| {
            visiting.borrow_mut().pop();
        });
    }
}

/// Scalars compare by value; containers compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => List::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Object::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(list) => fmt::Debug::fmt(list, f),
            Self::Object(object) => fmt::Debug::fmt(object, f),
        }
    }
}

macro_rules! from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Self::Number(n as f64)
                }
            }
        )*
    };
}

from_number!(i32, i64, u32, u64, usize, f32, f64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Self::String(s)
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Self::List(list)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Self::Object(object)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(List::from(items))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Self::from(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Self::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            // Integral numbers round-trip as JSON integers.
            Self::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                serializer.serialize_i64(*n as i64)
            }
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(list) => {
                let Some(_visit) = Visit::enter(list.node_ptr()) else {
                    return Err(S::Error::custom("cannot serialize a cyclic list"));
                };
                let items = list.snapshot();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in &items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(object) => {
                let Some(_visit) = Visit::enter(object.node_ptr()) else {
                    return Err(S::Error::custom("cannot serialize a cyclic object"));
                };
                let entries = object.snapshot();
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in &entries {
                    map.serialize_entry(&**key, value)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip_preserves_shape() {
        let source = json!({ "name": "ripple", "tags": ["a", 1, null], "ratio": 0.5 });
        let value = Value::from(source.clone());
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn scalars_compare_by_value_containers_by_identity() {
        assert_eq!(Value::from(1), Value::from(1.0));
        assert_eq!(Value::from("a"), Value::from(String::from("a")));
        assert_ne!(Value::from(1), Value::from("1"));

        let a = Value::from(json!([1, 2]));
        let b = Value::from(json!([1, 2]));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn nan_is_same_as_nan() {
        let nan = Value::from(f64::NAN);
        assert_ne!(nan, nan.clone());
        assert!(nan.is_same(&Value::from(f64::NAN)));
    }

    #[test]
    fn deserializes_from_json_text() {
        let value: Value = serde_json::from_str(r#"{ "count": 3 }"#).unwrap();
        let count = value.as_object().and_then(|o| o.get("count"));
        assert_eq!(count, Some(Value::from(3)));
        assert_eq!(value.kind(), "object");
    }

    #[test]
    fn self_containing_values_print_and_fail_to_serialize() {
        let list = List::new();
        list.push(Value::List(list.clone()));
        let list = Value::List(list);
        assert_eq!(format!("{list:?}"), "[[..]]");
        assert!(serde_json::to_value(&list).is_err());
        assert_eq!(list.to_json(), serde_json::Value::Null);

        let object = Value::from(json!({ "name": "root" }));
        let root = object.as_object().unwrap().clone();
        root.set("me", object.clone());
        assert_eq!(format!("{object:?}"), r#"{"name": "root", "me": {..}}"#);
        assert_eq!(object.to_json(), serde_json::Value::Null);

        // A node reached twice without a cycle prints in full both times.
        let shared = Value::from(json!([1]));
        let pair = Value::from(vec![shared.clone(), shared]);
        assert_eq!(pair.to_json(), json!([[1], [1]]));
    }
}
