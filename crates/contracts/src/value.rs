//! Restricted JSON-like value model
//!
//! `DataItem` is an immutable tree of strings, numbers, booleans, null, lists
//! and objects. Payloads and every configuration object use it.
//!
//! ## Canonical string form
//! `Display` yields the form used whenever values are compared as strings:
//! strings are written raw, numbers in plain decimal, `null`/`true`/`false`
//! verbatim and lists/objects as compact JSON.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::path::{PathComponent, PathReference};

/// A single value in a payload or configuration tree
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DataItem {
    #[default]
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    List(Vec<DataItem>),
    Object(DataObject),
}

impl DataItem {
    pub fn is_null(&self) -> bool {
        matches!(self, DataItem::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataItem::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataItem::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[DataItem]> {
        match self {
            DataItem::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&DataObject> {
        match self {
            DataItem::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Integral value, only for `Int` and `Long`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataItem::Int(i) => Some(i64::from(*i)),
            DataItem::Long(l) => Some(*l),
            _ => None,
        }
    }

    /// Any numeric value widened to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataItem::Int(i) => Some(f64::from(*i)),
            DataItem::Long(l) => Some(*l as f64),
            DataItem::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, DataItem::Int(_) | DataItem::Long(_) | DataItem::Double(_))
    }

    /// Convert to a `serde_json::Value`. Non-finite doubles become `null`.
    pub fn to_json(&self) -> Value {
        match self {
            DataItem::Null => Value::Null,
            DataItem::Bool(b) => Value::Bool(*b),
            DataItem::Int(i) => Value::Number(Number::from(*i)),
            DataItem::Long(l) => Value::Number(Number::from(*l)),
            DataItem::Double(d) => Number::from_f64(*d).map_or(Value::Null, Value::Number),
            DataItem::String(s) => Value::String(s.clone()),
            DataItem::List(items) => Value::Array(items.iter().map(DataItem::to_json).collect()),
            DataItem::Object(obj) => obj.to_json(),
        }
    }
}

impl From<Value> for DataItem {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => DataItem::Null,
            Value::Bool(b) => DataItem::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i32::try_from(i).map_or(DataItem::Long(i), DataItem::Int)
                } else {
                    DataItem::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => DataItem::String(s),
            Value::Array(items) => DataItem::List(items.into_iter().map(DataItem::from).collect()),
            Value::Object(map) => DataItem::Object(DataObject::from_json_map(map)),
        }
    }
}

impl fmt::Display for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataItem::Null => f.write_str("null"),
            DataItem::Bool(b) => write!(f, "{b}"),
            DataItem::Int(i) => write!(f, "{i}"),
            DataItem::Long(l) => write!(f, "{l}"),
            DataItem::Double(d) => write!(f, "{d}"),
            DataItem::String(s) => f.write_str(s),
            DataItem::List(_) | DataItem::Object(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for DataItem {
    fn from(s: &str) -> Self {
        DataItem::String(s.to_string())
    }
}

impl From<String> for DataItem {
    fn from(s: String) -> Self {
        DataItem::String(s)
    }
}

impl From<bool> for DataItem {
    fn from(b: bool) -> Self {
        DataItem::Bool(b)
    }
}

impl From<i32> for DataItem {
    fn from(i: i32) -> Self {
        DataItem::Int(i)
    }
}

impl From<i64> for DataItem {
    fn from(l: i64) -> Self {
        DataItem::Long(l)
    }
}

impl From<f64> for DataItem {
    fn from(d: f64) -> Self {
        DataItem::Double(d)
    }
}

impl From<Vec<DataItem>> for DataItem {
    fn from(items: Vec<DataItem>) -> Self {
        DataItem::List(items)
    }
}

impl From<DataObject> for DataItem {
    fn from(obj: DataObject) -> Self {
        DataItem::Object(obj)
    }
}

impl Serialize for DataItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DataItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(DataItem::from)
    }
}

/// Ordered string-keyed object of `DataItem`s
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataObject(BTreeMap<String, DataItem>);

impl DataObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DataItem>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DataItem>) -> Option<DataItem> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<DataItem> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&DataItem> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(DataItem::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataItem)> {
        self.0.iter()
    }

    /// Overlay every entry of `other` onto a copy of this object
    pub fn merged(&self, other: &DataObject) -> DataObject {
        let mut merged = self.clone();
        for (key, value) in other.iter() {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Resolve a path against this object
    pub fn extract(&self, path: &PathReference) -> Option<&DataItem> {
        let mut components = path.components().iter();
        let mut current = match components.next()? {
            PathComponent::Key(key) => self.get(key)?,
            PathComponent::Index(_) => return None,
        };
        for component in components {
            current = match (component, current) {
                (PathComponent::Key(key), DataItem::Object(obj)) => obj.get(key)?,
                (PathComponent::Index(index), DataItem::List(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Return a copy of this object with `value` written at `path`.
    ///
    /// Missing intermediate containers are created; lists are padded with
    /// `null` up to the requested index. Anything already at an intermediate
    /// position that is not a container of the right kind is replaced.
    pub fn build_path(&self, path: &PathReference, value: DataItem) -> DataObject {
        match put(Some(DataItem::Object(self.clone())), path.components(), value) {
            DataItem::Object(obj) => obj,
            _ => self.clone(),
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect::<Map<String, Value>>(),
        )
    }

    pub fn from_json_map(map: Map<String, Value>) -> Self {
        Self(map.into_iter().map(|(k, v)| (k, DataItem::from(v))).collect())
    }
}

fn put(target: Option<DataItem>, components: &[PathComponent], value: DataItem) -> DataItem {
    let Some((first, rest)) = components.split_first() else {
        return value;
    };
    match first {
        PathComponent::Key(key) => {
            let mut obj = match target {
                Some(DataItem::Object(obj)) => obj,
                _ => DataObject::new(),
            };
            let child = obj.remove(key);
            obj.0.insert(key.clone(), put(child, rest, value));
            DataItem::Object(obj)
        }
        PathComponent::Index(index) => {
            let mut items = match target {
                Some(DataItem::List(items)) => items,
                _ => Vec::new(),
            };
            if items.len() <= *index {
                items.resize(*index + 1, DataItem::Null);
            }
            let child = std::mem::take(&mut items[*index]);
            items[*index] = put(Some(child), rest, value);
            DataItem::List(items)
        }
    }
}

impl<K: Into<String>, V: Into<DataItem>> FromIterator<(K, V)> for DataObject {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for DataObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DataObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Object(map) => Ok(Self::from_json_map(map)),
            other => Err(D::Error::custom(format!("expected an object, found {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(text: &str) -> PathReference {
        text.parse().unwrap()
    }

    #[test]
    fn test_canonical_strings() {
        assert_eq!(DataItem::from("abc").to_string(), "abc");
        assert_eq!(DataItem::from(42).to_string(), "42");
        assert_eq!(DataItem::from(5_000_000_000i64).to_string(), "5000000000");
        assert_eq!(DataItem::from(5.0).to_string(), "5");
        assert_eq!(DataItem::from(1.5).to_string(), "1.5");
        assert_eq!(DataItem::Null.to_string(), "null");
        assert_eq!(DataItem::from(true).to_string(), "true");
        let list = DataItem::from(vec![DataItem::from(1), DataItem::from("a")]);
        assert_eq!(list.to_string(), r#"[1,"a"]"#);
        let obj = DataItem::from(DataObject::new().with("b", 2).with("a", "x"));
        assert_eq!(obj.to_string(), r#"{"a":"x","b":2}"#);
    }

    #[test]
    fn test_from_json_number_widths() {
        let obj: DataObject = serde_json::from_value(json!({
            "small": 7,
            "large": 9_000_000_000i64,
            "real": 2.5
        }))
        .unwrap();
        assert_eq!(obj.get("small"), Some(&DataItem::Int(7)));
        assert_eq!(obj.get("large"), Some(&DataItem::Long(9_000_000_000)));
        assert_eq!(obj.get("real"), Some(&DataItem::Double(2.5)));
    }

    #[test]
    fn test_object_rejects_non_object() {
        let result: Result<DataObject, _> = serde_json::from_value(json!([1, 2]));
        assert!(result.is_err());
    }

    #[test]
    fn test_extract_nested() {
        let obj: DataObject = serde_json::from_value(json!({
            "a": { "b": [ { "c": "deep" }, 3 ] }
        }))
        .unwrap();
        assert_eq!(obj.extract(&path("a.b[0].c")), Some(&DataItem::from("deep")));
        assert_eq!(obj.extract(&path("a.b[1]")), Some(&DataItem::Int(3)));
        assert_eq!(obj.extract(&path("a.b[2]")), None);
        assert_eq!(obj.extract(&path("a.x")), None);
        assert_eq!(obj.extract(&path("a.b.c")), None);
    }

    #[test]
    fn test_build_path_creates_intermediates() {
        let original = DataObject::new().with("keep", 1);
        let built = original.build_path(&path("x.y[1].z"), DataItem::from("v"));

        assert_eq!(original.len(), 1);
        assert_eq!(
            built.to_json(),
            json!({ "keep": 1, "x": { "y": [null, { "z": "v" }] } })
        );
    }

    #[test]
    fn test_build_path_overwrites_leaf() {
        let original = DataObject::new().with("a", DataObject::new().with("b", 1).with("c", 2));
        let built = original.build_path(&path("a.b"), DataItem::from(10));
        assert_eq!(built.to_json(), json!({ "a": { "b": 10, "c": 2 } }));
    }

    #[test]
    fn test_merged_overlays() {
        let base = DataObject::new().with("a", 1).with("b", 2);
        let merged = base.merged(&DataObject::new().with("b", 3));
        assert_eq!(merged.get("b"), Some(&DataItem::Int(3)));
        assert_eq!(merged.get("a"), Some(&DataItem::Int(1)));
    }
}
