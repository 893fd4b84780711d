use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::ValidationError;

/// A typed value stored under a flat key path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlatValue {
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl FlatValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FlatValue::Bool(_) => "bool",
            FlatValue::Int(_) => "int",
            FlatValue::String(_) => "string",
            FlatValue::List(_) => "list",
            FlatValue::Map(_) => "map",
        }
    }

    /// Zero values are what the remote API omits: `false`, `0`, `""`, empty
    /// list or map.
    pub fn is_zero(&self) -> bool {
        match self {
            FlatValue::Bool(b) => !*b,
            FlatValue::Int(i) => *i == 0,
            FlatValue::String(s) => s.is_empty(),
            FlatValue::List(l) => l.is_empty(),
            FlatValue::Map(m) => m.is_empty(),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            FlatValue::Bool(b) => Json::Bool(*b),
            FlatValue::Int(i) => Json::from(*i),
            FlatValue::String(s) => Json::String(s.clone()),
            FlatValue::List(l) => Json::Array(l.iter().cloned().map(Json::String).collect()),
            FlatValue::Map(m) => Json::Object(m.iter().map(|(k, v)| (k.clone(), Json::String(v.clone()))).collect()),
        }
    }

    /// Short rendering for logs and mismatch diagnostics.
    pub fn render(&self) -> String {
        match self {
            FlatValue::String(s) => format!("{s:?}"),
            other => other.to_json().to_string(),
        }
    }
}

impl From<bool> for FlatValue {
    fn from(v: bool) -> Self { FlatValue::Bool(v) }
}
impl From<i64> for FlatValue {
    fn from(v: i64) -> Self { FlatValue::Int(v) }
}
impl From<i32> for FlatValue {
    fn from(v: i32) -> Self { FlatValue::Int(v as i64) }
}
impl From<&str> for FlatValue {
    fn from(v: &str) -> Self { FlatValue::String(v.to_string()) }
}
impl From<String> for FlatValue {
    fn from(v: String) -> Self { FlatValue::String(v) }
}
impl From<BTreeMap<String, String>> for FlatValue {
    fn from(v: BTreeMap<String, String>) -> Self { FlatValue::Map(v) }
}
impl From<Vec<String>> for FlatValue {
    fn from(v: Vec<String>) -> Self { FlatValue::List(v) }
}

/// Path-keyed local representation of a resource's desired or observed state.
///
/// Keys are dotted/indexed paths such as `metadata.0.name` or `value`.
/// Insertion order is kept for stable output but ignored by equality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlatModel {
    entries: Vec<(String, FlatValue)>,
}

impl FlatModel {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn get(&self, key: &str) -> Option<&FlatValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite in place (an overwrite keeps the original position).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FlatValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<FlatValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<FlatValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlatValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>, ValidationError> {
        match self.get(key) {
            None => Ok(None),
            Some(FlatValue::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(type_mismatch(key, "string", other)),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>, ValidationError> {
        match self.get(key) {
            None => Ok(None),
            Some(FlatValue::Int(i)) => Ok(Some(*i)),
            Some(other) => Err(type_mismatch(key, "int", other)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ValidationError> {
        match self.get(key) {
            None => Ok(None),
            Some(FlatValue::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(type_mismatch(key, "bool", other)),
        }
    }

    pub fn get_map(&self, key: &str) -> Result<Option<&BTreeMap<String, String>>, ValidationError> {
        match self.get(key) {
            None => Ok(None),
            Some(FlatValue::Map(m)) => Ok(Some(m)),
            Some(other) => Err(type_mismatch(key, "map", other)),
        }
    }

    pub fn get_list(&self, key: &str) -> Result<Option<&[String]>, ValidationError> {
        match self.get(key) {
            None => Ok(None),
            Some(FlatValue::List(l)) => Ok(Some(l.as_slice())),
            Some(other) => Err(type_mismatch(key, "list", other)),
        }
    }

    /// Render as a JSON object keyed by flat path (sorted), for output.
    pub fn to_json(&self) -> Json {
        Json::Object(self.entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
    }
}

fn type_mismatch(key: &str, want: &str, got: &FlatValue) -> ValidationError {
    ValidationError::new(key, format!("expected {}, got {} {}", want, got.type_name(), got.render()))
}

impl PartialEq for FlatModel {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl Eq for FlatModel {}

impl<K: Into<String>, V: Into<FlatValue>> FromIterator<(K, V)> for FlatModel {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut m = FlatModel::new();
        for (k, v) in iter {
            m.set(k, v);
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_in_place() {
        let mut m = FlatModel::new().with("a", 1i64).with("b", "x");
        m.set("a", 2i64);
        let keys: Vec<_> = m.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(m.get("a"), Some(&FlatValue::Int(2)));
    }

    #[test]
    fn equality_ignores_order() {
        let a = FlatModel::new().with("x", true).with("y", "v");
        let b = FlatModel::new().with("y", "v").with("x", true);
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with("z", 1i64));
    }

    #[test]
    fn typed_accessors_reject_mismatches() {
        let m = FlatModel::new().with("global_default", "true");
        let err = m.get_bool("global_default").unwrap_err();
        assert_eq!(err.field, "global_default");
        assert!(err.message.contains("expected bool"), "{}", err.message);
        assert_eq!(m.get_bool("missing").unwrap(), None);
        assert_eq!(m.get_str("global_default").unwrap(), Some("true"));
    }

    #[test]
    fn zero_values() {
        assert!(FlatValue::from("").is_zero());
        assert!(FlatValue::from(false).is_zero());
        assert!(FlatValue::Int(0).is_zero());
        assert!(FlatValue::Map(BTreeMap::new()).is_zero());
        assert!(!FlatValue::from("x").is_zero());
    }

    #[test]
    fn untagged_serde_picks_the_right_variant() {
        let v: FlatValue = serde_json::from_value(serde_json::json!({"app": "web"})).unwrap();
        assert!(matches!(v, FlatValue::Map(_)));
        let v: FlatValue = serde_json::from_value(serde_json::json!(1000000)).unwrap();
        assert_eq!(v, FlatValue::Int(1_000_000));
    }
}
