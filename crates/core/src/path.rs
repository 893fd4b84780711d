use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Structured path into a nested remote object. Rendered as a JSON Pointer
/// (RFC 6901) only when a patch leaves the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FieldPath(Vec<Segment>);

impl FieldPath {
    pub fn root() -> Self { Self(Vec::new()) }

    pub fn from_keys(keys: &[&str]) -> Self {
        Self(keys.iter().map(|k| Segment::Key((*k).to_string())).collect())
    }

    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.0.push(Segment::Key(key.into()));
        next
    }

    pub fn index(&self, idx: usize) -> Self {
        let mut next = self.clone();
        next.0.push(Segment::Index(idx));
        next
    }

    pub fn segments(&self) -> &[Segment] { &self.0 }
    pub fn is_root(&self) -> bool { self.0.is_empty() }

    pub fn to_pointer(&self) -> String {
        let mut out = String::new();
        for seg in &self.0 {
            out.push('/');
            match seg {
                Segment::Key(k) => out.push_str(&k.replace('~', "~0").replace('/', "~1")),
                Segment::Index(i) => out.push_str(&i.to_string()),
            }
        }
        out
    }

    pub fn lookup<'a>(&self, root: &'a Json) -> Option<&'a Json> {
        let mut cur = root;
        for seg in &self.0 {
            cur = match (seg, cur) {
                (Segment::Key(k), Json::Object(map)) => map.get(k)?,
                (Segment::Index(i), Json::Array(arr)) => arr.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Write `value` at this path, creating intermediate objects. Non-object
    /// intermediates on a key segment are replaced; an index segment must
    /// address an existing array slot or the end of the array.
    pub fn insert(&self, root: &mut Json, value: Json) -> bool {
        let Some((last, parents)) = self.0.split_last() else {
            *root = value;
            return true;
        };
        let mut cur = root;
        for seg in parents {
            cur = match seg {
                Segment::Key(k) => {
                    if !cur.is_object() {
                        *cur = Json::Object(serde_json::Map::new());
                    }
                    match cur.as_object_mut() {
                        Some(map) => map.entry(k.clone()).or_insert_with(|| Json::Object(serde_json::Map::new())),
                        None => return false,
                    }
                }
                Segment::Index(i) => match cur.as_array_mut().and_then(|arr| arr.get_mut(*i)) {
                    Some(slot) => slot,
                    None => return false,
                },
            };
        }
        match last {
            Segment::Key(k) => {
                if !cur.is_object() {
                    *cur = Json::Object(serde_json::Map::new());
                }
                match cur.as_object_mut() {
                    Some(map) => {
                        map.insert(k.clone(), value);
                        true
                    }
                    None => false,
                }
            }
            Segment::Index(i) => match cur.as_array_mut() {
                Some(arr) if *i < arr.len() => {
                    arr[*i] = value;
                    true
                }
                Some(arr) if *i == arr.len() => {
                    arr.push(value);
                    true
                }
                _ => false,
            },
        }
    }

    pub fn remove(&self, root: &mut Json) -> Option<Json> {
        let (last, parents) = self.0.split_last()?;
        let mut cur = root;
        for seg in parents {
            cur = match (seg, cur) {
                (Segment::Key(k), Json::Object(map)) => map.get_mut(k)?,
                (Segment::Index(i), Json::Array(arr)) => arr.get_mut(*i)?,
                _ => return None,
            };
        }
        match (last, cur) {
            (Segment::Key(k), Json::Object(map)) => map.remove(k),
            (Segment::Index(i), Json::Array(arr)) if *i < arr.len() => Some(arr.remove(*i)),
            _ => None,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_pointer())
    }
}
