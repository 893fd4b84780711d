use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{FieldPath, LocalId};

/// Nested representation of an object as held by the remote store.
///
/// The engine only reads these; mutation happens through the store.
/// Drafts built by a mapper use the same type without system-assigned fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteObject(Json);

impl RemoteObject {
    pub fn new(api_version: &str, kind: &str) -> Self {
        Self(serde_json::json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": {},
        }))
    }

    pub fn from_json(raw: Json) -> Self { Self(raw) }
    pub fn as_json(&self) -> &Json { &self.0 }
    pub fn into_json(self) -> Json { self.0 }

    pub fn get(&self, path: &FieldPath) -> Option<&Json> {
        path.lookup(&self.0)
    }

    /// Builder-side write used while expanding a draft.
    pub fn set(&mut self, path: &FieldPath, value: Json) -> bool {
        path.insert(&mut self.0, value)
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.0.get("metadata").and_then(|m| m.get(key)).and_then(|v| v.as_str())
    }

    pub fn name(&self) -> Option<&str> { self.meta_str("name") }
    pub fn namespace(&self) -> Option<&str> { self.meta_str("namespace") }
    pub fn generate_name(&self) -> Option<&str> { self.meta_str("generateName") }
    pub fn resource_version(&self) -> Option<&str> { self.meta_str("resourceVersion") }
    pub fn uid(&self) -> Option<&str> { self.meta_str("uid") }
    pub fn kind(&self) -> Option<&str> { self.0.get("kind").and_then(|v| v.as_str()) }

    pub fn local_id(&self) -> Option<LocalId> {
        LocalId::from_object(self).ok()
    }
}
