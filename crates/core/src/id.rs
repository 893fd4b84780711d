use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{RemoteObject, ValidationError};

/// Stable identifier of a resource instance: `namespace/name` for namespaced
/// kinds, `name` for cluster-scoped ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId {
    namespace: Option<String>,
    name: String,
}

impl LocalId {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(|ns| ns.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster(name: &str) -> Self {
        Self::new(None, name)
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self::new(Some(namespace), name)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Derive the id from an object's identity block. Fails when the object
    /// carries no name (e.g. a draft that only has `generateName`).
    pub fn from_object(obj: &RemoteObject) -> Result<Self, ValidationError> {
        let name = obj
            .name()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ValidationError::new("metadata.name", "object has no name"))?;
        Ok(Self::new(obj.namespace(), name))
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for LocalId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::cluster(name)),
            [ns, name] if !ns.is_empty() && !name.is_empty() => Ok(Self::namespaced(ns, name)),
            _ => Err(ValidationError::new("id", format!("invalid id {s:?} (expect name or namespace/name)"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        let a = LocalId::cluster("high");
        assert_eq!(a.to_string(), "high");
        assert_eq!("high".parse::<LocalId>().unwrap(), a);

        let b = LocalId::namespaced("prod", "settings");
        assert_eq!(b.to_string(), "prod/settings");
        assert_eq!("prod/settings".parse::<LocalId>().unwrap(), b);
    }

    #[test]
    fn empty_namespace_is_cluster_scoped() {
        assert_eq!(LocalId::new(Some(""), "x"), LocalId::cluster("x"));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<LocalId>().is_err());
        assert!("/x".parse::<LocalId>().is_err());
        assert!("a/b/c".parse::<LocalId>().is_err());
    }

    #[test]
    fn from_object_requires_name() {
        let obj = RemoteObject::from_json(serde_json::json!({"metadata": {"namespace": "ns", "name": "cm"}}));
        assert_eq!(LocalId::from_object(&obj).unwrap(), LocalId::namespaced("ns", "cm"));

        let draft = RemoteObject::from_json(serde_json::json!({"metadata": {"generateName": "pc-"}}));
        assert!(LocalId::from_object(&draft).is_err());
    }
}
