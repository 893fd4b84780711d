//! Declarative field lists: which flat key maps to which nested path, with
//! what type and flags.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use steward_core::{FieldPath, FlatValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Cluster,
    Namespaced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Int { min: i64, max: i64 },
    Bool,
    StringMap,
    StringList,
}

impl FieldType {
    pub const INT32: FieldType = FieldType::Int { min: i32::MIN as i64, max: i32::MAX as i64 };

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int { .. } => "int",
            FieldType::Bool => "bool",
            FieldType::StringMap => "map",
            FieldType::StringList => "list",
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, FieldType::StringMap | FieldType::StringList)
    }

    pub fn empty_value(&self) -> Option<FlatValue> {
        match self {
            FieldType::StringMap => Some(FlatValue::Map(BTreeMap::new())),
            FieldType::StringList => Some(FlatValue::List(Vec::new())),
            _ => None,
        }
    }
}

/// What the shared metadata sub-mapper needs to know about a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldRole {
    Plain,
    Name,
    GenerateName,
    Namespace,
    Labels,
    Annotations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Flat key, e.g. `metadata.0.name`.
    pub key: String,
    /// Location in the nested object.
    pub path: FieldPath,
    pub ty: FieldType,
    pub role: FieldRole,
    pub required: bool,
    pub default: Option<FlatValue>,
    /// Assigned by the store; never sent, never diffed.
    pub computed: bool,
    /// May be set in configuration; when left out, the store's value is kept.
    pub optional_computed: bool,
    /// Cannot be changed in place.
    pub immutable: bool,
    /// Echoed by the store and compared while awaiting convergence.
    pub authoritative: bool,
    pub description: String,
}

impl FieldSpec {
    pub fn new(key: &str, path: &[&str], ty: FieldType) -> Self {
        Self {
            key: key.to_string(),
            path: FieldPath::from_keys(path),
            ty,
            role: FieldRole::Plain,
            required: false,
            default: None,
            computed: false,
            optional_computed: false,
            immutable: false,
            authoritative: false,
            description: String::new(),
        }
    }

    pub fn required(mut self) -> Self { self.required = true; self }
    pub fn computed(mut self) -> Self { self.computed = true; self }
    pub fn optional_computed(mut self) -> Self { self.optional_computed = true; self }
    pub fn immutable(mut self) -> Self { self.immutable = true; self }
    pub fn authoritative(mut self) -> Self { self.authoritative = true; self }
    pub fn role(mut self, role: FieldRole) -> Self { self.role = role; self }

    pub fn default_value(mut self, v: impl Into<FlatValue>) -> Self {
        self.default = Some(v.into());
        self
    }

    pub fn describe(mut self, text: &str) -> Self {
        self.description = text.to_string();
        self
    }

    /// Declared default, or the empty collection for map and list fields.
    pub fn effective_default(&self) -> Option<FlatValue> {
        self.default.clone().or_else(|| self.ty.empty_value())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub api_version: String,
    pub kind: String,
    pub scope: Scope,
    fields: Vec<FieldSpec>,
}

impl ResourceSchema {
    pub fn new(api_version: &str, kind: &str, scope: Scope) -> Self {
        Self { api_version: api_version.to_string(), kind: kind.to_string(), scope, fields: Vec::new() }
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn fields(&self) -> &[FieldSpec] { &self.fields }

    pub fn namespaced(&self) -> bool { self.scope == Scope::Namespaced }

    pub fn lookup(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn by_role(&self, role: FieldRole) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.role == role)
    }

    /// True when `key` names a nested block (`metadata` for `metadata.0.*`).
    pub fn is_block(&self, key: &str) -> bool {
        let prefix = format!("{key}.0.");
        self.fields.iter().any(|f| f.key.starts_with(&prefix))
    }

    /// `group/version/Kind` (or `version/Kind` for the core group).
    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_detected_from_field_keys() {
        let s = ResourceSchema::new("v1", "Thing", Scope::Cluster)
            .field(FieldSpec::new("metadata.0.name", &["metadata", "name"], FieldType::String))
            .field(FieldSpec::new("value", &["value"], FieldType::INT32));
        assert!(s.is_block("metadata"));
        assert!(!s.is_block("value"));
        assert_eq!(s.lookup("value").map(|f| f.path.to_pointer()), Some("/value".to_string()));
        assert_eq!(s.gvk_key(), "v1/Thing");
    }

    #[test]
    fn collections_default_to_empty() {
        let f = FieldSpec::new("data", &["data"], FieldType::StringMap);
        assert_eq!(f.effective_default(), Some(FlatValue::Map(BTreeMap::new())));
        let g = FieldSpec::new("d", &["d"], FieldType::String).default_value("");
        assert_eq!(g.effective_default(), Some(FlatValue::from("")));
    }
}
