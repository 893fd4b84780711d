//! Generic expand/flatten between a flat model and the nested object,
//! driven entirely by a `ResourceSchema`.

use std::collections::BTreeMap;

use serde_json::Value as Json;
use steward_core::{FlatModel, FlatValue, Mismatch, RemoteObject, ValidationError};

use crate::metadata;
use crate::schema::{FieldRole, FieldSpec, FieldType, ResourceSchema};

/// Per-kind behaviour on top of the generic mapper. Most kinds only provide a
/// schema; the defaults do the rest.
pub trait ResourceKind: Send + Sync {
    /// Short registry name, e.g. `priority_class`.
    fn name(&self) -> &'static str;

    fn schema(&self) -> &ResourceSchema;

    /// Kinds whose reads drop a configured `generateName`.
    fn omits_generate_name_on_read(&self) -> bool {
        false
    }

    /// Kind-specific checks run after the generic ones.
    fn validate(&self, _model: &FlatModel) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Generic structural checks followed by `validate`.
    fn check(&self, model: &FlatModel) -> Result<(), ValidationError> {
        validate_model(self.schema(), model)?;
        self.validate(model)
    }

    fn expand(&self, model: &FlatModel) -> Result<RemoteObject, ValidationError> {
        self.check(model)?;
        Ok(expand(self.schema(), model))
    }

    fn flatten(&self, obj: &RemoteObject, prior: &FlatModel) -> Result<FlatModel, ValidationError> {
        let mut flat = flatten(self.schema(), obj, prior)?;
        if self.omits_generate_name_on_read() {
            metadata::reinject_generate_name(&mut flat, prior);
        }
        Ok(flat)
    }

    /// Convergence predicate: every authoritative field of the submitted draft
    /// is echoed by the observed object.
    fn converged(&self, submitted: &RemoteObject, observed: Option<&RemoteObject>) -> Result<(), Mismatch> {
        let Some(observed) = observed else {
            return Err(Mismatch::new("object to be visible", "not found"));
        };
        for field in self.schema().fields().iter().filter(|f| f.authoritative) {
            let want = normalized(submitted.get(&field.path));
            let got = normalized(observed.get(&field.path));
            if want != got {
                return Err(Mismatch::new(
                    format!("{}={}", field.key, render(want)),
                    format!("{}={}", field.key, render(got)),
                ));
            }
        }
        Ok(())
    }
}

fn normalized(v: Option<&Json>) -> Option<&Json> {
    v.filter(|v| match v {
        Json::Null => false,
        Json::Object(m) => !m.is_empty(),
        Json::Array(a) => !a.is_empty(),
        _ => true,
    })
}

fn render(v: Option<&Json>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "<absent>".to_string())
}

/// Structural checks: known keys, declared types, ranges, required fields,
/// identity rules. Computed keys are tolerated (observed models carry them).
pub fn validate_model(schema: &ResourceSchema, model: &FlatModel) -> Result<(), ValidationError> {
    for (key, value) in model.iter() {
        let field = schema
            .lookup(key)
            .ok_or_else(|| ValidationError::new(key, format!("not a field of {}", schema.kind)))?;
        check_value(field, value)?;
    }
    for field in schema.fields().iter().filter(|f| f.required) {
        if !model.contains(&field.key) {
            return Err(ValidationError::new(&field.key, "is required"));
        }
    }
    if schema.by_role(FieldRole::Name).is_some() {
        metadata::validate_identity(model)?;
    }
    Ok(())
}

pub fn check_value(field: &FieldSpec, value: &FlatValue) -> Result<(), ValidationError> {
    match (&field.ty, value) {
        (FieldType::String, FlatValue::String(_))
        | (FieldType::Bool, FlatValue::Bool(_))
        | (FieldType::StringMap, FlatValue::Map(_))
        | (FieldType::StringList, FlatValue::List(_)) => Ok(()),
        (FieldType::Int { min, max }, FlatValue::Int(i)) => {
            if i < min || i > max {
                Err(ValidationError::new(&field.key, format!("{i} is out of range [{min}, {max}]")))
            } else {
                Ok(())
            }
        }
        (ty, other) => Err(ValidationError::new(
            &field.key,
            format!("expected {}, got {} {}", ty.name(), other.type_name(), other.render()),
        )),
    }
}

/// Build a complete draft from scratch. Assumes `validate_model` passed.
/// Computed fields and empty collections are left out.
pub fn expand(schema: &ResourceSchema, model: &FlatModel) -> RemoteObject {
    let mut obj = RemoteObject::new(&schema.api_version, &schema.kind);
    for field in schema.fields().iter().filter(|f| !f.computed) {
        let value = match model.get(&field.key) {
            Some(v) => v.clone(),
            None if field.optional_computed => continue,
            None => match field.effective_default() {
                Some(d) => d,
                None => continue,
            },
        };
        if field.ty.is_collection() && value.is_zero() {
            continue;
        }
        if field.optional_computed && value.is_zero() {
            continue;
        }
        obj.set(&field.path, value.to_json());
    }
    obj
}

/// Rebuild the flat model from an authoritative read. `prior` decides which
/// cluster-managed metadata keys are kept.
pub fn flatten(schema: &ResourceSchema, obj: &RemoteObject, prior: &FlatModel) -> Result<FlatModel, ValidationError> {
    let mut flat = FlatModel::new();
    for field in schema.fields() {
        let observed = match obj.get(&field.path) {
            Some(Json::Null) | None => None,
            Some(raw) => Some(from_json(field, raw)?),
        };
        let value = match observed {
            Some(v) => v,
            None => match field.effective_default() {
                Some(d) if !field.computed => d,
                _ => continue,
            },
        };
        let value = match (field.role, value) {
            (FieldRole::Labels | FieldRole::Annotations, FlatValue::Map(m)) => {
                FlatValue::Map(metadata::strip_internal_keys(m, prior.get_map(&field.key).ok().flatten()))
            }
            (_, v) => v,
        };
        flat.set(field.key.clone(), value);
    }
    Ok(flat)
}

fn from_json(field: &FieldSpec, raw: &Json) -> Result<FlatValue, ValidationError> {
    let bad = || {
        ValidationError::new(&field.key, format!("remote value {raw} is not a {}", field.ty.name()))
    };
    match &field.ty {
        FieldType::String => raw.as_str().map(|s| FlatValue::String(s.to_string())).ok_or_else(bad),
        FieldType::Int { .. } => raw.as_i64().map(FlatValue::Int).ok_or_else(bad),
        FieldType::Bool => raw.as_bool().map(FlatValue::Bool).ok_or_else(bad),
        FieldType::StringMap => {
            let obj = raw.as_object().ok_or_else(bad)?;
            let mut out = BTreeMap::new();
            for (k, v) in obj {
                out.insert(k.clone(), v.as_str().ok_or_else(bad)?.to_string());
            }
            Ok(FlatValue::Map(out))
        }
        FieldType::StringList => {
            let arr = raw.as_array().ok_or_else(bad)?;
            let items = arr.iter().map(|v| v.as_str().map(str::to_string).ok_or_else(bad)).collect::<Result<Vec<_>, _>>()?;
            Ok(FlatValue::List(items))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Scope;
    use serde_json::json;

    fn schema() -> ResourceSchema {
        let mut s = ResourceSchema::new("example.dev/v1", "Widget", Scope::Cluster);
        for f in metadata::metadata_fields("widget", false, true) {
            s = s.field(f);
        }
        s.field(FieldSpec::new("size", &["spec", "size"], FieldType::Int { min: 0, max: 10 }).required().authoritative())
            .field(FieldSpec::new("color", &["spec", "color"], FieldType::String).default_value(""))
            .field(FieldSpec::new("tags", &["spec", "tags"], FieldType::StringList))
    }

    fn model() -> FlatModel {
        FlatModel::new()
            .with(metadata::NAME, "w1")
            .with(metadata::LABELS, BTreeMap::from([("app".to_string(), "demo".to_string())]))
            .with(metadata::ANNOTATIONS, BTreeMap::new())
            .with("size", 3i64)
            .with("color", "red")
            .with("tags", vec!["a".to_string()])
    }

    #[test]
    fn expand_writes_nested_paths() {
        let obj = expand(&schema(), &model());
        assert_eq!(
            obj.as_json(),
            &json!({
                "apiVersion": "example.dev/v1",
                "kind": "Widget",
                "metadata": {"name": "w1", "labels": {"app": "demo"}},
                "spec": {"size": 3, "color": "red", "tags": ["a"]}
            })
        );
    }

    #[test]
    fn flatten_of_expand_round_trips() {
        let m = model();
        let back = flatten(&schema(), &expand(&schema(), &m), &m).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn flatten_applies_defaults_and_keeps_computed() {
        let remote = RemoteObject::from_json(json!({
            "metadata": {"name": "w1", "resourceVersion": "7", "uid": "u-1"},
            "spec": {"size": 3}
        }));
        let flat = flatten(&schema(), &remote, &FlatModel::new()).unwrap();
        assert_eq!(flat.get_str("color").unwrap(), Some(""));
        assert_eq!(flat.get_str(metadata::RESOURCE_VERSION).unwrap(), Some("7"));
        assert!(flat.get(metadata::GENERATION).is_none());
        assert!(flat.get(metadata::GENERATE_NAME).is_none());
    }

    #[test]
    fn validation_rejects_range_type_and_unknown_keys() {
        let s = schema();
        let e = validate_model(&s, &model().with("size", 11i64)).unwrap_err();
        assert_eq!(e.field, "size");
        assert!(e.message.contains("out of range"));

        let e = validate_model(&s, &model().with("color", true)).unwrap_err();
        assert!(e.message.contains("expected string"), "{}", e.message);

        let e = validate_model(&s, &model().with("shape", "round")).unwrap_err();
        assert_eq!(e.field, "shape");

        let mut missing = model();
        missing.remove("size");
        assert_eq!(validate_model(&s, &missing).unwrap_err().message, "is required");
    }

    #[test]
    fn flatten_rejects_mistyped_remote_values() {
        let remote = RemoteObject::from_json(json!({"metadata": {"name": "w1"}, "spec": {"size": "three"}}));
        let e = flatten(&schema(), &remote, &FlatModel::new()).unwrap_err();
        assert_eq!(e.field, "size");
    }

    struct Widget(ResourceSchema);
    impl ResourceKind for Widget {
        fn name(&self) -> &'static str { "widget" }
        fn schema(&self) -> &ResourceSchema { &self.0 }
    }

    #[test]
    fn default_convergence_compares_authoritative_fields() {
        let kind = Widget(schema());
        let draft = kind.expand(&model()).unwrap();
        let mut lagging = draft.as_json().clone();
        lagging["spec"]["size"] = json!(1);
        let stale = RemoteObject::from_json(lagging);

        let m = kind.converged(&draft, Some(&stale)).unwrap_err();
        assert_eq!(m.expected, "size=3");
        assert_eq!(m.observed, "size=1");
        assert!(kind.converged(&draft, None).is_err());
        assert!(kind.converged(&draft, Some(&draft)).is_ok());
    }
}
