//! Configuration documents (YAML or JSON) into flat models.
//!
//! Top-level keys are flat keys; a key naming a block (`metadata`) holds an
//! object, or a one-element list of one, whose keys become `metadata.0.<key>`.

use std::collections::BTreeMap;

use serde_json::Value as Json;
use steward_core::{FlatModel, FlatValue, ValidationError};
use tracing::debug;

use crate::mapper::{check_value, validate_model};
use crate::schema::{FieldSpec, FieldType, ResourceSchema};

fn max_yaml_bytes() -> usize {
    std::env::var("STEWARD_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000)
}

/// Parse YAML text and load it against `schema`.
pub fn load_yaml(schema: &ResourceSchema, text: &str) -> Result<FlatModel, ValidationError> {
    let cap = max_yaml_bytes();
    if text.len() > cap {
        return Err(ValidationError::new("<document>", format!("document is {} bytes, limit is {cap}", text.len())));
    }
    let doc: Json = serde_yaml::from_str(text).map_err(|e| ValidationError::new("<document>", e.to_string()))?;
    load_config(schema, &doc)
}

/// Load an already-parsed document. Defaults fill absent fields; the result
/// passes `validate_model`.
pub fn load_config(schema: &ResourceSchema, doc: &Json) -> Result<FlatModel, ValidationError> {
    let top = doc
        .as_object()
        .ok_or_else(|| ValidationError::new("<document>", "expected a mapping at the top level"))?;
    let mut model = FlatModel::new();
    for (key, raw) in top {
        if schema.is_block(key) {
            let block = block_object(key, raw)?;
            for (inner, v) in block {
                put(schema, &mut model, &format!("{key}.0.{inner}"), v)?;
            }
        } else {
            put(schema, &mut model, key, raw)?;
        }
    }
    for field in schema.fields().iter().filter(|f| !f.computed && !f.optional_computed) {
        if model.contains(&field.key) {
            continue;
        }
        if let Some(default) = field.effective_default() {
            model.set(field.key.clone(), default);
        }
    }
    validate_model(schema, &model)?;
    debug!(kind = %schema.kind, fields = model.len(), "config loaded");
    Ok(model)
}

fn block_object<'a>(key: &str, raw: &'a Json) -> Result<&'a serde_json::Map<String, Json>, ValidationError> {
    match raw {
        Json::Object(m) => Ok(m),
        Json::Array(items) if items.len() == 1 => items[0]
            .as_object()
            .ok_or_else(|| ValidationError::new(key, "block entry must be a mapping")),
        _ => Err(ValidationError::new(key, "expected a single block")),
    }
}

fn put(schema: &ResourceSchema, model: &mut FlatModel, key: &str, raw: &Json) -> Result<(), ValidationError> {
    let field = schema
        .lookup(key)
        .ok_or_else(|| ValidationError::new(key, format!("not a field of {}", schema.kind)))?;
    if field.computed {
        return Err(ValidationError::new(key, "is computed and cannot be configured"));
    }
    if raw.is_null() {
        return Ok(());
    }
    let value = coerce(field, raw)?;
    check_value(field, &value)?;
    model.set(key, value);
    Ok(())
}

fn coerce(field: &FieldSpec, raw: &Json) -> Result<FlatValue, ValidationError> {
    let mismatch = || {
        ValidationError::new(&field.key, format!("expected {}, got {}", field.ty.name(), describe(raw)))
    };
    match &field.ty {
        FieldType::String => raw.as_str().map(FlatValue::from).ok_or_else(mismatch),
        FieldType::Bool => raw.as_bool().map(FlatValue::Bool).ok_or_else(mismatch),
        FieldType::Int { .. } => raw.as_i64().map(FlatValue::Int).ok_or_else(mismatch),
        FieldType::StringMap => {
            let obj = raw.as_object().ok_or_else(mismatch)?;
            let mut out = BTreeMap::new();
            for (k, v) in obj {
                out.insert(k.clone(), scalar_string(v).ok_or_else(mismatch)?);
            }
            Ok(FlatValue::Map(out))
        }
        FieldType::StringList => {
            let arr = raw.as_array().ok_or_else(mismatch)?;
            let items = arr.iter().map(|v| scalar_string(v).ok_or_else(mismatch)).collect::<Result<Vec<_>, _>>()?;
            Ok(FlatValue::List(items))
        }
    }
}

/// Map and list members are strings; YAML scalars like `true` or `3` are
/// taken as their text.
fn scalar_string(v: &Json) -> Option<String> {
    match v {
        Json::String(s) => Some(s.clone()),
        Json::Bool(b) => Some(b.to_string()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn describe(raw: &Json) -> String {
    match raw {
        Json::String(s) => format!("string {s:?}"),
        Json::Bool(b) => format!("bool {b}"),
        Json::Number(n) => format!("number {n}"),
        Json::Array(_) => "list".to_string(),
        Json::Object(_) => "mapping".to_string(),
        Json::Null => "null".to_string(),
    }
}
