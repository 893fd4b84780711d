//! Steward apply: minimal field-level patch documents between two flat model
//! snapshots, plus drift summaries between a draft and a live object.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde_json::Value as Json;
use steward_core::{DiffSummary, FieldPath, FlatModel, FlatValue, PatchDocument, PatchOp, RemoteObject, ValidationError};
use steward_schema::{FieldRole, FieldSpec, ResourceSchema};
use tracing::debug;

/// Operations turning the remote object of `prior` into that of `current`.
///
/// Emitted in field declaration order. Computed fields are never diffed;
/// optional-computed fields left unset in `current` keep the store's value.
/// Without a live object, an empty prior label or annotation map is taken to
/// be absent remotely; see [`build_patch_against`].
pub fn build_patch(schema: &ResourceSchema, prior: &FlatModel, current: &FlatModel) -> Result<PatchDocument, ValidationError> {
    build_patch_against(schema, prior, current, None)
}

/// Like [`build_patch`], with `live` deciding whether each label and
/// annotation map already exists in the store. An existing map is only ever
/// patched key by key, so keys we never saw (cluster-managed ones stripped on
/// read, or ones added by other writers) are left in place.
pub fn build_patch_against(
    schema: &ResourceSchema,
    prior: &FlatModel,
    current: &FlatModel,
    live: Option<&RemoteObject>,
) -> Result<PatchDocument, ValidationError> {
    let mut doc = PatchDocument::new();
    for field in schema.fields().iter().filter(|f| !f.computed) {
        let before = non_zero(prior.get(&field.key));
        let after = non_zero(current.get(&field.key));
        if field.optional_computed && after.is_none() {
            continue;
        }
        if before == after {
            continue;
        }
        if field.immutable {
            return Err(ValidationError::new(
                &field.key,
                format!("changing {} to {} requires replacement", render(before), render(after)),
            ));
        }
        if is_metadata_map(field) {
            let empty = BTreeMap::new();
            let before = as_map(before).unwrap_or(&empty);
            let exists = match live {
                Some(obj) => obj.get(&field.path).is_some_and(Json::is_object),
                None => !before.is_empty(),
            };
            patch_metadata_map(&mut doc, &field.path, before, as_map(after).unwrap_or(&empty), exists);
            continue;
        }
        doc.push(scalar_op(field, before, after, current));
    }
    debug!(kind = %schema.kind, ops = doc.len(), live = live.is_some(), "patch built");
    Ok(doc)
}

/// True when a label or annotation map goes from empty to non-empty. The
/// flat model cannot tell whether such a map exists remotely, so the caller
/// should fetch the live object and use [`build_patch_against`].
pub fn needs_live_view(schema: &ResourceSchema, prior: &FlatModel, current: &FlatModel) -> bool {
    schema.fields().iter().filter(|f| is_metadata_map(f)).any(|f| {
        let empty_before = non_zero(prior.get(&f.key)).is_none();
        let set_after = non_zero(current.get(&f.key)).is_some();
        empty_before && set_after
    })
}

fn is_metadata_map(field: &FieldSpec) -> bool {
    matches!(field.role, FieldRole::Labels | FieldRole::Annotations)
}

fn scalar_op(field: &FieldSpec, before: Option<&FlatValue>, after: Option<&FlatValue>, current: &FlatModel) -> PatchOp {
    let path = field.path.clone();
    match (before, after) {
        (Some(_), Some(v)) => PatchOp::replace(path, v.to_json()),
        (None, Some(v)) => PatchOp::add(path, v.to_json()),
        (Some(_), None) if field.required => {
            let zero = current.get(&field.key).map(FlatValue::to_json).unwrap_or(Json::from(0));
            PatchOp::replace(path, zero)
        }
        (_, None) => PatchOp::remove(path),
    }
}

/// Key-level operations on a label or annotation map so keys owned by other
/// writers survive. A map that does not `exist` remotely is added whole.
pub fn patch_metadata_map(
    doc: &mut PatchDocument,
    path: &FieldPath,
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
    exists: bool,
) {
    if !exists {
        if !after.is_empty() {
            doc.push(PatchOp::add(path.clone(), FlatValue::Map(after.clone()).to_json()));
        }
        return;
    }
    let keys: std::collections::BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    for key in keys {
        let at = path.child(key.as_str());
        match (before.get(key), after.get(key)) {
            (Some(b), Some(a)) if a != b => doc.push(PatchOp::replace(at, Json::String(a.clone()))),
            (None, Some(a)) => doc.push(PatchOp::add(at, Json::String(a.clone()))),
            (Some(_), None) => doc.push(PatchOp::remove(at)),
            _ => {}
        }
    }
}

fn non_zero(v: Option<&FlatValue>) -> Option<&FlatValue> {
    v.filter(|v| !v.is_zero())
}

fn as_map(v: Option<&FlatValue>) -> Option<&BTreeMap<String, String>> {
    match v {
        Some(FlatValue::Map(m)) => Some(m),
        _ => None,
    }
}

fn render(v: Option<&FlatValue>) -> String {
    v.map(FlatValue::render).unwrap_or_else(|| "<unset>".to_string())
}

/// Remove server-populated noise before comparing a draft with a live object.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) {
        for key in ["managedFields", "resourceVersion", "generation", "creationTimestamp", "uid"] {
            meta.remove(key);
        }
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

/// Structural drift between what we would submit and what the store holds,
/// counting keys only on the live side as removes.
pub fn drift_summary(target: &RemoteObject, live: &RemoteObject) -> DiffSummary {
    fn walk(a: &Json, b: &Json, s: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, s),
                        None => s.adds += 1,
                    }
                }
                s.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                s.updates += aa.iter().zip(bb).filter(|(x, y)| x != y).count();
                s.adds += aa.len().saturating_sub(bb.len());
                s.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) if av != bv => s.updates += 1,
            _ => {}
        }
    }
    let mut s = DiffSummary::default();
    walk(&strip_noisy(target.as_json().clone()), &strip_noisy(live.as_json().clone()), &mut s);
    s
}
