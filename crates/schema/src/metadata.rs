//! Shared metadata sub-mapper: the identity block every kind carries.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use steward_core::{FlatModel, FlatValue, ValidationError};

use crate::schema::{FieldRole, FieldSpec, FieldType};

pub const NAME: &str = "metadata.0.name";
pub const GENERATE_NAME: &str = "metadata.0.generate_name";
pub const NAMESPACE: &str = "metadata.0.namespace";
pub const LABELS: &str = "metadata.0.labels";
pub const ANNOTATIONS: &str = "metadata.0.annotations";
pub const RESOURCE_VERSION: &str = "metadata.0.resource_version";
pub const UID: &str = "metadata.0.uid";
pub const GENERATION: &str = "metadata.0.generation";

const MAX_ANNOTATIONS_BYTES: usize = 256 * 1024;

static DNS_SUBDOMAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap());
static DNS_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());
static QUALIFIED_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").unwrap());
static LABEL_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").unwrap());

/// Metadata fields for a kind named `object_desc` (used in field docs).
/// `generatable` kinds accept `generate_name` instead of `name`.
pub fn metadata_fields(object_desc: &str, namespaced: bool, generatable: bool) -> Vec<FieldSpec> {
    let mut out = Vec::with_capacity(8);
    let mut name = FieldSpec::new(NAME, &["metadata", "name"], FieldType::String)
        .role(FieldRole::Name)
        .immutable()
        .describe(&format!("Name of the {object_desc}, must be unique."));
    if generatable {
        name = name.optional_computed();
    } else {
        name = name.required();
    }
    out.push(name);
    if generatable {
        out.push(
            FieldSpec::new(GENERATE_NAME, &["metadata", "generateName"], FieldType::String)
                .role(FieldRole::GenerateName)
                .immutable()
                .describe("Prefix used by the server to generate a unique name when `name` is not set."),
        );
    }
    if namespaced {
        out.push(
            FieldSpec::new(NAMESPACE, &["metadata", "namespace"], FieldType::String)
                .role(FieldRole::Namespace)
                .immutable()
                .default_value("default")
                .describe(&format!("Namespace that contains the {object_desc}.")),
        );
    }
    out.push(
        FieldSpec::new(LABELS, &["metadata", "labels"], FieldType::StringMap)
            .role(FieldRole::Labels)
            .describe(&format!("Map of string keys and values used to organize and categorize the {object_desc}.")),
    );
    out.push(
        FieldSpec::new(ANNOTATIONS, &["metadata", "annotations"], FieldType::StringMap)
            .role(FieldRole::Annotations)
            .describe(&format!("Unstructured key value map stored with the {object_desc}.")),
    );
    out.push(FieldSpec::new(RESOURCE_VERSION, &["metadata", "resourceVersion"], FieldType::String).computed());
    out.push(FieldSpec::new(UID, &["metadata", "uid"], FieldType::String).computed());
    out.push(FieldSpec::new(GENERATION, &["metadata", "generation"], FieldType::Int { min: 0, max: i64::MAX }).computed());
    out
}

pub fn validate_name(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.len() > 253 || !DNS_SUBDOMAIN.is_match(name) {
        return Err(ValidationError::new(field, format!("{name:?} is not a valid DNS-1123 subdomain")));
    }
    Ok(())
}

/// A generate-name prefix may end with `-` (or `.`); the server appends a suffix.
pub fn validate_generate_name(field: &str, prefix: &str) -> Result<(), ValidationError> {
    let trimmed = prefix.trim_end_matches(['-', '.']);
    if trimmed.is_empty() || prefix.len() > 248 || !DNS_SUBDOMAIN.is_match(trimmed) {
        return Err(ValidationError::new(field, format!("{prefix:?} is not a valid name prefix")));
    }
    Ok(())
}

pub fn validate_namespace(field: &str, ns: &str) -> Result<(), ValidationError> {
    if ns.len() > 63 || !DNS_LABEL.is_match(ns) {
        return Err(ValidationError::new(field, format!("{ns:?} is not a valid DNS-1123 label")));
    }
    Ok(())
}

/// `[prefix/]name` where prefix is a DNS subdomain and name a qualified name.
pub fn validate_qualified_key(field: &str, key: &str) -> Result<(), ValidationError> {
    let (prefix, name) = match key.split_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, key),
    };
    if let Some(p) = prefix {
        if p.is_empty() || p.len() > 253 || !DNS_SUBDOMAIN.is_match(p) {
            return Err(ValidationError::new(field, format!("key {key:?} has an invalid prefix")));
        }
    }
    if name.is_empty() || name.len() > 63 || !QUALIFIED_NAME.is_match(name) {
        return Err(ValidationError::new(field, format!("key {key:?} is not a qualified name")));
    }
    Ok(())
}

pub fn validate_labels(field: &str, labels: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    for (k, v) in labels {
        validate_qualified_key(field, k)?;
        if v.len() > 63 || !LABEL_VALUE.is_match(v) {
            return Err(ValidationError::new(field, format!("label {k:?} has invalid value {v:?}")));
        }
    }
    Ok(())
}

pub fn validate_annotations(field: &str, annotations: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    let mut total = 0usize;
    for (k, v) in annotations {
        validate_qualified_key(field, k)?;
        total += k.len() + v.len();
    }
    if total > MAX_ANNOTATIONS_BYTES {
        return Err(ValidationError::new(field, format!("annotations exceed {MAX_ANNOTATIONS_BYTES} bytes")));
    }
    Ok(())
}

/// Identity checks shared by every kind: exactly one of name/generate_name
/// decides the object's name, and both must be well formed.
pub fn validate_identity(model: &FlatModel) -> Result<(), ValidationError> {
    let name = model.get_str(NAME)?.unwrap_or("");
    let generate = model.get_str(GENERATE_NAME)?.unwrap_or("");
    match (name.is_empty(), generate.is_empty()) {
        (true, true) => return Err(ValidationError::new(NAME, "one of name or generate_name must be set")),
        (false, false) => {
            return Err(ValidationError::new(GENERATE_NAME, "conflicts with name; set only one of them"))
        }
        (false, true) => validate_name(NAME, name)?,
        (true, false) => validate_generate_name(GENERATE_NAME, generate)?,
    }
    if let Some(ns) = model.get_str(NAMESPACE)? {
        validate_namespace(NAMESPACE, ns)?;
    }
    if let Some(labels) = model.get_map(LABELS)? {
        validate_labels(LABELS, labels)?;
    }
    if let Some(annotations) = model.get_map(ANNOTATIONS)? {
        validate_annotations(ANNOTATIONS, annotations)?;
    }
    Ok(())
}

/// Keys under `kubernetes.io/` or `k8s.io/` (and their subdomains) are
/// written by the cluster itself.
pub fn is_internal_key(key: &str) -> bool {
    let Some((prefix, _)) = key.split_once('/') else { return false };
    ["kubernetes.io", "k8s.io"]
        .iter()
        .any(|domain| prefix == *domain || prefix.ends_with(&format!(".{domain}")))
}

/// Drop cluster-managed keys from an observed label/annotation map unless the
/// prior model configured them.
pub fn strip_internal_keys(observed: BTreeMap<String, String>, prior: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
    observed
        .into_iter()
        .filter(|(k, _)| !is_internal_key(k) || prior.is_some_and(|p| p.contains_key(k)))
        .collect()
}

/// Some kinds omit `generateName` on read even though it was set. Copy it back
/// from the prior model so it does not show up as drift.
pub fn reinject_generate_name(flat: &mut FlatModel, prior: &FlatModel) {
    if !flat.get(GENERATE_NAME).map_or(true, FlatValue::is_zero) {
        return;
    }
    if let Some(FlatValue::String(prev)) = prior.get(GENERATE_NAME) {
        if !prev.is_empty() {
            flat.set(GENERATE_NAME, prev.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn names_follow_dns_rules() {
        assert!(validate_name(NAME, "high").is_ok());
        assert!(validate_name(NAME, "system.node-critical").is_ok());
        assert!(validate_name(NAME, "High").is_err());
        assert!(validate_name(NAME, "-x").is_err());
        assert!(validate_generate_name(GENERATE_NAME, "pc-").is_ok());
        assert!(validate_generate_name(GENERATE_NAME, "-").is_err());
    }

    #[test]
    fn label_keys_and_values() {
        assert!(validate_labels(LABELS, &map(&[("app.kubernetes.io/name", "web"), ("tier", "")])).is_ok());
        assert!(validate_labels(LABELS, &map(&[("bad key", "x")])).is_err());
        assert!(validate_labels(LABELS, &map(&[("ok", "not ok")])).is_err());
        assert!(validate_labels(LABELS, &map(&[("/x", "y")])).is_err());
    }

    #[test]
    fn identity_requires_exactly_one_name_source() {
        let none = FlatModel::new();
        assert_eq!(validate_identity(&none).unwrap_err().field, NAME);
        let both = FlatModel::new().with(NAME, "a").with(GENERATE_NAME, "a-");
        assert_eq!(validate_identity(&both).unwrap_err().field, GENERATE_NAME);
        let ok = FlatModel::new().with(NAME, "").with(GENERATE_NAME, "pc-");
        assert!(validate_identity(&ok).is_ok());
    }

    #[test]
    fn internal_keys_are_dropped_unless_configured() {
        assert!(is_internal_key("kubernetes.io/created-by"));
        assert!(is_internal_key("node.k8s.io/x"));
        assert!(!is_internal_key("example.com/x"));
        assert!(!is_internal_key("plain"));

        let observed = map(&[("a", "1"), ("kubernetes.io/x", "2"), ("k8s.io/y", "3")]);
        let prior = map(&[("k8s.io/y", "3")]);
        let kept = strip_internal_keys(observed, Some(&prior));
        assert_eq!(kept, map(&[("a", "1"), ("k8s.io/y", "3")]));
    }

    #[test]
    fn generate_name_is_reinjected_when_omitted() {
        let prior = FlatModel::new().with(GENERATE_NAME, "pc-");
        let mut observed = FlatModel::new().with(NAME, "pc-x1y2z").with(GENERATE_NAME, "");
        reinject_generate_name(&mut observed, &prior);
        assert_eq!(observed.get_str(GENERATE_NAME).unwrap(), Some("pc-"));

        let mut untouched = FlatModel::new().with(GENERATE_NAME, "other-");
        reinject_generate_name(&mut untouched, &prior);
        assert_eq!(untouched.get_str(GENERATE_NAME).unwrap(), Some("other-"));
    }
}
