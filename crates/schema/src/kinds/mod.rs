//! Built-in kinds, looked up by their short registry name.

use std::sync::Arc;

pub mod config_map;
pub mod priority_class;

use crate::mapper::ResourceKind;

pub fn all_kinds() -> Vec<Arc<dyn ResourceKind>> {
    vec![Arc::new(priority_class::PriorityClass::new()), Arc::new(config_map::ConfigMap::new())]
}

/// `priority_class`, `config_map`; the Kubernetes kind name (any case) also matches.
pub fn kind_by_name(name: &str) -> Option<Arc<dyn ResourceKind>> {
    all_kinds()
        .into_iter()
        .find(|k| k.name() == name || k.schema().kind.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_by_short_or_kind_name() {
        assert_eq!(kind_by_name("priority_class").map(|k| k.name()), Some("priority_class"));
        assert_eq!(kind_by_name("configmap").map(|k| k.name()), Some("config_map"));
        assert!(kind_by_name("deployment").is_none());
    }

    #[test]
    fn expanded_models_flatten_back_unchanged() {
        let cases = [
            ("priority_class", json!({"metadata": {"name": "high"}, "value": 1000000})),
            (
                "priority_class",
                json!({
                    "metadata": {
                        "name": "batch",
                        "labels": {"team": "core", "app.kubernetes.io/part-of": "jobs"},
                        "annotations": {"example.com/owner": "ops"}
                    },
                    "description": "batch jobs",
                    "global_default": true,
                    "value": -5
                }),
            ),
            ("priority_class", json!({"metadata": [{"generate_name": "pc-"}], "value": 0})),
            (
                "config_map",
                json!({
                    "metadata": {"name": "settings", "namespace": "apps", "labels": {"tier": "1"}},
                    "data": {"mode": "fast", "retries": 3}
                }),
            ),
            ("config_map", json!({"metadata": {"generate_name": "cfg-"}})),
            ("config_map", json!({"metadata": {"name": "empty", "namespace": "kube-system"}, "data": {}})),
        ];
        for (name, doc) in cases {
            let kind = kind_by_name(name).unwrap();
            let model = crate::loader::load_config(kind.schema(), &doc).unwrap();
            let obj = kind.expand(&model).unwrap();
            let back = kind.flatten(&obj, &model).unwrap();
            assert_eq!(back, model, "{name}: {doc}");
        }
    }
}
