//! Steward kubehub: the Kubernetes-backed object store, resolved through
//! discovery and driven with `Api<DynamicObject>`.

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use steward_core::{DeleteOutcome, LocalId, ObjectStore, PatchDocument, RemoteObject, StoreError};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespaced: bool,
}

impl DiscoveredResource {
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// Served resources, sorted by group, version, kind.
pub async fn discover(client: Client) -> Result<Vec<DiscoveredResource>> {
    let discovery = Discovery::new(client).run().await?;
    let mut out = Vec::new();
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            out.push(DiscoveredResource {
                group: ar.group.clone(),
                version: ar.version.clone(),
                kind: ar.kind.clone(),
                namespaced: matches!(caps.scope, Scope::Namespaced),
            });
        }
    }
    out.sort_by(|a, b| a.group.cmp(&b.group).then(a.version.cmp(&b.version)).then(a.kind.cmp(&b.kind)));
    Ok(out)
}

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() }),
        [group, version, kind] => Ok(GroupVersionKind { group: (*group).to_string(), version: (*version).to_string(), kind: (*kind).to_string() }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                return Ok((ar.clone(), matches!(caps.scope, Scope::Namespaced)));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

/// Map API status codes onto the store error taxonomy.
pub fn map_kube_error(err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => StoreError::NotFound(resp.message),
            409 => StoreError::Conflict(resp.message),
            401 | 403 => StoreError::Forbidden(resp.message),
            400 | 422 => StoreError::Invalid(resp.message),
            code => StoreError::Transport(format!("{code} {}: {}", resp.reason, resp.message)),
        },
        other => StoreError::Transport(other.to_string()),
    }
}

fn to_dynamic(obj: &RemoteObject) -> Result<DynamicObject, StoreError> {
    serde_json::from_value(obj.as_json().clone()).map_err(|e| StoreError::Invalid(format!("not a valid object: {e}")))
}

fn from_dynamic(obj: DynamicObject) -> Result<RemoteObject, StoreError> {
    let mut raw = serde_json::to_value(obj).map_err(|e| StoreError::Transport(e.to_string()))?;
    if let Some(meta) = raw.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
    Ok(RemoteObject::from_json(raw))
}

/// Object store for one resource kind on a live cluster.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    ar: ApiResource,
    namespaced: bool,
}

impl KubeStore {
    pub fn new(client: Client, ar: ApiResource, namespaced: bool) -> Self {
        Self { client, ar, namespaced }
    }

    /// Resolve `gvk_key` (`v1/ConfigMap`, `scheduling.k8s.io/v1/PriorityClass`)
    /// with the default client.
    pub async fn connect(gvk_key: &str) -> Result<Self> {
        let client = Client::try_default().await?;
        let gvk = parse_gvk_key(gvk_key)?;
        let (ar, namespaced) = find_api_resource(client.clone(), &gvk).await?;
        info!(gvk = %gvk_key, namespaced, "kube store ready");
        Ok(Self::new(client, ar, namespaced))
    }

    pub fn namespaced(&self) -> bool {
        self.namespaced
    }

    fn api(&self, namespace: Option<&str>) -> Result<Api<DynamicObject>, StoreError> {
        if !self.namespaced {
            return Ok(Api::all_with(self.client.clone(), &self.ar));
        }
        match namespace {
            Some(ns) => Ok(Api::namespaced_with(self.client.clone(), ns, &self.ar)),
            None => Err(StoreError::Invalid(format!("namespace required for namespaced kind {}", self.ar.kind))),
        }
    }

    fn record(&self, op: &'static str, t0: Instant) {
        counter!("store_calls_total", 1u64, "backend" => "kube", "op" => op);
        histogram!("store_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => op);
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn create(&self, draft: &RemoteObject) -> Result<RemoteObject, StoreError> {
        let t0 = Instant::now();
        let api = self.api(draft.namespace())?;
        let obj = to_dynamic(draft)?;
        let res = api.create(&PostParams::default(), &obj).await;
        self.record("create", t0);
        let created = from_dynamic(res.map_err(map_kube_error)?)?;
        debug!(name = ?created.name(), rv = ?created.resource_version(), "kube create ok");
        Ok(created)
    }

    async fn get(&self, id: &LocalId) -> Result<Option<RemoteObject>, StoreError> {
        let t0 = Instant::now();
        let api = self.api(id.namespace())?;
        let res = api.get_opt(id.name()).await;
        self.record("get", t0);
        res.map_err(map_kube_error)?.map(from_dynamic).transpose()
    }

    async fn patch(&self, id: &LocalId, patch: &PatchDocument) -> Result<RemoteObject, StoreError> {
        let t0 = Instant::now();
        let api = self.api(id.namespace())?;
        let ops: json_patch::Patch =
            serde_json::from_value(patch.to_json()).map_err(|e| StoreError::Invalid(e.to_string()))?;
        let res = api.patch(id.name(), &PatchParams::default(), &Patch::Json::<()>(ops)).await;
        self.record("patch", t0);
        let patched = from_dynamic(res.map_err(map_kube_error)?)?;
        debug!(%id, ops = patch.len(), rv = ?patched.resource_version(), "kube patch ok");
        Ok(patched)
    }

    async fn delete(&self, id: &LocalId) -> Result<DeleteOutcome, StoreError> {
        let t0 = Instant::now();
        let api = self.api(id.namespace())?;
        let res = api.delete(id.name(), &DeleteParams::default()).await;
        self.record("delete", t0);
        match res.map_err(map_kube_error) {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.is_not_found() => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("boom {code}"),
            reason: "Test".into(),
            code,
        })
    }

    #[test]
    fn status_codes_map_to_store_errors() {
        assert_eq!(map_kube_error(api_err(404)), StoreError::NotFound("boom 404".into()));
        assert!(matches!(map_kube_error(api_err(409)), StoreError::Conflict(_)));
        assert!(matches!(map_kube_error(api_err(403)), StoreError::Forbidden(_)));
        assert!(matches!(map_kube_error(api_err(422)), StoreError::Invalid(_)));
        assert!(matches!(map_kube_error(api_err(503)), StoreError::Transport(_)));
    }

    #[test]
    fn gvk_keys_parse_with_and_without_group() {
        let core = parse_gvk_key("v1/ConfigMap").unwrap();
        assert_eq!((core.group.as_str(), core.version.as_str(), core.kind.as_str()), ("", "v1", "ConfigMap"));
        let sched = parse_gvk_key("scheduling.k8s.io/v1/PriorityClass").unwrap();
        assert_eq!(sched.group, "scheduling.k8s.io");
        assert!(parse_gvk_key("PriorityClass").is_err());
    }

    #[test]
    fn remote_objects_convert_to_dynamic_and_back() {
        let obj = RemoteObject::from_json(serde_json::json!({
            "apiVersion": "scheduling.k8s.io/v1",
            "kind": "PriorityClass",
            "metadata": {"name": "high", "managedFields": [{"manager": "x"}]},
            "value": 1000
        }));
        let dynamic = to_dynamic(&obj).unwrap();
        assert_eq!(dynamic.metadata.name.as_deref(), Some("high"));
        let back = from_dynamic(dynamic).unwrap();
        assert_eq!(back.as_json()["value"], serde_json::json!(1000));
        assert!(back.as_json()["metadata"].get("managedFields").is_none());
    }
}
