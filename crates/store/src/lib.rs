//! Steward store: an in-memory, eventually consistent object store.
//!
//! Behaves like a small API server: assigns uid, resourceVersion, generation
//! and creationTimestamp, resolves `generateName`, applies JSON patches, and
//! can serve stale reads for a configurable number of calls after each write.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use metrics::counter;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use steward_core::{
    DeleteOutcome, FieldPath, LocalId, ObjectStore, OpKind, PatchDocument, RemoteObject, StoreError,
};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    Get,
    Patch,
    Delete,
}

impl StoreOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOp::Create => "create",
            StoreOp::Get => "get",
            StoreOp::Patch => "patch",
            StoreOp::Delete => "delete",
        }
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Entry {
    current: Json,
    /// What lagging reads return; `None` means "not visible yet".
    stale: Option<Json>,
    stale_reads: u32,
}

#[derive(Default)]
struct Inner {
    objects: FxHashMap<LocalId, Entry>,
    next_rv: u64,
    calls: FxHashMap<StoreOp, u64>,
    faults: VecDeque<(StoreOp, StoreError)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    read_lag: u32,
    omit_on_read: Vec<FieldPath>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// After every write, the next `reads` gets of that object return the
    /// previous version.
    pub fn with_read_lag(mut self, reads: u32) -> Self {
        self.read_lag = reads;
        self
    }

    /// Drop `path` from every object returned by `get`, as some servers do
    /// for fields they only use at creation time.
    pub fn omit_on_read(mut self, path: FieldPath) -> Self {
        self.omit_on_read.push(path);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next call of `op` with `err`. Faults queue up in order.
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.lock().faults.push_back((op, err));
    }

    pub fn calls(&self, op: StoreOp) -> u64 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.lock().calls.values().sum()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current committed state, ignoring read lag. Not counted as a call.
    pub fn peek(&self, id: &LocalId) -> Option<RemoteObject> {
        self.lock().objects.get(id).map(|e| RemoteObject::from_json(e.current.clone()))
    }

    /// A write from another agent: edit the committed object in place and
    /// bump its resourceVersion. Returns false when `id` does not exist.
    pub fn modify_out_of_band(&self, id: &LocalId, edit: impl FnOnce(&mut Json)) -> bool {
        let mut inner = self.lock();
        let rv = inner.bump_rv();
        let Some(entry) = inner.objects.get_mut(id) else { return false };
        edit(&mut entry.current);
        entry.current["metadata"]["resourceVersion"] = Json::String(rv);
        entry.stale = None;
        entry.stale_reads = 0;
        true
    }

    fn begin(&self, inner: &mut Inner, op: StoreOp) -> Result<(), StoreError> {
        *inner.calls.entry(op).or_default() += 1;
        counter!("store_calls_total", 1u64, "backend" => "memory", "op" => op.as_str());
        if let Some(pos) = inner.faults.iter().position(|(o, _)| *o == op) {
            if let Some((_, err)) = inner.faults.remove(pos) {
                debug!(%op, error = %err, "injected store fault");
                return Err(err);
            }
        }
        Ok(())
    }

    fn visible(&self, raw: Json) -> RemoteObject {
        let mut raw = raw;
        for path in &self.omit_on_read {
            path.remove(&mut raw);
        }
        RemoteObject::from_json(raw)
    }
}

impl Inner {
    fn bump_rv(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn without_metadata(v: &Json) -> Json {
    let mut v = v.clone();
    if let Some(obj) = v.as_object_mut() {
        obj.remove("metadata");
    }
    v
}

/// Evaluate `test` operations up front so a stale guard reads as a conflict
/// rather than a malformed patch.
fn check_guards(current: &Json, patch: &PatchDocument) -> Result<(), StoreError> {
    for op in patch.iter().filter(|o| o.op == OpKind::Test) {
        let found = op.path.lookup(current);
        if found != op.value.as_ref() {
            return Err(StoreError::Conflict(format!(
                "test failed at {}: object has {}",
                op.path,
                found.map(|v| v.to_string()).unwrap_or_else(|| "nothing".to_string())
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create(&self, draft: &RemoteObject) -> Result<RemoteObject, StoreError> {
        let mut inner = self.lock();
        self.begin(&mut inner, StoreOp::Create)?;
        let mut obj = draft.as_json().clone();
        if !obj.get("metadata").is_some_and(Json::is_object) {
            return Err(StoreError::Invalid("metadata is required".into()));
        }
        let name = match (draft.name().filter(|n| !n.is_empty()), draft.generate_name().filter(|g| !g.is_empty())) {
            (Some(name), _) => name.to_string(),
            (None, Some(prefix)) => loop {
                let suffix: String = Uuid::new_v4().simple().to_string().chars().take(5).collect();
                let candidate = format!("{prefix}{suffix}");
                if !inner.objects.contains_key(&LocalId::new(draft.namespace(), &candidate)) {
                    break candidate;
                }
            },
            (None, None) => return Err(StoreError::Invalid("name or generateName is required".into())),
        };
        let id = LocalId::new(draft.namespace(), &name);
        if inner.objects.contains_key(&id) {
            return Err(StoreError::Conflict(format!("{id} already exists")));
        }
        let rv = inner.bump_rv();
        let meta = &mut obj["metadata"];
        meta["name"] = Json::String(name);
        meta["uid"] = Json::String(Uuid::new_v4().to_string());
        meta["resourceVersion"] = Json::String(rv);
        meta["generation"] = Json::from(1);
        meta["creationTimestamp"] = Json::String(now_rfc3339());
        inner.objects.insert(id.clone(), Entry { current: obj.clone(), stale: None, stale_reads: self.read_lag });
        info!(%id, "memory store created object");
        Ok(RemoteObject::from_json(obj))
    }

    async fn get(&self, id: &LocalId) -> Result<Option<RemoteObject>, StoreError> {
        let mut inner = self.lock();
        self.begin(&mut inner, StoreOp::Get)?;
        let Some(entry) = inner.objects.get_mut(id) else { return Ok(None) };
        let raw = if entry.stale_reads > 0 {
            entry.stale_reads -= 1;
            debug!(%id, remaining = entry.stale_reads, "serving stale read");
            entry.stale.clone()
        } else {
            Some(entry.current.clone())
        };
        Ok(raw.map(|r| self.visible(r)))
    }

    async fn patch(&self, id: &LocalId, patch: &PatchDocument) -> Result<RemoteObject, StoreError> {
        let mut inner = self.lock();
        self.begin(&mut inner, StoreOp::Patch)?;
        let rv = inner.next_rv + 1;
        let read_lag = self.read_lag;
        let entry = inner.objects.get_mut(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        check_guards(&entry.current, patch)?;
        let ops: json_patch::Patch =
            serde_json::from_value(patch.to_json()).map_err(|e| StoreError::Invalid(e.to_string()))?;
        let mut next = entry.current.clone();
        json_patch::patch(&mut next, &ops).map_err(|e| StoreError::Invalid(e.to_string()))?;
        for key in ["name", "namespace", "uid"] {
            if next["metadata"].get(key) != entry.current["metadata"].get(key) {
                return Err(StoreError::Invalid(format!("metadata.{key} is immutable")));
            }
        }
        if without_metadata(&next) != without_metadata(&entry.current) {
            let generation = entry.current["metadata"]["generation"].as_i64().unwrap_or(0);
            next["metadata"]["generation"] = Json::from(generation + 1);
        }
        next["metadata"]["resourceVersion"] = Json::String(rv.to_string());
        entry.stale = Some(std::mem::replace(&mut entry.current, next.clone()));
        entry.stale_reads = read_lag;
        inner.next_rv = rv;
        debug!(%id, ops = patch.len(), rv, "memory store patched object");
        Ok(RemoteObject::from_json(next))
    }

    async fn delete(&self, id: &LocalId) -> Result<DeleteOutcome, StoreError> {
        let mut inner = self.lock();
        self.begin(&mut inner, StoreOp::Delete)?;
        match inner.objects.remove(id) {
            Some(_) => {
                info!(%id, "memory store deleted object");
                Ok(DeleteOutcome::Deleted)
            }
            None => Ok(DeleteOutcome::NotFound),
        }
    }
}
