//! Create/read/update/delete/exists/import for one resource instance.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use steward_apply::{build_patch_against, needs_live_view};
use steward_core::{
    DeleteOutcome, DiffSummary, FlatModel, LocalId, Mismatch, ObjectStore, RemoteObject, StoreError,
};
use steward_schema::{metadata, ResourceKind};
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::wait::{await_condition, Clock, Condition, TokioClock};
use crate::Error;

/// Per-instance state owned by the caller between operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceData {
    pub id: Option<LocalId>,
    pub model: FlatModel,
}

impl ResourceData {
    pub fn new(model: FlatModel) -> Self {
        Self { id: None, model }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Refreshed,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing differed; no store call was made.
    Unchanged,
    Patched(DiffSummary),
}

/// The observed object echoes every authoritative field of what we sent.
struct EchoesDraft<'a> {
    kind: &'a dyn ResourceKind,
    draft: &'a RemoteObject,
}

impl Condition for EchoesDraft<'_> {
    fn check(&self, obj: Option<&RemoteObject>) -> Result<(), Mismatch> {
        self.kind.converged(self.draft, obj)
    }
}

pub struct ResourceController<S, C = TokioClock> {
    kind: Arc<dyn ResourceKind>,
    store: S,
    clock: C,
    config: ControllerConfig,
}

impl<S: ObjectStore> ResourceController<S, TokioClock> {
    pub fn new(kind: Arc<dyn ResourceKind>, store: S, config: ControllerConfig) -> Self {
        Self { kind, store, clock: TokioClock, config }
    }
}

impl<S: ObjectStore, C: Clock> ResourceController<S, C> {
    pub fn with_clock<C2: Clock>(self, clock: C2) -> ResourceController<S, C2> {
        ResourceController { kind: self.kind, store: self.store, clock, config: self.config }
    }

    pub fn kind(&self) -> &dyn ResourceKind {
        self.kind.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn observe(&self, op: &'static str, t0: Instant) {
        counter!("reconcile_ops_total", 1u64, "kind" => self.kind.name(), "op" => op);
        histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => op);
    }

    /// Expand, create, wait for the store to echo the draft, then read back.
    /// The id is recorded as soon as the store accepts the object, so a
    /// convergence failure still leaves the instance addressable.
    pub async fn create(&self, data: &mut ResourceData) -> Result<(), Error> {
        let t0 = Instant::now();
        counter!("reconcile_create_total", 1u64);
        let draft = self.kind.expand(&data.model)?;
        let created = self.store.create(&draft).await?;
        let id = LocalId::from_object(&created)?;
        data.id = Some(id.clone());
        info!(kind = self.kind.name(), %id, rv = ?created.resource_version(), "created");

        let cond = EchoesDraft { kind: self.kind.as_ref(), draft: &draft };
        await_condition(&self.store, &id, cond, &self.config.poll, &self.clock).await?;
        let outcome = self.read(data).await;
        self.observe("create", t0);
        match outcome? {
            ReadOutcome::Refreshed => Ok(()),
            ReadOutcome::NotFound => Err(Error::Vanished(id)),
        }
    }

    /// Replace the model with the store's view. A missing object is reported,
    /// not raised; the caller decides whether to forget the instance.
    pub async fn read(&self, data: &mut ResourceData) -> Result<ReadOutcome, Error> {
        let id = data.id.clone().ok_or(Error::MissingId)?;
        let Some(obj) = self.store.get(&id).await? else {
            warn!(kind = self.kind.name(), %id, "not found on read");
            return Ok(ReadOutcome::NotFound);
        };
        data.model = self.kind.flatten(&obj, &data.model)?;
        debug!(kind = self.kind.name(), %id, rv = ?obj.resource_version(), "refreshed");
        Ok(ReadOutcome::Refreshed)
    }

    /// Send only the fields that differ between the current model and
    /// `desired`. An empty diff makes no store call. A label or annotation
    /// map that was empty locally is checked against the live object first.
    pub async fn update(&self, data: &mut ResourceData, desired: FlatModel) -> Result<UpdateOutcome, Error> {
        let t0 = Instant::now();
        let id = data.id.clone().ok_or(Error::MissingId)?;
        self.kind.check(&desired)?;
        let schema = self.kind.schema();
        let live = if needs_live_view(schema, &data.model, &desired) {
            self.store.get(&id).await?
        } else {
            None
        };
        let mut doc = build_patch_against(schema, &data.model, &desired, live.as_ref())?;
        if doc.is_empty() {
            debug!(kind = self.kind.name(), %id, "no changes");
            return Ok(UpdateOutcome::Unchanged);
        }
        let summary = doc.summary();
        if self.config.optimistic_lock {
            if let Some(rv) = data.model.get_str(metadata::RESOURCE_VERSION)? {
                doc = doc.guarded(rv);
            }
        }
        counter!("reconcile_update_total", 1u64);
        let patched = self.store.patch(&id, &doc).await?;
        let new_id = LocalId::from_object(&patched)?;
        data.id = Some(new_id.clone());
        info!(
            kind = self.kind.name(),
            id = %new_id,
            adds = summary.adds,
            updates = summary.updates,
            removes = summary.removes,
            "patched"
        );

        let draft = self.kind.expand(&desired)?;
        let cond = EchoesDraft { kind: self.kind.as_ref(), draft: &draft };
        await_condition(&self.store, &new_id, cond, &self.config.poll, &self.clock).await?;
        data.model = desired;
        let outcome = self.read(data).await;
        self.observe("update", t0);
        match outcome? {
            ReadOutcome::Refreshed => Ok(UpdateOutcome::Patched(summary)),
            ReadOutcome::NotFound => Err(Error::Vanished(new_id)),
        }
    }

    /// Delete by id. An object that is already gone counts as deleted.
    pub async fn delete(&self, data: &mut ResourceData) -> Result<DeleteOutcome, Error> {
        let t0 = Instant::now();
        let id = data.id.clone().ok_or(Error::MissingId)?;
        let outcome = self.store.delete(&id).await?;
        match outcome {
            DeleteOutcome::Deleted => info!(kind = self.kind.name(), %id, "deleted"),
            DeleteOutcome::NotFound => debug!(kind = self.kind.name(), %id, "already absent"),
        }
        data.id = None;
        self.observe("delete", t0);
        Ok(outcome)
    }

    /// Side-effect free. An instance without an id does not exist.
    pub async fn exists(&self, data: &ResourceData) -> Result<bool, Error> {
        let Some(id) = &data.id else { return Ok(false) };
        Ok(self.store.get(id).await?.is_some())
    }

    /// Adopt an existing object by id.
    pub async fn import(&self, id: LocalId) -> Result<ResourceData, Error> {
        let mut data = ResourceData { id: Some(id.clone()), model: FlatModel::new() };
        match self.read(&mut data).await? {
            ReadOutcome::Refreshed => {
                info!(kind = self.kind.name(), %id, "imported");
                Ok(data)
            }
            ReadOutcome::NotFound => Err(StoreError::NotFound(id.to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::ManualClock;
    use steward_core::StoreError;
    use steward_schema::kinds::priority_class::PriorityClass;
    use steward_store::{MemoryStore, StoreOp};

    fn controller(store: MemoryStore) -> ResourceController<MemoryStore, ManualClock> {
        ResourceController::new(Arc::new(PriorityClass::new()), store, ControllerConfig::default())
            .with_clock(ManualClock::new())
    }

    fn high() -> FlatModel {
        FlatModel::new().with(metadata::NAME, "high").with("value", 1000i64)
    }

    #[tokio::test]
    async fn operations_without_id_fail_or_report_absent() {
        let c = controller(MemoryStore::new());
        let mut data = ResourceData::new(high());
        assert!(matches!(c.read(&mut data).await, Err(Error::MissingId)));
        assert!(matches!(c.delete(&mut data).await, Err(Error::MissingId)));
        assert!(!c.exists(&data).await.unwrap());
        assert_eq!(c.store().total_calls(), 0);
    }

    #[tokio::test]
    async fn invalid_model_never_reaches_the_store() {
        let c = controller(MemoryStore::new());
        let mut data = ResourceData::new(high().with("global_default", "yes"));
        let err = c.create(&mut data).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ref v) if v.field == "global_default"), "{err}");
        assert_eq!(c.store().total_calls(), 0);
        assert!(data.id.is_none());
    }

    #[tokio::test]
    async fn create_failure_leaves_id_unset() {
        let store = MemoryStore::new();
        store.fail_next(StoreOp::Create, StoreError::Forbidden("no".into()));
        let c = controller(store);
        let mut data = ResourceData::new(high());
        assert!(matches!(c.create(&mut data).await, Err(Error::Store(StoreError::Forbidden(_)))));
        assert!(data.id.is_none());
    }

    #[tokio::test]
    async fn guarded_update_conflicts_after_out_of_band_write() {
        let config = ControllerConfig { optimistic_lock: true, ..ControllerConfig::default() };
        let c = ResourceController::new(Arc::new(PriorityClass::new()), MemoryStore::new(), config)
            .with_clock(ManualClock::new());
        let mut data = ResourceData::new(high());
        c.create(&mut data).await.unwrap();
        let id = data.id.clone().unwrap();
        c.store().modify_out_of_band(&id, |o| o["description"] = serde_json::json!("theirs"));

        let desired = data.model.clone().with("value", 2000i64);
        let err = c.update(&mut data, desired).await.unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Conflict(_))), "{err}");
        assert!(!err.is_retryable());
    }
}
