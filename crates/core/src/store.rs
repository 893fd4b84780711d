use serde::{Deserialize, Serialize};

use crate::{LocalId, PatchDocument, RemoteObject, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing to delete; callers treat this as success.
    NotFound,
}

/// The remote object store the engine reconciles against.
///
/// Implementations own the wire protocol; the engine only sees nested
/// objects, local ids and patch documents. Reads may be stale after a write.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create(&self, draft: &RemoteObject) -> Result<RemoteObject, StoreError>;

    /// `Ok(None)` is the not-found signal.
    async fn get(&self, id: &LocalId) -> Result<Option<RemoteObject>, StoreError>;

    async fn patch(&self, id: &LocalId, patch: &PatchDocument) -> Result<RemoteObject, StoreError>;

    async fn delete(&self, id: &LocalId) -> Result<DeleteOutcome, StoreError>;
}

#[async_trait::async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<S> {
    async fn create(&self, draft: &RemoteObject) -> Result<RemoteObject, StoreError> {
        (**self).create(draft).await
    }

    async fn get(&self, id: &LocalId) -> Result<Option<RemoteObject>, StoreError> {
        (**self).get(id).await
    }

    async fn patch(&self, id: &LocalId, patch: &PatchDocument) -> Result<RemoteObject, StoreError> {
        (**self).patch(id, patch).await
    }

    async fn delete(&self, id: &LocalId) -> Result<DeleteOutcome, StoreError> {
        (**self).delete(id).await
    }
}
