use steward_core::{ConvergenceError, LocalId, StoreError, ValidationError};

/// Everything a controller operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Convergence(#[from] ConvergenceError),
    #[error("resource has no local id; create or import it first")]
    MissingId,
    #[error("{0} vanished right after it was written")]
    Vanished(LocalId),
}

impl Error {
    /// Convergence failures may succeed on a later attempt; nothing else does.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Convergence(_))
    }
}
