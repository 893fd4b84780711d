use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::LocalId;

/// A flat model (or a remote read) that cannot be mapped to a valid object.
/// Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("invalid value for `{field}`: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// Failures reported by an object store. Surfaced to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum StoreError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("transport: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Outcome of a single failed convergence check: what the caller expected to
/// observe and what the store actually returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub expected: String,
    pub observed: String,
}

impl Mismatch {
    pub fn new(expected: impl Into<String>, observed: impl Into<String>) -> Self {
        Self { expected: expected.into(), observed: observed.into() }
    }
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected {}, observed {}", self.expected, self.observed)
    }
}

/// The poller gave up: the condition never held within the timeout.
/// Carries the last mismatch for diagnostics; retryable by the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{id} did not converge after {attempts} reads in {elapsed:?}: expected {expected}, observed {observed}")]
pub struct ConvergenceError {
    pub id: LocalId,
    pub expected: String,
    pub observed: String,
    pub attempts: u32,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_field_and_values() {
        let v = ValidationError::new("value", "must fit in int32");
        assert_eq!(v.to_string(), "invalid value for `value`: must fit in int32");

        let c = ConvergenceError {
            id: LocalId::cluster("high"),
            expected: "1000000".into(),
            observed: "999".into(),
            attempts: 3,
            elapsed: Duration::from_secs(60),
        };
        let msg = c.to_string();
        assert!(msg.contains("high"), "{msg}");
        assert!(msg.contains("expected 1000000, observed 999"), "{msg}");
    }

    #[test]
    fn store_error_not_found_predicate() {
        assert!(StoreError::NotFound("x".into()).is_not_found());
        assert!(!StoreError::Conflict("x".into()).is_not_found());
    }
}
