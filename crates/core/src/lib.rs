//! Steward core types: flat model, remote objects, field paths, patch documents,
//! local ids, the error taxonomy, and the `ObjectStore` seam.

#![forbid(unsafe_code)]

mod error;
mod id;
mod model;
mod object;
mod patch;
mod path;
mod store;

pub use error::{ConvergenceError, Mismatch, StoreError, ValidationError};
pub use id::LocalId;
pub use model::{FlatModel, FlatValue};
pub use object::RemoteObject;
pub use patch::{DiffSummary, OpKind, PatchDocument, PatchOp};
pub use path::{FieldPath, Segment};
pub use store::{DeleteOutcome, ObjectStore};

pub mod prelude {
    pub use super::{
        DeleteOutcome, FieldPath, FlatModel, FlatValue, LocalId, ObjectStore, OpKind, PatchDocument, PatchOp,
        RemoteObject, StoreError, ValidationError,
    };
}
