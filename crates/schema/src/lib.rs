//! Steward schema: declarative field lists per kind, the generic mapper
//! between flat models and nested objects, and configuration loading.

#![forbid(unsafe_code)]

pub mod kinds;
pub mod loader;
pub mod mapper;
pub mod metadata;
mod schema;

pub use kinds::{all_kinds, kind_by_name};
pub use loader::{load_config, load_yaml};
pub use mapper::{flatten, expand, validate_model, ResourceKind};
pub use schema::{FieldRole, FieldSpec, FieldType, ResourceSchema, Scope};
