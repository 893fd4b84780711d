//! Steward ops: the convergence poller and the per-instance resource
//! controller that sequences mapping, patching and polling.

#![forbid(unsafe_code)]

mod config;
pub mod controller;
mod error;
pub mod wait;

pub use config::ControllerConfig;
pub use controller::{ReadOutcome, ResourceController, ResourceData, UpdateOutcome};
pub use error::Error;
pub use wait::{await_condition, Clock, Condition, ManualClock, PollOptions, TokioClock};
