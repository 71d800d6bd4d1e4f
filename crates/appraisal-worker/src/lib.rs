//! appraisal-worker library crate.
//!
//! Supervises the external report-automation worker: spawns it, exchanges
//! line-delimited JSON commands over its stdio, correlates responses by
//! command id, routes progress events to subscribers and contains crashes.
//! [`session::WorkerSession`] is the entry point.

pub mod classify;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod framing;
pub mod locator;
pub mod pending;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod supervisor;

#[doc(inline)]
pub use error::WorkerError;
#[doc(inline)]
pub use session::{ReadinessState, WorkerSession};
