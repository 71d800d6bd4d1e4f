//! Configuration resolution for appraisal-worker.
//!
//! The entry point is [`resolve_config`]; see [`resolve`] for the priority
//! chain and [`types`] for the config type.

mod resolve;
mod types;

pub use resolve::{default_config_path, resolve_config};
pub use types::WorkerConfig;
