//! Shared ambient services for appraisal desktop binaries.
//!
//! - [`logging`]: process-level `tracing` subscriber setup from `APPRAISAL_LOG`
//! - [`event_log`]: fail-open JSONL structured event sink with rotation
//! - [`home`]: canonical home directory resolution (`APPRAISAL_HOME` aware)

pub mod event_log;
pub mod home;
pub mod logging;
