//! Shared data models for the vodcut pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - VOD identity and the per-VOD job state machine
//! - Clip references returned by the clip service
//! - Ledger entries persisted for idempotency
//! - Trigger events delivered by the recorder webhook

pub mod job;
pub mod ledger;
pub mod trigger;
pub mod utils;
pub mod vod;

// Re-export common types
pub use job::{ClipRef, StatusTransitionError, UploadRecord, VodJob, VodStatus};
pub use ledger::LedgerEntry;
pub use trigger::{DvrEvent, DvrVodInfo, END_DOWNLOAD_ACTION};
pub use utils::{safe_name, safe_relative_path};
pub use vod::{absolute_path, VodId};
