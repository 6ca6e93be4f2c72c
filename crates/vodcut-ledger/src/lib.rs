//! Idempotency ledger.
//!
//! This crate provides:
//! - A durable `vod_id -> entry` store (JSON file, atomic rename writes)
//! - Per-key claims so the same VOD is never processed twice concurrently
//! - Job checkpoints for resuming an interrupted pipeline
//! - An exclusive process lock on the ledger file

pub mod claim;
pub mod error;
pub mod lock;
pub mod store;

pub use claim::{Claim, ClaimGuard};
pub use error::{LedgerError, LedgerResult};
pub use lock::ProcessLock;
pub use store::{FileLedger, Ledger, LEDGER_FORMAT_VERSION};
