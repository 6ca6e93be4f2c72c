//! Remote clip service.
//!
//! This crate provides:
//! - The [`ClipService`] seam and its Opus HTTP implementation
//! - [`ClipWaiter`], which polls for exportable clips under a hard deadline
//! - An injectable [`Clock`] so waiting can be tested without real delays

pub mod client;
pub mod clock;
pub mod error;
pub mod service;
pub mod types;
pub mod waiter;

pub use client::{OpusClient, OpusConfig};
pub use clock::{Clock, ManualClock, TokioClock};
pub use error::{ClipServiceError, ClipServiceResult};
pub use service::ClipService;
pub use waiter::{ClipWaiter, WaiterConfig, MAX_WAIT};
