//! Making a recorded VOD fetchable by the clip service.
//!
//! This crate provides:
//! - The [`PublishStrategy`] seam used by the pipeline
//! - A local publisher that places the file under an HTTP-served directory
//! - A cloud publisher that uploads to Cloudflare R2 (S3 API)

pub mod client;
pub mod error;
pub mod local;
pub mod publish;
pub mod r2;

pub use client::{ObjectInfo, R2Client, R2Config, DEFAULT_MULTIPART_THRESHOLD, DEFAULT_PART_SIZE};
pub use error::{PublishError, PublishResult};
pub use local::LocalHttpPublisher;
pub use publish::{build_publisher, content_type_for, object_segments, PublishConfig, PublishMode, PublishStrategy};
pub use r2::{R2PublishConfig, R2Publisher};
