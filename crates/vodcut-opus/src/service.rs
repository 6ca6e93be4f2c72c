//! The clip service seam.

use async_trait::async_trait;
use vodcut_models::ClipRef;

use crate::error::ClipServiceResult;

/// A service that turns a published VOD into short clips.
#[async_trait]
pub trait ClipService: Send + Sync {
    /// Submit the VOD URL and return the project id.
    async fn create_project(&self, video_url: &str) -> ClipServiceResult<String>;

    /// Clips currently exportable for the project. Empty means not ready.
    async fn fetch_clips(&self, project_id: &str) -> ClipServiceResult<Vec<ClipRef>>;
}
