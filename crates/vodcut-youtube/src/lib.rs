//! YouTube upload.
//!
//! This crate provides:
//! - Google "authorized user" credential storage
//! - Access token refresh with single-flight semantics
//! - Resumable video upload with auth/quota/transient classification
//! - The OAuth device authorization grant used for one-time bootstrap

pub mod credentials;
pub mod device_auth;
pub mod error;
pub mod metadata;
pub mod retry;
pub mod token;
pub mod uploader;

pub use credentials::{
    AuthorizedUserCredential, ClientSecrets, CredentialStore, FileCredentialStore,
    MemoryCredentialStore,
};
pub use device_auth::{DeviceCodeResponse, DeviceFlow, DEVICE_FLOW_SCOPE};
pub use error::{UploadError, UploadResult};
pub use metadata::{MetadataDefaults, UploadMetadata};
pub use retry::RetryPolicy;
pub use token::TokenManager;
pub use uploader::{VideoUploader, YouTubeConfig, YouTubeUploader};

/// Google's OAuth token endpoint.
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
