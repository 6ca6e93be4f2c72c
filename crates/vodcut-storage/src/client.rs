//! R2 client implementation.

use std::path::Path;
use std::time::{Duration, SystemTime};

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use tracing::{debug, info, warn};

use crate::error::{PublishError, PublishResult};

/// S3 error codes that mean the credentials, permissions or account quota
/// are the problem rather than the request.
const AUTH_ERROR_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
    "AccountProblem",
    "AllAccessDisabled",
    "QuotaExceeded",
    "ServiceQuotaExceeded",
    "Unauthorized",
    "Forbidden",
];

/// Files at least this large go up as multipart uploads.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Part size for multipart uploads.
pub const DEFAULT_PART_SIZE: u64 = 64 * 1024 * 1024;

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> PublishResult<Self> {
        let required = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| PublishError::config(format!("{} not set", name)))
        };

        Ok(Self {
            endpoint_url: required("R2_ENDPOINT_URL")?,
            access_key_id: required("R2_ACCESS_KEY_ID")?,
            secret_access_key: required("R2_SECRET_ACCESS_KEY")?,
            bucket_name: required("R2_BUCKET_NAME")?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// Cloudflare R2 storage client.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
    multipart_threshold: u64,
    part_size: u64,
}

/// What a HEAD on an object reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    pub last_modified: Option<SystemTime>,
}

impl R2Client {
    /// Create a new R2 client from configuration.
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
        }
    }

    /// Override the multipart threshold and part size.
    pub fn with_multipart(mut self, threshold: u64, part_size: u64) -> Self {
        self.multipart_threshold = threshold;
        self.part_size = part_size.max(1);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload a file to R2, in parts when it is large.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        content_type: &str,
    ) -> PublishResult<()> {
        let path = path.as_ref();
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| PublishError::filesystem(path, e))?
            .len();

        if size >= self.multipart_threshold {
            return self.upload_multipart(path, key, content_type, size).await;
        }

        debug!("Uploading {} to {}", path.display(), key);
        let body = ByteStream::from_path(path).await.map_err(|e| {
            PublishError::filesystem(path, std::io::Error::other(e.to_string()))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(map_sdk_error)?;

        info!("Uploaded {} to {}", path.display(), key);
        Ok(())
    }

    /// Multipart upload. Aborted if any part or the completion fails.
    async fn upload_multipart(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
        size: u64,
    ) -> PublishResult<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(map_sdk_error)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| PublishError::Network("multipart upload id missing".to_string()))?
            .to_string();

        debug!(
            "Multipart upload {} of {} ({} bytes, {} byte parts)",
            upload_id,
            key,
            size,
            self.part_size
        );

        let result = match self.upload_parts(path, key, &upload_id, size).await {
            Ok(parts) => self
                .client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(parts))
                        .build(),
                )
                .send()
                .await
                .map(|_| ())
                .map_err(map_sdk_error),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if let Err(abort) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!(
                    "Failed to abort multipart upload {}: {}",
                    upload_id,
                    DisplayErrorContext(&abort)
                );
            }
            return Err(e);
        }

        info!("Uploaded {} to {} in parts", path.display(), key);
        Ok(())
    }

    async fn upload_parts(
        &self,
        path: &Path,
        key: &str,
        upload_id: &str,
        size: u64,
    ) -> PublishResult<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1i32;

        while offset < size {
            let length = self.part_size.min(size - offset);
            let body = ByteStream::read_from()
                .path(path)
                .offset(offset)
                .length(Length::Exact(length))
                .build()
                .await
                .map_err(|e| {
                    PublishError::filesystem(path, std::io::Error::other(e.to_string()))
                })?;

            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_length(length as i64)
                .body(body)
                .send()
                .await
                .map_err(map_sdk_error)?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            debug!("Uploaded part {} ({} bytes)", part_number, length);

            offset += length;
            part_number += 1;
        }

        Ok(parts)
    }

    /// Size and modification time of an existing object, or `None` if it
    /// does not exist.
    pub async fn head(&self, key: &str) -> PublishResult<Option<ObjectInfo>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => Ok(Some(ObjectInfo {
                size: head.content_length().map_or(0, |len| len.max(0) as u64),
                last_modified: head
                    .last_modified()
                    .and_then(|t| SystemTime::try_from(*t).ok()),
            })),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(map_sdk_error(e)),
        }
    }

    /// Presigned GET URL whose validity window opens at `start`.
    ///
    /// The signature depends only on the key, `start` and `expires_in`, so
    /// the same inputs always produce the same URL.
    pub async fn presign_get(
        &self,
        key: &str,
        start: SystemTime,
        expires_in: Duration,
    ) -> PublishResult<String> {
        let presign_config = PresigningConfig::builder()
            .start_time(start)
            .expires_in(expires_in)
            .build()
            .map_err(|e| PublishError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| PublishError::Presign(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    /// Check connectivity to R2.
    pub async fn check_connectivity(&self) -> PublishResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }
}

/// Map an SDK failure onto the publish error taxonomy.
fn map_sdk_error<E, R>(err: SdkError<E, R>) -> PublishError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err
        .as_service_error()
        .and_then(|e| e.code())
        .map(str::to_string);
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(_) => classify_service_error(code.as_deref(), message),
        SdkError::ConstructionFailure(_) => PublishError::Config(message),
        _ => PublishError::Network(message),
    }
}

pub(crate) fn classify_service_error(code: Option<&str>, message: String) -> PublishError {
    match code {
        Some(code) if AUTH_ERROR_CODES.contains(&code) => PublishError::StorageAuth(message),
        Some("NoSuchBucket") => PublishError::Config(message),
        _ => PublishError::Network(message),
    }
}
