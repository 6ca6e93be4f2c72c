//! Opus clip service HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::{debug, info};
use vodcut_models::ClipRef;

use crate::error::{ClipServiceError, ClipServiceResult};
use crate::service::ClipService;
use crate::types::{
    extract_project_id, parse_exportable_clips, CreateProjectRequest, CurationPref, ImportPref,
    RenderPref, Utm,
};

const UTM_SOURCE: &str = "vodcut";

/// Configuration for the Opus client.
#[derive(Debug, Clone)]
pub struct OpusConfig {
    pub api_base: String,
    pub bearer_token: String,
    pub org_id: Option<String>,
    pub user_id: Option<String>,
    /// UI language header
    pub lang: String,
    /// Spoken language of the VOD
    pub source_lang: String,
    pub clip_min_sec: u32,
    pub clip_max_sec: u32,
    pub layout_aspect_ratio: String,
    pub custom_prompt: String,
    pub brand_template_id: Option<String>,
    /// Timeout for project creation
    pub create_timeout: Duration,
    /// Timeout for a single clip poll
    pub poll_timeout: Duration,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.opus.pro".to_string(),
            bearer_token: String::new(),
            org_id: None,
            user_id: None,
            lang: "en".to_string(),
            source_lang: "ru".to_string(),
            clip_min_sec: 15,
            clip_max_sec: 30,
            layout_aspect_ratio: "portrait".to_string(),
            custom_prompt: String::new(),
            brand_template_id: None,
            create_timeout: Duration::from_secs(90),
            poll_timeout: Duration::from_secs(45),
        }
    }
}

impl OpusConfig {
    /// Create config from environment variables.
    pub fn from_env() -> ClipServiceResult<Self> {
        let defaults = Self::default();
        let optional = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let number = |name: &str, default: u32| -> ClipServiceResult<u32> {
            match optional(name) {
                Some(v) => v
                    .parse()
                    .map_err(|_| ClipServiceError::Config(format!("{} is not a number: {}", name, v))),
                None => Ok(default),
            }
        };

        let bearer_token = optional("OPUS_BEARER_TOKEN")
            .ok_or_else(|| ClipServiceError::Config("OPUS_BEARER_TOKEN is required".to_string()))?;

        let config = Self {
            api_base: optional("OPUS_API_BASE").unwrap_or(defaults.api_base),
            bearer_token,
            org_id: optional("OPUS_ORG_ID"),
            user_id: optional("OPUS_USER_ID"),
            lang: optional("OPUS_LANG").unwrap_or(defaults.lang),
            source_lang: optional("OPUS_SOURCE_LANG").unwrap_or(defaults.source_lang),
            clip_min_sec: number("OPUS_CLIP_MIN_SEC", defaults.clip_min_sec)?,
            clip_max_sec: number("OPUS_CLIP_MAX_SEC", defaults.clip_max_sec)?,
            layout_aspect_ratio: optional("OPUS_LAYOUT_ASPECT_RATIO")
                .unwrap_or(defaults.layout_aspect_ratio),
            custom_prompt: std::env::var("OPUS_CUSTOM_PROMPT").unwrap_or_default(),
            brand_template_id: optional("OPUS_BRAND_TEMPLATE_ID"),
            create_timeout: defaults.create_timeout,
            poll_timeout: defaults.poll_timeout,
        };

        if config.clip_min_sec > config.clip_max_sec {
            return Err(ClipServiceError::Config(format!(
                "OPUS_CLIP_MIN_SEC ({}) exceeds OPUS_CLIP_MAX_SEC ({})",
                config.clip_min_sec, config.clip_max_sec
            )));
        }
        Ok(config)
    }

    fn project_request(&self, video_url: &str) -> CreateProjectRequest {
        CreateProjectRequest {
            video_url: video_url.to_string(),
            utm: Utm {
                source: UTM_SOURCE.to_string(),
            },
            import_pref: ImportPref {
                source_lang: self.source_lang.clone(),
            },
            curation_pref: CurationPref {
                model: "Auto".to_string(),
                clip_durations: vec![[self.clip_min_sec, self.clip_max_sec]],
                topic_keywords: Vec::new(),
                skip_slicing: false,
                skip_curate: false,
                genre: "Auto".to_string(),
                custom_prompt: self.custom_prompt.clone(),
                enable_auto_hook: true,
            },
            render_pref: RenderPref {
                layout_aspect_ratio: self.layout_aspect_ratio.clone(),
            },
            brand_template_id: self.brand_template_id.clone(),
        }
    }
}

/// Client for the Opus clip API.
pub struct OpusClient {
    http: Client,
    config: OpusConfig,
}

impl OpusClient {
    /// Create a new client.
    pub fn new(config: OpusConfig) -> ClipServiceResult<Self> {
        let http = Client::builder()
            .default_headers(default_headers(&config)?)
            .build()
            .map_err(ClipServiceError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ClipServiceResult<Self> {
        Self::new(OpusConfig::from_env()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }
}

fn default_headers(config: &OpusConfig) -> ClipServiceResult<HeaderMap> {
    let value = |v: &str| {
        HeaderValue::from_str(v)
            .map_err(|_| ClipServiceError::Config(format!("invalid header value: {:?}", v)))
    };

    let mut headers = HeaderMap::new();
    let mut auth = value(&format!("Bearer {}", config.bearer_token))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(HeaderName::from_static("x-opus-lang"), value(&config.lang)?);
    if let Some(org) = &config.org_id {
        headers.insert(HeaderName::from_static("x-opus-org-id"), value(org)?);
    }
    if let Some(user) = &config.user_id {
        headers.insert(HeaderName::from_static("x-opus-user-id"), value(user)?);
    }
    Ok(headers)
}

/// Decode a JSON body, mapping non-2xx to `RemoteService`.
async fn json_body(response: Response) -> ClipServiceResult<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClipServiceError::from_http_status(status.as_u16(), body));
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ClipServiceError::InvalidResponse(format!("body is not JSON: {}", e)))
}

#[async_trait]
impl ClipService for OpusClient {
    async fn create_project(&self, video_url: &str) -> ClipServiceResult<String> {
        let url = self.url("/api/clip-projects");
        info!("Creating clip project for {}", video_url);

        let response = self
            .http
            .post(&url)
            .timeout(self.config.create_timeout)
            .json(&self.config.project_request(video_url))
            .send()
            .await?;

        let body = json_body(response).await?;
        let project_id = extract_project_id(&body)?;
        info!(project_id = %project_id, "Clip project created");
        Ok(project_id)
    }

    async fn fetch_clips(&self, project_id: &str) -> ClipServiceResult<Vec<ClipRef>> {
        let url = self.url("/api/exportable-clips");
        debug!(project_id = %project_id, "Polling exportable clips");

        let response = self
            .http
            .get(&url)
            .timeout(self.config.poll_timeout)
            .query(&[("projectId", project_id)])
            .send()
            .await?;

        let body = json_body(response).await?;
        parse_exportable_clips(&body)
    }
}
