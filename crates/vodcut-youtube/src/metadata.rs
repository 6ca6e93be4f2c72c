//! Video metadata for uploads.

use serde_json::{json, Value};
use vodcut_models::ClipRef;

const MAX_TITLE_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 5000;

/// Channel-wide defaults applied to every upload.
#[derive(Debug, Clone)]
pub struct MetadataDefaults {
    pub title_prefix: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: String,
}

impl Default for MetadataDefaults {
    fn default() -> Self {
        Self {
            title_prefix: "Short clip".to_string(),
            tags: vec!["shorts".into(), "twitch".into(), "clips".into()],
            category_id: "22".to_string(),
            privacy_status: "public".to_string(),
        }
    }
}

/// Snippet and status for one video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: String,
}

impl UploadMetadata {
    /// Metadata for the clip at 1-based `position`.
    pub fn for_clip(clip: &ClipRef, position: usize, defaults: &MetadataDefaults) -> Self {
        let title = clip
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} #{}", defaults.title_prefix, position));

        let description = [clip.description.as_deref(), clip.hashtags.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        Self {
            title: truncate_chars(&title, MAX_TITLE_CHARS),
            description: truncate_chars(&description, MAX_DESCRIPTION_CHARS),
            tags: defaults.tags.clone(),
            category_id: defaults.category_id.clone(),
            privacy_status: defaults.privacy_status.clone(),
        }
    }

    /// The `videos` resource body.
    pub fn to_resource(&self) -> Value {
        json!({
            "snippet": {
                "title": self.title,
                "description": self.description,
                "tags": self.tags,
                "categoryId": self.category_id,
            },
            "status": {
                "privacyStatus": self.privacy_status,
                "selfDeclaredMadeForKids": false,
            }
        })
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(title: Option<&str>, description: Option<&str>, hashtags: Option<&str>) -> ClipRef {
        ClipRef {
            id: "clipA".into(),
            download_url: "https://cdn/a.mp4".into(),
            title: title.map(str::to_string),
            description: description.map(str::to_string),
            hashtags: hashtags.map(str::to_string),
        }
    }

    #[test]
    fn test_title_fallback() {
        let meta = UploadMetadata::for_clip(&clip(None, None, None), 3, &MetadataDefaults::default());
        assert_eq!(meta.title, "Short clip #3");
        assert_eq!(meta.description, "");

        let meta =
            UploadMetadata::for_clip(&clip(Some("  "), None, None), 1, &MetadataDefaults::default());
        assert_eq!(meta.title, "Short clip #1");
    }

    #[test]
    fn test_description_joins_hashtags() {
        let meta = UploadMetadata::for_clip(
            &clip(Some("Big play"), Some("What a round"), Some("#cs2 #clutch")),
            1,
            &MetadataDefaults::default(),
        );
        assert_eq!(meta.title, "Big play");
        assert_eq!(meta.description, "What a round\n\n#cs2 #clutch");
    }

    #[test]
    fn test_limits() {
        let long_title = "я".repeat(150);
        let long_desc = "d".repeat(6000);
        let meta = UploadMetadata::for_clip(
            &clip(Some(&long_title), Some(&long_desc), None),
            1,
            &MetadataDefaults::default(),
        );
        assert_eq!(meta.title.chars().count(), 100);
        assert_eq!(meta.description.chars().count(), 5000);
    }

    #[test]
    fn test_resource_shape() {
        let meta = UploadMetadata::for_clip(&clip(Some("t"), None, None), 1, &MetadataDefaults::default());
        let resource = meta.to_resource();
        assert_eq!(resource["snippet"]["categoryId"], "22");
        assert_eq!(resource["snippet"]["tags"][0], "shorts");
        assert_eq!(resource["status"]["privacyStatus"], "public");
        assert_eq!(resource["status"]["selfDeclaredMadeForKids"], false);
    }
}
