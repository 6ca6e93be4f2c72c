//! Opus API request and response shapes.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use vodcut_models::ClipRef;

use crate::error::{ClipServiceError, ClipServiceResult};

/// Body of `POST /api/clip-projects`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub video_url: String,
    pub utm: Utm,
    pub import_pref: ImportPref,
    pub curation_pref: CurationPref,
    pub render_pref: RenderPref,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_template_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Utm {
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPref {
    pub source_lang: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurationPref {
    pub model: String,
    pub clip_durations: Vec<[u32; 2]>,
    pub topic_keywords: Vec<String>,
    pub skip_slicing: bool,
    pub skip_curate: bool,
    pub genre: String,
    pub custom_prompt: String,
    pub enable_auto_hook: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPref {
    pub layout_aspect_ratio: String,
}

/// Pull the project id out of a create response.
///
/// Accepts `projectId`, `id`, `data.projectId` or `data.id`, in that order.
pub fn extract_project_id(body: &Value) -> ClipServiceResult<String> {
    let data = body.get("data").filter(|d| d.is_object());
    [
        body.get("projectId"),
        body.get("id"),
        data.and_then(|d| d.get("projectId")),
        data.and_then(|d| d.get("id")),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_str)
    .find(|s| !s.is_empty())
    .map(str::to_string)
    .ok_or_else(|| {
        ClipServiceError::InvalidResponse(format!("no project id in response: {}", body))
    })
}

/// Parse `GET /api/exportable-clips`.
///
/// Clips without a download URI are dropped, so the returned list is exactly
/// what the rest of the pipeline will download and upload.
pub fn parse_exportable_clips(body: &Value) -> ClipServiceResult<Vec<ClipRef>> {
    let items = match body.get("data") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(ClipServiceError::InvalidResponse(format!(
                "exportable clips 'data' is not a list: {}",
                other
            )))
        }
    };

    let mut clips = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let id = match item.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => format!("clip_{}", idx + 1),
        };

        let Some(download_url) = text_field(item, "uriForPreview") else {
            warn!(clip_id = %id, "Clip has no uriForPreview, skipping");
            continue;
        };

        clips.push(ClipRef {
            id,
            download_url,
            title: text_field(item, "title"),
            description: text_field(item, "description"),
            hashtags: text_field(item, "hashtags"),
        });
    }
    Ok(clips)
}

fn text_field(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_project_id_candidates() {
        assert_eq!(extract_project_id(&json!({"projectId": "p1"})).unwrap(), "p1");
        assert_eq!(extract_project_id(&json!({"id": "p2"})).unwrap(), "p2");
        assert_eq!(
            extract_project_id(&json!({"data": {"projectId": "p3", "id": "x"}})).unwrap(),
            "p3"
        );
        assert_eq!(extract_project_id(&json!({"id": 7, "data": {"id": "p4"}})).unwrap(), "p4");
        assert!(matches!(
            extract_project_id(&json!({"data": "p5"})),
            Err(ClipServiceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_clips_drops_missing_uri() {
        let body = json!({
            "data": [
                {"id": "clipA", "uriForPreview": "https://cdn/a.mp4", "title": " Best bit ", "hashtags": "#fun"},
                {"id": "clipB"},
                {"id": 42, "uriForPreview": "https://cdn/c.mp4", "description": ""}
            ]
        });
        let clips = parse_exportable_clips(&body).unwrap();
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].id, "clipA");
        assert_eq!(clips[0].title.as_deref(), Some("Best bit"));
        assert_eq!(clips[0].hashtags.as_deref(), Some("#fun"));
        assert_eq!(clips[1].id, "42");
        assert!(clips[1].description.is_none());
    }

    #[test]
    fn test_parse_clips_not_ready() {
        assert!(parse_exportable_clips(&json!({})).unwrap().is_empty());
        assert!(parse_exportable_clips(&json!({"data": []})).unwrap().is_empty());
        assert!(parse_exportable_clips(&json!({"data": null})).unwrap().is_empty());
        assert!(parse_exportable_clips(&json!({"data": {"x": 1}})).is_err());
    }

    #[test]
    fn test_request_shape() {
        let request = CreateProjectRequest {
            video_url: "https://host/v.ts".into(),
            utm: Utm { source: "vodcut".into() },
            import_pref: ImportPref { source_lang: "ru".into() },
            curation_pref: CurationPref {
                model: "Auto".into(),
                clip_durations: vec![[15, 30]],
                topic_keywords: vec![],
                skip_slicing: false,
                skip_curate: false,
                genre: "Auto".into(),
                custom_prompt: String::new(),
                enable_auto_hook: true,
            },
            render_pref: RenderPref { layout_aspect_ratio: "portrait".into() },
            brand_template_id: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["videoUrl"], "https://host/v.ts");
        assert_eq!(value["importPref"]["sourceLang"], "ru");
        assert_eq!(value["curationPref"]["clipDurations"], json!([[15, 30]]));
        assert_eq!(value["curationPref"]["enableAutoHook"], true);
        assert_eq!(value["renderPref"]["layoutAspectRatio"], "portrait");
        assert!(value.get("brandTemplateId").is_none());
    }
}
