//! Recorder webhook events.
//!
//! The recorder posts loosely-shaped JSON; only a few fields matter and any
//! of them may be missing or of the wrong type, so parsing never fails.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Action sent when a recording has finished downloading.
pub const END_DOWNLOAD_ACTION: &str = "end_download";

/// A recorder event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvrEvent {
    pub action: Option<String>,
    pub vod: DvrVodInfo,
}

/// Location hints for the finished recording.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvrVodInfo {
    pub path_downloaded_vod: Option<String>,
    pub path_playlist: Option<String>,
    pub basename: Option<String>,
}

impl DvrEvent {
    /// Extract the event from an arbitrary JSON payload.
    pub fn from_value(payload: &Value) -> Self {
        let action = payload
            .get("action")
            .and_then(Value::as_str)
            .map(str::to_string);

        let vod = payload
            .get("data")
            .and_then(|d| d.get("vod"))
            .filter(|v| v.is_object());

        let text = |key: &str| {
            vod.and_then(|v| v.get(key))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            action,
            vod: DvrVodInfo {
                path_downloaded_vod: text("path_downloaded_vod"),
                path_playlist: text("path_playlist"),
                basename: text("basename"),
            },
        }
    }

    /// Whether this event announces a finished recording.
    pub fn is_end_download(&self) -> bool {
        self.action.as_deref() == Some(END_DOWNLOAD_ACTION)
    }

    /// Direct path hints in priority order.
    pub fn direct_paths(&self) -> Vec<&str> {
        [&self.vod.path_downloaded_vod, &self.vod.path_playlist]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .collect()
    }
}
