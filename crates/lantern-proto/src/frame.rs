//! Live-channel frame envelope.
//!
//! The server pushes JSON frames in two envelope shapes for the same logical
//! event: a flat `{"type": "...", ...fields}` object and a nested
//! `{"type": "...", "data": {...fields}}` object. [`parse_frame`] normalizes
//! both into [`StreamMessage`] so nothing downstream ever branches on shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::GeoPoint;

/// Searcher sub-object carried by `session` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearcherInfo {
    #[serde(default)]
    pub geopoint: Option<GeoPoint>,
}

/// One logical event from a live channel, after envelope normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Session-level update: status and optionally the searcher position.
    #[serde(rename_all = "camelCase")]
    Session {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        searcher: Option<SearcherInfo>,
        #[serde(default)]
        campaign_id: Option<String>,
        #[serde(default)]
        updated_at: Option<i64>,
    },
    /// Lost-person profile update.
    #[serde(rename_all = "camelCase")]
    LostUpdate {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        geopoint: Option<GeoPoint>,
        #[serde(default)]
        updated_at: Option<i64>,
    },
    /// Explicit end signal. May also arrive as `session` with `status=ended`.
    #[serde(rename_all = "camelCase")]
    Ended {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Lost person marked found.
    #[serde(rename_all = "camelCase")]
    Resolved {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        geopoint: Option<GeoPoint>,
        #[serde(default)]
        updated_at: Option<i64>,
    },
    /// Session or profile absent server-side.
    NotFound,
    /// Frame type this client does not understand; carried so callers can
    /// log it, never acted on.
    #[serde(other)]
    Unknown,
}

/// Why a frame could not be turned into a [`StreamMessage`].
#[derive(Debug)]
pub enum FrameError {
    /// The payload was not valid JSON.
    InvalidJson(serde_json::Error),
    /// The payload was JSON but did not match any known frame layout.
    InvalidShape(serde_json::Error),
    /// The payload had no `type` field to dispatch on.
    MissingType,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::InvalidJson(e) => write!(f, "frame is not valid JSON: {e}"),
            FrameError::InvalidShape(e) => write!(f, "frame shape not recognized: {e}"),
            FrameError::MissingType => write!(f, "frame has no type field"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Parse one raw text frame into a normalized [`StreamMessage`].
///
/// Accepts both the flat and the nested (`data`) envelope. The nested form is
/// flattened by lifting the `data` fields next to `type` before dispatch.
pub fn parse_frame(text: &str) -> Result<StreamMessage, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(FrameError::InvalidJson)?;

    let ty = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_owned();

    let lifted = match value.get("data") {
        Some(Value::Object(data)) => {
            let mut flat = data.clone();
            flat.insert("type".to_owned(), Value::String(ty));
            Some(Value::Object(flat))
        }
        _ => None,
    };

    serde_json::from_value(lifted.unwrap_or(value)).map_err(FrameError::InvalidShape)
}
