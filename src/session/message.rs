//! Streaming protocol messages.

use serde::Deserialize;

use crate::error::{LiveDetectError, Result};
use crate::overlay::{validate_detections, DetectionBox, RawDetection};

#[derive(Debug, Deserialize)]
struct RawStreamMessage {
    detections: Option<Vec<RawDetection>>,
}

/// First and only client message: which stream to analyse.
pub fn initiation_message(stream_url: &str) -> String {
    serde_json::json!({ "url": stream_url }).to_string()
}

/// Parse one `{"detections": [...]}` message.
///
/// Anything else, including a message without `detections`, is malformed.
pub fn parse_stream_message(text: &str) -> Result<Vec<DetectionBox>> {
    let raw: RawStreamMessage = serde_json::from_str(text)
        .map_err(|e| LiveDetectError::MalformedStreamMessage(format!("parse error: {}", e)))?;
    let detections = raw.detections.ok_or_else(|| {
        LiveDetectError::MalformedStreamMessage("missing 'detections' field".to_string())
    })?;
    validate_detections(detections).map_err(LiveDetectError::MalformedStreamMessage)
}
