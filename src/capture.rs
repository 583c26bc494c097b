//! Single-shot capture and detection.
//!
//! Used once per newly attached video source: snapshot the current frame at
//! native resolution, JPEG-encode it, POST it to the detection endpoint, and
//! map the returned boxes onto the rendered element. One pull, no loop, no
//! retry. On failure the caller keeps its previous overlay.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{LiveDetectError, Result};
use crate::overlay::{
    map_boxes, validate_detections, DetectionBox, FrameSize, RawDetection, RenderedBox,
};
use crate::video::VideoSource;

/// Default single-shot detection endpoint.
pub const DEFAULT_DETECT_URL: &str = "http://localhost:5000/predict";

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// A JPEG snapshot plus the native size it was taken at.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub native: FrameSize,
}

impl EncodedFrame {
    /// `data:image/jpeg;base64,...`, the form the detection endpoint accepts.
    pub fn data_url(&self) -> String {
        format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.jpeg)
        )
    }
}

/// Encode a snapshot for upload.
pub fn encode_frame(frame: &RgbImage, quality: u8) -> Result<EncodedFrame> {
    let (width, height) = frame.dimensions();
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
    encoder
        .encode_image(frame)
        .map_err(|e| LiveDetectError::DetectionUnavailable(format!("encode snapshot: {}", e)))?;
    Ok(EncodedFrame {
        jpeg,
        native: FrameSize::new(width, height),
    })
}

/// Request/response object detection on one frame.
pub trait DetectionService: Send + Sync {
    fn detect(&self, frame: &EncodedFrame) -> Result<Vec<DetectionBox>>;
}

/// Detection over HTTP: JSON `{"image": <data url>}` in, JSON box list out.
pub struct HttpDetectionService {
    url: String,
    agent: ureq::Agent,
}

impl HttpDetectionService {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl DetectionService for HttpDetectionService {
    fn detect(&self, frame: &EncodedFrame) -> Result<Vec<DetectionBox>> {
        let body = serde_json::json!({ "image": frame.data_url() }).to_string();
        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|err| match err {
                ureq::Error::Status(code, _) => LiveDetectError::DetectionUnavailable(format!(
                    "detection endpoint returned HTTP {}",
                    code
                )),
                ureq::Error::Transport(transport) => {
                    LiveDetectError::DetectionUnavailable(transport.to_string())
                }
            })?;
        let payload = response.into_string().map_err(|e| {
            LiveDetectError::DetectionUnavailable(format!("read detection response: {}", e))
        })?;
        parse_detection_response(payload.as_bytes())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectionPayload {
    List(Vec<RawDetection>),
    Wrapped { detections: Vec<RawDetection> },
}

/// Parse the endpoint's answer: a bare list, or `{"detections": [...]}`.
pub fn parse_detection_response(payload: &[u8]) -> Result<Vec<DetectionBox>> {
    let parsed: DetectionPayload = serde_json::from_slice(payload).map_err(|e| {
        LiveDetectError::DetectionUnavailable(format!("malformed detection payload: {}", e))
    })?;
    let raw = match parsed {
        DetectionPayload::List(raw) => raw,
        DetectionPayload::Wrapped { detections } => detections,
    };
    validate_detections(raw).map_err(LiveDetectError::DetectionUnavailable)
}

/// Captures a frame from the attached source and runs one detection on it.
#[derive(Clone)]
pub struct FrameCaptureClient {
    service: Arc<dyn DetectionService>,
    jpeg_quality: u8,
}

impl FrameCaptureClient {
    pub fn new(service: Arc<dyn DetectionService>, jpeg_quality: u8) -> Self {
        Self {
            service,
            jpeg_quality,
        }
    }

    /// Snapshot and encode the current frame.
    ///
    /// Fails with `SizeUnknown` before the source's metadata has loaded.
    pub fn snapshot(&self, source: &dyn VideoSource) -> Result<EncodedFrame> {
        let native = source.native_size().ok_or(LiveDetectError::SizeUnknown)?;
        if !native.is_known() {
            return Err(LiveDetectError::SizeUnknown);
        }
        let frame = source
            .snapshot()
            .map_err(|e| LiveDetectError::DetectionUnavailable(format!("snapshot: {:#}", e)))?;
        encode_frame(&frame, self.jpeg_quality)
    }

    /// Detection service handle, for running the call off the event loop.
    pub fn service(&self) -> Arc<dyn DetectionService> {
        Arc::clone(&self.service)
    }

    /// Snapshot, detect and map in one blocking call.
    pub fn capture_and_detect(&self, source: &dyn VideoSource) -> Result<Vec<RenderedBox>> {
        let frame = self.snapshot(source)?;
        let detections = self.service.detect(&frame)?;
        log::debug!(
            "single-shot detection returned {} box(es) for {}",
            detections.len(),
            source.stream_url()
        );
        map_boxes(&detections, frame.native, source.rendered_size())
    }
}
