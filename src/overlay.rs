//! Detection boxes and the native → rendered coordinate transform.
//!
//! Detection services report boxes in the pixel space of the frame they
//! analysed. The video element is laid out at some other size, so every box is
//! rescaled per axis before it is drawn. The native/rendered pair is supplied on
//! every call; nothing here caches sizes.

use serde::Deserialize;

use crate::error::{LiveDetectError, Result};

/// Pixel dimensions of a frame or display element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// One detection in native pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionBox {
    pub class_label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Wire shape shared by the single-shot and streaming services.
#[derive(Debug, Deserialize)]
pub(crate) struct RawDetection {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    #[serde(rename = "class")]
    class_label: String,
    confidence: f64,
}

impl TryFrom<RawDetection> for DetectionBox {
    type Error = String;

    fn try_from(raw: RawDetection) -> std::result::Result<Self, Self::Error> {
        // Checked after narrowing; values beyond f32 range become infinite.
        let (x1, y1, x2, y2) = (raw.x1 as f32, raw.y1 as f32, raw.x2 as f32, raw.y2 as f32);
        if [x1, y1, x2, y2].iter().any(|c| !c.is_finite()) {
            return Err("non-finite box coordinate".to_string());
        }
        if x1 > x2 || y1 > y2 {
            return Err(format!("inverted box ({}, {}, {}, {})", x1, y1, x2, y2));
        }
        if !(0.0..=1.0).contains(&raw.confidence) {
            return Err(format!("confidence {} outside [0, 1]", raw.confidence));
        }
        if raw.class_label.trim().is_empty() {
            return Err("empty class label".to_string());
        }
        Ok(Self {
            class_label: raw.class_label,
            confidence: raw.confidence as f32,
            x1,
            y1,
            x2,
            y2,
        })
    }
}

/// Validate a batch of raw detections. One bad entry rejects the batch.
pub(crate) fn validate_detections(
    raw: Vec<RawDetection>,
) -> std::result::Result<Vec<DetectionBox>, String> {
    raw.into_iter()
        .enumerate()
        .map(|(idx, det)| {
            DetectionBox::try_from(det).map_err(|e| format!("detection {}: {}", idx, e))
        })
        .collect()
}

/// A detection placed in display coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedBox {
    pub class_label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl RenderedBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Label drawn on the box, e.g. `car (87%)`.
    pub fn caption(&self) -> String {
        format!(
            "{} ({}%)",
            self.class_label,
            (self.confidence * 100.0).round() as u32
        )
    }
}

/// Map one box from native into rendered coordinates.
///
/// Fails with [`LiveDetectError::SizeUnknown`] while either native dimension
/// is zero.
pub fn map_box(det: &DetectionBox, native: FrameSize, rendered: FrameSize) -> Result<RenderedBox> {
    let (sx, sy) = scale_factors(native, rendered)?;
    Ok(scale_box(det, sx, sy))
}

/// Map a full detection set. Callers drop the overlay on `SizeUnknown`.
pub fn map_boxes(
    detections: &[DetectionBox],
    native: FrameSize,
    rendered: FrameSize,
) -> Result<Vec<RenderedBox>> {
    let (sx, sy) = scale_factors(native, rendered)?;
    Ok(detections
        .iter()
        .map(|det| scale_box(det, sx, sy))
        .collect())
}

fn scale_box(det: &DetectionBox, sx: f64, sy: f64) -> RenderedBox {
    RenderedBox {
        class_label: det.class_label.clone(),
        confidence: det.confidence,
        x1: (det.x1 as f64 * sx) as f32,
        y1: (det.y1 as f64 * sy) as f32,
        x2: (det.x2 as f64 * sx) as f32,
        y2: (det.y2 as f64 * sy) as f32,
    }
}

fn scale_factors(native: FrameSize, rendered: FrameSize) -> Result<(f64, f64)> {
    if !native.is_known() {
        return Err(LiveDetectError::SizeUnknown);
    }
    Ok((
        rendered.width as f64 / native.width as f64,
        rendered.height as f64 / native.height as f64,
    ))
}
