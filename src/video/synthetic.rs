use anyhow::Result;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicU64, Ordering};

use super::VideoSource;
use crate::overlay::FrameSize;

/// Synthetic source for `stub://` videos.
///
/// Metadata is available immediately. Each snapshot shifts the pattern so
/// consecutive frames differ.
pub struct SyntheticSource {
    stream_url: String,
    native: FrameSize,
    rendered: FrameSize,
    frame_count: AtomicU64,
}

impl SyntheticSource {
    pub fn new(stream_url: &str, native: FrameSize, rendered: FrameSize) -> Self {
        Self {
            stream_url: stream_url.to_string(),
            native,
            rendered,
            frame_count: AtomicU64::new(0),
        }
    }
}

impl VideoSource for SyntheticSource {
    fn stream_url(&self) -> &str {
        &self.stream_url
    }

    fn native_size(&self) -> Option<FrameSize> {
        Some(self.native)
    }

    fn rendered_size(&self) -> FrameSize {
        self.rendered
    }

    fn snapshot(&self) -> Result<RgbImage> {
        let frame = self.frame_count.fetch_add(1, Ordering::Relaxed);
        Ok(RgbImage::from_fn(
            self.native.width,
            self.native.height,
            |x, y| {
                let v = ((x as u64 + y as u64 + frame) % 256) as u8;
                Rgb([v, v.wrapping_mul(3), 255 - v])
            },
        ))
    }
}
