//! Video element boundary.
//!
//! Decoding the camera's live stream happens outside this crate. The core only
//! needs three things from the element that plays it:
//! - the native resolution, once metadata is available
//! - the size it is currently rendered at
//! - a still snapshot of the current frame at native resolution
//!
//! Dropping a `VideoSource` detaches it from the element.
//!
//! Two local players ship with the crate:
//! - `stub://WIDTHxHEIGHT` synthetic frames (tests, dry runs)
//! - a still image file standing in for the live frame

mod still;
mod synthetic;

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::path::PathBuf;

use crate::overlay::FrameSize;

pub use still::StillImageSource;
pub use synthetic::SyntheticSource;

/// The currently attached video element.
pub trait VideoSource: Send {
    /// Stream URL this source was attached to.
    fn stream_url(&self) -> &str;

    /// Native resolution, `None` until metadata has loaded.
    fn native_size(&self) -> Option<FrameSize>;

    /// On-screen size of the element.
    fn rendered_size(&self) -> FrameSize;

    /// Snapshot of the current frame at native resolution.
    fn snapshot(&self) -> Result<RgbImage>;
}

/// Attaches stream URLs to a video element.
pub trait VideoPlayer {
    fn attach(&mut self, stream_url: &str) -> Result<Box<dyn VideoSource>>;
}

/// Where local frames come from.
#[derive(Clone, Debug, PartialEq)]
pub enum LocalFrames {
    Synthetic(FrameSize),
    Still(PathBuf),
}

impl LocalFrames {
    /// Parse `stub://1920x1080` or a filesystem path.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(anyhow!("video source must not be empty"));
        }
        if let Some(dims) = value.strip_prefix("stub://") {
            let (w, h) = dims
                .split_once('x')
                .ok_or_else(|| anyhow!("stub video must look like stub://WIDTHxHEIGHT"))?;
            let width: u32 = w
                .parse()
                .map_err(|_| anyhow!("invalid stub video width '{}'", w))?;
            let height: u32 = h
                .parse()
                .map_err(|_| anyhow!("invalid stub video height '{}'", h))?;
            if width == 0 || height == 0 {
                return Err(anyhow!("stub video dimensions must be non-zero"));
            }
            return Ok(LocalFrames::Synthetic(FrameSize::new(width, height)));
        }
        if value.contains("://") {
            return Err(anyhow!(
                "local video source only supports stub:// or file paths"
            ));
        }
        Ok(LocalFrames::Still(PathBuf::from(value)))
    }
}

/// Player backed by local frames instead of the decoded live stream.
pub struct LocalPlayer {
    frames: LocalFrames,
    rendered: FrameSize,
}

impl LocalPlayer {
    pub fn new(frames: LocalFrames, rendered: FrameSize) -> Self {
        Self { frames, rendered }
    }
}

impl VideoPlayer for LocalPlayer {
    fn attach(&mut self, stream_url: &str) -> Result<Box<dyn VideoSource>> {
        let source: Box<dyn VideoSource> = match &self.frames {
            LocalFrames::Synthetic(native) => {
                Box::new(SyntheticSource::new(stream_url, *native, self.rendered))
            }
            LocalFrames::Still(path) => {
                Box::new(StillImageSource::open(stream_url, path, self.rendered)?)
            }
        };
        log::info!(
            "video attached to {} (native {:?}, rendered {}x{})",
            stream_url,
            source.native_size(),
            self.rendered.width,
            self.rendered.height
        );
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stub_dimensions() {
        assert_eq!(
            LocalFrames::parse("stub://1920x1080").unwrap(),
            LocalFrames::Synthetic(FrameSize::new(1920, 1080))
        );
        assert!(LocalFrames::parse("stub://0x10").is_err());
        assert!(LocalFrames::parse("stub://wide").is_err());
    }

    #[test]
    fn rejects_remote_urls() {
        assert!(LocalFrames::parse("http://cctv/live.m3u8").is_err());
        assert_eq!(
            LocalFrames::parse("frame.jpg").unwrap(),
            LocalFrames::Still(PathBuf::from("frame.jpg"))
        );
    }

    #[test]
    fn local_player_attaches_synthetic_source() {
        let mut player = LocalPlayer::new(
            LocalFrames::Synthetic(FrameSize::new(320, 240)),
            FrameSize::new(160, 120),
        );
        let source = player.attach("http://cctv/live.m3u8").unwrap();
        assert_eq!(source.stream_url(), "http://cctv/live.m3u8");
        assert_eq!(source.native_size(), Some(FrameSize::new(320, 240)));
        assert_eq!(source.rendered_size(), FrameSize::new(160, 120));
    }
}
