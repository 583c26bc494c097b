use anyhow::{anyhow, Context, Result};
use image::{GenericImageView, RgbImage};
use std::path::Path;

use super::VideoSource;
use crate::overlay::FrameSize;

/// A still image standing in for the live frame.
pub struct StillImageSource {
    stream_url: String,
    frame: RgbImage,
    rendered: FrameSize,
}

impl StillImageSource {
    pub fn open(stream_url: &str, path: &Path, rendered: FrameSize) -> Result<Self> {
        let image =
            image::open(path).with_context(|| format!("decode still frame {}", path.display()))?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("still frame {} has no pixels", path.display()));
        }
        Ok(Self {
            stream_url: stream_url.to_string(),
            frame: image.into_rgb8(),
            rendered,
        })
    }
}

impl VideoSource for StillImageSource {
    fn stream_url(&self) -> &str {
        &self.stream_url
    }

    fn native_size(&self) -> Option<FrameSize> {
        let (width, height) = self.frame.dimensions();
        Some(FrameSize::new(width, height))
    }

    fn rendered_size(&self) -> FrameSize {
        self.rendered
    }

    fn snapshot(&self) -> Result<RgbImage> {
        Ok(self.frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_png_and_reports_native_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        RgbImage::new(40, 30).save(&path).unwrap();

        let source = StillImageSource::open("http://cam", &path, FrameSize::new(20, 15)).unwrap();
        assert_eq!(source.native_size(), Some(FrameSize::new(40, 30)));
        assert_eq!(source.snapshot().unwrap().dimensions(), (40, 30));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = StillImageSource::open(
            "http://cam",
            Path::new("/nonexistent/frame.jpg"),
            FrameSize::new(1, 1),
        );
        assert!(err.is_err());
    }
}
