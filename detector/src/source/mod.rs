//! Frame acquisition.
//!
//! Sources hand decoded frames to the detection loop one at a time. End of
//! stream is `Ok(None)`; everything else that stops the stream is an error.

mod directory;
mod mjpeg;

use std::time::Duration;

use chrono::{DateTime, Local};
use motion_watch_common::config::{CameraConfig, CameraMode};

use crate::motion::Frame;

pub use directory::DirectorySource;
pub use mjpeg::{MjpegSource, PollingSource};

/// A stream of frames owned by the detection loop.
#[allow(async_fn_in_trait)]
pub trait FrameSource {
    /// Connect to the source. Failure here means the loop never starts.
    async fn open(&mut self) -> Result<(), AcquisitionError>;

    /// Wait until the source is due for its next frame. Sources that push
    /// frames as they arrive have nothing to wait for.
    async fn pace(&mut self) {}

    /// Next frame, or `Ok(None)` once the stream is exhausted.
    async fn read(&mut self) -> Result<Option<Frame>, ReadError>;

    /// Release the underlying connection or handles. Must be idempotent.
    fn close(&mut self);

    fn describe(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("camera connection failed: {0}")]
    Http(reqwest::Error),
    #[error("camera returned HTTP status {0}")]
    Status(u16),
    #[error("cannot read frame directory {path}: {source}")]
    Directory {
        path: String,
        source: std::io::Error,
    },
    #[error("camera misconfigured: {0}")]
    Config(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("source was read before being opened")]
    NotOpen,
    #[error("camera stream error: {0}")]
    Http(reqwest::Error),
    #[error("camera returned HTTP status {0}")]
    Status(u16),
    #[error("failed to read frame: {0}")]
    Io(#[from] std::io::Error),
    #[error("no frame within {0:?}")]
    Timeout(Duration),
}

/// Decode an encoded image (JPEG, PNG, ...) into a frame.
pub fn decode_frame(bytes: &[u8], captured_at: DateTime<Local>) -> Result<Frame, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    Ok(Frame::from_image(img, captured_at))
}

/// The configured source, chosen at runtime.
pub enum AnySource {
    Mjpeg(MjpegSource),
    Polling(PollingSource),
    Directory(DirectorySource),
}

impl AnySource {
    pub fn from_config(config: &CameraConfig) -> Result<Self, AcquisitionError> {
        let url = || {
            config
                .url
                .clone()
                .ok_or_else(|| AcquisitionError::Config("camera.url is not set".into()))
        };
        match config.mode {
            CameraMode::Mjpeg => Ok(Self::Mjpeg(MjpegSource::new(url()?))),
            CameraMode::Polling => {
                let interval = Duration::try_from_secs_f64(1.0 / config.fps).map_err(|_| {
                    AcquisitionError::Config(format!("camera.fps {} is out of range", config.fps))
                })?;
                Ok(Self::Polling(PollingSource::new(url()?, interval)))
            }
            CameraMode::Directory => {
                let path = config
                    .path
                    .clone()
                    .ok_or_else(|| AcquisitionError::Config("camera.path is not set".into()))?;
                Ok(Self::Directory(DirectorySource::new(path)))
            }
        }
    }
}

impl FrameSource for AnySource {
    async fn open(&mut self) -> Result<(), AcquisitionError> {
        match self {
            Self::Mjpeg(s) => s.open().await,
            Self::Polling(s) => s.open().await,
            Self::Directory(s) => s.open().await,
        }
    }

    async fn pace(&mut self) {
        match self {
            Self::Mjpeg(s) => s.pace().await,
            Self::Polling(s) => s.pace().await,
            Self::Directory(s) => s.pace().await,
        }
    }

    async fn read(&mut self) -> Result<Option<Frame>, ReadError> {
        match self {
            Self::Mjpeg(s) => s.read().await,
            Self::Polling(s) => s.read().await,
            Self::Directory(s) => s.read().await,
        }
    }

    fn close(&mut self) {
        match self {
            Self::Mjpeg(s) => s.close(),
            Self::Polling(s) => s.close(),
            Self::Directory(s) => s.close(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Mjpeg(s) => s.describe(),
            Self::Polling(s) => s.describe(),
            Self::Directory(s) => s.describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    pub(crate) fn encoded_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([9, 9, 9])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn decode_png_frame() {
        let frame = decode_frame(&encoded_png(6, 4), Local::now()).unwrap();
        assert_eq!((frame.width(), frame.height(), frame.channels()), (6, 4, 3));
    }

    #[test]
    fn decode_garbage_fails() {
        assert!(decode_frame(b"not an image", Local::now()).is_err());
    }

    #[test]
    fn source_from_config_needs_url() {
        let config = CameraConfig::default();
        assert!(matches!(
            AnySource::from_config(&config),
            Err(AcquisitionError::Config(_))
        ));
    }

    #[test]
    fn polling_source_rejects_unusable_fps() {
        for fps in [f64::NAN, -2.0, 1e-300] {
            let config = CameraConfig {
                mode: CameraMode::Polling,
                url: Some("http://cam.local/snapshot.jpg".into()),
                fps,
                ..CameraConfig::default()
            };
            assert!(
                matches!(AnySource::from_config(&config), Err(AcquisitionError::Config(_))),
                "fps {fps} accepted"
            );
        }
    }

    #[test]
    fn directory_source_from_config() {
        let config = CameraConfig {
            mode: CameraMode::Directory,
            path: Some("/tmp/frames".into()),
            ..CameraConfig::default()
        };
        let source = AnySource::from_config(&config).unwrap();
        assert!(matches!(source, AnySource::Directory(_)));
        assert!(source.describe().contains("/tmp/frames"));
    }
}
