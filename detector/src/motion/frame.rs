use chrono::{DateTime, Local};
use image::DynamicImage;

/// A decoded camera frame: interleaved 8-bit samples, row-major.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
    captured_at: DateTime<Local>,
}

impl Frame {
    /// Wrap raw samples. Geometry is checked by the preprocessor, not here.
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        data: Vec<u8>,
        captured_at: DateTime<Local>,
    ) -> Self {
        Self {
            width,
            height,
            channels,
            data,
            captured_at,
        }
    }

    /// Grayscale images stay single-channel, everything else becomes RGB.
    pub fn from_image(img: DynamicImage, captured_at: DateTime<Local>) -> Self {
        match img {
            DynamicImage::ImageLuma8(gray) => {
                let (width, height) = gray.dimensions();
                Self::new(width, height, 1, gray.into_raw(), captured_at)
            }
            other => {
                let rgb = other.to_rgb8();
                let (width, height) = rgb.dimensions();
                Self::new(width, height, 3, rgb.into_raw(), captured_at)
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }
}

/// Single-channel smoothed intensity image derived from a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl NormalizedFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Binary motion map with the dimensions of the frames it was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl MotionMask {
    pub fn new(width: u32, height: u32, bits: Vec<bool>) -> Self {
        debug_assert_eq!(bits.len(), width as usize * height as usize);
        Self {
            width,
            height,
            bits,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[cfg(test)]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[y as usize * self.width as usize + x as usize]
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn motion_pixels(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn is_clear(&self) -> bool {
        !self.bits.iter().any(|&b| b)
    }
}

/// A frame that cannot enter the difference computation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidFrameError {
    #[error("frame has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },
    #[error("unsupported channel count {0}, expected 1, 3 or 4")]
    UnsupportedChannels(u8),
    #[error("frame buffer holds {got} bytes, geometry needs {expected}")]
    BufferSize { expected: usize, got: usize },
    #[error("frame is {got:?} but the reference is {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        got: (u32, u32),
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbaImage};

    #[test]
    fn from_gray_image_keeps_single_channel() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(4, 2));
        let frame = Frame::from_image(img, Local::now());
        assert_eq!((frame.width(), frame.height(), frame.channels()), (4, 2, 1));
        assert_eq!(frame.data().len(), 8);
    }

    #[test]
    fn from_rgba_image_drops_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(3, 3));
        let frame = Frame::from_image(img, Local::now());
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.data().len(), 27);
    }

    #[test]
    fn mask_counts_motion() {
        let mask = MotionMask::new(2, 2, vec![true, false, false, true]);
        assert_eq!(mask.motion_pixels(), 2);
        assert!(mask.get(1, 1));
        assert!(!mask.get(1, 0));
        assert!(!mask.is_clear());
    }
}
