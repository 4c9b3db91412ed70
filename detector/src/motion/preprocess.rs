use super::frame::{Frame, InvalidFrameError, NormalizedFrame};

/// Turns raw frames into smoothed single-channel intensity images.
///
/// Luma uses BT.601 weights on RGB input (alpha is ignored). Smoothing is a
/// separable Gaussian of `kernel x kernel` taps with sigma derived from the
/// kernel size, borders reflected without repeating the edge sample.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    weights: Vec<f32>,
}

impl Preprocessor {
    /// `kernel` must be odd; config validation guarantees it.
    pub fn new(kernel: u32) -> Self {
        Self {
            weights: gaussian_weights(kernel as usize),
        }
    }

    pub fn normalize(&self, frame: &Frame) -> Result<NormalizedFrame, InvalidFrameError> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(InvalidFrameError::ZeroArea { width, height });
        }
        let channels = frame.channels();
        if !matches!(channels, 1 | 3 | 4) {
            return Err(InvalidFrameError::UnsupportedChannels(channels));
        }
        let expected = width as usize * height as usize * channels as usize;
        if frame.data().len() != expected {
            return Err(InvalidFrameError::BufferSize {
                expected,
                got: frame.data().len(),
            });
        }

        let gray = to_luma(frame.data(), channels as usize);
        let smoothed = self.blur(&gray, width as usize, height as usize);
        Ok(NormalizedFrame::new(width, height, smoothed))
    }

    fn blur(&self, src: &[u8], width: usize, height: usize) -> Vec<u8> {
        if self.weights.len() == 1 {
            return src.to_vec();
        }
        let radius = (self.weights.len() / 2) as isize;

        let mut horizontal = vec![0f32; width * height];
        for y in 0..height {
            let row = &src[y * width..(y + 1) * width];
            for x in 0..width {
                let mut acc = 0f32;
                for (k, w) in self.weights.iter().enumerate() {
                    let sx = reflect_101(x as isize + k as isize - radius, width);
                    acc += w * row[sx] as f32;
                }
                horizontal[y * width + x] = acc;
            }
        }

        let mut out = vec![0u8; width * height];
        for y in 0..height {
            for x in 0..width {
                let mut acc = 0f32;
                for (k, w) in self.weights.iter().enumerate() {
                    let sy = reflect_101(y as isize + k as isize - radius, height);
                    acc += w * horizontal[sy * width + x];
                }
                out[y * width + x] = acc.round().clamp(0.0, 255.0) as u8;
            }
        }
        out
    }
}

fn to_luma(data: &[u8], channels: usize) -> Vec<u8> {
    if channels == 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|px| {
            let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
            ((299 * r + 587 * g + 114 * b + 500) / 1000) as u8
        })
        .collect()
}

/// Normalized 1-D Gaussian taps. Sigma follows the usual rule for a
/// kernel-size-only blur: 0.3 * ((k - 1) / 2 - 1) + 0.8.
fn gaussian_weights(kernel: usize) -> Vec<f32> {
    let kernel = kernel.max(1);
    if kernel == 1 {
        return vec![1.0];
    }
    let sigma = 0.3 * ((kernel as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (kernel / 2) as f64;
    let raw: Vec<f64> = (0..kernel)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.iter().map(|w| (w / sum) as f32).collect()
}

/// Mirror an out-of-range index back into `0..len` (gfedcb|abcdefgh|gfedcba).
fn reflect_101(mut i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    while i < 0 || i > last {
        if i < 0 {
            i = -i;
        }
        if i > last {
            i = 2 * last - i;
        }
    }
    i as usize
}
