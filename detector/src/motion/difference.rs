use tracing::debug;

use super::frame::{InvalidFrameError, MotionMask, NormalizedFrame};

/// Absolute difference against `reference`, binarized at `threshold` and
/// dilated `dilate_iterations` times with a 3x3 square.
///
/// A pixel is motion when `|reference - current| > threshold`.
pub fn diff(
    reference: &NormalizedFrame,
    current: &NormalizedFrame,
    threshold: u8,
    dilate_iterations: u32,
) -> Result<MotionMask, InvalidFrameError> {
    if reference.dimensions() != current.dimensions() {
        return Err(InvalidFrameError::DimensionMismatch {
            expected: reference.dimensions(),
            got: current.dimensions(),
        });
    }
    let (width, height) = current.dimensions();
    let bits: Vec<bool> = reference
        .data()
        .iter()
        .zip(current.data())
        .map(|(&a, &b)| a.abs_diff(b) > threshold)
        .collect();
    Ok(dilate(MotionMask::new(width, height, bits), dilate_iterations))
}

/// Grow every motion pixel into its 3x3 neighbourhood, `iterations` times.
/// Pixels outside the image never count as motion.
pub fn dilate(mask: MotionMask, iterations: u32) -> MotionMask {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    let mut current = mask;
    for _ in 0..iterations {
        if current.is_clear() {
            break;
        }
        let src = current.bits();
        let mut out = vec![false; w * h];
        for y in 0..h {
            let y0 = y.saturating_sub(1);
            let y1 = (y + 1).min(h - 1);
            for x in 0..w {
                let x0 = x.saturating_sub(1);
                let x1 = (x + 1).min(w - 1);
                out[y * w + x] =
                    (y0..=y1).any(|ny| src[ny * w + x0..=ny * w + x1].contains(&true));
            }
        }
        current = MotionMask::new(width, height, out);
    }
    current
}

/// Holds the rolling reference frame and produces one motion mask per cycle.
///
/// The reference is the previous cycle's normalized frame; it is replaced
/// wholesale after each successful comparison and left alone when the
/// comparison is rejected.
#[derive(Debug)]
pub struct DifferenceEngine {
    reference: Option<NormalizedFrame>,
    dilate_iterations: u32,
}

impl DifferenceEngine {
    pub fn new(dilate_iterations: u32) -> Self {
        Self {
            reference: None,
            dilate_iterations,
        }
    }

    #[cfg(test)]
    pub fn reference(&self) -> Option<&NormalizedFrame> {
        self.reference.as_ref()
    }

    pub fn update_reference(&mut self, current: NormalizedFrame) {
        self.reference = Some(current);
    }

    /// Compare `current` against the reference and then make it the new
    /// reference. Returns `Ok(None)` on the very first frame, which only
    /// seeds the reference.
    pub fn advance(
        &mut self,
        current: NormalizedFrame,
        threshold: u8,
    ) -> Result<Option<MotionMask>, InvalidFrameError> {
        let mask = match self.reference.as_ref() {
            Some(reference) => diff(reference, &current, threshold, self.dilate_iterations)?,
            None => {
                debug!(dims = ?current.dimensions(), "seeding reference frame");
                self.update_reference(current);
                return Ok(None);
            }
        };
        debug!(
            motion_pixels = mask.motion_pixels(),
            threshold, "frame difference computed"
        );
        self.update_reference(current);
        Ok(Some(mask))
    }
}
