use std::time::{Duration, Instant};

use motion_watch_common::config::DetectionConfig;
use tracing::debug;

use super::difference::DifferenceEngine;
use super::frame::{Frame, InvalidFrameError};
use super::gate::{CaptureDecision, CaptureGate, CaptureReason};
use super::preprocess::Preprocessor;
use super::regions;

/// One stream's detection state: the rolling reference and the capture gate.
///
/// Each call to [`MotionPipeline::process`] runs normalize → diff → extract
/// → gate for a single frame.
#[derive(Debug)]
pub struct MotionPipeline {
    preprocessor: Preprocessor,
    engine: DifferenceEngine,
    gate: CaptureGate,
    threshold: u8,
    min_area: u32,
}

impl MotionPipeline {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            preprocessor: Preprocessor::new(config.blur_kernel),
            engine: DifferenceEngine::new(config.dilate_iterations),
            gate: CaptureGate::new(Duration::from_secs(config.capture_interval_secs as u64)),
            threshold: config.motion_threshold,
            min_area: config.min_detect_area,
        }
    }

    /// Run one cycle. An invalid frame leaves the reference and the gate as
    /// they were.
    pub fn process(
        &mut self,
        frame: &Frame,
        now: Instant,
    ) -> Result<CaptureDecision, InvalidFrameError> {
        let normalized = self.preprocessor.normalize(frame)?;
        let Some(mask) = self.engine.advance(normalized, self.threshold)? else {
            return Ok(CaptureDecision::skip(
                Vec::new(),
                CaptureReason::ReferenceInitialized,
            ));
        };

        let regions = regions::extract(&mask, self.min_area);
        for region in &regions {
            debug!(
                x = region.x,
                y = region.y,
                width = region.width,
                height = region.height,
                area = region.area,
                "motion region"
            );
        }
        Ok(self.gate.evaluate(regions, now))
    }

    #[cfg(test)]
    pub fn capture_state(&self) -> &super::gate::CaptureState {
        self.gate.state()
    }

    #[cfg(test)]
    pub fn engine(&self) -> &DifferenceEngine {
        &self.engine
    }
}
