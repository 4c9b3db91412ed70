use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::motion::annotate::draw_regions;
use crate::motion::MotionPipeline;
use crate::source::{AcquisitionError, FrameSource, ReadError};
use crate::stats::SessionStats;
use crate::status::PipelineStatus;

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop signal was raised.
    Stopped,
    /// The source ran out of frames.
    Exhausted,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("could not open frame source: {0}")]
    Acquisition(#[from] AcquisitionError),
    #[error("frame source failed: {0}")]
    Read(#[from] ReadError),
}

/// Closes the source on every exit path of [`StreamRunner::run`].
struct SourceGuard<'a, S: FrameSource>(&'a mut S);

impl<S: FrameSource> Drop for SourceGuard<'_, S> {
    fn drop(&mut self) {
        self.0.close();
        debug!(source = self.0.describe(), "frame source closed");
    }
}

/// Drives one stream: read, detect, dispatch, repeat.
pub struct StreamRunner<D: Dispatcher> {
    pipeline: MotionPipeline,
    dispatcher: D,
    stats: Arc<SessionStats>,
    status: watch::Sender<PipelineStatus>,
    read_timeout: Duration,
    on_open: Option<oneshot::Sender<String>>,
}

impl<D: Dispatcher> StreamRunner<D> {
    pub fn new(
        pipeline: MotionPipeline,
        dispatcher: D,
        stats: Arc<SessionStats>,
        status: watch::Sender<PipelineStatus>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            pipeline,
            dispatcher,
            stats,
            status,
            read_timeout,
            on_open: None,
        }
    }

    /// Send the source description on `tx` once the source has opened.
    pub fn notify_open(mut self, tx: oneshot::Sender<String>) -> Self {
        self.on_open = Some(tx);
        self
    }

    #[cfg(test)]
    pub fn into_dispatcher(self) -> D {
        self.dispatcher
    }

    /// Run until the stop signal, end of stream or a source failure. The
    /// source is closed in every case.
    pub async fn run<S: FrameSource>(
        &mut self,
        source: &mut S,
        mut stop: watch::Receiver<bool>,
    ) -> Result<StopReason, PipelineError> {
        source.open().await?;
        let source = SourceGuard(source);
        let described = source.0.describe();
        info!(source = described, "detection loop started");
        if let Some(tx) = self.on_open.take() {
            let _ = tx.send(described);
        }

        loop {
            if *stop.borrow_and_update() {
                info!("stop requested");
                return Ok(StopReason::Stopped);
            }

            // The timeout starts once the source is due, not while it paces.
            let read_timeout = self.read_timeout;
            let current = &mut *source.0;
            let read = async move {
                current.pace().await;
                tokio::time::timeout(read_timeout, current.read()).await
            };
            let mut frame = tokio::select! {
                changed = stop.changed() => {
                    // A dropped sender counts as a stop too.
                    if changed.is_err() || *stop.borrow() {
                        info!("stop requested while waiting for a frame");
                        return Ok(StopReason::Stopped);
                    }
                    continue;
                }
                result = read => match result {
                    Ok(Ok(Some(frame))) => frame,
                    Ok(Ok(None)) => {
                        info!("frame source exhausted");
                        return Ok(StopReason::Exhausted);
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(ReadError::Timeout(self.read_timeout).into()),
                },
            };

            self.stats.record_frame();
            let decision = match self.pipeline.process(&frame, Instant::now()) {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(error = %e, "skipping invalid frame");
                    self.stats.record_skipped();
                    self.publish(false);
                    continue;
                }
            };

            let motion = decision.motion_present();
            if motion {
                self.stats.record_detection();
            }
            if decision.should_capture {
                let timestamp = frame.captured_at();
                info!(
                    regions = decision.regions.len(),
                    %timestamp,
                    "motion captured"
                );
                draw_regions(&mut frame, &decision.regions);
                self.stats.record_capture(timestamp);
                self.dispatcher.handle(frame, decision.regions, timestamp);
            } else {
                debug!(reason = %decision.reason, regions = decision.regions.len(), "no capture");
            }
            self.publish(motion);
        }
    }

    fn publish(&self, motion_present: bool) {
        self.status.send_replace(PipelineStatus {
            motion_present,
            stats: self.stats.snapshot(),
        });
    }
}
