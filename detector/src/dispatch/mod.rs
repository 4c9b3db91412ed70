//! Capture dispatch.
//!
//! The detection loop hands captures to a bounded queue and moves on. A worker
//! task drains the queue, encodes each capture once and delivers it to every
//! configured sink. Nothing here can fail back into the loop.

pub mod bucket;
pub mod local;
pub mod slack;

use std::borrow::Cow;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::motion::{Frame, Region};
use crate::stats::SessionStats;

pub use bucket::{BucketStore, StorageError};
pub use local::LocalSink;
pub use slack::{NotifyError, SlackClient};

/// Receives annotated frames the loop decided to capture.
pub trait Dispatcher {
    fn handle(&mut self, frame: Frame, regions: Vec<Region>, timestamp: DateTime<Local>);
}

/// A capture waiting in the queue.
#[derive(Debug)]
pub struct Capture {
    pub frame: Frame,
    pub regions: Vec<Region>,
    pub timestamp: DateTime<Local>,
}

/// A capture after encoding, shared by all sinks.
#[derive(Debug, Clone)]
pub struct EncodedCapture {
    pub bytes: Bytes,
    pub ext: String,
    pub timestamp: DateTime<Local>,
    pub regions: Vec<Region>,
}

/// Sending half of the capture queue.
pub struct DispatchQueue {
    tx: mpsc::Sender<Capture>,
    stats: Arc<SessionStats>,
}

impl DispatchQueue {
    pub fn new(capacity: usize, stats: Arc<SessionStats>) -> (Self, mpsc::Receiver<Capture>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, stats }, rx)
    }
}

impl Dispatcher for DispatchQueue {
    fn handle(&mut self, frame: Frame, regions: Vec<Region>, timestamp: DateTime<Local>) {
        let count = regions.len();
        let capture = Capture {
            frame,
            regions,
            timestamp,
        };
        match self.tx.try_send(capture) {
            Ok(()) => debug!(regions = count, "capture queued"),
            Err(TrySendError::Full(_)) => {
                warn!(%timestamp, "dispatch queue full, dropping capture");
                self.stats.record_dropped();
            }
            Err(TrySendError::Closed(_)) => {
                warn!(%timestamp, "dispatch worker gone, dropping capture");
                self.stats.record_dropped();
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("local write failed: {0}")]
    Local(#[from] std::io::Error),
    #[error(transparent)]
    Bucket(#[from] StorageError),
    #[error(transparent)]
    Slack(#[from] NotifyError),
}

/// A capture destination.
pub enum Sink {
    Local(LocalSink),
    Bucket(BucketStore),
    Slack(SlackClient),
}

impl Sink {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Bucket(_) => "bucket",
            Self::Slack(_) => "slack",
        }
    }

    /// Deliver one capture. Returns where it ended up.
    pub async fn deliver(&self, capture: &EncodedCapture) -> Result<String, SinkError> {
        match self {
            Self::Local(sink) => Ok(sink.save(capture).await?.display().to_string()),
            Self::Bucket(store) => Ok(store.put_capture(capture).await?),
            Self::Slack(client) => {
                let filename = motion_watch_common::capture::capture_file_name(
                    &capture.timestamp,
                    &capture.ext,
                );
                client
                    .post_image(
                        capture.bytes.clone(),
                        &filename,
                        &slack::motion_alert_text(&capture.regions),
                    )
                    .await?;
                Ok(format!("slack:{}", client.channel()))
            }
        }
    }
}

/// How the worker encodes captures.
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub ext: String,
    pub jpeg_quality: u8,
}

/// Encode a frame as PNG for `png`, JPEG otherwise. JPEG has no alpha, so
/// four-channel frames are flattened to RGB first.
pub fn encode(frame: &Frame, settings: &EncodeSettings) -> Result<Bytes, ImageError> {
    let png = settings.ext.eq_ignore_ascii_case("png");
    let (data, color) = match frame.channels() {
        1 => (Cow::Borrowed(frame.data()), ExtendedColorType::L8),
        4 if png => (Cow::Borrowed(frame.data()), ExtendedColorType::Rgba8),
        4 => {
            let rgb: Vec<u8> = frame
                .data()
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect();
            (Cow::Owned(rgb), ExtendedColorType::Rgb8)
        }
        _ => (Cow::Borrowed(frame.data()), ExtendedColorType::Rgb8),
    };

    let mut buf = Cursor::new(Vec::new());
    if png {
        PngEncoder::new(&mut buf).write_image(&data, frame.width(), frame.height(), color)?;
    } else {
        JpegEncoder::new_with_quality(&mut buf, settings.jpeg_quality).write_image(
            &data,
            frame.width(),
            frame.height(),
            color,
        )?;
    }
    Ok(Bytes::from(buf.into_inner()))
}

/// Periodic statistics posted by the worker.
pub struct StatsReport {
    pub client: SlackClient,
    pub every: Duration,
}

/// Drain the queue until every sender is dropped.
pub async fn run_worker(
    mut rx: mpsc::Receiver<Capture>,
    sinks: Vec<Sink>,
    settings: EncodeSettings,
    stats: Arc<SessionStats>,
    report: Option<StatsReport>,
) {
    info!(
        sinks = ?sinks.iter().map(Sink::name).collect::<Vec<_>>(),
        "dispatch worker started"
    );
    let mut ticker = report.as_ref().map(|r| {
        tokio::time::interval_at(tokio::time::Instant::now() + r.every, r.every)
    });

    loop {
        tokio::select! {
            capture = rx.recv() => match capture {
                Some(capture) => deliver(capture, &sinks, &settings, &stats).await,
                None => break,
            },
            _ = tick(&mut ticker) => {
                if let Some(report) = &report {
                    report.client.notify(&slack::stats_text(&stats.snapshot())).await;
                }
            }
        }
    }
    info!("dispatch worker drained");
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn deliver(capture: Capture, sinks: &[Sink], settings: &EncodeSettings, stats: &SessionStats) {
    let bytes = match encode(&capture.frame, settings) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, timestamp = %capture.timestamp, "failed to encode capture");
            stats.record_sink_failure();
            return;
        }
    };
    let encoded = EncodedCapture {
        bytes,
        ext: settings.ext.clone(),
        timestamp: capture.timestamp,
        regions: capture.regions,
    };

    for sink in sinks {
        match sink.deliver(&encoded).await {
            Ok(location) => {
                info!(sink = sink.name(), location, bytes = encoded.bytes.len(), "capture delivered");
                stats.record_delivered();
            }
            Err(e) => {
                warn!(sink = sink.name(), error = %e, "capture delivery failed");
                stats.record_sink_failure();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(channels: u8) -> Frame {
        let data = vec![128u8; 16 * 8 * channels as usize];
        Frame::new(16, 8, channels, data, Local::now())
    }

    fn jpeg() -> EncodeSettings {
        EncodeSettings {
            ext: "jpg".into(),
            jpeg_quality: 85,
        }
    }

    #[test]
    fn encodes_jpeg_and_png() {
        let jpg = encode(&frame(3), &jpeg()).unwrap();
        assert_eq!(&jpg[..2], &[0xFF, 0xD8]);

        let png = encode(
            &frame(4),
            &EncodeSettings {
                ext: "png".into(),
                jpeg_quality: 85,
            },
        )
        .unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn alpha_is_dropped_for_jpeg() {
        let decoded = image::load_from_memory(&encode(&frame(4), &jpeg()).unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn grayscale_encodes() {
        let decoded = image::load_from_memory(&encode(&frame(1), &jpeg()).unwrap()).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L8);
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let stats = Arc::new(SessionStats::default());
        let (mut queue, mut rx) = DispatchQueue::new(1, stats.clone());
        queue.handle(frame(3), Vec::new(), Local::now());
        queue.handle(frame(3), Vec::new(), Local::now());
        assert_eq!(stats.snapshot().dropped, 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn worker_delivers_then_drains() {
        let dir = tempfile::tempdir().unwrap();
        let stats = Arc::new(SessionStats::default());
        let (mut queue, rx) = DispatchQueue::new(4, stats.clone());
        let worker = tokio::spawn(run_worker(
            rx,
            vec![Sink::Local(LocalSink::new(dir.path()))],
            jpeg(),
            stats.clone(),
            None,
        ));

        queue.handle(frame(3), Vec::new(), Local::now());
        drop(queue);
        worker.await.unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.delivered, 1);
        assert_eq!(snap.sink_failures, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn closed_worker_counts_drop() {
        let stats = Arc::new(SessionStats::default());
        let (mut queue, rx) = DispatchQueue::new(4, stats.clone());
        drop(rx);
        queue.handle(frame(3), Vec::new(), Local::now());
        assert_eq!(stats.snapshot().dropped, 1);
    }
}
