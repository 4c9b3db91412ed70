use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use serde::Serialize;

/// Counters shared by the detection loop, the dispatch worker and the status
/// endpoint.
#[derive(Debug, Default)]
pub struct SessionStats {
    frames: AtomicU64,
    skipped: AtomicU64,
    detections: AtomicU64,
    captures: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    sink_failures: AtomicU64,
    last_capture: Mutex<Option<DateTime<Local>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub skipped: u64,
    pub detections: u64,
    pub captures: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub sink_failures: u64,
    pub last_capture: Option<DateTime<Local>>,
}

impl SessionStats {
    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detection(&self) {
        self.detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture(&self, at: DateTime<Local>) {
        self.captures.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_capture.lock() {
            *last = Some(at);
        }
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            captures: self.captures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            last_capture: self.last_capture.lock().ok().and_then(|l| *l),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = SessionStats::default();
        stats.record_frame();
        stats.record_frame();
        stats.record_detection();
        let at = Local::now();
        stats.record_capture(at);
        stats.record_dropped();

        let snap = stats.snapshot();
        assert_eq!(snap.frames, 2);
        assert_eq!(snap.detections, 1);
        assert_eq!(snap.captures, 1);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.delivered, 0);
        assert_eq!(snap.last_capture, Some(at));
    }

    #[test]
    fn snapshot_serializes_capture_time_as_rfc3339() {
        let stats = SessionStats::default();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert!(json["last_capture"].is_null());

        let at = Local::now();
        stats.record_capture(at);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["captures"], 1);
        let parsed: chrono::DateTime<chrono::FixedOffset> =
            serde_json::from_value(json["last_capture"].clone()).unwrap();
        assert_eq!(parsed, at);
    }
}
