use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use motion_watch_common::capture::parse_capture_file_name;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dispatch::BucketStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);

/// Age limits for one retention pass. `None` leaves that store alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionPolicy {
    pub local_max_age: Option<Duration>,
    pub bucket_max_age: Option<Duration>,
}

impl RetentionPolicy {
    /// A retention of zero days disables purging.
    pub fn from_days(local_days: u32, bucket_days: Option<u32>) -> Self {
        let age = |days: u32| (days > 0).then(|| DAY * days);
        Self {
            local_max_age: age(local_days),
            bucket_max_age: bucket_days.and_then(age),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    pub local_deleted: usize,
    pub bucket_deleted: usize,
}

/// Delete capture files in `folder` last modified more than `max_age`
/// before `now`. Files that are not captures are never touched.
pub async fn purge_local(folder: &Path, max_age: Duration, now: SystemTime) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(folder).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut deleted = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_str().and_then(parse_capture_file_name).is_none() {
            continue;
        }
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let expired = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .is_some_and(|age| age > max_age);
        if expired {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!(path = %entry.path().display(), "expired capture deleted");
                    deleted += 1;
                }
                Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to delete expired capture"),
            }
        }
    }
    Ok(deleted)
}

/// One pass over every configured store. Failures are logged and the
/// remaining stores are still purged.
pub async fn run_once(
    policy: RetentionPolicy,
    folder: &Path,
    bucket: Option<&BucketStore>,
) -> PurgeReport {
    let mut report = PurgeReport::default();

    if let Some(max_age) = policy.local_max_age {
        match purge_local(folder, max_age, SystemTime::now()).await {
            Ok(n) => report.local_deleted = n,
            Err(e) => warn!(folder = %folder.display(), error = %e, "local retention pass failed"),
        }
    }

    if let (Some(max_age), Some(store)) = (policy.bucket_max_age, bucket) {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        match cutoff {
            Some(cutoff) => match store.purge_older_than(cutoff).await {
                Ok(n) => report.bucket_deleted = n,
                Err(e) => warn!(bucket = store.bucket(), error = %e, "bucket retention pass failed"),
            },
            None => warn!(?max_age, "bucket retention age out of range"),
        }
    }

    if report.local_deleted > 0 || report.bucket_deleted > 0 {
        info!(
            local = report.local_deleted,
            bucket = report.bucket_deleted,
            "expired captures purged"
        );
    }
    report
}

/// Purge expired captures every hour until `stop` flips.
pub async fn run_retention_loop(
    policy: RetentionPolicy,
    folder: &Path,
    bucket: Option<&BucketStore>,
    mut stop: watch::Receiver<bool>,
) {
    if policy.local_max_age.is_none() && policy.bucket_max_age.is_none() {
        info!("retention disabled");
        return;
    }
    info!(
        local_max_age = ?policy.local_max_age,
        bucket_max_age = ?policy.bucket_max_age,
        "retention loop started"
    );

    loop {
        run_once(policy, folder, bucket).await;
        tokio::select! {
            _ = tokio::time::sleep(CHECK_INTERVAL) => {}
            _ = stop.wait_for(|stopped| *stopped) => break,
        }
    }
    debug!("retention loop stopped");
}
