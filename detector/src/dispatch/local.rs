use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use motion_watch_common::capture::{capture_file_name, parse_capture_file_name};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::EncodedCapture;

/// Writes captures into a local folder.
#[derive(Debug, Clone)]
pub struct LocalSink {
    folder: PathBuf,
}

impl LocalSink {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    /// Save the capture, creating the folder on demand. Two captures in the
    /// same second get `_1`, `_2`, ... suffixes instead of overwriting.
    pub async fn save(&self, capture: &EncodedCapture) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.folder).await?;
        let base = capture_file_name(&capture.timestamp, &capture.ext);

        let mut attempt = 0u32;
        loop {
            let path = self.folder.join(suffixed(&base, attempt));
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(mut file) => {
                    write_or_remove(&mut file, &capture.bytes, &path).await?;
                    debug!(path = %path.display(), bytes = capture.bytes.len(), "capture written");
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// Capture files in the folder with their timestamps, newest first.
    pub async fn list_recent(&self, limit: usize) -> std::io::Result<Vec<(PathBuf, NaiveDateTime)>> {
        let mut entries = match tokio::fs::read_dir(&self.folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut captures = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(ts) = name.to_str().and_then(parse_capture_file_name) {
                captures.push((entry.path(), ts));
            }
        }
        captures.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        captures.truncate(limit);
        Ok(captures)
    }
}

/// Write `bytes` to a freshly created file, removing it again if the write
/// fails so no truncated capture is left behind.
async fn write_or_remove<W>(writer: &mut W, bytes: &[u8], path: &Path) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = match writer.write_all(bytes).await {
        Ok(()) => writer.flush().await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        if let Err(remove) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %remove, "failed to remove partial capture");
        }
        return Err(e);
    }
    Ok(())
}

fn suffixed(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_{attempt}.{ext}"),
        None => format!("{name}_{attempt}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::{Local, TimeZone};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts a few bytes, then fails every write.
    struct FailingWriter {
        accepted: usize,
    }

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            if self.accepted >= 2 {
                return Poll::Ready(Err(std::io::Error::new(ErrorKind::Other, "disk full")));
            }
            let n = buf.len().min(2 - self.accepted);
            self.accepted += n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn capture(bytes: &'static [u8]) -> EncodedCapture {
        EncodedCapture {
            bytes: Bytes::from_static(bytes),
            ext: "jpg".into(),
            timestamp: Local.with_ymd_and_hms(2024, 1, 15, 14, 30, 25).unwrap(),
            regions: Vec::new(),
        }
    }

    #[test]
    fn suffix_goes_before_extension() {
        assert_eq!(suffixed("motion_a.jpg", 0), "motion_a.jpg");
        assert_eq!(suffixed("motion_a.jpg", 2), "motion_a_2.jpg");
    }

    #[tokio::test]
    async fn saves_into_created_folder() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalSink::new(dir.path().join("captures"));
        let path = sink.save(&capture(b"jpeg")).await.unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "motion_2024-01-15_14-30-25.jpg"
        );
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn same_second_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalSink::new(dir.path());
        let first = sink.save(&capture(b"one")).await.unwrap();
        let second = sink.save(&capture(b"two")).await.unwrap();
        assert_ne!(first, second);
        assert!(second.ends_with("motion_2024-01-15_14-30-25_1.jpg"));
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }

    #[tokio::test]
    async fn failed_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motion_2024-01-15_14-30-25.jpg");
        std::fs::write(&path, b"jp").unwrap();

        let mut writer = FailingWriter { accepted: 0 };
        let err = write_or_remove(&mut writer, b"jpeg bytes", &path).await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn successful_write_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.jpg");
        let mut file = tokio::fs::File::create(&path).await.unwrap();
        write_or_remove(&mut file, b"jpeg", &path).await.unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn lists_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "motion_2024-01-15_14-30-25.jpg",
            "motion_2024-01-16_08-00-00.jpg",
            "motion_2024-01-14_23-59-59.png",
            "snapshot.jpg",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let sink = LocalSink::new(dir.path());
        let recent = sink.list_recent(2).await.unwrap();
        let names: Vec<_> = recent
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["motion_2024-01-16_08-00-00.jpg", "motion_2024-01-15_14-30-25.jpg"]
        );
    }

    #[tokio::test]
    async fn missing_folder_lists_nothing() {
        let sink = LocalSink::new("/definitely/not/here");
        assert!(sink.list_recent(10).await.unwrap().is_empty());
    }
}
