use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use super::{decode_frame, AcquisitionError, FrameSource, ReadError};
use crate::motion::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Replays image files from a directory in file-name order.
pub struct DirectorySource {
    dir: PathBuf,
    pending: Option<VecDeque<PathBuf>>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending: None,
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

impl FrameSource for DirectorySource {
    async fn open(&mut self) -> Result<(), AcquisitionError> {
        let to_err = |source| AcquisitionError::Directory {
            path: self.dir.display().to_string(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(to_err)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(to_err)? {
            let path = entry.path();
            if is_image(&path) {
                files.push(path);
            }
        }
        files.sort();
        info!(dir = %self.dir.display(), files = files.len(), "replaying frames from directory");
        self.pending = Some(files.into());
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<Frame>, ReadError> {
        let pending = self.pending.as_mut().ok_or(ReadError::NotOpen)?;
        while let Some(path) = pending.pop_front() {
            let bytes = tokio::fs::read(&path).await?;
            let captured_at = tokio::fs::metadata(&path)
                .await
                .and_then(|m| m.modified())
                .map(DateTime::<Local>::from)
                .unwrap_or_else(|_| Local::now());
            match decode_frame(&bytes, captured_at) {
                Ok(frame) => {
                    debug!(path = %path.display(), "frame loaded");
                    return Ok(Some(frame));
                }
                Err(e) => warn!(error = %e, path = %path.display(), "undecodable image, skipping"),
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.pending = None;
    }

    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }
}
