use bytes::Bytes;
use chrono::{DateTime, Local};
use motion_watch_common::config::SlackConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::motion::Region;
use crate::stats::StatsSnapshot;

const MESSAGE_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("slack request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("slack API error: {0}")]
    Api(String),
}

/// Envelope shared by every Web API response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    upload_url: Option<String>,
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

impl ApiResponse {
    fn into_result(self) -> Result<Self, NotifyError> {
        if self.ok {
            Ok(self)
        } else {
            Err(NotifyError::Api(
                self.error.unwrap_or_else(|| "unknown_error".to_string()),
            ))
        }
    }
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct UploadedFile<'a> {
    id: &'a str,
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct CompleteUpload<'a> {
    files: [UploadedFile<'a>; 1],
    channel_id: &'a str,
    initial_comment: &'a str,
}

/// Minimal Slack Web API client: text messages and image uploads.
#[derive(Debug, Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    token: String,
    channel: String,
    api_base: String,
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: config.token.clone(),
            channel: config.channel.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    /// Post a text message, prefixed with the local time.
    pub async fn post_message(&self, text: &str) -> Result<(), NotifyError> {
        let text = stamped(text, Local::now());
        let response: ApiResponse = self
            .http
            .post(self.endpoint("chat.postMessage"))
            .bearer_auth(&self.token)
            .json(&PostMessage {
                channel: &self.channel,
                text: &text,
            })
            .send()
            .await?
            .json()
            .await?;
        response.into_result()?;
        debug!(channel = self.channel, "slack message posted");
        Ok(())
    }

    /// Upload an image with a comment; falls back to the bare comment when
    /// any step of the upload fails.
    pub async fn post_image(
        &self,
        image: Bytes,
        filename: &str,
        comment: &str,
    ) -> Result<(), NotifyError> {
        match self.upload(image, filename, comment).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "slack image upload failed, sending text only");
                self.post_message(comment).await
            }
        }
    }

    async fn upload(&self, image: Bytes, filename: &str, comment: &str) -> Result<(), NotifyError> {
        let length = image.len().to_string();
        let ticket: ApiResponse = self
            .http
            .post(self.endpoint("files.getUploadURLExternal"))
            .bearer_auth(&self.token)
            .form(&[("filename", filename), ("length", length.as_str())])
            .send()
            .await?
            .json()
            .await?;
        let ticket = ticket.into_result()?;
        let (Some(upload_url), Some(file_id)) = (ticket.upload_url, ticket.file_id) else {
            return Err(NotifyError::Api("missing upload_url or file_id".into()));
        };

        self.http
            .post(&upload_url)
            .body(image)
            .send()
            .await?
            .error_for_status()?;

        let comment = stamped(comment, Local::now());
        let response: ApiResponse = self
            .http
            .post(self.endpoint("files.completeUploadExternal"))
            .bearer_auth(&self.token)
            .json(&CompleteUpload {
                files: [UploadedFile {
                    id: &file_id,
                    title: "Motion capture",
                }],
                channel_id: &self.channel,
                initial_comment: &comment,
            })
            .send()
            .await?
            .json()
            .await?;
        response.into_result()?;
        debug!(file_id, filename, "slack image uploaded");
        Ok(())
    }

    /// Verify the token. Returns "<user>@<team>".
    pub async fn auth_test(&self) -> Result<String, NotifyError> {
        let response: ApiResponse = self
            .http
            .post(self.endpoint("auth.test"))
            .bearer_auth(&self.token)
            .send()
            .await?
            .json()
            .await?;
        let response = response.into_result()?;
        Ok(format!(
            "{}@{}",
            response.user.unwrap_or_default(),
            response.team.unwrap_or_default()
        ))
    }

    /// Post a lifecycle or stats message, logging instead of failing.
    pub async fn notify(&self, text: &str) {
        if let Err(e) = self.post_message(text).await {
            warn!(error = %e, "slack notification failed");
        }
    }
}

fn stamped(text: &str, now: DateTime<Local>) -> String {
    format!("[{}] {text}", now.format(MESSAGE_TS_FORMAT))
}

pub fn motion_alert_text(regions: &[Region]) -> String {
    let largest = regions.iter().map(|r| r.area).max().unwrap_or(0);
    format!(
        ":rotating_light: Motion detected\nRegions: {}\nLargest area: {largest} px",
        regions.len()
    )
}

pub fn startup_text(source: &str) -> String {
    format!(":large_green_circle: Motion detection started\nSource: {source}")
}

pub fn shutdown_text(stats: &StatsSnapshot) -> String {
    format!(
        ":red_circle: Motion detection stopped\nFrames: {}\nDetections: {}\nCaptures: {}\nDropped: {}",
        stats.frames, stats.detections, stats.captures, stats.dropped
    )
}

pub fn error_text(error: &str) -> String {
    format!(":warning: Motion detection failed\nError: {error}")
}

pub fn stats_text(stats: &StatsSnapshot) -> String {
    let last = stats
        .last_capture
        .map(|t| t.format(MESSAGE_TS_FORMAT).to_string())
        .unwrap_or_else(|| "never".into());
    format!(
        ":bar_chart: Motion statistics\n• Detections: {}\n• Captures: {}\n• Dropped: {}\n• Last capture: {last}",
        stats.detections, stats.captures, stats.dropped
    )
}
