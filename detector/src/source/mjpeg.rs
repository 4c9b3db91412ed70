use std::pin::Pin;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Local;
use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use super::{decode_frame, AcquisitionError, FrameSource, ReadError};
use crate::motion::Frame;

const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SNAPSHOT_RETRY: Duration = Duration::from_secs(1);

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of part headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` bodies.
pub struct MjpegParser {
    boundary: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    /// Offset from which to resume scanning for the next boundary.
    scan_from: usize,
}

impl MjpegParser {
    pub fn new(boundary: &str) -> Self {
        let boundary = boundary.trim_start_matches("--");
        Self {
            boundary: format!("--{boundary}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            scan_from: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete JPEG part, if the buffer holds one.
    pub fn next_part(&mut self) -> Option<Vec<u8>> {
        let marker_len = self.boundary.len();
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.boundary) {
                        let _ = self.buffer.split_to(pos + marker_len);
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans chunks.
                        if self.buffer.len() > marker_len {
                            let _ = self.buffer.split_to(self.buffer.len() - marker_len);
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    let pos = find_subsequence(&self.buffer, HEADER_END)?;
                    let _ = self.buffer.split_to(pos + HEADER_END.len());
                    self.scan_from = 0;
                    self.state = ParseState::CollectingJpeg;
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.scan_from..], &self.boundary)
                    else {
                        self.scan_from = self.buffer.len().saturating_sub(marker_len);
                        return None;
                    };
                    let part_end = self.scan_from + pos;
                    // Strip the CRLF that precedes the boundary.
                    let end = if part_end >= 2 && &self.buffer[part_end - 2..part_end] == b"\r\n" {
                        part_end - 2
                    } else {
                        part_end
                    };
                    let part = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(part_end + marker_len);
                    self.state = ParseState::SeekingHeaderEnd;
                    if !part.is_empty() {
                        return Some(part);
                    }
                }
            }
        }
    }
}

/// Boundary parameter of a multipart content type, if any.
fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.eq_ignore_ascii_case("boundary")
            .then(|| value.trim_matches('"').to_string())
    })
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
}

/// Continuous MJPEG stream over HTTP.
pub struct MjpegSource {
    url: String,
    stream: Option<ByteStream>,
    parser: MjpegParser,
    frames: u64,
}

impl MjpegSource {
    pub fn new(url: String) -> Self {
        Self {
            url,
            stream: None,
            parser: MjpegParser::new(DEFAULT_BOUNDARY),
            frames: 0,
        }
    }
}

impl FrameSource for MjpegSource {
    async fn open(&mut self) -> Result<(), AcquisitionError> {
        info!(url = self.url, "connecting to MJPEG stream");
        let client = http_client().map_err(AcquisitionError::Http)?;
        let response = client
            .get(&self.url)
            .send()
            .await
            .map_err(AcquisitionError::Http)?;
        if !response.status().is_success() {
            return Err(AcquisitionError::Status(response.status().as_u16()));
        }

        let boundary = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(boundary_from_content_type)
            .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
        info!(status = %response.status(), boundary, "connected to MJPEG stream");

        self.parser = MjpegParser::new(&boundary);
        self.stream = Some(response.bytes_stream().boxed());
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<Frame>, ReadError> {
        let stream = self.stream.as_mut().ok_or(ReadError::NotOpen)?;
        loop {
            while let Some(jpeg) = self.parser.next_part() {
                match decode_frame(&jpeg, Local::now()) {
                    Ok(frame) => {
                        self.frames += 1;
                        debug!(seq = self.frames, bytes = jpeg.len(), "MJPEG frame received");
                        return Ok(Some(frame));
                    }
                    Err(e) => warn!(error = %e, bytes = jpeg.len(), "undecodable MJPEG part, skipping"),
                }
            }
            match stream.next().await {
                Some(Ok(chunk)) => self.parser.push(&chunk),
                Some(Err(e)) => return Err(ReadError::Http(e)),
                None => {
                    info!(frames = self.frames, "MJPEG stream ended");
                    return Ok(None);
                }
            }
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(url = self.url, "MJPEG stream closed");
        }
    }

    fn describe(&self) -> String {
        format!("mjpeg {}", self.url)
    }
}

/// Single-frame polling fallback for cameras without a stream endpoint.
pub struct PollingSource {
    url: String,
    interval: Duration,
    client: Option<reqwest::Client>,
    next_due: Option<tokio::time::Instant>,
}

impl PollingSource {
    pub fn new(url: String, interval: Duration) -> Self {
        Self {
            url,
            interval,
            client: None,
            next_due: None,
        }
    }
}

impl FrameSource for PollingSource {
    async fn open(&mut self) -> Result<(), AcquisitionError> {
        let client = http_client().map_err(AcquisitionError::Http)?;
        let response = client
            .get(&self.url)
            .send()
            .await
            .map_err(AcquisitionError::Http)?;
        if !response.status().is_success() {
            return Err(AcquisitionError::Status(response.status().as_u16()));
        }
        info!(url = self.url, interval = ?self.interval, "camera snapshot endpoint reachable");
        self.client = Some(client);
        self.next_due = Some(tokio::time::Instant::now());
        Ok(())
    }

    async fn pace(&mut self) {
        if let Some(due) = self.next_due {
            tokio::time::sleep_until(due).await;
        }
    }

    async fn read(&mut self) -> Result<Option<Frame>, ReadError> {
        let client = self.client.as_ref().ok_or(ReadError::NotOpen)?;
        loop {
            self.next_due = Some(tokio::time::Instant::now() + self.interval);

            let response = client.get(&self.url).send().await.map_err(ReadError::Http)?;
            if !response.status().is_success() {
                return Err(ReadError::Status(response.status().as_u16()));
            }
            let body = response.bytes().await.map_err(ReadError::Http)?;
            match decode_frame(&body, Local::now()) {
                Ok(frame) => return Ok(Some(frame)),
                // A bad snapshot is not a dead camera; try again shortly.
                Err(e) => {
                    warn!(error = %e, bytes = body.len(), "undecodable snapshot, retrying");
                    tokio::time::sleep(self.interval.min(SNAPSHOT_RETRY)).await;
                }
            }
        }
    }

    fn close(&mut self) {
        self.client = None;
        self.next_due = None;
    }

    fn describe(&self) -> String {
        format!("polling {} every {:?}", self.url, self.interval)
    }
}
