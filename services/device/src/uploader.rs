//! Multipart upload of a single frame to the collection endpoint.
//!
//! One call to [`Uploader::upload`] is exactly one network attempt. Retrying
//! is the orchestrator's business.

use crate::accounting::AttemptOutcome;
use crate::config::UploadConfig;
use crate::durable_stage::DurableHandle;
use crate::frame::{hex_prefix, FrameFormat, ValidatedFrame};
use crate::link::LinkMonitor;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::ops::Range;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Fixed multipart boundary token.
pub const BOUNDARY: &str = "----CamlinkFormBoundary7MA4YWxkTrZu0gW";

/// Errors raised below the HTTP status level (no response received).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request failed: {0}")]
    Request(String),
}

/// A fully assembled upload request.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub url: String,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// What came back from the endpoint.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl TransportResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Sends an assembled request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: UploadRequest) -> Result<TransportResponse, TransportError>;
}

/// HTTP transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, max_redirects: usize) -> Result<Self, TransportError> {
        let redirect = if max_redirects == 0 {
            reqwest::redirect::Policy::none()
        } else {
            reqwest::redirect::Policy::limited(max_redirects)
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .redirect(redirect)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post(&self, request: UploadRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(reqwest::header::CONTENT_TYPE, &request.content_type);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(status, error = %e, "Response body unreadable");
                String::new()
            }
        };

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

impl ReqwestTransport {
    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// Multipart body holding one file part.
///
/// Header, image bytes and footer live in one buffer allocated once.
#[derive(Debug, Clone)]
pub struct MultipartPayload {
    body: Bytes,
    image: Range<usize>,
}

impl MultipartPayload {
    pub fn assemble(field: &str, filename: &str, part_content_type: &str, image: &[u8]) -> Self {
        let head = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n",
            boundary = BOUNDARY,
            field = field,
            filename = filename,
            content_type = part_content_type,
        );
        let tail = format!("\r\n--{}--\r\n", BOUNDARY);

        let mut body = BytesMut::with_capacity(head.len() + image.len() + tail.len());
        body.put_slice(head.as_bytes());
        body.put_slice(image);
        body.put_slice(tail.as_bytes());

        Self {
            body: body.freeze(),
            image: head.len()..head.len() + image.len(),
        }
    }

    /// Value for the request's Content-Type header.
    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={}", BOUNDARY)
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// The file part's bytes inside the body.
    pub fn image(&self) -> &[u8] {
        &self.body[self.image.clone()]
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }
}

/// JSON body returned by the endpoint on success.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadReceipt {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub bucket: Option<String>,
}

/// Where the upload reads its bytes from.
pub enum UploadSource {
    /// The in-memory buffer
    Memory(ValidatedFrame),
    /// The durable copy; the frame is kept as fallback if the copy is unreadable
    Durable {
        handle: DurableHandle,
        frame: ValidatedFrame,
    },
}

impl UploadSource {
    pub fn len(&self) -> usize {
        match self {
            UploadSource::Memory(frame) => frame.len(),
            UploadSource::Durable { frame, .. } => frame.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, UploadSource::Durable { .. })
    }

    fn format(&self) -> FrameFormat {
        match self {
            UploadSource::Memory(frame) => frame.format(),
            UploadSource::Durable { frame, .. } => frame.format(),
        }
    }

    /// Resolve to the bytes to send. The frame is released here.
    async fn into_bytes(self) -> Bytes {
        match self {
            UploadSource::Memory(frame) => frame.into_bytes(),
            UploadSource::Durable { handle, frame } => match handle.read().await {
                Ok(data) => data,
                Err(e) => {
                    warn!(
                        path = %handle.path.display(),
                        error = %e,
                        "Durable copy unreadable, uploading from memory"
                    );
                    frame.into_bytes()
                }
            },
        }
    }
}

/// Result of one upload attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Link not associated; nothing was sent
    Skipped,
    /// 2xx response
    Success {
        status: u16,
        body: String,
        receipt: Option<UploadReceipt>,
    },
    /// 3xx response left after redirect following
    Redirected {
        status: u16,
        location: Option<String>,
        headers: Vec<(String, String)>,
    },
    /// No response received
    RetryableFailure { error: String },
    /// Definite non-success response
    FatalFailure { status: u16, body: String },
}

impl UploadOutcome {
    /// HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadOutcome::Success { status, .. }
            | UploadOutcome::Redirected { status, .. }
            | UploadOutcome::FatalFailure { status, .. } => Some(*status),
            UploadOutcome::Skipped | UploadOutcome::RetryableFailure { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success { .. })
    }

    /// How the attempt counts in accounting. A skipped attempt does not count.
    pub fn attempt_outcome(&self) -> Option<AttemptOutcome> {
        match self {
            UploadOutcome::Skipped => None,
            UploadOutcome::Success { .. } => Some(AttemptOutcome::Success),
            UploadOutcome::RetryableFailure { .. } => Some(AttemptOutcome::RetryableFailure),
            UploadOutcome::Redirected { .. } | UploadOutcome::FatalFailure { .. } => {
                Some(AttemptOutcome::FatalFailure)
            }
        }
    }
}

/// Outcome plus timing of one attempt.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub outcome: UploadOutcome,
    /// Image bytes carried by the request
    pub bytes: usize,
    /// Full request body size
    pub request_bytes: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Uploader settings derived from configuration.
#[derive(Debug, Clone)]
pub struct UploaderSettings {
    pub url: String,
    pub field_name: String,
    pub filename: String,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
}

impl From<&UploadConfig> for UploaderSettings {
    fn from(config: &UploadConfig) -> Self {
        let mut headers: Vec<(String, String)> = config
            .extra_headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        headers.sort();
        if let Some(token) = &config.bearer_token {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }

        Self {
            url: config.url.clone(),
            field_name: config.field_name.clone(),
            filename: config.filename.clone(),
            timeout: config.timeout(),
            headers,
        }
    }
}

/// Classify a received response.
pub fn classify(response: TransportResponse) -> UploadOutcome {
    match response.status {
        200..=299 => {
            let receipt = serde_json::from_str::<UploadReceipt>(&response.body).ok();
            UploadOutcome::Success {
                status: response.status,
                body: response.body,
                receipt,
            }
        }
        300..=399 => UploadOutcome::Redirected {
            status: response.status,
            location: response.header("location").map(str::to_string),
            headers: response.headers,
        },
        0 => UploadOutcome::RetryableFailure {
            error: "no response status".to_string(),
        },
        status => UploadOutcome::FatalFailure {
            status,
            body: response.body,
        },
    }
}

/// Filename for the file part: the configured stem with the frame's extension.
///
/// The endpoint derives the stored type from the extension, so a PNG frame
/// must not go out as `image.jpg`.
pub fn part_filename(configured: &str, format: FrameFormat) -> String {
    let stem = Path::new(configured)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("image");
    format!("{}.{}", stem, format.extension())
}

/// Performs single upload attempts.
pub struct Uploader {
    settings: UploaderSettings,
    transport: Box<dyn Transport>,
    link: Box<dyn LinkMonitor>,
}

impl Uploader {
    pub fn new(
        settings: UploaderSettings,
        transport: Box<dyn Transport>,
        link: Box<dyn LinkMonitor>,
    ) -> Self {
        Self {
            settings,
            transport,
            link,
        }
    }

    /// Perform one upload attempt.
    #[instrument(skip(self, source), fields(bytes = source.len(), durable = source.is_durable()))]
    pub async fn upload(&self, source: UploadSource) -> UploadReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let bytes = source.len();

        if !self.link.is_associated().await {
            warn!(bytes, "Link not associated, skipping upload");
            return Self::report(UploadOutcome::Skipped, bytes, 0, started_at, start);
        }

        let format = source.format();
        let filename = part_filename(&self.settings.filename, format);
        let data = source.into_bytes().await;
        let payload = MultipartPayload::assemble(
            &self.settings.field_name,
            &filename,
            format.content_type(),
            &data,
        );
        drop(data);

        let request_bytes = payload.len();
        debug!(
            bytes,
            request_bytes,
            head = %hex_prefix(payload.image(), 4),
            url = %self.settings.url,
            "Sending upload request"
        );

        let request = UploadRequest {
            url: self.settings.url.clone(),
            content_type: MultipartPayload::content_type(),
            headers: self.settings.headers.clone(),
            body: payload.into_body(),
        };

        let outcome = match tokio::time::timeout(self.settings.timeout, self.transport.post(request))
            .await
        {
            Ok(Ok(response)) => Self::log_response(classify(response), bytes),
            Ok(Err(e)) => {
                warn!(bytes, error = %e, "Upload failed without response");
                UploadOutcome::RetryableFailure {
                    error: e.to_string(),
                }
            }
            Err(_) => {
                let e = TransportError::Timeout(self.settings.timeout);
                warn!(bytes, error = %e, "Upload timed out");
                UploadOutcome::RetryableFailure {
                    error: e.to_string(),
                }
            }
        };

        Self::report(outcome, bytes, request_bytes, started_at, start)
    }

    fn log_response(outcome: UploadOutcome, bytes: usize) -> UploadOutcome {
        match &outcome {
            UploadOutcome::Success {
                status, receipt, ..
            } => {
                info!(
                    status = *status,
                    bytes,
                    stored_as = receipt.as_ref().and_then(|r| r.filename.as_deref()),
                    "Upload succeeded"
                );
            }
            UploadOutcome::Redirected {
                status,
                location,
                headers,
            } => {
                warn!(
                    status = *status,
                    location = location.as_deref(),
                    headers = ?headers,
                    "Upload ended on a redirect"
                );
            }
            UploadOutcome::FatalFailure { status, body } => {
                error!(status = *status, bytes, body = %body, "Upload rejected");
            }
            UploadOutcome::Skipped | UploadOutcome::RetryableFailure { .. } => {}
        }
        outcome
    }

    fn report(
        outcome: UploadOutcome,
        bytes: usize,
        request_bytes: usize,
        started_at: DateTime<Utc>,
        start: Instant,
    ) -> UploadReport {
        UploadReport {
            outcome,
            bytes,
            request_bytes,
            started_at,
            ended_at: Utc::now(),
            duration: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameFormat};
    use crate::link::MockLinkMonitor;
    use crate::validator::FrameValidator;

    fn settings() -> UploaderSettings {
        UploaderSettings {
            url: "http://collector:8080/upload".to_string(),
            field_name: "file".to_string(),
            filename: "image.jpg".to_string(),
            timeout: Duration::from_secs(5),
            headers: vec![("ngrok-skip-browser-warning".to_string(), "true".to_string())],
        }
    }

    fn frame(len: usize) -> ValidatedFrame {
        let mut data = vec![0xA5u8; len];
        data[..4].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
        data[len - 2..].copy_from_slice(&[0xFF, 0xD9]);
        FrameValidator::default()
            .validate(Frame::new(data, 1600, 1200, FrameFormat::Jpeg))
            .unwrap()
    }

    fn link(up: bool) -> Box<MockLinkMonitor> {
        let mut link = MockLinkMonitor::new();
        link.expect_is_associated().return_const(up);
        Box::new(link)
    }

    fn response(status: u16, body: &str) -> TransportResponse {
        TransportResponse {
            status,
            headers: vec![],
            body: body.to_string(),
        }
    }

    #[test]
    fn test_payload_layout() {
        let image = [0xFFu8, 0xD8, 0x00, 0x0D, 0x0A, 0xFF, 0xD9];
        let payload = MultipartPayload::assemble("file", "image.jpg", "image/jpeg", &image);
        let body = payload.clone().into_body();

        let head = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"image.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n",
            BOUNDARY
        );
        let tail = format!("\r\n--{}--\r\n", BOUNDARY);

        assert!(body.starts_with(head.as_bytes()));
        assert!(body.ends_with(tail.as_bytes()));
        assert_eq!(payload.len(), head.len() + image.len() + tail.len());
        assert_eq!(payload.image(), &image);
    }

    #[test]
    fn test_content_type_carries_boundary() {
        assert_eq!(
            MultipartPayload::content_type(),
            format!("multipart/form-data; boundary={}", BOUNDARY)
        );
    }

    #[test]
    fn test_classify_statuses() {
        assert!(matches!(
            classify(response(200, r#"{"success":true}"#)),
            UploadOutcome::Success { status: 200, receipt: Some(UploadReceipt { success: true, .. }), .. }
        ));
        assert!(matches!(
            classify(response(201, "not json")),
            UploadOutcome::Success { receipt: None, .. }
        ));
        assert!(matches!(
            classify(response(400, "File must be an image")),
            UploadOutcome::FatalFailure { status: 400, .. }
        ));
        assert!(matches!(
            classify(response(503, "")),
            UploadOutcome::FatalFailure { status: 503, .. }
        ));

        let headers = vec![
            ("Location".to_string(), "https://elsewhere/upload".to_string()),
            ("x-trace-id".to_string(), "abc123".to_string()),
            ("set-cookie".to_string(), "session=1".to_string()),
        ];
        let mut redirect = response(302, "moved");
        redirect.headers = headers.clone();
        assert_eq!(
            classify(redirect),
            UploadOutcome::Redirected {
                status: 302,
                location: Some("https://elsewhere/upload".to_string()),
                headers,
            }
        );
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = UploadConfig {
            url: "https://collector/upload".to_string(),
            field_name: "file".to_string(),
            filename: "image.jpg".to_string(),
            timeout_secs: 20,
            max_redirects: 5,
            bearer_token: Some("secret".to_string()),
            extra_headers: Default::default(),
        };
        config
            .extra_headers
            .insert("ngrok-skip-browser-warning".to_string(), "true".to_string());

        let settings = UploaderSettings::from(&config);
        assert_eq!(settings.timeout, Duration::from_secs(20));
        assert!(settings
            .headers
            .contains(&("Authorization".to_string(), "Bearer secret".to_string())));
        assert_eq!(settings.headers.len(), 2);
    }

    #[tokio::test]
    async fn test_link_down_skips_without_sending() {
        let mut transport = MockTransport::new();
        transport.expect_post().never();

        let uploader = Uploader::new(settings(), Box::new(transport), link(false));
        let report = uploader.upload(UploadSource::Memory(frame(5000))).await;

        assert_eq!(report.outcome, UploadOutcome::Skipped);
        assert_eq!(report.request_bytes, 0);
    }

    #[tokio::test]
    async fn test_successful_upload_sends_frame_verbatim() {
        let frame = frame(5000);
        let expected = MultipartPayload::assemble("file", "image.jpg", "image/jpeg", frame.data())
            .into_body();

        let mut transport = MockTransport::new();
        transport
            .expect_post()
            .times(1)
            .withf(move |request| {
                request.body == expected
                    && request.content_type == MultipartPayload::content_type()
                    && request
                        .headers
                        .iter()
                        .any(|(name, _)| name == "ngrok-skip-browser-warning")
            })
            .returning(|_| Ok(response(200, r#"{"success":true,"filename":"x.jpg","size":5000}"#)));

        let uploader = Uploader::new(settings(), Box::new(transport), link(true));
        let report = uploader.upload(UploadSource::Memory(frame)).await;

        assert!(report.outcome.is_success());
        assert_eq!(report.bytes, 5000);
        assert!(report.request_bytes > 5000);
        assert!(report.ended_at >= report.started_at);
    }

    #[tokio::test]
    async fn test_connection_error_is_retryable() {
        let mut transport = MockTransport::new();
        transport
            .expect_post()
            .times(1)
            .returning(|_| Err(TransportError::Connect("connection refused".to_string())));

        let uploader = Uploader::new(settings(), Box::new(transport), link(true));
        let report = uploader.upload(UploadSource::Memory(frame(2000))).await;

        assert!(matches!(
            report.outcome,
            UploadOutcome::RetryableFailure { ref error } if error.contains("connection refused")
        ));
        assert_eq!(report.outcome.status(), None);
    }

    #[tokio::test]
    async fn test_error_status_is_fatal() {
        let mut transport = MockTransport::new();
        transport
            .expect_post()
            .times(1)
            .returning(|_| Ok(response(500, "Failed to upload file to storage")));

        let uploader = Uploader::new(settings(), Box::new(transport), link(true));
        let report = uploader.upload(UploadSource::Memory(frame(2000))).await;

        assert_eq!(report.outcome.status(), Some(500));
        assert!(matches!(report.outcome, UploadOutcome::FatalFailure { .. }));
    }

    #[tokio::test]
    async fn test_durable_source_falls_back_to_memory() {
        let frame = frame(3000);
        let expected = MultipartPayload::assemble("file", "image.jpg", "image/jpeg", frame.data())
            .into_body();

        let mut transport = MockTransport::new();
        transport
            .expect_post()
            .times(1)
            .withf(move |request| request.body == expected)
            .returning(|_| Ok(response(200, "{}")));

        let handle = DurableHandle {
            path: "/nonexistent/images/img_000001_1.jpg".into(),
            size: 3000,
        };
        let uploader = Uploader::new(settings(), Box::new(transport), link(true));
        let report = uploader
            .upload(UploadSource::Durable { handle, frame })
            .await;

        assert!(report.outcome.is_success());
    }

    #[test]
    fn test_part_filename_follows_frame_format() {
        assert_eq!(part_filename("image.jpg", FrameFormat::Jpeg), "image.jpg");
        assert_eq!(part_filename("image.jpg", FrameFormat::Png), "image.png");
        assert_eq!(part_filename("cam-north", FrameFormat::Png), "cam-north.png");
        assert_eq!(part_filename("", FrameFormat::Jpeg), "image.jpg");
    }

    #[tokio::test]
    async fn test_png_frame_sent_with_png_filename() {
        let mut data = vec![0x5Au8; 3000];
        data[..8].copy_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        let frame = FrameValidator::default()
            .validate(Frame::new(data, 640, 480, FrameFormat::Png))
            .unwrap();
        let expected = MultipartPayload::assemble("file", "image.png", "image/png", frame.data())
            .into_body();

        let mut transport = MockTransport::new();
        transport
            .expect_post()
            .times(1)
            .withf(move |request| request.body == expected)
            .returning(|_| Ok(response(200, "{}")));

        let uploader = Uploader::new(settings(), Box::new(transport), link(true));
        let report = uploader.upload(UploadSource::Memory(frame)).await;

        assert!(report.outcome.is_success());
    }

    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn post(&self, _request: UploadRequest) -> Result<TransportResponse, TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stuck_upload_times_out_as_retryable() {
        let mut settings = settings();
        settings.timeout = Duration::from_millis(50);

        let uploader = Uploader::new(settings, Box::new(HangingTransport), link(true));
        let report = uploader.upload(UploadSource::Memory(frame(2000))).await;

        assert!(matches!(
            report.outcome,
            UploadOutcome::RetryableFailure { ref error } if error.contains("timed out")
        ));
        assert!(report.duration >= Duration::from_millis(50));

        let mut accounting = crate::accounting::Accounting::new();
        let outcome = report.outcome.attempt_outcome().unwrap();
        accounting.record(outcome, report.duration, report.bytes);
        assert_eq!(accounting.attempts(), 1);
        assert_eq!(accounting.failures(), 1);
        assert_eq!(accounting.successes(), 0);
    }
}
