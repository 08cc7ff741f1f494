//! Person detection on top of a remote label-detection service.
//!
//! [`LabelDetector`] is the service boundary: image bytes in, ranked labels
//! out. [`HttpLabelDetector`] is the production binding and owns all retrying
//! of service flakiness. [`PersonClassifier`] turns the labels for one file
//! into a [`Verdict`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// A label reported by the detection service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Label {
    /// Label name, e.g. `Person`.
    pub name: String,
    /// Confidence as a percentage in `0.0..=100.0`.
    pub confidence: f32,
}

/// Errors returned by a [`LabelDetector`].
#[derive(Debug)]
pub enum DetectError {
    /// The request never produced a response (connect, timeout, body read).
    Transport(String),
    /// The service answered with a non-success status.
    Status { code: u16, body: String },
    /// The service answered 2xx with a body that could not be decoded.
    InvalidResponse(String),
    /// Every allowed attempt failed with a transient error.
    RetriesExhausted { attempts: u32, last: Box<DetectError> },
}

impl DetectError {
    /// Returns true if the same request may succeed when sent again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { code, .. } => *code == 429 || *code >= 500,
            Self::InvalidResponse(_) | Self::RetriesExhausted { .. } => false,
        }
    }
}

impl std::fmt::Display for DetectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "Detection request failed: {}", msg),
            Self::Status { code, body } => {
                write!(f, "Detection service returned {}: {}", code, body)
            }
            Self::InvalidResponse(msg) => {
                write!(f, "Invalid detection service response: {}", msg)
            }
            Self::RetriesExhausted { attempts, last } => {
                write!(f, "Gave up after {} attempts: {}", attempts, last)
            }
        }
    }
}

impl std::error::Error for DetectError {}

/// Returns labels for an image, most relevant first.
pub trait LabelDetector: Send + Sync {
    /// Detects at most `max_labels` labels with at least `min_confidence`.
    fn detect_labels(
        &self,
        image: &[u8],
        max_labels: usize,
        min_confidence: f32,
    ) -> Result<Vec<Label>, DetectError>;
}

impl<D: LabelDetector + ?Sized> LabelDetector for Arc<D> {
    fn detect_labels(
        &self,
        image: &[u8],
        max_labels: usize,
        min_confidence: f32,
    ) -> Result<Vec<Label>, DetectError> {
        (**self).detect_labels(image, max_labels, min_confidence)
    }
}

/// Backoff schedule for retrying transient detection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each failure.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// `op` receives the 1-based attempt number. `sleep` is called between
/// attempts with the backoff delay.
pub fn retry_with_backoff<T, F, S>(
    policy: &RetryPolicy,
    mut sleep: S,
    mut op: F,
) -> Result<T, DetectError>
where
    F: FnMut(u32) -> Result<T, DetectError>,
    S: FnMut(Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                return Err(DetectError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                debug!(
                    "Detection attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, max_attempts, e, delay
                );
                sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct DetectLabelsResponse {
    #[serde(default)]
    labels: Vec<Label>,
}

/// Label detector speaking JSON over HTTP.
///
/// Each call POSTs
/// `{"image": {"bytes": <base64>, "format": <mime>}, "max_labels": n, "min_confidence": c}`
/// and expects `{"labels": [{"name": "...", "confidence": 99.1}, ...]}`.
pub struct HttpLabelDetector {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpLabelDetector {
    /// Builds a detector with a per-request timeout.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, DetectError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            retry,
        })
    }

    fn send_once(&self, body: &serde_json::Value) -> Result<Vec<Label>, DetectError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|e| DetectError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DetectError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .map_err(|e| DetectError::Transport(e.to_string()))?;
        let parsed: DetectLabelsResponse = serde_json::from_str(&text)
            .map_err(|e| DetectError::InvalidResponse(e.to_string()))?;
        Ok(parsed.labels)
    }
}

impl LabelDetector for HttpLabelDetector {
    fn detect_labels(
        &self,
        image: &[u8],
        max_labels: usize,
        min_confidence: f32,
    ) -> Result<Vec<Label>, DetectError> {
        let format = infer::get(image).map(|kind| kind.mime_type());
        let body = json!({
            "image": {
                "bytes": BASE64.encode(image),
                "format": format,
            },
            "max_labels": max_labels,
            "min_confidence": min_confidence,
        });

        retry_with_backoff(&self.retry, thread::sleep, |_| self.send_once(&body))
    }
}

/// Outcome of classifying one image.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// A person label was reported.
    Person { label: String, confidence: f32 },
    /// No person label was reported.
    Nothing,
    /// The file could not be read because the producer still holds it.
    ReadConflict,
}

impl Verdict {
    /// Returns true only for [`Verdict::Person`].
    pub fn contains_person(&self) -> bool {
        matches!(self, Verdict::Person { .. })
    }
}

/// Errors that stop one file from being classified this cycle.
#[derive(Debug)]
pub enum ClassifyError {
    /// The image could not be read for a reason other than a write lock.
    Read { path: PathBuf, source: io::Error },
    /// The detection service failed after its own retries.
    Detect { path: PathBuf, source: DetectError },
}

impl std::fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "Failed to read {}: {}", path.display(), source)
            }
            Self::Detect { path, source } => {
                write!(f, "Failed to classify {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ClassifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Detect { source, .. } => Some(source),
        }
    }
}

/// Result type for classification.
pub type ClassifyResult<T> = Result<T, ClassifyError>;

/// Classifies an image file.
pub trait ImageClassifier: Send + Sync {
    /// Returns the verdict for the image at `path`.
    fn classify(&self, path: &Path) -> ClassifyResult<Verdict>;
}

impl<F> ImageClassifier for F
where
    F: Fn(&Path) -> ClassifyResult<Verdict> + Send + Sync,
{
    fn classify(&self, path: &Path) -> ClassifyResult<Verdict> {
        self(path)
    }
}

/// Label names treated as a person when none are configured.
pub const DEFAULT_PERSON_LABELS: [&str; 3] = ["Human", "People", "Person"];

/// Decides whether an image contains a person using a [`LabelDetector`].
pub struct PersonClassifier<D> {
    detector: D,
    max_labels: usize,
    min_confidence: f32,
    person_labels: Vec<String>,
}

impl<D: LabelDetector> PersonClassifier<D> {
    /// Creates a classifier with the default limits: 10 labels, 90% confidence.
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            max_labels: 10,
            min_confidence: 90.0,
            person_labels: DEFAULT_PERSON_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Sets how many top labels are requested and inspected.
    pub fn with_max_labels(mut self, max_labels: usize) -> Self {
        self.max_labels = max_labels;
        self
    }

    /// Sets the minimum confidence percentage for a label to count.
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Replaces the set of label names meaning "person".
    pub fn with_person_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.person_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Picks the first qualifying person label among the top labels.
    fn find_person<'a>(&self, labels: &'a [Label]) -> Option<&'a Label> {
        labels.iter().take(self.max_labels).find(|label| {
            label.confidence >= self.min_confidence
                && self
                    .person_labels
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(&label.name))
        })
    }
}

impl<D: LabelDetector> ImageClassifier for PersonClassifier<D> {
    fn classify(&self, path: &Path) -> ClassifyResult<Verdict> {
        let image = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if is_read_conflict(&e) => {
                error!("{} is still being written: {}", path.display(), e);
                return Ok(Verdict::ReadConflict);
            }
            Err(e) => {
                return Err(ClassifyError::Read {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        let labels = self
            .detector
            .detect_labels(&image, self.max_labels, self.min_confidence)
            .map_err(|e| ClassifyError::Detect {
                path: path.to_path_buf(),
                source: e,
            })?;

        match self.find_person(&labels) {
            Some(label) => {
                info!(
                    "{} detected with: {} confidence in {}",
                    label.name,
                    label.confidence,
                    path.display()
                );
                Ok(Verdict::Person {
                    label: label.name.clone(),
                    confidence: label.confidence,
                })
            }
            None => {
                if labels.is_empty() {
                    debug!("No labels found in {}", path.display());
                } else {
                    debug!(
                        "No person among {} labels in {}",
                        labels.len(),
                        path.display()
                    );
                }
                Ok(Verdict::Nothing)
            }
        }
    }
}

/// Returns true if a read failed because another process holds the file.
pub fn is_read_conflict(err: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION
    const WINDOWS_SHARING_VIOLATION: i32 = 32;
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    cfg!(windows) && err.raw_os_error() == Some(WINDOWS_SHARING_VIOLATION)
}
