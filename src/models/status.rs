use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

pub const READY_TEXT: &str = "Waiting for QR code...";

/// Display state of the reader, rendered by the HUD and exposed over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Idle,
    Scanning,
    Busy,
    Success,
    Failed,
    TimedOut,
    Invalid,
}

impl Severity {
    /// RGB colour used by renderers for this state.
    pub fn color_rgb(&self) -> (u8, u8, u8) {
        match self {
            Severity::Idle | Severity::Success => (0, 255, 0),
            Severity::Scanning => (255, 200, 0),
            Severity::Busy => (0, 200, 255),
            Severity::Failed | Severity::TimedOut | Severity::Invalid => (255, 0, 0),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Severity::Failed | Severity::TimedOut | Severity::Invalid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Idle => "IDLE",
            Severity::Scanning => "SCANNING",
            Severity::Busy => "BUSY",
            Severity::Success => "SUCCESS",
            Severity::Failed => "FAILED",
            Severity::TimedOut => "TIMED_OUT",
            Severity::Invalid => "INVALID",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide reader state.
///
/// Field groups have a single writer each: `status_text`, `severity` and
/// `is_processing` belong to the job dispatcher (the frame loop may only post
/// display hints while nothing is in flight), `last_url` and
/// `last_accept_time` belong to the debounce gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub status_text: String,
    pub severity: Severity,
    pub is_processing: bool,
    pub last_url: String,
    /// Monotonic time of the last acceptance, measured from gate creation.
    pub last_accept_time: Duration,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            status_text: READY_TEXT.to_string(),
            severity: Severity::Idle,
            is_processing: false,
            last_url: String::new(),
            last_accept_time: Duration::ZERO,
        }
    }
}

/// A display transition, published every time text or severity changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub severity: Severity,
    pub status_text: String,
    pub is_processing: bool,
}

/// Cloneable handle to the single `PipelineStatus` record.
#[derive(Clone)]
pub struct SharedStatus {
    inner: Arc<RwLock<PipelineStatus>>,
    events: broadcast::Sender<StatusEvent>,
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStatus {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(RwLock::new(PipelineStatus::default())),
            events,
        }
    }

    /// Consistent copy of every field.
    pub fn snapshot(&self) -> PipelineStatus {
        self.inner.read().clone()
    }

    pub fn severity(&self) -> Severity {
        self.inner.read().severity
    }

    pub fn is_processing(&self) -> bool {
        self.inner.read().is_processing
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Frame-loop hint (SCANNING, INVALID, back to IDLE). Ignored while a
    /// dispatch is outstanding so it never masks the job's own states.
    pub(crate) fn show_hint(&self, severity: Severity, text: &str) -> bool {
        let mut status = self.inner.write();
        if status.is_processing {
            return false;
        }
        self.apply(&mut status, severity, text, false)
    }

    pub(crate) fn begin_processing(&self, text: &str) {
        let mut status = self.inner.write();
        self.apply(&mut status, Severity::Busy, text, true);
    }

    /// Job outcome; the record stays `is_processing` until `reset_idle`.
    pub(crate) fn finish(&self, severity: Severity, text: &str) {
        let mut status = self.inner.write();
        self.apply(&mut status, severity, text, true);
    }

    pub(crate) fn reset_idle(&self) {
        let mut status = self.inner.write();
        self.apply(&mut status, Severity::Idle, READY_TEXT, false);
    }

    /// Runs `f` against the acceptance fields under the write lock, so check
    /// and update happen as one step.
    pub(crate) fn with_acceptance<R>(&self, f: impl FnOnce(&mut String, &mut Duration) -> R) -> R {
        let mut status = self.inner.write();
        let PipelineStatus {
            last_url,
            last_accept_time,
            ..
        } = &mut *status;
        f(last_url, last_accept_time)
    }

    fn apply(
        &self,
        status: &mut PipelineStatus,
        severity: Severity,
        text: &str,
        is_processing: bool,
    ) -> bool {
        if status.severity == severity
            && status.status_text == text
            && status.is_processing == is_processing
        {
            return false;
        }

        status.severity = severity;
        status.status_text = text.to_string();
        status.is_processing = is_processing;

        debug!("📟 Status -> {} ({})", severity, text);
        // No subscribers is fine, renderers may poll snapshots instead.
        let _ = self.events.send(StatusEvent {
            severity,
            status_text: text.to_string(),
            is_processing,
        });
        true
    }
}
