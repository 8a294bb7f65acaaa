//! Events reported by the native engine through its callback.
//!
//! The native side identifies events by an integer code and attaches a
//! string payload. Known codes get typed payloads here; anything else stays
//! available as the raw string.
//!
//! | Code | Kind | Payload |
//! |------|------|---------|
//! | 0 | [`EventKind::Frame`] | `flushedFrame=<u64>, dt=<f32>` |
//! | 1 | [`EventKind::Error`] | free-form message |
//! | 2 | [`EventKind::Profiler`] | JSON, see [`ProfilerReport`] |
//! | 99 | [`EventKind::Test`] | the message passed to the test entry point |

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// Classification of a native event code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The engine flushed a frame.
    Frame,
    /// The engine reported an error message.
    Error,
    /// A profiler capture.
    Profiler,
    /// Echo of the test-event entry point.
    Test,
    /// A code this crate does not know about.
    Other(i32),
}

impl EventKind {
    /// Classify a raw event code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Frame,
            1 => Self::Error,
            2 => Self::Profiler,
            99 => Self::Test,
            other => Self::Other(other),
        }
    }

    /// The raw event code.
    pub fn code(self) -> i32 {
        match self {
            Self::Frame => 0,
            Self::Error => 1,
            Self::Profiler => 2,
            Self::Test => 99,
            Self::Other(code) => code,
        }
    }
}

// ---------------------------------------------------------------------------
// NativeEvent
// ---------------------------------------------------------------------------

/// One event as delivered by the native callback, already copied to host
/// memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeEvent {
    /// Raw event code.
    pub event_type: i32,
    /// Payload string (may be empty).
    pub payload: String,
    /// Opaque tag supplied when the callback was registered.
    pub user_data: usize,
}

impl NativeEvent {
    /// Classified event code.
    pub fn kind(&self) -> EventKind {
        EventKind::from_code(self.event_type)
    }

    /// Decode the payload according to the event kind.
    ///
    /// Payloads that do not parse fall back to [`EventPayload::Raw`].
    pub fn parse(&self) -> EventPayload {
        match self.kind() {
            EventKind::Frame => match self.payload.parse::<FrameReport>() {
                Ok(report) => EventPayload::Frame(report),
                Err(e) => {
                    tracing::debug!(error = %e, "unparseable frame event payload");
                    EventPayload::Raw(self.payload.clone())
                }
            },
            EventKind::Profiler => match serde_json::from_str::<ProfilerReport>(&self.payload) {
                Ok(report) => EventPayload::Profiler(report),
                Err(e) => {
                    tracing::debug!(error = %e, "unparseable profiler event payload");
                    EventPayload::Raw(self.payload.clone())
                }
            },
            EventKind::Error => EventPayload::Error(self.payload.clone()),
            EventKind::Test => EventPayload::Test(self.payload.clone()),
            EventKind::Other(_) => EventPayload::Raw(self.payload.clone()),
        }
    }
}

/// Typed view of an event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Frame flush notification.
    Frame(FrameReport),
    /// Profiler capture.
    Profiler(ProfilerReport),
    /// Error message.
    Error(String),
    /// Test event message.
    Test(String),
    /// Anything that did not decode.
    Raw(String),
}

// ---------------------------------------------------------------------------
// FrameReport
// ---------------------------------------------------------------------------

/// Payload of a frame event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    /// Native frame counter after the flush.
    pub flushed_frame: u64,
    /// Time step passed to the global step call.
    pub dt: f32,
}

/// Failure to decode a [`FrameReport`].
#[derive(Debug, thiserror::Error)]
#[error("malformed frame payload {payload:?}")]
pub struct FramePayloadError {
    payload: String,
}

impl FromStr for FrameReport {
    type Err = FramePayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || FramePayloadError {
            payload: s.to_owned(),
        };
        let mut flushed_frame = None;
        let mut dt = None;
        for part in s.split(',') {
            let (key, value) = part.trim().split_once('=').ok_or_else(malformed)?;
            match key.trim() {
                "flushedFrame" => flushed_frame = value.trim().parse().ok(),
                "dt" => dt = value.trim().parse().ok(),
                _ => {}
            }
        }
        Ok(Self {
            flushed_frame: flushed_frame.ok_or_else(malformed)?,
            dt: dt.ok_or_else(malformed)?,
        })
    }
}

impl std::fmt::Display for FrameReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "flushedFrame={}, dt={:.6}", self.flushed_frame, self.dt)
    }
}

// ---------------------------------------------------------------------------
// ProfilerReport
// ---------------------------------------------------------------------------

/// Payload of a profiler event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilerReport {
    /// Capture identifier assigned by the native profiler.
    pub capture_id: u64,
    /// Timed sections in capture order.
    #[serde(default)]
    pub entries: Vec<ProfilerEntry>,
}

/// One timed section of a profiler capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilerEntry {
    /// Section label.
    #[serde(default)]
    pub label: String,
    /// CPU time in milliseconds.
    pub cpu_ms: f64,
    /// GPU time in milliseconds.
    pub gpu_ms: f64,
}

impl ProfilerReport {
    /// Sum of GPU time across entries.
    pub fn total_gpu_ms(&self) -> f64 {
        self.entries.iter().map(|e| e.gpu_ms).sum()
    }

    /// Sum of CPU time across entries.
    pub fn total_cpu_ms(&self) -> f64 {
        self.entries.iter().map(|e| e.cpu_ms).sum()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Consumer of native events, run on the draining context.
pub type EventHandler = Arc<dyn Fn(&NativeEvent) -> anyhow::Result<()> + Send + Sync>;

/// The handler used when none is supplied: log every event.
pub fn log_event(event: &NativeEvent) -> anyhow::Result<()> {
    match event.parse() {
        EventPayload::Frame(report) => {
            tracing::trace!(
                flushed_frame = report.flushed_frame,
                dt = report.dt,
                "native frame flushed"
            );
        }
        EventPayload::Profiler(report) => {
            tracing::debug!(
                capture_id = report.capture_id,
                entries = report.entries.len(),
                cpu_ms = report.total_cpu_ms(),
                gpu_ms = report.total_gpu_ms(),
                "native profiler capture"
            );
        }
        EventPayload::Error(message) => {
            tracing::warn!(source = "native", "{message}");
        }
        EventPayload::Test(message) => {
            tracing::info!(source = "native", "test event: {message}");
        }
        EventPayload::Raw(payload) => {
            tracing::info!(source = "native", event_type = event.event_type, "{payload}");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
