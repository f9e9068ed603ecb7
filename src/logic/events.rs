//! Progress Channel - structured job events
//!
//! Newline-delimited JSON on an injected `EventSink`. Stages never talk to
//! stdout directly; they go through a `Reporter`, which also throttles
//! heartbeats and guarantees at most one terminal event per job.

use std::cell::Cell;
use std::io::Write;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use super::error::PipelineError;

// ============================================================================
// EVENT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Info,
    Warning,
    Success,
    Error,
}

/// One line on the progress channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress {
        progress: u8,
        message: String,
    },
    Message {
        message: String,
        message_type: MessageType,
    },
    Heartbeat {
        timestamp: String,
    },
    /// Terminal success. Carries both `"type":"success"` and `"success":true`.
    Success {
        success: bool,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stats: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        predictions: Option<serde_json::Value>,
        timestamp: String,
    },
    /// Terminal failure. Carries both `"type":"error"` and `"success":false`.
    Error {
        success: bool,
        error: String,
        message: String,
        kind: String,
        category: String,
        timestamp: String,
    },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Success { .. } | ProgressEvent::Error { .. })
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","success":false,"error":"event encoding failed: {}"}}"#, e)
        })
    }
}

// ============================================================================
// SINKS
// ============================================================================

/// Destination for progress events
pub trait EventSink {
    fn emit(&self, event: &ProgressEvent);
}

/// JSONL writer (stdout in production)
pub struct JsonLinesSink<W: Write> {
    writer: Mutex<W>,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: &ProgressEvent) {
        let line = event.to_jsonl();
        let mut writer = self.writer.lock();
        // A closed consumer must not take the job down with it
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            log::warn!("Progress channel write failed: {}", e);
        }
    }
}

/// Collects events in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProgressEvent>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn terminal_count(&self) -> usize {
        self.events.lock().iter().filter(|e| e.is_terminal()).count()
    }

    pub fn last(&self) -> Option<ProgressEvent> {
        self.events.lock().last().cloned()
    }
}

#[cfg(test)]
impl EventSink for MemorySink {
    fn emit(&self, event: &ProgressEvent) {
        self.events.lock().push(event.clone());
    }
}

// ============================================================================
// REPORTER
// ============================================================================

/// Per-job front end of the progress channel
pub struct Reporter<'a> {
    sink: &'a dyn EventSink,
    heartbeat_interval: Duration,
    last_beat: Cell<Instant>,
    terminal_sent: Cell<bool>,
}

impl<'a> Reporter<'a> {
    pub fn new(sink: &'a dyn EventSink, heartbeat_interval: Duration) -> Self {
        Self {
            sink,
            heartbeat_interval,
            last_beat: Cell::new(Instant::now()),
            terminal_sent: Cell::new(false),
        }
    }

    fn send(&self, event: ProgressEvent) {
        if self.terminal_sent.get() {
            log::warn!("Event after terminal event dropped: {:?}", event);
            return;
        }
        if event.is_terminal() {
            self.terminal_sent.set(true);
        }
        self.sink.emit(&event);
    }

    pub fn progress(&self, progress: u8, message: impl Into<String>) {
        let message = message.into();
        log::info!("Progress {}%: {}", progress.min(100), message);
        self.send(ProgressEvent::Progress {
            progress: progress.min(100),
            message,
        });
    }

    pub fn message(&self, message: impl Into<String>, message_type: MessageType) {
        let message = message.into();
        match message_type {
            MessageType::Warning => log::warn!("{}", message),
            MessageType::Error => log::error!("{}", message),
            MessageType::Info | MessageType::Success => log::info!("{}", message),
        }
        self.send(ProgressEvent::Message { message, message_type });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.message(message, MessageType::Info);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.message(message, MessageType::Warning);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.message(message, MessageType::Success);
    }

    /// Unconditional heartbeat
    pub fn heartbeat(&self) {
        self.last_beat.set(Instant::now());
        log::debug!("Heartbeat sent");
        self.send(ProgressEvent::Heartbeat {
            timestamp: Utc::now().to_rfc3339(),
        });
    }

    /// Heartbeat only when the interval has elapsed
    pub fn heartbeat_if_due(&self) {
        if self.last_beat.get().elapsed() >= self.heartbeat_interval {
            self.heartbeat();
        }
    }

    pub fn terminal_sent(&self) -> bool {
        self.terminal_sent.get()
    }

    /// Terminal success for a training job
    pub fn complete_training(&self, message: impl Into<String>, stats: serde_json::Value) {
        self.send(ProgressEvent::Success {
            success: true,
            message: message.into(),
            stats: Some(stats),
            predictions: None,
            timestamp: Utc::now().to_rfc3339(),
        });
    }

    /// Terminal success for an inference job
    pub fn complete_inference(&self, message: impl Into<String>, predictions: serde_json::Value) {
        self.send(ProgressEvent::Success {
            success: true,
            message: message.into(),
            stats: None,
            predictions: Some(predictions),
            timestamp: Utc::now().to_rfc3339(),
        });
    }

    /// Terminal failure
    pub fn fail(&self, error: &PipelineError) {
        let text = error.to_string();
        log::error!("Job failed [{}]: {}", error.kind(), text);
        self.send(ProgressEvent::Error {
            success: false,
            error: text.clone(),
            message: text,
            kind: error.kind().to_string(),
            category: error.category().as_str().to_string(),
            timestamp: Utc::now().to_rfc3339(),
        });
    }
}
