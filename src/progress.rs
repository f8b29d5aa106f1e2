use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Resolve,
    Discover,
    Detect,
    Convert,
    Place,
    Manifest,
    Summary,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Resolve => "resolve",
            Phase::Discover => "discover",
            Phase::Detect => "detect",
            Phase::Convert => "convert",
            Phase::Place => "place",
            Phase::Manifest => "manifest",
            Phase::Summary => "summary",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub level: EventLevel,
    pub phase: Phase,
    pub file: Option<String>,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(level: EventLevel, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            level,
            phase,
            file: None,
            message: message.into(),
        }
    }

    pub fn debug(phase: Phase, message: impl Into<String>) -> Self {
        Self::new(EventLevel::Debug, phase, message)
    }

    pub fn info(phase: Phase, message: impl Into<String>) -> Self {
        Self::new(EventLevel::Info, phase, message)
    }

    pub fn warn(phase: Phase, message: impl Into<String>) -> Self {
        Self::new(EventLevel::Warn, phase, message)
    }

    pub fn error(phase: Phase, message: impl Into<String>) -> Self {
        Self::new(EventLevel::Error, phase, message)
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// Receives every decision the pipeline makes.
pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        let file = event.file.as_deref().unwrap_or("-");
        match event.level {
            EventLevel::Debug => {
                tracing::debug!(phase = %event.phase, file, "{}", event.message)
            }
            EventLevel::Info => tracing::info!(phase = %event.phase, file, "{}", event.message),
            EventLevel::Warn => tracing::warn!(phase = %event.phase, file, "{}", event.message),
            EventLevel::Error => {
                tracing::error!(phase = %event.phase, file, "{}", event.message)
            }
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}
