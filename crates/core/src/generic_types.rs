use chrono::{DateTime, Utc};
use serde::Serialize;

/// One transcript produced by a streaming ASR provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEvent {
    pub session_id: String,
    pub text: String,
    /// Interim hypothesis that may still change.
    pub is_partial: bool,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEvent {
    pub fn new(session_id: impl Into<String>, text: impl Into<String>, is_partial: bool) -> Self {
        Self {
            session_id: session_id.into(),
            text: text.into(),
            is_partial,
            timestamp: Utc::now(),
        }
    }
}

/// Events any streaming ASR provider can emit back to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum AsrEvent {
    Transcript(TranscriptEvent),
    /// A provider-side error. The connection may still be open.
    Error { session_id: String, message: String },
    /// The vendor connection for this session has ended.
    Closed { session_id: String },
}

impl AsrEvent {
    pub fn session_id(&self) -> &str {
        match self {
            AsrEvent::Transcript(event) => &event.session_id,
            AsrEvent::Error { session_id, .. } | AsrEvent::Closed { session_id } => session_id,
        }
    }
}
