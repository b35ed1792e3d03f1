//! Defines the WebSocket message protocol between the client and the API server.

use chrono::{DateTime, Utc};
use polly_core::{
    expression::ExpressionResult,
    joke::{JokeData, JokeExpression},
    music::MusicRequest,
    phrase_gate::PhraseKind,
};
use serde::{Deserialize, Serialize};

/// Messages sent from the client to the server. Every message names the
/// session it belongs to; sessions are created implicitly on first use.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SessionStart {
        session_id: String,
    },
    /// Base64 PCM16 mono 16 kHz audio.
    AudioChunk {
        session_id: String,
        audio_data: String,
        #[serde(default)]
        timestamp: Option<serde_json::Value>,
    },
    /// Base64 JPEG frame for expression analysis.
    VideoFrame {
        session_id: String,
        frame_data: String,
        #[serde(default)]
        timestamp: Option<serde_json::Value>,
    },
    /// Typed text, handled like a final transcript.
    TextMessage {
        session_id: String,
        content: String,
    },
    /// Pauses or resumes forwarding audio for this session.
    SetListening {
        session_id: String,
        listening: bool,
    },
    /// Marks the session as carried by an external voice call; Polly stops
    /// speaking to it until the call ends.
    SetCallActive {
        session_id: String,
        active: bool,
    },
    SessionEnd {
        session_id: String,
    },
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Outcome of a music request.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MusicOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Line spoken before playback starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joke_message: Option<String>,
    pub request: MusicRequest,
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionStarted {
        session_id: String,
        message: String,
    },
    Transcription {
        session_id: String,
        text: String,
        is_partial: bool,
        #[serde(skip_serializing_if = "is_false")]
        streaming_disabled: bool,
        #[serde(skip_serializing_if = "is_false")]
        audio_busy: bool,
        timestamp: DateTime<Utc>,
    },
    SleeperPhrase {
        session_id: String,
        text: String,
        sassy_response: String,
        phrase_type: PhraseKind,
        streaming_enabled: bool,
        conversation_mode: bool,
    },
    JokeResponse {
        session_id: String,
        joke: String,
        joke_type: String,
        confidence: f32,
        original_text: String,
        reasoning: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        expression_data: Option<JokeExpression>,
    },
    /// A whole mp3 clip, base64 encoded.
    JokeAudio {
        session_id: String,
        audio_data: String,
    },
    JokeAudioChunk {
        session_id: String,
        chunk_data: String,
        chunk_index: usize,
    },
    JokeAudioEnd {
        session_id: String,
        total_chunks: usize,
    },
    MusicResponse {
        session_id: String,
        #[serde(flatten)]
        outcome: MusicOutcome,
    },
    ExpressionResult {
        session_id: String,
        #[serde(flatten)]
        result: ExpressionResult,
    },
    SessionEnded {
        session_id: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn transcription(session_id: &str, text: &str, is_partial: bool) -> Self {
        ServerMessage::Transcription {
            session_id: session_id.to_string(),
            text: text.to_string(),
            is_partial,
            streaming_disabled: false,
            audio_busy: false,
            timestamp: Utc::now(),
        }
    }

    pub fn joke(session_id: &str, joke: JokeData) -> Self {
        ServerMessage::JokeResponse {
            session_id: session_id.to_string(),
            joke: joke.joke_response,
            joke_type: joke.joke_type,
            confidence: joke.confidence,
            original_text: joke.original_text,
            reasoning: joke.reasoning,
            expression_data: joke.expression,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
