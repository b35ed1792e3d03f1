//! API Models
//!
//! JSON bodies of the plain HTTP endpoints, documented with `utoipa`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct Greeting {
    #[schema(example = "Polly is alive and ready to roast!")]
    pub message: String,
    #[schema(example = "0.1.0")]
    pub version: String,
}

/// The process-wide assistant flags.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, Copy, PartialEq)]
pub struct StreamingStatus {
    pub streaming_enabled: bool,
    pub conversation_mode: bool,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct PollyStatus {
    #[schema(example = "online")]
    pub status: String,
    pub streaming_enabled: bool,
    pub conversation_mode: bool,
    pub active_sessions: usize,
    /// Sessions currently handed to an external voice call.
    pub active_calls: usize,
    pub music_playing: bool,
    pub tts_available: bool,
    pub vision_available: bool,
}

#[derive(Deserialize, ToSchema, Debug, Clone, Copy)]
pub struct CallStatusPayload {
    pub active: bool,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct CallStatus {
    #[schema(example = "kitchen-tablet")]
    pub session_id: String,
    pub call_active: bool,
    pub active_calls: usize,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
