//! Polly API Library Crate
//!
//! The web service around `polly-core`: configuration, application state,
//! vendor adapters (ASR, TTS, vision, music), the HTTP status handlers and the
//! WebSocket orchestrator. The `api` binary is a thin wrapper around this library.

pub mod audio_utils;
pub mod config;
pub mod handlers;
pub mod models;
pub mod music;
pub mod registry;
pub mod router;
pub mod speech;
pub mod state;
pub mod vision;
pub mod ws;
