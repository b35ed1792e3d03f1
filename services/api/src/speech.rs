//! Text-to-speech through ElevenLabs, plus the joke-speaking helper used by
//! the WebSocket orchestrator.

use std::pin::Pin;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::music::play_clip_locally;

const ELEVEN_LABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";

/// A stream of encoded audio chunks (mp3).
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesizes the whole clip and returns it in one buffer.
    async fn synthesize(&self, text: &str) -> Result<Bytes>;
    /// Starts synthesis and returns the audio as it is produced.
    async fn synthesize_stream(&self, text: &str) -> Result<AudioStream>;
}

pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
    model_id: String,
    base_url: String,
}

#[derive(Serialize)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

impl ElevenLabsSynthesizer {
    pub fn new(api_key: String, voice_id: String, model_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            voice_id,
            model_id,
            base_url: ELEVEN_LABS_BASE_URL.to_string(),
        }
    }

    fn endpoint(&self, streaming: bool) -> String {
        let suffix = if streaming { "/stream" } else { "" };
        format!(
            "{}/text-to-speech/{}{}",
            self.base_url, self.voice_id, suffix
        )
    }

    async fn post(&self, text: &str, streaming: bool) -> Result<reqwest::Response> {
        let request = ElevenLabsRequest {
            text,
            model_id: &self.model_id,
        };
        let response = self
            .client
            .post(self.endpoint(streaming))
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await
            .context("ElevenLabs request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("ElevenLabs TTS error {status}: {body}");
        }
        Ok(response)
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Bytes> {
        let response = self.post(text, false).await?;
        response
            .bytes()
            .await
            .context("Failed to read ElevenLabs audio body")
    }

    async fn synthesize_stream(&self, text: &str) -> Result<AudioStream> {
        let response = self.post(text, true).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.context("ElevenLabs audio stream interrupted"));
        Ok(Box::pin(stream))
    }
}

/// Synthesized speech, either whole or as a live stream.
pub enum SpeechOutput {
    Buffered(Bytes),
    Streamed(AudioStream),
}

impl std::fmt::Debug for SpeechOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeechOutput::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            SpeechOutput::Streamed(_) => write!(f, "Streamed"),
        }
    }
}

/// Turns a joke (or any canned line) into audio.
///
/// With `stream` set, a streaming synthesis is attempted first and the
/// buffered call is the fallback. When `local_player` is given, buffered audio
/// is also played on the server host. Returns `None` for empty text or when
/// every attempt fails.
pub async fn speak_joke(
    tts: &dyn SpeechSynthesizer,
    joke: &str,
    local_player: Option<&str>,
    stream: bool,
) -> Option<SpeechOutput> {
    let joke = joke.trim();
    if joke.is_empty() {
        return None;
    }

    if stream {
        match tts.synthesize_stream(joke).await {
            Ok(audio) => return Some(SpeechOutput::Streamed(audio)),
            Err(e) => warn!(error = %e, "Streaming TTS failed, falling back to buffered"),
        }
    }

    match tts.synthesize(joke).await {
        Ok(audio) if audio.is_empty() => {
            warn!("TTS returned an empty clip");
            None
        }
        Ok(audio) => {
            info!(bytes = audio.len(), "Synthesized speech");
            if let Some(command) = local_player {
                play_clip_locally(command, audio.clone());
            }
            Some(SpeechOutput::Buffered(audio))
        }
        Err(e) => {
            warn!(error = %e, "TTS failed");
            None
        }
    }
}
