//! Deepgram streaming speech-to-text over WebSocket.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use polly_core::generic_types::{AsrEvent, TranscriptEvent};
use serde::Deserialize;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    time::{Instant, MissedTickBehavior},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::{Transcriber, TranscriberHandle};
use crate::audio_utils::{self, SILENCE_FRAME_SAMPLES};

const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";
const KEEPALIVE_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const AUDIO_QUEUE_DEPTH: usize = 64;

type DgSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Query options for the listen endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DeepgramOptions {
    pub model: String,
    pub language: String,
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub interim_results: bool,
    pub smart_format: bool,
    pub vad_events: bool,
    pub utterance_end_ms: u32,
    pub endpointing: u32,
    pub no_delay: bool,
}

impl Default for DeepgramOptions {
    fn default() -> Self {
        Self {
            model: "nova-3".to_string(),
            language: "en-US".to_string(),
            encoding: "linear16".to_string(),
            sample_rate: audio_utils::CLIENT_PCM16_SAMPLE_RATE,
            channels: 1,
            interim_results: true,
            smart_format: true,
            vad_events: true,
            utterance_end_ms: 1000,
            endpointing: 300,
            no_delay: true,
        }
    }
}

impl DeepgramOptions {
    fn query(&self) -> String {
        format!(
            "model={}&language={}&encoding={}&sample_rate={}&channels={}\
             &interim_results={}&smart_format={}&vad_events={}\
             &utterance_end_ms={}&endpointing={}&no_delay={}",
            self.model,
            self.language,
            self.encoding,
            self.sample_rate,
            self.channels,
            self.interim_results,
            self.smart_format,
            self.vad_events,
            self.utterance_end_ms,
            self.endpointing,
            self.no_delay,
        )
    }

    pub fn url(&self) -> String {
        format!("{DEEPGRAM_LISTEN_URL}?{}", self.query())
    }
}

pub struct DeepgramTranscriber {
    api_key: String,
    options: DeepgramOptions,
    /// Idle time after which silence frames keep the connection alive.
    keepalive_after: Duration,
}

impl DeepgramTranscriber {
    pub fn new(api_key: String, options: DeepgramOptions, keepalive_after: Duration) -> Self {
        Self {
            api_key,
            options,
            keepalive_after,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    #[serde(rename = "type")]
    response_type: Option<String>,
    channel: Option<DeepgramChannel>,
    is_final: Option<bool>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Parses one Deepgram text frame. `Results` with a non-empty transcript
/// become transcripts; `Error` frames become error events; everything else
/// (metadata, VAD and utterance-end notices) is ignored.
fn parse_deepgram_message(session_id: &str, json_text: &str) -> Option<AsrEvent> {
    let response: DeepgramResponse = match serde_json::from_str(json_text) {
        Ok(r) => r,
        Err(e) => {
            debug!("Failed to parse Deepgram response: {}", e);
            return None;
        }
    };

    match response.response_type.as_deref() {
        Some("Results") => {
            let alt = response.channel?.alternatives.into_iter().next()?;
            let transcript = alt.transcript.trim();
            if transcript.is_empty() {
                return None;
            }
            let is_partial = !response.is_final.unwrap_or(false);
            Some(AsrEvent::Transcript(TranscriptEvent::new(
                session_id, transcript, is_partial,
            )))
        }
        Some("Error") => Some(AsrEvent::Error {
            session_id: session_id.to_string(),
            message: response
                .description
                .unwrap_or_else(|| "Deepgram reported an error".to_string()),
        }),
        _ => None,
    }
}

async fn send_close_stream(sink: &mut DgSink) {
    let close_msg = serde_json::json!({"type": "CloseStream"});
    if let Err(e) = sink.send(WsMessage::Text(close_msg.to_string().into())).await {
        debug!(error = %e, "Failed to send CloseStream");
    }
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    async fn open(
        &self,
        session_id: &str,
        events: mpsc::Sender<AsrEvent>,
    ) -> Result<TranscriberHandle> {
        let mut request = self.options.url().into_client_request()?;
        request
            .headers_mut()
            .insert("Authorization", format!("Token {}", self.api_key).parse()?);

        let (ws_stream, response) = connect_async(request)
            .await
            .context("Failed to connect to Deepgram WebSocket API")?;
        info!(session_id, status = %response.status(), "Connected to Deepgram");

        let (dg_tx, dg_rx) = ws_stream.split();
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        let (close_tx, close_rx) = oneshot::channel();

        let span = info_span!("deepgram", session_id);
        let task = tokio::spawn(
            run_connection(
                session_id.to_string(),
                dg_tx,
                dg_rx,
                audio_rx,
                close_rx,
                events,
                self.keepalive_after,
            )
            .instrument(span),
        );

        Ok(TranscriberHandle::new(
            session_id.to_string(),
            audio_tx,
            close_tx,
            task,
        ))
    }
}

/// Pumps audio to Deepgram and transcripts back until either side closes.
async fn run_connection(
    session_id: String,
    mut dg_tx: DgSink,
    mut dg_rx: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    mut audio_rx: mpsc::Receiver<Bytes>,
    mut close_rx: oneshot::Receiver<()>,
    events: mpsc::Sender<AsrEvent>,
    keepalive_after: Duration,
) {
    let mut keepalive = tokio::time::interval(KEEPALIVE_CHECK_INTERVAL);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_audio = Instant::now();
    let mut closing = false;

    loop {
        tokio::select! {
            audio = audio_rx.recv(), if !closing => match audio {
                Some(chunk) => {
                    if let Err(e) = dg_tx.send(WsMessage::Binary(chunk)).await {
                        error!(error = %e, "Failed to send audio to Deepgram");
                        break;
                    }
                    last_audio = Instant::now();
                }
                None => {
                    closing = true;
                    send_close_stream(&mut dg_tx).await;
                }
            },
            _ = &mut close_rx, if !closing => {
                closing = true;
                send_close_stream(&mut dg_tx).await;
            },
            _ = keepalive.tick(), if !closing => {
                if last_audio.elapsed() >= keepalive_after {
                    debug!("Sending keepalive silence");
                    let silence = audio_utils::silence_frame(SILENCE_FRAME_SAMPLES);
                    if let Err(e) = dg_tx.send(WsMessage::Binary(silence)).await {
                        warn!(error = %e, "Keepalive send failed");
                        break;
                    }
                }
            },
            msg = dg_rx.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Some(event) = parse_deepgram_message(&session_id, &text) {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(?frame, "Deepgram closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "Deepgram connection error");
                    let _ = events
                        .send(AsrEvent::Error {
                            session_id: session_id.clone(),
                            message: e.to_string(),
                        })
                        .await;
                    break;
                }
                None => break,
            },
        }
    }

    drop(audio_rx);
    let _ = events.send(AsrEvent::Closed { session_id }).await;
}
