//! Manages the WebSocket connection lifecycle for the audio and text sockets.
//!
//! One connection may carry several client sessions. Each audio session owns a
//! vendor ASR connection; its transcripts come back on a single per-connection
//! channel and are routed from the same `select!` loop that reads the socket.
//!
//! A session whose ASR connection could not be opened stays failed, and its
//! audio is dropped until the client sends a fresh `session_start`.

use super::{
    cycle::handle_final_transcript,
    protocol::{ClientMessage, ServerMessage},
    provider::TranscriberHandle,
};
use crate::{audio_utils, registry::OwnerId, state::AppState};
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use chrono::Utc;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use polly_core::{AsrEvent, expression::ExpressionResult};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, instrument, warn};

const OUTBOUND_QUEUE_DEPTH: usize = 64;
const ASR_EVENT_QUEUE_DEPTH: usize = 64;

/// Which socket the client connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// `/ws/audio`: PCM audio in, spoken replies out.
    Audio,
    /// `/ws/text`: typed messages in, text-only replies out.
    Text,
}

/// Axum handler to upgrade an HTTP connection to the audio WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state, Mode::Audio))
}

/// Axum handler for the text-only WebSocket.
pub async fn text_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state, Mode::Text))
}

#[instrument(name = "ws_session", skip_all, fields(connection_id, mode = ?mode))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, mode: Mode) {
    let owner = state.registry.new_owner();
    tracing::Span::current().record("connection_id", owner);
    info!("New WebSocket connection.");

    let (mut socket_tx, socket_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE_DEPTH);
    tokio::spawn(
        async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = send_msg(&mut socket_tx, msg).await {
                    debug!(error = %e, "Client socket gone; stopping writer");
                    break;
                }
            }
            let _ = socket_tx.close().await;
        }
        .in_current_span(),
    );

    let (asr_tx, asr_rx) = mpsc::channel(ASR_EVENT_QUEUE_DEPTH);
    let mut connection = Connection::new(state, owner, mode, outbound_tx, asr_tx);
    run_connection(&mut connection, socket_rx, asr_rx).await;
    connection.shutdown().await;
    info!("WebSocket connection closed and sessions released.");
}

/// The main event loop: client frames on one side, ASR events on the other.
async fn run_connection(
    connection: &mut Connection,
    mut socket_rx: SplitStream<WebSocket>,
    mut asr_rx: mpsc::Receiver<AsrEvent>,
) {
    loop {
        tokio::select! {
            frame = socket_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => connection.on_text(&text).await,
                Some(Ok(Message::Binary(_))) => {
                    warn!("Ignoring binary frame; audio must arrive as audio_chunk JSON.");
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Client sent close frame.");
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Error receiving from client WebSocket.");
                    break;
                }
                None => break,
            },
            Some(event) = asr_rx.recv() => connection.on_asr_event(event).await,
        }
    }
}

/// Per-connection session table and the channels that feed the client.
struct Connection {
    state: Arc<AppState>,
    /// Registry owner id; also the connection id in logs.
    owner: OwnerId,
    mode: Mode,
    outbound: mpsc::Sender<ServerMessage>,
    asr_tx: mpsc::Sender<AsrEvent>,
    /// Text sessions have no ASR connection.
    sessions: HashMap<String, Option<TranscriberHandle>>,
    /// Sessions whose ASR connection failed to open.
    failed: HashSet<String>,
}

impl Connection {
    fn new(
        state: Arc<AppState>,
        owner: OwnerId,
        mode: Mode,
        outbound: mpsc::Sender<ServerMessage>,
        asr_tx: mpsc::Sender<AsrEvent>,
    ) -> Self {
        Self {
            state,
            owner,
            mode,
            outbound,
            asr_tx,
            sessions: HashMap::new(),
            failed: HashSet::new(),
        }
    }

    async fn send(&self, msg: ServerMessage) {
        if self.outbound.send(msg).await.is_err() {
            debug!("Client writer closed; dropping event");
        }
    }

    async fn on_text(&mut self, text: &str) {
        let msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) if serde_json::from_str::<serde_json::Value>(text).is_ok() => {
                warn!(error = %e, "Unsupported client message");
                self.send(ServerMessage::error(format!("Unsupported message: {e}")))
                    .await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed client frame");
                return;
            }
        };

        match msg {
            ClientMessage::SessionStart { session_id } => {
                self.failed.remove(&session_id);
                if self.ensure_session(&session_id).await {
                    let message = match self.mode {
                        Mode::Audio => "Polly is listening",
                        Mode::Text => "Polly is ready",
                    };
                    self.send(ServerMessage::SessionStarted {
                        session_id,
                        message: message.to_string(),
                    })
                    .await;
                }
            }
            ClientMessage::AudioChunk {
                session_id,
                audio_data,
                ..
            } => self.on_audio_chunk(session_id, &audio_data).await,
            ClientMessage::VideoFrame {
                session_id,
                frame_data,
                ..
            } => self.on_video_frame(session_id, &frame_data).await,
            ClientMessage::TextMessage {
                session_id,
                content,
            } => {
                if content.trim().is_empty() || !self.ensure_session(&session_id).await {
                    return;
                }
                self.state.registry.touch(&session_id).await;
                self.spawn_pipeline(session_id, content);
            }
            ClientMessage::SetListening {
                session_id,
                listening,
            } => {
                if self.state.registry.set_listening(&session_id, listening).await {
                    info!(%session_id, listening, "Listening toggled");
                } else {
                    warn!(%session_id, "set_listening for unknown session");
                }
            }
            ClientMessage::SetCallActive { session_id, active } => {
                if self.state.registry.set_call_active(&session_id, active).await {
                    info!(%session_id, active, "Call status toggled");
                } else {
                    warn!(%session_id, "set_call_active for unknown session");
                }
            }
            ClientMessage::SessionEnd { session_id } => {
                self.end_session(&session_id).await;
                info!(%session_id, "Session ended by client");
                self.send(ServerMessage::SessionEnded { session_id }).await;
            }
        }
    }

    /// Registers `session_id` if this connection does not own it yet, opening
    /// an ASR connection on the audio socket. Returns false if that failed now
    /// or on an earlier attempt.
    async fn ensure_session(&mut self, session_id: &str) -> bool {
        if self.sessions.contains_key(session_id) {
            return true;
        }
        if self.failed.contains(session_id) {
            return false;
        }
        let transcriber = match self.mode {
            Mode::Audio => match self
                .state
                .transcriber
                .open(session_id, self.asr_tx.clone())
                .await
            {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!(session_id, error = %e, "Failed to open ASR connection");
                    self.failed.insert(session_id.to_string());
                    self.send(ServerMessage::error(format!(
                        "Failed to start transcription for session {session_id}"
                    )))
                    .await;
                    return false;
                }
            },
            Mode::Text => None,
        };
        if !self.state.registry.register(session_id, self.owner).await {
            info!(session_id, "Session taken over from an earlier connection");
        }
        self.sessions.insert(session_id.to_string(), transcriber);
        info!(session_id, "Session started");
        true
    }

    async fn on_audio_chunk(&mut self, session_id: String, audio_data: &str) {
        if self.mode == Mode::Text {
            self.send(ServerMessage::error("audio_chunk is only accepted on /ws/audio"))
                .await;
            return;
        }
        if !self.ensure_session(&session_id).await {
            return;
        }
        if !self.state.registry.is_listening(&session_id).await {
            debug!(%session_id, "Not listening; dropping audio");
            return;
        }
        let audio = match audio_utils::decode_bytes(audio_data) {
            Ok(audio) if audio.is_empty() => return,
            Ok(audio) => audio,
            Err(e) => {
                warn!(%session_id, error = %e, "Dropping undecodable audio chunk");
                return;
            }
        };
        if let Some(Some(handle)) = self.sessions.get(&session_id) {
            if let Err(e) = handle.send_audio(audio).await {
                warn!(%session_id, error = %e, "Failed to forward audio");
            }
        }
        self.state.registry.touch(&session_id).await;
    }

    async fn on_video_frame(&mut self, session_id: String, frame_data: &str) {
        let Some(vision) = self.state.vision.clone() else {
            debug!("No expression analyzer configured; dropping video frame");
            return;
        };
        if !self.ensure_session(&session_id).await {
            return;
        }
        let frame = match audio_utils::decode_bytes(frame_data) {
            Ok(frame) if !frame.is_empty() => frame,
            Ok(_) => return,
            Err(e) => {
                warn!(%session_id, error = %e, "Dropping undecodable video frame");
                return;
            }
        };

        let state = self.state.clone();
        let outbound = self.outbound.clone();
        tokio::spawn(
            async move {
                let result = match vision.analyze(&frame).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(%session_id, error = %e, "Expression analysis failed");
                        ExpressionResult::failed()
                    }
                };
                if result.success {
                    state.registry.set_expression(&session_id, result.clone()).await;
                }
                let _ = outbound
                    .send(ServerMessage::ExpressionResult { session_id, result })
                    .await;
            }
            .in_current_span(),
        );
    }

    async fn on_asr_event(&mut self, event: AsrEvent) {
        match event {
            AsrEvent::Transcript(transcript) => {
                if !self.sessions.contains_key(&transcript.session_id) {
                    debug!(session_id = %transcript.session_id, "Transcript for ended session");
                    return;
                }
                if transcript.is_partial {
                    self.send(ServerMessage::transcription(
                        &transcript.session_id,
                        &transcript.text,
                        true,
                    ))
                    .await;
                } else {
                    info!(session_id = %transcript.session_id, text = %transcript.text, "Final transcript");
                    self.spawn_pipeline(transcript.session_id, transcript.text);
                }
            }
            AsrEvent::Error {
                session_id,
                message,
            } => {
                warn!(%session_id, %message, "ASR error");
                self.send(ServerMessage::error(format!("Transcription error: {message}")))
                    .await;
            }
            AsrEvent::Closed { session_id } => {
                // A late notice from a replaced ASR connection must not tear down its successor.
                let ended = matches!(
                    self.sessions.get(&session_id),
                    Some(Some(handle)) if !handle.is_active()
                );
                if ended {
                    warn!(%session_id, "ASR connection ended; tearing down session");
                    self.sessions.remove(&session_id);
                    self.release(&session_id).await;
                }
            }
        }
    }

    fn spawn_pipeline(&self, session_id: String, text: String) {
        let state = self.state.clone();
        let outbound = self.outbound.clone();
        let voice = self.mode == Mode::Audio;
        tokio::spawn(
            async move {
                let outcome =
                    handle_final_transcript(&state, &session_id, &text, &outbound, voice).await;
                debug!(%session_id, ?outcome, "Transcript handled");
            }
            .in_current_span(),
        );
    }

    async fn end_session(&mut self, session_id: &str) {
        self.failed.remove(session_id);
        if let Some(Some(handle)) = self.sessions.remove(session_id) {
            tokio::spawn(handle.close().in_current_span());
        }
        self.release(session_id).await;
    }

    /// Drops the registry entry unless a newer connection has taken it over.
    async fn release(&self, session_id: &str) {
        match self
            .state
            .registry
            .remove_if_owner(session_id, self.owner)
            .await
        {
            Some(info) => {
                let duration_secs = (Utc::now() - info.started_at).num_seconds();
                info!(session_id, duration_secs, "Session released");
            }
            None => debug!(session_id, "Session owned elsewhere; leaving registry entry"),
        }
    }

    /// Releases every session this connection opened.
    async fn shutdown(&mut self) {
        let session_ids: Vec<String> = self.sessions.keys().cloned().collect();
        for session_id in session_ids {
            self.end_session(&session_id).await;
        }
    }
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
