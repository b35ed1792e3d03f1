//! Runs one final transcript through the assistant pipeline.
//!
//! The order is fixed: Phrase-Gate, then the streaming and audio-busy guards,
//! then music intent, then the joke decision. Exactly one client-facing result
//! (sleeper phrase, transcription, music response or joke) is emitted per call.

use crate::{
    audio_utils,
    music::{TrackInfo, play_clip_locally},
    speech::{SpeechOutput, SpeechSynthesizer, speak_joke},
    state::AppState,
    ws::protocol::{MusicOutcome, ServerMessage},
};
use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use polly_core::{MusicRequest, PhraseKind, check_sleeper_phrase, music::hype_line};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// What a final transcript turned into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Outcome {
    Sleeper(PhraseKind),
    StreamingDisabled,
    AudioBusy,
    Music { success: bool },
    Joke,
    Plain,
}

/// Sends an event to the connection's writer. Returns false once the client is gone.
async fn emit(outbound: &mpsc::Sender<ServerMessage>, msg: ServerMessage) -> bool {
    if outbound.send(msg).await.is_err() {
        debug!("Client channel closed; dropping event");
        return false;
    }
    true
}

fn flagged_transcription(
    session_id: &str,
    text: &str,
    streaming_disabled: bool,
    audio_busy: bool,
) -> ServerMessage {
    ServerMessage::Transcription {
        session_id: session_id.to_string(),
        text: text.to_string(),
        is_partial: false,
        streaming_disabled,
        audio_busy,
        timestamp: Utc::now(),
    }
}

/// Handles a final transcript (or a typed message on the text socket).
///
/// With `voice` set, spoken replies are synthesized and streamed back as
/// `joke_audio_*` events on a spawned task.
pub(crate) async fn handle_final_transcript(
    state: &Arc<AppState>,
    session_id: &str,
    text: &str,
    outbound: &mpsc::Sender<ServerMessage>,
    voice: bool,
) -> Outcome {
    let phrase = check_sleeper_phrase(text, &state.context);
    if phrase.matched {
        info!(session_id, kind = phrase.kind.as_str(), "Sleeper phrase detected");
        if phrase.kind == PhraseKind::StopMusic && stop_playback(state).await {
            info!("Music playback stopped");
        }
        let ctx = state.context.snapshot();
        emit(
            outbound,
            ServerMessage::SleeperPhrase {
                session_id: session_id.to_string(),
                text: text.to_string(),
                sassy_response: phrase.response.clone(),
                phrase_type: phrase.kind,
                streaming_enabled: ctx.streaming_enabled,
                conversation_mode: ctx.conversation_mode,
            },
        )
        .await;
        if voice {
            spawn_speech(state, session_id, &phrase.response, outbound, None).await;
        }
        return Outcome::Sleeper(phrase.kind);
    }

    if !state.context.streaming_enabled() {
        debug!(session_id, "Streaming disabled; transcript only");
        emit(outbound, flagged_transcription(session_id, text, true, false)).await;
        return Outcome::StreamingDisabled;
    }

    if state.registry.is_audio_streaming(session_id).await {
        debug!(session_id, "Speech already in flight; transcript only");
        emit(outbound, flagged_transcription(session_id, text, false, true)).await;
        return Outcome::AudioBusy;
    }

    if let Some(request) = state.music_parser.process_transcription(text).await {
        return handle_music(state, session_id, request, outbound, voice).await;
    }

    let expression = state.registry.expression(session_id).await;
    let conversation_mode = state.context.conversation_mode();
    match state
        .jokes
        .process_text_for_joke(text, expression.as_ref(), conversation_mode)
        .await
    {
        Some(joke) => {
            info!(session_id, joke_type = %joke.joke_type, confidence = joke.confidence, "Responding with a joke");
            let spoken = joke.joke_response.clone();
            emit(outbound, ServerMessage::joke(session_id, joke)).await;
            if voice {
                spawn_speech(state, session_id, &spoken, outbound, None).await;
            }
            Outcome::Joke
        }
        None => {
            emit(outbound, ServerMessage::transcription(session_id, text, false)).await;
            Outcome::Plain
        }
    }
}

async fn handle_music(
    state: &Arc<AppState>,
    session_id: &str,
    request: MusicRequest,
    outbound: &mpsc::Sender<ServerMessage>,
    voice: bool,
) -> Outcome {
    let Some(query) = request.search_query() else {
        return music_failure(session_id, request, "I couldn't tell what to play.", outbound).await;
    };
    info!(session_id, query = %query, "Searching for music");

    match state.music_search.search(&query).await {
        Ok(Some(track)) => {
            let joke_message = hype_line().to_string();
            let outcome = MusicOutcome {
                success: true,
                message: format!("Found: {}", track.title),
                title: Some(track.title.clone()),
                joke_message: Some(joke_message.clone()),
                request,
            };
            emit(
                outbound,
                ServerMessage::MusicResponse {
                    session_id: session_id.to_string(),
                    outcome,
                },
            )
            .await;
            if voice {
                spawn_speech(state, session_id, &joke_message, outbound, Some(track)).await;
            } else {
                start_playback(state, &track).await;
            }
            Outcome::Music { success: true }
        }
        Ok(None) => {
            let message = format!("I couldn't find anything for '{query}'.");
            music_failure(session_id, request, &message, outbound).await
        }
        Err(e) => {
            error!(session_id, error = %e, "Music search failed");
            music_failure(session_id, request, "Music search failed.", outbound).await
        }
    }
}

async fn music_failure(
    session_id: &str,
    request: MusicRequest,
    message: &str,
    outbound: &mpsc::Sender<ServerMessage>,
) -> Outcome {
    emit(
        outbound,
        ServerMessage::MusicResponse {
            session_id: session_id.to_string(),
            outcome: MusicOutcome {
                success: false,
                message: message.to_string(),
                title: None,
                joke_message: None,
                request,
            },
        },
    )
    .await;
    Outcome::Music { success: false }
}

/// Starts the track on the blocking pool; spawning and killing the player
/// process waits on the OS.
async fn start_playback(state: &AppState, track: &TrackInfo) {
    let player = state.player.clone();
    let title = track.title.clone();
    let track = track.clone();
    match tokio::task::spawn_blocking(move || player.start(&track)).await {
        Ok(Ok(())) => info!(%title, "Music playback started"),
        Ok(Err(e)) => error!(%title, error = %e, "Music playback failed"),
        Err(e) => error!(%title, error = %e, "Music playback task panicked"),
    }
}

async fn stop_playback(state: &AppState) -> bool {
    let player = state.player.clone();
    match tokio::task::spawn_blocking(move || player.stop()).await {
        Ok(stopped) => stopped,
        Err(e) => {
            error!(error = %e, "Music stop task panicked");
            false
        }
    }
}

/// Speaks `text` to the session on a background task, then starts `then_play`.
///
/// The session's audio slot is claimed before the task starts and released
/// when it ends. If no synthesizer is configured, the session is on an
/// external voice call, or the slot is taken, the speech is skipped but the
/// track still plays.
pub(crate) async fn spawn_speech(
    state: &Arc<AppState>,
    session_id: &str,
    text: &str,
    outbound: &mpsc::Sender<ServerMessage>,
    then_play: Option<TrackInfo>,
) -> Option<JoinHandle<()>> {
    let Some(tts) = state.tts.clone() else {
        if let Some(track) = then_play {
            start_playback(state, &track).await;
        }
        return None;
    };
    if state.registry.is_call_active(session_id).await {
        debug!(session_id, "Voice call active; skipping speech");
        if let Some(track) = then_play {
            start_playback(state, &track).await;
        }
        return None;
    }
    if !state.registry.try_begin_audio(session_id).await {
        debug!(session_id, "Audio slot busy; skipping speech");
        if let Some(track) = then_play {
            start_playback(state, &track).await;
        }
        return None;
    }

    let state = state.clone();
    let session_id = session_id.to_string();
    let text = text.to_string();
    let outbound = outbound.clone();
    Some(tokio::spawn(async move {
        stream_speech(&state, tts.as_ref(), &session_id, &text, &outbound).await;
        state.registry.end_audio(&session_id).await;
        if let Some(track) = then_play {
            start_playback(&state, &track).await;
        }
    }))
}

async fn stream_speech(
    state: &AppState,
    tts: &dyn SpeechSynthesizer,
    session_id: &str,
    text: &str,
    outbound: &mpsc::Sender<ServerMessage>,
) {
    let local_player = state
        .config
        .play_audio_locally
        .then_some(state.config.player_command.as_str());

    match speak_joke(tts, text, local_player, true).await {
        Some(SpeechOutput::Streamed(mut audio)) => {
            let mut chunk_index = 0;
            let mut local_clip: Option<Vec<u8>> = local_player.map(|_| Vec::new());
            while let Some(chunk) = audio.next().await {
                match chunk {
                    Ok(chunk) if chunk.is_empty() => continue,
                    Ok(chunk) => {
                        if let Some(clip) = local_clip.as_mut() {
                            clip.extend_from_slice(&chunk);
                        }
                        let msg = ServerMessage::JokeAudioChunk {
                            session_id: session_id.to_string(),
                            chunk_data: audio_utils::encode_bytes(&chunk),
                            chunk_index,
                        };
                        if !emit(outbound, msg).await {
                            return;
                        }
                        chunk_index += 1;
                    }
                    Err(e) => {
                        warn!(session_id, error = %e, "TTS stream interrupted");
                        break;
                    }
                }
            }
            info!(session_id, chunks = chunk_index, "Finished streaming speech");
            emit(
                outbound,
                ServerMessage::JokeAudioEnd {
                    session_id: session_id.to_string(),
                    total_chunks: chunk_index,
                },
            )
            .await;
            if let (Some(command), Some(clip)) = (local_player, local_clip) {
                if !clip.is_empty() {
                    play_clip_locally(command, Bytes::from(clip));
                }
            }
        }
        Some(SpeechOutput::Buffered(clip)) => {
            emit(
                outbound,
                ServerMessage::JokeAudio {
                    session_id: session_id.to_string(),
                    audio_data: audio_utils::encode_bytes(&clip),
                },
            )
            .await;
        }
        None => debug!(session_id, "No speech produced; text event stands"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        music::{
            MusicPlayback,
            tests::{FakePlayer, FakeSearch, track},
        },
        speech::tests::FakeSynthesizer,
        state::tests::{ScriptedLlm, test_state},
    };
    use anyhow::anyhow;
    use polly_core::CompletionRequest;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    const DECISION_YES: &str = r#"{"should_respond": true, "confidence": 0.9, "reasoning": "easy target", "joke_type": "roast"}"#;
    const DECISION_NO: &str = r#"{"should_respond": false, "confidence": 0.1, "reasoning": "nothing funny", "joke_type": "none"}"#;
    const ACTIVATION_RESPONSES: [&str; 5] = [
        "I'm awake! What did I miss?",
        "Polly's back online. Brace yourselves.",
        "Oh, you want my opinion now? Fine.",
        "Rise and shine! Commentary mode engaged.",
        "I'm listening. Try to be interesting.",
    ];
    const MUSIC_JSON: &str = r#"{"artist": "Michael Jackson", "song": "Billie Jean", "album": null, "action": "play", "confidence": 0.95}"#;

    /// Music parses carry a system prompt; decisions ask for more tokens than jokes.
    fn llm(decision: &'static str) -> ScriptedLlm {
        ScriptedLlm(Box::new(move |req: &CompletionRequest| {
            if req.system.is_some() {
                Ok(MUSIC_JSON.to_string())
            } else if req.max_tokens == 300 {
                Ok(decision.to_string())
            } else {
                Ok("\"Your cat has better taste in keyboards than you.\"".to_string())
            }
        }))
    }

    fn failing_llm() -> ScriptedLlm {
        ScriptedLlm(Box::new(|_: &CompletionRequest| Err(anyhow!("rate limited"))))
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_activation_phrase_short_circuits() {
        let (state, _) = test_state(failing_llm(), None, FakeSearch { result: None });
        state.context.set_streaming_enabled(false);
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = handle_final_transcript(&state, "s1", "Talk to me!", &tx, true).await;

        assert_eq!(outcome, Outcome::Sleeper(PhraseKind::Activate));
        assert!(state.context.streaming_enabled());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerMessage::SleeperPhrase {
                phrase_type,
                streaming_enabled,
                sassy_response,
                ..
            } => {
                assert_eq!(*phrase_type, PhraseKind::Activate);
                assert!(*streaming_enabled);
                assert!(ACTIVATION_RESPONSES.contains(&sassy_response.as_str()));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_streaming_disabled_yields_transcript_only() {
        let (state, player) = test_state(llm(DECISION_YES), None, FakeSearch { result: Some(track("x")) });
        state.context.set_streaming_enabled(false);
        let (tx, mut rx) = mpsc::channel(16);

        let outcome =
            handle_final_transcript(&state, "s1", "play billie jean by michael jackson", &tx, false).await;

        assert_eq!(outcome, Outcome::StreamingDisabled);
        assert!(player.started.lock().unwrap().is_empty());
        let events = drain(&mut rx);
        assert!(matches!(
            events.as_slice(),
            [ServerMessage::Transcription { streaming_disabled: true, audio_busy: false, .. }]
        ));
    }

    #[tokio::test]
    async fn test_audio_busy_yields_transcript_only() {
        let (state, _) = test_state(llm(DECISION_YES), None, FakeSearch { result: None });
        state.registry.register("s1", 1).await;
        assert!(state.registry.try_begin_audio("s1").await);
        let (tx, mut rx) = mpsc::channel(16);

        let outcome =
            handle_final_transcript(&state, "s1", "my cat keeps walking over the keyboard", &tx, true).await;

        assert_eq!(outcome, Outcome::AudioBusy);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerMessage::Transcription { audio_busy: true, streaming_disabled: false, .. }]
        ));
    }

    #[tokio::test]
    async fn test_music_request_plays_track_without_voice() {
        let (state, player) = test_state(
            llm(DECISION_NO),
            None,
            FakeSearch { result: Some(track("Billie Jean")) },
        );
        let (tx, mut rx) = mpsc::channel(16);

        let outcome =
            handle_final_transcript(&state, "s1", "play billie jean by michael jackson", &tx, false).await;

        assert_eq!(outcome, Outcome::Music { success: true });
        assert_eq!(*player.started.lock().unwrap(), vec!["Billie Jean".to_string()]);
        match drain(&mut rx).as_slice() {
            [ServerMessage::MusicResponse { outcome, .. }] => {
                assert!(outcome.success);
                assert_eq!(outcome.message, "Found: Billie Jean");
                assert_eq!(outcome.request.artist.as_deref(), Some("Michael Jackson"));
                assert!(outcome.joke_message.is_some());
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_music_hype_is_spoken_before_playback() {
        let tts: Arc<dyn SpeechSynthesizer> = Arc::new(FakeSynthesizer::new(vec![b"ab", b"cd"]));
        let (state, player) = test_state(
            llm(DECISION_NO),
            Some(tts),
            FakeSearch { result: Some(track("Billie Jean")) },
        );
        state.registry.register("s1", 1).await;
        let (tx, mut rx) = mpsc::channel(16);

        let outcome =
            handle_final_transcript(&state, "s1", "play billie jean by michael jackson", &tx, true).await;
        assert_eq!(outcome, Outcome::Music { success: true });

        wait_for(|| !player.started.lock().unwrap().is_empty()).await;
        let events = drain(&mut rx);
        assert!(matches!(events[0], ServerMessage::MusicResponse { .. }));
        assert!(matches!(
            events[1],
            ServerMessage::JokeAudioChunk { chunk_index: 0, .. }
        ));
        assert!(matches!(
            events.last(),
            Some(ServerMessage::JokeAudioEnd { total_chunks: 2, .. })
        ));
        assert!(!state.registry.is_audio_streaming("s1").await);
    }

    #[tokio::test]
    async fn test_missing_track_reports_failure() {
        let (state, player) = test_state(llm(DECISION_NO), None, FakeSearch { result: None });
        let (tx, mut rx) = mpsc::channel(16);

        let outcome =
            handle_final_transcript(&state, "s1", "play billie jean by michael jackson", &tx, true).await;

        assert_eq!(outcome, Outcome::Music { success: false });
        assert!(player.started.lock().unwrap().is_empty());
        match drain(&mut rx).as_slice() {
            [ServerMessage::MusicResponse { outcome, .. }] => {
                assert!(!outcome.success);
                assert!(outcome.message.contains("Billie Jean"));
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_joke_is_sent_then_spoken() {
        let tts: Arc<dyn SpeechSynthesizer> = Arc::new(FakeSynthesizer::new(vec![b"mp3"]));
        let (state, _) = test_state(llm(DECISION_YES), Some(tts), FakeSearch { result: None });
        state.registry.register("s1", 1).await;
        let (tx, mut rx) = mpsc::channel(16);

        let outcome =
            handle_final_transcript(&state, "s1", "my cat keeps walking over the keyboard", &tx, true).await;
        assert_eq!(outcome, Outcome::Joke);

        let first = rx.recv().await.expect("joke event");
        match first {
            ServerMessage::JokeResponse { joke, joke_type, .. } => {
                assert_eq!(joke, "Your cat has better taste in keyboards than you.");
                assert_eq!(joke_type, "roast");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(ServerMessage::JokeAudioChunk { .. })));
        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::JokeAudioEnd { total_chunks: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_declined_joke_yields_plain_transcript() {
        let (state, _) = test_state(llm(DECISION_NO), None, FakeSearch { result: None });
        let (tx, mut rx) = mpsc::channel(16);

        let outcome =
            handle_final_transcript(&state, "s1", "my cat keeps walking over the keyboard", &tx, true).await;

        assert_eq!(outcome, Outcome::Plain);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerMessage::Transcription { is_partial: false, streaming_disabled: false, audio_busy: false, .. }]
        ));
    }

    #[tokio::test]
    async fn test_stop_music_phrase_stops_player() {
        let (state, player) = test_state(failing_llm(), None, FakeSearch { result: None });
        player.start(&track("Thriller")).unwrap();
        let (tx, _rx) = mpsc::channel(16);

        let outcome = handle_final_transcript(&state, "s1", "okay stop the music", &tx, false).await;

        assert_eq!(outcome, Outcome::Sleeper(PhraseKind::StopMusic));
        assert!(!player.is_playing());
    }

    #[tokio::test]
    async fn test_buffered_fallback_sends_single_clip() {
        let mut fake = FakeSynthesizer::new(vec![b"whole"]);
        fake.fail_stream = true;
        let tts: Arc<dyn SpeechSynthesizer> = Arc::new(fake);
        let (state, _) = test_state(failing_llm(), Some(tts), FakeSearch { result: None });
        state.registry.register("s1", 1).await;
        let (tx, mut rx) = mpsc::channel(16);

        let handle = spawn_speech(&state, "s1", "hello there", &tx, None)
            .await
            .expect("speech task");
        handle.await.unwrap();

        match drain(&mut rx).as_slice() {
            [ServerMessage::JokeAudio { audio_data, .. }] => {
                assert_eq!(audio_utils::decode_bytes(audio_data).unwrap().as_ref(), b"whole");
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_busy_slot_skips_speech_but_still_plays() {
        let tts: Arc<dyn SpeechSynthesizer> = Arc::new(FakeSynthesizer::new(vec![b"x"]));
        let (state, player) = test_state(failing_llm(), Some(tts), FakeSearch { result: None });
        state.registry.register("s1", 1).await;
        assert!(state.registry.try_begin_audio("s1").await);
        let (tx, mut rx) = mpsc::channel(16);

        let handle = spawn_speech(&state, "s1", "hype", &tx, Some(track("Bad"))).await;

        assert!(handle.is_none());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(*player.started.lock().unwrap(), vec!["Bad".to_string()]);
    }

    #[tokio::test]
    async fn test_active_call_suppresses_speech() {
        let tts: Arc<dyn SpeechSynthesizer> = Arc::new(FakeSynthesizer::new(vec![b"mp3"]));
        let (state, _) = test_state(llm(DECISION_YES), Some(tts), FakeSearch { result: None });
        state.registry.register("s1", 1).await;
        state.registry.set_call_active("s1", true).await;
        let (tx, mut rx) = mpsc::channel(16);

        let outcome =
            handle_final_transcript(&state, "s1", "my cat keeps walking over the keyboard", &tx, true).await;

        assert_eq!(outcome, Outcome::Joke);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerMessage::JokeResponse { .. }]
        ));
        assert!(!state.registry.is_audio_streaming("s1").await);
    }

    /// Blocks the calling thread the way a real process spawn can.
    struct SlowPlayer(FakePlayer);

    impl MusicPlayback for SlowPlayer {
        fn start(&self, track: &TrackInfo) -> anyhow::Result<()> {
            std::thread::sleep(Duration::from_millis(200));
            self.0.start(track)
        }

        fn stop(&self) -> bool {
            std::thread::sleep(Duration::from_millis(200));
            self.0.stop()
        }

        fn is_playing(&self) -> bool {
            self.0.is_playing()
        }
    }

    #[tokio::test]
    async fn test_player_calls_do_not_block_the_runtime() {
        let (state, _) = test_state(failing_llm(), None, FakeSearch { result: None });
        let slow = Arc::new(SlowPlayer(FakePlayer::default()));
        let mut state = (*state).clone();
        state.player = slow.clone();

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        start_playback(&state, &track("Thriller")).await;
        assert!(slow.is_playing());
        assert!(stop_playback(&state).await);
        ticker.abort();

        // The single-threaded test runtime kept polling other tasks meanwhile.
        assert!(ticks.load(Ordering::SeqCst) >= 5);
        assert_eq!(*slow.0.started.lock().unwrap(), vec!["Thriller".to_string()]);
    }
}
