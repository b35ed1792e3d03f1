//! Main Entrypoint for the Polly API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading prompt templates, with optional on-disk overrides.
//! 3. Initializing the vendor clients (LLM, ASR, TTS, vision, music).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use polly_api::{
    config::{Config, redact},
    music::{MusicPlayback, MusicSearch, ProcessPlayer, YtDlpSearch},
    registry::SessionRegistry,
    router::create_router,
    speech::{ElevenLabsSynthesizer, SpeechSynthesizer},
    state::AppState,
    vision::{ExpressionAnalyzer, GoogleVisionAnalyzer},
    ws::provider::{DeepgramTranscriber, Transcriber, deepgram::DeepgramOptions},
};
use polly_core::{
    AssistantContext, JokeResponder, MusicIntentParser,
    llm_client::{LLMClient, OpenAICompatibleClient},
    prompts::PromptSet,
};
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in std::fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Prompts ---
    let prompts = match &config.prompts_path {
        Some(path) => {
            let overrides = load_prompts(path)
                .with_context(|| format!("Failed to read prompts from {}", path.display()))?;
            info!(count = overrides.len(), path = %path.display(), "Loaded prompt overrides");
            PromptSet::with_overrides(&overrides)
        }
        None => PromptSet::default(),
    };
    let prompts = Arc::new(prompts);

    // --- 4. Initialize Vendor Clients ---
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.groq_api_key)
        .with_api_base(&config.llm_api_base);
    let llm_client: Arc<dyn LLMClient> = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));

    let transcriber: Arc<dyn Transcriber> = Arc::new(DeepgramTranscriber::new(
        config.deepgram_api_key.clone(),
        DeepgramOptions::default(),
        Duration::from_secs(config.keepalive_after_secs),
    ));

    let tts: Option<Arc<dyn SpeechSynthesizer>> = match &config.eleven_labs_api_key {
        Some(key) => {
            info!(key = %redact(key), voice = %config.eleven_labs_voice_id, "ElevenLabs TTS enabled");
            Some(Arc::new(ElevenLabsSynthesizer::new(
                key.clone(),
                config.eleven_labs_voice_id.clone(),
                config.eleven_labs_model.clone(),
            )))
        }
        None => {
            warn!("ELEVEN_LABS_API_KEY not set; jokes will be text-only");
            None
        }
    };

    let vision: Option<Arc<dyn ExpressionAnalyzer>> = match &config.google_vision_api_key {
        Some(key) => {
            info!(key = %redact(key), "Google Vision expression analysis enabled");
            Some(Arc::new(GoogleVisionAnalyzer::new(key.clone())))
        }
        None => {
            info!("GOOGLE_VISION_API_KEY not set; video frames will be ignored");
            None
        }
    };

    let music_search: Arc<dyn MusicSearch> =
        Arc::new(YtDlpSearch::new(config.ytdlp_command.clone()));
    let player: Arc<dyn MusicPlayback> =
        Arc::new(ProcessPlayer::ffplay(config.player_command.clone()));

    let app_state = Arc::new(AppState {
        context: Arc::new(AssistantContext::new(
            config.streaming_enabled,
            config.conversation_mode,
        )),
        jokes: Arc::new(JokeResponder::new(
            llm_client.clone(),
            prompts.clone(),
            config.joke_threshold,
            config.max_response_length,
        )),
        music_parser: Arc::new(MusicIntentParser::new(llm_client, prompts)),
        transcriber,
        tts,
        vision,
        music_search,
        player,
        registry: Arc::new(SessionRegistry::new()),
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.chat_model,
        llm_api_base = %config.llm_api_base,
        groq_key = %redact(&config.groq_api_key),
        deepgram_key = %redact(&config.deepgram_api_key),
        joke_threshold = config.joke_threshold,
        streaming_enabled = config.streaming_enabled,
        conversation_mode = config.conversation_mode,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
