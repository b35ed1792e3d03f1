//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the process-wide
//! assistant flags, the session registry and every vendor client behind its
//! trait, so tests can swap any of them for a fake.

use crate::{
    config::Config,
    music::{MusicPlayback, MusicSearch},
    registry::SessionRegistry,
    speech::SpeechSynthesizer,
    vision::ExpressionAnalyzer,
    ws::provider::Transcriber,
};
use polly_core::{AssistantContext, JokeResponder, MusicIntentParser};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub context: Arc<AssistantContext>,
    pub jokes: Arc<JokeResponder>,
    pub music_parser: Arc<MusicIntentParser>,
    pub transcriber: Arc<dyn Transcriber>,
    /// `None` when no TTS key is configured; jokes are then text-only.
    pub tts: Option<Arc<dyn SpeechSynthesizer>>,
    pub vision: Option<Arc<dyn ExpressionAnalyzer>>,
    pub music_search: Arc<dyn MusicSearch>,
    pub player: Arc<dyn MusicPlayback>,
    pub registry: Arc<SessionRegistry>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        music::tests::{FakePlayer, FakeSearch},
        ws::provider::tests::FakeTranscriber,
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use polly_core::{CompletionRequest, LLMClient, prompts::PromptSet};

    type Reply = dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync;

    /// An LLM stand-in that answers every request through a closure.
    pub(crate) struct ScriptedLlm(pub Box<Reply>);

    #[async_trait]
    impl LLMClient for ScriptedLlm {
        async fn complete(&self, request: CompletionRequest) -> Result<String> {
            (self.0)(&request)
        }
    }

    /// Builds a state wired entirely to fakes.
    pub(crate) fn test_state(
        llm: ScriptedLlm,
        tts: Option<Arc<dyn SpeechSynthesizer>>,
        search: FakeSearch,
    ) -> (Arc<AppState>, Arc<FakePlayer>) {
        let llm: Arc<dyn LLMClient> = Arc::new(llm);
        let prompts = Arc::new(PromptSet::default());
        let config = Config::for_tests();
        let player = Arc::new(FakePlayer::default());
        let state = AppState {
            context: Arc::new(AssistantContext::new(
                config.streaming_enabled,
                config.conversation_mode,
            )),
            jokes: Arc::new(JokeResponder::new(
                llm.clone(),
                prompts.clone(),
                config.joke_threshold,
                config.max_response_length,
            )),
            music_parser: Arc::new(MusicIntentParser::new(llm, prompts)),
            transcriber: Arc::new(FakeTranscriber::default()),
            tts,
            vision: None,
            music_search: Arc::new(search),
            player: player.clone(),
            registry: Arc::new(SessionRegistry::new()),
            config: Arc::new(config),
        };
        (Arc::new(state), player)
    }
}
