//! Vendor-agnostic logic for the Polly voice assistant.
//!
//! Nothing in this crate touches sockets or processes directly: model access
//! goes through [`llm_client::LLMClient`], and the server crate wires the real
//! vendors in.

pub mod context;
pub mod expression;
pub mod extract;
pub mod generic_types;
pub mod joke;
pub mod llm_client;
pub mod music;
pub mod phrase_gate;
pub mod prompts;

pub use context::{AssistantContext, ContextSnapshot};
pub use generic_types::{AsrEvent, TranscriptEvent};
pub use joke::{JokeData, JokeDecision, JokeResponder};
pub use llm_client::{CompletionRequest, LLMClient, OpenAICompatibleClient};
pub use music::{MusicIntentParser, MusicRequest};
pub use phrase_gate::{PhraseKind, PhraseMatch, check_sleeper_phrase};
