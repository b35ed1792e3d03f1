//! Music intent: a cheap keyword pre-filter in front of an LLM parse.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::{
    extract::extract_structured,
    llm_client::{CompletionRequest, LLMClient},
    prompts::{PromptSet, render},
};

const PARSE_TEMPERATURE: f32 = 0.1;
const PARSE_MAX_TOKENS: u32 = 150;

const MUSIC_KEYWORDS: &[&str] = &[
    "play", "music", "song", "track", "album", "artist", "spotify", "listen", "hear", "sound",
    "tune", "sing", "band", "musician",
];

const MUSIC_PATTERNS: &[&str] = &[
    "put on", "turn on", "start", "queue up", "blast", "throw on", "crank up", "fire up",
];

/// Spoken before a found track starts playing.
pub const HYPE_LINES: [&str; 8] = [
    "Time to get the party started! Let me queue up some tunes for you.",
    "Alright, let's turn up the volume and get some music pumping!",
    "Perfect! I'm going to blast some awesome music for you right now.",
    "Music time! Let me find something that'll get your groove on.",
    "Here we go! Time to fill the air with some sweet sounds.",
    "Boom! Let me crank up some music that'll make your day better.",
    "Alright alright, let's get this musical party started!",
    "Music incoming! Prepare for some audio awesomeness.",
];

pub fn hype_line() -> &'static str {
    HYPE_LINES
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(HYPE_LINES[0])
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null")))
}

fn default_action() -> String {
    "play".to_string()
}

/// Structured form of a spoken music request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicRequest {
    #[serde(default, deserialize_with = "non_empty")]
    pub artist: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub song: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub album: Option<String>,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub original_text: String,
}

impl MusicRequest {
    /// The search query: the present fields among song, artist and album,
    /// joined with ",". `None` if all are missing.
    pub fn search_query(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.song, &self.artist, &self.album]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect();
        (!parts.is_empty()).then(|| parts.join(","))
    }
}

fn strip_partial_marker(text: &str) -> String {
    text.replace("[partial]", "").trim().to_string()
}

/// Substring pre-filter run before any LLM call.
pub fn is_music_request(text: &str) -> bool {
    let lower = strip_partial_marker(&text.to_lowercase());
    MUSIC_KEYWORDS
        .iter()
        .chain(MUSIC_PATTERNS)
        .any(|needle| lower.contains(needle))
}

pub struct MusicIntentParser {
    llm: Arc<dyn LLMClient>,
    prompts: Arc<PromptSet>,
}

impl MusicIntentParser {
    pub fn new(llm: Arc<dyn LLMClient>, prompts: Arc<PromptSet>) -> Self {
        Self { llm, prompts }
    }

    /// Asks the model to extract artist/song/album. Returns `None` if the call
    /// fails, the reply is not a JSON object, or neither artist nor song is set.
    pub async fn parse_music_request(&self, text: &str) -> Option<MusicRequest> {
        let clean_text = strip_partial_marker(text);
        let prompt = render(&self.prompts.parse_music, &[("text", clean_text.as_str())]);
        let request = CompletionRequest::new(prompt)
            .with_system(self.prompts.music_system.trim())
            .with_temperature(PARSE_TEMPERATURE)
            .with_max_tokens(PARSE_MAX_TOKENS);

        let reply = match self.llm.complete(request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Music parse request failed");
                return None;
            }
        };
        debug!(reply = %reply, "Music parse reply");

        let mut parsed: MusicRequest = match extract_structured(&reply) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Failed to parse music request reply");
                return None;
            }
        };

        if parsed.artist.is_none() && parsed.song.is_none() {
            info!("No artist or song extracted from music request");
            return None;
        }
        parsed.original_text = clean_text;
        Some(parsed)
    }

    /// Pre-filter, then parse.
    pub async fn process_transcription(&self, text: &str) -> Option<MusicRequest> {
        if !is_music_request(text) {
            return None;
        }
        info!(text, "Detected potential music request");
        self.parse_music_request(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::MockLLMClient;

    fn parser(mock: MockLLMClient) -> MusicIntentParser {
        MusicIntentParser::new(Arc::new(mock), Arc::new(PromptSet::default()))
    }

    #[test]
    fn test_pre_filter() {
        assert!(is_music_request("play billie jean by michael jackson"));
        assert!(is_music_request("Could you PUT ON something chill"));
        assert!(is_music_request("[partial] crank up the volume"));
        assert!(!is_music_request("what time is it"));
    }

    #[test]
    fn test_search_query_joins_present_fields() {
        let request = MusicRequest {
            artist: Some("Michael Jackson".into()),
            song: Some("Billie Jean".into()),
            album: None,
            action: "play".into(),
            confidence: 0.9,
            original_text: String::new(),
        };
        assert_eq!(request.search_query().as_deref(), Some("Billie Jean,Michael Jackson"));

        let empty = MusicRequest {
            artist: None,
            song: None,
            ..request
        };
        assert!(empty.search_query().is_none());
    }

    #[test]
    fn test_hype_line_is_from_fixed_list() {
        assert!(HYPE_LINES.contains(&hype_line()));
    }

    #[tokio::test]
    async fn test_parses_artist_and_song() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|req| {
                req.system.is_some()
                    && req.temperature == PARSE_TEMPERATURE
                    && req.prompt.contains("play billie jean by michael jackson")
            })
            .times(1)
            .returning(|_| {
                Ok(r#"{"artist": "Michael Jackson", "song": "Billie Jean", "album": null, "action": "play", "confidence": 0.9}"#.to_string())
            });

        let request = parser(mock)
            .process_transcription("play billie jean by michael jackson")
            .await
            .unwrap();
        assert_eq!(request.artist.as_deref(), Some("Michael Jackson"));
        assert_eq!(request.song.as_deref(), Some("Billie Jean"));
        assert!(request.album.is_none());
        assert_eq!(request.action, "play");
        assert_eq!(request.original_text, "play billie jean by michael jackson");
    }

    #[tokio::test]
    async fn test_album_only_is_rejected() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete().returning(|_| {
            Ok("```json\n{\"artist\": \"\", \"song\": null, \"album\": \"Abbey Road\"}\n```".to_string())
        });
        assert!(parser(mock).process_transcription("play the album abbey road").await.is_none());
    }

    #[tokio::test]
    async fn test_non_music_text_skips_llm() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete().times(0);
        assert!(parser(mock).process_transcription("how was your day").await.is_none());
    }

    #[tokio::test]
    async fn test_garbage_reply_is_none() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .returning(|_| Ok("I think they want Queen".to_string()));
        assert!(parser(mock).process_transcription("play some queen").await.is_none());
    }
}
