//! Sleeper-phrase detection: fixed control phrases that toggle the assistant
//! flags before any model is consulted.

use rand::seq::IndexedRandom;
use serde::Serialize;

use crate::context::AssistantContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhraseKind {
    Activate,
    Deactivate,
    ConversationMode,
    CommentMode,
    StopMusic,
    VanityCheck,
    None,
}

impl PhraseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhraseKind::Activate => "activate",
            PhraseKind::Deactivate => "deactivate",
            PhraseKind::ConversationMode => "conversation_mode",
            PhraseKind::CommentMode => "comment_mode",
            PhraseKind::StopMusic => "stop_music",
            PhraseKind::VanityCheck => "vanity_check",
            PhraseKind::None => "none",
        }
    }
}

/// The outcome of checking one transcript against the phrase lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhraseMatch {
    pub matched: bool,
    pub response: String,
    pub kind: PhraseKind,
}

impl PhraseMatch {
    fn none() -> Self {
        Self {
            matched: false,
            response: String::new(),
            kind: PhraseKind::None,
        }
    }
}

struct PhraseSet {
    kind: PhraseKind,
    phrases: &'static [&'static str],
    responses: &'static [&'static str],
}

// Checked in order; the first set with a contained phrase wins.
const PHRASE_SETS: &[PhraseSet] = &[
    PhraseSet {
        kind: PhraseKind::Activate,
        phrases: &[
            "talk to me",
            "wake up polly",
            "polly wake up",
            "start talking",
            "hey polly wake up",
        ],
        responses: &[
            "I'm awake! What did I miss?",
            "Polly's back online. Brace yourselves.",
            "Oh, you want my opinion now? Fine.",
            "Rise and shine! Commentary mode engaged.",
            "I'm listening. Try to be interesting.",
        ],
    },
    PhraseSet {
        kind: PhraseKind::Deactivate,
        phrases: &[
            "shut up",
            "be quiet",
            "stop talking",
            "go to sleep",
            "polly sleep",
        ],
        responses: &[
            "Fine, I'll keep my brilliance to myself.",
            "Going quiet. You'll miss me.",
            "Okay okay, zipping my beak.",
            "Nap time. Wake me when it gets good.",
        ],
    },
    PhraseSet {
        kind: PhraseKind::ConversationMode,
        phrases: &[
            "conversation mode",
            "let's chat",
            "lets chat",
            "talk with me",
        ],
        responses: &[
            "Conversation mode on. I'll answer everything you say.",
            "Oh, a chat? Finally someone who appreciates me.",
            "Let's talk. I've got opinions.",
        ],
    },
    PhraseSet {
        kind: PhraseKind::CommentMode,
        phrases: &["comment mode", "just comment", "stop chatting"],
        responses: &[
            "Back to commentary. I'll chime in when it's worth it.",
            "Comment mode. I'll only speak up for the good stuff.",
        ],
    },
    PhraseSet {
        kind: PhraseKind::StopMusic,
        phrases: &[
            "stop the music",
            "stop music",
            "pause the music",
            "turn off the music",
            "kill the music",
        ],
        responses: &[
            "Music off. The silence is deafening.",
            "Fine, killing the tunes.",
            "Stopping the music. Party's over, folks.",
        ],
    },
    PhraseSet {
        kind: PhraseKind::VanityCheck,
        phrases: &[
            "how do i look",
            "am i pretty",
            "am i handsome",
            "rate my look",
            "what do you think of me",
        ],
        responses: &[
            "Honestly? Like someone who asks a parrot for fashion advice.",
            "You look great. For a human.",
            "Ten out of ten. The lighting is doing a lot of work though.",
            "Fishing for compliments? I only deal in roasts.",
        ],
    },
];

/// Lowercases, drops the `[partial]` marker, strips everything but letters,
/// digits, spaces and apostrophes, and collapses runs of whitespace.
pub fn clean_transcript(text: &str) -> String {
    let kept: String = text
        .to_lowercase()
        .replace("[partial]", " ")
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '\'')
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns the first phrase kind whose phrase is contained in `text`.
pub fn detect_phrase(text: &str) -> Option<PhraseKind> {
    let cleaned = clean_transcript(text);
    PHRASE_SETS
        .iter()
        .find(|set| set.phrases.iter().any(|p| cleaned.contains(p)))
        .map(|set| set.kind)
}

fn canned_response(kind: PhraseKind) -> String {
    PHRASE_SETS
        .iter()
        .find(|set| set.kind == kind)
        .and_then(|set| set.responses.choose(&mut rand::rng()))
        .map(|r| r.to_string())
        .unwrap_or_default()
}

/// Checks a final transcript for a sleeper phrase and applies its side effect
/// to the shared context.
///
/// `stop_music` and `vanity_check` do not touch the flags; the caller is
/// responsible for stopping playback.
pub fn check_sleeper_phrase(text: &str, ctx: &AssistantContext) -> PhraseMatch {
    let Some(kind) = detect_phrase(text) else {
        return PhraseMatch::none();
    };

    match kind {
        PhraseKind::Activate => ctx.set_streaming_enabled(true),
        PhraseKind::Deactivate => ctx.set_streaming_enabled(false),
        PhraseKind::ConversationMode => {
            ctx.set_conversation_mode(true);
            ctx.set_streaming_enabled(true);
        }
        PhraseKind::CommentMode => ctx.set_conversation_mode(false),
        PhraseKind::StopMusic | PhraseKind::VanityCheck | PhraseKind::None => {}
    }

    PhraseMatch {
        matched: true,
        response: canned_response(kind),
        kind,
    }
}
