use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

/// Process-wide assistant flags shared by every connection.
///
/// `streaming_enabled` gates all reactions to final transcripts;
/// `conversation_mode` switches the joke path from commenting to replying.
#[derive(Debug)]
pub struct AssistantContext {
    streaming_enabled: AtomicBool,
    conversation_mode: AtomicBool,
}

/// A point-in-time copy of the assistant flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextSnapshot {
    pub streaming_enabled: bool,
    pub conversation_mode: bool,
}

impl AssistantContext {
    pub fn new(streaming_enabled: bool, conversation_mode: bool) -> Self {
        Self {
            streaming_enabled: AtomicBool::new(streaming_enabled),
            conversation_mode: AtomicBool::new(conversation_mode),
        }
    }

    pub fn streaming_enabled(&self) -> bool {
        self.streaming_enabled.load(Ordering::SeqCst)
    }

    pub fn set_streaming_enabled(&self, enabled: bool) {
        self.streaming_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn conversation_mode(&self) -> bool {
        self.conversation_mode.load(Ordering::SeqCst)
    }

    pub fn set_conversation_mode(&self, enabled: bool) {
        self.conversation_mode.store(enabled, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            streaming_enabled: self.streaming_enabled(),
            conversation_mode: self.conversation_mode(),
        }
    }
}

impl Default for AssistantContext {
    fn default() -> Self {
        Self::new(true, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flags() {
        let ctx = AssistantContext::default();
        assert_eq!(
            ctx.snapshot(),
            ContextSnapshot {
                streaming_enabled: true,
                conversation_mode: false
            }
        );
    }

    #[test]
    fn test_flags_toggle_independently() {
        let ctx = AssistantContext::new(false, false);
        ctx.set_conversation_mode(true);
        assert!(ctx.conversation_mode());
        assert!(!ctx.streaming_enabled());
        ctx.set_streaming_enabled(true);
        ctx.set_conversation_mode(false);
        assert!(ctx.streaming_enabled());
        assert!(!ctx.conversation_mode());
    }
}
