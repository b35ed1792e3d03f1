//! Process-wide bookkeeping of live sessions.
//!
//! A connection owns its sessions' vendor handles; the registry only holds the
//! small shared state other tasks need: activity timestamps, the `listening`
//! and `call_active` flags, the audio-busy guard and the latest expression
//! result.
//!
//! Session ids are chosen by clients, so a reconnecting client can register an
//! id that an older connection still holds. Each entry records the connection
//! that registered it last, and only that owner may remove it.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use polly_core::expression::ExpressionResult;
use serde::Serialize;
use tokio::sync::RwLock;

/// Identifies the connection that registered a session.
pub type OwnerId = u64;

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub owner: OwnerId,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub listening: bool,
    /// Set while an external voice call is carrying this session's audio.
    pub call_active: bool,
    /// Set while speech is being generated for this session.
    pub audio_streaming: bool,
    pub expression: Option<ExpressionResult>,
}

impl SessionInfo {
    fn new(session_id: &str, owner: OwnerId) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            owner,
            started_at: now,
            last_activity: now,
            listening: true,
            call_active: false,
            audio_streaming: false,
            expression: None,
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionInfo>>,
    next_owner: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a fresh owner id for a new connection.
    pub fn new_owner(&self) -> OwnerId {
        self.next_owner.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registers a session for `owner`. Returns false if it already existed,
    /// in which case `owner` takes the entry over and its flags are kept.
    pub async fn register(&self, session_id: &str, owner: OwnerId) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(info) => {
                info.owner = owner;
                info.last_activity = Utc::now();
                false
            }
            None => {
                sessions.insert(session_id.to_string(), SessionInfo::new(session_id, owner));
                true
            }
        }
    }

    /// Removes the session if `owner` still holds it.
    pub async fn remove_if_owner(&self, session_id: &str, owner: OwnerId) -> Option<SessionInfo> {
        let mut sessions = self.sessions.write().await;
        if sessions.get(session_id)?.owner != owner {
            return None;
        }
        sessions.remove(session_id)
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(session_id).cloned()
    }

    #[cfg(test)]
    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn touch(&self, session_id: &str) {
        if let Some(info) = self.sessions.write().await.get_mut(session_id) {
            info.last_activity = Utc::now();
        }
    }

    pub async fn set_listening(&self, session_id: &str, listening: bool) -> bool {
        match self.sessions.write().await.get_mut(session_id) {
            Some(info) => {
                info.listening = listening;
                true
            }
            None => false,
        }
    }

    pub async fn set_call_active(&self, session_id: &str, active: bool) -> bool {
        match self.sessions.write().await.get_mut(session_id) {
            Some(info) => {
                info.call_active = active;
                true
            }
            None => false,
        }
    }

    pub async fn is_call_active(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(session_id)
            .is_some_and(|info| info.call_active)
    }

    /// Number of sessions currently handed to an external voice call.
    pub async fn active_calls(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|info| info.call_active)
            .count()
    }

    pub async fn is_listening(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(session_id)
            .is_some_and(|info| info.listening)
    }

    /// Claims the session's audio slot. Returns false if speech is already
    /// being generated for it or the session is gone.
    pub async fn try_begin_audio(&self, session_id: &str) -> bool {
        match self.sessions.write().await.get_mut(session_id) {
            Some(info) if !info.audio_streaming => {
                info.audio_streaming = true;
                true
            }
            _ => false,
        }
    }

    pub async fn end_audio(&self, session_id: &str) {
        if let Some(info) = self.sessions.write().await.get_mut(session_id) {
            info.audio_streaming = false;
        }
    }

    pub async fn is_audio_streaming(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(session_id)
            .is_some_and(|info| info.audio_streaming)
    }

    pub async fn set_expression(&self, session_id: &str, result: ExpressionResult) {
        if let Some(info) = self.sessions.write().await.get_mut(session_id) {
            info.expression = Some(result);
        }
    }

    pub async fn expression(&self, session_id: &str) -> Option<ExpressionResult> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .and_then(|info| info.expression.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = SessionRegistry::new();
        let owner = registry.new_owner();
        assert!(registry.register("s1", owner).await);
        assert!(!registry.register("s1", owner).await);
        assert!(registry.register("s2", owner).await);
        assert_eq!(registry.active_count().await, 2);

        let info = registry.get("s1").await.unwrap();
        assert_eq!(info.owner, owner);
        assert!(info.listening);
        assert!(!info.call_active);
        assert!(!info.audio_streaming);
        assert!(info.expression.is_none());

        assert!(registry.remove_if_owner("s1", owner).await.is_some());
        assert!(registry.remove_if_owner("s1", owner).await.is_none());
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_reregistration_transfers_ownership() {
        let registry = SessionRegistry::new();
        let old = registry.new_owner();
        let new = registry.new_owner();
        assert_ne!(old, new);

        registry.register("s1", old).await;
        registry.set_listening("s1", false).await;
        assert!(!registry.register("s1", new).await);

        // The old owner can no longer remove the entry.
        assert!(registry.remove_if_owner("s1", old).await.is_none());
        assert!(registry.contains("s1").await);
        assert!(!registry.is_listening("s1").await);

        let removed = registry.remove_if_owner("s1", new).await.unwrap();
        assert_eq!(removed.owner, new);
        assert!(removed.started_at <= removed.last_activity);
        assert!(!registry.contains("s1").await);
    }

    #[tokio::test]
    async fn test_audio_guard_is_exclusive() {
        let registry = SessionRegistry::new();
        assert!(!registry.try_begin_audio("missing").await);

        registry.register("s1", registry.new_owner()).await;
        assert!(registry.try_begin_audio("s1").await);
        assert!(!registry.try_begin_audio("s1").await);
        assert!(registry.is_audio_streaming("s1").await);

        registry.end_audio("s1").await;
        assert!(!registry.is_audio_streaming("s1").await);
        assert!(registry.try_begin_audio("s1").await);
    }

    #[tokio::test]
    async fn test_listening_and_expression() {
        let registry = SessionRegistry::new();
        assert!(!registry.set_listening("s1", false).await);
        assert!(!registry.is_listening("s1").await);

        registry.register("s1", registry.new_owner()).await;
        assert!(registry.is_listening("s1").await);
        assert!(registry.set_listening("s1", false).await);
        assert!(!registry.is_listening("s1").await);

        registry.set_expression("s1", ExpressionResult::no_face()).await;
        assert!(registry.expression("s1").await.is_some());
    }

    #[tokio::test]
    async fn test_call_active_flag_is_counted() {
        let registry = SessionRegistry::new();
        assert!(!registry.set_call_active("s1", true).await);

        let owner = registry.new_owner();
        registry.register("s1", owner).await;
        registry.register("s2", owner).await;
        assert_eq!(registry.active_calls().await, 0);

        assert!(registry.set_call_active("s1", true).await);
        assert!(registry.is_call_active("s1").await);
        assert!(!registry.is_call_active("s2").await);
        assert_eq!(registry.active_calls().await, 1);

        registry.set_call_active("s1", false).await;
        assert_eq!(registry.active_calls().await, 0);
    }

    #[tokio::test]
    async fn test_touch_advances_activity() {
        let registry = SessionRegistry::new();
        registry.register("s1", registry.new_owner()).await;
        let before = registry.get("s1").await.unwrap().last_activity;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        registry.touch("s1").await;
        assert!(registry.get("s1").await.unwrap().last_activity > before);
    }
}
