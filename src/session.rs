// src/session.rs
//! Per-session state: chat history and the three stat tracks.
//!
//! A [`Session`] is a cheap handle (an `Arc` around the locked state) that is
//! passed explicitly to every handler. Locks are held only for the duration
//! of a single read or write and never across an `.await`.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub type SessionId = String;

/// Number of slots in every stat track (levels 0-3).
pub const STAT_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    pub role: Role,
}

impl ChatMessage {
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: Role::Human,
        }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: Role::Ai,
        }
    }
}

/// Image references, one per level slot. Empty string = placeholder.
pub type StatTrack = [String; STAT_SLOTS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    Health,
    Mental,
    Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatTracks {
    pub health: StatTrack,
    pub mental: StatTrack,
    pub money: StatTrack,
}

impl StatTracks {
    pub fn get(&self, kind: StatKind) -> &StatTrack {
        match kind {
            StatKind::Health => &self.health,
            StatKind::Mental => &self.mental,
            StatKind::Money => &self.money,
        }
    }

    fn get_mut(&mut self, kind: StatKind) -> &mut StatTrack {
        match kind {
            StatKind::Health => &mut self.health,
            StatKind::Mental => &mut self.mental,
            StatKind::Money => &mut self.money,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    messages: Vec<ChatMessage>,
    stats: StatTracks,
    generating: bool,
}

#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn append(&self, message: ChatMessage) {
        let mut state = self.state.lock();
        state.messages.push(message);
        debug!(session = %self.id, messages = state.messages.len(), "Message appended");
    }

    /// Full history in chronological order.
    pub fn read_all(&self) -> Vec<ChatMessage> {
        self.state.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stat_tracks(&self) -> StatTracks {
        self.state.lock().stats.clone()
    }

    /// Replace one stat track. The rules deciding the values live outside this crate.
    pub fn set_stat_track(&self, kind: StatKind, track: StatTrack) {
        *self.state.lock().stats.get_mut(kind) = track;
    }

    /// Mark a model invocation as running. `None` if one already is.
    pub fn begin_generation(&self) -> Option<GenerationGuard> {
        let mut state = self.state.lock();
        if state.generating {
            return None;
        }
        state.generating = true;
        Some(GenerationGuard {
            session: self.clone(),
        })
    }

    pub fn is_generating(&self) -> bool {
        self.state.lock().generating
    }
}

/// Clears the session's generating flag when dropped.
#[derive(Debug)]
pub struct GenerationGuard {
    session: Session,
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        self.session.state.lock().generating = false;
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing session for `id`, or a fresh one with empty history and placeholder stats.
    pub fn get_or_init(&self, id: &str) -> Session {
        if let Some(session) = self.sessions.read().get(id) {
            return session.clone();
        }
        let mut sessions = self.sessions.write();
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                info!(session = %id, "Session initialized");
                Session::new(id.to_string())
            })
            .clone()
    }

    /// Create a session under a new random id.
    pub fn create(&self) -> Session {
        self.get_or_init(&Uuid::new_v4().to_string())
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_init_is_idempotent() {
        let store = SessionStore::new();
        let a = store.get_or_init("abc");
        a.append(ChatMessage::human("hi"));

        let again = store.get_or_init("abc");
        assert_eq!(again.read_all(), vec![ChatMessage::human("hi")]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_history_keeps_insertion_order() {
        let session = SessionStore::new().create();
        session.append(ChatMessage::human("one"));
        session.append(ChatMessage::ai("two"));
        session.append(ChatMessage::human("three"));
        let texts: Vec<_> = session.read_all().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_stat_tracks_default_to_placeholders() {
        let stats = SessionStore::new().create().stat_tracks();
        for kind in [StatKind::Health, StatKind::Mental, StatKind::Money] {
            assert_eq!(stats.get(kind).len(), STAT_SLOTS);
            assert!(stats.get(kind).iter().all(String::is_empty));
        }
    }

    #[test]
    fn test_set_stat_track_touches_one_track() {
        let session = SessionStore::new().create();
        let track: StatTrack = ["h1.png".into(), "h2.png".into(), String::new(), String::new()];
        session.set_stat_track(StatKind::Health, track.clone());

        let stats = session.stat_tracks();
        assert_eq!(stats.health, track);
        assert_eq!(stats.money, StatTrack::default());
    }

    #[test]
    fn test_generation_guard() {
        let session = SessionStore::new().create();
        let guard = session.begin_generation().expect("first generation");
        assert!(session.is_generating());
        assert!(session.begin_generation().is_none());
        drop(guard);
        assert!(!session.is_generating());
        assert!(session.begin_generation().is_some());
    }

    #[test]
    fn test_message_json_shape() {
        let json = serde_json::to_value(ChatMessage::ai("Hello")).unwrap();
        assert_eq!(json, serde_json::json!({"text": "Hello", "role": "ai"}));
    }
}
