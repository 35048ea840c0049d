//! crates/medixa_core/src/memory.rs
//!
//! In-memory implementations of the storage ports. Used by the test suites and
//! as the session store when the service runs without a database.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{ChatSession, Message};
use crate::ports::{AudioClip, AudioClipStore, ChatSessionStore, PortError, PortResult};

//=========================================================================================
// Session store
//=========================================================================================

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<Uuid, ChatSession>>,
    unavailable: AtomicBool,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a backend outage: every call fails until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> PortResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("session store unavailable".to_string()));
        }
        Ok(())
    }

    fn not_found(session_id: Uuid) -> PortError {
        PortError::NotFound(format!("Session {} not found", session_id))
    }
}

#[async_trait]
impl ChatSessionStore for InMemorySessionStore {
    async fn create_session(&self, owner_id: Uuid, name: &str) -> PortResult<ChatSession> {
        self.check_available()?;
        let session = ChatSession::new(owner_id, name);
        self.sessions.lock().await.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Option<ChatSession>> {
        self.check_available()?;
        Ok(self.sessions.lock().await.get(&session_id).cloned())
    }

    async fn list_sessions(&self, owner_id: Uuid) -> PortResult<Vec<ChatSession>> {
        self.check_available()?;
        let mut sessions: Vec<ChatSession> = self
            .sessions
            .lock()
            .await
            .values()
            .filter(|s| s.is_owned_by(owner_id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    async fn append_message(&self, session_id: Uuid, message: &Message) -> PortResult<()> {
        self.check_available()?;

        // Read the current list...
        let mut messages = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(&session_id)
                .map(|s| s.messages.clone())
                .ok_or_else(|| Self::not_found(session_id))?
        };

        // ...then write it back in a separate step, as a remote backend would.
        tokio::task::yield_now().await;
        messages.push(message.clone());

        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| Self::not_found(session_id))?;
        let now = Utc::now();
        session.messages = messages;
        session.last_activity_at = now;
        session.updated_at = now;
        Ok(())
    }

    async fn rename_session(&self, session_id: Uuid, name: &str) -> PortResult<()> {
        self.check_available()?;
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| Self::not_found(session_id))?;
        let now = Utc::now();
        session.display_name = name.to_string();
        session.updated_at = now;
        session.last_activity_at = now;
        Ok(())
    }

    async fn delete_session(&self, session_id: Uuid) -> PortResult<()> {
        self.check_available()?;
        self.sessions
            .lock()
            .await
            .remove(&session_id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(session_id))
    }
}

//=========================================================================================
// Audio clips
//=========================================================================================

const DEFAULT_CLIP_CAPACITY: usize = 256;

/// Bounded clip cache; the oldest clip is evicted once capacity is reached.
pub struct InMemoryAudioClips {
    base_url: String,
    capacity: usize,
    clips: Mutex<ClipCache>,
}

#[derive(Default)]
struct ClipCache {
    order: VecDeque<String>,
    by_id: HashMap<String, AudioClip>,
}

impl InMemoryAudioClips {
    /// `base_url` is the public prefix clips are served under, e.g. `http://host:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_capacity(base_url, DEFAULT_CLIP_CAPACITY)
    }

    pub fn with_capacity(base_url: impl Into<String>, capacity: usize) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            capacity: capacity.max(1),
            clips: Mutex::new(ClipCache::default()),
        }
    }
}

#[async_trait]
impl AudioClipStore for InMemoryAudioClips {
    async fn put_clip(&self, clip: AudioClip) -> PortResult<String> {
        let clip_id = Uuid::new_v4().simple().to_string();
        let mut cache = self.clips.lock().await;
        while cache.order.len() >= self.capacity {
            if let Some(oldest) = cache.order.pop_front() {
                cache.by_id.remove(&oldest);
            }
        }
        cache.order.push_back(clip_id.clone());
        cache.by_id.insert(clip_id.clone(), clip);
        Ok(format!("{}/audio/{}", self.base_url, clip_id))
    }

    async fn get_clip(&self, clip_id: &str) -> PortResult<Option<AudioClip>> {
        Ok(self.clips.lock().await.by_id.get(clip_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;

    fn message(id: &str, text: &str) -> Message {
        Message::user(MessageId(id.to_string()), text, Utc::now())
    }

    #[tokio::test]
    async fn appends_keep_insertion_order_and_bump_activity() {
        let store = InMemorySessionStore::new();
        let session = store.create_session(Uuid::new_v4(), "New Chat").await.unwrap();

        store.append_message(session.id, &message("1", "first")).await.unwrap();
        store.append_message(session.id, &message("2", "second")).await.unwrap();

        let loaded = store.get_session(session.id).await.unwrap().unwrap();
        let ids: Vec<&str> = loaded.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(loaded.last_activity_at >= session.last_activity_at);
    }

    #[tokio::test]
    async fn lists_newest_activity_first_and_only_for_the_owner() {
        let store = InMemorySessionStore::new();
        let owner = Uuid::new_v4();
        let older = store.create_session(owner, "older").await.unwrap();
        let newer = store.create_session(owner, "newer").await.unwrap();
        store.create_session(Uuid::new_v4(), "someone else").await.unwrap();

        store.append_message(older.id, &message("1", "bump")).await.unwrap();

        let listed = store.list_sessions(owner).await.unwrap();
        let names: Vec<&str> = listed.iter().map(|s| s.display_name.as_str()).collect();
        assert_eq!(names, vec!["older", "newer"]);
        assert!(listed.iter().all(|s| s.id == older.id || s.id == newer.id));
    }

    #[tokio::test]
    async fn delete_removes_messages_and_reports_not_found_afterwards() {
        let store = InMemorySessionStore::new();
        let session = store.create_session(Uuid::new_v4(), "New Chat").await.unwrap();
        store.append_message(session.id, &message("1", "hi")).await.unwrap();

        store.delete_session(session.id).await.unwrap();

        assert_eq!(store.get_session(session.id).await.unwrap(), None);
        assert!(matches!(
            store.append_message(session.id, &message("2", "late")).await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rename_leaves_id_and_messages_alone() {
        let store = InMemorySessionStore::new();
        let session = store.create_session(Uuid::new_v4(), "New Chat").await.unwrap();
        store.append_message(session.id, &message("1", "hi")).await.unwrap();

        store.rename_session(session.id, "Migraine follow-up").await.unwrap();

        let renamed = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(renamed.id, session.id);
        assert_eq!(renamed.display_name, "Migraine follow-up");
        assert_eq!(renamed.messages.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_are_last_writer_wins() {
        let store = InMemorySessionStore::new();
        let session = store.create_session(Uuid::new_v4(), "New Chat").await.unwrap();

        let first = message("1", "from tab one");
        let second = message("2", "from tab two");
        let (a, b) = tokio::join!(
            store.append_message(session.id, &first),
            store.append_message(session.id, &second),
        );
        assert!(a.is_ok() && b.is_ok());

        // Both writers read the empty list before either wrote; the second write wins.
        let loaded = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages, vec![second]);
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let store = InMemorySessionStore::new();
        store.set_unavailable(true);
        assert!(store.create_session(Uuid::new_v4(), "New Chat").await.is_err());
        assert!(store.list_sessions(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn clip_cache_evicts_the_oldest_clip() {
        let clips = InMemoryAudioClips::with_capacity("http://localhost:3000/", 1);
        let first = clips.put_clip(AudioClip::new(vec![1], "audio/mpeg")).await.unwrap();
        let second = clips.put_clip(AudioClip::new(vec![2], "audio/mpeg")).await.unwrap();

        assert!(second.starts_with("http://localhost:3000/audio/"));
        let first_id = first.rsplit('/').next().unwrap();
        let second_id = second.rsplit('/').next().unwrap();
        assert_eq!(clips.get_clip(first_id).await.unwrap(), None);
        assert_eq!(clips.get_clip(second_id).await.unwrap().unwrap().bytes, vec![2]);
    }
}
