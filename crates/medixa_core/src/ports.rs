//! crates/medixa_core/src/ports.rs
//!
//! Defines the service contracts (traits) the chat core depends on.
//! These traits form the boundary of the hexagonal architecture, keeping the
//! orchestrator independent of the database and of the hosted AI services.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{ChatSession, ConversationTurn, Message, VideoConversation};
use crate::media::EncodedImage;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Rate limited")]
    RateLimited,
    #[error("Timed out")]
    Timeout,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Shared payloads
//=========================================================================================

/// A playable (or transcribable) piece of audio and its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }
}

/// Outcome of a speech-to-text call. An empty recording is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    Speech(String),
    NoSpeech,
}

/// Everything the language model receives for one text turn.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub user_text: &'a str,
    /// Prior turns in chronological order, already windowed.
    pub history: &'a [ConversationTurn],
    pub has_image: bool,
    pub is_voice: bool,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Durable storage of chat sessions and their embedded message lists.
#[async_trait]
pub trait ChatSessionStore: Send + Sync {
    async fn create_session(&self, owner_id: Uuid, name: &str) -> PortResult<ChatSession>;

    /// Returns `Ok(None)` for a missing session so callers can provision fresh state.
    async fn get_session(&self, session_id: Uuid) -> PortResult<Option<ChatSession>>;

    /// Sessions of one owner, most recent activity first.
    async fn list_sessions(&self, owner_id: Uuid) -> PortResult<Vec<ChatSession>>;

    /// Appends to the end of the message list and bumps `last_activity_at`.
    ///
    /// This is a read-modify-write of the whole list with no version check:
    /// two concurrent writers on one session can lose a message (last write wins).
    async fn append_message(&self, session_id: Uuid, message: &Message) -> PortResult<()>;

    async fn rename_session(&self, session_id: Uuid, name: &str) -> PortResult<()>;

    /// Deletes the session together with all of its messages.
    async fn delete_session(&self, session_id: Uuid) -> PortResult<()>;
}

#[async_trait]
pub trait LanguageModelService: Send + Sync {
    /// Produces the assistant's reply to a text turn.
    async fn generate_response(&self, request: CompletionRequest<'_>) -> PortResult<String>;

    /// Vision entry point: comments on an image given the user's caption.
    async fn analyze_image(&self, image: &EncodedImage, caption: &str) -> PortResult<String>;
}

#[async_trait]
pub trait SpeechToTextService: Send + Sync {
    /// Transcribes recorded audio into text.
    async fn transcribe_audio(&self, audio: &AudioClip) -> PortResult<Transcript>;
}

#[async_trait]
pub trait TextToSpeechService: Send + Sync {
    /// Generates audio data from a string of text.
    async fn generate_audio(&self, text: &str) -> PortResult<AudioClip>;
}

/// Short-lived storage for audio attached to rendered messages.
#[async_trait]
pub trait AudioClipStore: Send + Sync {
    /// Stores the clip and returns the URL a client can fetch it from.
    async fn put_clip(&self, clip: AudioClip) -> PortResult<String>;

    async fn get_clip(&self, clip_id: &str) -> PortResult<Option<AudioClip>>;
}

#[async_trait]
pub trait VideoSessionService: Send + Sync {
    async fn create_conversation(&self) -> PortResult<VideoConversation>;

    async fn update_context(&self, conversation_id: &str, context: &str) -> PortResult<()>;

    async fn end_conversation(&self, conversation_id: &str) -> PortResult<()>;
}
