//! crates/medixa_core/src/domain.rs
//!
//! Defines the core data structures of the chat assistant: sessions, the
//! messages they own, and the ephemeral turns sent to the language model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name given to sessions created without an explicit label.
pub const DEFAULT_SESSION_NAME: &str = "New Chat";

/// Identifier of the synthetic greeting shown at the top of every chat view.
pub const WELCOME_MESSAGE_ID: &str = "welcome";

/// Text of the synthetic greeting. It is never persisted and never sent to the model.
pub const WELCOME_TEXT: &str = "Hello! I'm Dr. Ava, your AI health assistant. How can I help you today? You can type your message, record a voice note, or upload an image of any symptoms you'd like me to analyze.";

//=========================================================================================
// Messages
//=========================================================================================

/// A message identifier, unique within its session.
///
/// Identifiers are derived from the creation time in milliseconds; see
/// [`MessageIdGenerator`] for how collisions inside one session are avoided.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A single entry in a chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    /// Text body. Voice messages carry their transcript, image messages their caption.
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Ephemeral reference to recorded or synthesized audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_voice_message: bool,
}

impl Message {
    pub fn user(id: MessageId, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(id, MessageRole::User, content.into(), timestamp)
    }

    pub fn assistant(id: MessageId, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(id, MessageRole::Assistant, content.into(), timestamp)
    }

    fn new(id: MessageId, role: MessageRole, content: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            role,
            content,
            timestamp,
            audio_url: None,
            image_url: None,
            is_voice_message: false,
        }
    }

    /// The greeting that opens every chat view.
    pub fn welcome(timestamp: DateTime<Utc>) -> Self {
        Self::assistant(MessageId(WELCOME_MESSAGE_ID.to_string()), WELCOME_TEXT, timestamp)
    }

    pub fn is_welcome(&self) -> bool {
        self.id.as_str() == WELCOME_MESSAGE_ID
    }

    pub fn with_audio_url(mut self, audio_url: Option<String>) -> Self {
        self.audio_url = audio_url;
        self
    }

    pub fn with_image_url(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url;
        self
    }

    pub fn as_voice_message(mut self) -> Self {
        self.is_voice_message = true;
        self
    }
}

/// Hands out time-based message identifiers that never repeat within one writer.
///
/// Two messages created in the same millisecond (a user turn followed by a
/// fast fallback reply, for example) get consecutive values.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    last: i64,
}

impl MessageIdGenerator {
    pub fn next(&mut self, now: DateTime<Utc>) -> MessageId {
        let millis = now.timestamp_millis().max(self.last + 1);
        self.last = millis;
        MessageId(millis.to_string())
    }

    /// Moves the generator past every numeric identifier already in `messages`,
    /// so ids minted after a reload cannot collide with persisted ones.
    pub fn observe(&mut self, messages: &[Message]) {
        let highest = messages
            .iter()
            .filter_map(|m| m.id.as_str().parse::<i64>().ok())
            .max();
        if let Some(highest) = highest {
            self.last = self.last.max(highest);
        }
    }
}

//=========================================================================================
// Sessions
//=========================================================================================

/// A patient's chat conversation and its ordered message history.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    pub id: Uuid,
    /// The patient who exclusively owns this session.
    pub owner_id: Uuid,
    pub display_name: String,
    /// Chronological, append-only.
    pub messages: Vec<Message>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(owner_id: Uuid, display_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            display_name: display_name.into(),
            messages: Vec::new(),
            last_activity_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, owner_id: Uuid) -> bool {
        self.owner_id == owner_id
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

//=========================================================================================
// Language-model context
//=========================================================================================

/// Which side of the conversation a context turn came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

/// A prior exchange as presented to the language model. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
}

impl ConversationTurn {
    pub fn from_message(message: &Message) -> Self {
        let role = match message.role {
            MessageRole::User => TurnRole::User,
            MessageRole::Assistant => TurnRole::Model,
        };
        Self {
            role,
            text: message.content.clone(),
        }
    }
}

//=========================================================================================
// Video consultations
//=========================================================================================

/// Prefix of conversation ids that were provisioned locally because the
/// remote video service was unavailable.
pub const PLACEHOLDER_CONVERSATION_PREFIX: &str = "fallback_";

/// A joinable avatar video conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoConversation {
    pub conversation_id: String,
    pub conversation_url: String,
    pub status: String,
}

impl VideoConversation {
    /// True when no remote conversation backs this one.
    pub fn is_placeholder(&self) -> bool {
        self.conversation_id.starts_with(PLACEHOLDER_CONVERSATION_PREFIX)
            || self.conversation_id.starts_with("mock_")
    }
}
