//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for the chat assistant.

use medixa_core::domain::{Message, MessageId};
use medixa_core::orchestrator::{ActivityState, ChatEvent, Delivery, RenderedMessage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================
// NOTE: Voice recordings are sent as raw PCM16 Binary frames between `start_recording`
// and `stop_recording`, not as part of this enum.
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Loads an existing session, or provisions a new one when no id is given.
    OpenSession {
        #[serde(default)]
        session_id: Option<Uuid>,
    },

    SendText { text: String },

    /// A quick-start message. Sent at most once per distinct value.
    InitialMessage { text: String },

    StartRecording,
    StopRecording,
    CancelRecording,

    SendImage {
        mime_type: String,
        data_base64: String,
        #[serde(default)]
        caption: Option<String>,
    },

    NewSession,
    RenameSession { name: String },
    DeleteSession { session_id: Uuid },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The session finished loading; `messages` starts with the welcome message.
    SessionReady {
        session_id: Option<Uuid>,
        messages: Vec<RenderedMessage>,
    },

    MessageAdded {
        message: Message,
        delivery: Delivery,
    },

    DeliveryUpdated {
        message_id: MessageId,
        delivery: Delivery,
    },

    AudioAttached {
        message_id: MessageId,
        audio_url: String,
    },

    StateChanged { state: ActivityState },

    /// The server stopped accepting audio frames.
    RecordingReleased,

    /// Something the user can correct or that degraded the chat.
    Warning { message: String },

    /// The client sent something the server could not understand.
    Error { message: String },
}

impl From<ChatEvent> for ServerMessage {
    fn from(event: ChatEvent) -> Self {
        match event {
            ChatEvent::SessionReady {
                session_id,
                messages,
            } => ServerMessage::SessionReady {
                session_id,
                messages,
            },
            ChatEvent::MessageAdded(rendered) => ServerMessage::MessageAdded {
                message: rendered.message,
                delivery: rendered.delivery,
            },
            ChatEvent::DeliveryUpdated {
                message_id,
                delivery,
            } => ServerMessage::DeliveryUpdated {
                message_id,
                delivery,
            },
            ChatEvent::AudioAttached {
                message_id,
                audio_url,
            } => ServerMessage::AudioAttached {
                message_id,
                audio_url,
            },
            ChatEvent::StateChanged(state) => ServerMessage::StateChanged { state },
            ChatEvent::RecordingReleased => ServerMessage::RecordingReleased,
            ChatEvent::Warning(message) => ServerMessage::Warning { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn client_messages_use_snake_case_tags() {
        let open: ClientMessage = serde_json::from_str(r#"{"type":"open_session"}"#).unwrap();
        assert_eq!(open, ClientMessage::OpenSession { session_id: None });

        let image: ClientMessage = serde_json::from_value(json!({
            "type": "send_image",
            "mime_type": "image/png",
            "data_base64": "cG5n"
        }))
        .unwrap();
        assert_eq!(
            image,
            ClientMessage::SendImage {
                mime_type: "image/png".into(),
                data_base64: "cG5n".into(),
                caption: None
            }
        );
    }

    #[test]
    fn chat_events_serialize_as_tagged_server_messages() {
        let message = Message::user(MessageId("42".into()), "hi", Utc::now());
        let added = ServerMessage::from(ChatEvent::MessageAdded(RenderedMessage {
            message,
            delivery: Delivery::Unconfirmed,
        }));
        let json = serde_json::to_value(&added).unwrap();
        assert_eq!(json["type"], "message_added");
        assert_eq!(json["delivery"], "unconfirmed");
        assert_eq!(json["message"]["id"], "42");

        let state = serde_json::to_value(ServerMessage::from(ChatEvent::StateChanged(
            ActivityState::AwaitingModelResponse,
        )))
        .unwrap();
        assert_eq!(
            state,
            json!({"type": "state_changed", "state": "awaiting_model_response"})
        );
    }
}
