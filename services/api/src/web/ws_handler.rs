//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a chat WebSocket connection.
//! Each connection owns one `ChatOrchestrator`; commands are applied in arrival order.

use crate::web::{
    middleware::Patient,
    protocol::{ClientMessage, ServerMessage},
    state::{AppState, ClientMicrophone},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use medixa_core::error::ChatError;
use medixa_core::media::ImageUpload;
use medixa_core::orchestrator::{ChatEvent, ChatOrchestrator};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(patient): Extension<Patient>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, patient))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, patient: Patient) {
    info!("New chat WebSocket connection for patient: {}", patient.0);

    let (sender, mut receiver) = socket.split();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ChatEvent>();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let writer_failed = CancellationToken::new();

    let writer = tokio::spawn(write_loop(
        sender,
        event_rx,
        reply_rx,
        writer_failed.clone(),
    ));

    let mut orchestrator = ChatOrchestrator::new(
        patient.0,
        app_state.chat_services(),
        app_state.orchestrator_config(),
    )
    .with_events(event_tx);
    let microphone = ClientMicrophone::new(app_state.config.audio_sample_rate);

    // --- Main Message Loop ---
    loop {
        let frame = tokio::select! {
            _ = writer_failed.cancelled() => {
                warn!("Outgoing channel closed; ending connection.");
                break;
            }
            frame = receiver.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if let Some(reply) = handle_text(&mut orchestrator, &microphone, &text).await {
                    let _ = reply_tx.send(reply);
                }
            }
            Some(Ok(Message::Binary(data))) => {
                if let Some(reply) = handle_audio(&mut orchestrator, &data) {
                    let _ = reply_tx.send(reply);
                }
            }
            Some(Ok(Message::Close(_))) => {
                info!("Client sent close message.");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
            None => {
                info!("Client disconnected.");
                break;
            }
        }
    }

    // --- Cleanup ---
    // Dropping the orchestrator releases any active recording and closes the event channel.
    drop(orchestrator);
    drop(reply_tx);
    if let Err(e) = writer.await {
        error!("WebSocket writer task panicked: {:?}", e);
    }
    info!("Chat WebSocket connection closed.");
}

/// Parses and applies one text frame, returning the direct reply, if any.
async fn handle_text(
    orchestrator: &mut ChatOrchestrator,
    microphone: &ClientMicrophone,
    text: &str,
) -> Option<ServerMessage> {
    let command = match serde_json::from_str::<ClientMessage>(text) {
        Ok(command) => command,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            return Some(ServerMessage::Error {
                message: format!("Unrecognized message: {}", e),
            });
        }
    };
    match dispatch(orchestrator, microphone, command).await {
        Ok(()) => None,
        Err(e) => {
            if !e.is_validation() {
                warn!("Chat command failed: {}", e);
            }
            Some(ServerMessage::Warning {
                message: e.to_string(),
            })
        }
    }
}

/// Feeds one binary frame to the active recording.
fn handle_audio(orchestrator: &mut ChatOrchestrator, data: &[u8]) -> Option<ServerMessage> {
    match orchestrator.push_audio(data) {
        Ok(()) => None,
        Err(ChatError::NotRecording) => {
            debug!("Dropping audio frame outside a recording.");
            None
        }
        Err(e) => Some(ServerMessage::Warning {
            message: e.to_string(),
        }),
    }
}

/// Applies one client command. Commands that act on the conversation open a
/// fresh session first if none has been loaded, but only once their input
/// has been validated.
async fn dispatch(
    orchestrator: &mut ChatOrchestrator,
    microphone: &ClientMicrophone,
    command: ClientMessage,
) -> Result<(), ChatError> {
    match command {
        ClientMessage::OpenSession { session_id } => {
            info!(?session_id, "Opening chat session.");
            orchestrator.open_session(session_id).await?;
        }
        ClientMessage::SendText { text } => {
            if text.trim().is_empty() {
                return Err(ChatError::EmptySubmission);
            }
            ensure_loaded(orchestrator).await?;
            orchestrator.submit_text(&text).await?;
        }
        ClientMessage::InitialMessage { text } => {
            if text.trim().is_empty() {
                return Ok(());
            }
            // Queued until the load below finishes.
            orchestrator.offer_initial_message(&text).await?;
            ensure_loaded(orchestrator).await?;
        }
        ClientMessage::StartRecording => {
            ensure_loaded(orchestrator).await?;
            orchestrator.start_recording(microphone).await?;
        }
        ClientMessage::StopRecording => {
            orchestrator.stop_recording().await?;
        }
        ClientMessage::CancelRecording => orchestrator.cancel_recording(),
        ClientMessage::SendImage {
            mime_type,
            data_base64,
            caption,
        } => {
            let upload = ImageUpload::from_base64(mime_type, &data_base64)?;
            upload.validate(orchestrator.config().max_image_bytes)?;
            ensure_loaded(orchestrator).await?;
            orchestrator
                .submit_image(upload, caption.as_deref())
                .await?;
        }
        ClientMessage::NewSession => {
            orchestrator.new_session().await?;
        }
        ClientMessage::RenameSession { name } => {
            if name.trim().is_empty() {
                return Err(ChatError::EmptySessionName);
            }
            ensure_loaded(orchestrator).await?;
            orchestrator.rename_session(&name).await?;
        }
        ClientMessage::DeleteSession { session_id } => {
            orchestrator.delete_session(session_id).await?;
        }
    }
    Ok(())
}

async fn ensure_loaded(orchestrator: &mut ChatOrchestrator) -> Result<(), ChatError> {
    if !orchestrator.is_loaded() {
        orchestrator.open_session(None).await?;
    }
    Ok(())
}

/// Serializes orchestrator events and direct replies onto the socket, events first.
/// Ends when both channels close or a send fails, cancelling `failed` in the latter case.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut events: UnboundedReceiver<ChatEvent>,
    mut replies: UnboundedReceiver<ServerMessage>,
    failed: CancellationToken,
) {
    loop {
        let outgoing = tokio::select! {
            biased;
            Some(event) = events.recv() => ServerMessage::from(event),
            Some(reply) = replies.recv() => reply,
            else => break,
        };

        let json = match serde_json::to_string(&outgoing) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize server message: {}", e);
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            warn!("Failed to send message to client.");
            failed.cancel();
            break;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use medixa_core::media::EncodedImage;
    use medixa_core::memory::{InMemoryAudioClips, InMemorySessionStore};
    use medixa_core::orchestrator::{ChatServices, OrchestratorConfig};
    use medixa_core::ports::{
        AudioClip, ChatSessionStore, CompletionRequest, LanguageModelService, PortResult,
        SpeechToTextService, Transcript,
    };
    use serde_json::Value;
    use uuid::Uuid;

    struct EchoLlm;

    #[async_trait]
    impl LanguageModelService for EchoLlm {
        async fn generate_response(&self, request: CompletionRequest<'_>) -> PortResult<String> {
            Ok(format!("You said: {}", request.user_text))
        }

        async fn analyze_image(&self, _image: &EncodedImage, _caption: &str) -> PortResult<String> {
            Ok("Looks fine.".to_string())
        }
    }

    struct FixedStt;

    #[async_trait]
    impl SpeechToTextService for FixedStt {
        async fn transcribe_audio(&self, _audio: &AudioClip) -> PortResult<Transcript> {
            Ok(Transcript::Speech("My knee hurts".to_string()))
        }
    }

    struct Connection {
        owner: Uuid,
        store: Arc<InMemorySessionStore>,
        orchestrator: ChatOrchestrator,
        microphone: ClientMicrophone,
        events: UnboundedReceiver<ChatEvent>,
    }

    impl Connection {
        fn new() -> Self {
            Self::with_config(OrchestratorConfig::default())
        }

        fn with_config(config: OrchestratorConfig) -> Self {
            let owner = Uuid::new_v4();
            let store = Arc::new(InMemorySessionStore::new());
            let services = ChatServices {
                store: store.clone(),
                llm: Arc::new(EchoLlm),
                stt: Arc::new(FixedStt),
                tts: None,
                clips: Arc::new(InMemoryAudioClips::new("http://medixa.test")),
            };
            let (tx, events) = mpsc::unbounded_channel();
            Self {
                owner,
                store,
                orchestrator: ChatOrchestrator::new(owner, services, config).with_events(tx),
                microphone: ClientMicrophone::new(16_000),
                events,
            }
        }

        async fn send(&mut self, frame: Value) -> Option<ServerMessage> {
            handle_text(&mut self.orchestrator, &self.microphone, &frame.to_string()).await
        }

        /// Everything the writer would have put on the socket so far, as JSON.
        fn drain(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(serde_json::to_value(ServerMessage::from(event)).unwrap());
            }
            out
        }

        async fn stored_sessions(&self) -> usize {
            self.store.list_sessions(self.owner).await.unwrap().len()
        }
    }

    fn kinds(frames: &[Value]) -> Vec<&str> {
        frames.iter().map(|f| f["type"].as_str().unwrap()).collect()
    }

    #[tokio::test]
    async fn send_text_on_a_fresh_connection_opens_a_session_first() {
        let mut conn = Connection::new();

        let reply = conn
            .send(serde_json::json!({"type": "send_text", "text": "I have a headache"}))
            .await;
        assert!(reply.is_none());

        let frames = conn.drain();
        assert_eq!(
            kinds(&frames),
            vec![
                "session_ready",
                "message_added",
                "delivery_updated",
                "state_changed",
                "message_added",
                "delivery_updated",
                "state_changed",
            ]
        );
        assert!(frames[0]["session_id"].is_string());
        assert_eq!(frames[1]["message"]["content"], "I have a headache");
        assert_eq!(frames[2]["delivery"], "confirmed");
        assert_eq!(frames[3]["state"], "awaiting_model_response");
        assert_eq!(frames[4]["message"]["content"], "You said: I have a headache");
        assert_eq!(frames[6]["state"], "idle");
        assert_eq!(conn.stored_sessions().await, 1);
    }

    #[tokio::test]
    async fn rejected_input_does_not_open_a_session() {
        let mut conn = Connection::new();

        let blank = conn
            .send(serde_json::json!({"type": "send_text", "text": "   "}))
            .await;
        assert!(matches!(blank, Some(ServerMessage::Warning { .. })));

        let not_an_image = conn
            .send(serde_json::json!({
                "type": "send_image",
                "mime_type": "application/pdf",
                "data_base64": "aGVsbG8=",
            }))
            .await;
        match not_an_image {
            Some(ServerMessage::Warning { message }) => {
                assert!(message.contains("application/pdf"))
            }
            other => panic!("expected a warning, got {:?}", other),
        }

        let unnamed = conn
            .send(serde_json::json!({"type": "rename_session", "name": ""}))
            .await;
        assert!(matches!(unnamed, Some(ServerMessage::Warning { .. })));

        let blank_initial = conn
            .send(serde_json::json!({"type": "initial_message", "text": " "}))
            .await;
        assert!(blank_initial.is_none());

        assert!(conn.drain().is_empty());
        assert!(!conn.orchestrator.is_loaded());
        assert_eq!(conn.stored_sessions().await, 0);
    }

    #[tokio::test]
    async fn initial_message_on_a_fresh_connection_is_sent_after_the_load() {
        let mut conn = Connection::new();

        let reply = conn
            .send(serde_json::json!({"type": "initial_message", "text": "Book a check-up"}))
            .await;
        assert!(reply.is_none());

        let frames = conn.drain();
        assert_eq!(frames[0]["type"], "session_ready");
        assert_eq!(frames[1]["type"], "message_added");
        assert_eq!(frames[1]["message"]["content"], "Book a check-up");
    }

    #[tokio::test]
    async fn recorded_audio_becomes_a_voice_message() {
        let mut conn = Connection::new();

        assert!(handle_audio(&mut conn.orchestrator, &[0, 1]).is_none());

        assert!(conn
            .send(serde_json::json!({"type": "start_recording"}))
            .await
            .is_none());
        let started = conn.drain();
        assert_eq!(kinds(&started), vec!["session_ready", "state_changed"]);
        assert_eq!(started[1]["state"], "recording");

        for chunk in [[0u8, 1, 2, 3], [4, 5, 6, 7]] {
            assert!(handle_audio(&mut conn.orchestrator, &chunk).is_none());
        }

        assert!(conn
            .send(serde_json::json!({"type": "stop_recording"}))
            .await
            .is_none());
        let frames = conn.drain();
        assert_eq!(frames[0]["type"], "recording_released");
        assert_eq!(frames[1]["state"], "transcribing_audio");
        assert_eq!(frames[2]["type"], "message_added");
        assert_eq!(frames[2]["message"]["content"], "My knee hurts");
        assert_eq!(frames[2]["message"]["is_voice_message"], true);
        assert!(frames[2]["message"]["audio_url"]
            .as_str()
            .unwrap()
            .starts_with("http://medixa.test/audio/"));

        let again = conn.send(serde_json::json!({"type": "stop_recording"})).await;
        assert!(matches!(again, Some(ServerMessage::Warning { .. })));
    }

    #[tokio::test]
    async fn oversized_recordings_are_reported_to_the_client() {
        let mut conn = Connection::with_config(OrchestratorConfig {
            max_recording_bytes: 4,
            ..OrchestratorConfig::default()
        });
        conn.send(serde_json::json!({"type": "start_recording"}))
            .await;
        conn.drain();

        assert!(handle_audio(&mut conn.orchestrator, &[0, 1, 2]).is_none());
        let reply = handle_audio(&mut conn.orchestrator, &[3, 4]);
        assert!(matches!(reply, Some(ServerMessage::Warning { .. })));
        assert!(!conn.orchestrator.is_recording());
        assert_eq!(kinds(&conn.drain()), vec!["recording_released", "state_changed"]);
    }

    #[tokio::test]
    async fn deleting_the_active_session_announces_its_replacement() {
        let mut conn = Connection::new();
        conn.send(serde_json::json!({"type": "open_session"})).await;
        let first = conn.drain()[0]["session_id"].as_str().unwrap().to_string();

        let reply = conn
            .send(serde_json::json!({"type": "delete_session", "session_id": first}))
            .await;
        assert!(reply.is_none());

        let frames = conn.drain();
        assert_eq!(kinds(&frames), vec!["session_ready"]);
        let replacement = frames[0]["session_id"].as_str().unwrap();
        assert_ne!(replacement, first);
        assert_eq!(conn.stored_sessions().await, 1);
    }

    #[tokio::test]
    async fn malformed_frames_get_an_error_reply() {
        let mut conn = Connection::new();

        let reply = handle_text(&mut conn.orchestrator, &conn.microphone, "{not json").await;
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));

        let unknown = conn.send(serde_json::json!({"type": "teleport"})).await;
        assert!(matches!(unknown, Some(ServerMessage::Error { .. })));
        assert!(conn.drain().is_empty());
    }
}
