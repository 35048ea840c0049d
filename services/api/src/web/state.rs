//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-connection microphone.

use crate::adapters::audio::PCM16_CONTENT_TYPE;
use crate::config::Config;
use async_trait::async_trait;
use medixa_core::context::ContextWindow;
use medixa_core::media::{MediaAccessError, MediaDevices, MediaKind, MediaStream};
use medixa_core::orchestrator::{ChatServices, OrchestratorConfig};
use medixa_core::ports::{
    AudioClipStore, ChatSessionStore, LanguageModelService, SpeechToTextService,
    TextToSpeechService,
};
use medixa_core::video::VideoProvisioner;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn ChatSessionStore>,
    pub llm: Arc<dyn LanguageModelService>,
    pub stt: Arc<dyn SpeechToTextService>,
    pub tts: Option<Arc<dyn TextToSpeechService>>,
    pub clips: Arc<dyn AudioClipStore>,
    pub video: VideoProvisioner,
    pub video_owners: VideoOwners,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn chat_services(&self) -> ChatServices {
        ChatServices {
            store: self.sessions.clone(),
            llm: self.llm.clone(),
            stt: self.stt.clone(),
            tts: self.tts.clone(),
            clips: self.clips.clone(),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            context_window: ContextWindow::new(
                self.config.context_max_turns,
                self.config.context_max_chars,
            ),
            max_image_bytes: self.config.max_image_bytes,
            max_recording_bytes: self.config.max_recording_bytes,
            service_timeout: self.config.service_timeout,
        }
    }
}

//=========================================================================================
// Video Conversation Owners
//=========================================================================================

/// Which patient opened each live video conversation.
#[derive(Clone, Default)]
pub struct VideoOwners {
    owners: Arc<Mutex<HashMap<String, Uuid>>>,
}

impl VideoOwners {
    pub async fn record(&self, conversation_id: &str, owner_id: Uuid) {
        self.owners
            .lock()
            .await
            .insert(conversation_id.to_string(), owner_id);
    }

    pub async fn is_owned_by(&self, conversation_id: &str, owner_id: Uuid) -> bool {
        self.owners.lock().await.get(conversation_id) == Some(&owner_id)
    }

    /// Forgets a conversation. Returns `false` when `owner_id` did not open it.
    pub async fn release(&self, conversation_id: &str, owner_id: Uuid) -> bool {
        let mut owners = self.owners.lock().await;
        if owners.get(conversation_id) != Some(&owner_id) {
            return false;
        }
        owners.remove(conversation_id);
        true
    }
}

//=========================================================================================
// Client Microphone (Specific to One WebSocket Connection)
//=========================================================================================

/// The browser's microphone as seen from the server: audio arrives as PCM16
/// frames on the socket, so "acquiring" it only means accepting those frames.
pub struct ClientMicrophone {
    sample_rate: u32,
}

impl ClientMicrophone {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

struct ClientAudioStream {
    content_type: String,
}

impl MediaStream for ClientAudioStream {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn stop_all_tracks(&mut self) {
        debug!("Client audio stream closed.");
    }
}

#[async_trait]
impl MediaDevices for ClientMicrophone {
    async fn acquire(&self, kind: MediaKind) -> Result<Box<dyn MediaStream>, MediaAccessError> {
        match kind {
            MediaKind::Microphone => Ok(Box::new(ClientAudioStream {
                content_type: format!("{};rate={}", PCM16_CONTENT_TYPE, self.sample_rate),
            })),
            // Camera frames are never streamed to the server.
            MediaKind::CameraAndMicrophone => Err(MediaAccessError::Unsupported),
        }
    }
}
