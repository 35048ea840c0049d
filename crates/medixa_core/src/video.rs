//! crates/medixa_core/src/video.rs
//!
//! Avatar video consultations. Provisioning never blocks the consultation
//! from opening: when the remote service fails, a local placeholder
//! conversation is handed out instead and later calls for it are skipped.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::{VideoConversation, PLACEHOLDER_CONVERSATION_PREFIX};
use crate::media::{MediaAccessError, MediaDevices, MediaHandle, MediaKind};
use crate::ports::{PortError, VideoSessionService};

/// Context given to the avatar as soon as a consultation starts.
pub const INITIAL_VIDEO_CONTEXT: &str =
    "Patient has initiated a video consultation for medical guidance and health assessment.";

#[derive(Clone)]
pub struct VideoProvisioner {
    service: Arc<dyn VideoSessionService>,
    timeout: Duration,
    placeholder_url: String,
}

impl VideoProvisioner {
    pub fn new(service: Arc<dyn VideoSessionService>, timeout: Duration) -> Self {
        Self {
            service,
            timeout,
            placeholder_url: String::new(),
        }
    }

    /// URL handed out with placeholder conversations.
    pub fn with_placeholder_url(mut self, url: impl Into<String>) -> Self {
        self.placeholder_url = url.into();
        self
    }

    /// Creates a remote conversation, or a placeholder if that fails.
    pub async fn open(&self) -> VideoConversation {
        let created = tokio::time::timeout(self.timeout, self.service.create_conversation())
            .await
            .unwrap_or(Err(PortError::Timeout));
        match created {
            Ok(conversation) => {
                info!(conversation_id = %conversation.conversation_id, "Video conversation created.");
                if !conversation.is_placeholder() {
                    self.update_context(&conversation.conversation_id, INITIAL_VIDEO_CONTEXT);
                }
                conversation
            }
            Err(e) => {
                warn!("Video provisioning failed, using a placeholder: {}", e);
                placeholder_conversation(&self.placeholder_url)
            }
        }
    }

    /// Pushes new context to the avatar in the background. Failures are only logged.
    pub fn update_context(&self, conversation_id: &str, context: &str) -> Option<JoinHandle<()>> {
        if is_placeholder_id(conversation_id) {
            return None;
        }
        let service = self.service.clone();
        let timeout = self.timeout;
        let conversation_id = conversation_id.to_string();
        let context = context.to_string();
        Some(tokio::spawn(async move {
            let result = tokio::time::timeout(
                timeout,
                service.update_context(&conversation_id, &context),
            )
            .await
            .unwrap_or(Err(PortError::Timeout));
            if let Err(e) = result {
                warn!(%conversation_id, "Failed to update video context: {}", e);
            }
        }))
    }

    /// Ends a conversation. Placeholders have nothing to end.
    pub async fn end(&self, conversation_id: &str) {
        if is_placeholder_id(conversation_id) {
            return;
        }
        let result = tokio::time::timeout(self.timeout, self.service.end_conversation(conversation_id))
            .await
            .unwrap_or(Err(PortError::Timeout));
        match result {
            Ok(()) => info!(%conversation_id, "Video conversation ended."),
            Err(e) => warn!(%conversation_id, "Failed to end video conversation: {}", e),
        }
    }
}

pub fn placeholder_conversation(url: &str) -> VideoConversation {
    VideoConversation {
        conversation_id: format!(
            "{}{}",
            PLACEHOLDER_CONVERSATION_PREFIX,
            Utc::now().timestamp_millis()
        ),
        conversation_url: url.to_string(),
        status: "fallback".to_string(),
    }
}

fn is_placeholder_id(conversation_id: &str) -> bool {
    conversation_id.starts_with(PLACEHOLDER_CONVERSATION_PREFIX)
        || conversation_id.starts_with("mock_")
}

/// A running consultation: the conversation plus the camera and microphone it holds.
pub struct VideoConsultation {
    conversation: VideoConversation,
    media: MediaHandle,
}

impl VideoConsultation {
    /// Opens the devices first so a permission problem is reported before
    /// anything is provisioned remotely.
    pub async fn start(
        provisioner: &VideoProvisioner,
        devices: &dyn MediaDevices,
    ) -> Result<Self, MediaAccessError> {
        let stream = devices.acquire(MediaKind::CameraAndMicrophone).await?;
        let media = MediaHandle::new(stream);
        let conversation = provisioner.open().await;
        Ok(Self {
            conversation,
            media,
        })
    }

    pub fn conversation(&self) -> &VideoConversation {
        &self.conversation
    }

    pub fn is_live(&self) -> bool {
        self.media.is_active()
    }

    pub async fn end(mut self, provisioner: &VideoProvisioner) {
        self.media.release();
        provisioner.end(&self.conversation.conversation_id).await;
    }
}
