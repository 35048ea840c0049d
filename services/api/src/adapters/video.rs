//! services/api/src/adapters/video.rs
//!
//! This module contains the adapter for Tavus avatar video conversations.
//! It implements the `VideoSessionService` port from the `core` crate.

use async_trait::async_trait;
use medixa_core::domain::VideoConversation;
use medixa_core::ports::{PortError, PortResult, VideoSessionService};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::status_error;

pub const TAVUS_BASE_URL: &str = "https://tavusapi.com";

/// Context updates are cheap and must never hold up the consultation.
const CONTEXT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

const VIDEO_SYSTEM_PROMPT: &str = "You are Dr. Ava, a professional and empathetic AI medical assistant. \
Provide helpful medical guidance in simple, understandable language. \
Always recommend consulting healthcare professionals for serious concerns, and suggest emergency care immediately if symptoms seem severe. \
Ask relevant follow-up questions to better understand symptoms.";

#[derive(Serialize)]
struct ConversationProperties {
    max_call_duration: u32,
    participant_left_timeout: u32,
    enable_recording: bool,
    language: &'static str,
}

#[derive(Serialize)]
struct CreateConversationRequest<'a> {
    persona_id: &'a str,
    properties: ConversationProperties,
}

#[derive(Serialize)]
struct ContextUpdate<'a> {
    context: &'a str,
    system_prompt: &'a str,
}

#[derive(Deserialize)]
struct ConversationResponse {
    conversation_id: String,
    #[serde(default)]
    conversation_url: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct TavusVideoAdapter {
    client: Client,
    /// Without a key every call reports `Unauthorized`.
    api_key: Option<String>,
    persona_id: String,
}

impl TavusVideoAdapter {
    pub fn new(client: Client, api_key: Option<String>, persona_id: String) -> Self {
        Self {
            client,
            api_key,
            persona_id,
        }
    }

    fn api_key(&self) -> PortResult<&str> {
        self.api_key.as_deref().ok_or(PortError::Unauthorized)
    }

    fn create_request(&self) -> CreateConversationRequest<'_> {
        CreateConversationRequest {
            persona_id: &self.persona_id,
            properties: ConversationProperties {
                max_call_duration: 1800,
                participant_left_timeout: 60,
                enable_recording: false,
                language: "English",
            },
        }
    }
}

async fn check(response: reqwest::Response) -> PortResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error("Tavus", status, &body))
}

//=========================================================================================
// `VideoSessionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl VideoSessionService for TavusVideoAdapter {
    async fn create_conversation(&self) -> PortResult<VideoConversation> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .post(format!("{}/v2/conversations", TAVUS_BASE_URL))
            .header("x-api-key", api_key)
            .json(&self.create_request())
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let created: ConversationResponse = check(response)
            .await?
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(VideoConversation {
            conversation_id: created.conversation_id,
            conversation_url: created.conversation_url.unwrap_or_default(),
            status: created.status.unwrap_or_else(|| "active".to_string()),
        })
    }

    async fn update_context(&self, conversation_id: &str, context: &str) -> PortResult<()> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .put(format!(
                "{}/v2/conversations/{}/context",
                TAVUS_BASE_URL, conversation_id
            ))
            .header("x-api-key", api_key)
            .timeout(CONTEXT_UPDATE_TIMEOUT)
            .json(&ContextUpdate {
                context,
                system_prompt: VIDEO_SYSTEM_PROMPT,
            })
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        check(response).await?;
        Ok(())
    }

    async fn end_conversation(&self, conversation_id: &str) -> PortResult<()> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .delete(format!("{}/v2/conversations/{}", TAVUS_BASE_URL, conversation_id))
            .header("x-api-key", api_key)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        check(response).await?;
        Ok(())
    }
}
