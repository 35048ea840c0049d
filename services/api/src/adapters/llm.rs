//! services/api/src/adapters/llm.rs
//!
//! This module contains the adapter for the medical chat LLM.
//! It implements the `LanguageModelService` port from the `core` crate using
//! any OpenAI-compatible chat-completions endpoint (OpenRouter by default).

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use medixa_core::domain::{ConversationTurn, TurnRole};
use medixa_core::media::EncodedImage;
use medixa_core::ports::{CompletionRequest, LanguageModelService, PortError, PortResult};
use tracing::debug;

const SYSTEM_PROMPT: &str = r#"You are Dr. Medixa - a concise, empathetic, and professional medical assistant. Follow these rules:

1. Role & Objective: Provide clear, accurate, and actionable medical guidance.
2. Style: Professional yet warm. Be empathetic but brief - 3–5 sentences max unless more detail is explicitly requested.
3. Safety: Highlight if symptoms are serious. Advise seeing a doctor when needed.
4. Language: Simple and direct. Avoid jargon - use bullet points for clarity.
5. Best Practices:
   - Start with a one-sentence summary.
   - Offer 1–2 recommended next steps.
   - Include a short note reinforcing that this does not replace professional medical care.
6. When uncertain: Say "Not enough detail - please mention [missing info]"."#;

const IMAGE_NOTE: &str = "The user has shared an image. Acknowledge that you can see it.";
const VOICE_NOTE: &str = "The user sent a voice message. Acknowledge appropriately.";

/// The system prompt, extended for image and voice turns.
pub fn system_prompt(has_image: bool, is_voice: bool) -> String {
    let mut prompt = SYSTEM_PROMPT.to_string();
    if has_image {
        prompt.push_str("\n\n");
        prompt.push_str(IMAGE_NOTE);
    }
    if is_voice {
        prompt.push_str("\n\n");
        prompt.push_str(VOICE_NOTE);
    }
    prompt
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `LanguageModelService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenRouterLlmAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenRouterLlmAdapter {
    /// Creates a new `OpenRouterLlmAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String, temperature: f32) -> Self {
        Self {
            client,
            model,
            temperature,
        }
    }

    async fn complete(&self, messages: Vec<ChatCompletionRequestMessage>) -> PortResult<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| PortError::Unexpected("LLM response contained no text content.".to_string()))
    }
}

/// Builds the message list for a text turn: system prompt, prior turns, then
/// the latest user input.
pub fn build_messages(request: &CompletionRequest<'_>) -> PortResult<Vec<ChatCompletionRequestMessage>> {
    let mut messages = Vec::with_capacity(request.history.len() + 2);
    messages.push(
        ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt(request.has_image, request.is_voice))
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .into(),
    );
    for turn in request.history {
        messages.push(history_message(turn)?);
    }
    messages.push(
        ChatCompletionRequestUserMessageArgs::default()
            .content(request.user_text)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .into(),
    );
    Ok(messages)
}

fn history_message(turn: &ConversationTurn) -> PortResult<ChatCompletionRequestMessage> {
    let message = match turn.role {
        TurnRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(turn.text.as_str())
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .into(),
        TurnRole::Model => ChatCompletionRequestAssistantMessageArgs::default()
            .content(turn.text.as_str())
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .into(),
    };
    Ok(message)
}

//=========================================================================================
// `LanguageModelService` Trait Implementation
//=========================================================================================

#[async_trait]
impl LanguageModelService for OpenRouterLlmAdapter {
    async fn generate_response(&self, request: CompletionRequest<'_>) -> PortResult<String> {
        debug!(
            history = request.history.len(),
            is_voice = request.is_voice,
            "Requesting chat completion."
        );
        let messages = build_messages(&request)?;
        self.complete(messages).await
    }

    async fn analyze_image(&self, image: &EncodedImage, caption: &str) -> PortResult<String> {
        let parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(caption)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(
                    ImageUrlArgs::default()
                        .url(image.data_url())
                        .build()
                        .map_err(|e| PortError::Unexpected(e.to_string()))?,
                )
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt(true, false))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];
        self.complete(messages).await
    }
}
