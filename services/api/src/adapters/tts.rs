//! services/api/src/adapters/tts.rs
//!
//! This module contains the adapter for ElevenLabs' Text-to-Speech service.
//! It implements the `TextToSpeechService` port from the `core` crate.

use async_trait::async_trait;
use medixa_core::ports::{AudioClip, PortError, PortResult, TextToSpeechService};
use reqwest::Client;
use serde::Serialize;

use super::sst::ELEVENLABS_BASE_URL;
use super::status_error;

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `TextToSpeechService` port using the ElevenLabs API.
#[derive(Clone)]
pub struct ElevenLabsTtsAdapter {
    client: Client,
    api_key: String,
    model: String,
    voice_id: String,
}

impl ElevenLabsTtsAdapter {
    /// Creates a new `ElevenLabsTtsAdapter`.
    pub fn new(client: Client, api_key: String, model: String, voice_id: String) -> Self {
        Self {
            client,
            api_key,
            model,
            voice_id,
        }
    }
}

//=========================================================================================
// `TextToSpeechService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TextToSpeechService for ElevenLabsTtsAdapter {
    /// Generates MP3 audio for the given text.
    async fn generate_audio(&self, text: &str) -> PortResult<AudioClip> {
        let request = SpeechRequest {
            text,
            model_id: &self.model,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
                style: 0.0,
                use_speaker_boost: true,
            },
        };

        let response = self
            .client
            .post(format!(
                "{}/text-to-speech/{}",
                ELEVENLABS_BASE_URL, self.voice_id
            ))
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("ElevenLabs TTS", status, &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(AudioClip::new(bytes.to_vec(), "audio/mpeg"))
    }
}
