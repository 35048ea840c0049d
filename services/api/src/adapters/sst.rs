//! services/api/src/adapters/sst.rs
//!
//! This module contains the adapter for ElevenLabs' Speech-to-Text service.
//! It implements the `SpeechToTextService` port from the `core` crate.

use async_trait::async_trait;
use medixa_core::ports::{AudioClip, PortError, PortResult, SpeechToTextService, Transcript};
use reqwest::{multipart, Client};
use serde::Deserialize;
use tracing::debug;

use super::audio::{is_pcm16, pcm16_to_wav};
use super::status_error;

pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";

#[derive(Deserialize)]
struct SpeechToTextResponse {
    #[serde(default)]
    text: String,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `SpeechToTextService` port using ElevenLabs Scribe.
#[derive(Clone)]
pub struct ElevenLabsSttAdapter {
    client: Client,
    /// Without a key every call reports `Unauthorized`.
    api_key: Option<String>,
    model: String,
    sample_rate: u32,
}

impl ElevenLabsSttAdapter {
    /// Creates a new `ElevenLabsSttAdapter`. `sample_rate` applies to raw PCM16 input.
    pub fn new(client: Client, api_key: Option<String>, model: String, sample_rate: u32) -> Self {
        Self {
            client,
            api_key,
            model,
            sample_rate,
        }
    }

    /// Returns the upload body and its file name, converting raw PCM to WAV.
    fn prepare_upload(&self, audio: &AudioClip) -> PortResult<(Vec<u8>, &'static str, String)> {
        if is_pcm16(&audio.content_type) {
            let wav = pcm16_to_wav(&audio.bytes, self.sample_rate)
                .map_err(|e| PortError::Unexpected(format!("Failed to encode WAV: {}", e)))?;
            Ok((wav, "recording.wav", "audio/wav".to_string()))
        } else {
            Ok((audio.bytes.clone(), "recording.webm", audio.content_type.clone()))
        }
    }
}

//=========================================================================================
// `SpeechToTextService` Trait Implementation
//=========================================================================================

#[async_trait]
impl SpeechToTextService for ElevenLabsSttAdapter {
    async fn transcribe_audio(&self, audio: &AudioClip) -> PortResult<Transcript> {
        let api_key = self.api_key.as_deref().ok_or(PortError::Unauthorized)?;
        if audio.bytes.is_empty() {
            return Ok(Transcript::NoSpeech);
        }

        let (body, file_name, mime) = self.prepare_upload(audio)?;
        debug!(bytes = body.len(), %mime, "Sending audio for transcription.");
        let file = multipart::Part::bytes(body)
            .file_name(file_name)
            .mime_str(&mime)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let form = multipart::Form::new()
            .part("file", file)
            .text("model_id", self.model.clone())
            .text("language_code", "en");

        let response = self
            .client
            .post(format!("{}/speech-to-text", ELEVENLABS_BASE_URL))
            .header("xi-api-key", api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("ElevenLabs Speech-to-Text", status, &body));
        }

        let parsed: SpeechToTextResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(transcript_from_text(parsed.text))
    }
}

fn transcript_from_text(text: String) -> Transcript {
    let text = text.trim();
    if text.is_empty() {
        Transcript::NoSpeech
    } else {
        Transcript::Speech(text.to_string())
    }
}
