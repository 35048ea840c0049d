//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// `None` runs the service on the in-memory session store.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub allowed_origin: String,
    /// Prefix for audio clip URLs handed to clients.
    pub public_base_url: String,

    pub openrouter_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_temperature: f32,

    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_voice_id: String,
    pub stt_model: String,
    pub tts_model: String,

    pub tavus_api_key: Option<String>,
    pub tavus_persona_id: String,

    pub context_max_turns: usize,
    pub context_max_chars: usize,
    pub service_timeout: Duration,
    pub max_image_bytes: usize,
    pub max_recording_bytes: usize,
    pub audio_sample_rate: u32,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        // --- Server Settings ---
        let bind_address = parse("BIND_ADDRESS", &var("BIND_ADDRESS", "0.0.0.0:3000"))?;
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let log_level_str = var("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let allowed_origin = var("ALLOWED_ORIGIN", "http://localhost:5173");
        let public_base_url = var("PUBLIC_BASE_URL", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();

        // --- Language Model ---
        let openrouter_api_key = lookup("OPENROUTER_API_KEY")
            .ok_or_else(|| ConfigError::MissingVar("OPENROUTER_API_KEY".to_string()))?;
        let llm_base_url = var("LLM_BASE_URL", "https://openrouter.ai/api/v1");
        let llm_model = var("LLM_MODEL", "openai/gpt-4o-mini");
        let llm_temperature = parse("LLM_TEMPERATURE", &var("LLM_TEMPERATURE", "0.4"))?;

        // --- Speech and Video (as optional) ---
        let elevenlabs_api_key = lookup("ELEVENLABS_API_KEY").filter(|k| !k.is_empty());
        let elevenlabs_voice_id = var("ELEVENLABS_VOICE_ID", "paRTfYnetOrTukxfEm1J");
        let stt_model = var("STT_MODEL", "scribe_v1");
        let tts_model = var("TTS_MODEL", "eleven_monolingual_v1");
        let tavus_api_key = lookup("TAVUS_API_KEY").filter(|k| !k.is_empty());
        let tavus_persona_id = var("TAVUS_PERSONA_ID", "p9863a04af01");

        // --- Chat Limits ---
        let context_max_turns = parse("CONTEXT_MAX_TURNS", &var("CONTEXT_MAX_TURNS", "20"))?;
        let context_max_chars = parse("CONTEXT_MAX_CHARS", &var("CONTEXT_MAX_CHARS", "24000"))?;
        let timeout_secs: u64 = parse("SERVICE_TIMEOUT_SECS", &var("SERVICE_TIMEOUT_SECS", "30"))?;
        let max_image_bytes = parse("MAX_IMAGE_BYTES", &var("MAX_IMAGE_BYTES", "10485760"))?;
        let max_recording_bytes =
            parse("MAX_RECORDING_BYTES", &var("MAX_RECORDING_BYTES", "16777216"))?;
        let audio_sample_rate = parse("AUDIO_SAMPLE_RATE", &var("AUDIO_SAMPLE_RATE", "48000"))?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            allowed_origin,
            public_base_url,
            openrouter_api_key,
            llm_base_url,
            llm_model,
            llm_temperature,
            elevenlabs_api_key,
            elevenlabs_voice_id,
            stt_model,
            tts_model,
            tavus_api_key,
            tavus_persona_id,
            context_max_turns,
            context_max_chars,
            service_timeout: Duration::from_secs(timeout_secs),
            max_image_bytes,
            max_recording_bytes,
            audio_sample_rate,
        })
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}
