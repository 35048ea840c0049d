//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        ElevenLabsSttAdapter, ElevenLabsTtsAdapter, OpenRouterLlmAdapter, PgSessionStore,
        TavusVideoAdapter,
    },
    config::Config,
    error::ApiError,
    web::{router, state::VideoOwners, ApiDoc, AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use axum::Router;
use medixa_core::memory::{InMemoryAudioClips, InMemorySessionStore};
use medixa_core::ports::{ChatSessionStore, TextToSpeechService};
use medixa_core::video::VideoProvisioner;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Session Store ---
    let sessions: Arc<dyn ChatSessionStore> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let store = PgSessionStore::new(db_pool);
            info!("Running database migrations...");
            store.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; chat sessions are kept in memory only.");
            Arc::new(InMemorySessionStore::new())
        }
    };

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new()
        .with_api_base(config.llm_base_url.clone())
        .with_api_key(config.openrouter_api_key.clone());
    let llm = Arc::new(OpenRouterLlmAdapter::new(
        Client::with_config(openai_config),
        config.llm_model.clone(),
        config.llm_temperature,
    ));

    let http = reqwest::Client::new();
    let stt = Arc::new(ElevenLabsSttAdapter::new(
        http.clone(),
        config.elevenlabs_api_key.clone(),
        config.stt_model.clone(),
        config.audio_sample_rate,
    ));
    let tts: Option<Arc<dyn TextToSpeechService>> = match &config.elevenlabs_api_key {
        Some(key) => Some(Arc::new(ElevenLabsTtsAdapter::new(
            http.clone(),
            key.clone(),
            config.tts_model.clone(),
            config.elevenlabs_voice_id.clone(),
        ))),
        None => {
            warn!("ELEVENLABS_API_KEY not set; voice input and spoken replies are disabled.");
            None
        }
    };
    if config.tavus_api_key.is_none() {
        warn!("TAVUS_API_KEY not set; video consultations use a placeholder.");
    }
    let video = VideoProvisioner::new(
        Arc::new(TavusVideoAdapter::new(
            http,
            config.tavus_api_key.clone(),
            config.tavus_persona_id.clone(),
        )),
        config.service_timeout,
    )
    .with_placeholder_url(format!("{}/video/placeholder", config.public_base_url));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        sessions,
        llm,
        stt,
        tts,
        clips: Arc::new(InMemoryAudioClips::new(config.public_base_url.clone())),
        video,
        video_owners: VideoOwners::default(),
        config: config.clone(),
    });

    // --- 5. Create the Web Router ---
    let origin = config
        .allowed_origin
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("Invalid ALLOWED_ORIGIN: {}", e)))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static(api_lib::web::middleware::PATIENT_HEADER),
        ]);

    let app = Router::new()
        .merge(router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
