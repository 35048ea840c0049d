//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::adapters::audio::{is_pcm16, pcm16_to_wav};
use crate::web::middleware::Patient;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json},
    Extension,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use medixa_core::domain::{ChatSession, Message, MessageRole, DEFAULT_SESSION_NAME};
use medixa_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

/// Longest last-message preview returned in session lists, in characters.
const PREVIEW_CHARS: usize = 100;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_sessions_handler,
        create_session_handler,
        get_session_handler,
        rename_session_handler,
        delete_session_handler,
        get_audio_handler,
        create_video_handler,
        update_video_context_handler,
        end_video_handler,
    ),
    components(
        schemas(
            SessionSummary,
            SessionDetail,
            MessageView,
            CreateSessionRequest,
            RenameSessionRequest,
            VideoConversationResponse,
            VideoContextRequest
        )
    ),
    tags(
        (name = "Medixa Chat API", description = "Chat sessions, audio clips and video consultations.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A session as shown in the chat history list.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct SessionSummary {
    pub id: Uuid,
    pub display_name: String,
    pub message_count: usize,
    /// Truncated content of the most recent message.
    pub last_message: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ChatSession> for SessionSummary {
    fn from(session: &ChatSession) -> Self {
        Self {
            id: session.id,
            display_name: session.display_name.clone(),
            message_count: session.messages.len(),
            last_message: session.last_message().map(|m| preview(&m.content)),
            last_activity_at: session.last_activity_at,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct MessageView {
    pub id: String,
    /// `user` or `assistant`.
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub audio_url: Option<String>,
    pub image_url: Option<String>,
    pub is_voice_message: bool,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        Self {
            id: message.id.to_string(),
            role: role.to_string(),
            content: message.content.clone(),
            timestamp: message.timestamp,
            audio_url: message.audio_url.clone(),
            image_url: message.image_url.clone(),
            is_voice_message: message.is_voice_message,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub messages: Vec<MessageView>,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct CreateSessionRequest {
    pub name: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct RenameSessionRequest {
    pub name: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct VideoConversationResponse {
    pub conversation_id: String,
    pub conversation_url: String,
    pub status: String,
    /// True when the video service was unavailable and no remote call backs this conversation.
    pub placeholder: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct VideoContextRequest {
    pub context: String,
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let mut cut: String = content.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}

type HandlerError = (StatusCode, String);

fn port_error(context: &str, e: PortError) -> HandlerError {
    match e {
        PortError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        PortError::Timeout => {
            error!("{}: {}", context, e);
            (StatusCode::GATEWAY_TIMEOUT, format!("{}: timed out", context))
        }
        other => {
            error!("{}: {:?}", context, other);
            (StatusCode::INTERNAL_SERVER_ERROR, context.to_string())
        }
    }
}

/// Loads a session and checks it belongs to `patient`. Foreign sessions are reported as missing.
async fn owned_session(
    state: &AppState,
    patient: Patient,
    session_id: Uuid,
) -> Result<ChatSession, HandlerError> {
    let session = state
        .sessions
        .get_session(session_id)
        .await
        .map_err(|e| port_error("Failed to load session", e))?;
    match session {
        Some(session) if session.is_owned_by(patient.0) => Ok(session),
        _ => Err((
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        )),
    }
}

//=========================================================================================
// Session Handlers
//=========================================================================================

/// List the patient's sessions, most recent activity first.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "Sessions of the calling patient", body = [SessionSummary]),
        (status = 401, description = "Missing x-patient-id header")
    ),
    params(("x-patient-id" = Uuid, Header, description = "The authenticated patient."))
)]
pub async fn list_sessions_handler(
    State(state): State<Arc<AppState>>,
    Extension(patient): Extension<Patient>,
) -> Result<impl IntoResponse, HandlerError> {
    let sessions = state
        .sessions
        .list_sessions(patient.0)
        .await
        .map_err(|e| port_error("Failed to list sessions", e))?;
    let summaries: Vec<SessionSummary> = sessions.iter().map(SessionSummary::from).collect();
    Ok(Json(summaries))
}

/// Create an empty session.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = SessionSummary),
        (status = 401, description = "Missing x-patient-id header")
    ),
    params(("x-patient-id" = Uuid, Header, description = "The authenticated patient."))
)]
pub async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(patient): Extension<Patient>,
    body: Bytes,
) -> Result<impl IntoResponse, HandlerError> {
    // The body is optional; an empty POST creates a session with the default name.
    let request: CreateSessionRequest = if body.is_empty() {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    };
    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_SESSION_NAME);

    let session = state
        .sessions
        .create_session(patient.0, name)
        .await
        .map_err(|e| port_error("Failed to create session", e))?;
    info!(session_id = %session.id, owner_id = %patient.0, "Chat session created.");
    Ok((StatusCode::CREATED, Json(SessionSummary::from(&session))))
}

/// Fetch one session with its full message history.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "The session", body = SessionDetail),
        (status = 404, description = "No such session for this patient")
    ),
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("x-patient-id" = Uuid, Header, description = "The authenticated patient.")
    )
)]
pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(patient): Extension<Patient>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let session = owned_session(&state, patient, session_id).await?;
    Ok(Json(SessionDetail {
        summary: SessionSummary::from(&session),
        messages: session.messages.iter().map(MessageView::from).collect(),
    }))
}

/// Rename a session. Messages and id are left untouched.
#[utoipa::path(
    patch,
    path = "/sessions/{id}",
    request_body = RenameSessionRequest,
    responses(
        (status = 204, description = "Renamed"),
        (status = 400, description = "Empty name"),
        (status = 404, description = "No such session for this patient")
    ),
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("x-patient-id" = Uuid, Header, description = "The authenticated patient.")
    )
)]
pub async fn rename_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(patient): Extension<Patient>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<RenameSessionRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Session name cannot be empty.".to_string(),
        ));
    }
    owned_session(&state, patient, session_id).await?;
    state
        .sessions
        .rename_session(session_id, name)
        .await
        .map_err(|e| port_error("Failed to rename session", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete a session and all of its messages.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "No such session for this patient")
    ),
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("x-patient-id" = Uuid, Header, description = "The authenticated patient.")
    )
)]
pub async fn delete_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(patient): Extension<Patient>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    owned_session(&state, patient, session_id).await?;
    state
        .sessions
        .delete_session(session_id)
        .await
        .map_err(|e| port_error("Failed to delete session", e))?;
    info!(%session_id, "Chat session deleted.");
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Audio Clips
//=========================================================================================

/// Download a recorded or synthesized audio clip. Raw PCM recordings are served as WAV.
#[utoipa::path(
    get,
    path = "/audio/{clip_id}",
    responses(
        (status = 200, description = "Audio bytes"),
        (status = 404, description = "Unknown or expired clip")
    ),
    params(("clip_id" = String, Path, description = "Clip id from an audio_url"))
)]
pub async fn get_audio_handler(
    State(state): State<Arc<AppState>>,
    Path(clip_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let clip = state
        .clips
        .get_clip(&clip_id)
        .await
        .map_err(|e| port_error("Failed to load audio", e))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Audio clip not found".to_string()))?;

    if is_pcm16(&clip.content_type) {
        let wav = pcm16_to_wav(&clip.bytes, state.config.audio_sample_rate).map_err(|e| {
            error!("Failed to encode WAV: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode audio".to_string(),
            )
        })?;
        return Ok(([(header::CONTENT_TYPE, "audio/wav".to_string())], wav));
    }
    Ok(([(header::CONTENT_TYPE, clip.content_type)], clip.bytes))
}

//=========================================================================================
// Video Consultations
//=========================================================================================

/// Start an avatar video consultation. Never fails: a placeholder is returned
/// when the video service is unavailable.
#[utoipa::path(
    post,
    path = "/video/conversations",
    responses((status = 201, description = "Conversation ready", body = VideoConversationResponse)),
    params(("x-patient-id" = Uuid, Header, description = "The authenticated patient."))
)]
pub async fn create_video_handler(
    State(state): State<Arc<AppState>>,
    Extension(patient): Extension<Patient>,
) -> impl IntoResponse {
    let conversation = state.video.open().await;
    state
        .video_owners
        .record(&conversation.conversation_id, patient.0)
        .await;
    info!(owner_id = %patient.0, conversation_id = %conversation.conversation_id, "Video consultation opened.");
    let placeholder = conversation.is_placeholder();
    (
        StatusCode::CREATED,
        Json(VideoConversationResponse {
            conversation_id: conversation.conversation_id,
            conversation_url: conversation.conversation_url,
            status: conversation.status,
            placeholder,
        }),
    )
}

/// Push new context to a running conversation. Applied in the background.
#[utoipa::path(
    put,
    path = "/video/conversations/{id}/context",
    request_body = VideoContextRequest,
    responses(
        (status = 202, description = "Update scheduled"),
        (status = 404, description = "No such conversation for this patient")
    ),
    params(
        ("id" = String, Path, description = "Conversation id"),
        ("x-patient-id" = Uuid, Header, description = "The authenticated patient.")
    )
)]
pub async fn update_video_context_handler(
    State(state): State<Arc<AppState>>,
    Extension(patient): Extension<Patient>,
    Path(conversation_id): Path<String>,
    Json(request): Json<VideoContextRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    if !state
        .video_owners
        .is_owned_by(&conversation_id, patient.0)
        .await
    {
        return Err(conversation_not_found(&conversation_id));
    }
    state.video.update_context(&conversation_id, &request.context);
    Ok(StatusCode::ACCEPTED)
}

/// End a conversation.
#[utoipa::path(
    delete,
    path = "/video/conversations/{id}",
    responses(
        (status = 204, description = "Ended"),
        (status = 404, description = "No such conversation for this patient")
    ),
    params(
        ("id" = String, Path, description = "Conversation id"),
        ("x-patient-id" = Uuid, Header, description = "The authenticated patient.")
    )
)]
pub async fn end_video_handler(
    State(state): State<Arc<AppState>>,
    Extension(patient): Extension<Patient>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    if !state.video_owners.release(&conversation_id, patient.0).await {
        return Err(conversation_not_found(&conversation_id));
    }
    state.video.end(&conversation_id).await;
    Ok(StatusCode::NO_CONTENT)
}

fn conversation_not_found(conversation_id: &str) -> HandlerError {
    (
        StatusCode::NOT_FOUND,
        format!("Video conversation {} not found", conversation_id),
    )
}

/// Page shown in place of the avatar when no live conversation could be created.
pub async fn video_placeholder_handler() -> impl IntoResponse {
    Html(
        "<!doctype html><html><body><p>The video consultation is unavailable right now. \
         You can keep chatting with Dr. Medixa by text or voice.</p></body></html>",
    )
}
