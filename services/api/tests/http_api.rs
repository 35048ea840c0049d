//! End-to-end tests of the REST surface against in-memory stores and stub services.

use api_lib::config::Config;
use api_lib::web::{middleware::PATIENT_HEADER, router, state::VideoOwners, AppState};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use medixa_core::domain::{Message, MessageId, VideoConversation};
use medixa_core::media::EncodedImage;
use medixa_core::memory::{InMemoryAudioClips, InMemorySessionStore};
use medixa_core::ports::{
    AudioClip, AudioClipStore, ChatSessionStore, CompletionRequest, LanguageModelService,
    PortError, PortResult, SpeechToTextService, Transcript, VideoSessionService,
};
use medixa_core::video::VideoProvisioner;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
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

struct SilentStt;

#[async_trait]
impl SpeechToTextService for SilentStt {
    async fn transcribe_audio(&self, _audio: &AudioClip) -> PortResult<Transcript> {
        Ok(Transcript::NoSpeech)
    }
}

struct OfflineVideo;

#[async_trait]
impl VideoSessionService for OfflineVideo {
    async fn create_conversation(&self) -> PortResult<VideoConversation> {
        Err(PortError::Unauthorized)
    }

    async fn update_context(&self, _conversation_id: &str, _context: &str) -> PortResult<()> {
        Err(PortError::Unauthorized)
    }

    async fn end_conversation(&self, _conversation_id: &str) -> PortResult<()> {
        Err(PortError::Unauthorized)
    }
}

struct TestApp {
    router: Router,
    sessions: Arc<InMemorySessionStore>,
    clips: Arc<InMemoryAudioClips>,
}

fn test_app() -> TestApp {
    let config = Config::from_lookup(|key| match key {
        "OPENROUTER_API_KEY" => Some("test-key".to_string()),
        "PUBLIC_BASE_URL" => Some("http://medixa.test".to_string()),
        "AUDIO_SAMPLE_RATE" => Some("16000".to_string()),
        _ => None,
    })
    .expect("test config");

    let sessions = Arc::new(InMemorySessionStore::new());
    let clips = Arc::new(InMemoryAudioClips::new(config.public_base_url.clone()));
    let video = VideoProvisioner::new(Arc::new(OfflineVideo), Duration::from_secs(1))
        .with_placeholder_url("http://medixa.test/video/placeholder");

    let state = Arc::new(AppState {
        sessions: sessions.clone(),
        llm: Arc::new(EchoLlm),
        stt: Arc::new(SilentStt),
        tts: None,
        clips: clips.clone(),
        video,
        video_owners: VideoOwners::default(),
        config: Arc::new(config),
    });

    TestApp {
        router: router(state),
        sessions,
        clips,
    }
}

fn request(method: &str, uri: &str, patient: Option<Uuid>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(patient) = patient {
        builder = builder.header(PATIENT_HEADER, patient.to_string());
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn protected_routes_require_the_patient_header() {
    let app = test_app();

    let missing = app
        .router
        .clone()
        .oneshot(request("GET", "/sessions", None, None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let malformed = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/sessions")
                .header(PATIENT_HEADER, "not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let health = app
        .router
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn sessions_can_be_created_listed_and_fetched() {
    let app = test_app();
    let patient = Uuid::new_v4();

    let created = app
        .router
        .clone()
        .oneshot(request("POST", "/sessions", Some(patient), None))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = body_json(created).await;
    assert_eq!(created["display_name"], "New Chat");
    assert_eq!(created["message_count"], 0);
    let session_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    let message = Message::user(MessageId("7".to_string()), "I have a headache", chrono::Utc::now());
    app.sessions.append_message(session_id, &message).await.unwrap();

    let named = app
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/sessions",
            Some(patient),
            Some(json!({"name": "  Rash follow-up  "})),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(named).await["display_name"], "Rash follow-up");

    let listed = app
        .router
        .clone()
        .oneshot(request("GET", "/sessions", Some(patient), None))
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);
    let listed = body_json(listed).await;
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let detail = app
        .router
        .oneshot(request(
            "GET",
            &format!("/sessions/{}", session_id),
            Some(patient),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(detail.status(), StatusCode::OK);
    let detail = body_json(detail).await;
    assert_eq!(detail["message_count"], 1);
    assert_eq!(detail["last_message"], "I have a headache");
    assert_eq!(detail["messages"][0]["role"], "user");
    assert_eq!(detail["messages"][0]["id"], "7");
}

#[tokio::test]
async fn another_patients_session_is_not_found() {
    let app = test_app();
    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    let session = app.sessions.create_session(owner, "New Chat").await.unwrap();
    let uri = format!("/sessions/{}", session.id);

    for req in [
        request("GET", &uri, Some(intruder), None),
        request("PATCH", &uri, Some(intruder), Some(json!({"name": "Mine now"}))),
        request("DELETE", &uri, Some(intruder), None),
    ] {
        let response = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    let untouched = app.sessions.get_session(session.id).await.unwrap().unwrap();
    assert_eq!(untouched.display_name, "New Chat");
}

#[tokio::test]
async fn sessions_can_be_renamed_and_deleted() {
    let app = test_app();
    let patient = Uuid::new_v4();
    let session = app.sessions.create_session(patient, "New Chat").await.unwrap();
    let uri = format!("/sessions/{}", session.id);

    let blank = app
        .router
        .clone()
        .oneshot(request("PATCH", &uri, Some(patient), Some(json!({"name": "   "}))))
        .await
        .unwrap();
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let renamed = app
        .router
        .clone()
        .oneshot(request("PATCH", &uri, Some(patient), Some(json!({"name": "Migraine"}))))
        .await
        .unwrap();
    assert_eq!(renamed.status(), StatusCode::NO_CONTENT);
    let stored = app.sessions.get_session(session.id).await.unwrap().unwrap();
    assert_eq!(stored.display_name, "Migraine");
    assert_eq!(stored.id, session.id);

    let deleted = app
        .router
        .clone()
        .oneshot(request("DELETE", &uri, Some(patient), None))
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let gone = app
        .router
        .oneshot(request("GET", &uri, Some(patient), None))
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn audio_clips_are_served_publicly_and_pcm_becomes_wav() {
    let app = test_app();

    let mp3_url = app
        .clips
        .put_clip(AudioClip::new(vec![0xFF, 0xFB, 0x90], "audio/mpeg"))
        .await
        .unwrap();
    let mp3_path = mp3_url.strip_prefix("http://medixa.test").unwrap();
    let mp3 = app
        .router
        .clone()
        .oneshot(request("GET", mp3_path, None, None))
        .await
        .unwrap();
    assert_eq!(mp3.status(), StatusCode::OK);
    assert_eq!(mp3.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(body_bytes(mp3).await, vec![0xFF, 0xFB, 0x90]);

    let pcm_url = app
        .clips
        .put_clip(AudioClip::new(vec![0u8; 320], "audio/L16;rate=16000"))
        .await
        .unwrap();
    let pcm_path = pcm_url.strip_prefix("http://medixa.test").unwrap();
    let wav = app
        .router
        .clone()
        .oneshot(request("GET", pcm_path, None, None))
        .await
        .unwrap();
    assert_eq!(wav.headers()[header::CONTENT_TYPE], "audio/wav");
    let wav = body_bytes(wav).await;
    assert_eq!(&wav[..4], b"RIFF");

    let missing = app
        .router
        .oneshot(request("GET", "/audio/nope", None, None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn video_consultations_fall_back_to_a_placeholder() {
    let app = test_app();
    let patient = Uuid::new_v4();

    let created = app
        .router
        .clone()
        .oneshot(request("POST", "/video/conversations", Some(patient), None))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = body_json(created).await;
    assert_eq!(created["placeholder"], true);
    assert_eq!(created["status"], "fallback");
    assert_eq!(created["conversation_url"], "http://medixa.test/video/placeholder");
    let conversation_id = created["conversation_id"].as_str().unwrap().to_string();

    let context = app
        .router
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/video/conversations/{}/context", conversation_id),
            Some(patient),
            Some(json!({"context": "Patient reports a rash."})),
        ))
        .await
        .unwrap();
    assert_eq!(context.status(), StatusCode::ACCEPTED);

    let ended = app
        .router
        .oneshot(request(
            "DELETE",
            &format!("/video/conversations/{}", conversation_id),
            Some(patient),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(ended.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn video_conversations_only_answer_to_the_patient_who_opened_them() {
    let app = test_app();
    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();

    let created = app
        .router
        .clone()
        .oneshot(request("POST", "/video/conversations", Some(owner), None))
        .await
        .unwrap();
    let conversation_id = body_json(created).await["conversation_id"]
        .as_str()
        .unwrap()
        .to_string();
    let context_uri = format!("/video/conversations/{}/context", conversation_id);
    let end_uri = format!("/video/conversations/{}", conversation_id);

    let foreign_update = app
        .router
        .clone()
        .oneshot(request(
            "PUT",
            &context_uri,
            Some(intruder),
            Some(json!({"context": "Not my call."})),
        ))
        .await
        .unwrap();
    assert_eq!(foreign_update.status(), StatusCode::NOT_FOUND);

    let foreign_end = app
        .router
        .clone()
        .oneshot(request("DELETE", &end_uri, Some(intruder), None))
        .await
        .unwrap();
    assert_eq!(foreign_end.status(), StatusCode::NOT_FOUND);

    let ended = app
        .router
        .clone()
        .oneshot(request("DELETE", &end_uri, Some(owner), None))
        .await
        .unwrap();
    assert_eq!(ended.status(), StatusCode::NO_CONTENT);

    let ended_twice = app
        .router
        .oneshot(request("DELETE", &end_uri, Some(owner), None))
        .await
        .unwrap();
    assert_eq!(ended_twice.status(), StatusCode::NOT_FOUND);
}
