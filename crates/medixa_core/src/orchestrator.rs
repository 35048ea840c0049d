//! crates/medixa_core/src/orchestrator.rs
//!
//! The chat orchestrator: one instance drives one patient's chat view.
//!
//! It owns the in-memory transcript (welcome message first), the active
//! session id and any in-progress recording. Every submission follows the
//! same path: render the user message, persist it, build context, ask the
//! model, then render and persist the reply. Transcription, model, speech and
//! storage failures all degrade in place, so every accepted submission ends
//! with exactly one assistant message.

use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::ContextWindow;
use crate::domain::{ChatSession, Message, MessageId, MessageIdGenerator, DEFAULT_SESSION_NAME};
use crate::error::ChatError;
use crate::media::{
    EncodedImage, ImageUpload, MediaDevices, MediaKind, Recording, DEFAULT_IMAGE_CAPTION,
    DEFAULT_MAX_IMAGE_BYTES, DEFAULT_MAX_RECORDING_BYTES, IMAGE_PLACEHOLDER,
};
use crate::ports::{
    AudioClipStore, ChatSessionStore, CompletionRequest, LanguageModelService, PortError,
    PortResult, SpeechToTextService, TextToSpeechService, Transcript,
};

//=========================================================================================
// Degraded replies
//=========================================================================================

/// Assistant reply used when the language model cannot answer a text turn.
pub const MODEL_FALLBACK_REPLY: &str = "I'm experiencing technical difficulties right now. For urgent concerns, please contact a healthcare professional.";

/// Assistant reply used when the vision endpoint cannot analyze an image.
pub const IMAGE_FALLBACK_REPLY: &str = "I'm having trouble analyzing the image right now. Please describe your symptoms in text.";

pub const NO_SPEECH_TEXT: &str = "I couldn't detect any speech in your recording. Please try speaking more clearly or closer to the microphone.";
pub const STT_NOT_CONFIGURED_TEXT: &str = "Speech-to-text service is not configured properly. Please type your message instead.";
pub const STT_RESTRICTED_TEXT: &str = "Speech-to-text service access is restricted. Please type your message instead.";
pub const STT_RATE_LIMITED_TEXT: &str = "Speech-to-text service is temporarily unavailable. Please try again later or type your message.";
pub const STT_FAILED_TEXT: &str = "I had trouble understanding your voice message. Please try speaking more clearly or type your message instead.";

const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_secs(30);

//=========================================================================================
// Observable state
//=========================================================================================

/// What the orchestrator is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Idle,
    Recording,
    TranscribingAudio,
    AnalyzingImage,
    AwaitingModelResponse,
}

/// Persistence status of a rendered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Shown, persistence still in flight.
    Unconfirmed,
    /// Stored in the session.
    Confirmed,
    /// Visible for this view only; the store rejected it or no session exists.
    LocalOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedMessage {
    pub message: Message,
    pub delivery: Delivery,
}

/// Notifications for whatever presents the chat.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    SessionReady {
        session_id: Option<Uuid>,
        messages: Vec<RenderedMessage>,
    },
    MessageAdded(RenderedMessage),
    DeliveryUpdated {
        message_id: MessageId,
        delivery: Delivery,
    },
    AudioAttached {
        message_id: MessageId,
        audio_url: String,
    },
    StateChanged(ActivityState),
    RecordingReleased,
    Warning(String),
}

/// One user turn and the assistant turn it produced, as rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub user: Message,
    pub assistant: Message,
}

//=========================================================================================
// Wiring
//=========================================================================================

/// The external collaborators an orchestrator talks to.
#[derive(Clone)]
pub struct ChatServices {
    pub store: Arc<dyn ChatSessionStore>,
    pub llm: Arc<dyn LanguageModelService>,
    pub stt: Arc<dyn SpeechToTextService>,
    /// Optional; replies are text-only without it.
    pub tts: Option<Arc<dyn TextToSpeechService>>,
    pub clips: Arc<dyn AudioClipStore>,
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub context_window: ContextWindow,
    pub max_image_bytes: usize,
    /// A recording that grows past this is discarded.
    pub max_recording_bytes: usize,
    /// Applied to every storage and service call.
    pub service_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            context_window: ContextWindow::default(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_recording_bytes: DEFAULT_MAX_RECORDING_BYTES,
            service_timeout: DEFAULT_SERVICE_TIMEOUT,
        }
    }
}

//=========================================================================================
// Session loading
//=========================================================================================

/// A load request issued by [`ChatOrchestrator::begin_load`].
///
/// Resolving a ticket does not borrow the orchestrator, so a newer load can be
/// started while an older one is still in flight. Only the result whose
/// generation matches the orchestrator's current one is applied.
pub struct LoadTicket {
    generation: u64,
    requested: Option<Uuid>,
    owner_id: Uuid,
    store: Arc<dyn ChatSessionStore>,
    timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The requested session was found and belongs to the owner.
    Resumed(ChatSession),
    /// A fresh session was created.
    Provisioned(ChatSession),
    /// Storage failed; the chat continues without a session.
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    pub generation: u64,
    pub outcome: LoadOutcome,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn resolve(self) -> LoadResult {
        let outcome = match self.requested {
            Some(session_id) => {
                match within(self.timeout, self.store.get_session(session_id)).await {
                    Ok(Some(session)) if session.is_owned_by(self.owner_id) => {
                        LoadOutcome::Resumed(session)
                    }
                    Ok(Some(_)) => {
                        warn!(%session_id, owner_id = %self.owner_id, "Requested session belongs to another owner.");
                        self.provision().await
                    }
                    Ok(None) => {
                        info!(%session_id, "Requested session not found; provisioning a new one.");
                        self.provision().await
                    }
                    Err(e) => {
                        error!(%session_id, "Failed to load chat session: {}", e);
                        LoadOutcome::Unavailable(e.to_string())
                    }
                }
            }
            None => self.provision().await,
        };
        LoadResult {
            generation: self.generation,
            outcome,
        }
    }

    async fn provision(&self) -> LoadOutcome {
        match within(
            self.timeout,
            self.store.create_session(self.owner_id, DEFAULT_SESSION_NAME),
        )
        .await
        {
            Ok(session) => LoadOutcome::Provisioned(session),
            Err(e) => {
                error!(owner_id = %self.owner_id, "Failed to create chat session: {}", e);
                LoadOutcome::Unavailable(e.to_string())
            }
        }
    }
}

//=========================================================================================
// The orchestrator
//=========================================================================================

struct Submission {
    content: String,
    is_voice: bool,
    audio_url: Option<String>,
    image: Option<EncodedImage>,
}

pub struct ChatOrchestrator {
    owner_id: Uuid,
    services: ChatServices,
    config: OrchestratorConfig,
    events: Option<UnboundedSender<ChatEvent>>,
    state: ActivityState,
    transcript: Vec<RenderedMessage>,
    session_id: Option<Uuid>,
    generation: u64,
    loaded: bool,
    recording: Option<Recording>,
    ids: MessageIdGenerator,
    processed_initial: Option<String>,
    pending_initial: Option<String>,
}

impl ChatOrchestrator {
    pub fn new(owner_id: Uuid, services: ChatServices, config: OrchestratorConfig) -> Self {
        Self {
            owner_id,
            services,
            config,
            events: None,
            state: ActivityState::Idle,
            transcript: vec![welcome()],
            session_id: None,
            generation: 0,
            loaded: false,
            recording: None,
            ids: MessageIdGenerator::default(),
            processed_initial: None,
            pending_initial: None,
        }
    }

    /// Routes [`ChatEvent`]s to `events`. A closed receiver is ignored.
    pub fn with_events(mut self, events: UnboundedSender<ChatEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn state(&self) -> ActivityState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// The rendered transcript, welcome message first.
    pub fn messages(&self) -> &[RenderedMessage] {
        &self.transcript
    }

    //-------------------------------------------------------------------------------------
    // Session lifecycle
    //-------------------------------------------------------------------------------------

    /// Resets the view to the welcome message and starts loading `requested`
    /// (or provisioning a new session when `None`).
    pub fn begin_load(&mut self, requested: Option<Uuid>) -> LoadTicket {
        self.generation += 1;
        self.release_recording();
        self.transcript = vec![welcome()];
        self.session_id = None;
        self.loaded = false;
        self.processed_initial = None;
        self.ids = MessageIdGenerator::default();
        self.set_state(ActivityState::Idle);
        debug!(generation = self.generation, ?requested, "Session load started.");

        LoadTicket {
            generation: self.generation,
            requested,
            owner_id: self.owner_id,
            store: self.services.store.clone(),
            timeout: self.config.service_timeout,
        }
    }

    /// Applies a resolved load. Returns `false` and changes nothing when a
    /// newer load has been started since the ticket was issued.
    pub fn apply_load(&mut self, result: LoadResult) -> bool {
        if result.generation != self.generation {
            debug!(
                stale = result.generation,
                current = self.generation,
                "Discarding stale session load."
            );
            return false;
        }

        match result.outcome {
            LoadOutcome::Resumed(session) | LoadOutcome::Provisioned(session) => {
                info!(session_id = %session.id, messages = session.messages.len(), "Chat session loaded.");
                self.ids.observe(&session.messages);
                self.session_id = Some(session.id);
                self.transcript.extend(session.messages.into_iter().map(|message| {
                    RenderedMessage {
                        message,
                        delivery: Delivery::Confirmed,
                    }
                }));
            }
            LoadOutcome::Unavailable(reason) => {
                warn!("Continuing without a stored session: {}", reason);
                self.emit(ChatEvent::Warning(
                    "Chat history is unavailable right now; this conversation will not be saved."
                        .to_string(),
                ));
            }
        }

        self.loaded = true;
        self.emit(ChatEvent::SessionReady {
            session_id: self.session_id,
            messages: self.transcript.clone(),
        });
        true
    }

    /// Loads `requested` (or a fresh session) and then processes any initial
    /// message that was waiting for the load to finish.
    pub async fn open_session(
        &mut self,
        requested: Option<Uuid>,
    ) -> Result<Option<Exchange>, ChatError> {
        let ticket = self.begin_load(requested);
        let result = ticket.resolve().await;
        if !self.apply_load(result) {
            return Ok(None);
        }
        self.flush_initial_message().await
    }

    pub async fn new_session(&mut self) -> Result<Option<Exchange>, ChatError> {
        self.open_session(None).await
    }

    pub async fn rename_session(&mut self, name: &str) -> Result<(), ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::EmptySessionName);
        }
        let session_id = self
            .session_id
            .ok_or_else(|| ChatError::SessionUnavailable("no active session".to_string()))?;
        self.call(self.services.store.rename_session(session_id, name))
            .await?;
        info!(%session_id, "Chat session renamed.");
        Ok(())
    }

    /// Deletes one of the owner's sessions. Deleting the active session
    /// immediately provisions a replacement, whose id is returned.
    pub async fn delete_session(&mut self, session_id: Uuid) -> Result<Option<Uuid>, ChatError> {
        match self.call(self.services.store.get_session(session_id)).await? {
            Some(session) if session.is_owned_by(self.owner_id) => {}
            _ => return Err(ChatError::Storage(PortError::NotFound(format!(
                "Session {} not found",
                session_id
            )))),
        }
        self.call(self.services.store.delete_session(session_id))
            .await?;
        info!(%session_id, "Chat session deleted.");

        if self.session_id == Some(session_id) {
            self.open_session(None).await?;
            return Ok(self.session_id);
        }
        Ok(None)
    }

    //-------------------------------------------------------------------------------------
    // Initial message
    //-------------------------------------------------------------------------------------

    /// Sends a quick-start message at most once per distinct value, and only
    /// after the session has finished loading.
    pub async fn offer_initial_message(
        &mut self,
        text: &str,
    ) -> Result<Option<Exchange>, ChatError> {
        let text = text.trim();
        if text.is_empty()
            || self.processed_initial.as_deref() == Some(text)
            || self.pending_initial.as_deref() == Some(text)
        {
            return Ok(None);
        }
        if !self.loaded {
            self.pending_initial = Some(text.to_string());
            return Ok(None);
        }
        self.processed_initial = Some(text.to_string());
        self.submit_text(text).await.map(Some)
    }

    async fn flush_initial_message(&mut self) -> Result<Option<Exchange>, ChatError> {
        let Some(text) = self.pending_initial.take() else {
            return Ok(None);
        };
        if self.processed_initial.as_deref() == Some(text.as_str()) {
            return Ok(None);
        }
        self.processed_initial = Some(text.clone());
        self.submit_text(&text).await.map(Some)
    }

    //-------------------------------------------------------------------------------------
    // Inputs
    //-------------------------------------------------------------------------------------

    pub async fn submit_text(&mut self, text: &str) -> Result<Exchange, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptySubmission);
        }
        Ok(self
            .converse(Submission {
                content: text.to_string(),
                is_voice: false,
                audio_url: None,
                image: None,
            })
            .await)
    }

    /// Validates and sends an image. Rejected uploads change nothing.
    pub async fn submit_image(
        &mut self,
        upload: ImageUpload,
        caption: Option<&str>,
    ) -> Result<Exchange, ChatError> {
        upload.validate(self.config.max_image_bytes)?;
        let caption = caption
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_IMAGE_CAPTION);
        info!(mime_type = %upload.mime_type, size = upload.bytes.len(), "Image accepted for analysis.");

        Ok(self
            .converse(Submission {
                content: caption.to_string(),
                is_voice: false,
                audio_url: None,
                image: Some(upload.encode()),
            })
            .await)
    }

    pub async fn start_recording(&mut self, devices: &dyn MediaDevices) -> Result<(), ChatError> {
        if self.recording.is_some() {
            return Err(ChatError::AlreadyRecording);
        }
        let stream = devices.acquire(MediaKind::Microphone).await.map_err(|e| {
            warn!("Microphone unavailable: {:?}", e);
            ChatError::MediaAccess(e)
        })?;
        self.recording = Some(Recording::start(stream, self.config.max_recording_bytes));
        self.set_state(ActivityState::Recording);
        Ok(())
    }

    pub fn push_audio(&mut self, chunk: &[u8]) -> Result<(), ChatError> {
        let recording = self.recording.as_mut().ok_or(ChatError::NotRecording)?;
        if let Err(e) = recording.push_chunk(chunk) {
            warn!("Recording passed its size limit; discarding it.");
            self.release_recording();
            self.set_state(ActivityState::Idle);
            return Err(e);
        }
        Ok(())
    }

    /// Discards the recording and releases the microphone.
    pub fn cancel_recording(&mut self) {
        if self.recording.is_some() {
            self.release_recording();
            self.set_state(ActivityState::Idle);
        }
    }

    /// Stops recording, transcribes what was captured, and sends the
    /// transcript as a voice message.
    pub async fn stop_recording(&mut self) -> Result<Exchange, ChatError> {
        let recording = self.recording.take().ok_or(ChatError::NotRecording)?;
        let duration = recording.elapsed();
        let clip = recording.finish();
        self.emit(ChatEvent::RecordingReleased);
        info!(bytes = clip.bytes.len(), ?duration, "Recording stopped.");

        self.set_state(ActivityState::TranscribingAudio);
        let transcription = self.call(self.services.stt.transcribe_audio(&clip)).await;
        let content = degrade_transcription(transcription);

        let audio_url = match self.call(self.services.clips.put_clip(clip)).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Failed to keep the recording for playback: {}", e);
                None
            }
        };

        Ok(self
            .converse(Submission {
                content,
                is_voice: true,
                audio_url,
                image: None,
            })
            .await)
    }

    //-------------------------------------------------------------------------------------
    // The conversational path
    //-------------------------------------------------------------------------------------

    async fn converse(&mut self, submission: Submission) -> Exchange {
        let Submission {
            content,
            is_voice,
            audio_url,
            image,
        } = submission;

        // 1. Render the user's message.
        let mut user = Message::user(self.ids.next(Utc::now()), content.clone(), Utc::now())
            .with_audio_url(audio_url)
            .with_image_url(image.as_ref().map(EncodedImage::data_url));
        if is_voice {
            user = user.as_voice_message();
        }
        let history = self.config.context_window.build(&self.transcript_messages());
        let user_index = self.render(user.clone());

        // 2. Persist it; images are stored as a placeholder only.
        let mut stored = user.clone();
        if image.is_some() {
            stored.image_url = Some(IMAGE_PLACEHOLDER.to_string());
        }
        self.persist(user_index, &stored).await;

        // 3. Ask the model.
        let reply = match &image {
            Some(encoded) => {
                self.set_state(ActivityState::AnalyzingImage);
                match self
                    .call(self.services.llm.analyze_image(encoded, &content))
                    .await
                {
                    Ok(reply) => reply,
                    Err(e) => {
                        error!("Image analysis failed: {}", e);
                        IMAGE_FALLBACK_REPLY.to_string()
                    }
                }
            }
            None => {
                self.set_state(ActivityState::AwaitingModelResponse);
                let request = CompletionRequest {
                    user_text: &content,
                    history: &history,
                    has_image: false,
                    is_voice,
                };
                match self.call(self.services.llm.generate_response(request)).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        error!("Language model call failed: {}", e);
                        MODEL_FALLBACK_REPLY.to_string()
                    }
                }
            }
        };

        // 4. Render and persist the reply.
        let assistant = Message::assistant(self.ids.next(Utc::now()), reply, Utc::now());
        let assistant_index = self.render(assistant.clone());
        self.persist(assistant_index, &assistant).await;

        // 5. Optionally voice it. The audio lives on the rendered copy only.
        self.attach_speech(assistant_index).await;

        // A recording started before this turn keeps going.
        if self.recording.is_some() {
            self.set_state(ActivityState::Recording);
        } else {
            self.set_state(ActivityState::Idle);
        }
        Exchange {
            user,
            assistant: self.transcript[assistant_index].message.clone(),
        }
    }

    async fn attach_speech(&mut self, index: usize) {
        let Some(tts) = self.services.tts.clone() else {
            return;
        };
        let text = self.transcript[index].message.content.clone();
        let clip = match self.call(tts.generate_audio(&text)).await {
            Ok(clip) => clip,
            Err(e) => {
                warn!("Speech synthesis failed: {}", e);
                return;
            }
        };
        match self.call(self.services.clips.put_clip(clip)).await {
            Ok(audio_url) => {
                let message = &mut self.transcript[index].message;
                message.audio_url = Some(audio_url.clone());
                let message_id = message.id.clone();
                self.emit(ChatEvent::AudioAttached {
                    message_id,
                    audio_url,
                });
            }
            Err(e) => warn!("Failed to store synthesized speech: {}", e),
        }
    }

    fn render(&mut self, message: Message) -> usize {
        let rendered = RenderedMessage {
            message,
            delivery: Delivery::Unconfirmed,
        };
        self.emit(ChatEvent::MessageAdded(rendered.clone()));
        self.transcript.push(rendered);
        self.transcript.len() - 1
    }

    async fn persist(&mut self, index: usize, message: &Message) {
        let delivery = match self.session_id {
            Some(session_id) => {
                match self
                    .call(self.services.store.append_message(session_id, message))
                    .await
                {
                    Ok(()) => Delivery::Confirmed,
                    Err(e) => {
                        error!(%session_id, message_id = %message.id, "Failed to save message: {}", e);
                        Delivery::LocalOnly
                    }
                }
            }
            None => Delivery::LocalOnly,
        };
        self.transcript[index].delivery = delivery;
        self.emit(ChatEvent::DeliveryUpdated {
            message_id: message.id.clone(),
            delivery,
        });
    }

    //-------------------------------------------------------------------------------------
    // Helpers
    //-------------------------------------------------------------------------------------

    fn transcript_messages(&self) -> Vec<Message> {
        self.transcript.iter().map(|r| r.message.clone()).collect()
    }

    fn release_recording(&mut self) {
        if let Some(recording) = self.recording.take() {
            drop(recording);
            self.emit(ChatEvent::RecordingReleased);
        }
    }

    fn set_state(&mut self, state: ActivityState) {
        if self.state != state {
            self.state = state;
            self.emit(ChatEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ChatEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    async fn call<T>(&self, fut: impl Future<Output = PortResult<T>>) -> PortResult<T> {
        within(self.config.service_timeout, fut).await
    }
}

fn welcome() -> RenderedMessage {
    RenderedMessage {
        message: Message::welcome(Utc::now()),
        delivery: Delivery::LocalOnly,
    }
}

async fn within<T>(limit: Duration, fut: impl Future<Output = PortResult<T>>) -> PortResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PortError::Timeout),
    }
}

/// Turns any transcription outcome into text the conversation can carry on with.
pub fn degrade_transcription(result: PortResult<Transcript>) -> String {
    match result {
        Ok(Transcript::Speech(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => NO_SPEECH_TEXT.to_string(),
        Err(e) => {
            warn!("Transcription failed: {}", e);
            match e {
                PortError::Unauthorized => STT_NOT_CONFIGURED_TEXT,
                PortError::Forbidden => STT_RESTRICTED_TEXT,
                PortError::RateLimited => STT_RATE_LIMITED_TEXT,
                _ => STT_FAILED_TEXT,
            }
            .to_string()
        }
    }
}
