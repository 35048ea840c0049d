pub mod context;
pub mod domain;
pub mod error;
pub mod media;
pub mod memory;
pub mod orchestrator;
pub mod ports;
pub mod video;

pub use context::ContextWindow;
pub use domain::{
    ChatSession, ConversationTurn, Message, MessageId, MessageRole, TurnRole, VideoConversation,
};
pub use error::ChatError;
pub use media::{ImageUpload, MediaAccessError, MediaDevices, MediaHandle, MediaKind, MediaStream};
pub use memory::{InMemoryAudioClips, InMemorySessionStore};
pub use orchestrator::{
    ActivityState, ChatEvent, ChatOrchestrator, ChatServices, Delivery, Exchange,
    OrchestratorConfig, RenderedMessage,
};
pub use ports::{
    AudioClip, AudioClipStore, ChatSessionStore, CompletionRequest, LanguageModelService,
    PortError, PortResult, SpeechToTextService, TextToSpeechService, Transcript,
    VideoSessionService,
};
pub use video::{VideoConsultation, VideoProvisioner};
