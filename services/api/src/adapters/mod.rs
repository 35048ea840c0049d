pub mod audio;
pub mod db;
pub mod llm;
pub mod sst;
pub mod tts;
pub mod video;

pub use db::PgSessionStore;
pub use llm::OpenRouterLlmAdapter;
pub use sst::ElevenLabsSttAdapter;
pub use tts::ElevenLabsTtsAdapter;
pub use video::TavusVideoAdapter;

use medixa_core::ports::PortError;
use reqwest::StatusCode;

/// Maps a failed HTTP response from a hosted service onto a `PortError`.
pub(crate) fn status_error(service: &str, status: StatusCode, body: &str) -> PortError {
    match status {
        StatusCode::UNAUTHORIZED => PortError::Unauthorized,
        StatusCode::FORBIDDEN => PortError::Forbidden,
        StatusCode::TOO_MANY_REQUESTS => PortError::RateLimited,
        StatusCode::NOT_FOUND => PortError::NotFound(format!("{} resource not found", service)),
        _ => PortError::Unexpected(format!("{} API error {}: {}", service, status, body)),
    }
}
