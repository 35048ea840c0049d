//! crates/medixa_core/src/error.rs
//!
//! Errors the chat core reports to its caller.
//!
//! Only input validation and explicit session management can fail. Transcription,
//! model and persistence failures during a conversation degrade in place and are
//! never returned from the orchestrator.

use crate::media::MediaAccessError;
use crate::ports::PortError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("Please enter a message before sending.")]
    EmptySubmission,

    #[error("Please select an image file (JPEG, PNG, GIF, etc.). Received '{0}'.")]
    InvalidImageType(String),

    #[error("Image file is too large ({size} bytes). Please select an image smaller than {}.", size_label(.limit))]
    ImageTooLarge { size: usize, limit: usize },

    #[error("Failed to process the image: {0}")]
    ImageEncoding(String),

    #[error("Session name cannot be empty.")]
    EmptySessionName,

    #[error("A recording is already in progress.")]
    AlreadyRecording,

    #[error("No recording is in progress.")]
    NotRecording,

    /// The recording passed its size limit and was discarded.
    #[error("Voice message is too long (over {}) and was discarded. Please record a shorter message.", size_label(.limit))]
    RecordingTooLarge { limit: usize },

    #[error(transparent)]
    MediaAccess(#[from] MediaAccessError),

    #[error("Chat session is unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] PortError),
}

impl ChatError {
    /// True for errors caused by the user's input, which leave all state untouched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChatError::EmptySubmission
                | ChatError::InvalidImageType(_)
                | ChatError::ImageTooLarge { .. }
                | ChatError::ImageEncoding(_)
                | ChatError::EmptySessionName
        )
    }
}

/// Human-readable size for limits, e.g. `10 MB`, `1.5 MB`, `512 KB`.
fn size_label(bytes: &usize) -> String {
    const KIB: usize = 1024;
    const MIB: usize = 1024 * 1024;
    let bytes = *bytes;
    if bytes >= MIB {
        if bytes % MIB == 0 {
            format!("{} MB", bytes / MIB)
        } else {
            format!("{:.1} MB", bytes as f64 / MIB as f64)
        }
    } else if bytes >= KIB {
        format!("{} KB", bytes / KIB)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_limits_render_in_a_readable_unit() {
        let big = ChatError::ImageTooLarge {
            size: 11 * 1024 * 1024,
            limit: 10 * 1024 * 1024,
        };
        assert!(big.to_string().ends_with("smaller than 10 MB."));

        let small = ChatError::ImageTooLarge {
            size: 600 * 1024,
            limit: 512 * 1024,
        };
        assert!(small.to_string().ends_with("smaller than 512 KB."));

        assert_eq!(size_label(&(3 * 1024 * 1024 / 2)), "1.5 MB");
        assert_eq!(size_label(&100), "100 bytes");
    }
}
