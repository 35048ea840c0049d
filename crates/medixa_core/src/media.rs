//! crates/medixa_core/src/media.rs
//!
//! Image uploads and capture devices.
//!
//! Images are validated before they touch any state. Microphone and camera
//! streams are owned by a [`MediaHandle`], which stops every track exactly once:
//! on explicit release, on finishing a recording, or when the handle is dropped
//! on any other exit path.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::ChatError;
use crate::ports::AudioClip;

/// Largest accepted image upload.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// About three minutes of 48 kHz mono PCM16.
pub const DEFAULT_MAX_RECORDING_BYTES: usize = 16 * 1024 * 1024;

/// Caption used when the user uploads an image without text.
pub const DEFAULT_IMAGE_CAPTION: &str = "Please analyze this image and provide medical insights.";

/// Stored in place of the image payload when an image message is persisted.
pub const IMAGE_PLACEHOLDER: &str = "Medical image analyzed";

//=========================================================================================
// Images
//=========================================================================================

/// A raw image as received from the client.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Decodes an upload that arrived base64-encoded.
    pub fn from_base64(mime_type: impl Into<String>, data: &str) -> Result<Self, ChatError> {
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| ChatError::ImageEncoding(e.to_string()))?;
        Ok(Self::new(mime_type, bytes))
    }

    /// Checks the media type and size limit.
    pub fn validate(&self, max_bytes: usize) -> Result<(), ChatError> {
        if !self.mime_type.starts_with("image/") {
            return Err(ChatError::InvalidImageType(self.mime_type.clone()));
        }
        if self.bytes.len() > max_bytes {
            return Err(ChatError::ImageTooLarge {
                size: self.bytes.len(),
                limit: max_bytes,
            });
        }
        Ok(())
    }

    pub fn encode(&self) -> EncodedImage {
        EncodedImage {
            mime_type: self.mime_type.clone(),
            base64: STANDARD.encode(&self.bytes),
        }
    }
}

/// An image in transport-safe form, ready for the vision endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub base64: String,
}

impl EncodedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

//=========================================================================================
// Capture devices
//=========================================================================================

/// Why a capture device could not be opened. The messages are shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaAccessError {
    #[error("Camera and microphone access denied. Please allow access in your browser settings and try again.")]
    PermissionDenied,
    #[error("No camera or microphone found. Please connect a camera and microphone and try again.")]
    NotFound,
    #[error("Camera or microphone is already in use by another application. Please close other applications and try again.")]
    DeviceBusy,
    #[error("Camera or microphone does not meet the required specifications. Please try with different settings.")]
    ConstraintViolation,
    #[error("Camera and microphone access blocked due to security restrictions. Please check your browser settings.")]
    SecurityRestricted,
    #[error("Your browser does not support camera and microphone access. Please use a modern browser like Chrome, Firefox, or Safari.")]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Microphone,
    CameraAndMicrophone,
}

/// A live capture stream.
pub trait MediaStream: Send + Sync {
    /// Media type of the audio this stream produces.
    fn content_type(&self) -> &str;

    fn stop_all_tracks(&mut self);
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, kind: MediaKind) -> Result<Box<dyn MediaStream>, MediaAccessError>;
}

/// Exclusive owner of a capture stream.
pub struct MediaHandle {
    stream: Option<Box<dyn MediaStream>>,
    content_type: String,
}

impl MediaHandle {
    pub fn new(stream: Box<dyn MediaStream>) -> Self {
        let content_type = stream.content_type().to_string();
        Self {
            stream: Some(stream),
            content_type,
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Stops all tracks. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_all_tracks();
            debug!("Media stream released.");
        }
    }
}

impl Drop for MediaHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// An in-progress voice recording. Holds at most `max_bytes` of audio.
pub struct Recording {
    handle: MediaHandle,
    buffer: Vec<u8>,
    max_bytes: usize,
    started_at: Instant,
}

impl Recording {
    pub fn start(stream: Box<dyn MediaStream>, max_bytes: usize) -> Self {
        Self {
            handle: MediaHandle::new(stream),
            buffer: Vec::new(),
            max_bytes,
            started_at: Instant::now(),
        }
    }

    /// Appends a chunk. A chunk that would pass the limit is refused and nothing is appended.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<(), ChatError> {
        if self.buffer.len().saturating_add(chunk.len()) > self.max_bytes {
            return Err(ChatError::RecordingTooLarge {
                limit: self.max_bytes,
            });
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Releases the device and hands back everything captured.
    pub fn finish(mut self) -> AudioClip {
        self.handle.release();
        let bytes = std::mem::take(&mut self.buffer);
        AudioClip::new(bytes, self.handle.content_type())
    }
}
