//! services/api/src/adapters/audio.rs
//!
//! Raw PCM handling for audio captured over the WebSocket.

use hound::{WavSpec, WavWriter};

/// Media type of mono little-endian 16-bit PCM as streamed by the browser.
pub const PCM16_CONTENT_TYPE: &str = "audio/L16";

pub fn is_pcm16(content_type: &str) -> bool {
    content_type.starts_with(PCM16_CONTENT_TYPE)
}

/// Wraps mono PCM16 samples in a WAV container.
pub fn pcm16_to_wav(pcm_data: &[u8], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let mut cursor = std::io::Cursor::new(Vec::new());

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::new(&mut cursor, spec)?;

    // A trailing odd byte is dropped.
    for chunk in pcm_data.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        writer.write_sample(sample)?;
    }

    writer.finalize()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_and_samples_are_written() {
        let wav = pcm16_to_wav(&[0x01, 0x00, 0xff, 0x7f], 48_000).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte header followed by the two samples.
        assert_eq!(wav.len(), 44 + 4);
        assert_eq!(&wav[44..], &[0x01, 0x00, 0xff, 0x7f]);
    }

    #[test]
    fn recognises_pcm_content_types() {
        assert!(is_pcm16("audio/L16;rate=48000"));
        assert!(!is_pcm16("audio/mpeg"));
    }
}
