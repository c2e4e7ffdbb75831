//! Audio decoding
//!
//! Canonical audio bytes are either a RIFF/WAVE file or headerless unsigned
//! 8-bit mono PCM. Streaming windows arrive headerless; file references are
//! usually WAV.

use hound::{SampleFormat, WavReader};
use std::io::Cursor;
use std::path::Path;

use super::{AudioDecoder, CollaboratorResult};
use crate::error::CollaboratorError;

/// Reads audio files from the local filesystem
#[derive(Debug, Clone)]
pub struct FileDecoder {
    /// Largest file accepted, in bytes
    max_bytes: u64,
}

impl Default for FileDecoder {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024,
        }
    }
}

impl FileDecoder {
    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

impl AudioDecoder for FileDecoder {
    fn decode(&self, path: &Path) -> CollaboratorResult<Vec<u8>> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CollaboratorError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_file() {
            return Err(CollaboratorError::InvalidInput(format!(
                "{} is not a file",
                path.display()
            )));
        }
        if metadata.len() > self.max_bytes {
            return Err(CollaboratorError::InvalidInput(format!(
                "{} is {} bytes, limit is {}",
                path.display(),
                metadata.len(),
                self.max_bytes
            )));
        }

        Ok(std::fs::read(path)?)
    }
}

fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Decode canonical audio bytes into mono `f32` samples
///
/// Returns the samples and their sample rate. Headerless input is treated as
/// unsigned 8-bit PCM at `fallback_rate`.
pub fn decode_samples(bytes: &[u8], fallback_rate: u32) -> CollaboratorResult<(Vec<f32>, u32)> {
    if !is_wav(bytes) {
        let samples = bytes.iter().map(|b| (*b as f32 - 128.0) / 128.0).collect();
        return Ok((samples, fallback_rate));
    }

    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| CollaboratorError::InvalidInput(format!("invalid WAV data: {}", e)))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| CollaboratorError::InvalidInput(format!("invalid WAV samples: {}", e)))?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| {
                    CollaboratorError::InvalidInput(format!("invalid WAV samples: {}", e))
                })?
        }
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}
