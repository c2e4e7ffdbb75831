//! Chroma feature extraction and denoising

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

use super::{
    decode_samples, CollaboratorResult, Denoiser, FeatureExtractor, Features, PITCH_CLASSES,
};
use crate::error::CollaboratorError;

/// Sample rate assumed for headerless PCM
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Analysis frame length in samples
pub const FRAME_SIZE: usize = 2048;

const MIN_FREQ_HZ: f32 = 55.0;
const MAX_FREQ_HZ: f32 = 5_000.0;

/// Frames whose in-band energy falls below this are treated as silence
const ENERGY_GATE: f32 = 1e-3;

/// Short-time chroma extractor
///
/// Audio is split into non-overlapping Hann-windowed frames; each FFT bin in
/// the 55 Hz - 5 kHz band adds its power to the nearest pitch class. Input
/// shorter than one frame is zero-padded.
pub struct ChromaExtractor {
    sample_rate: u32,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl ChromaExtractor {
    /// `sample_rate` applies to headerless input; WAV input carries its own
    pub fn new(sample_rate: u32) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(FRAME_SIZE);
        let window = (0..FRAME_SIZE)
            .map(|n| {
                let phase = 2.0 * std::f32::consts::PI * n as f32 / FRAME_SIZE as f32;
                0.5 - 0.5 * phase.cos()
            })
            .collect();

        Self {
            sample_rate: sample_rate.max(1),
            fft,
            window,
        }
    }

    fn chroma_frame(&self, frame: &[f32], bin_classes: &[Option<usize>]) -> [f32; PITCH_CLASSES] {
        let mut spectrum: Vec<Complex<f32>> = self
            .window
            .iter()
            .enumerate()
            .map(|(i, w)| Complex::new(frame.get(i).copied().unwrap_or(0.0) * w, 0.0))
            .collect();
        self.fft.process(&mut spectrum);

        let mut chroma = [0.0f32; PITCH_CLASSES];
        for (bin, class) in bin_classes.iter().enumerate() {
            if let Some(class) = class {
                chroma[*class] += spectrum[bin].norm_sqr();
            }
        }

        let max = chroma.iter().cloned().fold(0.0f32, f32::max);
        if max < ENERGY_GATE {
            return [0.0; PITCH_CLASSES];
        }
        for value in chroma.iter_mut() {
            *value /= max;
        }
        chroma
    }
}

impl fmt::Debug for ChromaExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChromaExtractor")
            .field("sample_rate", &self.sample_rate)
            .field("frame_size", &FRAME_SIZE)
            .finish()
    }
}

/// Pitch class for each FFT bin below Nyquist, `None` outside the band
fn bin_pitch_classes(sample_rate: u32) -> Vec<Option<usize>> {
    let resolution = sample_rate as f32 / FRAME_SIZE as f32;
    (0..FRAME_SIZE / 2)
        .map(|bin| {
            let freq = bin as f32 * resolution;
            if !(MIN_FREQ_HZ..=MAX_FREQ_HZ).contains(&freq) {
                return None;
            }
            let midi = 69.0 + 12.0 * (freq / 440.0).log2();
            Some((midi.round() as i64).rem_euclid(PITCH_CLASSES as i64) as usize)
        })
        .collect()
}

impl FeatureExtractor for ChromaExtractor {
    fn extract_features(&self, audio: &[u8]) -> CollaboratorResult<Features> {
        if audio.is_empty() {
            return Err(CollaboratorError::InvalidInput("empty audio".to_string()));
        }

        let (mut samples, sample_rate) = decode_samples(audio, self.sample_rate)?;
        if samples.is_empty() {
            return Err(CollaboratorError::InvalidInput("audio has no samples".to_string()));
        }

        // Remove DC so constant input reads as silence
        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        for sample in samples.iter_mut() {
            *sample -= mean;
        }

        let bin_classes = bin_pitch_classes(sample_rate);
        let frames = samples
            .chunks(FRAME_SIZE)
            .map(|frame| self.chroma_frame(frame, &bin_classes))
            .collect();

        Ok(Features::new(sample_rate, frames))
    }
}

/// Zeroes chroma bins below a fraction of each frame's peak
#[derive(Debug, Clone)]
pub struct ChromaDenoiser {
    /// Relative threshold in `0.0..1.0`
    pub floor: f32,
}

impl Default for ChromaDenoiser {
    fn default() -> Self {
        Self { floor: 0.2 }
    }
}

impl Denoiser for ChromaDenoiser {
    fn denoise(&self, mut features: Features) -> CollaboratorResult<Features> {
        let floor = self.floor.clamp(0.0, 1.0);
        for frame in features.frames.iter_mut() {
            let max = frame.iter().cloned().fold(0.0f32, f32::max);
            if max <= 0.0 || !max.is_finite() {
                *frame = [0.0; PITCH_CLASSES];
                continue;
            }
            for value in frame.iter_mut() {
                *value = if *value < floor * max { 0.0 } else { *value / max };
            }
        }
        Ok(features)
    }
}
