//! External collaborator contracts
//!
//! The streaming core treats signal processing and chord inference as pure,
//! synchronous, potentially expensive functions. Each stage is a trait so
//! implementations are constructed once and injected into the
//! [`crate::pipeline::InferencePipeline`] through [`Collaborators`].
//!
//! Reference implementations live in the submodules; they are deterministic
//! so identical input always produces identical output, which is what makes
//! racing cache writes harmless.

mod chords;
mod decode;
mod features;
mod instructions;
mod tabs;

pub use chords::{SeventhAccompanist, TemplateChordSuggester};
pub use decode::{decode_samples, FileDecoder};
pub use features::{ChromaDenoiser, ChromaExtractor, DEFAULT_SAMPLE_RATE};
pub use instructions::ThemeInstructionGenerator;
pub use tabs::OpenPositionTabGenerator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::CollaboratorError;

/// Result alias for collaborator calls
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Number of pitch classes in a chroma frame
pub const PITCH_CLASSES: usize = 12;

/// Pitch class names, index 0 = C
pub const NOTE_NAMES: [&str; PITCH_CLASSES] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Label used when no chord is detected
pub const NO_CHORD: &str = "N";

/// A chord label such as `C`, `F#m` or `G7`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chord(String);

impl Chord {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The "no chord" marker
    pub fn none() -> Self {
        Self(NO_CHORD.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == NO_CHORD
    }

    /// Split the label into root pitch class and quality suffix
    ///
    /// `"F#m7"` → `Some((6, "m7"))`, `"Bb"` → `Some((10, ""))`.
    /// Returns `None` for the no-chord marker or unparseable labels.
    pub fn root_and_quality(&self) -> Option<(usize, &str)> {
        let label = self.0.as_str();
        let mut chars = label.chars();
        let letter = chars.next()?;
        let natural = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };
        let (pitch, consumed) = match chars.next() {
            Some('#') => ((natural + 1) % PITCH_CLASSES, 2),
            Some('b') => ((natural + PITCH_CLASSES - 1) % PITCH_CLASSES, 2),
            _ => (natural, 1),
        };
        Some((pitch, &label[consumed..]))
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Chord {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for Chord {
    fn from(label: String) -> Self {
        Self(label)
    }
}

/// Canonical feature representation: a sequence of 12-bin chroma frames
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Features {
    /// Sample rate of the audio the frames were computed from
    pub sample_rate: u32,
    /// One chroma vector per analysis frame
    pub frames: Vec<[f32; PITCH_CLASSES]>,
}

impl Features {
    pub fn new(sample_rate: u32, frames: Vec<[f32; PITCH_CLASSES]>) -> Self {
        Self {
            sample_rate,
            frames,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Little-endian byte encoding used for fingerprinting
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(12 + self.frames.len() * PITCH_CLASSES * 4);
        bytes.extend_from_slice(&self.sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(self.frames.len() as u64).to_le_bytes());
        for frame in &self.frames {
            for value in frame {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes
    }
}

/// Guitar and bass tablature for a chord sequence
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TabSheet {
    pub guitar: Vec<String>,
    pub bass: Vec<String>,
}

/// Loads raw audio bytes for a file reference
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> CollaboratorResult<Vec<u8>>;
}

/// Turns raw audio bytes into chroma features
pub trait FeatureExtractor: Send + Sync {
    fn extract_features(&self, audio: &[u8]) -> CollaboratorResult<Features>;
}

/// Cleans a feature representation
pub trait Denoiser: Send + Sync {
    fn denoise(&self, features: Features) -> CollaboratorResult<Features>;
}

/// Suggests a chord progression from features
pub trait ChordSuggester: Send + Sync {
    fn suggest_chords(&self, features: &Features) -> CollaboratorResult<Vec<Chord>>;
}

/// Derives an accompaniment sequence from chords
pub trait AccompanimentGenerator: Send + Sync {
    fn generate_accompaniment(&self, chords: &[Chord]) -> CollaboratorResult<Vec<Chord>>;
}

/// Produces songwriting steps for a free-text theme
pub trait InstructionGenerator: Send + Sync {
    fn generate_instructions(&self, theme: &str) -> CollaboratorResult<Vec<String>>;
}

/// Produces guitar and bass tabs for chords
pub trait TabGenerator: Send + Sync {
    fn generate_tabs(&self, chords: &[Chord]) -> CollaboratorResult<TabSheet>;
}

/// Collaborator instances shared by every pipeline invocation
#[derive(Clone)]
pub struct Collaborators {
    pub decoder: Arc<dyn AudioDecoder>,
    pub extractor: Arc<dyn FeatureExtractor>,
    pub denoiser: Arc<dyn Denoiser>,
    pub suggester: Arc<dyn ChordSuggester>,
    pub accompanist: Arc<dyn AccompanimentGenerator>,
    pub instructions: Arc<dyn InstructionGenerator>,
    pub tabs: Arc<dyn TabGenerator>,
}

impl Collaborators {
    /// Reference collaborators; raw (non-WAV) audio is read at `sample_rate`
    pub fn reference(sample_rate: u32) -> Self {
        Self {
            decoder: Arc::new(FileDecoder::default()),
            extractor: Arc::new(ChromaExtractor::new(sample_rate)),
            denoiser: Arc::new(ChromaDenoiser::default()),
            suggester: Arc::new(TemplateChordSuggester::default()),
            accompanist: Arc::new(SeventhAccompanist),
            instructions: Arc::new(ThemeInstructionGenerator),
            tabs: Arc::new(OpenPositionTabGenerator),
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn AudioDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_denoiser(mut self, denoiser: Arc<dyn Denoiser>) -> Self {
        self.denoiser = denoiser;
        self
    }

    pub fn with_suggester(mut self, suggester: Arc<dyn ChordSuggester>) -> Self {
        self.suggester = suggester;
        self
    }

    pub fn with_accompanist(mut self, accompanist: Arc<dyn AccompanimentGenerator>) -> Self {
        self.accompanist = accompanist;
        self
    }

    pub fn with_instructions(mut self, instructions: Arc<dyn InstructionGenerator>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_tabs(mut self, tabs: Arc<dyn TabGenerator>) -> Self {
        self.tabs = tabs;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::reference(DEFAULT_SAMPLE_RATE)
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
