//! Songwriting instruction generator

use super::{CollaboratorResult, InstructionGenerator, NOTE_NAMES, PITCH_CLASSES};
use crate::error::CollaboratorError;

const MINOR_WORDS: &[&str] = &[
    "sad", "lonely", "loss", "rain", "night", "dark", "goodbye", "winter", "heartbreak", "lost",
];

/// Deterministic step-by-step songwriting guide for a theme
///
/// The key is derived from the theme text so the same theme always yields
/// the same guide; melancholic vocabulary selects a minor key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThemeInstructionGenerator;

impl ThemeInstructionGenerator {
    fn key_for(theme: &str) -> (usize, bool) {
        let lower = theme.to_lowercase();
        let minor = lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| MINOR_WORDS.contains(&word));
        let root = lower.bytes().map(|b| b as usize).sum::<usize>() % PITCH_CLASSES;
        (root, minor)
    }
}

impl InstructionGenerator for ThemeInstructionGenerator {
    fn generate_instructions(&self, theme: &str) -> CollaboratorResult<Vec<String>> {
        let theme = theme.trim();
        if theme.is_empty() {
            return Err(CollaboratorError::InvalidInput("theme is empty".to_string()));
        }

        let (root, minor) = Self::key_for(theme);
        let tonic = NOTE_NAMES[root];
        let (key, progression) = if minor {
            let iv = NOTE_NAMES[(root + 5) % PITCH_CLASSES];
            let v = NOTE_NAMES[(root + 7) % PITCH_CLASSES];
            let vi = NOTE_NAMES[(root + 8) % PITCH_CLASSES];
            (
                format!("{} minor", tonic),
                format!("{}m - {} - {}m - {}", tonic, vi, iv, v),
            )
        } else {
            let iv = NOTE_NAMES[(root + 5) % PITCH_CLASSES];
            let v = NOTE_NAMES[(root + 7) % PITCH_CLASSES];
            let vi = NOTE_NAMES[(root + 9) % PITCH_CLASSES];
            (
                format!("{} major", tonic),
                format!("{} - {} - {}m - {}", tonic, v, vi, iv),
            )
        };

        Ok(vec![
            format!("Write down three images or phrases that capture \"{}\".", theme),
            format!("Set the song in {} to match the mood of the theme.", key),
            format!("Build the verse on the progression {}.", progression),
            "Draft a chorus hook that states the theme in one line and repeats it.".to_string(),
            "Contrast the bridge by starting on a chord outside the verse progression.".to_string(),
            "Record a rough demo and trim any line that does not serve the theme.".to_string(),
        ])
    }
}
