//! Chord suggestion and accompaniment

use super::{
    AccompanimentGenerator, Chord, ChordSuggester, CollaboratorResult, Features, NOTE_NAMES,
    PITCH_CLASSES,
};

/// Binary triad template
struct Template {
    label: String,
    mask: [f32; PITCH_CLASSES],
}

fn triad(root: usize, third: usize, suffix: &str) -> Template {
    let mut mask = [0.0f32; PITCH_CLASSES];
    for interval in [0, third, 7] {
        mask[(root + interval) % PITCH_CLASSES] = 1.0;
    }
    Template {
        label: format!("{}{}", NOTE_NAMES[root], suffix),
        mask,
    }
}

/// Matches each chroma frame against 24 major/minor triad templates
///
/// Frames are scored by cosine similarity; frames that are silent or score
/// below `min_score` become the no-chord marker. Repeated labels across
/// consecutive frames collapse into one.
pub struct TemplateChordSuggester {
    templates: Vec<Template>,
    /// Lowest cosine similarity accepted as a chord
    pub min_score: f32,
}

impl Default for TemplateChordSuggester {
    fn default() -> Self {
        Self::with_min_score(0.5)
    }
}

impl std::fmt::Debug for TemplateChordSuggester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateChordSuggester")
            .field("templates", &self.templates.len())
            .field("min_score", &self.min_score)
            .finish()
    }
}

impl TemplateChordSuggester {
    pub fn with_min_score(min_score: f32) -> Self {
        let mut templates = Vec::with_capacity(PITCH_CLASSES * 2);
        for root in 0..PITCH_CLASSES {
            templates.push(triad(root, 4, ""));
        }
        for root in 0..PITCH_CLASSES {
            templates.push(triad(root, 3, "m"));
        }
        Self {
            templates,
            min_score,
        }
    }

    fn classify(&self, frame: &[f32; PITCH_CLASSES]) -> Chord {
        let norm = frame.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON || !norm.is_finite() {
            return Chord::none();
        }

        // Every template has exactly three active bins
        let template_norm = 3.0f32.sqrt();
        let mut best: Option<(&Template, f32)> = None;
        for template in &self.templates {
            let dot: f32 = frame.iter().zip(template.mask.iter()).map(|(a, b)| a * b).sum();
            let score = dot / (norm * template_norm);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((template, score));
            }
        }

        match best {
            Some((template, score)) if score >= self.min_score => {
                Chord::new(template.label.clone())
            }
            _ => Chord::none(),
        }
    }
}

impl ChordSuggester for TemplateChordSuggester {
    fn suggest_chords(&self, features: &Features) -> CollaboratorResult<Vec<Chord>> {
        let mut chords: Vec<Chord> = Vec::new();
        for frame in &features.frames {
            let chord = self.classify(frame);
            if chords.last() != Some(&chord) {
                chords.push(chord);
            }
        }
        if chords.is_empty() {
            chords.push(Chord::none());
        }
        Ok(chords)
    }
}

/// Voices each triad as its diatonic seventh
///
/// `C` → `Cmaj7`, `Am` → `Am7`; the no-chord marker and already-extended
/// labels pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeventhAccompanist;

impl AccompanimentGenerator for SeventhAccompanist {
    fn generate_accompaniment(&self, chords: &[Chord]) -> CollaboratorResult<Vec<Chord>> {
        Ok(chords
            .iter()
            .map(|chord| match chord.root_and_quality() {
                Some((_, "")) => Chord::new(format!("{}maj7", chord)),
                Some((_, "m")) => Chord::new(format!("{}7", chord)),
                _ => chord.clone(),
            })
            .collect())
    }
}
