//! Guitar and bass tablature

use super::{Chord, CollaboratorResult, TabGenerator, TabSheet, PITCH_CLASSES};
use crate::error::CollaboratorError;

/// Low E to high E, `x` for muted strings
const OPEN_SHAPES: &[(&str, &str)] = &[
    ("C", "x-3-2-0-1-0"),
    ("A", "x-0-2-2-2-0"),
    ("G", "3-2-0-0-0-3"),
    ("E", "0-2-2-1-0-0"),
    ("D", "x-x-0-2-3-2"),
    ("Am", "x-0-2-2-1-0"),
    ("Em", "0-2-2-0-0-0"),
    ("Dm", "x-x-0-2-3-1"),
    ("Cmaj7", "x-3-2-0-0-0"),
    ("G7", "3-2-0-0-0-1"),
    ("A7", "x-0-2-0-2-0"),
    ("D7", "x-x-0-2-1-2"),
    ("Am7", "x-0-2-0-1-0"),
    ("Em7", "0-2-0-0-0-0"),
];

const MUTED: &str = "x-x-x-x-x-x";

/// Pitch classes of the open low E and A strings
const LOW_E: usize = 4;
const A: usize = 9;

/// Fret offsets per string for a movable shape; `None` is muted
type Shape = [Option<usize>; 6];

fn e_shape(quality: &str) -> Option<Shape> {
    Some(match quality {
        "" => [Some(0), Some(2), Some(2), Some(1), Some(0), Some(0)],
        "m" => [Some(0), Some(2), Some(2), Some(0), Some(0), Some(0)],
        "7" => [Some(0), Some(2), Some(0), Some(1), Some(0), Some(0)],
        "maj7" => [Some(0), None, Some(1), Some(1), Some(0), None],
        "m7" => [Some(0), Some(2), Some(0), Some(0), Some(0), Some(0)],
        _ => return None,
    })
}

fn a_shape(quality: &str) -> Option<Shape> {
    Some(match quality {
        "" => [None, Some(0), Some(2), Some(2), Some(2), Some(0)],
        "m" => [None, Some(0), Some(2), Some(2), Some(1), Some(0)],
        "7" => [None, Some(0), Some(2), Some(0), Some(2), Some(0)],
        "maj7" => [None, Some(0), Some(2), Some(1), Some(2), Some(0)],
        "m7" => [None, Some(0), Some(2), Some(0), Some(1), Some(0)],
        _ => return None,
    })
}

fn render(shape: Shape, fret: usize) -> String {
    shape
        .iter()
        .map(|offset| match offset {
            Some(offset) => (fret + offset).to_string(),
            None => "x".to_string(),
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Open chord shapes where they exist, E- or A-shape barre chords otherwise
///
/// Bass lines play the chord root on whichever of the E or A strings gives
/// the lower fret.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenPositionTabGenerator;

impl OpenPositionTabGenerator {
    fn tab_for(chord: &Chord) -> CollaboratorResult<(String, String)> {
        if chord.is_none() {
            return Ok((MUTED.to_string(), "-".to_string()));
        }

        let (root, quality) = chord.root_and_quality().ok_or_else(|| {
            CollaboratorError::InvalidInput(format!("unrecognised chord '{}'", chord))
        })?;
        let unsupported = || {
            CollaboratorError::InvalidInput(format!("unsupported chord quality in '{}'", chord))
        };

        let e_fret = (root + PITCH_CLASSES - LOW_E) % PITCH_CLASSES;
        let a_fret = (root + PITCH_CLASSES - A) % PITCH_CLASSES;
        let bass = if a_fret < e_fret {
            format!("A:{}", a_fret)
        } else {
            format!("E:{}", e_fret)
        };

        if let Some((_, shape)) = OPEN_SHAPES.iter().find(|(label, _)| *label == chord.as_str()) {
            return Ok((shape.to_string(), bass));
        }

        let guitar = if a_fret < e_fret {
            render(a_shape(quality).ok_or_else(unsupported)?, a_fret)
        } else {
            render(e_shape(quality).ok_or_else(unsupported)?, e_fret)
        };
        Ok((guitar, bass))
    }
}

impl TabGenerator for OpenPositionTabGenerator {
    fn generate_tabs(&self, chords: &[Chord]) -> CollaboratorResult<TabSheet> {
        let mut sheet = TabSheet::default();
        for chord in chords {
            let (guitar, bass) = Self::tab_for(chord)?;
            sheet.guitar.push(guitar);
            sheet.bass.push(bass);
        }
        Ok(sheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_shapes() {
        let sheet = OpenPositionTabGenerator
            .generate_tabs(&[Chord::from("C"), Chord::from("G"), Chord::from("Am")])
            .unwrap();
        assert_eq!(sheet.guitar, vec!["x-3-2-0-1-0", "3-2-0-0-0-3", "x-0-2-2-1-0"]);
        assert_eq!(sheet.bass, vec!["A:3", "E:3", "A:0"]);
    }

    #[test]
    fn test_barre_shapes() {
        let sheet = OpenPositionTabGenerator
            .generate_tabs(&[Chord::from("F"), Chord::from("Bm"), Chord::from("F#m7")])
            .unwrap();
        assert_eq!(sheet.guitar[0], "1-3-3-2-1-1");
        assert_eq!(sheet.guitar[1], "x-2-4-4-3-2");
        assert_eq!(sheet.guitar[2], "2-4-2-2-2-2");
        assert_eq!(sheet.bass, vec!["E:1", "A:2", "E:2"]);
    }

    #[test]
    fn test_no_chord_is_muted() {
        let sheet = OpenPositionTabGenerator
            .generate_tabs(&[Chord::none()])
            .unwrap();
        assert_eq!(sheet.guitar, vec![MUTED]);
        assert_eq!(sheet.bass, vec!["-"]);
    }

    #[test]
    fn test_unknown_chord_is_invalid() {
        for label in ["H", "Csus4"] {
            let err = OpenPositionTabGenerator
                .generate_tabs(&[Chord::from(label)])
                .unwrap_err();
            assert!(matches!(err, CollaboratorError::InvalidInput(_)), "{}", label);
        }
    }
}
