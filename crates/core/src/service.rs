//! Request/response operations
//!
//! [`MusicService`] backs the REST endpoints. Chord requests reuse the
//! [`InferencePipeline`] (and therefore the result cache); instruction and
//! tab requests call their collaborators on the same worker pool.

use std::path::Path;
use std::sync::Arc;

use crate::collaborators::{Chord, TabSheet};
use crate::error::{PipelineError, Stage};
use crate::pipeline::{ChordResult, InferencePipeline};

#[derive(Debug, Clone)]
pub struct MusicService {
    pipeline: Arc<InferencePipeline>,
}

impl MusicService {
    pub fn new(pipeline: Arc<InferencePipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<InferencePipeline> {
        &self.pipeline
    }

    /// Chords and accompaniment for an audio file
    pub async fn suggest_chords(
        &self,
        file_path: impl AsRef<Path>,
    ) -> Result<ChordResult, PipelineError> {
        self.pipeline.process_path(file_path).await
    }

    /// Songwriting steps for a theme
    pub async fn instructions(&self, theme: &str) -> Result<Vec<String>, PipelineError> {
        let generator = Arc::clone(&self.pipeline.collaborators().instructions);
        let theme = theme.to_string();
        self.pipeline
            .pool()
            .run(Stage::GenerateInstructions, move || generator.generate_instructions(&theme))
            .await
    }

    /// Guitar and bass tabs for a chord sequence
    pub async fn tabs(&self, chords: Vec<Chord>) -> Result<TabSheet, PipelineError> {
        let generator = Arc::clone(&self.pipeline.collaborators().tabs);
        self.pipeline
            .pool()
            .run(Stage::GenerateTabs, move || generator.generate_tabs(&chords))
            .await
    }
}
