//! Inference pipeline
//!
//! One invocation runs:
//!
//! ```text
//! decode → extract features → denoise → fingerprint
//!        → cache lookup ─hit──────────────────────┐
//!                      └miss→ suggest → cache store┴→ accompany → ChordResult
//! ```
//!
//! Every collaborator call goes through the [`WorkerPool`], so a slow model
//! never stalls heartbeats or receive loops. A failing stage aborts only the
//! current invocation, and the cache is written only after a successful
//! suggestion.

mod worker;

pub use worker::WorkerPool;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::FeatureWindow;
use crate::cache::{FeatureFingerprint, ResultCache};
use crate::collaborators::{Chord, Collaborators};
use crate::error::{PipelineError, Stage};

/// Chord labels plus the accompaniment derived from them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordResult {
    pub chords: Vec<Chord>,
    pub accompaniment: Vec<Chord>,
}

#[derive(Debug, Default)]
struct PipelineCounters {
    invocations: AtomicU64,
    cache_hits: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub invocations: u64,
    pub cache_hits: u64,
    pub failures: u64,
}

/// Orchestrates collaborators, the result cache and the worker pool
#[derive(Debug)]
pub struct InferencePipeline {
    collaborators: Collaborators,
    cache: Arc<ResultCache>,
    pool: WorkerPool,
    counters: PipelineCounters,
}

impl InferencePipeline {
    pub fn new(collaborators: Collaborators, cache: Arc<ResultCache>, pool: WorkerPool) -> Self {
        Self {
            collaborators,
            cache,
            pool,
            counters: PipelineCounters::default(),
        }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            invocations: self.counters.invocations.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Request path: decode a file reference, then infer
    pub async fn process_path(&self, path: impl AsRef<Path>) -> Result<ChordResult, PipelineError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let decoder = Arc::clone(&self.collaborators.decoder);

        let audio = match self.pool.run(Stage::Decode, move || decoder.decode(&path)).await {
            Ok(audio) => audio,
            Err(e) => {
                self.counters.invocations.fetch_add(1, Ordering::Relaxed);
                return Err(self.record_failure(e));
            }
        };
        self.process_bytes(Bytes::from(audio)).await
    }

    /// Streaming path: one emitted buffer window
    pub async fn process_window(
        &self,
        window: &FeatureWindow,
    ) -> Result<ChordResult, PipelineError> {
        tracing::trace!(
            offset = window.offset,
            len = window.len(),
            window_size = window.window_size,
            "Processing feature window"
        );
        self.process_bytes(window.data.clone()).await
    }

    /// Infer from canonical audio bytes
    pub async fn process_bytes(&self, audio: Bytes) -> Result<ChordResult, PipelineError> {
        self.counters.invocations.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        match self.infer(audio).await {
            Ok(result) => {
                tracing::debug!(
                    chords = result.chords.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Inference complete"
                );
                Ok(result)
            }
            Err(e) => Err(self.record_failure(e)),
        }
    }

    async fn infer(&self, audio: Bytes) -> Result<ChordResult, PipelineError> {
        let extractor = Arc::clone(&self.collaborators.extractor);
        let features = self
            .pool
            .run(Stage::ExtractFeatures, move || extractor.extract_features(&audio))
            .await?;

        let denoiser = Arc::clone(&self.collaborators.denoiser);
        let features = self
            .pool
            .run(Stage::Denoise, move || denoiser.denoise(features))
            .await?;

        let fingerprint = FeatureFingerprint::of(&features);
        let chords = match self.cache.get(&fingerprint).await {
            Some(chords) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                chords
            }
            None => {
                let suggester = Arc::clone(&self.collaborators.suggester);
                let chords = self
                    .pool
                    .run(Stage::SuggestChords, move || suggester.suggest_chords(&features))
                    .await?;
                self.cache.set(&fingerprint, &chords).await;
                chords
            }
        };

        let accompanist = Arc::clone(&self.collaborators.accompanist);
        let input = chords.clone();
        let accompaniment = self
            .pool
            .run(Stage::GenerateAccompaniment, move || {
                accompanist.generate_accompaniment(&input)
            })
            .await?;

        Ok(ChordResult {
            chords,
            accompaniment,
        })
    }

    fn record_failure(&self, error: PipelineError) -> PipelineError {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(stage = %error.stage(), "Inference failed: {}", error);
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;

    fn pipeline() -> InferencePipeline {
        InferencePipeline::new(
            Collaborators::default(),
            Arc::new(ResultCache::new(Arc::new(MemoryBackend::new()))),
            WorkerPool::new(2),
        )
    }

    #[tokio::test]
    async fn test_constant_bytes_yield_no_chord() {
        let result = pipeline().process_bytes(Bytes::from_static(b"AAAA")).await.unwrap();
        assert_eq!(result.chords, vec![Chord::none()]);
        assert_eq!(result.accompaniment, vec![Chord::none()]);
    }

    #[tokio::test]
    async fn test_empty_window_fails_at_extraction() {
        let pipeline = pipeline();
        let err = pipeline.process_bytes(Bytes::new()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::ExtractFeatures);
        assert_eq!(pipeline.stats().failures, 1);
        assert_eq!(pipeline.cache().stats().writes, 0);
    }

    #[tokio::test]
    async fn test_missing_file_fails_at_decode() {
        let pipeline = pipeline();
        let err = pipeline.process_path("/no/such/file.wav").await.unwrap_err();
        assert_eq!(err.stage(), Stage::Decode);
        assert_eq!(pipeline.stats(), PipelineStats { invocations: 1, cache_hits: 0, failures: 1 });
    }

    #[tokio::test]
    async fn test_repeat_is_served_from_cache() {
        let pipeline = pipeline();
        let first = pipeline.process_bytes(Bytes::from_static(b"AAAA")).await.unwrap();
        let second = pipeline.process_bytes(Bytes::from_static(b"AAAA")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(pipeline.stats().cache_hits, 1);
        assert_eq!(pipeline.cache().stats().writes, 1);
    }
}
