//! Inference pipeline behaviour with injected collaborators and backends

use async_trait::async_trait;
use bytes::Bytes;
use chordstream_core::cache::{CacheBackend, MemoryBackend, ResultCache};
use chordstream_core::collaborators::{
    Chord, ChordSuggester, CollaboratorResult, Collaborators, Features,
};
use chordstream_core::pipeline::{InferencePipeline, WorkerPool};
use chordstream_core::{CacheError, CollaboratorError, PipelineError, Stage};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Backend that is always down
struct OfflineBackend;

#[async_trait]
impl CacheBackend for OfflineBackend {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

/// Suggester that counts calls and can be told to fail or panic
struct ScriptedSuggester {
    calls: AtomicUsize,
    mode: Mode,
}

enum Mode {
    Answer(&'static str),
    Fail,
    Panic,
    Slow(Duration),
}

impl ScriptedSuggester {
    fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            mode,
        })
    }
}

impl ChordSuggester for ScriptedSuggester {
    fn suggest_chords(&self, _features: &Features) -> CollaboratorResult<Vec<Chord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            Mode::Answer(label) => Ok(vec![Chord::from(*label)]),
            Mode::Fail => Err(CollaboratorError::Failed("model unavailable".to_string())),
            Mode::Panic => panic!("suggester blew up"),
            Mode::Slow(delay) => {
                std::thread::sleep(*delay);
                Ok(vec![Chord::from("G")])
            }
        }
    }
}

fn pipeline_with(
    suggester: Arc<ScriptedSuggester>,
    backend: Arc<dyn CacheBackend>,
) -> InferencePipeline {
    InferencePipeline::new(
        Collaborators::default().with_suggester(suggester),
        Arc::new(ResultCache::new(backend)),
        WorkerPool::new(4),
    )
}

#[tokio::test]
async fn test_cache_outage_never_fails_inference() {
    let suggester = ScriptedSuggester::new(Mode::Answer("Am"));
    let pipeline = pipeline_with(Arc::clone(&suggester), Arc::new(OfflineBackend));

    for _ in 0..2 {
        let result =
            tokio_test::assert_ok!(pipeline.process_bytes(Bytes::from_static(b"hello")).await);
        assert_eq!(result.chords, vec![Chord::from("Am")]);
        assert_eq!(result.accompaniment, vec![Chord::from("Am7")]);
    }
    assert_eq!(suggester.calls.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.cache().stats().errors, 4);
}

#[tokio::test]
async fn test_failed_suggestion_writes_nothing() {
    let backend = Arc::new(MemoryBackend::new());
    let pipeline = pipeline_with(ScriptedSuggester::new(Mode::Fail), backend.clone());

    let err = pipeline.process_bytes(Bytes::from_static(b"hello")).await.unwrap_err();
    assert_eq!(err.stage(), Stage::SuggestChords);
    assert!(err.to_string().contains("model unavailable"));
    assert!(backend.is_empty());
    assert_eq!(pipeline.stats().failures, 1);
}

#[tokio::test]
async fn test_panicking_collaborator_is_contained() {
    let backend = Arc::new(MemoryBackend::new());
    let pipeline = pipeline_with(ScriptedSuggester::new(Mode::Panic), backend.clone());

    let err = pipeline.process_bytes(Bytes::from_static(b"hello")).await.unwrap_err();
    assert!(matches!(err, PipelineError::WorkerAborted { stage: Stage::SuggestChords, .. }));
    assert!(backend.is_empty());

    // The pool is still usable afterwards
    assert_eq!(pipeline.pool().available(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_requests_agree() {
    let suggester = ScriptedSuggester::new(Mode::Slow(Duration::from_millis(50)));
    let pipeline = Arc::new(pipeline_with(
        Arc::clone(&suggester),
        Arc::new(MemoryBackend::new()),
    ));

    let a = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.process_bytes(Bytes::from_static(b"same audio")).await }
    });
    let b = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.process_bytes(Bytes::from_static(b"same audio")).await }
    });

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_eq!(a, b);
    // Both may compute; at most two suggestions for one fingerprint
    assert!(suggester.calls.load(Ordering::SeqCst) <= 2);

    let c = pipeline.process_bytes(Bytes::from_static(b"same audio")).await.unwrap();
    assert_eq!(c, a);
    assert!(pipeline.stats().cache_hits >= 1);
}

#[tokio::test]
async fn test_file_requests_hit_cache_on_repeat() {
    let mut file = tempfile::Builder::new().suffix(".raw").tempfile().unwrap();
    file.write_all(&[200u8, 56, 200, 56, 200, 56, 200, 56]).unwrap();

    let pipeline = InferencePipeline::new(
        Collaborators::default(),
        Arc::new(ResultCache::new(Arc::new(MemoryBackend::new()))),
        WorkerPool::new(2),
    );

    let first = pipeline.process_path(file.path()).await.unwrap();
    let second = pipeline.process_path(file.path()).await.unwrap();
    assert_eq!(first, second);
    assert!(!first.chords.is_empty());

    let stats = pipeline.cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.writes, 1);
}

#[tokio::test]
async fn test_slow_inference_does_not_block_runtime() {
    let suggester = ScriptedSuggester::new(Mode::Slow(Duration::from_millis(300)));
    let pipeline = Arc::new(pipeline_with(suggester, Arc::new(MemoryBackend::new())));

    let inference = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.process_bytes(Bytes::from_static(b"slow")).await }
    });

    // On a current-thread runtime this only completes if the suggester runs
    // on the blocking pool
    let ticks = tokio::time::timeout(Duration::from_millis(250), async {
        let mut ticks = 0;
        loop {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ticks += 1;
            if ticks == 5 {
                break ticks;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(ticks, 5);

    inference.await.unwrap().unwrap();
}
