//! Cache-aside result store
//!
//! [`ResultCache`] maps a [`FeatureFingerprint`] to previously computed chord
//! labels. It never fails its callers: backend errors and undecodable
//! payloads are logged, counted and reported as a miss.
//!
//! There is no lock around compute-then-store. Two sessions that miss on the
//! same fingerprint both compute; since suggestion is deterministic the
//! racing writes carry the same value and the last one wins.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{Chord, Features};
use crate::error::CacheError;

/// Default time-to-live for cached results
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default key namespace
pub const DEFAULT_KEY_PREFIX: &str = "chords:";

/// Key-value storage behind [`ResultCache`]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs and metrics
    fn name(&self) -> &'static str;

    /// Fetch an unexpired value
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store a value, replacing any previous one
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

/// Backend that stores nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBackend;

#[async_trait]
impl CacheBackend for DisabledBackend {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }
}

/// SHA-256 (hex) of the canonical feature encoding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureFingerprint(String);

impl FeatureFingerprint {
    pub fn of(features: &Features) -> Self {
        let digest = Sha256::digest(features.to_le_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

/// Best-effort cache of chord results keyed by feature fingerprint
pub struct ResultCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    key_prefix: String,
    counters: CacheCounters,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            ttl: DEFAULT_TTL,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            counters: CacheCounters::default(),
        }
    }

    /// A cache that always misses
    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledBackend))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn key(&self, fingerprint: &FeatureFingerprint) -> String {
        format!("{}{}", self.key_prefix, fingerprint)
    }

    /// Look up chords for a fingerprint; any failure reads as a miss
    pub async fn get(&self, fingerprint: &FeatureFingerprint) -> Option<Vec<Chord>> {
        let key = self.key(fingerprint);
        let payload = match self.backend.get(&key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    %fingerprint,
                    "Cache read failed: {}",
                    e
                );
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match serde_json::from_slice::<Vec<Chord>>(&payload) {
            Ok(chords) => {
                tracing::debug!(%fingerprint, "Cache hit");
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(chords)
            }
            Err(e) => {
                tracing::warn!(%fingerprint, "Discarding undecodable cache entry: {}", e);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store chords for a fingerprint; failures are logged and counted
    pub async fn set(&self, fingerprint: &FeatureFingerprint, chords: &[Chord]) {
        let payload = match serde_json::to_vec(chords) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(%fingerprint, "Failed to encode cache entry: {}", e);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match self.backend.set(&self.key(fingerprint), payload, self.ttl).await {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    %fingerprint,
                    "Cache write failed: {}",
                    e
                );
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Remove expired entries from the backend
    pub async fn purge_expired(&self) -> usize {
        match self.backend.purge_expired().await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(backend = self.backend.name(), "Cache purge failed: {}", e);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("backend", &self.backend.name())
            .field("ttl", &self.ttl)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}
