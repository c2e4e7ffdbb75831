//! Chordstream server binary entry point
//!
//! Serves the REST chord API and WebSocket streaming sessions.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:8000, in-memory cache)
//! cargo run -p chordstream-http-server
//!
//! # Start with a config file
//! cargo run -p chordstream-http-server -- --config chordstream.toml
//!
//! # With logging
//! RUST_LOG=debug cargo run -p chordstream-http-server
//! ```
//!
//! # Environment Variables
//!
//! - `CHORDSTREAM_CONFIG`: Path to a TOML config file
//! - `CHORDSTREAM_HOST` / `CHORDSTREAM_PORT`: Bind address
//! - `CHORDSTREAM_CACHE_BACKEND`: `memory`, `sqlite` or `disabled`
//! - `RUST_LOG`: Log filter (default from `[logging] level`)

mod config;

use anyhow::Result;
use chordstream_core::cache::{CacheBackend, MemoryBackend, ResultCache, SqliteBackend};
use chordstream_core::collaborators::Collaborators;
use chordstream_core::pipeline::{InferencePipeline, WorkerPool};
use chordstream_core::service::MusicService;
use chordstream_core::session::{BroadcastFanout, SessionManager};
use chordstream_core::session_loop::{SessionLoop, SessionLoopConfig};
use chordstream_http::{AppState, HttpServer, ServiceMetrics};
use clap::Parser;
use config::{CacheBackendKind, CacheConfig, Config, LogFormat, LoggingConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Real-time chord suggestion server
#[derive(Debug, Parser)]
#[command(name = "chordstream-server", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "CHORDSTREAM_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_ref())?;

    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.server.bind_address(),
        cache_backend = ?config.cache.backend,
        max_concurrency = config.workers.max_concurrency,
        "Chordstream server starting"
    );

    // Create tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("chordstream-http")
        .enable_all()
        .build()?;

    runtime.block_on(run(config)).map_err(|e| {
        error!("Server error: {:#}", e);
        e
    })?;

    info!("Chordstream server shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn run(config: Config) -> Result<()> {
    let cache = Arc::new(build_cache(&config.cache));
    let pipeline = Arc::new(InferencePipeline::new(
        Collaborators::reference(config.audio.sample_rate),
        Arc::clone(&cache),
        WorkerPool::new(config.workers.max_concurrency),
    ));

    let mut manager = SessionManager::new(config.session.outbound_capacity);
    let fanout = config
        .session
        .events_enabled
        .then(|| BroadcastFanout::new(config.session.events_capacity));
    if let Some(fanout) = &fanout {
        manager = manager.with_fanout(Arc::new(fanout.clone()));
    }

    let session_loop = SessionLoop::new(
        manager.clone(),
        Arc::clone(&pipeline),
        SessionLoopConfig {
            heartbeat_interval: config.session.heartbeat_interval(),
            payload_encoding: config.session.payload_encoding,
            buffer: config.buffer.clone(),
        },
    );

    let mut state = AppState::new(
        MusicService::new(Arc::clone(&pipeline)),
        session_loop,
        ServiceMetrics::with_default_registry()?,
    );
    if let Some(fanout) = fanout {
        state = state.with_fanout(fanout);
    }

    let purge_handle = (config.cache.purge_interval_secs > 0).then(|| {
        let cache = Arc::clone(&cache);
        let period = Duration::from_secs(config.cache.purge_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired().await;
                if removed > 0 {
                    debug!(removed, "purged expired cache entries");
                }
            }
        })
    });

    let server = HttpServer::new(config.server.bind_address(), state);
    let shutdown_manager = manager.clone();
    server
        .serve_with_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");
            let closed = shutdown_manager.disconnect_all();
            info!(sessions = closed, "disconnected streaming sessions");
        })
        .await?;

    // Stop background work
    if let Some(handle) = purge_handle {
        handle.abort();
    }
    manager.disconnect_all();
    pipeline.pool().close();

    Ok(())
}

/// Result cache for the configured backend
///
/// An unusable SQLite file falls back to the in-memory backend.
fn build_cache(config: &CacheConfig) -> ResultCache {
    let backend: Arc<dyn CacheBackend> = match config.backend {
        CacheBackendKind::Disabled => return ResultCache::disabled(),
        CacheBackendKind::Memory => Arc::new(MemoryBackend::new()),
        CacheBackendKind::Sqlite => match SqliteBackend::open(&config.sqlite_path) {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                warn!(
                    path = %config.sqlite_path.display(),
                    "Failed to open SQLite cache, using in-memory cache: {}", e
                );
                Arc::new(MemoryBackend::new())
            }
        },
    };

    ResultCache::new(backend)
        .with_ttl(Duration::from_secs(config.ttl_secs))
        .with_key_prefix(config.key_prefix.clone())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_failure_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            backend: CacheBackendKind::Sqlite,
            // A directory cannot be opened as a database
            sqlite_path: dir.path().to_path_buf(),
            ..CacheConfig::default()
        };
        let cache = build_cache(&config);
        assert_eq!(cache.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_sqlite_backend_selected() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            backend: CacheBackendKind::Sqlite,
            sqlite_path: dir.path().join("cache.db"),
            ttl_secs: 60,
            ..CacheConfig::default()
        };
        let cache = build_cache(&config);
        assert_eq!(cache.backend_name(), "sqlite");
        assert_eq!(cache.ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_disabled_backend() {
        let config = CacheConfig {
            backend: CacheBackendKind::Disabled,
            ..CacheConfig::default()
        };
        assert_eq!(build_cache(&config).backend_name(), "disabled");
    }
}
