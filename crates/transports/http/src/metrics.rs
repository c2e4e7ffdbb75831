//! Prometheus metrics collection for the HTTP service
//!
//! Tracks request latency, streaming sessions, and mirrors cache and
//! inference counters at scrape time. Exposed at `GET /metrics`.

use chordstream_core::cache::CacheStats;
use chordstream_core::pipeline::PipelineStats;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Prometheus metrics for the HTTP service
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Total requests processed (labeled by method, route and status)
    pub requests_total: CounterVec,

    /// Request latency distribution in seconds (labeled by method and route)
    pub request_latency_seconds: HistogramVec,

    /// Live WebSocket sessions
    pub active_sessions: IntGauge,

    /// WebSocket sessions opened since start
    pub sessions_total: IntCounter,

    /// Result cache hits
    pub cache_hits_total: IntCounter,

    /// Result cache misses
    pub cache_misses_total: IntCounter,

    /// Result cache backend errors
    pub cache_errors_total: IntCounter,

    /// Failed inference invocations
    pub inference_failures_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl ServiceMetrics {
    /// Create new metrics with a custom registry
    pub fn new(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests_total = CounterVec::new(
            Opts::new("chordstream_http_requests_total", "Total number of HTTP requests"),
            &["method", "route", "status"],
        )?;

        let request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "chordstream_request_latency_seconds",
                "Latency of HTTP and WebSocket upgrade requests in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, // 1ms - 50ms
                0.1, 0.25, 0.5, 1.0, 2.5, 5.0, // up to full-file inference
            ]),
            &["method", "route"],
        )?;

        let active_sessions = IntGauge::new(
            "chordstream_active_sessions",
            "Number of live streaming sessions",
        )?;

        let sessions_total = IntCounter::new(
            "chordstream_sessions_total",
            "Streaming sessions opened",
        )?;

        let cache_hits_total = IntCounter::new(
            "chordstream_cache_hits_total",
            "Result cache hits",
        )?;

        let cache_misses_total = IntCounter::new(
            "chordstream_cache_misses_total",
            "Result cache misses",
        )?;

        let cache_errors_total = IntCounter::new(
            "chordstream_cache_errors_total",
            "Result cache backend errors",
        )?;

        let inference_failures_total = IntCounter::new(
            "chordstream_inference_failures_total",
            "Inference invocations that failed",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_latency_seconds.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(sessions_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(cache_errors_total.clone()))?;
        registry.register(Box::new(inference_failures_total.clone()))?;

        Ok(Self {
            requests_total,
            request_latency_seconds,
            active_sessions,
            sessions_total,
            cache_hits_total,
            cache_misses_total,
            cache_errors_total,
            inference_failures_total,
            registry: Arc::new(registry),
        })
    }

    /// Create with a fresh registry
    pub fn with_default_registry() -> Result<Self, prometheus::Error> {
        Self::new(Registry::new())
    }

    /// Record a completed request
    pub fn record_request(&self, method: &str, route: &str, status: u16, elapsed: Duration) {
        self.requests_total
            .with_label_values(&[method, route, &status.to_string()])
            .inc();
        self.request_latency_seconds
            .with_label_values(&[method, route])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_session_start(&self) {
        self.sessions_total.inc();
        self.active_sessions.inc();
    }

    pub fn record_session_end(&self) {
        self.active_sessions.dec();
    }

    /// Bring mirrored counters up to the component totals
    pub fn sync(&self, cache: CacheStats, pipeline: PipelineStats) {
        advance(&self.cache_hits_total, cache.hits);
        advance(&self.cache_misses_total, cache.misses);
        advance(&self.cache_errors_total, cache.errors);
        advance(&self.inference_failures_total, pipeline.failures);
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ServiceMetrics::with_default_registry();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_request_metrics() {
        let metrics = ServiceMetrics::with_default_registry().unwrap();
        metrics.record_request("POST", "/chords", 200, Duration::from_millis(12));

        let counter = metrics
            .requests_total
            .with_label_values(&["POST", "/chords", "200"]);
        assert_eq!(counter.get(), 1.0);
        assert!(metrics.render().unwrap().contains("chordstream_request_latency_seconds"));
    }

    #[test]
    fn test_sync_is_monotonic() {
        let metrics = ServiceMetrics::with_default_registry().unwrap();
        let mut cache = CacheStats::default();
        cache.hits = 3;
        metrics.sync(cache, PipelineStats::default());
        metrics.sync(cache, PipelineStats::default());
        assert_eq!(metrics.cache_hits_total.get(), 3);

        cache.hits = 5;
        metrics.sync(cache, PipelineStats::default());
        assert_eq!(metrics.cache_hits_total.get(), 5);
    }

    #[test]
    fn test_session_gauge() {
        let metrics = ServiceMetrics::with_default_registry().unwrap();
        metrics.record_session_start();
        metrics.record_session_start();
        metrics.record_session_end();
        assert_eq!(metrics.active_sessions.get(), 1);
        assert_eq!(metrics.sessions_total.get(), 2);
    }
}
