//! Adaptive buffering of streamed audio chunks
//!
//! [`AdaptiveBuffer`] accepts irregularly paced byte chunks from a session and
//! emits [`FeatureWindow`]s through a lazy stream. The window size tracks the
//! arrival cadence: fast senders get large windows (fewer inference calls),
//! slow or bursty senders get small windows (lower latency per update).
//!
//! # Window sizing
//!
//! An exponential moving average of inter-arrival gaps is mapped linearly
//! from `fast_gap → max_window` to `slow_gap → min_window`, clamped to
//! `[min_window, max_window]`.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::error::BufferError;

/// Raw bytes received from a session, stamped on arrival
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Payload bytes
    pub data: Bytes,
    /// When the chunk arrived
    pub arrived_at: Instant,
}

impl AudioChunk {
    /// Create a chunk stamped with the current time
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_arrival(data, Instant::now())
    }

    /// Create a chunk with an explicit arrival time
    pub fn with_arrival(data: impl Into<Bytes>, arrived_at: Instant) -> Self {
        Self {
            data: data.into(),
            arrived_at,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A block of buffered bytes ready for inference
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureWindow {
    /// Byte offset of this window since the session started
    pub offset: u64,
    /// Adaptive window size in effect when this window was emitted
    pub window_size: usize,
    /// Window payload (at most `window_size` bytes)
    pub data: Bytes,
}

impl FeatureWindow {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Tunables for [`AdaptiveBuffer`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Smallest window size in bytes
    #[serde(default = "default_min_window")]
    pub min_window: usize,

    /// Largest window size in bytes
    #[serde(default = "default_max_window")]
    pub max_window: usize,

    /// Maximum unconsumed backlog in bytes before `add` fails
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Weight of the newest gap in the moving average (0.0 - 1.0)
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,

    /// Average gap at or below which windows are `max_window`
    #[serde(default = "default_fast_gap", with = "duration_ms")]
    pub fast_gap: Duration,

    /// Average gap at or above which windows are `min_window`
    #[serde(default = "default_slow_gap", with = "duration_ms")]
    pub slow_gap: Duration,

    /// Emit a short window when bytes sit idle this long (disabled when unset)
    #[serde(default, with = "optional_duration_ms")]
    pub idle_flush: Option<Duration>,
}

fn default_min_window() -> usize {
    4 * 1024
}

fn default_max_window() -> usize {
    64 * 1024
}

fn default_capacity() -> usize {
    1024 * 1024
}

fn default_smoothing() -> f64 {
    0.3
}

fn default_fast_gap() -> Duration {
    Duration::from_millis(20)
}

fn default_slow_gap() -> Duration {
    Duration::from_millis(250)
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            min_window: default_min_window(),
            max_window: default_max_window(),
            capacity: default_capacity(),
            smoothing: default_smoothing(),
            fast_gap: default_fast_gap(),
            slow_gap: default_slow_gap(),
            idle_flush: None,
        }
    }
}

impl BufferConfig {
    /// Effective `(min, max)` window bounds, tolerant of swapped values
    ///
    /// Both bounds are clamped to `capacity`, since a window larger than the
    /// backlog ceiling could never fill.
    pub fn bounds(&self) -> (usize, usize) {
        let capacity = self.capacity.max(1);
        let min = self.min_window.clamp(1, capacity);
        let max = self.max_window.clamp(1, capacity);
        (min.min(max), min.max(max))
    }

    /// Window size for a given average inter-arrival gap
    ///
    /// With no observed gap yet the smallest window is used.
    pub fn window_size(&self, avg_gap: Option<Duration>) -> usize {
        let (min, max) = self.bounds();
        let Some(gap) = avg_gap else {
            return min;
        };

        if gap <= self.fast_gap {
            return max;
        }
        if gap >= self.slow_gap || self.slow_gap <= self.fast_gap {
            return min;
        }

        let span = (self.slow_gap - self.fast_gap).as_secs_f64();
        let t = (gap - self.fast_gap).as_secs_f64() / span;
        let size = max as f64 - t * (max - min) as f64;
        (size.round() as usize).clamp(min, max)
    }

    fn smoothing_factor(&self) -> f64 {
        if self.smoothing.is_finite() {
            self.smoothing.clamp(0.0, 1.0)
        } else {
            default_smoothing()
        }
    }
}

/// Counters describing buffer throughput
#[derive(Debug, Default)]
struct BufferCounters {
    bytes_added: AtomicU64,
    bytes_emitted: AtomicU64,
    windows_emitted: AtomicU64,
    chunks_rejected: AtomicU64,
}

/// Point-in-time copy of buffer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub bytes_added: u64,
    pub bytes_emitted: u64,
    pub windows_emitted: u64,
    pub chunks_rejected: u64,
}

#[derive(Debug, Default)]
struct BufferState {
    pending: BytesMut,
    /// Offset of the first pending byte
    offset: u64,
    closed: bool,
    last_arrival: Option<Instant>,
    avg_gap: Option<Duration>,
}

impl BufferState {
    fn split_window(&mut self, len: usize, window_size: usize) -> FeatureWindow {
        let data = self.pending.split_to(len).freeze();
        let window = FeatureWindow {
            offset: self.offset,
            window_size,
            data,
        };
        self.offset += len as u64;
        window
    }
}

enum Next {
    Window(FeatureWindow),
    Wait,
    Finished,
}

/// Accumulates session bytes and emits paced feature windows
///
/// `add` is synchronous and only copies the chunk into the backlog.
/// `features` yields windows until the buffer is closed and drained.
#[derive(Debug)]
pub struct AdaptiveBuffer {
    config: BufferConfig,
    state: Mutex<BufferState>,
    notify: Notify,
    counters: BufferCounters,
}

impl Default for AdaptiveBuffer {
    fn default() -> Self {
        Self::new(BufferConfig::default())
    }
}

impl AdaptiveBuffer {
    /// Create a new buffer
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BufferState::default()),
            notify: Notify::new(),
            counters: BufferCounters::default(),
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Append a chunk to the backlog
    ///
    /// # Errors
    ///
    /// * `BufferError::CapacityExceeded` - the chunk would push the backlog past
    ///   `capacity`; nothing is appended and the caller should throttle
    /// * `BufferError::Closed` - the buffer has been closed
    pub fn add(&self, chunk: AudioChunk) -> Result<(), BufferError> {
        let len = chunk.len();
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(BufferError::Closed);
            }

            let backlog = state.pending.len();
            if backlog + len > self.config.capacity {
                self.counters.chunks_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(BufferError::CapacityExceeded {
                    backlog,
                    requested: len,
                    capacity: self.config.capacity,
                });
            }

            if let Some(previous) = state.last_arrival {
                let gap = chunk.arrived_at.saturating_duration_since(previous);
                let alpha = self.config.smoothing_factor();
                state.avg_gap = Some(match state.avg_gap {
                    Some(avg) => avg.mul_f64(1.0 - alpha) + gap.mul_f64(alpha),
                    None => gap,
                });
            }
            state.last_arrival = Some(chunk.arrived_at);
            state.pending.extend_from_slice(&chunk.data);
        }

        self.counters.bytes_added.fetch_add(len as u64, Ordering::Relaxed);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Close the buffer; pending bytes are still drained by `features`
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        tracing::debug!("Adaptive buffer closed");
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Bytes waiting to be windowed
    pub fn backlog(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Window size that would be used for the next emission
    pub fn current_window_size(&self) -> usize {
        let avg_gap = self.state.lock().avg_gap;
        self.config.window_size(avg_gap)
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            bytes_added: self.counters.bytes_added.load(Ordering::Relaxed),
            bytes_emitted: self.counters.bytes_emitted.load(Ordering::Relaxed),
            windows_emitted: self.counters.windows_emitted.load(Ordering::Relaxed),
            chunks_rejected: self.counters.chunks_rejected.load(Ordering::Relaxed),
        }
    }

    /// Lazy stream of feature windows
    ///
    /// Each call returns a fresh stream continuing from the current backlog.
    /// The stream ends once the buffer is closed and every pending byte has
    /// been emitted.
    pub fn features(self: &Arc<Self>) -> impl Stream<Item = FeatureWindow> + Send + 'static {
        let buffer = Arc::clone(self);
        async_stream::stream! {
            loop {
                // Registered before the state check so a concurrent add/close
                // cannot slip between the check and the wait.
                let notified = buffer.notify.notified();

                match buffer.next_window() {
                    Next::Window(window) => {
                        buffer.record_emission(&window);
                        yield window;
                    }
                    Next::Finished => break,
                    Next::Wait => match buffer.config.idle_flush {
                        Some(idle) => {
                            if tokio::time::timeout(idle, notified).await.is_err() {
                                if let Some(window) = buffer.flush_idle(idle) {
                                    buffer.record_emission(&window);
                                    yield window;
                                }
                            }
                        }
                        None => notified.await,
                    },
                }
            }
        }
    }

    fn next_window(&self) -> Next {
        let mut state = self.state.lock();
        let window_size = self.config.window_size(state.avg_gap);
        let pending = state.pending.len();

        if pending >= window_size {
            return Next::Window(state.split_window(window_size, window_size));
        }
        if state.closed {
            if pending == 0 {
                return Next::Finished;
            }
            return Next::Window(state.split_window(pending, window_size));
        }
        Next::Wait
    }

    fn flush_idle(&self, idle: Duration) -> Option<FeatureWindow> {
        let mut state = self.state.lock();
        let pending = state.pending.len();
        let idle_long_enough = state
            .last_arrival
            .is_some_and(|at| at.elapsed() >= idle);
        if pending == 0 || !idle_long_enough {
            return None;
        }
        let window_size = self.config.window_size(state.avg_gap);
        Some(state.split_window(pending.min(window_size), window_size))
    }

    fn record_emission(&self, window: &FeatureWindow) {
        self.counters
            .bytes_emitted
            .fetch_add(window.len() as u64, Ordering::Relaxed);
        self.counters.windows_emitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            offset = window.offset,
            len = window.len(),
            window_size = window.window_size,
            "Emitting feature window"
        );
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod optional_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        // 0 disables idle flushing
        Ok(Option::<u64>::deserialize(deserializer)?
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis))
    }
}
