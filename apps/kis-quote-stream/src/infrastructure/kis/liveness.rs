//! Liveness Watchdog
//!
//! KIS keeps idle sockets alive with `PINGPONG` control frames, but a
//! half-open TCP connection produces nothing at all. The watchdog sends
//! WebSocket pings at a fixed interval and reports the session dead once
//! nothing has arrived for the idle timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Shortest ping interval the watchdog will tick at.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(10);

/// Watchdog timing.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Interval between WebSocket pings.
    pub ping_interval: Duration,
    /// Silence after which the session is considered dead.
    pub idle_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
        }
    }
}

impl LivenessConfig {
    /// Create a configuration with custom values.
    ///
    /// The ping interval is raised to [`MIN_PING_INTERVAL`] and the idle
    /// timeout to at least one ping interval.
    #[must_use]
    pub const fn new(ping_interval: Duration, idle_timeout: Duration) -> Self {
        let ping_interval = if ping_interval.as_nanos() < MIN_PING_INTERVAL.as_nanos() {
            MIN_PING_INTERVAL
        } else {
            ping_interval
        };
        let idle_timeout = if idle_timeout.as_nanos() < ping_interval.as_nanos() {
            ping_interval
        } else {
            idle_timeout
        };
        Self {
            ping_interval,
            idle_timeout,
        }
    }
}

/// Events emitted by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEvent {
    /// Send a WebSocket ping.
    SendPing,
    /// Nothing received for the idle timeout; end the session.
    IdleTimeout,
}

/// Last time anything arrived on the socket.
#[derive(Debug)]
pub struct ActivityTracker {
    last_activity: Mutex<Instant>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    /// Start tracking from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Record inbound traffic.
    pub fn record_activity(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last inbound traffic.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

/// Per-session watchdog task.
pub struct LivenessWatchdog {
    config: LivenessConfig,
    activity: Arc<ActivityTracker>,
    event_tx: mpsc::Sender<LivenessEvent>,
    cancel: CancellationToken,
}

impl LivenessWatchdog {
    /// Create a watchdog. Run it with [`LivenessWatchdog::run`].
    #[must_use]
    pub const fn new(
        config: LivenessConfig,
        activity: Arc<ActivityTracker>,
        event_tx: mpsc::Sender<LivenessEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            activity,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the receiver is dropped, or the session idles out.
    pub async fn run(self) {
        // Fields are public, so a config built without `new` can still hold zero.
        let period = self.config.ping_interval.max(MIN_PING_INTERVAL);
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    let idle = self.activity.idle_for();
                    let event = if idle >= self.config.idle_timeout {
                        tracing::warn!(
                            idle_secs = idle.as_secs(),
                            timeout_secs = self.config.idle_timeout.as_secs(),
                            "Stream idle timeout"
                        );
                        LivenessEvent::IdleTimeout
                    } else {
                        LivenessEvent::SendPing
                    };

                    if self.event_tx.send(event).await.is_err()
                        || event == LivenessEvent::IdleTimeout
                    {
                        break;
                    }
                }
            }
        }
    }
}
