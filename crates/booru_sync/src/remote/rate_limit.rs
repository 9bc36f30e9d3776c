//! Request spacing and the shared 429 backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

use crate::retry::sleep_unless_shutdown;
use crate::sync::{RATE_LIMIT_INITIAL_BACKOFF_MS, RATE_LIMIT_MAX_BACKOFF_MS};

/// Egress key used when no proxy is configured.
pub const DIRECT_EGRESS: &str = "direct";

/// Default minimum spacing between requests through one egress point.
pub const DEFAULT_REQUEST_SPACING: Duration = Duration::from_millis(100);

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Enforces a minimum interval between requests per egress point (a proxy
/// URL, or [`DIRECT_EGRESS`]).
///
/// # Example
///
/// ```ignore
/// let spacer = RequestSpacer::new(Duration::from_millis(100));
/// spacer.wait("http://10.0.0.1:8080").await;
/// ```
#[derive(Clone)]
pub struct RequestSpacer {
    inner: Option<Arc<KeyedLimiter>>,
}

impl std::fmt::Debug for RequestSpacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSpacer")
            .field("enabled", &self.inner.is_some())
            .finish()
    }
}

impl RequestSpacer {
    /// A zero interval disables spacing.
    pub fn new(min_interval: Duration) -> Self {
        let inner = Quota::with_period(min_interval).map(|quota| Arc::new(RateLimiter::keyed(quota)));
        Self { inner }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Wait until a request through `egress` is allowed.
    pub async fn wait(&self, egress: &str) {
        if let Some(limiter) = &self.inner {
            limiter.until_key_ready(&egress.to_string()).await;
        }
    }
}

impl Default for RequestSpacer {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_SPACING)
    }
}

/// Process-wide "we were rate limited" flag with exponential backoff.
///
/// Any worker that sees a 429 calls [`RateLimitGate::trip`]. Every worker
/// calls [`RateLimitGate::wait`] before a remote call; while the gate is
/// tripped that sleeps for the current backoff and then clears the flag.
/// The backoff doubles on each new trip and resets after a success.
#[derive(Debug)]
pub struct RateLimitGate {
    tripped: AtomicBool,
    trips: AtomicU32,
    initial: Duration,
    max: Duration,
}

impl Default for RateLimitGate {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(RATE_LIMIT_INITIAL_BACKOFF_MS),
            Duration::from_millis(RATE_LIMIT_MAX_BACKOFF_MS),
        )
    }
}

impl RateLimitGate {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            tripped: AtomicBool::new(false),
            trips: AtomicU32::new(0),
            initial,
            max,
        }
    }

    /// Record a 429. Trips observed while the gate is already closed do not
    /// grow the backoff.
    pub fn trip(&self) {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            let trips = self.trips.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::warn!(trips, backoff = ?self.backoff_for(trips), "Rate limited by remote");
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Backoff the next [`RateLimitGate::wait`] would sleep for.
    pub fn current_backoff(&self) -> Duration {
        self.backoff_for(self.trips.load(Ordering::SeqCst).max(1))
    }

    fn backoff_for(&self, trips: u32) -> Duration {
        let exponent = trips.saturating_sub(1).min(31);
        self.initial
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }

    /// Sleep out the backoff if the gate is tripped. Returns the pause taken.
    ///
    /// A set `shutdown` flag ends the pause early and leaves the gate
    /// tripped, since the backoff was never served.
    pub async fn wait(&self, shutdown: Option<&AtomicBool>) -> Option<Duration> {
        if !self.is_tripped() {
            return None;
        }
        let backoff = self.current_backoff();
        let start = tokio::time::Instant::now();
        if !sleep_unless_shutdown(backoff, shutdown).await {
            return Some(start.elapsed());
        }
        self.tripped.store(false, Ordering::SeqCst);
        Some(backoff)
    }

    /// Reset the backoff curve after a successful request.
    pub fn note_success(&self) {
        if !self.is_tripped() {
            self.trips.store(0, Ordering::SeqCst);
        }
    }
}
