//! Retry policy shared by the fetch, diff, and replay paths.
//!
//! A [`RetryConfig`] names the attempt budget and the backoff curve;
//! [`with_retry`] drives any fallible async operation through it.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::sync::{
    DEFAULT_RETRY_ATTEMPTS, INITIAL_RETRY_DELAY_MS, MAX_RETRY_DELAY_MS, ProgressCallback,
    SyncProgress,
};

/// How many times a post is retried and how long to wait in between.
///
/// Delays grow exponentially from `min_delay` and are capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Retries after the first attempt; zero means a single try.
    pub max_retries: usize,
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(INITIAL_RETRY_DELAY_MS),
            Duration::from_millis(MAX_RETRY_DELAY_MS),
            DEFAULT_RETRY_ATTEMPTS,
        )
    }
}

impl RetryConfig {
    /// Jittered policy with explicit delay bounds.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    /// Default delays with a caller-chosen attempt budget (the `--retry` flag).
    #[must_use]
    pub fn with_max_retries(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_jitter(self, with_jitter: bool) -> Self {
        Self {
            with_jitter,
            ..self
        }
    }

    /// The backon builder for this policy.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);
        match self.with_jitter {
            true => builder.with_jitter(),
            false => builder,
        }
    }
}

/// How often a sleeping task looks at the shutdown flag.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sleep for `duration`, waking early once `shutdown` is set.
///
/// Returns `false` when the sleep was cut short.
pub async fn sleep_unless_shutdown(duration: Duration, shutdown: Option<&AtomicBool>) -> bool {
    let Some(flag) = shutdown else {
        tokio::time::sleep(duration).await;
        return true;
    };

    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if flag.load(Ordering::Acquire) {
            return false;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(SHUTDOWN_POLL_INTERVAL)).await;
    }
}

/// Execute an operation under a retry policy.
///
/// - `should_retry` decides whether an error is worth another attempt.
/// - Once `shutdown` is set no further retry is scheduled, and a backoff
///   sleep already running ends early. The operation is still called once
///   more after an interrupted sleep, so it should check the flag itself
///   before doing remote work.
/// - Every scheduled retry is reported as [`SyncProgress::RetryBackoff`] and
///   logged at debug level with the short error message.
///
/// # Example
///
/// ```ignore
/// use booru_sync::retry::{RetryConfig, with_retry};
///
/// let diff = with_retry(
///     &RetryConfig::with_max_retries(5),
///     || async { engine.compare(post_id).await },
///     |e| e.is_retryable(),
///     |e| e.to_string(),
///     post_id,
///     Some(&shutdown),
///     on_progress,
/// )
/// .await?;
/// ```
pub async fn with_retry<T, E, F, Fut, ShouldRetry, ShortMsg>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: ShouldRetry,
    short_message: ShortMsg,
    post_id: i64,
    shutdown: Option<&Arc<AtomicBool>>,
    on_progress: Option<&ProgressCallback>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
    ShouldRetry: Fn(&E) -> bool + Send + Sync + 'static,
    ShortMsg: Fn(&E) -> String + Send + Sync + 'static,
{
    // Counts calls, so it equals the number of the attempt that just failed
    let attempts = AtomicU32::new(0);

    let attempt = || {
        attempts.fetch_add(1, Ordering::Relaxed);
        operation()
    };

    let stop = shutdown.cloned();
    let stopping = |flag: &Option<Arc<AtomicBool>>| {
        flag.as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    };
    let sleeper_flag = stop.clone();

    attempt
        .retry(config.clone().into_backoff())
        .sleep(move |delay: Duration| {
            let flag = sleeper_flag.clone();
            async move {
                sleep_unless_shutdown(delay, flag.as_deref()).await;
            }
        })
        .when(move |e| should_retry(e) && !stopping(&stop))
        .notify(|err, delay| {
            let failed = attempts.load(Ordering::Relaxed);
            let error = short_message(err);
            tracing::debug!(post_id, attempt = failed, delay = ?delay, error = %error, "Retrying post");
            if let Some(cb) = on_progress {
                cb(SyncProgress::RetryBackoff {
                    post_id,
                    retry_after_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    attempt: failed,
                    error,
                });
            }
        })
        .await
}
