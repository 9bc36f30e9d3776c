//! Shared reconcile types and constants.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::retry::RetryConfig;

/// Default number of posts diffed concurrently.
pub const DEFAULT_WORKERS: usize = 5;

/// Default retry budget for one post's fetch-and-diff.
pub const DEFAULT_RETRY_ATTEMPTS: usize = 5;

/// Initial delay between retries of a single post.
pub const INITIAL_RETRY_DELAY_MS: u64 = 500;

/// Upper bound on the delay between retries of a single post.
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// First pause taken by every worker once the remote answers 429.
pub const RATE_LIMIT_INITIAL_BACKOFF_MS: u64 = 2_000;

/// Cap on the shared rate-limit pause.
pub const RATE_LIMIT_MAX_BACKOFF_MS: u64 = 300_000;

/// Options for a reconcile run.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Maximum number of posts in flight at once.
    pub workers: usize,
    /// Apply drift to the local store instead of only recording it.
    pub submit: bool,
    /// Retry policy for each post's fetch-and-diff.
    pub retry: RetryConfig,
    /// Randomize processing order.
    pub shuffle: bool,
    /// Cooperative cancellation flag. Once set, no new posts are dispatched
    /// and no further retries are scheduled.
    pub shutdown: Option<Arc<AtomicBool>>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            submit: false,
            retry: RetryConfig::default(),
            shuffle: false,
            shutdown: None,
        }
    }
}

impl ReconcileOptions {
    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        is_shutdown_requested(self.shutdown.as_ref())
    }
}

pub(crate) fn is_shutdown_requested(flag: Option<&Arc<AtomicBool>>) -> bool {
    flag.is_some_and(|f| f.load(Ordering::SeqCst))
}

/// What happened to one post during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    /// Already marked patched; not fetched.
    AlreadyPatched,
    /// Difference already cached and not submitting; not fetched.
    AlreadyCached,
    /// Local and remote agree.
    UpToDate,
    /// Remote or local record absent.
    Missing,
    /// Drift found and handed to the writer.
    Queued,
    /// Drift found but submission is off.
    DriftNotSubmitted,
    /// Fetch or diff failed after retries.
    Failed(String),
    /// Abandoned between retries because shutdown was requested.
    Interrupted,
}

/// Aggregate counts for a reconcile or commit run.
#[derive(Debug, Default, Clone)]
pub struct ReconcileSummary {
    /// Posts considered.
    pub total: usize,
    /// Posts the writer patched.
    pub patched: usize,
    /// Posts with no drift.
    pub up_to_date: usize,
    /// Posts missing on either side.
    pub missing: usize,
    /// Posts whose fetch, diff or patch failed.
    pub failed: usize,
    /// Posts skipped because they were already patched.
    pub skipped_patched: usize,
    /// Posts skipped because a cached difference existed.
    pub skipped_cached: usize,
    /// Posts with drift that was only recorded.
    pub not_submitted: usize,
    /// Fields skipped inside otherwise successful patches.
    pub field_failures: usize,
    /// Posts never dispatched, or abandoned mid-retry, because shutdown was
    /// requested.
    pub cancelled: usize,
    /// Tags created while patching.
    pub tags_created: usize,
    /// Set when the patch writer crashed or timed out.
    pub writer_panic: Option<String>,
    /// Failure messages keyed by post id.
    pub errors: Vec<(i64, String)>,
}

impl ReconcileSummary {
    /// Fold one scheduler outcome into the counts.
    pub fn record(&mut self, post_id: i64, outcome: PostOutcome) {
        match outcome {
            PostOutcome::AlreadyPatched => self.skipped_patched += 1,
            PostOutcome::AlreadyCached => self.skipped_cached += 1,
            PostOutcome::UpToDate => self.up_to_date += 1,
            PostOutcome::Missing => self.missing += 1,
            // Counted as patched or failed once the writer reports back
            PostOutcome::Queued => {}
            PostOutcome::DriftNotSubmitted => self.not_submitted += 1,
            PostOutcome::Interrupted => self.cancelled += 1,
            PostOutcome::Failed(message) => {
                self.failed += 1;
                self.errors.push((post_id, message));
            }
        }
    }

    pub fn has_errors(&self) -> bool {
        self.failed > 0 || self.writer_panic.is_some()
    }
}
