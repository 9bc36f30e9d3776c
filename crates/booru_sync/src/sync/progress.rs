//! Progress reporting types for reconcile operations.
//!
//! The scheduler, the patch writer and the commit replay all report through
//! [`SyncProgress`]; the CLI turns these into progress bars or log lines.

use crate::entity::tag_category::TagCategory;
use crate::field::PostField;

/// Why a post was not fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A patched record exists in the patch-state journal.
    AlreadyPatched,
    /// A difference is cached and this run does not submit.
    AlreadyCached,
}

/// Classification of a computed difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// No drift.
    UpToDate,
    /// Remote or local record is absent.
    Missing,
    /// At least one field drifted.
    Drift {
        /// Number of drifted fields.
        fields: usize,
    },
}

/// Progress events emitted during reconcile and commit runs.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// A run is starting.
    Starting {
        /// Number of post ids scheduled.
        total: usize,
        /// Worker bound.
        workers: usize,
        /// Whether drift is applied.
        submit: bool,
    },

    /// A post was skipped without fetching.
    Skipped {
        /// The post id.
        post_id: i64,
        /// Why it was skipped.
        reason: SkipReason,
    },

    /// A difference was computed (or loaded from the cache).
    Diffed {
        /// The post id.
        post_id: i64,
        /// What the difference says.
        outcome: DiffOutcome,
    },

    /// Fetching or diffing a post failed after retries.
    FetchFailed {
        /// The post id.
        post_id: i64,
        /// Error message.
        error: String,
    },

    /// A retry was scheduled for a post.
    RetryBackoff {
        /// The post id.
        post_id: i64,
        /// Time to wait before retry (ms).
        retry_after_ms: u64,
        /// Current attempt number.
        attempt: u32,
        /// Short error description.
        error: String,
    },

    /// The remote rate limited us and every worker is pausing.
    RateLimited {
        /// Length of the shared pause (ms).
        backoff_ms: u64,
    },

    /// Drift was handed to the patch writer.
    PatchQueued {
        /// The post id.
        post_id: i64,
    },

    /// A post was patched and persisted.
    Patched {
        /// The post id.
        post_id: i64,
        /// Number of fields updated.
        fields: usize,
    },

    /// A single field could not be patched; the rest of the post was.
    FieldSkipped {
        /// The post id.
        post_id: i64,
        /// The field left unchanged.
        field: PostField,
        /// Why it was skipped.
        error: String,
    },

    /// Patching a post failed.
    PatchFailed {
        /// The post id.
        post_id: i64,
        /// Error message.
        error: String,
    },

    /// A tag was created locally while patching.
    TagCreated {
        /// New tag id.
        id: i64,
        /// Tag name.
        name: String,
        /// Tag category.
        category: TagCategory,
    },

    /// Tags from the creation log were restored into the store.
    TagsRestored {
        /// Number of tags recreated.
        count: usize,
    },

    /// A post was written to the export directory.
    Exported {
        /// The post id.
        post_id: i64,
    },

    /// Warning message (non-fatal).
    Warning {
        /// Warning message.
        message: String,
    },

    /// The run finished.
    Complete {
        /// Posts patched.
        patched: usize,
        /// Posts already in agreement.
        up_to_date: usize,
        /// Posts that failed.
        failed: usize,
    },
}

/// Callback for progress updates during reconcile operations.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
///
/// # Example
///
/// ```ignore
/// use booru_sync::sync::{emit, SyncProgress, ProgressCallback};
///
/// fn report(on_progress: Option<&ProgressCallback>) {
///     emit(on_progress, SyncProgress::PatchQueued { post_id: 42 });
/// }
/// ```
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}
