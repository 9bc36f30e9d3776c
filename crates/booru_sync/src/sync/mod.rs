//! Reconcile orchestration.
//!
//! # Module Structure
//!
//! - [`types`] - Run options, per-post outcomes, summaries, constants
//! - [`progress`] - Progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//! - [`writer`] - The single patch writer task and its channel
//! - [`scheduler`] - The worker pool: `reconcile()`
//! - [`commit`] - Replaying a recorded difference cache: `commit_cached()`
//!
//! # Example
//!
//! ```ignore
//! use booru_sync::sync::{ReconcileContext, ReconcileOptions, reconcile};
//!
//! let ctx = ReconcileContext { engine, cache, tracker, applier, gate };
//! let options = ReconcileOptions { submit: true, ..ReconcileOptions::default() };
//! let summary = reconcile(&ctx, ids, &options, None).await;
//! println!("Patched {} posts", summary.patched);
//! ```

pub mod commit;
mod progress;
pub mod scheduler;
mod types;
pub mod writer;

pub use types::{PostOutcome, ReconcileOptions, ReconcileSummary};

pub use types::{
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_WORKERS, INITIAL_RETRY_DELAY_MS, MAX_RETRY_DELAY_MS,
    RATE_LIMIT_INITIAL_BACKOFF_MS, RATE_LIMIT_MAX_BACKOFF_MS,
};

pub use progress::{DiffOutcome, ProgressCallback, SkipReason, SyncProgress, emit};

pub use commit::commit_cached;
pub use scheduler::{ReconcileContext, reconcile};
pub use writer::{
    PATCH_CHANNEL_BUFFER_SIZE, PatchTask, WRITER_TASK_TIMEOUT, WriterResult, await_patch_writer,
    create_patch_channel, spawn_patch_writer,
};
