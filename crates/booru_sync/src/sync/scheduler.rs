//! Worker pool that drives fetch, diff, and patch for a list of post ids.
//!
//! Each post id goes through:
//!
//! ```text
//! pending → (skipped) | fetching ⇄ rate limited → diffed → up to date
//!                                                        → missing
//!                                                        → patch queued → patched
//!                     fetching → failed (retry budget spent)
//! ```
//!
//! At most `workers` posts are in flight at once. Permits are taken before a
//! worker is spawned, so a long id list never turns into a long list of
//! parked tasks. All local mutations go through the single patch writer.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use rand::seq::SliceRandom;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

use super::progress::{DiffOutcome, ProgressCallback, SkipReason, SyncProgress, emit};
use super::types::{PostOutcome, ReconcileOptions, ReconcileSummary, is_shutdown_requested};
use super::writer::{PatchTask, await_patch_writer, create_patch_channel, spawn_patch_writer};
use crate::cache::{DiffCache, PatchStateTracker};
use crate::diff::{DiffEngine, DiffError};
use crate::patch::PatchApplier;
use crate::remote::{RateLimitGate, short_error_message};
use crate::retry::{RetryConfig, with_retry};

/// Everything a reconcile run shares between workers.
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    pub engine: Arc<DiffEngine>,
    pub cache: Arc<DiffCache>,
    pub tracker: Arc<PatchStateTracker>,
    pub applier: Arc<PatchApplier>,
    pub gate: Arc<RateLimitGate>,
}

struct Worker {
    engine: Arc<DiffEngine>,
    cache: Arc<DiffCache>,
    gate: Arc<RateLimitGate>,
    retry: RetryConfig,
    submit: bool,
    shutdown: Option<Arc<AtomicBool>>,
    patch_tx: mpsc::Sender<PatchTask>,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl Worker {
    async fn process(&self, post_id: i64) -> PostOutcome {
        let progress = self.on_progress.as_deref();

        let difference = match self.fetch_and_diff(post_id, progress).await {
            Ok(difference) => difference,
            Err(DiffError::Interrupted) => {
                tracing::info!(post_id, "Abandoning post, shutdown requested");
                return PostOutcome::Interrupted;
            }
            Err(e) => {
                let message = short_error_message(&e);
                tracing::warn!(post_id, error = %e, "Giving up on post");
                emit(
                    progress,
                    SyncProgress::FetchFailed {
                        post_id,
                        error: message.clone(),
                    },
                );
                return PostOutcome::Failed(message);
            }
        };

        let outcome = difference.outcome();
        emit(progress, SyncProgress::Diffed { post_id, outcome });

        match outcome {
            DiffOutcome::UpToDate => {
                tracing::info!(post_id, "Post is up to date");
                PostOutcome::UpToDate
            }
            DiffOutcome::Missing => {
                tracing::warn!(post_id, "Post does not exist on both sides");
                PostOutcome::Missing
            }
            DiffOutcome::Drift { fields } if self.submit => {
                tracing::debug!(post_id, fields, "Queueing patch");
                let task = PatchTask {
                    post_id,
                    difference,
                };
                if self.patch_tx.send(task).await.is_err() {
                    return PostOutcome::Failed("patch writer stopped".to_string());
                }
                emit(progress, SyncProgress::PatchQueued { post_id });
                PostOutcome::Queued
            }
            DiffOutcome::Drift { fields } => {
                tracing::info!(post_id, fields, "Drift recorded");
                PostOutcome::DriftNotSubmitted
            }
        }
    }

    /// Compute (or load) the difference, honouring the shared rate-limit gate
    /// before every remote call. A shutdown request ends backoff sleeps early
    /// and stops any further remote call for this post.
    async fn fetch_and_diff(
        &self,
        post_id: i64,
        progress: Option<&ProgressCallback>,
    ) -> Result<crate::diff::Difference, DiffError> {
        let shutdown = self.shutdown.as_deref();
        let this = self;

        with_retry(
            &self.retry,
            move || async move {
                if is_shutdown_requested(this.shutdown.as_ref()) {
                    return Err(DiffError::Interrupted);
                }
                if let Some(paused) = this.gate.wait(shutdown).await {
                    emit(
                        progress,
                        SyncProgress::RateLimited {
                            backoff_ms: paused.as_millis() as u64,
                        },
                    );
                    if is_shutdown_requested(this.shutdown.as_ref()) {
                        return Err(DiffError::Interrupted);
                    }
                }

                let result = this
                    .cache
                    .get_or_compute(post_id, || this.engine.compare(post_id))
                    .await;
                match &result {
                    Ok(_) => this.gate.note_success(),
                    Err(e) if e.is_rate_limited() => this.gate.trip(),
                    Err(_) => {}
                }
                result
            },
            |e: &DiffError| e.is_retryable(),
            |e: &DiffError| short_error_message(e),
            post_id,
            self.shutdown.as_ref(),
            progress,
        )
        .await
    }
}

/// Reconcile `ids` against the remote.
///
/// Posts already marked patched are skipped. Without `submit`, posts with a
/// cached difference are skipped too. Drift is handed to the patch writer
/// when `submit` is on and only recorded otherwise. A failing post never
/// aborts the run.
///
/// Once the shutdown flag is set no new posts are dispatched, in-flight posts
/// finish, and the writer drains everything already queued.
pub async fn reconcile(
    ctx: &ReconcileContext,
    mut ids: Vec<i64>,
    options: &ReconcileOptions,
    on_progress: Option<Arc<ProgressCallback>>,
) -> ReconcileSummary {
    if options.shuffle {
        ids.shuffle(&mut rand::rng());
    }

    let progress = on_progress.as_deref();
    let workers = options.workers.max(1);
    let mut summary = ReconcileSummary {
        total: ids.len(),
        ..ReconcileSummary::default()
    };

    emit(
        progress,
        SyncProgress::Starting {
            total: ids.len(),
            workers,
            submit: options.submit,
        },
    );
    tracing::info!(total = ids.len(), workers, submit = options.submit, "Starting reconcile");

    let (patch_tx, patch_rx) = create_patch_channel();
    let (writer, _) = spawn_patch_writer(Arc::clone(&ctx.applier), patch_rx, on_progress.clone());

    let worker = Arc::new(Worker {
        engine: Arc::clone(&ctx.engine),
        cache: Arc::clone(&ctx.cache),
        gate: Arc::clone(&ctx.gate),
        retry: options.retry.clone(),
        submit: options.submit,
        shutdown: options.shutdown.clone(),
        patch_tx,
        on_progress: on_progress.clone(),
    });

    let semaphore = Arc::new(Semaphore::new(workers));
    let mut in_flight: Vec<(i64, JoinHandle<PostOutcome>)> = Vec::with_capacity(workers + 1);

    for (index, &post_id) in ids.iter().enumerate() {
        if options.is_shutdown_requested() {
            summary.cancelled = ids.len() - index;
            tracing::warn!(cancelled = summary.cancelled, "Shutdown requested, stopping dispatch");
            break;
        }

        let skip = if ctx.tracker.is_patched(post_id) {
            Some((SkipReason::AlreadyPatched, PostOutcome::AlreadyPatched))
        } else if !options.submit && ctx.cache.contains(post_id) {
            Some((SkipReason::AlreadyCached, PostOutcome::AlreadyCached))
        } else {
            None
        };
        if let Some((reason, outcome)) = skip {
            tracing::debug!(post_id, ?reason, "Skipping post");
            emit(progress, SyncProgress::Skipped { post_id, reason });
            summary.record(post_id, outcome);
            continue;
        }

        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::error!("Worker semaphore closed unexpectedly");
                summary.cancelled = ids.len() - index;
                break;
            }
        };

        collect_finished(&mut in_flight, &mut summary).await;

        let worker = Arc::clone(&worker);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            worker.process(post_id).await
        });
        in_flight.push((post_id, handle));
    }

    for (post_id, handle) in in_flight {
        collect(post_id, handle.await, &mut summary);
    }

    // Last sender goes with the workers; the writer drains and exits
    drop(worker);
    await_patch_writer(writer).await.merge_into(&mut summary);

    tracing::info!(
        patched = summary.patched,
        up_to_date = summary.up_to_date,
        missing = summary.missing,
        failed = summary.failed,
        skipped = summary.skipped_patched + summary.skipped_cached,
        "Reconcile finished"
    );
    emit(
        progress,
        SyncProgress::Complete {
            patched: summary.patched,
            up_to_date: summary.up_to_date,
            failed: summary.failed,
        },
    );

    summary
}

/// Fold in workers that have already finished, keeping the rest.
async fn collect_finished(
    in_flight: &mut Vec<(i64, JoinHandle<PostOutcome>)>,
    summary: &mut ReconcileSummary,
) {
    let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(in_flight)
        .into_iter()
        .partition(|(_, handle)| handle.is_finished());
    *in_flight = pending;
    for (post_id, handle) in done {
        collect(post_id, handle.await, summary);
    }
}

fn collect(
    post_id: i64,
    joined: Result<PostOutcome, tokio::task::JoinError>,
    summary: &mut ReconcileSummary,
) {
    match joined {
        Ok(outcome) => summary.record(post_id, outcome),
        Err(e) => {
            tracing::error!(post_id, error = %e, "Worker crashed");
            summary.record(post_id, PostOutcome::Failed(format!("worker crashed: {e}")));
        }
    }
}
