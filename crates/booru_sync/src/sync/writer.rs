//! The single patch writer.
//!
//! Workers never touch the local store directly. They send [`PatchTask`]s
//! over a bounded channel to one background task that applies them in
//! arrival order through [`PatchApplier`]:
//!
//! ```text
//! workers (fetch + diff) → patch channel → patch writer → local store
//! ```
//!
//! Closing the channel (dropping every sender) is the shutdown signal: the
//! writer drains whatever is still queued and exits.
//!
//! # Example
//!
//! ```ignore
//! use booru_sync::sync::{await_patch_writer, create_patch_channel, spawn_patch_writer};
//!
//! let (tx, rx) = create_patch_channel();
//! let (handle, patched) = spawn_patch_writer(applier, rx, Some(progress));
//!
//! // Send tasks through tx...
//! drop(tx);
//!
//! let result = await_patch_writer(handle).await;
//! println!("Patched {} posts", result.patched);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::ReconcileSummary;
use crate::diff::Difference;
use crate::patch::PatchApplier;

/// Channel capacity between the workers and the writer. A full channel
/// makes workers wait, which bounds memory held by pending differences.
pub const PATCH_CHANNEL_BUFFER_SIZE: usize = 256;

/// How long to wait for the writer after all senders are dropped. Once the
/// channel closes the writer only has the queued tasks left, so hitting this
/// means a sender leaked.
pub const WRITER_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// One post's drift, queued for application.
#[derive(Debug, Clone)]
pub struct PatchTask {
    pub post_id: i64,
    pub difference: Difference,
}

/// What the writer did over its lifetime.
#[derive(Debug, Default)]
#[must_use = "WriterResult may contain errors that should be checked"]
pub struct WriterResult {
    /// Posts persisted.
    pub patched: usize,
    /// Posts skipped because they could not be patched (missing locally).
    pub skipped: usize,
    /// Fields left unchanged inside persisted patches.
    pub field_failures: usize,
    /// Tags created while patching.
    pub tags_created: usize,
    /// Patch failures: (post_id, error_message).
    pub errors: Vec<(i64, String)>,
    /// Panic message if the task panicked.
    pub panic_info: Option<String>,
}

impl WriterResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.panic_info.is_some()
    }

    pub fn failed_count(&self) -> usize {
        self.errors.len() + usize::from(self.panic_info.is_some())
    }
}

async fn apply_task(
    applier: &PatchApplier,
    task: PatchTask,
    result: &mut WriterResult,
    patched_count: &AtomicUsize,
    on_progress: Option<&ProgressCallback>,
) {
    let PatchTask {
        post_id,
        difference,
    } = task;

    match applier.apply_difference(post_id, &difference).await {
        Ok(report) => {
            for tag in &report.created_tags {
                emit(
                    on_progress,
                    SyncProgress::TagCreated {
                        id: tag.id,
                        name: tag.name.clone(),
                        category: tag.category,
                    },
                );
            }
            for failure in &report.skipped {
                emit(
                    on_progress,
                    SyncProgress::FieldSkipped {
                        post_id,
                        field: failure.field,
                        error: failure.reason.clone(),
                    },
                );
            }

            result.patched += 1;
            result.field_failures += report.skipped.len();
            result.tags_created += report.created_tags.len();
            patched_count.fetch_add(1, Ordering::Relaxed);

            emit(
                on_progress,
                SyncProgress::Patched {
                    post_id,
                    fields: report.updated.len(),
                },
            );
        }
        Err(e) if e.is_skip() => {
            tracing::warn!(post_id, error = %e, "Skipping patch");
            result.skipped += 1;
            emit(
                on_progress,
                SyncProgress::Warning {
                    message: e.to_string(),
                },
            );
        }
        Err(e) => {
            tracing::warn!(post_id, error = %e, "Failed to patch post");
            let error = e.to_string();
            result.errors.push((post_id, error.clone()));
            emit(on_progress, SyncProgress::PatchFailed { post_id, error });
        }
    }
}

/// Spawn the writer task.
///
/// Tasks are applied one at a time in FIFO order. The task runs until the
/// channel is closed and empty, so queued patches are never dropped on
/// shutdown.
///
/// Returns the task handle and a live counter of patched posts.
pub fn spawn_patch_writer(
    applier: Arc<PatchApplier>,
    mut rx: mpsc::Receiver<PatchTask>,
    on_progress: Option<Arc<ProgressCallback>>,
) -> (tokio::task::JoinHandle<WriterResult>, Arc<AtomicUsize>) {
    let patched_count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&patched_count);

    let handle = tokio::spawn(async move {
        let mut result = WriterResult::default();
        let task_start = std::time::Instant::now();

        tracing::debug!("Patch writer started");

        while let Some(task) = rx.recv().await {
            apply_task(
                &applier,
                task,
                &mut result,
                &patched_count,
                on_progress.as_deref(),
            )
            .await;
        }

        tracing::debug!(
            patched = result.patched,
            skipped = result.skipped,
            errors = result.errors.len(),
            elapsed_ms = task_start.elapsed().as_millis(),
            "Patch writer finished"
        );
        result
    });

    (handle, counter)
}

/// Await the writer, capturing panics and giving up after
/// [`WRITER_TASK_TIMEOUT`].
pub async fn await_patch_writer(
    mut handle: tokio::task::JoinHandle<WriterResult>,
) -> WriterResult {
    tokio::select! {
        result = &mut handle => match result {
            Ok(writer_result) => writer_result,
            Err(e) => {
                let panic_info = if e.is_panic() {
                    let payload = e.into_panic();
                    if let Some(s) = payload.downcast_ref::<&str>() {
                        (*s).to_string()
                    } else if let Some(s) = payload.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic".to_string()
                    }
                } else if e.is_cancelled() {
                    "Task was cancelled".to_string()
                } else {
                    format!("Task failed: {e}")
                };

                tracing::error!(panic_info = %panic_info, "Patch writer failed");
                WriterResult {
                    panic_info: Some(panic_info),
                    ..WriterResult::default()
                }
            }
        },
        _ = tokio::time::sleep(WRITER_TASK_TIMEOUT) => {
            handle.abort();
            let cancelled = tokio::time::timeout(Duration::from_secs(1), &mut handle)
                .await
                .is_ok();

            tracing::error!(
                timeout_secs = WRITER_TASK_TIMEOUT.as_secs(),
                cancelled,
                "Patch writer timed out; a patch sender was probably never dropped"
            );
            WriterResult {
                panic_info: Some(format!(
                    "Patch writer timed out after {}s",
                    WRITER_TASK_TIMEOUT.as_secs()
                )),
                ..WriterResult::default()
            }
        }
    }
}

impl WriterResult {
    /// Fold the writer's counts into a run summary.
    pub fn merge_into(self, summary: &mut ReconcileSummary) {
        summary.patched += self.patched;
        // Lost locally between diffing and patching
        summary.missing += self.skipped;
        summary.field_failures += self.field_failures;
        summary.tags_created += self.tags_created;
        summary.failed += self.errors.len();
        summary.errors.extend(self.errors);
        if self.panic_info.is_some() {
            summary.writer_panic = self.panic_info;
        }
    }
}

/// Create the bounded channel between workers and the writer.
pub fn create_patch_channel() -> (mpsc::Sender<PatchTask>, mpsc::Receiver<PatchTask>) {
    mpsc::channel(PATCH_CHANNEL_BUFFER_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{PatchStateTracker, TagCreationLog};
    use crate::entity::tag_category::TagCategory;
    use crate::field::{FieldMap, FieldValue, PostField};
    use crate::store::{MemoryStore, Post, PostStore};
    use std::sync::Mutex;

    fn score_drift(score: i64) -> Difference {
        let mut forward = FieldMap::new();
        forward.insert(PostField::Score, FieldValue::Integer(score));
        Difference {
            forward: Some(forward),
            backward: Some(FieldMap::new()),
        }
    }

    fn applier(store: Arc<MemoryStore>) -> (Arc<PatchApplier>, Arc<PatchStateTracker>) {
        let tracker = Arc::new(PatchStateTracker::in_memory());
        let applier = PatchApplier::new(
            store,
            Arc::clone(&tracker),
            Arc::new(TagCreationLog::in_memory()),
        );
        (Arc::new(applier), tracker)
    }

    #[test]
    fn test_writer_result_counts() {
        let result = WriterResult::default();
        assert!(!result.has_errors());
        assert_eq!(result.failed_count(), 0);

        let result = WriterResult {
            errors: vec![(1, "boom".to_string())],
            panic_info: Some("panic".to_string()),
            ..WriterResult::default()
        };
        assert!(result.has_errors());
        assert_eq!(result.failed_count(), 2);
    }

    #[tokio::test]
    async fn test_writer_drains_queue_after_channel_closes() {
        let store = Arc::new(MemoryStore::new());
        for id in 1..=3 {
            store.insert_post(Post::new(id));
        }
        let (applier, tracker) = applier(store.clone());

        let (tx, rx) = create_patch_channel();
        let (handle, counter) = spawn_patch_writer(applier, rx, None);

        for id in 1..=3 {
            tx.send(PatchTask {
                post_id: id,
                difference: score_drift(id * 10),
            })
            .await
            .unwrap();
        }
        drop(tx);

        let result = await_patch_writer(handle).await;
        assert_eq!(result.patched, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!result.has_errors());
        assert_eq!(store.save_count(), 3);
        assert_eq!(tracker.patched_count(), 3);
        assert_eq!(store.get_post(2).await.unwrap().unwrap().score, Some(20));
    }

    #[tokio::test]
    async fn test_missing_local_post_is_skipped_not_failed() {
        let store = Arc::new(MemoryStore::new());
        let (applier, _) = applier(store.clone());

        let (tx, rx) = create_patch_channel();
        let (handle, _) = spawn_patch_writer(applier, rx, None);
        tx.send(PatchTask {
            post_id: 9,
            difference: score_drift(1),
        })
        .await
        .unwrap();
        drop(tx);

        let result = await_patch_writer(handle).await;
        assert_eq!(result.patched, 0);
        assert_eq!(result.skipped, 1);
        assert!(!result.has_errors());
    }

    #[tokio::test]
    async fn test_writer_reports_created_tags() {
        let store = Arc::new(MemoryStore::new());
        store.insert_post(Post::new(5));
        let (applier, _) = applier(store.clone());

        let events: Arc<Mutex<Vec<SyncProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&events);
        let callback: ProgressCallback = Box::new(move |event| {
            capture.lock().unwrap().push(event);
        });

        let mut forward = FieldMap::new();
        forward.insert(PostField::Copyright, FieldValue::Tags(["original".to_string()].into()));
        let mut backward = FieldMap::new();
        backward.insert(PostField::Copyright, FieldValue::Tags(Default::default()));

        let (tx, rx) = create_patch_channel();
        let (handle, _) = spawn_patch_writer(applier, rx, Some(Arc::new(callback)));
        tx.send(PatchTask {
            post_id: 5,
            difference: Difference {
                forward: Some(forward),
                backward: Some(backward),
            },
        })
        .await
        .unwrap();
        drop(tx);

        let result = await_patch_writer(handle).await;
        assert_eq!(result.tags_created, 1);

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            SyncProgress::TagCreated { name, category: TagCategory::Copyright, .. } if name == "original"
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncProgress::Patched { post_id: 5, fields: 1 })));
    }

    #[tokio::test]
    async fn test_await_captures_panic() {
        let handle = tokio::spawn(async {
            panic!("writer exploded");
            #[allow(unreachable_code)]
            WriterResult::default()
        });
        let result = await_patch_writer(handle).await;
        assert_eq!(result.panic_info.as_deref(), Some("writer exploded"));
    }

    #[test]
    fn test_merge_into_summary() {
        let mut summary = ReconcileSummary::default();
        WriterResult {
            patched: 2,
            skipped: 1,
            field_failures: 3,
            errors: vec![(8, "disk full".to_string())],
            ..WriterResult::default()
        }
        .merge_into(&mut summary);

        assert_eq!(summary.patched, 2);
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.field_failures, 3);
        assert_eq!(summary.failed, 1);
        assert!(summary.has_errors());
        assert!(summary.writer_panic.is_none());
    }

    #[test]
    fn test_create_patch_channel() {
        let (tx, _rx) = create_patch_channel();
        assert!(!tx.is_closed());
        assert_eq!(tx.max_capacity(), PATCH_CHANNEL_BUFFER_SIZE);
    }
}
