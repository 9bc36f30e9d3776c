//! Apply a previously recorded difference cache without refetching.
//!
//! A dry run leaves its drift in the difference cache. Committing replays
//! those entries through the same patch writer a submitting run would use.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use super::progress::{DiffOutcome, ProgressCallback, SkipReason, SyncProgress, emit};
use super::types::{PostOutcome, ReconcileSummary, is_shutdown_requested};
use super::writer::{PatchTask, await_patch_writer, create_patch_channel, spawn_patch_writer};
use crate::cache::{DiffCache, PatchStateTracker};
use crate::patch::PatchApplier;

/// Replay every cached difference with drift through the patch writer.
///
/// Entries are visited in post id order. Posts already marked patched are
/// skipped, as are missing and empty differences.
pub async fn commit_cached(
    cache: &DiffCache,
    tracker: &PatchStateTracker,
    applier: Arc<PatchApplier>,
    shutdown: Option<&Arc<AtomicBool>>,
    on_progress: Option<Arc<ProgressCallback>>,
) -> ReconcileSummary {
    let progress = on_progress.as_deref();
    let entries = cache.entries();
    let mut summary = ReconcileSummary {
        total: entries.len(),
        ..ReconcileSummary::default()
    };

    emit(
        progress,
        SyncProgress::Starting {
            total: entries.len(),
            workers: 1,
            submit: true,
        },
    );
    tracing::info!(total = entries.len(), "Committing cached differences");

    let (tx, rx) = create_patch_channel();
    let (writer, _) = spawn_patch_writer(applier, rx, on_progress.clone());

    for (index, (post_id, difference)) in entries.iter().enumerate() {
        if is_shutdown_requested(shutdown) {
            summary.cancelled = entries.len() - index;
            tracing::warn!(cancelled = summary.cancelled, "Shutdown requested, stopping commit");
            break;
        }

        let post_id = *post_id;
        if tracker.is_patched(post_id) {
            emit(
                progress,
                SyncProgress::Skipped {
                    post_id,
                    reason: SkipReason::AlreadyPatched,
                },
            );
            summary.record(post_id, PostOutcome::AlreadyPatched);
            continue;
        }

        let outcome = match difference.outcome() {
            DiffOutcome::UpToDate => PostOutcome::UpToDate,
            DiffOutcome::Missing => PostOutcome::Missing,
            DiffOutcome::Drift { .. } => {
                let task = PatchTask {
                    post_id,
                    difference: difference.clone(),
                };
                if tx.send(task).await.is_err() {
                    PostOutcome::Failed("patch writer stopped".to_string())
                } else {
                    emit(progress, SyncProgress::PatchQueued { post_id });
                    PostOutcome::Queued
                }
            }
        };
        summary.record(post_id, outcome);
    }

    drop(tx);
    await_patch_writer(writer).await.merge_into(&mut summary);

    tracing::info!(
        patched = summary.patched,
        failed = summary.failed,
        skipped = summary.skipped_patched,
        "Commit finished"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TagCreationLog;
    use crate::diff::Difference;
    use crate::field::{FieldMap, FieldValue, PostField};
    use crate::store::{MemoryStore, Post, PostStore};

    fn score_drift(score: i64) -> Difference {
        let mut forward = FieldMap::new();
        forward.insert(PostField::Score, FieldValue::Integer(score));
        Difference {
            forward: Some(forward),
            backward: Some(FieldMap::new()),
        }
    }

    #[tokio::test]
    async fn test_commit_replays_only_unpatched_drift() {
        let store = Arc::new(MemoryStore::new());
        for id in 1..=4 {
            store.insert_post(Post::new(id));
        }
        let tracker = Arc::new(PatchStateTracker::in_memory());
        tracker.mark_patched(2).unwrap();
        let applier = Arc::new(PatchApplier::new(
            store.clone(),
            Arc::clone(&tracker),
            Arc::new(TagCreationLog::in_memory()),
        ));

        let cache = DiffCache::in_memory();
        cache.insert(1, score_drift(10)).unwrap();
        cache.insert(2, score_drift(20)).unwrap();
        cache.insert(3, Difference::up_to_date()).unwrap();
        cache.insert(4, Difference::missing(None)).unwrap();

        let summary = commit_cached(&cache, &tracker, applier, None, None).await;

        assert_eq!(summary.total, 4);
        assert_eq!(summary.patched, 1);
        assert_eq!(summary.skipped_patched, 1);
        assert_eq!(summary.up_to_date, 1);
        assert_eq!(summary.missing, 1);
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.get_post(1).await.unwrap().unwrap().score, Some(10));
        assert_eq!(store.get_post(2).await.unwrap().unwrap().score, None);
        assert!(tracker.is_patched(1));
    }

    #[tokio::test]
    async fn test_commit_honours_shutdown() {
        let store = Arc::new(MemoryStore::new());
        store.insert_post(Post::new(1));
        let tracker = Arc::new(PatchStateTracker::in_memory());
        let applier = Arc::new(PatchApplier::new(
            store.clone(),
            Arc::clone(&tracker),
            Arc::new(TagCreationLog::in_memory()),
        ));
        let cache = DiffCache::in_memory();
        cache.insert(1, score_drift(1)).unwrap();

        let flag = Arc::new(AtomicBool::new(true));
        let summary = commit_cached(&cache, &tracker, applier, Some(&flag), None).await;
        assert_eq!(summary.cancelled, 1);
        assert_eq!(store.save_count(), 0);
    }
}
