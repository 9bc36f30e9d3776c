//! Helpers shared by the reconcile, commit and export commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use booru_sync::sync::{ProgressCallback, ReconcileSummary, SyncProgress};
use booru_sync::{DiffCache, PatchStateTracker, SeaStore, TagCreationLog, db};
use console::style;

use crate::CacheOptions;
use crate::config::Config;

/// Maximum number of per-post errors printed after a run.
const MAX_DISPLAYED_ERRORS: usize = 10;

/// The three journals a run reads and appends to.
pub(crate) struct Journals {
    pub(crate) differences: Arc<DiffCache>,
    pub(crate) patched: Arc<PatchStateTracker>,
    pub(crate) tags: Arc<TagCreationLog>,
}

/// Journal locations after applying flag overrides and `[cache] dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JournalPaths {
    pub(crate) differences: PathBuf,
    pub(crate) patched: PathBuf,
    pub(crate) tags: PathBuf,
}

impl JournalPaths {
    pub(crate) fn resolve(config: &Config, overrides: &CacheOptions) -> Self {
        let pick = |flag: &Option<PathBuf>, configured: &Path| {
            config.resolve_cache_path(flag.as_deref().unwrap_or(configured))
        };
        Self {
            differences: pick(&overrides.cache_file, &config.cache.difference_file),
            patched: pick(&overrides.patch_state_file, &config.cache.patch_state_file),
            tags: pick(&overrides.tag_creation_file, &config.cache.tag_creation_file),
        }
    }
}

impl Journals {
    /// Open (or create) every journal, replaying what is already on disk.
    pub(crate) fn open(paths: &JournalPaths) -> Result<Self, Box<dyn std::error::Error>> {
        for path in [&paths.differences, &paths.patched, &paths.tags] {
            ensure_parent_dir(path)?;
        }

        let journals = Self {
            differences: Arc::new(DiffCache::open(&paths.differences)?),
            patched: Arc::new(PatchStateTracker::open(&paths.patched)?),
            tags: Arc::new(TagCreationLog::open(&paths.tags)?),
        };
        tracing::info!(
            differences = journals.differences.len(),
            patched = journals.patched.patched_count(),
            tags = journals.tags.len(),
            "Loaded journals"
        );
        Ok(journals)
    }
}

pub(crate) fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => std::fs::create_dir_all(parent),
        None => Ok(()),
    }
}

/// Connect to the mirror, applying pending migrations.
pub(crate) async fn open_store(
    database_url: &str,
) -> Result<Arc<SeaStore>, Box<dyn std::error::Error>> {
    let db = db::connect_and_migrate(database_url).await?;
    Ok(Arc::new(SeaStore::new(db)))
}

/// Recreate logged tags that are missing from the store, so tag ids
/// referenced by cached differences stay valid.
pub(crate) async fn restore_created_tags(
    log: &TagCreationLog,
    store: &SeaStore,
    on_progress: &ProgressCallback,
) -> Result<usize, Box<dyn std::error::Error>> {
    if log.is_empty() {
        return Ok(0);
    }
    let count = log.restore_into(store).await?;
    on_progress(SyncProgress::TagsRestored { count });
    Ok(count)
}

/// Lines of the end-of-run summary, without styling.
pub(crate) fn summary_lines(summary: &ReconcileSummary, submit: bool) -> Vec<String> {
    let mut lines = vec![format!(
        "{} posts: {} patched, {} up to date, {} failed",
        summary.total, summary.patched, summary.up_to_date, summary.failed
    )];
    if summary.missing > 0 {
        lines.push(format!("{} missing on one side", summary.missing));
    }
    if !submit && summary.not_submitted > 0 {
        lines.push(format!(
            "{} with drift recorded (rerun with --submit or use `booru-sync commit` to apply)",
            summary.not_submitted
        ));
    }
    let skipped = summary.skipped_patched + summary.skipped_cached;
    if skipped > 0 {
        lines.push(format!(
            "{} skipped ({} already patched, {} already cached)",
            skipped, summary.skipped_patched, summary.skipped_cached
        ));
    }
    if summary.tags_created > 0 {
        lines.push(format!("{} tags created", summary.tags_created));
    }
    if summary.field_failures > 0 {
        lines.push(format!(
            "{} fields left unpatched (retried on the next run)",
            summary.field_failures
        ));
    }
    if summary.cancelled > 0 {
        lines.push(format!(
            "{} stopped by shutdown (rerun to continue)",
            summary.cancelled
        ));
    }
    lines
}

/// Print the end-of-run summary.
pub(crate) fn display_summary(summary: &ReconcileSummary, submit: bool, is_tty: bool) {
    if !is_tty {
        tracing::info!(
            total = summary.total,
            patched = summary.patched,
            up_to_date = summary.up_to_date,
            missing = summary.missing,
            failed = summary.failed,
            not_submitted = summary.not_submitted,
            skipped_patched = summary.skipped_patched,
            skipped_cached = summary.skipped_cached,
            tags_created = summary.tags_created,
            field_failures = summary.field_failures,
            cancelled = summary.cancelled,
            "Summary"
        );
        return;
    }

    let mut lines = summary_lines(summary, submit).into_iter();
    println!();
    if let Some(head) = lines.next() {
        let marker = if summary.has_errors() {
            style("⚠").yellow().bold()
        } else {
            style("✓").green().bold()
        };
        println!("{} {}", marker, head);
    }
    for line in lines {
        println!("  {}", line);
    }
}

/// Display writer crashes and per-post errors so users know exactly what
/// was left behind.
pub(crate) fn display_errors(summary: &ReconcileSummary, is_tty: bool) {
    if let Some(ref panic) = summary.writer_panic {
        if is_tty {
            eprintln!("{} {}", style("Patch writer crashed:").red().bold(), panic);
            eprintln!("  Queued patches may not have been applied.");
        } else {
            tracing::error!(panic = %panic, "Patch writer crashed - queued patches may be lost");
        }
    }

    if summary.errors.is_empty() {
        return;
    }

    let total_errors = summary.errors.len();
    let display_count = std::cmp::min(MAX_DISPLAYED_ERRORS, total_errors);

    if is_tty {
        eprintln!(
            "{}",
            style(format!("Post errors ({} total):", total_errors))
                .yellow()
                .bold()
        );
        for (post_id, error) in summary.errors.iter().take(display_count) {
            eprintln!("  - #{}: {}", post_id, error);
        }
        if total_errors > display_count {
            eprintln!("  ... and {} more errors", total_errors - display_count);
        }
    } else {
        for (post_id, error) in summary.errors.iter().take(display_count) {
            tracing::error!(post_id, error = %error, "Post failed");
        }
        if total_errors > display_count {
            tracing::error!(
                additional_errors = total_errors - display_count,
                "Additional post errors occurred"
            );
        }
    }
}
