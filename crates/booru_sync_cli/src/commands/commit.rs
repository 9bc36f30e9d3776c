//! The `commit` command: apply a recorded difference cache without refetching.

use std::sync::Arc;

use booru_sync::sync::commit_cached;
use booru_sync::{LocalStore, PatchApplier};
use console::Term;

use crate::CacheOptions;
use crate::commands::shared::{
    JournalPaths, Journals, display_errors, display_summary, open_store, restore_created_tags,
};
use crate::config::Config;
use crate::progress::ProgressReporter;
use crate::shutdown::shutdown_flag;

/// Handle the commit command.
pub(crate) async fn handle_commit(
    cache: CacheOptions,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let is_tty = Term::stdout().is_term();
    let store = open_store(database_url).await?;
    let journals = Journals::open(&JournalPaths::resolve(config, &cache))?;

    if journals.differences.is_empty() {
        if is_tty {
            println!("The difference cache is empty; run `booru-sync reconcile` first.");
        } else {
            tracing::info!("Difference cache is empty, nothing to commit");
        }
        return Ok(());
    }

    let reporter = Arc::new(ProgressReporter::new());
    let callback = reporter.as_callback();
    restore_created_tags(&journals.tags, &store, &callback).await?;

    let local: Arc<dyn LocalStore> = store;
    let applier = Arc::new(PatchApplier::new(
        local,
        Arc::clone(&journals.patched),
        Arc::clone(&journals.tags),
    ));

    let summary = commit_cached(
        &journals.differences,
        &journals.patched,
        applier,
        Some(&shutdown_flag()),
        Some(callback),
    )
    .await;
    reporter.finish();

    display_summary(&summary, true, is_tty);
    display_errors(&summary, is_tty);

    if let Some(panic) = summary.writer_panic {
        return Err(format!("Patch writer crashed: {panic}").into());
    }
    Ok(())
}
