//! The `export` command.

use std::path::PathBuf;
use std::sync::Arc;

use booru_sync::IdRange;
use booru_sync::export::export_range;
use console::{Term, style};

use crate::commands::shared::open_store;
use crate::progress::ProgressReporter;

/// Handle the export command.
pub(crate) async fn handle_export(
    range: IdRange,
    output: PathBuf,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let is_tty = Term::stdout().is_term();
    let store = open_store(database_url).await?;

    let reporter = Arc::new(ProgressReporter::new());
    let callback = reporter.as_callback();
    let written = export_range(store.as_ref(), range, &output, Some(callback.as_ref())).await?;
    reporter.finish();

    if is_tty {
        println!(
            "{} Exported {} posts to {}",
            style("✓").green().bold(),
            written,
            style(output.join("posts").display()).cyan()
        );
    } else {
        tracing::info!(written, output = %output.display(), "Export complete");
    }
    Ok(())
}
