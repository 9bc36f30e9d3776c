use booru_sync::sync::{DiffOutcome, SkipReason, SyncProgress};

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::Starting {
                total,
                workers,
                submit,
            } => {
                tracing::info!(total, workers, submit, "Starting run");
            }

            SyncProgress::Skipped { post_id, reason } => {
                let reason = match reason {
                    SkipReason::AlreadyPatched => "already patched",
                    SkipReason::AlreadyCached => "already cached",
                };
                tracing::debug!(post_id, reason, "Skipped post");
            }

            SyncProgress::Diffed { post_id, outcome } => match outcome {
                DiffOutcome::UpToDate => tracing::debug!(post_id, "Diffed: up to date"),
                DiffOutcome::Missing => tracing::debug!(post_id, "Diffed: missing"),
                DiffOutcome::Drift { fields } => tracing::debug!(post_id, fields, "Diffed: drift"),
            },

            SyncProgress::FetchFailed { post_id, error } => {
                tracing::warn!(post_id, error = %error, "Fetch failed");
            }

            SyncProgress::RetryBackoff {
                post_id,
                retry_after_ms,
                attempt,
                error,
            } => {
                tracing::debug!(post_id, retry_after_ms, attempt, error = %error, "Retrying post");
            }

            SyncProgress::RateLimited { backoff_ms } => {
                tracing::warn!(backoff_ms, "Rate limited, pausing all workers");
            }

            SyncProgress::PatchQueued { post_id } => {
                tracing::debug!(post_id, "Patch queued");
            }

            SyncProgress::Patched { post_id, fields } => {
                tracing::debug!(post_id, fields, "Patched");
            }

            SyncProgress::FieldSkipped {
                post_id,
                field,
                error,
            } => {
                tracing::warn!(post_id, field = %field, error = %error, "Field left unpatched");
            }

            SyncProgress::PatchFailed { post_id, error } => {
                tracing::warn!(post_id, error = %error, "Patch failed");
            }

            SyncProgress::TagCreated { id, name, category } => {
                tracing::info!(tag_id = id, name = %name, category = %category, "Created tag");
            }

            SyncProgress::TagsRestored { count } => {
                tracing::info!(count, "Restored tags from creation log");
            }

            SyncProgress::Exported { post_id } => {
                tracing::debug!(post_id, "Exported post");
            }

            SyncProgress::Warning { message } => {
                tracing::warn!("{}", message);
            }

            SyncProgress::Complete {
                patched,
                up_to_date,
                failed,
            } => {
                tracing::info!(patched, up_to_date, failed, "Run complete");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
