use std::sync::Mutex;
use std::time::Duration;

use booru_sync::sync::{DiffOutcome, SyncProgress};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Running tallies shown in the bar messages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    /// Posts that reached a terminal state in the scheduler.
    pub done: usize,
    pub skipped: usize,
    pub up_to_date: usize,
    pub drift: usize,
    pub missing: usize,
    pub failed: usize,
    pub queued: usize,
    pub patched: usize,
    pub patch_failed: usize,
    pub tags_created: usize,
    pub exported: usize,
}

/// Consolidated progress state to avoid multiple mutex locks.
#[derive(Default)]
struct ProgressState {
    /// One tick per scheduled post.
    posts_bar: Option<ProgressBar>,
    /// Writer progress; exists once a patch has been queued.
    patch_bar: Option<ProgressBar>,
    /// Export file counter.
    export_bar: Option<ProgressBar>,
    counts: Counts,
}

/// Interactive progress reporter using indicatif.
pub struct InteractiveReporter {
    multi: MultiProgress,
    state: Mutex<ProgressState>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            state: Mutex::new(ProgressState::default()),
        }
    }

    /// A reporter that draws nothing.
    #[cfg(test)]
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
            state: Mutex::new(ProgressState::default()),
        }
    }

    #[cfg(test)]
    pub fn counts(&self) -> Counts {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).counts
    }

    fn posts_bar(&self, state: &mut ProgressState) -> ProgressBar {
        state
            .posts_bar
            .get_or_insert_with(|| {
                let pb = self.multi.add(ProgressBar::new_spinner());
                pb.set_style(Self::counter_style());
                pb.set_prefix(format!("{:10}", "Posts"));
                pb
            })
            .clone()
    }

    fn patch_bar(&self, state: &mut ProgressState) -> ProgressBar {
        state
            .patch_bar
            .get_or_insert_with(|| {
                let pb = self.multi.add(ProgressBar::new(0));
                pb.set_style(Self::bar_style());
                pb.set_prefix(format!("{:10}", "Patching"));
                pb
            })
            .clone()
    }

    fn export_bar(&self, state: &mut ProgressState) -> ProgressBar {
        state
            .export_bar
            .get_or_insert_with(|| {
                let pb = self.multi.add(ProgressBar::new_spinner());
                pb.set_style(Self::counter_style());
                pb.set_prefix(format!("{:10}", "Exporting"));
                pb.enable_steady_tick(Duration::from_millis(100));
                pb
            })
            .clone()
    }

    fn posts_message(counts: &Counts) -> String {
        let mut msg = format!(
            "✓ {} up to date · Δ {} drift · ? {} missing",
            counts.up_to_date, counts.drift, counts.missing
        );
        if counts.skipped > 0 {
            msg.push_str(&format!(" · {} skipped", counts.skipped));
        }
        if counts.failed > 0 {
            msg.push_str(&format!(" · ✗ {} failed", counts.failed));
        }
        msg
    }

    fn patch_message(counts: &Counts) -> String {
        let mut msg = format!("{} patched", counts.patched);
        if counts.tags_created > 0 {
            msg.push_str(&format!(", {} tags created", counts.tags_created));
        }
        if counts.patch_failed > 0 {
            msg.push_str(&format!(", {} failed", counts.patch_failed));
        }
        msg
    }

    pub fn handle(&self, event: SyncProgress) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        match event {
            SyncProgress::Starting {
                total,
                workers,
                submit,
            } => {
                let pb = self.posts_bar(&mut state);
                pb.set_length(total as u64);
                pb.set_style(Self::bar_style());
                let mode = if submit { "submit" } else { "dry run" };
                pb.set_message(format!("{} workers, {}", workers, mode));
            }

            SyncProgress::Skipped { .. } => {
                state.counts.skipped += 1;
                state.counts.done += 1;
                let pb = self.posts_bar(&mut state);
                pb.inc(1);
                pb.set_message(Self::posts_message(&state.counts));
            }

            SyncProgress::Diffed { outcome, .. } => {
                match outcome {
                    DiffOutcome::UpToDate => state.counts.up_to_date += 1,
                    DiffOutcome::Missing => state.counts.missing += 1,
                    DiffOutcome::Drift { .. } => state.counts.drift += 1,
                }
                state.counts.done += 1;
                let pb = self.posts_bar(&mut state);
                pb.inc(1);
                pb.set_message(Self::posts_message(&state.counts));
            }

            SyncProgress::FetchFailed { .. } => {
                state.counts.failed += 1;
                state.counts.done += 1;
                let pb = self.posts_bar(&mut state);
                pb.inc(1);
                pb.set_message(Self::posts_message(&state.counts));
            }

            SyncProgress::RetryBackoff {
                post_id,
                retry_after_ms,
                attempt,
                error,
            } => {
                let pb = self.posts_bar(&mut state);
                pb.set_message(format!(
                    "⏳ #{} retry {} in {}ms: {}",
                    post_id, attempt, retry_after_ms, error
                ));
            }

            SyncProgress::RateLimited { backoff_ms } => {
                let pb = self.posts_bar(&mut state);
                pb.set_message(format!("⏳ Rate limited, pausing {}s", backoff_ms / 1000));
            }

            SyncProgress::PatchQueued { .. } => {
                state.counts.queued += 1;
                let queued = state.counts.queued as u64;
                let pb = self.patch_bar(&mut state);
                pb.set_length(queued);
            }

            SyncProgress::Patched { post_id, fields } => {
                state.counts.patched += 1;
                let pb = self.patch_bar(&mut state);
                pb.inc(1);
                pb.set_message(format!(
                    "{} (#{}: {} fields)",
                    Self::patch_message(&state.counts),
                    post_id,
                    fields
                ));
            }

            SyncProgress::PatchFailed { post_id, error } => {
                state.counts.patch_failed += 1;
                let pb = self.patch_bar(&mut state);
                pb.inc(1);
                pb.set_message(format!("✗ #{}: {}", post_id, error));
            }

            SyncProgress::FieldSkipped {
                post_id,
                field,
                error,
            } => {
                let _ = self
                    .multi
                    .println(format!("⚠ #{} {}: {}", post_id, field, error));
            }

            SyncProgress::TagCreated { .. } => {
                state.counts.tags_created += 1;
            }

            SyncProgress::TagsRestored { count } => {
                if count > 0 {
                    let _ = self
                        .multi
                        .println(format!("Restored {} tags from the creation log", count));
                }
            }

            SyncProgress::Exported { post_id } => {
                state.counts.exported += 1;
                let exported = state.counts.exported;
                let pb = self.export_bar(&mut state);
                pb.inc(1);
                pb.set_message(format!("{} written (#{})", exported, post_id));
            }

            SyncProgress::Warning { message } => {
                let _ = self.multi.println(format!("⚠ {}", message));
            }

            SyncProgress::Complete {
                patched,
                up_to_date,
                failed,
            } => {
                if let Some(ref pb) = state.posts_bar {
                    pb.finish_with_message(format!(
                        "✓ {} up to date, {} patched, {} failed",
                        up_to_date, patched, failed
                    ));
                }
                if let Some(ref pb) = state.patch_bar {
                    pb.finish_with_message(Self::patch_message(&state.counts));
                }
            }

            _ => {}
        }
    }

    /// Finish all progress bars.
    pub fn finish(&self) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for pb in [&state.posts_bar, &state.patch_bar, &state.export_bar]
            .into_iter()
            .flatten()
        {
            if !pb.is_finished() {
                pb.finish();
            }
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.bold} [{bar:30.cyan/dim}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
    }

    fn counter_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold} {spinner:.green} {pos} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}
