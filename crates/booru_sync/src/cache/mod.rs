//! Durable caches backed by append-only JSONL journals.
//!
//! - [`DiffCache`] - computed differences per post
//! - [`PatchStateTracker`] - posts already patched
//! - [`TagCreationLog`] - tags created locally while patching

mod difference;
mod journal;
mod patch_state;
mod single_flight;
mod tag_creation;

pub use difference::DiffCache;
pub use journal::{Journal, JournalError};
pub use patch_state::PatchStateTracker;
pub use single_flight::SingleFlight;
pub use tag_creation::TagCreationLog;
