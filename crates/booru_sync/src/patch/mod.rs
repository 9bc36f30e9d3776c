//! Applying differences to the local mirror.
//!
//! [`PatchApplier`] stages every changed field onto the local post, resolves
//! tag names to ids (creating tags the mirror has never seen) and persists
//! the post once. Tag-set changes go through [`pair_renames`] first.

mod applier;
mod pairing;

pub use applier::{FieldFailure, PatchApplier, PatchError, PatchReport};
pub use pairing::{TagOp, pair_renames};
