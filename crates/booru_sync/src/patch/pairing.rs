//! Rename pairing for tag-set patches.
//!
//! When the board renames a tag it usually retires the old id and allocates
//! the new one next to it. A removal whose id is one away from an addition
//! is therefore applied as a single rename instead of two unrelated set
//! operations. This is a heuristic over upstream id allocation, not a rename
//! oracle.

use std::collections::BTreeSet;

/// One tag-set operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOp {
    /// Replace `from` with `to`.
    Rename { from: i64, to: i64 },
    Add(i64),
    Remove(i64),
}

/// Pair removals with adjacent additions.
///
/// Removals are visited in ascending order; each checks `id - 1` before
/// `id + 1`, and an addition can only be paired once. Unpaired removals come
/// out as [`TagOp::Remove`], leftover additions as [`TagOp::Add`].
pub fn pair_renames(removed: &BTreeSet<i64>, added: &BTreeSet<i64>) -> Vec<TagOp> {
    let mut unpaired = added.clone();
    let mut ops = Vec::with_capacity(removed.len() + added.len());

    for &old in removed {
        let partner = [old.checked_sub(1), old.checked_add(1)]
            .into_iter()
            .flatten()
            .find(|candidate| unpaired.contains(candidate));
        match partner {
            Some(new) => {
                unpaired.remove(&new);
                ops.push(TagOp::Rename { from: old, to: new });
            }
            None => ops.push(TagOp::Remove(old)),
        }
    }

    ops.extend(unpaired.into_iter().map(TagOp::Add));
    ops
}
