//! Durable record of which posts have been patched.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::journal::{Journal, Result};

#[derive(Debug, Serialize, Deserialize)]
struct PatchStateLine {
    id: i64,
    state: bool,
}

/// Tracks post ids that were patched successfully.
///
/// A post counts as patched only when its latest record says `true`.
#[derive(Debug, Default)]
pub struct PatchStateTracker {
    states: RwLock<HashMap<i64, bool>>,
    journal: Option<Journal<PatchStateLine>>,
}

impl PatchStateTracker {
    /// A tracker that forgets everything when dropped.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the journal at `path`, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (journal, lines) = Journal::<PatchStateLine>::open(path)?;
        let states = lines.into_iter().map(|l| (l.id, l.state)).collect();
        Ok(Self {
            states: RwLock::new(states),
            journal: Some(journal),
        })
    }

    pub fn is_patched(&self, post_id: i64) -> bool {
        self.states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&post_id)
            .copied()
            .unwrap_or(false)
    }

    /// Record `post_id` as patched. The journal line is written before the
    /// in-memory state changes.
    pub fn mark_patched(&self, post_id: i64) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.append(&PatchStateLine {
                id: post_id,
                state: true,
            })?;
        }
        self.states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(post_id, true);
        Ok(())
    }

    pub fn patched_count(&self) -> usize {
        self.states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|state| **state)
            .count()
    }
}
