//! Durable `post_id -> Difference` cache.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::journal::{Journal, JournalError, Result};
use super::single_flight::SingleFlight;
use crate::diff::Difference;

#[derive(Debug, Serialize, Deserialize)]
struct DifferenceLine {
    id: i64,
    // Older files wrote a bare null for "remote missing"
    difference: Option<Difference>,
}

/// Cache of computed differences backed by an append-only journal.
///
/// On reload the last line for an id wins. Concurrent misses for the same id
/// share a single computation.
pub struct DiffCache {
    entries: RwLock<HashMap<i64, Difference>>,
    flights: SingleFlight<i64, Difference>,
    journal: Option<Journal<DifferenceLine>>,
}

impl std::fmt::Debug for DiffCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffCache")
            .field("entries", &self.len())
            .field("journal", &self.journal)
            .finish()
    }
}

impl DiffCache {
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            flights: SingleFlight::new(),
            journal: None,
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (journal, lines) = Journal::<DifferenceLine>::open(path)?;
        let entries = lines
            .into_iter()
            .map(|line| {
                let difference = line.difference.unwrap_or_else(|| Difference::missing(None));
                (line.id, difference)
            })
            .collect();

        Ok(Self {
            entries: RwLock::new(entries),
            flights: SingleFlight::new(),
            journal: Some(journal),
        })
    }

    pub fn get(&self, post_id: i64) -> Option<Difference> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&post_id)
            .cloned()
    }

    pub fn contains(&self, post_id: i64) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&post_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All cached differences, ordered by post id.
    pub fn entries(&self) -> Vec<(i64, Difference)> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, difference)| (*id, difference.clone()))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    /// Store a difference, appending it to the journal first.
    pub fn insert(&self, post_id: i64, difference: Difference) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.append(&DifferenceLine {
                id: post_id,
                difference: Some(difference.clone()),
            })?;
        }
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(post_id, difference);
        Ok(())
    }

    /// Return the cached difference for `post_id`, computing and persisting
    /// it on a miss.
    ///
    /// A failed computation caches nothing.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        post_id: i64,
        compute: F,
    ) -> std::result::Result<Difference, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Difference, E>>,
        E: From<JournalError>,
    {
        if let Some(hit) = self.get(post_id) {
            tracing::debug!(post_id, "Difference cache hit");
            return Ok(hit);
        }

        self.flights
            .run(post_id, || async move {
                // Another caller may have finished between the check and the flight
                if let Some(hit) = self.get(post_id) {
                    return Ok(hit);
                }
                let difference = compute().await?;
                self.insert(post_id, difference.clone())?;
                Ok(difference)
            })
            .await
    }
}
