//! URL-keyed cache of batch responses.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::errors::{RemoteError, Result};
use super::types::RemotePost;
use crate::cache::{Journal, JournalError, SingleFlight};

#[derive(Debug, Serialize, Deserialize)]
struct ResponseLine {
    url: String,
    response: serde_json::Value,
}

pub type CachedBatch = Arc<[RemotePost]>;

/// Batch responses keyed by the exact request URL, optionally journaled so
/// a later run starts warm.
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CachedBatch>>,
    flights: SingleFlight<String, CachedBatch>,
    journal: Option<Journal<ResponseLine>>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.len())
            .field("journal", &self.journal)
            .finish()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ResponseCache {
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            flights: SingleFlight::new(),
            journal: None,
        }
    }

    /// Load the journal at `path`. Lines whose response is not a post array
    /// are skipped.
    pub fn open(path: impl AsRef<Path>) -> std::result::Result<Self, JournalError> {
        let (journal, lines) = Journal::<ResponseLine>::open(path)?;
        let mut entries = HashMap::with_capacity(lines.len());
        for line in lines {
            match serde_json::from_value::<Vec<RemotePost>>(line.response) {
                Ok(posts) => {
                    entries.insert(line.url, CachedBatch::from(posts));
                }
                Err(e) => {
                    tracing::warn!(url = %line.url, error = %e, "Skipping cached response that is not a post array");
                }
            }
        }

        Ok(Self {
            entries: RwLock::new(entries),
            flights: SingleFlight::new(),
            journal: Some(journal),
        })
    }

    pub fn get(&self, url: &str) -> Option<CachedBatch> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached batch for `url`, or run `fetch` once for all
    /// concurrent callers and cache what it returns.
    ///
    /// `fetch` yields the raw JSON body; it is cached only if it decodes as
    /// a post array. A failed journal append is logged and the response is
    /// still cached in memory.
    pub async fn get_or_fetch<F, Fut>(&self, url: &str, fetch: F) -> Result<CachedBatch>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value>>,
    {
        if let Some(hit) = self.get(url) {
            tracing::debug!(url, "Response cache hit");
            return Ok(hit);
        }

        self.flights
            .run(url.to_string(), || async move {
                if let Some(hit) = self.get(url) {
                    return Ok(hit);
                }

                let body = fetch().await?;
                let posts: Vec<RemotePost> = serde_json::from_value(body.clone())
                    .map_err(|e| RemoteError::decode(url, e.to_string()))?;
                let batch = CachedBatch::from(posts);

                if let Some(journal) = &self.journal {
                    let line = ResponseLine {
                        url: url.to_string(),
                        response: body,
                    };
                    if let Err(e) = journal.append_blocking(&line).await {
                        tracing::warn!(url, error = %e, "Failed to journal response");
                    }
                }

                self.entries
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(url.to_string(), Arc::clone(&batch));
                Ok(batch)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const URL: &str = "https://board.example/posts.json?tags=id%3A100..199&limit=100";

    #[tokio::test]
    async fn test_fetch_runs_once_per_url() {
        let cache = ResponseCache::in_memory();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let batch = cache
                .get_or_fetch(URL, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::json!([{"id": 150}]))
                })
                .await
                .unwrap();
            assert_eq!(batch[0].id, 150);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_array_body_is_decode_error_and_not_cached() {
        let cache = ResponseCache::in_memory();
        let result = cache
            .get_or_fetch(URL, || async { Ok(serde_json::json!({"success": false})) })
            .await;
        assert!(matches!(result, Err(RemoteError::Decode { .. })));
        assert!(cache.get(URL).is_none());
    }

    #[tokio::test]
    async fn test_journal_warms_next_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("requests.jsonl");

        {
            let cache = ResponseCache::open(&path).unwrap();
            cache
                .get_or_fetch(URL, || async { Ok(serde_json::json!([{"id": 101}, {"id": 102}])) })
                .await
                .unwrap();
        }

        let cache = ResponseCache::open(&path).unwrap();
        let batch = cache
            .get_or_fetch(URL, || async {
                Err(RemoteError::request(URL, None, "should be served from journal"))
            })
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);

        let line = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed["url"], URL);
        assert_eq!(parsed["response"][1]["id"], 102);
    }
}
