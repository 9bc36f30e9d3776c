//! Export local posts as one JSON document per post.
//!
//! Files land at `<output>/posts/<id>.json`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::tag_category::TagCategory;
use crate::store::{IdRange, LocalStore, Post, StoreError};
use crate::sync::{ProgressCallback, SyncProgress, emit};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode post: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Serialized shape of an exported post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedPost {
    pub id: i64,
    pub created_year: Option<i32>,
    pub source_url: Option<String>,
    pub rating: Option<String>,
    pub score: Option<i64>,
    pub favorite_count: Option<i64>,
    pub general: Vec<String>,
    pub artist: Vec<String>,
    pub character: Vec<String>,
    pub copyright: Vec<String>,
    pub meta: Vec<String>,
}

impl From<&Post> for ExportedPost {
    fn from(post: &Post) -> Self {
        let names = |category: TagCategory| -> Vec<String> {
            post.tags_in(category)
                .map(|t| t.name.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };
        Self {
            id: post.id,
            created_year: post.created_year,
            source_url: post.source_url.clone(),
            rating: post.rating.map(|r| r.as_str().to_string()),
            score: post.score,
            favorite_count: post.favorite_count,
            general: names(TagCategory::General),
            artist: names(TagCategory::Artist),
            character: names(TagCategory::Character),
            copyright: names(TagCategory::Copyright),
            meta: names(TagCategory::Meta),
        }
    }
}

/// Path of the export file for `post_id`.
pub fn export_path(output: &Path, post_id: i64) -> PathBuf {
    output.join("posts").join(format!("{post_id}.json"))
}

/// Write one post. Returns the file written.
pub async fn export_post(output: &Path, post: &Post) -> Result<PathBuf> {
    let path = export_path(output, post.id);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ExportError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let body = serde_json::to_vec_pretty(&ExportedPost::from(post))?;
    tokio::fs::write(&path, body)
        .await
        .map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

/// Export every local post in `range`. Returns the number of files written.
pub async fn export_range(
    store: &dyn LocalStore,
    range: IdRange,
    output: &Path,
    on_progress: Option<&ProgressCallback>,
) -> Result<usize> {
    let ids = store.list_post_ids(range).await?;
    tracing::info!(count = ids.len(), output = %output.display(), "Exporting posts");

    let mut written = 0;
    for post_id in ids {
        // Deleted between listing and loading
        let Some(post) = store.get_post(post_id).await? else {
            continue;
        };
        export_post(output, &post).await?;
        written += 1;
        emit(on_progress, SyncProgress::Exported { post_id });
    }
    Ok(written)
}
