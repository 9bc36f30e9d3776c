use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use super::difference::Difference;
use super::noise::NoiseFilter;
use crate::cache::JournalError;
use crate::field::{FieldMap, FieldValue, PostField, PostSnapshot};
use crate::remote::{RemoteError, RemoteSource};
use crate::store::{LocalStore, StoreError};

/// Errors raised while computing a difference.
#[derive(Debug, Error)]
pub enum DiffError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to cache difference: {0}")]
    Journal(#[from] JournalError),

    /// Shutdown was requested before the remote was asked again.
    #[error("Interrupted by shutdown")]
    Interrupted,
}

impl DiffError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DiffError::Remote(e) => e.is_retryable(),
            DiffError::Store(_) | DiffError::Journal(_) | DiffError::Interrupted => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DiffError::Remote(e) if e.is_rate_limited())
    }
}

/// Compares one remote record with its local post.
pub struct DiffEngine {
    remote: Arc<dyn RemoteSource>,
    store: Arc<dyn LocalStore>,
    noise: NoiseFilter,
}

impl std::fmt::Debug for DiffEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffEngine")
            .field("noise", &self.noise)
            .finish_non_exhaustive()
    }
}

impl DiffEngine {
    pub fn new(remote: Arc<dyn RemoteSource>, store: Arc<dyn LocalStore>) -> Self {
        Self {
            remote,
            store,
            noise: NoiseFilter::default(),
        }
    }

    #[must_use]
    pub fn with_noise_filter(mut self, noise: NoiseFilter) -> Self {
        self.noise = noise;
        self
    }

    /// Fetch both sides of `post_id` and diff them.
    ///
    /// When either side is missing the result has `forward = None` and
    /// `backward` holds the snapshot of the side that exists.
    pub async fn compare(&self, post_id: i64) -> Result<Difference, DiffError> {
        let remote = self.remote.fetch_post(post_id).await?;
        let local = self.store.get_post(post_id).await?;

        let difference = match (remote, local) {
            (None, local) => {
                Difference::missing(local.map(|post| post.snapshot().to_field_map()))
            }
            (Some(remote), None) => {
                Difference::missing(Some(remote.to_snapshot()?.to_field_map()))
            }
            (Some(remote), Some(local)) => {
                diff_snapshots(&remote.to_snapshot()?, &local.snapshot(), &self.noise)
            }
        };
        Ok(difference)
    }
}

/// Field-by-field comparison of two snapshots of the same post.
///
/// Scalars that differ land in `forward` with the remote value. A remote
/// scalar that is absent (or an empty `source_url`) is never drift. Tag-set
/// fields are recorded on both sides whenever either filtered set is
/// non-empty.
pub fn diff_snapshots(
    remote: &PostSnapshot,
    local: &PostSnapshot,
    noise: &NoiseFilter,
) -> Difference {
    let mut forward = FieldMap::new();
    let mut backward = FieldMap::new();

    for field in PostField::SCALARS {
        let Some(remote_value) = remote.scalar(field) else {
            continue;
        };
        if field == PostField::SourceUrl
            && matches!(&remote_value, FieldValue::Text(url) if url.is_empty())
        {
            continue;
        }
        if local.scalar(field).as_ref() != Some(&remote_value) {
            forward.insert(field, remote_value);
        }
    }

    for field in PostField::TAG_SETS {
        let Some(category) = field.tag_category() else {
            continue;
        };
        let remote_tags = remote.tag_names(category);
        let local_tags = local.tag_names(category);

        let keep = |name: &&String| !noise.is_noise(name);
        let added: BTreeSet<String> = remote_tags
            .difference(&local_tags)
            .filter(keep)
            .cloned()
            .collect();
        let removed: BTreeSet<String> = local_tags
            .difference(&remote_tags)
            .filter(keep)
            .cloned()
            .collect();

        if !added.is_empty() || !removed.is_empty() {
            forward.insert(field, FieldValue::Tags(added));
            backward.insert(field, FieldValue::Tags(removed));
        }
    }

    Difference {
        forward: Some(forward),
        backward: Some(backward),
    }
}
