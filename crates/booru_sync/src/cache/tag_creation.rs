//! Journal of tags created while patching.
//!
//! Patching a fresh database copy from cached differences must produce the
//! same tag ids, so every tag the applier creates is logged here and can be
//! restored into another store before the cached patches are replayed.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::journal::{Journal, Result};
use crate::entity::tag::UNKNOWN_POPULARITY;
use crate::entity::tag_category::TagCategory;
use crate::store::{self, Tag, TagStore};

#[derive(Debug, Serialize, Deserialize)]
struct TagCreationLine {
    id: i64,
    tag_name: String,
    /// Category name of the field the tag was created for.
    tag_context: String,
}

#[derive(Debug, Default)]
pub struct TagCreationLog {
    tags: Mutex<BTreeMap<i64, Tag>>,
    journal: Option<Journal<TagCreationLine>>,
}

impl TagCreationLog {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (journal, lines) = Journal::<TagCreationLine>::open(path)?;
        let tags = lines
            .into_iter()
            .map(|line| {
                let category = TagCategory::from_name(&line.tag_context).unwrap_or_else(|| {
                    tracing::warn!(
                        tag = %line.tag_name,
                        context = %line.tag_context,
                        "Unknown tag category in creation log, using general"
                    );
                    TagCategory::General
                });
                let tag = Tag {
                    id: line.id,
                    name: line.tag_name,
                    category,
                    popularity: UNKNOWN_POPULARITY,
                };
                (tag.id, tag)
            })
            .collect();

        Ok(Self {
            tags: Mutex::new(tags),
            journal: Some(journal),
        })
    }

    pub fn record(&self, tag: &Tag) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.append(&TagCreationLine {
                id: tag.id,
                tag_name: tag.name.clone(),
                tag_context: tag.category.as_str().to_string(),
            })?;
        }
        self.tags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tag.id, tag.clone());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tags.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recreate logged tags that `store` does not have, keeping their ids.
    /// Returns how many were created.
    pub async fn restore_into<S: TagStore + ?Sized>(&self, store: &S) -> store::Result<usize> {
        let tags: Vec<Tag> = self
            .tags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut restored = 0;
        for tag in &tags {
            if store.restore_tag(tag).await? {
                tracing::debug!(id = tag.id, name = %tag.name, "Restored logged tag");
                restored += 1;
            }
        }
        if restored > 0 {
            tracing::info!(restored, logged = tags.len(), "Restored tags from creation log");
        }
        Ok(restored)
    }
}
