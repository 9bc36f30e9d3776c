use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;

use super::pairing::{TagOp, pair_renames};
use crate::cache::{JournalError, PatchStateTracker, TagCreationLog};
use crate::diff::Difference;
use crate::entity::tag_category::TagCategory;
use crate::field::{FieldMap, FieldValue, PostField};
use crate::store::{LocalStore, Post, StoreError, Tag, TagRef};

/// Errors that abort a whole patch.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Post {post_id} does not exist locally")]
    LocalMissing { post_id: i64 },

    #[error("Post {post_id} has no forward changes to apply")]
    NotPatchable { post_id: i64 },

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to record patch state: {0}")]
    Journal(#[from] JournalError),
}

impl PatchError {
    /// Skips are expected outcomes, not failures.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::LocalMissing { .. } | Self::NotPatchable { .. })
    }
}

/// A field left unchanged while the rest of the post was patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    pub field: PostField,
    pub reason: String,
}

/// What one [`PatchApplier::apply`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub post_id: i64,
    pub updated: Vec<PostField>,
    pub skipped: Vec<FieldFailure>,
    pub tag_ops: Vec<(TagCategory, TagOp)>,
    pub created_tags: Vec<Tag>,
}

impl PatchReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Applies differences to the local store.
///
/// Only the patch writer calls this, so it is the single mutator of posts
/// and the only place tags get created.
pub struct PatchApplier {
    store: Arc<dyn LocalStore>,
    tracker: Arc<PatchStateTracker>,
    tag_log: Arc<TagCreationLog>,
}

impl std::fmt::Debug for PatchApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchApplier")
            .field("tracker", &self.tracker)
            .field("tag_log", &self.tag_log)
            .finish_non_exhaustive()
    }
}

impl PatchApplier {
    pub fn new(
        store: Arc<dyn LocalStore>,
        tracker: Arc<PatchStateTracker>,
        tag_log: Arc<TagCreationLog>,
    ) -> Self {
        Self {
            store,
            tracker,
            tag_log,
        }
    }

    pub fn tracker(&self) -> &PatchStateTracker {
        &self.tracker
    }

    /// Apply a cached difference.
    pub async fn apply_difference(
        &self,
        post_id: i64,
        difference: &Difference,
    ) -> Result<PatchReport, PatchError> {
        let Some(forward) = &difference.forward else {
            return Err(PatchError::NotPatchable { post_id });
        };
        let empty = FieldMap::new();
        let backward = difference.backward.as_ref().unwrap_or(&empty);
        self.apply(post_id, backward, forward).await
    }

    /// Stage every field of the difference onto the post and save it once.
    ///
    /// A field that cannot be applied (bad value, tag lookup or creation
    /// failure) is reported in [`PatchReport::skipped`] and the remaining
    /// fields are still applied. The post is marked patched only when no
    /// field was skipped, so a later run retries the rest.
    pub async fn apply(
        &self,
        post_id: i64,
        backward: &FieldMap,
        forward: &FieldMap,
    ) -> Result<PatchReport, PatchError> {
        let mut post = self
            .store
            .get_post(post_id)
            .await?
            .ok_or(PatchError::LocalMissing { post_id })?;

        let mut report = PatchReport {
            post_id,
            ..PatchReport::default()
        };

        // Tag fields with removals only still need visiting
        let fields: BTreeSet<PostField> = forward
            .keys()
            .chain(backward.keys().filter(|f| f.is_tag_set()))
            .copied()
            .collect();

        for field in fields {
            let outcome = match field.tag_category() {
                None => match forward.get(&field) {
                    Some(value) => post.set_scalar(field, value).map_err(|e| e.to_string()),
                    None => continue,
                },
                Some(category) => {
                    self.stage_tags(&mut post, category, field, backward, forward, &mut report)
                        .await
                }
            };

            match outcome {
                Ok(()) => report.updated.push(field),
                Err(reason) => {
                    tracing::warn!(post_id, field = %field, reason = %reason, "Skipping field");
                    report.skipped.push(FieldFailure { field, reason });
                }
            }
        }

        self.store.save_post(&post).await?;

        if report.is_complete() {
            self.tracker.mark_patched(post_id)?;
        }

        tracing::info!(
            post_id,
            updated = report.updated.len(),
            skipped = report.skipped.len(),
            created_tags = report.created_tags.len(),
            "Patched post"
        );
        Ok(report)
    }

    async fn stage_tags(
        &self,
        post: &mut Post,
        category: TagCategory,
        field: PostField,
        backward: &FieldMap,
        forward: &FieldMap,
        report: &mut PatchReport,
    ) -> Result<(), String> {
        let additions = tag_names(forward.get(&field))?;
        let removals = tag_names(backward.get(&field))?;

        let mut removed_ids = BTreeSet::new();
        for name in &removals {
            match post.tags_in(category).find(|t| &t.name == name) {
                Some(tag) => {
                    removed_ids.insert(tag.id);
                }
                None => tracing::debug!(post_id = post.id, tag = %name, "Tag to remove is not on post"),
            }
        }

        let mut added: BTreeMap<i64, TagRef> = BTreeMap::new();
        for name in &additions {
            if post.tags_in(category).any(|t| &t.name == name) {
                continue;
            }
            let tag = self.resolve_or_create(name, category, report).await?;
            added.insert(tag.id, tag);
        }

        let added_ids: BTreeSet<i64> = added.keys().copied().collect();
        for op in pair_renames(&removed_ids, &added_ids) {
            match op {
                TagOp::Rename { from, to } => {
                    post.detach(category, from);
                    if let Some(tag) = added.get(&to) {
                        post.attach(category, tag.clone());
                    }
                }
                TagOp::Add(id) => {
                    if let Some(tag) = added.get(&id) {
                        post.attach(category, tag.clone());
                    }
                }
                TagOp::Remove(id) => {
                    post.detach(category, id);
                }
            }
            report.tag_ops.push((category, op));
        }
        Ok(())
    }

    /// Look the tag up by name, creating it with unknown popularity if absent.
    async fn resolve_or_create(
        &self,
        name: &str,
        category: TagCategory,
        report: &mut PatchReport,
    ) -> Result<TagRef, String> {
        let lookup = self
            .store
            .find_tag_by_name(name)
            .await
            .map_err(|e| format!("lookup of tag {name:?} failed: {e}"))?;
        if let Some(tag) = lookup {
            return Ok(TagRef::from(&tag));
        }

        let tag = self
            .store
            .create_tag(name, category)
            .await
            .map_err(|e| format!("creating tag {name:?} failed: {e}"))?;
        tracing::info!(id = tag.id, name = %tag.name, category = %category, "Created tag");

        if let Err(e) = self.tag_log.record(&tag) {
            tracing::warn!(id = tag.id, error = %e, "Failed to log created tag");
        }
        let tag_ref = TagRef::from(&tag);
        report.created_tags.push(tag);
        Ok(tag_ref)
    }
}

fn tag_names(value: Option<&FieldValue>) -> Result<BTreeSet<String>, String> {
    match value {
        None => Ok(BTreeSet::new()),
        Some(FieldValue::Tags(names)) => Ok(names.clone()),
        Some(other) => Err(format!("expected a tag list, found {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::rating::Rating;
    use crate::entity::tag::UNKNOWN_POPULARITY;
    use crate::store::{MemoryStore, PostStore, TagStore};
    use async_trait::async_trait;

    fn names(items: &[&str]) -> FieldValue {
        FieldValue::Tags(items.iter().map(|s| s.to_string()).collect())
    }

    fn tag(id: i64, name: &str, category: TagCategory) -> Tag {
        Tag {
            id,
            name: name.to_string(),
            category,
            popularity: 50,
        }
    }

    fn applier(store: Arc<dyn LocalStore>) -> (PatchApplier, Arc<PatchStateTracker>, Arc<TagCreationLog>) {
        let tracker = Arc::new(PatchStateTracker::in_memory());
        let log = Arc::new(TagCreationLog::in_memory());
        (
            PatchApplier::new(store, Arc::clone(&tracker), Arc::clone(&log)),
            tracker,
            log,
        )
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_tag(tag(1, "cat", TagCategory::General));
        store.insert_tag(tag(105, "old_name", TagCategory::Artist));
        store.insert_tag(tag(106, "new_name", TagCategory::Artist));

        let mut post = Post::new(42);
        post.rating = Some(Rating::Sensitive);
        post.attach(TagCategory::General, TagRef::from(&tag(1, "cat", TagCategory::General)));
        post.attach(
            TagCategory::Artist,
            TagRef::from(&tag(105, "old_name", TagCategory::Artist)),
        );
        store.insert_post(post);
        store
    }

    #[tokio::test]
    async fn test_adds_tag_by_creating_it() {
        let store = seeded_store();
        let (applier, tracker, log) = applier(store.clone());

        let mut forward = FieldMap::new();
        forward.insert(PostField::General, names(&["hat"]));
        let mut backward = FieldMap::new();
        backward.insert(PostField::General, names(&[]));

        let report = applier.apply(42, &backward, &forward).await.unwrap();

        let post = store.get_post(42).await.unwrap().unwrap();
        let general: BTreeSet<_> = post.tags_in(TagCategory::General).map(|t| t.name.as_str()).collect();
        assert_eq!(general, ["cat", "hat"].into());

        assert_eq!(report.created_tags.len(), 1);
        assert_eq!(report.created_tags[0].popularity, UNKNOWN_POPULARITY);
        assert_eq!(report.created_tags[0].category, TagCategory::General);
        assert_eq!(log.len(), 1);
        assert!(tracker.is_patched(42));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_adjacent_ids_apply_as_rename() {
        let store = seeded_store();
        let (applier, _, _) = applier(store.clone());

        let mut forward = FieldMap::new();
        forward.insert(PostField::Artist, names(&["new_name"]));
        let mut backward = FieldMap::new();
        backward.insert(PostField::Artist, names(&["old_name"]));

        let report = applier.apply(42, &backward, &forward).await.unwrap();
        assert_eq!(
            report.tag_ops,
            vec![(TagCategory::Artist, TagOp::Rename { from: 105, to: 106 })]
        );

        let post = store.get_post(42).await.unwrap().unwrap();
        let artists: Vec<_> = post.tags_in(TagCategory::Artist).map(|t| t.id).collect();
        assert_eq!(artists, vec![106]);
        assert!(report.created_tags.is_empty());
    }

    #[tokio::test]
    async fn test_scalars_replace_and_save_once() {
        let store = seeded_store();
        let (applier, _, _) = applier(store.clone());

        let mut forward = FieldMap::new();
        forward.insert(PostField::Rating, FieldValue::Text("explicit".to_string()));
        forward.insert(PostField::Score, FieldValue::Integer(99));
        forward.insert(PostField::SourceUrl, FieldValue::Text("https://cdn/b.jpg".to_string()));

        let report = applier.apply(42, &FieldMap::new(), &forward).await.unwrap();
        assert_eq!(report.updated.len(), 3);
        assert_eq!(store.save_count(), 1);

        let post = store.get_post(42).await.unwrap().unwrap();
        assert_eq!(post.rating, Some(Rating::Explicit));
        assert_eq!(post.score, Some(99));
        assert_eq!(post.source_url.as_deref(), Some("https://cdn/b.jpg"));
    }

    #[tokio::test]
    async fn test_missing_post_is_reported_without_saving() {
        let store = seeded_store();
        let (applier, tracker, _) = applier(store.clone());

        let err = applier
            .apply(7, &FieldMap::new(), &FieldMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::LocalMissing { post_id: 7 }));
        assert!(err.is_skip());
        assert_eq!(store.save_count(), 0);
        assert!(!tracker.is_patched(7));
    }

    #[tokio::test]
    async fn test_missing_difference_is_not_patchable() {
        let store = seeded_store();
        let (applier, _, _) = applier(store.clone());
        let err = applier
            .apply_difference(42, &Difference::missing(None))
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::NotPatchable { post_id: 42 }));
    }

    #[tokio::test]
    async fn test_reapplying_is_idempotent() {
        let store = seeded_store();
        let (applier, _, _) = applier(store.clone());

        let mut forward = FieldMap::new();
        forward.insert(PostField::General, names(&["hat"]));
        let mut backward = FieldMap::new();
        backward.insert(PostField::General, names(&["cat"]));

        applier.apply(42, &backward, &forward).await.unwrap();
        let once = store.get_post(42).await.unwrap().unwrap();
        let report = applier.apply(42, &backward, &forward).await.unwrap();
        let twice = store.get_post(42).await.unwrap().unwrap();

        assert_eq!(once, twice);
        assert!(report.created_tags.is_empty());
        assert_eq!(store.tags().len(), 4);
    }

    /// Store whose tag creation always fails.
    struct NoCreateStore(MemoryStore);

    #[async_trait]
    impl PostStore for NoCreateStore {
        async fn get_post(&self, post_id: i64) -> crate::store::Result<Option<Post>> {
            self.0.get_post(post_id).await
        }
        async fn save_post(&self, post: &Post) -> crate::store::Result<()> {
            self.0.save_post(post).await
        }
        async fn list_post_ids(&self, range: crate::store::IdRange) -> crate::store::Result<Vec<i64>> {
            self.0.list_post_ids(range).await
        }
    }

    #[async_trait]
    impl TagStore for NoCreateStore {
        async fn get_tag(&self, tag_id: i64) -> crate::store::Result<Option<Tag>> {
            self.0.get_tag(tag_id).await
        }
        async fn find_tag_by_name(&self, name: &str) -> crate::store::Result<Option<Tag>> {
            self.0.find_tag_by_name(name).await
        }
        async fn create_tag(&self, _name: &str, _category: TagCategory) -> crate::store::Result<Tag> {
            Err(StoreError::InvalidInput {
                message: "read-only tag table".to_string(),
            })
        }
        async fn restore_tag(&self, tag: &Tag) -> crate::store::Result<bool> {
            self.0.restore_tag(tag).await
        }
    }

    #[tokio::test]
    async fn test_tag_resolution_failure_skips_only_that_field() {
        let inner = MemoryStore::new();
        inner.insert_tag(tag(1, "cat", TagCategory::General));
        let mut post = Post::new(42);
        post.attach(TagCategory::General, TagRef::from(&tag(1, "cat", TagCategory::General)));
        inner.insert_post(post);
        let store = Arc::new(NoCreateStore(inner));
        let (applier, tracker, _) = applier(store.clone());

        let mut forward = FieldMap::new();
        forward.insert(PostField::General, names(&["brand_new"]));
        forward.insert(PostField::Score, FieldValue::Integer(12));
        let mut backward = FieldMap::new();
        backward.insert(PostField::General, names(&["cat"]));

        let report = applier.apply(42, &backward, &forward).await.unwrap();
        assert_eq!(report.updated, vec![PostField::Score]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].field, PostField::General);
        assert!(!tracker.is_patched(42));

        let post = store.get_post(42).await.unwrap().unwrap();
        assert_eq!(post.score, Some(12));
        // The general field was left untouched, including its removal
        assert_eq!(post.tags_in(TagCategory::General).count(), 1);
    }
}
