//! In-process store.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{IdRange, Post, PostStore, Result, StoreError, Tag, TagStore};
use crate::entity::tag::UNKNOWN_POPULARITY;
use crate::entity::tag_category::TagCategory;

#[derive(Debug, Default)]
struct Inner {
    posts: BTreeMap<i64, Post>,
    tags: BTreeMap<i64, Tag>,
}

/// Map-backed [`PostStore`] and [`TagStore`].
///
/// Counts `save_post` calls so callers can check how often a post was
/// persisted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tag, keeping its id.
    pub fn insert_tag(&self, tag: Tag) {
        self.lock().tags.insert(tag.id, tag);
    }

    /// Insert or replace a post without counting it as a save.
    pub fn insert_post(&self, post: Post) {
        self.lock().posts.insert(post.id, post);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.lock().tags.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn get_post(&self, post_id: i64) -> Result<Option<Post>> {
        Ok(self.lock().posts.get(&post_id).cloned())
    }

    async fn save_post(&self, post: &Post) -> Result<()> {
        let mut inner = self.lock();
        for tag in post.tags.values().flatten() {
            if !inner.tags.contains_key(&tag.id) {
                return Err(StoreError::tag_not_found(tag.id));
            }
        }
        inner.posts.insert(post.id, post.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_post_ids(&self, range: IdRange) -> Result<Vec<i64>> {
        Ok(self
            .lock()
            .posts
            .range(range.start..)
            .map(|(id, _)| *id)
            .take_while(|id| range.contains(*id))
            .collect())
    }
}

#[async_trait]
impl TagStore for MemoryStore {
    async fn get_tag(&self, tag_id: i64) -> Result<Option<Tag>> {
        Ok(self.lock().tags.get(&tag_id).cloned())
    }

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        Ok(self.lock().tags.values().find(|t| t.name == name).cloned())
    }

    async fn create_tag(&self, name: &str, category: TagCategory) -> Result<Tag> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidInput {
                message: "tag name is empty".to_string(),
            });
        }

        let mut inner = self.lock();
        if inner.tags.values().any(|t| t.name == name) {
            return Err(StoreError::DuplicateTag {
                name: name.to_string(),
            });
        }
        let id = inner.tags.keys().next_back().map_or(1, |last| last + 1);
        let tag = Tag {
            id,
            name: name.to_string(),
            category,
            popularity: UNKNOWN_POPULARITY,
        };
        inner.tags.insert(id, tag.clone());
        Ok(tag)
    }

    async fn restore_tag(&self, tag: &Tag) -> Result<bool> {
        let mut inner = self.lock();
        if inner.tags.contains_key(&tag.id) || inner.tags.values().any(|t| t.name == tag.name) {
            return Ok(false);
        }
        inner.tags.insert(tag.id, tag.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TagRef;

    fn tag(id: i64, name: &str) -> Tag {
        Tag {
            id,
            name: name.to_string(),
            category: TagCategory::General,
            popularity: 10,
        }
    }

    #[tokio::test]
    async fn test_create_tag_assigns_next_id_and_unknown_popularity() {
        let store = MemoryStore::new();
        store.insert_tag(tag(40, "cat"));

        let created = store.create_tag("hat", TagCategory::Meta).await.unwrap();
        assert_eq!(created.id, 41);
        assert_eq!(created.popularity, UNKNOWN_POPULARITY);
        assert_eq!(created.category, TagCategory::Meta);

        let duplicate = store.create_tag("hat", TagCategory::Meta).await;
        assert!(matches!(duplicate, Err(StoreError::DuplicateTag { .. })));
    }

    #[tokio::test]
    async fn test_save_post_rejects_unknown_tags() {
        let store = MemoryStore::new();
        let mut post = Post::new(1);
        post.attach(
            TagCategory::General,
            TagRef {
                id: 99,
                name: "ghost".to_string(),
            },
        );

        assert!(store.save_post(&post).await.is_err());
        assert_eq!(store.save_count(), 0);
        assert!(store.get_post(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_post_ids_respects_range() {
        let store = MemoryStore::new();
        for id in [3, 7, 12, 20] {
            store.insert_post(Post::new(id));
        }

        assert_eq!(store.list_post_ids(IdRange::all()).await.unwrap(), vec![3, 7, 12, 20]);
        assert_eq!(
            store.list_post_ids(IdRange::new(5, Some(12))).await.unwrap(),
            vec![7, 12]
        );
        assert_eq!(store.list_post_ids(IdRange::new(13, None)).await.unwrap(), vec![20]);
    }

    #[tokio::test]
    async fn test_restore_tag_keeps_id_and_refuses_duplicates() {
        let store = MemoryStore::new();
        assert!(store.restore_tag(&tag(500, "hat")).await.unwrap());
        assert!(!store.restore_tag(&tag(500, "other")).await.unwrap());
        assert!(!store.restore_tag(&tag(501, "hat")).await.unwrap());
        assert_eq!(store.get_tag(500).await.unwrap().unwrap().name, "hat");
    }
}
