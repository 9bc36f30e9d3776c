//! Local store contract.
//!
//! The diff engine and the patch applier only talk to the mirror through
//! [`PostStore`] and [`TagStore`]. [`SeaStore`] backs them with the sea-orm
//! schema; [`MemoryStore`] keeps everything in process for tests and tools.
//!
//! # Example
//!
//! ```ignore
//! use booru_sync::store::{PostStore, SeaStore};
//!
//! let store = SeaStore::new(db);
//! if let Some(post) = store.get_post(42).await? {
//!     println!("{} tags", post.tag_count());
//! }
//! ```

mod errors;
mod memory;
mod sea;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::entity::rating::Rating;
use crate::entity::tag_category::TagCategory;
use crate::field::{FieldValue, PostField, PostSnapshot};

pub use errors::{Result, StoreError};
pub use memory::MemoryStore;
pub use sea::SeaStore;

/// A tag row.
pub type Tag = crate::entity::tag::Model;

/// A tag attached to a post: identity plus the name used in differences.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagRef {
    pub id: i64,
    pub name: String,
}

impl From<&Tag> for TagRef {
    fn from(tag: &Tag) -> Self {
        Self {
            id: tag.id,
            name: tag.name.clone(),
        }
    }
}

/// A mirrored post with its tags grouped by category.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub source_url: Option<String>,
    pub rating: Option<Rating>,
    pub created_year: Option<i32>,
    pub score: Option<i64>,
    pub favorite_count: Option<i64>,
    pub tags: BTreeMap<TagCategory, BTreeSet<TagRef>>,
}

impl Post {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Tags in one category.
    pub fn tags_in(&self, category: TagCategory) -> impl Iterator<Item = &TagRef> {
        self.tags.get(&category).into_iter().flatten()
    }

    pub fn tags_in_mut(&mut self, category: TagCategory) -> &mut BTreeSet<TagRef> {
        self.tags.entry(category).or_default()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.values().map(BTreeSet::len).sum()
    }

    /// Attach a tag, ignoring it if the same tag id is already present.
    pub fn attach(&mut self, category: TagCategory, tag: TagRef) -> bool {
        let set = self.tags_in_mut(category);
        if set.iter().any(|t| t.id == tag.id) {
            return false;
        }
        set.insert(tag)
    }

    /// Detach a tag by id. Returns whether anything was removed.
    pub fn detach(&mut self, category: TagCategory, tag_id: i64) -> bool {
        let set = self.tags_in_mut(category);
        let before = set.len();
        set.retain(|t| t.id != tag_id);
        set.len() != before
    }

    /// Replace a scalar field with a value from a difference.
    pub fn set_scalar(&mut self, field: PostField, value: &FieldValue) -> Result<()> {
        match (field, value) {
            (PostField::SourceUrl, FieldValue::Text(url)) => self.source_url = Some(url.clone()),
            (PostField::Rating, FieldValue::Text(name)) => {
                let rating = Rating::from_name(name).ok_or_else(|| StoreError::InvalidInput {
                    message: format!("unknown rating {name:?}"),
                })?;
                self.rating = Some(rating);
            }
            (PostField::CreatedYear, FieldValue::Integer(year)) => {
                let year = i32::try_from(*year).map_err(|_| StoreError::InvalidInput {
                    message: format!("year {year} out of range"),
                })?;
                self.created_year = Some(year);
            }
            (PostField::Score, FieldValue::Integer(score)) => self.score = Some(*score),
            (PostField::FavoriteCount, FieldValue::Integer(count)) => {
                self.favorite_count = Some(*count);
            }
            (field, value) => {
                return Err(StoreError::InvalidInput {
                    message: format!("cannot assign {value:?} to {field}"),
                });
            }
        }
        Ok(())
    }

    /// Name-level view used for diffing.
    pub fn snapshot(&self) -> PostSnapshot {
        PostSnapshot {
            id: self.id,
            source_url: self.source_url.clone(),
            rating: self.rating,
            created_year: self.created_year,
            score: self.score,
            favorite_count: self.favorite_count,
            tags: self
                .tags
                .iter()
                .map(|(category, tags)| (*category, tags.iter().map(|t| t.name.clone()).collect()))
                .collect(),
        }
    }
}

/// Inclusive post id range; `end = None` means unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdRange {
    pub start: i64,
    pub end: Option<i64>,
}

impl IdRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(start: i64, end: Option<i64>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, id: i64) -> bool {
        id >= self.start && self.end.is_none_or(|end| id <= end)
    }
}

/// Read and write access to posts.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn get_post(&self, post_id: i64) -> Result<Option<Post>>;

    /// Persist the post's scalars and tag links atomically, inserting the
    /// post if it does not exist yet.
    async fn save_post(&self, post: &Post) -> Result<()>;

    /// Post ids in `range`, ascending.
    async fn list_post_ids(&self, range: IdRange) -> Result<Vec<i64>>;
}

/// Read and write access to tags.
#[async_trait]
pub trait TagStore: Send + Sync {
    async fn get_tag(&self, tag_id: i64) -> Result<Option<Tag>>;

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>>;

    /// Create a tag with a fresh id and unknown popularity.
    async fn create_tag(&self, name: &str, category: TagCategory) -> Result<Tag>;

    /// Insert a tag with a fixed id. Returns `false` when a tag with that id
    /// or name already exists.
    async fn restore_tag(&self, tag: &Tag) -> Result<bool>;
}

/// Everything the reconciler needs from the mirror.
pub trait LocalStore: PostStore + TagStore {}

impl<T: PostStore + TagStore + ?Sized> LocalStore for T {}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(id: i64, name: &str) -> TagRef {
        TagRef {
            id,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_attach_is_idempotent_by_id() {
        let mut post = Post::new(1);
        assert!(post.attach(TagCategory::General, tag(5, "cat")));
        assert!(!post.attach(TagCategory::General, tag(5, "cat")));
        assert_eq!(post.tag_count(), 1);

        assert!(post.detach(TagCategory::General, 5));
        assert!(!post.detach(TagCategory::General, 5));
        assert_eq!(post.tag_count(), 0);
    }

    #[test]
    fn test_set_scalar_dispatch() {
        let mut post = Post::new(1);
        post.set_scalar(PostField::Rating, &FieldValue::Text("questionable".to_string()))
            .unwrap();
        post.set_scalar(PostField::CreatedYear, &FieldValue::Integer(2020))
            .unwrap();
        post.set_scalar(PostField::SourceUrl, &FieldValue::Text("https://cdn/x.png".to_string()))
            .unwrap();

        assert_eq!(post.rating, Some(Rating::Questionable));
        assert_eq!(post.created_year, Some(2020));
        assert_eq!(post.source_url.as_deref(), Some("https://cdn/x.png"));
    }

    #[test]
    fn test_set_scalar_rejects_mismatched_values() {
        let mut post = Post::new(1);
        assert!(matches!(
            post.set_scalar(PostField::Score, &FieldValue::Text("ten".to_string())),
            Err(StoreError::InvalidInput { .. })
        ));
        assert!(matches!(
            post.set_scalar(PostField::Rating, &FieldValue::Text("s".to_string())),
            Err(StoreError::InvalidInput { .. })
        ));
        assert!(post.set_scalar(PostField::General, &FieldValue::Integer(1)).is_err());
        assert_eq!(post, Post::new(1));
    }

    #[test]
    fn test_snapshot_uses_tag_names() {
        let mut post = Post::new(3);
        post.attach(TagCategory::Artist, tag(10, "someone"));
        post.score = Some(4);

        let snapshot = post.snapshot();
        assert_eq!(snapshot.score, Some(4));
        assert_eq!(
            snapshot.tag_names(TagCategory::Artist),
            ["someone".to_string()].into()
        );
    }

    #[test]
    fn test_id_range_bounds() {
        assert!(IdRange::all().contains(0));
        assert!(IdRange::all().contains(i64::MAX));
        let range = IdRange::new(10, Some(20));
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(21));
        assert!(!range.contains(9));
    }
}
