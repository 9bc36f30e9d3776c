//! Tracked post fields and the values a difference carries for them.
//!
//! [`PostField`] is the closed set of fields the reconciler compares and
//! patches. Every read or write of a field by name goes through a `match` on
//! this enum; there is no stringly-typed attribute access.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entity::rating::Rating;
use crate::entity::tag_category::TagCategory;

/// A field compared between the remote record and the local post.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostField {
    SourceUrl,
    Rating,
    CreatedYear,
    Score,
    FavoriteCount,
    General,
    Artist,
    Character,
    Copyright,
    Meta,
}

impl PostField {
    /// Single-valued fields, replaced wholesale when they drift.
    pub const SCALARS: [PostField; 5] = [
        PostField::SourceUrl,
        PostField::Rating,
        PostField::CreatedYear,
        PostField::Score,
        PostField::FavoriteCount,
    ];

    /// Tag-set fields, patched with add/remove operations.
    pub const TAG_SETS: [PostField; 5] = [
        PostField::General,
        PostField::Artist,
        PostField::Character,
        PostField::Copyright,
        PostField::Meta,
    ];

    /// The tag category stored in this field, or `None` for scalars.
    #[must_use]
    pub fn tag_category(self) -> Option<TagCategory> {
        match self {
            PostField::General => Some(TagCategory::General),
            PostField::Artist => Some(TagCategory::Artist),
            PostField::Character => Some(TagCategory::Character),
            PostField::Copyright => Some(TagCategory::Copyright),
            PostField::Meta => Some(TagCategory::Meta),
            PostField::SourceUrl
            | PostField::Rating
            | PostField::CreatedYear
            | PostField::Score
            | PostField::FavoriteCount => None,
        }
    }

    #[must_use]
    pub fn for_category(category: TagCategory) -> Self {
        match category {
            TagCategory::General => PostField::General,
            TagCategory::Artist => PostField::Artist,
            TagCategory::Character => PostField::Character,
            TagCategory::Copyright => PostField::Copyright,
            TagCategory::Meta => PostField::Meta,
        }
    }

    #[must_use]
    pub fn is_tag_set(self) -> bool {
        self.tag_category().is_some()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PostField::SourceUrl => "source_url",
            PostField::Rating => "rating",
            PostField::CreatedYear => "created_year",
            PostField::Score => "score",
            PostField::FavoriteCount => "favorite_count",
            PostField::General => "general",
            PostField::Artist => "artist",
            PostField::Character => "character",
            PostField::Copyright => "copyright",
            PostField::Meta => "meta",
        }
    }
}

impl std::fmt::Display for PostField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value stored for one field in a difference.
///
/// Serialized untagged so cache lines stay plain JSON:
/// `2021`, `"sensitive"`, `["cat", "hat"]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
    Tags(BTreeSet<String>),
}

impl FieldValue {
    #[must_use]
    pub fn as_tags(&self) -> Option<&BTreeSet<String>> {
        match self {
            FieldValue::Tags(tags) => Some(tags),
            FieldValue::Integer(_) | FieldValue::Text(_) => None,
        }
    }
}

impl From<Rating> for FieldValue {
    fn from(rating: Rating) -> Self {
        FieldValue::Text(rating.as_str().to_string())
    }
}

/// Partial mapping from field to value; one side of a difference.
pub type FieldMap = BTreeMap<PostField, FieldValue>;

/// Comparable view of a post, built from either the remote record or the
/// local store. Tag sets hold names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostSnapshot {
    pub id: i64,
    pub source_url: Option<String>,
    pub rating: Option<Rating>,
    pub created_year: Option<i32>,
    pub score: Option<i64>,
    pub favorite_count: Option<i64>,
    pub tags: BTreeMap<TagCategory, BTreeSet<String>>,
}

impl PostSnapshot {
    /// Current value of a scalar field. Tag-set fields return `None`; use
    /// [`PostSnapshot::tag_names`] for those.
    #[must_use]
    pub fn scalar(&self, field: PostField) -> Option<FieldValue> {
        match field {
            PostField::SourceUrl => self.source_url.clone().map(FieldValue::Text),
            PostField::Rating => self.rating.map(FieldValue::from),
            PostField::CreatedYear => self.created_year.map(|y| FieldValue::Integer(y.into())),
            PostField::Score => self.score.map(FieldValue::Integer),
            PostField::FavoriteCount => self.favorite_count.map(FieldValue::Integer),
            PostField::General
            | PostField::Artist
            | PostField::Character
            | PostField::Copyright
            | PostField::Meta => None,
        }
    }

    /// Tag names held in `category`; empty when the post has none.
    #[must_use]
    pub fn tag_names(&self, category: TagCategory) -> BTreeSet<String> {
        self.tags.get(&category).cloned().unwrap_or_default()
    }

    /// Flatten every present field into a [`FieldMap`].
    ///
    /// Used to keep a provenance copy of a record that cannot be patched.
    #[must_use]
    pub fn to_field_map(&self) -> FieldMap {
        let mut map = FieldMap::new();
        for field in PostField::SCALARS {
            if let Some(value) = self.scalar(field) {
                map.insert(field, value);
            }
        }
        for field in PostField::TAG_SETS {
            if let Some(category) = field.tag_category() {
                map.insert(field, FieldValue::Tags(self.tag_names(category)));
            }
        }
        map
    }
}
