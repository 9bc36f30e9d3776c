//! Remote post records and their normalization into snapshots.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike};
use serde::{Deserialize, Serialize};

use super::errors::{RemoteError, Result};
use crate::entity::rating::Rating;
use crate::entity::tag_category::TagCategory;
use crate::field::PostSnapshot;

/// One post as returned by `posts.json`.
///
/// Only the fields the reconciler compares are kept; unknown fields are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePost {
    pub id: i64,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub fav_count: Option<i64>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub large_file_url: Option<String>,
    #[serde(default)]
    pub tag_string_general: String,
    #[serde(default)]
    pub tag_string_artist: String,
    #[serde(default)]
    pub tag_string_character: String,
    #[serde(default)]
    pub tag_string_copyright: String,
    #[serde(default)]
    pub tag_string_meta: String,
}

impl RemotePost {
    /// `large_file_url` when non-empty, else `file_url`.
    pub fn preferred_file_url(&self) -> Option<&str> {
        [&self.large_file_url, &self.file_url]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|url| !url.is_empty())
    }

    /// Year of `created_at`, falling back to its first four characters.
    pub fn created_year(&self) -> Option<i32> {
        let created_at = self.created_at.as_deref()?;
        match DateTime::parse_from_rfc3339(created_at) {
            Ok(timestamp) => Some(timestamp.year()),
            Err(_) => created_at.get(..4).and_then(|prefix| prefix.parse().ok()),
        }
    }

    pub fn tag_string(&self, category: TagCategory) -> &str {
        match category {
            TagCategory::General => &self.tag_string_general,
            TagCategory::Artist => &self.tag_string_artist,
            TagCategory::Character => &self.tag_string_character,
            TagCategory::Copyright => &self.tag_string_copyright,
            TagCategory::Meta => &self.tag_string_meta,
        }
    }

    pub fn tag_names(&self, category: TagCategory) -> BTreeSet<String> {
        self.tag_string(category)
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Normalize into the comparable snapshot.
    ///
    /// # Errors
    /// An unknown rating code is a [`RemoteError::Decode`].
    pub fn to_snapshot(&self) -> Result<PostSnapshot> {
        let rating = match self.rating.as_deref().filter(|code| !code.is_empty()) {
            Some(code) => Some(Rating::from_code(code).ok_or_else(|| {
                RemoteError::decode(
                    format!("post #{}", self.id),
                    format!("unknown rating code {code:?}"),
                )
            })?),
            None => None,
        };

        Ok(PostSnapshot {
            id: self.id,
            source_url: self.preferred_file_url().map(str::to_string),
            rating,
            created_year: self.created_year(),
            score: self.score,
            favorite_count: self.fav_count,
            tags: TagCategory::ALL
                .into_iter()
                .map(|category| (category, self.tag_names(category)))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RemotePost {
        serde_json::from_value(serde_json::json!({
            "id": 42,
            "rating": "s",
            "created_at": "2021-07-04T12:30:00.000-04:00",
            "score": 17,
            "fav_count": 9,
            "file_url": "https://cdn.example/original/ab/cd/abcd.png",
            "large_file_url": "https://cdn.example/sample/ab/cd/sample-abcd.jpg",
            "tag_string_general": "cat  hat",
            "tag_string_artist": "someone",
            "tag_string_character": "",
            "tag_string_copyright": "original",
            "tag_string_meta": "highres",
            "uploader_id": 1
        }))
        .unwrap()
    }

    #[test]
    fn test_to_snapshot_normalizes_fields() {
        let snapshot = sample().to_snapshot().unwrap();

        assert_eq!(snapshot.id, 42);
        assert_eq!(snapshot.rating, Some(Rating::Sensitive));
        assert_eq!(snapshot.created_year, Some(2021));
        assert_eq!(snapshot.score, Some(17));
        assert_eq!(snapshot.favorite_count, Some(9));
        assert_eq!(
            snapshot.source_url.as_deref(),
            Some("https://cdn.example/sample/ab/cd/sample-abcd.jpg")
        );
        assert_eq!(
            snapshot.tag_names(TagCategory::General),
            ["cat".to_string(), "hat".to_string()].into()
        );
        assert!(snapshot.tag_names(TagCategory::Character).is_empty());
    }

    #[test]
    fn test_empty_large_file_url_falls_back_to_file_url() {
        let post = RemotePost {
            large_file_url: Some(String::new()),
            file_url: Some("https://cdn.example/a.png".to_string()),
            ..RemotePost::default()
        };
        assert_eq!(post.preferred_file_url(), Some("https://cdn.example/a.png"));

        let neither = RemotePost {
            file_url: Some(String::new()),
            ..RemotePost::default()
        };
        assert_eq!(neither.preferred_file_url(), None);
    }

    #[test]
    fn test_created_year_falls_back_to_prefix() {
        let post = RemotePost {
            created_at: Some("2007-02-10 11:00:00".to_string()),
            ..RemotePost::default()
        };
        assert_eq!(post.created_year(), Some(2007));

        let garbage = RemotePost {
            created_at: Some("soon".to_string()),
            ..RemotePost::default()
        };
        assert_eq!(garbage.created_year(), None);
    }

    #[test]
    fn test_unknown_rating_code_is_decode_error() {
        let post = RemotePost {
            id: 5,
            rating: Some("x".to_string()),
            ..RemotePost::default()
        };
        assert!(matches!(post.to_snapshot(), Err(RemoteError::Decode { .. })));
    }
}
