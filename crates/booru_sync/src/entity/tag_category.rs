//! Tag categories, one per tag-set field on a post.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum TagCategory {
    #[sea_orm(string_value = "general")]
    #[default]
    General,
    #[sea_orm(string_value = "artist")]
    Artist,
    #[sea_orm(string_value = "character")]
    Character,
    #[sea_orm(string_value = "copyright")]
    Copyright,
    #[sea_orm(string_value = "meta")]
    Meta,
}

impl TagCategory {
    pub const ALL: [TagCategory; 5] = [
        TagCategory::General,
        TagCategory::Artist,
        TagCategory::Character,
        TagCategory::Copyright,
        TagCategory::Meta,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Artist => "artist",
            Self::Character => "character",
            Self::Copyright => "copyright",
            Self::Meta => "meta",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl std::fmt::Display for TagCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_general() {
        assert_eq!(TagCategory::default(), TagCategory::General);
    }

    #[test]
    fn from_name_accepts_every_display_value() {
        for category in TagCategory::ALL {
            assert_eq!(TagCategory::from_name(&category.to_string()), Some(category));
        }
        assert_eq!(TagCategory::from_name("tag_list_general"), None);
    }
}
