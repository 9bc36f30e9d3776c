//! Content rating of a post.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Post rating, stored under its full name.
///
/// The remote API reports ratings as single-letter codes; see [`Rating::from_code`].
#[derive(
    Clone,
    Copy,
    Debug,
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
pub enum Rating {
    #[sea_orm(string_value = "general")]
    General,
    #[sea_orm(string_value = "sensitive")]
    Sensitive,
    #[sea_orm(string_value = "questionable")]
    Questionable,
    #[sea_orm(string_value = "explicit")]
    Explicit,
}

impl Rating {
    /// Map a remote rating code (`g`, `s`, `q`, `e`).
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "g" => Some(Self::General),
            "s" => Some(Self::Sensitive),
            "q" => Some(Self::Questionable),
            "e" => Some(Self::Explicit),
            _ => None,
        }
    }

    /// Parse the full name as written to the database and the caches.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "general" => Some(Self::General),
            "sensitive" => Some(Self::Sensitive),
            "questionable" => Some(Self::Questionable),
            "explicit" => Some(Self::Explicit),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Sensitive => "sensitive",
            Self::Questionable => "questionable",
            Self::Explicit => "explicit",
        }
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
