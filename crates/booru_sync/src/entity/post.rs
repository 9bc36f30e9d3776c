//! Post entity - the local mirror of one remote post.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::rating::Rating;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "posts")]
pub struct Model {
    /// Remote post id, used verbatim as the primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    // ─── Media ───────────────────────────────────────────────────────────────
    /// Preferred file URL (large variant when the remote offers one).
    #[sea_orm(column_type = "Text", nullable)]
    pub source_url: Option<String>,

    // ─── Classification ──────────────────────────────────────────────────────
    pub rating: Option<Rating>,
    pub created_year: Option<i32>,

    // ─── Statistics ──────────────────────────────────────────────────────────
    pub score: Option<i64>,
    pub favorite_count: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::post_tag::Entity")]
    PostTag,
}

impl Related<super::post_tag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PostTag.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
