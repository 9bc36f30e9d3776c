//! Tag entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::tag_category::TagCategory;

/// Popularity recorded for tags created locally before the remote count is known.
pub const UNKNOWN_POPULARITY: i64 = -1;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tags")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Globally unique tag name.
    #[sea_orm(unique)]
    pub name: String,
    pub category: TagCategory,
    /// Remote post count, or [`UNKNOWN_POPULARITY`].
    pub popularity: i64,
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
