//! Common re-exports for convenient entity usage.

pub use super::post::{
    ActiveModel as PostActiveModel, Column as PostColumn, Entity as PostEntity,
    Model as PostModel,
};
pub use super::post_tag::{
    ActiveModel as PostTagActiveModel, Column as PostTagColumn, Entity as PostTagEntity,
    Model as PostTagModel,
};
pub use super::rating::Rating;
pub use super::tag::{
    ActiveModel as TagActiveModel, Column as TagColumn, Entity as TagEntity, Model as TagModel,
    UNKNOWN_POPULARITY,
};
pub use super::tag_category::TagCategory;
