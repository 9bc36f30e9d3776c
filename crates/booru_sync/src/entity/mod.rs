//! SeaORM entity definitions for the mirror database schema.

pub mod post;
pub mod post_tag;
pub mod prelude;
pub mod rating;
pub mod tag;
pub mod tag_category;
