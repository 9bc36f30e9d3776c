//! sea-orm backed store.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};

use super::{IdRange, Post, PostStore, Result, StoreError, Tag, TagRef, TagStore};
use crate::entity::post::{self, Entity as PostEntity};
use crate::entity::post_tag::{self, Entity as PostTagEntity};
use crate::entity::tag::{self, Entity as TagEntity, UNKNOWN_POPULARITY};
use crate::entity::tag_category::TagCategory;

/// Store over the `posts`, `tags` and `post_tags` tables.
#[derive(Debug, Clone)]
pub struct SeaStore {
    db: Arc<DatabaseConnection>,
}

impl SeaStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db: Arc::new(db) }
    }

    pub fn from_arc(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn post_active_model(post: &Post) -> post::ActiveModel {
    post::ActiveModel {
        id: Set(post.id),
        source_url: Set(post.source_url.clone()),
        rating: Set(post.rating),
        created_year: Set(post.created_year),
        score: Set(post.score),
        favorite_count: Set(post.favorite_count),
    }
}

fn link_models(post: &Post) -> Vec<post_tag::ActiveModel> {
    post.tags
        .iter()
        .flat_map(|(category, tags)| {
            tags.iter().map(move |tag| post_tag::ActiveModel {
                post_id: Set(post.id),
                tag_id: Set(tag.id),
                category: Set(*category),
            })
        })
        .collect()
}

#[async_trait]
impl PostStore for SeaStore {
    async fn get_post(&self, post_id: i64) -> Result<Option<Post>> {
        let Some(row) = PostEntity::find_by_id(post_id).one(self.db.as_ref()).await? else {
            return Ok(None);
        };

        let links = PostTagEntity::find()
            .filter(post_tag::Column::PostId.eq(post_id))
            .find_also_related(TagEntity)
            .all(self.db.as_ref())
            .await?;

        let mut post = Post {
            id: row.id,
            source_url: row.source_url,
            rating: row.rating,
            created_year: row.created_year,
            score: row.score,
            favorite_count: row.favorite_count,
            tags: Default::default(),
        };
        for (link, tag) in links {
            match tag {
                Some(tag) => {
                    post.attach(link.category, TagRef::from(&tag));
                }
                None => {
                    tracing::warn!(post_id, tag_id = link.tag_id, "Post links to a missing tag");
                }
            }
        }
        Ok(Some(post))
    }

    async fn save_post(&self, post: &Post) -> Result<()> {
        let txn = self.db.begin().await?;

        PostEntity::insert(post_active_model(post))
            .on_conflict(
                OnConflict::column(post::Column::Id)
                    .update_columns([
                        post::Column::SourceUrl,
                        post::Column::Rating,
                        post::Column::CreatedYear,
                        post::Column::Score,
                        post::Column::FavoriteCount,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        PostTagEntity::delete_many()
            .filter(post_tag::Column::PostId.eq(post.id))
            .exec(&txn)
            .await?;

        let links = link_models(post);
        if !links.is_empty() {
            PostTagEntity::insert_many(links)
                .exec_without_returning(&txn)
                .await?;
        }

        txn.commit().await?;
        tracing::debug!(post_id = post.id, tags = post.tag_count(), "Saved post");
        Ok(())
    }

    async fn list_post_ids(&self, range: IdRange) -> Result<Vec<i64>> {
        let mut query = PostEntity::find()
            .select_only()
            .column(post::Column::Id)
            .filter(post::Column::Id.gte(range.start));
        if let Some(end) = range.end {
            query = query.filter(post::Column::Id.lte(end));
        }

        Ok(query
            .order_by_asc(post::Column::Id)
            .into_tuple::<i64>()
            .all(self.db.as_ref())
            .await?)
    }
}

#[async_trait]
impl TagStore for SeaStore {
    async fn get_tag(&self, tag_id: i64) -> Result<Option<Tag>> {
        Ok(TagEntity::find_by_id(tag_id).one(self.db.as_ref()).await?)
    }

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        Ok(TagEntity::find()
            .filter(tag::Column::Name.eq(name))
            .one(self.db.as_ref())
            .await?)
    }

    async fn create_tag(&self, name: &str, category: TagCategory) -> Result<Tag> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidInput {
                message: "tag name is empty".to_string(),
            });
        }
        if self.find_tag_by_name(name).await?.is_some() {
            return Err(StoreError::DuplicateTag {
                name: name.to_string(),
            });
        }

        let model = tag::ActiveModel {
            id: NotSet,
            name: Set(name.to_string()),
            category: Set(category),
            popularity: Set(UNKNOWN_POPULARITY),
        };
        Ok(model.insert(self.db.as_ref()).await?)
    }

    async fn restore_tag(&self, tag: &Tag) -> Result<bool> {
        if self.get_tag(tag.id).await?.is_some() || self.find_tag_by_name(&tag.name).await?.is_some()
        {
            return Ok(false);
        }

        let model = tag::ActiveModel {
            id: Set(tag.id),
            name: Set(tag.name.clone()),
            category: Set(tag.category),
            popularity: Set(tag.popularity),
        };
        TagEntity::insert(model)
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::rating::Rating;

    #[test]
    fn test_link_models_cover_every_category() {
        let mut post = Post::new(9);
        post.rating = Some(Rating::General);
        post.attach(
            TagCategory::General,
            TagRef {
                id: 1,
                name: "cat".to_string(),
            },
        );
        post.attach(
            TagCategory::Meta,
            TagRef {
                id: 2,
                name: "highres".to_string(),
            },
        );

        let links = link_models(&post);
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.post_id == Set(9)));
        assert!(
            links
                .iter()
                .any(|l| l.tag_id == Set(2) && l.category == Set(TagCategory::Meta))
        );

        let model = post_active_model(&post);
        assert_eq!(model.rating, Set(Some(Rating::General)));
        assert_eq!(model.score, Set(None));
    }
}
