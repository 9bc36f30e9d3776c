use sea_orm::DbErr;
use thiserror::Error;

/// Errors that can occur during local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from sea-orm.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// Record not found.
    #[error("Not found: {context}")]
    NotFound { context: String },

    /// A tag with this name already exists.
    #[error("Tag already exists: {name}")]
    DuplicateTag { name: String },

    /// Invalid input data.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl StoreError {
    pub fn post_not_found(post_id: i64) -> Self {
        Self::NotFound {
            context: format!("post id={post_id}"),
        }
    }

    pub fn tag_not_found(tag_id: i64) -> Self {
        Self::NotFound {
            context: format!("tag id={tag_id}"),
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
