//! booru_sync - reconcile a local image-board post mirror with the remote API.
//!
//! The library fetches posts from the remote in id windows, diffs them
//! against the local mirror, caches each difference in an append-only
//! journal, and applies drift to the mirror through a single writer.
//!
//! # Features
//!
//! - `migrate` - Enables database migration support. When enabled, you can use
//!   [`connect_and_migrate`] to automatically run migrations on connection.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use booru_sync::{connect_and_migrate, diff::DiffEngine, remote::RemoteClient, store::SeaStore};
//!
//! let db = connect_and_migrate("sqlite://mirror.db?mode=rwc").await?;
//! let store = Arc::new(SeaStore::new(db));
//! let remote = Arc::new(RemoteClient::new("https://danbooru.donmai.us")?);
//!
//! let difference = DiffEngine::new(remote, store).compare(42).await?;
//! println!("{} fields drifted", difference.fields().count());
//! ```

pub mod cache;
pub mod db;
pub mod diff;
pub mod entity;
pub mod export;
pub mod field;
pub mod http;
pub mod patch;
pub mod remote;
pub mod retry;
pub mod store;
pub mod sync;

#[cfg(feature = "migrate")]
pub mod migration;

pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use entity::prelude::*;

pub use cache::{DiffCache, JournalError, PatchStateTracker, TagCreationLog};
pub use diff::{DiffEngine, DiffError, Difference, NoiseFilter};
pub use field::{FieldMap, FieldValue, PostField, PostSnapshot};
pub use patch::{PatchApplier, PatchError, PatchReport};
pub use remote::{RemoteClient, RemoteError, RemoteSource};
pub use store::{IdRange, LocalStore, MemoryStore, Post, PostStore, SeaStore, StoreError, TagStore};
pub use sync::{ReconcileContext, ReconcileOptions, ReconcileSummary, SyncProgress};
