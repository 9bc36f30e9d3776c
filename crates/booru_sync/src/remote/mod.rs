//! Remote image-board access.
//!
//! - [`client`] - `RemoteClient`: windowed `posts.json` fetches
//! - [`types`] - `RemotePost` and its normalization
//! - [`response_cache`] - URL-keyed response cache with optional journal
//! - [`proxy`] - round-robin proxy pool
//! - [`rate_limit`] - per-egress spacing and the shared 429 gate

pub mod client;
mod errors;
pub mod proxy;
pub mod rate_limit;
pub mod response_cache;
pub mod types;

pub use client::{BATCH_WINDOW, RemoteClient, RemoteSource, window_start};
pub use errors::{RemoteError, Result, short_error_message};
pub use proxy::{ProxyPool, ProxySource, parse_proxy_list};
pub use rate_limit::{RateLimitGate, RequestSpacer};
pub use response_cache::ResponseCache;
pub use types::RemotePost;
