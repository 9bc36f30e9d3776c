//! Batched post fetching.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::errors::{RemoteError, Result};
use super::proxy::ProxyPool;
use super::rate_limit::{DIRECT_EGRESS, RequestSpacer};
use super::response_cache::{CachedBatch, ResponseCache};
use super::types::RemotePost;
use crate::http::{HttpError, HttpRequest, HttpTransport};

/// Number of consecutive ids fetched per request.
pub const BATCH_WINDOW: i64 = 100;

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of authoritative post records.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// The remote record for `post_id`, or `None` if the remote no longer
    /// has it.
    async fn fetch_post(&self, post_id: i64) -> Result<Option<RemotePost>>;
}

/// First id of the window containing `post_id`.
#[inline]
pub fn window_start(post_id: i64, window: i64) -> i64 {
    post_id - post_id.rem_euclid(window)
}

/// Client for the board's `posts.json` endpoint.
///
/// Each lookup fetches the whole aligned window around the id and caches it
/// by URL, so the other ids in that window cost nothing.
///
/// # Example
///
/// ```ignore
/// let client = RemoteClient::new("https://danbooru.donmai.us")?;
/// if let Some(post) = client.fetch_batch(4_200_123).await? {
///     println!("{}", post.tag_string_general);
/// }
/// ```
pub struct RemoteClient {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    window: i64,
    cache: ResponseCache,
    proxies: Option<Arc<ProxyPool>>,
    spacer: RequestSpacer,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base_url", &self.base_url.as_str())
            .field("window", &self.window)
            .field("cache", &self.cache)
            .field("proxies", &self.proxies)
            .finish()
    }
}

impl RemoteClient {
    /// A client using reqwest with the default timeout.
    pub fn new(base_url: &str) -> Result<Self> {
        let transport = crate::http::reqwest_transport::ReqwestTransport::with_timeout(
            DEFAULT_REQUEST_TIMEOUT,
        )
        .map_err(|e| RemoteError::request(base_url, None, e.to_string()))?;
        Self::with_transport(Arc::new(transport), base_url)
    }

    pub fn with_transport(transport: Arc<dyn HttpTransport>, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| RemoteError::InvalidUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl {
                url: base_url.to_string(),
                message: "not a base URL".to_string(),
            });
        }

        Ok(Self {
            transport,
            base_url,
            window: BATCH_WINDOW,
            cache: ResponseCache::in_memory(),
            proxies: None,
            spacer: RequestSpacer::default(),
        })
    }

    #[must_use]
    pub fn with_response_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_proxy_pool(mut self, pool: Arc<ProxyPool>) -> Self {
        self.proxies = Some(pool);
        self
    }

    #[must_use]
    pub fn with_request_spacing(mut self, spacing: Duration) -> Self {
        self.spacer = RequestSpacer::new(spacing);
        self
    }

    pub fn response_cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// URL of the window request covering `post_id`.
    pub fn batch_url(&self, post_id: i64) -> String {
        let start = window_start(post_id, self.window);
        let end = start + self.window - 1;

        let mut url = self.base_url.clone();
        {
            // Extend rather than replace any path prefix on the base URL
            let path = format!("{}/posts.json", url.path().trim_end_matches('/'));
            url.set_path(&path);
        }
        url.query_pairs_mut()
            .clear()
            .append_pair("tags", &format!("id:{start}..{end}"))
            .append_pair("limit", &self.window.to_string());
        url.to_string()
    }

    /// Fetch the window around `post_id` and pick its record.
    pub async fn fetch_batch(&self, post_id: i64) -> Result<Option<RemotePost>> {
        let url = self.batch_url(post_id);
        let batch = self.fetch_window(&url).await?;
        let post = batch.iter().find(|p| p.id == post_id).cloned();
        if post.is_none() {
            tracing::debug!(post_id, url = %url, batch = batch.len(), "Post not in remote batch");
        }
        Ok(post)
    }

    async fn fetch_window(&self, url: &str) -> Result<CachedBatch> {
        self.cache
            .get_or_fetch(url, || async move { self.request_json(url).await })
            .await
    }

    async fn request_json(&self, url: &str) -> Result<serde_json::Value> {
        let proxy = match &self.proxies {
            Some(pool) => pool.next().await,
            None => None,
        };
        let egress = proxy
            .as_ref()
            .map_or_else(|| DIRECT_EGRESS.to_string(), |p| p.url.clone());
        self.spacer.wait(&egress).await;

        tracing::debug!(url, egress = %egress, "Fetching batch");
        let response = self
            .transport
            .send(HttpRequest::get(url).via(proxy))
            .await
            .map_err(|e| match e {
                HttpError::Proxy { url: proxy, message } => {
                    RemoteError::request(url, None, format!("proxy {proxy}: {message}"))
                }
                other => RemoteError::request(url, None, other.to_string()),
            })?;

        if response.status == 429 {
            let retry_after = response
                .header("retry-after")
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(RemoteError::RateLimited {
                url: url.to_string(),
                retry_after,
            });
        }
        if !response.is_success() {
            let snippet = String::from_utf8_lossy(&response.body);
            return Err(RemoteError::request(
                url,
                Some(response.status),
                format!("HTTP {} {}", response.status, snippet.trim()),
            ));
        }

        serde_json::from_slice(&response.body).map_err(|e| RemoteError::decode(url, e.to_string()))
    }
}

#[async_trait]
impl RemoteSource for RemoteClient {
    async fn fetch_post(&self, post_id: i64) -> Result<Option<RemotePost>> {
        self.fetch_batch(post_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, MockTransport};
    use crate::remote::proxy::ProxySource;

    const BASE: &str = "https://board.example";

    fn client(transport: &MockTransport) -> RemoteClient {
        RemoteClient::with_transport(Arc::new(transport.clone()), BASE)
            .unwrap()
            .with_request_spacing(Duration::ZERO)
    }

    #[test]
    fn test_window_start_aligns_down() {
        assert_eq!(window_start(0, 100), 0);
        assert_eq!(window_start(99, 100), 0);
        assert_eq!(window_start(100, 100), 100);
        assert_eq!(window_start(4_200_123, 100), 4_200_100);
    }

    #[test]
    fn test_batch_url_encodes_window() {
        let transport = MockTransport::new();
        let client = client(&transport);
        assert_eq!(
            client.batch_url(4_200_123),
            "https://board.example/posts.json?tags=id%3A4200100..4200199&limit=100"
        );
    }

    #[test]
    fn test_batch_url_keeps_base_path() {
        let client =
            RemoteClient::with_transport(Arc::new(MockTransport::new()), "https://host/mirror/")
                .unwrap();
        assert!(client.batch_url(5).starts_with("https://host/mirror/posts.json?"));
    }

    #[test]
    fn test_invalid_base_url() {
        let result = RemoteClient::with_transport(Arc::new(MockTransport::new()), "not a url");
        assert!(matches!(result, Err(RemoteError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_fetch_batch_selects_record_and_caches_window() {
        let transport = MockTransport::new();
        let client = client(&transport);
        let url = client.batch_url(142);
        transport.push_json(
            &url,
            &serde_json::json!([
                {"id": 141, "rating": "g"},
                {"id": 142, "rating": "e", "tag_string_general": "cat"}
            ]),
        );

        let post = client.fetch_batch(142).await.unwrap().unwrap();
        assert_eq!(post.rating.as_deref(), Some("e"));

        // Same window, served from cache
        let neighbour = client.fetch_batch(141).await.unwrap().unwrap();
        assert_eq!(neighbour.id, 141);
        assert!(client.fetch_batch(150).await.unwrap().is_none());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let transport = MockTransport::new();
        let client = client(&transport);

        transport.push_response(
            client.batch_url(1),
            HttpResponse {
                status: 429,
                headers: vec![("Retry-After".to_string(), "7".to_string())],
                body: Vec::new(),
            },
        );
        match client.fetch_batch(1).await {
            Err(RemoteError::RateLimited { retry_after, .. }) => assert_eq!(retry_after, Some(7)),
            other => panic!("expected rate limit, got {other:?}"),
        }

        transport.push_status(client.batch_url(200), 503);
        assert!(matches!(
            client.fetch_batch(200).await,
            Err(RemoteError::Request {
                status: Some(503),
                ..
            })
        ));

        transport.push_response(
            client.batch_url(300),
            HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: b"<html>maintenance</html>".to_vec(),
            },
        );
        assert!(matches!(
            client.fetch_batch(300).await,
            Err(RemoteError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_window_is_retried_on_next_call() {
        let transport = MockTransport::new();
        let client = client(&transport);
        let url = client.batch_url(5);
        transport.push_status(&url, 500);
        transport.push_json(&url, &serde_json::json!([{"id": 5}]));

        assert!(client.fetch_batch(5).await.is_err());
        assert_eq!(client.fetch_batch(5).await.unwrap().unwrap().id, 5);
    }

    #[tokio::test]
    async fn test_requests_rotate_through_proxies() {
        let transport = MockTransport::new();
        let pool = ProxyPool::load(
            ProxySource::Static(vec!["10.0.0.1:1".to_string(), "10.0.0.2:2".to_string()]),
            None,
            Arc::new(transport.clone()),
        )
        .await
        .unwrap();
        let client = client(&transport).with_proxy_pool(Arc::new(pool));

        for id in [0, 100, 200] {
            transport.push_json(client.batch_url(id), &serde_json::json!([]));
            client.fetch_batch(id).await.unwrap();
        }

        let proxies: Vec<_> = transport
            .requests()
            .into_iter()
            .map(|r| r.proxy.map(|p| p.url))
            .collect();
        assert_eq!(
            proxies,
            vec![
                Some("http://10.0.0.1:1".to_string()),
                Some("http://10.0.0.2:2".to_string()),
                Some("http://10.0.0.1:1".to_string()),
            ]
        );
    }
}
