//! HTTP transport boundary.
//!
//! The remote client never talks to `reqwest` directly; it sends
//! [`HttpRequest`]s through an [`HttpTransport`]. Production code uses
//! [`reqwest_transport::ReqwestTransport`], unit tests use the in-memory
//! `MockTransport`.

use async_trait::async_trait;
use thiserror::Error;

/// HTTP headers represented as key/value pairs.
///
/// Header names are treated case-insensitively by helper functions.
pub type HttpHeaders = Vec<(String, String)>;

/// Credentials for an authenticating proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl ProxyAuth {
    /// Parse `user:password`. The password may itself contain colons.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (username, password) = raw.split_once(':')?;
        if username.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Egress proxy a request should be routed through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyConfig {
    /// Proxy URL including scheme, e.g. `http://10.0.0.1:8080`.
    pub url: String,
    pub auth: Option<ProxyAuth>,
}

/// A minimal GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HttpHeaders,
    /// Route through this proxy instead of connecting directly.
    pub proxy: Option<ProxyConfig>,
}

impl HttpRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            proxy: None,
        }
    }

    #[must_use]
    pub fn via(mut self, proxy: Option<ProxyConfig>) -> Self {
        self.proxy = proxy;
        self
    }
}

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http transport error: {0}")]
    Transport(String),

    #[error("invalid proxy {url}: {message}")]
    Proxy { url: String, message: String },

    #[error("no mock response registered for GET {url}")]
    NoMockResponse { url: String },
}

/// Transport boundary for all HTTP I/O.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Get the first header value matching `name` (case-insensitive).
#[must_use]
pub fn header_get<'a>(headers: &'a HttpHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub mod reqwest_transport {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    /// A real HTTP transport backed by reqwest.
    ///
    /// reqwest binds proxies per client, so one client is built lazily per
    /// distinct proxy and reused for every later request through it.
    pub struct ReqwestTransport {
        direct: reqwest::Client,
        timeout: Option<StdDuration>,
        proxied: Mutex<HashMap<ProxyConfig, reqwest::Client>>,
    }

    impl ReqwestTransport {
        pub fn new(client: reqwest::Client) -> Self {
            Self {
                direct: client,
                timeout: None,
                proxied: Mutex::new(HashMap::new()),
            }
        }

        pub fn with_timeout(timeout: StdDuration) -> Result<Self, HttpError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| HttpError::Transport(e.to_string()))?;
            Ok(Self {
                direct: client,
                timeout: Some(timeout),
                proxied: Mutex::new(HashMap::new()),
            })
        }

        fn client_for(&self, proxy: Option<&ProxyConfig>) -> Result<reqwest::Client, HttpError> {
            let Some(proxy) = proxy else {
                return Ok(self.direct.clone());
            };

            let mut clients = self.proxied.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(client) = clients.get(proxy) {
                return Ok(client.clone());
            }

            let mut reqwest_proxy =
                reqwest::Proxy::all(&proxy.url).map_err(|e| HttpError::Proxy {
                    url: proxy.url.clone(),
                    message: e.to_string(),
                })?;
            if let Some(auth) = &proxy.auth {
                reqwest_proxy = reqwest_proxy.basic_auth(&auth.username, &auth.password);
            }

            let mut builder = reqwest::Client::builder().proxy(reqwest_proxy);
            if let Some(timeout) = self.timeout {
                builder = builder.timeout(timeout);
            }
            let client = builder
                .build()
                .map_err(|e| HttpError::Transport(e.to_string()))?;
            clients.insert(proxy.clone(), client.clone());
            Ok(client)
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let client = self.client_for(request.proxy.as_ref())?;
            let transport_err = |e: reqwest::Error| HttpError::Transport(e.to_string());

            let resp = request
                .headers
                .iter()
                .fold(client.get(&request.url), |builder, (k, v)| builder.header(k, v))
                .send()
                .await
                .map_err(transport_err)?;

            let status = resp.status().as_u16();
            let headers: HttpHeaders = resp
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let body = resp.bytes().await.map_err(transport_err)?.to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }
    }
}

#[cfg(test)]
pub use mock::MockTransport;

#[cfg(test)]
mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex, MutexGuard};

    use super::*;

    /// Scripted transport for unit tests.
    ///
    /// Responses are queued per URL and handed out in order. Clones share
    /// the same queues, and every request is recorded.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    #[derive(Default)]
    struct MockState {
        queued: HashMap<String, VecDeque<HttpResponse>>,
        seen: Vec<HttpRequest>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        pub fn push_response(&self, url: impl Into<String>, response: HttpResponse) {
            self.state()
                .queued
                .entry(url.into())
                .or_default()
                .push_back(response);
        }

        /// Queue a 200 with a JSON body.
        pub fn push_json(&self, url: impl Into<String>, body: &serde_json::Value) {
            self.push_response(
                url,
                HttpResponse {
                    status: 200,
                    headers: vec![("Content-Type".to_string(), "application/json".to_string())],
                    body: body.to_string().into_bytes(),
                },
            );
        }

        pub fn push_status(&self, url: impl Into<String>, status: u16) {
            self.push_response(
                url,
                HttpResponse {
                    status,
                    headers: Vec::new(),
                    body: Vec::new(),
                },
            );
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.state().seen.clone()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let mut state = self.state();
            let next = state
                .queued
                .get_mut(&request.url)
                .and_then(VecDeque::pop_front);
            let url = request.url.clone();
            state.seen.push(request);
            next.ok_or(HttpError::NoMockResponse { url })
        }
    }
}
