//! Session endpoint transport
//!
//! `GET {base}/session` for a plain fetch, `POST {base}/refresh` for a forced
//! one and `POST {base}/deauthorize` to log out. Every endpoint answers with a
//! session payload; it is decoded whatever the HTTP status, so a 503 from a
//! forced refresh still reads as `disabled`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bungie_session::SessionView;
use reqwest::Method;
use tracing::debug;

use crate::error::{Error, Result};

/// Abstraction over the session endpoints.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn SessionTransport>`).
pub trait SessionTransport: Send + Sync {
    fn fetch<'a>(
        &'a self,
        force: bool,
    ) -> Pin<Box<dyn Future<Output = Result<SessionView>> + Send + 'a>>;

    fn deauthorize<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<SessionView>> + Send + 'a>>;
}

impl<T: SessionTransport + ?Sized> SessionTransport for Arc<T> {
    fn fetch<'a>(
        &'a self,
        force: bool,
    ) -> Pin<Box<dyn Future<Output = Result<SessionView>> + Send + 'a>> {
        (**self).fetch(force)
    }

    fn deauthorize<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<SessionView>> + Send + 'a>> {
        (**self).deauthorize()
    }
}

/// reqwest transport with its own cookie jar.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// `base_url` is the prefix the session routes are mounted under, e.g.
    /// `https://app.example/auth`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self::with_client(http, base_url))
    }

    /// Use a preconfigured client. It must keep cookies between requests.
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    async fn call(&self, method: Method, path: &str) -> Result<SessionView> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .http
            .request(method, url.as_str())
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("reading session response: {e}")))?;
        debug!(%status, path, "session endpoint responded");
        serde_json::from_slice(&body).map_err(|e| Error::Decode(e.to_string()))
    }
}

impl SessionTransport for HttpTransport {
    fn fetch<'a>(
        &'a self,
        force: bool,
    ) -> Pin<Box<dyn Future<Output = Result<SessionView>> + Send + 'a>> {
        if force {
            Box::pin(self.call(Method::POST, "refresh"))
        } else {
            Box::pin(self.call(Method::GET, "session"))
        }
    }

    fn deauthorize<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<SessionView>> + Send + 'a>> {
        Box::pin(self.call(Method::POST, "deauthorize"))
    }
}
