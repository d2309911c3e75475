//! Document providers.
//!
//! [`HttpFetcher`] is an async HTTP client wrapping reqwest. Not a browser,
//! just GET requests: redirects, timeouts, retry on 5xx, backoff on 429,
//! bounded concurrency and an optional politeness delay.
//! [`StaticFetcher`] serves in-memory pages for tests and offline runs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

/// A fetched document.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects; relative links resolve against it.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

/// Fetches raw HTML for a URL. Owns its own concurrency and timeout policy.
#[async_trait(?Send)]
pub trait Fetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// Options for [`HttpFetcher`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries on 5xx, 429 and transport errors.
    pub max_retries: u32,
    pub max_redirects: usize,
    pub user_agent: String,
    /// Maximum requests in flight.
    pub concurrency: usize,
    /// Random delay range `(min_ms, max_ms)` before each request.
    pub delay_ms: Option<(u64, u64)>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 2,
            max_redirects: 5,
            user_agent: concat!("harvest/", env!("CARGO_PKG_VERSION")).to_string(),
            concurrency: 8,
            delay_ms: None,
        }
    }
}

/// HTTP document provider.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for servers that reject HTTP/2.
    h1_client: reqwest::Client,
    permits: Arc<Semaphore>,
    config: FetchConfig,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(FetchConfig::default())
    }
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let builder = || {
            reqwest::Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
                .user_agent(config.user_agent.clone())
        };

        let client = builder().build().unwrap_or_default();
        let h1_client = builder().http1_only().build().unwrap_or_default();

        Self {
            client,
            h1_client,
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    async fn get_inner(&self, client: &reqwest::Client, url: &str) -> Result<FetchedPage> {
        let mut retries = 0u32;
        let max_retries = self.config.max_retries;

        loop {
            match client.get(url).send().await {
                Ok(r) => {
                    let status = r.status().as_u16();
                    let final_url = r.url().to_string();

                    // Retry on 5xx
                    if status >= 500 && retries < max_retries {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tracing::warn!("{url} returned {status}, retry {retries} in {delay:?}");
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    // Backoff on 429
                    if status == 429 && retries < max_retries {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        let delay = Duration::from_secs(retry_after.min(10));
                        tracing::warn!("{url} rate limited, retry {retries} in {delay:?}");
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if !(200..300).contains(&status) {
                        bail!("HTTP {status} from {final_url}");
                    }

                    let body = r.text().await?;
                    return Ok(FetchedPage {
                        url: url.to_string(),
                        final_url,
                        status,
                        body,
                    });
                }
                Err(e) => {
                    if retries < max_retries && !e.is_builder() {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tracing::warn!("GET {url} failed: {e}, retry {retries} in {delay:?}");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

#[async_trait(?Send)]
impl Fetcher for HttpFetcher {
    /// Falls back to HTTP/1.1 on protocol errors (some CDNs reject HTTP/2).
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let _permit = self.permits.acquire().await?;

        if let Some((min, max)) = self.config.delay_ms {
            let ms = rand::thread_rng().gen_range(min.min(max)..=max.max(min));
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        tracing::debug!("GET {url}");
        match self.get_inner(&self.client, url).await {
            Ok(page) => Ok(page),
            Err(e) => {
                let err_str = format!("{e}");
                if err_str.contains("http2")
                    || err_str.contains("protocol")
                    || err_str.contains("connection closed")
                {
                    self.get_inner(&self.h1_client, url).await
                } else {
                    Err(e)
                }
            }
        }
    }
}

// ── In-memory pages ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum StaticPage {
    Html { body: String, delay: Option<Duration> },
    Failure(String),
}

/// Serves registered pages by URL and records every request.
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    pages: HashMap<String, StaticPage>,
    requests: Rc<RefCell<Vec<String>>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(
            url.into(),
            StaticPage::Html {
                body: html.into(),
                delay: None,
            },
        );
        self
    }

    /// A page that answers after `delay`.
    pub fn delayed_page(
        mut self,
        url: impl Into<String>,
        html: impl Into<String>,
        delay: Duration,
    ) -> Self {
        self.pages.insert(
            url.into(),
            StaticPage::Html {
                body: html.into(),
                delay: Some(delay),
            },
        );
        self
    }

    /// A URL whose fetch fails with `message`.
    pub fn failing(mut self, url: impl Into<String>, message: impl Into<String>) -> Self {
        self.pages
            .insert(url.into(), StaticPage::Failure(message.into()));
        self
    }

    /// URLs requested so far, in request order. Shared between clones.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

#[async_trait(?Send)]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        self.requests.borrow_mut().push(url.to_string());
        match self.pages.get(url) {
            Some(StaticPage::Html { body, delay }) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(*delay).await;
                }
                Ok(FetchedPage {
                    url: url.to_string(),
                    final_url: url.to_string(),
                    status: 200,
                    body: body.clone(),
                })
            }
            Some(StaticPage::Failure(message)) => bail!("{message}"),
            None => bail!("no page registered for {url}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_fetch_config_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.max_retries, 2);
        assert!(config.user_agent.starts_with("harvest/"));
        let fetcher = HttpFetcher::new(config);
        assert_eq!(fetcher.config().concurrency, 8);
    }

    #[test]
    fn test_fetch_config_partial_json() {
        let config: FetchConfig =
            serde_json::from_str(r#"{"timeout_ms": 500, "delay_ms": [10, 20]}"#).unwrap();
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.delay_ms, Some((10, 20)));
        assert_eq!(config.max_redirects, 5);
    }

    #[tokio::test]
    async fn test_static_fetcher_records_requests() {
        let fetcher = StaticFetcher::new()
            .page("https://a.test/", "<p>a</p>")
            .failing("https://b.test/", "boom");
        let probe = fetcher.clone();

        let page = fetcher.fetch("https://a.test/").await.unwrap();
        assert_eq!(page.body, "<p>a</p>");
        assert!(fetcher.fetch("https://b.test/").await.is_err());
        assert!(fetcher.fetch("https://c.test/").await.is_err());
        assert_eq!(
            probe.requests(),
            vec!["https://a.test/", "https://b.test/", "https://c.test/"]
        );
    }

    #[tokio::test]
    async fn test_http_fetcher_gets_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Hi</h1>"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::default();
        let url = format!("{}/page", server.uri());
        let page = fetcher.fetch(&url).await.unwrap();
        assert_eq!(page.status, 200);
        assert_eq!(page.body, "<h1>Hi</h1>");
        assert_eq!(page.final_url, url);
    }

    #[tokio::test]
    async fn test_http_fetcher_retries_then_fails_on_5xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(FetchConfig {
            max_retries: 1,
            ..FetchConfig::default()
        });
        let err = fetcher
            .fetch(&format!("{}/down", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::default();
        assert!(fetcher.fetch(&format!("{}/x", server.uri())).await.is_err());
    }
}
