//! Resolve grounding redirect URLs to the sources they point at.
//!
//! Research reports cite sources through an intermediary redirect endpoint.
//! Resolution is best effort: any failure leaves the redirect URL in place.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use regex::{Captures, Regex};
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Per-request timeout for redirect probes, independent of the poll timeout.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

pub static REDIRECT_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://vertexaisearch\.cloud\.google\.com/grounding-api-redirect/[A-Za-z0-9_-]+")
        .unwrap()
});

/// Whether `url` is a grounding redirect URL.
pub fn is_redirect_url(url: &str) -> bool {
    REDIRECT_URL_PATTERN
        .find(url)
        .is_some_and(|m| m.start() == 0)
}

fn preview(url: &str) -> &str {
    match url.char_indices().nth(80) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}

#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ResolveError::Timeout(err.to_string())
        } else {
            ResolveError::Transport(err.to_string())
        }
    }
}

/// Network operations the resolver needs.
#[async_trait]
pub trait RedirectProbe: Send + Sync {
    /// Request `url` without following redirects and return the redirect
    /// target, if the response was a redirect carrying one.
    async fn head_location(&self, url: &str) -> Result<Option<String>, ResolveError>;

    /// Request `url` following redirects and return the final URL.
    async fn follow(&self, url: &str) -> Result<String, ResolveError>;
}

/// [`RedirectProbe`] over HTTP.
pub struct HttpProbe {
    no_follow: Client,
    follow: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, ResolveError> {
        let no_follow = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::Client(e.to_string()))?;
        let follow = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::Client(e.to_string()))?;
        Ok(Self { no_follow, follow })
    }
}

/// Absolute locations are returned verbatim; relative ones are joined onto
/// the request URL.
fn absolute_location(request_url: &str, location: &str) -> String {
    if Url::parse(location).is_ok() {
        return location.to_string();
    }
    Url::parse(request_url)
        .and_then(|base| base.join(location))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| location.to_string())
}

#[async_trait]
impl RedirectProbe for HttpProbe {
    async fn head_location(&self, url: &str) -> Result<Option<String>, ResolveError> {
        let response = self.no_follow.head(url).send().await?;
        if !matches!(response.status().as_u16(), 301 | 302 | 303 | 307 | 308) {
            return Ok(None);
        }
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| absolute_location(url, value));
        Ok(location)
    }

    async fn follow(&self, url: &str) -> Result<String, ResolveError> {
        let response = self.follow.get(url).send().await?;
        Ok(response.url().to_string())
    }
}

/// Bounded URL → resolution memo with least-recently-used eviction.
///
/// Failed resolutions are stored as `None` so they are not retried while
/// cached.
pub struct RedirectCache {
    entries: Mutex<LruCache<String, Option<String>>>,
}

impl RedirectCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Option<String>>> {
        // A panic elsewhere cannot leave an LRU map logically inconsistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `Some(entry)` on a hit (marking it most recently used).
    pub fn get(&self, url: &str) -> Option<Option<String>> {
        self.lock().get(url).cloned()
    }

    pub fn insert(&self, url: impl Into<String>, resolved: Option<String>) {
        self.lock().put(url.into(), resolved);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Shared across tool invocations for the lifetime of the process.
pub struct RedirectResolver {
    probe: Arc<dyn RedirectProbe>,
    cache: RedirectCache,
}

impl RedirectResolver {
    pub fn new(probe: Arc<dyn RedirectProbe>, capacity: usize) -> Self {
        Self {
            probe,
            cache: RedirectCache::new(capacity),
        }
    }

    /// HTTP resolver with the default timeout and cache size.
    pub fn http() -> Result<Self, ResolveError> {
        let probe = HttpProbe::new(RESOLVE_TIMEOUT)?;
        Ok(Self::new(Arc::new(probe), DEFAULT_CACHE_CAPACITY))
    }

    pub fn cache(&self) -> &RedirectCache {
        &self.cache
    }

    /// Resolve a single redirect URL; `None` when `url` is not a redirect URL
    /// or resolution failed.
    pub async fn resolve(&self, url: &str) -> Option<String> {
        if !is_redirect_url(url) {
            return None;
        }
        if let Some(cached) = self.cache.get(url) {
            trace!(url = preview(url), hit = cached.is_some(), "Redirect cache hit");
            return cached;
        }

        // Concurrent misses on the same URL may both probe; the later insert wins.
        let resolved = match self.lookup(url).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(url = preview(url), error = %e, "Failed to resolve redirect URL");
                None
            }
        };
        self.cache.insert(url, resolved.clone());
        resolved
    }

    async fn lookup(&self, url: &str) -> Result<Option<String>, ResolveError> {
        if let Some(location) = self.probe.head_location(url).await? {
            debug!(url = preview(url), resolved = %location, "Resolved redirect via Location");
            return Ok(Some(location));
        }

        // Some endpoints do not answer HEAD with a redirect.
        let final_url = self.probe.follow(url).await?;
        if final_url != url && !REDIRECT_URL_PATTERN.is_match(&final_url) {
            debug!(url = preview(url), resolved = %final_url, "Resolved redirect via GET");
            Ok(Some(final_url))
        } else {
            Ok(None)
        }
    }

    /// Replace every redirect URL in `text` with its resolution, leaving
    /// unresolvable ones untouched. URLs are resolved one at a time.
    pub async fn resolve_redirects(&self, text: &str) -> String {
        if !REDIRECT_URL_PATTERN.is_match(text) {
            return text.to_string();
        }

        let mut resolved: HashMap<&str, Option<String>> = HashMap::new();
        for m in REDIRECT_URL_PATTERN.find_iter(text) {
            if !resolved.contains_key(m.as_str()) {
                let target = self.resolve(m.as_str()).await;
                resolved.insert(m.as_str(), target);
            }
        }

        let replaced = resolved.values().filter(|r| r.is_some()).count();
        debug!(found = resolved.len(), replaced, "Resolved redirect URLs in text");

        REDIRECT_URL_PATTERN
            .replace_all(text, |caps: &Captures| {
                let original = &caps[0];
                resolved
                    .get(original)
                    .and_then(|target| target.clone())
                    .unwrap_or_else(|| original.to_string())
            })
            .into_owned()
    }
}
