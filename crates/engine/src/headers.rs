//! Outbound request header rewriting for the target origin.
//!
//! One [`RequestInterceptor`] exists per partition and sees every
//! request the context sends to the target site. It merges three
//! sources, in order: the caller's original headers (never overwritten
//! when present), the static identity headers (fingerprint, user agent,
//! API accept/referer), and the dynamic signed tuple for API paths.
//!
//! The allow/deny policy here is empirical: the upstream site rejects
//! API requests that carry an `Origin` header or a raw user-id header,
//! so those are never added and are stripped when present. Do not relax
//! this without re-verifying against live traffic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::TargetProfile;
use crate::driver::HeaderRewriter;
use crate::signer::{HeaderSigner, SignedHeaders};

/// Cache key user component when no user id is known.
pub const PUBLIC_USER: &str = "public";

/// Headers that must never reach the target's API surface.
const DENIED_API_HEADERS: &[&str] = &["origin", "user-id", "x-user-id"];

/// Fetch-metadata headers inserted (when absent) on API requests so
/// they look like the site's own XHR traffic.
const API_CLIENT_HINTS: &[(&str, &str)] = &[
    ("sec-fetch-site", "same-origin"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-dest", "empty"),
];

struct CacheEntry {
    headers: SignedHeaders,
    fetched_at: Instant,
}

/// Memoizes signed header tuples per `(path, user)` for a short TTL.
///
/// Unbounded by design: there is one entry per distinct API path, and
/// the whole cache is cleared when the owning context closes.
pub struct HeaderCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl HeaderCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached tuple for `(path, user)` if still fresh.
    pub fn lookup(&self, path: &str, user: &str) -> Option<SignedHeaders> {
        let entries = self.entries.lock();
        let entry = entries.get(&(path.to_string(), user.to_string()))?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(entry.headers.clone())
        } else {
            None
        }
    }

    pub fn store(&self, path: &str, user: &str, headers: SignedHeaders) {
        self.entries.lock().insert(
            (path.to_string(), user.to_string()),
            CacheEntry {
                headers,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Per-partition request rewriter. Installed once per partition key;
/// the lifecycle manager's registry guarantees a second registration
/// for the same partition reuses this instance instead of stacking a
/// duplicate.
pub struct RequestInterceptor {
    profile: TargetProfile,
    user_agent: String,
    fingerprint: String,
    user_id: Option<String>,
    signer: Option<Arc<dyn HeaderSigner>>,
    cache: HeaderCache,
}

impl RequestInterceptor {
    pub fn new(
        profile: TargetProfile,
        user_agent: impl Into<String>,
        fingerprint: impl Into<String>,
        user_id: Option<String>,
        signer: Option<Arc<dyn HeaderSigner>>,
        header_ttl: Duration,
    ) -> Self {
        Self {
            profile,
            user_agent: user_agent.into(),
            fingerprint: fingerprint.into(),
            user_id,
            signer,
            cache: HeaderCache::new(header_ttl),
        }
    }

    /// Drops all cached signed tuples. Called on context close.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    #[cfg(test)]
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Signed tuple for `path`, from cache or a fresh signing call.
    /// `None` when the service is unavailable; the request proceeds on
    /// static headers alone.
    async fn signed_for(&self, path: &str) -> Option<SignedHeaders> {
        let user = self.user_id.as_deref().unwrap_or(PUBLIC_USER);
        if let Some(headers) = self.cache.lookup(path, user) {
            return Some(headers);
        }

        let signer = self.signer.as_ref()?;
        match signer.sign(path, self.user_id.as_deref()).await {
            Ok(headers) => {
                self.cache.store(path, user, headers.clone());
                Some(headers)
            }
            Err(err) => {
                warn!(
                    target: "relive.headers",
                    path,
                    error = %err,
                    "signing call failed, falling back to static headers"
                );
                None
            }
        }
    }
}

/// Extracts the path (plus query) from an absolute URL. No URL crate:
/// the inputs here are always well-formed absolute URLs produced by the
/// browser itself.
pub fn url_path(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    match rest.find('/') {
        Some(idx) => &rest[idx..],
        None => "/",
    }
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
}

fn insert_absent(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if !has_header(headers, name) {
        headers.push((name.to_string(), value.to_string()));
    }
}

#[async_trait]
impl HeaderRewriter for RequestInterceptor {
    async fn rewrite(&self, url: &str, mut headers: Vec<(String, String)>) -> Vec<(String, String)> {
        if !self.profile.is_target(url) {
            return headers;
        }

        if !self.fingerprint.is_empty() {
            insert_absent(&mut headers, &self.profile.fingerprint_header, &self.fingerprint);
        }
        if !self.user_agent.is_empty() {
            insert_absent(&mut headers, "user-agent", &self.user_agent);
        }

        let path = url_path(url).to_string();
        if !path.starts_with(&self.profile.api_marker) {
            return headers;
        }

        headers.retain(|(name, _)| {
            let denied = DENIED_API_HEADERS
                .iter()
                .any(|d| name.eq_ignore_ascii_case(d));
            if denied {
                debug!(target: "relive.headers", header = %name, "stripping denied API header");
            }
            !denied
        });

        insert_absent(&mut headers, "referer", &format!("{}/", self.profile.origin));
        insert_absent(&mut headers, "accept", &self.profile.api_accept);
        for (name, value) in API_CLIENT_HINTS {
            insert_absent(&mut headers, name, value);
        }

        match self.signed_for(&path).await {
            Some(signed) => {
                insert_absent(&mut headers, "sign", &signed.sign);
                insert_absent(&mut headers, "time", &signed.time.to_string());
                insert_absent(&mut headers, "app-token", &signed.app_token);
                if let Some(revision) = &signed.revision {
                    insert_absent(&mut headers, "x-of-rev", revision);
                }
            }
            None => {
                insert_absent(&mut headers, "app-token", &self.profile.fallback_app_token);
            }
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::testing::{FailingSigner, StaticSigner};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn signed() -> SignedHeaders {
        SignedHeaders {
            sign: "sig:123".into(),
            time: 1_724_500_000,
            app_token: "signed-token".into(),
            revision: Some("r9".into()),
        }
    }

    fn interceptor(signer: Option<Arc<dyn HeaderSigner>>) -> RequestInterceptor {
        RequestInterceptor::new(
            TargetProfile::default(),
            "Mozilla/5.0 (test)",
            "fp-abc",
            Some("42".into()),
            signer,
            Duration::from_secs(10),
        )
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn url_path_extraction() {
        assert_eq!(url_path("https://onlyfans.com/api2/v2/users/me"), "/api2/v2/users/me");
        assert_eq!(url_path("https://onlyfans.com"), "/");
        assert_eq!(url_path("https://onlyfans.com/a?b=c"), "/a?b=c");
    }

    #[tokio::test]
    async fn non_target_requests_pass_through_untouched() {
        let interceptor = interceptor(None);
        let headers = vec![("accept".to_string(), "text/html".to_string())];
        let out = interceptor
            .rewrite("https://example.com/api2/thing", headers.clone())
            .await;
        assert_eq!(out, headers);
    }

    #[tokio::test]
    async fn api_requests_get_signed_headers() {
        let interceptor = interceptor(Some(Arc::new(StaticSigner::new(signed()))));
        let out = interceptor
            .rewrite("https://onlyfans.com/api2/v2/users/me", Vec::new())
            .await;

        assert_eq!(header(&out, "sign"), Some("sig:123"));
        assert_eq!(header(&out, "time"), Some("1724500000"));
        assert_eq!(header(&out, "app-token"), Some("signed-token"));
        assert_eq!(header(&out, "x-of-rev"), Some("r9"));
        assert_eq!(header(&out, "x-bc"), Some("fp-abc"));
        assert_eq!(header(&out, "user-agent"), Some("Mozilla/5.0 (test)"));
        assert_eq!(header(&out, "referer"), Some("https://onlyfans.com/"));
        assert_eq!(header(&out, "accept"), Some("application/json, text/plain, */*"));
        assert_eq!(header(&out, "sec-fetch-mode"), Some("cors"));
    }

    #[tokio::test]
    async fn never_adds_origin_or_user_id_even_on_fallback() {
        let interceptor = interceptor(Some(Arc::new(FailingSigner)));
        let out = interceptor
            .rewrite(
                "https://onlyfans.com/api2/v2/posts",
                vec![
                    ("Origin".to_string(), "https://onlyfans.com".to_string()),
                    ("X-User-Id".to_string(), "42".to_string()),
                ],
            )
            .await;

        assert_eq!(header(&out, "origin"), None);
        assert_eq!(header(&out, "x-user-id"), None);
        assert_eq!(header(&out, "user-id"), None);
        // Fallback path still carries identity and a token.
        assert_eq!(header(&out, "x-bc"), Some("fp-abc"));
        assert_eq!(header(&out, "app-token"), Some(crate::config::FALLBACK_APP_TOKEN));
        assert_eq!(header(&out, "sign"), None);
    }

    #[tokio::test]
    async fn caller_headers_are_never_overwritten() {
        let interceptor = interceptor(Some(Arc::new(StaticSigner::new(signed()))));
        let out = interceptor
            .rewrite(
                "https://onlyfans.com/api2/v2/users/me",
                vec![("accept".to_string(), "application/xml".to_string())],
            )
            .await;
        assert_eq!(header(&out, "accept"), Some("application/xml"));
    }

    #[tokio::test]
    async fn page_requests_only_get_identity_headers() {
        let interceptor = interceptor(Some(Arc::new(StaticSigner::new(signed()))));
        let out = interceptor
            .rewrite("https://onlyfans.com/my/profile", Vec::new())
            .await;
        assert_eq!(header(&out, "x-bc"), Some("fp-abc"));
        assert_eq!(header(&out, "sign"), None);
        assert_eq!(header(&out, "app-token"), None);
    }

    struct CountingSigner {
        calls: AtomicUsize,
        headers: SignedHeaders,
    }

    #[async_trait]
    impl HeaderSigner for CountingSigner {
        async fn sign(&self, _path: &str, _user_id: Option<&str>) -> Result<SignedHeaders> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.headers.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hits_within_ttl_and_refetches_after() {
        let signer = Arc::new(CountingSigner {
            calls: AtomicUsize::new(0),
            headers: signed(),
        });
        let interceptor = interceptor(Some(signer.clone()));

        let url = "https://onlyfans.com/api2/v2/users/me";
        interceptor.rewrite(url, Vec::new()).await;
        interceptor.rewrite(url, Vec::new()).await;
        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(interceptor.cached_entries(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        interceptor.rewrite(url, Vec::new()).await;
        assert_eq!(signer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_keys_include_user() {
        let cache = HeaderCache::new(Duration::from_secs(10));
        cache.store("/api2/a", "42", signed());
        assert!(cache.lookup("/api2/a", "42").is_some());
        assert!(cache.lookup("/api2/a", PUBLIC_USER).is_none());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn failed_signing_is_not_cached() {
        let interceptor = interceptor(Some(Arc::new(FailingSigner)));
        interceptor
            .rewrite("https://onlyfans.com/api2/v2/users/me", Vec::new())
            .await;
        assert_eq!(interceptor.cached_entries(), 0);
    }

    #[tokio::test]
    async fn no_signer_means_fallback_token() {
        let interceptor = interceptor(None);
        let out = interceptor
            .rewrite("https://onlyfans.com/api2/v2/users/me", Vec::new())
            .await;
        assert_eq!(header(&out, "app-token"), Some(crate::config::FALLBACK_APP_TOKEN));
    }
}
