// Cookie types handed to the browser driver when seeding a partition.

use serde::{Deserialize, Serialize};

/// SameSite cookie attribute.
///
/// Replayed cookies use [`SameSite::None`] so the target's cross-site
/// API calls still carry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
    /// Cookie is sent with same-site and cross-site requests
    #[serde(rename = "None")]
    None,
    /// Cookie is sent with same-site requests and cross-site top-level navigations
    #[default]
    #[serde(rename = "Lax")]
    Lax,
    /// Cookie is only sent with same-site requests
    #[serde(rename = "Strict")]
    Strict,
}

/// A cookie to install into an isolated context's cookie store.
///
/// The domain is always inferred from `url` rather than pinned
/// explicitly; the browser picks the host-only form the site expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,

    /// URL to infer domain and path from.
    pub url: String,

    /// Path for the cookie (default: "/")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Unix timestamp in seconds. `None` means session cookie.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSite>,
}

impl Cookie {
    /// Creates a cookie whose domain and path are inferred from `url`.
    pub fn for_url(
        name: impl Into<String>,
        value: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            url: url.into(),
            path: None,
            expires: None,
            http_only: None,
            secure: None,
            same_site: None,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the expiration timestamp (Unix seconds).
    pub fn expires(mut self, expires: f64) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = Some(http_only);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }
}
