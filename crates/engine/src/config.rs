//! Engine configuration: the target-site profile and timing knobs.

use std::time::Duration;

use crate::driver::Viewport;

/// App token sent with API requests when the signing service yields
/// nothing. Captured from real client traffic.
pub const FALLBACK_APP_TOKEN: &str = "33d57ade8c02dbc5a333db99ff9ae26a";

/// Everything the engine knows about the impersonated site: where it
/// lives, which paths are API traffic, and the names it uses for the
/// fingerprint cookie, header, and storage keys.
///
/// The header policy encoded here (see [`crate::headers`]) is derived
/// from observed platform behavior, not from any published contract.
/// Flag any change against live traffic before shipping it.
#[derive(Debug, Clone)]
pub struct TargetProfile {
    /// Origin of the target site, no trailing slash.
    pub origin: String,

    /// Authenticated landing page loaded on open. Deliberately a
    /// protected page so a dead session fails fast instead of sitting
    /// on a public splash screen.
    pub landing_path: String,

    /// Path fragment that marks a request as API traffic.
    pub api_marker: String,

    /// Cookie that carries the device fingerprint in captured blobs.
    pub fingerprint_cookie: String,

    /// Request header that carries the device fingerprint.
    pub fingerprint_header: String,

    /// localStorage key the site reads the fingerprint from.
    pub fingerprint_storage_key: String,

    /// localStorage key for the platform user id.
    pub platform_user_storage_key: String,

    /// localStorage key for the account user id.
    pub user_storage_key: String,

    /// `Accept` value inserted on API requests when absent.
    pub api_accept: String,

    /// App token used when the signing service is unavailable.
    pub fallback_app_token: String,
}

impl TargetProfile {
    pub fn landing_url(&self) -> String {
        format!("{}{}", self.origin, self.landing_path)
    }

    /// True when `url` points at the target origin.
    pub fn is_target(&self, url: &str) -> bool {
        url.starts_with(&self.origin)
            && url[self.origin.len()..]
                .chars()
                .next()
                .map_or(true, |c| c == '/' || c == '?' || c == '#')
    }
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self {
            origin: "https://onlyfans.com".into(),
            landing_path: "/my/profile".into(),
            api_marker: "/api".into(),
            fingerprint_cookie: "fp".into(),
            fingerprint_header: "x-bc".into(),
            fingerprint_storage_key: "x-bc".into(),
            platform_user_storage_key: "platformUserId".into(),
            user_storage_key: "userId".into(),
            api_accept: "application/json, text/plain, */*".into(),
            fallback_app_token: FALLBACK_APP_TOKEN.into(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub profile: TargetProfile,

    /// Host viewport pushed to the context when it becomes visible.
    pub viewport: Viewport,

    /// How long an open attempt may take to reach `Visible` before it
    /// is torn down with a timeout error.
    pub load_timeout: Duration,

    /// How long a signed header tuple stays fresh in the cache.
    pub header_ttl: Duration,

    /// Installed cookie lifetime.
    pub cookie_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: TargetProfile::default(),
            viewport: Viewport {
                width: 1400,
                height: 900,
            },
            load_timeout: Duration::from_secs(30),
            header_ttl: Duration::from_secs(10),
            cookie_ttl: Duration::from_secs(365 * 24 * 60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landing_url_joins_origin_and_path() {
        let profile = TargetProfile::default();
        assert_eq!(profile.landing_url(), "https://onlyfans.com/my/profile");
    }

    #[test]
    fn is_target_requires_exact_origin() {
        let profile = TargetProfile::default();
        assert!(profile.is_target("https://onlyfans.com/api2/v2/users/me"));
        assert!(profile.is_target("https://onlyfans.com"));
        assert!(!profile.is_target("https://onlyfans.com.evil.example/"));
        assert!(!profile.is_target("https://example.com/"));
    }
}
