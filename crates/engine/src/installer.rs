//! Seeding a partition's cookie store from a captured cookie blob.
//!
//! This is the first phase of an open attempt: before any navigation,
//! every cookie captured from the real session is installed into the
//! isolated partition, with the device fingerprint cookie pinned to the
//! credential's current fingerprint value.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::cookie::{Cookie, SameSite};
use crate::credential::SessionCredential;
use crate::driver::BrowserDriver;
use crate::error::{EngineError, Result};

/// Parses a raw `name=value; name=value` blob into `(name, value)`
/// pairs. Order is preserved; a name repeated later in the blob wins
/// and replaces the earlier entry in place. Fragments without both a
/// name and a value are dropped with a warning.
pub fn parse_cookie_blob(blob: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for fragment in blob.split(';') {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }
        let Some(eq) = fragment.find('=') else {
            warn!(target: "relive.installer", fragment, "dropping cookie fragment without '='");
            continue;
        };
        let name = fragment[..eq].trim();
        let value = fragment[eq + 1..].trim();
        if name.is_empty() || value.is_empty() {
            warn!(target: "relive.installer", fragment, "dropping cookie fragment without name or value");
            continue;
        }
        match pairs.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value.to_string(),
            None => pairs.push((name.to_string(), value.to_string())),
        }
    }
    pairs
}

/// Installs a credential's cookies into a partition.
pub struct CredentialInstaller<'a> {
    driver: &'a dyn BrowserDriver,
    config: &'a EngineConfig,
}

impl<'a> CredentialInstaller<'a> {
    pub fn new(driver: &'a dyn BrowserDriver, config: &'a EngineConfig) -> Self {
        Self { driver, config }
    }

    /// Builds the cookie set for `credential`: the parsed blob with the
    /// fingerprint cookie forced to the credential's fingerprint. The
    /// fingerprint cookie is appended when the blob never carried one.
    pub fn cookies_for(&self, credential: &SessionCredential) -> Vec<Cookie> {
        let profile = &self.config.profile;
        let mut pairs = parse_cookie_blob(&credential.cookie_blob);

        if !credential.fingerprint.is_empty() {
            match pairs.iter_mut().find(|(n, _)| n == &profile.fingerprint_cookie) {
                Some(existing) => existing.1 = credential.fingerprint.clone(),
                None => pairs.push((
                    profile.fingerprint_cookie.clone(),
                    credential.fingerprint.clone(),
                )),
            }
        }

        let expires = unix_now() + self.config.cookie_ttl.as_secs_f64();
        pairs
            .into_iter()
            .map(|(name, value)| {
                Cookie::for_url(name, value, &profile.origin)
                    .path("/")
                    .expires(expires)
                    .http_only(false)
                    .secure(true)
                    .same_site(SameSite::None)
            })
            .collect()
    }

    /// Installs all cookies for `credential` into `partition`.
    ///
    /// Individual installs may fail (malformed values, store limits);
    /// those are logged and skipped. When more than half fail the
    /// session is considered unreplayable: the partition's storage is
    /// cleared again and the whole install fails.
    pub async fn install(
        &self,
        partition: &str,
        credential: &SessionCredential,
    ) -> Result<usize> {
        let cookies = self.cookies_for(credential);
        if cookies.is_empty() {
            return Err(EngineError::InvalidCredential(
                "cookie blob parsed to zero cookies".into(),
            ));
        }

        let total = cookies.len();
        let mut failed = 0usize;
        for cookie in cookies {
            let name = cookie.name.clone();
            if let Err(err) = self.driver.set_cookie(partition, cookie).await {
                failed += 1;
                warn!(
                    target: "relive.installer",
                    partition,
                    cookie = %name,
                    error = %err,
                    "cookie install failed"
                );
            }
        }

        if failed * 2 > total {
            if let Err(err) = self.driver.clear_storage(partition).await {
                warn!(
                    target: "relive.installer",
                    partition,
                    error = %err,
                    "storage rollback after install failure"
                );
            }
            return Err(EngineError::CredentialInstallFailure { failed, total });
        }

        debug!(
            target: "relive.installer",
            partition,
            installed = total - failed,
            failed,
            "cookies installed"
        );

        // Diagnostic read-back: a missing fingerprint cookie here means
        // the replay will look like a new device to the site.
        let fp_name = &self.config.profile.fingerprint_cookie;
        match self.driver.cookie_value(partition, fp_name).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(target: "relive.installer", partition, cookie = %fp_name, "fingerprint cookie absent after install");
            }
            Err(err) => {
                debug!(target: "relive.installer", partition, error = %err, "fingerprint read-back failed");
            }
        }
        Ok(total - failed)
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;

    fn credential(blob: &str, fingerprint: &str) -> SessionCredential {
        SessionCredential {
            id: "s1".into(),
            cookie_blob: blob.into(),
            fingerprint: fingerprint.into(),
            ..Default::default()
        }
    }

    #[test]
    fn parse_handles_whitespace_and_empties() {
        let pairs = parse_cookie_blob(" auth=abc ;; fp=x ; broken ; =nameless ; st=v=w ");
        assert_eq!(
            pairs,
            vec![
                ("auth".to_string(), "abc".to_string()),
                ("fp".to_string(), "x".to_string()),
                ("st".to_string(), "v=w".to_string()),
            ]
        );
    }

    #[test]
    fn parse_drops_fragments_with_empty_values() {
        assert_eq!(
            parse_cookie_blob("auth=;fp=x"),
            vec![("fp".to_string(), "x".to_string())]
        );
        assert!(parse_cookie_blob("a=;b= ;=c").is_empty());
    }

    #[test]
    fn parse_dedups_last_value_wins() {
        let pairs = parse_cookie_blob("a=1;b=2;a=3");
        assert_eq!(
            pairs,
            vec![("a".to_string(), "3".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn fingerprint_cookie_is_forced_to_credential_value() {
        let config = EngineConfig::default();
        let driver = MockDriver::new();
        let installer = CredentialInstaller::new(&driver, &config);

        let cookies = installer.cookies_for(&credential("fp=OLD;auth=abc", "NEW123"));
        let fp = cookies.iter().find(|c| c.name == "fp").unwrap();
        assert_eq!(fp.value, "NEW123");
    }

    #[test]
    fn fingerprint_cookie_is_appended_when_absent() {
        let config = EngineConfig::default();
        let driver = MockDriver::new();
        let installer = CredentialInstaller::new(&driver, &config);

        let cookies = installer.cookies_for(&credential("auth=abc", "NEW123"));
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[1].name, "fp");
        assert_eq!(cookies[1].value, "NEW123");
    }

    #[test]
    fn cookies_target_the_origin_with_long_expiry() {
        let config = EngineConfig::default();
        let driver = MockDriver::new();
        let installer = CredentialInstaller::new(&driver, &config);

        let cookies = installer.cookies_for(&credential("auth=abc", ""));
        let cookie = &cookies[0];
        assert_eq!(cookie.url, "https://onlyfans.com");
        assert_eq!(cookie.same_site, Some(SameSite::None));
        assert!(cookie.expires.unwrap() > unix_now());
    }

    #[tokio::test]
    async fn install_writes_all_cookies() {
        let config = EngineConfig::default();
        let driver = MockDriver::new();
        driver.create_context("p").await.unwrap();
        let installer = CredentialInstaller::new(&driver, &config);

        let installed = installer
            .install("p", &credential("auth=abc;sess=def", "fpv"))
            .await
            .unwrap();
        assert_eq!(installed, 3);
        assert_eq!(
            driver.cookie_value("p", "fp").await.unwrap().as_deref(),
            Some("fpv")
        );
    }

    #[tokio::test]
    async fn empty_blob_is_rejected_before_touching_the_driver() {
        let config = EngineConfig::default();
        let driver = MockDriver::new();
        let installer = CredentialInstaller::new(&driver, &config);

        let err = installer
            .install("p", &credential(" ; ; ", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn majority_failures_roll_back_and_error() {
        let config = EngineConfig::default();
        let driver = MockDriver::new();
        driver.create_context("p").await.unwrap();
        driver.fail_cookies_matching("bad");
        let installer = CredentialInstaller::new(&driver, &config);

        let err = installer
            .install("p", &credential("bad1=x;bad2=y;auth=abc", ""))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::CredentialInstallFailure { failed: 2, total: 3 }
        ));
        assert!(driver.storage_cleared("p"));
    }

    #[tokio::test]
    async fn minority_failures_are_tolerated() {
        let config = EngineConfig::default();
        let driver = MockDriver::new();
        driver.create_context("p").await.unwrap();
        driver.fail_cookies_matching("bad");
        let installer = CredentialInstaller::new(&driver, &config);

        let installed = installer
            .install("p", &credential("bad1=x;auth=abc;sess=def", ""))
            .await
            .unwrap();
        assert_eq!(installed, 2);
        assert!(!driver.storage_cleared("p"));
    }
}
