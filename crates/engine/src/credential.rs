//! Captured-session credentials consumed by the engine.
//!
//! A [`SessionCredential`] is produced by the surrounding session store
//! (CRUD API, import sync, etc.) and is strictly read-only here: the
//! engine never mutates or persists it.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Everything captured from a real browser session that is needed to
/// replay it: the raw cookie blob, the device fingerprint, the user
/// agent, and the platform identifiers the target site expects to find
/// in client-side storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredential {
    /// Stable identifier; also the basis of the partition key.
    pub id: String,

    /// Raw `name=value;name=value` cookie string as captured.
    pub cookie_blob: String,

    /// Device fingerprint. Wins over any fingerprint cookie in the blob.
    pub fingerprint: String,

    /// User agent of the captured browser.
    #[serde(default)]
    pub user_agent: String,

    /// Numeric user id assigned by the target platform.
    #[serde(default)]
    pub platform_user_id: String,

    /// Account user id (usually the auth cookie subject).
    #[serde(default)]
    pub user_id: String,

    /// Human-readable name shown in the overlay badge.
    #[serde(default)]
    pub display_name: String,
}

impl SessionCredential {
    /// Checks the fields without which a replay cannot even start.
    ///
    /// Everything else is optional: a missing fingerprint or user agent
    /// degrades the impersonation but does not prevent it.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::InvalidCredential("missing id".into()));
        }
        if self.cookie_blob.trim().is_empty() {
            return Err(EngineError::InvalidCredential("missing cookie blob".into()));
        }
        Ok(())
    }

    /// Partition key for the isolated context seeded from this
    /// credential. One credential id always maps to the same partition.
    pub fn partition_key(&self) -> String {
        format!("persist:relive-{}", self.id)
    }

    /// User id for signing-call cache keys; `None` when unknown.
    pub fn signing_user(&self) -> Option<&str> {
        if self.user_id.trim().is_empty() {
            None
        } else {
            Some(self.user_id.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> SessionCredential {
        SessionCredential {
            id: "s1".into(),
            cookie_blob: "auth=abc".into(),
            fingerprint: "fp123".into(),
            ..Default::default()
        }
    }

    #[test]
    fn validate_accepts_minimal_credential() {
        assert!(credential().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_id() {
        let mut cred = credential();
        cred.id = "  ".into();
        assert!(matches!(
            cred.validate(),
            Err(EngineError::InvalidCredential(_))
        ));
    }

    #[test]
    fn validate_rejects_missing_cookie_blob() {
        let mut cred = credential();
        cred.cookie_blob = String::new();
        assert!(matches!(
            cred.validate(),
            Err(EngineError::InvalidCredential(_))
        ));
    }

    #[test]
    fn partition_key_is_stable_per_id() {
        assert_eq!(credential().partition_key(), "persist:relive-s1");
    }

    #[test]
    fn signing_user_empty_means_public() {
        let mut cred = credential();
        assert!(cred.signing_user().is_none());
        cred.user_id = "42".into();
        assert_eq!(cred.signing_user(), Some("42"));
    }

    #[test]
    fn deserializes_camel_case() {
        let cred: SessionCredential = serde_json::from_str(
            r#"{"id":"s1","cookieBlob":"a=b","fingerprint":"f","userAgent":"ua",
                "platformUserId":"7","userId":"42","displayName":"Jo"}"#,
        )
        .unwrap();
        assert_eq!(cred.cookie_blob, "a=b");
        assert_eq!(cred.platform_user_id, "7");
    }
}
