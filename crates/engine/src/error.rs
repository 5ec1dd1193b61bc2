use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A required credential field was missing. Surfaced before any
    /// context is created.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// More than half of the cookie installs failed; the partition has
    /// been cleared and no navigation was attempted.
    #[error("cookie install failed for {failed} of {total} cookies")]
    CredentialInstallFailure { failed: usize, total: usize },

    #[error("context load timed out after {ms}ms")]
    LoadTimeout { ms: u64 },

    #[error("context load failed: {0}")]
    LoadFailure(String),

    /// The header-signing service could not be reached or returned no
    /// data. Recoverable: callers fall back to static headers.
    #[error("signing service unavailable: {0}")]
    SigningServiceUnavailable(String),

    #[error("no active browsing context")]
    NoActiveContext,

    #[error("browser driver error: {0}")]
    Driver(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Errors that must tear the context down and surface to the caller.
    /// Everything else is best-effort and only logged.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::SigningServiceUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_failures_are_recoverable() {
        assert!(!EngineError::SigningServiceUnavailable("down".into()).is_fatal());
        assert!(EngineError::LoadTimeout { ms: 30_000 }.is_fatal());
        assert!(
            EngineError::CredentialInstallFailure {
                failed: 3,
                total: 4
            }
            .is_fatal()
        );
    }

    #[test]
    fn install_failure_message_includes_counts() {
        let err = EngineError::CredentialInstallFailure {
            failed: 5,
            total: 8,
        };
        assert_eq!(err.to_string(), "cookie install failed for 5 of 8 cookies");
    }
}
