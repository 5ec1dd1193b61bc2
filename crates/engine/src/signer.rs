//! Client for the external header-signing service.
//!
//! The service is a black box: it takes an API path and an optional
//! user id and returns the dynamic header tuple the target site expects
//! on signed requests. It is strictly best-effort — when it is down the
//! interceptor falls back to static headers and the request still goes
//! out.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Dynamic header tuple returned by the signing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedHeaders {
    pub sign: String,
    pub time: u64,
    pub app_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    endpoint: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
}

/// Produces signed header tuples for `(path, user)` pairs.
#[async_trait]
pub trait HeaderSigner: Send + Sync {
    async fn sign(&self, path: &str, user_id: Option<&str>) -> Result<SignedHeaders>;
}

/// [`HeaderSigner`] backed by an HTTP endpoint.
pub struct HttpSigner {
    client: reqwest::Client,
    url: String,
}

impl HttpSigner {
    /// Signing calls delay requests but must never stall them, so the
    /// internal timeout is short.
    const TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Self::TIMEOUT)
            .build()
            .map_err(|e| EngineError::SigningServiceUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl HeaderSigner for HttpSigner {
    async fn sign(&self, path: &str, user_id: Option<&str>) -> Result<SignedHeaders> {
        let request = SignRequest {
            endpoint: path,
            user_id,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::SigningServiceUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| EngineError::SigningServiceUnavailable(e.to_string()))?;

        response
            .json::<SignedHeaders>()
            .await
            .map_err(|e| EngineError::SigningServiceUnavailable(e.to_string()))
    }
}
