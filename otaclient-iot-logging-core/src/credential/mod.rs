//! The mTLS credential provider. Mints short-lived cloud
//! credentials from the IoT Core Credential Provider endpoint and caches
//! them until a safety margin before expiry, coalescing concurrent refresh
//! attempts into a single in-flight fetch.

pub mod aws_provide;
pub mod key_material;

use crate::error::CredentialError;
use crate::identity::DeviceIdentity;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use key_material::KeyMaterial;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;

/// Short-lived credentials minted by the IoT Credential Provider. Never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Public contract of the credential provider: obtain valid credentials,
/// letting the implementation decide whether to re-mint.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credentials(&self) -> Result<Credential, CredentialError>;
}

#[derive(Debug, Deserialize)]
struct CredentialResponseEnvelope {
    credentials: CredentialResponseBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialResponseBody {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: DateTime<Utc>,
}

/// Re-mint this many seconds before `expires_at`, so a client obtaining the
/// credential at the edge of validity still has headroom to use it.
const REFRESH_SAFETY_MARGIN: ChronoDuration = ChronoDuration::minutes(5);

const CREDENTIAL_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct IotCredentialProvider {
    client: reqwest::Client,
    refresh_url: String,
    thing_name: String,
    cache: Mutex<Option<Credential>>,
}

impl IotCredentialProvider {
    /// Builds the mTLS-configured HTTP client from the device identity's key
    /// material (file-based or PKCS#11-backed) and the refresh endpoint
    /// derived from it.
    pub fn new(identity: &DeviceIdentity, key_material: KeyMaterial) -> Result<Self, CredentialError> {
        let tls_config = key_material.build_client_tls_config()?;
        let client = reqwest::ClientBuilder::new()
            .use_preconfigured_tls(tls_config)
            .timeout(CREDENTIAL_FETCH_TIMEOUT)
            .build()
            .map_err(|err| CredentialError::TlsSetup(err.to_string()))?;

        Ok(Self {
            client,
            refresh_url: identity.refresh_url(),
            thing_name: identity.thing_name.clone(),
            cache: Mutex::new(None),
        })
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn fetch(&self) -> Result<Credential, CredentialError> {
        tracing::debug!(url = %self.refresh_url, "refreshing IoT credentials");

        let response = self
            .client
            .get(&self.refresh_url)
            .header("x-amzn-iot-thingname", &self.thing_name)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CredentialError::Timeout
                } else {
                    CredentialError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            // The response body may contain sensitive data and is
            // deliberately not included in the error.
            tracing::warn!(%status, "credential endpoint returned a non-2xx status");
            return Err(CredentialError::FetchFailed {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|err| CredentialError::Transport(err.to_string()))?;
        let envelope: CredentialResponseEnvelope = serde_json::from_str(&body)
            .map_err(|err| CredentialError::MalformedResponse(err.to_string()))?;

        Ok(Credential {
            access_key: envelope.credentials.access_key_id,
            secret_key: envelope.credentials.secret_access_key,
            session_token: envelope.credentials.session_token,
            expires_at: envelope.credentials.expiration,
        })
    }
}

#[async_trait]
impl CredentialProvider for IotCredentialProvider {
    async fn get_credentials(&self) -> Result<Credential, CredentialError> {
        // Holding the lock across the (possible) fetch coalesces concurrent
        // callers into a single in-flight refresh.
        let mut guard = self.cache.lock().await;

        if let Some(cached) = guard.as_ref() {
            if cached.expires_at - Utc::now() > REFRESH_SAFETY_MARGIN {
                return Ok(cached.clone());
            }
        }

        let fresh = self.fetch().await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_response_parses_camel_case_fields() {
        let raw = r#"{"credentials":{"accessKeyId":"AKIA","secretAccessKey":"secret","sessionToken":"token","expiration":"2026-07-29T12:00:00Z"}}"#;
        let parsed: CredentialResponseEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.credentials.access_key_id, "AKIA");
    }
}
