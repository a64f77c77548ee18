//! Bridges our [`CredentialProvider`] into the AWS SDK's
//! `ProvideCredentials` trait, so the cloud log client gets SigV4 signing
//! for free.

use super::{Credential, CredentialProvider};
use aws_credential_types::provider::{self, error::CredentialsError, future};
use aws_credential_types::Credentials;
use std::sync::Arc;

/// Adapts an `Arc<dyn CredentialProvider>` so `aws-sdk-cloudwatchlogs`
/// clients can use it directly as their credentials source.
#[derive(Clone)]
pub struct SdkCredentialProvider {
    inner: Arc<dyn CredentialProvider>,
}

impl SdkCredentialProvider {
    pub fn new(inner: Arc<dyn CredentialProvider>) -> Self {
        Self { inner }
    }

    async fn fetch(&self) -> provider::Result {
        // Pass the typed error through rather than stringifying it, so
        // `classify_error` can downcast it back out of the SDK's
        // `ConstructionFailure` wrapper and judge retriability correctly.
        let credential = self
            .inner
            .get_credentials()
            .await
            .map_err(CredentialsError::provider_error)?;
        Ok(to_sdk_credentials(credential))
    }
}

impl provider::ProvideCredentials for SdkCredentialProvider {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::new(self.fetch())
    }
}

fn to_sdk_credentials(credential: Credential) -> Credentials {
    Credentials::new(
        credential.access_key,
        credential.secret_key,
        Some(credential.session_token),
        Some(credential.expires_at.into()),
        "otaclient-iot-logging-server",
    )
}
