//! Typed errors for the core trust path. The application boundary (the
//! server binary) collapses these into `anyhow::Error` for reporting.

use thiserror::Error;

/// Identity/profile configuration failures. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path} as {dialect}: {source}")]
    Parse {
        path: String,
        dialect: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("required key {key} missing from {path}")]
    MissingKey { path: String, key: String },

    #[error("thing name {thing_name:?} does not match the expected profile-edge-id pattern")]
    ProfilePattern { thing_name: String },

    #[error("unknown profile {profile:?} in profile table {path}")]
    UnknownProfile { profile: String, path: String },

    #[error("pkcs11 reference used for {field} but no pkcs11 configuration was supplied")]
    MissingPkcs11Config { field: &'static str },

    #[error("invalid pkcs11 URI {uri:?}: {reason}")]
    InvalidPkcs11Uri { uri: String, reason: String },
}

/// Credential-provider failures.
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    /// Non-2xx from the credential endpoint. The response body is
    /// intentionally not captured here — it may contain sensitive data.
    #[error("credential endpoint returned status {status}")]
    FetchFailed { status: u16 },

    #[error("transport error reaching credential endpoint: {0}")]
    Transport(String),

    #[error("mTLS/PKCS#11 setup failed: {0}")]
    TlsSetup(String),

    #[error("credential response body could not be parsed: {0}")]
    MalformedResponse(String),

    #[error("credential fetch timed out")]
    Timeout,
}

impl CredentialError {
    /// Whether the error is worth retrying within the provider's own
    /// retry budget (transport and TLS-setup failures), as opposed to
    /// bubbling up immediately (authorization failures).
    pub fn is_retriable(&self) -> bool {
        match self {
            CredentialError::Transport(_)
            | CredentialError::TlsSetup(_)
            | CredentialError::Timeout => true,
            CredentialError::FetchFailed { status } => *status >= 500,
            CredentialError::MalformedResponse(_) => false,
        }
    }
}

/// Cloud log client failures.
#[derive(Debug, Error)]
pub enum CloudApiError {
    #[error("log group or stream {0} not found")]
    StreamNotFound(String),

    #[error("transient cloud API failure: {0}")]
    Transient(String),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("cloud API call failed: {0}")]
    Other(String),
}

impl CloudApiError {
    pub fn is_retriable(&self) -> bool {
        match self {
            CloudApiError::Transient(_) | CloudApiError::StreamNotFound(_) => true,
            CloudApiError::Credential(e) => e.is_retriable(),
            CloudApiError::Other(_) => false,
        }
    }
}
