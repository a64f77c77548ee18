//! Core trust-path library for the log-forwarding proxy: device-identity
//! parsing, the mTLS credential provider, and the retrying cloud log client.

pub mod cloud;
pub mod credential;
pub mod error;
pub mod identity;
pub mod model;
pub mod retry;

pub use error::{CloudApiError, ConfigError, CredentialError};
pub use model::{GroupType, LogMessage, QueueRecord, StreamName};
