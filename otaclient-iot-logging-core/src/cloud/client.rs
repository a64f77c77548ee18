//! Thin wrapper around `aws-sdk-cloudwatchlogs`, adding idempotent create
//! semantics and the fixed retry discipline from [`crate::retry`].

use crate::credential::aws_provide::SdkCredentialProvider;
use crate::credential::CredentialProvider;
use crate::error::{CloudApiError, CredentialError};
use crate::model::LogMessage;
use crate::retry::{retry_with_backoff, CREATE_RETRY_POLICY, PUT_EVENTS_RETRY_POLICY};
use aws_sdk_cloudwatchlogs::error::SdkError;
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use aws_sdk_cloudwatchlogs::Client;
use std::sync::Arc;

pub struct CloudLogClient {
    client: Client,
}

impl CloudLogClient {
    pub async fn new(region: String, credential_provider: Arc<dyn CredentialProvider>) -> Self {
        let sdk_credentials = SdkCredentialProvider::new(credential_provider);
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region))
            .credentials_provider(sdk_credentials)
            .load()
            .await;
        Self {
            client: Client::new(&config),
        }
    }

    /// `CreateLogGroup` is treated as idempotent: `ResourceAlreadyExists` is
    /// success.
    pub async fn create_log_group(&self, name: &str) -> Result<(), CloudApiError> {
        retry_with_backoff(CREATE_RETRY_POLICY, CloudApiError::is_retriable, || async {
            match self.client.create_log_group().log_group_name(name).send().await {
                Ok(_) => Ok(()),
                Err(err) if is_resource_already_exists(&err) => Ok(()),
                Err(err) => Err(classify_error(err)),
            }
        })
        .await
    }

    /// `CreateLogStream` is treated as idempotent similarly.
    pub async fn create_log_stream(&self, group: &str, name: &str) -> Result<(), CloudApiError> {
        retry_with_backoff(CREATE_RETRY_POLICY, CloudApiError::is_retriable, || async {
            match self
                .client
                .create_log_stream()
                .log_group_name(group)
                .log_stream_name(name)
                .send()
                .await
            {
                Ok(_) => Ok(()),
                Err(err) if is_resource_already_exists(&err) => Ok(()),
                Err(err) => Err(classify_error(err)),
            }
        })
        .await
    }

    /// `ResourceNotFound` for the stream triggers a single
    /// `create_log_stream` then a retry, within the same retry budget.
    /// `sequenceToken` is intentionally never tracked.
    pub async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogMessage],
    ) -> Result<(), CloudApiError> {
        let input_events: Vec<InputLogEvent> = events
            .iter()
            .map(|m| {
                InputLogEvent::builder()
                    .timestamp(m.timestamp_ms)
                    .message(render_message(m))
                    .build()
                    .map_err(|err| CloudApiError::Other(err.to_string()))
            })
            .collect::<Result<_, _>>()?;

        retry_with_backoff(PUT_EVENTS_RETRY_POLICY, CloudApiError::is_retriable, || async {
            let result = self
                .client
                .put_log_events()
                .log_group_name(group)
                .log_stream_name(stream)
                .set_log_events(Some(input_events.clone()))
                .send()
                .await;

            match result {
                Ok(_) => Ok(()),
                Err(err) if is_resource_not_found(&err) => {
                    tracing::warn!(group, stream, "log stream missing, creating before retry");
                    self.create_log_stream(group, stream).await?;
                    Err(CloudApiError::StreamNotFound(stream.to_string()))
                }
                Err(err) => Err(classify_error(err)),
            }
        })
        .await
    }
}

/// `level` has no dedicated field on the remote API's log event; it rides
/// along as an opaque prefix rather than being dropped.
fn render_message(message: &LogMessage) -> String {
    match message.level {
        Some(level) => format!("[level={level}] {}", message.message),
        None => message.message.clone(),
    }
}

fn is_resource_already_exists<E, R>(err: &SdkError<E, R>) -> bool
where
    E: std::error::Error + 'static,
{
    err.as_service_error()
        .map(|e| format!("{e}").contains("ResourceAlreadyExists"))
        .unwrap_or(false)
}

fn is_resource_not_found<E, R>(err: &SdkError<E, R>) -> bool
where
    E: std::error::Error + 'static,
{
    err.as_service_error()
        .map(|e| format!("{e}").contains("ResourceNotFound"))
        .unwrap_or(false)
}

fn classify_error<E, R>(err: SdkError<E, R>) -> CloudApiError
where
    E: std::error::Error + 'static,
{
    // A credential-provider failure surfaces here as `ConstructionFailure`
    // with our `CredentialError` buried in the source chain (see
    // `SdkCredentialProvider::fetch`); recover it so retriability is judged
    // by the credential error itself rather than defaulting to `Other`.
    if let Some(credential_err) = find_credential_error(&err) {
        return CloudApiError::Credential(credential_err);
    }

    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            CloudApiError::Transient(err.to_string())
        }
        SdkError::ResponseError(resp) => {
            if resp.raw().status().is_server_error() {
                CloudApiError::Transient(err.to_string())
            } else {
                CloudApiError::Other(err.to_string())
            }
        }
        SdkError::ServiceError(ctx) => {
            if ctx.raw().status().is_server_error() {
                CloudApiError::Transient(err.to_string())
            } else {
                CloudApiError::Other(err.to_string())
            }
        }
        _ => CloudApiError::Other(err.to_string()),
    }
}

fn find_credential_error<E, R>(err: &SdkError<E, R>) -> Option<CredentialError>
where
    E: std::error::Error + 'static,
{
    let mut source = std::error::Error::source(err);
    while let Some(current) = source {
        if let Some(credential_err) = current.downcast_ref::<CredentialError>() {
            return Some(credential_err.clone());
        }
        source = current.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_message_prefixes_level_when_set() {
        let message = LogMessage::with_level(1, 3, "disk low");
        assert_eq!(render_message(&message), "[level=3] disk low");
    }

    #[test]
    fn render_message_passes_through_without_level() {
        let message = LogMessage::new(1, "disk low");
        assert_eq!(render_message(&message), "disk low");
    }
}
