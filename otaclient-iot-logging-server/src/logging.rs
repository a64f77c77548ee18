//! Logger wiring. A standard `tracing-subscriber` registry,
//! plus an optional tee layer that forwards formatted events onto the same
//! queue the ingress handlers use, so the server's own logs can ride the
//! remote upload path.

use crate::queue::QueueSender;
use otaclient_iot_logging_core::{GroupType, LogMessage, QueueRecord};
use std::fmt::Write as _;
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Installs the global subscriber. When `tee` is `Some`, server log events
/// are additionally enqueued under the given stream suffix; enqueue
/// failures are silently dropped — logging must never itself apply
/// back-pressure to the process being logged.
pub fn init(tee: Option<(QueueSender, String)>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("{}=info,tower_http=info", env!("CARGO_CRATE_NAME")).into()
    });

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    match tee {
        Some((queue, stream_suffix)) => registry
            .with(UploadTeeLayer { queue, stream_suffix })
            .init(),
        None => registry.init(),
    }
}

/// Formats each event as a single line and offers it to the log queue
/// under `GroupType::Log`. Never blocks and never panics on a full queue.
struct UploadTeeLayer {
    queue: QueueSender,
    stream_suffix: String,
}

impl<S> Layer<S> for UploadTeeLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut line = String::new();
        let mut visitor = MessageVisitor(&mut line);
        event.record(&mut visitor);
        if line.is_empty() {
            return;
        }

        let record = QueueRecord::new(
            GroupType::Log,
            self.stream_suffix.clone(),
            LogMessage::new(LogMessage::now_ms(), line),
        );
        let _ = self.queue.try_enqueue(record);
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.0, "{value:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::bounded_queue;

    #[test]
    fn tee_layer_enqueues_formatted_message() {
        let (tx, mut rx) = bounded_queue(4);
        let layer = UploadTeeLayer {
            queue: tx,
            stream_suffix: "server".to_string(),
        };
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("hello from the server");
        });

        let drained = rx.drain_up_to(1);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].stream_suffix, "server");
        assert!(drained[0].message.message.contains("hello from the server"));
    }
}
