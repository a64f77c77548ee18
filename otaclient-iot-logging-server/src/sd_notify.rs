//! Best-effort systemd readiness notification.

use std::time::Duration;

/// Roughly 2 seconds after the ingress listeners are bound, send `READY=1`
/// to `$NOTIFY_SOCKET` if set. Failures are logged and otherwise ignored —
/// this must never affect server operation.
pub async fn notify_ready_after_delay() {
    tokio::time::sleep(Duration::from_secs(2)).await;
    notify_ready();
}

fn notify_ready() {
    match sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        Ok(()) => tracing::debug!("sent systemd readiness notification"),
        Err(err) => tracing::warn!(?err, "failed to send systemd readiness notification"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_ready_never_panics_without_notify_socket() {
        notify_ready();
    }
}
