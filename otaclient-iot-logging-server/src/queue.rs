//! The bounded, lossy-on-overflow MPSC queue shared between all
//! ingress handlers (writers) and the single uploader (reader).

use otaclient_iot_logging_core::QueueRecord;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// The producer side. Non-blocking: on a full queue the record is dropped
/// and the caller observes back-pressure via `QueueFull`.
#[derive(Clone)]
pub struct QueueSender(mpsc::Sender<QueueRecord>);

impl QueueSender {
    pub fn try_enqueue(&self, record: QueueRecord) -> Result<(), QueueFull> {
        self.0.try_send(record).map_err(|_| QueueFull)
    }
}

/// The single consumer side, owned exclusively by the uploader.
pub struct QueueReceiver(mpsc::Receiver<QueueRecord>);

impl QueueReceiver {
    /// Drains up to `max` records without blocking, stopping early once the
    /// queue is empty.
    pub fn drain_up_to(&mut self, max: usize) -> Vec<QueueRecord> {
        let mut drained = Vec::with_capacity(max.min(256));
        while drained.len() < max {
            match self.0.try_recv() {
                Ok(record) => drained.push(record),
                Err(_) => break,
            }
        }
        drained
    }
}

/// Builds the bounded queue with capacity `MAX_LOGS_BACKLOG`.
pub fn bounded_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueSender(tx), QueueReceiver(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use otaclient_iot_logging_core::{GroupType, LogMessage};

    fn record(n: i64) -> QueueRecord {
        QueueRecord::new(GroupType::Log, "ecu-1", LogMessage::new(n, format!("msg-{n}")))
    }

    #[test]
    fn overflow_drops_the_record_and_reports_back_pressure() {
        let (tx, mut rx) = bounded_queue(2);
        assert!(tx.try_enqueue(record(1)).is_ok());
        assert!(tx.try_enqueue(record(2)).is_ok());
        assert_eq!(tx.try_enqueue(record(3)), Err(QueueFull));

        let drained = rx.drain_up_to(10);
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn drain_preserves_fifo_order_and_stops_at_cap() {
        let (tx, mut rx) = bounded_queue(10);
        for n in 1..=5 {
            tx.try_enqueue(record(n)).unwrap();
        }
        let drained = rx.drain_up_to(3);
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].message.timestamp_ms, 1);
        assert_eq!(drained[2].message.timestamp_ms, 3);

        let rest = rx.drain_up_to(10);
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn drain_stops_early_when_queue_empties() {
        let (tx, mut rx) = bounded_queue(10);
        tx.try_enqueue(record(1)).unwrap();
        let drained = rx.drain_up_to(100);
        assert_eq!(drained.len(), 1);
    }
}
