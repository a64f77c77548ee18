//! The batcher/uploader. Runs on a dedicated OS thread (not the
//! shared async runtime) because it performs blocking-style calls to the
//! cloud log API; the queue is the only object shared across that boundary.

use crate::queue::QueueReceiver;
use otaclient_iot_logging_core::cloud::CloudLogClient;
use otaclient_iot_logging_core::{GroupType, LogMessage};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;

pub struct UploaderConfig {
    pub max_logs_per_merge: usize,
    pub upload_interval: Duration,
    pub thing_name: String,
    pub log_group: String,
    pub metrics_log_group: String,
}

/// Spawns the uploader on a dedicated OS thread with its own
/// current-thread tokio runtime, and returns its `JoinHandle`. `shutdown`
/// is watched between cycles and while sleeping; the uploader finishes its
/// current upload attempt before exiting.
pub fn spawn(
    config: UploaderConfig,
    cloud: CloudLogClient,
    mut queue: QueueReceiver,
    mut shutdown: watch::Receiver<bool>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("uploader".to_string())
        .spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build uploader runtime");
            rt.block_on(run(config, cloud, &mut queue, &mut shutdown));
        })
        .expect("failed to spawn uploader thread")
}

async fn run(
    config: UploaderConfig,
    cloud: CloudLogClient,
    queue: &mut QueueReceiver,
    shutdown: &mut watch::Receiver<bool>,
) {
    if let Err(err) = initialize_log_groups(&config, &cloud).await {
        tracing::error!(?err, "failed to initialize remote log groups");
    }

    loop {
        let batches = drain_into_batches(queue, config.max_logs_per_merge);
        for ((group_type, stream_suffix), messages) in batches {
            upload_one_batch(&config, &cloud, group_type, &stream_suffix, messages).await;
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("uploader observed shutdown signal, exiting");
                    return;
                }
            }
            _ = tokio::time::sleep(config.upload_interval) => {}
        }
    }
}

/// Ensures both the log group and metrics group exist at startup. Retries
/// are driven entirely by the cloud client's own policy.
async fn initialize_log_groups(config: &UploaderConfig, cloud: &CloudLogClient) -> anyhow::Result<()> {
    cloud.create_log_group(&config.log_group).await?;
    cloud.create_log_group(&config.metrics_log_group).await?;
    Ok(())
}

/// Drains up to `N = min(max_logs_per_merge, MAX_LOGS_PER_PUT)` records,
/// grouping by `(group_type, stream_suffix)` while preserving per-key
/// insertion order.
fn drain_into_batches(
    queue: &mut QueueReceiver,
    max_logs_per_merge: usize,
) -> HashMap<(GroupType, String), Vec<LogMessage>> {
    let cap = max_logs_per_merge.min(otaclient_iot_logging_core::model::MAX_LOGS_PER_PUT);
    let mut batches: HashMap<(GroupType, String), Vec<LogMessage>> = HashMap::new();
    for record in queue.drain_up_to(cap) {
        batches
            .entry((record.group_type, record.stream_suffix))
            .or_default()
            .push(record.message);
    }
    batches
}

async fn upload_one_batch(
    config: &UploaderConfig,
    cloud: &CloudLogClient,
    group_type: GroupType,
    stream_suffix: &str,
    messages: Vec<LogMessage>,
) {
    let group = match group_type {
        GroupType::Log => &config.log_group,
        GroupType::Metrics => &config.metrics_log_group,
    };
    let stream_name =
        otaclient_iot_logging_core::StreamName::compose(&config.thing_name, stream_suffix, chrono::Utc::now());

    // A single bad batch must not kill the loop: log and move on.
    if let Err(err) = cloud
        .put_log_events(group, stream_name.as_str(), &messages)
        .await
    {
        tracing::error!(?err, group, stream = %stream_name, "failed to upload log batch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::bounded_queue;
    use otaclient_iot_logging_core::QueueRecord;

    #[test]
    fn drains_cap_at_max_logs_per_put_ceiling() {
        let (tx, mut rx) = bounded_queue(20_000);
        for n in 0..15_000 {
            let _ = tx.try_enqueue(QueueRecord::new(
                GroupType::Log,
                "ecu-1",
                LogMessage::new(n, "m"),
            ));
        }
        let batches = drain_into_batches(&mut rx, 20_000);
        let total: usize = batches.values().map(Vec::len).sum();
        assert!(total <= otaclient_iot_logging_core::model::MAX_LOGS_PER_PUT);
    }

    #[test]
    fn groups_by_group_type_and_stream_suffix_preserving_order() {
        let (tx, mut rx) = bounded_queue(10);
        tx.try_enqueue(QueueRecord::new(GroupType::Log, "ecu-1", LogMessage::new(1, "a")))
            .unwrap();
        tx.try_enqueue(QueueRecord::new(GroupType::Log, "ecu-1", LogMessage::new(2, "b")))
            .unwrap();
        tx.try_enqueue(QueueRecord::new(GroupType::Metrics, "ecu-1", LogMessage::new(3, "c")))
            .unwrap();

        let batches = drain_into_batches(&mut rx, 10);
        assert_eq!(batches.len(), 2);
        let log_batch = &batches[&(GroupType::Log, "ecu-1".to_string())];
        assert_eq!(log_batch[0].message, "a");
        assert_eq!(log_batch[1].message, "b");
    }
}
