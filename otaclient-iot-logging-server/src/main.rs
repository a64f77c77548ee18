mod config;
mod config_file_monitor;
mod grpc;
mod http;
mod logging;
mod queue;
mod sd_notify;
mod uploader;

use anyhow::Context;
use config::ServerConfig;
use otaclient_iot_logging_core::credential::key_material::KeyMaterial;
use otaclient_iot_logging_core::credential::{CredentialProvider, IotCredentialProvider};
use otaclient_iot_logging_core::identity::{self, AllowedEcus, ProfileTable};
use otaclient_iot_logging_proto::ota_client_iot_logging_service_server::OtaClientIotLoggingServiceServer;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse().context("loading server configuration")?;
    let (queue_tx, queue_rx) = queue::bounded_queue(config.max_logs_backlog);

    logging::init(tee_target(&config, &queue_tx));

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("a default rustls crypto provider is already installed"))?;

    let profile_table =
        ProfileTable::load(Path::new(&config.aws_profile_info)).context("loading profile table")?;
    let identity = identity::load_identity(
        Path::new(&config.greengrass_v1_config),
        Path::new(&config.greengrass_v2_config),
        &profile_table,
    )
    .context("loading device identity")?;

    let ecu_info = config
        .ecu_info_yaml
        .as_deref()
        .and_then(|path| identity::ecu::parse_ecu_info(Path::new(path)));
    let allowed_ecus = AllowedEcus::from_ecu_info(ecu_info.as_ref());

    let key_material = KeyMaterial::from_identity(&identity)?;
    let credential_provider: Arc<dyn CredentialProvider> =
        Arc::new(IotCredentialProvider::new(&identity, key_material)?);
    let cloud = otaclient_iot_logging_core::cloud::CloudLogClient::new(
        identity.region.clone(),
        credential_provider,
    )
    .await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let uploader_handle = uploader::spawn(
        uploader::UploaderConfig {
            max_logs_per_merge: config.max_logs_per_merge,
            upload_interval: Duration::from_secs(config.upload_interval),
            thing_name: identity.thing_name.clone(),
            log_group: identity.log_group(),
            metrics_log_group: identity.metrics_log_group(),
        },
        cloud,
        queue_rx,
        shutdown_rx.clone(),
    );

    let http_state = Arc::new(http::HttpState {
        queue: queue_tx.clone(),
        allowed_ecus: allowed_ecus.clone(),
    });
    let http_router = http::router(http_state);
    let http_listener = tokio::net::TcpListener::bind(config.http_bind_addr())
        .await
        .with_context(|| format!("binding HTTP listener on {}", config.http_bind_addr()))?;
    tracing::info!(addr = %config.http_bind_addr(), "HTTP ingress listening");

    let grpc_service = grpc::GrpcService::new(queue_tx, allowed_ecus);
    let grpc_addr = config
        .grpc_bind_addr()
        .parse()
        .context("parsing gRPC bind address")?;
    tracing::info!(addr = %config.grpc_bind_addr(), "gRPC ingress listening");

    monitor_config_files(&config);
    tokio::spawn(sd_notify::notify_ready_after_delay());

    let mut http_shutdown = shutdown_rx.clone();
    let http_server = axum::serve(http_listener, http_router).with_graceful_shutdown(async move {
        let _ = http_shutdown.changed().await;
    });

    let mut grpc_shutdown = shutdown_rx;
    let grpc_server = tonic::transport::Server::builder()
        .add_service(OtaClientIotLoggingServiceServer::new(grpc_service))
        .serve_with_shutdown(grpc_addr, async move {
            let _ = grpc_shutdown.changed().await;
        });

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, notifying workers");
        let _ = shutdown_tx.send(true);
    });

    let (http_result, grpc_result) = tokio::join!(http_server, grpc_server);
    http_result.context("HTTP server error")?;
    grpc_result.context("gRPC server error")?;

    tokio::task::spawn_blocking(move || {
        if uploader_handle.join().is_err() {
            tracing::error!("uploader thread panicked during shutdown");
        }
    })
    .await
    .context("waiting for uploader thread to exit")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn monitor_config_files(config: &ServerConfig) {
    let v1_path = std::path::PathBuf::from(&config.greengrass_v1_config);
    let v2_path = std::path::PathBuf::from(&config.greengrass_v2_config);
    let active_identity_path = identity::active_identity_path(&v1_path, &v2_path).to_path_buf();

    let mut paths = vec![
        active_identity_path,
        std::path::PathBuf::from(&config.aws_profile_info),
    ];
    if let Some(ecu_info) = &config.ecu_info_yaml {
        paths.push(std::path::PathBuf::from(ecu_info));
    }
    config_file_monitor::spawn(paths);
}

/// When log-tee upload is enabled, server log lines are enqueued onto the
/// same bounded queue as ingress records, under the configured stream
/// suffix — they ride the normal batching/upload path and are just as
/// lossy under back-pressure as any other record.
fn tee_target(
    config: &ServerConfig,
    queue_tx: &queue::QueueSender,
) -> Option<(queue::QueueSender, String)> {
    if config.upload_logging_server_logs {
        config
            .server_logstream_suffix
            .clone()
            .map(|suffix| (queue_tx.clone(), suffix))
    } else {
        None
    }
}
