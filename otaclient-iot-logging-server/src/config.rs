//! Environment-driven server configuration. Pure env-var sourced, no CLI
//! flags.

use anyhow::Context;
use config::{Config, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub greengrass_v1_config: String,
    pub greengrass_v2_config: String,
    pub aws_profile_info: String,

    pub listen_address: String,
    pub listen_port: u16,
    pub listen_grpc_port: u16,

    pub max_logs_backlog: usize,
    pub max_logs_per_merge: usize,
    pub upload_interval: u64,

    pub ecu_info_yaml: Option<String>,

    pub upload_logging_server_logs: bool,
    pub server_logstream_suffix: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            greengrass_v1_config: "/greengrass/config/config.json".to_string(),
            greengrass_v2_config: "/greengrass/v2/init_config/config.yaml".to_string(),
            aws_profile_info: "/opt/ota/client/aws_profile_info.yaml".to_string(),
            listen_address: "127.0.0.1".to_string(),
            listen_port: 8083,
            listen_grpc_port: 50051,
            max_logs_backlog: 4096,
            max_logs_per_merge: 512,
            upload_interval: 60,
            ecu_info_yaml: None,
            upload_logging_server_logs: false,
            server_logstream_suffix: None,
        }
    }
}

impl ServerConfig {
    pub fn parse() -> anyhow::Result<Self> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(Environment::default().try_parsing(true))
            .build()
            .context("failed to build server configuration")?
            .try_deserialize::<Self>()
            .context("failed to deserialize server configuration")?;

        if config.upload_logging_server_logs && config.server_logstream_suffix.is_none() {
            anyhow::bail!(
                "SERVER_LOGSTREAM_SUFFIX is required when UPLOAD_LOGGING_SERVER_LOGS is set"
            );
        }

        Ok(config)
    }

    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }

    pub fn grpc_bind_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_grpc_port)
    }
}
