//! Static adapter configuration, loadable from a TOML file the same way the rest of this
//! lineage loads its configs (`serdeconv`).

use crate::net::context::Settings;
use race_proto::logging::LoggingConfig;
use race_proto::message::{DATA_RECEIVER, DATA_SENDER, DEFAULT_CLIENT_PORT, DEFAULT_HOST, DEFAULT_SERVER_PORT};
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub host: String,
    pub port: u16,
    pub schema: String,
    pub flags: i32,
    pub default_interval_ms: i32,
    #[serde(default)]
    pub reconnect_interval_ms: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AdapterConfig {
    pub fn server_default(schema: impl Into<String>) -> AdapterConfig {
        AdapterConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            schema: schema.into(),
            flags: DATA_SENDER | DATA_RECEIVER,
            default_interval_ms: 2000,
            reconnect_interval_ms: 0,
            logging: LoggingConfig::default(),
        }
    }

    pub fn client_default(schema: impl Into<String>) -> AdapterConfig {
        AdapterConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_CLIENT_PORT,
            schema: schema.into(),
            flags: DATA_SENDER | DATA_RECEIVER,
            default_interval_ms: 2000,
            reconnect_interval_ms: 5000,
            logging: LoggingConfig::default(),
        }
    }

    /// Loads a config from a TOML file on disk.
    pub fn from_toml_file(path: &str) -> Result<AdapterConfig, serdeconv::Error> {
        serdeconv::from_toml_file(path)
    }

    pub fn to_settings(&self) -> Settings {
        Settings {
            host: self.host.clone(),
            port: self.port,
            schema: self.schema.clone(),
            flags: self.flags,
            default_interval_ms: self.default_interval_ms,
            reconnect_interval_ms: self.reconnect_interval_ms,
        }
    }
}
