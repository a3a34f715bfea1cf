use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

/// Client identity announced in the CONNECT frame.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    pub name: String,
    pub lang: String,
    pub version: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            name: env!("CARGO_PKG_NAME").to_string(),
            lang: "rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// bytes reserved for a single socket read
    pub read_buffer_size: usize,
    /// largest control line or payload accepted from the server
    pub max_frame_size: usize,
    pub mailbox_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "127.0.0.1".to_string(),
            port: 4222,
            read_buffer_size: 4 * 1024,
            max_frame_size: 1024 * 1024,
            mailbox_capacity: 1024,
        }
    }
}

/// Order in which `drain_next` hands out pending messages.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DrainOrder {
    #[default]
    Fifo,
    Lifo,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DeliveryConfig {
    pub drain_order: DrainOrder,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub delivery: DeliveryConfig,
}

impl ClientConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<ClientConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let client_config: ClientConfig = config.try_deserialize()?;
        client_config.validate()?;

        Ok(client_config)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.network.host, self.network.port)
    }

    fn validate(&self) -> AppResult<()> {
        if self.network.mailbox_capacity == 0 {
            return Err(AppError::InvalidValue(
                "network.mailbox_capacity must be greater than 0".to_string(),
            ));
        }
        if self.network.read_buffer_size == 0 {
            return Err(AppError::InvalidValue(
                "network.read_buffer_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
