use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::service::GeneralConfig;

/// Payload of the server's INFO frame.
///
/// Only the fields the client reads are typed; everything else the server
/// announces is kept in `extra` so a snapshot reflects the whole frame.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<u64>,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub tls_required: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Version of the wire protocol announced in CONNECT.
pub const PROTOCOL_VERSION: i32 = 1;

/// Options sent with the CONNECT frame. The client never asks for verbose
/// acknowledgements or pedantic checking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub verbose: bool,
    pub pedantic: bool,
    pub lang: String,
    pub version: String,
    pub protocol: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConnectOptions {
    pub fn from_config(general: &GeneralConfig) -> Self {
        ConnectOptions {
            verbose: false,
            pedantic: false,
            lang: general.lang.clone(),
            version: general.version.clone(),
            protocol: PROTOCOL_VERSION,
            name: Some(general.name.clone()),
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions::from_config(&GeneralConfig::default())
    }
}
