//! Daemon configuration.
//!
//! TOML with serde defaults; every field is optional and the empty file is
//! a working configuration. User entries feed the in-memory user store -
//! deployments with a real per-channel user database wire their own
//! `UserStore` instead.

use std::path::Path;
use std::time::Duration;

use kiln_sol::SolParams;
use kiln_types::Privilege;
use serde::{Deserialize, Serialize};

use crate::{ServerError, ServerResult};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub network: NetworkConfig,
    pub sol: SolConfig,
    pub console: ConsoleConfig,
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP bind address; dual-stack wildcard by default.
    pub bind_address: String,
    /// IPMI channel this daemon serves.
    pub channel: u8,
    /// Channel instance (two bits) stamped into session ids and handles.
    pub instance: u8,
    /// Per-channel concurrent session cap.
    pub max_sessions: usize,
    /// BMC GUID as 32 hex digits; zero GUID when unset.
    pub guid: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "[::]:623".to_string(),
            channel: 1,
            instance: 0,
            max_sessions: 15,
            guid: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolConfig {
    /// Character-accumulate interval in 5 ms units.
    pub accumulate_interval: u8,
    pub send_threshold: u8,
    pub retry_count: u8,
    /// Retry interval in 10 ms units.
    pub retry_interval: u8,
}

impl Default for SolConfig {
    fn default() -> Self {
        Self {
            accumulate_interval: 20,
            send_threshold: 1,
            retry_count: 7,
            retry_interval: 10,
        }
    }
}

impl SolConfig {
    pub fn to_params(&self, channel: u8) -> SolParams {
        SolParams {
            accumulate_interval: Duration::from_millis(5) * u32::from(self.accumulate_interval),
            send_threshold: self.send_threshold.max(1),
            retry_count: self.retry_count & 0x07,
            retry_interval: Duration::from_millis(10) * u32::from(self.retry_interval),
            channel,
            ..SolParams::default()
        }
    }
}

/// Where the host console socket lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "name")]
pub enum ConsoleEndpoint {
    /// Abstract-namespace stream socket (the conventional host console).
    Abstract(String),
    /// Filesystem path.
    Path(String),
    /// No console attached; SOL data to the host is discarded.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub endpoint: ConsoleEndpoint,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            endpoint: ConsoleEndpoint::Abstract("obmc-console".to_string()),
        }
    }
}

/// A user entry for the in-memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    pub password: String,
    #[serde(default = "default_privilege")]
    pub privilege: u8,
}

fn default_privilege() -> u8 {
    Privilege::Admin.as_u8()
}

impl DaemonConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|err| ServerError::Config(format!("{}: {err}", path.display())))?;
        toml::from_str(&data).map_err(|err| ServerError::Config(err.to_string()))
    }

    /// Decodes the configured GUID; all-zero when absent.
    pub fn guid_bytes(&self) -> ServerResult<[u8; 16]> {
        let Some(hex) = self.network.guid.as_deref() else {
            return Ok([0u8; 16]);
        };
        if hex.len() != 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ServerError::Config(format!("invalid guid '{hex}'")));
        }
        let mut out = [0u8; 16];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
                .map_err(|err| ServerError::Config(err.to_string()))?;
        }
        Ok(out)
    }
}
