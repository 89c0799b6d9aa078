//! Process-wide configuration: catalog path, HTTP bind address, and the
//! initial settings snapshots handed to the loops at startup. Grounded on
//! the teacher's `NetctlConfig::load`/`save` pattern.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{TunnelError, TunnelResult};
use crate::model::{DnsSettings, VpnSettings};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
    #[serde(default = "default_resolver_binary")]
    pub dns_resolver_binary: String,
    #[serde(default = "default_publicip_interval_secs")]
    pub publicip_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub vpn: VpnSettings,
    #[serde(default)]
    pub dns: DnsSettings,
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("/etc/tunnelctl/servers.json")
}

fn default_bind_address() -> SocketAddr {
    "127.0.0.1:8000".parse().expect("valid default bind address")
}

fn default_resolver_binary() -> String {
    "dns-over-tls-forwarder".to_string()
}

fn default_publicip_interval_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> TunnelResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| TunnelError::ConfigError(format!("failed to read config: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| TunnelError::ConfigError(format!("failed to parse config: {e}")))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> TunnelResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TunnelError::ConfigError(format!("failed to serialize config: {e}")))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| TunnelError::ConfigError(format!("failed to write config: {e}")))?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            catalog_path: default_catalog_path(),
            bind_address: default_bind_address(),
            dns_resolver_binary: default_resolver_binary(),
            publicip_interval_secs: default_publicip_interval_secs(),
            log_level: default_log_level(),
            vpn: VpnSettings {
                provider: "exampleopenvpn".to_string(),
                selection_vpn: None,
                selection_countries: vec![],
                selection_regions: vec![],
                selection_cities: vec![],
                selection_hostnames: vec![],
                credentials: crate::model::VpnCredentials::default(),
                port_forwarding: crate::model::PortForwardPolicy::default(),
                dns: DnsSettings::default(),
            },
            dns: DnsSettings::default(),
        }
    }
}
