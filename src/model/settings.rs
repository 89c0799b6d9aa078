//! Loop status/command enums and the settings snapshots loops operate on.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::server::ServerSelection;

/// One of {stopped, starting, running, stopping, crashed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopStatus::Stopped => "stopped",
            LoopStatus::Starting => "starting",
            LoopStatus::Running => "running",
            LoopStatus::Stopping => "stopping",
            LoopStatus::Crashed => "crashed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LoopStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(LoopStatus::Stopped),
            "starting" => Ok(LoopStatus::Starting),
            "running" => Ok(LoopStatus::Running),
            "stopping" => Ok(LoopStatus::Stopping),
            "crashed" => Ok(LoopStatus::Crashed),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Protocol-specific credentials. Never logged or returned verbatim over
/// the control plane — redact at the HTTP boundary, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VpnCredentials {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortForwardPolicy {
    pub enabled: bool,
    #[serde(default)]
    pub filepath: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsSettings {
    pub enabled: bool,
    #[serde(default = "default_resolver_addr")]
    pub resolver_address: String,
    #[serde(default = "default_resolver_host")]
    pub tls_hostname: String,
}

fn default_resolver_addr() -> String {
    "1.1.1.1:853".to_string()
}

fn default_resolver_host() -> String {
    "cloudflare-dns.com".to_string()
}

/// Immutable settings snapshot owned exclusively by the VPN loop.
/// Mutations replace the whole value atomically at the loop boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnSettings {
    pub provider: String,
    #[serde(default)]
    pub selection_vpn: Option<super::server::VpnProtocol>,
    #[serde(default)]
    pub selection_countries: Vec<String>,
    #[serde(default)]
    pub selection_regions: Vec<String>,
    #[serde(default)]
    pub selection_cities: Vec<String>,
    #[serde(default)]
    pub selection_hostnames: Vec<String>,
    pub credentials: VpnCredentials,
    pub port_forwarding: PortForwardPolicy,
    /// The DNS policy this tunnel session was configured with. The
    /// DNS-over-TLS loop is supervised independently (its own
    /// `LoopStatus`/`DnsLoop`) and is driven by its own settings snapshot;
    /// this copy is the VPN loop's record of what it asked for.
    pub dns: DnsSettings,
}

impl VpnSettings {
    pub fn selection(&self) -> ServerSelection {
        ServerSelection {
            vpn: self.selection_vpn,
            countries: self.selection_countries.iter().cloned().collect(),
            regions: self.selection_regions.iter().cloned().collect(),
            cities: self.selection_cities.iter().cloned().collect(),
            hostnames: self.selection_hostnames.iter().cloned().collect(),
        }
    }

    /// Narrow the selection to exactly one server, used by the
    /// `setServer` control-plane convenience. Pins the protocol too, since
    /// narrowing to a specific `Server` also pins its `vpn` tag.
    pub fn with_narrowed_selection(
        &self,
        vpn: super::server::VpnProtocol,
        country: &str,
        region: &str,
        city: &str,
        hostname: &str,
    ) -> Self {
        let mut clone = self.clone();
        clone.selection_vpn = Some(vpn);
        clone.selection_countries = vec![country.to_string()];
        clone.selection_regions = vec![region.to_string()];
        clone.selection_cities = vec![city.to_string()];
        clone.selection_hostnames = vec![hostname.to_string()];
        clone
    }

    /// Validate the proposed settings. See spec §7 `InvalidSettings`.
    pub fn validate(&self) -> Result<(), String> {
        if self.provider.trim().is_empty() {
            return Err("provider must not be empty".to_string());
        }
        if self.credentials.user.is_empty() && self.credentials.private_key.is_none() {
            return Err("either a username/password or a private key is required".to_string());
        }
        if !self.credentials.user.is_empty() && self.credentials.private_key.is_some() {
            return Err("user/password and private-key credentials are mutually exclusive".to_string());
        }
        Ok(())
    }
}

impl crate::loop_runtime::ValidateSettings for VpnSettings {
    fn validate(&self) -> Result<(), String> {
        VpnSettings::validate(self)
    }
}

impl crate::loop_runtime::ValidateSettings for DnsSettings {}

/// A chosen server plus everything the run task needs to start a tunnel.
#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    pub protocol: super::server::VpnProtocol,
    pub remote: IpAddr,
    pub remote_port: u16,
    pub hostname: String,
    pub credentials: VpnCredentials,
    pub udp: bool,
}

/// Result of a public-IP probe, cached until the next probe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpInfoData {
    pub ip: String,
    #[serde(rename = "cc", default)]
    pub country_code: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
}

/// Per-VPN-session forwarded port. 0 = none.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PortForwardState(pub u16);
