//! Server catalog entities: `Server`, `ProviderServers` and the
//! `ServerSelection` filter predicate.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Protocol tag for a VPN endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnProtocol {
    Openvpn,
    Wireguard,
}

impl fmt::Display for VpnProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpnProtocol::Openvpn => write!(f, "openvpn"),
            VpnProtocol::Wireguard => write!(f, "wireguard"),
        }
    }
}

impl std::str::FromStr for VpnProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openvpn" => Ok(VpnProtocol::Openvpn),
            "wireguard" => Ok(VpnProtocol::Wireguard),
            other => Err(format!("unknown VPN protocol: {other}")),
        }
    }
}

/// A single reachable VPN endpoint. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    #[serde(rename = "vpn")]
    pub vpn: VpnProtocol,
    pub country: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
    pub hostname: String,
    /// Provider-specific reachability hints.
    #[serde(default)]
    pub ips: Vec<IpAddr>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default = "default_true")]
    pub udp: bool,
    #[serde(default)]
    pub tcp: bool,
}

fn default_true() -> bool {
    true
}

/// One provider's worth of servers, with its own schema version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderServers {
    pub version: u16,
    pub timestamp: i64,
    #[serde(default)]
    pub servers: Vec<Server>,
}

/// A conjunctive filter over the server inventory. Empty sets are
/// wildcards; all comparisons against server fields are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct ServerSelection {
    pub vpn: Option<VpnProtocol>,
    pub countries: HashSet<String>,
    pub regions: HashSet<String>,
    pub cities: HashSet<String>,
    pub hostnames: HashSet<String>,
}

impl ServerSelection {
    pub fn single(vpn: Option<VpnProtocol>, country: &str, region: &str, city: &str, hostname: &str) -> Self {
        let mut selection = ServerSelection {
            vpn,
            ..Default::default()
        };
        if !country.is_empty() {
            selection.countries.insert(country.to_string());
        }
        if !region.is_empty() {
            selection.regions.insert(region.to_string());
        }
        if !city.is_empty() {
            selection.cities.insert(city.to_string());
        }
        if !hostname.is_empty() {
            selection.hostnames.insert(hostname.to_string());
        }
        selection
    }

    /// True iff every non-empty set in the selection contains the
    /// server's corresponding field (case-insensitive) and, if `vpn` is
    /// set, the server's protocol tag matches it.
    pub fn matches(&self, server: &Server) -> bool {
        if let Some(vpn) = self.vpn {
            if vpn != server.vpn {
                return false;
            }
        }
        set_matches(&self.countries, &server.country)
            && set_matches(&self.regions, &server.region)
            && set_matches(&self.cities, &server.city)
            && set_matches(&self.hostnames, &server.hostname)
    }
}

fn set_matches(set: &HashSet<String>, value: &str) -> bool {
    set.is_empty() || set.iter().any(|candidate| candidate.eq_ignore_ascii_case(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_server() -> Server {
        Server {
            vpn: VpnProtocol::Openvpn,
            country: "DE".to_string(),
            region: "".to_string(),
            city: "Berlin".to_string(),
            hostname: "de1".to_string(),
            ips: vec![],
            public_key: None,
            udp: true,
            tcp: false,
        }
    }

    #[test]
    fn empty_selection_matches_everything() {
        let selection = ServerSelection::default();
        assert!(selection.matches(&sample_server()));
    }

    #[test]
    fn country_match_is_case_insensitive() {
        let selection = ServerSelection::single(None, "de", "", "", "");
        assert!(selection.matches(&sample_server()));
    }

    #[test]
    fn mismatched_protocol_excludes_server() {
        let selection = ServerSelection {
            vpn: Some(VpnProtocol::Wireguard),
            ..Default::default()
        };
        assert!(!selection.matches(&sample_server()));
    }

    #[test]
    fn mismatched_hostname_excludes_server() {
        let selection = ServerSelection::single(None, "", "", "", "us1");
        assert!(!selection.matches(&sample_server()));
    }
}
