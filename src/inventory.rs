//! Versioned, multi-provider server catalog with stable JSON round-trip.
//!
//! The on-disk envelope is a JSON object whose first key is
//! `"version":<uint16>`, followed by one key per registered provider in
//! registration order, each mapping to `{"version","timestamp","servers"}`.
//! Deterministic key ordering makes identical catalogs serialize to
//! byte-identical files — a diff-ability requirement, not an optimization.

use std::collections::HashMap;

use serde_json::Value;
use tracing::info;

use crate::error::{TunnelError, TunnelResult};
use crate::model::{ProviderServers, Server, ServerSelection};

/// Top-level catalog: schema version plus one `ProviderServers` per
/// registered provider.
#[derive(Debug, Clone, Default)]
pub struct ServerInventory {
    pub version: u16,
    /// Registration order — the only thing that makes serialization
    /// deterministic. Providers not present here are never written out.
    provider_order: Vec<String>,
    catalog: HashMap<String, ProviderServers>,
}

impl ServerInventory {
    pub fn new(provider_order: Vec<String>) -> Self {
        let catalog = provider_order
            .iter()
            .map(|name| (name.clone(), ProviderServers::default()))
            .collect();
        ServerInventory {
            version: 0,
            provider_order,
            catalog,
        }
    }

    pub fn set_provider_servers(&mut self, provider: &str, servers: ProviderServers) {
        self.catalog.insert(provider.to_string(), servers);
    }

    /// Deserialize a catalog, dropping unknown provider keys for
    /// forward-compatibility. A missing top-level version defaults to 0.
    pub fn load_from_bytes(provider_order: Vec<String>, bytes: &[u8]) -> TunnelResult<Self> {
        let raw: Value = serde_json::from_slice(bytes)
            .map_err(|e| TunnelError::InvalidSchema(e.to_string()))?;
        let obj = raw
            .as_object()
            .ok_or_else(|| TunnelError::InvalidSchema("top-level value is not an object".to_string()))?;

        let version = match obj.get("version") {
            None => 0u16,
            Some(value) => {
                let number = value
                    .as_f64()
                    .ok_or_else(|| TunnelError::InvalidSchema(format!("version is not a number: {value}")))?;
                if number.fract() != 0.0 || number < 0.0 || number > u16::MAX as f64 {
                    return Err(TunnelError::InvalidSchema(format!(
                        "version out of range [0,65535]: {number}"
                    )));
                }
                number as u16
            }
        };

        let mut catalog = HashMap::with_capacity(provider_order.len());
        for provider in &provider_order {
            let servers = match obj.get(provider) {
                Some(value) => serde_json::from_value(value.clone())
                    .map_err(|e| TunnelError::InvalidSchema(format!("provider {provider}: {e}")))?,
                None => ProviderServers::default(),
            };
            catalog.insert(provider.clone(), servers);
        }

        Ok(ServerInventory {
            version,
            provider_order,
            catalog,
        })
    }

    /// Serialize with providers in registration order. Panics if a
    /// registered provider is missing from the catalog — that is a
    /// programmer error, not a recoverable condition.
    pub fn save_to_bytes(&self) -> TunnelResult<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(format!(r#"{{"version":{}"#, self.version).as_bytes());

        for provider in &self.provider_order {
            let servers = self
                .catalog
                .get(provider)
                .unwrap_or_else(|| panic!("provider {provider} not found in all servers"));
            out.extend_from_slice(format!(r#","{provider}":"#).as_bytes());
            let encoded = serde_json::to_vec(servers)?;
            out.extend_from_slice(&encoded);
        }

        out.push(b'}');
        Ok(out)
    }

    pub async fn load_from_file(provider_order: Vec<String>, path: &std::path::Path) -> TunnelResult<Self> {
        info!("loading server catalog from {}", path.display());
        let bytes = tokio::fs::read(path).await?;
        Self::load_from_bytes(provider_order, &bytes)
    }

    pub async fn save_to_file(&self, path: &std::path::Path) -> TunnelResult<()> {
        let bytes = self.save_to_bytes()?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.catalog.values().map(|p| p.servers.len()).sum()
    }

    fn provider_servers(&self, provider: &str) -> TunnelResult<&[Server]> {
        self.catalog
            .get(provider)
            .map(|p| p.servers.as_slice())
            .ok_or_else(|| TunnelError::UnknownProvider(provider.to_string()))
    }

    /// Linear scan over the provider's servers, admitting those whose
    /// fields satisfy every non-empty set in the selection.
    pub fn filter_servers(&self, provider: &str, selection: &ServerSelection) -> TunnelResult<Vec<Server>> {
        let servers = self.provider_servers(provider)?;

        if let Some(vpn) = selection.vpn {
            if !servers.iter().any(|s| s.vpn == vpn) {
                return Err(TunnelError::UnknownVpnProtocol(vpn.to_string()));
            }
        }

        let matched: Vec<Server> = servers.iter().filter(|s| selection.matches(s)).cloned().collect();
        if matched.is_empty() {
            return Err(TunnelError::NoServers);
        }
        Ok(matched)
    }

    pub fn country_choices(&self, provider: &str) -> TunnelResult<Vec<String>> {
        self.field_choices(provider, |s| s.country.clone())
    }

    pub fn region_choices(&self, provider: &str) -> TunnelResult<Vec<String>> {
        self.field_choices(provider, |s| s.region.clone())
    }

    pub fn city_choices(&self, provider: &str) -> TunnelResult<Vec<String>> {
        self.field_choices(provider, |s| s.city.clone())
    }

    pub fn hostname_choices(&self, provider: &str) -> TunnelResult<Vec<String>> {
        self.field_choices(provider, |s| s.hostname.clone())
    }

    fn field_choices(&self, provider: &str, extract: impl Fn(&Server) -> String) -> TunnelResult<Vec<String>> {
        let servers = self.provider_servers(provider)?;
        let mut seen = std::collections::HashSet::new();
        let mut choices = Vec::new();
        for server in servers {
            let value = extract(server);
            if seen.insert(value.clone()) {
                choices.push(value);
            }
        }
        Ok(choices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VpnProtocol;

    fn server(hostname: &str, country: &str) -> Server {
        Server {
            vpn: VpnProtocol::Openvpn,
            country: country.to_string(),
            region: String::new(),
            city: String::new(),
            hostname: hostname.to_string(),
            ips: vec![],
            public_key: None,
            udp: true,
            tcp: false,
        }
    }

    fn sample_inventory() -> ServerInventory {
        let mut inv = ServerInventory::new(vec!["a".to_string(), "b".to_string()]);
        inv.set_provider_servers(
            "a",
            ProviderServers {
                version: 1,
                timestamp: 1000,
                servers: vec![server("a1", "DE"), server("a2", "FR")],
            },
        );
        inv.set_provider_servers(
            "b",
            ProviderServers {
                version: 1,
                timestamp: 2000,
                servers: vec![server("b1", "US")],
            },
        );
        inv
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let inv = sample_inventory();
        let bytes1 = inv.save_to_bytes().unwrap();
        let loaded = ServerInventory::load_from_bytes(
            vec!["a".to_string(), "b".to_string()],
            &bytes1,
        )
        .unwrap();
        let bytes2 = loaded.save_to_bytes().unwrap();
        assert_eq!(bytes1, bytes2);
    }

    #[test]
    fn provider_keys_serialize_in_registration_order() {
        let inv = sample_inventory();
        let bytes = inv.save_to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let a_pos = text.find("\"a\":").unwrap();
        let b_pos = text.find("\"b\":").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn filter_completeness() {
        let inv = sample_inventory();
        let selection = ServerSelection::single(None, "de", "", "", "");
        let matched = inv.filter_servers("a", &selection).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].hostname, "a1");
    }

    #[test]
    fn filter_with_no_matches_errs() {
        let inv = sample_inventory();
        let selection = ServerSelection::single(None, "zz", "", "", "");
        let err = inv.filter_servers("a", &selection).unwrap_err();
        assert!(matches!(err, TunnelError::NoServers));
    }

    #[test]
    fn filter_on_unknown_provider_errs() {
        let inv = sample_inventory();
        let err = inv.filter_servers("c", &ServerSelection::default()).unwrap_err();
        assert!(matches!(err, TunnelError::UnknownProvider(_)));
    }

    #[test]
    fn unknown_top_level_keys_are_dropped() {
        let mut inv = sample_inventory();
        inv.version = 3;
        let mut bytes = inv.save_to_bytes().unwrap();
        // Splice in an unrelated key right after version to simulate a
        // future field this build doesn't know about.
        let marker = br#","future_field":true"#;
        let insert_at = bytes.iter().position(|&b| b == b',').unwrap();
        bytes.splice(insert_at..insert_at, marker.iter().cloned());
        let loaded = ServerInventory::load_from_bytes(vec!["a".to_string(), "b".to_string()], &bytes).unwrap();
        assert_eq!(loaded.count(), inv.count());
    }

    #[test]
    fn version_out_of_range_is_invalid_schema() {
        let bytes = br#"{"version":99999}"#;
        let err = ServerInventory::load_from_bytes(vec!["a".to_string()], bytes).unwrap_err();
        assert!(matches!(err, TunnelError::InvalidSchema(_)));
    }

    #[test]
    fn missing_version_defaults_to_zero() {
        let bytes = br#"{"a":{"version":1,"timestamp":0,"servers":[]}}"#;
        let loaded = ServerInventory::load_from_bytes(vec!["a".to_string()], bytes).unwrap();
        assert_eq!(loaded.version, 0);
    }

    #[tokio::test]
    async fn save_to_file_then_load_from_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");

        let inv = sample_inventory();
        inv.save_to_file(&path).await.unwrap();
        assert!(path.exists());
        // The temp-file-then-rename dance must not leave a stray .tmp behind.
        assert!(!path.with_extension("tmp").exists());

        let loaded = ServerInventory::load_from_file(vec!["a".to_string(), "b".to_string()], &path)
            .await
            .unwrap();
        assert_eq!(loaded.save_to_bytes().unwrap(), inv.save_to_bytes().unwrap());
    }

    #[test]
    fn choice_extraction_dedups_case_sensitively_preserving_order() {
        let mut inv = ServerInventory::new(vec!["a".to_string()]);
        inv.set_provider_servers(
            "a",
            ProviderServers {
                version: 1,
                timestamp: 0,
                servers: vec![
                    server("h1", "DE"),
                    server("h2", "de"),
                    server("h3", "DE"),
                ],
            },
        );
        let choices = inv.country_choices("a").unwrap();
        assert_eq!(choices, vec!["DE".to_string(), "de".to_string()]);
    }
}
