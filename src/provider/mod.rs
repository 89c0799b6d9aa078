//! Provider registry: the plug-in contract each VPN provider implements.
//!
//! Two operations are the only per-provider variability (spec §4.2); every
//! other concern — filtering, firewalling, the loop state machine — is
//! uniform and lives outside this module.

mod exampleopenvpn;
mod examplewireguard;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{TunnelError, TunnelResult};
use crate::firewall::Firewall;
use crate::model::{ConnectionSpec, Server, ServerSelection};

pub use exampleopenvpn::ExampleOpenVpnProvider;
pub use examplewireguard::ExampleWireGuardProvider;

/// Callback the provider invokes each time the forwarded port changes.
pub type PortForwardSync = Arc<dyn Fn(u16) + Send + Sync>;

#[async_trait]
pub trait VpnProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Choose one server (uniform random over the filtered set, ties
    /// broken by position) and return protocol, remote address,
    /// credentials, and hints.
    async fn build_connection(
        &self,
        selection: &ServerSelection,
        servers: &[Server],
    ) -> TunnelResult<ConnectionSpec>;

    /// Long-running: performs the vendor-specific port-forward handshake,
    /// calling `sync_state` each time the forwarded port changes. Returns
    /// when `ctx` is cancelled or the handshake can no longer be
    /// refreshed.
    async fn port_forward(
        &self,
        ctx: CancellationToken,
        client: reqwest::Client,
        gateway: IpAddr,
        firewall: Arc<dyn Firewall>,
        sync_state: PortForwardSync,
    ) -> TunnelResult<()>;
}

/// Chooses uniformly at random over `servers`, ties broken by position
/// (i.e. any server is an equally valid tie-break — `gen_range` over the
/// index already does this).
pub fn pick_uniform_random(servers: &[Server]) -> TunnelResult<&Server> {
    if servers.is_empty() {
        return Err(TunnelError::NoServers);
    }
    let index = rand::thread_rng().gen_range(0..servers.len());
    Ok(&servers[index])
}

/// Ordered, named set of providers. Registration order is what the
/// inventory's JSON envelope uses for deterministic key ordering.
#[derive(Default)]
pub struct ProviderRegistry {
    order: Vec<String>,
    providers: HashMap<String, Arc<dyn VpnProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn VpnProvider>) {
        let name = provider.name().to_string();
        info!("registering VPN provider: {name}");
        self.order.push(name.clone());
        self.providers.insert(name, provider);
    }

    pub fn order(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn get(&self, name: &str) -> TunnelResult<Arc<dyn VpnProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| TunnelError::UnknownProvider(name.to_string()))
    }

    /// Registry shipped with example providers covering both protocol
    /// branches, mirroring the teacher's OpenVPN/WireGuard plugin split.
    pub fn with_example_providers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ExampleOpenVpnProvider::default()));
        registry.register(Arc::new(ExampleWireGuardProvider::default()));
        registry
    }
}
