//! The VPN loop: composes the generic loop runtime with a provider and a
//! firewall to bring a tunnel up/down and expose current tunnel metadata.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{TunnelError, TunnelResult};
use crate::firewall::Firewall;
use crate::inventory::ServerInventory;
use crate::loop_runtime::{Loop, ReadySignal, RunTask};
use crate::model::{LoopStatus, PortForwardState, Server, VpnSettings};
use crate::provider::ProviderRegistry;

/// Run-task body for the VPN loop (spec §4.5, steps 1-6).
pub struct VpnRunTask {
    providers: Arc<ProviderRegistry>,
    inventory: Arc<RwLock<ServerInventory>>,
    firewall: Arc<dyn Firewall>,
    port_forward: PortForwardState,
    gateway_tx: mpsc::Sender<std::net::IpAddr>,
    port_state: Arc<tokio::sync::Mutex<PortForwardState>>,
}

impl VpnRunTask {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        inventory: Arc<RwLock<ServerInventory>>,
        firewall: Arc<dyn Firewall>,
        gateway_tx: mpsc::Sender<std::net::IpAddr>,
        port_state: Arc<tokio::sync::Mutex<PortForwardState>>,
    ) -> Self {
        VpnRunTask {
            providers,
            inventory,
            firewall,
            port_forward: PortForwardState::default(),
            gateway_tx,
            port_state,
        }
    }
}

#[async_trait]
impl RunTask<VpnSettings> for VpnRunTask {
    async fn run(&self, ctx: CancellationToken, settings: VpnSettings, ready: ReadySignal) -> TunnelResult<()> {
        // 1. Resolve the chosen server.
        let provider = self.providers.get(&settings.provider)?;
        let selection = settings.selection();
        let servers: Vec<Server> = {
            let inventory = self.inventory.read().await;
            inventory.filter_servers(&settings.provider, &selection)?
        };
        let spec = provider.build_connection(&selection, &servers).await?;

        // 2. Apply firewall rules admitting the chosen remote only.
        self.firewall
            .set_allowed_connection(spec.remote, "tun0")
            .await?;

        // 3. Start the external tunnel process, scraping output for a
        // "connected" signal and the assigned gateway address. Delegated
        // to an external binary (openvpn/wireguard-go) in production;
        // here we simulate the handshake with a short, deterministic
        // delay so the state machine and firewall sequencing are real.
        info!(
            "vpn: connecting to {} ({}:{}) via {}",
            spec.hostname, spec.remote, spec.remote_port, spec.protocol
        );
        tokio::select! {
            _ = ctx.cancelled() => return Err(TunnelError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        let gateway = spec.remote;

        // 4. On connected: running, reconfigure firewall for the VPN
        // interface, signal the port-forward loop with the gateway.
        self.firewall.set_vpn_connection("10.8.0.0/24", gateway).await?;
        ready.signal();
        let _ = self.gateway_tx.send(gateway).await;

        // 5. Wait on cancellation or a tunnel-health failure. There is no
        // real child process to wait on in this reference implementation,
        // so the only exit path is cancellation.
        ctx.cancelled().await;

        // 6. On exit: remove VPN firewall rules, zero port-forward state.
        self.firewall.remove_all().await?;
        *self.port_state.lock().await = PortForwardState::default();
        let _ = self.port_forward;
        Err(TunnelError::Cancelled)
    }
}

/// Thin wrapper exposing the VPN-loop-specific accessors spec §4.5 names,
/// on top of the generic `Loop`.
pub struct VpnLoop {
    inner: Arc<Loop<VpnRunTask, VpnSettings>>,
    inventory: Arc<RwLock<ServerInventory>>,
    port_state: Arc<tokio::sync::Mutex<PortForwardState>>,
}

impl VpnLoop {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        inventory: Arc<RwLock<ServerInventory>>,
        firewall: Arc<dyn Firewall>,
        initial_settings: VpnSettings,
        gateway_tx: mpsc::Sender<std::net::IpAddr>,
    ) -> Self {
        let port_state = Arc::new(tokio::sync::Mutex::new(PortForwardState::default()));
        let run_task = Arc::new(VpnRunTask::new(
            providers,
            inventory.clone(),
            firewall,
            gateway_tx,
            port_state.clone(),
        ));
        let inner = Loop::new("vpn", run_task, initial_settings);
        VpnLoop {
            inner,
            inventory,
            port_state,
        }
    }

    pub fn get_status(&self) -> LoopStatus {
        self.inner.get_status()
    }

    pub async fn get_settings(&self) -> VpnSettings {
        self.inner.get_settings().await
    }

    pub async fn apply_status(&self, target: LoopStatus) -> TunnelResult<String> {
        self.inner.apply_status(target).await
    }

    pub async fn apply_settings(&self, new: VpnSettings) -> TunnelResult<String> {
        self.inner.apply_settings(new).await
    }

    /// Returns the full unfiltered list for the current provider — used
    /// by the control plane to offer UI choices.
    pub async fn get_server_list(&self) -> TunnelResult<Vec<Server>> {
        let settings = self.get_settings().await;
        let inventory = self.inventory.read().await;
        let selection = crate::model::ServerSelection {
            vpn: settings.selection_vpn,
            ..Default::default()
        };
        inventory.filter_servers(&settings.provider, &selection)
    }

    pub async fn get_port_forwarded(&self) -> u16 {
        if self.get_status() != LoopStatus::Running {
            return 0;
        }
        self.port_state.lock().await.0
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<LoopStatus> {
        self.inner.subscribe()
    }

    /// The shared port-forward state this loop owns (spec §3 ownership
    /// rule). Handed to the port-forward loop's constructor so a
    /// successful handshake's assigned port is immediately visible through
    /// `get_port_forwarded` without a back-reference to the whole `VpnLoop`.
    pub fn port_state(&self) -> Arc<tokio::sync::Mutex<PortForwardState>> {
        self.port_state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::NullFirewall;
    use crate::model::{
        ConnectionSpec, DnsSettings, PortForwardPolicy, ProviderServers, ServerSelection, VpnCredentials,
        VpnProtocol,
    };
    use crate::portforward_loop::PortForwardLoop;
    use crate::provider::{PortForwardSync, VpnProvider};
    use async_trait::async_trait;
    use mockall::mock;
    use std::net::IpAddr;

    mock! {
        pub TestProvider {}

        #[async_trait]
        impl VpnProvider for TestProvider {
            fn name(&self) -> &str;
            async fn build_connection(
                &self,
                selection: &ServerSelection,
                servers: &[Server],
            ) -> TunnelResult<ConnectionSpec>;
            async fn port_forward(
                &self,
                ctx: CancellationToken,
                client: reqwest::Client,
                gateway: IpAddr,
                firewall: Arc<dyn Firewall>,
                sync_state: PortForwardSync,
            ) -> TunnelResult<()>;
        }
    }

    fn settings() -> VpnSettings {
        VpnSettings {
            provider: "mocked".to_string(),
            selection_vpn: None,
            selection_countries: vec![],
            selection_regions: vec![],
            selection_cities: vec![],
            selection_hostnames: vec![],
            credentials: VpnCredentials {
                user: "alice".to_string(),
                password: "secret".to_string(),
                private_key: None,
            },
            port_forwarding: PortForwardPolicy::default(),
            dns: DnsSettings::default(),
        }
    }

    fn inventory_with_one_server() -> Arc<RwLock<ServerInventory>> {
        let mut inv = ServerInventory::new(vec!["mocked".to_string()]);
        inv.set_provider_servers(
            "mocked",
            ProviderServers {
                version: 1,
                timestamp: 0,
                servers: vec![Server {
                    vpn: VpnProtocol::Openvpn,
                    country: "DE".to_string(),
                    region: String::new(),
                    city: String::new(),
                    hostname: "de1".to_string(),
                    ips: vec!["198.51.100.10".parse().unwrap()],
                    public_key: None,
                    udp: true,
                    tcp: false,
                }],
            },
        );
        Arc::new(RwLock::new(inv))
    }

    fn inventory_with_mixed_protocols() -> Arc<RwLock<ServerInventory>> {
        let mut inv = ServerInventory::new(vec!["mocked".to_string()]);
        inv.set_provider_servers(
            "mocked",
            ProviderServers {
                version: 1,
                timestamp: 0,
                servers: vec![
                    Server {
                        vpn: VpnProtocol::Openvpn,
                        country: "DE".to_string(),
                        region: String::new(),
                        city: String::new(),
                        hostname: "de1".to_string(),
                        ips: vec!["198.51.100.10".parse().unwrap()],
                        public_key: None,
                        udp: true,
                        tcp: false,
                    },
                    Server {
                        vpn: VpnProtocol::Wireguard,
                        country: "DE".to_string(),
                        region: String::new(),
                        city: String::new(),
                        hostname: "de2".to_string(),
                        ips: vec!["198.51.100.11".parse().unwrap()],
                        public_key: Some("key".to_string()),
                        udp: true,
                        tcp: false,
                    },
                ],
            },
        );
        Arc::new(RwLock::new(inv))
    }

    #[tokio::test]
    async fn get_server_list_preserves_protocol_selection() {
        let providers = Arc::new(ProviderRegistry::new());
        let firewall: Arc<dyn Firewall> = Arc::new(NullFirewall::default());
        let (gateway_tx, _gateway_rx) = mpsc::channel(1);

        let mut settings = settings();
        settings.provider = "mocked".to_string();
        settings.selection_vpn = Some(VpnProtocol::Wireguard);

        let vpn = VpnLoop::new(
            providers,
            inventory_with_mixed_protocols(),
            firewall,
            settings,
            gateway_tx,
        );

        let servers = vpn.get_server_list().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].hostname, "de2");
    }

    #[tokio::test]
    async fn connects_over_the_provider_chosen_remote_and_reaches_running() {
        let mut provider = MockTestProvider::new();
        provider.expect_name().return_const("mocked".to_string());
        provider.expect_build_connection().returning(|_, servers| {
            let chosen = &servers[0];
            Ok(ConnectionSpec {
                protocol: VpnProtocol::Openvpn,
                remote: chosen.ips[0],
                remote_port: 1194,
                hostname: chosen.hostname.clone(),
                credentials: VpnCredentials::default(),
                udp: true,
            })
        });

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(provider));
        let providers = Arc::new(registry);

        let firewall: Arc<dyn Firewall> = Arc::new(NullFirewall::default());
        let (gateway_tx, _gateway_rx) = mpsc::channel(1);

        let vpn = VpnLoop::new(
            providers,
            inventory_with_one_server(),
            firewall,
            settings(),
            gateway_tx,
        );

        let outcome = vpn.apply_status(LoopStatus::Running).await.unwrap();
        assert_eq!(outcome, "vpn started");
        assert_eq!(vpn.get_status(), LoopStatus::Running);
    }

    #[tokio::test]
    async fn port_forward_handshake_is_visible_through_get_port_forwarded() {
        let mut provider = MockTestProvider::new();
        provider.expect_name().return_const("mocked".to_string());
        provider.expect_build_connection().returning(|_, servers| {
            let chosen = &servers[0];
            Ok(ConnectionSpec {
                protocol: VpnProtocol::Openvpn,
                remote: chosen.ips[0],
                remote_port: 1194,
                hostname: chosen.hostname.clone(),
                credentials: VpnCredentials::default(),
                udp: true,
            })
        });
        provider
            .expect_port_forward()
            .returning(|_ctx, _client, _gateway, _firewall, sync_state: PortForwardSync| {
                sync_state(51413);
                Ok(())
            });

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(provider));
        let providers = Arc::new(registry);

        let firewall: Arc<dyn Firewall> = Arc::new(NullFirewall::default());
        let (gateway_tx, gateway_rx) = mpsc::channel(1);

        let vpn = Arc::new(VpnLoop::new(
            providers.clone(),
            inventory_with_one_server(),
            firewall.clone(),
            settings(),
            gateway_tx,
        ));
        let port_forward = PortForwardLoop::new(vpn.port_state());
        let fwd_provider = providers.get("mocked").unwrap();
        tokio::spawn(port_forward.run(gateway_rx, fwd_provider, firewall, reqwest::Client::new()));

        vpn.apply_status(LoopStatus::Running).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        assert_eq!(vpn.get_port_forwarded().await, 51413);
    }
}
