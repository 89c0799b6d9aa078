//! A reference WireGuard provider, exercising the key-based credential
//! branch of the provider contract.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::TunnelResult;
use crate::firewall::Firewall;
use crate::model::{ConnectionSpec, Server, ServerSelection, VpnCredentials, VpnProtocol};

use super::{pick_uniform_random, PortForwardSync, VpnProvider};

#[derive(Default)]
pub struct ExampleWireGuardProvider;

#[async_trait]
impl VpnProvider for ExampleWireGuardProvider {
    fn name(&self) -> &str {
        "examplewireguard"
    }

    async fn build_connection(
        &self,
        _selection: &ServerSelection,
        servers: &[Server],
    ) -> TunnelResult<ConnectionSpec> {
        let chosen = pick_uniform_random(servers)?;
        let remote = chosen
            .ips
            .first()
            .copied()
            .unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]));
        Ok(ConnectionSpec {
            protocol: VpnProtocol::Wireguard,
            remote,
            remote_port: 51820,
            hostname: chosen.hostname.clone(),
            credentials: VpnCredentials {
                private_key: chosen.public_key.clone(),
                ..Default::default()
            },
            udp: true,
        })
    }

    async fn port_forward(
        &self,
        ctx: CancellationToken,
        _client: reqwest::Client,
        _gateway: IpAddr,
        firewall: Arc<dyn Firewall>,
        sync_state: PortForwardSync,
    ) -> TunnelResult<()> {
        let assigned: u16 = 58120;
        firewall.set_port_forwarded(assigned).await?;
        sync_state(assigned);
        info!("examplewireguard: forwarded port {assigned}");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = tokio::time::sleep(Duration::from_secs(60)) => {
                    sync_state(assigned);
                }
            }
        }
    }
}
