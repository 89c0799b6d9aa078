//! A reference OpenVPN provider. No real cryptography: it returns a
//! connection spec and runs a stub port-forward handshake, exercising the
//! provider contract without shelling out to an actual `openvpn` binary.

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
pub struct ExampleOpenVpnProvider;

#[async_trait]
impl VpnProvider for ExampleOpenVpnProvider {
    fn name(&self) -> &str {
        "exampleopenvpn"
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
            protocol: VpnProtocol::Openvpn,
            remote,
            remote_port: if chosen.udp { 1194 } else { 443 },
            hostname: chosen.hostname.clone(),
            credentials: VpnCredentials::default(),
            udp: chosen.udp,
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
        // Real providers refresh a vendor handshake on an interval; this
        // stub just assigns a fixed port once and waits for cancellation.
        let assigned: u16 = 51413;
        firewall.set_port_forwarded(assigned).await?;
        sync_state(assigned);
        info!("exampleopenvpn: forwarded port {assigned}");

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
