//! Declarative kill-switch firewall controller.
//!
//! Invariant: at all times outside the `Running` state, only traffic to
//! the configured VPN remotes and loopback is permitted; all other egress
//! is dropped. Rule transitions must be applied before the tunnel process
//! starts and after it stops — never concurrently with an up tunnel.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::TunnelResult;

#[async_trait]
pub trait Firewall: Send + Sync {
    /// Allow outbound traffic to `remote` over `interface` (and loopback)
    /// only. Used before the tunnel comes up.
    async fn set_allowed_connection(&self, remote: IpAddr, interface: &str) -> TunnelResult<()>;

    /// Once the tunnel is running, allow traffic over the VPN interface's
    /// network, routed through `gateway`.
    async fn set_vpn_connection(&self, local_vpn_net: &str, gateway: IpAddr) -> TunnelResult<()>;

    /// Permit inbound traffic on the forwarded port.
    async fn set_port_forwarded(&self, port: u16) -> TunnelResult<()>;

    /// Tear down every rule this controller owns.
    async fn remove_all(&self) -> TunnelResult<()>;
}

/// Process-wide singleton guarded by a mutex; only the VPN loop writes to
/// it. Shells out to `iptables`, same idiom as the rest of this codebase's
/// `tokio::process::Command` wrappers around system tools.
pub struct IptablesFirewall {
    state: Mutex<()>,
}

impl Default for IptablesFirewall {
    fn default() -> Self {
        IptablesFirewall { state: Mutex::new(()) }
    }
}

impl IptablesFirewall {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn run(&self, args: &[&str]) -> TunnelResult<()> {
        debug!("iptables {}", args.join(" "));
        let status = Command::new("iptables").args(args).status().await?;
        if !status.success() {
            warn!("iptables {} exited with {status}", args.join(" "));
        }
        Ok(())
    }
}

#[async_trait]
impl Firewall for IptablesFirewall {
    async fn set_allowed_connection(&self, remote: IpAddr, interface: &str) -> TunnelResult<()> {
        let _guard = self.state.lock().await;
        self.remove_all_locked().await?;
        self.run(&["-A", "OUTPUT", "-o", "lo", "-j", "ACCEPT"]).await?;
        self.run(&[
            "-A",
            "OUTPUT",
            "-o",
            interface,
            "-d",
            &remote.to_string(),
            "-j",
            "ACCEPT",
        ])
        .await?;
        self.run(&["-A", "OUTPUT", "-j", "DROP"]).await?;
        info!("firewall: allowing only {remote} over {interface} (kill-switch armed)");
        Ok(())
    }

    async fn set_vpn_connection(&self, local_vpn_net: &str, gateway: IpAddr) -> TunnelResult<()> {
        let _guard = self.state.lock().await;
        self.run(&["-A", "OUTPUT", "-d", local_vpn_net, "-j", "ACCEPT"]).await?;
        info!("firewall: allowing VPN network {local_vpn_net} via gateway {gateway}");
        Ok(())
    }

    async fn set_port_forwarded(&self, port: u16) -> TunnelResult<()> {
        let _guard = self.state.lock().await;
        self.run(&[
            "-A",
            "INPUT",
            "-p",
            "tcp",
            "--dport",
            &port.to_string(),
            "-j",
            "ACCEPT",
        ])
        .await?;
        self.run(&[
            "-A",
            "INPUT",
            "-p",
            "udp",
            "--dport",
            &port.to_string(),
            "-j",
            "ACCEPT",
        ])
        .await?;
        info!("firewall: permitting inbound on forwarded port {port}");
        Ok(())
    }

    async fn remove_all(&self) -> TunnelResult<()> {
        let _guard = self.state.lock().await;
        self.remove_all_locked().await
    }
}

impl IptablesFirewall {
    async fn remove_all_locked(&self) -> TunnelResult<()> {
        self.run(&["-F", "OUTPUT"]).await?;
        self.run(&["-F", "INPUT"]).await?;
        Ok(())
    }
}

/// Test double that records calls instead of shelling out. Used by loop
/// unit tests so they don't depend on `iptables` being installed.
#[derive(Default)]
pub struct NullFirewall {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Firewall for NullFirewall {
    async fn set_allowed_connection(&self, remote: IpAddr, interface: &str) -> TunnelResult<()> {
        self.calls
            .lock()
            .await
            .push(format!("allowed:{remote}:{interface}"));
        Ok(())
    }

    async fn set_vpn_connection(&self, local_vpn_net: &str, gateway: IpAddr) -> TunnelResult<()> {
        self.calls
            .lock()
            .await
            .push(format!("vpn:{local_vpn_net}:{gateway}"));
        Ok(())
    }

    async fn set_port_forwarded(&self, port: u16) -> TunnelResult<()> {
        self.calls.lock().await.push(format!("portforward:{port}"));
        Ok(())
    }

    async fn remove_all(&self) -> TunnelResult<()> {
        self.calls.lock().await.push("remove_all".to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_firewall_records_calls_in_order() {
        let fw = NullFirewall::default();
        fw.set_allowed_connection(IpAddr::from([1, 2, 3, 4]), "tun0")
            .await
            .unwrap();
        fw.set_vpn_connection("10.8.0.0/24", IpAddr::from([10, 8, 0, 1]))
            .await
            .unwrap();
        fw.remove_all().await.unwrap();

        let calls = fw.calls.lock().await;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2], "remove_all");
    }
}
