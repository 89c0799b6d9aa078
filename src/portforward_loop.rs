//! Port-forward supervisor: message-driven from the VPN loop's gateway
//! signal rather than a back-reference (spec §9 design note), with no
//! external Start/Stop surface of its own.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::firewall::Firewall;
use crate::model::PortForwardState;
use crate::provider::VpnProvider;

struct Active {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

pub struct PortForwardLoop {
    state: Arc<Mutex<PortForwardState>>,
    filepath: Mutex<Option<PathBuf>>,
}

impl PortForwardLoop {
    /// `state` is the VPN loop's own `PortForwardState` (spec §3: the VPN
    /// loop exclusively owns it). Sharing the `Arc` rather than handing
    /// back a pointer to the whole loop keeps the no-back-reference design
    /// note (spec §9) while still making an assigned port immediately
    /// visible through `VpnLoop::get_port_forwarded`.
    pub fn new(state: Arc<Mutex<PortForwardState>>) -> Arc<Self> {
        Arc::new(PortForwardLoop {
            state,
            filepath: Mutex::new(None),
        })
    }

    pub async fn set_persist_path(&self, path: Option<PathBuf>) {
        *self.filepath.lock().await = path;
    }

    pub async fn current_port(&self) -> u16 {
        self.state.lock().await.0
    }

    /// Drives the supervisor: on every gateway address received, cancels
    /// any previous handshake and spawns a fresh one against the new
    /// gateway. Runs until `gateways` closes.
    pub async fn run(
        self: Arc<Self>,
        mut gateways: mpsc::Receiver<IpAddr>,
        provider: Arc<dyn VpnProvider>,
        firewall: Arc<dyn Firewall>,
        client: reqwest::Client,
    ) {
        let mut active: Option<Active> = None;
        while let Some(gateway) = gateways.recv().await {
            if let Some(old) = active.take() {
                old.cancel.cancel();
                let _ = old.task.await;
            }

            let cancel = CancellationToken::new();
            let this = self.clone();
            let provider = provider.clone();
            let firewall = firewall.clone();
            let client = client.clone();
            let child_cancel = cancel.clone();

            let task = tokio::spawn(async move {
                let sync_state: crate::provider::PortForwardSync = {
                    let this = this.clone();
                    Arc::new(move |port: u16| {
                        let this = this.clone();
                        tokio::spawn(async move {
                            this.state.lock().await.0 = port;
                            this.persist(port).await;
                        });
                    })
                };
                info!("portforward: starting handshake via gateway {gateway}");
                if let Err(error) = provider
                    .port_forward(child_cancel, client, gateway, firewall, sync_state)
                    .await
                {
                    warn!("portforward: handshake ended: {error}");
                }
            });

            active = Some(Active { cancel, task });
        }

        if let Some(old) = active.take() {
            old.cancel.cancel();
            let _ = old.task.await;
        }
    }

    async fn persist(&self, port: u16) {
        let Some(path) = self.filepath.lock().await.clone() else {
            return;
        };
        let tmp = path.with_extension("tmp");
        if let Err(error) = tokio::fs::write(&tmp, port.to_string()).await {
            warn!("portforward: failed writing {tmp:?}: {error}");
            return;
        }
        if let Err(error) = tokio::fs::rename(&tmp, &path).await {
            warn!("portforward: failed renaming {tmp:?} -> {path:?}: {error}");
        }
    }
}
