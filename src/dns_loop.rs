//! DNS-over-TLS loop: supervises an external forwarder process the same
//! way the VPN loop supervises a tunnel, but with no provider/firewall
//! dependency and only `GetStatus`/`ApplyStatus` exposed externally.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{TunnelError, TunnelResult};
use crate::loop_runtime::{Loop, ReadySignal, RunTask};
use crate::model::{DnsSettings, LoopStatus};

pub struct DnsRunTask {
    resolver_binary: String,
}

impl DnsRunTask {
    pub fn new(resolver_binary: impl Into<String>) -> Self {
        DnsRunTask {
            resolver_binary: resolver_binary.into(),
        }
    }
}

#[async_trait]
impl RunTask<DnsSettings> for DnsRunTask {
    async fn run(&self, ctx: CancellationToken, settings: DnsSettings, ready: ReadySignal) -> TunnelResult<()> {
        if !settings.enabled {
            // Nothing to supervise; stay "running" with no child process
            // until stopped or disabled settings are reapplied.
            ready.signal();
            ctx.cancelled().await;
            return Err(TunnelError::Cancelled);
        }

        info!(
            "dns: starting {} -> {} ({})",
            self.resolver_binary, settings.resolver_address, settings.tls_hostname
        );
        let mut child = Command::new(&self.resolver_binary)
            .arg("--upstream")
            .arg(&settings.resolver_address)
            .arg("--tls-hostname")
            .arg(&settings.tls_hostname)
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TunnelError::Io)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TunnelError::TunnelCrashed("resolver did not expose stdout".to_string())
        })?;
        let mut lines = BufReader::new(stdout).lines();

        let wait_for_listening = async {
            while let Ok(Some(line)) = lines.next_line().await {
                if line.contains("listening") {
                    return;
                }
            }
        };

        tokio::select! {
            _ = ctx.cancelled() => {
                graceful_kill(&mut child).await;
                return Err(TunnelError::Cancelled);
            }
            _ = wait_for_listening => {
                ready.signal();
            }
        }

        tokio::select! {
            _ = ctx.cancelled() => {
                graceful_kill(&mut child).await;
                Err(TunnelError::Cancelled)
            }
            status = child.wait() => {
                let status = status.map_err(TunnelError::Io)?;
                Err(TunnelError::TunnelCrashed(format!("resolver exited: {status}")))
            }
        }
    }
}

/// Cancellation is authoritative (spec §5): ask the resolver to exit
/// cleanly with SIGTERM, then force it after a 5s grace period.
async fn graceful_kill(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = Command::new("kill").args(["-TERM", &pid.to_string()]).status().await;
    }
    tokio::select! {
        _ = child.wait() => {}
        _ = tokio::time::sleep(Duration::from_secs(5)) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }
}

pub struct DnsLoop {
    inner: Arc<Loop<DnsRunTask, DnsSettings>>,
}

impl DnsLoop {
    pub fn new(resolver_binary: impl Into<String>, initial_settings: DnsSettings) -> Self {
        let run_task = Arc::new(DnsRunTask::new(resolver_binary));
        let inner = Loop::new("dns", run_task, initial_settings);
        DnsLoop { inner }
    }

    pub fn get_status(&self) -> LoopStatus {
        self.inner.get_status()
    }

    pub async fn apply_status(&self, target: LoopStatus) -> TunnelResult<String> {
        self.inner.apply_status(target).await
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<LoopStatus> {
        self.inner.subscribe()
    }
}
