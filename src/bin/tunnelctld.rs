//! tunnelctld - the VPN tunnel supervisor daemon.
//!
//! Brings up the VPN loop, DNS-over-TLS loop, public-IP probe and
//! port-forward supervisor, then serves the HTTP control plane.

use std::sync::Arc;

use clap::Parser;
use libtunnelctl::control::{router, AppState};
use libtunnelctl::dns_loop::DnsLoop;
use libtunnelctl::firewall::IptablesFirewall;
use libtunnelctl::inventory::ServerInventory;
use libtunnelctl::model::{IpInfoData, LoopStatus};
use libtunnelctl::portforward_loop::PortForwardLoop;
use libtunnelctl::provider::ProviderRegistry;
use libtunnelctl::publicip::run_public_ip_loop;
use libtunnelctl::vpn_loop::VpnLoop;
use libtunnelctl::{AppConfig, TunnelError, TunnelResult};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "tunnelctld")]
#[command(author = "tunnelctl contributors")]
#[command(version)]
#[command(about = "VPN tunnel supervisor daemon", long_about = None)]
struct Args {
    /// Path to the daemon's TOML configuration file.
    #[arg(long, default_value = "/etc/tunnelctl/tunnelctld.toml")]
    config: std::path::PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> TunnelResult<()> {
    let args = Args::parse();
    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("warning: {error}, using defaults");
            AppConfig::default()
        }
    };

    init_logging(&config, args.verbose);
    info!("starting tunnelctld v{}", env!("CARGO_PKG_VERSION"));

    let providers = Arc::new(ProviderRegistry::with_example_providers());

    let inventory = match tokio::fs::read(&config.catalog_path).await {
        Ok(bytes) => ServerInventory::load_from_bytes(providers.order(), &bytes)?,
        Err(error) => {
            warn!(
                "failed to read catalog {:?}: {error}, starting with an empty one",
                config.catalog_path
            );
            ServerInventory::new(providers.order())
        }
    };
    let inventory = Arc::new(RwLock::new(inventory));

    let firewall = IptablesFirewall::new();
    let (gateway_tx, gateway_rx) = mpsc::channel(1);

    let vpn = Arc::new(VpnLoop::new(
        providers.clone(),
        inventory.clone(),
        firewall.clone(),
        config.vpn.clone(),
        gateway_tx,
    ));
    let dns = Arc::new(DnsLoop::new(config.dns_resolver_binary.clone(), config.dns.clone()));
    let public_ip = Arc::new(RwLock::new(IpInfoData::default()));
    let port_forward = PortForwardLoop::new(vpn.port_state());

    let publicip_ctx = CancellationToken::new();
    tokio::spawn(run_public_ip_loop(
        reqwest::Client::new(),
        public_ip.clone(),
        std::time::Duration::from_secs(config.publicip_interval_secs),
        publicip_ctx.clone(),
    ));

    {
        let port_forward = port_forward.clone();
        let provider = providers
            .get(&config.vpn.provider)
            .map_err(|error| TunnelError::ConfigError(error.to_string()))?;
        let firewall: Arc<dyn libtunnelctl::Firewall> = firewall.clone();
        tokio::spawn(port_forward.run(gateway_rx, provider, firewall, reqwest::Client::new()));
    }

    let state = AppState {
        vpn: vpn.clone(),
        dns: dns.clone(),
        public_ip,
    };
    let app = router(state);

    info!("listening on http://{}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .map_err(TunnelError::Io)?;

    tokio::select! {
        result = async { axum::serve(listener, app).await } => {
            if let Err(error) = result {
                error!("HTTP server error: {error}");
            }
        }
        _ = handle_signals() => {
            info!("shutting down");
        }
    }

    // Root context cancellation (spec §5): stop every loop so run tasks
    // tear down their firewall rules and external processes before the
    // process exits, rather than being dropped mid-tunnel.
    if let Err(error) = vpn.apply_status(LoopStatus::Stopped).await {
        warn!("vpn: error while stopping during shutdown: {error}");
    }
    if let Err(error) = dns.apply_status(LoopStatus::Stopped).await {
        warn!("dns: error while stopping during shutdown: {error}");
    }
    publicip_ctx.cancel();
    Ok(())
}

fn init_logging(config: &AppConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tunnelctld={level},libtunnelctl={level}")));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(atty::is(atty::Stream::Stdout))
        .init();
}

async fn handle_signals() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
