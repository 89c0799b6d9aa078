//! tunnelcli - thin HTTP client for tunnelctld's control plane.
//!
//! Issues the same `/v1/...` requests a human would otherwise curl,
//! mirroring the teacher's `nccli` subcommand-per-operation shape.

use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "tunnelcli")]
#[command(author = "tunnelctl contributors")]
#[command(version)]
#[command(about = "Control client for tunnelctld", long_about = None)]
struct Cli {
    /// Base URL of the running daemon.
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    base_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current VPN tunnel status.
    Status,
    /// Request the VPN tunnel transition to `running` or `stopped`.
    SetStatus {
        #[arg(value_parser = ["running", "stopped"])]
        status: String,
    },
    /// Show the current (redacted) VPN settings.
    Settings,
    /// Narrow the server selection to a single server and restart.
    SetServer {
        vpn: String,
        country: String,
        #[arg(default_value = "")]
        region: String,
        #[arg(default_value = "")]
        city: String,
        hostname: String,
    },
    /// List the full server catalog for the active provider.
    Servers,
    /// Show the currently forwarded port.
    Portforwarded,
    /// Show the cached public-IP info.
    Publicip,
    /// Show the DNS-over-TLS loop status.
    DnsStatus,
    /// Request the DNS-over-TLS loop transition to `running` or `stopped`.
    DnsSetStatus {
        #[arg(value_parser = ["running", "stopped"])]
        status: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let value: Value = match cli.command {
        Commands::Status => client.get(url(&cli.base_url, "/openvpn/status")).send().await?.json().await?,
        Commands::SetStatus { status } => {
            client
                .put(url(&cli.base_url, "/openvpn/status"))
                .json(&serde_json::json!({ "status": status }))
                .send()
                .await?
                .json()
                .await?
        }
        Commands::Settings => client.get(url(&cli.base_url, "/openvpn/settings")).send().await?.json().await?,
        Commands::SetServer { vpn, country, region, city, hostname } => {
            client
                .put(url(&cli.base_url, "/openvpn/settings/server"))
                .json(&serde_json::json!({
                    "vpn": vpn,
                    "country": country,
                    "region": region,
                    "city": city,
                    "hostname": hostname,
                }))
                .send()
                .await?
                .json()
                .await?
        }
        Commands::Servers => client.get(url(&cli.base_url, "/openvpn/servers")).send().await?.json().await?,
        Commands::Portforwarded => {
            client.get(url(&cli.base_url, "/openvpn/portforwarded")).send().await?.json().await?
        }
        Commands::Publicip => client.get(url(&cli.base_url, "/publicip/ip")).send().await?.json().await?,
        Commands::DnsStatus => client.get(url(&cli.base_url, "/dns/status")).send().await?.json().await?,
        Commands::DnsSetStatus { status } => {
            client
                .put(url(&cli.base_url, "/dns/status"))
                .json(&serde_json::json!({ "status": status }))
                .send()
                .await?
                .json()
                .await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn url(base: &str, path: &str) -> String {
    format!("{base}/v1{path}")
}
