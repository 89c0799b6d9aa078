//! Public-IP probe: not a supervised loop (spec gives it no start/stop
//! surface), just a periodic background task refreshing a cached
//! `IpInfoData` read by `GET /publicip/ip`.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::StatusCode;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{TunnelError, TunnelResult};
use crate::model::IpInfoData;

const PROBE_URL: &str = "https://api.myip.com/";

static COUNTRY_NAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("us", "United States"),
        ("ca", "Canada"),
        ("gb", "United Kingdom"),
        ("de", "Germany"),
        ("fr", "France"),
        ("nl", "Netherlands"),
        ("se", "Sweden"),
        ("ch", "Switzerland"),
        ("jp", "Japan"),
        ("au", "Australia"),
        ("sg", "Singapore"),
        ("br", "Brazil"),
    ])
});

/// Fetch the caller's public IP info from the upstream service. See
/// spec §6: `429` maps to `TooManyRequests`, any other non-200 to
/// `BadHttpStatus`.
pub async fn probe_public_ip(client: &reqwest::Client) -> TunnelResult<IpInfoData> {
    let response = client.get(PROBE_URL).send().await?;
    match response.status() {
        StatusCode::OK => {}
        StatusCode::TOO_MANY_REQUESTS => return Err(TunnelError::TooManyRequests),
        other => return Err(TunnelError::BadHttpStatus(other.as_u16())),
    }

    let mut info: IpInfoData = response.json().await?;
    let lowered = info.country_code.to_ascii_lowercase();
    if let Some(name) = COUNTRY_NAMES.get(lowered.as_str()) {
        info.country = name.to_string();
    }
    Ok(info)
}

/// Background task owned by the daemon: refreshes `cache` every
/// `interval` until cancelled.
pub async fn run_public_ip_loop(
    client: reqwest::Client,
    cache: std::sync::Arc<RwLock<IpInfoData>>,
    interval: Duration,
    ctx: tokio_util::sync::CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ctx.cancelled() => return,
            _ = ticker.tick() => {
                match probe_public_ip(&client).await {
                    Ok(info) => {
                        debug!("publicip: refreshed ({})", info.ip);
                        *cache.write().await = info;
                    }
                    Err(error) => warn!("publicip: probe failed: {error}"),
                }
            }
        }
    }
}
