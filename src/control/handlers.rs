use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{outcome_body, status_body, AppState};
use crate::control::ApiError;
use crate::model::{IpInfoData, LoopStatus, Server, VpnCredentials, VpnSettings};

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tunnelctld",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "tunnelctl control plane",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "openvpn_status": "/v1/openvpn/status",
            "openvpn_settings": "/v1/openvpn/settings",
            "openvpn_set_server": "/v1/openvpn/settings/server",
            "openvpn_servers": "/v1/openvpn/servers",
            "openvpn_portforwarded": "/v1/openvpn/portforwarded",
            "publicip": "/v1/publicip/ip",
            "dns_status": "/v1/dns/status",
        }
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: LoopStatus,
}

pub async fn openvpn_get_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(status_body(state.vpn.get_status()))
}

pub async fn openvpn_set_status(
    State(state): State<AppState>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!("openvpn: set status -> {}", req.status);
    let outcome = state.vpn.apply_status(req.status).await?;
    Ok(Json(outcome_body(outcome)))
}

/// Settings with credentials replaced by `"redacted"`, spec §6.
#[derive(Debug, Serialize)]
pub struct RedactedSettings {
    pub provider: String,
    pub selection_vpn: Option<crate::model::VpnProtocol>,
    pub selection_countries: Vec<String>,
    pub selection_regions: Vec<String>,
    pub selection_cities: Vec<String>,
    pub selection_hostnames: Vec<String>,
    pub credentials: VpnCredentials,
    pub port_forwarding: crate::model::PortForwardPolicy,
    pub dns: crate::model::DnsSettings,
}

fn redact(settings: VpnSettings) -> RedactedSettings {
    RedactedSettings {
        provider: settings.provider,
        selection_vpn: settings.selection_vpn,
        selection_countries: settings.selection_countries,
        selection_regions: settings.selection_regions,
        selection_cities: settings.selection_cities,
        selection_hostnames: settings.selection_hostnames,
        credentials: VpnCredentials {
            user: "redacted".to_string(),
            password: "redacted".to_string(),
            private_key: settings.credentials.private_key.map(|_| "redacted".to_string()),
        },
        port_forwarding: settings.port_forwarding,
        dns: settings.dns,
    }
}

pub async fn openvpn_get_settings(State(state): State<AppState>) -> Json<RedactedSettings> {
    Json(redact(state.vpn.get_settings().await))
}

pub async fn openvpn_set_server(
    State(state): State<AppState>,
    Json(server): Json<Server>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!("openvpn: set server -> {}", server.hostname);
    let current = state.vpn.get_settings().await;
    let narrowed = current.with_narrowed_selection(
        server.vpn,
        &server.country,
        &server.region,
        &server.city,
        &server.hostname,
    );
    let outcome = state.vpn.apply_settings(narrowed).await?;
    Ok(Json(outcome_body(outcome)))
}

pub async fn openvpn_get_servers(
    State(state): State<AppState>,
) -> Result<Json<Vec<Server>>, ApiError> {
    let servers = state.vpn.get_server_list().await?;
    Ok(Json(servers))
}

pub async fn openvpn_get_portforwarded(State(state): State<AppState>) -> Json<serde_json::Value> {
    let port = state.vpn.get_port_forwarded().await;
    Json(serde_json::json!({ "port": port }))
}

pub async fn publicip_get_ip(State(state): State<AppState>) -> Json<IpInfoData> {
    Json(state.public_ip.read().await.clone())
}

pub async fn dns_get_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(status_body(state.dns.get_status()))
}

pub async fn dns_set_status(
    State(state): State<AppState>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!("dns: set status -> {}", req.status);
    let outcome = state.dns.apply_status(req.status).await?;
    Ok(Json(outcome_body(outcome)))
}
