//! HTTP control plane: the `/v1/...` REST surface spec §6 describes,
//! built the way the teacher's `crrouter-web` binary builds its API
//! (`AppState` + `axum::Router` + `CorsLayer`/`TraceLayer`).

mod error;
mod handlers;

pub use error::ApiError;

use std::sync::Arc;

use axum::routing::{get, put};
use axum::Router;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dns_loop::DnsLoop;
use crate::model::IpInfoData;
use crate::vpn_loop::VpnLoop;

/// Port forwarding has no HTTP surface of its own (spec §6: only
/// `GET /openvpn/portforwarded`, served off the VPN loop's own state) — the
/// `PortForwardLoop` task runs independently of the control plane and isn't
/// part of this state.
#[derive(Clone)]
pub struct AppState {
    pub vpn: Arc<VpnLoop>,
    pub dns: Arc<DnsLoop>,
    pub public_ip: Arc<RwLock<IpInfoData>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/v1", get(handlers::api_info))
        .route(
            "/v1/openvpn/status",
            get(handlers::openvpn_get_status).put(handlers::openvpn_set_status),
        )
        .route("/v1/openvpn/settings", get(handlers::openvpn_get_settings))
        .route(
            "/v1/openvpn/settings/server",
            put(handlers::openvpn_set_server),
        )
        .route("/v1/openvpn/servers", get(handlers::openvpn_get_servers))
        .route(
            "/v1/openvpn/portforwarded",
            get(handlers::openvpn_get_portforwarded),
        )
        .route("/v1/publicip/ip", get(handlers::publicip_get_ip))
        .route(
            "/v1/dns/status",
            get(handlers::dns_get_status).put(handlers::dns_set_status),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub(crate) fn status_body(status: crate::model::LoopStatus) -> serde_json::Value {
    serde_json::json!({ "status": status.to_string() })
}

pub(crate) fn outcome_body(outcome: String) -> serde_json::Value {
    serde_json::json!({ "outcome": outcome })
}
