//! End-to-end tests against the HTTP control plane, exercising the
//! testable scenarios from the supervisor's spec: cold start, invalid
//! transitions, settings-triggered restarts, and settings redaction.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use libtunnelctl::control::{router, AppState};
use libtunnelctl::dns_loop::DnsLoop;
use libtunnelctl::firewall::NullFirewall;
use libtunnelctl::inventory::ServerInventory;
use libtunnelctl::model::{
    DnsSettings, IpInfoData, PortForwardPolicy, ProviderServers, Server, VpnCredentials, VpnProtocol,
    VpnSettings,
};
use libtunnelctl::provider::ProviderRegistry;
use libtunnelctl::vpn_loop::VpnLoop;
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tower::ServiceExt;

fn sample_server() -> Server {
    Server {
        vpn: VpnProtocol::Openvpn,
        country: "DE".to_string(),
        region: String::new(),
        city: String::new(),
        hostname: "de1".to_string(),
        ips: vec!["198.51.100.10".parse().unwrap()],
        public_key: None,
        udp: true,
        tcp: false,
    }
}

fn other_server() -> Server {
    Server {
        vpn: VpnProtocol::Openvpn,
        country: "FR".to_string(),
        region: String::new(),
        city: String::new(),
        hostname: "fr1".to_string(),
        ips: vec!["198.51.100.20".parse().unwrap()],
        public_key: None,
        udp: true,
        tcp: false,
    }
}

fn sample_settings() -> VpnSettings {
    VpnSettings {
        provider: "exampleopenvpn".to_string(),
        selection_vpn: None,
        selection_countries: vec![],
        selection_regions: vec![],
        selection_cities: vec![],
        selection_hostnames: vec![],
        credentials: VpnCredentials {
            user: "alice".to_string(),
            password: "hunter2".to_string(),
            private_key: None,
        },
        port_forwarding: PortForwardPolicy::default(),
        dns: DnsSettings::default(),
    }
}

fn build_state() -> AppState {
    let providers = Arc::new(ProviderRegistry::with_example_providers());
    let mut inventory = ServerInventory::new(providers.order());
    inventory.set_provider_servers(
        "exampleopenvpn",
        ProviderServers {
            version: 1,
            timestamp: 0,
            servers: vec![sample_server(), other_server()],
        },
    );
    let inventory = Arc::new(RwLock::new(inventory));
    let firewall = Arc::new(NullFirewall::default());
    let (gateway_tx, _gateway_rx) = mpsc::channel(1);

    let vpn = Arc::new(VpnLoop::new(
        providers,
        inventory,
        firewall,
        sample_settings(),
        gateway_tx,
    ));
    let dns = Arc::new(DnsLoop::new("dns-over-tls-forwarder", DnsSettings::default()));

    AppState {
        vpn,
        dns,
        public_ip: Arc::new(RwLock::new(IpInfoData::default())),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn cold_start_reaches_running_and_outcome_matches() {
    let app = router(build_state());
    let request = Request::builder()
        .method("PUT")
        .uri("/v1/openvpn/status")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "status": "running" }).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["outcome"], "vpn started");
}

#[tokio::test]
async fn invalid_transition_returns_bad_request() {
    let app = router(build_state());
    let request = Request::builder()
        .method("PUT")
        .uri("/v1/openvpn/status")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "status": "stopping" }).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "invalid transition: stopped→stopping");
}

#[tokio::test]
async fn settings_reload_restarts_with_new_selection() {
    let state = build_state();
    let app = router(state.clone());

    let start = Request::builder()
        .method("PUT")
        .uri("/v1/openvpn/status")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "status": "running" }).to_string()))
        .unwrap();
    app.clone().oneshot(start).await.unwrap();

    let set_server = Request::builder()
        .method("PUT")
        .uri("/v1/openvpn/settings/server")
        .header("content-type", "application/json")
        .body(
            Body::from(
                json!({
                    "vpn": "openvpn",
                    "country": "FR",
                    "region": "",
                    "city": "",
                    "hostname": "fr1",
                })
                .to_string(),
            ),
        )
        .unwrap();
    let response = app.oneshot(set_server).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["outcome"], "vpn restarted");
    assert_eq!(state.vpn.get_settings().await.selection_countries, vec!["FR".to_string()]);
}

#[tokio::test]
async fn settings_are_redacted_over_http() {
    let app = router(build_state());
    let request = Request::builder()
        .method("GET")
        .uri("/v1/openvpn/settings")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["credentials"]["user"], "redacted");
    assert_eq!(body["credentials"]["password"], "redacted");
}

#[tokio::test]
async fn empty_password_credentials_are_still_redacted() {
    // A WireGuard-only session has no user/password, only a private key.
    // Redaction must not leak that absence by returning an empty string.
    let providers = Arc::new(ProviderRegistry::with_example_providers());
    let mut inventory = ServerInventory::new(providers.order());
    inventory.set_provider_servers(
        "examplewireguard",
        ProviderServers {
            version: 1,
            timestamp: 0,
            servers: vec![sample_server()],
        },
    );
    let inventory = Arc::new(RwLock::new(inventory));
    let firewall = Arc::new(NullFirewall::default());
    let (gateway_tx, _gateway_rx) = mpsc::channel(1);

    let settings = VpnSettings {
        provider: "examplewireguard".to_string(),
        credentials: VpnCredentials {
            user: String::new(),
            password: String::new(),
            private_key: Some("zzz".to_string()),
        },
        ..sample_settings()
    };
    let vpn = Arc::new(VpnLoop::new(providers, inventory, firewall, settings, gateway_tx));
    let dns = Arc::new(DnsLoop::new("dns-over-tls-forwarder", DnsSettings::default()));
    let state = AppState {
        vpn,
        dns,
        public_ip: Arc::new(RwLock::new(IpInfoData::default())),
    };
    let app = router(state);

    let request = Request::builder()
        .method("GET")
        .uri("/v1/openvpn/settings")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["credentials"]["user"], "redacted");
    assert_eq!(body["credentials"]["password"], "redacted");
    assert_eq!(body["credentials"]["private_key"], "redacted");
}

#[tokio::test]
async fn port_forwarded_is_zero_until_running() {
    let app = router(build_state());
    let request = Request::builder()
        .method("GET")
        .uri("/v1/openvpn/portforwarded")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["port"], 0);
}
