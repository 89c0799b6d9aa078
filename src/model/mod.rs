//! Data model shared by the server inventory, provider registry and loops.

mod server;
mod settings;

pub use server::{ProviderServers, Server, ServerSelection, VpnProtocol};
pub use settings::{
    ConnectionSpec, DnsSettings, IpInfoData, LoopStatus, PortForwardPolicy, PortForwardState,
    VpnCredentials, VpnSettings,
};
