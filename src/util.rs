use std::net::{IpAddr, Ipv4Addr, UdpSocket};

const DEFAULT_HUB_URL: &str = "http://127.0.0.1:8080";

pub fn get_default_hub_url() -> String {
    DEFAULT_HUB_URL.to_string()
}

const DEFAULT_SERVER_ID: &str = "unknown";

/// Identity used when the agent is started without an explicit server id
pub fn get_default_server_id() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| DEFAULT_SERVER_ID.to_string())
}

const FALLBACK_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Address of the interface that routes to the outside world
///
/// Connecting a UDP socket sends no packets; it only asks the kernel for a
/// route. Falls back to loopback on hosts without one.
pub fn get_local_ip() -> IpAddr {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map_or(FALLBACK_ADDR, |addr| addr.ip())
}
