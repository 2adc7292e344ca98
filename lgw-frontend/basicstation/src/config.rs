use std::time::Duration;

/// Configuration of the LBS LNS frontend.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Interval of server-initiated WebSocket pings.
    pub ws_ping_interval: Duration,
    /// Disconnect after this many pings without a pong.
    pub missed_pong_threshold: u32,
    /// Grant link rights to gateways that present no credentials.
    pub allow_unauthenticated: bool,
    /// Advertise a `wss://` traffic address in discovery replies.
    pub use_traffic_tls_address: bool,
    /// Answer `timesync` with GPS time; otherwise only `MuxTime` is sent.
    pub time_sync: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ws_ping_interval: Duration::from_secs(30),
            missed_pong_threshold: 2,
            allow_unauthenticated: false,
            use_traffic_tls_address: false,
            time_sync: true,
        }
    }
}
