use config::{Config, Environment, File};
use lgw_error::{GwError, GwResult};
use lgw_frontend_basicstation::WsConfig;
use lgw_frontend_udp::{RateLimitingConfig, UdpConfig};
use lgw_web::WebConfig;
use serde::Deserialize;
use std::{path::Path, time::Duration};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UdpSettings {
    pub listen: String,
    pub packet_handlers: usize,
    pub packet_buffer: usize,
    pub downlink_path_expires_secs: u64,
    pub connection_expires_secs: u64,
    pub connection_error_expires_secs: u64,
    pub schedule_late_time_ms: u64,
    pub addr_change_block_secs: u64,
    pub rate_limiting_enable: bool,
    pub rate_limiting_messages: usize,
    pub rate_limiting_threshold_ms: u64,
}

impl Default for UdpSettings {
    fn default() -> Self {
        let defaults = UdpConfig::default();
        Self {
            listen: "0.0.0.0:1700".to_string(),
            packet_handlers: defaults.packet_handlers,
            packet_buffer: defaults.packet_buffer,
            downlink_path_expires_secs: defaults.downlink_path_expires.as_secs(),
            connection_expires_secs: defaults.connection_expires.as_secs(),
            connection_error_expires_secs: defaults.connection_error_expires.as_secs(),
            schedule_late_time_ms: defaults.schedule_late_time.as_millis() as u64,
            addr_change_block_secs: 0,
            rate_limiting_enable: defaults.rate_limiting.enable,
            rate_limiting_messages: defaults.rate_limiting.messages,
            rate_limiting_threshold_ms: defaults.rate_limiting.threshold.as_millis() as u64,
        }
    }
}

impl UdpSettings {
    pub fn to_config(&self) -> UdpConfig {
        UdpConfig {
            packet_handlers: self.packet_handlers,
            packet_buffer: self.packet_buffer,
            downlink_path_expires: Duration::from_secs(self.downlink_path_expires_secs),
            connection_expires: Duration::from_secs(self.connection_expires_secs),
            connection_error_expires: Duration::from_secs(self.connection_error_expires_secs),
            schedule_late_time: Duration::from_millis(self.schedule_late_time_ms),
            addr_change_block: match self.addr_change_block_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            rate_limiting: RateLimitingConfig {
                enable: self.rate_limiting_enable,
                messages: self.rate_limiting_messages,
                threshold: Duration::from_millis(self.rate_limiting_threshold_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WsSettings {
    pub listen: String,
    pub ping_interval_secs: u64,
    pub missed_pong_threshold: u32,
    pub allow_unauthenticated: bool,
    pub use_traffic_tls_address: bool,
    pub time_sync: bool,
}

impl Default for WsSettings {
    fn default() -> Self {
        let defaults = WsConfig::default();
        Self {
            listen: "0.0.0.0:8887".to_string(),
            ping_interval_secs: defaults.ws_ping_interval.as_secs(),
            missed_pong_threshold: defaults.missed_pong_threshold,
            allow_unauthenticated: defaults.allow_unauthenticated,
            use_traffic_tls_address: defaults.use_traffic_tls_address,
            time_sync: defaults.time_sync,
        }
    }
}

impl WsSettings {
    pub fn to_config(&self) -> WsConfig {
        WsConfig {
            ws_ping_interval: Duration::from_secs(self.ping_interval_secs),
            missed_pong_threshold: self.missed_pong_threshold,
            allow_unauthenticated: self.allow_unauthenticated,
            use_traffic_tls_address: self.use_traffic_tls_address,
            time_sync: self.time_sync,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub require_auth: bool,
    pub server_address: String,
    pub serv_port_up: u16,
    pub serv_port_down: u16,
}

impl Default for WebSettings {
    fn default() -> Self {
        let defaults = WebConfig::default();
        Self {
            require_auth: defaults.require_auth,
            server_address: defaults.server_address,
            serv_port_up: defaults.serv_port_up,
            serv_port_down: defaults.serv_port_down,
        }
    }
}

impl WebSettings {
    pub fn to_config(&self) -> WebConfig {
        WebConfig {
            require_auth: self.require_auth,
            server_address: self.server_address.clone(),
            serv_port_up: self.serv_port_up,
            serv_port_down: self.serv_port_down,
        }
    }
}

/// Settings of the gateway server binary, layered from an optional TOML file
/// and `LGW_`-prefixed environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: LogSettings,
    pub udp: UdpSettings,
    pub ws: WsSettings,
    pub web: WebSettings,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> GwResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let config = builder
            .add_source(Environment::with_prefix("LGW").separator("__"))
            .build()
            .map_err(|e| GwError::Msg(format!("failed to load configuration: {e}")))?;
        config
            .try_deserialize()
            .map_err(|e| GwError::Msg(format!("invalid configuration: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_frontend_defaults() {
        let settings = Settings::default();
        let udp = settings.udp.to_config();
        assert_eq!(udp.packet_handlers, 1024);
        assert_eq!(udp.downlink_path_expires, Duration::from_secs(90));
        assert_eq!(udp.addr_change_block, None);
        assert!(udp.rate_limiting.enable);
        let ws = settings.ws.to_config();
        assert_eq!(ws.ws_ping_interval, Duration::from_secs(30));
        assert!(!ws.allow_unauthenticated);
    }
}
