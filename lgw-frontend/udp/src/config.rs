use std::time::Duration;

/// Per-EUI flood protection settings.
#[derive(Debug, Clone)]
pub struct RateLimitingConfig {
    pub enable: bool,
    /// Number of most recent arrival times remembered per gateway.
    pub messages: usize,
    /// Minimum time the ring of remembered arrivals may span.
    pub threshold: Duration,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enable: true,
            messages: 10,
            threshold: Duration::from_millis(10),
        }
    }
}

/// Configuration of the Semtech UDP frontend.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Number of packet handler workers.
    pub packet_handlers: usize,
    /// Depth of the queue feeding the workers.
    pub packet_buffer: usize,
    /// Expire the downlink path when no PULL_DATA arrives for this long.
    pub downlink_path_expires: Duration,
    /// Evict per-gateway state when no traffic arrives for this long.
    pub connection_expires: Duration,
    /// Cache connect errors for this long to avoid stampedes.
    pub connection_error_expires: Duration,
    /// How early before its TX time a late-scheduled downlink is written.
    pub schedule_late_time: Duration,
    /// Block gateway address changes for this long; `None` disables the
    /// address-change filter.
    pub addr_change_block: Option<Duration>,
    pub rate_limiting: RateLimitingConfig,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            packet_handlers: 1024,
            packet_buffer: 50,
            downlink_path_expires: Duration::from_secs(90),
            connection_expires: Duration::from_secs(3 * 60),
            connection_error_expires: Duration::from_secs(5 * 60),
            schedule_late_time: Duration::from_millis(800),
            addr_change_block: None,
            rate_limiting: RateLimitingConfig::default(),
        }
    }
}
