use chrono::{DateTime, Duration, Utc};

/// Roll-over aware synchronization between a gateway's 32-bit microsecond
/// concentrator counter and a monotonic 64-bit concentrator time.
///
/// The 32-bit counter wraps roughly every 71 minutes; `sync` must therefore be
/// called at least once per wrap interval (every uplink batch does) for the
/// accumulated time to stay monotonic.
#[derive(Debug, Default, Clone)]
pub struct RolloverClock {
    synced: bool,
    /// Accumulated concentrator time at the last sync, in microseconds.
    concentrator_time: u64,
    /// Concentrator timestamp observed at the last sync.
    last_timestamp: u32,
    /// Server wall-clock at the last sync.
    server_time: Option<DateTime<Utc>>,
    /// Gateway wall-clock at the last sync, when the gateway reports one.
    gateway_time: Option<DateTime<Utc>>,
}

impl RolloverClock {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Synchronizes the clock with a newly observed concentrator timestamp.
    pub fn sync(&mut self, timestamp: u32, server_time: DateTime<Utc>) {
        self.advance(timestamp);
        self.server_time = Some(server_time);
        self.gateway_time = None;
        self.synced = true;
    }

    /// Synchronizes with a timestamp for which the gateway also reported its
    /// own wall-clock time.
    pub fn sync_with_gateway_time(
        &mut self,
        timestamp: u32,
        server_time: DateTime<Utc>,
        gateway_time: DateTime<Utc>,
    ) {
        self.sync(timestamp, server_time);
        self.gateway_time = Some(gateway_time);
    }

    fn advance(&mut self, timestamp: u32) {
        if self.synced {
            let delta = timestamp.wrapping_sub(self.last_timestamp);
            self.concentrator_time = self.concentrator_time.wrapping_add(delta as u64);
        } else {
            self.concentrator_time = timestamp as u64;
        }
        self.last_timestamp = timestamp;
    }

    /// Resolves a (possibly future) concentrator timestamp to 64-bit
    /// concentrator time, relative to the last sync.
    ///
    /// Timestamps are interpreted as the nearest instant at or after the last
    /// sync, which matches downlink scheduling: a downlink always radiates
    /// after the uplink that anchored the clock.
    pub fn from_timestamp(&self, timestamp: u32) -> Option<u64> {
        if !self.synced {
            return None;
        }
        let delta = timestamp.wrapping_sub(self.last_timestamp);
        Some(self.concentrator_time.wrapping_add(delta as u64))
    }

    /// Maps 64-bit concentrator time to server wall-clock time.
    pub fn to_server_time(&self, concentrator_time: u64) -> Option<DateTime<Utc>> {
        let at_sync = self.server_time?;
        let delta = concentrator_time as i64 - self.concentrator_time as i64;
        Some(at_sync + Duration::microseconds(delta))
    }

    /// Estimates the concentrator time at a server wall-clock instant.
    pub fn concentrator_time_at(&self, server_time: DateTime<Utc>) -> Option<u64> {
        let at_sync = self.server_time?;
        let delta = (server_time - at_sync).num_microseconds()?;
        let estimate = self.concentrator_time as i64 + delta;
        if estimate < 0 {
            return None;
        }
        Some(estimate as u64)
    }

    /// Maps 64-bit concentrator time to the gateway's own wall-clock, when
    /// the gateway has reported one.
    pub fn to_gateway_time(&self, concentrator_time: u64) -> Option<DateTime<Utc>> {
        let at_sync = self.gateway_time?;
        let delta = concentrator_time as i64 - self.concentrator_time as i64;
        Some(at_sync + Duration::microseconds(delta))
    }
}
