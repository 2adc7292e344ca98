use crate::{DataRate, GatewayIds};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Radio settings an uplink was received with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkSettings {
    pub data_rate: DataRate,
    pub data_rate_index: u8,
    /// Carrier frequency in Hz.
    pub frequency: u64,
    /// 32-bit concentrator timestamp in microseconds.
    pub timestamp: u32,
    /// Gateway wall-clock time of reception, when the gateway provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

/// Per-antenna reception metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxMetadata {
    pub antenna_index: u32,
    /// 32-bit concentrator timestamp in microseconds.
    pub timestamp: u32,
    pub rssi: f32,
    pub snr: f32,
    pub channel_index: u32,
    /// Opaque token that lets a later downlink address this reception path.
    #[serde(with = "serde_bytes_hex")]
    pub uplink_token: Vec<u8>,
}

/// A normalized uplink as handed to the upstream server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkMessage {
    #[serde(with = "serde_bytes_hex")]
    pub raw_payload: Vec<u8>,
    pub settings: UplinkSettings,
    pub rx_metadata: Vec<RxMetadata>,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub correlation_ids: Vec<String>,
}

/// A gateway status report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub time: Option<DateTime<Utc>>,
    /// Free-form version strings (station, firmware, packet forwarder...).
    #[serde(default)]
    pub versions: HashMap<String, String>,
    /// Numeric status metrics (rxnb, rxok, ackr...).
    #[serde(default)]
    pub metrics: HashMap<String, f32>,
}

/// Result of a downlink transmission as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxAckResult {
    Success,
    TooLate,
    TooEarly,
    CollisionPacket,
    CollisionBeacon,
    TxFreq,
    TxPower,
    GpsUnlocked,
    InternalError,
}

/// Acknowledgement of a downlink, correlated back through the token ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxAcknowledgment {
    #[serde(default)]
    pub correlation_ids: Vec<String>,
    pub result: TxAckResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    A,
    B,
    C,
}

/// Where a downlink should be transmitted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DownlinkPath {
    /// Follow the reception path of a previous uplink.
    UplinkToken(#[serde(with = "serde_bytes_hex")] Vec<u8>),
    /// Transmit from a fixed gateway antenna, without an anchoring uplink.
    Fixed { ids: GatewayIds, antenna_index: u32 },
}

/// A request to transmit, before concrete TX settings are chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRequest {
    pub class: DeviceClass,
    pub downlink_paths: Vec<DownlinkPath>,
    /// RX1 delay in seconds after the uplink; RX2 opens one second later.
    pub rx1_delay: u32,
    pub rx1_data_rate_index: u8,
    pub rx1_frequency: u64,
    pub rx2_data_rate_index: u8,
    pub rx2_frequency: u64,
    pub priority: u8,
    /// Transmit at this absolute gateway time instead of relative to the
    /// uplink.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_time: Option<DateTime<Utc>>,
    pub frequency_plan_id: String,
}

impl Default for TxRequest {
    fn default() -> Self {
        Self {
            class: DeviceClass::A,
            downlink_paths: Vec::new(),
            rx1_delay: 1,
            rx1_data_rate_index: 0,
            rx1_frequency: 0,
            rx2_data_rate_index: 0,
            rx2_frequency: 0,
            priority: 25,
            absolute_time: None,
            frequency_plan_id: String::new(),
        }
    }
}

/// Concrete transmission settings as handed to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxSettings {
    pub data_rate: DataRate,
    /// Carrier frequency in Hz.
    pub frequency: u64,
    /// Effective isotropically radiated power in dBm.
    pub power: f32,
    /// 32-bit concentrator timestamp at which to radiate.
    pub timestamp: u32,
    /// Roll-over corrected concentrator time in microseconds, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concentrator_time: Option<u64>,
    /// Absolute gateway time, for GPS-disciplined transmission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    pub antenna_index: u32,
    pub invert_polarization: bool,
    pub coding_rate: String,
}

/// Downlink settings: either still a request, or already scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DownlinkSettings {
    Request(TxRequest),
    Scheduled(TxSettings),
}

impl DownlinkSettings {
    #[inline]
    pub fn as_scheduled(&self) -> Option<&TxSettings> {
        match self {
            DownlinkSettings::Scheduled(s) => Some(s),
            DownlinkSettings::Request(_) => None,
        }
    }
}

/// A downlink on its way to a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownlinkMessage {
    #[serde(with = "serde_bytes_hex")]
    pub raw_payload: Vec<u8>,
    #[serde(default)]
    pub correlation_ids: Vec<String>,
    pub settings: DownlinkSettings,
}

/// Hex (de)serialization for raw byte payloads embedded in JSON.
mod serde_bytes_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
