//! Domain model of the gateway-facing I/O layer.
//!
//! These types are the normalized in-memory representation shared by every
//! protocol frontend: gateway identifiers, radio parameters, frequency plans
//! and the uplink / downlink / status / tx-ack records exchanged with the
//! upstream server.

mod band;
mod datarate;
mod eui;
mod fplan;
mod ids;
mod messages;

pub use band::{band, Band, EU_863_870};
pub use datarate::DataRate;
pub use eui::Eui64;
pub use fplan::{DownlinkChannel, FrequencyPlan, Radio, SubBand, UplinkChannel};
pub use ids::{Antenna, Gateway, GatewayIds};
pub use messages::{
    DeviceClass, DownlinkMessage, DownlinkPath, DownlinkSettings, GatewayStatus, RxMetadata,
    TxAckResult, TxAcknowledgment, TxRequest, TxSettings, UplinkMessage, UplinkSettings,
};
