//! LoRa Basics Station LNS frontend.
//!
//! Two WebSocket endpoints: `/router-info` answers the discovery handshake
//! and `/traffic/:id` carries the long-lived data connection, a JSON protocol
//! dispatched on `msgtype`. Session state tracks the gateway-chosen 16-bit
//! session marker carried in the upper bits of `xtime` so downlinks reference
//! the session their anchoring uplink came from.

mod config;
mod frontend;
pub mod id6;
pub mod messages;
mod routerconf;
mod translate;

pub use config::WsConfig;
pub use frontend::{configure, discover_response, parse_traffic_id, LbsFrontend, Traffic};
pub use routerconf::build_router_config;
