//! Core of the gateway-facing I/O layer.
//!
//! A protocol frontend terminates gateway connections on the wire and speaks
//! to the rest of the server exclusively through [`Connection`]: a bounded,
//! non-blocking mailbox that owns the gateway's downlink scheduling clock,
//! statistics and round-trip correlation state.

mod clock;
mod connection;
mod counters;
mod rtt;
mod server;
mod tokens;
mod uplink_token;

pub use clock::RolloverClock;
pub use connection::{Connection, ConnectionStats};
pub use counters::IoCounters;
pub use rtt::{RttSampler, RttStats};
pub use server::{Frontend, GatewayServer, NoopRateLimiter, RateLimiter, Scheduler};
pub use tokens::DownlinkTokens;
pub use uplink_token::{must_uplink_token, parse_uplink_token, uplink_token, UplinkToken};

/// Capacity of each per-connection mailbox channel.
pub const BUFFER_SIZE: usize = 10;
