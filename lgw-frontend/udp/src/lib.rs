//! Semtech UDP packet-forwarder frontend.
//!
//! Reconstructs logical gateway connections over connectionless UDP: a read
//! loop feeds a worker pool, per-EUI state carries the downlink path and the
//! roll-over clock, and a per-connection dispatcher writes `PULL_RESP` frames
//! either just-in-time or shortly before their TX time.

mod config;
mod firewall;
mod frontend;
pub mod packets;
mod translate;

pub use config::{RateLimitingConfig, UdpConfig};
pub use firewall::{AddrChangeFirewall, Firewall, RateLimitingFirewall};
pub use frontend::{serve, UdpFrontend};
