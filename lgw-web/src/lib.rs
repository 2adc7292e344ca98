//! HTTP side-channel of the UDP frontend.
//!
//! A single endpoint returns the Semtech `global_conf.json` a packet
//! forwarder needs to operate under a gateway's frequency plan.

mod api;
mod global_conf;

pub use api::{configure, WebConfig, WebState};
pub use global_conf::{build_global_conf, GlobalConf};
