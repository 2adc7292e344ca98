pub mod web;

use anyhow::Error as AnyhowError;
use serde_json::Error as SerdeJsonError;
use std::{io::Error as IoError, num::TryFromIntError};
use thiserror::Error;
use tokio::{task::JoinError, time::Duration};
use web::WebError;

pub type GwResult<T, E = GwError> = anyhow::Result<T, E>;

/// Error kinds raised by the gateway I/O layer.
///
/// The protocol frontends translate these into on-wire behavior; the variant
/// names are stable identifiers used in logs and tests.
#[derive(Error, Debug)]
pub enum GwError {
    /// A bounded connection channel was full; the message was dropped.
    #[error("buffer full on `{0}` channel")]
    BufferFull(&'static str),
    /// The connection was disconnected with the given cause.
    #[error("connection disconnected: {0}")]
    Disconnected(String),

    // --- SendDown / downlink scheduling ---
    #[error("downlink message does not contain a TxRequest")]
    NotTxRequest,
    #[error("invalid downlink path: {0}")]
    DownlinkPath(String),
    #[error("RX{0} window is empty")]
    RxEmpty(u8),
    #[error("unknown data rate index {0}")]
    DataRate(u8),
    #[error("no downlink channel at {frequency} Hz for data rate index {data_rate_index}")]
    DownlinkChannel { frequency: u64, data_rate_index: u8 },
    /// Neither RX window could be scheduled; carries the per-window reasons.
    #[error("failed to schedule downlink in any RX window")]
    TxSchedule(Vec<GwError>),

    // --- UDP frontend ---
    #[error("connection is not ready")]
    ConnectionNotReady,
    #[error("connection expired")]
    ConnectionExpired,
    #[error("downlink path expired")]
    DownlinkPathExpired,
    #[error("failed to claim downlink path: {0}")]
    DownlinkClaim(String),
    #[error("packet does not carry a gateway EUI")]
    EmptyGatewayEui,

    // --- firewall ---
    #[error("message rate exceeded")]
    RateExceeded,
    #[error("gateway address changed within the block window")]
    AddrChangeBlocked,

    // --- LBS LNS frontend ---
    #[error("message type `{0}` is not implemented")]
    MessageTypeNotImplemented(String),
    #[error("invalid gateway id `{0}`")]
    InvalidGatewayId(String),
    #[error("no authentication provided")]
    NoAuthProvided,

    // --- decoding / validation ---
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
    #[error("invalid EUI `{0}`")]
    InvalidEui(String),
    #[error("invalid uplink token: {0}")]
    InvalidUplinkToken(String),
    #[error("unknown band `{0}`")]
    UnknownBand(String),
    #[error("gateway `{0}` not found")]
    NotFound(String),
    #[error("not authorized: {0}")]
    PermissionDenied(String),

    // --- wrapped foreign errors ---
    #[error("read/write timeout after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    JoinError(#[from] JoinError),
    #[error("{0}")]
    IoError(#[from] IoError),
    #[error("{0}")]
    Json(#[from] SerdeJsonError),
    #[error("{0}")]
    TryFromIntError(#[from] TryFromIntError),
    #[error("{0}")]
    Anyhow(#[from] AnyhowError),
    #[error("{0}")]
    WebError(#[from] WebError),
    #[error("{0}")]
    Msg(String),
}

impl From<String> for GwError {
    #[inline]
    fn from(e: String) -> Self {
        GwError::Msg(e)
    }
}

impl From<&str> for GwError {
    #[inline]
    fn from(e: &str) -> Self {
        GwError::Msg(e.to_string())
    }
}

impl GwError {
    /// Whether the error indicates a dropped message that the caller may
    /// simply log and move on from, as opposed to a torn-down connection.
    #[inline]
    pub fn is_drop(&self) -> bool {
        matches!(
            self,
            GwError::BufferFull(_) | GwError::RateExceeded | GwError::AddrChangeBlocked
        )
    }
}
