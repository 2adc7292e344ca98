use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use lgw_error::{GwError, GwResult};
use lgw_models::GatewayIds;

const TOKEN_VERSION: u8 = 1;

/// The decoded contents of an uplink token.
///
/// The token binds an uplink to its reception path: the gateway antenna, the
/// 32-bit concentrator timestamp, the roll-over corrected concentrator time
/// and the server (and optionally gateway) wall-clock at reception. The wire
/// form is stable across process boundaries because the Network Server stores
/// tokens and returns them later to address downlinks.
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkToken {
    pub ids: GatewayIds,
    pub antenna_index: u32,
    pub timestamp: u32,
    pub concentrator_time: u64,
    pub server_time: DateTime<Utc>,
    pub gateway_time: Option<DateTime<Utc>>,
}

/// Serializes an uplink token.
pub fn uplink_token(
    ids: &GatewayIds,
    antenna_index: u32,
    timestamp: u32,
    concentrator_time: u64,
    server_time: DateTime<Utc>,
    gateway_time: Option<DateTime<Utc>>,
) -> GwResult<Vec<u8>> {
    if ids.gateway_id.is_empty() {
        return Err(GwError::InvalidUplinkToken(
            "empty gateway id".to_string(),
        ));
    }
    let id_bytes = ids.gateway_id.as_bytes();
    if id_bytes.len() > u16::MAX as usize {
        return Err(GwError::InvalidUplinkToken(
            "gateway id too long".to_string(),
        ));
    }
    let mut buf = BytesMut::with_capacity(64 + id_bytes.len());
    buf.put_u8(TOKEN_VERSION);
    buf.put_u16(id_bytes.len() as u16);
    buf.put_slice(id_bytes);
    match ids.eui {
        Some(eui) => {
            buf.put_u8(1);
            buf.put_slice(eui.as_bytes());
        }
        None => buf.put_u8(0),
    }
    buf.put_u32(antenna_index);
    buf.put_u32(timestamp);
    buf.put_u64(concentrator_time);
    put_time(&mut buf, server_time);
    match gateway_time {
        Some(t) => {
            buf.put_u8(1);
            put_time(&mut buf, t);
        }
        None => buf.put_u8(0),
    }
    Ok(buf.to_vec())
}

/// Panicking variant of [`uplink_token`] for call sites with validated ids.
pub fn must_uplink_token(
    ids: &GatewayIds,
    antenna_index: u32,
    timestamp: u32,
    concentrator_time: u64,
    server_time: DateTime<Utc>,
    gateway_time: Option<DateTime<Utc>>,
) -> Vec<u8> {
    uplink_token(
        ids,
        antenna_index,
        timestamp,
        concentrator_time,
        server_time,
        gateway_time,
    )
    .unwrap()
}

/// Deserializes and validates an uplink token.
pub fn parse_uplink_token(data: &[u8]) -> GwResult<UplinkToken> {
    let mut buf = data;
    let version = take_u8(&mut buf)?;
    if version != TOKEN_VERSION {
        return Err(GwError::InvalidUplinkToken(format!(
            "unsupported version {version}"
        )));
    }
    let id_len = take_u16(&mut buf)? as usize;
    if buf.remaining() < id_len {
        return Err(truncated());
    }
    let gateway_id = String::from_utf8(buf[..id_len].to_vec())
        .map_err(|_| GwError::InvalidUplinkToken("gateway id is not UTF-8".to_string()))?;
    buf.advance(id_len);
    if gateway_id.is_empty() {
        return Err(GwError::InvalidUplinkToken("empty gateway id".to_string()));
    }
    let eui = match take_u8(&mut buf)? {
        0 => None,
        1 => {
            if buf.remaining() < 8 {
                return Err(truncated());
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[..8]);
            buf.advance(8);
            Some(lgw_models::Eui64::from_bytes(raw))
        }
        other => {
            return Err(GwError::InvalidUplinkToken(format!(
                "invalid EUI flag {other}"
            )))
        }
    };
    let antenna_index = take_u32(&mut buf)?;
    let timestamp = take_u32(&mut buf)?;
    let concentrator_time = take_u64(&mut buf)?;
    let server_time = take_time(&mut buf)?;
    let gateway_time = match take_u8(&mut buf)? {
        0 => None,
        1 => Some(take_time(&mut buf)?),
        other => {
            return Err(GwError::InvalidUplinkToken(format!(
                "invalid gateway time flag {other}"
            )))
        }
    };
    if buf.has_remaining() {
        return Err(GwError::InvalidUplinkToken("trailing bytes".to_string()));
    }
    Ok(UplinkToken {
        ids: GatewayIds { gateway_id, eui },
        antenna_index,
        timestamp,
        concentrator_time,
        server_time,
        gateway_time,
    })
}

#[inline]
fn put_time(buf: &mut BytesMut, t: DateTime<Utc>) {
    buf.put_i64(t.timestamp());
    buf.put_u32(t.timestamp_subsec_nanos());
}

#[inline]
fn take_time(buf: &mut &[u8]) -> GwResult<DateTime<Utc>> {
    let secs = take_i64(buf)?;
    let nanos = take_u32(buf)?;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .ok_or_else(|| GwError::InvalidUplinkToken("timestamp out of range".to_string()))
}

#[inline]
fn truncated() -> GwError {
    GwError::InvalidUplinkToken("truncated".to_string())
}

macro_rules! take_int {
    ($name:ident, $ty:ty, $get:ident, $size:expr) => {
        #[inline]
        fn $name(buf: &mut &[u8]) -> GwResult<$ty> {
            if buf.remaining() < $size {
                return Err(truncated());
            }
            Ok(buf.$get())
        }
    };
}

take_int!(take_u8, u8, get_u8, 1);
take_int!(take_u16, u16, get_u16, 2);
take_int!(take_u32, u32, get_u32, 4);
take_int!(take_u64, u64, get_u64, 8);
take_int!(take_i64, i64, get_i64, 8);
