//! Translation between LNS frames and the normalized records.

use crate::messages::{
    DownlinkFrame, JoinRequest, RadioMetaData, UpInfo, UplinkDataFrame, Version,
    TYPE_DOWNLINK_MESSAGE,
};
use chrono::{DateTime, Utc};
use lgw_core::{must_uplink_token, RolloverClock};
use lgw_error::{GwError, GwResult};
use lgw_models::{
    Band, DownlinkMessage, DownlinkSettings, GatewayIds, GatewayStatus, RxMetadata, TxSettings,
    UplinkMessage, UplinkSettings,
};
use std::collections::HashMap;

const XTIME_MICROS_MASK: i64 = 0xFFFF_FFFF_FFFF;

/// The session marker the gateway chose, carried in the top 16 bits of
/// `xtime`.
#[inline]
pub fn session_id(xtime: i64) -> u16 {
    (xtime >> 48) as u16
}

/// Concentrator time in microseconds from the low 48 bits of `xtime`.
#[inline]
pub fn xtime_to_concentrator_time(xtime: i64) -> u64 {
    (xtime & XTIME_MICROS_MASK) as u64
}

/// Re-composes an `xtime` for a downlink: the session of the anchoring
/// uplink in the top bits, concentrator microseconds below.
#[inline]
pub fn concentrator_time_to_xtime(session: u16, concentrator_time: u64) -> i64 {
    ((session as i64) << 48) | (concentrator_time as i64 & XTIME_MICROS_MASK)
}

fn radio_uplink(
    radio: &RadioMetaData,
    phy_payload: Vec<u8>,
    ids: &GatewayIds,
    band: &Band,
    received_at: DateTime<Utc>,
) -> GwResult<UplinkMessage> {
    let up = &radio.upinfo;
    // Some station firmware emits frames with xtime 0 before its clock is
    // set; those cannot anchor a downlink and are dropped upstream.
    if up.xtime == 0 {
        return Err(GwError::InvalidPacket("xtime is zero".to_string()));
    }
    let data_rate = band
        .data_rate(radio.data_rate_index)
        .ok_or(GwError::DataRate(radio.data_rate_index))?;
    let concentrator_time = xtime_to_concentrator_time(up.xtime);
    let timestamp = concentrator_time as u32;
    let gateway_time = gps_micros_to_time(up.gpstime);
    let uplink_token = must_uplink_token(
        ids,
        antenna_index(up),
        timestamp,
        concentrator_time,
        received_at,
        gateway_time,
    );
    Ok(UplinkMessage {
        raw_payload: phy_payload,
        settings: UplinkSettings {
            data_rate,
            data_rate_index: radio.data_rate_index,
            frequency: radio.frequency,
            timestamp,
            time: gateway_time,
        },
        rx_metadata: vec![RxMetadata {
            antenna_index: antenna_index(up),
            timestamp,
            rssi: up.rssi,
            snr: up.snr,
            channel_index: 0,
            uplink_token,
        }],
        received_at,
        correlation_ids: Vec::new(),
    })
}

#[inline]
fn antenna_index(up: &UpInfo) -> u32 {
    // The station reports the antenna in the low bits of rctx.
    (up.rctx & 0xFFFF) as u32
}

#[inline]
fn gps_micros_to_time(gpstime: i64) -> Option<DateTime<Utc>> {
    if gpstime <= 0 {
        return None;
    }
    Some(lgw_utils::gpstime::parse(std::time::Duration::from_micros(
        gpstime as u64,
    )))
}

/// Converts a `jreq` into a normalized uplink carrying the re-marshalled
/// LoRaWAN join-request PHY payload.
pub fn jreq_to_uplink(
    jreq: &JoinRequest,
    ids: &GatewayIds,
    band: &Band,
    received_at: DateTime<Utc>,
) -> GwResult<UplinkMessage> {
    let mut phy = Vec::with_capacity(23);
    phy.push(jreq.mhdr);
    // LoRaWAN MAC fields are little-endian on the wire.
    let mut join_eui = *jreq.join_eui.0.as_bytes();
    join_eui.reverse();
    phy.extend_from_slice(&join_eui);
    let mut dev_eui = *jreq.dev_eui.0.as_bytes();
    dev_eui.reverse();
    phy.extend_from_slice(&dev_eui);
    phy.extend_from_slice(&jreq.dev_nonce.to_le_bytes());
    phy.extend_from_slice(&jreq.mic.to_le_bytes());
    radio_uplink(&jreq.radio, phy, ids, band, received_at)
}

/// Converts an `updf` into a normalized uplink carrying the re-marshalled
/// LoRaWAN data-frame PHY payload.
pub fn updf_to_uplink(
    updf: &UplinkDataFrame,
    ids: &GatewayIds,
    band: &Band,
    received_at: DateTime<Utc>,
) -> GwResult<UplinkMessage> {
    let fopts =
        hex::decode(&updf.fopts).map_err(|e| GwError::InvalidPacket(format!("FOpts: {e}")))?;
    if fopts.len() > 15 {
        return Err(GwError::InvalidPacket("FOpts longer than 15 bytes".to_string()));
    }
    let frm_payload = hex::decode(&updf.frm_payload)
        .map_err(|e| GwError::InvalidPacket(format!("FRMPayload: {e}")))?;
    let mut phy = Vec::with_capacity(13 + fopts.len() + frm_payload.len());
    phy.push(updf.mhdr);
    phy.extend_from_slice(&(updf.dev_addr as u32).to_le_bytes());
    // FCtrl carries the FOpts length in its low nibble.
    phy.push((updf.fctrl & 0xF0) | (fopts.len() as u8));
    phy.extend_from_slice(&updf.fcnt.to_le_bytes());
    phy.extend_from_slice(&fopts);
    if updf.fport >= 0 {
        phy.push(updf.fport as u8);
        phy.extend_from_slice(&frm_payload);
    }
    phy.extend_from_slice(&updf.mic.to_le_bytes());
    radio_uplink(&updf.radio, phy, ids, band, received_at)
}

/// Builds a `version` status report for the north side.
pub fn version_to_status(version: &Version) -> GatewayStatus {
    let mut versions = HashMap::new();
    versions.insert("station".to_string(), version.station.clone());
    versions.insert("firmware".to_string(), version.firmware.clone());
    versions.insert("package".to_string(), version.package.clone());
    versions.insert("model".to_string(), version.model.clone());
    versions.insert("protocol".to_string(), version.protocol.to_string());
    versions.insert("features".to_string(), version.features.clone());
    GatewayStatus {
        time: Some(Utc::now()),
        versions,
        metrics: HashMap::new(),
    }
}

/// Encodes a scheduled downlink as a `dnmsg`.
///
/// The gateway transmits at `xtime + RxDelay`, so the RX delay is subtracted
/// from the scheduled concentrator time; the high 16 bits carry the session
/// of the most recent uplink so the gateway accepts the frame.
pub fn build_downlink_frame(
    msg: &DownlinkMessage,
    session: u16,
    band: &Band,
    clock: &RolloverClock,
    diid: i64,
    mux_time: f64,
) -> GwResult<DownlinkFrame> {
    let settings: TxSettings = match &msg.settings {
        DownlinkSettings::Scheduled(s) => s.clone(),
        DownlinkSettings::Request(_) => return Err(GwError::NotTxRequest),
    };
    let concentrator_time = settings
        .concentrator_time
        .or_else(|| clock.from_timestamp(settings.timestamp))
        .unwrap_or(settings.timestamp as u64);
    let rx_delay: u8 = 1;
    let anchor = concentrator_time.saturating_sub(rx_delay as u64 * 1_000_000);
    let rx1_data_rate_index = band
        .data_rate_index(settings.data_rate)
        .ok_or_else(|| GwError::InvalidPacket(format!("data rate {:?} not in band", settings.data_rate)))?;
    Ok(DownlinkFrame {
        msgtype: TYPE_DOWNLINK_MESSAGE.to_string(),
        // The device EUI is unused by the station; the server tracks devices.
        dev_eui: "00-00-00-00-00-00-00-00".to_string(),
        // The server schedules, so the station treats every frame as class A.
        device_class: 0,
        diid,
        pdu: hex::encode(&msg.raw_payload),
        rx_delay,
        rx1_data_rate_index,
        rx1_frequency: settings.frequency,
        priority: 25,
        xtime: concentrator_time_to_xtime(session, anchor),
        rctx: settings.antenna_index as i64,
        mux_time,
    })
}
