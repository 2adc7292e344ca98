//! Translation between Semtech UDP JSON structures and the normalized
//! in-memory records.

use crate::packets::{Datr, RxPacket, Stat, TxPacket};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, NaiveDateTime, Utc};
use lgw_core::{must_uplink_token, RolloverClock};
use lgw_error::{GwError, GwResult};
use lgw_models::{
    Band, DataRate, DownlinkMessage, GatewayIds, GatewayStatus, RxMetadata, TxAckResult,
    TxSettings, UplinkMessage, UplinkSettings,
};
use std::collections::HashMap;

#[inline]
fn mhz_to_hz(mhz: f64) -> u64 {
    (mhz * 1_000_000.0).round() as u64
}

#[inline]
fn hz_to_mhz(hz: u64) -> f64 {
    hz as f64 / 1_000_000.0
}

/// Parses the gateway-reported reception time; packet forwarders emit
/// ISO 8601 with varying precision.
fn parse_compact_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    // Older forwarders use `2014-01-12 08:59:28 GMT` in stat frames.
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S GMT")
        .ok()
        .map(|t| t.and_utc())
}

/// Converts one `rxpk` into a normalized uplink.
///
/// The clock must already be synchronized with this batch so the uplink
/// token can carry the roll-over corrected concentrator time.
pub fn rx_to_uplink(
    rx: &RxPacket,
    ids: &GatewayIds,
    band: &Band,
    clock: &RolloverClock,
    received_at: DateTime<Utc>,
) -> GwResult<UplinkMessage> {
    let raw_payload = general_purpose::STANDARD
        .decode(&rx.data)
        .map_err(|e| GwError::InvalidPacket(format!("invalid rxpk data: {e}")))?;
    let Datr(data_rate) = rx.datr;
    let data_rate_index = band
        .data_rate_index(data_rate)
        .ok_or_else(|| GwError::InvalidPacket(format!("data rate {data_rate:?} not in band")))?;
    let gateway_time = rx.time.as_deref().and_then(parse_compact_time).or_else(|| {
        rx.tmms
            .map(|tmms| lgw_utils::gpstime::parse(std::time::Duration::from_millis(tmms)))
    });
    let concentrator_time = clock.from_timestamp(rx.tmst).unwrap_or(rx.tmst as u64);
    let uplink_token = must_uplink_token(
        ids,
        rx.rfch,
        rx.tmst,
        concentrator_time,
        received_at,
        gateway_time,
    );
    Ok(UplinkMessage {
        raw_payload,
        settings: UplinkSettings {
            data_rate,
            data_rate_index,
            frequency: mhz_to_hz(rx.freq),
            timestamp: rx.tmst,
            time: gateway_time,
        },
        rx_metadata: vec![RxMetadata {
            antenna_index: rx.rfch,
            timestamp: rx.tmst,
            rssi: rx.rssi as f32,
            snr: rx.lsnr,
            channel_index: rx.chan,
            uplink_token,
        }],
        received_at,
        correlation_ids: Vec::new(),
    })
}

/// Deduplicates uplinks received on multiple antennas within one PUSH_DATA.
///
/// Uplinks with the same payload and frequency are merged: the reception with
/// the highest RSSI provides the settings and the antenna metadata of the
/// others is appended.
pub fn dedup_uplinks(uplinks: Vec<UplinkMessage>) -> Vec<UplinkMessage> {
    let mut merged: Vec<UplinkMessage> = Vec::with_capacity(uplinks.len());
    let mut index: HashMap<(Vec<u8>, u64), usize> = HashMap::new();
    for uplink in uplinks {
        let key = (uplink.raw_payload.clone(), uplink.settings.frequency);
        match index.get(&key) {
            Some(&i) => {
                let kept = &mut merged[i];
                let new_rssi = uplink.rx_metadata.first().map(|m| m.rssi).unwrap_or(f32::MIN);
                let kept_rssi = kept.rx_metadata.first().map(|m| m.rssi).unwrap_or(f32::MIN);
                if new_rssi > kept_rssi {
                    let mut extra = std::mem::take(&mut kept.rx_metadata);
                    let mut better = uplink;
                    better.rx_metadata.append(&mut extra);
                    *kept = better;
                } else {
                    kept.rx_metadata.extend(uplink.rx_metadata);
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(uplink);
            }
        }
    }
    merged
}

/// Converts a `stat` frame into a gateway status report.
pub fn stat_to_status(stat: &Stat) -> GatewayStatus {
    let mut metrics = HashMap::new();
    metrics.insert("rxnb".to_string(), stat.rxnb as f32);
    metrics.insert("rxok".to_string(), stat.rxok as f32);
    metrics.insert("rxfw".to_string(), stat.rxfw as f32);
    metrics.insert("ackr".to_string(), stat.ackr);
    metrics.insert("dwnb".to_string(), stat.dwnb as f32);
    metrics.insert("txnb".to_string(), stat.txnb as f32);
    GatewayStatus {
        time: stat.time.as_deref().and_then(parse_compact_time),
        versions: HashMap::new(),
        metrics,
    }
}

/// Encodes scheduled TX settings as a `txpk`.
pub fn settings_to_txpk(settings: &TxSettings, payload: &[u8]) -> TxPacket {
    let (modu, codr, fdev) = match settings.data_rate {
        DataRate::Lora { .. } => (
            "LORA".to_string(),
            Some(if settings.coding_rate.is_empty() {
                "4/5".to_string()
            } else {
                settings.coding_rate.clone()
            }),
            None,
        ),
        DataRate::Fsk { bit_rate } => ("FSK".to_string(), None, Some(bit_rate / 2)),
    };
    let tmms = settings
        .time
        .and_then(lgw_utils::gpstime::to_gps)
        .map(|d| d.as_millis() as u64);
    TxPacket {
        imme: false,
        tmst: if tmms.is_some() {
            None
        } else {
            Some(settings.timestamp)
        },
        tmms,
        freq: hz_to_mhz(settings.frequency),
        rfch: 0,
        powe: settings.power.round() as i8,
        modu,
        datr: Datr(settings.data_rate),
        codr,
        fdev,
        ipol: settings.invert_polarization,
        size: payload.len() as u32,
        data: general_purpose::STANDARD.encode(payload),
        ncrc: None,
    }
}

/// Maps a `txpk_ack` error string onto the normalized TX ack result.
pub fn tx_ack_result(error: Option<&str>) -> TxAckResult {
    match error {
        None | Some("NONE") | Some("") => TxAckResult::Success,
        Some("TOO_LATE") => TxAckResult::TooLate,
        Some("TOO_EARLY") => TxAckResult::TooEarly,
        Some("COLLISION_PACKET") => TxAckResult::CollisionPacket,
        Some("COLLISION_BEACON") => TxAckResult::CollisionBeacon,
        Some("TX_FREQ") => TxAckResult::TxFreq,
        Some("TX_POWER") => TxAckResult::TxPower,
        Some("GPS_UNLOCKED") => TxAckResult::GpsUnlocked,
        Some(_) => TxAckResult::InternalError,
    }
}

/// Best-effort conversion of an unscheduled downlink request, used when the
/// connection does not own a scheduler and timing is delegated to the
/// gateway's own timestamping.
pub fn request_to_txpk(msg: &DownlinkMessage) -> GwResult<(TxPacket, u32)> {
    use lgw_models::{DownlinkPath, DownlinkSettings};
    let request = match &msg.settings {
        DownlinkSettings::Request(r) => r,
        DownlinkSettings::Scheduled(_) => return Err(GwError::NotTxRequest),
    };
    let band = lgw_models::band(&request.frequency_plan_id)?;
    let data_rate = band
        .data_rate(request.rx1_data_rate_index)
        .ok_or(GwError::DataRate(request.rx1_data_rate_index))?;
    let timestamp = match request.downlink_paths.first() {
        Some(DownlinkPath::UplinkToken(token)) => {
            let token = lgw_core::parse_uplink_token(token)
                .map_err(|e| GwError::DownlinkPath(e.to_string()))?;
            token
                .timestamp
                .wrapping_add(request.rx1_delay.saturating_mul(1_000_000))
        }
        _ => 0,
    };
    let is_lora = data_rate.is_lora();
    let settings = TxSettings {
        data_rate,
        frequency: request.rx1_frequency,
        power: band.default_max_eirp,
        timestamp,
        concentrator_time: None,
        time: request.absolute_time,
        antenna_index: 0,
        invert_polarization: is_lora,
        coding_rate: if is_lora { "4/5".to_string() } else { String::new() },
    };
    Ok((settings_to_txpk(&settings, &msg.raw_payload), timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lgw_models::band;

    fn rx(tmst: u32, rssi: i32, rfch: u32, data: &str) -> RxPacket {
        RxPacket {
            time: None,
            tmms: None,
            tmst,
            freq: 868.1,
            chan: 0,
            rfch,
            stat: 1,
            modu: "LORA".to_string(),
            datr: Datr(DataRate::lora(7, 125_000)),
            codr: Some("4/5".to_string()),
            rssi,
            lsnr: 5.0,
            size: 3,
            data: data.to_string(),
        }
    }

    fn ids() -> GatewayIds {
        GatewayIds::from_eui("1122334455667788".parse().unwrap())
    }

    #[test]
    fn rx_converts_to_uplink() {
        let band = band("EU_863_870").unwrap();
        let mut clock = RolloverClock::new();
        clock.sync(100, Utc::now());
        let up = rx_to_uplink(&rx(100, -35, 0, "AAEC"), &ids(), band, &clock, Utc::now()).unwrap();
        assert_eq!(up.raw_payload, vec![0, 1, 2]);
        assert_eq!(up.settings.frequency, 868_100_000);
        assert_eq!(up.settings.data_rate_index, 5);
        assert_eq!(up.rx_metadata.len(), 1);
        assert_eq!(up.rx_metadata[0].timestamp, 100);
        let token = lgw_core::parse_uplink_token(&up.rx_metadata[0].uplink_token).unwrap();
        assert_eq!(token.timestamp, 100);
        assert_eq!(token.concentrator_time, 100);
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let band = band("EU_863_870").unwrap();
        let clock = RolloverClock::new();
        assert!(rx_to_uplink(&rx(1, -35, 0, "!!"), &ids(), band, &clock, Utc::now()).is_err());
    }

    #[test]
    fn dedup_keeps_best_rssi_and_merges_antennas() {
        let band = band("EU_863_870").unwrap();
        let clock = RolloverClock::new();
        let now = Utc::now();
        let ups = vec![
            rx_to_uplink(&rx(100, -60, 0, "AAEC"), &ids(), band, &clock, now).unwrap(),
            rx_to_uplink(&rx(101, -35, 1, "AAEC"), &ids(), band, &clock, now).unwrap(),
            rx_to_uplink(&rx(102, -35, 0, "BBBB"), &ids(), band, &clock, now).unwrap(),
        ];
        let merged = dedup_uplinks(ups);
        assert_eq!(merged.len(), 2);
        let first = &merged[0];
        assert_eq!(first.rx_metadata.len(), 2);
        // The stronger reception wins the settings.
        assert_eq!(first.settings.timestamp, 101);
        assert_eq!(first.rx_metadata[0].antenna_index, 1);
    }

    #[test]
    fn stat_maps_to_metrics() {
        let stat = Stat {
            time: Some("2024-06-01 10:00:00 GMT".to_string()),
            rxnb: 2,
            rxok: 2,
            rxfw: 2,
            ackr: 100.0,
            dwnb: 1,
            txnb: 1,
            ..Default::default()
        };
        let status = stat_to_status(&stat);
        assert!(status.time.is_some());
        assert_eq!(status.metrics["rxnb"], 2.0);
        assert_eq!(status.metrics["ackr"], 100.0);
    }

    #[test]
    fn scheduled_settings_encode_tmst() {
        let settings = TxSettings {
            data_rate: DataRate::lora(7, 125_000),
            frequency: 868_100_000,
            power: 13.15,
            timestamp: 1_100_000,
            concentrator_time: None,
            time: None,
            antenna_index: 0,
            invert_polarization: true,
            coding_rate: "4/5".to_string(),
        };
        let txpk = settings_to_txpk(&settings, &[1, 2, 3]);
        assert!(!txpk.imme);
        assert_eq!(txpk.tmst, Some(1_100_000));
        assert_eq!(txpk.tmms, None);
        assert_eq!(txpk.powe, 13);
        assert_eq!(txpk.size, 3);
        assert!(txpk.ipol);
    }

    #[test]
    fn absolute_time_encodes_tmms() {
        let settings = TxSettings {
            data_rate: DataRate::lora(12, 125_000),
            frequency: 869_525_000,
            power: 29.15,
            timestamp: 0,
            concentrator_time: None,
            time: Some(Utc::now()),
            antenna_index: 0,
            invert_polarization: true,
            coding_rate: "4/5".to_string(),
        };
        let txpk = settings_to_txpk(&settings, &[1]);
        assert!(txpk.tmms.is_some());
        assert_eq!(txpk.tmst, None);
    }

    #[test]
    fn ack_error_mapping() {
        assert_eq!(tx_ack_result(None), TxAckResult::Success);
        assert_eq!(tx_ack_result(Some("NONE")), TxAckResult::Success);
        assert_eq!(tx_ack_result(Some("TOO_LATE")), TxAckResult::TooLate);
        assert_eq!(tx_ack_result(Some("TX_FREQ")), TxAckResult::TxFreq);
        assert_eq!(tx_ack_result(Some("???")), TxAckResult::InternalError);
    }
}
