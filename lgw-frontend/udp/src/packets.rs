//! Wire codec for the Semtech UDP packet-forwarder protocol.
//!
//! Every datagram starts with `{version(1), token(2), type(1)}`; PUSH_DATA,
//! PULL_DATA and TX_ACK carry the 8-byte gateway EUI next, and PUSH_DATA,
//! PULL_RESP and TX_ACK end with a JSON object (`rxpk`/`stat`, `txpk`,
//! `txpk_ack`).

use bytes::{BufMut, BytesMut};
use lgw_error::{GwError, GwResult};
use lgw_models::{DataRate, Eui64};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Protocol version spoken by current packet forwarders.
pub const PROTOCOL_V2: u8 = 2;

const HEADER_SIZE: usize = 4;
const EUI_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    PushData = 0x00,
    PushAck = 0x01,
    PullData = 0x02,
    PullResp = 0x03,
    PullAck = 0x04,
    TxAck = 0x05,
}

impl TryFrom<u8> for PacketType {
    type Error = GwError;

    fn try_from(v: u8) -> GwResult<Self> {
        match v {
            0x00 => Ok(PacketType::PushData),
            0x01 => Ok(PacketType::PushAck),
            0x02 => Ok(PacketType::PullData),
            0x03 => Ok(PacketType::PullResp),
            0x04 => Ok(PacketType::PullAck),
            0x05 => Ok(PacketType::TxAck),
            other => Err(GwError::InvalidPacket(format!("unknown packet type {other:#04x}"))),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PacketType::PushData => "PUSH_DATA",
            PacketType::PushAck => "PUSH_ACK",
            PacketType::PullData => "PULL_DATA",
            PacketType::PullResp => "PULL_RESP",
            PacketType::PullAck => "PULL_ACK",
            PacketType::TxAck => "TX_ACK",
        };
        f.write_str(s)
    }
}

/// Typed payload of one datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketData {
    PushData { eui: Eui64, payload: PushPayload },
    PushAck,
    PullData { eui: Eui64 },
    PullResp { payload: PullRespPayload },
    PullAck,
    TxAck { eui: Eui64, payload: Option<TxAckPayload> },
}

/// One Semtech UDP datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub protocol_version: u8,
    pub token: u16,
    pub data: PacketData,
}

impl Packet {
    #[inline]
    pub fn packet_type(&self) -> PacketType {
        match &self.data {
            PacketData::PushData { .. } => PacketType::PushData,
            PacketData::PushAck => PacketType::PushAck,
            PacketData::PullData { .. } => PacketType::PullData,
            PacketData::PullResp { .. } => PacketType::PullResp,
            PacketData::PullAck => PacketType::PullAck,
            PacketData::TxAck { .. } => PacketType::TxAck,
        }
    }

    /// The gateway EUI, for the types that carry one.
    #[inline]
    pub fn eui(&self) -> Option<Eui64> {
        match &self.data {
            PacketData::PushData { eui, .. }
            | PacketData::PullData { eui }
            | PacketData::TxAck { eui, .. } => Some(*eui),
            _ => None,
        }
    }

    /// The acknowledgement demanded by this packet, echoing version and
    /// token. `None` for types that are not acknowledged.
    pub fn ack(&self) -> Option<Packet> {
        let data = match self.packet_type() {
            PacketType::PushData => PacketData::PushAck,
            PacketType::PullData => PacketData::PullAck,
            _ => return None,
        };
        Some(Packet {
            protocol_version: self.protocol_version,
            token: self.token,
            data,
        })
    }

    pub fn marshal(&self) -> GwResult<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(self.protocol_version);
        buf.put_u16(self.token);
        buf.put_u8(self.packet_type() as u8);
        match &self.data {
            PacketData::PushData { eui, payload } => {
                buf.put_slice(eui.as_bytes());
                buf.put_slice(&serde_json::to_vec(payload)?);
            }
            PacketData::PullData { eui } => buf.put_slice(eui.as_bytes()),
            PacketData::PullResp { payload } => buf.put_slice(&serde_json::to_vec(payload)?),
            PacketData::TxAck { eui, payload } => {
                buf.put_slice(eui.as_bytes());
                if let Some(payload) = payload {
                    buf.put_slice(&serde_json::to_vec(payload)?);
                }
            }
            PacketData::PushAck | PacketData::PullAck => {}
        }
        Ok(buf.to_vec())
    }

    pub fn unmarshal(data: &[u8]) -> GwResult<Packet> {
        if data.len() < HEADER_SIZE {
            return Err(GwError::InvalidPacket(format!(
                "datagram too short: {} bytes",
                data.len()
            )));
        }
        let protocol_version = data[0];
        let token = u16::from_be_bytes([data[1], data[2]]);
        let packet_type = PacketType::try_from(data[3])?;
        let rest = &data[HEADER_SIZE..];
        let data = match packet_type {
            PacketType::PushAck => PacketData::PushAck,
            PacketType::PullAck => PacketData::PullAck,
            PacketType::PullResp => PacketData::PullResp {
                payload: serde_json::from_slice(rest)?,
            },
            PacketType::PushData => {
                let (eui, json) = take_eui(rest)?;
                PacketData::PushData {
                    eui,
                    payload: serde_json::from_slice(json)?,
                }
            }
            PacketType::PullData => {
                let (eui, rest) = take_eui(rest)?;
                if !rest.is_empty() {
                    return Err(GwError::InvalidPacket("trailing bytes in PULL_DATA".to_string()));
                }
                PacketData::PullData { eui }
            }
            PacketType::TxAck => {
                let (eui, json) = take_eui(rest)?;
                let payload = if json.is_empty() {
                    None
                } else {
                    Some(serde_json::from_slice(json)?)
                };
                PacketData::TxAck { eui, payload }
            }
        };
        Ok(Packet {
            protocol_version,
            token,
            data,
        })
    }
}

#[inline]
fn take_eui(data: &[u8]) -> GwResult<(Eui64, &[u8])> {
    if data.len() < EUI_SIZE {
        return Err(GwError::EmptyGatewayEui);
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[..EUI_SIZE]);
    Ok((Eui64::from_bytes(raw), &data[EUI_SIZE..]))
}

/// JSON body of a PUSH_DATA.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rxpk: Vec<RxPacket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat: Option<Stat>,
}

/// One received radio packet, as reported by the packet forwarder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxPacket {
    /// UTC time of reception, ISO 8601.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// GPS time of reception in milliseconds since the GPS epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmms: Option<u64>,
    /// Concentrator counter at reception, microseconds.
    pub tmst: u32,
    /// Center frequency in MHz.
    pub freq: f64,
    /// Concentrator IF channel.
    #[serde(default)]
    pub chan: u32,
    /// Concentrator RF chain.
    #[serde(default)]
    pub rfch: u32,
    /// CRC status: 1 OK, -1 fail, 0 no CRC.
    #[serde(default)]
    pub stat: i8,
    /// Modulation: `LORA` or `FSK`.
    pub modu: String,
    pub datr: Datr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codr: Option<String>,
    pub rssi: i32,
    #[serde(default)]
    pub lsnr: f32,
    pub size: u32,
    /// Payload, base64.
    pub data: String,
}

/// Periodic gateway statistics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lati: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alti: Option<i32>,
    #[serde(default)]
    pub rxnb: u32,
    #[serde(default)]
    pub rxok: u32,
    #[serde(default)]
    pub rxfw: u32,
    #[serde(default)]
    pub ackr: f32,
    #[serde(default)]
    pub dwnb: u32,
    #[serde(default)]
    pub txnb: u32,
}

/// JSON body of a PULL_RESP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRespPayload {
    pub txpk: TxPacket,
}

/// One packet to transmit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TxPacket {
    /// Send immediately, ignoring timing fields.
    #[serde(default)]
    pub imme: bool,
    /// Concentrator counter at which to send, microseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmst: Option<u32>,
    /// GPS time at which to send, milliseconds since the GPS epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmms: Option<u64>,
    /// Center frequency in MHz.
    pub freq: f64,
    #[serde(default)]
    pub rfch: u32,
    /// TX power in dBm.
    pub powe: i8,
    pub modu: String,
    pub datr: Datr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codr: Option<String>,
    /// FSK frequency deviation in Hz.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fdev: Option<u32>,
    /// Invert LoRa polarization.
    #[serde(default)]
    pub ipol: bool,
    pub size: u32,
    /// Payload, base64.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ncrc: Option<bool>,
}

/// JSON body of a TX_ACK.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TxAckPayload {
    pub txpk_ack: TxpkAck,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TxpkAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The `datr` field: `"SF7BW125"` for LoRa, a plain bit rate for FSK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datr(pub DataRate);

impl Serialize for Datr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            DataRate::Lora {
                spreading_factor,
                bandwidth,
            } => serializer.serialize_str(&format!("SF{spreading_factor}BW{}", bandwidth / 1000)),
            DataRate::Fsk { bit_rate } => serializer.serialize_u32(bit_rate),
        }
    }
}

impl<'de> Deserialize<'de> for Datr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Lora(String),
            Fsk(u32),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Fsk(bit_rate) => Ok(Datr(DataRate::fsk(bit_rate))),
            Raw::Lora(s) => parse_lora_datr(&s)
                .map(Datr)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid datr `{s}`"))),
        }
    }
}

/// Parses `"SF<sf>BW<khz>"`.
pub fn parse_lora_datr(s: &str) -> Option<DataRate> {
    let rest = s.strip_prefix("SF")?;
    let (sf, bw) = rest.split_once("BW")?;
    let spreading_factor: u8 = sf.parse().ok()?;
    let bandwidth_khz: u32 = bw.parse().ok()?;
    Some(DataRate::lora(spreading_factor, bandwidth_khz * 1000))
}

impl Default for Datr {
    fn default() -> Self {
        Datr(DataRate::lora(12, 125_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eui() -> Eui64 {
        "1122334455667788".parse().unwrap()
    }

    #[test]
    fn pull_data_round_trip() {
        let packet = Packet {
            protocol_version: PROTOCOL_V2,
            token: 0xBEEF,
            data: PacketData::PullData { eui: eui() },
        };
        let raw = packet.marshal().unwrap();
        assert_eq!(&raw[..4], &[2, 0xBE, 0xEF, 0x02]);
        assert_eq!(raw.len(), 12);
        let back = Packet::unmarshal(&raw).unwrap();
        assert_eq!(back, packet);
        assert_eq!(back.eui(), Some(eui()));
    }

    #[test]
    fn acks_echo_version_and_token() {
        let packet = Packet {
            protocol_version: PROTOCOL_V2,
            token: 0x1234,
            data: PacketData::PullData { eui: eui() },
        };
        let ack = packet.ack().unwrap();
        assert_eq!(ack.packet_type(), PacketType::PullAck);
        assert_eq!(ack.token, 0x1234);
        assert_eq!(ack.marshal().unwrap(), vec![2, 0x12, 0x34, 0x04]);
        // PULL_RESP is not acknowledged by the server.
        assert!(Packet {
            protocol_version: PROTOCOL_V2,
            token: 0,
            data: PacketData::PushAck,
        }
        .ack()
        .is_none());
    }

    #[test]
    fn push_data_with_rxpk_parses() {
        let json = br#"{"rxpk":[{"time":"2024-06-01T12:00:00.000001Z","tmst":100,"freq":868.1,"chan":0,"rfch":0,"stat":1,"modu":"LORA","datr":"SF7BW125","codr":"4/5","rssi":-35,"lsnr":5.1,"size":3,"data":"AAEC"}]}"#;
        let mut raw = vec![2u8, 0x00, 0x2A, 0x00];
        raw.extend_from_slice(eui().as_bytes());
        raw.extend_from_slice(json);
        let packet = Packet::unmarshal(&raw).unwrap();
        match packet.data {
            PacketData::PushData { eui: got, payload } => {
                assert_eq!(got, eui());
                assert_eq!(payload.rxpk.len(), 1);
                let rx = &payload.rxpk[0];
                assert_eq!(rx.tmst, 100);
                assert_eq!(rx.datr, Datr(DataRate::lora(7, 125_000)));
                assert_eq!(rx.rssi, -35);
                assert!(payload.stat.is_none());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn tx_ack_with_and_without_payload() {
        let mut raw = vec![2u8, 0, 1, 0x05];
        raw.extend_from_slice(eui().as_bytes());
        let packet = Packet::unmarshal(&raw).unwrap();
        assert!(matches!(packet.data, PacketData::TxAck { payload: None, .. }));

        raw.extend_from_slice(br#"{"txpk_ack":{"error":"TOO_LATE"}}"#);
        let packet = Packet::unmarshal(&raw).unwrap();
        match packet.data {
            PacketData::TxAck {
                payload: Some(payload),
                ..
            } => assert_eq!(payload.txpk_ack.error.as_deref(), Some("TOO_LATE")),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn datr_serializes_both_modulations() {
        assert_eq!(
            serde_json::to_string(&Datr(DataRate::lora(12, 500_000))).unwrap(),
            "\"SF12BW500\""
        );
        assert_eq!(serde_json::to_string(&Datr(DataRate::fsk(50_000))).unwrap(), "50000");
        let datr: Datr = serde_json::from_str("50000").unwrap();
        assert_eq!(datr, Datr(DataRate::fsk(50_000)));
    }

    #[test]
    fn rejects_short_and_unknown() {
        assert!(Packet::unmarshal(&[2, 0]).is_err());
        assert!(Packet::unmarshal(&[2, 0, 0, 0x09]).is_err());
        // PUSH_DATA without an EUI.
        assert!(Packet::unmarshal(&[2, 0, 0, 0x00, 1, 2]).is_err());
    }

    #[test]
    fn pull_resp_marshals_txpk() {
        let packet = Packet {
            protocol_version: PROTOCOL_V2,
            token: 7,
            data: PacketData::PullResp {
                payload: PullRespPayload {
                    txpk: TxPacket {
                        tmst: Some(1_100_000),
                        freq: 868.1,
                        powe: 16,
                        modu: "LORA".to_string(),
                        datr: Datr(DataRate::lora(7, 125_000)),
                        codr: Some("4/5".to_string()),
                        ipol: true,
                        size: 3,
                        data: "AAEC".to_string(),
                        ..Default::default()
                    },
                },
            },
        };
        let raw = packet.marshal().unwrap();
        assert_eq!(&raw[..4], &[2, 0, 7, 0x03]);
        let back = Packet::unmarshal(&raw).unwrap();
        assert_eq!(back, packet);
    }
}
