//! JSON frames of the LNS protocol, dispatched on `msgtype`.
//!
//! Key casing follows the wire protocol exactly; several numeric fields are
//! signed on the wire even where the domain value is unsigned.

use crate::id6::Id6;
use serde::{Deserialize, Serialize};

pub const TYPE_VERSION: &str = "version";
pub const TYPE_ROUTER_CONFIG: &str = "router_config";
pub const TYPE_JOIN_REQUEST: &str = "jreq";
pub const TYPE_UPLINK_DATA_FRAME: &str = "updf";
pub const TYPE_TX_CONFIRMATION: &str = "dntxed";
pub const TYPE_DOWNLINK_MESSAGE: &str = "dnmsg";
pub const TYPE_TIME_SYNC: &str = "timesync";
pub const TYPE_PROP_DATA_FRAME: &str = "propdf";
pub const TYPE_REMOTE_SHELL: &str = "rmtsh";

/// Envelope used to pick the concrete frame type.
#[derive(Debug, Deserialize)]
pub struct MessageType {
    pub msgtype: String,
}

/// Discovery query on `/router-info`.
#[derive(Debug, Deserialize)]
pub struct DiscoverQuery {
    pub router: Id6,
}

/// Discovery reply.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiscoverResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muxs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `version`: the first frame on a traffic socket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub station: String,
    #[serde(default)]
    pub firmware: String,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub protocol: i32,
    #[serde(default)]
    pub features: String,
}

impl Version {
    /// Production firmware disables the debug radio flags.
    #[inline]
    pub fn is_production(&self) -> bool {
        self.features.split_whitespace().any(|f| f == "prod")
    }
}

/// Radio metadata shared by `jreq` and `updf`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RadioMetaData {
    #[serde(rename = "DR")]
    pub data_rate_index: u8,
    #[serde(rename = "Freq")]
    pub frequency: u64,
    pub upinfo: UpInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpInfo {
    #[serde(default)]
    pub rctx: i64,
    /// Low 48 bits: microseconds of concentrator time; high 16 bits: the
    /// gateway-chosen session marker.
    #[serde(default)]
    pub xtime: i64,
    #[serde(default)]
    pub gpstime: i64,
    #[serde(default)]
    pub fts: i64,
    #[serde(default)]
    pub rxtime: f64,
    #[serde(default)]
    pub rssi: f32,
    #[serde(default)]
    pub snr: f32,
}

/// `jreq`: a LoRaWAN join-request.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    #[serde(rename = "MHdr")]
    pub mhdr: u8,
    #[serde(rename = "JoinEui")]
    pub join_eui: Id6,
    #[serde(rename = "DevEui")]
    pub dev_eui: Id6,
    #[serde(rename = "DevNonce")]
    pub dev_nonce: u16,
    #[serde(rename = "MIC")]
    pub mic: i32,
    #[serde(default, rename = "RefTime")]
    pub ref_time: f64,
    #[serde(flatten)]
    pub radio: RadioMetaData,
}

/// `updf`: a LoRaWAN uplink data frame.
#[derive(Debug, Clone, Deserialize)]
pub struct UplinkDataFrame {
    #[serde(rename = "MHdr")]
    pub mhdr: u8,
    #[serde(rename = "DevAddr")]
    pub dev_addr: i64,
    #[serde(rename = "FCtrl")]
    pub fctrl: u8,
    #[serde(rename = "FCnt")]
    pub fcnt: u16,
    /// Hex-encoded frame options.
    #[serde(default, rename = "FOpts")]
    pub fopts: String,
    /// `-1` when absent.
    #[serde(default = "minus_one", rename = "FPort")]
    pub fport: i32,
    /// Hex-encoded application payload.
    #[serde(default, rename = "FRMPayload")]
    pub frm_payload: String,
    #[serde(rename = "MIC")]
    pub mic: i32,
    #[serde(default, rename = "RefTime")]
    pub ref_time: f64,
    #[serde(flatten)]
    pub radio: RadioMetaData,
}

#[inline]
fn minus_one() -> i32 {
    -1
}

/// `dntxed`: confirmation that a downlink was radiated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxConfirmation {
    #[serde(default)]
    pub diid: i64,
    #[serde(default, rename = "DevEui")]
    pub dev_eui: String,
    #[serde(default)]
    pub rctx: i64,
    #[serde(default)]
    pub xtime: i64,
    #[serde(default)]
    pub txtime: f64,
    #[serde(default)]
    pub gpstime: i64,
    /// Echo of the `MuxTime` we stamped on the downlink.
    #[serde(default, rename = "MuxTime")]
    pub mux_time: f64,
}

/// `timesync` request from the gateway.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeSyncRequest {
    #[serde(default)]
    pub txtime: f64,
    #[serde(default)]
    pub gpstime: i64,
}

/// `timesync` reply.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimeSyncResponse {
    pub txtime: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xtime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpstime: Option<i64>,
    #[serde(rename = "MuxTime")]
    pub mux_time: f64,
}

/// `dnmsg`: a downlink handed to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownlinkFrame {
    pub msgtype: String,
    #[serde(rename = "DevEui")]
    pub dev_eui: String,
    #[serde(rename = "dC")]
    pub device_class: u8,
    pub diid: i64,
    /// Hex-encoded PHY payload.
    pub pdu: String,
    #[serde(rename = "RxDelay")]
    pub rx_delay: u8,
    #[serde(rename = "RX1DR")]
    pub rx1_data_rate_index: u8,
    #[serde(rename = "RX1Freq")]
    pub rx1_frequency: u64,
    pub priority: u8,
    pub xtime: i64,
    pub rctx: i64,
    #[serde(rename = "MuxTime")]
    pub mux_time: f64,
}

/// `router_config`: the reply to `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub msgtype: String,
    pub region: String,
    pub hwspec: String,
    pub freq_range: [u64; 2],
    #[serde(rename = "DRs")]
    pub data_rates: Vec<[i32; 3]>,
    pub sx1301_conf: Vec<Sx1301Conf>,
    pub nocca: bool,
    pub nodc: bool,
    pub nodwell: bool,
    #[serde(rename = "MuxTime")]
    pub mux_time: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sx1301Conf {
    pub lorawan_public: bool,
    pub clksrc: u8,
    pub radio_0: Sx1301Radio,
    pub radio_1: Sx1301Radio,
    #[serde(rename = "chan_FSK")]
    pub chan_fsk: Sx1301FskChannel,
    #[serde(rename = "chan_Lora_std")]
    pub chan_lora_std: Sx1301LoraStdChannel,
    #[serde(rename = "chan_multiSF_0")]
    pub chan_multi_sf_0: Sx1301Channel,
    #[serde(rename = "chan_multiSF_1")]
    pub chan_multi_sf_1: Sx1301Channel,
    #[serde(rename = "chan_multiSF_2")]
    pub chan_multi_sf_2: Sx1301Channel,
    #[serde(rename = "chan_multiSF_3")]
    pub chan_multi_sf_3: Sx1301Channel,
    #[serde(rename = "chan_multiSF_4")]
    pub chan_multi_sf_4: Sx1301Channel,
    #[serde(rename = "chan_multiSF_5")]
    pub chan_multi_sf_5: Sx1301Channel,
    #[serde(rename = "chan_multiSF_6")]
    pub chan_multi_sf_6: Sx1301Channel,
    #[serde(rename = "chan_multiSF_7")]
    pub chan_multi_sf_7: Sx1301Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sx1301Radio {
    pub enable: bool,
    pub freq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sx1301Channel {
    pub enable: bool,
    pub radio: u8,
    #[serde(rename = "if")]
    pub if_value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sx1301LoraStdChannel {
    pub enable: bool,
    pub radio: u8,
    #[serde(rename = "if")]
    pub if_value: i32,
    pub bandwidth: u32,
    pub spread_factor: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sx1301FskChannel {
    pub enable: bool,
    pub radio: u8,
    #[serde(rename = "if")]
    pub if_value: i32,
    pub bandwidth: u32,
    pub datarate: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_frame_parses() {
        let frame = r#"{"msgtype":"version","station":"2.0.6","firmware":"1.0","package":"pkg","model":"corecell","protocol":2,"features":"rmtsh gps"}"#;
        let envelope: MessageType = serde_json::from_str(frame).unwrap();
        assert_eq!(envelope.msgtype, TYPE_VERSION);
        let version: Version = serde_json::from_str(frame).unwrap();
        assert_eq!(version.station, "2.0.6");
        assert!(!version.is_production());
        let version: Version =
            serde_json::from_str(r#"{"msgtype":"version","features":"prod gps"}"#).unwrap();
        assert!(version.is_production());
    }

    #[test]
    fn jreq_frame_parses_with_flattened_radio_metadata() {
        let frame = r#"{
            "msgtype":"jreq","MHdr":0,
            "JoinEui":"2222:2222:2222:2222","DevEui":"1111:1111:1111:1111",
            "DevNonce":18000,"MIC":12345,
            "DR":1,"Freq":868300000,
            "upinfo":{"rctx":0,"xtime":12666373963464220,"gpstime":0,"rssi":-36,"snr":8.25,"rxtime":1558332687.0}
        }"#;
        let jreq: JoinRequest = serde_json::from_str(frame).unwrap();
        assert_eq!(jreq.dev_nonce, 18000);
        assert_eq!(jreq.radio.data_rate_index, 1);
        assert_eq!(jreq.radio.frequency, 868_300_000);
        assert_eq!(jreq.radio.upinfo.xtime, 12_666_373_963_464_220);
        assert_eq!(jreq.dev_eui.0.to_string(), "1111111111111111");
    }

    #[test]
    fn updf_defaults_fport_to_minus_one() {
        let frame = r#"{
            "msgtype":"updf","MHdr":64,"DevAddr":16909060,"FCtrl":0,"FCnt":1,
            "FOpts":"","FRMPayload":"0102","MIC":-1,
            "DR":5,"Freq":868100000,
            "upinfo":{"xtime":1000100,"rssi":-35,"snr":5.0}
        }"#;
        let updf: UplinkDataFrame = serde_json::from_str(frame).unwrap();
        assert_eq!(updf.fport, -1);
        assert_eq!(updf.dev_addr, 16_909_060);
    }

    #[test]
    fn downlink_frame_uses_wire_key_casing() {
        let frame = DownlinkFrame {
            msgtype: TYPE_DOWNLINK_MESSAGE.to_string(),
            dev_eui: "00-00-00-00-00-00-00-00".to_string(),
            device_class: 0,
            diid: 7,
            pdu: "60".to_string(),
            rx_delay: 1,
            rx1_data_rate_index: 5,
            rx1_frequency: 868_100_000,
            priority: 25,
            xtime: 123,
            rctx: 0,
            mux_time: 1558332687.0,
        };
        let v = serde_json::to_value(&frame).unwrap();
        for key in [
            "msgtype", "DevEui", "dC", "diid", "pdu", "RxDelay", "RX1DR", "RX1Freq", "priority",
            "xtime", "rctx", "MuxTime",
        ] {
            assert!(v.get(key).is_some(), "missing key {key}");
        }
    }

    #[test]
    fn timesync_response_omits_gps_fields_when_disabled() {
        let resp = TimeSyncResponse {
            txtime: 1.5,
            xtime: None,
            gpstime: None,
            mux_time: 2.5,
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v.get("xtime").is_none());
        assert!(v.get("gpstime").is_none());
        assert!(v.get("MuxTime").is_some());
    }
}
