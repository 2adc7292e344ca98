use lgw_error::{GwError, GwResult};
use lgw_models::{DataRate, Eui64, FrequencyPlan, UplinkChannel};
use serde::{Deserialize, Serialize};

/// The Semtech packet-forwarder `global_conf.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConf {
    #[serde(rename = "SX1301_conf")]
    pub sx1301_conf: Sx1301Conf,
    pub gateway_conf: GatewayConf,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sx1301Conf {
    pub lorawan_public: bool,
    pub clksrc: u8,
    pub radio_0: RadioConf,
    pub radio_1: RadioConf,
    #[serde(rename = "chan_multiSF_0")]
    pub chan_multi_sf_0: ChannelConf,
    #[serde(rename = "chan_multiSF_1")]
    pub chan_multi_sf_1: ChannelConf,
    #[serde(rename = "chan_multiSF_2")]
    pub chan_multi_sf_2: ChannelConf,
    #[serde(rename = "chan_multiSF_3")]
    pub chan_multi_sf_3: ChannelConf,
    #[serde(rename = "chan_multiSF_4")]
    pub chan_multi_sf_4: ChannelConf,
    #[serde(rename = "chan_multiSF_5")]
    pub chan_multi_sf_5: ChannelConf,
    #[serde(rename = "chan_multiSF_6")]
    pub chan_multi_sf_6: ChannelConf,
    #[serde(rename = "chan_multiSF_7")]
    pub chan_multi_sf_7: ChannelConf,
    #[serde(rename = "chan_Lora_std")]
    pub chan_lora_std: LoraStdConf,
    #[serde(rename = "chan_FSK")]
    pub chan_fsk: FskConf,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RadioConf {
    pub enable: bool,
    #[serde(rename = "type")]
    pub radio_type: String,
    pub freq: u64,
    pub rssi_offset: f32,
    pub tx_enable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_freq_min: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_freq_max: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelConf {
    pub enable: bool,
    pub radio: u8,
    #[serde(rename = "if")]
    pub if_value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LoraStdConf {
    pub enable: bool,
    pub radio: u8,
    #[serde(rename = "if")]
    pub if_value: i32,
    pub bandwidth: u32,
    pub spread_factor: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FskConf {
    pub enable: bool,
    pub radio: u8,
    #[serde(rename = "if")]
    pub if_value: i32,
    pub bandwidth: u32,
    pub datarate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConf {
    #[serde(rename = "gateway_ID")]
    pub gateway_id: String,
    pub server_address: String,
    pub serv_port_up: u16,
    pub serv_port_down: u16,
}

const DEFAULT_RSSI_OFFSET: f32 = -166.0;

fn channel_if(plan: &FrequencyPlan, channel: &UplinkChannel) -> GwResult<i32> {
    let radio = plan
        .radios
        .get(channel.radio as usize)
        .ok_or_else(|| GwError::Msg(format!("channel references unknown radio {}", channel.radio)))?;
    Ok(channel.frequency as i32 - radio.frequency as i32)
}

/// Renders a `global_conf.json` for a gateway under `plan`.
pub fn build_global_conf(
    plan: &FrequencyPlan,
    eui: Option<Eui64>,
    server_address: &str,
    serv_port_up: u16,
    serv_port_down: u16,
) -> GwResult<GlobalConf> {
    let band = plan.band()?;
    let mut sx1301 = Sx1301Conf {
        lorawan_public: true,
        clksrc: 1,
        ..Default::default()
    };
    let radios = [&mut sx1301.radio_0, &mut sx1301.radio_1];
    for (slot, radio) in radios.into_iter().zip(plan.radios.iter()) {
        *slot = RadioConf {
            enable: radio.enable,
            radio_type: "SX1257".to_string(),
            freq: radio.frequency,
            rssi_offset: DEFAULT_RSSI_OFFSET,
            tx_enable: radio.tx_enable,
            tx_freq_min: radio.tx_enable.then_some(radio.tx_freq_min),
            tx_freq_max: radio.tx_enable.then_some(radio.tx_freq_max),
        };
    }

    let slots: [&mut ChannelConf; 8] = [
        &mut sx1301.chan_multi_sf_0,
        &mut sx1301.chan_multi_sf_1,
        &mut sx1301.chan_multi_sf_2,
        &mut sx1301.chan_multi_sf_3,
        &mut sx1301.chan_multi_sf_4,
        &mut sx1301.chan_multi_sf_5,
        &mut sx1301.chan_multi_sf_6,
        &mut sx1301.chan_multi_sf_7,
    ];
    for (slot, channel) in slots.into_iter().zip(plan.uplink_channels.iter()) {
        *slot = ChannelConf {
            enable: true,
            radio: channel.radio,
            if_value: channel_if(plan, channel)?,
        };
    }

    if let Some(channel) = &plan.lora_standard_channel {
        let (bandwidth, spread_factor) = match band.data_rate(channel.min_data_rate) {
            Some(DataRate::Lora {
                spreading_factor,
                bandwidth,
            }) => (bandwidth, spreading_factor),
            _ => (250_000, 7),
        };
        sx1301.chan_lora_std = LoraStdConf {
            enable: true,
            radio: channel.radio,
            if_value: channel_if(plan, channel)?,
            bandwidth,
            spread_factor,
        };
    }
    if let Some(channel) = &plan.fsk_channel {
        let datarate = match band.data_rate(channel.min_data_rate) {
            Some(DataRate::Fsk { bit_rate }) => bit_rate,
            _ => 50_000,
        };
        sx1301.chan_fsk = FskConf {
            enable: true,
            radio: channel.radio,
            if_value: channel_if(plan, channel)?,
            bandwidth: 125_000,
            datarate,
        };
    }

    Ok(GlobalConf {
        sx1301_conf: sx1301,
        gateway_conf: GatewayConf {
            gateway_id: eui.map(|e| e.to_string().to_uppercase()).unwrap_or_default(),
            server_address: server_address.to_string(),
            serv_port_up,
            serv_port_down,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eu868_global_conf() {
        let plan = FrequencyPlan::eu868();
        let eui: Eui64 = "1122334455667788".parse().unwrap();
        let conf = build_global_conf(&plan, Some(eui), "lns.example.com", 1700, 1700).unwrap();
        assert!(conf.sx1301_conf.lorawan_public);
        assert_eq!(conf.sx1301_conf.radio_0.freq, 867_500_000);
        assert_eq!(conf.sx1301_conf.radio_0.radio_type, "SX1257");
        assert!(conf.sx1301_conf.radio_0.tx_enable);
        assert_eq!(conf.sx1301_conf.radio_1.tx_freq_min, None);
        assert_eq!(conf.sx1301_conf.chan_multi_sf_0.if_value, -400_000);
        assert_eq!(conf.sx1301_conf.chan_multi_sf_0.radio, 1);
        assert_eq!(conf.sx1301_conf.chan_multi_sf_3.radio, 0);
        assert_eq!(conf.sx1301_conf.chan_lora_std.bandwidth, 250_000);
        assert_eq!(conf.sx1301_conf.chan_fsk.datarate, 50_000);
        assert_eq!(conf.gateway_conf.gateway_id, "1122334455667788");
        assert_eq!(conf.gateway_conf.serv_port_up, 1700);

        // The JSON keys match the packet forwarder's expectations.
        let v = serde_json::to_value(&conf).unwrap();
        assert!(v["SX1301_conf"]["chan_multiSF_0"]["if"].is_number());
        assert!(v["SX1301_conf"]["chan_Lora_std"]["spread_factor"].is_number());
        assert!(v["gateway_conf"]["gateway_ID"].is_string());
    }
}
