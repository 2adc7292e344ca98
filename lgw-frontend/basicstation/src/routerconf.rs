use crate::messages::{
    RouterConfig, Sx1301Channel, Sx1301Conf, Sx1301FskChannel, Sx1301LoraStdChannel, Sx1301Radio,
    TYPE_ROUTER_CONFIG,
};
use lgw_error::{GwError, GwResult};
use lgw_models::{Band, DataRate, FrequencyPlan, UplinkChannel};

/// LBS region names by band id.
fn region(band_id: &str) -> String {
    match band_id {
        "EU_863_870" => "EU863".to_string(),
        "US_902_928" => "US902".to_string(),
        "AU_915_928" => "AU915".to_string(),
        "AS_923" => "AS923".to_string(),
        "KR_920_923" => "KR920".to_string(),
        "IN_865_867" => "IN865".to_string(),
        other => other.to_string(),
    }
}

/// Builds the `router_config` reply from the gateway's frequency plan.
///
/// Firmware without the `prod` feature gets the debug radio flags (no CCA, no
/// duty cycle, no dwell time) enabled.
pub fn build_router_config(
    plan: &FrequencyPlan,
    band: &Band,
    features: &str,
    mux_time: f64,
) -> GwResult<RouterConfig> {
    let production = features.split_whitespace().any(|f| f == "prod");

    let mut data_rates = Vec::with_capacity(band.data_rates.len());
    for dr in &band.data_rates {
        data_rates.push(match dr {
            Some(DataRate::Lora {
                spreading_factor,
                bandwidth,
            }) => [*spreading_factor as i32, (bandwidth / 1000) as i32, 0],
            Some(DataRate::Fsk { .. }) => [0, 0, 0],
            None => [-1, 0, 0],
        });
    }

    let freq_range = frequency_range(plan)?;
    let sx1301 = build_sx1301_conf(plan, band)?;

    Ok(RouterConfig {
        msgtype: TYPE_ROUTER_CONFIG.to_string(),
        region: region(&plan.band_id),
        hwspec: "sx1301/1".to_string(),
        freq_range,
        data_rates,
        sx1301_conf: vec![sx1301],
        nocca: !production,
        nodc: !production,
        nodwell: !production,
        mux_time,
    })
}

fn frequency_range(plan: &FrequencyPlan) -> GwResult<[u64; 2]> {
    let min = plan.sub_bands.iter().map(|sb| sb.min_frequency).min();
    let max = plan.sub_bands.iter().map(|sb| sb.max_frequency).max();
    match (min, max) {
        (Some(min), Some(max)) => Ok([min, max]),
        _ => Err(GwError::Msg(format!(
            "frequency plan `{}` has no sub-bands",
            plan.id
        ))),
    }
}

fn channel_if(plan: &FrequencyPlan, channel: &UplinkChannel) -> GwResult<i32> {
    let radio = plan
        .radios
        .get(channel.radio as usize)
        .ok_or_else(|| GwError::Msg(format!("channel references unknown radio {}", channel.radio)))?;
    Ok(channel.frequency as i32 - radio.frequency as i32)
}

fn build_sx1301_conf(plan: &FrequencyPlan, band: &Band) -> GwResult<Sx1301Conf> {
    let mut conf = Sx1301Conf {
        lorawan_public: true,
        clksrc: 1,
        ..Default::default()
    };
    if let Some(radio) = plan.radios.first() {
        conf.radio_0 = Sx1301Radio {
            enable: radio.enable,
            freq: radio.frequency,
        };
    }
    if let Some(radio) = plan.radios.get(1) {
        conf.radio_1 = Sx1301Radio {
            enable: radio.enable,
            freq: radio.frequency,
        };
    }

    let slots: [&mut Sx1301Channel; 8] = [
        &mut conf.chan_multi_sf_0,
        &mut conf.chan_multi_sf_1,
        &mut conf.chan_multi_sf_2,
        &mut conf.chan_multi_sf_3,
        &mut conf.chan_multi_sf_4,
        &mut conf.chan_multi_sf_5,
        &mut conf.chan_multi_sf_6,
        &mut conf.chan_multi_sf_7,
    ];
    for (slot, channel) in slots.into_iter().zip(plan.uplink_channels.iter()) {
        *slot = Sx1301Channel {
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
        conf.chan_lora_std = Sx1301LoraStdChannel {
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
        conf.chan_fsk = Sx1301FskChannel {
            enable: true,
            radio: channel.radio,
            if_value: channel_if(plan, channel)?,
            bandwidth: 125_000,
            datarate,
        };
    }
    Ok(conf)
}
