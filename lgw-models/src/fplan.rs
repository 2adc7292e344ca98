use crate::band::{self, Band, EU_863_870};
use lgw_error::GwResult;
use serde::{Deserialize, Serialize};

/// One concentrator radio chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Radio {
    pub enable: bool,
    /// Center frequency in Hz.
    pub frequency: u64,
    pub tx_enable: bool,
    pub tx_freq_min: u64,
    pub tx_freq_max: u64,
}

/// Uplink channel assignment of an SX1301 IF chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UplinkChannel {
    pub frequency: u64,
    pub radio: u8,
    pub min_data_rate: u8,
    pub max_data_rate: u8,
}

/// A frequency on which downlinks may be transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DownlinkChannel {
    pub frequency: u64,
    pub min_data_rate: u8,
    pub max_data_rate: u8,
}

/// A regulatory sub-band with optional EIRP override.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubBand {
    pub min_frequency: u64,
    pub max_frequency: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_eirp: Option<f32>,
    /// Duty cycle as a fraction (1.0 = no limit).
    pub duty_cycle: f32,
}

/// The frequency plan a gateway operates under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyPlan {
    pub id: String,
    pub band_id: String,
    pub radios: Vec<Radio>,
    pub uplink_channels: Vec<UplinkChannel>,
    pub downlink_channels: Vec<DownlinkChannel>,
    pub sub_bands: Vec<SubBand>,
    /// The LoRa standard (250/500 kHz) channel, if assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora_standard_channel: Option<UplinkChannel>,
    /// The FSK channel, if assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fsk_channel: Option<UplinkChannel>,
}

impl FrequencyPlan {
    #[inline]
    pub fn band(&self) -> GwResult<&'static Band> {
        band::band(&self.band_id)
    }

    /// Locates the downlink channel matching the frequency whose data-rate
    /// range contains `data_rate_index`.
    pub fn find_downlink_channel(
        &self,
        frequency: u64,
        data_rate_index: u8,
    ) -> Option<&DownlinkChannel> {
        self.downlink_channels.iter().find(|c| {
            c.frequency == frequency
                && c.min_data_rate <= data_rate_index
                && data_rate_index <= c.max_data_rate
        })
    }

    /// Maximum EIRP at a frequency, honoring sub-band overrides and falling
    /// back to the band default.
    pub fn max_eirp_at(&self, frequency: u64, band: &Band) -> f32 {
        self.sub_bands
            .iter()
            .find(|sb| sb.min_frequency <= frequency && frequency < sb.max_frequency)
            .and_then(|sb| sb.max_eirp)
            .unwrap_or(band.default_max_eirp)
    }

    /// The default European 863–870 MHz plan with the three LoRaWAN mandatory
    /// channels plus the five commonly provisioned 867 MHz channels.
    pub fn eu868() -> Self {
        let up = |frequency: u64, radio: u8| UplinkChannel {
            frequency,
            radio,
            min_data_rate: 0,
            max_data_rate: 5,
        };
        let down = |frequency: u64| DownlinkChannel {
            frequency,
            min_data_rate: 0,
            max_data_rate: 7,
        };
        Self {
            id: EU_863_870.to_string(),
            band_id: EU_863_870.to_string(),
            radios: vec![
                Radio {
                    enable: true,
                    frequency: 867_500_000,
                    tx_enable: true,
                    tx_freq_min: 863_000_000,
                    tx_freq_max: 870_000_000,
                },
                Radio {
                    enable: true,
                    frequency: 868_500_000,
                    tx_enable: false,
                    tx_freq_min: 0,
                    tx_freq_max: 0,
                },
            ],
            uplink_channels: vec![
                up(868_100_000, 1),
                up(868_300_000, 1),
                up(868_500_000, 1),
                up(867_100_000, 0),
                up(867_300_000, 0),
                up(867_500_000, 0),
                up(867_700_000, 0),
                up(867_900_000, 0),
            ],
            downlink_channels: vec![
                down(868_100_000),
                down(868_300_000),
                down(868_500_000),
                down(867_100_000),
                down(867_300_000),
                down(867_500_000),
                down(867_700_000),
                down(867_900_000),
                // RX2
                down(869_525_000),
            ],
            sub_bands: vec![
                SubBand {
                    min_frequency: 863_000_000,
                    max_frequency: 865_000_000,
                    max_eirp: None,
                    duty_cycle: 0.001,
                },
                SubBand {
                    min_frequency: 865_000_000,
                    max_frequency: 868_000_000,
                    max_eirp: None,
                    duty_cycle: 0.01,
                },
                SubBand {
                    min_frequency: 868_000_000,
                    max_frequency: 868_600_000,
                    max_eirp: None,
                    duty_cycle: 0.01,
                },
                SubBand {
                    min_frequency: 868_700_000,
                    max_frequency: 869_200_000,
                    max_eirp: None,
                    duty_cycle: 0.001,
                },
                SubBand {
                    min_frequency: 869_400_000,
                    max_frequency: 869_650_000,
                    max_eirp: Some(29.15),
                    duty_cycle: 0.1,
                },
                SubBand {
                    min_frequency: 869_700_000,
                    max_frequency: 870_000_000,
                    max_eirp: None,
                    duty_cycle: 0.01,
                },
            ],
            lora_standard_channel: Some(UplinkChannel {
                frequency: 868_300_000,
                radio: 1,
                min_data_rate: 6,
                max_data_rate: 6,
            }),
            fsk_channel: Some(UplinkChannel {
                frequency: 868_800_000,
                radio: 1,
                min_data_rate: 7,
                max_data_rate: 7,
            }),
        }
    }
}
