use crate::DataRate;
use lgw_error::{GwError, GwResult};
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const EU_863_870: &str = "EU_863_870";

/// Regional band parameters needed by the I/O layer: the data-rate index
/// table and the default radiated power ceiling.
#[derive(Debug, Clone)]
pub struct Band {
    pub id: &'static str,
    /// Data rates by LoRaWAN index; unassigned indices are `None`.
    pub data_rates: [Option<DataRate>; 16],
    /// Default maximum EIRP in dBm; the gateway antenna gain is subtracted
    /// from this when converting a TxRequest.
    pub default_max_eirp: f32,
}

impl Band {
    #[inline]
    pub fn data_rate(&self, index: u8) -> Option<DataRate> {
        self.data_rates.get(index as usize).copied().flatten()
    }

    /// Reverse lookup of a data rate's LoRaWAN index.
    pub fn data_rate_index(&self, dr: DataRate) -> Option<u8> {
        self.data_rates
            .iter()
            .position(|d| *d == Some(dr))
            .map(|i| i as u8)
    }
}

static BANDS: Lazy<HashMap<&'static str, Band>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        EU_863_870,
        Band {
            id: EU_863_870,
            data_rates: [
                Some(DataRate::lora(12, 125_000)),
                Some(DataRate::lora(11, 125_000)),
                Some(DataRate::lora(10, 125_000)),
                Some(DataRate::lora(9, 125_000)),
                Some(DataRate::lora(8, 125_000)),
                Some(DataRate::lora(7, 125_000)),
                Some(DataRate::lora(7, 250_000)),
                Some(DataRate::fsk(50_000)),
                None,
                None,
                None,
                None,
                None,
                None,
                None,
                None,
            ],
            default_max_eirp: 16.15,
        },
    );
    m
});

/// Looks up a band by its identifier.
pub fn band(id: &str) -> GwResult<&'static Band> {
    BANDS
        .get(id)
        .ok_or_else(|| GwError::UnknownBand(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eu868_data_rate_table() {
        let b = band(EU_863_870).unwrap();
        assert_eq!(b.data_rate(0), Some(DataRate::lora(12, 125_000)));
        assert_eq!(b.data_rate(5), Some(DataRate::lora(7, 125_000)));
        assert_eq!(b.data_rate(6), Some(DataRate::lora(7, 250_000)));
        assert_eq!(b.data_rate(7), Some(DataRate::fsk(50_000)));
        assert_eq!(b.data_rate(8), None);
        assert_eq!(b.data_rate_index(DataRate::lora(11, 125_000)), Some(1));
    }

    #[test]
    fn unknown_band_errors() {
        assert!(band("MOON_2400").is_err());
    }
}
