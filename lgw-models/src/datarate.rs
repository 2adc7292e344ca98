use serde::{Deserialize, Serialize};

/// Radio data rate of an uplink or downlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "modulation", rename_all = "lowercase")]
pub enum DataRate {
    Lora {
        spreading_factor: u8,
        /// Bandwidth in Hz.
        bandwidth: u32,
    },
    Fsk {
        /// Bit rate in bit/s.
        bit_rate: u32,
    },
}

impl DataRate {
    pub const fn lora(spreading_factor: u8, bandwidth: u32) -> Self {
        DataRate::Lora {
            spreading_factor,
            bandwidth,
        }
    }

    pub const fn fsk(bit_rate: u32) -> Self {
        DataRate::Fsk { bit_rate }
    }

    #[inline]
    pub fn is_lora(&self) -> bool {
        matches!(self, DataRate::Lora { .. })
    }
}
