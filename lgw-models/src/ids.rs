use crate::Eui64;
use serde::{Deserialize, Serialize};

/// Identifiers naming one gateway.
///
/// A gateway is addressed either by a human-assigned id or by its EUI-64; the
/// UDP frontend only ever learns the EUI and mints a synthetic id from it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GatewayIds {
    pub gateway_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eui: Option<Eui64>,
}

impl GatewayIds {
    pub fn new(gateway_id: impl Into<String>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            eui: None,
        }
    }

    /// Mint identifiers from an EUI alone, as the UDP frontend does before
    /// the server has filled in the registered gateway id.
    pub fn from_eui(eui: Eui64) -> Self {
        Self {
            gateway_id: format!("eui-{eui}"),
            eui: Some(eui),
        }
    }

    /// Namespaced hash of the gateway id, used as a map key by upper layers.
    #[inline]
    pub fn unique_id(&self) -> String {
        lgw_utils::hash::namespaced_id("gateway", &self.gateway_id)
    }
}

/// One physical antenna of a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Antenna {
    /// Antenna gain in dBi, subtracted from the band max EIRP when
    /// scheduling downlinks.
    pub gain: f32,
}

/// Descriptor of a connected gateway as registered upstream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Gateway {
    pub ids: GatewayIds,
    pub antennas: Vec<Antenna>,
    pub frequency_plan_id: String,
    /// Prefer handing downlinks to the gateway shortly before their TX time
    /// instead of immediately.
    pub schedule_downlink_late: bool,
}

impl Gateway {
    #[inline]
    pub fn antenna_gain(&self, index: usize) -> f32 {
        self.antennas.get(index).map(|a| a.gain).unwrap_or(0.0)
    }
}
