use lgw_error::{GwError, GwResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// An 8-byte EUI-64, stored big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    pub const fn from_bytes(b: [u8; 8]) -> Self {
        Self(b)
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    #[inline]
    pub const fn from_u64(v: u64) -> Self {
        Self(v.to_be_bytes())
    }

    #[inline]
    pub const fn to_u64(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 8]
    }

    /// Formats as `aa-bb-cc-01-02-03-42-ff`.
    pub fn to_dashed(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|b| format!("{b:02x}")).collect();
        parts.join("-")
    }
}

/// Lowercase hex without separators, e.g. `aabbcc01020342ff`.
impl Display for Eui64 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Accepts plain hex, dash-separated and colon-separated byte groups.
impl FromStr for Eui64 {
    type Err = GwError;

    fn from_str(s: &str) -> GwResult<Self> {
        let cleaned: String = s.chars().filter(|c| *c != '-' && *c != ':').collect();
        if cleaned.len() != 16 {
            return Err(GwError::InvalidEui(s.to_string()));
        }
        let bytes = hex::decode(&cleaned).map_err(|_| GwError::InvalidEui(s.to_string()))?;
        let mut out = [0u8; 8];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for Eui64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Eui64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format() {
        let eui: Eui64 = "AABBCC01020342FF".parse().unwrap();
        assert_eq!(eui.to_string(), "aabbcc01020342ff");
        assert_eq!(eui.to_dashed(), "aa-bb-cc-01-02-03-42-ff");
        assert_eq!("aa-bb-cc-01-02-03-42-ff".parse::<Eui64>().unwrap(), eui);
        assert_eq!("aa:bb:cc:01:02:03:42:ff".parse::<Eui64>().unwrap(), eui);
    }

    #[test]
    fn u64_round_trip() {
        for v in [0u64, 1, 0x1122334455667788, u64::MAX] {
            assert_eq!(Eui64::from_u64(v).to_u64(), v);
        }
    }

    #[test]
    fn rejects_malformed() {
        assert!("".parse::<Eui64>().is_err());
        assert!("112233".parse::<Eui64>().is_err());
        assert!("zz22334455667788".parse::<Eui64>().is_err());
        assert!("11223344556677889900".parse::<Eui64>().is_err());
    }
}
