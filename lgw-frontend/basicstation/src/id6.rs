//! The compact EUI text grammar of the LBS protocol.
//!
//! Accepted forms:
//! - hex with dashes: `aa-bb-cc-01-02-03-42-ff`
//! - hex with colons: `aa:bb:cc:01:02:03:42:ff`
//! - ID6, optionally prefixed: `[prefix-]group:group:group:group` with
//!   16-bit hex groups, `::` elision and empty groups meaning zero
//! - a positive decimal `u64`, big-endian

use lgw_error::{GwError, GwResult};
use lgw_models::Eui64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Parses any accepted EUI form, returning the lowercased prefix if one was
/// present.
pub fn parse(s: &str) -> GwResult<(Option<String>, Eui64)> {
    let s = s.trim();
    if s.is_empty() {
        return Err(GwError::InvalidEui(s.to_string()));
    }
    // A positive decimal integer.
    if s.bytes().all(|b| b.is_ascii_digit()) {
        let v: u64 = s
            .parse()
            .map_err(|_| GwError::InvalidEui(s.to_string()))?;
        if v == 0 {
            return Err(GwError::InvalidEui(s.to_string()));
        }
        return Ok((None, Eui64::from_u64(v)));
    }
    // Dash- or colon-separated hex bytes.
    if let Some(eui) = parse_hex_bytes(s) {
        return Ok((None, eui));
    }
    // ID6 with an optional prefix before the first dash.
    let (prefix, id6) = match s.split_once('-') {
        Some((prefix, rest)) if !prefix.is_empty() && !prefix.contains(':') => {
            (Some(prefix.to_lowercase()), rest)
        }
        _ => (None, s),
    };
    let eui = parse_id6(id6).ok_or_else(|| GwError::InvalidEui(s.to_string()))?;
    Ok((prefix, eui))
}

/// Parses, rejecting any prefix.
pub fn parse_eui(s: &str) -> GwResult<Eui64> {
    match parse(s)? {
        (None, eui) => Ok(eui),
        (Some(_), _) => Err(GwError::InvalidEui(s.to_string())),
    }
}

fn parse_hex_bytes(s: &str) -> Option<Eui64> {
    let sep = if s.contains('-') {
        '-'
    } else if s.contains(':') {
        ':'
    } else {
        return None;
    };
    let groups: Vec<&str> = s.split(sep).collect();
    if groups.len() != 8 || !groups.iter().all(|g| g.len() == 2) {
        return None;
    }
    let mut out = [0u8; 8];
    for (i, group) in groups.iter().enumerate() {
        out[i] = u8::from_str_radix(group, 16).ok()?;
    }
    Some(Eui64::from_bytes(out))
}

fn parse_id6(s: &str) -> Option<Eui64> {
    let groups: Vec<u16> = match s.split_once("::") {
        Some((left, right)) => {
            if right.contains("::") || left.ends_with(':') || right.starts_with(':') {
                return None;
            }
            let left: Vec<u16> = parse_groups(left)?;
            let right: Vec<u16> = parse_groups(right)?;
            if left.len() + right.len() > 4 {
                return None;
            }
            let mut groups = left;
            groups.resize(4 - right.len(), 0);
            groups.extend(right);
            groups
        }
        None => {
            let mut groups = parse_groups(s)?;
            match groups.len() {
                4 => {}
                // Three groups: the leading group is implied zero.
                3 => groups.insert(0, 0),
                _ => return None,
            }
            groups
        }
    };
    let mut out = [0u8; 8];
    for (i, group) in groups.iter().enumerate() {
        out[i * 2..i * 2 + 2].copy_from_slice(&group.to_be_bytes());
    }
    Some(Eui64::from_bytes(out))
}

fn parse_groups(s: &str) -> Option<Vec<u16>> {
    if s.is_empty() {
        return Some(Vec::new());
    }
    s.split(':')
        .map(|g| {
            if g.is_empty() {
                Some(0)
            } else if g.len() <= 4 {
                u16::from_str_radix(g, 16).ok()
            } else {
                None
            }
        })
        .collect()
}

/// Formats an EUI in canonical compact ID6.
pub fn format(eui: Eui64) -> String {
    let b = eui.as_bytes();
    let g: [u16; 4] = [
        u16::from_be_bytes([b[0], b[1]]),
        u16::from_be_bytes([b[2], b[3]]),
        u16::from_be_bytes([b[4], b[5]]),
        u16::from_be_bytes([b[6], b[7]]),
    ];
    match (g[0], g[1], g[2]) {
        (0, 0, 0) => format!("::{:x}", g[3]),
        (0, 0, _) => format!("::{:x}:{:x}", g[2], g[3]),
        (0, _, _) => format!("{:x}:{:x}:{:x}", g[1], g[2], g[3]),
        _ => format!("{:x}:{:x}:{:x}:{:x}", g[0], g[1], g[2], g[3]),
    }
}

/// Formats with a lowercased prefix, e.g. `muxs-::0`.
pub fn format_with_prefix(prefix: &str, eui: Eui64) -> String {
    format!("{}-{}", prefix.to_lowercase(), format(eui))
}

/// An EUI that (de)serializes in the ID6 grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Id6(pub Eui64);

impl Serialize for Id6 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(self.0))
    }
}

impl<'de> Deserialize<'de> for Id6 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(v) => Ok(Id6(Eui64::from_u64(v))),
            Raw::Text(s) => parse(&s)
                .map(|(_, eui)| Id6(eui))
                .map_err(serde::de::Error::custom),
        }
    }
}
