use chrono::{DateTime, Duration, Utc};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Mutex,
};

const RING_SIZE: usize = 16;

#[derive(Debug, Clone)]
struct Slot {
    key: u16,
    correlation_ids: Vec<String>,
    issued_at: DateTime<Utc>,
}

/// Fixed 16-slot ring correlating 16-bit downlink tokens with the downlink's
/// correlation ids and issue time.
///
/// New tokens overwrite the oldest slot; a gateway round trip is short
/// relative to 16 in-flight downlinks, so wrap-around is the only eviction.
#[derive(Debug, Default)]
pub struct DownlinkTokens {
    next: AtomicU32,
    items: [Mutex<Option<Slot>>; RING_SIZE],
}

impl DownlinkTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next token for a downlink carrying `correlation_ids`.
    pub fn next(&self, correlation_ids: &[String], time: DateTime<Utc>) -> u16 {
        let key = self.next.fetch_add(1, Ordering::Relaxed) as u16;
        let slot = &self.items[key as usize % RING_SIZE];
        *slot.lock().unwrap() = Some(Slot {
            key,
            correlation_ids: correlation_ids.to_vec(),
            issued_at: time,
        });
        key
    }

    /// Looks up a token, returning the correlation ids and the age of the
    /// token. Returns `None` if the slot was overwritten since issuance.
    pub fn get(&self, key: u16, time: DateTime<Utc>) -> Option<(Vec<String>, Duration)> {
        let slot = self.items[key as usize % RING_SIZE].lock().unwrap();
        match slot.as_ref() {
            Some(item) if item.key == key => {
                Some((item.correlation_ids.clone(), time - item.issued_at))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::milliseconds(ms)
    }

    #[test]
    fn issues_sequential_keys_and_finds_them() {
        let tokens = DownlinkTokens::new();
        let cids = vec!["dl:1".to_string()];
        let k0 = tokens.next(&cids, at(0));
        let k1 = tokens.next(&cids, at(10));
        assert_eq!(k1, k0.wrapping_add(1));
        let (got, age) = tokens.get(k0, at(50)).unwrap();
        assert_eq!(got, cids);
        assert_eq!(age, Duration::milliseconds(50));
    }

    #[test]
    fn sixteen_outstanding_tokens_survive() {
        let tokens = DownlinkTokens::new();
        let keys: Vec<u16> = (0..16)
            .map(|i| tokens.next(&[format!("dl:{i}")], at(i)))
            .collect();
        for (i, key) in keys.iter().enumerate() {
            let (cids, _) = tokens.get(*key, at(100)).unwrap();
            assert_eq!(cids, vec![format!("dl:{i}")]);
        }
    }

    #[test]
    fn seventeenth_token_evicts_the_first() {
        let tokens = DownlinkTokens::new();
        let first = tokens.next(&["dl:0".to_string()], at(0));
        for i in 1..=16 {
            tokens.next(&[format!("dl:{i}")], at(i));
        }
        assert!(tokens.get(first, at(100)).is_none());
        // The evicting token is found in the recycled slot.
        let (cids, _) = tokens.get(first.wrapping_add(16), at(100)).unwrap();
        assert_eq!(cids, vec!["dl:16".to_string()]);
    }

    #[test]
    fn unknown_key_is_not_found() {
        let tokens = DownlinkTokens::new();
        tokens.next(&["dl:0".to_string()], at(0));
        assert!(tokens.get(7, at(1)).is_none());
    }
}
