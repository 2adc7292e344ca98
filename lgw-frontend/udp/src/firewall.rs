use crate::packets::PacketType;
use dashmap::DashMap;
use lgw_error::{GwError, GwResult};
use lgw_models::Eui64;
use std::{
    collections::VecDeque,
    net::{IpAddr, SocketAddr},
    sync::Mutex,
    time::Duration,
};
use tokio::time::Instant;

/// Packet admission filter applied before any state is touched.
///
/// Filters compose by wrapping; both the wrapper and the wrapped filter must
/// accept a packet for it to pass.
pub trait Firewall: Send + Sync + 'static {
    fn filter(&self, eui: Eui64, packet_type: PacketType, addr: SocketAddr) -> GwResult<()>;

    /// Periodic cleanup of expired entries.
    fn sweep(&self, now: Instant) {
        let _ = now;
    }
}

/// Accepts everything; the tail of every filter chain.
#[derive(Debug, Default)]
pub struct NoopFirewall;

impl Firewall for NoopFirewall {
    #[inline]
    fn filter(&self, _eui: Eui64, _packet_type: PacketType, _addr: SocketAddr) -> GwResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Seen {
    ip: IpAddr,
    last_seen: Instant,
}

/// Rejects packets for a gateway whose source IP changed less than
/// `block` ago.
///
/// PULL_DATA (the downlink path) and PUSH_DATA/TX_ACK (the uplink path) are
/// tracked separately so a gateway with split paths is not penalized.
#[derive(Debug)]
pub struct AddrChangeFirewall {
    block: Duration,
    pull: DashMap<Eui64, Seen>,
    data: DashMap<Eui64, Seen>,
}

impl AddrChangeFirewall {
    pub fn new(block: Duration) -> Self {
        Self {
            block,
            pull: DashMap::new(),
            data: DashMap::new(),
        }
    }

    fn check(map: &DashMap<Eui64, Seen>, block: Duration, eui: Eui64, ip: IpAddr) -> GwResult<()> {
        let now = Instant::now();
        match map.entry(eui) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let seen = entry.get_mut();
                if seen.ip != ip && now.duration_since(seen.last_seen) < block {
                    return Err(GwError::AddrChangeBlocked);
                }
                seen.ip = ip;
                seen.last_seen = now;
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Seen { ip, last_seen: now });
            }
        }
        Ok(())
    }
}

impl Firewall for AddrChangeFirewall {
    fn filter(&self, eui: Eui64, packet_type: PacketType, addr: SocketAddr) -> GwResult<()> {
        let map = match packet_type {
            PacketType::PullData => &self.pull,
            _ => &self.data,
        };
        Self::check(map, self.block, eui, addr.ip())
    }

    fn sweep(&self, now: Instant) {
        self.pull
            .retain(|_, seen| now.duration_since(seen.last_seen) < self.block);
        self.data
            .retain(|_, seen| now.duration_since(seen.last_seen) < self.block);
    }
}

/// Per-EUI flood check over the last N message arrival times.
///
/// The ring is keyed by EUI alone, so NAT port rebinding does not escape the
/// limit. Wraps another filter; a packet must pass both.
pub struct RateLimitingFirewall {
    messages: usize,
    threshold: Duration,
    rings: DashMap<Eui64, Mutex<VecDeque<Instant>>>,
    inner: Box<dyn Firewall>,
}

impl RateLimitingFirewall {
    pub fn wrap(inner: Box<dyn Firewall>, messages: usize, threshold: Duration) -> Self {
        Self {
            messages: messages.max(1),
            threshold,
            rings: DashMap::new(),
            inner,
        }
    }

    fn check_rate(&self, eui: Eui64) -> GwResult<()> {
        let now = Instant::now();
        let ring = self
            .rings
            .entry(eui)
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(self.messages)));
        let mut ring = ring.lock().unwrap();
        let oldest = if ring.len() >= self.messages {
            ring.pop_front()
        } else {
            None
        };
        ring.push_back(now);
        if let Some(oldest) = oldest {
            if now.duration_since(oldest) < self.threshold {
                return Err(GwError::RateExceeded);
            }
        }
        Ok(())
    }
}

impl Firewall for RateLimitingFirewall {
    fn filter(&self, eui: Eui64, packet_type: PacketType, addr: SocketAddr) -> GwResult<()> {
        self.check_rate(eui)?;
        self.inner.filter(eui, packet_type, addr)
    }

    fn sweep(&self, now: Instant) {
        self.rings.retain(|_, ring| {
            let ring = ring.lock().unwrap();
            ring.back()
                .map(|last| now.duration_since(*last) < self.threshold.max(Duration::from_secs(60)))
                .unwrap_or(false)
        });
        self.inner.sweep(now);
    }
}
