use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide I/O counters.
///
/// Registered once at module initialization; frontends receive a handle at
/// construction so tests can pass a private instance instead of the global.
#[derive(Debug, Default)]
pub struct IoCounters {
    pub uplinks_received: AtomicU64,
    pub uplinks_forwarded: AtomicU64,
    pub uplinks_dropped: AtomicU64,
    pub downlinks_sent: AtomicU64,
    pub tx_acks_received: AtomicU64,
    pub status_received: AtomicU64,
    pub firewall_drops: AtomicU64,
    pub rate_limited: AtomicU64,
}

static GLOBAL: Lazy<Arc<IoCounters>> = Lazy::new(|| Arc::new(IoCounters::default()));

impl IoCounters {
    /// The process-wide instance.
    pub fn global() -> Arc<IoCounters> {
        Arc::clone(&GLOBAL)
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
