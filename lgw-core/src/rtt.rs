use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default maximum number of retained samples.
pub const DEFAULT_COUNT: usize = 20;
/// Default time horizon beyond which samples are discarded.
pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// Statistics over the retained round-trip samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttStats {
    pub min: Duration,
    pub max: Duration,
    pub median: Duration,
    pub count: usize,
}

/// Bounded in-memory window of gateway round-trip-time samples.
///
/// Fed by TX_ACK token ages on the UDP frontend and by `RefTime`/`MuxTime`
/// echoes on the LBS frontend.
#[derive(Debug)]
pub struct RttSampler {
    max_count: usize,
    ttl: Duration,
    samples: Mutex<VecDeque<(DateTime<Utc>, Duration)>>,
}

impl Default for RttSampler {
    fn default() -> Self {
        Self::new(DEFAULT_COUNT, Duration::minutes(DEFAULT_TTL_MINUTES))
    }
}

impl RttSampler {
    pub fn new(max_count: usize, ttl: Duration) -> Self {
        Self {
            max_count,
            ttl,
            samples: Mutex::new(VecDeque::with_capacity(max_count)),
        }
    }

    /// Records one round-trip observation.
    pub fn record(&self, rtt: Duration, at: DateTime<Utc>) {
        if rtt < Duration::zero() {
            return;
        }
        let mut samples = self.samples.lock().unwrap();
        while samples.len() >= self.max_count {
            samples.pop_front();
        }
        samples.push_back((at, rtt));
    }

    /// Computes min/max/median over samples within the horizon, considering
    /// at most the newest `max` samples. Returns `None` when no sample
    /// qualifies.
    pub fn stats(&self, max: usize, now: DateTime<Utc>) -> Option<RttStats> {
        let samples = self.samples.lock().unwrap();
        let mut window: Vec<Duration> = samples
            .iter()
            .rev()
            .filter(|(at, _)| now - *at <= self.ttl)
            .take(max)
            .map(|(_, rtt)| *rtt)
            .collect();
        if window.is_empty() {
            return None;
        }
        window.sort();
        let count = window.len();
        let median = if count % 2 == 1 {
            window[count / 2]
        } else {
            (window[count / 2 - 1] + window[count / 2]) / 2
        };
        Some(RttStats {
            min: window[0],
            max: window[count - 1],
            median,
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn empty_sampler_has_no_stats() {
        let sampler = RttSampler::default();
        assert_eq!(sampler.stats(5, at(0)), None);
    }

    #[test]
    fn min_max_median() {
        let sampler = RttSampler::default();
        for ms in [30, 10, 20] {
            sampler.record(Duration::milliseconds(ms), at(0));
        }
        let stats = sampler.stats(10, at(1)).unwrap();
        assert_eq!(stats.min, Duration::milliseconds(10));
        assert_eq!(stats.max, Duration::milliseconds(30));
        assert_eq!(stats.median, Duration::milliseconds(20));
        assert_eq!(stats.count, 3);
    }

    #[test]
    fn even_count_median_averages() {
        let sampler = RttSampler::default();
        for ms in [10, 20, 30, 40] {
            sampler.record(Duration::milliseconds(ms), at(0));
        }
        let stats = sampler.stats(10, at(1)).unwrap();
        assert_eq!(stats.median, Duration::milliseconds(25));
    }

    #[test]
    fn capacity_is_bounded() {
        let sampler = RttSampler::new(3, Duration::minutes(30));
        for ms in [10, 20, 30, 40] {
            sampler.record(Duration::milliseconds(ms), at(0));
        }
        let stats = sampler.stats(10, at(1)).unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Duration::milliseconds(20));
    }

    #[test]
    fn old_samples_age_out() {
        let sampler = RttSampler::default();
        sampler.record(Duration::milliseconds(10), at(0));
        sampler.record(Duration::milliseconds(50), at(31 * 60));
        let stats = sampler.stats(10, at(31 * 60)).unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.min, Duration::milliseconds(50));
    }

    #[test]
    fn negative_samples_are_ignored() {
        let sampler = RttSampler::default();
        sampler.record(Duration::milliseconds(-5), at(0));
        assert_eq!(sampler.stats(10, at(0)), None);
    }
}
