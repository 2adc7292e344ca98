//! Conversion between UTC and GPS time.
//!
//! GPS time counts atomic seconds since the GPS epoch (1980-01-06 00:00:00
//! UTC) and does not observe leap seconds, so it runs ahead of UTC by the
//! number of leap seconds inserted since the epoch. Absolute-time downlinks
//! are addressed in GPS microseconds, which makes this conversion load-bearing
//! for class-B and absolute-time class-A scheduling.
//!
//! Times that fall inside an inserted leap second map onto the UTC second
//! before the leap (the leap is represented as a repeated UTC second), and
//! converting such a UTC instant back yields the pre-leap GPS duration.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Unix timestamp of the GPS epoch, 1980-01-06 00:00:00 UTC.
const GPS_EPOCH_UNIX: i64 = 315_964_800;

/// GPS seconds at which a leap second was inserted, in ascending order.
///
/// Each entry marks the start of the inserted second in the GPS timescale;
/// the trailing digits carry the leap seconds accumulated before the entry.
const LEAPS: [i64; 18] = [
    46_828_800,    // 1981-06-30
    78_364_801,    // 1982-06-30
    109_900_802,   // 1983-06-30
    173_059_203,   // 1985-06-30
    252_028_804,   // 1987-12-31
    315_187_205,   // 1989-12-31
    346_723_206,   // 1990-12-31
    393_984_007,   // 1992-06-30
    425_520_008,   // 1993-06-30
    457_056_009,   // 1994-06-30
    504_489_610,   // 1995-12-31
    551_750_411,   // 1997-06-30
    599_184_012,   // 1998-12-31
    820_108_813,   // 2005-12-31
    914_803_214,   // 2008-12-31
    1_025_136_015, // 2012-06-30
    1_119_744_016, // 2015-06-30
    1_167_264_017, // 2016-12-31
];

#[inline]
fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(GPS_EPOCH_UNIX, 0).unwrap()
}

/// Converts a duration since the GPS epoch to UTC.
///
/// Durations inside an inserted leap second resolve to the repeated UTC
/// second immediately before the leap.
pub fn parse(gps: Duration) -> DateTime<Utc> {
    let secs = gps.as_secs() as i64;
    let leaps = LEAPS.iter().filter(|l| secs >= **l).count() as i64;
    epoch() + chrono::Duration::seconds(secs - leaps) + chrono::Duration::nanoseconds(gps.subsec_nanos() as i64)
}

/// Converts a UTC time at or after the GPS epoch to a duration since the
/// GPS epoch.
///
/// Returns `None` for times before the epoch. For a UTC instant inside a
/// repeated (leap) second the pre-leap GPS duration is returned.
pub fn to_gps(t: DateTime<Utc>) -> Option<Duration> {
    let delta = t - epoch();
    let mut secs = delta.num_seconds();
    let nanos = delta.subsec_nanos();
    if secs < 0 || nanos < 0 {
        return None;
    }
    // Each leap already passed shifts the GPS scale one second ahead of UTC.
    // The comparison uses the running (corrected) value so that instants in
    // the repeated second stay on the pre-leap side.
    for leap in LEAPS {
        if secs >= leap {
            secs += 1;
        } else {
            break;
        }
    }
    Some(Duration::new(secs as u64, nanos as u32))
}

/// Reports whether the GPS duration falls inside an inserted leap second,
/// at second granularity.
#[inline]
pub fn is_leap_second(gps: Duration) -> bool {
    let secs = gps.as_secs() as i64;
    LEAPS.binary_search(&secs).is_ok()
}
