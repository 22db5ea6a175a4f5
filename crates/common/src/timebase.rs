//! Timebase conversions.
//!
//! Containers store times as integer ticks of a per-track timescale; codecs
//! and the pipeline speak microseconds; cues and styles speak seconds.

/// Microseconds per second.
pub const MICROS_PER_SEC: f64 = 1_000_000.0;

/// Convert container ticks to microseconds: `value * 1e6 / timescale`.
///
/// A zero timescale yields zero rather than a division fault.
pub fn to_micros(value: i64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    (value as f64 * MICROS_PER_SEC / timescale as f64).round() as i64
}

/// Convert microseconds to container ticks of `timescale`.
pub fn micros_to_timescale(micros: i64, timescale: u32) -> i64 {
    (micros as f64 * timescale as f64 / MICROS_PER_SEC).round() as i64
}

/// Convert microseconds to seconds.
pub fn micros_to_secs(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_SEC
}

/// Convert seconds to microseconds.
pub fn secs_to_micros(secs: f64) -> i64 {
    (secs * MICROS_PER_SEC).round() as i64
}

/// Duration in seconds of `ticks` at `timescale`.
pub fn ticks_to_secs(ticks: u64, timescale: u32) -> f64 {
    if timescale == 0 {
        return 0.0;
    }
    ticks as f64 / timescale as f64
}
