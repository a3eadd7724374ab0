// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Timing and index arithmetic.
//!
//! All timestamps in MXL are TAI nanoseconds following SMPTE ST 2059
//! (epoch 1970-01-01 00:00:00 TAI, no leap seconds). Grain and sample
//! indices advance at a rational edit rate; the conversions in this module
//! are pure, allocation-free, and use 128-bit intermediates so they stay
//! exact for any timestamp representable in 64 bits.

use std::time::{Duration, Instant};

/// A TAI timestamp in nanoseconds since the SMPTE ST 2059 epoch.
pub type Timepoint = i64;

/// Reserved index value meaning "no valid index".
pub const UNDEFINED_INDEX: u64 = u64::MAX;

const NS_PER_SECOND: i128 = 1_000_000_000;

/// A rational edit rate: grains per second for discrete flows, samples per
/// second for continuous flows.
///
/// A rate with a zero term is invalid; conversions involving it yield
/// [`UNDEFINED_INDEX`] or a zero [`Timepoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Rational {
    /// Numerator of the rate.
    pub numerator: i64,
    /// Denominator of the rate.
    pub denominator: i64,
}

impl Rational {
    /// Creates a rate from a numerator/denominator pair.
    pub const fn new(numerator: i64, denominator: i64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Returns `true` if both terms are non-zero.
    pub const fn is_valid(&self) -> bool {
        self.numerator != 0 && self.denominator != 0
    }

    /// Returns `true` if both terms are strictly positive.
    ///
    /// Flow creation requires a positive rate; the plain conversion
    /// functions only require [`Self::is_valid`].
    pub const fn is_positive(&self) -> bool {
        self.numerator > 0 && self.denominator > 0
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Converts a TAI timestamp to the grain/sample index current at that time.
///
/// Rounds to the nearest index boundary at 1 ns precision. Returns
/// [`UNDEFINED_INDEX`] when the edit rate has a zero term.
pub fn timestamp_to_index(edit_rate: Rational, timestamp: Timepoint) -> u64 {
    if !edit_rate.is_valid() {
        return UNDEFINED_INDEX;
    }
    let num = i128::from(edit_rate.numerator);
    let den = i128::from(edit_rate.denominator);
    let index = (i128::from(timestamp) * num + 500_000_000 * den) / (NS_PER_SECOND * den);
    index as u64
}

/// Converts a grain/sample index to the TAI timestamp at which it becomes
/// current.
///
/// Inverse of [`timestamp_to_index`] up to the rate-dependent rounding
/// half-interval. Returns a zero [`Timepoint`] when the edit rate has a
/// zero term.
pub fn index_to_timestamp(edit_rate: Rational, index: u64) -> Timepoint {
    if !edit_rate.is_valid() {
        return 0;
    }
    let num = i128::from(edit_rate.numerator);
    let den = i128::from(edit_rate.denominator);
    ((i128::from(index) * den * NS_PER_SECOND + num / 2) / num) as Timepoint
}

/// Returns the current TAI time in nanoseconds.
///
/// On Linux this reads `CLOCK_TAI`; elsewhere it falls back to the realtime
/// clock (which tracks UTC — acceptable for hosts without a TAI offset
/// configured, and consistent across all participants on one host).
pub fn current_time() -> Timepoint {
    #[cfg(target_os = "linux")]
    {
        if let Ok(ts) = nix::time::clock_gettime(nix::time::ClockId::CLOCK_TAI) {
            return ts.tv_sec() * NS_PER_SECOND as i64 + ts.tv_nsec();
        }
    }
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_nanos() as Timepoint,
        Err(_) => 0,
    }
}

/// Returns the index current at this moment for the given rate.
pub fn current_index(edit_rate: Rational) -> u64 {
    timestamp_to_index(edit_rate, current_time())
}

/// Returns the number of nanoseconds until the end of `index` (i.e. until
/// `index + 1` becomes current).
///
/// Returns zero when that moment has already passed and `u64::MAX` when the
/// edit rate is invalid.
pub fn ns_until_index(index: u64, edit_rate: Rational) -> u64 {
    if !edit_rate.is_valid() {
        return u64::MAX;
    }
    let arrival = index_to_timestamp(edit_rate, index.saturating_add(1));
    let now = current_time();
    if arrival > now { (arrival - now) as u64 } else { 0 }
}

/// Suspends the calling thread for at least `ns` nanoseconds, measured
/// against a monotonic clock.
///
/// The OS may wake the thread late but never early: the remainder is
/// re-slept until the full duration has elapsed.
pub fn sleep_for_ns(ns: u64) {
    if ns == 0 {
        return;
    }
    let target = Duration::from_nanos(ns);
    let start = Instant::now();
    loop {
        let elapsed = start.elapsed();
        if elapsed >= target {
            return;
        }
        std::thread::sleep(target - elapsed);
    }
}
