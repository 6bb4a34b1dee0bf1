//! Monotonic host clock.
//!
//! Frames sent to consumers are stamped with the host time in nanoseconds. The
//! clock is monotonic and unaffected by wall-clock adjustments; its epoch is the
//! first time it is read in this process.

use once_cell::sync::Lazy;
use std::time::Instant;

static HOST_CLOCK_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Current host time in nanoseconds.
pub fn host_time_nanos() -> u64 {
    u64::try_from(HOST_CLOCK_EPOCH.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
