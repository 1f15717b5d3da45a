//! Process-wide monotonic tick source.
//!
//! All milestone timestamps are ticks from this clock, so intervals between
//! them can be converted to wall-clock durations with a single fixed factor.

use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Number of ticks per second produced by [`now`].
///
/// Ticks are nanoseconds elapsed since a process-local epoch, so the rate is
/// a fixed constant rather than a value probed per call; every duration
/// derivation in the crate goes through [`ticks_to_duration`] with this rate.
pub const TICKS_PER_SECOND: u64 = 1_000_000_000;

/// A reading of the process monotonic clock.
///
/// Tick value `0` is reserved as the "unset" sentinel for milestone fields
/// and is never produced by [`now`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Tick(pub u64);

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *CLOCK_EPOCH.get_or_init(Instant::now)
}

/// Returns the current monotonic tick.
///
/// Readings are non-decreasing within a process run and always nonzero.
pub fn now() -> Tick {
    let nanos = epoch()
        .elapsed()
        .as_nanos()
        .min(u64::MAX as u128 - 1) as u64;
    // Offset by one so the first reading cannot collide with the unset
    // sentinel; constant offsets cancel in every interval.
    Tick(nanos + 1)
}

/// Converts a tick interval into a wall-clock duration.
pub fn ticks_to_duration(delta_ticks: u64) -> Duration {
    Duration::from_nanos(delta_ticks)
}
