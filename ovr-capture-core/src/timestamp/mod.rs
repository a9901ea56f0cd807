//! Capture timestamps are nanoseconds on a monotonic clock, measured from a process-wide
//! epoch taken on first use. Values from one thread never go backwards.

#[cfg(not(target_os="none"))]
pub mod std;
#[cfg(not(target_os="none"))]
pub use std::StdTimestamp as Timestamp;

#[cfg(target_os="none")]
compile_error!("Unsupported platform! Capture timestamps require std");

/// Source of monotonic capture timestamps.
pub trait TimestampProvider {
    /// Returns current timestamp in nanoseconds.
    fn now() -> u64;

    /// Timestamp ticks per nanosecond.
    const COUNTS_PER_NS: f64 = 1.0;
}
