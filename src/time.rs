//! Millisecond time sources.
//!
//! RTMP carries 32 bit millisecond timestamps on the wire while the
//! connection keeps 64 bit wall-clock values internally.  Ping requests
//! echo only the low 32 bits back, so round-trip measurement has to
//! truncate consistently on both sides; [`low32`] is that truncation.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock milliseconds for the connection and its
/// scheduled tasks.  Injecting the clock keeps the liveness logic
/// testable without real waiting.
pub trait Clock: Send + Sync {
    /// Current time as milliseconds since an arbitrary fixed epoch.
    fn now_millis(&self) -> u64;
}

/// A [`Clock`] backed by the system wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Truncates a millisecond value to the low 32 bits the peer echoes back.
pub fn low32(millis: u64) -> u32 {
    (millis & 0xffff_ffff) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low32_is_identity_below_threshold() {
        assert_eq!(low32(0), 0);
        assert_eq!(low32(120), 120);
        assert_eq!(low32(0xffff_ffff), 0xffff_ffff);
    }

    #[test]
    fn low32_truncates_high_bits() {
        assert_eq!(low32(0x1_0000_0000), 0);
        assert_eq!(low32(0x1_0000_002a), 42);
    }

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let first = clock.now_millis();
        let second = clock.now_millis();
        assert!(second >= first, "system clock went backwards");
    }
}
