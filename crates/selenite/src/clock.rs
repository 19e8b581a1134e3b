// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! Low-cost monotone tick source for timestamp backfill.
//!
//! The bus never reads a clock; clients supply timestamps and may pass an
//! offset so a timestamp taken after a write can be backdated by the clock
//! read latency:
//!
//! ```rust,no_run
//! # use selenite::{bus::TimeField, Bus};
//! # fn demo(bus: &Bus) -> selenite::Result<()> {
//! let waypoint = selenite::clock::now_cycles();
//! bus.set("foo", b"value")?;
//! let stamp = std::time::SystemTime::now()
//!     .duration_since(std::time::UNIX_EPOCH)
//!     .unwrap()
//!     .as_secs();
//! let lag = selenite::clock::now_cycles() - waypoint;
//! bus.set_slot_time("foo", TimeField::Ctime, stamp, lag)?;
//! # Ok(())
//! # }
//! ```
//!
//! The tick is a hint, not a wall clock: units are cycles on x86_64 and
//! elapsed nanoseconds elsewhere, and values are only comparable within one
//! process lifetime.

/// A cheap, monotonically increasing tick.
#[must_use]
pub fn now_cycles() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: RDTSC has no preconditions; it reads the cycle counter.
        unsafe { core::arch::x86_64::_rdtsc() }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        use std::sync::OnceLock;
        use std::time::Instant;
        static START: OnceLock<Instant> = OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_move_forward() {
        let a = now_cycles();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = now_cycles();
        assert!(b > a);
    }
}
