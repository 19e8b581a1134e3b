// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! Diagnostics and maintenance: stable snapshots, scrub configuration,
//! and the purge sweep.
//!
//! # Auto-Scrub Modes
//!
//! | mode   | on write                         | on unset                 |
//! |--------|----------------------------------|--------------------------|
//! | off    | bytes outside `[0, len)` untouched | key NUL'd, value kept  |
//! | hybrid | zero `round_up(len, 64)`, capped   | full cell + key zeroed |
//! | full   | zero the whole value cell          | full cell + key zeroed |
//!
//! Off is the fast path: stale tail bytes from longer previous values stay
//! in the arena and can be observed by raw-pointer peekers that read past
//! `val_len`. Hybrid stops vector-load spillover; full is for consumers
//! that bypass length discipline entirely.

use super::Bus;
use crate::header::{HeaderSnapshot, CORE_AUTO_SCRUB, CORE_HYBRID_SCRUB};
use crate::slot::SlotSnapshot;
use crate::{BusError, Result};
use std::ptr;

impl Bus {
    /// Stable copy of the header counters and flags.
    #[must_use]
    pub fn header_snapshot(&self) -> HeaderSnapshot {
        self.header().snapshot()
    }

    /// Stable copy of the slot bound to `key`.
    ///
    /// Loops on the seqlock until two odd-free epoch reads agree, so the
    /// returned fields (including the embedding lane, the high-risk area
    /// for tearing) are a consistent cut of the slot.
    pub fn slot_snapshot(&self, key: &str) -> Result<SlotSnapshot> {
        let kb = super::check_key(key)?;
        let h = super::fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;

        loop {
            let Ok(begin) = slot.read_begin() else {
                std::hint::spin_loop();
                continue;
            };

            let snap = SlotSnapshot {
                hash: slot.hash(),
                epoch: begin,
                val_off: slot.val_off(),
                val_len: slot.val_len(),
                type_flag: slot.type_flag(),
                user_flag: slot.user_snapshot(),
                watcher_mask: slot.watcher_mask(),
                ctime: slot.ctime(),
                atime: slot.atime(),
                bloom: slot.bloom(),
                key: slot.key_bytes(),
                #[cfg(feature = "embeddings")]
                embedding: {
                    let mut v = [0.0f32; crate::slot::EMBED_DIM];
                    slot.read_embedding(&mut v);
                    v
                },
            };

            if slot.read_end(begin) {
                return Ok(snap);
            }
            std::hint::spin_loop();
        }
    }

    /// Enable (full) or disable auto-scrub. Disabling also clears the
    /// hybrid bit, returning the bus to the fast no-wipe path.
    pub fn set_auto_scrub(&self, on: bool) {
        if on {
            self.header().core_set(CORE_AUTO_SCRUB);
        } else {
            self.header().core_clear(CORE_AUTO_SCRUB | CORE_HYBRID_SCRUB);
        }
    }

    /// Engage hybrid auto-scrub (sets both flag bits in one call).
    pub fn set_hybrid_auto_scrub(&self) {
        self.header().core_set(CORE_AUTO_SCRUB | CORE_HYBRID_SCRUB);
    }

    /// Is any auto-scrub mode engaged?
    #[must_use]
    pub fn auto_scrub(&self) -> bool {
        self.header().core_test(CORE_AUTO_SCRUB)
    }

    /// Is hybrid auto-scrub engaged?
    #[must_use]
    pub fn hybrid_auto_scrub(&self) -> bool {
        self.header().core_test(CORE_HYBRID_SCRUB)
    }

    /// Set user flags on `key`'s slot (uninterpreted by the bus).
    pub fn slot_user_set(&self, key: &str, mask: u8) -> Result<()> {
        self.with_slot(key, |slot| slot.user_set(mask))
    }

    /// Clear user flags on `key`'s slot.
    pub fn slot_user_clear(&self, key: &str, mask: u8) -> Result<()> {
        self.with_slot(key, |slot| slot.user_clear(mask))
    }

    /// Test user flags on `key`'s slot.
    pub fn slot_user_test(&self, key: &str, mask: u8) -> Result<bool> {
        self.with_slot(key, |slot| slot.user_test(mask))
    }

    /// Snapshot user flags on `key`'s slot.
    pub fn slot_user_snapshot(&self, key: &str) -> Result<u8> {
        self.with_slot(key, crate::slot::Slot::user_snapshot)
    }

    fn with_slot<T>(&self, key: &str, f: impl FnOnce(&crate::slot::Slot) -> T) -> Result<T> {
        let kb = super::check_key(key)?;
        let h = super::fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;
        Ok(f(slot))
    }

    /// Sweep the arena: zero the full cell of every empty slot and the
    /// tail past `val_len` of every occupied one.
    ///
    /// Each slot is taken through a normal seqlock cycle; slots whose
    /// seqlock is held are skipped, never waited on. Designed for backfill
    /// runs once I/O slamming has stopped - this cleans stale bytes, it
    /// does not reclaim promoted cells. Returns the number of slots swept.
    pub fn purge(&self) -> usize {
        let mut swept = 0;
        for idx in 0..self.nslots() {
            let slot = self.slot(idx);
            let Some(_e) = slot.try_begin_write() else {
                continue;
            };

            let off = slot.val_off();
            let cap = self.cell_capacity(idx, off);
            let len = slot.val_len() as usize;

            if slot.hash() == 0 {
                // SAFETY: off/cap come from this bus's geometry, so the span
                // is inside the arena; the seqlock is held.
                unsafe {
                    ptr::write_bytes(self.value_ptr(off), 0, cap);
                }
            } else if len < cap {
                // SAFETY: zeroes only [len, cap) of the slot's own cell.
                unsafe {
                    ptr::write_bytes(self.value_ptr(off).add(len), 0, cap - len);
                }
            }

            slot.end_write();
            swept += 1;
        }
        swept
    }
}
