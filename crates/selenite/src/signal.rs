// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! Pub/sub over the signal arena.
//!
//! The arena is 64 per-group counters in the header, each on its own cache
//! line. A counter is a wakeup, not a message: it says "something in your
//! subscribed set changed", never which slot. Subscribers keep their own
//! last-seen count per group (and last-seen epoch per key they care about)
//! and scan on delta.
//!
//! # Fan-out paths
//!
//! ```text
//! set/integer-op/embedding-set on slot
//!     |-- watcher_mask bit g set  -> signal_groups[g] += 1
//!     '-- bloom bit b set, and
//!         bloom_watches[b] == g   -> signal_groups[g] += 1
//! ```
//!
//! `bloom_watches` admits one group per label bit (later registrations
//! overwrite); applications that want multi-group label fan-out register
//! the label on multiple bits or use direct per-slot watcher masks.

use crate::bus::{check_key, fnv1a64, Bus};
use crate::header::{BLOOM_UNMAPPED, MAX_GROUPS};
use crate::metrics::global_metrics;
use crate::slot::Slot;
use crate::{BusError, Result};
use dashmap::DashMap;
use std::time::{Duration, Instant};

impl Bus {
    /// Register interest: pulse `group_id` whenever `key`'s slot mutates.
    pub fn watch_register(&self, key: &str, group_id: u8) -> Result<()> {
        let group = check_group(group_id)?;
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;
        slot.watcher_or(1u64 << group);
        Ok(())
    }

    /// Drop `group_id` from `key`'s watcher mask.
    pub fn watch_unregister(&self, key: &str, group_id: u8) -> Result<()> {
        let group = check_group(group_id)?;
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;
        slot.watcher_and(!(1u64 << group));
        Ok(())
    }

    /// Map every set bit of `bloom_mask` to `group_id`.
    ///
    /// One group per label bit - a later registration overwrites.
    pub fn watch_label_register(&self, bloom_mask: u64, group_id: u8) -> Result<()> {
        let group = check_group(group_id)?;
        if bloom_mask == 0 {
            return Err(BusError::InvalidArgument("empty bloom mask"));
        }
        for bit in 0..64 {
            if bloom_mask & (1u64 << bit) != 0 {
                self.header().set_bloom_watch(bit, group as u8);
            }
        }
        Ok(())
    }

    /// Current pulse count of `group_id` (monotonically non-decreasing).
    pub fn get_signal_count(&self, group_id: u8) -> Result<u64> {
        let group = check_group(group_id)?;
        Ok(self.header().signal_group(group).count())
    }

    /// Pulse every group subscribed to `slot`, directly or via labels.
    /// Called after the publication point of a successful mutation.
    pub(crate) fn pulse_watchers(&self, slot: &Slot) {
        let hdr = self.header();

        let mut mask = slot.watcher_mask();
        while mask != 0 {
            let g = mask.trailing_zeros() as usize;
            hdr.signal_group(g).pulse();
            global_metrics().inc_pulses();
            mask &= mask - 1;
        }

        let mut bloom = slot.bloom();
        while bloom != 0 {
            let b = bloom.trailing_zeros() as usize;
            let g = hdr.bloom_watch(b);
            if g != BLOOM_UNMAPPED && (g as usize) < MAX_GROUPS {
                hdr.signal_group(g as usize).pulse();
                global_metrics().inc_pulses();
            }
            bloom &= bloom - 1;
        }
    }
}

fn check_group(group_id: u8) -> Result<usize> {
    if (group_id as usize) < MAX_GROUPS {
        Ok(group_id as usize)
    } else {
        Err(BusError::InvalidArgument("group id out of range"))
    }
}

/// Counter-comparison subscriber over one signal group.
///
/// Remembers the last observed pulse count plus the last-seen epoch of each
/// key it has been asked about, so `scan` can answer "which of these keys
/// moved since my last look". The epoch map is concurrent: one subscriber
/// can be shared by the threads of a worker pool.
pub struct GroupSubscriber<'a> {
    bus: &'a Bus,
    group_id: u8,
    last_count: u64,
    last_epochs: DashMap<String, u64>,
}

impl<'a> GroupSubscriber<'a> {
    /// Subscribe to `group_id`, snapshotting its current count.
    pub fn new(bus: &'a Bus, group_id: u8) -> Result<Self> {
        let last_count = bus.get_signal_count(group_id)?;
        Ok(Self {
            bus,
            group_id,
            last_count,
            last_epochs: DashMap::new(),
        })
    }

    /// The group this subscriber watches.
    #[must_use]
    pub fn group_id(&self) -> u8 {
        self.group_id
    }

    /// Has the group pulsed since the last observation? Updates the
    /// remembered count.
    pub fn changed(&mut self) -> Result<bool> {
        let cur = self.bus.get_signal_count(self.group_id)?;
        let moved = cur != self.last_count;
        self.last_count = cur;
        Ok(moved)
    }

    /// Sleep-poll until the group pulses or `timeout` expires. Returns
    /// whether a pulse was observed. Poll cadence matches the bus's 10 ms
    /// suspension grain.
    pub fn wait(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.changed()? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(10).min(deadline - now));
        }
    }

    /// Which of `keys` have a slot epoch ahead of this subscriber's last
    /// look? The first scan of a key primes the epoch map without reporting
    /// it; later scans report any movement, including disappearance (epoch
    /// dropping to 0 on unset).
    pub fn scan<I, S>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut moved = Vec::new();
        for key in keys {
            let key = key.as_ref();
            let epoch = self.bus.get_epoch(key);
            if let Some(prev) = self.last_epochs.insert(key.to_string(), epoch) {
                if prev != epoch {
                    moved.push(key.to_string());
                }
            }
        }
        moved
    }
}
