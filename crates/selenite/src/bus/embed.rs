// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! Embedding lane operations (feature `embeddings`).
//!
//! Each slot carries a fixed [`EMBED_DIM`]-float vector next to the key
//! buffer. The vector is 3 KiB of plain storage - far too large for an
//! atomic - so both directions run under the slot's seqlock to keep torn
//! vectors out of consumers.

use super::{check_key, fnv1a64, Bus};
use crate::slot::EMBED_DIM;
use crate::{BusError, Result};

impl Bus {
    /// Store the 768-float vector for `key` under the seqlock.
    pub fn set_embedding(&self, key: &str, vec: &[f32; EMBED_DIM]) -> Result<()> {
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;

        let Some(_e) = slot.try_begin_write() else {
            return Err(BusError::WriterActive);
        };
        if slot.hash() != h || !slot.key_matches(kb) {
            slot.end_write();
            return Err(BusError::KeyNotFound);
        }

        slot.write_embedding(vec);

        slot.end_write();
        self.header().bump_epoch();
        self.pulse_watchers(slot);
        Ok(())
    }

    /// Copy the 768-float vector of `key` into `out`.
    pub fn get_embedding(&self, key: &str, out: &mut [f32; EMBED_DIM]) -> Result<()> {
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;

        let begin = slot.read_begin()?;
        if slot.hash() != h || !slot.key_matches(kb) {
            // The binding moved between the probe and the epoch observation.
            return Err(BusError::KeyNotFound);
        }
        slot.read_embedding(out);
        if slot.read_end(begin) {
            Ok(())
        } else {
            Err(BusError::TornRead)
        }
    }
}
