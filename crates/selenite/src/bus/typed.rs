// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! Typed operations: named type tags, in-place integer arithmetic,
//! timestamp backfill, and label application.
//!
//! The bus enforces semantics only for [`TYPE_BIGUINT`]: an 8-byte value
//! cell holding a host-endian unsigned 64-bit integer. Every other tag is
//! advisory and consumed by collaborators.

use super::{check_key, fnv1a64, Bus};
use crate::slot::TYPE_BIGUINT;
use crate::{BusError, Result};
use std::ptr;

/// Atomic transformations for BIGUINT slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerOp {
    And,
    Or,
    Xor,
    /// Bitwise complement; the mask operand is ignored.
    Not,
    /// Add the mask operand.
    Inc,
    /// Subtract the mask operand.
    Dec,
}

/// Which slot timestamp a backfill targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    Ctime,
    Atime,
}

impl Bus {
    /// Declare the type of `key`'s slot.
    ///
    /// When `mask` includes [`TYPE_BIGUINT`] and the current value is
    /// shorter than 8 bytes, the slot is promoted: a fresh 8-byte cell is
    /// reserved from the arena bump cursor, the existing bytes move in
    /// (ASCII decimal values are parsed, up to 15 digits; anything else is
    /// copied into the low bytes), and `val_off`/`val_len` are rewritten.
    /// The slot's natural slice is abandoned until a purge at quiescence.
    pub fn set_named_type(&self, key: &str, mask: u8) -> Result<()> {
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;

        let Some(_e) = slot.try_begin_write() else {
            return Err(BusError::WriterActive);
        };
        if slot.hash() != h || !slot.key_matches(kb) {
            // The binding moved between the probe and the claim.
            slot.end_write();
            return Err(BusError::KeyNotFound);
        }

        let cur_len = slot.val_len();
        if mask & TYPE_BIGUINT != 0 && cur_len < 8 {
            let Some(new_off) = self
                .header()
                .reserve_cell(8, self.arena_size() as u32)
            else {
                slot.end_write();
                return Err(BusError::ArenaExhausted);
            };

            let old = self.value_ptr(slot.val_off());
            let fresh = self.value_ptr(new_off);

            // SAFETY: new_off..new_off+8 was just reserved inside the arena;
            // old spans cur_len (< 8) valid bytes of the slot's current
            // cell. The seqlock is held, so no consistent reader sees the
            // intermediate state.
            unsafe {
                let mut bytes = [0u8; 8];
                ptr::copy_nonoverlapping(old, bytes.as_mut_ptr(), cur_len as usize);

                if cur_len > 0 && bytes[0].is_ascii_digit() {
                    let v = parse_ascii_decimal(&bytes[..cur_len as usize]);
                    ptr::copy_nonoverlapping(v.to_ne_bytes().as_ptr(), fresh, 8);
                } else {
                    ptr::write_bytes(fresh, 0, 8);
                    ptr::copy_nonoverlapping(bytes.as_ptr(), fresh, cur_len as usize);
                }
            }

            slot.set_val_off(new_off);
            slot.set_val_len(8);
        }

        slot.set_type_flag(mask);
        slot.end_write();
        self.header().bump_epoch();
        Ok(())
    }

    /// Type tags currently declared on `key`'s slot.
    pub fn named_type(&self, key: &str) -> Result<u8> {
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;
        Ok(slot.type_flag())
    }

    /// Apply `op` to the BIGUINT stored under `key`.
    ///
    /// The 8 bytes at the slot's value offset are interpreted as a
    /// host-endian u64, transformed against `mask`, and republished under
    /// the seqlock. Wrapping arithmetic, like the hardware would do.
    pub fn integer_op(&self, key: &str, op: IntegerOp, mask: u64) -> Result<()> {
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;

        let tf = slot.type_flag();
        if tf & TYPE_BIGUINT == 0 {
            return Err(BusError::WrongType { have: tf });
        }

        let Some(_e) = slot.try_begin_write() else {
            crate::metrics::global_metrics().inc_retries();
            return Err(BusError::WriterActive);
        };
        if slot.hash() != h || !slot.key_matches(kb) {
            slot.end_write();
            return Err(BusError::KeyNotFound);
        }

        let cell = self.value_ptr(slot.val_off());
        // SAFETY: a BIGUINT slot's cell holds exactly 8 valid arena bytes
        // (enforced by promotion and by set's length checks); the seqlock
        // is held for the read-modify-write. Unaligned offsets are fine:
        // the value moves through a local buffer, never a &u64.
        let val = unsafe {
            let mut b = [0u8; 8];
            ptr::copy_nonoverlapping(cell, b.as_mut_ptr(), 8);
            u64::from_ne_bytes(b)
        };

        let out = match op {
            IntegerOp::And => val & mask,
            IntegerOp::Or => val | mask,
            IntegerOp::Xor => val ^ mask,
            IntegerOp::Not => !val,
            IntegerOp::Inc => val.wrapping_add(mask),
            IntegerOp::Dec => val.wrapping_sub(mask),
        };

        // SAFETY: same cell, same 8 bytes, seqlock still held.
        unsafe {
            ptr::copy_nonoverlapping(out.to_ne_bytes().as_ptr(), cell, 8);
        }

        slot.end_write();
        self.header().bump_epoch();
        self.pulse_watchers(slot);
        Ok(())
    }

    /// The BIGUINT stored under `key`, read under the seqlock.
    pub fn integer_value(&self, key: &str) -> Result<u64> {
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;

        let tf = slot.type_flag();
        if tf & TYPE_BIGUINT == 0 {
            return Err(BusError::WrongType { have: tf });
        }

        let begin = slot.read_begin()?;
        if slot.hash() != h || !slot.key_matches(kb) {
            // The binding moved between the probe and the epoch observation.
            return Err(BusError::KeyNotFound);
        }
        let cell = self.value_ptr(slot.val_off());
        // SAFETY: 8 valid arena bytes per the BIGUINT invariant; torn
        // copies are discarded by read_end below.
        let val = unsafe {
            let mut b = [0u8; 8];
            ptr::copy_nonoverlapping(cell, b.as_mut_ptr(), 8);
            u64::from_ne_bytes(b)
        };
        if slot.read_end(begin) {
            Ok(val)
        } else {
            Err(BusError::TornRead)
        }
    }

    /// Backfill a slot timestamp with `timestamp - offset`.
    ///
    /// The offset compensates for clock-read latency incurred after the
    /// write being annotated (see [`crate::clock::now_cycles`]). Timestamp
    /// stores are individually atomic; no seqlock cycle and no global
    /// epoch bump.
    pub fn set_slot_time(
        &self,
        key: &str,
        field: TimeField,
        timestamp: u64,
        offset: u64,
    ) -> Result<()> {
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;

        slot.read_begin()?;
        if slot.hash() != h || !slot.key_matches(kb) {
            return Err(BusError::KeyNotFound);
        }

        let t = timestamp.wrapping_sub(offset);
        match field {
            TimeField::Ctime => slot.set_ctime(t),
            TimeField::Atime => slot.set_atime(t),
        }
        Ok(())
    }

    /// OR `mask` into the slot's label bloom. Labels are additive and need
    /// no seqlock; the global epoch is bumped so change scanners notice.
    pub fn set_label(&self, key: &str, mask: u64) -> Result<()> {
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;

        slot.bloom_or(mask);
        self.header().bump_epoch();
        Ok(())
    }

    /// Current label bloom of `key`'s slot.
    pub fn label(&self, key: &str) -> Result<u64> {
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;
        Ok(slot.bloom())
    }
}

/// Parse an unsigned decimal from the front of `bytes`, at most 15 digits,
/// stopping at the first non-digit.
fn parse_ascii_decimal(bytes: &[u8]) -> u64 {
    let mut v: u64 = 0;
    for &b in bytes.iter().take(15) {
        if !b.is_ascii_digit() {
            break;
        }
        v = v.wrapping_mul(10).wrapping_add(u64::from(b - b'0'));
    }
    v
}
