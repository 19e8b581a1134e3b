// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! Bus lifecycle and the operations layer.
//!
//! # Region Layout
//!
//! ```text
//! +--------------------------------------------------------------+
//! | BusHeader                                                    |
//! +--------------------------------------------------------------+
//! | Slot[0..slots-1]                                             |
//! +--------------------------------------------------------------+
//! | value arena: slots * max_val_sz bytes                        |
//! +--------------------------------------------------------------+
//! ```
//!
//! All multi-byte integers are host byte order; the bus is not meant for
//! cross-architecture sharing.
//!
//! # Probing
//!
//! Key to slot: FNV-1a-64 of the key, initial index `hash % slots`, linear
//! probe forward with wraparound. Lookup matches on hash then key bytes.
//! Insertion treats a slot as usable when it is empty or already holds the
//! key; a candidate whose seqlock is writer-held is skipped, never waited
//! on. First match in probe order wins.
//!
//! # Write Publication Order
//!
//! A set stores: value bytes, then length (Release), then the key buffer,
//! then - behind a Release fence - the hash, then the final epoch increment.
//! A prober that matches the new hash therefore races at worst with the
//! final epoch store, which its begin/end epoch check detects.

mod admin;
#[cfg(feature = "embeddings")]
mod embed;
mod typed;

pub use typed::{IntegerOp, TimeField};

use crate::header::BusHeader;
use crate::metrics::global_metrics;
use crate::segment::{Backing, MapRegion};
use crate::slot::{Slot, KEY_MAX};
use crate::{BusError, Result};
use std::ptr;
use std::time::{Duration, Instant};

/// Poll sleeps in increments of this many milliseconds.
const POLL_TICK_MS: u64 = 10;

/// An open, mapped bus.
///
/// `Bus` is a handle object: all operations take `&self` and the handle is
/// `Send + Sync`, so one mapping can serve every thread in the process.
/// Dropping (or [`Bus::close`]) unmaps the region but leaves the backing
/// object alone; peers keep working and [`Backing::unlink`] removes the
/// object for good.
pub struct Bus {
    region: MapRegion,
    nslots: usize,
    max_val: usize,
    arena_sz: usize,
}

impl Bus {
    /// Create a fresh bus. Fails if the backing object already exists or
    /// `slots` / `max_val_sz` is zero.
    pub fn create(backing: &Backing, slots: u32, max_val_sz: u32) -> Result<Self> {
        if slots == 0 || max_val_sz == 0 {
            return Err(BusError::InvalidArgument(
                "slots and max_val_sz must be non-zero",
            ));
        }
        let total = region_size(slots as usize, max_val_sz as usize);
        let total_u32 = u32::try_from(total)
            .map_err(|_| BusError::InvalidArgument("region larger than 4 GiB"))?;

        let region = MapRegion::create(backing, total)?;

        // SAFETY: the region was created exclusively and is at least
        // sizeof(BusHeader) + slots * sizeof(Slot) bytes; mmap returns
        // page-aligned memory, satisfying the 64-byte alignment of both
        // types. No peer can map the object mid-initialization because no
        // operation is attempted before this constructor returns.
        unsafe {
            let hdr = region.as_ptr().cast::<BusHeader>();
            hdr.write(BusHeader::new(slots, max_val_sz, total_u32));

            let first = region.as_ptr().add(header_size()).cast::<Slot>();
            for i in 0..slots as usize {
                first.add(i).write(Slot::new((i as u32) * max_val_sz));
            }
        }

        log::debug!("[bus] created {backing}: {slots} slots x {max_val_sz} B");
        Ok(Self {
            region,
            nslots: slots as usize,
            max_val: max_val_sz as usize,
            arena_sz: slots as usize * max_val_sz as usize,
        })
    }

    /// Map an existing bus. Fails on magic/version mismatch or when the
    /// mapped size disagrees with the geometry recorded in the header
    /// (which also catches an `embeddings` feature mismatch between the
    /// creating and the opening build).
    pub fn open(backing: &Backing) -> Result<Self> {
        let region = MapRegion::open(backing)?;

        if region.size() < header_size() {
            return Err(BusError::GeometryMismatch {
                expected: header_size(),
                actual: region.size(),
            });
        }

        // SAFETY: the mapping is at least sizeof(BusHeader) bytes and
        // page-aligned; the header is only read through atomics and
        // creation-time-immutable fields.
        let hdr = unsafe { &*region.as_ptr().cast::<BusHeader>() };
        hdr.validate()?;

        let slots = hdr.slots() as usize;
        let max_val = hdr.max_val_sz() as usize;
        let expected = region_size(slots, max_val);
        if expected != region.size() || hdr.total_size() as usize != region.size() {
            return Err(BusError::GeometryMismatch {
                expected,
                actual: region.size(),
            });
        }

        log::debug!("[bus] opened {backing}: {slots} slots x {max_val} B");
        Ok(Self {
            region,
            nslots: slots,
            max_val,
            arena_sz: slots * max_val,
        })
    }

    /// Create the bus, or open it if it already exists.
    pub fn create_or_open(backing: &Backing, slots: u32, max_val_sz: u32) -> Result<Self> {
        match Self::create(backing, slots, max_val_sz) {
            Ok(bus) => Ok(bus),
            Err(_) => Self::open(backing),
        }
    }

    /// Open the bus, or create it if it does not exist.
    pub fn open_or_create(backing: &Backing, slots: u32, max_val_sz: u32) -> Result<Self> {
        match Self::open(backing) {
            Ok(bus) => Ok(bus),
            Err(_) => Self::create(backing, slots, max_val_sz),
        }
    }

    /// Unmap the region. The backing object survives; see [`Backing::unlink`].
    pub fn close(self) {
        log::debug!("[bus] closing {}", self.region.backing());
        drop(self);
    }

    /// Number of slots, fixed at creation.
    #[inline]
    #[must_use]
    pub fn slots(&self) -> u32 {
        self.nslots as u32
    }

    /// Per-slot value capacity in bytes, fixed at creation.
    #[inline]
    #[must_use]
    pub fn max_val_sz(&self) -> u32 {
        self.max_val as u32
    }

    /// The backing object this bus maps.
    #[inline]
    #[must_use]
    pub fn backing(&self) -> &Backing {
        self.region.backing()
    }

    /// The shared header (flags, signal arena, diagnostics).
    #[inline]
    #[must_use]
    pub fn header(&self) -> &BusHeader {
        // SAFETY: validated at create/open; the mapping outlives &self.
        unsafe { &*self.region.as_ptr().cast::<BusHeader>() }
    }

    // --- internal geometry ------------------------------------------------

    #[inline]
    pub(crate) fn slot(&self, idx: usize) -> &Slot {
        debug_assert!(idx < self.nslots);
        // SAFETY: idx < nslots and the mapping holds exactly nslots slot
        // records starting at header_size(); Slot is 64-byte aligned and
        // so is its base offset.
        unsafe {
            &*self
                .region
                .as_ptr()
                .add(header_size())
                .cast::<Slot>()
                .add(idx)
        }
    }

    #[inline]
    pub(crate) fn value_ptr(&self, off: u32) -> *mut u8 {
        debug_assert!((off as usize) <= self.arena_sz);
        // SAFETY: the arena spans [values_base, values_base + arena_sz);
        // callers bound off (+ their access length) against arena_sz.
        unsafe {
            self.region
                .as_ptr()
                .add(header_size() + self.nslots * slot_size())
                .add(off as usize)
        }
    }

    #[inline]
    pub(crate) fn nslots(&self) -> usize {
        self.nslots
    }

    #[inline]
    pub(crate) fn arena_size(&self) -> usize {
        self.arena_sz
    }

    /// Offset of slot `idx`'s natural slice of the arena.
    #[inline]
    pub(crate) fn natural_off(&self, idx: usize) -> u32 {
        (idx * self.max_val) as u32
    }

    /// Usable bytes of the value cell currently assigned to slot `idx`.
    /// A promoted slot owns exactly its 8-byte cell, not `max_val_sz`.
    #[inline]
    pub(crate) fn cell_capacity(&self, idx: usize, off: u32) -> usize {
        if off == self.natural_off(idx) {
            self.max_val
        } else {
            8
        }
    }

    /// Locate the slot currently bound to `key`.
    pub(crate) fn find_slot(&self, h: u64, key: &[u8]) -> Option<(usize, &Slot)> {
        let start = (h % self.nslots as u64) as usize;
        for i in 0..self.nslots {
            let idx = (start + i) % self.nslots;
            let slot = self.slot(idx);
            if slot.hash() == h && slot.key_matches(key) {
                return Some((idx, slot));
            }
        }
        None
    }

    // --- operations --------------------------------------------------------

    /// Set or update `key` to `val`.
    ///
    /// Linear-probes from the key's natural position; a candidate slot that
    /// is writer-held is skipped rather than waited on, so an unrelated
    /// key's in-flight write never stalls this one. Retryable conditions
    /// are absorbed by the probe; the terminal failures are invalid
    /// arguments, a value larger than the target cell, and a full table.
    pub fn set(&self, key: &str, val: &[u8]) -> Result<()> {
        let kb = check_key(key)?;
        if val.is_empty() {
            return Err(BusError::InvalidArgument("zero-length value"));
        }
        if val.len() > self.max_val {
            return Err(BusError::ValueTooLarge {
                size: val.len(),
                max: self.max_val,
            });
        }

        let h = fnv1a64(kb);
        let start = (h % self.nslots as u64) as usize;

        for i in 0..self.nslots {
            let idx = (start + i) % self.nslots;
            let slot = self.slot(idx);

            let slot_hash = slot.hash();
            if !(slot_hash == 0 || (slot_hash == h && slot.key_matches(kb))) {
                continue;
            }

            // Claim the seqlock; a held or contended slot is skipped, the
            // insert may land later in the probe sequence.
            let Some(_e) = slot.try_begin_write() else {
                continue;
            };

            // Revalidate under the lock: another writer may have taken the
            // empty slot for a different key between our load and the CAS.
            let cur = slot.hash();
            if !(cur == 0 || (cur == h && slot.key_matches(kb))) {
                slot.end_write();
                continue;
            }

            let off = slot.val_off();
            let cap = self.cell_capacity(idx, off);
            if off as usize + val.len() > self.arena_sz {
                slot.end_write();
                return Err(BusError::ArenaExhausted);
            }
            if val.len() > cap {
                // Promoted 8-byte cell; a larger value would spill into a
                // neighbouring promotion cell.
                slot.end_write();
                return Err(BusError::ValueTooLarge {
                    size: val.len(),
                    max: cap,
                });
            }

            let dst = self.value_ptr(off);
            let scrub_span = self.scrub_span(val.len(), cap);
            // SAFETY: dst points at `cap` valid arena bytes for this cell
            // (bounds re-checked above) and the seqlock is held, so no
            // consistent reader consumes these bytes until end_write().
            unsafe {
                if scrub_span > 0 {
                    ptr::write_bytes(dst, 0, scrub_span);
                }
                ptr::copy_nonoverlapping(val.as_ptr(), dst, val.len());
            }

            slot.set_val_len(val.len() as u32);
            slot.write_key(kb);

            // Publish the hash only after value and key are in place, then
            // complete the seqlock cycle.
            std::sync::atomic::fence(std::sync::atomic::Ordering::Release);
            slot.publish_hash(h);
            slot.end_write();

            self.header().bump_epoch();
            self.pulse_watchers(slot);
            global_metrics().inc_sets();
            return Ok(());
        }

        Err(BusError::TableFull)
    }

    /// Copy the value of `key` into `buf`, returning its length.
    ///
    /// Fails with [`BusError::BufferTooSmall`] (length still reported in
    /// the error) when `buf` cannot hold the value, and with a retryable
    /// kind when a writer holds the slot or the snapshot tears.
    pub fn get(&self, key: &str, buf: &mut [u8]) -> Result<usize> {
        self.get_impl(key, Some(buf))
    }

    /// Length of the value stored under `key` (the NULL-buffer query).
    pub fn get_len(&self, key: &str) -> Result<usize> {
        self.get_impl(key, None)
    }

    fn get_impl(&self, key: &str, buf: Option<&mut [u8]>) -> Result<usize> {
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;

        let begin = slot.read_begin().inspect_err(|_| {
            global_metrics().inc_retries();
        })?;

        // The probe matched before the epoch observation; make sure the
        // slot still belongs to this key inside the protected window.
        if slot.hash() != h || !slot.key_matches(kb) {
            global_metrics().inc_retries();
            return Err(BusError::TornRead);
        }

        let len = slot.val_len() as usize;

        if let Some(buf) = buf {
            if buf.len() < len {
                return Err(BusError::BufferTooSmall {
                    need: len,
                    have: buf.len(),
                });
            }
            let src = self.value_ptr(slot.val_off());
            // SAFETY: src spans len valid arena bytes (len <= cell capacity
            // <= arena bounds, enforced by every writer); buf holds at
            // least len bytes per the check above. The copy may race a
            // writer; read_end below detects that and discards the bytes.
            unsafe {
                ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), len);
            }
        }

        if slot.read_end(begin) {
            global_metrics().inc_gets();
            Ok(len)
        } else {
            global_metrics().inc_retries();
            Err(BusError::TornRead)
        }
    }

    /// Delete `key`, returning the length of the value it held.
    ///
    /// Publishes `hash = 0` first, then resets the slot to its creation
    /// state (natural value cell, VOID type, cleared metadata). The epoch
    /// advances by a full cycle with no intermediate odd state; the single
    /// hash store is the publication point for deletion. No signal pulse.
    pub fn unset(&self, key: &str) -> Result<usize> {
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (idx, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;

        let e = slot.epoch();
        if e & 1 != 0 {
            global_metrics().inc_retries();
            return Err(BusError::WriterActive);
        }

        let len = slot.val_len() as usize;
        let off = slot.val_off();
        let cap = self.cell_capacity(idx, off);

        slot.clear_hash();

        if self.scrub_enabled() {
            // SAFETY: off/cap were produced by this bus's own geometry, so
            // the span lies inside the arena. hash is already 0: no prober
            // can match this slot, and raw-pointer peekers are on their own
            // epoch discipline.
            unsafe {
                ptr::write_bytes(self.value_ptr(off), 0, cap);
            }
            slot.clear_key(true);
        } else {
            slot.clear_key(false);
        }

        slot.set_val_off(self.natural_off(idx));
        slot.set_type_flag(crate::slot::TYPE_VOID);
        slot.set_val_len(0);
        slot.set_ctime(0);
        slot.set_atime(0);
        slot.clear_user();
        slot.clear_watchers();
        slot.clear_bloom();

        slot.advance_even();
        self.header().bump_epoch();
        global_metrics().inc_unsets();
        Ok(len)
    }

    /// Keys currently bound (non-zero hash and length), up to `max_keys`.
    /// No ordering is guaranteed.
    #[must_use]
    pub fn list(&self, max_keys: usize) -> Vec<String> {
        let mut keys = Vec::new();
        for idx in 0..self.nslots {
            if keys.len() >= max_keys {
                break;
            }
            let slot = self.slot(idx);
            if slot.hash() != 0 && slot.val_len() > 0 {
                let bytes = slot.key_bytes();
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(KEY_MAX);
                keys.push(String::from_utf8_lossy(&bytes[..end]).into_owned());
            }
        }
        keys
    }

    /// Wait for the slot of `key` to change, up to `timeout_ms`.
    ///
    /// Sleeps in [`POLL_TICK_MS`] increments until the epoch moves to a
    /// different even value. An odd epoch at any observation is surfaced as
    /// retryable. This is the only operation on the bus that sleeps.
    pub fn poll(&self, key: &str, timeout_ms: u64) -> Result<()> {
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;

        let start = slot.epoch();
        if start & 1 != 0 {
            global_metrics().inc_retries();
            return Err(BusError::WriterActive);
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        global_metrics().inc_polls();
        loop {
            let cur = slot.epoch();
            if cur & 1 != 0 {
                global_metrics().inc_retries();
                return Err(BusError::WriterActive);
            }
            if cur != start {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(BusError::Timeout);
            }
            let tick = Duration::from_millis(POLL_TICK_MS).min(deadline - now);
            std::thread::sleep(tick);
        }
    }

    /// Direct pointer into the arena for `key`, with the observed epoch and
    /// length. No seqlock protection - see [`RawValue`] for the discipline.
    pub fn raw_value(&self, key: &str) -> Result<RawValue> {
        let kb = check_key(key)?;
        let h = fnv1a64(kb);
        let (_, slot) = self.find_slot(h, kb).ok_or(BusError::KeyNotFound)?;

        Ok(RawValue {
            ptr: self.value_ptr(slot.val_off()).cast_const(),
            len: slot.val_len() as usize,
            epoch: slot.epoch(),
        })
    }

    /// Current epoch of the slot bound to `key`, or 0 when absent (a bound
    /// slot's epoch is necessarily non-zero after its first write).
    #[must_use]
    pub fn get_epoch(&self, key: &str) -> u64 {
        let Ok(kb) = check_key(key) else { return 0 };
        let h = fnv1a64(kb);
        match self.find_slot(h, kb) {
            Some((_, slot)) => slot.epoch(),
            None => 0,
        }
    }

    // --- scrub helpers (configuration lives in bus/admin.rs) --------------

    #[inline]
    pub(crate) fn scrub_enabled(&self) -> bool {
        self.header().core_test(crate::header::CORE_AUTO_SCRUB)
    }

    /// Bytes to zero ahead of a write of `len` bytes into a cell of `cap`.
    fn scrub_span(&self, len: usize, cap: usize) -> usize {
        let flags = self.header().core_snapshot();
        if flags & crate::header::CORE_AUTO_SCRUB == 0 {
            0
        } else if flags & crate::header::CORE_HYBRID_SCRUB != 0 {
            // Fast mop: wipe to the next 64-byte boundary so vector loads
            // past len cannot see stale bytes.
            len.div_ceil(64).saturating_mul(64).min(cap)
        } else {
            cap
        }
    }
}

/// Direct view of a value in the arena, bypassing the seqlock.
///
/// The bytes behind `ptr` can change or be zeroed at any time. Consumers
/// must re-read the slot's epoch (via `Bus::get_epoch`) after consuming and
/// discard the read if it changed or is odd. This is the primitive that
/// lets an inference sidecar feed tokenizers without an intermediate copy.
#[derive(Debug, Clone, Copy)]
pub struct RawValue {
    ptr: *const u8,
    /// Value length at the time of lookup
    pub len: usize,
    /// Slot epoch at the time of lookup (odd means a writer was active)
    pub epoch: u64,
}

impl RawValue {
    /// The raw arena pointer.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// View the value as a byte slice.
    ///
    /// # Safety
    ///
    /// The bus must still be mapped, and the caller must verify the slot
    /// epoch before and after consuming the slice, discarding the read on
    /// any change. The bytes may be concurrently rewritten at any moment.
    #[inline]
    #[must_use]
    pub unsafe fn bytes(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr, self.len)
    }
}

/// Size of the header block, including alignment padding.
#[inline]
pub(crate) fn header_size() -> usize {
    std::mem::size_of::<BusHeader>()
}

/// Size of one slot record (embeddings feature changes this).
#[inline]
pub(crate) fn slot_size() -> usize {
    std::mem::size_of::<Slot>()
}

/// Total region size for the given geometry.
#[inline]
pub(crate) fn region_size(slots: usize, max_val_sz: usize) -> usize {
    header_size() + slots * slot_size() + slots * max_val_sz
}

/// 64-bit FNV-1a over the key bytes (the NUL terminator is not hashed).
#[inline]
pub(crate) fn fnv1a64(key: &[u8]) -> u64 {
    let mut h: u64 = 14_695_981_039_346_656_037;
    for &b in key {
        h ^= u64::from(b);
        h = h.wrapping_mul(1_099_511_628_211);
    }
    h
}

/// Keys must fit the slot key buffer with a terminator and carry no NUL.
pub(crate) fn check_key(key: &str) -> Result<&[u8]> {
    let kb = key.as_bytes();
    if kb.len() >= KEY_MAX {
        return Err(BusError::InvalidArgument("key longer than 63 bytes"));
    }
    if kb.contains(&0) {
        return Err(BusError::InvalidArgument("key contains NUL byte"));
    }
    Ok(kb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_backing() -> Backing {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        Backing::shm(&format!("/selenite_bus_test_{ts}")).unwrap()
    }

    struct Cleanup(Backing);
    impl Drop for Cleanup {
        fn drop(&mut self) {
            self.0.unlink().ok();
        }
    }

    #[test]
    fn test_fnv1a_vectors() {
        // Published FNV-1a-64 test vectors
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a64(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn test_check_key_limits() {
        assert!(check_key("ok").is_ok());
        assert!(check_key(&"k".repeat(63)).is_ok());
        assert!(check_key(&"k".repeat(64)).is_err());
        assert!(check_key("nul\0byte").is_err());
    }

    #[test]
    fn test_create_rejects_zero_geometry() {
        let backing = unique_backing();
        assert!(matches!(
            Bus::create(&backing, 0, 4096),
            Err(BusError::InvalidArgument(_))
        ));
        assert!(matches!(
            Bus::create(&backing, 16, 0),
            Err(BusError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_create_open_roundtrip() {
        let backing = unique_backing();
        let _cleanup = Cleanup(backing.clone());

        let bus = Bus::create(&backing, 16, 128).expect("create");
        assert_eq!(bus.slots(), 16);
        assert_eq!(bus.max_val_sz(), 128);

        let peer = Bus::open(&backing).expect("open");
        assert_eq!(peer.slots(), 16);
        assert_eq!(peer.max_val_sz(), 128);

        bus.set("shared", b"by the creator").unwrap();
        let mut buf = [0u8; 32];
        let n = peer.get("shared", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"by the creator");
    }

    #[test]
    fn test_open_rejects_foreign_region() {
        let backing = unique_backing();
        let _cleanup = Cleanup(backing.clone());

        // A region with random junk where the header should be.
        let seg = MapRegion::create(&backing, 8192).unwrap();
        // SAFETY: fresh exclusive mapping of 8192 bytes.
        unsafe {
            ptr::write_bytes(seg.as_ptr(), 0xAB, 8192);
        }
        drop(seg);

        assert!(matches!(
            Bus::open(&backing),
            Err(BusError::BadMagic(_) | BusError::GeometryMismatch { .. })
        ));
    }

    #[test]
    fn test_set_get_unset_cycle() {
        let backing = unique_backing();
        let _cleanup = Cleanup(backing.clone());
        let bus = Bus::create(&backing, 32, 256).unwrap();

        bus.set("k1", b"hello").unwrap();
        assert_eq!(bus.get_len("k1").unwrap(), 5);

        let mut buf = [0u8; 8];
        assert_eq!(bus.get("k1", &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");

        assert_eq!(bus.unset("k1").unwrap(), 5);
        assert!(matches!(bus.get_len("k1"), Err(BusError::KeyNotFound)));
        assert!(matches!(bus.unset("k1"), Err(BusError::KeyNotFound)));
    }

    #[test]
    fn test_buffer_too_small_reports_length() {
        let backing = unique_backing();
        let _cleanup = Cleanup(backing.clone());
        let bus = Bus::create(&backing, 8, 64).unwrap();

        bus.set("k", b"twelve bytes").unwrap();
        let mut buf = [0u8; 11];
        match bus.get("k", &mut buf) {
            Err(BusError::BufferTooSmall { need, have }) => {
                assert_eq!(need, 12);
                assert_eq!(have, 11);
            }
            other => panic!("expected BufferTooSmall, got {other:?}"),
        }
    }

    #[test]
    fn test_value_size_boundaries() {
        let backing = unique_backing();
        let _cleanup = Cleanup(backing.clone());
        let bus = Bus::create(&backing, 8, 64).unwrap();

        assert!(matches!(
            bus.set("k", b""),
            Err(BusError::InvalidArgument(_))
        ));
        assert!(bus.set("k", &[0xFF; 64]).is_ok());
        assert!(matches!(
            bus.set("k", &[0xFF; 65]),
            Err(BusError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn test_table_full() {
        let backing = unique_backing();
        let _cleanup = Cleanup(backing.clone());
        let bus = Bus::create(&backing, 4, 32).unwrap();

        for i in 0..4 {
            bus.set(&format!("key{i}"), b"x").unwrap();
        }
        assert!(matches!(
            bus.set("one-too-many", b"x"),
            Err(BusError::TableFull)
        ));

        // Updates of resident keys still succeed on a full table.
        assert!(bus.set("key2", b"updated").is_ok());
    }

    #[test]
    fn test_list_reports_live_keys() {
        let backing = unique_backing();
        let _cleanup = Cleanup(backing.clone());
        let bus = Bus::create(&backing, 16, 64).unwrap();

        bus.set("a", b"1").unwrap();
        bus.set("b", b"2").unwrap();
        bus.set("c", b"3").unwrap();
        bus.unset("b").unwrap();

        let mut keys = bus.list(16);
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "c".to_string()]);

        assert_eq!(bus.list(1).len(), 1);
    }

    #[test]
    fn test_epoch_monotone_per_key() {
        let backing = unique_backing();
        let _cleanup = Cleanup(backing.clone());
        let bus = Bus::create(&backing, 8, 64).unwrap();

        assert_eq!(bus.get_epoch("k"), 0);
        bus.set("k", b"v1").unwrap();
        let e1 = bus.get_epoch("k");
        assert!(e1 > 0);
        assert_eq!(e1 & 1, 0);

        bus.set("k", b"v2").unwrap();
        let e2 = bus.get_epoch("k");
        assert!(e2 > e1);
    }

    #[test]
    fn test_poll_timeout_and_change() {
        let backing = unique_backing();
        let _cleanup = Cleanup(backing.clone());
        let bus = Bus::create(&backing, 8, 64).unwrap();

        bus.set("k", b"v").unwrap();
        assert!(matches!(bus.poll("k", 30), Err(BusError::Timeout)));
        assert!(matches!(bus.poll("missing", 30), Err(BusError::KeyNotFound)));
    }

    #[test]
    fn test_raw_value_matches_get() {
        let backing = unique_backing();
        let _cleanup = Cleanup(backing.clone());
        let bus = Bus::create(&backing, 8, 64).unwrap();

        bus.set("k", b"raw bytes").unwrap();
        let raw = bus.raw_value("k").unwrap();
        assert_eq!(raw.len, 9);
        assert_eq!(raw.epoch & 1, 0);
        assert_eq!(raw.epoch, bus.get_epoch("k"));
        // SAFETY: bus stays mapped and nothing writes "k" concurrently.
        unsafe {
            assert_eq!(raw.bytes(), b"raw bytes");
        }
    }

    #[test]
    fn test_probe_collisions_resolve() {
        let backing = unique_backing();
        let _cleanup = Cleanup(backing.clone());
        // Tiny table forces natural-index collisions.
        let bus = Bus::create(&backing, 3, 32).unwrap();

        bus.set("alpha", b"1").unwrap();
        bus.set("beta", b"2").unwrap();
        bus.set("gamma", b"3").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(bus.get("alpha", &mut buf).unwrap(), 1);
        assert_eq!(&buf[..1], b"1");
        assert_eq!(bus.get("beta", &mut buf).unwrap(), 1);
        assert_eq!(&buf[..1], b"2");
        assert_eq!(bus.get("gamma", &mut buf).unwrap(), 1);
        assert_eq!(&buf[..1], b"3");
    }
}
