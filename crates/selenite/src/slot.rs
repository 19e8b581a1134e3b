// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! Slot records and the per-slot seqlock protocol.
//!
//! All structures are aligned to 64 bytes to prevent false sharing between
//! adjacent slots, which matters when unrelated keys hash next to each other.
//!
//! # Seqlock Protocol
//!
//! The per-slot `epoch` is the sequence counter:
//!
//! - **Even**: quiescent, safe to read
//! - **Odd**: a writer holds the slot
//!
//! **Writer:**
//! 1. CAS `epoch` from even E to odd E+1 ([`Slot::try_begin_write`]). A CAS,
//!    not a blind increment: multiple writers may target the same slot, and
//!    exactly one may win. Losers do not wait - they probe onward or report
//!    a retryable error.
//! 2. Mutate value bytes, length, key, metadata.
//! 3. Release-increment to even E+2 ([`Slot::end_write`]) - the publication
//!    point.
//!
//! **Reader:**
//! 1. Acquire-load `epoch`; odd means retryable ([`Slot::read_begin`])
//! 2. Acquire fence, copy the fields of interest
//! 3. Acquire fence, re-load `epoch` ([`Slot::read_end`]); a changed or odd
//!    value means the snapshot is torn and the caller retries
//!
//! # Memory Ordering
//!
//! - The even-to-odd entry CAS is AcqRel: it must observe prior publications
//!   and order the writer's stores after the claim.
//! - The odd-to-even exit increment is Release, pairing with readers'
//!   Acquire loads to publish every payload store at once.
//! - Readers fence with Acquire on both sides of the payload copy to defeat
//!   load reordering around the plain byte copies.

use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::{BusError, Result};

/// Maximum key length in bytes, including the NUL terminator.
pub const KEY_MAX: usize = 64;

/// Embedding vector dimension (OpenAI-style 768).
#[cfg(feature = "embeddings")]
pub const EMBED_DIM: usize = 768;

/// Type tag: fresh slot, no declared type.
pub const TYPE_VOID: u8 = 1 << 0;
/// Type tag: big signed integer (advisory).
pub const TYPE_BIGINT: u8 = 1 << 1;
/// Type tag: big unsigned integer; the only tag the bus enforces.
pub const TYPE_BIGUINT: u8 = 1 << 2;
/// Type tag: JSON document (advisory).
pub const TYPE_JSON: u8 = 1 << 3;
/// Type tag: opaque binary (advisory).
pub const TYPE_BINARY: u8 = 1 << 4;
/// Type tag: image data (advisory).
pub const TYPE_IMGDATA: u8 = 1 << 5;
/// Type tag: audio data (advisory).
pub const TYPE_AUDIO: u8 = 1 << 6;
/// Type tag: variable-length text (advisory).
pub const TYPE_VARTEXT: u8 = 1 << 7;

/// One key-value binding in the slot table.
///
/// `hash == 0` marks a free slot. The key buffer and (optional) embedding
/// lane are plain byte storage guarded by the seqlock; everything else is an
/// atomic of its natural width.
#[repr(C, align(64))]
pub struct Slot {
    /// FNV-1a-64 of the current key; 0 means empty
    hash: AtomicU64,
    /// Per-slot sequence counter (even quiescent, odd writer-held)
    epoch: AtomicU64,
    /// Byte offset of this slot's value cell in the arena
    val_off: AtomicU32,
    /// Current value length; 0 means no stored value
    val_len: AtomicU32,
    /// Type tags ([`TYPE_VOID`], [`TYPE_BIGUINT`], ...)
    type_flag: AtomicU8,
    /// Per-slot user flags, uninterpreted by the bus
    user_flag: AtomicU8,
    /// Direct subscription mask: bit g set pulses signal group g
    watcher_mask: AtomicU64,
    /// Client-populated creation timestamp (the bus never reads a clock)
    ctime: AtomicU64,
    /// Client-populated access timestamp
    atime: AtomicU64,
    /// Additive 64-bit label mask
    bloom: AtomicU64,
    /// NUL-terminated key bytes, guarded by the seqlock
    key: UnsafeCell<[u8; KEY_MAX]>,
    /// Embedding lane, guarded by the seqlock (large enough to tear)
    #[cfg(feature = "embeddings")]
    embedding: UnsafeCell<[f32; EMBED_DIM]>,
}

// SAFETY: Slot is designed for concurrent access across processes. The
// non-atomic key/embedding buffers are only read between the seqlock's
// begin/end checks and only written while the epoch is odd.
unsafe impl Send for Slot {}
unsafe impl Sync for Slot {}

impl Slot {
    /// Fresh empty slot whose value cell starts at `val_off`.
    pub(crate) fn new(val_off: u32) -> Self {
        Self {
            hash: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            val_off: AtomicU32::new(val_off),
            val_len: AtomicU32::new(0),
            type_flag: AtomicU8::new(TYPE_VOID),
            user_flag: AtomicU8::new(0),
            watcher_mask: AtomicU64::new(0),
            ctime: AtomicU64::new(0),
            atime: AtomicU64::new(0),
            bloom: AtomicU64::new(0),
            key: UnsafeCell::new([0u8; KEY_MAX]),
            #[cfg(feature = "embeddings")]
            embedding: UnsafeCell::new([0.0f32; EMBED_DIM]),
        }
    }

    // --- seqlock ---------------------------------------------------------

    /// Try to take the slot's seqlock: CAS the epoch from even E to odd E+1.
    ///
    /// Returns the even epoch that was claimed, or `None` when another
    /// writer already holds the slot or wins the CAS. Callers must NOT spin
    /// here - probe the next slot or surface [`BusError::WriterActive`].
    #[inline]
    pub(crate) fn try_begin_write(&self) -> Option<u64> {
        let e = self.epoch.load(Ordering::Relaxed);
        if e & 1 != 0 {
            return None;
        }
        self.epoch
            .compare_exchange(e, e + 1, Ordering::AcqRel, Ordering::Relaxed)
            .ok()?;
        Some(e)
    }

    /// Publish a completed write: odd E+1 becomes even E+2 with Release.
    #[inline]
    pub(crate) fn end_write(&self) {
        self.epoch.fetch_add(1, Ordering::Release);
    }

    /// Advance the counter by a full cycle without the intermediate odd
    /// state. Used by deletion, whose single `hash = 0` store is the
    /// publication point.
    #[inline]
    pub(crate) fn advance_even(&self) {
        self.epoch.fetch_add(2, Ordering::Release);
    }

    /// Begin a consistent read: the observed epoch, or
    /// [`BusError::WriterActive`] when odd.
    #[inline]
    pub(crate) fn read_begin(&self) -> Result<u64> {
        let e = self.epoch.load(Ordering::Acquire);
        if e & 1 != 0 {
            return Err(BusError::WriterActive);
        }
        fence(Ordering::Acquire);
        Ok(e)
    }

    /// Finish a consistent read: true when the epoch still matches `begin`
    /// and is even, i.e. the copied snapshot is not torn.
    #[inline]
    pub(crate) fn read_end(&self, begin: u64) -> bool {
        fence(Ordering::Acquire);
        let e = self.epoch.load(Ordering::Acquire);
        e == begin && e & 1 == 0
    }

    /// Current per-slot epoch.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    // --- hash ------------------------------------------------------------

    #[inline]
    pub(crate) fn hash(&self) -> u64 {
        self.hash.load(Ordering::Acquire)
    }

    /// Publish the key hash. Readers match on `hash` first, so this is the
    /// last payload store of a set, behind a Release fence.
    #[inline]
    pub(crate) fn publish_hash(&self, h: u64) {
        self.hash.store(h, Ordering::Release);
    }

    /// Mark the slot free. First store of a deletion.
    #[inline]
    pub(crate) fn clear_hash(&self) {
        self.hash.store(0, Ordering::Release);
    }

    // --- value geometry ---------------------------------------------------

    #[inline]
    pub(crate) fn val_off(&self) -> u32 {
        self.val_off.load(Ordering::Acquire)
    }

    /// Reassign the value cell (promotion / unset restore). Seqlock held.
    #[inline]
    pub(crate) fn set_val_off(&self, off: u32) {
        self.val_off.store(off, Ordering::Release);
    }

    #[inline]
    pub(crate) fn val_len(&self) -> u32 {
        self.val_len.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_val_len(&self, len: u32) {
        self.val_len.store(len, Ordering::Release);
    }

    // --- metadata ----------------------------------------------------------

    #[inline]
    pub(crate) fn type_flag(&self) -> u8 {
        self.type_flag.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_type_flag(&self, mask: u8) {
        self.type_flag.store(mask, Ordering::Release);
    }

    /// Set per-slot user flags (uninterpreted by the bus).
    pub fn user_set(&self, mask: u8) {
        self.user_flag.fetch_or(mask, Ordering::AcqRel);
    }

    /// Clear per-slot user flags.
    pub fn user_clear(&self, mask: u8) {
        self.user_flag.fetch_and(!mask, Ordering::AcqRel);
    }

    /// Test per-slot user flags.
    #[must_use]
    pub fn user_test(&self, mask: u8) -> bool {
        self.user_flag.load(Ordering::Acquire) & mask != 0
    }

    /// Snapshot per-slot user flags.
    #[must_use]
    pub fn user_snapshot(&self) -> u8 {
        self.user_flag.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn clear_user(&self) {
        self.user_flag.store(0, Ordering::Release);
    }

    #[inline]
    pub(crate) fn watcher_mask(&self) -> u64 {
        self.watcher_mask.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn watcher_or(&self, mask: u64) {
        self.watcher_mask.fetch_or(mask, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn watcher_and(&self, mask: u64) {
        self.watcher_mask.fetch_and(mask, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn clear_watchers(&self) {
        self.watcher_mask.store(0, Ordering::Release);
    }

    #[inline]
    pub(crate) fn bloom(&self) -> u64 {
        self.bloom.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn bloom_or(&self, mask: u64) {
        self.bloom.fetch_or(mask, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn clear_bloom(&self) {
        self.bloom.store(0, Ordering::Release);
    }

    #[inline]
    pub(crate) fn ctime(&self) -> u64 {
        self.ctime.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_ctime(&self, t: u64) {
        self.ctime.store(t, Ordering::Release);
    }

    #[inline]
    pub(crate) fn atime(&self) -> u64 {
        self.atime.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_atime(&self, t: u64) {
        self.atime.store(t, Ordering::Release);
    }

    // --- key buffer --------------------------------------------------------

    /// Copy of the key buffer. Racy by design: callers bracket the copy with
    /// [`Slot::read_begin`]/[`Slot::read_end`] or hold the seqlock, and probe
    /// paths re-verify via the hash.
    #[inline]
    pub(crate) fn key_bytes(&self) -> [u8; KEY_MAX] {
        // SAFETY: self.key points at KEY_MAX valid bytes inside the mapped
        // region. A concurrent writer may be mid-store; the seqlock / hash
        // verification around this copy detects that and discards the bytes.
        unsafe { *self.key.get() }
    }

    /// Compare the stored key against `key` (no NUL, len < KEY_MAX).
    #[inline]
    pub(crate) fn key_matches(&self, key: &[u8]) -> bool {
        let stored = self.key_bytes();
        stored[..key.len()] == *key && stored[key.len()] == 0
    }

    /// Store `key` with full NUL termination. Seqlock held.
    ///
    /// The whole buffer is rewritten (not just `key.len()` bytes) so a
    /// racing prober can never match a hybrid of old and new key tails.
    pub(crate) fn write_key(&self, key: &[u8]) {
        debug_assert!(key.len() < KEY_MAX);
        let mut buf = [0u8; KEY_MAX];
        buf[..key.len()].copy_from_slice(key);
        // SAFETY: exclusive write access - the epoch is odd, so readers
        // discard anything they copy from this buffer until end_write().
        unsafe { *self.key.get() = buf };
    }

    /// Wipe the key buffer. `full` zeroes all KEY_MAX bytes; otherwise only
    /// the leading NUL is written and stale bytes may remain.
    pub(crate) fn clear_key(&self, full: bool) {
        // SAFETY: callers hold the seqlock or have already published hash=0.
        unsafe {
            if full {
                *self.key.get() = [0u8; KEY_MAX];
            } else {
                (*self.key.get())[0] = 0;
            }
        }
    }

    // --- embedding lane ----------------------------------------------------

    #[cfg(feature = "embeddings")]
    pub(crate) fn write_embedding(&self, vec: &[f32; EMBED_DIM]) {
        // SAFETY: exclusive write access under the odd epoch; the lane is
        // exactly EMBED_DIM floats inside the mapped region.
        unsafe { *self.embedding.get() = *vec };
    }

    #[cfg(feature = "embeddings")]
    pub(crate) fn read_embedding(&self, out: &mut [f32; EMBED_DIM]) {
        // SAFETY: the copy may race a writer; callers bracket it with
        // read_begin/read_end and discard torn snapshots.
        unsafe { *out = *self.embedding.get() };
    }
}

/// Non-atomic copy of a slot, produced by `Bus::slot_snapshot`.
#[derive(Clone)]
pub struct SlotSnapshot {
    pub hash: u64,
    pub epoch: u64,
    pub val_off: u32,
    pub val_len: u32,
    pub type_flag: u8,
    pub user_flag: u8,
    pub watcher_mask: u64,
    pub ctime: u64,
    pub atime: u64,
    pub bloom: u64,
    pub key: [u8; KEY_MAX],
    #[cfg(feature = "embeddings")]
    pub embedding: [f32; EMBED_DIM],
}

impl SlotSnapshot {
    /// The key as UTF-8, up to the NUL terminator.
    #[must_use]
    pub fn key_str(&self) -> &str {
        let end = self.key.iter().position(|&b| b == 0).unwrap_or(KEY_MAX);
        std::str::from_utf8(&self.key[..end]).unwrap_or("")
    }
}

impl std::fmt::Debug for SlotSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotSnapshot")
            .field("key", &self.key_str())
            .field("hash", &self.hash)
            .field("epoch", &self.epoch)
            .field("val_off", &self.val_off)
            .field("val_len", &self.val_len)
            .field("type_flag", &self.type_flag)
            .field("user_flag", &self.user_flag)
            .field("watcher_mask", &self.watcher_mask)
            .field("ctime", &self.ctime)
            .field("atime", &self.atime)
            .field("bloom", &self.bloom)
            .finish()
    }
}
