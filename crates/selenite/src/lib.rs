// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! # selenite - lock-free shared-memory key-value bus
//!
//! A fixed-layout, seqlock-guarded key-value region that cooperating local
//! processes map read-write-shared and use as a message bus. Typical setup:
//! a host application plus sidecar workers (embedding generators, policy
//! evaluators) exchanging small-to-medium values keyed by short strings.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use selenite::{Backing, Bus, Result};
//!
//! fn main() -> Result<()> {
//!     // Create a bus with 1000 slots, 4 KiB of value space per slot
//!     let bus = Bus::create_or_open(&Backing::shm("/sensors")?, 1000, 4096)?;
//!
//!     bus.set("temp/cabin", b"21.5")?;
//!
//!     let mut buf = [0u8; 64];
//!     let n = bus.get("temp/cabin", &mut buf)?;
//!     assert_eq!(&buf[..n], b"21.5");
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! | Header (magic, geometry, flags, signal arena, label map)     |
//! +--------------------------------------------------------------+
//! | Slot[0..N-1]  (64-byte aligned: hash, epoch, metadata, key)  |
//! +--------------------------------------------------------------+
//! | Value arena   (N * max_val_sz bytes, offset/len per slot)    |
//! +--------------------------------------------------------------+
//! ```
//!
//! Every mutable field is an atomic; each slot carries a sequence counter
//! (even = quiescent, odd = writer active) so readers always observe either
//! the pre-write or the post-write state of a slot, never a mixture. Writers
//! that lose the counter CAS never block: they probe onward or report a
//! retryable error.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bus`] | An open, mapped bus; every operation hangs off it |
//! | [`Backing`] | Names the mapped object: POSIX shm or a regular file |
//! | [`BusError`] | The full failure taxonomy, with [`BusError::is_retryable`] |
//! | [`GroupSubscriber`] | Counter-comparison bridge over the signal arena |
//! | [`HeaderSnapshot`] / [`SlotSnapshot`] | Stable, torn-free copies for diagnostics |
//!
//! ## Modules Overview
//!
//! - [`bus`] - lifecycle plus the operations layer (start here)
//! - [`slot`] - slot record and the per-slot seqlock protocol
//! - [`header`] - bus header, flags, signal arena layout
//! - [`signal`] - pub/sub over the signal arena
//! - [`segment`] - region mapper (shm / persistent file)

pub mod bus;
pub mod clock;
#[cfg(feature = "config-loaders")]
pub mod config;
pub mod header;
pub mod metrics;
pub mod segment;
pub mod signal;
pub mod slot;
pub mod tandem;

pub use bus::{Bus, IntegerOp, RawValue, TimeField};
#[cfg(feature = "config-loaders")]
pub use config::{BusProfile, ProfileDoc};
pub use header::{HeaderSnapshot, CORE_AUTO_SCRUB, CORE_HYBRID_SCRUB, MAGIC, MAX_GROUPS};
pub use metrics::{global_metrics, BusMetrics, BusMetricsSnapshot};
pub use segment::Backing;
pub use signal::GroupSubscriber;
pub use slot::{
    SlotSnapshot, KEY_MAX, TYPE_AUDIO, TYPE_BIGINT, TYPE_BIGUINT, TYPE_BINARY, TYPE_IMGDATA,
    TYPE_JSON, TYPE_VARTEXT, TYPE_VOID,
};
#[cfg(feature = "embeddings")]
pub use slot::EMBED_DIM;

use std::fmt;
use std::io;

/// Errors that can occur on bus operations.
///
/// The retryable kinds ([`BusError::WriterActive`], [`BusError::TornRead`])
/// are transient observations of a concurrent writer; callers decide whether
/// and how to retry. Everything else is terminal for the attempted call.
#[derive(Debug)]
pub enum BusError {
    /// Backing object creation failed (exists already, permissions, ...)
    SegmentCreate(io::Error),

    /// Backing object open failed
    SegmentOpen(io::Error),

    /// Memory mapping failed
    Mmap(io::Error),

    /// Mapped region does not carry the expected magic number
    BadMagic(u32),

    /// Mapped region carries an unsupported layout version
    BadVersion(u32),

    /// Mapped size disagrees with the geometry recorded in the header
    GeometryMismatch { expected: usize, actual: usize },

    /// Invalid backing object name
    InvalidName(String),

    /// Caller-supplied argument rejected before touching the region
    InvalidArgument(&'static str),

    /// No slot matches the key after a full probe
    KeyNotFound,

    /// Value longer than the capacity of the target value cell
    ValueTooLarge { size: usize, max: usize },

    /// Every candidate slot is occupied by another key
    TableFull,

    /// The arena bump cursor cannot reserve the requested bytes
    ArenaExhausted,

    /// Operation requires a type tag the slot does not carry
    WrongType { have: u8 },

    /// Read buffer smaller than the stored value (length still reported)
    BufferTooSmall { need: usize, have: usize },

    /// A writer held the slot's seqlock at observation (retryable)
    WriterActive,

    /// Begin/end seqlock observations disagree (retryable)
    TornRead,

    /// Poll deadline expired without a change
    Timeout,
}

impl BusError {
    /// True for the transient kinds a caller may simply retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriterActive | Self::TornRead)
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SegmentCreate(e) => write!(f, "backing object creation failed: {e}"),
            Self::SegmentOpen(e) => write!(f, "backing object open failed: {e}"),
            Self::Mmap(e) => write!(f, "memory mapping failed: {e}"),
            Self::BadMagic(m) => write!(f, "bad magic 0x{m:08x} (not a selenite region)"),
            Self::BadVersion(v) => write!(f, "unsupported layout version {v}"),
            Self::GeometryMismatch { expected, actual } => {
                write!(
                    f,
                    "region size {actual} does not match header geometry {expected}"
                )
            }
            Self::InvalidName(name) => write!(f, "invalid backing name: {name}"),
            Self::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            Self::KeyNotFound => write!(f, "key not found"),
            Self::ValueTooLarge { size, max } => {
                write!(f, "value too large: {size} bytes exceeds cell capacity {max}")
            }
            Self::TableFull => write!(f, "slot table full"),
            Self::ArenaExhausted => write!(f, "value arena exhausted"),
            Self::WrongType { have } => {
                write!(f, "operation requires BIGUINT, slot type is 0x{have:02x}")
            }
            Self::BufferTooSmall { need, have } => {
                write!(f, "buffer too small: need {need} bytes, have {have}")
            }
            Self::WriterActive => write!(f, "writer in progress (retryable)"),
            Self::TornRead => write!(f, "torn snapshot (retryable)"),
            Self::Timeout => write!(f, "poll deadline expired"),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SegmentCreate(e) | Self::SegmentOpen(e) | Self::Mmap(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for bus operations
pub type Result<T> = std::result::Result<T, BusError>;
