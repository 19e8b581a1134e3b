// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! Auto-scrub behavior as seen by raw-pointer peekers, the one consumer
//! class that reads past `val_len`.

use selenite::{Backing, Bus};

fn unique_backing(tag: &str) -> Backing {
    use std::time::{SystemTime, UNIX_EPOCH};
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    Backing::shm(&format!("/selenite_scrub_{tag}_{}", ts)).unwrap()
}

struct Cleanup(Backing);
impl Drop for Cleanup {
    fn drop(&mut self) {
        self.0.unlink().ok();
    }
}

/// Read the cell byte at `off` past the start of `key`'s value.
fn peek(bus: &Bus, key: &str, off: usize) -> u8 {
    let raw = bus.raw_value(key).unwrap();
    // SAFETY: the bus stays mapped and the offset stays inside the cell
    // (tests bound it by max_val_sz).
    unsafe { *raw.as_ptr().add(off) }
}

#[test]
fn scrub_off_leaves_stale_tail() {
    let backing = unique_backing("off");
    let _cleanup = Cleanup(backing.clone());
    let bus = Bus::create(&backing, 8, 256).unwrap();

    bus.set("k", &[0xEE; 200]).unwrap();
    bus.set("k", b"tiny").unwrap();

    assert_eq!(peek(&bus, "k", 100), 0xEE, "stale byte expected with scrub off");
}

#[test]
fn full_scrub_wipes_the_whole_cell() {
    let backing = unique_backing("full");
    let _cleanup = Cleanup(backing.clone());
    let bus = Bus::create(&backing, 8, 256).unwrap();

    bus.set("k", &[0xEE; 200]).unwrap();
    bus.set_auto_scrub(true);
    bus.set("k", b"tiny").unwrap();

    for off in 4..256 {
        assert_eq!(peek(&bus, "k", off), 0, "dirty byte at {off}");
    }
}

#[test]
fn hybrid_scrub_wipes_to_the_cache_line() {
    let backing = unique_backing("hybrid");
    let _cleanup = Cleanup(backing.clone());
    let bus = Bus::create(&backing, 8, 256).unwrap();

    bus.set("k", &[0xEE; 200]).unwrap();
    bus.set_hybrid_auto_scrub();
    bus.set("k", b"tiny").unwrap();

    // 4-byte write: hybrid wipes [0, 64), leaves the rest alone.
    for off in 4..64 {
        assert_eq!(peek(&bus, "k", off), 0, "dirty byte at {off}");
    }
    assert_eq!(peek(&bus, "k", 100), 0xEE, "hybrid must not touch past the slop");
}

#[test]
fn scrubbed_unset_wipes_value_and_key() {
    let backing = unique_backing("unset");
    let _cleanup = Cleanup(backing.clone());
    let bus = Bus::create(&backing, 4, 128).unwrap();

    bus.set("secret", &[0x5E; 128]).unwrap();
    let cell = bus.raw_value("secret").unwrap();
    let ptr = cell.as_ptr();

    bus.set_auto_scrub(true);
    bus.unset("secret").unwrap();

    // SAFETY: arena stays mapped; the cell is unbound but readable.
    unsafe {
        for off in 0..128 {
            assert_eq!(*ptr.add(off), 0, "unscrubbed value byte at {off}");
        }
    }
}

#[test]
fn unscrubbed_unset_only_drops_the_binding() {
    let backing = unique_backing("lazy");
    let _cleanup = Cleanup(backing.clone());
    let bus = Bus::create(&backing, 4, 128).unwrap();

    bus.set("leaky", &[0x5E; 64]).unwrap();
    let ptr = bus.raw_value("leaky").unwrap().as_ptr();
    bus.unset("leaky").unwrap();

    // SAFETY: as above.
    unsafe {
        assert_eq!(*ptr.add(10), 0x5E, "scrub off leaves bytes for purge to sweep");
    }

    bus.purge();
    // SAFETY: as above.
    unsafe {
        assert_eq!(*ptr.add(10), 0, "purge sweeps the orphan bytes");
    }
}
