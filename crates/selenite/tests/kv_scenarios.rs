// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! End-to-end key-value scenarios against a realistically sized bus.
//!
//! Follows the canonical lifecycle: create, set/get/update, list, unset,
//! scrub flags, snapshots, typed slots, timestamp backfill.

use selenite::bus::TimeField;
use selenite::{Backing, Bus, BusError, CORE_AUTO_SCRUB, TYPE_BIGUINT, TYPE_VARTEXT};

fn unique_backing(tag: &str) -> Backing {
    use std::time::{SystemTime, UNIX_EPOCH};
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    Backing::shm(&format!("/selenite_e2e_{tag}_{}", ts)).unwrap()
}

struct Cleanup(Backing);
impl Drop for Cleanup {
    fn drop(&mut self) {
        self.0.unlink().ok();
    }
}

#[test]
fn full_store_lifecycle() {
    let backing = unique_backing("lifecycle");
    let _cleanup = Cleanup(backing.clone());

    let bus = Bus::create_or_open(&backing, 1000, 4096).expect("create store");

    // Basic set/get round trip.
    bus.set("test_key", b"hello world").expect("set key-value pair");

    let mut buf = [0u8; 256];
    let n = bus.get("test_key", &mut buf).expect("get key-value pair");
    assert_eq!(&buf[..n], b"hello world", "retrieved value matches");
    assert_eq!(n, 11, "retrieved size is correct");

    // Length query without a buffer.
    assert_eq!(
        bus.get_len("test_key").expect("query size with no buffer"),
        11,
        "queried size matches"
    );

    // Update in place.
    bus.set("test_key", b"updated value").expect("update existing key");
    let n = bus.get("test_key", &mut buf).expect("get updated value");
    assert_eq!(&buf[..n], b"updated value", "updated value is correct");

    // A second and third key, then list.
    bus.set("key2", b"value2").unwrap();
    bus.set("key3", b"value3").unwrap();
    let keys = bus.list(10);
    assert_eq!(keys.len(), 3, "correct number of keys");

    assert!(bus.unset("key2").is_ok(), "unset key");
    assert_eq!(bus.list(10).len(), 2);

    // Scrub flag round trip mirrors the header snapshot.
    bus.set_auto_scrub(false);
    assert!(!bus.auto_scrub(), "auto scrub is really off");
    let snap = bus.header_snapshot();
    assert!(snap.magic > 0, "magic number greater than zero");
    assert!(snap.epoch > 0, "epoch greater than zero");
    assert_eq!(snap.core_flags & CORE_AUTO_SCRUB, 0);
    assert!(snap.slots > 0, "slots are non-zero");

    // Slot snapshot of a fresh key.
    bus.set("header_snap", b"hello").unwrap();
    let slot = bus.slot_snapshot("header_snap").expect("slot snapshot");
    assert!(slot.epoch > 0, "snapshot epoch is nonzero");
    assert_eq!(slot.val_len, 5, "length of header_snap is 5");

    // Advisory type naming and timestamp backfill.
    bus.set_named_type("header_snap", TYPE_VARTEXT).expect("name slot as text");
    let now = 1_750_000_000u64;
    bus.set_slot_time("header_snap", TimeField::Ctime, now, 0).unwrap();
    bus.set_slot_time("header_snap", TimeField::Atime, now, 0).unwrap();
    let slot = bus.slot_snapshot("header_snap").unwrap();
    assert_eq!(slot.ctime, now);
    assert_eq!(slot.atime, now);
    bus.unset("header_snap").unwrap();

    bus.close();
}

#[test]
fn update_advances_the_slot_epoch() {
    let backing = unique_backing("epoch");
    let _cleanup = Cleanup(backing.clone());
    let bus = Bus::create(&backing, 1000, 4096).unwrap();

    bus.set("k1", b"hello").unwrap();
    let e1 = bus.get_epoch("k1");
    assert!(e1 > 0);

    bus.set("k1", b"updated value").unwrap();
    let mut buf = [0u8; 64];
    let n = bus.get("k1", &mut buf).unwrap();
    assert_eq!(&buf[..n], b"updated value");
    assert!(bus.get_epoch("k1") > e1);
}

#[test]
fn biguint_bit_walk_scenario() {
    let backing = unique_backing("bits");
    let _cleanup = Cleanup(backing.clone());
    let bus = Bus::create(&backing, 64, 256).unwrap();

    use selenite::bus::IntegerOp;

    bus.set("n", &[0xFF; 8]).unwrap();
    bus.set_named_type("n", TYPE_BIGUINT).unwrap();

    bus.integer_op("n", IntegerOp::Or, 0x0F0F_0F0F_0F0F_0F0F).unwrap();
    assert_eq!(bus.integer_value("n").unwrap(), 0xFFFF_FFFF_FFFF_FFFF);

    bus.integer_op("n", IntegerOp::And, 0xAAAA_AAAA_AAAA_AAAA).unwrap();
    assert_eq!(bus.integer_value("n").unwrap(), 0xAAAA_AAAA_AAAA_AAAA);

    bus.integer_op("n", IntegerOp::Xor, 0xAAAA_AAAA_AAAA_AAAA).unwrap();
    assert_eq!(bus.integer_value("n").unwrap(), 0);
}

#[test]
fn integer_op_on_text_slot_is_wrong_type() {
    let backing = unique_backing("wrongtype");
    let _cleanup = Cleanup(backing.clone());
    let bus = Bus::create(&backing, 64, 256).unwrap();

    use selenite::bus::IntegerOp;

    bus.set("t", b"data").unwrap();
    bus.set_named_type("t", TYPE_VARTEXT).unwrap();
    assert!(matches!(
        bus.integer_op("t", IntegerOp::Inc, 1),
        Err(BusError::WrongType { .. })
    ));
}

#[test]
fn watch_group_pulse_scenario() {
    let backing = unique_backing("watch");
    let _cleanup = Cleanup(backing.clone());
    let bus = Bus::create(&backing, 64, 256).unwrap();

    bus.set("sig", b"seed").unwrap();
    bus.watch_register("sig", 5).unwrap();

    let c0 = bus.get_signal_count(5).unwrap();
    bus.set("sig", b"x").unwrap();
    assert!(bus.get_signal_count(5).unwrap() > c0);

    bus.watch_unregister("sig", 5).unwrap();
    let c1 = bus.get_signal_count(5).unwrap();
    bus.set("sig", b"y").unwrap();
    assert_eq!(bus.get_signal_count(5).unwrap(), c1);
}

#[test]
fn poll_observes_a_concurrent_set() {
    let backing = unique_backing("poll");
    let _cleanup = Cleanup(backing.clone());
    let bus = Bus::create(&backing, 64, 256).unwrap();
    bus.set("feed", b"seed").unwrap();

    std::thread::scope(|s| {
        let writer_backing = backing.clone();
        s.spawn(move || {
            let peer = Bus::open(&writer_backing).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(50));
            peer.set("feed", b"fresh").unwrap();
        });

        bus.poll("feed", 2_000).expect("poll sees the update");
        let mut buf = [0u8; 16];
        let n = bus.get("feed", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"fresh");
    });
}

#[test]
fn list_excludes_later_unset_keys() {
    let backing = unique_backing("list");
    let _cleanup = Cleanup(backing.clone());
    let bus = Bus::create(&backing, 32, 64).unwrap();

    for i in 0..8 {
        bus.set(&format!("key{i}"), b"v").unwrap();
    }
    for i in (0..8).step_by(2) {
        bus.unset(&format!("key{i}")).unwrap();
    }

    let mut keys = bus.list(32);
    keys.sort();
    assert_eq!(keys, vec!["key1", "key3", "key5", "key7"]);
}
