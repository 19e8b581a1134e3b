// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! selenitectl - command-line front end for the selenite bus.
//!
//! Bus selection: `--bus <spec>` or the `SELENITE_BUS` environment
//! variable, where spec is `shm:/name`, `file:/path`, or a bare `/name`
//! (shm). Keys are prefixed with `SELENITE_NS_PREFIX` when set, so fleets
//! of workers can share one bus without key collisions.

use selenite::bus::{IntegerOp, TimeField};
use selenite::config::parse_backing;
use selenite::{Backing, Bus, BusError, GroupSubscriber, TYPE_BIGUINT};
use std::time::Duration;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let mut rest: Vec<&str> = args.iter().skip(1).map(String::as_str).collect();

    // --bus <spec> may appear before the command.
    let mut bus_spec = std::env::var("SELENITE_BUS").ok();
    if rest.len() >= 2 && rest[0] == "--bus" {
        bus_spec = Some(rest[1].to_string());
        rest.drain(0..2);
    }

    if rest.is_empty() {
        usage();
        std::process::exit(1);
    }

    let cmd = rest[0];
    let cmd_args = &rest[1..];

    if cmd == "help" || cmd == "--help" || cmd == "-h" {
        usage();
        return;
    }

    let Some(spec) = bus_spec else {
        eprintln!("selenitectl: no bus named (use --bus or SELENITE_BUS)");
        std::process::exit(1);
    };
    let backing = match parse_backing(&spec) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("selenitectl: bad bus spec '{spec}': {e}");
            std::process::exit(1);
        }
    };

    let status = run(cmd, cmd_args, &backing);
    std::process::exit(status);
}

fn run(cmd: &str, args: &[&str], backing: &Backing) -> i32 {
    match cmd {
        "create" => cmd_create(args, backing),
        "destroy" => cmd_destroy(backing),
        _ => {
            // Every other command wants an existing bus.
            let bus = match Bus::open(backing) {
                Ok(bus) => bus,
                Err(e) => {
                    eprintln!("selenitectl: cannot open {backing}: {e}");
                    return 1;
                }
            };
            match cmd {
                "set" => cmd_set(&bus, args),
                "get" => cmd_get(&bus, args),
                "unset" => cmd_unset(&bus, args),
                "list" => cmd_list(&bus),
                "poll" => cmd_poll(&bus, args),
                "watch" => cmd_watch(&bus, args),
                "type" => cmd_type(&bus, args),
                "math" => cmd_math(&bus, args),
                "label" => cmd_label(&bus, args),
                "time" => cmd_time(&bus, args),
                "info" => cmd_info(&bus),
                "scrub" => cmd_scrub(&bus, args),
                "purge" => cmd_purge(&bus),
                other => {
                    eprintln!("selenitectl: unknown command '{other}'");
                    usage();
                    1
                }
            }
        }
    }
}

fn usage() {
    println!("selenitectl: selenite bus CLI");
    println!();
    println!("Usage: selenitectl [--bus <spec>] <command> [args]");
    println!();
    println!("Commands:");
    println!("  create <slots> <max_val_sz>   create the bus");
    println!("  destroy                       unlink the backing object");
    println!("  set <key> <value>             write a value");
    println!("  get <key>                     read a value (type-aware print)");
    println!("  unset <key>                   delete a key");
    println!("  list                          list live keys");
    println!("  poll <key> [timeout_ms]       wait for one change");
    println!("  watch <key> [--oneshot]       follow a key's updates");
    println!("  watch --group <id> [--oneshot] follow a signal group");
    println!("  type <key> <tag>              declare a slot type (biguint, json, ...)");
    println!("  math <key> <op> [value]       inc, dec, and, or, xor, not on a biguint");
    println!("  label <key> <mask>            OR a label mask onto a slot");
    println!("  time <key> <ctime|atime> <ts> [offset]  backfill a timestamp");
    println!("  info                          header snapshot");
    println!("  scrub [off|full|hybrid]       show or set auto-scrub");
    println!("  purge                         sweep stale arena bytes");
    println!();
    println!("Bus spec: shm:/name, file:/path, or bare /name (shm).");
    println!("Env: SELENITE_BUS, SELENITE_NS_PREFIX");
}

fn prefixed(key: &str) -> String {
    match std::env::var("SELENITE_NS_PREFIX") {
        Ok(prefix) => format!("{prefix}{key}"),
        Err(_) => key.to_string(),
    }
}

fn parse_u64(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn cmd_create(args: &[&str], backing: &Backing) -> i32 {
    let (Some(slots), Some(max_val)) = (
        args.first().and_then(|s| s.parse::<u32>().ok()),
        args.get(1).and_then(|s| s.parse::<u32>().ok()),
    ) else {
        eprintln!("Usage: create <slots> <max_val_sz>");
        return 1;
    };

    match Bus::create(backing, slots, max_val) {
        Ok(_) => {
            println!("Created {backing}: {slots} slots x {max_val} bytes.");
            0
        }
        Err(e) => {
            eprintln!("create: {e}");
            1
        }
    }
}

fn cmd_destroy(backing: &Backing) -> i32 {
    match backing.unlink() {
        Ok(()) => {
            println!("Unlinked {backing}.");
            0
        }
        Err(e) => {
            eprintln!("destroy: {e}");
            1
        }
    }
}

fn cmd_set(bus: &Bus, args: &[&str]) -> i32 {
    let (Some(key), Some(value)) = (args.first(), args.get(1)) else {
        eprintln!("Usage: set <key> <value>");
        return 1;
    };
    let key = prefixed(key);

    match bus.set(&key, value.as_bytes()) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("set: failed to write '{key}': {e}");
            1
        }
    }
}

fn cmd_get(bus: &Bus, args: &[&str]) -> i32 {
    let Some(key) = args.first() else {
        eprintln!("Usage: get <key>");
        return 1;
    };
    let key = prefixed(key);

    let mut buf = vec![0u8; bus.max_val_sz() as usize];
    let n = match get_with_retry(bus, &key, &mut buf) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("get: unable to retrieve key '{key}': {e}");
            return 1;
        }
    };

    // Type-aware printing: BIGUINT slots print as an integer.
    match bus.named_type(&key) {
        Ok(t) if t & TYPE_BIGUINT != 0 => match bus.integer_value(&key) {
            Ok(v) => println!("{n}:{v}"),
            Err(_) => print_raw(n, &buf[..n]),
        },
        _ => print_raw(n, &buf[..n]),
    }
    println!();
    0
}

fn print_raw(n: usize, bytes: &[u8]) {
    println!("{n}:{}", String::from_utf8_lossy(bytes));
}

/// Retryable conditions get a few polite retries before surfacing.
fn get_with_retry(bus: &Bus, key: &str, buf: &mut [u8]) -> Result<usize, BusError> {
    let mut attempts = 0;
    loop {
        match bus.get(key, buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.is_retryable() && attempts < 64 => {
                attempts += 1;
                std::hint::spin_loop();
            }
            Err(e) => return Err(e),
        }
    }
}

fn cmd_unset(bus: &Bus, args: &[&str]) -> i32 {
    let Some(key) = args.first() else {
        eprintln!("Usage: unset <key>");
        return 1;
    };
    let key = prefixed(key);

    match bus.unset(&key) {
        Ok(len) => {
            println!("Deleted '{key}' ({len} bytes).");
            0
        }
        Err(e) => {
            eprintln!("unset: '{key}': {e}");
            1
        }
    }
}

fn cmd_list(bus: &Bus) -> i32 {
    let keys = bus.list(bus.slots() as usize);
    for key in &keys {
        println!("{key}");
    }
    println!("{} key(s).", keys.len());
    0
}

fn cmd_poll(bus: &Bus, args: &[&str]) -> i32 {
    let Some(key) = args.first() else {
        eprintln!("Usage: poll <key> [timeout_ms]");
        return 1;
    };
    let key = prefixed(key);
    let timeout = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(5_000);

    match bus.poll(&key, timeout) {
        Ok(()) => {
            println!("'{key}' changed.");
            0
        }
        Err(BusError::Timeout) => {
            eprintln!("poll: timed out after {timeout} ms.");
            1
        }
        Err(e) => {
            eprintln!("poll: '{key}': {e}");
            1
        }
    }
}

fn cmd_watch(bus: &Bus, args: &[&str]) -> i32 {
    let oneshot = args.contains(&"--oneshot");

    if let Some(pos) = args.iter().position(|&a| a == "--group") {
        let Some(group) = args.get(pos + 1).and_then(|s| s.parse::<u8>().ok()) else {
            eprintln!("watch: invalid group. Must be 0-63.");
            return 1;
        };

        let mut sub = match GroupSubscriber::new(bus, group) {
            Ok(sub) => sub,
            Err(e) => {
                eprintln!("watch: {e}");
                return 1;
            }
        };

        loop {
            match sub.wait(Duration::from_millis(50)) {
                Ok(true) => {
                    let total = bus.get_signal_count(group).unwrap_or(0);
                    println!("Signal group {group} pulsed! (Total pulses: {total})");
                    if oneshot {
                        return 0;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    eprintln!("watch: {e}");
                    return 1;
                }
            }
        }
    }

    let Some(key) = args.iter().find(|&&a| !a.starts_with("--")) else {
        eprintln!("Usage: watch <key> [--oneshot] OR watch --group <id> [--oneshot]");
        return 1;
    };
    let key = prefixed(key);
    let mut buf = vec![0u8; bus.max_val_sz() as usize];

    loop {
        match bus.poll(&key, 100) {
            Ok(()) => {
                let Ok(n) = get_with_retry(bus, &key, &mut buf) else {
                    eprintln!("watch: failed to read '{key}' after update.");
                    return 1;
                };
                print_raw(n, &buf[..n]);
                if oneshot {
                    return 0;
                }
            }
            Err(BusError::Timeout | BusError::WriterActive) => {}
            Err(e) => {
                eprintln!("watch: invalid key '{key}': {e}");
                return 1;
            }
        }
    }
}

fn cmd_type(bus: &Bus, args: &[&str]) -> i32 {
    let (Some(key), Some(tag)) = (args.first(), args.get(1)) else {
        eprintln!("Usage: type <key> <tag>");
        return 1;
    };
    let key = prefixed(key);

    let mask = match tag.to_ascii_lowercase().as_str() {
        "void" => selenite::TYPE_VOID,
        "bigint" => selenite::TYPE_BIGINT,
        "biguint" => selenite::TYPE_BIGUINT,
        "json" => selenite::TYPE_JSON,
        "binary" => selenite::TYPE_BINARY,
        "imgdata" => selenite::TYPE_IMGDATA,
        "audio" => selenite::TYPE_AUDIO,
        "vartext" => selenite::TYPE_VARTEXT,
        other => {
            eprintln!("type: unknown tag '{other}'");
            return 1;
        }
    };

    match bus.set_named_type(&key, mask) {
        Ok(()) => {
            println!("Named '{key}' as {tag}.");
            0
        }
        Err(e) => {
            eprintln!("type: '{key}': {e}");
            1
        }
    }
}

fn cmd_math(bus: &Bus, args: &[&str]) -> i32 {
    let (Some(key), Some(op_str)) = (args.first(), args.get(1)) else {
        eprintln!("Usage: math <key> <op> [value]");
        eprintln!("Operations: inc, dec, and, or, xor, not");
        return 1;
    };
    let key = prefixed(key);

    let op = match op_str.to_ascii_lowercase().as_str() {
        "inc" => IntegerOp::Inc,
        "dec" => IntegerOp::Dec,
        "and" => IntegerOp::And,
        "or" => IntegerOp::Or,
        "xor" => IntegerOp::Xor,
        "not" => IntegerOp::Not,
        other => {
            eprintln!("math: unknown operation '{other}'");
            return 1;
        }
    };

    let mask = if op == IntegerOp::Not {
        0
    } else {
        let Some(mask) = args.get(2).and_then(|s| parse_u64(s)) else {
            eprintln!("math: operation '{op_str}' requires a value");
            return 1;
        };
        mask
    };

    match bus.integer_op(&key, op, mask) {
        Ok(()) => {
            println!("Operation '{op_str}' applied to '{key}' successfully.");
            0
        }
        Err(BusError::WrongType { .. }) => {
            eprintln!("math: key '{key}' is not a BIGUINT slot.");
            1
        }
        Err(e) if e.is_retryable() => {
            eprintln!("math: collision detected, try again.");
            1
        }
        Err(e) => {
            eprintln!("math: '{key}': {e}");
            1
        }
    }
}

fn cmd_label(bus: &Bus, args: &[&str]) -> i32 {
    let (Some(key), Some(mask_str)) = (args.first(), args.get(1)) else {
        eprintln!("Usage: label <key> <mask>");
        return 1;
    };
    let key = prefixed(key);

    let Some(mask) = parse_u64(mask_str).filter(|&m| m != 0) else {
        eprintln!("label: invalid mask '{mask_str}'");
        return 1;
    };

    match bus.set_label(&key, mask) {
        Ok(()) => {
            println!("Label 0x{mask:x} applied to '{key}'.");
            0
        }
        Err(e) => {
            eprintln!("label: failed to apply label to '{key}': {e}");
            1
        }
    }
}

fn cmd_time(bus: &Bus, args: &[&str]) -> i32 {
    let (Some(key), Some(mode), Some(ts)) = (args.first(), args.get(1), args.get(2)) else {
        eprintln!("Usage: time <key> <ctime|atime> <timestamp> [offset]");
        return 1;
    };
    let key = prefixed(key);

    let field = match mode.to_ascii_lowercase().as_str() {
        "ctime" => TimeField::Ctime,
        "atime" => TimeField::Atime,
        other => {
            eprintln!("time: unknown mode '{other}'");
            return 1;
        }
    };
    let Some(timestamp) = parse_u64(ts) else {
        eprintln!("time: invalid timestamp '{ts}'");
        return 1;
    };
    let offset = args.get(3).and_then(|s| parse_u64(s)).unwrap_or(0);

    match bus.set_slot_time(&key, field, timestamp, offset) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("time: '{key}': {e}");
            1
        }
    }
}

fn cmd_info(bus: &Bus) -> i32 {
    let snap = bus.header_snapshot();
    println!("magic              = 0x{:08x}", snap.magic);
    println!("version            = {}", snap.version);
    println!("slots              = {}", snap.slots);
    println!("max_val_sz         = {}", snap.max_val_sz);
    println!("region size        = {}", snap.val_sz);
    println!("arena brk          = {}", snap.val_brk);
    println!("epoch              = {}", snap.epoch);
    println!("core flags         = 0x{:02x}", snap.core_flags);
    println!("user flags         = 0x{:02x}", snap.user_flags);
    println!("parse failures     = {}", snap.parse_failures);
    println!("last failure epoch = {}", snap.last_failure_epoch);
    0
}

fn cmd_scrub(bus: &Bus, args: &[&str]) -> i32 {
    match args.first() {
        None => {
            let mode = if bus.hybrid_auto_scrub() {
                "hybrid"
            } else if bus.auto_scrub() {
                "full"
            } else {
                "off"
            };
            println!("auto-scrub: {mode}");
            0
        }
        Some(&"off") => {
            bus.set_auto_scrub(false);
            0
        }
        Some(&"full") => {
            bus.set_auto_scrub(false);
            bus.set_auto_scrub(true);
            0
        }
        Some(&"hybrid") => {
            bus.set_hybrid_auto_scrub();
            0
        }
        Some(other) => {
            eprintln!("scrub: unknown mode '{other}'");
            1
        }
    }
}

fn cmd_purge(bus: &Bus) -> i32 {
    let swept = bus.purge();
    println!("Swept {swept} slot(s).");
    0
}
