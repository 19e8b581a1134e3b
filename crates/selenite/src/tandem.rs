// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! Tandem key convenience: `base`, `base.1`, `base.2`, ...
//!
//! Purely a client-side naming convention over repeated set/unset calls;
//! the bus stores every order as an independent slot with no linkage and
//! no transactional grouping.

use crate::bus::Bus;
use crate::{BusError, Result};

impl Bus {
    /// Write `vals[0]` to `base` and `vals[k]` to `base.k` for k >= 1.
    ///
    /// Orders land one at a time; a failure partway leaves the earlier
    /// orders in place and reports which index failed.
    pub fn set_tandem(&self, base: &str, vals: &[&[u8]]) -> Result<()> {
        if vals.is_empty() {
            return Err(BusError::InvalidArgument("tandem needs at least one value"));
        }
        for (order, val) in vals.iter().enumerate() {
            let key = tandem_key(base, order);
            self.set(&key, val)?;
        }
        Ok(())
    }

    /// Delete `base` and its orders `base.1` ..= `base.{orders}`.
    ///
    /// Missing orders are skipped. Returns how many keys were removed.
    pub fn unset_tandem(&self, base: &str, orders: u8) -> usize {
        let mut removed = 0;
        for order in 0..=usize::from(orders) {
            let key = tandem_key(base, order);
            if self.unset(&key).is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

fn tandem_key(base: &str, order: usize) -> String {
    if order == 0 {
        base.to_string()
    } else {
        format!("{base}.{order}")
    }
}
