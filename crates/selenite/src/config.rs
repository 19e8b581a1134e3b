// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! YAML bus profile loader (feature `config-loaders`).
//!
//! Lets deployments describe their buses in a human-friendly file instead
//! of scattering geometry constants across launch scripts.
//!
//! # Example YAML
//!
//! ```yaml
//! # buses.yaml
//! profiles:
//!   sensors:
//!     backing: shm:/sensors
//!     slots: 1000
//!     max_value_size: 4096
//!     scrub: hybrid
//!
//!   journal:
//!     backing: file:/var/lib/app/journal.bus
//!     slots: 256
//!     max_value_size: 65536
//!     scrub: full
//!
//! default_profile: sensors
//! ```

use crate::bus::Bus;
use crate::segment::Backing;
use crate::{BusError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Root YAML document structure.
#[derive(Debug, Deserialize)]
pub struct ProfileDoc {
    /// Named bus profiles.
    #[serde(default)]
    pub profiles: HashMap<String, BusProfile>,

    /// Default profile name (optional).
    #[serde(default)]
    pub default_profile: Option<String>,
}

/// A single bus profile in YAML format.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BusProfile {
    /// Backing spec: `shm:/name` or `file:/path`
    pub backing: Option<String>,

    /// Slot count (creation only)
    pub slots: Option<u32>,

    /// Per-slot value capacity in bytes (creation only)
    pub max_value_size: Option<u32>,

    /// Scrub mode: `off`, `hybrid`, or `full`
    pub scrub: Option<String>,
}

impl ProfileDoc {
    /// Parse a YAML document from a string.
    pub fn from_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            log::warn!("[config] YAML parse failed: {e}");
            BusError::InvalidArgument("malformed bus profile document")
        })
    }

    /// Load a YAML document from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(BusError::SegmentOpen)?;
        Self::from_str(&text)
    }

    /// The named profile, or the document's default when `name` is `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<&BusProfile> {
        let name = name
            .or(self.default_profile.as_deref())
            .ok_or(BusError::InvalidArgument("no profile name and no default"))?;
        self.profiles
            .get(name)
            .ok_or(BusError::InvalidArgument("unknown profile name"))
    }
}

impl BusProfile {
    /// Resolve the backing spec into a [`Backing`].
    pub fn backing(&self) -> Result<Backing> {
        let spec = self
            .backing
            .as_deref()
            .ok_or(BusError::InvalidArgument("profile has no backing"))?;
        parse_backing(spec)
    }

    /// Open the profile's bus, creating it with the profile geometry when
    /// absent, and apply the profile's scrub mode.
    pub fn open_or_create(&self) -> Result<Bus> {
        let backing = self.backing()?;
        let slots = self.slots.unwrap_or(1024);
        let max_val = self.max_value_size.unwrap_or(4096);

        let bus = Bus::open_or_create(&backing, slots, max_val)?;

        match self.scrub.as_deref() {
            None | Some("off") => bus.set_auto_scrub(false),
            Some("full") => bus.set_auto_scrub(true),
            Some("hybrid") => bus.set_hybrid_auto_scrub(),
            Some(_) => return Err(BusError::InvalidArgument("unknown scrub mode")),
        }
        Ok(bus)
    }
}

/// Parse `shm:/name` or `file:/path`. A bare `/name` is taken as shm, the
/// convention the CLI inherited from the original tooling.
pub fn parse_backing(spec: &str) -> Result<Backing> {
    if let Some(name) = spec.strip_prefix("shm:") {
        Backing::shm(name)
    } else if let Some(path) = spec.strip_prefix("file:") {
        Ok(Backing::file(path))
    } else if spec.starts_with('/') {
        Backing::shm(spec)
    } else {
        Err(BusError::InvalidName(spec.to_string()))
    }
}
