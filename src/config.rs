//   precache
//   Copyright (C) 2017 The 8472
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Environment-derived settings, read once and cached for the process lifetime.

use std::sync::OnceLock;

/// Default byte budget for a single precache event: 1 GiB.
pub const DEFAULT_LIMIT_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct PrecacheConfig {
    pub limit_bytes: u64,
    pub sync_first: bool,
}

impl Default for PrecacheConfig {
    fn default() -> Self {
        PrecacheConfig {
            limit_bytes: DEFAULT_LIMIT_BYTES,
            sync_first: true,
        }
    }
}

static CONFIG: OnceLock<PrecacheConfig> = OnceLock::new();

/// Returns the process-wide configuration, reading `PRECACHE_LIMIT` and
/// `PRECACHE_SYNC` from the environment the first time it's called.
/// Subsequent changes to the environment have no effect.
pub fn config() -> &'static PrecacheConfig {
    CONFIG.get_or_init(|| {
        let limit_bytes = std::env::var("PRECACHE_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_LIMIT_BYTES);

        let sync_first = std::env::var("PRECACHE_SYNC")
            .ok()
            .map(|v| v != "0")
            .unwrap_or(true);

        log::debug!(
            "precache config: limit_bytes={limit_bytes} sync_first={sync_first}"
        );

        PrecacheConfig {
            limit_bytes,
            sync_first,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec() {
        let cfg = PrecacheConfig::default();
        assert_eq!(cfg.limit_bytes, 1_073_741_824);
        assert!(cfg.sync_first);
    }
}
