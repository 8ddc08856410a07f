//   precache
//   Copyright (C) 2017 The 8472
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Precache Driver: orchestrates EQ -> SP sort -> RD over a set of paths,
//! enforcing a byte budget on the logical file sizes queued.

use std::path::PathBuf;

use crate::bpr::Bpr;
use crate::config::PrecacheConfig;
use crate::error::Result;
use crate::extent;
use crate::reader;
use crate::segment::SegmentPool;

/// Runs one precache event over `paths`: optionally syncs dirty pages, then
/// enumerates, sorts and reads extents up to `config.limit_bytes` of
/// cumulative logical file size. Returns the number of files actually
/// queued (i.e. that fit under the budget and were handed to EQ), which a
/// caller like the Readdir FSM uses to size its cached-files window.
///
/// Fails with `PrecacheError::OutOfMemory` if the segment pool can't grow to
/// hold a newly discovered extent; every other per-file failure (missing
/// file, resolve/open/ioctl error) is swallowed per EQ's best-effort
/// contract and simply yields fewer segments.
pub fn precache_paths<I>(bpr: &mut Bpr, paths: I, config: &PrecacheConfig) -> Result<usize>
where
    I: IntoIterator<Item = PathBuf>,
{
    if config.sync_first {
        unsafe {
            libc::sync();
        }
    }

    let mut pool = SegmentPool::new();
    let mut cumulative = 0u64;
    let mut queued = 0usize;

    for path in paths {
        let size = match std::fs::symlink_metadata(&path) {
            Ok(meta) => meta.len(),
            Err(_) => continue,
        };

        if cumulative.saturating_add(size) > config.limit_bytes {
            log::debug!("precache budget exhausted before {path:?}, stopping");
            break;
        }
        cumulative += size;
        queued += 1;

        pool.try_extend(extent::enumerate(bpr, &path))?;
    }

    log::debug!("precache driver queued {queued} files, {} segments", pool.len());

    pool.sort_by_physical_pos();

    for segment in pool.iter() {
        reader::read_segment_from_file(segment);
    }

    pool.clear();
    Ok(queued)
}
