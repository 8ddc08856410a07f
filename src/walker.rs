//   precache
//   Copyright (C) 2017 The 8472
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Directory Walker: iterative, level-by-level BFS over a directory tree,
//! bounded to a single filesystem, used by the standalone "precache a
//! directory tree" mode. Reads go through the raw block device rather than
//! individual files, since a whole tree typically exceeds any reasonable
//! page-cache budget.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::fs::File;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::dir::Dir;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

use crate::bpr::Bpr;
use crate::error::{PrecacheError, Result};
use crate::extent;
use crate::reader;
use crate::segment::SegmentPool;

/// Walks `root`, streaming every file it contains (and every subdirectory
/// entry, harmlessly, since extent queries on non-regular files yield
/// nothing) through the raw device that backs `root`, one BFS level at a
/// time, in physical order.
pub fn walk(root: &Path, device: Option<&Path>) -> Result<()> {
    let root_meta = std::fs::metadata(root)?;
    let root_dev = root_meta.dev();

    let device_path = match device {
        Some(d) => d.to_path_buf(),
        None => guess_device(root)
            .ok_or(PrecacheError::Usage("could not guess backing device for root, pass one explicitly"))?,
    };

    let dev_file = File::open(&device_path).map_err(|source| PrecacheError::DeviceOpenFailed {
        path: device_path.display().to_string(),
        source,
    })?;

    let mut bpr = Bpr::new();
    let mut frontier: VecDeque<PathBuf> = VecDeque::new();
    frontier.push_back(root.to_path_buf());

    while !frontier.is_empty() {
        let mut pool = SegmentPool::new();

        for dir in &frontier {
            let entries = match std::fs::read_dir(dir) {
                Ok(e) => e,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                pool.try_extend(extent::enumerate(&mut bpr, &entry.path()))?;
            }
        }

        pool.sort_by_physical_pos();
        for segment in pool.iter() {
            reader::read_segment_from_device(&dev_file, segment);
        }
        pool.clear();

        let mut next_frontier = VecDeque::new();
        for dir in &frontier {
            next_frontier.extend(subdirs_on_same_device(dir, root_dev));
        }
        frontier = next_frontier;
    }

    Ok(())
}

/// Scans `dir` via a raw directory-read, keeping subdirectories whose
/// `st_dev` equals `root_dev` and rejecting `.`/`..`.
fn subdirs_on_same_device(dir: &Path, root_dev: u64) -> Vec<PathBuf> {
    let mut out = Vec::new();

    let mut handle = match Dir::open(dir, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty()) {
        Ok(d) => d,
        Err(_) => return out,
    };

    while let Some(entry) = handle.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => break,
        };
        let name = entry.file_name();
        if name.to_bytes() == b"." || name.to_bytes() == b".." {
            continue;
        }

        let child = dir.join(OsStr::from_bytes(name.to_bytes()));
        match std::fs::symlink_metadata(&child) {
            Ok(meta) if meta.is_dir() && meta.dev() == root_dev => out.push(child),
            _ => {}
        }
    }

    out
}

/// Reads `/proc/mounts` and returns the device backing the mount point that
/// shares the longest prefix with `root`, among entries whose device path
/// starts with `/`.
fn guess_device(root: &Path) -> Option<PathBuf> {
    let mounts = mnt::MountIter::new_from_proc().ok()?;
    let root_str = root.to_string_lossy().into_owned();

    let mut best: Option<(usize, PathBuf)> = None;
    for entry in mounts.flatten() {
        let mount_point = entry.file.to_string_lossy().into_owned();
        if !root_str.starts_with(mount_point.as_str()) {
            continue;
        }

        let spec_str = entry.spec.to_string_lossy();
        if !spec_str.starts_with('/') {
            continue;
        }

        let len = mount_point.len();
        let better = best.as_ref().map(|(best_len, _)| len > *best_len).unwrap_or(true);
        if better {
            best = Some((len, entry.spec.clone()));
        }
    }

    best.map(|(_, spec)| spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subdirs_for_missing_dir() {
        let subs = subdirs_on_same_device(Path::new("/nonexistent/for/precache/tests"), 0);
        assert!(subs.is_empty());
    }
}
