//   precache
//   Copyright (C) 2017 The 8472
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Extent Query: resolves a path via the [`Bpr`](crate::bpr::Bpr) and asks the
//! filesystem for its physical extent map via `FS_IOC_FIEMAP`.

use std::alloc::{alloc_zeroed, handle_alloc_error, Layout};
use std::fs::File;
use std::mem;
use std::os::unix::io::AsRawFd;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::bpr::Bpr;
use crate::segment::Segment;

const EXTENT_COUNT: usize = 1000;
const FIEMAP_EXTENT_LAST: u32 = 0x0000_0001;

#[repr(C)]
struct FiemapExtentRaw {
    fe_logical: u64,
    fe_physical: u64,
    fe_length: u64,
    fe_reserved64: [u64; 2],
    fe_flags: u32,
    fe_reserved: [u32; 3],
}

#[repr(C)]
struct FiemapRaw {
    fm_start: u64,
    fm_length: u64,
    fm_flags: u32,
    fm_mapped_extents: u32,
    fm_extent_count: u32,
    fm_reserved: u32,
    fm_extents: [FiemapExtentRaw; EXTENT_COUNT],
}

// size of the fiemap header alone, without the trailing extents array -- the
// ioctl request code must be computed from this, not from size_of::<FiemapRaw>().
const FIEMAP_HEADER_SIZE: u32 =
    (mem::size_of::<FiemapRaw>() - mem::size_of::<[FiemapExtentRaw; EXTENT_COUNT]>()) as u32;

mod ioctl {
    use nix::{ioctl_readwrite_bad, request_code_readwrite};
    ioctl_readwrite_bad!(
        fs_ioc_fiemap,
        request_code_readwrite!(b'f', 11, super::FIEMAP_HEADER_SIZE),
        super::FiemapRaw
    );
}

/// Allocates a zeroed `FiemapRaw` directly on the heap. `Box::new(zeroed())`
/// would build the ~56 KB value on the stack first and move it into the
/// box afterwards; this goes straight through the allocator instead. Every
/// field of `FiemapRaw` is a plain integer, so the all-zero bit pattern is a
/// valid value.
fn zeroed_fiemap_box() -> Box<FiemapRaw> {
    let layout = Layout::new::<FiemapRaw>();
    unsafe {
        let ptr = alloc_zeroed(layout) as *mut FiemapRaw;
        if ptr.is_null() {
            handle_alloc_error(layout);
        }
        Box::from_raw(ptr)
    }
}

/// Returns the segments covering `path`, after resolving it through `bpr`.
/// Best-effort: any I/O error along the way yields an empty (or partial)
/// result rather than propagating, per the component's "swallow and
/// continue" contract.
pub fn enumerate(bpr: &mut Bpr, path: &Path) -> Vec<Segment> {
    let resolved = bpr.resolve(path);

    let file = match File::open(&resolved) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };

    let file_size = match file.metadata() {
        Ok(meta) => meta.size(),
        Err(_) => return Vec::new(),
    };

    let mut segments = Vec::new();
    let mut req: Box<FiemapRaw> = zeroed_fiemap_box();
    req.fm_extent_count = EXTENT_COUNT as u32;
    req.fm_length = u64::MAX;

    let fd = file.as_raw_fd();
    let mut fm_start = 0u64;

    loop {
        req.fm_start = fm_start;

        if unsafe { ioctl::fs_ioc_fiemap(fd, req.as_mut()) }.is_err() {
            break;
        }

        if req.fm_mapped_extents == 0 {
            break;
        }

        let mut last_logical = fm_start;
        let mut last_length = 0u64;
        let mut saw_last = false;

        for extent in req.fm_extents.iter().take(req.fm_mapped_extents as usize) {
            last_logical = extent.fe_logical;
            last_length = extent.fe_length;

            if extent.fe_flags & FIEMAP_EXTENT_LAST != 0 {
                saw_last = true;
            }

            if extent.fe_logical > file_size {
                continue;
            }

            let clamped_length = extent
                .fe_length
                .min(file_size.saturating_sub(extent.fe_logical));

            if clamped_length == 0 {
                continue;
            }

            segments.push(Segment::new(
                resolved.clone(),
                extent.fe_physical,
                extent.fe_logical,
                clamped_length,
            ));
        }

        if saw_last {
            break;
        }

        let next_start = last_logical.saturating_add(last_length);
        if next_start >= file_size || next_start <= fm_start {
            break;
        }
        fm_start = next_start;
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_excludes_extent_array() {
        assert!(FIEMAP_HEADER_SIZE < 64);
        assert!(FIEMAP_HEADER_SIZE >= 24);
    }

    #[test]
    fn enumerate_on_missing_file_is_empty() {
        let mut bpr = Bpr::new();
        let segments = enumerate(&mut bpr, Path::new("/nonexistent/path/for/precache/tests"));
        assert!(segments.is_empty());
    }
}
