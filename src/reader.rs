//   precache
//   Copyright (C) 2017 The 8472
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reader: streams segments off disk to warm the page cache. The content
//! read is discarded -- only the side effect (the kernel caching the pages)
//! matters.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use crate::segment::Segment;

const READ_BUF_SIZE: usize = 512 * 1024;

/// Opens `segment.file_name` and reads its range, populating that file's page
/// cache entries. Returns the number of bytes actually read; `0` on any
/// non-retryable error, since a single segment's failure is not fatal to the
/// overall precache event.
pub fn read_segment_from_file(segment: &Segment) -> u64 {
    let file = match File::open(&segment.file_name) {
        Ok(f) => f,
        Err(_) => return 0,
    };
    read_positioned(&file, segment.file_offset, segment.length)
}

/// Reads `segment`'s range from an already-open block device at its physical
/// position, pre-staging those blocks into the device's cache.
pub fn read_segment_from_device(device: &File, segment: &Segment) -> u64 {
    read_positioned(device, segment.physical_pos, segment.length)
}

fn read_positioned(file: &File, mut offset: u64, mut remaining: u64) -> u64 {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut total = 0u64;

    while remaining > 0 {
        let want = remaining.min(READ_BUF_SIZE as u64) as usize;
        match file.read_at(&mut buf[..want], offset) {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                offset += n as u64;
                remaining -= n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn reads_exact_range() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data = vec![7u8; 1_000_000];
        tmp.write_all(&data).unwrap();

        let segment = Segment::new(PathBuf::from(tmp.path()), 0, 100, 900_000);
        let n = read_segment_from_file(&segment);
        assert_eq!(n, 900_000);
    }

    #[test]
    fn missing_file_reads_zero() {
        let segment = Segment::new(PathBuf::from("/nonexistent/file/for/precache"), 0, 0, 10);
        assert_eq!(read_segment_from_file(&segment), 0);
    }
}
