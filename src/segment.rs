//   precache
//   Copyright (C) 2017 The 8472
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use crate::error::{PrecacheError, Result};

/// One physically-contiguous range of a file, carrying the path it belongs to.
///
/// Invariants (enforced by whoever constructs a `Segment`, see [`crate::extent`]):
/// `length > 0` and `file_offset + length <= file size at enumeration time`.
#[derive(Debug, Clone)]
pub struct Segment {
    pub file_name: PathBuf,
    pub physical_pos: u64,
    pub file_offset: u64,
    pub length: u64,
}

impl Segment {
    pub fn new(file_name: PathBuf, physical_pos: u64, file_offset: u64, length: u64) -> Segment {
        Segment {
            file_name,
            physical_pos,
            file_offset,
            length,
        }
    }
}

/// An append-only collection of [`Segment`]s with global sort-by-physical-position.
///
/// Segments are never removed individually before a full free, so a plain
/// growable vector gives us everything the design notes ask for (append,
/// stable sort, iteration, destroy-all) without intrusive list bookkeeping.
#[derive(Debug, Default)]
pub struct SegmentPool {
    segments: Vec<Segment>,
}

impl SegmentPool {
    pub fn new() -> SegmentPool {
        SegmentPool {
            segments: Vec::new(),
        }
    }

    pub fn append(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    pub fn extend(&mut self, segments: impl IntoIterator<Item = Segment>) {
        self.segments.extend(segments);
    }

    /// Like [`Self::append`], but reports allocator exhaustion instead of
    /// aborting the process, for callers on the boundary named in the error
    /// taxonomy (a precache event driven from the CLI or the FSM trigger).
    pub fn try_append(&mut self, segment: Segment) -> Result<()> {
        self.segments.try_reserve(1).map_err(|_| PrecacheError::OutOfMemory)?;
        self.segments.push(segment);
        Ok(())
    }

    /// Like [`Self::extend`], but fails the whole batch as soon as one
    /// segment can't be reserved.
    pub fn try_extend(&mut self, segments: impl IntoIterator<Item = Segment>) -> Result<()> {
        for segment in segments {
            self.try_append(segment)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Stable sort by ascending physical position. No tie-breaker is specified
    /// by the design; a stable sort keeps insertion order among ties.
    pub fn sort_by_physical_pos(&mut self) {
        self.segments.sort_by_key(|s| s.physical_pos);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    /// Destroys the pool, releasing every segment's owned path.
    pub fn clear(&mut self) {
        self.segments.clear();
    }
}

impl IntoIterator for SegmentPool {
    type Item = Segment;
    type IntoIter = std::vec::IntoIter<Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(phys: u64) -> Segment {
        Segment::new(PathBuf::from("/tmp/x"), phys, 0, 1)
    }

    #[test]
    fn sort_is_non_decreasing() {
        let mut pool = SegmentPool::new();
        for p in [40, 10, 30, 20] {
            pool.append(seg(p));
        }
        pool.sort_by_physical_pos();
        let positions: Vec<u64> = pool.iter().map(|s| s.physical_pos).collect();
        assert_eq!(positions, vec![10, 20, 30, 40]);
    }

    #[test]
    fn sort_is_stable_among_ties() {
        let mut pool = SegmentPool::new();
        pool.append(Segment::new(PathBuf::from("/a"), 5, 0, 1));
        pool.append(Segment::new(PathBuf::from("/b"), 5, 0, 1));
        pool.sort_by_physical_pos();
        let names: Vec<_> = pool.iter().map(|s| s.file_name.clone()).collect();
        assert_eq!(names, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }
}
