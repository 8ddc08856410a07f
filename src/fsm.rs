//   precache
//   Copyright (C) 2017 The 8472
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Readdir FSM: detects the `readdir, open, readdir, open, readdir, open...`
//! interleave that characterizes a bulk-copy tool iterating a directory, and
//! decides when the Precache Driver should be triggered.

use std::path::PathBuf;

/// States of the per-directory-handle state machine. `DoPrecache` is
/// absorbing with respect to further state transitions -- once reached, both
/// events self-loop; only the cached-files counter keeps changing, via
/// [`on_readdir`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Start,
    R1O0,
    R1O1,
    R2O1,
    R2O2,
    R3O2,
    DoPrecache,
    Skip,
}

/// Per-open-directory-handle state, named directly after the data model.
#[derive(Debug)]
pub struct DirHandleState {
    pub dirname: PathBuf,
    /// Every child the directory had at `opendir` time, pre-drained so that
    /// at trigger time the not-yet-returned files are already known without
    /// re-reading the directory.
    pub buffered_dirents: Vec<PathBuf>,
    /// Index of the next dirent `on_readdir` will return.
    pub cursor: usize,
    pub cached_files_remaining: u64,
    pub fsm: State,
}

impl DirHandleState {
    pub fn new(dirname: PathBuf, buffered_dirents: Vec<PathBuf>) -> DirHandleState {
        DirHandleState {
            dirname,
            buffered_dirents,
            cursor: 0,
            cached_files_remaining: 0,
            fsm: State::Start,
        }
    }

    /// Resets to `Start`, as if the directory had just been opened again.
    pub fn rewind(&mut self) {
        self.cursor = 0;
        self.cached_files_remaining = 0;
        self.fsm = State::Start;
    }
}

/// Serves the next buffered dirent (or `None` once exhausted), advancing the
/// state machine on a real readdir event and decrementing the cached-files
/// window if one is open.
pub fn on_readdir(state: &mut DirHandleState) -> Option<PathBuf> {
    if state.cursor >= state.buffered_dirents.len() {
        return None;
    }

    let entry = state.buffered_dirents[state.cursor].clone();
    state.cursor += 1;

    state.fsm = match state.fsm {
        State::Start => State::R1O0,
        State::R1O0 => State::Skip,
        State::R1O1 => State::R2O1,
        State::R2O1 => State::Skip,
        State::R2O2 => State::R3O2,
        State::R3O2 => State::Skip,
        State::DoPrecache => State::DoPrecache,
        State::Skip => State::Skip,
    };

    if state.cached_files_remaining > 0 {
        state.cached_files_remaining -= 1;
    }

    Some(entry)
}

/// Advances the state machine for an open-in-dir event. Returns `true` the
/// first time this call transitions the state into `DoPrecache` while no
/// cached-files window is currently open -- i.e. exactly the moment the
/// Precache Driver should be invoked over `state.buffered_dirents[cursor -
/// 1..]` (the entry just opened, onward).
pub fn on_open_in_dir(state: &mut DirHandleState) -> bool {
    let prev = state.fsm;

    state.fsm = match prev {
        State::Start => State::Skip,
        State::R1O0 => State::R1O1,
        State::R1O1 => State::Skip,
        State::R2O1 => State::R2O2,
        State::R2O2 => State::Skip,
        State::R3O2 => State::DoPrecache,
        State::DoPrecache => State::DoPrecache,
        State::Skip => State::Skip,
    };

    prev == State::R3O2 && state.fsm == State::DoPrecache && state.cached_files_remaining == 0
}

/// True iff `fname` is a direct child of `dirname`, i.e. begins with
/// `dirname` followed by `/` and contains no further `/` beyond that.
pub fn is_direct_child(dirname: &std::path::Path, fname: &std::path::Path) -> bool {
    use std::os::unix::ffi::OsStrExt;

    let dir_bytes = dirname.as_os_str().as_bytes();
    let fname_bytes = fname.as_os_str().as_bytes();

    if !fname_bytes.starts_with(dir_bytes) || fname_bytes.len() <= dir_bytes.len() {
        return false;
    }
    if fname_bytes[dir_bytes.len()] != b'/' {
        return false;
    }

    !fname_bytes[dir_bytes.len() + 1..].contains(&b'/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/d/e{i}"))).collect()
    }

    #[test]
    fn trigger_exactness_on_third_open() {
        // S3 / property 5: R.R.R.O.O.O fires exactly once, on the third open.
        let mut state = DirHandleState::new(PathBuf::from("/d"), entries(5));

        on_readdir(&mut state); // e0
        assert!(!on_open_in_dir(&mut state));
        on_readdir(&mut state); // e1
        assert!(!on_open_in_dir(&mut state));
        on_readdir(&mut state); // e2
        assert!(on_open_in_dir(&mut state));
        assert_eq!(state.fsm, State::DoPrecache);

        // cursor is now 3 (e0,e1,e2 consumed); the trigger should cover
        // buffered_dirents[cursor-1..] = e2..e4
        let remaining = &state.buffered_dirents[state.cursor - 1..];
        assert_eq!(remaining, &entries(5)[2..]);
    }

    #[test]
    fn veto_on_two_readdirs_then_open() {
        // S4 / property: R.R then Skip, no open ever triggers.
        let mut state = DirHandleState::new(PathBuf::from("/d"), entries(5));
        on_readdir(&mut state);
        on_readdir(&mut state);
        assert_eq!(state.fsm, State::Skip);
        assert!(!on_open_in_dir(&mut state));
        assert_eq!(state.fsm, State::Skip);
    }

    #[test]
    fn determinism_replaying_same_sequence() {
        let run = || {
            let mut state = DirHandleState::new(PathBuf::from("/d"), entries(5));
            on_readdir(&mut state);
            on_open_in_dir(&mut state);
            on_readdir(&mut state);
            on_open_in_dir(&mut state);
            state.fsm
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn rewind_resets_to_start() {
        let mut state = DirHandleState::new(PathBuf::from("/d"), entries(5));
        on_readdir(&mut state);
        on_readdir(&mut state);
        state.rewind();
        assert_eq!(state.fsm, State::Start);
        assert_eq!(state.cursor, 0);
    }

    #[test]
    fn direct_child_matching() {
        assert!(is_direct_child(std::path::Path::new("/d"), std::path::Path::new("/d/e0")));
        assert!(!is_direct_child(std::path::Path::new("/d"), std::path::Path::new("/d/sub/e0")));
        assert!(!is_direct_child(std::path::Path::new("/d"), std::path::Path::new("/other/e0")));
    }
}
