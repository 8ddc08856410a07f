//   precache
//   Copyright (C) 2017 The 8472
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Engine: the process-wide owner of every shared map named in the data
//! model, behind one mutex. Exposes pure handlers for the interposed entry
//! points; it never calls the real syscalls itself, only reacts to their
//! outcomes as reported by its caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::bpr::Bpr;
use crate::config;
use crate::driver;
use crate::fsm::{self, DirHandleState};

/// Opaque handle identifying one `opendir` call, handed back to the caller
/// so it can be threaded through the matching `readdir`/`closedir`/
/// `rewinddir` calls.
pub type DirHandle = u64;

/// The `atfd` argument of an `openat` call. Only `Cwd` is matched against
/// open directory handles; see the Engine's `on_openat` doc comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtFd {
    Cwd,
    Other(i32),
}

struct State {
    bpr: Bpr,
    handles: BTreeMap<DirHandle, DirHandleState>,
    next_handle: DirHandle,
}

impl State {
    fn new() -> State {
        State {
            bpr: Bpr::new(),
            handles: BTreeMap::new(),
            next_handle: 1,
        }
    }
}

/// Process-wide shared state behind a single mutex, per the concurrency
/// model: every touch of the mount table, inode cache, or dirp→FSM map is
/// serialized by acquiring this lock for the handler's whole body.
pub struct Engine {
    state: Mutex<State>,
}

impl Engine {
    pub fn new() -> Engine {
        Engine {
            state: Mutex::new(State::new()),
        }
    }

    /// Registers a freshly opened directory, pre-draining its full dirent
    /// list up front so precache-time buffering needs no further directory
    /// reads.
    pub fn on_opendir(&self, dirname: PathBuf) -> DirHandle {
        let buffered = pre_drain(&dirname);

        let mut state = self.state.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.handles.insert(handle, DirHandleState::new(dirname, buffered));
        handle
    }

    /// Serves the next buffered dirent for `handle`, advancing its FSM.
    /// Returns `None` if `handle` is unknown or exhausted.
    pub fn on_readdir(&self, handle: DirHandle) -> Option<PathBuf> {
        let mut state = self.state.lock();
        let dir_state = state.handles.get_mut(&handle)?;
        fsm::on_readdir(dir_state)
    }

    pub fn on_rewinddir(&self, handle: DirHandle) {
        let mut state = self.state.lock();
        if let Some(dir_state) = state.handles.get_mut(&handle) {
            dir_state.rewind();
        }
    }

    pub fn on_closedir(&self, handle: DirHandle) {
        let mut state = self.state.lock();
        state.handles.remove(&handle);
    }

    /// Handles a plain `open(fname)`, equivalent to `openat(AT_FDCWD, fname)`.
    pub fn on_open(&self, fname: &Path) {
        self.on_openat(AtFd::Cwd, fname);
    }

    /// Matches `fname` against every open directory handle's recorded
    /// `dirname`, advancing the first match (in insertion order, which
    /// `BTreeMap`'s key order over monotonically-increasing handles
    /// preserves) whose FSM transitions into `DoPrecache` with no cached
    /// window already open.
    ///
    /// A non-`Cwd` `atfd` is currently a no-op: the original treats it the
    /// same way and it is unclear whether that is intentional, so this
    /// mirrors it rather than guessing at a fix. `atfd` is still accepted so
    /// that behavior can change here alone if that's ever resolved.
    pub fn on_openat(&self, atfd: AtFd, fname: &Path) {
        if atfd != AtFd::Cwd {
            return;
        }

        let mut state = self.state.lock();
        let State { bpr, handles, .. } = &mut *state;

        for dir_state in handles.values_mut() {
            if !fsm::is_direct_child(&dir_state.dirname, fname) {
                continue;
            }

            let triggered = fsm::on_open_in_dir(dir_state);
            if triggered {
                let remaining: Vec<PathBuf> =
                    dir_state.buffered_dirents[dir_state.cursor - 1..].to_vec();
                match driver::precache_paths(bpr, remaining, config::config()) {
                    Ok(queued) => dir_state.cached_files_remaining = queued as u64,
                    Err(e) => log::debug!("precache trigger failed: {e}"),
                }
            }
            return;
        }
    }

    /// Drains every shared map. Called explicitly from the CLI shutdown path
    /// (or implicitly via `Drop`) to mirror the "destructor at process exit"
    /// behavior named in the concurrency model.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.handles.clear();
        state.bpr.clear();
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pre_drain(dirname: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dirname) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };
    entries.flatten().map(|e| e.path()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn opendir_readdir_closedir_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a")).unwrap();

        let engine = Engine::new();
        let handle = engine.on_opendir(dir.path().to_path_buf());
        assert!(engine.on_readdir(handle).is_some());
        assert!(engine.on_readdir(handle).is_none());
        engine.on_closedir(handle);
        assert!(engine.on_readdir(handle).is_none());
    }

    #[test]
    fn non_cwd_openat_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        std::fs::File::create(&a).unwrap();

        let engine = Engine::new();
        let handle = engine.on_opendir(dir.path().to_path_buf());
        engine.on_readdir(handle);

        // Should not panic or advance anything observable; there is no
        // public way to peek at FSM state from outside, so this only
        // exercises that the call is accepted and returns.
        engine.on_openat(AtFd::Other(3), &a);
    }

    #[test]
    fn trigger_queues_and_opens_budget_window() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["e0", "e1", "e2", "e3", "e4"] {
            std::fs::File::create(dir.path().join(name))
                .unwrap()
                .write_all(b"x")
                .unwrap();
        }

        let engine = Engine::new();
        let handle = engine.on_opendir(dir.path().to_path_buf());

        for _ in 0..3 {
            let entry = engine.on_readdir(handle).unwrap();
            engine.on_open(&entry);
        }

        engine.on_closedir(handle);
    }
}
