//   precache
//   Copyright (C) 2017 The 8472
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Back-path Resolver: maps a path inside a FUSE/EncFS overlay to the
//! corresponding path on the backing filesystem, since extent maps only make
//! sense for the real on-disk file.

use std::collections::HashMap;
use std::ffi::{CString, OsStr};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::dir::Dir;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

const FUSE_SUPER_MAGIC: i64 = 0x65735546;
const STALE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct FrontBackMount {
    back_path: PathBuf,
    owner_pid: i32,
    pending_removal: bool,
}

/// Back-path Resolver. Owns the front→back mount table and the inode→path
/// cache named in the data model; these are process-wide shared state when
/// wrapped by [`crate::engine::Engine`], but the type itself has no locking
/// of its own so it can also be driven directly (e.g. by the CLI binaries,
/// single-threaded).
#[derive(Debug, Default)]
pub struct Bpr {
    mounts: HashMap<PathBuf, FrontBackMount>,
    inode_cache: HashMap<u64, PathBuf>,
    last_refresh: Option<Instant>,
}

impl Bpr {
    pub fn new() -> Bpr {
        Bpr::default()
    }

    /// Unconditionally rescans the EncFS mount table from `/proc/*/cmdline`.
    ///
    /// On failure to read `/proc` the previous state is preserved untouched,
    /// per the "mount-table unavailable" error case.
    pub fn force_refresh(&mut self) -> io::Result<()> {
        let processes = scan_encfs_processes()?;

        for mount in self.mounts.values_mut() {
            mount.pending_removal = true;
        }

        for (pid, back_dir, front_dir) in processes {
            match self.mounts.get_mut(&front_dir) {
                Some(existing) if existing.owner_pid == pid => {
                    existing.pending_removal = false;
                }
                Some(existing) => {
                    let old_back = existing.back_path.clone();
                    self.invalidate_inode_cache_under(&old_back);
                    self.mounts.insert(
                        front_dir,
                        FrontBackMount {
                            back_path: back_dir,
                            owner_pid: pid,
                            pending_removal: false,
                        },
                    );
                }
                None => {
                    self.mounts.insert(
                        front_dir,
                        FrontBackMount {
                            back_path: back_dir,
                            owner_pid: pid,
                            pending_removal: false,
                        },
                    );
                }
            }
        }

        let stale: Vec<PathBuf> = self
            .mounts
            .iter()
            .filter(|(_, m)| m.pending_removal)
            .map(|(front, _)| front.clone())
            .collect();

        for front in stale {
            if let Some(mount) = self.mounts.remove(&front) {
                self.invalidate_inode_cache_under(&mount.back_path);
            }
            log::debug!("encfs mount for {front:?} disappeared");
        }

        Ok(())
    }

    /// Rate-limits scans to at most one per wall-clock second, and skips the
    /// scan entirely if `probe_path` is not on a FUSE filesystem.
    pub fn refresh_if_stale(&mut self, probe_path: &Path) {
        if let Some(last) = self.last_refresh {
            if last.elapsed() < STALE_INTERVAL {
                return;
            }
        }

        if !is_fuse_fs(probe_path) {
            return;
        }

        if let Err(e) = self.force_refresh() {
            log::debug!("encfs mount table refresh failed: {e}");
        }
        self.last_refresh = Some(Instant::now());
    }

    /// Resolves `src_path` to the backing path, or a copy of `src_path` if it
    /// isn't on an overlay we know how to resolve.
    pub fn resolve(&mut self, src_path: &Path) -> PathBuf {
        self.refresh_if_stale(src_path);

        if !is_fuse_fs(src_path) {
            return src_path.to_path_buf();
        }

        let candidates: Vec<(PathBuf, PathBuf)> = self
            .mounts
            .iter()
            .filter(|(front, _)| is_path_prefix(front, src_path))
            .map(|(front, m)| (front.clone(), m.back_path.clone()))
            .collect();

        for (front, back) in candidates {
            if let Some(resolved) = self.try_resolve_via_mount(&front, &back, src_path) {
                return resolved;
            }
        }

        src_path.to_path_buf()
    }

    fn try_resolve_via_mount(
        &mut self,
        front_path: &Path,
        back_path: &Path,
        src_path: &Path,
    ) -> Option<PathBuf> {
        let meta = std::fs::symlink_metadata(src_path).ok()?;
        if !meta.file_type().is_file() {
            return None;
        }

        let ino = meta.ino();
        if let Some(cached) = self.inode_cache.get(&ino) {
            return Some(cached.clone());
        }

        let trace = build_inode_trace(src_path, front_path)?;
        self.follow_trace(back_path, &trace)
    }

    /// Follows `trace` (deepest-first) down from `back_path`, using the
    /// deepest already-cached ancestor as a head start, and caching every
    /// sibling seen along the way.
    fn follow_trace(&mut self, back_path: &Path, trace: &[u64]) -> Option<PathBuf> {
        let mut start_idx = trace.len();
        let mut current = back_path.to_path_buf();

        for (i, ino) in trace.iter().enumerate().skip(1) {
            if let Some(path) = self.inode_cache.get(ino) {
                start_idx = i;
                current = path.clone();
                break;
            }
        }

        let mut idx = start_idx;
        while idx > 0 {
            let target_ino = trace[idx - 1];
            current = scan_dir_for_inode(&current, target_ino, &mut self.inode_cache)?;
            idx -= 1;
        }

        Some(current)
    }

    fn invalidate_inode_cache_under(&mut self, back_path: &Path) {
        self.inode_cache.retain(|_, path| !path.starts_with(back_path));
    }

    /// Drops all process-wide state. Called from the Engine's teardown hook.
    pub fn clear(&mut self) {
        self.mounts.clear();
        self.inode_cache.clear();
    }
}

/// Builds the inode trace for `src_path`: the inode of `src_path` itself,
/// then each ancestor directory's inode, deepest-first, stopping just before
/// `front_path` (whose own inode is not part of the trace).
fn build_inode_trace(src_path: &Path, front_path: &Path) -> Option<Vec<u64>> {
    let mut trace = Vec::new();
    let mut cur = src_path.to_path_buf();

    loop {
        let meta = std::fs::symlink_metadata(&cur).ok()?;
        trace.push(meta.ino());

        if cur == front_path {
            trace.pop();
            break;
        }

        let parent = match cur.parent() {
            Some(p) if p != cur => p.to_path_buf(),
            _ => break,
        };

        if parent == front_path {
            break;
        }

        cur = parent;
    }

    if trace.is_empty() {
        return None;
    }

    Some(trace)
}

fn scan_dir_for_inode(
    dir: &Path,
    target_ino: u64,
    cache: &mut HashMap<u64, PathBuf>,
) -> Option<PathBuf> {
    let mut handle = Dir::open(dir, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty()).ok()?;
    let mut found = None;

    while let Some(entry) = handle.next() {
        let entry = entry.ok()?;
        let name = entry.file_name();
        if name.to_bytes() == b"." || name.to_bytes() == b".." {
            continue;
        }

        let child = dir.join(OsStr::from_bytes(name.to_bytes()));
        let ino = entry.ino();
        cache.insert(ino, child.clone());

        if ino == target_ino {
            found = Some(child);
        }
    }

    found
}

/// True iff `src_path` lives under `prefix`, matching on whole path
/// components (the boundary character must be `/` or end-of-string).
fn is_path_prefix(prefix: &Path, src_path: &Path) -> bool {
    let p = prefix.as_os_str().as_bytes();
    let f = src_path.as_os_str().as_bytes();
    if !f.starts_with(p) {
        return false;
    }
    f.len() == p.len() || f[p.len()] == b'/'
}

fn is_fuse_fs(path: &Path) -> bool {
    let cpath = match CString::new(path.as_os_str().as_bytes()) {
        Ok(c) => c,
        Err(_) => return false,
    };

    unsafe {
        let mut buf: libc::statfs = std::mem::zeroed();
        if libc::statfs(cpath.as_ptr(), &mut buf) != 0 {
            return false;
        }
        buf.f_type as i64 == FUSE_SUPER_MAGIC
    }
}

fn trim_trailing_slashes(raw: &[u8]) -> PathBuf {
    let mut end = raw.len();
    while end > 1 && raw[end - 1] == b'/' {
        end -= 1;
    }
    PathBuf::from(OsStr::from_bytes(&raw[..end]))
}

/// Scans `/proc/*/cmdline` for EncFS processes, returning
/// `(pid, back_dir, front_dir)` triples.
fn scan_encfs_processes() -> io::Result<Vec<(i32, PathBuf, PathBuf)>> {
    let mut out = Vec::new();

    for entry in std::fs::read_dir("/proc")? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        let pid: i32 = match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            Some(pid) => pid,
            None => continue,
        };

        let cmdline = match std::fs::read(entry.path().join("cmdline")) {
            Ok(data) => data,
            Err(_) => continue,
        };

        let tokens: Vec<&[u8]> = cmdline.split(|&b| b == 0).filter(|t| !t.is_empty()).collect();
        if tokens.first() != Some(&b"encfs".as_slice()) {
            continue;
        }

        let non_opts: Vec<&[u8]> = tokens[1..]
            .iter()
            .copied()
            .filter(|t| !t.starts_with(b"-"))
            .collect();

        if non_opts.len() < 2 {
            continue;
        }

        let back_dir = trim_trailing_slashes(non_opts[0]);
        let front_dir = trim_trailing_slashes(non_opts[1]);
        out.push((pid, back_dir, front_dir));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_prefix_matches_full_components_only() {
        assert!(is_path_prefix(Path::new("/mnt/enc"), Path::new("/mnt/enc")));
        assert!(is_path_prefix(Path::new("/mnt/enc"), Path::new("/mnt/enc/sub")));
        assert!(!is_path_prefix(Path::new("/mnt/enc"), Path::new("/mnt/encore")));
        assert!(!is_path_prefix(Path::new("/mnt/enc"), Path::new("/mnt/other")));
    }

    #[test]
    fn trims_trailing_slashes() {
        assert_eq!(trim_trailing_slashes(b"/mnt/enc///"), PathBuf::from("/mnt/enc"));
        assert_eq!(trim_trailing_slashes(b"/"), PathBuf::from("/"));
    }

    #[test]
    fn build_inode_trace_walks_up_to_front_path_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let file = sub.join("file");
        std::fs::File::create(&file).unwrap();

        let file_ino = std::fs::symlink_metadata(&file).unwrap().ino();
        let sub_ino = std::fs::symlink_metadata(&sub).unwrap().ino();

        let trace = build_inode_trace(&file, dir.path()).unwrap();
        assert_eq!(trace, vec![file_ino, sub_ino]);
    }

    #[test]
    fn build_inode_trace_direct_child_of_front_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::File::create(&file).unwrap();
        let file_ino = std::fs::symlink_metadata(&file).unwrap().ino();

        let trace = build_inode_trace(&file, dir.path()).unwrap();
        assert_eq!(trace, vec![file_ino]);
    }

    #[test]
    fn build_inode_trace_src_equal_to_front_path_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(build_inode_trace(dir.path(), dir.path()).is_none());
    }

    #[test]
    fn build_inode_trace_missing_path_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(build_inode_trace(&missing, dir.path()).is_none());
    }

    #[test]
    fn scan_dir_for_inode_finds_child_and_populates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::File::create(&a).unwrap();
        std::fs::File::create(&b).unwrap();
        let a_ino = std::fs::symlink_metadata(&a).unwrap().ino();
        let b_ino = std::fs::symlink_metadata(&b).unwrap().ino();

        let mut cache = HashMap::new();
        let found = scan_dir_for_inode(dir.path(), b_ino, &mut cache);

        assert_eq!(found, Some(b.clone()));
        assert_eq!(cache.get(&a_ino), Some(&a));
        assert_eq!(cache.get(&b_ino), Some(&b));
    }

    #[test]
    fn follow_trace_resolves_through_matching_back_tree() {
        let back_root = tempfile::tempdir().unwrap();
        let back_sub = back_root.path().join("bsub");
        std::fs::create_dir(&back_sub).unwrap();
        let back_file = back_sub.join("bfile");
        std::fs::File::create(&back_file).unwrap();

        // A trace built as if src_path and back_path shared inode numbers,
        // the way EncFS's reverse-lookup mode preserves them across the
        // overlay: [file_ino, sub_ino], deepest-first.
        let trace = vec![
            std::fs::symlink_metadata(&back_file).unwrap().ino(),
            std::fs::symlink_metadata(&back_sub).unwrap().ino(),
        ];

        let mut bpr = Bpr::new();
        let resolved = bpr.follow_trace(back_root.path(), &trace);
        assert_eq!(resolved, Some(back_file));
    }

    #[test]
    fn force_refresh_purges_mapping_for_vanished_process() {
        // No real "encfs" process owns pid 1 (it's always a different
        // process, typically init), so a refresh against the live /proc
        // must mark this stale mapping pending-removal and purge it,
        // invalidating any inode-cache entries under its back_path.
        let mut bpr = Bpr::new();
        bpr.mounts.insert(
            PathBuf::from("/mnt/enc"),
            FrontBackMount {
                back_path: PathBuf::from("/mnt/back"),
                owner_pid: 1,
                pending_removal: false,
            },
        );
        bpr.inode_cache.insert(42, PathBuf::from("/mnt/back/leftover"));

        bpr.force_refresh().unwrap();

        assert!(!bpr.mounts.contains_key(&PathBuf::from("/mnt/enc")));
        assert!(!bpr.inode_cache.contains_key(&42));
    }
}
