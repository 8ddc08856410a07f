//   precache
//   Copyright (C) 2017 The 8472
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Physical-order precaching of file contents ahead of bulk reads on
//! spinning disks.
//!
//! Reads a file's physical extent map (`FS_IOC_FIEMAP`), sorts extents
//! across a whole set of files by their on-disk position, and streams them
//! into the page cache in that order -- so that whichever tool goes on to
//! actually read the files does so with the drive head already warmed up in
//! roughly the right order, instead of seeking back and forth following
//! whatever order the caller happened to ask for.
//!
//! [`bpr`] resolves paths through an EncFS overlay to their backing files
//! before extent queries are made. [`fsm`] and [`engine`] implement the
//! heuristic that decides when a host process is bulk-copying a directory
//! and should be precached ahead of; [`walker`] implements the standalone
//! whole-tree mode used by the `precache-dir` binary.

pub mod bpr;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod extent;
pub mod fsm;
pub mod reader;
pub mod segment;
pub mod walker;

pub use config::PrecacheConfig;
pub use engine::Engine;
pub use error::{PrecacheError, Result};
pub use segment::{Segment, SegmentPool};
