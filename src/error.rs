//   precache
//   Copyright (C) 2017 The 8472
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Errors that cross the CLI/setup boundary.
///
/// Every component below this (EQ, BPR, RD, the FSM, DW) is best-effort and
/// swallows its own failures per the error taxonomy in the design notes; this
/// type exists only for the handful of conditions that are genuinely fatal.
#[derive(Error, Debug)]
pub enum PrecacheError {
    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("could not open device {path}: {source}")]
    DeviceOpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("out of memory")]
    OutOfMemory,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PrecacheError>;
