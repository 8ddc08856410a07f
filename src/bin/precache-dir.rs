//   precache
//   Copyright (C) 2017 The 8472
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `precache-dir <root> [raw-device]` -- BFS-walks `root`, reading every
//! file it contains off the raw device in physical order. The device is
//! auto-guessed from `/proc/mounts` when omitted.

use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let root = match args.first() {
        Some(r) => PathBuf::from(r),
        None => {
            eprintln!("usage: precache-dir <root> [raw-device]");
            return ExitCode::from(2);
        }
    };

    let device = args.get(1).map(PathBuf::from);

    match precache::walker::walk(&root, device.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(precache::PrecacheError::Usage(msg)) => {
            eprintln!("precache-dir: {msg}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("precache-dir: {e}");
            ExitCode::from(1)
        }
    }
}
