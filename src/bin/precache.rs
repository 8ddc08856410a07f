//   precache
//   Copyright (C) 2017 The 8472
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `precache <file>...` -- enumerate, sort, read back the files named on the
//! command line (or, when stdin is not a tty, one path per line on stdin).

use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;

use precache::bpr::Bpr;
use precache::{config, driver, PrecacheError};

fn main() -> ExitCode {
    env_logger::init();

    let paths = match gather_paths() {
        Ok(paths) => paths,
        Err(PrecacheError::Usage(msg)) => {
            eprintln!("precache: {msg}");
            return ExitCode::from(2);
        }
        Err(e) => {
            eprintln!("precache: {e}");
            return ExitCode::from(1);
        }
    };

    let mut bpr = Bpr::new();
    match driver::precache_paths(&mut bpr, paths, config::config()) {
        Ok(queued) => {
            log::info!("precache: queued {queued} files");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("precache: {e}");
            ExitCode::from(1)
        }
    }
}

/// Gathers the file list from argv, falling back to one path per line on
/// stdin when no arguments were given and stdin is not a tty. Fails with
/// `PrecacheError::Usage` if neither source yields any paths.
fn gather_paths() -> precache::Result<Vec<PathBuf>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let paths: Vec<PathBuf> = if args.is_empty() {
        read_stdin_paths().ok_or(PrecacheError::Usage(
            "usage: precache <file>... (or pipe paths on stdin)",
        ))?
    } else {
        args.into_iter().map(PathBuf::from).collect()
    };

    if paths.is_empty() {
        return Err(PrecacheError::Usage(
            "usage: precache <file>... (or pipe paths on stdin)",
        ));
    }

    Ok(paths)
}

/// Reads one path per line from stdin, or `None` if stdin is a tty (in
/// which case there is no implicit input to read).
fn read_stdin_paths() -> Option<Vec<PathBuf>> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return None;
    }

    let paths = stdin
        .lock()
        .lines()
        .map_while(Result::ok)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect();

    Some(paths)
}
