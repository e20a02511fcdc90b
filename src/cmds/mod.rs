// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

use base::{err, Error};
use nix::fcntl::{flock, FlockArg};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use tracing::info;

pub mod check;
pub mod init;
pub mod run;
pub mod sql;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum OpenMode {
    ReadOnly,
    ReadWrite,
    Create,
}

/// An open, flocked database directory. The lock lasts as long as the file
/// is open; keep it alive as long as the `Connection` is.
#[derive(Debug)]
struct DirLock(#[allow(dead_code)] std::fs::File);

/// Locks the directory without opening the database.
fn open_dir(db_dir: &Path, mode: OpenMode) -> Result<DirLock, Error> {
    if mode == OpenMode::Create {
        std::fs::create_dir_all(db_dir).map_err(|e| {
            err!(
                Unknown,
                msg("unable to create db dir {}", db_dir.display()),
                source(e)
            )
        })?;
    }
    let dir = std::fs::File::open(db_dir).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            err!(
                NotFound,
                msg(
                    "db dir {} not found; try running skylight-dvr init",
                    db_dir.display()
                ),
                source(e)
            )
        } else {
            err!(
                Unknown,
                msg("unable to open db dir {}", db_dir.display()),
                source(e)
            )
        }
    })?;
    let ro = mode == OpenMode::ReadOnly;
    flock(
        dir.as_raw_fd(),
        if ro {
            FlockArg::LockSharedNonblock
        } else {
            FlockArg::LockExclusiveNonblock
        },
    )
    .map_err(|e| {
        err!(
            Unavailable,
            msg(
                "unable to get {} lock on db dir {}; is another process running?",
                if ro { "shared" } else { "exclusive" },
                db_dir.display()
            ),
            source(e)
        )
    })?;
    Ok(DirLock(dir))
}

/// Locks and opens the database.
/// The returned `DirLock` holds the lock and should be kept open as long as the `Connection` is.
fn open_conn(db_dir: &Path, mode: OpenMode) -> Result<(DirLock, rusqlite::Connection), Error> {
    let dir = open_dir(db_dir, mode)?;
    let db_path = db_dir.join("db");
    info!(
        "Opening {} in {:?} mode with SQLite version {}",
        db_path.display(),
        mode,
        rusqlite::version()
    );
    let conn = rusqlite::Connection::open_with_flags(
        db_path,
        match mode {
            OpenMode::ReadOnly => rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenMode::ReadWrite => rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::Create => {
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
            }
        } |
        // rusqlite::Connection is not Sync, so there's no reason to tell SQLite3 to use the
        // serialized threading mode.
        rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok((dir, conn))
}
