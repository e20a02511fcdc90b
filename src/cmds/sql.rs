// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Subcommand to run a SQLite shell.

use base::Error;
use bpaf::Bpaf;
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

/// Runs a SQLite shell on the database.
#[derive(Bpaf, Debug)]
#[bpaf(command("sql"))]
pub struct Args {
    #[bpaf(external(crate::parse_db_dir))]
    db_dir: PathBuf,

    /// Opens the database in read-only mode and locks it only for shared access.
    ///
    /// This can be run simultaneously with a running service.
    #[bpaf(switch)]
    read_only: bool,

    /// Arguments to pass to sqlite3.
    ///
    /// Use the -- separator to pass sqlite3 options, as in
    /// `skylight-dvr sql -- -line 'select * from recording'`.
    #[bpaf(positional("ARG"), many)]
    arg: Vec<OsString>,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let mode = if args.read_only {
        super::OpenMode::ReadOnly
    } else {
        super::OpenMode::ReadWrite
    };
    let _db_dir = super::open_dir(&args.db_dir, mode)?;
    let mut db = OsString::new();
    db.push("file:");
    db.push(&args.db_dir);
    db.push("/db");
    if args.read_only {
        db.push("?mode=ro");
    }
    Err(Command::new("sqlite3").arg(&db).args(&args.arg).exec().into())
}
