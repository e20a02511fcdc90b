// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Subcommand to create and initialize the database.

use base::Error;
use bpaf::Bpaf;
use std::path::PathBuf;
use tracing::info;

/// Initializes a database.
#[derive(Bpaf, Debug)]
#[bpaf(command("init"))]
pub struct Args {
    #[bpaf(external(crate::parse_db_dir))]
    db_dir: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let (_db_dir, mut conn) = super::open_conn(&args.db_dir, super::OpenMode::Create)?;

    // Check if the database has already been initialized.
    if let Some(v) = db::get_schema_version(&conn)? {
        info!("Database is already initialized with schema version {v}.");
        return Ok(0);
    }

    // WAL mode is the most efficient way to preserve database integrity.
    conn.execute_batch("pragma journal_mode = wal;")?;
    db::init(&mut conn)?;
    info!("Database initialized.");
    Ok(0)
}
