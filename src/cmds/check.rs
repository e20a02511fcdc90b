// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Subcommand to check the database and the file-location tables for
//! inconsistencies.

use base::clock;
use base::Error;
use bpaf::Bpaf;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Checks database and file consistency.
#[derive(Bpaf, Debug)]
#[bpaf(command("check"))]
pub struct Args {
    #[bpaf(external(crate::parse_db_dir))]
    db_dir: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let (_db_dir, conn) = super::open_conn(&args.db_dir, super::OpenMode::ReadOnly)?;
    let db = db::Database::new(clock::RealClocks {}, conn)?;
    let l = db.lock();
    let mut problems = 0;

    for (kind, rows) in [
        ("raw", l.list_raw_files()?),
        ("transcoded", l.list_transcoded_files()?),
        ("bif", l.list_bif_files()?),
    ] {
        for row in rows {
            if !Path::new(&row.filename).is_file() {
                problems += 1;
                error!(
                    kind,
                    recording_id = row.recording_id,
                    file = %row.filename,
                    "file referenced by database is missing on disk"
                );
            }
        }
    }

    // Failed captures leave a recording row with no files at all; the reaper
    // never touches them, so they stay until someone deletes the recording.
    for recording_id in l.recordings_without_files()? {
        problems += 1;
        warn!(recording_id, "recording has no files (failed capture?)");
    }

    for row in l.transcode_failures()? {
        problems += 1;
        warn!(
            recording_id = row.recording_id,
            "transcode failed; delete the transcoded row to retry"
        );
    }

    if problems == 0 {
        info!("no problems found");
        Ok(0)
    } else {
        error!(problems, "found problems");
        Ok(1)
    }
}
