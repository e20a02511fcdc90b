// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Reconciles file-location rows against the authoritative `recording` table:
//! removes rows (and files) for deleted recordings, and raw captures whose
//! successful transcode supersedes them.

use base::clock::Clocks;
use base::Error;
use db::{Database, FileRef, LockedDatabase};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

pub struct Reaper<C: Clocks + Clone> {
    db: Arc<Database<C>>,
    sweep_lock: Mutex<()>,
}

impl<C: Clocks + Clone> Reaper<C> {
    pub fn new(db: Arc<Database<C>>) -> Self {
        Reaper {
            db,
            sweep_lock: Mutex::new(()),
        }
    }

    /// Hourly entry point. Sweeps run one at a time; phases run in a fixed
    /// order so a transcoded row always outlives the raw row it supersedes.
    pub fn tick(&self) {
        let _guard = self.sweep_lock.lock().unwrap();
        info!("purging unneeded files");
        debug!("purging unreferenced raw video records");
        self.purge(
            |l| l.orphaned_raw_files(),
            |l, id| l.delete_raw_file(id),
        );
        debug!("purging unreferenced transcoded video records");
        self.purge(
            |l| l.orphaned_transcoded_files(),
            |l, id| l.delete_transcoded_file(id),
        );
        debug!("purging unreferenced BIF records");
        self.purge(
            |l| l.orphaned_bif_files(),
            |l, id| l.delete_bif_file(id),
        );
        debug!("purging raw video files that have been transcoded");
        self.purge(
            |l| l.superseded_raw_files(),
            |l, id| l.delete_raw_file(id),
        );
    }

    fn purge(
        &self,
        query: impl Fn(&LockedDatabase) -> Result<Vec<FileRef>, Error>,
        delete_row: impl Fn(&mut LockedDatabase, i64) -> Result<bool, Error>,
    ) {
        let records = match query(&self.db.lock()) {
            Ok(r) => r,
            Err(e) => {
                error!(err = %e.chain(), "unable to query files to purge");
                return;
            }
        };
        for record in records {
            info!(file = %record.filename, "deleting file");
            match std::fs::remove_file(Path::new(&record.filename)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!(file = %record.filename, "file not found");
                }
                Err(e) => {
                    // Leave the row in place; the next sweep retries.
                    error!(file = %record.filename, err = %e, "unable to delete file");
                    continue;
                }
            }
            if let Err(e) = delete_row(&mut self.db.lock(), record.recording_id) {
                error!(
                    recording_id = record.recording_id,
                    err = %e.chain(),
                    "unable to delete file record"
                );
            }
        }
    }
}
