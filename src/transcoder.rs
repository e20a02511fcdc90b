// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Re-encodes raw captures into a streamable format, one per tick, picking a
//! preset from the measured source bitrate.

use crate::process::{self, Invoker};
use base::clock::Clocks;
use base::strutil::expand_placeholders;
use db::{Database, FileRef, TranscodeState};
use jiff::SignedDuration;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

const LOCATION_ID: i64 = 1;

/// Average bitrate of `path` in whole megabits per second; 0 when the file is
/// missing or the duration is zero (callers treat 0 as "unknown").
fn megabits_per_second(path: &Path, duration: SignedDuration) -> i64 {
    let Ok(metadata) = std::fs::metadata(path) else {
        return 0;
    };
    let seconds = duration.as_secs();
    if seconds == 0 {
        return 0;
    }
    (metadata.len() as i64 / seconds) / 125_000
}

pub struct Transcoder<C: Clocks + Clone, I: Invoker> {
    db: Arc<Database<C>>,
    low_command: String,
    medium_command: String,
    high_command: String,
    output_path_spec: String,
    log_path_spec: String,
    invoker: I,
    shutdown_rx: base::shutdown::Receiver,
    busy: AtomicBool,
}

impl<C: Clocks + Clone, I: Invoker> Transcoder<C, I> {
    pub fn new(
        db: Arc<Database<C>>,
        low_command: String,
        medium_command: String,
        high_command: String,
        output_path_spec: String,
        log_path_spec: String,
        invoker: I,
        shutdown_rx: base::shutdown::Receiver,
    ) -> Self {
        Transcoder {
            db,
            low_command,
            medium_command,
            high_command,
            output_path_spec,
            log_path_spec,
            invoker,
            shutdown_rx,
            busy: AtomicBool::new(false),
        }
    }

    /// Periodic entry point. A tick that finds another still in flight (the
    /// external encoder runs for minutes) returns immediately.
    pub fn tick(&self) {
        if self.busy.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tick_inner();
        self.busy.store(false, Ordering::SeqCst);
    }

    fn tick_inner(&self) {
        let awaiting = match self.db.lock().recordings_awaiting_transcode() {
            Ok(a) => a,
            Err(e) => {
                error!(err = %e.chain(), "unable to query recordings awaiting transcode");
                return;
            }
        };
        // One recording per tick: a deliberate throttle so a backlog doesn't
        // saturate the machine while captures are running.
        let Some(recording) = awaiting.first() else {
            return;
        };
        let recording_id = recording.recording_id;
        let duration = match self.db.lock().recording_duration(recording_id) {
            Ok(d) => d,
            Err(e) => {
                error!(recording_id, err = %e.chain(), "unable to query duration");
                return;
            }
        };
        let id_str = recording_id.to_string();
        let dest = expand_placeholders(&self.output_path_spec, &[("recordingID", &id_str)]);
        let state = if self.transcode(recording, duration) {
            info!(recording_id, "transcode successful");
            TranscodeState::Success
        } else {
            info!(recording_id, "transcode failed");
            TranscodeState::Failure
        };
        if let Err(e) = self
            .db
            .lock()
            .attach_transcoded(recording_id, LOCATION_ID, &dest, state)
        {
            error!(recording_id, err = %e.chain(), "unable to record transcode result");
        }
    }

    fn transcode(&self, recording: &FileRef, duration: SignedDuration) -> bool {
        let source = Path::new(&recording.filename);
        let rate = megabits_per_second(source, duration);
        info!(
            recording_id = recording.recording_id,
            rate, "source file bitrate (avg Mb/s)"
        );
        let template = match rate {
            0 => &self.medium_command, // unknown rate, take the middle road
            r if r < 3 => &self.low_command,
            r if r < 8 => &self.medium_command,
            _ => &self.high_command,
        };
        let id_str = recording.recording_id.to_string();
        let cmd = expand_placeholders(template, &[("recordingID", &id_str)]);
        let log = expand_placeholders(&self.log_path_spec, &[("recordingID", &id_str)]);
        info!(%cmd, "running transcoder");
        let argv: Vec<String> = cmd.split_whitespace().map(str::to_owned).collect();
        match process::run_until_done(
            &self.invoker,
            &argv,
            Path::new(&log),
            self.db.clocks(),
            &self.shutdown_rx,
        ) {
            Ok(0) => true,
            Ok(status) => {
                info!(status, "transcoder exited nonzero");
                false
            }
            Err(e) => {
                error!(err = %e.chain(), "unable to run transcoder");
                false
            }
        }
    }
}
