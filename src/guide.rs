// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Seam to the external program-guide collaborator. Fetching and parsing
//! listings happens outside this process; the scheduler only needs something
//! to poke once a day at the configured time.

use crate::process::Invoker;
use base::{err, Error};
use std::path::PathBuf;
use tracing::{debug, error, info};

pub trait GuideSource: Send + Sync + 'static {
    fn refresh(&self) -> Result<(), Error>;
}

/// Runs a configured command (the external fetcher/importer) to refresh the
/// guide.
pub struct CommandGuide<I: Invoker> {
    command: String,
    log_path: PathBuf,
    invoker: I,
}

impl<I: Invoker> CommandGuide<I> {
    pub fn new(command: String, log_path: PathBuf, invoker: I) -> Self {
        CommandGuide {
            command,
            log_path,
            invoker,
        }
    }
}

impl<I: Invoker> GuideSource for CommandGuide<I> {
    fn refresh(&self) -> Result<(), Error> {
        info!(command = %self.command, "refreshing program guide");
        let argv: Vec<String> = self.command.split_whitespace().map(str::to_owned).collect();
        let status = self.invoker.run(&argv, &self.log_path)?;
        if status != 0 {
            return Err(err!(
                Unavailable,
                msg("guide refresh exited with status {status}")
            ));
        }
        Ok(())
    }
}

/// Used when no refresh command is configured; listings arrive purely through
/// out-of-band imports.
pub struct NoopGuide;

impl GuideSource for NoopGuide {
    fn refresh(&self) -> Result<(), Error> {
        debug!("no guide refresh command configured");
        Ok(())
    }
}

/// Tick wrapper with the catch-log-return policy every periodic job follows.
pub fn refresh_tick(source: &dyn GuideSource) {
    if let Err(e) = source.refresh() {
        error!(err = %e.chain(), "guide refresh failed");
    }
}
