// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Subcommand to run the recording service.

use crate::bif::BifBuilder;
use crate::capture::CaptureDriver;
use crate::guide::{self, CommandGuide, GuideSource, NoopGuide};
use crate::process::SystemInvoker;
use crate::reaper::Reaper;
use crate::recorder::Recorder;
use crate::scheduler::{self, Dispatch, JobKind};
use crate::transcoder::Transcoder;
use crate::tuner::TunerPool;
use base::clock::{Clocks, RealClocks};
use base::{err, Error};
use bpaf::Bpaf;
use nix::sys::signal::{SigSet, Signal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

mod config;

use config::ConfigFile;

/// Runs the recording service.
#[derive(Bpaf, Debug)]
#[bpaf(command("run"))]
pub struct Args {
    /// Path to the configuration file.
    #[bpaf(argument("PATH"), fallback(PathBuf::from("/etc/skylight-dvr.toml")), debug_fallback)]
    config: PathBuf,
}

fn read_config(path: &Path) -> Result<ConfigFile, Error> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        err!(
            NotFound,
            msg("unable to read config file {}", path.display()),
            source(e)
        )
    })?;
    toml::from_str(&raw).map_err(|e| {
        err!(
            InvalidArgument,
            msg("unable to parse config file {}", path.display()),
            source(e)
        )
    })
}

/// Routes scheduler jobs to the components. One instance is shared by all
/// worker threads; the components' own locks serialize what must not overlap.
struct Services<C: Clocks + Clone> {
    recorder: Recorder<C>,
    transcoder: Transcoder<C, SystemInvoker>,
    bif: BifBuilder<C, SystemInvoker>,
    reaper: Reaper<C>,
    guide: Box<dyn GuideSource>,
}

impl<C: Clocks + Clone> Dispatch for Services<C> {
    fn dispatch(&self, job: JobKind) {
        match job {
            JobKind::Plan => self.recorder.plan(),
            JobKind::Capture(plan) => self.recorder.capture(&plan),
            JobKind::TranscodeTick => self.transcoder.tick(),
            JobKind::BifTick => self.bif.tick(),
            JobKind::ReapTick => self.reaper.tick(),
            JobKind::RefreshGuide => guide::refresh_tick(self.guide.as_ref()),
        }
    }
}

pub fn run(args: Args) -> Result<i32, Error> {
    let config = read_config(&args.config)?;

    // Block termination signals now, before any threads are spawned, so that
    // they are delivered to this thread's sigwait below rather than killing a
    // worker.
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    mask.thread_block()
        .map_err(|e| err!(Internal, msg("unable to block signals"), source(e)))?;

    let (_db_dir, conn) = super::open_conn(&config.db_dir, super::OpenMode::ReadWrite)?;
    let clocks = RealClocks {};
    let db = Arc::new(db::Database::new(clocks, conn)?);
    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();

    let (channels, tuners) = {
        let l = db.lock();
        (l.list_channels()?, l.list_tuners()?)
    };
    info!(
        channels = channels.len(),
        tuners = tuners.len(),
        "loaded tuning tables"
    );
    let pool = Arc::new(TunerPool::new(tuners));
    let driver = Arc::new(CaptureDriver::new(
        channels,
        pool,
        config.capture.tuner_binary.display().to_string(),
        clocks,
        shutdown_rx.clone(),
        SystemInvoker,
    ));

    let (scheduler_handle, scheduler_rx) = scheduler::channel();
    let guide: Box<dyn GuideSource> = match &config.listings.command {
        Some(command) => Box::new(CommandGuide::new(
            command.clone(),
            config.listings.log_path.clone(),
            SystemInvoker,
        )),
        None => Box::new(NoopGuide),
    };
    let services = Arc::new(Services {
        recorder: Recorder::new(
            db.clone(),
            driver,
            scheduler_handle.clone(),
            config.capture.video_path.clone(),
            config.capture.log_path.clone(),
        ),
        transcoder: Transcoder::new(
            db.clone(),
            config.transcode.low_command.clone(),
            config.transcode.medium_command.clone(),
            config.transcode.high_command.clone(),
            config.transcode.output_path.clone(),
            config.transcode.log_path.clone(),
            SystemInvoker,
            shutdown_rx.clone(),
        ),
        bif: BifBuilder::new(
            db.clone(),
            config.bif.extract_command.clone(),
            config.bif.image_dir.clone(),
            config.bif.bif_path.clone(),
            config.bif.frame_interval_ms,
            SystemInvoker,
            shutdown_rx,
        ),
        reaper: Reaper::new(db.clone()),
        guide,
    });
    let scheduler_join =
        scheduler::start(clocks, scheduler_rx, services, config.listings.fetch_time)?;
    info!("recording service ready");

    let signal = mask
        .wait()
        .map_err(|e| err!(Internal, msg("unable to wait for signals"), source(e)))?;
    info!(?signal, "received signal; shutting down");

    // Wake sleeping captures first so their save subprocesses are terminated
    // promptly, then let the scheduler drain and join its workers.
    drop(shutdown_tx);
    scheduler_handle.shutdown();
    scheduler_join
        .join()
        .map_err(|_| err!(Internal, msg("scheduler thread panicked")))?;
    info!("exiting");
    Ok(0)
}
