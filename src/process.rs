// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Seam for invoking external binaries (tuner CLI, transcoder, frame
//! extractor) so that component tests can substitute a mock.

use base::clock::Clocks;
use base::{err, Error};
use jiff::SignedDuration;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Runs external commands with stdout/stderr appended to a log file.
pub trait Invoker: Send + Sync + 'static {
    /// Runs `argv` to completion; returns its exit code (-1 when killed by a
    /// signal).
    fn run(&self, argv: &[String], log_path: &Path) -> Result<i32, Error>;

    /// Starts `argv` and returns a handle to terminate and reap it.
    fn spawn(&self, argv: &[String], log_path: &Path) -> Result<Box<dyn Subprocess>, Error>;
}

/// A running subprocess started by [`Invoker::spawn`].
pub trait Subprocess: Send {
    /// Sends SIGTERM. Delivering to an already-exited process is not an error.
    fn terminate(&mut self) -> Result<(), Error>;

    /// Waits for exit; returns the exit code (-1 when killed by a signal).
    fn wait(&mut self) -> Result<i32, Error>;

    /// Returns the exit code if the process has exited, without blocking.
    fn try_wait(&mut self) -> Result<Option<i32>, Error>;
}

/// Runs `argv` to completion like [`Invoker::run`], but terminates it early
/// when shutdown is requested. For the long-running encode/extract commands,
/// where blocking in `wait` would stall shutdown for minutes.
pub fn run_until_done<C: Clocks>(
    invoker: &dyn Invoker,
    argv: &[String],
    log_path: &Path,
    clocks: &C,
    shutdown_rx: &base::shutdown::Receiver,
) -> Result<i32, Error> {
    let mut child = invoker.spawn(argv, log_path)?;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if shutdown_rx.check().is_err() {
            warn!(?argv, "shutdown requested; terminating subprocess");
            child.terminate()?;
            return child.wait();
        }
        clocks.sleep(SignedDuration::from_secs(1));
    }
}

#[derive(Copy, Clone)]
pub struct SystemInvoker;

fn command(argv: &[String], log_path: &Path) -> Result<Command, Error> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| err!(InvalidArgument, msg("empty command line")))?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| {
            err!(
                Unknown,
                msg("unable to open log file {}", log_path.display()),
                source(e)
            )
        })?;
    let stderr = log.try_clone()?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr));
    Ok(cmd)
}

impl Invoker for SystemInvoker {
    fn run(&self, argv: &[String], log_path: &Path) -> Result<i32, Error> {
        let status = command(argv, log_path)?.status().map_err(|e| {
            err!(Unavailable, msg("unable to run {:?}", argv[0]), source(e))
        })?;
        debug!(?argv, ?status, "command finished");
        Ok(status.code().unwrap_or(-1))
    }

    fn spawn(&self, argv: &[String], log_path: &Path) -> Result<Box<dyn Subprocess>, Error> {
        let child = command(argv, log_path)?.spawn().map_err(|e| {
            err!(Unavailable, msg("unable to spawn {:?}", argv[0]), source(e))
        })?;
        debug!(?argv, pid = child.id(), "command started");
        Ok(Box::new(SystemSubprocess(child)))
    }
}

struct SystemSubprocess(std::process::Child);

impl Subprocess for SystemSubprocess {
    fn terminate(&mut self) -> Result<(), Error> {
        match kill(Pid::from_raw(self.0.id() as i32), Signal::SIGTERM) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(err!(
                Unknown,
                msg("unable to SIGTERM pid {}", self.0.id()),
                source(e)
            )),
        }
    }

    fn wait(&mut self) -> Result<i32, Error> {
        let status = self.0.wait()?;
        Ok(status.code().unwrap_or(-1))
    }

    fn try_wait(&mut self) -> Result<Option<i32>, Error> {
        let status = self.0.try_wait()?;
        Ok(status.map(|s| s.code().unwrap_or(-1)))
    }
}
