// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Drives one capture on a network tuner appliance: tune, save to disk until
//! the stop time, terminate, validate.

use crate::process::Invoker;
use crate::tuner::TunerPool;
use base::clock::Clocks;
use base::{err, Error};
use db::{ChannelInfo, TunerInfo};
use jiff::{SignedDuration, Timestamp};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Captures shorter than this are assumed to be tuner failures.
/// We're not really checking much here, but it's better than nothing;
/// at least it will detect 0-byte files.
pub const MIN_CAPTURE_BYTES: u64 = 10_000_000;

/// How a capture attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("unrecognized channel {major}-{minor}")]
    UnknownChannel { major: u16, minor: u16 },

    #[error("no tuners available")]
    NoTuner,

    #[error("capture failed")]
    CaptureFailed(#[source] Error),
}

impl From<Error> for CaptureError {
    fn from(e: Error) -> Self {
        CaptureError::CaptureFailed(e)
    }
}

/// The capture operation, as a trait so the recorder can be tested against a
/// mock driver.
pub trait Capture: Send + Sync + 'static {
    fn capture(
        &self,
        channel_major: u16,
        channel_minor: u16,
        stop_time: Timestamp,
        dest_path: &Path,
        log_path: &Path,
    ) -> Result<(), CaptureError>;
}

/// Stateless façade over the tuner appliance's CLI. Tuner contention is
/// serialized by the [`TunerPool`]; everything else here is per-call.
pub struct CaptureDriver<C: Clocks + Clone, I: Invoker> {
    channels: HashMap<(u16, u16), ChannelInfo>,
    tuners: Arc<TunerPool>,
    binary: String,
    clocks: C,
    shutdown_rx: base::shutdown::Receiver,
    invoker: I,
}

impl<C: Clocks + Clone, I: Invoker> CaptureDriver<C, I> {
    pub fn new(
        channels: Vec<ChannelInfo>,
        tuners: Arc<TunerPool>,
        binary: String,
        clocks: C,
        shutdown_rx: base::shutdown::Receiver,
        invoker: I,
    ) -> Self {
        CaptureDriver {
            channels: channels.into_iter().map(|c| ((c.major, c.minor), c)).collect(),
            tuners,
            binary,
            clocks,
            shutdown_rx,
            invoker,
        }
    }

    fn tuner_cmd(&self, tuner: &TunerInfo, args: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(2 + args.len());
        argv.push(self.binary.clone());
        argv.push(tuner.ip_address.clone());
        argv.extend_from_slice(args);
        argv
    }

    fn run_on_tuner(
        &self,
        tuner: &TunerInfo,
        channel: &ChannelInfo,
        stop_time: Timestamp,
        dest_path: &Path,
        log_path: &Path,
    ) -> Result<(), CaptureError> {
        let n = tuner.tuner_index;

        let cmd = self.tuner_cmd(
            tuner,
            &[
                "set".to_owned(),
                format!("/tuner{n}/channel"),
                channel.actual.to_string(),
            ],
        );
        info!(?cmd, "tuning channel");
        let status = self.invoker.run(&cmd, log_path)?;
        if status != 0 {
            warn!(status, "channel set exited nonzero");
        }

        let cmd = self.tuner_cmd(
            tuner,
            &[
                "set".to_owned(),
                format!("/tuner{n}/program"),
                channel.program.to_string(),
            ],
        );
        info!(?cmd, "selecting program");
        let status = self.invoker.run(&cmd, log_path)?;
        if status != 0 {
            warn!(status, "program set exited nonzero");
        }

        let cmd = self.tuner_cmd(tuner, &["get".to_owned(), format!("/tuner{n}/status")]);
        info!(?cmd, "checking tuner status");
        let status = self.invoker.run(&cmd, log_path)?;
        if status != 0 {
            warn!(status, "status query exited nonzero");
        }

        let cmd = self.tuner_cmd(
            tuner,
            &[
                "save".to_owned(),
                format!("/tuner{n}"),
                dest_path.display().to_string(),
            ],
        );
        info!(?cmd, "starting capture");
        let mut save = self.invoker.spawn(&cmd, log_path)?;

        self.sleep_until(stop_time);

        info!("terminating capture");
        save.terminate()?;
        let status = save.wait()?;
        info!(status, "capture process exited");
        Ok(())
    }

    /// Sleeps until `stop_time`, in short slices so a shutdown request stops
    /// the capture promptly. A stop time in the past means no sleep at all.
    fn sleep_until(&self, stop_time: Timestamp) {
        loop {
            let now = self.clocks.realtime();
            if now >= stop_time {
                return;
            }
            if self.shutdown_rx.check().is_err() {
                warn!("shutdown requested; stopping capture early");
                return;
            }
            let remaining = stop_time.duration_since(now);
            self.clocks.sleep(remaining.min(SignedDuration::from_secs(1)));
        }
    }
}

fn validate_output(dest_path: &Path) -> Result<(), CaptureError> {
    let len = match std::fs::metadata(dest_path) {
        Ok(m) => m.len(),
        Err(e) => {
            return Err(CaptureError::CaptureFailed(err!(
                DataLoss,
                msg("no output file {}", dest_path.display()),
                source(e)
            )))
        }
    };
    if len < MIN_CAPTURE_BYTES {
        return Err(CaptureError::CaptureFailed(err!(
            DataLoss,
            msg(
                "output file {} is {} bytes, expected at least {}",
                dest_path.display(),
                len,
                MIN_CAPTURE_BYTES
            )
        )));
    }
    Ok(())
}

impl<C: Clocks + Clone, I: Invoker> Capture for CaptureDriver<C, I> {
    fn capture(
        &self,
        channel_major: u16,
        channel_minor: u16,
        stop_time: Timestamp,
        dest_path: &Path,
        log_path: &Path,
    ) -> Result<(), CaptureError> {
        info!(
            channel_major,
            channel_minor,
            %stop_time,
            dest = %dest_path.display(),
            "starting capture"
        );
        let Some(channel) = self.channels.get(&(channel_major, channel_minor)) else {
            error!("unrecognized channel {channel_major}-{channel_minor}");
            return Err(CaptureError::UnknownChannel {
                major: channel_major,
                minor: channel_minor,
            });
        };
        let Some(tuner) = self.tuners.acquire() else {
            error!("no tuners available");
            return Err(CaptureError::NoTuner);
        };
        info!(
            device_id = %tuner.device_id,
            tuner_index = tuner.tuner_index,
            "selected tuner"
        );
        let result = self.run_on_tuner(&tuner, channel, stop_time, dest_path, log_path);
        self.tuners.release(&tuner);
        result?;
        validate_output(dest_path)?;
        info!(
            device_id = %tuner.device_id,
            tuner_index = tuner.tuner_index,
            "capture succeeded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Subprocess;
    use base::clock::SimulatedClocks;
    use std::sync::Mutex;

    struct MockInvoker {
        commands: Mutex<Vec<Vec<String>>>,

        /// Size of the file the fake `save` command leaves behind.
        save_bytes: u64,
    }

    impl MockInvoker {
        fn new(save_bytes: u64) -> Arc<Self> {
            Arc::new(MockInvoker {
                commands: Mutex::new(Vec::new()),
                save_bytes,
            })
        }

        fn commands(&self) -> Vec<Vec<String>> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl Invoker for Arc<MockInvoker> {
        fn run(&self, argv: &[String], _log_path: &Path) -> Result<i32, Error> {
            self.commands.lock().unwrap().push(argv.to_vec());
            Ok(0)
        }

        fn spawn(&self, argv: &[String], _log_path: &Path) -> Result<Box<dyn Subprocess>, Error> {
            self.commands.lock().unwrap().push(argv.to_vec());
            let dest = argv.last().unwrap().clone();
            let f = std::fs::File::create(&dest).unwrap();
            f.set_len(self.save_bytes).unwrap();
            Ok(Box::new(MockSave))
        }
    }

    struct MockSave;

    impl Subprocess for MockSave {
        fn terminate(&mut self) -> Result<(), Error> {
            Ok(())
        }

        fn wait(&mut self) -> Result<i32, Error> {
            Ok(-1) // the real save process dies by SIGTERM
        }

        fn try_wait(&mut self) -> Result<Option<i32>, Error> {
            Ok(None) // runs until terminated
        }
    }

    struct Fixture {
        clocks: SimulatedClocks,
        pool: Arc<TunerPool>,
        invoker: Arc<MockInvoker>,
        driver: CaptureDriver<SimulatedClocks, Arc<MockInvoker>>,
        _shutdown_tx: base::shutdown::Sender,
        tmpdir: tempfile::TempDir,
    }

    fn fixture(num_tuners: u32, save_bytes: u64) -> Fixture {
        db::testutil::init();
        let clocks = SimulatedClocks::new("2025-03-01T00:00:00Z".parse().unwrap());
        let tuners = (0..num_tuners)
            .map(|i| TunerInfo {
                device_id: "A".to_owned(),
                ip_address: "10.0.0.1".to_owned(),
                tuner_index: i,
            })
            .collect();
        let pool = Arc::new(TunerPool::new(tuners));
        let invoker = MockInvoker::new(save_bytes);
        let (shutdown_tx, shutdown_rx) = base::shutdown::channel();
        let driver = CaptureDriver::new(
            vec![ChannelInfo {
                major: 1,
                minor: 1,
                actual: 14,
                program: 1,
            }],
            pool.clone(),
            "/usr/bin/hdhomerun_config".to_owned(),
            clocks.clone(),
            shutdown_rx,
            invoker.clone(),
        );
        Fixture {
            clocks,
            pool,
            invoker,
            driver,
            _shutdown_tx: shutdown_tx,
            tmpdir: tempfile::tempdir().unwrap(),
        }
    }

    #[test]
    fn successful_capture_issues_tuner_cli_contract() {
        let f = fixture(1, MIN_CAPTURE_BYTES + 1);
        let dest = f.tmpdir.path().join("1.ts");
        let log = f.tmpdir.path().join("1.log");
        let stop = f.clocks.realtime() + SignedDuration::from_secs(30);
        f.driver.capture(1, 1, stop, &dest, &log).unwrap();
        let dest_str = dest.display().to_string();
        assert_eq!(
            f.invoker.commands(),
            vec![
                vec!["/usr/bin/hdhomerun_config", "10.0.0.1", "set", "/tuner0/channel", "14"],
                vec!["/usr/bin/hdhomerun_config", "10.0.0.1", "set", "/tuner0/program", "1"],
                vec!["/usr/bin/hdhomerun_config", "10.0.0.1", "get", "/tuner0/status"],
                vec!["/usr/bin/hdhomerun_config", "10.0.0.1", "save", "/tuner0", &dest_str],
            ]
            .into_iter()
            .map(|v| v.into_iter().map(str::to_owned).collect::<Vec<_>>())
            .collect::<Vec<_>>()
        );
        // Slept until the stop time, and the tuner went back to the pool.
        assert_eq!(f.clocks.realtime(), stop);
        assert_eq!(f.pool.counts(), (1, 0));
    }

    #[test]
    fn unknown_channel_fails_without_touching_a_tuner() {
        let f = fixture(1, MIN_CAPTURE_BYTES + 1);
        let dest = f.tmpdir.path().join("1.ts");
        let log = f.tmpdir.path().join("1.log");
        let e = f
            .driver
            .capture(2, 7, f.clocks.realtime(), &dest, &log)
            .unwrap_err();
        assert!(matches!(e, CaptureError::UnknownChannel { major: 2, minor: 7 }));
        assert!(f.invoker.commands().is_empty());
        assert_eq!(f.pool.counts(), (1, 0));
    }

    #[test]
    fn tuner_exhaustion() {
        let f = fixture(1, MIN_CAPTURE_BYTES + 1);
        let dest = f.tmpdir.path().join("1.ts");
        let log = f.tmpdir.path().join("1.log");
        let _held = f.pool.acquire().unwrap();
        let e = f
            .driver
            .capture(1, 1, f.clocks.realtime(), &dest, &log)
            .unwrap_err();
        assert!(matches!(e, CaptureError::NoTuner));
        assert!(f.invoker.commands().is_empty());
    }

    #[test]
    fn undersized_output_fails_but_releases_tuner() {
        let f = fixture(1, MIN_CAPTURE_BYTES - 1);
        let dest = f.tmpdir.path().join("1.ts");
        let log = f.tmpdir.path().join("1.log");
        let e = f
            .driver
            .capture(1, 1, f.clocks.realtime(), &dest, &log)
            .unwrap_err();
        assert!(matches!(e, CaptureError::CaptureFailed(_)));
        assert_eq!(f.pool.counts(), (1, 0));
    }

    #[test]
    fn stop_time_in_past_skips_sleep() {
        let f = fixture(1, MIN_CAPTURE_BYTES + 1);
        let dest = f.tmpdir.path().join("1.ts");
        let log = f.tmpdir.path().join("1.log");
        let before = f.clocks.realtime();
        let stop = before - SignedDuration::from_secs(30);
        f.driver.capture(1, 1, stop, &dest, &log).unwrap();
        assert_eq!(f.clocks.realtime(), before);
    }
}
