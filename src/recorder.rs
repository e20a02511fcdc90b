// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Glue between the scheduler and the capture driver: replans the capture-job
//! window and performs each due capture.

use crate::capture::Capture;
use crate::scheduler::SchedulerHandle;
use base::clock::{Clocks, TimerGuard};
use base::strutil::expand_placeholders;
use db::{Database, PlannedRecording};
use jiff::SignedDuration;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// How far ahead each replan looks. Replans run every six hours, so this
/// overlaps generously.
pub const PLAN_WINDOW: SignedDuration = SignedDuration::from_secs(12 * 3600);

pub struct Recorder<C: Clocks + Clone> {
    db: Arc<Database<C>>,
    driver: Arc<dyn Capture>,
    scheduler: SchedulerHandle,
    video_path_spec: String,
    log_path_spec: String,

    /// Serializes replans with each other (but not with capture firing; a job
    /// that already fired is out of the scheduler and unaffected).
    planning_lock: Mutex<()>,
}

impl<C: Clocks + Clone> Recorder<C> {
    pub fn new(
        db: Arc<Database<C>>,
        driver: Arc<dyn Capture>,
        scheduler: SchedulerHandle,
        video_path_spec: String,
        log_path_spec: String,
    ) -> Self {
        Recorder {
            db,
            driver,
            scheduler,
            video_path_spec,
            log_path_spec,
            planning_lock: Mutex::new(()),
        }
    }

    /// Replaces the scheduler's pending capture jobs with the airings due in
    /// the next [`PLAN_WINDOW`]. Idempotent; errors are logged and the next
    /// replan retries.
    pub fn plan(&self) {
        let _guard = self.planning_lock.lock().unwrap();
        info!("scheduling recordings");
        let now = self.db.clocks().realtime();
        let pending = match self.db.lock().pending_recordings(now, PLAN_WINDOW) {
            Ok(p) => p,
            Err(e) => {
                error!(err = %e.chain(), "unable to query pending recordings");
                return;
            }
        };
        for p in &pending {
            info!(
                channel_major = p.channel_major,
                channel_minor = p.channel_minor,
                start = %p.start,
                show_id = %p.show_id,
                episode_id = %p.episode_id,
                "scheduling recording"
            );
        }
        self.scheduler.set_capture_jobs(pending);
    }

    /// Performs one capture. The recording stub is written before capture
    /// begins; only a successful capture adds the raw-file row, so a failure
    /// leaves the stub behind and the episode eligible for replanning.
    pub fn capture(&self, plan: &PlannedRecording) {
        info!(
            channel_major = plan.channel_major,
            channel_minor = plan.channel_minor,
            show_id = %plan.show_id,
            episode_id = %plan.episode_id,
            "recording"
        );
        let clocks = self.db.clocks();
        let recording_id = {
            let _t = TimerGuard::new(clocks, || "allocating recording id");
            match self.db.lock().allocate_recording_id() {
                Ok(id) => id,
                Err(e) => {
                    error!(err = %e.chain(), "unable to allocate recording id");
                    return;
                }
            }
        };
        let id_str = recording_id.to_string();
        let dest = PathBuf::from(expand_placeholders(
            &self.video_path_spec,
            &[("recordingID", &id_str)],
        ));
        let log = PathBuf::from(expand_placeholders(
            &self.log_path_spec,
            &[("recordingID", &id_str)],
        ));
        let stop_time = plan.start + plan.duration;
        let now = clocks.realtime();
        if let Err(e) = self.db.lock().create_recording(
            recording_id,
            &plan.show_id,
            &plan.episode_id,
            now,
            plan.duration,
            plan.rerun,
        ) {
            error!(recording_id, err = %e.chain(), "unable to insert recording");
            return;
        }
        match self
            .driver
            .capture(plan.channel_major, plan.channel_minor, stop_time, &dest, &log)
        {
            Ok(()) => {
                info!(recording_id, "recording succeeded");
                if let Err(e) = self.db.lock().attach_raw(recording_id, &dest.display().to_string())
                {
                    error!(recording_id, err = %e.chain(), "unable to record file location");
                }
            }
            Err(e) => error!(recording_id, err = %e, "recording failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureError;
    use crate::scheduler;
    use base::clock::SimulatedClocks;
    use base::err;
    use db::testutil::TestDb;
    use db::CategoryCode;
    use jiff::Timestamp;
    use std::path::Path;
    use std::sync::Mutex;

    /// A driver which records its invocations and answers from a script.
    struct MockCapture {
        calls: Mutex<Vec<(u16, u16, Timestamp, PathBuf, PathBuf)>>,
        outcome: Mutex<Vec<Result<(), CaptureError>>>,
    }

    impl MockCapture {
        fn new(outcome: Vec<Result<(), CaptureError>>) -> Arc<Self> {
            Arc::new(MockCapture {
                calls: Mutex::new(Vec::new()),
                outcome: Mutex::new(outcome),
            })
        }
    }

    impl Capture for MockCapture {
        fn capture(
            &self,
            channel_major: u16,
            channel_minor: u16,
            stop_time: Timestamp,
            dest_path: &Path,
            log_path: &Path,
        ) -> Result<(), CaptureError> {
            self.calls.lock().unwrap().push((
                channel_major,
                channel_minor,
                stop_time,
                dest_path.to_owned(),
                log_path.to_owned(),
            ));
            self.outcome.lock().unwrap().remove(0)
        }
    }

    struct Fixture {
        tdb: TestDb<SimulatedClocks>,
        driver: Arc<MockCapture>,
        recorder: Recorder<SimulatedClocks>,
        scheduler: scheduler::SchedulerHandle,
        _scheduler_rx: std::sync::mpsc::Receiver<scheduler::Command>,
    }

    fn fixture(outcome: Vec<Result<(), CaptureError>>) -> Fixture {
        db::testutil::init();
        let clocks = SimulatedClocks::new("2025-03-01T00:00:00Z".parse().unwrap());
        let tdb = TestDb::new(clocks);
        let driver = MockCapture::new(outcome);
        let (handle, rx) = scheduler::channel();
        let recorder = Recorder::new(
            tdb.db.clone(),
            driver.clone(),
            handle.clone(),
            "/video/{recordingID}.ts".to_owned(),
            "/log/{recordingID}.log".to_owned(),
        );
        Fixture {
            tdb,
            driver,
            recorder,
            scheduler: handle,
            _scheduler_rx: rx,
        }
    }

    fn plan(tdb: &TestDb<SimulatedClocks>, show: &str, episode: &str) -> PlannedRecording {
        PlannedRecording {
            channel_major: 1,
            channel_minor: 1,
            start: tdb.db.clocks().realtime() + SignedDuration::from_secs(60),
            duration: SignedDuration::from_secs(30),
            show_id: show.to_owned(),
            episode_id: episode.to_owned(),
            rerun: CategoryCode::New,
        }
    }

    #[test]
    fn successful_capture_writes_recording_and_raw_rows() {
        let f = fixture(vec![Ok(())]);
        let p = plan(&f.tdb, "s1", "e1");
        f.recorder.capture(&p);

        let calls = f.driver.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (major, minor, stop, dest, log) = calls[0].clone();
        assert_eq!((major, minor), (1, 1));
        assert_eq!(stop, p.start + p.duration);
        assert_eq!(dest, Path::new("/video/1.ts"));
        assert_eq!(log, Path::new("/log/1.log"));

        let l = f.tdb.db.lock();
        assert_eq!(l.category(1).unwrap(), Some(CategoryCode::New));
        assert_eq!(l.recording_duration(1).unwrap(), p.duration);
        let raw = l.list_raw_files().unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].recording_id, 1);
        assert_eq!(raw[0].filename, "/video/1.ts");
    }

    #[test]
    fn failed_capture_leaves_bare_stub() {
        let f = fixture(vec![Err(CaptureError::NoTuner)]);
        let p = plan(&f.tdb, "s1", "e1");
        f.recorder.capture(&p);

        let l = f.tdb.db.lock();
        // Stub present, no file row: the episode stays eligible for replanning.
        assert_eq!(l.category(1).unwrap(), Some(CategoryCode::New));
        assert!(l.list_raw_files().unwrap().is_empty());
        assert_eq!(l.recordings_without_files().unwrap(), vec![1]);
    }

    #[test]
    fn capture_failed_error_also_leaves_bare_stub() {
        let f = fixture(vec![Err(CaptureError::CaptureFailed(err!(
            DataLoss,
            msg("too small")
        )))]);
        f.recorder.capture(&plan(&f.tdb, "s1", "e1"));
        let l = f.tdb.db.lock();
        assert!(l.list_raw_files().unwrap().is_empty());
        assert_eq!(l.recordings_without_files().unwrap(), vec![1]);
    }

    #[test]
    fn consecutive_captures_allocate_increasing_ids() {
        let f = fixture(vec![Ok(()), Ok(())]);
        f.recorder.capture(&plan(&f.tdb, "s1", "e1"));
        f.recorder.capture(&plan(&f.tdb, "s1", "e2"));
        let calls = f.driver.calls.lock().unwrap();
        assert_eq!(calls[0].3, Path::new("/video/1.ts"));
        assert_eq!(calls[1].3, Path::new("/video/2.ts"));
    }

    #[test]
    fn plan_installs_pending_jobs() {
        let f = fixture(vec![]);
        let now = f.tdb.db.clocks().realtime();
        f.tdb.seed_channel(1, 1, 14, 1);
        f.tdb.seed_subscribed_episode("s1", "e1");
        f.tdb
            .db
            .lock()
            .insert_schedule(&db::ScheduleToInsert {
                channel_major: 1,
                channel_minor: 1,
                start: now + SignedDuration::from_secs(3600),
                duration: SignedDuration::from_secs(1800),
                show_id: "s1".to_owned(),
                episode_id: "e1".to_owned(),
                rerun: CategoryCode::New,
            })
            .unwrap();
        f.recorder.plan();
        match f._scheduler_rx.try_recv().unwrap() {
            scheduler::Command::SetCaptureJobs(jobs) => {
                assert_eq!(jobs.len(), 1);
                assert_eq!(jobs[0].show_id, "s1");
            }
            _ => panic!("expected SetCaptureJobs"),
        }
        let _ = &f.scheduler;
    }
}
