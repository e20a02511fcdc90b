// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Time-driven dispatcher: a single timer thread owning a queue of planned
//! jobs, firing each onto its own worker thread when due.
//!
//! Job kinds: replanning (cron-style slots plus once at startup), one-shot
//! captures at airing start times, periodic transcode/BIF/reap ticks, and the
//! daily guide refresh. Capture jobs are replaced wholesale by each replan;
//! the replacement happens as a single command on the timer thread, so a job
//! removed before its trigger time can never fire.

use base::clock::Clocks;
use db::PlannedRecording;
use jiff::civil;
use jiff::tz::TimeZone;
use jiff::{SignedDuration, Timestamp};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

/// Replanning runs at these UTC hours...
const PLAN_HOURS: [i8; 4] = [0, 6, 12, 18];
/// ...at this minute, leaving listing imports time to land first.
const PLAN_MINUTE: i8 = 40;

const PLAN_MISFIRE_GRACE: SignedDuration = SignedDuration::from_secs(600);
const CAPTURE_MISFIRE_GRACE: SignedDuration = SignedDuration::from_secs(60);
const GUIDE_MISFIRE_GRACE: SignedDuration = SignedDuration::from_secs(3600);

const PIPELINE_TICK_INTERVAL: SignedDuration = SignedDuration::from_secs(60);
const REAP_TICK_INTERVAL: SignedDuration = SignedDuration::from_secs(3600);

/// What a fired job does. The scheduler itself only keeps time; the work is
/// routed through a [`Dispatch`] implementation on a worker thread.
#[derive(Clone, Debug, PartialEq)]
pub enum JobKind {
    Plan,
    Capture(PlannedRecording),
    TranscodeTick,
    BifTick,
    ReapTick,
    RefreshGuide,
}

impl JobKind {
    fn worker_name(&self) -> String {
        match self {
            JobKind::Plan => "planner".to_owned(),
            JobKind::Capture(p) => format!("capture-{}-{}", p.show_id, p.episode_id),
            JobKind::TranscodeTick => "transcoder".to_owned(),
            JobKind::BifTick => "bif-builder".to_owned(),
            JobKind::ReapTick => "reaper".to_owned(),
            JobKind::RefreshGuide => "guide-fetch".to_owned(),
        }
    }
}

/// Routes fired jobs to the components. Implemented by the service wiring;
/// mocked in tests.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, job: JobKind);
}

pub enum Command {
    /// Removes all pending capture jobs and installs the given ones, as one
    /// atomic step.
    SetCaptureJobs(Vec<PlannedRecording>),

    /// Reports the currently installed (unfired) capture jobs.
    InspectCaptures(mpsc::Sender<Vec<PlannedRecording>>),

    Shutdown,
}

/// A channel which can be used to send commands to the scheduler.
/// Can be cloned to allow multiple threads to send commands.
#[derive(Clone)]
pub struct SchedulerHandle(mpsc::Sender<Command>);

impl SchedulerHandle {
    /// Replaces the pending capture-job set. During shutdown the scheduler
    /// may already be gone; that's fine, the jobs die with it.
    pub fn set_capture_jobs(&self, jobs: Vec<PlannedRecording>) {
        let _ = self.0.send(Command::SetCaptureJobs(jobs));
    }

    /// Snapshot of the installed capture jobs, for tests and diagnostics.
    pub fn pending_captures(&self) -> Vec<PlannedRecording> {
        let (tx, rx) = mpsc::channel();
        if self.0.send(Command::InspectCaptures(tx)).is_err() {
            return Vec::new();
        }
        rx.recv().unwrap_or_default()
    }

    pub fn shutdown(&self) {
        let _ = self.0.send(Command::Shutdown);
    }
}

pub fn channel() -> (SchedulerHandle, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel();
    (SchedulerHandle(tx), rx)
}

enum Repeat {
    Never,
    PlanSlots,
    Every(SignedDuration),
    Daily(civil::Time),
}

struct PlannedJob {
    fire_at: Timestamp,
    seq: u64,
    kind: JobKind,
    grace: SignedDuration,
    repeat: Repeat,
}

// PlannedJob is meant for placement in a max-heap which should return the
// soonest job. This PlannedJob is greater than other if its fire_at is _less_
// than the other's.
impl Ord for PlannedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PlannedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PlannedJob {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for PlannedJob {}

/// Returns the next replanning slot strictly after `now`.
fn next_plan_slot(now: Timestamp) -> Timestamp {
    next_civil_match(now, |date| {
        PLAN_HOURS.iter().map(move |&h| date.at(h, PLAN_MINUTE, 0, 0))
    })
}

/// Returns the next occurrence of the civil time `t` strictly after `now`.
fn next_daily(now: Timestamp, t: civil::Time) -> Timestamp {
    next_civil_match(now, move |date| std::iter::once(date.to_datetime(t)))
}

fn next_civil_match<I, F>(now: Timestamp, candidates: F) -> Timestamp
where
    I: Iterator<Item = civil::DateTime>,
    F: Fn(civil::Date) -> I,
{
    let dt = now.to_zoned(TimeZone::UTC).datetime();
    let today = dt.date();
    let tomorrow = today.tomorrow().expect("calendar overflow");
    for day in [today, tomorrow] {
        for cand in candidates(day) {
            if cand > dt {
                return cand
                    .to_zoned(TimeZone::UTC)
                    .expect("UTC has no gaps")
                    .timestamp();
            }
        }
    }
    unreachable!("tomorrow always holds a later candidate");
}

pub struct Scheduler<C: Clocks + Clone> {
    clocks: C,
    dispatcher: Arc<dyn Dispatch>,
    guide_fetch_time: civil::Time,
    queue: BinaryHeap<PlannedJob>,
    workers: Vec<thread::JoinHandle<()>>,
    next_seq: u64,
}

impl<C: Clocks + Clone> Scheduler<C> {
    pub fn new(clocks: C, dispatcher: Arc<dyn Dispatch>, guide_fetch_time: civil::Time) -> Self {
        Scheduler {
            clocks,
            dispatcher,
            guide_fetch_time,
            queue: BinaryHeap::new(),
            workers: Vec::new(),
            next_seq: 0,
        }
    }

    fn install(&mut self, fire_at: Timestamp, kind: JobKind, grace: SignedDuration, repeat: Repeat) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(PlannedJob {
            fire_at,
            seq,
            kind,
            grace,
            repeat,
        });
    }

    /// Installs the initial job set: an immediate replan plus all recurring
    /// jobs.
    pub fn seed(&mut self) {
        let now = self.clocks.realtime();
        self.install(now, JobKind::Plan, PLAN_MISFIRE_GRACE, Repeat::Never);
        self.install(
            next_plan_slot(now),
            JobKind::Plan,
            PLAN_MISFIRE_GRACE,
            Repeat::PlanSlots,
        );
        self.install(
            now + PIPELINE_TICK_INTERVAL,
            JobKind::TranscodeTick,
            PIPELINE_TICK_INTERVAL,
            Repeat::Every(PIPELINE_TICK_INTERVAL),
        );
        self.install(
            now + PIPELINE_TICK_INTERVAL,
            JobKind::BifTick,
            PIPELINE_TICK_INTERVAL,
            Repeat::Every(PIPELINE_TICK_INTERVAL),
        );
        self.install(
            now + REAP_TICK_INTERVAL,
            JobKind::ReapTick,
            REAP_TICK_INTERVAL,
            Repeat::Every(REAP_TICK_INTERVAL),
        );
        self.install(
            next_daily(now, self.guide_fetch_time),
            JobKind::RefreshGuide,
            GUIDE_MISFIRE_GRACE,
            Repeat::Daily(self.guide_fetch_time),
        );
    }

    fn replace_captures(&mut self, jobs: Vec<PlannedRecording>) {
        let kept: Vec<PlannedJob> = self
            .queue
            .drain()
            .filter(|j| !matches!(j.kind, JobKind::Capture(_)))
            .collect();
        self.queue = kept.into();
        info!(count = jobs.len(), "installing capture jobs");
        for job in jobs {
            self.install(
                job.start,
                JobKind::Capture(job),
                CAPTURE_MISFIRE_GRACE,
                Repeat::Never,
            );
        }
    }

    fn pending_captures(&self) -> Vec<PlannedRecording> {
        let mut captures: Vec<PlannedRecording> = self
            .queue
            .iter()
            .filter_map(|j| match &j.kind {
                JobKind::Capture(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        captures.sort_by(|a, b| {
            (a.start, &a.show_id, &a.episode_id).cmp(&(b.start, &b.show_id, &b.episode_id))
        });
        captures
    }

    fn next_fire(&self) -> Option<Timestamp> {
        self.queue.peek().map(|j| j.fire_at)
    }

    /// Pops and dispatches everything due. A job more than its misfire grace
    /// past due is dropped; a subsequent replan will pick up the next airing,
    /// if any.
    fn fire_due(&mut self) {
        loop {
            let now = self.clocks.realtime();
            match self.queue.peek() {
                Some(j) if j.fire_at <= now => {}
                _ => return,
            }
            let job = self.queue.pop().expect("peeked job exists");
            if now.duration_since(job.fire_at) > job.grace {
                warn!(
                    kind = %job.kind.worker_name(),
                    fire_at = %job.fire_at,
                    "dropping job past its misfire grace"
                );
            } else {
                self.spawn_worker(job.kind.clone());
            }
            match job.repeat {
                Repeat::Never => {}
                Repeat::PlanSlots => self.install(
                    next_plan_slot(now),
                    job.kind,
                    job.grace,
                    Repeat::PlanSlots,
                ),
                Repeat::Every(d) => self.install(now + d, job.kind, job.grace, Repeat::Every(d)),
                Repeat::Daily(t) => {
                    self.install(next_daily(now, t), job.kind, job.grace, Repeat::Daily(t))
                }
            }
        }
    }

    fn spawn_worker(&mut self, kind: JobKind) {
        let dispatcher = self.dispatcher.clone();
        let name = kind.worker_name();
        match thread::Builder::new()
            .name(name.clone())
            .spawn(move || dispatcher.dispatch(kind))
        {
            Ok(handle) => self.workers.push(handle),
            Err(e) => warn!(%name, err = %e, "unable to spawn worker"),
        }
    }

    fn reap_workers(&mut self) {
        self.workers.retain(|w| !w.is_finished());
    }

    pub fn run(mut self, cmds: mpsc::Receiver<Command>) {
        info!("scheduler starting");
        loop {
            self.reap_workers();
            let cmd = match self.next_fire() {
                None => match cmds.recv() {
                    Err(_) => break, // all command senders are gone.
                    Ok(cmd) => cmd,
                },
                Some(t) => {
                    let now = self.clocks.realtime();
                    let timeout =
                        StdDuration::try_from(t.duration_since(now)).unwrap_or(StdDuration::ZERO);
                    match self.clocks.recv_timeout(&cmds, timeout) {
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            self.fire_due();
                            continue;
                        }
                        Ok(cmd) => cmd,
                    }
                }
            };
            match cmd {
                Command::SetCaptureJobs(jobs) => self.replace_captures(jobs),
                Command::InspectCaptures(tx) => {
                    let _ = tx.send(self.pending_captures());
                }
                Command::Shutdown => break,
            }
        }
        info!(workers = self.workers.len(), "scheduler shutting down");
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

/// Starts the scheduler on its own thread with the initial job set installed.
pub fn start<C: Clocks + Clone>(
    clocks: C,
    cmds: mpsc::Receiver<Command>,
    dispatcher: Arc<dyn Dispatch>,
    guide_fetch_time: civil::Time,
) -> Result<thread::JoinHandle<()>, base::Error> {
    let mut scheduler = Scheduler::new(clocks, dispatcher, guide_fetch_time);
    scheduler.seed();
    thread::Builder::new()
        .name("scheduler".to_owned())
        .spawn(move || scheduler.run(cmds))
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::clock::SimulatedClocks;
    use db::CategoryCode;
    use std::sync::Mutex;

    struct RecordingDispatch(Mutex<Vec<JobKind>>);

    impl RecordingDispatch {
        fn new() -> Arc<Self> {
            Arc::new(RecordingDispatch(Mutex::new(Vec::new())))
        }

        fn jobs(&self) -> Vec<JobKind> {
            self.0.lock().unwrap().clone()
        }

        /// Waits (in real time) until `pred` holds over the dispatched jobs;
        /// worker threads are real even when the clock is simulated.
        fn wait_until(&self, pred: impl Fn(&[JobKind]) -> bool) -> Vec<JobKind> {
            let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
            loop {
                let jobs = self.jobs();
                if pred(&jobs) {
                    return jobs;
                }
                assert!(std::time::Instant::now() < deadline, "timed out; got {jobs:?}");
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
    }

    impl Dispatch for RecordingDispatch {
        fn dispatch(&self, job: JobKind) {
            self.0.lock().unwrap().push(job);
        }
    }

    fn clocks() -> SimulatedClocks {
        SimulatedClocks::new("2025-03-01T05:00:00Z".parse().unwrap())
    }

    fn planned(show: &str, episode: &str, start: Timestamp) -> PlannedRecording {
        PlannedRecording {
            channel_major: 1,
            channel_minor: 1,
            start,
            duration: SignedDuration::from_secs(1800),
            show_id: show.to_owned(),
            episode_id: episode.to_owned(),
            rerun: CategoryCode::New,
        }
    }

    fn test_scheduler(
        clocks: &SimulatedClocks,
        dispatch: &Arc<RecordingDispatch>,
    ) -> Scheduler<SimulatedClocks> {
        db::testutil::init();
        Scheduler::new(
            clocks.clone(),
            dispatch.clone(),
            civil::Time::constant(1, 0, 0, 0),
        )
    }

    #[test]
    fn plan_slots() {
        let t = |s: &str| s.parse::<Timestamp>().unwrap();
        assert_eq!(
            next_plan_slot(t("2025-03-01T05:00:00Z")),
            t("2025-03-01T06:40:00Z")
        );
        assert_eq!(
            next_plan_slot(t("2025-03-01T06:40:00Z")),
            t("2025-03-01T12:40:00Z")
        );
        // The last slot of the day rolls over to the next morning.
        assert_eq!(
            next_plan_slot(t("2025-03-01T19:00:00Z")),
            t("2025-03-02T00:40:00Z")
        );
    }

    #[test]
    fn daily_occurrence() {
        let t = |s: &str| s.parse::<Timestamp>().unwrap();
        let one_am = civil::Time::constant(1, 0, 0, 0);
        assert_eq!(
            next_daily(t("2025-03-01T00:30:00Z"), one_am),
            t("2025-03-01T01:00:00Z")
        );
        assert_eq!(
            next_daily(t("2025-03-01T01:00:00Z"), one_am),
            t("2025-03-02T01:00:00Z")
        );
    }

    #[test]
    fn replanning_is_idempotent() {
        let clocks = clocks();
        let dispatch = RecordingDispatch::new();
        let mut s = test_scheduler(&clocks, &dispatch);
        let now = clocks.realtime();
        let jobs = vec![
            planned("s1", "e1", now + SignedDuration::from_secs(60)),
            planned("s2", "e1", now + SignedDuration::from_secs(120)),
        ];
        s.replace_captures(jobs.clone());
        let first = s.pending_captures();
        s.replace_captures(jobs.clone());
        assert_eq!(s.pending_captures(), first);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn replanning_removes_stale_jobs() {
        let clocks = clocks();
        let dispatch = RecordingDispatch::new();
        let mut s = test_scheduler(&clocks, &dispatch);
        let now = clocks.realtime();
        s.replace_captures(vec![planned("s1", "e1", now + SignedDuration::from_secs(60))]);
        s.replace_captures(Vec::new());
        assert!(s.pending_captures().is_empty());

        // Even with the trigger time reached, the removed job must not fire.
        clocks.sleep(SignedDuration::from_secs(61));
        s.fire_due();
        s.reap_workers();
        assert!(dispatch.jobs().is_empty());
    }

    #[test]
    fn capture_fires_when_due() {
        let clocks = clocks();
        let dispatch = RecordingDispatch::new();
        let mut s = test_scheduler(&clocks, &dispatch);
        let now = clocks.realtime();
        let job = planned("s1", "e1", now + SignedDuration::from_secs(60));
        s.replace_captures(vec![job.clone()]);

        s.fire_due(); // not due yet
        assert_eq!(s.pending_captures().len(), 1);

        clocks.sleep(SignedDuration::from_secs(61));
        s.fire_due();
        assert!(s.pending_captures().is_empty());
        let jobs = dispatch.wait_until(|jobs| !jobs.is_empty());
        assert_eq!(jobs, vec![JobKind::Capture(job)]);
    }

    #[test]
    fn capture_past_misfire_grace_is_dropped() {
        let clocks = clocks();
        let dispatch = RecordingDispatch::new();
        let mut s = test_scheduler(&clocks, &dispatch);
        let now = clocks.realtime();
        let job = planned("s1", "e1", now + SignedDuration::from_secs(60));
        s.replace_captures(vec![job]);

        // The service was stalled well past start + grace.
        clocks.sleep(SignedDuration::from_secs(60 + 61));
        s.fire_due();
        assert!(s.pending_captures().is_empty());
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(dispatch.jobs().is_empty());
    }

    #[test]
    fn seed_installs_startup_plan_and_recurring_ticks() {
        let clocks = clocks();
        let dispatch = RecordingDispatch::new();
        let mut s = test_scheduler(&clocks, &dispatch);
        s.seed();

        s.fire_due();
        dispatch.wait_until(|jobs| jobs.len() == 1 && jobs[0] == JobKind::Plan);

        clocks.sleep(SignedDuration::from_secs(61));
        s.fire_due();
        dispatch.wait_until(|jobs| {
            jobs.contains(&JobKind::TranscodeTick) && jobs.contains(&JobKind::BifTick)
        });

        // The ticks rescheduled themselves.
        clocks.sleep(SignedDuration::from_secs(61));
        s.fire_due();
        dispatch.wait_until(|jobs| {
            jobs.iter().filter(|j| **j == JobKind::TranscodeTick).count() == 2
        });
    }

    #[test]
    fn threaded_smoke_test() {
        let clocks = clocks();
        let dispatch = RecordingDispatch::new();
        let mut s = test_scheduler(&clocks, &dispatch);
        let now = clocks.realtime();
        let job = planned("s1", "e1", now + SignedDuration::from_secs(30));
        s.replace_captures(vec![job.clone()]);
        let (handle, rx) = channel();
        let join = thread::Builder::new()
            .name("scheduler".to_owned())
            .spawn(move || s.run(rx))
            .unwrap();
        dispatch.wait_until(|jobs| jobs.contains(&JobKind::Capture(job.clone())));
        handle.shutdown();
        join.join().unwrap();
    }
}
