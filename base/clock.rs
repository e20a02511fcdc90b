// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Clock interface and implementations for testability.

use jiff::{SignedDuration, Timestamp};
use std::mem;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration as StdDuration;
use tracing::warn;

/// Abstract interface to the system clocks. This is for testability.
pub trait Clocks: Send + Sync + 'static {
    /// Gets the current time from `CLOCK_REALTIME`.
    fn realtime(&self) -> Timestamp;

    /// Gets the time since some arbitrary fixed point from a monotonic clock.
    ///
    /// On Linux, this uses `CLOCK_BOOTTIME`, which includes suspended time.
    /// On other systems, it uses `CLOCK_MONOTONIC`.
    fn monotonic(&self) -> SignedDuration;

    /// Causes the current thread to sleep for the specified time.
    fn sleep(&self, how_long: SignedDuration);

    /// Calls `rcv.recv_timeout` or substitutes a test implementation.
    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: StdDuration,
    ) -> Result<T, mpsc::RecvTimeoutError>;
}

#[derive(Copy, Clone)]
pub struct RealClocks {}

impl RealClocks {
    fn get(&self, clock: libc::clockid_t) -> (i64, i32) {
        unsafe {
            let mut ts = mem::MaybeUninit::uninit();
            assert_eq!(0, libc::clock_gettime(clock, ts.as_mut_ptr()));
            let ts = ts.assume_init();
            // On 32-bit arm builds, `tv_sec` is an `i32` and requires conversion.
            // On other platforms, the `.into()` is a no-op.
            #[allow(clippy::useless_conversion)]
            (ts.tv_sec.into(), ts.tv_nsec as i32)
        }
    }
}

impl Clocks for RealClocks {
    fn realtime(&self) -> Timestamp {
        let (sec, nsec) = self.get(libc::CLOCK_REALTIME);
        Timestamp::new(sec, nsec).expect("CLOCK_REALTIME out of Timestamp range")
    }

    #[cfg(target_os = "linux")]
    fn monotonic(&self) -> SignedDuration {
        let (sec, nsec) = self.get(libc::CLOCK_BOOTTIME);
        SignedDuration::new(sec, nsec)
    }

    #[cfg(not(target_os = "linux"))]
    fn monotonic(&self) -> SignedDuration {
        let (sec, nsec) = self.get(libc::CLOCK_MONOTONIC);
        SignedDuration::new(sec, nsec)
    }

    fn sleep(&self, how_long: SignedDuration) {
        match StdDuration::try_from(how_long) {
            Ok(d) => thread::sleep(d),
            Err(err) => warn!(%err, "invalid duration {:?}", how_long),
        };
    }

    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: StdDuration,
    ) -> Result<T, mpsc::RecvTimeoutError> {
        rcv.recv_timeout(timeout)
    }
}

/// Logs a warning if the TimerGuard lives "too long", using the label created by a supplied
/// function.
pub struct TimerGuard<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> {
    clocks: &'a C,
    label_f: Option<F>,
    start: SignedDuration,
}

impl<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> TimerGuard<'a, C, S, F> {
    pub fn new(clocks: &'a C, label_f: F) -> Self {
        TimerGuard {
            clocks,
            label_f: Some(label_f),
            start: clocks.monotonic(),
        }
    }
}

impl<'a, C, S, F> Drop for TimerGuard<'a, C, S, F>
where
    C: Clocks + ?Sized,
    S: AsRef<str>,
    F: FnOnce() -> S + 'a,
{
    fn drop(&mut self) {
        let elapsed = self.clocks.monotonic() - self.start;
        if elapsed.as_secs() >= 1 {
            let label_f = self.label_f.take().unwrap();
            warn!("{} took {}!", label_f().as_ref(), elapsed);
        }
    }
}

/// Simulated clock for testing.
#[derive(Clone, Debug)]
pub struct SimulatedClocks(Arc<SimulatedClocksInner>);

#[derive(Debug)]
struct SimulatedClocksInner {
    boot: Timestamp,
    uptime: Mutex<SignedDuration>,
}

impl SimulatedClocks {
    pub fn new(boot: Timestamp) -> Self {
        SimulatedClocks(Arc::new(SimulatedClocksInner {
            boot,
            uptime: Mutex::new(SignedDuration::ZERO),
        }))
    }
}

impl Clocks for SimulatedClocks {
    fn realtime(&self) -> Timestamp {
        self.0.boot + *self.0.uptime.lock().unwrap()
    }
    fn monotonic(&self) -> SignedDuration {
        *self.0.uptime.lock().unwrap()
    }

    /// Advances the clock by the specified amount without actually sleeping.
    fn sleep(&self, how_long: SignedDuration) {
        let mut l = self.0.uptime.lock().unwrap();
        *l = *l + how_long;
    }

    /// Advances the clock by the specified amount if data is not immediately available.
    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: StdDuration,
    ) -> Result<T, mpsc::RecvTimeoutError> {
        let r = rcv.recv_timeout(StdDuration::new(0, 0));
        if r.is_err() {
            self.sleep(SignedDuration::try_from(timeout).unwrap());
        }
        r
    }
}
