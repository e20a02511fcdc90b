// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Allocator for the fixed set of tuners.

use db::TunerInfo;
use std::sync::Mutex;
use tracing::warn;

/// Mutex-guarded partition of the known tuners into available and leased.
/// At any instant each tuner is in exactly one of the two sets.
pub struct TunerPool {
    inner: Mutex<Inner>,
}

struct Inner {
    available: Vec<TunerInfo>,
    leased: Vec<TunerInfo>,
}

impl TunerPool {
    pub fn new(mut tuners: Vec<TunerInfo>) -> Self {
        // Keep a deterministic acquisition order; any order would satisfy the
        // pool contract, but a predictable one keeps logs and tests sane.
        tuners.sort_by(|a, b| {
            (&a.device_id, a.tuner_index).cmp(&(&b.device_id, b.tuner_index))
        });
        TunerPool {
            inner: Mutex::new(Inner {
                available: tuners,
                leased: Vec::new(),
            }),
        }
    }

    /// Leases a tuner, or returns `None` if all are busy. Non-blocking.
    pub fn acquire(&self) -> Option<TunerInfo> {
        let mut l = self.inner.lock().unwrap();
        if l.available.is_empty() {
            return None;
        }
        let tuner = l.available.remove(0);
        l.leased.push(tuner.clone());
        Some(tuner)
    }

    /// Returns a leased tuner to the pool. Releasing a tuner that isn't
    /// currently leased is a no-op, so a double release can't corrupt the
    /// partition.
    pub fn release(&self, tuner: &TunerInfo) {
        let mut l = self.inner.lock().unwrap();
        let Some(i) = l.leased.iter().position(|t| t == tuner) else {
            warn!(
                device_id = %tuner.device_id,
                tuner_index = tuner.tuner_index,
                "released tuner that was not leased"
            );
            return;
        };
        let tuner = l.leased.remove(i);
        let at = l
            .available
            .binary_search_by(|t| (&t.device_id, t.tuner_index).cmp(&(&tuner.device_id, tuner.tuner_index)))
            .unwrap_or_else(|i| i);
        l.available.insert(at, tuner);
    }

    /// (available, leased) counts, for diagnostics.
    pub fn counts(&self) -> (usize, usize) {
        let l = self.inner.lock().unwrap();
        (l.available.len(), l.leased.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuner(device_id: &str, tuner_index: u32) -> TunerInfo {
        TunerInfo {
            device_id: device_id.to_owned(),
            ip_address: "10.0.0.1".to_owned(),
            tuner_index,
        }
    }

    #[test]
    fn acquire_is_deterministic_and_exhausts() {
        let pool = TunerPool::new(vec![tuner("B", 0), tuner("A", 1), tuner("A", 0)]);
        assert_eq!(pool.acquire().unwrap(), tuner("A", 0));
        assert_eq!(pool.acquire().unwrap(), tuner("A", 1));
        assert_eq!(pool.acquire().unwrap(), tuner("B", 0));
        assert_eq!(pool.acquire(), None);
    }

    #[test]
    fn partition_is_conserved() {
        let pool = TunerPool::new(vec![tuner("A", 0), tuner("B", 0)]);
        assert_eq!(pool.counts(), (2, 0));
        let t = pool.acquire().unwrap();
        assert_eq!(pool.counts(), (1, 1));
        pool.release(&t);
        assert_eq!(pool.counts(), (2, 0));
    }

    #[test]
    fn double_release_is_a_no_op() {
        let pool = TunerPool::new(vec![tuner("A", 0)]);
        let t = pool.acquire().unwrap();
        pool.release(&t);
        pool.release(&t);
        assert_eq!(pool.counts(), (1, 0));
        // A second acquire must still yield exactly one tuner.
        assert!(pool.acquire().is_some());
        assert_eq!(pool.acquire(), None);
    }

    #[test]
    fn release_of_unknown_tuner_is_a_no_op() {
        let pool = TunerPool::new(vec![tuner("A", 0)]);
        pool.release(&tuner("Z", 9));
        assert_eq!(pool.counts(), (1, 0));
    }

    #[test]
    fn released_tuner_keeps_deterministic_order() {
        let pool = TunerPool::new(vec![tuner("A", 0), tuner("B", 0)]);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(&b);
        pool.release(&a);
        assert_eq!(pool.acquire().unwrap(), tuner("A", 0));
    }
}
