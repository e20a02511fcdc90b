// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Utilities for automated testing involving Skylight DVR's persistence
//! library. Used for tests of both the `skylight_db` crate itself and the
//! `skylight_dvr` crate.

use crate::db::{self, ChannelInfo, Database, TunerInfo};
use base::clock::Clocks;
use std::sync::Arc;

static INIT: std::sync::Once = std::sync::Once::new();

/// Performs global initialization for tests: sets up logging through the test
/// harness's capture.
pub fn init() {
    INIT.call_once(|| {
        base::tracing_setup::install_for_tests();
    });
}

pub struct TestDb<C: Clocks + Clone> {
    pub db: Arc<Database<C>>,
}

impl<C: Clocks + Clone> TestDb<C> {
    /// Creates an empty in-memory test database.
    pub fn new(clocks: C) -> Self {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        db::init(&mut conn).unwrap();
        TestDb {
            db: Arc::new(Database::new(clocks, conn).unwrap()),
        }
    }

    pub fn seed_channel(&self, major: u16, minor: u16, actual: u16, program: u16) {
        self.db
            .lock()
            .insert_channel(&ChannelInfo {
                major,
                minor,
                actual,
                program,
            })
            .unwrap();
    }

    pub fn seed_tuner(&self, device_id: &str, ip_address: &str, tuner_index: u32) {
        self.db
            .lock()
            .insert_tuner(&TunerInfo {
                device_id: device_id.to_owned(),
                ip_address: ip_address.to_owned(),
                tuner_index,
            })
            .unwrap();
    }

    /// Inserts a show, an episode of it, and a subscription to it. The show
    /// row is created only on first use.
    pub fn seed_subscribed_episode(&self, show_id: &str, episode_id: &str) {
        let mut l = self.db.lock();
        let have_show: bool = {
            // A subscription exists iff we created the show on a prior call.
            l.delete_subscription(show_id).unwrap()
        };
        if !have_show {
            l.insert_show(show_id, Some("series"), show_id, None).unwrap();
        }
        l.insert_subscription(show_id, 1).unwrap();
        l.insert_episode(show_id, episode_id, Some("episode title"), None, None, None)
            .unwrap();
    }
}
