// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Logic for setting up a `tracing` subscriber according to our preferences.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber for normal operation. Panics on a second call.
pub fn install() {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_thread_names(true))
        .init();
}

/// Installs a subscriber for tests, writing through the test harness's capture.
/// Repeated calls are no-ops, so every test can call this unconditionally.
pub fn install_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_test_writer().with_thread_names(true))
        .try_init();
}
