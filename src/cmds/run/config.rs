// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Runtime configuration file (`/etc/skylight-dvr.toml`).

use jiff::civil;
use serde::Deserialize;
use std::path::PathBuf;

fn default_db_dir() -> PathBuf {
    "/var/lib/skylight-dvr/db".into()
}

fn default_frame_interval_ms() -> u32 {
    10_000
}

fn default_fetch_time() -> civil::Time {
    civil::Time::constant(1, 0, 0, 0)
}

fn default_listings_log() -> PathBuf {
    "/dev/null".into()
}

/// Top-level configuration file object.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    /// Directory holding the SQLite3 database.
    #[serde(default = "default_db_dir")]
    pub db_dir: PathBuf,

    /// The address the set-top API server binds; read by that (separate)
    /// surface, not by the recording core.
    #[serde(default)]
    pub listen_addr: Option<std::net::SocketAddr>,

    pub capture: CaptureConfig,
    pub transcode: TranscodeConfig,
    pub bif: BifConfig,

    #[serde(default)]
    pub listings: ListingsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Path to the tuner appliance's CLI binary.
    pub tuner_binary: PathBuf,

    /// Where raw captures land; `{recordingID}` is substituted.
    pub video_path: String,

    /// Where per-capture tuner logs land; `{recordingID}` is substituted.
    pub log_path: String,
}

/// Preset command templates; each may use `{recordingID}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeConfig {
    pub low_command: String,
    pub medium_command: String,
    pub high_command: String,

    /// Where the presets write their output; recorded in the database.
    pub output_path: String,

    pub log_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BifConfig {
    /// Frame-extractor command template; `{videoFile}`, `{framesPerSecond}`,
    /// and `{imageDir}` are substituted.
    pub extract_command: String,

    /// Scratch directory for extracted frames. Cleared around each build.
    pub image_dir: PathBuf,

    /// Where finished BIF files land; `{recordingID}` is substituted.
    pub bif_path: String,

    /// Time between scrub-preview frames, in milliseconds.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingsConfig {
    /// Local wall-clock time (UTC) of the daily guide refresh.
    #[serde(default = "default_fetch_time")]
    pub fetch_time: civil::Time,

    /// Command to run at that time (the external guide fetcher/importer);
    /// omit to rely on out-of-band imports.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default = "default_listings_log")]
    pub log_path: PathBuf,
}

impl Default for ListingsConfig {
    fn default() -> Self {
        ListingsConfig {
            fetch_time: default_fetch_time(),
            command: None,
            log_path: default_listings_log(),
        }
    }
}
