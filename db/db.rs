// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Database access logic for the Skylight DVR SQLite schema.
//!
//! The SQLite schema holds everything except the captured video and thumbnail
//! files themselves, which live at the paths named by the file-location
//! tables. See `schema.sql` for a more detailed description.
//!
//! The [`Database`] struct assumes only one process is accessing the database
//! at a time. Every mutation is committed before the call returns; there is no
//! in-memory write buffering, as the write rate here is a handful of rows per
//! recording, not per frame.

use base::clock::{self, Clocks};
use base::{bail, err, Error};
use jiff::{SignedDuration, Timestamp};
use rusqlite::{named_params, params};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// Expected schema version. See `schema.sql`.
pub const EXPECTED_SCHEMA_VERSION: i32 = 1;

/// Fixed-width UTC time format used everywhere in the database, chosen so
/// that SQL string comparison matches chronological comparison. `jiff`'s
/// default `Display` is variable-width (subseconds appear only when nonzero)
/// and does not have that property.
const SQL_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

pub(crate) fn to_sql_time(t: Timestamp) -> String {
    t.strftime(SQL_TIME_FORMAT).to_string()
}

pub(crate) fn from_sql_time(s: &str) -> Result<Timestamp, Error> {
    Timestamp::strptime(SQL_TIME_FORMAT, s)
        .map_err(|e| err!(DataLoss, msg("invalid time {s:?} in database"), source(e)))
}

/// `category_code` / `rerun_code` column value. Listings stamp airings `N`
/// (new) or `R` (rerun); the user may later move a recording to `A`
/// (archived). The same column carries all three.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CategoryCode {
    New,
    Rerun,
    Archived,
}

impl CategoryCode {
    pub fn as_str(self) -> &'static str {
        match self {
            CategoryCode::New => "N",
            CategoryCode::Rerun => "R",
            CategoryCode::Archived => "A",
        }
    }
}

impl rusqlite::types::FromSql for CategoryCode {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        match value.as_str()? {
            "N" => Ok(CategoryCode::New),
            "R" => Ok(CategoryCode::Rerun),
            "A" => Ok(CategoryCode::Archived),
            other => Err(rusqlite::types::FromSqlError::Other(
                format!("unknown category code {other:?}").into(),
            )),
        }
    }
}

impl rusqlite::types::ToSql for CategoryCode {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// `state` column of `file_transcoded_video`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TranscodeState {
    Success,
    Failure,
}

impl rusqlite::types::FromSql for TranscodeState {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        match value.as_i64()? {
            0 => Ok(TranscodeState::Success),
            1 => Ok(TranscodeState::Failure),
            other => Err(rusqlite::types::FromSqlError::Other(
                format!("unknown transcode state {other}").into(),
            )),
        }
    }
}

impl rusqlite::types::ToSql for TranscodeState {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(match self {
            TranscodeState::Success => 0i64,
            TranscodeState::Failure => 1i64,
        }
        .into())
    }
}

/// A channel's display identity and tuning parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChannelInfo {
    pub major: u16,
    pub minor: u16,

    /// The tuner frequency channel carrying this (sub)channel.
    pub actual: u16,

    /// The MPEG-TS program number within `actual`.
    pub program: u16,
}

/// A physical tuner on a network appliance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TunerInfo {
    pub device_id: String,
    pub ip_address: String,
    pub tuner_index: u32,
}

/// A subscribed upcoming airing the planner has selected for capture.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlannedRecording {
    pub channel_major: u16,
    pub channel_minor: u16,
    pub start: Timestamp,
    pub duration: SignedDuration,
    pub show_id: String,
    pub episode_id: String,
    pub rerun: CategoryCode,
}

/// An airing to be inserted by a listing import.
#[derive(Clone, Debug)]
pub struct ScheduleToInsert {
    pub channel_major: u16,
    pub channel_minor: u16,
    pub start: Timestamp,
    pub duration: SignedDuration,
    pub show_id: String,
    pub episode_id: String,
    pub rerun: CategoryCode,
}

/// A file-location row: a recording id plus the path recorded for it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileRef {
    pub recording_id: i64,
    pub filename: String,
}

/// One show in the set-top client's library listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShowSummary {
    pub show_id: String,
    pub name: String,
    pub image_url: Option<String>,
}

/// One playable episode of a show in the set-top client's library listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EpisodeSummary {
    pub recording_id: i64,
    pub show_id: String,
    pub episode_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub episode_image_url: Option<String>,
    pub show_image_url: Option<String>,
}

/// Full detail for one recording, for the set-top client's detail screen.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordingSummary {
    pub recording_id: i64,
    pub show_name: String,
    pub show_image_url: Option<String>,
    pub episode_id: String,
    pub episode_title: Option<String>,
    pub episode_description: Option<String>,
    pub date_recorded: Timestamp,
    pub duration: SignedDuration,
}

/// Parses the leading digits of an episode id for display ordering, so that
/// e.g. `1_2` sorts as episode 1 and `10` after `2`.
fn episode_number(episode_id: &str) -> i64 {
    let digits: String = episode_id.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

const PENDING_RECORDINGS_SQL: &str = r#"
    select
      schedule.channel_major,
      schedule.channel_minor,
      schedule.start_time,
      schedule.duration,
      schedule.show_id,
      schedule.episode_id,
      schedule.rerun_code
    from
      schedule
      join subscription on (schedule.show_id = subscription.show_id)
    where
      schedule.start_time > :now
      and schedule.start_time <= :until
      and not exists (
        select
          1
        from
          recorded_episodes_by_id r
        where
          r.show_id = schedule.show_id
          and r.episode_id = schedule.episode_id
      )
    order by
      schedule.show_id,
      schedule.episode_id,
      schedule.start_time
"#;

const AWAITING_TRANSCODE_SQL: &str = r#"
    select
      recording_id,
      filename
    from
      file_raw_video
    where
      recording_id not in (select recording_id from file_transcoded_video)
    order by
      recording_id
"#;

const AWAITING_BIF_SQL: &str = r#"
    select
      recording_id,
      filename
    from
      file_transcoded_video
    where
      state = 0
      and recording_id not in (select recording_id from file_bif)
    order by
      recording_id
"#;

const ORPHANED_RAW_SQL: &str = r#"
    select
      recording_id,
      filename
    from
      file_raw_video
    where
      recording_id not in (select recording_id from recording)
    order by
      recording_id
"#;

const ORPHANED_TRANSCODED_SQL: &str = r#"
    select
      recording_id,
      filename
    from
      file_transcoded_video
    where
      recording_id not in (select recording_id from recording)
    order by
      recording_id
"#;

const ORPHANED_BIF_SQL: &str = r#"
    select
      recording_id,
      filename
    from
      file_bif
    where
      recording_id not in (select recording_id from recording)
    order by
      recording_id
"#;

const SUPERSEDED_RAW_SQL: &str = r#"
    select
      file_raw_video.recording_id,
      file_raw_video.filename
    from
      file_raw_video
      join file_transcoded_video using (recording_id)
    where
      file_transcoded_video.state = 0
    order by
      file_raw_video.recording_id
"#;

const TRANSCODE_FAILURES_SQL: &str = r#"
    select
      recording_id,
      filename
    from
      file_transcoded_video
    where
      state = 1
    order by
      recording_id
"#;

const NAKED_RECORDINGS_SQL: &str = r#"
    select
      recording_id
    from
      recording
    where
      recording_id not in (select recording_id from recorded_episodes_by_id)
    order by
      recording_id
"#;

const SHOWS_WITH_RECORDINGS_SQL: &str = r#"
    select distinct
      recording.show_id,
      show.name,
      show.image_url
    from
      recording
      join show on (recording.show_id = show.show_id)
    where
      recording.recording_id in (select recording_id from file_bif)
      and recording.category_code = :category
    order by
      show.name
"#;

const EPISODES_FOR_SHOW_SQL: &str = r#"
    select
      recording.recording_id,
      recording.show_id,
      recording.episode_id,
      episode.title,
      episode.description,
      episode.image_url,
      show.image_url
    from
      recording
      join file_transcoded_video on (recording.recording_id = file_transcoded_video.recording_id)
      join file_bif on (recording.recording_id = file_bif.recording_id)
      join episode on (recording.show_id = episode.show_id
                       and recording.episode_id = episode.episode_id)
      join show on (recording.show_id = show.show_id)
    where
      file_transcoded_video.state = 0
      and recording.show_id = :show_id
      and recording.category_code = :category
"#;

const RECORDING_SUMMARY_SQL: &str = r#"
    select
      recording.recording_id,
      show.name,
      show.image_url,
      episode.episode_id,
      episode.title,
      episode.description,
      recording.date_recorded,
      recording.duration
    from
      recording
      join show on (recording.show_id = show.show_id)
      join episode on (recording.show_id = episode.show_id
                       and recording.episode_id = episode.episode_id)
    where
      recording.recording_id = :recording_id
"#;

/// Initializes a database.
/// Note this doesn't set journal options, so that it can be used on in-memory databases for
/// test code.
pub fn init(conn: &mut rusqlite::Connection) -> Result<(), Error> {
    let tx = conn.transaction()?;
    tx.execute_batch(include_str!("schema.sql"))
        .map_err(|e| err!(Internal, msg("unable to create database schema"), source(e)))?;
    tx.execute(
        "insert into schema_version (version) values (?)",
        params![EXPECTED_SCHEMA_VERSION],
    )?;
    tx.execute("insert into uniqueid (next_id) values (1)", params![])?;
    tx.commit()?;
    Ok(())
}

/// Gets the schema version from the given database connection.
/// A fully initialized database will return `Ok(Some(schema_version))`. An
/// empty database will return `Ok(None)`. A partially initialized database
/// (in particular, one without a version row) will return some error.
pub fn get_schema_version(conn: &rusqlite::Connection) -> Result<Option<i32>, Error> {
    let ver_tables: i32 = conn.query_row_and_then(
        "select count(*) from sqlite_master where name = 'schema_version'",
        params![],
        |row| row.get(0),
    )?;
    if ver_tables == 0 {
        return Ok(None);
    }
    Ok(Some(conn.query_row_and_then(
        "select version from schema_version",
        params![],
        |row| row.get(0),
    )?))
}

/// Checks that the schema version in the given database is as expected.
pub(crate) fn check_schema_version(conn: &rusqlite::Connection) -> Result<(), Error> {
    let Some(ver) = get_schema_version(conn)? else {
        bail!(
            FailedPrecondition,
            msg("no such table: schema_version; run `skylight-dvr init` on an empty database")
        )
    };
    match ver.cmp(&EXPECTED_SCHEMA_VERSION) {
        std::cmp::Ordering::Less => bail!(
            FailedPrecondition,
            msg("database schema version {ver} is too old (expected {EXPECTED_SCHEMA_VERSION})")
        ),
        std::cmp::Ordering::Equal => Ok(()),
        std::cmp::Ordering::Greater => bail!(
            FailedPrecondition,
            msg(
                "database schema version {ver} is too new (expected \
                {EXPECTED_SCHEMA_VERSION}); must use a newer binary to match"
            )
        ),
    }
}

/// The recorder database. Abstracts away all SQLite statements.
#[derive(Debug)]
pub struct Database<C: Clocks + Clone = clock::RealClocks> {
    db: Mutex<LockedDatabase>,

    /// This is kept separately from the `LockedDatabase` to allow the `lock()` operation itself to
    /// access it. It doesn't need a `Mutex` anyway; it's `Sync`, and all operations work on
    /// `&self`.
    clocks: C,
}

impl<C: Clocks + Clone> Database<C> {
    pub fn new(clocks: C, conn: rusqlite::Connection) -> Result<Self, Error> {
        check_schema_version(&conn)?;
        info!("database loaded (schema version {EXPECTED_SCHEMA_VERSION})");
        Ok(Database {
            db: Mutex::new(LockedDatabase { conn }),
            clocks,
        })
    }

    /// Locks the database; the returned reference is the only way to perform
    /// (read or write) operations.
    pub fn lock(&self) -> MutexGuard<'_, LockedDatabase> {
        self.db.lock().unwrap()
    }

    pub fn clocks(&self) -> &C {
        &self.clocks
    }
}

#[derive(Debug)]
pub struct LockedDatabase {
    conn: rusqlite::Connection,
}

impl LockedDatabase {
    /// Atomically takes the next recording id from the single-row counter.
    /// Successive calls yield strictly increasing values.
    pub fn allocate_recording_id(&mut self) -> Result<i64, Error> {
        let tx = self.conn.transaction()?;
        let id: i64 = tx.query_row("select next_id from uniqueid", params![], |row| row.get(0))?;
        tx.execute("update uniqueid set next_id = ?", params![id + 1])?;
        tx.commit()?;
        Ok(id)
    }

    pub fn list_channels(&self) -> Result<Vec<ChannelInfo>, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("select major, minor, actual, program from channel")?;
        let mut rows = stmt.query(params![])?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next()? {
            channels.push(ChannelInfo {
                major: row.get(0)?,
                minor: row.get(1)?,
                actual: row.get(2)?,
                program: row.get(3)?,
            });
        }
        Ok(channels)
    }

    pub fn list_tuners(&self) -> Result<Vec<TunerInfo>, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("select device_id, ip_address, tuner_index from tuner")?;
        let mut rows = stmt.query(params![])?;
        let mut tuners = Vec::new();
        while let Some(row) = rows.next()? {
            tuners.push(TunerInfo {
                device_id: row.get(0)?,
                ip_address: row.get(1)?,
                tuner_index: row.get(2)?,
            });
        }
        Ok(tuners)
    }

    pub fn insert_channel(&mut self, c: &ChannelInfo) -> Result<(), Error> {
        self.conn.execute(
            "insert into channel (major, minor, actual, program) values (?, ?, ?, ?)",
            params![c.major, c.minor, c.actual, c.program],
        )?;
        Ok(())
    }

    pub fn insert_tuner(&mut self, t: &TunerInfo) -> Result<(), Error> {
        self.conn.execute(
            "insert into tuner (device_id, ip_address, tuner_index) values (?, ?, ?)",
            params![t.device_id, t.ip_address, t.tuner_index],
        )?;
        Ok(())
    }

    pub fn insert_show(
        &mut self,
        show_id: &str,
        show_type: Option<&str>,
        name: &str,
        image_url: Option<&str>,
    ) -> Result<(), Error> {
        self.conn.execute(
            "insert into show (show_id, show_type, name, image_url) values (?, ?, ?, ?)",
            params![show_id, show_type, name, image_url],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_episode(
        &mut self,
        show_id: &str,
        episode_id: &str,
        title: Option<&str>,
        description: Option<&str>,
        part_code: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<(), Error> {
        self.conn.execute(
            "insert into episode (show_id, episode_id, title, description, part_code, image_url) \
             values (?, ?, ?, ?, ?, ?)",
            params![show_id, episode_id, title, description, part_code, image_url],
        )?;
        Ok(())
    }

    pub fn insert_subscription(&mut self, show_id: &str, priority: i32) -> Result<(), Error> {
        self.conn.execute(
            "insert into subscription (show_id, priority) values (?, ?)",
            params![show_id, priority],
        )?;
        Ok(())
    }

    pub fn delete_subscription(&mut self, show_id: &str) -> Result<bool, Error> {
        let n = self
            .conn
            .execute("delete from subscription where show_id = ?", params![show_id])?;
        Ok(n > 0)
    }

    pub fn insert_schedule(&mut self, s: &ScheduleToInsert) -> Result<(), Error> {
        let mut stmt = self.conn.prepare_cached(
            "insert into schedule (channel_major, channel_minor, start_time, duration, \
                                   show_id, episode_id, rerun_code) \
             values (?, ?, ?, ?, ?, ?, ?)",
        )?;
        stmt.execute(params![
            s.channel_major,
            s.channel_minor,
            to_sql_time(s.start),
            s.duration.as_secs(),
            s.show_id,
            s.episode_id,
            s.rerun,
        ])?;
        Ok(())
    }

    /// Replaces the entire schedule table with the given airings, as one
    /// transaction. Listing imports supersede all previous projections.
    pub fn replace_schedules(&mut self, schedules: &[ScheduleToInsert]) -> Result<(), Error> {
        let tx = self.conn.transaction()?;
        tx.execute("delete from schedule", params![])?;
        {
            let mut stmt = tx.prepare(
                "insert into schedule (channel_major, channel_minor, start_time, duration, \
                                       show_id, episode_id, rerun_code) \
                 values (?, ?, ?, ?, ?, ?, ?)",
            )?;
            for s in schedules {
                stmt.execute(params![
                    s.channel_major,
                    s.channel_minor,
                    to_sql_time(s.start),
                    s.duration.as_secs(),
                    s.show_id,
                    s.episode_id,
                    s.rerun,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Returns subscribed airings starting in `(now, now + window]` whose
    /// `(show_id, episode_id)` is not already represented by a raw or
    /// transcoded file. When the same episode airs several times in the
    /// window, only the earliest airing is returned. A bare `recording` row
    /// (a capture that produced no file) does not suppress replanning.
    pub fn pending_recordings(
        &self,
        now: Timestamp,
        window: SignedDuration,
    ) -> Result<Vec<PlannedRecording>, Error> {
        let mut stmt = self.conn.prepare_cached(PENDING_RECORDINGS_SQL)?;
        let mut rows = stmt.query(named_params! {
            ":now": to_sql_time(now),
            ":until": to_sql_time(now + window),
        })?;
        // SQLite has no `distinct on (show_id, episode_id)`, so dedup here;
        // the sort order guarantees the first row per key is the earliest.
        let mut pending: Vec<PlannedRecording> = Vec::new();
        while let Some(row) = rows.next()? {
            let show_id: String = row.get(4)?;
            let episode_id: String = row.get(5)?;
            if let Some(last) = pending.last() {
                if last.show_id == show_id && last.episode_id == episode_id {
                    continue;
                }
            }
            let start: String = row.get(2)?;
            pending.push(PlannedRecording {
                channel_major: row.get(0)?,
                channel_minor: row.get(1)?,
                start: from_sql_time(&start)?,
                duration: SignedDuration::from_secs(row.get(3)?),
                show_id,
                episode_id,
                rerun: row.get(6)?,
            });
        }
        Ok(pending)
    }

    /// Inserts the recording stub. This happens before capture begins, so a
    /// concurrent replan sees the id allocated; whether the episode counts as
    /// recorded is still governed by the file-location tables.
    pub fn create_recording(
        &mut self,
        recording_id: i64,
        show_id: &str,
        episode_id: &str,
        recorded_at: Timestamp,
        duration: SignedDuration,
        category: CategoryCode,
    ) -> Result<(), Error> {
        let mut stmt = self.conn.prepare_cached(
            "insert into recording (recording_id, show_id, episode_id, date_recorded, \
                                    duration, category_code) \
             values (?, ?, ?, ?, ?, ?)",
        )?;
        stmt.execute(params![
            recording_id,
            show_id,
            episode_id,
            to_sql_time(recorded_at),
            duration.as_secs(),
            category,
        ])?;
        Ok(())
    }

    pub fn attach_raw(&mut self, recording_id: i64, filename: &str) -> Result<(), Error> {
        self.conn.execute(
            "insert into file_raw_video (recording_id, filename) values (?, ?)",
            params![recording_id, filename],
        )?;
        Ok(())
    }

    pub fn attach_transcoded(
        &mut self,
        recording_id: i64,
        location_id: i64,
        filename: &str,
        state: TranscodeState,
    ) -> Result<(), Error> {
        self.conn.execute(
            "insert into file_transcoded_video (recording_id, location_id, filename, state) \
             values (?, ?, ?, ?)",
            params![recording_id, location_id, filename, state],
        )?;
        Ok(())
    }

    pub fn attach_bif(
        &mut self,
        recording_id: i64,
        location_id: i64,
        filename: &str,
    ) -> Result<(), Error> {
        self.conn.execute(
            "insert into file_bif (recording_id, location_id, filename) values (?, ?, ?)",
            params![recording_id, location_id, filename],
        )?;
        Ok(())
    }

    fn file_refs(&self, sql: &str) -> Result<Vec<FileRef>, Error> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let mut rows = stmt.query(params![])?;
        let mut refs = Vec::new();
        while let Some(row) = rows.next()? {
            refs.push(FileRef {
                recording_id: row.get(0)?,
                filename: row.get(1)?,
            });
        }
        Ok(refs)
    }

    /// Raw captures with no transcoded row yet, in recording-id order.
    pub fn recordings_awaiting_transcode(&self) -> Result<Vec<FileRef>, Error> {
        self.file_refs(AWAITING_TRANSCODE_SQL)
    }

    /// Successfully transcoded recordings with no thumbnail index yet.
    pub fn recordings_awaiting_bif(&self) -> Result<Vec<FileRef>, Error> {
        self.file_refs(AWAITING_BIF_SQL)
    }

    /// The recording's planned duration, or zero if the row is missing.
    pub fn recording_duration(&self, recording_id: i64) -> Result<SignedDuration, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("select duration from recording where recording_id = ?")?;
        let mut rows = stmt.query(params![recording_id])?;
        match rows.next()? {
            Some(row) => Ok(SignedDuration::from_secs(row.get(0)?)),
            None => Ok(SignedDuration::ZERO),
        }
    }

    pub fn orphaned_raw_files(&self) -> Result<Vec<FileRef>, Error> {
        self.file_refs(ORPHANED_RAW_SQL)
    }

    pub fn orphaned_transcoded_files(&self) -> Result<Vec<FileRef>, Error> {
        self.file_refs(ORPHANED_TRANSCODED_SQL)
    }

    pub fn orphaned_bif_files(&self) -> Result<Vec<FileRef>, Error> {
        self.file_refs(ORPHANED_BIF_SQL)
    }

    /// Raw captures whose recording has a successful transcode; the raw file
    /// is no longer needed.
    pub fn superseded_raw_files(&self) -> Result<Vec<FileRef>, Error> {
        self.file_refs(SUPERSEDED_RAW_SQL)
    }

    /// Transcoded rows with `state = 1`, for the failures view.
    pub fn transcode_failures(&self) -> Result<Vec<FileRef>, Error> {
        self.file_refs(TRANSCODE_FAILURES_SQL)
    }

    /// Recording rows with neither a raw nor a transcoded file: capture
    /// attempts that failed outright. These linger until manual deletion.
    pub fn recordings_without_files(&self) -> Result<Vec<i64>, Error> {
        let mut stmt = self.conn.prepare_cached(NAKED_RECORDINGS_SQL)?;
        let mut rows = stmt.query(params![])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    pub fn list_raw_files(&self) -> Result<Vec<FileRef>, Error> {
        self.file_refs("select recording_id, filename from file_raw_video order by recording_id")
    }

    pub fn list_transcoded_files(&self) -> Result<Vec<FileRef>, Error> {
        self.file_refs(
            "select recording_id, filename from file_transcoded_video order by recording_id",
        )
    }

    pub fn list_bif_files(&self) -> Result<Vec<FileRef>, Error> {
        self.file_refs("select recording_id, filename from file_bif order by recording_id")
    }

    pub fn delete_raw_file(&mut self, recording_id: i64) -> Result<bool, Error> {
        let n = self.conn.execute(
            "delete from file_raw_video where recording_id = ?",
            params![recording_id],
        )?;
        Ok(n > 0)
    }

    pub fn delete_transcoded_file(&mut self, recording_id: i64) -> Result<bool, Error> {
        let n = self.conn.execute(
            "delete from file_transcoded_video where recording_id = ?",
            params![recording_id],
        )?;
        Ok(n > 0)
    }

    pub fn delete_bif_file(&mut self, recording_id: i64) -> Result<bool, Error> {
        let n = self.conn.execute(
            "delete from file_bif where recording_id = ?",
            params![recording_id],
        )?;
        Ok(n > 0)
    }

    pub fn delete_recording(&mut self, recording_id: i64) -> Result<bool, Error> {
        let n = self.conn.execute(
            "delete from recording where recording_id = ?",
            params![recording_id],
        )?;
        Ok(n > 0)
    }

    /// Drops a failed transcode row so the next transcoder tick will retry
    /// the recording from its raw capture.
    pub fn retry_transcode(&mut self, recording_id: i64) -> Result<bool, Error> {
        self.delete_transcoded_file(recording_id)
    }

    /// The last watched position in seconds; 0 if never watched.
    pub fn playback_position(&self, recording_id: i64) -> Result<i64, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("select position from playback_position where recording_id = ?")?;
        let mut rows = stmt.query(params![recording_id])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    pub fn set_playback_position(&mut self, recording_id: i64, position: i64) -> Result<(), Error> {
        self.conn.execute(
            "insert into playback_position (recording_id, position) values (?, ?) \
             on conflict (recording_id) do update set position = excluded.position",
            params![recording_id, position],
        )?;
        Ok(())
    }

    pub fn category(&self, recording_id: i64) -> Result<Option<CategoryCode>, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("select category_code from recording where recording_id = ?")?;
        let mut rows = stmt.query(params![recording_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn set_category(&mut self, recording_id: i64, category: CategoryCode) -> Result<bool, Error> {
        let n = self.conn.execute(
            "update recording set category_code = ? where recording_id = ?",
            params![category, recording_id],
        )?;
        Ok(n > 0)
    }

    /// Shows having at least one fully processed (transcoded and thumbnailed)
    /// recording in any of the given categories, ordered by name.
    pub fn shows_with_recordings(
        &self,
        categories: &[CategoryCode],
    ) -> Result<Vec<ShowSummary>, Error> {
        let mut shows: Vec<ShowSummary> = Vec::new();
        let mut stmt = self.conn.prepare_cached(SHOWS_WITH_RECORDINGS_SQL)?;
        for category in categories {
            let mut rows = stmt.query(named_params! {":category": category})?;
            while let Some(row) = rows.next()? {
                let show_id: String = row.get(0)?;
                if shows.iter().any(|s| s.show_id == show_id) {
                    continue;
                }
                shows.push(ShowSummary {
                    show_id,
                    name: row.get(1)?,
                    image_url: row.get(2)?,
                });
            }
        }
        shows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(shows)
    }

    /// Playable episodes of the given show in the given categories, ordered by
    /// the numeric prefix of the episode id.
    pub fn episodes_for_show(
        &self,
        show_id: &str,
        categories: &[CategoryCode],
    ) -> Result<Vec<EpisodeSummary>, Error> {
        let mut episodes: Vec<EpisodeSummary> = Vec::new();
        let mut stmt = self.conn.prepare_cached(EPISODES_FOR_SHOW_SQL)?;
        for category in categories {
            let mut rows = stmt.query(named_params! {
                ":show_id": show_id,
                ":category": category,
            })?;
            while let Some(row) = rows.next()? {
                episodes.push(EpisodeSummary {
                    recording_id: row.get(0)?,
                    show_id: row.get(1)?,
                    episode_id: row.get(2)?,
                    title: row.get(3)?,
                    description: row.get(4)?,
                    episode_image_url: row.get(5)?,
                    show_image_url: row.get(6)?,
                });
            }
        }
        episodes.sort_by_key(|e| episode_number(&e.episode_id));
        Ok(episodes)
    }

    pub fn recording_summary(&self, recording_id: i64) -> Result<Option<RecordingSummary>, Error> {
        let mut stmt = self.conn.prepare_cached(RECORDING_SUMMARY_SQL)?;
        let mut rows = stmt.query(named_params! {":recording_id": recording_id})?;
        match rows.next()? {
            None => Ok(None),
            Some(row) => {
                let date_recorded: String = row.get(6)?;
                Ok(Some(RecordingSummary {
                    recording_id: row.get(0)?,
                    show_name: row.get(1)?,
                    show_image_url: row.get(2)?,
                    episode_id: row.get(3)?,
                    episode_title: row.get(4)?,
                    episode_description: row.get(5)?,
                    date_recorded: from_sql_time(&date_recorded)?,
                    duration: SignedDuration::from_secs(row.get(7)?),
                }))
            }
        }
    }

    pub fn transcoded_location(&self, recording_id: i64) -> Result<Option<i64>, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("select location_id from file_transcoded_video where recording_id = ?")?;
        let mut rows = stmt.query(params![recording_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn bif_location(&self, recording_id: i64) -> Result<Option<i64>, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("select location_id from file_bif where recording_id = ?")?;
        let mut rows = stmt.query(params![recording_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// The start time of the last known airing, an indication of how much
    /// guide data remains.
    pub fn latest_schedule_start(&self) -> Result<Option<Timestamp>, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("select max(start_time) from schedule")?;
        let mut rows = stmt.query(params![])?;
        match rows.next()? {
            Some(row) => {
                let t: Option<String> = row.get(0)?;
                t.map(|s| from_sql_time(&s)).transpose()
            }
            None => Ok(None),
        }
    }
}
