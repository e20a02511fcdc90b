// This file is part of Skylight DVR, an over-the-air television recorder.
// Copyright (C) 2025 The Skylight DVR Authors.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Builds BIF thumbnail-index files for scrub previews: extracts frames from
//! the transcoded video at a fixed interval, then packs them into the BIF
//! container the set-top scrub UI consumes.

use crate::process::{self, Invoker};
use base::clock::Clocks;
use base::strutil::expand_placeholders;
use base::{err, Error};
use byteorder::{LittleEndian, WriteBytesExt};
use db::{Database, FileRef};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

const LOCATION_ID: i64 = 1;

const BIF_MAGIC: [u8; 8] = [0x89, 0x42, 0x49, 0x46, 0x0d, 0x0a, 0x1a, 0x0a];
const BIF_VERSION: u32 = 0;
const BIF_HEADER_LEN: u64 = 64;

/// Writes a BIF file from the 0-indexed `%08d.jpg` frames in `image_dir`.
///
/// Layout: 8-byte magic; u32 version; u32 image count; u32 frame interval in
/// ms; zero padding to byte 64; an index of `(u32 timestamp, u32 absolute
/// offset)` entries, timestamps counting up from 0, terminated by a
/// `(0xffffffff, end offset)` sentinel; then the JPEG bodies back to back.
pub fn write_bif(path: &Path, image_dir: &Path, frame_interval_ms: u32) -> Result<(), Error> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(image_dir)?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("jpg")) {
                Some(path)
            } else {
                None
            }
        })
        .collect();
    images.sort();

    let count = u32::try_from(images.len())
        .map_err(|_| err!(OutOfRange, msg("too many images for a BIF index")))?;
    let mut out = BufWriter::new(std::fs::File::create(path)?);
    out.write_all(&BIF_MAGIC)?;
    out.write_u32::<LittleEndian>(BIF_VERSION)?;
    out.write_u32::<LittleEndian>(count)?;
    out.write_u32::<LittleEndian>(frame_interval_ms)?;
    out.write_all(&[0u8; 44])?; // pad the header to 64 bytes

    // Index entries point at absolute offsets in the finished file.
    let index_len = 8 * (u64::from(count) + 1);
    let mut offset = BIF_HEADER_LEN + index_len;
    for (timestamp, image) in images.iter().enumerate() {
        out.write_u32::<LittleEndian>(timestamp as u32)?;
        out.write_u32::<LittleEndian>(
            u32::try_from(offset).map_err(|_| err!(OutOfRange, msg("BIF exceeds 4 GiB")))?,
        )?;
        offset += std::fs::metadata(image)?.len();
    }
    out.write_u32::<LittleEndian>(0xffff_ffff)?;
    out.write_u32::<LittleEndian>(
        u32::try_from(offset).map_err(|_| err!(OutOfRange, msg("BIF exceeds 4 GiB")))?,
    )?;

    for image in &images {
        let mut f = std::fs::File::open(image)?;
        std::io::copy(&mut f, &mut out)?;
    }
    out.flush()?;
    Ok(())
}

pub struct BifBuilder<C: Clocks + Clone, I: Invoker> {
    db: Arc<Database<C>>,
    extract_command_spec: String,
    image_dir: PathBuf,
    bif_path_spec: String,
    frame_interval_ms: u32,
    invoker: I,
    shutdown_rx: base::shutdown::Receiver,
    busy: AtomicBool,
}

impl<C: Clocks + Clone, I: Invoker> BifBuilder<C, I> {
    pub fn new(
        db: Arc<Database<C>>,
        extract_command_spec: String,
        image_dir: PathBuf,
        bif_path_spec: String,
        frame_interval_ms: u32,
        invoker: I,
        shutdown_rx: base::shutdown::Receiver,
    ) -> Self {
        BifBuilder {
            db,
            extract_command_spec,
            image_dir,
            bif_path_spec,
            frame_interval_ms,
            invoker,
            shutdown_rx,
            busy: AtomicBool::new(false),
        }
    }

    /// Periodic entry point; single-flight, one recording per tick.
    pub fn tick(&self) {
        if self.busy.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tick_inner();
        self.busy.store(false, Ordering::SeqCst);
    }

    fn tick_inner(&self) {
        let awaiting = match self.db.lock().recordings_awaiting_bif() {
            Ok(a) => a,
            Err(e) => {
                error!(err = %e.chain(), "unable to query recordings awaiting thumbnails");
                return;
            }
        };
        let Some(recording) = awaiting.first() else {
            return;
        };
        if let Err(e) = self.build(recording) {
            error!(
                recording_id = recording.recording_id,
                err = %e.chain(),
                "thumbnail index generation failed"
            );
        }
    }

    fn image_path(&self, file_number: usize) -> PathBuf {
        self.image_dir.join(format!("{file_number:08}.jpg"))
    }

    /// Removes leftover frames from the scratch directory.
    fn clear_image_dir(&self) -> Result<(), Error> {
        for entry in std::fs::read_dir(&self.image_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("jpg")) {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// The frame extractor numbers its output from 1; the BIF index assumes
    /// the first frame is 0. Shift every frame down by one.
    fn renumber_images(&self) -> Result<(), Error> {
        let mut i = 0;
        while self.image_path(i + 1).is_file() {
            std::fs::rename(self.image_path(i + 1), self.image_path(i))?;
            i += 1;
        }
        debug!(frames = i, "renumbered thumbnails");
        Ok(())
    }

    fn build(&self, recording: &FileRef) -> Result<(), Error> {
        let recording_id = recording.recording_id;
        info!(recording_id, "generating thumbnail index");
        self.clear_image_dir()?;
        let frames_per_second = 1000.0 / f64::from(self.frame_interval_ms);
        let cmd = expand_placeholders(
            &self.extract_command_spec,
            &[
                ("videoFile", &recording.filename),
                ("framesPerSecond", &frames_per_second.to_string()),
                ("imageDir", &self.image_dir.display().to_string()),
            ],
        );
        info!(%cmd, "running frame extractor");
        let argv: Vec<String> = cmd.split_whitespace().map(str::to_owned).collect();
        let log = self.image_dir.join("extract.log");
        let status = process::run_until_done(
            &self.invoker,
            &argv,
            &log,
            self.db.clocks(),
            &self.shutdown_rx,
        )?;
        if status != 0 {
            return Err(err!(
                Unavailable,
                msg("frame extractor exited with status {status}")
            ));
        }
        self.renumber_images()?;
        let bif_path = expand_placeholders(
            &self.bif_path_spec,
            &[("recordingID", &recording_id.to_string())],
        );
        info!(%bif_path, "writing BIF file");
        write_bif(Path::new(&bif_path), &self.image_dir, self.frame_interval_ms)?;
        self.db
            .lock()
            .attach_bif(recording_id, LOCATION_ID, &bif_path)?;
        self.clear_image_dir()?;
        info!(recording_id, "thumbnail index complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Subprocess;
    use base::clock::SimulatedClocks;
    use byteorder::ReadBytesExt;
    use db::testutil::TestDb;
    use db::TranscodeState;
    use std::io::Read;
    use std::sync::Mutex;

    fn fake_jpeg(dir: &Path, index: usize, body: &[u8]) {
        std::fs::write(dir.join(format!("{index:08}.jpg")), body).unwrap();
    }

    #[test]
    fn bif_layout() {
        let dir = tempfile::tempdir().unwrap();
        fake_jpeg(dir.path(), 0, b"frame-zero");
        fake_jpeg(dir.path(), 1, b"frame-one!!");
        fake_jpeg(dir.path(), 2, b"frame-two");
        // Non-jpg entries in the directory are not part of the roll.
        std::fs::write(dir.path().join("extract.log"), b"noise").unwrap();

        let bif_path = dir.path().join("out.bif");
        write_bif(&bif_path, dir.path(), 10000).unwrap();

        let mut f = std::fs::File::open(&bif_path).unwrap();
        let mut magic = [0u8; 8];
        f.read_exact(&mut magic).unwrap();
        assert_eq!(magic, BIF_MAGIC);
        assert_eq!(f.read_u32::<LittleEndian>().unwrap(), 0); // version
        assert_eq!(f.read_u32::<LittleEndian>().unwrap(), 3); // image count
        assert_eq!(f.read_u32::<LittleEndian>().unwrap(), 10000); // interval
        let mut pad = [0u8; 44];
        f.read_exact(&mut pad).unwrap();
        assert_eq!(pad, [0u8; 44]);

        // 64-byte header + 4 index entries (3 images + sentinel) = offset 96.
        let expected = [
            (0, 96),
            (1, 96 + 10),
            (2, 96 + 10 + 11),
            (0xffff_ffff, 96 + 10 + 11 + 9),
        ];
        for (timestamp, offset) in expected {
            assert_eq!(f.read_u32::<LittleEndian>().unwrap(), timestamp);
            assert_eq!(f.read_u32::<LittleEndian>().unwrap(), offset);
        }

        let mut bodies = Vec::new();
        f.read_to_end(&mut bodies).unwrap();
        assert_eq!(bodies, b"frame-zeroframe-one!!frame-two");
    }

    #[test]
    fn bif_with_no_frames_is_just_header_and_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let bif_path = dir.path().join("out.bif");
        write_bif(&bif_path, dir.path(), 10000).unwrap();
        let data = std::fs::read(&bif_path).unwrap();
        assert_eq!(data.len(), 64 + 8);
        assert_eq!(u32::from_le_bytes(data[12..16].try_into().unwrap()), 0);
        assert_eq!(
            u32::from_le_bytes(data[64..68].try_into().unwrap()),
            0xffff_ffff
        );
    }

    /// Extractor stand-in: drops 1-indexed frames into the image directory.
    struct MockExtractor {
        commands: Mutex<Vec<Vec<String>>>,
        image_dir: PathBuf,
        frames: usize,
    }

    impl Invoker for Arc<MockExtractor> {
        fn run(&self, _argv: &[String], _log_path: &Path) -> Result<i32, base::Error> {
            Err(err!(Unimplemented, msg("extractors go through spawn")))
        }

        fn spawn(
            &self,
            argv: &[String],
            _log_path: &Path,
        ) -> Result<Box<dyn Subprocess>, base::Error> {
            self.commands.lock().unwrap().push(argv.to_vec());
            for i in 1..=self.frames {
                fake_jpeg(&self.image_dir, i, format!("frame-{i}").as_bytes());
            }
            Ok(Box::new(MockExtract))
        }
    }

    struct MockExtract;

    impl Subprocess for MockExtract {
        fn terminate(&mut self) -> Result<(), base::Error> {
            Ok(())
        }

        fn wait(&mut self) -> Result<i32, base::Error> {
            Ok(0)
        }

        fn try_wait(&mut self) -> Result<Option<i32>, base::Error> {
            Ok(Some(0))
        }
    }

    #[test]
    fn build_renumbers_writes_and_records() {
        db::testutil::init();
        let clocks = SimulatedClocks::new("2025-03-01T00:00:00Z".parse().unwrap());
        let tdb = TestDb::new(clocks);
        let tmpdir = tempfile::tempdir().unwrap();
        let image_dir = tmpdir.path().join("frames");
        std::fs::create_dir(&image_dir).unwrap();
        {
            let mut l = tdb.db.lock();
            l.attach_transcoded(5, 1, "/video/5.mp4", TranscodeState::Success)
                .unwrap();
        }
        let invoker = Arc::new(MockExtractor {
            commands: Mutex::new(Vec::new()),
            image_dir: image_dir.clone(),
            frames: 2,
        });
        let bif_spec = format!("{}/{{recordingID}}.bif", tmpdir.path().display());
        let (_shutdown_tx, shutdown_rx) = base::shutdown::channel();
        let builder = BifBuilder::new(
            tdb.db.clone(),
            "extract -i {videoFile} -r {framesPerSecond} {imageDir}/%08d.jpg".to_owned(),
            image_dir.clone(),
            bif_spec,
            10000,
            invoker.clone(),
            shutdown_rx,
        );
        builder.tick();

        // The extractor got the expanded template (0.1 fps for a 10 s interval).
        let commands = invoker.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0],
            vec![
                "extract".to_owned(),
                "-i".to_owned(),
                "/video/5.mp4".to_owned(),
                "-r".to_owned(),
                "0.1".to_owned(),
                format!("{}/%08d.jpg", image_dir.display()),
            ]
        );

        // BIF written with both frames, row recorded, scratch dir cleared.
        let bif_path = tmpdir.path().join("5.bif");
        let data = std::fs::read(&bif_path).unwrap();
        assert_eq!(u32::from_le_bytes(data[12..16].try_into().unwrap()), 2);
        assert!(data.ends_with(b"frame-1frame-2"));
        {
            let l = tdb.db.lock();
            assert!(l.recordings_awaiting_bif().unwrap().is_empty());
            assert_eq!(l.bif_location(5).unwrap(), Some(1));
            let rows = l.list_bif_files().unwrap();
            assert_eq!(rows[0].filename, bif_path.display().to_string());
        }
        assert!(!image_dir.join("00000000.jpg").exists());
        assert!(!image_dir.join("00000001.jpg").exists());
    }
}
