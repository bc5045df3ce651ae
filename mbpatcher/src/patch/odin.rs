// SPDX-FileCopyrightText: 2024-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    cell::Cell,
    collections::HashSet,
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom, Write},
    path::Path,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use lz4_flex::frame::FrameDecoder;
use tracing::{debug, warn};

use crate::{
    device::FileInfo,
    patch::{self, archive, Error, Patcher, PatcherConfig, ProgressListener, Result},
    stream,
};

/// Odin firmware only nests one level deep in practice (an outer `.tar.md5`
/// containing a CSC tar). Anything deeper is skipped.
const MAX_TAR_DEPTH: u8 = 1;

/// Counts bytes consumed from the underlying firmware file. Progress is
/// derived from the compressed input position because the unwrapped output
/// size is unknown up front.
struct ProgressReader<R> {
    inner: R,
    counter: Rc<Cell<u64>>,
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.set(self.counter.get() + n as u64);
        Ok(n)
    }
}

struct Walk<'a> {
    output: &'a mut archive::OutputArchive,
    listener: &'a mut dyn ProgressListener,
    cancel_signal: &'a AtomicBool,
    input_path: &'a Path,
    counter: Rc<Cell<u64>>,
    max_bytes: u64,
    /// Report at most once per this many input bytes to keep callback
    /// overhead negligible on multi-gigabyte firmware.
    step: u64,
    last_reported: u64,
    added: HashSet<String>,
    files: u64,
}

impl Walk<'_> {
    fn report_progress(&mut self, force: bool) {
        let now = self.counter.get().min(self.max_bytes);

        if force || now - self.last_reported >= self.step {
            self.listener.on_progress(now, self.max_bytes);
            self.last_reported = now;
        }
    }

    fn process_tar(&mut self, reader: &mut dyn Read, depth: u8) -> Result<()> {
        let mut tar = tar::Archive::new(reader);
        let entries = tar
            .entries()
            .map_err(|e| Error::FileRead(self.input_path.to_owned(), e))?;

        for entry in entries {
            stream::check_cancel(self.cancel_signal).map_err(|_| Error::PatchingCancelled)?;

            let mut entry = entry.map_err(|e| Error::FileRead(self.input_path.to_owned(), e))?;

            if !entry.header().entry_type().is_file() {
                continue;
            }

            let name = {
                let path = entry
                    .path()
                    .map_err(|e| Error::FileRead(self.input_path.to_owned(), e))?;

                match path.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n.to_owned(),
                    None => continue,
                }
            };

            // Unread entry data is skipped when the iterator advances.
            self.process_entry(&mut entry, &name, depth)?;
        }

        Ok(())
    }

    fn process_entry(&mut self, reader: &mut dyn Read, name: &str, depth: u8) -> Result<()> {
        // `.tar.md5` is a plain tar with an MD5 digest appended after the
        // archive terminator, which the tar reader never reaches.
        if name.ends_with(".tar") || name.ends_with(".tar.md5") {
            if depth >= MAX_TAR_DEPTH {
                warn!("Skipping deeply nested archive: {name}");
                return Ok(());
            }

            debug!("Unwrapping nested archive: {name}");
            return self.process_tar(reader, depth + 1);
        }

        if let Some(stripped) = name.strip_suffix(".lz4") {
            let stripped = stripped.to_owned();
            let mut decoder = FrameDecoder::new(reader);

            return self.process_entry(&mut decoder, &stripped, depth);
        }

        let target = if name == "boot.img" {
            name.to_owned()
        } else if name.starts_with("cache.img") || name.starts_with("system.img") {
            let base = name.strip_suffix(".ext4").unwrap_or(name);
            format!("{base}.sparse")
        } else {
            debug!("Skipping irrelevant entry: {name}");
            return Ok(());
        };

        // Firmware with a nested CSC tar can carry the same image twice. The
        // first occurrence wins.
        if !self.added.insert(target.clone()) {
            warn!("Skipping duplicate entry: {target}");
            return Ok(());
        }

        self.listener.on_details(&target);

        archive::start_file(self.output, &target)?;
        self.copy_data(reader)?;
        self.files += 1;

        Ok(())
    }

    fn copy_data(&mut self, reader: &mut dyn Read) -> Result<()> {
        let mut buf = [0u8; 16384];

        loop {
            stream::check_cancel(self.cancel_signal).map_err(|_| Error::PatchingCancelled)?;

            let n = reader
                .read(&mut buf)
                .map_err(|e| Error::FileRead(self.input_path.to_owned(), e))?;
            if n == 0 {
                break;
            }

            self.output
                .write_all(&buf[..n])
                .map_err(Error::ArchiveWriteData)?;

            self.report_progress(false);
        }

        Ok(())
    }
}

/// Converts Samsung Odin firmware (`.tar.md5`, optionally with lz4-compressed
/// and nested members) into a flashable zip driven by `odinupdater`.
///
/// Everything is unwrapped in a single streaming pass; no intermediate files
/// hit the disk.
#[derive(Debug)]
pub struct OdinPatcher {
    config: PatcherConfig,
    info: FileInfo,
    cancel_signal: Arc<AtomicBool>,
}

impl OdinPatcher {
    pub const ID: &'static str = "OdinPatcher";

    pub fn new(config: PatcherConfig, info: FileInfo, cancel_signal: Arc<AtomicBool>) -> Self {
        Self {
            config,
            info,
            cancel_signal,
        }
    }
}

impl Patcher for OdinPatcher {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn patch_file(&mut self, listener: &mut dyn ProgressListener) -> Result<()> {
        if self.cancel_signal.load(Ordering::SeqCst) {
            return Err(Error::PatchingCancelled);
        }

        let mut file = File::open(&self.info.input_path)
            .map_err(|e| Error::FileOpen(self.info.input_path.clone(), e))?;

        let max_bytes = file.seek(SeekFrom::End(0)).map_err(Error::FileSeek)?;
        file.seek(SeekFrom::Start(0)).map_err(Error::FileSeek)?;

        let counter = Rc::new(Cell::new(0));
        let mut reader = ProgressReader {
            inner: BufReader::new(file),
            counter: Rc::clone(&counter),
        };

        let mut output = archive::open_output(&self.info.output_path)?;

        let files = {
            let mut walk = Walk {
                output: &mut output,
                listener: &mut *listener,
                cancel_signal: &self.cancel_signal,
                input_path: &self.info.input_path,
                counter,
                max_bytes,
                step: (max_bytes / 10_000).max(1),
                last_reported: 0,
                added: HashSet::new(),
                files: 0,
            };

            walk.process_tar(&mut reader, 0)?;
            walk.report_progress(true);

            walk.files
        };

        let specs = patch::odin_copy_specs(&self.config.data_dir, &self.info.device);

        let mut files = files;
        let max_files = files + specs.len() as u64 + 2;
        listener.on_files(files, max_files);

        patch::inject_extras(
            &mut output,
            &specs,
            &self.info,
            &self.cancel_signal,
            listener,
            &mut files,
            max_files,
        )?;

        let mut inner = output.finish().map_err(Error::ArchiveWriteHeader)?;
        inner
            .flush()
            .map_err(|e| Error::FileWrite(self.info.output_path.clone(), e))?;

        Ok(())
    }

    fn cancel_patching(&self) {
        self.cancel_signal.store(true, Ordering::SeqCst);
    }
}
