// SPDX-FileCopyrightText: 2024-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    collections::BTreeSet,
    io::{ErrorKind, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tracing::debug;

use crate::{
    device::FileInfo,
    patch::{
        self, archive, autopatcher, Error, Patcher, PatcherConfig, ProgressListener, Result,
        PATH_UPDATE_BINARY, PATH_UPDATE_BINARY_ORIG,
    },
};

/// Rewrites a flashable zip so that its installer runs under multiboot.
///
/// The rewrite is two passes over the input archive. Pass 1 copies every
/// entry to the output without recompression, renaming the original
/// `update-binary` out of the way and diverting entries claimed by an
/// autopatcher to a scratch directory instead. Pass 2 runs the autopatchers
/// over the scratch directory, adds the rewritten files, and injects the
/// multiboot extras.
#[derive(Debug)]
pub struct ZipPatcher {
    config: PatcherConfig,
    info: FileInfo,
    cancel_signal: Arc<AtomicBool>,
    bytes: u64,
    max_bytes: u64,
    files: u64,
    max_files: u64,
}

impl ZipPatcher {
    pub const ID: &'static str = "MultiBootPatcher";

    pub fn new(config: PatcherConfig, info: FileInfo, cancel_signal: Arc<AtomicBool>) -> Self {
        Self {
            config,
            info,
            cancel_signal,
            bytes: 0,
            max_bytes: 0,
            files: 0,
            max_files: 0,
        }
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel_signal.load(Ordering::SeqCst) {
            return Err(Error::PatchingCancelled);
        }

        Ok(())
    }

    fn bump_file(&mut self, size: u64, listener: &mut dyn ProgressListener) {
        self.bytes += size;
        self.files += 1;

        listener.on_progress(self.bytes, self.max_bytes);
        listener.on_files(self.files, self.max_files);
    }
}

impl Patcher for ZipPatcher {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn patch_file(&mut self, listener: &mut dyn ProgressListener) -> Result<()> {
        self.check_cancel()?;

        self.bytes = 0;
        self.files = 0;

        let auto_patchers = [
            autopatcher::StandardPatcher::ID,
            autopatcher::MountCmdPatcher::ID,
            autopatcher::MagiskPatcher::ID,
        ]
        .iter()
        .map(|id| self.config.create_auto_patcher(id, &self.info))
        .collect::<Result<Vec<_>>>()?;

        let excluded = auto_patchers
            .iter()
            .flat_map(|ap| ap.existing_files())
            .collect::<BTreeSet<_>>();

        let temp_dir = tempfile::Builder::new()
            .prefix("mbpatcher")
            .tempdir_in(&self.config.temp_dir)
            .map_err(|e| Error::FileOpen(self.config.temp_dir.clone(), e))?;

        let specs = patch::base_copy_specs(&self.config.data_dir, &self.info.device);

        let mut input = archive::open_input(&self.info.input_path)?;
        let (input_files, input_size) = archive::stats(&mut input)?;

        self.max_bytes = input_size;
        self.max_files = input_files + specs.len() as u64 + 2;

        let mut output = archive::open_output(&self.info.output_path)?;

        // Pass 1.
        for index in 0..input.len() {
            self.check_cancel()?;

            let (name, size) = {
                let entry = input.by_index_raw(index).map_err(Error::ArchiveReadHeader)?;
                (entry.name().to_owned(), entry.size())
            };

            listener.on_details(&name);

            if excluded.contains(&name) {
                archive::extract_entry(&mut input, index, temp_dir.path(), &self.cancel_signal)?;
            } else {
                let rename = (name == PATH_UPDATE_BINARY).then_some(PATH_UPDATE_BINARY_ORIG);

                archive::copy_raw(&mut input, index, &mut output, rename)?;
            }

            self.bump_file(size, listener);
        }

        // Pass 2.
        for auto_patcher in &auto_patchers {
            self.check_cancel()?;

            debug!("Running autopatcher: {}", auto_patcher.id());
            auto_patcher.patch_files(temp_dir.path())?;
        }

        for name in &excluded {
            self.check_cancel()?;

            let target = if name == PATH_UPDATE_BINARY {
                PATH_UPDATE_BINARY_ORIG
            } else {
                name.as_str()
            };

            match archive::add_file_from_path(&mut output, target, &temp_dir.path().join(name)) {
                Ok(()) => listener.on_details(target),
                // Claimed but absent from the input archive.
                Err(Error::FileOpen(_, e)) if e.kind() == ErrorKind::NotFound => {
                    debug!("Not in input archive: {name}");
                }
                Err(e) => return Err(e),
            }
        }

        patch::inject_extras(
            &mut output,
            &specs,
            &self.info,
            &self.cancel_signal,
            listener,
            &mut self.files,
            self.max_files,
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
