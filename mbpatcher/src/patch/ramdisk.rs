// SPDX-FileCopyrightText: 2024-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    io::Write,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    device::FileInfo,
    patch::{
        self, archive, Error, Patcher, PatcherConfig, ProgressListener, Result,
        PATH_UPDATER_SCRIPT,
    },
};

/// The recovery parses `updater-script` before running `update-binary`, so
/// the zip must carry one even though mbtool ignores it.
const DUMMY_UPDATER_SCRIPT: &str = "# Dummy file; contents are not used\n";

/// Builds an installer zip from scratch that reinstalls mbtool into the
/// current ROM's ramdisk. There is no input archive; the output consists
/// entirely of the injected multiboot files.
#[derive(Debug)]
pub struct RamdiskUpdater {
    config: PatcherConfig,
    info: FileInfo,
    cancel_signal: Arc<AtomicBool>,
}

impl RamdiskUpdater {
    pub const ID: &'static str = "RamdiskUpdater";

    pub fn new(config: PatcherConfig, info: FileInfo, cancel_signal: Arc<AtomicBool>) -> Self {
        Self {
            config,
            info,
            cancel_signal,
        }
    }
}

impl Patcher for RamdiskUpdater {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn patch_file(&mut self, listener: &mut dyn ProgressListener) -> Result<()> {
        if self.cancel_signal.load(Ordering::SeqCst) {
            return Err(Error::PatchingCancelled);
        }

        let specs = patch::base_copy_specs(&self.config.data_dir, &self.info.device);

        let mut output = archive::open_output(&self.info.output_path)?;

        let mut files = 0;
        let max_files = specs.len() as u64 + 3;

        listener.on_details(PATH_UPDATER_SCRIPT);
        archive::add_file_from_data(
            &mut output,
            PATH_UPDATER_SCRIPT,
            DUMMY_UPDATER_SCRIPT.as_bytes(),
        )?;
        files += 1;
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
