// SPDX-FileCopyrightText: 2024-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

pub mod archive;
pub mod autopatcher;
pub mod odin;
pub mod ramdisk;
pub mod zip;

use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use thiserror::Error;
use ::zip::result::ZipError;

use crate::device::{Device, FileInfo};

/// Entry name of the recovery installer inside a ROM zip. The original entry
/// is preserved under [`PATH_UPDATE_BINARY_ORIG`] and mbtool's own installer
/// shim takes over the canonical name.
pub const PATH_UPDATE_BINARY: &str = "META-INF/com/google/android/update-binary";
pub const PATH_UPDATE_BINARY_ORIG: &str = "META-INF/com/google/android/update-binary.orig";
pub const PATH_UPDATER_SCRIPT: &str = "META-INF/com/google/android/updater-script";

pub const PATH_INFO_PROP: &str = "multiboot/info.prop";
pub const PATH_DEVICE_JSON: &str = "multiboot/device.json";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Patching was cancelled")]
    PatchingCancelled,
    #[error("Unknown patcher id: {0}")]
    UnknownPatcher(String),
    #[error("Failed to create autopatcher: {0}")]
    AutoPatcherCreate(String),
    #[error("Failed to open archive for reading")]
    ArchiveReadOpen(#[source] ZipError),
    #[error("Failed to read archive entry header")]
    ArchiveReadHeader(#[source] ZipError),
    #[error("Failed to read archive entry data")]
    ArchiveReadData(#[source] io::Error),
    #[error("Failed to open archive for writing")]
    ArchiveWriteOpen(#[source] ZipError),
    #[error("Failed to write archive entry header")]
    ArchiveWriteHeader(#[source] ZipError),
    #[error("Failed to write archive entry data")]
    ArchiveWriteData(#[source] io::Error),
    #[error("Failed to open file: {0:?}")]
    FileOpen(PathBuf, #[source] io::Error),
    #[error("Failed to read file: {0:?}")]
    FileRead(PathBuf, #[source] io::Error),
    #[error("Failed to write file: {0:?}")]
    FileWrite(PathBuf, #[source] io::Error),
    #[error("Failed to seek file")]
    FileSeek(#[source] io::Error),
    #[error("Failed to serialize device definition")]
    DeviceSerialize(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Receiver for patching progress events. All callbacks are invoked
/// synchronously on the thread running `patch_file`; implementations are
/// responsible for marshaling to other threads if needed.
#[allow(unused_variables)]
pub trait ProgressListener {
    fn on_progress(&mut self, bytes: u64, max_bytes: u64) {}

    fn on_files(&mut self, files: u64, max_files: u64) {}

    fn on_details(&mut self, message: &str) {}
}

/// Listener that discards all events.
pub struct NullListener;

impl ProgressListener for NullListener {}

/// One end-to-end archive transformation. Implementations hold single-use
/// state; no two `patch_file` calls on the same instance may run concurrently
/// and counters are reset at the start of each call.
pub trait Patcher: fmt::Debug {
    fn id(&self) -> &'static str;

    /// Transform the input described by the patcher's [`FileInfo`] into the
    /// output archive. On failure, whatever partial output exists on disk is
    /// left for the caller to discard.
    fn patch_file(&mut self, listener: &mut dyn ProgressListener) -> Result<()>;

    /// Cooperatively cancel an in-flight `patch_file` call from another
    /// thread. The current operation unwinds at its next checkpoint and fails
    /// with [`Error::PatchingCancelled`].
    fn cancel_patching(&self);
}

/// Rewrites well-known install scripts inside an extracted tree. The set of
/// files an autopatcher touches is known before any I/O so that the zip
/// rewrite pass can exclude them from the verbatim copy.
pub trait AutoPatcher {
    fn id(&self) -> &'static str;

    /// Archive entry names this autopatcher will rewrite.
    fn existing_files(&self) -> Vec<String>;

    /// Rewrite the files in place under `temp_dir`. A file that was not
    /// extracted (not present in the input archive) is skipped.
    fn patch_files(&self, temp_dir: &Path) -> Result<()>;
}

/// A (source path, target entry name) pair describing one file to inject
/// verbatim into the output archive.
#[derive(Clone, Debug)]
pub struct CopySpec {
    pub source: PathBuf,
    pub target: String,
}

/// Shared configuration and factory for patchers and autopatchers.
///
/// `create_*` return owned trait objects; the caller controls the lifetime
/// directly instead of going through a tracked-pointer registry.
#[derive(Clone, Debug)]
pub struct PatcherConfig {
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl PatcherConfig {
    pub fn new(data_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            temp_dir: temp_dir.into(),
        }
    }

    pub fn patcher_ids() -> &'static [&'static str] {
        &[
            zip::ZipPatcher::ID,
            odin::OdinPatcher::ID,
            ramdisk::RamdiskUpdater::ID,
        ]
    }

    pub fn create_patcher(
        &self,
        id: &str,
        info: FileInfo,
        cancel_signal: Arc<AtomicBool>,
    ) -> Result<Box<dyn Patcher>> {
        match id {
            zip::ZipPatcher::ID => Ok(Box::new(zip::ZipPatcher::new(
                self.clone(),
                info,
                cancel_signal,
            ))),
            odin::OdinPatcher::ID => Ok(Box::new(odin::OdinPatcher::new(
                self.clone(),
                info,
                cancel_signal,
            ))),
            ramdisk::RamdiskUpdater::ID => Ok(Box::new(ramdisk::RamdiskUpdater::new(
                self.clone(),
                info,
                cancel_signal,
            ))),
            _ => Err(Error::UnknownPatcher(id.to_owned())),
        }
    }

    pub fn create_auto_patcher(&self, id: &str, info: &FileInfo) -> Result<Box<dyn AutoPatcher>> {
        match id {
            autopatcher::StandardPatcher::ID => {
                Ok(Box::new(autopatcher::StandardPatcher::new(&info.device)))
            }
            autopatcher::MountCmdPatcher::ID => Ok(Box::new(autopatcher::MountCmdPatcher)),
            autopatcher::MagiskPatcher::ID => Ok(Box::new(autopatcher::MagiskPatcher)),
            _ => Err(Error::AutoPatcherCreate(id.to_owned())),
        }
    }
}

/// Generate the contents of `multiboot/info.prop`. This is a bit-exact text
/// contract consumed by mbtool's installer on the device.
pub fn generate_info_prop(rom_id: &str) -> String {
    use std::fmt::Write;

    let mut output = String::new();

    let _ = writeln!(output, "# [Autogenerated by mbpatcher]");
    let _ = writeln!(output, "# Do not remove this file.");
    let _ = writeln!(output);
    let _ = writeln!(output, "# Patcher version that created this file");
    let _ = writeln!(
        output,
        "mbtool.installer.version={}",
        env!("CARGO_PKG_VERSION")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "# Selected install location");
    let _ = writeln!(output, "mbtool.installer.install-location={rom_id}");

    output
}

/// Helper binaries and scripts every patched installer carries, resolved
/// against the device's architecture directory inside the data directory.
pub(crate) fn base_copy_specs(data_dir: &Path, device: &Device) -> Vec<CopySpec> {
    let binaries = data_dir
        .join("binaries")
        .join("android")
        .join(&device.architecture);

    vec![
        CopySpec {
            source: binaries.join("mbtool_recovery"),
            target: PATH_UPDATE_BINARY.to_owned(),
        },
        CopySpec {
            source: binaries.join("mbtool"),
            target: "multiboot/mbtool".to_owned(),
        },
        CopySpec {
            source: data_dir.join("scripts").join("bb-wrapper.sh"),
            target: "multiboot/bb-wrapper.sh".to_owned(),
        },
    ]
}

/// Odin images have no original installer to preserve, so `odinupdater` takes
/// the `.orig` slot that the zip pipeline reserves for the original installer.
pub(crate) fn odin_copy_specs(data_dir: &Path, device: &Device) -> Vec<CopySpec> {
    let binaries = data_dir
        .join("binaries")
        .join("android")
        .join(&device.architecture);
    let mut specs = base_copy_specs(data_dir, device);

    specs.push(CopySpec {
        source: binaries.join("odinupdater"),
        target: PATH_UPDATE_BINARY_ORIG.to_owned(),
    });
    specs.push(CopySpec {
        source: binaries.join("fuse-sparse"),
        target: "multiboot/fuse-sparse".to_owned(),
    });

    specs
}

/// Write the fixed extras into the output archive: the copy spec files, the
/// generated `info.prop`, and the serialized device definition. Advances the
/// file counter through `listener` for each entry written.
pub(crate) fn inject_extras(
    output: &mut archive::OutputArchive,
    specs: &[CopySpec],
    info: &FileInfo,
    cancel_signal: &AtomicBool,
    listener: &mut dyn ProgressListener,
    files: &mut u64,
    max_files: u64,
) -> Result<()> {
    let mut bump = |files: &mut u64, listener: &mut dyn ProgressListener| {
        *files += 1;
        listener.on_files(*files, max_files);
    };

    for spec in specs {
        if cancel_signal.load(Ordering::SeqCst) {
            return Err(Error::PatchingCancelled);
        }

        listener.on_details(&spec.target);
        archive::add_file_from_path(output, &spec.target, &spec.source)?;
        bump(files, listener);
    }

    listener.on_details(PATH_INFO_PROP);
    archive::add_file_from_data(
        output,
        PATH_INFO_PROP,
        generate_info_prop(&info.rom_id).as_bytes(),
    )?;
    bump(files, listener);

    listener.on_details(PATH_DEVICE_JSON);
    let device_json = serde_json::to_vec_pretty(&info.device).map_err(Error::DeviceSerialize)?;
    archive::add_file_from_data(output, PATH_DEVICE_JSON, &device_json)?;
    bump(files, listener);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_prop_contents() {
        let prop = generate_info_prop("dual");

        let last = prop
            .lines()
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .next_back()
            .unwrap();
        assert_eq!(last, "mbtool.installer.install-location=dual");

        assert!(prop.contains(concat!(
            "mbtool.installer.version=",
            env!("CARGO_PKG_VERSION"),
        )));
    }
}
