/*
 * SPDX-FileCopyrightText: 2024 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    env, fs,
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::{Context, Result};
use clap::Parser;

use crate::{
    cli::{status, warning},
    device::{Device, FileInfo},
    patch::{zip::ZipPatcher, PatcherConfig, ProgressListener},
};

/// Print progress to the terminal. Byte progress is reduced to whole
/// percentage points so that a multi-gigabyte input does not flood the
/// output.
struct CliListener {
    last_percent: u64,
}

impl CliListener {
    fn new() -> Self {
        Self { last_percent: u64::MAX }
    }
}

impl ProgressListener for CliListener {
    fn on_progress(&mut self, bytes: u64, max_bytes: u64) {
        if max_bytes == 0 {
            return;
        }

        let percent = bytes * 100 / max_bytes;
        if percent != self.last_percent {
            self.last_percent = percent;
            status!("Progress: {percent}%");
        }
    }

    fn on_details(&mut self, message: &str) {
        status!("Processing: {message}");
    }
}

/// Patch an archive for multiboot installation.
#[derive(Debug, Parser)]
pub struct PatchCli {
    /// Path to input archive.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub input: PathBuf,

    /// Path to output archive.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub output: PathBuf,

    /// Path to device definition JSON file.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub device: PathBuf,

    /// Installation location (eg. primary, dual, data-slot-1).
    #[arg(short, long, value_name = "ID")]
    pub rom_id: String,

    /// Patcher to run.
    #[arg(short = 't', long = "type", value_name = "ID", default_value = ZipPatcher::ID)]
    pub patcher_type: String,

    /// Directory containing helper binaries and scripts.
    #[arg(long, value_name = "DIR", default_value = "data", value_parser)]
    pub data_dir: PathBuf,

    /// Directory for temporary files.
    #[arg(long, value_name = "DIR", value_parser)]
    pub temp_dir: Option<PathBuf>,
}

pub fn patch_main(cli: &PatchCli, cancel_signal: &Arc<AtomicBool>) -> Result<()> {
    let device_data = fs::read(&cli.device)
        .with_context(|| format!("Failed to read device definition: {:?}", cli.device))?;
    let device: Device = serde_json::from_slice(&device_data)
        .with_context(|| format!("Failed to parse device definition: {:?}", cli.device))?;

    let info = FileInfo {
        device,
        rom_id: cli.rom_id.clone(),
        input_path: cli.input.clone(),
        output_path: cli.output.clone(),
    };

    if cli.output.exists() {
        warning!("Overwriting existing file: {:?}", cli.output);
    }

    let temp_dir = cli.temp_dir.clone().unwrap_or_else(env::temp_dir);
    let config = PatcherConfig::new(cli.data_dir.clone(), temp_dir);

    let mut patcher = config
        .create_patcher(&cli.patcher_type, info, Arc::clone(cancel_signal))
        .context("Failed to create patcher")?;

    status!("Patching {:?} with {}", cli.input, patcher.id());

    let mut listener = CliListener::new();

    patcher
        .patch_file(&mut listener)
        .with_context(|| format!("Failed to patch file: {:?}", cli.input))?;

    status!("Successfully patched file: {:?}", cli.output);

    Ok(())
}
