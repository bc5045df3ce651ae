// SPDX-FileCopyrightText: 2024-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Block device paths for one device, as shipped in the device definition
/// database. Multiple candidate paths are listed per partition because the
/// canonical path differs across bootloaders and Android versions.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct BlockDevs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub base_dirs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cache: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boot: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<String>,
}

/// One entry from the device definition database. This is produced by an
/// external collaborator; we only consume it and serialize it verbatim into
/// the output archive as `multiboot/device.json`.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct Device {
    pub id: String,
    pub codenames: Vec<String>,
    pub name: String,
    /// Android ABI name, eg. `armeabi-v7a` or `arm64-v8a`. Selects the helper
    /// binary directory inside the data directory.
    pub architecture: String,
    pub block_devs: BlockDevs,
}

/// Everything a patcher needs to know about one patch operation. Treated as an
/// immutable value for the duration of a `patch_file` call.
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub device: Device,
    /// Target ROM installation id, eg. `primary`, `dual`, or `data-slot-1`.
    pub rom_id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}
