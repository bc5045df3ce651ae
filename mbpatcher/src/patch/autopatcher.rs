// SPDX-FileCopyrightText: 2024-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs,
    io::ErrorKind,
    path::Path,
};

use regex::Regex;
use tracing::debug;

use crate::{
    device::Device,
    patch::{AutoPatcher, Error, Result, PATH_UPDATER_SCRIPT, PATH_UPDATE_BINARY},
};

/// Partitions that multiboot virtualizes. Install scripts must not touch them
/// directly or they would clobber the primary ROM.
const VIRTUAL_PARTITIONS: [&str; 3] = ["/system", "/cache", "/data"];

fn read_script(temp_dir: &Path, name: &str) -> Result<Option<String>> {
    let path = temp_dir.join(name);

    match fs::read_to_string(&path) {
        Ok(data) => Ok(Some(data)),
        // Not every input archive contains every known script.
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Skipping missing file: {name}");
            Ok(None)
        }
        Err(e) => Err(Error::FileRead(path, e)),
    }
}

fn write_script(temp_dir: &Path, name: &str, data: &str) -> Result<()> {
    let path = temp_dir.join(name);

    fs::write(&path, data).map_err(|e| Error::FileWrite(path, e))
}

/// Which virtual partition a script line operates on, if any. Both the mount
/// point and the device's raw block device paths count as references.
fn find_partition<'a>(line: &str, block_devs: &[(&'a str, Vec<String>)]) -> Option<&'a str> {
    for (mount_point, devs) in block_devs {
        if line.contains(mount_point) || devs.iter().any(|dev| line.contains(dev.as_str())) {
            return Some(mount_point);
        }
    }

    None
}

/// Rewrite edify `mount`/`unmount`/`format` calls (and busybox equivalents
/// spawned via `run_program`) that target a virtual partition into calls to
/// mbtool's `update-binary-tool`.
fn patch_updater_script(script: &str, block_devs: &[(&str, Vec<String>)]) -> String {
    let re_mount = Regex::new(r#"^\s*mount\s*\(|"[^"]*busybox"\s*,\s*"mount""#).unwrap();
    let re_unmount = Regex::new(r#"^\s*unmount\s*\(|"[^"]*busybox"\s*,\s*"umount""#).unwrap();
    let re_format = Regex::new(
        r#"^\s*format\s*\(|"[^"]*busybox"\s*,\s*"rm"|"[^"]*format\.sh""#,
    )
    .unwrap();

    let mut output = String::with_capacity(script.len());

    for line in script.lines() {
        let action = if re_format.is_match(line) {
            Some("format")
        } else if re_unmount.is_match(line) {
            Some("unmount")
        } else if re_mount.is_match(line) {
            Some("mount")
        } else {
            None
        };

        match action.and_then(|a| find_partition(line, block_devs).map(|p| (a, p))) {
            Some((action, partition)) => {
                output.push_str(&format!(
                    "run_program(\"/update-binary-tool\", \"{action}\", \"{partition}\");"
                ));
            }
            None => output.push_str(line),
        }

        output.push('\n');
    }

    output
}

/// Rewrite shell `mount`/`umount` commands in an `update-binary` that is a
/// plain shell script rather than a binary.
fn patch_mount_cmds(script: &str) -> String {
    let re = Regex::new(r"^\s*(mount|umount)\s+(.+)$").unwrap();

    let mut output = String::with_capacity(script.len());

    for line in script.lines() {
        let partition = re.captures(line).and_then(|caps| {
            VIRTUAL_PARTITIONS
                .iter()
                .find(|p| caps[2].contains(**p))
                .map(|p| (caps, *p))
        });

        match partition {
            Some((caps, partition)) => {
                let action = if &caps[1] == "umount" { "unmount" } else { "mount" };

                output.push_str(&format!("/update-binary-tool {action} {partition}"));
            }
            None => output.push_str(line),
        }

        output.push('\n');
    }

    output
}

/// Rewrite Magisk's `boot_patch.sh` so that its persistent state lives inside
/// the multiboot data path and it never touches verity or encryption state.
fn patch_magisk_script(script: &str) -> String {
    let re_keep = Regex::new(r"^(KEEPVERITY|KEEPFORCEENCRYPT)=.*$").unwrap();

    let mut output = String::with_capacity(script.len());

    for line in script.lines() {
        if let Some(caps) = re_keep.captures(line) {
            output.push_str(&format!("{}=true", &caps[1]));
        } else {
            output.push_str(&line.replace("/data/adb", "/raw/data/adb"));
        }

        output.push('\n');
    }

    output
}

/// Rewrites the edify `updater-script` of a normal ROM or mod zip.
pub struct StandardPatcher {
    block_devs: Vec<(&'static str, Vec<String>)>,
}

impl StandardPatcher {
    pub const ID: &'static str = "StandardPatcher";

    pub fn new(device: &Device) -> Self {
        Self {
            block_devs: vec![
                ("/system", device.block_devs.system.clone()),
                ("/cache", device.block_devs.cache.clone()),
                ("/data", device.block_devs.data.clone()),
            ],
        }
    }
}

impl AutoPatcher for StandardPatcher {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn existing_files(&self) -> Vec<String> {
        vec![PATH_UPDATER_SCRIPT.to_owned()]
    }

    fn patch_files(&self, temp_dir: &Path) -> Result<()> {
        let Some(script) = read_script(temp_dir, PATH_UPDATER_SCRIPT)? else {
            return Ok(());
        };

        let patched = patch_updater_script(&script, &self.block_devs);

        write_script(temp_dir, PATH_UPDATER_SCRIPT, &patched)
    }
}

/// Rewrites shell mount commands in zips whose `update-binary` is a script.
pub struct MountCmdPatcher;

impl MountCmdPatcher {
    pub const ID: &'static str = "MountCmdPatcher";
}

impl AutoPatcher for MountCmdPatcher {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn existing_files(&self) -> Vec<String> {
        vec![PATH_UPDATE_BINARY.to_owned()]
    }

    fn patch_files(&self, temp_dir: &Path) -> Result<()> {
        let Some(script) = read_script(temp_dir, PATH_UPDATE_BINARY)? else {
            return Ok(());
        };

        // Only touch shell scripts. A compiled installer is left alone.
        if !script.starts_with("#!") {
            return Ok(());
        }

        let patched = patch_mount_cmds(&script);

        write_script(temp_dir, PATH_UPDATE_BINARY, &patched)
    }
}

/// Fixes up Magisk installer zips for multiboot installs.
pub struct MagiskPatcher;

impl MagiskPatcher {
    pub const ID: &'static str = "MagiskPatcher";

    const BOOT_PATCH_SCRIPT: &'static str = "common/boot_patch.sh";
}

impl AutoPatcher for MagiskPatcher {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn existing_files(&self) -> Vec<String> {
        vec![Self::BOOT_PATCH_SCRIPT.to_owned()]
    }

    fn patch_files(&self, temp_dir: &Path) -> Result<()> {
        let Some(script) = read_script(temp_dir, Self::BOOT_PATCH_SCRIPT)? else {
            return Ok(());
        };

        let patched = patch_magisk_script(&script);

        write_script(temp_dir, Self::BOOT_PATCH_SCRIPT, &patched)
    }
}
