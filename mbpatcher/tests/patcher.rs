/*
 * SPDX-FileCopyrightText: 2024-2025 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fs::{self, File},
    io::{Read, Write},
    path::Path,
    sync::{atomic::AtomicBool, Arc},
};

use assert_matches::assert_matches;
use mbpatcher::{
    device::{BlockDevs, Device, FileInfo},
    patch::{
        odin::OdinPatcher, ramdisk::RamdiskUpdater, zip::ZipPatcher, Error, NullListener,
        PatcherConfig,
    },
};
use zip::{write::SimpleFileOptions, ZipArchive, ZipWriter};

fn test_device() -> Device {
    Device {
        id: "hammerhead".to_owned(),
        codenames: vec!["hammerhead".to_owned()],
        name: "Google Nexus 5".to_owned(),
        architecture: "armeabi-v7a".to_owned(),
        block_devs: BlockDevs {
            base_dirs: vec!["/dev/block/platform/msm_sdcc.1/by-name".to_owned()],
            system: vec!["/dev/block/platform/msm_sdcc.1/by-name/system".to_owned()],
            cache: vec!["/dev/block/platform/msm_sdcc.1/by-name/cache".to_owned()],
            data: vec!["/dev/block/platform/msm_sdcc.1/by-name/userdata".to_owned()],
            boot: vec!["/dev/block/platform/msm_sdcc.1/by-name/boot".to_owned()],
            recovery: vec![],
            extra: vec![],
        },
    }
}

/// Create the helper binaries that the patchers inject, with distinctive
/// contents so the output entries can be attributed.
fn create_data_dir(data_dir: &Path) {
    let binaries = data_dir.join("binaries/android/armeabi-v7a");
    fs::create_dir_all(&binaries).unwrap();
    fs::write(binaries.join("mbtool_recovery"), b"mbtool_recovery data").unwrap();
    fs::write(binaries.join("mbtool"), b"mbtool data").unwrap();
    fs::write(binaries.join("odinupdater"), b"odinupdater data").unwrap();
    fs::write(binaries.join("fuse-sparse"), b"fuse-sparse data").unwrap();

    let scripts = data_dir.join("scripts");
    fs::create_dir_all(&scripts).unwrap();
    fs::write(scripts.join("bb-wrapper.sh"), b"bb-wrapper data").unwrap();
}

fn create_input_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());

    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }

    writer.finish().unwrap();
}

fn entry_names(archive: &mut ZipArchive<File>) -> Vec<String> {
    let mut names = (0..archive.len())
        .map(|i| archive.by_index_raw(i).unwrap().name().to_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Vec<u8> {
    let mut entry = archive.by_name(name).unwrap();
    let mut data = Vec::new();
    entry.read_to_end(&mut data).unwrap();
    data
}

fn add_tar_entry(builder: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    builder.append_data(&mut header, name, data).unwrap();
}

fn lz4_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

const UPDATER_SCRIPT: &str = "META-INF/com/google/android/updater-script";
const UPDATE_BINARY: &str = "META-INF/com/google/android/update-binary";

#[test]
fn zip_patcher_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = temp.path().join("data");
    create_data_dir(&data_dir);

    let script = "ui_print(\"Installing ROM\");\n\
        mount(\"ext4\", \"EMMC\", \"/dev/block/platform/msm_sdcc.1/by-name/system\", \"/system\");\n\
        unmount(\"/system\");\n";

    let input_path = temp.path().join("input.zip");
    create_input_zip(
        &input_path,
        &[
            ("system/app/Example.apk", b"apk data"),
            (UPDATE_BINARY, b"original installer"),
            (UPDATER_SCRIPT, script.as_bytes()),
        ],
    );

    let output_path = temp.path().join("output.zip");
    let info = FileInfo {
        device: test_device(),
        rom_id: "dual".to_owned(),
        input_path,
        output_path: output_path.clone(),
    };

    let config = PatcherConfig::new(&data_dir, temp.path());
    let cancel_signal = Arc::new(AtomicBool::new(false));
    let mut patcher = config
        .create_patcher(ZipPatcher::ID, info, cancel_signal)
        .unwrap();

    patcher.patch_file(&mut NullListener).unwrap();

    let mut archive = ZipArchive::new(File::open(&output_path).unwrap()).unwrap();

    assert_eq!(
        entry_names(&mut archive),
        vec![
            UPDATE_BINARY,
            "META-INF/com/google/android/update-binary.orig",
            UPDATER_SCRIPT,
            "multiboot/bb-wrapper.sh",
            "multiboot/device.json",
            "multiboot/info.prop",
            "multiboot/mbtool",
            "system/app/Example.apk",
        ],
    );

    // Untouched entries are copied verbatim.
    assert_eq!(
        read_entry(&mut archive, "system/app/Example.apk"),
        b"apk data",
    );

    // The installer is replaced and the original preserved.
    assert_eq!(read_entry(&mut archive, UPDATE_BINARY), b"mbtool_recovery data");
    assert_eq!(
        read_entry(&mut archive, "META-INF/com/google/android/update-binary.orig"),
        b"original installer",
    );

    // Mount operations are redirected through update-binary-tool.
    let patched = String::from_utf8(read_entry(&mut archive, UPDATER_SCRIPT)).unwrap();
    assert_eq!(
        patched,
        "ui_print(\"Installing ROM\");\n\
        run_program(\"/update-binary-tool\", \"mount\", \"/system\");\n\
        run_program(\"/update-binary-tool\", \"unmount\", \"/system\");\n",
    );

    let info_prop = String::from_utf8(read_entry(&mut archive, "multiboot/info.prop")).unwrap();
    assert_eq!(
        info_prop.lines().next_back().unwrap(),
        "mbtool.installer.install-location=dual",
    );

    let device: Device =
        serde_json::from_slice(&read_entry(&mut archive, "multiboot/device.json")).unwrap();
    assert_eq!(device, test_device());
}

#[test]
fn zip_patcher_cancelled_before_start() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = temp.path().join("data");
    create_data_dir(&data_dir);

    let input_path = temp.path().join("input.zip");
    create_input_zip(&input_path, &[("system/app/Example.apk", b"apk data")]);

    let output_path = temp.path().join("output.zip");
    let info = FileInfo {
        device: test_device(),
        rom_id: "dual".to_owned(),
        input_path,
        output_path: output_path.clone(),
    };

    let config = PatcherConfig::new(&data_dir, temp.path());
    let cancel_signal = Arc::new(AtomicBool::new(true));
    let mut patcher = config
        .create_patcher(ZipPatcher::ID, info, cancel_signal)
        .unwrap();

    assert_matches!(
        patcher.patch_file(&mut NullListener),
        Err(Error::PatchingCancelled)
    );

    // Cancellation was detected before the output was ever opened.
    assert!(!output_path.exists());
}

#[test]
fn odin_patcher_unwraps_firmware() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = temp.path().join("data");
    create_data_dir(&data_dir);

    // The CSC tar carries a duplicate cache image that must be suppressed.
    let mut csc = tar::Builder::new(Vec::new());
    add_tar_entry(&mut csc, "cache.img", b"csc cache image");
    add_tar_entry(&mut csc, "system.img.ext4", b"system image");
    let csc_data = csc.into_inner().unwrap();

    let mut firmware = tar::Builder::new(Vec::new());
    add_tar_entry(&mut firmware, "boot.img.lz4", &lz4_compress(b"boot image"));
    add_tar_entry(&mut firmware, "cache.img.ext4", b"cache image");
    add_tar_entry(&mut firmware, "csc.tar.md5", &csc_data);
    add_tar_entry(&mut firmware, "modem.bin", b"modem data");
    let firmware_data = firmware.into_inner().unwrap();

    let input_path = temp.path().join("firmware.tar.md5");
    fs::write(&input_path, firmware_data).unwrap();

    let output_path = temp.path().join("output.zip");
    let info = FileInfo {
        device: test_device(),
        rom_id: "dual".to_owned(),
        input_path,
        output_path: output_path.clone(),
    };

    let config = PatcherConfig::new(&data_dir, temp.path());
    let cancel_signal = Arc::new(AtomicBool::new(false));
    let mut patcher = config
        .create_patcher(OdinPatcher::ID, info, cancel_signal)
        .unwrap();

    patcher.patch_file(&mut NullListener).unwrap();

    let mut archive = ZipArchive::new(File::open(&output_path).unwrap()).unwrap();

    assert_eq!(
        entry_names(&mut archive),
        vec![
            UPDATE_BINARY,
            "META-INF/com/google/android/update-binary.orig",
            "boot.img",
            "cache.img.sparse",
            "multiboot/bb-wrapper.sh",
            "multiboot/device.json",
            "multiboot/fuse-sparse",
            "multiboot/info.prop",
            "multiboot/mbtool",
            "system.img.sparse",
        ],
    );

    assert_eq!(read_entry(&mut archive, "boot.img"), b"boot image");
    // First occurrence wins; the CSC duplicate is dropped.
    assert_eq!(read_entry(&mut archive, "cache.img.sparse"), b"cache image");
    assert_eq!(read_entry(&mut archive, "system.img.sparse"), b"system image");

    // Odin outputs use odinupdater as the preserved installer.
    assert_eq!(
        read_entry(&mut archive, "META-INF/com/google/android/update-binary.orig"),
        b"odinupdater data",
    );
}

#[test]
fn odin_patcher_cancelled_before_start() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = temp.path().join("data");
    create_data_dir(&data_dir);

    let mut firmware = tar::Builder::new(Vec::new());
    add_tar_entry(&mut firmware, "boot.img", b"boot image");
    let firmware_data = firmware.into_inner().unwrap();

    let input_path = temp.path().join("firmware.tar.md5");
    fs::write(&input_path, firmware_data).unwrap();

    let output_path = temp.path().join("output.zip");
    let info = FileInfo {
        device: test_device(),
        rom_id: "dual".to_owned(),
        input_path,
        output_path: output_path.clone(),
    };

    let config = PatcherConfig::new(&data_dir, temp.path());
    let cancel_signal = Arc::new(AtomicBool::new(true));
    let mut patcher = config
        .create_patcher(OdinPatcher::ID, info, cancel_signal)
        .unwrap();

    assert_matches!(
        patcher.patch_file(&mut NullListener),
        Err(Error::PatchingCancelled)
    );

    // Cancellation was detected before the output was ever opened.
    assert!(!output_path.exists());
}

#[test]
fn odin_patcher_skips_deeply_nested_archives() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = temp.path().join("data");
    create_data_dir(&data_dir);

    // One level of nesting is unwrapped; a tar inside that is skipped.
    let mut deep = tar::Builder::new(Vec::new());
    add_tar_entry(&mut deep, "boot.img", b"boot image");
    let deep_data = deep.into_inner().unwrap();

    let mut nested = tar::Builder::new(Vec::new());
    add_tar_entry(&mut nested, "deep.tar", &deep_data);
    add_tar_entry(&mut nested, "cache.img", b"cache image");
    let nested_data = nested.into_inner().unwrap();

    let mut firmware = tar::Builder::new(Vec::new());
    add_tar_entry(&mut firmware, "nested.tar", &nested_data);
    let firmware_data = firmware.into_inner().unwrap();

    let input_path = temp.path().join("firmware.tar.md5");
    fs::write(&input_path, firmware_data).unwrap();

    let output_path = temp.path().join("output.zip");
    let info = FileInfo {
        device: test_device(),
        rom_id: "dual".to_owned(),
        input_path,
        output_path: output_path.clone(),
    };

    let config = PatcherConfig::new(&data_dir, temp.path());
    let cancel_signal = Arc::new(AtomicBool::new(false));
    let mut patcher = config
        .create_patcher(OdinPatcher::ID, info, cancel_signal)
        .unwrap();

    patcher.patch_file(&mut NullListener).unwrap();

    let mut archive = ZipArchive::new(File::open(&output_path).unwrap()).unwrap();

    // cache.img from the first nesting level survives; boot.img from the
    // second level does not.
    assert_eq!(
        entry_names(&mut archive),
        vec![
            UPDATE_BINARY,
            "META-INF/com/google/android/update-binary.orig",
            "cache.img.sparse",
            "multiboot/bb-wrapper.sh",
            "multiboot/device.json",
            "multiboot/fuse-sparse",
            "multiboot/info.prop",
            "multiboot/mbtool",
        ],
    );
}

#[test]
fn ramdisk_updater_builds_from_scratch() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = temp.path().join("data");
    create_data_dir(&data_dir);

    let output_path = temp.path().join("output.zip");
    let info = FileInfo {
        device: test_device(),
        rom_id: "primary".to_owned(),
        input_path: temp.path().join("unused"),
        output_path: output_path.clone(),
    };

    let config = PatcherConfig::new(&data_dir, temp.path());
    let cancel_signal = Arc::new(AtomicBool::new(false));
    let mut patcher = config
        .create_patcher(RamdiskUpdater::ID, info, cancel_signal)
        .unwrap();

    patcher.patch_file(&mut NullListener).unwrap();

    let mut archive = ZipArchive::new(File::open(&output_path).unwrap()).unwrap();

    assert_eq!(
        entry_names(&mut archive),
        vec![
            UPDATE_BINARY,
            UPDATER_SCRIPT,
            "multiboot/bb-wrapper.sh",
            "multiboot/device.json",
            "multiboot/info.prop",
            "multiboot/mbtool",
        ],
    );

    let script = String::from_utf8(read_entry(&mut archive, UPDATER_SCRIPT)).unwrap();
    assert!(script.starts_with('#'));

    let info_prop = String::from_utf8(read_entry(&mut archive, "multiboot/info.prop")).unwrap();
    assert_eq!(
        info_prop.lines().next_back().unwrap(),
        "mbtool.installer.install-location=primary",
    );
}

#[test]
fn unknown_patcher_id() {
    let temp = tempfile::tempdir().unwrap();

    let info = FileInfo {
        device: test_device(),
        rom_id: "dual".to_owned(),
        input_path: temp.path().join("input.zip"),
        output_path: temp.path().join("output.zip"),
    };

    let config = PatcherConfig::new(temp.path(), temp.path());
    let cancel_signal = Arc::new(AtomicBool::new(false));

    assert_matches!(
        config.create_patcher("NoSuchPatcher", info, cancel_signal),
        Err(Error::UnknownPatcher(id)) if id == "NoSuchPatcher"
    );
}
