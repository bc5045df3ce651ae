// SPDX-FileCopyrightText: 2024-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::Path,
    sync::atomic::AtomicBool,
};

use tracing::trace;
use zip::{result::ZipError, write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::{
    patch::{Error, Result},
    stream, util,
};

pub type InputArchive = ZipArchive<BufReader<File>>;
pub type OutputArchive = ZipWriter<BufWriter<File>>;

/// Map an I/O error from reading entry data. Cancellation surfaces as an
/// [`io::ErrorKind::Interrupted`] error from the stream helpers.
fn map_io_read(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::Interrupted {
        Error::PatchingCancelled
    } else {
        Error::ArchiveReadData(e)
    }
}

pub fn open_input(path: &Path) -> Result<InputArchive> {
    let file = File::open(path).map_err(|e| Error::FileOpen(path.to_owned(), e))?;

    ZipArchive::new(BufReader::new(file)).map_err(Error::ArchiveReadOpen)
}

pub fn open_output(path: &Path) -> Result<OutputArchive> {
    let file = File::create(path).map_err(|e| Error::FileOpen(path.to_owned(), e))?;

    Ok(ZipWriter::new(BufWriter::new(file)))
}

/// Number of entries and sum of uncompressed sizes. This requires a pass over
/// the central directory only; no entry data is read.
pub fn stats(archive: &mut InputArchive) -> Result<(u64, u64)> {
    let mut files = 0u64;
    let mut total_size = 0u64;

    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index).map_err(Error::ArchiveReadHeader)?;

        files += 1;
        total_size += entry.size();
    }

    Ok((files, total_size))
}

pub fn add_file_from_data(output: &mut OutputArchive, name: &str, data: &[u8]) -> Result<()> {
    start_file(output, name)?;
    output.write_all(data).map_err(Error::ArchiveWriteData)?;

    Ok(())
}

/// Begin an entry that the caller will stream data into.
pub fn start_file(output: &mut OutputArchive, name: &str) -> Result<()> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    output
        .start_file(name, options)
        .map_err(Error::ArchiveWriteHeader)
}

/// Add an entry whose contents come from a file on disk. A missing source
/// file is reported as [`Error::FileOpen`] with [`io::ErrorKind::NotFound`]
/// preserved so callers can choose to tolerate it.
pub fn add_file_from_path(output: &mut OutputArchive, name: &str, path: &Path) -> Result<()> {
    let mut file = File::open(path).map_err(|e| Error::FileOpen(path.to_owned(), e))?;

    start_file(output, name)?;
    io::copy(&mut file, output).map_err(Error::ArchiveWriteData)?;

    Ok(())
}

/// Copy one entry between archives without recompressing. The entry's
/// compression method, timestamps, and permissions are preserved.
pub fn copy_raw(
    input: &mut InputArchive,
    index: usize,
    output: &mut OutputArchive,
    rename: Option<&str>,
) -> Result<()> {
    let entry = input.by_index_raw(index).map_err(Error::ArchiveReadHeader)?;

    let result = match rename {
        Some(name) => output.raw_copy_file_rename(entry, name),
        None => output.raw_copy_file(entry),
    };

    result.map_err(|e| match e {
        ZipError::Io(e) => Error::ArchiveWriteData(e),
        e => Error::ArchiveWriteHeader(e),
    })
}

/// Extract one entry below `dest_dir`. Entry names that would escape the
/// directory are rejected.
pub fn extract_entry(
    input: &mut InputArchive,
    index: usize,
    dest_dir: &Path,
    cancel_signal: &AtomicBool,
) -> Result<()> {
    let mut entry = input.by_index(index).map_err(Error::ArchiveReadHeader)?;

    let Some(relative) = entry.enclosed_name() else {
        return Err(Error::ArchiveReadHeader(ZipError::InvalidArchive(
            "Entry name escapes the extraction directory",
        )));
    };

    let path = dest_dir.join(relative);

    trace!("Extracting {:?} to {path:?}", entry.name());

    let parent = util::parent_path(&path);
    fs::create_dir_all(parent).map_err(|e| Error::FileWrite(parent.to_owned(), e))?;

    let mut file = File::create(&path).map_err(|e| Error::FileOpen(path.clone(), e))?;

    stream::copy(&mut entry, &mut file, cancel_signal).map_err(map_io_read)?;

    Ok(())
}
