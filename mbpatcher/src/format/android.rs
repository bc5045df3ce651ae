// SPDX-FileCopyrightText: 2024-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{self, Read, Write},
    str::{self, Utf8Error},
};

use bstr::ByteSlice;
use thiserror::Error;
use zerocopy::{little_endian, FromBytes, IntoBytes};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::{
        bootheader::{self, BootHeader, ANDROID_FIELDS},
        padding::{self, ZeroPadding},
    },
    stream::{CountingReader, CountingWriter, FromReader, ToWriter},
};

pub const BOOT_MAGIC: [u8; 8] = *b"ANDROID!";
pub const BOOT_NAME_SIZE: usize = 16;
pub const BOOT_ARGS_SIZE: usize = 512;

/// Maximum size of any individual boot image segment, like the kernel. There
/// is no known device where a single segment exceeds this size.
const SEGMENT_MAX_SIZE: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown magic: {0:?}")]
    UnknownMagic([u8; 8]),
    #[error("Page size must not be zero")]
    PageSizeZero,
    #[error("{0:?} segment is too large: {1}")]
    SegmentTooLarge(&'static str, u32),
    #[error("{0:?} field is not UTF-8 encoded: {data:?}", data = .2.as_bstr())]
    StringNotUtf8(&'static str, #[source] Utf8Error, Vec<u8>),
    #[error("{0:?} field is too long (>{1}): {2:?}")]
    StringTooLong(&'static str, usize, String),
    #[error("Failed to assign header field")]
    Field(#[from] bootheader::Error),
    #[error("Failed to read boot image data: {0}")]
    DataRead(&'static str, #[source] io::Error),
    #[error("Failed to write boot image data: {0}")]
    DataWrite(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the Android image header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
struct RawAndroidHeader {
    /// Magic value. This should be equal to [`BOOT_MAGIC`].
    magic: [u8; 8],
    kernel_size: little_endian::U32,
    kernel_addr: little_endian::U32,
    ramdisk_size: little_endian::U32,
    ramdisk_addr: little_endian::U32,
    second_size: little_endian::U32,
    second_addr: little_endian::U32,
    tags_addr: little_endian::U32,
    page_size: little_endian::U32,
    dt_size: little_endian::U32,
    unused: little_endian::U32,
    name: [u8; BOOT_NAME_SIZE],
    cmdline: [u8; BOOT_ARGS_SIZE],
    id: [little_endian::U32; 8],
}

fn check_segment(name: &'static str, size: u32) -> Result<u32> {
    if size > SEGMENT_MAX_SIZE {
        return Err(Error::SegmentTooLarge(name, size));
    }

    Ok(size)
}

/// Parsed Android boot image header: the field model plus the segment sizes
/// needed to locate the page-aligned segments that follow it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AndroidHeader {
    pub fields: BootHeader,
    pub kernel_size: u32,
    pub ramdisk_size: u32,
    pub second_size: u32,
    pub dt_size: u32,
}

impl AndroidHeader {
    /// Create an empty header with the Android supported-field table.
    pub fn new() -> Self {
        Self {
            fields: BootHeader::with_fields(ANDROID_FIELDS),
            kernel_size: 0,
            ramdisk_size: 0,
            second_size: 0,
            dt_size: 0,
        }
    }
}

impl Default for AndroidHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AndroidHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Android boot image header:")?;
        writeln!(f, "- Kernel size:          {}", self.kernel_size)?;
        writeln!(f, "- Kernel address:       {:#x}", self.fields.kernel_address())?;
        writeln!(f, "- Ramdisk size:         {}", self.ramdisk_size)?;
        writeln!(f, "- Ramdisk address:      {:#x}", self.fields.ramdisk_address())?;
        writeln!(f, "- Second stage size:    {}", self.second_size)?;
        writeln!(f, "- Second stage address: {:#x}", self.fields.secondboot_address())?;
        writeln!(f, "- Kernel tags address:  {:#x}", self.fields.kernel_tags_address())?;
        writeln!(f, "- Page size:            {}", self.fields.page_size())?;
        writeln!(f, "- Device tree size:     {}", self.dt_size)?;
        writeln!(f, "- Board name:           {:?}", self.fields.board_name())?;
        writeln!(f, "- Kernel cmdline:       {:?}", self.fields.kernel_cmdline())?;
        write!(f, "- ID:                   {:?}", self.fields.id())
    }
}

impl<R: Read> FromReader<R> for AndroidHeader {
    type Error = Error;

    fn from_reader(reader: R) -> Result<Self> {
        let mut reader = CountingReader::new(reader);

        let raw = RawAndroidHeader::read_from_io(&mut reader)
            .map_err(|e| Error::DataRead("Android::header", e))?;

        if raw.magic != BOOT_MAGIC {
            return Err(Error::UnknownMagic(raw.magic));
        }

        let page_size = raw.page_size.get();
        if page_size == 0 {
            return Err(Error::PageSizeZero);
        }

        let kernel_size = check_segment("Android::kernel_size", raw.kernel_size.get())?;
        let ramdisk_size = check_segment("Android::ramdisk_size", raw.ramdisk_size.get())?;
        let second_size = check_segment("Android::second_size", raw.second_size.get())?;
        let dt_size = check_segment("Android::dt_size", raw.dt_size.get())?;

        let name = raw.name.trim_end_padding();
        let name = str::from_utf8(name)
            .map_err(|e| Error::StringNotUtf8("Android::name", e, name.to_vec()))?;

        let cmdline = raw.cmdline.trim_end_padding();
        let cmdline = str::from_utf8(cmdline)
            .map_err(|e| Error::StringNotUtf8("Android::cmdline", e, cmdline.to_vec()))?;

        let mut fields = BootHeader::with_fields(ANDROID_FIELDS);
        fields.set_kernel_address(raw.kernel_addr.get())?;
        fields.set_ramdisk_address(raw.ramdisk_addr.get())?;
        fields.set_secondboot_address(raw.second_addr.get())?;
        fields.set_kernel_tags_address(raw.tags_addr.get())?;
        fields.set_page_size(page_size)?;
        fields.set_board_name(name)?;
        fields.set_kernel_cmdline(cmdline)?;
        fields.set_id(raw.id.map(|id| id.get()))?;

        // The segments that follow start on the next page boundary.
        padding::read_discard(&mut reader, page_size.into())
            .map_err(|e| Error::DataRead("Android::header_padding", e))?;

        Ok(Self {
            fields,
            kernel_size,
            ramdisk_size,
            second_size,
            dt_size,
        })
    }
}

impl<W: Write> ToWriter<W> for AndroidHeader {
    type Error = Error;

    fn to_writer(&self, writer: W) -> Result<()> {
        let page_size = self.fields.page_size();
        if page_size == 0 {
            return Err(Error::PageSizeZero);
        }

        check_segment("Android::kernel_size", self.kernel_size)?;
        check_segment("Android::ramdisk_size", self.ramdisk_size)?;
        check_segment("Android::second_size", self.second_size)?;
        check_segment("Android::dt_size", self.dt_size)?;

        let name = self
            .fields
            .board_name()
            .as_bytes()
            .to_padded_array::<BOOT_NAME_SIZE>()
            .ok_or_else(|| {
                Error::StringTooLong(
                    "Android::name",
                    BOOT_NAME_SIZE,
                    self.fields.board_name().to_owned(),
                )
            })?;
        let cmdline = self
            .fields
            .kernel_cmdline()
            .as_bytes()
            .to_padded_array::<BOOT_ARGS_SIZE>()
            .ok_or_else(|| {
                Error::StringTooLong(
                    "Android::cmdline",
                    BOOT_ARGS_SIZE,
                    self.fields.kernel_cmdline().to_owned(),
                )
            })?;

        let raw = RawAndroidHeader {
            magic: BOOT_MAGIC,
            kernel_size: self.kernel_size.into(),
            kernel_addr: self.fields.kernel_address().into(),
            ramdisk_size: self.ramdisk_size.into(),
            ramdisk_addr: self.fields.ramdisk_address().into(),
            second_size: self.second_size.into(),
            second_addr: self.fields.secondboot_address().into(),
            tags_addr: self.fields.kernel_tags_address().into(),
            page_size: page_size.into(),
            dt_size: self.dt_size.into(),
            unused: 0u32.into(),
            name,
            cmdline,
            id: self.fields.id().map(|id| id.into()),
        };

        let mut writer = CountingWriter::new(writer);

        raw.write_to_io(&mut writer)
            .map_err(|e| Error::DataWrite("Android::header", e))?;

        padding::write_zeros(&mut writer, page_size.into())
            .map_err(|e| Error::DataWrite("Android::header_padding", e))?;

        Ok(())
    }
}
