// SPDX-FileCopyrightText: 2024-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Boot image header fields. The bit values are a stable contract between
    /// the header model and every variant loader/saver and must not change.
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub struct HeaderField: u32 {
        const KERNEL_ADDRESS = 1 << 0;
        const RAMDISK_ADDRESS = 1 << 1;
        const SECONDBOOT_ADDRESS = 1 << 2;
        const KERNEL_TAGS_ADDRESS = 1 << 3;
        const SONY_IPL_ADDRESS = 1 << 4;
        const SONY_RPM_ADDRESS = 1 << 5;
        const SONY_APPSBL_ADDRESS = 1 << 6;
        const PAGE_SIZE = 1 << 7;
        const BOARD_NAME = 1 << 8;
        const KERNEL_CMDLINE = 1 << 9;
        const ID = 1 << 10;
        const ENTRYPOINT = 1 << 11;
    }
}

/// Fields representable by the Android boot image header.
pub const ANDROID_FIELDS: HeaderField = HeaderField::KERNEL_ADDRESS
    .union(HeaderField::RAMDISK_ADDRESS)
    .union(HeaderField::SECONDBOOT_ADDRESS)
    .union(HeaderField::KERNEL_TAGS_ADDRESS)
    .union(HeaderField::PAGE_SIZE)
    .union(HeaderField::BOARD_NAME)
    .union(HeaderField::KERNEL_CMDLINE)
    .union(HeaderField::ID);

/// Loki images embed an unmodified Android header.
pub const LOKI_FIELDS: HeaderField = ANDROID_FIELDS;

/// Bump images embed an unmodified Android header.
pub const BUMP_FIELDS: HeaderField = ANDROID_FIELDS;

/// MTK images wrap the Android header plus per-segment MTK headers that carry
/// no fields of their own.
pub const MTK_FIELDS: HeaderField = ANDROID_FIELDS;

/// Fields representable by the Sony ELF boot image header.
pub const SONY_ELF_FIELDS: HeaderField = HeaderField::KERNEL_ADDRESS
    .union(HeaderField::RAMDISK_ADDRESS)
    .union(HeaderField::SONY_IPL_ADDRESS)
    .union(HeaderField::SONY_RPM_ADDRESS)
    .union(HeaderField::SONY_APPSBL_ADDRESS)
    .union(HeaderField::KERNEL_CMDLINE)
    .union(HeaderField::ENTRYPOINT);

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum Error {
    #[error("Field is not supported by this image variant: {0:?}")]
    UnsupportedField(HeaderField),
}

type Result<T> = std::result::Result<T, Error>;

/// Typed storage for the union of fields across all image variants. Unset
/// fields hold their zero defaults.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct FieldData {
    kernel_address: u32,
    ramdisk_address: u32,
    secondboot_address: u32,
    kernel_tags_address: u32,
    sony_ipl_address: u32,
    sony_rpm_address: u32,
    sony_appsbl_address: u32,
    page_size: u32,
    board_name: String,
    kernel_cmdline: String,
    id: [u32; 8],
    entrypoint_address: u32,
}

macro_rules! numeric_field {
    ($field:ident, $flag:ident, $ty:ty, $get:ident, $is_set:ident, $set:ident, $unset:ident) => {
        pub fn $get(&self) -> $ty {
            self.data.$field
        }

        pub fn $is_set(&self) -> bool {
            self.set.contains(HeaderField::$flag)
        }

        pub fn $set(&mut self, value: $ty) -> Result<()> {
            self.check_supported(HeaderField::$flag)?;

            self.data.$field = value;
            self.set.insert(HeaderField::$flag);

            Ok(())
        }

        pub fn $unset(&mut self) -> Result<()> {
            self.check_supported(HeaderField::$flag)?;

            self.data.$field = Default::default();
            self.set.remove(HeaderField::$flag);

            Ok(())
        }
    };
}

/// In-memory boot image header.
///
/// Which fields are meaningful depends on the image variant. Rather than one
/// type per variant, a single flat record carries the union of all fields,
/// tagged with two bitmasks: the fields the variant can represent at all and
/// the fields currently holding a meaningful value. Setters on unsupported
/// fields fail without modifying anything; getters on unset fields return the
/// zero default.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootHeader {
    supported: HeaderField,
    set: HeaderField,
    data: FieldData,
}

impl Default for BootHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl BootHeader {
    /// Create an empty header that supports every known field.
    pub fn new() -> Self {
        Self::with_fields(HeaderField::all())
    }

    /// Create an empty header for a variant's supported-field table.
    pub fn with_fields(fields: HeaderField) -> Self {
        Self {
            supported: fields & HeaderField::all(),
            set: HeaderField::empty(),
            data: FieldData::default(),
        }
    }

    pub fn supported_fields(&self) -> HeaderField {
        self.supported
    }

    /// Replace the supported-field mask. Unknown bits are dropped. Fields that
    /// are set but no longer supported are unset, including their storage; the
    /// set mask always stays a subset of the supported mask.
    pub fn set_supported_fields(&mut self, fields: HeaderField) {
        self.supported = fields & HeaderField::all();

        let stranded = self.set.difference(self.supported);

        if stranded.contains(HeaderField::KERNEL_ADDRESS) {
            self.data.kernel_address = 0;
        }
        if stranded.contains(HeaderField::RAMDISK_ADDRESS) {
            self.data.ramdisk_address = 0;
        }
        if stranded.contains(HeaderField::SECONDBOOT_ADDRESS) {
            self.data.secondboot_address = 0;
        }
        if stranded.contains(HeaderField::KERNEL_TAGS_ADDRESS) {
            self.data.kernel_tags_address = 0;
        }
        if stranded.contains(HeaderField::SONY_IPL_ADDRESS) {
            self.data.sony_ipl_address = 0;
        }
        if stranded.contains(HeaderField::SONY_RPM_ADDRESS) {
            self.data.sony_rpm_address = 0;
        }
        if stranded.contains(HeaderField::SONY_APPSBL_ADDRESS) {
            self.data.sony_appsbl_address = 0;
        }
        if stranded.contains(HeaderField::PAGE_SIZE) {
            self.data.page_size = 0;
        }
        if stranded.contains(HeaderField::BOARD_NAME) {
            self.data.board_name.clear();
        }
        if stranded.contains(HeaderField::KERNEL_CMDLINE) {
            self.data.kernel_cmdline.clear();
        }
        if stranded.contains(HeaderField::ID) {
            self.data.id = [0; 8];
        }
        if stranded.contains(HeaderField::ENTRYPOINT) {
            self.data.entrypoint_address = 0;
        }

        self.set &= self.supported;
    }

    pub fn fields_set(&self) -> HeaderField {
        self.set
    }

    /// Reset every field to its zero default and mark all fields unset. The
    /// supported-field mask is preserved because it is a property of the image
    /// variant, not of the current data.
    pub fn clear(&mut self) {
        self.set = HeaderField::empty();
        self.data = FieldData::default();
    }

    fn check_supported(&self, field: HeaderField) -> Result<()> {
        if !self.supported.contains(field) {
            return Err(Error::UnsupportedField(field));
        }

        Ok(())
    }

    numeric_field!(
        kernel_address,
        KERNEL_ADDRESS,
        u32,
        kernel_address,
        kernel_address_is_set,
        set_kernel_address,
        unset_kernel_address
    );
    numeric_field!(
        ramdisk_address,
        RAMDISK_ADDRESS,
        u32,
        ramdisk_address,
        ramdisk_address_is_set,
        set_ramdisk_address,
        unset_ramdisk_address
    );
    numeric_field!(
        secondboot_address,
        SECONDBOOT_ADDRESS,
        u32,
        secondboot_address,
        secondboot_address_is_set,
        set_secondboot_address,
        unset_secondboot_address
    );
    numeric_field!(
        kernel_tags_address,
        KERNEL_TAGS_ADDRESS,
        u32,
        kernel_tags_address,
        kernel_tags_address_is_set,
        set_kernel_tags_address,
        unset_kernel_tags_address
    );
    numeric_field!(
        sony_ipl_address,
        SONY_IPL_ADDRESS,
        u32,
        sony_ipl_address,
        sony_ipl_address_is_set,
        set_sony_ipl_address,
        unset_sony_ipl_address
    );
    numeric_field!(
        sony_rpm_address,
        SONY_RPM_ADDRESS,
        u32,
        sony_rpm_address,
        sony_rpm_address_is_set,
        set_sony_rpm_address,
        unset_sony_rpm_address
    );
    numeric_field!(
        sony_appsbl_address,
        SONY_APPSBL_ADDRESS,
        u32,
        sony_appsbl_address,
        sony_appsbl_address_is_set,
        set_sony_appsbl_address,
        unset_sony_appsbl_address
    );
    numeric_field!(
        page_size,
        PAGE_SIZE,
        u32,
        page_size,
        page_size_is_set,
        set_page_size,
        unset_page_size
    );
    numeric_field!(
        id,
        ID,
        [u32; 8],
        id,
        id_is_set,
        set_id,
        unset_id
    );
    numeric_field!(
        entrypoint_address,
        ENTRYPOINT,
        u32,
        entrypoint_address,
        entrypoint_address_is_set,
        set_entrypoint_address,
        unset_entrypoint_address
    );

    pub fn board_name(&self) -> &str {
        &self.data.board_name
    }

    pub fn board_name_is_set(&self) -> bool {
        self.set.contains(HeaderField::BOARD_NAME)
    }

    pub fn set_board_name(&mut self, value: impl Into<String>) -> Result<()> {
        self.check_supported(HeaderField::BOARD_NAME)?;

        self.data.board_name = value.into();
        self.set.insert(HeaderField::BOARD_NAME);

        Ok(())
    }

    pub fn unset_board_name(&mut self) -> Result<()> {
        self.check_supported(HeaderField::BOARD_NAME)?;

        self.data.board_name.clear();
        self.set.remove(HeaderField::BOARD_NAME);

        Ok(())
    }

    pub fn kernel_cmdline(&self) -> &str {
        &self.data.kernel_cmdline
    }

    pub fn kernel_cmdline_is_set(&self) -> bool {
        self.set.contains(HeaderField::KERNEL_CMDLINE)
    }

    pub fn set_kernel_cmdline(&mut self, value: impl Into<String>) -> Result<()> {
        self.check_supported(HeaderField::KERNEL_CMDLINE)?;

        self.data.kernel_cmdline = value.into();
        self.set.insert(HeaderField::KERNEL_CMDLINE);

        Ok(())
    }

    pub fn unset_kernel_cmdline(&mut self) -> Result<()> {
        self.check_supported(HeaderField::KERNEL_CMDLINE)?;

        self.data.kernel_cmdline.clear();
        self.set.remove(HeaderField::KERNEL_CMDLINE);

        Ok(())
    }
}
