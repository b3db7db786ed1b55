//! The fixed table of image types a BlueField boot loader understands.
//!
//! Declaration order is significant: unless expert ordering is requested,
//! images are emitted into a boot stream in exactly this order. Numeric IDs
//! must match the boot loader's own table (ATF's `tbbr_img_def.h` for the
//! firmware stages, the UEFI BfbFs driver for the rest).

use std::fmt;

use crate::error::{BfbError, Result};
use crate::header::MAX_IMAGE_VERSION;

/// Largest `N` accepted in `--<type>-vN` command-line options.
pub const MAX_CLI_IMAGE_VERSION: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageType {
    PscBl,
    PscFw,
    Bl2rCert,
    Bl2r,
    Bl2Cert,
    Bl2,
    Sys,
    DdrCert,
    DdrIni,
    SnpsImages,
    DdrAteImem,
    DdrAteDmem,
    Bl30KeyCert,
    Bl30Cert,
    Bl30,
    TrustedKeyCert,
    Bl31KeyCert,
    Bl31Cert,
    Bl31,
    PscApp,
    Bl32KeyCert,
    Bl32Cert,
    Bl32,
    Bl33KeyCert,
    Bl33Cert,
    Bl33,
    Capsule,
    BootAcpi,
    BootDtb,
    BootDesc,
    BootPath,
    BootArgs,
    BootTimeout,
    UefiTests,
    Ramdisk,
    Image,
    Initramfs,
}

#[derive(Debug)]
pub struct ImageTypeInfo {
    pub ty:          ImageType,
    pub name:        &'static str,
    pub description: &'static str,
    pub id:          u8,
}

const fn entry(ty: ImageType, name: &'static str, description: &'static str, id: u8) -> ImageTypeInfo {
    ImageTypeInfo { ty, name, description, id }
}

/// Indexed by `ImageType as usize`.
static IMAGE_TYPES: [ImageTypeInfo; 37] = [
    // ATF
    entry(ImageType::PscBl,          "psc-bl",           "PSC bootloader image",                                  36),
    entry(ImageType::PscFw,          "psc-fw",           "PSC framework image",                                   37),
    entry(ImageType::Bl2rCert,       "bl2r-cert",        "RIoT Core (BL2R) content certificate",                  31),
    entry(ImageType::Bl2r,           "bl2r",             "RIoT Core (BL2R) bin",                                  30),
    entry(ImageType::Bl2Cert,        "bl2-cert",         "Trusted Boot Firmware BL2 certificate",                 6),
    entry(ImageType::Bl2,            "bl2",              "Trusted Boot Firmware BL2 bin",                         1),
    entry(ImageType::Sys,            "sys",              "Running system's part number or PSID",                  29),
    entry(ImageType::DdrCert,        "ddr-cert",         "DDR Images Content Certificate",                        38),
    entry(ImageType::DdrIni,         "ddr_ini",          "File From Which Will Load DDR (pseudo spd) Parameters", 32),
    entry(ImageType::SnpsImages,     "snps_images",      "Combined SNPS Images for all DIMM types",               33),
    entry(ImageType::DdrAteImem,     "ddr_ate_imem",     "Analog Test Engine INSTRUCTIONS",                       34),
    entry(ImageType::DdrAteDmem,     "ddr_ate_dmem",     "Analog Test Engine DATA",                               35),
    entry(ImageType::Bl30KeyCert,    "bl30-key-cert",    "SCP Firmware BL3-0 key certificate",                    8),
    entry(ImageType::Bl30Cert,       "bl30-cert",        "SCP Firmware BL3-0 certificate",                        12),
    entry(ImageType::Bl30,           "bl30",             "SCP Firmware BL3-0",                                    2),
    entry(ImageType::TrustedKeyCert, "trusted-key-cert", "Trusted key certificate",                               7),
    entry(ImageType::Bl31KeyCert,    "bl31-key-cert",    "EL3 Runtime Firmware BL3-1 key certificate",            9),
    entry(ImageType::Bl31Cert,       "bl31-cert",        "EL3 Runtime Firmware BL3-1 content certificate",        13),
    entry(ImageType::Bl31,           "bl31",             "EL3 Runtime Firmware BL3-1 bin",                        3),
    entry(ImageType::PscApp,         "psc-app",          "PSC application image",                                 39),
    entry(ImageType::Bl32KeyCert,    "bl32-key-cert",    "Secure Payload BL3-2 (Trusted OS) key certificate",     10),
    entry(ImageType::Bl32Cert,       "bl32-cert",        "Secure Payload BL3-2 (Trusted OS) content certificate", 14),
    entry(ImageType::Bl32,           "bl32",             "Secure Payload BL3-2 (Trusted OS) bin",                 4),
    entry(ImageType::Bl33KeyCert,    "bl33-key-cert",    "Non-Trusted Firmware BL3-3 key certificate",            11),
    entry(ImageType::Bl33Cert,       "bl33-cert",        "Non-Trusted Firmware BL3-3 content certificate",        15),
    entry(ImageType::Bl33,           "bl33",             "Non-Trusted Firmware BL3-3 bin",                        5),
    // UEFI
    entry(ImageType::Capsule,        "capsule",          "UEFI capsule image",                                    52),
    entry(ImageType::BootAcpi,       "boot-acpi",        "Name of the ACPI table",                                55),
    entry(ImageType::BootDtb,        "boot-dtb",         "Name of the dtb file",                                  56),
    entry(ImageType::BootDesc,       "boot-desc",        "Default boot menu item description",                    57),
    entry(ImageType::BootPath,       "boot-path",        "Boot image path",                                       58),
    entry(ImageType::BootArgs,       "boot-args",        "Arguments for boot image",                              59),
    entry(ImageType::BootTimeout,    "boot-timeout",     "Boot menu timeout",                                     60),
    entry(ImageType::UefiTests,      "uefi-tests",       "Specify what UEFI tests to run",                        61),
    entry(ImageType::Ramdisk,        "ramdisk",          "RAM Disk image",                                        54),
    entry(ImageType::Image,          "image",            "Boot image",                                            62),
    entry(ImageType::Initramfs,      "initramfs",        "In-memory filesystem",                                  63),
];

impl ImageType {
    #[inline]
    pub fn info(self) -> &'static ImageTypeInfo {
        &IMAGE_TYPES[self as usize]
    }

    /// Command-line name, e.g. `bl31` or `boot-args`.
    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn description(self) -> &'static str {
        self.info().description
    }

    /// Numeric ID written into image headers.
    pub fn id(self) -> u8 {
        self.info().id
    }

    /// This type's bit in a following-images bitmap.
    #[inline]
    pub fn bit(self) -> u64 {
        1u64 << self.id()
    }

    /// Every image type, in default emission order.
    pub fn all() -> impl Iterator<Item = ImageType> {
        IMAGE_TYPES.iter().map(|info| info.ty)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        IMAGE_TYPES.iter().find(|info| info.name == name).map(|info| info.ty)
    }

    pub fn from_id(id: u8) -> Option<Self> {
        IMAGE_TYPES.iter().find(|info| info.id == id).map(|info| info.ty)
    }

    /// Resolve a name that may carry a `-vN` version suffix.
    ///
    /// The suffix is only stripped when what precedes it is itself a known
    /// type name, so a type whose own name ended in `-v<digits>` would still
    /// resolve. Without a suffix the version is 0.
    pub fn parse_versioned(name: &str) -> Result<(ImageType, u8)> {
        if let Some((base, suffix)) = name.rsplit_once('-') {
            let digits = suffix.strip_prefix('v').unwrap_or_default();
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                if let Some(ty) = Self::from_name(base) {
                    let version = digits
                        .parse::<u8>()
                        .ok()
                        .filter(|v| *v <= MAX_IMAGE_VERSION)
                        .ok_or_else(|| BfbError::InvalidVersion {
                            name:    name.to_owned(),
                            version: digits.to_owned(),
                        })?;
                    return Ok((ty, version));
                }
            }
        }
        Self::from_name(name)
            .map(|ty| (ty, 0))
            .ok_or_else(|| BfbError::UnknownImageType(name.to_owned()))
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
