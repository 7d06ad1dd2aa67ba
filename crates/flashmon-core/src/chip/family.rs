//! Static table of supported flash chip families

use core::fmt;

/// Manufacturer/device ID pair read back in identification mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChipIdentity {
    /// Manufacturer ID word (read at the flash base)
    pub manufacturer_id: u16,
    /// Device ID word (read at base + 2)
    pub device_id: u16,
}

impl fmt::Display for ChipIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "manufacturer 0x{:04X}, device 0x{:04X}",
            self.manufacturer_id, self.device_id
        )
    }
}

/// Command set and status protocol a family speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FamilyKind {
    /// Two x8 AMD-style parts side by side on the 16-bit bus
    AmdPacked,
    /// Atmel x16 parts: AMD command set, inverted data polling
    Atmel,
    /// Intel boot block, boot sectors at the top
    IntelTopBoot,
    /// Intel boot block, boot sectors at the bottom
    IntelBottomBoot,
    /// ST M29W800, byte-wide commands on the x16 bus
    M29W800,
}

/// Which identification sequence exposes a family's ID words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdSequence {
    /// AAAA/5555 unlock followed by 9090
    Amd,
    /// AA/55 unlock followed by 90 and 98
    M29W800,
    /// Clear status, then intelligent ID (90)
    Intel,
}

impl FamilyKind {
    /// Sequence used to identify parts of this kind
    pub fn id_sequence(self) -> IdSequence {
        match self {
            Self::AmdPacked | Self::Atmel => IdSequence::Amd,
            Self::IntelTopBoot | Self::IntelBottomBoot => IdSequence::Intel,
            Self::M29W800 => IdSequence::M29W800,
        }
    }
}

/// One supported chip family
#[derive(Debug, PartialEq, Eq)]
pub struct ChipFamily {
    /// Vendor name
    pub vendor: &'static str,
    /// Part name
    pub name: &'static str,
    /// Digit reported in the identify frame
    pub digit: u8,
    /// Expected manufacturer ID (after `manufacturer_mask`)
    pub manufacturer_id: u16,
    /// Bits of the manufacturer word that are compared
    pub manufacturer_mask: u16,
    /// Expected device ID
    pub device_id: u16,
    /// Command set
    pub kind: FamilyKind,
    /// Bytes of flash behind the 16-bit bus
    pub size: u32,
    /// Erase sector sizes in bytes, in address order from the flash base
    pub sectors: &'static [u32],
}

impl ChipFamily {
    /// Whether `id` belongs to this family
    pub fn matches(&self, id: ChipIdentity) -> bool {
        id.manufacturer_id & self.manufacturer_mask == self.manufacturer_id
            && id.device_id == self.device_id
    }

    /// Offset and size of sector `index`
    pub fn sector(&self, index: usize) -> Option<(u32, u32)> {
        let size = *self.sectors.get(index)?;
        let offset = self.sectors[..index].iter().sum();
        Some((offset, size))
    }
}

/// Digit reported when no family matched
pub const UNKNOWN_DIGIT: u8 = b'0';

const KIB: u32 = 1024;

/// Every family the monitor can drive
pub static FAMILIES: &[ChipFamily] = &[
    ChipFamily {
        vendor: "AMD",
        name: "Am29F040 (x2)",
        digit: b'1',
        manufacturer_id: 0x0101,
        manufacturer_mask: 0xFFFF,
        device_id: 0xA4A4,
        kind: FamilyKind::AmdPacked,
        size: 1024 * KIB,
        sectors: &[128 * KIB; 8],
    },
    ChipFamily {
        vendor: "Intel",
        name: "28F800-T",
        digit: b'2',
        manufacturer_id: 0x0089,
        manufacturer_mask: 0xFFFF,
        device_id: 0x889C,
        kind: FamilyKind::IntelTopBoot,
        size: 1024 * KIB,
        sectors: &[128 * KIB; 4],
    },
    ChipFamily {
        vendor: "Intel",
        name: "28F800-B",
        digit: b'3',
        manufacturer_id: 0x0089,
        manufacturer_mask: 0xFFFF,
        device_id: 0x889D,
        kind: FamilyKind::IntelBottomBoot,
        size: 1024 * KIB,
        sectors: &[
            16 * KIB,
            8 * KIB,
            8 * KIB,
            128 * KIB,
            128 * KIB,
            128 * KIB,
            128 * KIB,
        ],
    },
    ChipFamily {
        vendor: "Atmel",
        name: "AT49F8192A",
        digit: b'4',
        manufacturer_id: 0x001F,
        manufacturer_mask: 0xFFFF,
        device_id: 0x00A0,
        kind: FamilyKind::Atmel,
        size: 1024 * KIB,
        sectors: &[16 * KIB, 8 * KIB, 8 * KIB, 992 * KIB],
    },
    ChipFamily {
        vendor: "Atmel",
        name: "AT49F8192AT",
        digit: b'5',
        manufacturer_id: 0x001F,
        manufacturer_mask: 0xFFFF,
        device_id: 0x00A3,
        kind: FamilyKind::Atmel,
        size: 1024 * KIB,
        sectors: &[992 * KIB, 8 * KIB, 8 * KIB, 16 * KIB],
    },
    ChipFamily {
        vendor: "ST",
        name: "M29W800DT",
        digit: b'6',
        manufacturer_id: 0x0020,
        manufacturer_mask: 0x00FF,
        device_id: 0x22D7,
        kind: FamilyKind::M29W800,
        size: 1024 * KIB,
        sectors: &[
            64 * KIB,
            64 * KIB,
            64 * KIB,
            64 * KIB,
            64 * KIB,
            64 * KIB,
            64 * KIB,
            64 * KIB,
            64 * KIB,
            64 * KIB,
            64 * KIB,
            64 * KIB,
            64 * KIB,
            64 * KIB,
            64 * KIB,
            32 * KIB,
            8 * KIB,
            8 * KIB,
            16 * KIB,
        ],
    },
    ChipFamily {
        vendor: "SST",
        name: "SST39SF040 (x2)",
        digit: b'7',
        manufacturer_id: 0xBFBF,
        manufacturer_mask: 0xFFFF,
        device_id: 0xB7B7,
        kind: FamilyKind::AmdPacked,
        size: 1024 * KIB,
        sectors: &[8 * KIB; 128],
    },
];

/// Find the family answering `id` to `sequence`
pub fn lookup(sequence: IdSequence, id: ChipIdentity) -> Option<&'static ChipFamily> {
    FAMILIES
        .iter()
        .find(|f| f.kind.id_sequence() == sequence && f.matches(id))
}

/// Find a family by its identify-frame digit
pub fn from_digit(digit: u8) -> Option<&'static ChipFamily> {
    FAMILIES.iter().find(|f| f.digit == digit)
}

/// Find a family by part name, ignoring case
pub fn find_by_name(name: &str) -> Option<&'static ChipFamily> {
    FAMILIES.iter().find(|f| {
        let short = f.name.split_whitespace().next().unwrap_or(f.name);
        f.name.eq_ignore_ascii_case(name) || short.eq_ignore_ascii_case(name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_maps_cover_chip() {
        for family in FAMILIES {
            let total: u32 = family.sectors.iter().sum();
            assert!(total <= family.size, "{} sector map too large", family.name);
            if !matches!(family.kind, FamilyKind::IntelTopBoot | FamilyKind::IntelBottomBoot) {
                assert_eq!(total, family.size, "{}", family.name);
            }
        }
    }

    #[test]
    fn test_digits_unique() {
        for (i, a) in FAMILIES.iter().enumerate() {
            for b in &FAMILIES[i + 1..] {
                assert_ne!(a.digit, b.digit);
            }
            assert_eq!(from_digit(a.digit), Some(a));
        }
        assert_eq!(from_digit(UNKNOWN_DIGIT), None);
    }

    #[test]
    fn test_lookup_respects_sequence() {
        let amd = ChipIdentity {
            manufacturer_id: 0x0101,
            device_id: 0xA4A4,
        };
        assert_eq!(lookup(IdSequence::Amd, amd).map(|f| f.digit), Some(b'1'));
        assert_eq!(lookup(IdSequence::Intel, amd), None);

        let st = ChipIdentity {
            manufacturer_id: 0xFF20,
            device_id: 0x22D7,
        };
        assert_eq!(lookup(IdSequence::M29W800, st).map(|f| f.digit), Some(b'6'));
    }

    #[test]
    fn test_intel_bottom_boot_sectors() {
        let family = from_digit(b'3').unwrap();
        assert_eq!(family.sectors.len(), 7);
        assert_eq!(family.sector(0), Some((0, 0x4000)));
        assert_eq!(family.sector(1), Some((0x4000, 0x2000)));
        assert_eq!(family.sector(2), Some((0x6000, 0x2000)));
        assert_eq!(family.sector(3), Some((0x8000, 0x20000)));
        assert_eq!(family.sector(7), None);
    }

    #[test]
    fn test_find_by_name() {
        assert_eq!(find_by_name("am29f040").map(|f| f.digit), Some(b'1'));
        assert_eq!(find_by_name("M29W800DT").map(|f| f.digit), Some(b'6'));
        assert!(find_by_name("w25q128").is_none());
    }
}
