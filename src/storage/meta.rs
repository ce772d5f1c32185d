//! # Meta File Header
//!
//! Type-safe, zerocopy-based layout of the integrity header at offset 0 of
//! the one-page meta file, plus the in-memory mirror the engine works with.
//!
//! ## Header Layout
//!
//! The header is exactly 40 bytes; the rest of the page is reserved and
//! zero. All multi-byte fields are little-endian.
//!
//! ```text
//! Offset  Size  Description
//! 0       4     CRC32 of the data file's record region
//! 4       4     Actual size (record-stream length in bytes)
//! 8       4     Format version
//! 12      4     Sequence (bumped on every full rewrite / clear / rekey)
//! 16      16    AES-CFB initialization vector
//! 32      4     Last-confirmed actual size
//! 36      4     Last-confirmed CRC32
//! ```
//!
//! ## Format Versions
//!
//! The version field only moves forward, to the minimum version the fields
//! being written require:
//!
//! - `0` legacy: no meta header; the data file's 4-byte length is authoritative
//! - `1` sequence: sequence-based cross-process change detection
//! - `2` actual-size: the meta header's size field is authoritative and the
//!   last-confirmed snapshot is maintained
//! - `3` random-iv: the IV field carries a real random IV, refreshed on
//!   every full rewrite
//!
//! ## Write Paths
//!
//! The full header is rewritten when the version, sequence, or IV change;
//! the hot path after each append touches only the first 8 bytes
//! (CRC + actual size). Both are plain stores into the shared mapping; the
//! cross-process protocol tolerates torn reads because any inconsistency
//! shows up as a CRC mismatch and triggers a reload.

use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{AES_IV_LEN, META_HEADER_SIZE};
use crate::zerocopy_accessors;

pub const VERSION_LEGACY: u32 = 0;
pub const VERSION_SEQUENCE: u32 = 1;
pub const VERSION_ACTUAL_SIZE: u32 = 2;
pub const VERSION_RANDOM_IV: u32 = 3;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MetaHeader {
    crc_digest: U32,
    actual_size: U32,
    version: U32,
    sequence: U32,
    iv: [u8; AES_IV_LEN],
    last_actual_size: U32,
    last_crc_digest: U32,
}

const _: () = assert!(std::mem::size_of::<MetaHeader>() == META_HEADER_SIZE);

impl MetaHeader {
    zerocopy_accessors! {
        crc_digest: u32,
        actual_size: u32,
        version: u32,
        sequence: u32,
        last_actual_size: u32,
        last_crc_digest: u32,
    }

    pub fn iv(&self) -> &[u8; AES_IV_LEN] {
        &self.iv
    }

    pub fn set_iv(&mut self, iv: &[u8; AES_IV_LEN]) {
        self.iv = *iv;
    }
}

/// In-memory mirror of the meta header. The engine compares its mirror
/// against the mapped header to detect writes by other processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetaInfo {
    pub crc_digest: u32,
    pub actual_size: u32,
    pub version: u32,
    pub sequence: u32,
    pub iv: [u8; AES_IV_LEN],
    pub last_actual_size: u32,
    pub last_crc_digest: u32,
}

impl MetaInfo {
    /// Copies the header out of the mapped meta page.
    pub fn read(mem: &[u8]) -> Self {
        let Ok(header) = MetaHeader::read_from_bytes(&mem[..META_HEADER_SIZE]) else {
            return Self::default();
        };
        Self {
            crc_digest: header.crc_digest(),
            actual_size: header.actual_size(),
            version: header.version(),
            sequence: header.sequence(),
            iv: *header.iv(),
            last_actual_size: header.last_actual_size(),
            last_crc_digest: header.last_crc_digest(),
        }
    }

    /// Writes the whole header back into the mapped meta page.
    pub fn write(&self, mem: &mut [u8]) {
        let header = MetaHeader {
            crc_digest: U32::new(self.crc_digest),
            actual_size: U32::new(self.actual_size),
            version: U32::new(self.version),
            sequence: U32::new(self.sequence),
            iv: self.iv,
            last_actual_size: U32::new(self.last_actual_size),
            last_crc_digest: U32::new(self.last_crc_digest),
        };
        mem[..META_HEADER_SIZE].copy_from_slice(header.as_bytes());
    }

    /// Hot-path write of only the CRC and actual-size fields, for the
    /// per-append update that touches neither sequence nor IV.
    pub fn write_crc_and_actual_size_only(&self, mem: &mut [u8]) {
        mem[..4].copy_from_slice(&self.crc_digest.to_le_bytes());
        mem[4..8].copy_from_slice(&self.actual_size.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;

    #[test]
    fn header_size_is_40() {
        assert_eq!(std::mem::size_of::<MetaHeader>(), 40);
    }

    #[test]
    fn roundtrip_through_a_page() {
        let mut page = vec![0u8; PAGE_SIZE];
        let info = MetaInfo {
            crc_digest: 0xDEADBEEF,
            actual_size: 1234,
            version: VERSION_RANDOM_IV,
            sequence: 7,
            iv: *b"0123456789abcdef",
            last_actual_size: 1000,
            last_crc_digest: 0xCAFEBABE,
        };

        info.write(&mut page);
        let read = MetaInfo::read(&page);

        assert_eq!(read, info);
    }

    #[test]
    fn field_offsets_match_the_wire_layout() {
        let mut page = vec![0u8; PAGE_SIZE];
        let info = MetaInfo {
            crc_digest: 0x04030201,
            actual_size: 0x08070605,
            version: 0x0C0B0A09,
            sequence: 0x100F0E0D,
            iv: [0x11; AES_IV_LEN],
            last_actual_size: 0x24232221,
            last_crc_digest: 0x28272625,
        };
        info.write(&mut page);

        assert_eq!(&page[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&page[4..8], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&page[8..12], &[0x09, 0x0A, 0x0B, 0x0C]);
        assert_eq!(&page[12..16], &[0x0D, 0x0E, 0x0F, 0x10]);
        assert_eq!(&page[16..32], &[0x11; 16]);
        assert_eq!(&page[32..36], &[0x21, 0x22, 0x23, 0x24]);
        assert_eq!(&page[36..40], &[0x25, 0x26, 0x27, 0x28]);
    }

    #[test]
    fn crc_and_size_only_write_leaves_the_rest_alone() {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut info = MetaInfo {
            sequence: 3,
            version: VERSION_ACTUAL_SIZE,
            iv: [0xAA; AES_IV_LEN],
            ..Default::default()
        };
        info.write(&mut page);

        info.crc_digest = 42;
        info.actual_size = 77;
        info.write_crc_and_actual_size_only(&mut page);

        let read = MetaInfo::read(&page);
        assert_eq!(read.crc_digest, 42);
        assert_eq!(read.actual_size, 77);
        assert_eq!(read.sequence, 3);
        assert_eq!(read.iv, [0xAA; AES_IV_LEN]);
    }

    #[test]
    fn zeroed_page_reads_as_legacy_defaults() {
        let page = vec![0u8; PAGE_SIZE];
        let read = MetaInfo::read(&page);
        assert_eq!(read.version, VERSION_LEGACY);
        assert_eq!(read.sequence, 0);
        assert_eq!(read.actual_size, 0);
    }
}
