//! # pagekv Layout Constants
//!
//! This module centralizes the constants that define the on-disk format and
//! the growth behavior of a store. Interdependent values are grouped together
//! so a change to one is reviewed against the others.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> meta file size (exactly one page)
//!       │
//!       ├─> data file growth quantum (file size is always n * PAGE_SIZE)
//!       │
//!       └─> minimum data file size (one page)
//!
//! DATA_HEADER_SIZE (4 bytes)
//!       │
//!       └─> record region starts at this offset; the header holds the
//!           legacy little-endian record-stream length kept for readers
//!           that predate the meta-file actual size
//!
//! META_HEADER_SIZE (40 bytes)
//!       │
//!       └─> byte-exact header at offset 0 of the meta page; the rest of
//!           the page is reserved and zero
//!
//! AES_KEY_LEN / AES_IV_LEN / AES_BLOCK_LEN (16 bytes each)
//!       │
//!       └─> the encryption filter is AES-128 in CFB mode; the IV field
//!           in the meta header is sized to AES_IV_LEN
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `PAGE_SIZE` is a power of two (growth doubles from it)
//! 2. `META_HEADER_SIZE <= PAGE_SIZE` (the header fits the meta page)
//! 3. `DATA_HEADER_SIZE < PAGE_SIZE` (a fresh one-page file has record room)

/// Size of a mapped page. The meta file is exactly one page; the data file
/// is always a positive multiple of this.
pub const PAGE_SIZE: usize = 4096;

/// Bytes reserved at offset 0 of the data file for the legacy record-stream
/// length (little-endian u32). The record region starts at this offset.
pub const DATA_HEADER_SIZE: usize = 4;

/// Size of the meta file header. Offsets within:
///
/// | off | size | field                    |
/// |-----|------|--------------------------|
/// | 0   | 4    | crc_digest               |
/// | 4   | 4    | actual_size              |
/// | 8   | 4    | version                  |
/// | 12  | 4    | sequence                 |
/// | 16  | 16   | iv                       |
/// | 32  | 4    | last_confirmed size      |
/// | 36  | 4    | last_confirmed crc       |
pub const META_HEADER_SIZE: usize = 40;

/// AES-128 key length. Shorter keys are zero-padded, longer keys truncated.
pub const AES_KEY_LEN: usize = 16;

/// CFB initialization vector length (one AES block).
pub const AES_IV_LEN: usize = 16;

/// AES block length.
pub const AES_BLOCK_LEN: usize = 16;

/// Extra bytes reserved by the space computation when the dictionary is
/// empty, so the first append leaves headroom for the next grow.
pub const EMPTY_DICT_RESERVE: usize = 4;

/// Floor on the item count used when projecting future usage during a grow;
/// keeps tiny dictionaries from growing one record at a time.
pub const GROWTH_MIN_ITEMS: usize = 8;

/// Identifier of the default store.
pub const DEFAULT_STORE_ID: &str = "pagekv.default";

/// Suffix appended to the data file name to form the meta file name.
pub const META_FILE_SUFFIX: &str = ".crc";

/// Directory (under the root) holding stores whose identifiers contain
/// filesystem-special characters and are therefore stored under their md5.
pub const SPECIAL_CHARACTER_DIR: &str = "specialCharacter";

/// Characters that force an identifier into [`SPECIAL_CHARACTER_DIR`].
pub const SPECIAL_CHARACTERS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

const _: () = assert!(PAGE_SIZE.is_power_of_two(), "growth doubles from PAGE_SIZE");
const _: () = assert!(
    META_HEADER_SIZE <= PAGE_SIZE,
    "meta header must fit in the one-page meta file"
);
const _: () = assert!(
    DATA_HEADER_SIZE < PAGE_SIZE,
    "a fresh one-page data file must have room for records"
);
const _: () = assert!(AES_IV_LEN == AES_BLOCK_LEN, "CFB feeds whole blocks back");
