//! # Storage Module
//!
//! The foundational storage layer for pagekv: the memory-mapped file pair,
//! the meta header, the inter-process advisory lock, and the append cursor.
//!
//! ## Architecture Overview
//!
//! Every store owns two mappings:
//!
//! ```text
//! <root>/<id>        data file   n * PAGE_SIZE, grows by doubling
//! <root>/<id>.crc    meta file   exactly one page
//! ```
//!
//! The data file holds a 4-byte legacy length header followed by an append
//! log of varint-prefixed records. The meta file holds the integrity header
//! (CRC digest, actual size, format version, sequence, IV, last-confirmed
//! snapshot) that makes the data file recoverable and shareable across
//! processes.
//!
//! ## Coherence Protocol
//!
//! Mutators hold the exclusive advisory lock while writing the record region
//! and the meta header; the header is written only after the data write
//! completed, so a reader that validates `CRC32(region[4..4+actual_size))`
//! against the header never observes a half-committed state. Readers detect
//! external changes by comparing the mapped header against their in-memory
//! mirror: a sequence change means a full rewrite happened (reload), a CRC
//! change alone means appends happened (merge incrementally).
//!
//! ## Module Organization
//!
//! - `mmap`: data and meta file mappings (`DataFile`, `MetaFile`)
//! - `meta`: meta header wire struct and in-memory mirror
//! - `lock`: shared/exclusive advisory lock with counted re-entrancy
//! - `append`: cursor writing length-prefixed records into the mapped tail

pub mod append;
pub mod lock;
pub mod meta;
pub mod mmap;

pub use append::{record_size, AppendBuffer};
pub use lock::{ExclusiveLockGuard, ProcessLock, SharedLockGuard};
pub use meta::{
    MetaHeader, MetaInfo, VERSION_ACTUAL_SIZE, VERSION_LEGACY, VERSION_RANDOM_IV, VERSION_SEQUENCE,
};
pub use mmap::{DataFile, MetaFile};
