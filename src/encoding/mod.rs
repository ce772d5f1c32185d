//! # Record and Value Encoding
//!
//! This module provides the wire encoding used inside the data file's record
//! region and inside individual values.
//!
//! ## Record Format
//!
//! The record region is a packed sequence of records, each encoded as:
//!
//! ```text
//! varint(key_len) | key bytes | varint(value_len) | value bytes
//! ```
//!
//! A record with `value_len == 0` is a tombstone: it deletes its key. The
//! last record for a key wins. Records are appended, never rewritten in
//! place; compaction re-encodes the live dictionary as one contiguous run of
//! records.
//!
//! ## Varints
//!
//! Length prefixes and integer scalar values use base-128 varints: seven
//! payload bits per byte, least-significant group first, high bit set on
//! every byte but the last. Small lengths (the overwhelmingly common case
//! for keys) encode in one byte.
//!
//! ## Module Organization
//!
//! - `varint`: base-128 varint encode/decode over byte slices
//! - `values`: typed scalar payload codec (bool, integers, floats, strings)

pub mod values;
pub mod varint;
