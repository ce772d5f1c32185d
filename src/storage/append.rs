//! # Append Buffer
//!
//! A cursor over the free tail of the mapped record region, writing
//! length-prefixed key/value records. The buffer is created per write over
//! `region[4 + actual_size..]`; the persistent append position is the
//! engine's actual size, so a cursor can never outlive a remap (it borrows
//! the mapping mutably for exactly one write).
//!
//! Writes are not transactional: the caller commits the meta header only
//! after the write (and its encryption) completed.

use eyre::{ensure, Result};

use crate::encoding::varint::{encode_varint, varint_len};

/// Encoded size of one `key -> value` record.
pub fn record_size(key: &str, value: &[u8]) -> usize {
    varint_len(key.len() as u64) + key.len() + varint_len(value.len() as u64) + value.len()
}

pub struct AppendBuffer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> AppendBuffer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn space_left(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Writes a key: varint length prefix, then the UTF-8 bytes.
    pub fn write_key(&mut self, key: &str) -> Result<()> {
        self.write_length_prefixed(key.as_bytes())
    }

    /// Writes a value: varint length prefix, then the bytes. A zero-length
    /// value is the tombstone encoding.
    pub fn write_value(&mut self, value: &[u8]) -> Result<()> {
        self.write_length_prefixed(value)
    }

    /// Writes pre-encoded bytes with no prefix. Used by the full writeback,
    /// whose payload is already a record stream.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        ensure!(
            bytes.len() <= self.space_left(),
            "append buffer overflow: {} bytes into {} left",
            bytes.len(),
            self.space_left()
        );
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    fn write_length_prefixed(&mut self, bytes: &[u8]) -> Result<()> {
        let needed = varint_len(bytes.len() as u64) + bytes.len();
        ensure!(
            needed <= self.space_left(),
            "append buffer overflow: {} bytes into {} left",
            needed,
            self.space_left()
        );
        self.pos += encode_varint(bytes.len() as u64, &mut self.buf[self.pos..]);
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }
}
