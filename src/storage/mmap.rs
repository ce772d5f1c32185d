//! # Memory-Mapped File Pair
//!
//! This module implements the two mappings a store owns: the growable data
//! file holding the append log, and the fixed one-page meta file holding the
//! integrity header.
//!
//! ## Data File
//!
//! The data file is mapped read-write, shared, and its length is always a
//! positive multiple of [`PAGE_SIZE`]. Opening a short or unaligned file
//! rounds the length up to the next page boundary; the OS zero-fills the
//! extension, which the record decoder treats as free space.
//!
//! ```text
//! offset 0..4          legacy record-stream length (little-endian u32)
//! offset 4..4+actual   packed records (ciphertext when encrypted)
//! offset 4+actual..end zero-filled free space
//! ```
//!
//! ## Safety Model
//!
//! A memory-mapped region becomes invalid when the file is remapped during
//! grow or shrink. pagekv uses the borrow checker for compile-time
//! enforcement, the same way the rest of the storage layer does:
//!
//! ```text
//! region(&self) -> &[u8]            // immutable borrow of self
//! region_mut(&mut self) -> &mut [u8]  // mutable borrow of self
//! grow_to(&mut self)                // mutable borrow (exclusive)
//! ```
//!
//! Since `grow_to`/`shrink_to` require `&mut self`, no region slice can be
//! held across a remap. Engine state that logically points into the region
//! (the append position) is kept as a plain offset and re-derived.
//!
//! ## Meta File
//!
//! The meta file is exactly one page, created on first open, and stays
//! mapped for the lifetime of the store: cross-process change detection
//! reads the header straight from the shared mapping on every operation.
//!
//! ## Error Handling
//!
//! All fallible operations return `eyre::Result` with the file path and the
//! operation in context. A failed grow leaves the previous mapping and size
//! in place so the caller can roll back to the pre-operation state.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use crate::config::PAGE_SIZE;

#[derive(Debug)]
pub struct DataFile {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
    size: usize,
}

impl DataFile {
    /// Opens (creating if absent) the data file at `path`, rounds its length
    /// up to a positive page multiple, and maps it read-write shared.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .wrap_err_with(|| format!("failed to open data file '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat data file '{}'", path.display()))?;

        let mut size = metadata.len() as usize;
        if size < PAGE_SIZE || size % PAGE_SIZE != 0 {
            size = (size / PAGE_SIZE + 1) * PAGE_SIZE;
            // set_len zero-fills the extension.
            file.set_len(size as u64).wrap_err_with(|| {
                format!("failed to round '{}' up to {} bytes", path.display(), size)
            })?;
        }

        // SAFETY: MmapMut::map_mut is unsafe because a mapped file can be
        // modified externally. This is sound here because:
        // 1. Concurrent writers coordinate through the advisory lock on the
        //    meta file, and the CRC/sequence protocol detects every external
        //    mutation before the region is interpreted.
        // 2. The file length is a page multiple >= PAGE_SIZE, checked above.
        // 3. The mmap's lifetime is tied to DataFile, and remapping methods
        //    take &mut self so stale slices cannot outlive a remap.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            path,
            file,
            mmap,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn region(&self) -> &[u8] {
        &self.mmap[..self.size]
    }

    pub fn region_mut(&mut self) -> &mut [u8] {
        &mut self.mmap[..self.size]
    }

    /// Length of the file on disk right now. Differs from [`size`] when
    /// another process has grown or truncated the file since mapping.
    ///
    /// [`size`]: DataFile::size
    pub fn file_len(&self) -> Result<u64> {
        let metadata = self
            .file
            .metadata()
            .wrap_err_with(|| format!("failed to stat data file '{}'", self.path.display()))?;
        Ok(metadata.len())
    }

    /// Extends the file to `new_size` bytes and remaps. `new_size` must be a
    /// larger page multiple. On failure the old mapping and size remain in
    /// effect.
    pub fn grow_to(&mut self, new_size: usize) -> Result<()> {
        ensure!(
            new_size % PAGE_SIZE == 0 && new_size > self.size,
            "grow target {} is not a larger page multiple of current size {}",
            new_size,
            self.size
        );

        self.mmap
            .flush_async()
            .wrap_err("failed to flush mapping before grow")?;

        self.file.set_len(new_size as u64).wrap_err_with(|| {
            format!("failed to extend '{}' to {} bytes", self.path.display(), new_size)
        })?;

        // SAFETY: the old mapping becomes stale, not invalid: grow_to takes
        // &mut self so no region slice exists (borrow checker), the file was
        // extended before remapping, and the old map is dropped on assign.
        self.mmap = unsafe {
            MmapMut::map_mut(&self.file)
                .wrap_err_with(|| format!("failed to remap '{}' after grow", self.path.display()))?
        };
        self.size = new_size;

        Ok(())
    }

    /// Truncates the file to `new_size` bytes and remaps. Used by trim and
    /// clear-all; `new_size` must be a positive page multiple.
    pub fn shrink_to(&mut self, new_size: usize) -> Result<()> {
        ensure!(
            new_size % PAGE_SIZE == 0 && new_size > 0 && new_size < self.size,
            "shrink target {} is not a smaller positive page multiple of {}",
            new_size,
            self.size
        );

        self.mmap
            .flush()
            .wrap_err("failed to flush mapping before shrink")?;

        self.file.set_len(new_size as u64).wrap_err_with(|| {
            format!("failed to truncate '{}' to {} bytes", self.path.display(), new_size)
        })?;

        // SAFETY: same reasoning as grow_to; the new mapping covers the
        // truncated length and the old one is dropped on assign without
        // being touched again.
        self.mmap = unsafe {
            MmapMut::map_mut(&self.file).wrap_err_with(|| {
                format!("failed to remap '{}' after shrink", self.path.display())
            })?
        };
        self.size = new_size;

        Ok(())
    }

    /// Flushes the mapping, synchronously or asynchronously.
    pub fn flush(&self, sync: bool) -> Result<()> {
        if sync {
            self.mmap
                .flush()
                .wrap_err_with(|| format!("failed to msync '{}'", self.path.display()))
        } else {
            self.mmap
                .flush_async()
                .wrap_err_with(|| format!("failed to async msync '{}'", self.path.display()))
        }
    }
}

#[derive(Debug)]
pub struct MetaFile {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
}

impl MetaFile {
    /// Opens (creating if absent) the one-page meta file at `path` and maps
    /// it read-write shared.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .wrap_err_with(|| format!("failed to open meta file '{}'", path.display()))?;

        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat meta file '{}'", path.display()))?
            .len();
        if len < PAGE_SIZE as u64 {
            file.set_len(PAGE_SIZE as u64).wrap_err_with(|| {
                format!("failed to size meta file '{}' to one page", path.display())
            })?;
        }

        // SAFETY: same protocol as the data file; the meta page is the very
        // thing the advisory locks are taken on, and every multi-byte field
        // in it is only interpreted after the sequence/CRC comparison.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map meta file '{}'", path.display()))?
        };

        Ok(Self { path, file, mmap })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mmap[..PAGE_SIZE]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mmap[..PAGE_SIZE]
    }

    /// A second handle to the underlying file, sharing the open file
    /// description. Used for the advisory lock.
    pub fn duplicate_handle(&self) -> Result<File> {
        self.file
            .try_clone()
            .wrap_err_with(|| format!("failed to clone handle of '{}'", self.path.display()))
    }

    pub fn flush(&self, sync: bool) -> Result<()> {
        if sync {
            self.mmap
                .flush()
                .wrap_err_with(|| format!("failed to msync '{}'", self.path.display()))
        } else {
            self.mmap
                .flush_async()
                .wrap_err_with(|| format!("failed to async msync '{}'", self.path.display()))
        }
    }
}
