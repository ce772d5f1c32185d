//! # Core Engine Internals
//!
//! The state machine behind a [`Store`](super::Store): load and recovery,
//! cross-process change detection, the append path, growth, and compaction.
//! Everything here runs under the store's per-engine mutex; methods take
//! `&mut StoreInner` and never lock it again.
//!
//! ## Load / Recovery
//!
//! On load the engine reads the meta header, maps the data file, and
//! validates `CRC32(region[4..4+actual_size))` against the header. On
//! mismatch it tries, in order: the legacy 4-byte length (downgrade/upgrade
//! cross-check), the last-confirmed snapshot (rollback to the state of the
//! most recent sequence-bumping commit), and finally the host's recovery
//! hook. Only a `Recover` answer keeps the readable prefix; the default
//! discards and restarts empty.
//!
//! ## Change Detection
//!
//! Every public operation starts with [`StoreInner::check_load_data`]. A
//! sequence mismatch against the mapped header means another process
//! performed a full rewrite (compaction, clear, rekey): the in-memory state
//! is dropped and reloaded. A CRC-only mismatch means appends happened: the
//! new tail is merged incrementally, verified by continuing the rolling CRC,
//! with a full reload as the fallback.
//!
//! ## Append and Compaction
//!
//! Appends write the record plaintext into the mapped tail, encrypt it in
//! place mid-stream when a filter is present, fold it into the rolling CRC,
//! and only then publish `(actual_size, crc)` through the meta header's
//! 8-byte hot path. When the tail runs out of room, the live dictionary is
//! re-encoded as one contiguous record stream: dead keys and tombstones
//! vanish, and if even the compacted form needs room the file doubles until
//! projected future usage fits. The compaction commit mirrors the new
//! `(actual_size, crc)` into the last-confirmed snapshot before bumping the
//! sequence, which is the rollback point crash recovery relies on.

use std::path::PathBuf;
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use tracing::{debug, error, info, warn};

use crate::config::{
    AES_IV_LEN, DATA_HEADER_SIZE, EMPTY_DICT_RESERVE, GROWTH_MIN_ITEMS, PAGE_SIZE,
};
use crate::crypt::Crypt;
use crate::encoding::varint::{decode_varint, encode_varint, MAX_VARINT_LEN};
use crate::storage::{
    record_size, AppendBuffer, DataFile, MetaFile, MetaInfo, ProcessLock, VERSION_ACTUAL_SIZE,
    VERSION_RANDOM_IV, VERSION_SEQUENCE,
};

use super::hooks::{self, RecoverStrategy};

pub(crate) struct StoreInner {
    pub(crate) id: String,
    pub(crate) path: PathBuf,
    pub(crate) inter_process: bool,
    pub(crate) data: Option<DataFile>,
    pub(crate) meta_file: Option<MetaFile>,
    pub(crate) meta: MetaInfo,
    pub(crate) crypt: Option<Crypt>,
    pub(crate) dict: HashMap<String, Vec<u8>>,
    pub(crate) actual_size: usize,
    pub(crate) hasher: crc32fast::Hasher,
    pub(crate) need_load_from_file: bool,
    pub(crate) has_full_writeback: bool,
    pub(crate) process_lock: Arc<ProcessLock>,
}

impl StoreInner {
    pub(crate) fn new(
        id: String,
        path: PathBuf,
        inter_process: bool,
        meta_file: Option<MetaFile>,
        crypt: Option<Crypt>,
        process_lock: Arc<ProcessLock>,
    ) -> Self {
        Self {
            id,
            path,
            inter_process,
            data: None,
            meta_file,
            meta: MetaInfo::default(),
            crypt,
            dict: HashMap::new(),
            actual_size: 0,
            hasher: crc32fast::Hasher::new(),
            need_load_from_file: true,
            has_full_writeback: false,
            process_lock,
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.data.is_some()
    }

    pub(crate) fn data_size(&self) -> usize {
        self.data.as_ref().map(DataFile::size).unwrap_or(0)
    }

    fn space_left(&self) -> usize {
        self.data_size()
            .saturating_sub(DATA_HEADER_SIZE + self.actual_size)
    }

    /// The rolling CRC over the record region as written so far.
    fn current_crc(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    // ------------------------------------------------------------------
    // load & recovery
    // ------------------------------------------------------------------

    pub(crate) fn load_from_file(&mut self) {
        if let Some(meta_file) = self.meta_file.as_ref() {
            self.meta = MetaInfo::read(meta_file.bytes());
        }
        if let Some(crypt) = self.crypt.as_mut() {
            if self.meta.version >= VERSION_RANDOM_IV {
                crypt.reset(&self.meta.iv);
            } else {
                crypt.reset_default();
            }
        }

        match DataFile::open(&self.path) {
            Err(e) => {
                error!("failed to open data file of [{}]: {:#}", self.id, e);
                self.data = None;
            }
            Ok(data) => {
                self.data = Some(data);
                self.need_load_from_file = false;

                let (mut loaded, mut need_full_writeback) = self.check_data_valid();
                info!(
                    "loading [{}]: actual size {}, file size {}, inter-process {}, meta version {}",
                    self.id,
                    self.actual_size,
                    self.data_size(),
                    self.inter_process,
                    self.meta.version
                );

                if loaded && self.actual_size > 0 {
                    let mut bytes = match self.data.as_ref() {
                        Some(data) => data.region()
                            [DATA_HEADER_SIZE..DATA_HEADER_SIZE + self.actual_size]
                            .to_vec(),
                        None => Vec::new(),
                    };
                    if let Some(crypt) = self.crypt.as_mut() {
                        crypt.decrypt(&mut bytes);
                    }
                    self.dict.clear();
                    if let Err(e) = merge_record_stream(&mut self.dict, &bytes) {
                        warn!("failed to decode record stream of [{}]: {:#}", self.id, e);
                        match hooks::crc_check_fail_strategy(&self.id) {
                            RecoverStrategy::Recover => need_full_writeback = true,
                            RecoverStrategy::Discard => {
                                self.dict.clear();
                                loaded = false;
                            }
                        }
                    }
                }

                if loaded && self.actual_size > 0 {
                    if need_full_writeback {
                        self.full_writeback();
                    }
                } else {
                    // Not valid or empty: discard everything.
                    let _guard = ProcessLock::exclusive(&self.process_lock);
                    self.dict.clear();
                    self.hasher = crc32fast::Hasher::new();
                    if self.actual_size > 0 {
                        self.write_actual_size(0, 0, None, true);
                        self.sync_files(true);
                    } else {
                        self.write_actual_size(0, 0, None, false);
                    }
                }
                info!("loaded [{}] with {} values", self.id, self.dict.len());
            }
        }

        if !self.is_valid() {
            warn!("[{}] file not valid", self.id);
        }
        self.need_load_from_file = false;
    }

    /// Validates the on-disk state and decides how much of it to trust.
    /// Returns `(loaded, need_full_writeback)`.
    fn check_data_valid(&mut self) -> (bool, bool) {
        let mut loaded = false;
        let mut need_full_writeback = false;

        self.actual_size = self.read_actual_size();
        let file_size = self.data_size();

        if self.actual_size < file_size && self.actual_size + DATA_HEADER_SIZE <= file_size {
            if self.check_file_crc_valid(self.actual_size, self.meta.crc_digest) {
                loaded = true;
            } else {
                self.check_last_confirmed(&mut loaded);

                if !loaded {
                    let strategy = hooks::crc_check_fail_strategy(&self.id);
                    if strategy == RecoverStrategy::Recover {
                        loaded = true;
                        need_full_writeback = true;
                    }
                    info!("recover strategy for [{}] is {:?}", self.id, strategy);
                }
            }
        } else {
            error!(
                "length check of [{}] failed: actual size {}, file size {}",
                self.id, self.actual_size, file_size
            );
            self.check_last_confirmed(&mut loaded);

            if !loaded {
                let strategy = hooks::file_length_error_strategy(&self.id);
                if strategy == RecoverStrategy::Recover {
                    // Clamp so the decoder never reads past the mapping.
                    self.actual_size = file_size.saturating_sub(DATA_HEADER_SIZE);
                    loaded = true;
                    need_full_writeback = true;
                }
                info!("recover strategy for [{}] is {:?}", self.id, strategy);
            }
        }

        (loaded, need_full_writeback)
    }

    /// Tries the downgrade/upgrade cross-check and the last-confirmed
    /// snapshot as recovery points.
    fn check_last_confirmed(&mut self, loaded: &mut bool) {
        if self.meta.version < VERSION_ACTUAL_SIZE {
            return;
        }
        let file_size = self.data_size();

        // A writer older than the meta actual-size format may have trailed
        // behind: trust the legacy header if its CRC checks out.
        let legacy = self.read_legacy_actual_size();
        if legacy != self.actual_size
            && legacy < file_size
            && legacy + DATA_HEADER_SIZE <= file_size
        {
            warn!(
                "legacy actual size {} differs from meta actual size {} for [{}]",
                legacy, self.actual_size, self.id
            );
            if self.check_file_crc_valid(legacy, self.meta.crc_digest) {
                info!("[{}] looks like it was downgraded and upgraded again", self.id);
                *loaded = true;
                self.write_actual_size(legacy, self.meta.crc_digest, None, false);
                return;
            }
        }

        let last_actual = self.meta.last_actual_size as usize;
        if last_actual < file_size && last_actual + DATA_HEADER_SIZE <= file_size {
            let last_crc = self.meta.last_crc_digest;
            if self.check_file_crc_valid(last_actual, last_crc) {
                *loaded = true;
                self.write_actual_size(last_actual, last_crc, None, false);
            } else {
                error!(
                    "last-confirmed check of [{}] failed: size {}, crc {}",
                    self.id, last_actual, last_crc
                );
            }
        } else {
            error!(
                "last-confirmed check of [{}] failed: size {}, file size {}",
                self.id, last_actual, file_size
            );
        }
    }

    fn read_legacy_actual_size(&self) -> usize {
        match self.data.as_ref() {
            Some(data) => {
                let region = data.region();
                u32::from_le_bytes([region[0], region[1], region[2], region[3]]) as usize
            }
            None => 0,
        }
    }

    /// The authoritative record-stream length: the meta header's when the
    /// format carries one, the legacy data-file header's otherwise.
    fn read_actual_size(&self) -> usize {
        let legacy = self.read_legacy_actual_size();
        if self.meta.version >= VERSION_ACTUAL_SIZE {
            if self.meta.actual_size as usize != legacy {
                warn!(
                    "[{}] legacy actual size {} differs from meta actual size {}",
                    self.id, legacy, self.meta.actual_size
                );
            }
            self.meta.actual_size as usize
        } else {
            legacy
        }
    }

    /// Recomputes the CRC over `region[4..4+actual)` from scratch, keeping
    /// the hasher as the new rolling state.
    fn check_file_crc_valid(&mut self, actual: usize, expected: u32) -> bool {
        let Some(data) = self.data.as_ref() else {
            return false;
        };
        if DATA_HEADER_SIZE + actual > data.size() {
            return false;
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data.region()[DATA_HEADER_SIZE..DATA_HEADER_SIZE + actual]);
        let crc = hasher.clone().finalize();
        self.hasher = hasher;

        if crc == expected {
            true
        } else {
            error!(
                "crc check of [{}] failed: computed {}, expected {}",
                self.id, crc, expected
            );
            false
        }
    }

    // ------------------------------------------------------------------
    // cross-process change detection
    // ------------------------------------------------------------------

    pub(crate) fn check_load_data(&mut self) {
        if self.need_load_from_file {
            let _guard = ProcessLock::shared(&self.process_lock);
            self.need_load_from_file = false;
            self.load_from_file();
            return;
        }
        if !self.inter_process {
            return;
        }
        let fresh = {
            let Some(meta_file) = self.meta_file.as_ref() else {
                return;
            };
            MetaInfo::read(meta_file.bytes())
        };

        if fresh.sequence != self.meta.sequence {
            info!(
                "[{}] sequence changed externally from {} to {}",
                self.id, self.meta.sequence, fresh.sequence
            );
            let _guard = ProcessLock::shared(&self.process_lock);
            self.clear_memory_state();
            self.load_from_file();
            self.notify_content_changed();
        } else if fresh.crc_digest != self.meta.crc_digest {
            debug!(
                "[{}] crc changed externally from {} to {}",
                self.id, self.meta.crc_digest, fresh.crc_digest
            );
            let _guard = ProcessLock::shared(&self.process_lock);
            let mapped = self.data_size() as u64;
            let on_disk = self
                .data
                .as_ref()
                .and_then(|d| d.file_len().ok())
                .unwrap_or(0);
            if mapped != on_disk {
                info!(
                    "[{}] file size changed externally from {} to {}",
                    self.id, mapped, on_disk
                );
                self.clear_memory_state();
                self.load_from_file();
            } else {
                self.partial_load_from_file();
            }
            self.notify_content_changed();
        }
    }

    /// Merges the externally appended tail `[old_actual..new_actual)` into
    /// the dictionary, verifying it by continuing the rolling CRC. Any
    /// inconsistency falls back to a full reload.
    fn partial_load_from_file(&mut self) {
        if let Some(meta_file) = self.meta_file.as_ref() {
            self.meta = MetaInfo::read(meta_file.bytes());
        }

        let old_actual = self.actual_size;
        let new_actual = self.read_actual_size();
        debug!(
            "partial loading [{}]: file size {}, old actual {}, new actual {}",
            self.id,
            self.data_size(),
            old_actual,
            new_actual
        );

        if new_actual > 0 {
            let file_size = self.data_size();
            if new_actual < file_size
                && new_actual + DATA_HEADER_SIZE <= file_size
                && new_actual > old_actual
            {
                let mut chunk = match self.data.as_ref() {
                    Some(data) => data.region()
                        [DATA_HEADER_SIZE + old_actual..DATA_HEADER_SIZE + new_actual]
                        .to_vec(),
                    None => Vec::new(),
                };
                if !chunk.is_empty() {
                    self.hasher.update(&chunk);
                    let crc = self.current_crc();
                    if crc == self.meta.crc_digest {
                        if let Some(crypt) = self.crypt.as_mut() {
                            crypt.decrypt(&mut chunk);
                        }
                        if merge_record_stream(&mut self.dict, &chunk).is_ok() {
                            self.actual_size = new_actual;
                            self.has_full_writeback = false;
                            debug!(
                                "partial loaded [{}] with {} values",
                                self.id,
                                self.dict.len()
                            );
                            return;
                        }
                    } else {
                        error!(
                            "rolling crc {} != meta crc {} for [{}]",
                            crc, self.meta.crc_digest, self.id
                        );
                    }
                }
            }
        }

        // Something is wrong, do a full load.
        self.clear_memory_state();
        self.load_from_file();
    }

    pub(crate) fn notify_content_changed(&self) {
        hooks::notify_content_changed(&self.id);
    }

    /// Drops the in-memory state and the mapping; the next operation
    /// reloads from file.
    pub(crate) fn clear_memory_state(&mut self) {
        info!("clearing in-memory state of [{}]", self.id);
        if self.need_load_from_file {
            return;
        }
        self.need_load_from_file = true;

        self.dict.clear();
        self.has_full_writeback = false;

        if let Some(crypt) = self.crypt.as_mut() {
            if self.meta.version >= VERSION_RANDOM_IV {
                crypt.reset(&self.meta.iv);
            } else {
                crypt.reset_default();
            }
        }

        self.data = None;
        self.actual_size = 0;
        self.meta.crc_digest = 0;
        self.hasher = crc32fast::Hasher::new();
    }

    // ------------------------------------------------------------------
    // meta commits
    // ------------------------------------------------------------------

    /// Publishes `(actual_size, crc)` through the data file's legacy header
    /// and the meta header, bumping the format version to the minimum the
    /// written fields require. `increase_sequence` mirrors the pair into
    /// the last-confirmed snapshot before bumping; that store is the commit
    /// point recovery rolls back to.
    fn write_actual_size(
        &mut self,
        actual: usize,
        crc: u32,
        iv: Option<[u8; AES_IV_LEN]>,
        increase_sequence: bool,
    ) -> bool {
        if let Some(data) = self.data.as_mut() {
            data.region_mut()[..DATA_HEADER_SIZE]
                .copy_from_slice(&(actual as u32).to_le_bytes());
        }
        self.actual_size = actual;

        if self.meta_file.is_none() {
            return false;
        }

        let mut needs_full_write = false;
        self.meta.actual_size = actual as u32;
        self.meta.crc_digest = crc;
        if self.meta.version < VERSION_SEQUENCE {
            self.meta.version = VERSION_SEQUENCE;
            needs_full_write = true;
        }
        if let Some(iv) = iv {
            self.meta.iv = iv;
            if self.meta.version < VERSION_RANDOM_IV {
                self.meta.version = VERSION_RANDOM_IV;
            }
            needs_full_write = true;
        }
        if increase_sequence {
            self.meta.sequence = self.meta.sequence.wrapping_add(1);
            self.meta.last_actual_size = actual as u32;
            self.meta.last_crc_digest = crc;
            if self.meta.version < VERSION_ACTUAL_SIZE {
                self.meta.version = VERSION_ACTUAL_SIZE;
            }
            needs_full_write = true;
        }

        let meta = self.meta;
        if let Some(meta_file) = self.meta_file.as_mut() {
            if needs_full_write {
                meta.write(meta_file.bytes_mut());
            } else {
                meta.write_crc_and_actual_size_only(meta_file.bytes_mut());
            }
        }
        true
    }

    /// Recomputes the CRC from scratch over the rewritten region and
    /// commits it with a sequence bump.
    fn recalculate_crc(&mut self, iv: Option<[u8; AES_IV_LEN]>) {
        let crc = {
            let Some(data) = self.data.as_ref() else {
                return;
            };
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&data.region()[DATA_HEADER_SIZE..DATA_HEADER_SIZE + self.actual_size]);
            let crc = hasher.clone().finalize();
            self.hasher = hasher;
            crc
        };
        self.write_actual_size(self.actual_size, crc, iv, true);
    }

    // ------------------------------------------------------------------
    // append path
    // ------------------------------------------------------------------

    pub(crate) fn set_data(&mut self, key: &str, value: Vec<u8>) -> bool {
        let appended = self.append_record(key, &value);
        if appended {
            self.dict.insert(key.to_string(), value);
            self.has_full_writeback = false;
        }
        appended
    }

    pub(crate) fn remove_data(&mut self, key: &str) -> bool {
        if self.dict.remove(key).is_some() {
            self.has_full_writeback = false;
            // A zero-length value is the tombstone encoding.
            self.append_record(key, &[])
        } else {
            false
        }
    }

    fn append_record(&mut self, key: &str, value: &[u8]) -> bool {
        let size = record_size(key, value);

        let _guard = ProcessLock::exclusive(&self.process_lock);

        if !self.ensure_memory_size(size) || !self.is_valid() {
            return false;
        }

        let offset = DATA_HEADER_SIZE + self.actual_size;
        {
            let Some(data) = self.data.as_mut() else {
                return false;
            };
            let region = data.region_mut();
            let mut out = AppendBuffer::new(&mut region[offset..]);
            if let Err(e) = out.write_key(key).and_then(|_| out.write_value(value)) {
                error!("failed to append to [{}]: {:#}", self.id, e);
                return false;
            }
            let written = &mut region[offset..offset + size];
            if let Some(crypt) = self.crypt.as_mut() {
                crypt.encrypt(written);
            }
            self.hasher.update(&region[offset..offset + size]);
        }

        let crc = self.current_crc();
        self.write_actual_size(self.actual_size + size, crc, None, false);
        true
    }

    /// Makes room for `incoming` more bytes in the mapped tail, by
    /// compaction, by growth, or both. Any trigger ends in a full rewrite
    /// of the (possibly relocated) record region.
    fn ensure_memory_size(&mut self, incoming: usize) -> bool {
        if !self.is_valid() {
            warn!("[{}] file not valid", self.id);
            return false;
        }

        let mut incoming = incoming;
        if self.dict.is_empty() {
            incoming += EMPTY_DICT_RESERVE;
        }
        if incoming < self.space_left() && !self.dict.is_empty() {
            return true;
        }

        // Try a full rewrite to reclaim dead keys and tombstones.
        let encoded = self.encode_dict();
        let len_needed = encoded.len() + DATA_HEADER_SIZE + incoming;
        let count = self.dict.len();
        let avg_item_size = len_needed / count.max(1);
        let future_usage = avg_item_size * GROWTH_MIN_ITEMS.max((count + 1) / 2);
        let file_size = self.data_size();

        if len_needed >= file_size || len_needed + future_usage >= file_size {
            let mut target = file_size;
            while len_needed + future_usage >= target {
                target *= 2;
            }
            info!(
                "extending [{}] from {} to {}, incoming {}, future usage {}",
                self.id, file_size, target, incoming, future_usage
            );

            let Some(data) = self.data.as_mut() else {
                return false;
            };
            if let Err(e) = data.grow_to(target) {
                // The old mapping and size stay in effect on failure.
                error!("failed to extend [{}] to {}: {:#}", self.id, target, e);
                return false;
            }
        }

        self.do_full_write_back(encoded)
    }

    // ------------------------------------------------------------------
    // compaction
    // ------------------------------------------------------------------

    /// Re-encodes the dictionary as one contiguous record stream and
    /// rewrites the record region with it. No-op when the last writeback is
    /// still current.
    pub(crate) fn full_writeback(&mut self) -> bool {
        if self.has_full_writeback {
            return true;
        }
        if self.need_load_from_file {
            return true;
        }
        if !self.is_valid() {
            warn!("[{}] file not valid", self.id);
            return false;
        }

        if self.dict.is_empty() {
            self.clear_all();
            return true;
        }

        let encoded = self.encode_dict();
        let _guard = ProcessLock::exclusive(&self.process_lock);
        if encoded.is_empty() {
            return false;
        }
        if encoded.len() + DATA_HEADER_SIZE <= self.data_size() {
            self.do_full_write_back(encoded)
        } else {
            // ensure_memory_size extends the file and rewrites; no need to
            // write back again.
            let shortfall = encoded.len() + DATA_HEADER_SIZE - self.data_size();
            self.ensure_memory_size(shortfall)
        }
    }

    fn do_full_write_back(&mut self, mut encoded: Vec<u8>) -> bool {
        let mut new_iv: Option<[u8; AES_IV_LEN]> = None;
        if let Some(crypt) = self.crypt.as_mut() {
            let mut iv = [0u8; AES_IV_LEN];
            Crypt::fill_random_iv(&mut iv);
            crypt.reset(&iv);
            crypt.encrypt(&mut encoded);
            new_iv = Some(iv);
        }

        {
            let Some(data) = self.data.as_mut() else {
                return false;
            };
            let region = data.region_mut();
            let mut out = AppendBuffer::new(&mut region[DATA_HEADER_SIZE..]);
            if let Err(e) = out.write_raw(&encoded) {
                error!("failed to write back [{}]: {:#}", self.id, e);
                return false;
            }
        }

        self.actual_size = encoded.len();
        self.recalculate_crc(new_iv);
        self.has_full_writeback = true;
        // Make sure the last-confirmed snapshot reaches disk.
        self.sync_files(true);
        true
    }

    fn encode_dict(&self) -> Vec<u8> {
        let total: usize = self
            .dict
            .iter()
            .map(|(key, value)| record_size(key, value))
            .sum();
        let mut out = Vec::with_capacity(total);
        let mut prefix = [0u8; MAX_VARINT_LEN];
        for (key, value) in &self.dict {
            let n = encode_varint(key.len() as u64, &mut prefix);
            out.extend_from_slice(&prefix[..n]);
            out.extend_from_slice(key.as_bytes());
            let n = encode_varint(value.len() as u64, &mut prefix);
            out.extend_from_slice(&prefix[..n]);
            out.extend_from_slice(value);
        }
        out
    }

    // ------------------------------------------------------------------
    // lifecycle operations
    // ------------------------------------------------------------------

    pub(crate) fn clear_all(&mut self) {
        info!("clearing all values of [{}]", self.id);
        let _guard = ProcessLock::exclusive(&self.process_lock);

        if self.need_load_from_file {
            if let Err(e) = std::fs::remove_file(&self.path) {
                error!("failed to remove data file of [{}]: {}", self.id, e);
            }
            self.load_from_file();
            return;
        }

        if let Some(data) = self.data.as_mut() {
            data.region_mut()[..PAGE_SIZE].fill(0);
            if let Err(e) = data.flush(true) {
                error!("failed to flush [{}]: {:#}", self.id, e);
            }
            if data.size() != PAGE_SIZE {
                info!(
                    "truncating [{}] from {} to {}",
                    self.id,
                    data.size(),
                    PAGE_SIZE
                );
                if let Err(e) = data.shrink_to(PAGE_SIZE) {
                    error!("failed to truncate [{}]: {:#}", self.id, e);
                }
            }
        }

        let mut iv = [0u8; AES_IV_LEN];
        Crypt::fill_random_iv(&mut iv);
        if let Some(crypt) = self.crypt.as_mut() {
            crypt.reset(&iv);
        }
        self.hasher = crc32fast::Hasher::new();
        self.write_actual_size(0, 0, Some(iv), true);
        if let Some(meta_file) = self.meta_file.as_ref() {
            if let Err(e) = meta_file.flush(true) {
                error!("failed to flush meta of [{}]: {:#}", self.id, e);
            }
        }

        self.clear_memory_state();
        self.load_from_file();
    }

    pub(crate) fn trim(&mut self) {
        info!("preparing to trim [{}]", self.id);
        self.check_load_data();

        if self.actual_size == 0 {
            self.clear_all();
            return;
        }
        if self.data_size() <= PAGE_SIZE {
            return;
        }
        let _guard = ProcessLock::exclusive(&self.process_lock);

        self.full_writeback();

        let old_size = self.data_size();
        let mut new_size = old_size;
        while new_size > (self.actual_size + DATA_HEADER_SIZE) * 2 && new_size / 2 >= PAGE_SIZE {
            new_size /= 2;
        }
        if new_size == old_size {
            info!(
                "no need to trim [{}]: size {}, actual size {}",
                self.id, old_size, self.actual_size
            );
            return;
        }

        info!(
            "trimming [{}] from {} to {}, actual size {}",
            self.id, old_size, new_size, self.actual_size
        );
        let Some(data) = self.data.as_mut() else {
            return;
        };
        if let Err(e) = data.shrink_to(new_size) {
            error!("failed to trim [{}]: {:#}", self.id, e);
            return;
        }
        info!("finished trimming [{}] to {}", self.id, new_size);
    }

    pub(crate) fn sync(&mut self, durable: bool) {
        if self.need_load_from_file || !self.is_valid() {
            return;
        }
        let _guard = ProcessLock::exclusive(&self.process_lock);
        self.sync_files(durable);
    }

    fn sync_files(&self, durable: bool) {
        if let Some(data) = self.data.as_ref() {
            if let Err(e) = data.flush(durable) {
                error!("failed to sync data of [{}]: {:#}", self.id, e);
            }
        }
        if let Some(meta_file) = self.meta_file.as_ref() {
            if let Err(e) = meta_file.flush(durable) {
                error!("failed to sync meta of [{}]: {:#}", self.id, e);
            }
        }
    }

    // ------------------------------------------------------------------
    // encryption configuration
    // ------------------------------------------------------------------

    pub(crate) fn crypt_key(&self) -> Option<Vec<u8>> {
        self.crypt.as_ref().map(|crypt| {
            let key = crypt.key();
            let len = key.iter().position(|&b| b == 0).unwrap_or(key.len());
            key[..len].to_vec()
        })
    }

    /// Changes the encryption configuration (off<->on, or key rotation) and
    /// rewrites the whole store under it.
    ///
    /// Other processes observe the change through the sequence bump on
    /// their next operation; a read already in flight under the old filter
    /// may decrypt stale bytes until then.
    pub(crate) fn re_key(&mut self, new_key: Option<&[u8]>) -> bool {
        self.check_load_data();

        match (&self.crypt, new_key) {
            (Some(crypt), Some(key)) if !key.is_empty() => {
                if crypt.key_matches(key) {
                    true
                } else {
                    info!("rotating encryption key of [{}]", self.id);
                    self.crypt = Some(Crypt::new(key));
                    self.has_full_writeback = false;
                    self.full_writeback()
                }
            }
            (Some(_), _) => {
                info!("removing encryption of [{}]", self.id);
                self.crypt = None;
                self.has_full_writeback = false;
                self.full_writeback()
            }
            (None, Some(key)) if !key.is_empty() => {
                info!("enabling encryption of [{}]", self.id);
                self.crypt = Some(Crypt::new(key));
                self.has_full_writeback = false;
                self.full_writeback()
            }
            (None, _) => true,
        }
    }

    /// Reconciles the filter with the key a re-entrant open supplied; a
    /// mismatch swaps the filter and forces a reload under it.
    pub(crate) fn check_re_set_crypt_key(&mut self, key: Option<&[u8]>) {
        let changed = match (&self.crypt, key) {
            (Some(crypt), Some(candidate)) if !candidate.is_empty() => {
                !crypt.key_matches(candidate)
            }
            (Some(_), _) => true,
            (None, Some(candidate)) => !candidate.is_empty(),
            (None, None) => false,
        };
        if changed {
            info!("resetting crypt key of [{}]", self.id);
            self.crypt = key.filter(|k| !k.is_empty()).map(Crypt::new);
            self.clear_memory_state();
        }
    }
}

/// Decodes a record stream, folding each record into `dict` with
/// last-value-wins semantics; a zero-length value deletes its key.
pub(crate) fn merge_record_stream(
    dict: &mut HashMap<String, Vec<u8>>,
    bytes: &[u8],
) -> Result<()> {
    let mut pos = 0;
    while pos < bytes.len() {
        let (key_len, n) = decode_varint(&bytes[pos..])?;
        let key_len = key_len as usize;
        pos += n;
        if key_len == 0 {
            bail!("zero-length key at offset {}", pos - n);
        }
        ensure!(
            pos + key_len <= bytes.len(),
            "key at offset {} extends past the stream",
            pos - n
        );
        let key = std::str::from_utf8(&bytes[pos..pos + key_len])
            .map_err(|e| eyre::eyre!("key at offset {} is not UTF-8: {}", pos - n, e))?;
        pos += key_len;

        let (value_len, n) = decode_varint(&bytes[pos..])?;
        let value_len = value_len as usize;
        pos += n;
        ensure!(
            pos + value_len <= bytes.len(),
            "value of '{}' extends past the stream",
            key
        );
        if value_len == 0 {
            dict.remove(key);
        } else {
            dict.insert(key.to_string(), bytes[pos..pos + value_len].to_vec());
        }
        pos += value_len;
    }
    Ok(())
}
