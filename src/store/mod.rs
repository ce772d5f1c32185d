//! # Store Module
//!
//! The public surface of pagekv: the [`Store`] handle, its builder, the
//! process registry, and the host hooks.
//!
//! ## Opening a Store
//!
//! ```ignore
//! pagekv::initialize("/var/lib/myapp/kv");
//!
//! let store = Store::builder("user-settings")
//!     .multi_process(true)
//!     .open()?;
//!
//! store.set_i32("launch-count", 42);
//! assert_eq!(store.get_i32("launch-count", 0), 42);
//! ```
//!
//! Opening the same identifier again returns the same engine (one engine
//! per canonical identifier per process); a different crypt key on re-entry
//! swaps the filter and reloads.
//!
//! ## Operation Contracts
//!
//! Mutators return `bool`: `false` for caller errors (empty key, empty
//! value) and for I/O failures, which are logged; no state is mutated on
//! failure. Readers take a caller-supplied default (scalars) or return
//! `Option` (strings, bytes, lists). Every public operation first checks
//! for changes made by other processes.
//!
//! ## Thread Safety
//!
//! `Store` is `Send + Sync`; all state sits behind one per-store mutex.
//! Lock order is registry, then store mutex, then the inter-process file
//! lock, and never the reverse.

mod engine;
mod hooks;
mod paths;
mod registry;

use std::fs;
use std::path::Path;

use eyre::{Result, WrapErr};
use parking_lot::Mutex;
use tracing::error;

use crate::config::{DATA_HEADER_SIZE, DEFAULT_STORE_ID, META_HEADER_SIZE, SPECIAL_CHARACTER_DIR};
use crate::crypt::Crypt;
use crate::encoding::values;
use crate::storage::{MetaFile, MetaInfo, ProcessLock};

use engine::StoreInner;

pub use hooks::{
    set_content_change_handler, set_content_change_notify, set_crc_check_fail_handler,
    set_file_length_error_handler, RecoverStrategy,
};
pub use registry::{initialize, on_exit};

/// Process-sharing mode of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// One process accesses the files; the inter-process lock is a no-op.
    #[default]
    SingleProcess,
    /// Several processes may share the files; operations take advisory
    /// locks and check for external changes.
    MultiProcess,
}

/// How hard `sync` pushes dirty pages to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Block until the pages reached the device.
    Sync,
    /// Schedule the writeback and return.
    Async,
}

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct StoreBuilder {
    id: String,
    directory: Option<std::path::PathBuf>,
    mode: Mode,
    crypt_key: Option<Vec<u8>>,
}

impl StoreBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            directory: None,
            mode: Mode::SingleProcess,
            crypt_key: None,
        }
    }

    /// Stores the files under `directory` instead of the process root. The
    /// store's canonical identifier is namespaced by the directory.
    pub fn directory(mut self, directory: impl Into<std::path::PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn multi_process(mut self, multi_process: bool) -> Self {
        self.mode = if multi_process {
            Mode::MultiProcess
        } else {
            Mode::SingleProcess
        };
        self
    }

    /// Encrypts the record region under an AES-128-CFB filter keyed by
    /// `key` (zero-padded or truncated to 16 bytes).
    pub fn crypt_key(mut self, key: &[u8]) -> Self {
        self.crypt_key = Some(key.to_vec());
        self
    }

    /// Opens the store through the process registry, returning the existing
    /// engine when the identifier is already live.
    pub fn open(self) -> Result<std::sync::Arc<Store>> {
        registry::open_store(self)
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn directory_override(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn crypt_key_bytes(&self) -> Option<&[u8]> {
        self.crypt_key.as_deref()
    }
}

/// An embedded, persistent key-value store backed by a memory-mapped
/// append log.
pub struct Store {
    id: String,
    inner: Mutex<StoreInner>,
}

impl Store {
    pub fn builder(id: impl Into<String>) -> StoreBuilder {
        StoreBuilder::new(id)
    }

    /// The default store of the process.
    pub fn default_store() -> Result<std::sync::Arc<Store>> {
        Self::builder(DEFAULT_STORE_ID).open()
    }

    /// Opens a store outside the registry. Construction acquires the shared
    /// inter-process lock, maps both files, runs recovery, and populates
    /// the dictionary; a store whose data file cannot be opened or mapped
    /// is returned with `is_valid() == false` and fails all mutations.
    pub(crate) fn open_standalone(
        key: String,
        directory: &Path,
        id: &str,
        mode: Mode,
        crypt_key: Option<Vec<u8>>,
    ) -> Result<Store> {
        if paths::has_special_characters(id) {
            fs::create_dir_all(directory.join(SPECIAL_CHARACTER_DIR)).wrap_err_with(|| {
                format!(
                    "failed to create '{}' under '{}'",
                    SPECIAL_CHARACTER_DIR,
                    directory.display()
                )
            })?;
        }
        let data_path = paths::data_file_path(directory, id);
        let meta_path = paths::meta_file_path(&data_path);

        let meta_file = match MetaFile::open(&meta_path) {
            Ok(meta_file) => Some(meta_file),
            Err(e) => {
                error!("failed to open meta file of [{}]: {:#}", key, e);
                None
            }
        };
        let lock_file = meta_file.as_ref().and_then(|m| m.duplicate_handle().ok());
        let inter_process = matches!(mode, Mode::MultiProcess);
        let process_lock = ProcessLock::new(lock_file, inter_process);
        let crypt = crypt_key.as_deref().filter(|k| !k.is_empty()).map(Crypt::new);

        let mut inner = StoreInner::new(
            key.clone(),
            data_path,
            inter_process,
            meta_file,
            crypt,
            process_lock,
        );
        {
            let _guard = ProcessLock::shared(&inner.process_lock);
            inner.load_from_file();
        }

        Ok(Store {
            id: key,
            inner: Mutex::new(inner),
        })
    }

    /// The canonical identifier this store is registered under.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the data file is open and mapped. A store that failed
    /// construction fatally stays invalid and fails all mutations.
    pub fn is_valid(&self) -> bool {
        self.inner.lock().is_valid()
    }

    // ------------------------------------------------------------------
    // typed setters
    // ------------------------------------------------------------------

    pub fn set_bool(&self, key: &str, value: bool) -> bool {
        self.set_payload(key, values::encode_bool(value))
    }

    pub fn set_i32(&self, key: &str, value: i32) -> bool {
        self.set_payload(key, values::encode_i32(value))
    }

    pub fn set_i64(&self, key: &str, value: i64) -> bool {
        self.set_payload(key, values::encode_i64(value))
    }

    pub fn set_f32(&self, key: &str, value: f32) -> bool {
        self.set_payload(key, values::encode_f32(value))
    }

    pub fn set_f64(&self, key: &str, value: f64) -> bool {
        self.set_payload(key, values::encode_f64(value))
    }

    pub fn set_string(&self, key: &str, value: &str) -> bool {
        self.set_payload(key, values::encode_string(value))
    }

    pub fn set_bytes(&self, key: &str, value: &[u8]) -> bool {
        self.set_payload(key, values::encode_bytes(value))
    }

    pub fn set_string_list(&self, key: &str, value: &[String]) -> bool {
        self.set_payload(key, values::encode_string_list(value))
    }

    fn set_payload(&self, key: &str, payload: Vec<u8>) -> bool {
        if key.is_empty() || payload.is_empty() {
            return false;
        }
        let mut inner = self.inner.lock();
        let _guard = ProcessLock::exclusive(&inner.process_lock);
        inner.check_load_data();
        inner.set_data(key, payload)
    }

    // ------------------------------------------------------------------
    // typed getters
    // ------------------------------------------------------------------

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.payload_for_key(key) {
            Some(payload) => values::decode_bool(&payload).unwrap_or(default),
            None => default,
        }
    }

    pub fn get_i32(&self, key: &str, default: i32) -> i32 {
        match self.payload_for_key(key) {
            Some(payload) => values::decode_i32(&payload).unwrap_or(default),
            None => default,
        }
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.payload_for_key(key) {
            Some(payload) => values::decode_i64(&payload).unwrap_or(default),
            None => default,
        }
    }

    pub fn get_f32(&self, key: &str, default: f32) -> f32 {
        match self.payload_for_key(key) {
            Some(payload) => values::decode_f32(&payload).unwrap_or(default),
            None => default,
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.payload_for_key(key) {
            Some(payload) => values::decode_f64(&payload).unwrap_or(default),
            None => default,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.payload_for_key(key)
            .and_then(|payload| values::decode_string(&payload).ok())
    }

    pub fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.payload_for_key(key)
            .and_then(|payload| values::decode_bytes(&payload).ok())
    }

    pub fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        self.payload_for_key(key)
            .and_then(|payload| values::decode_string_list(&payload).ok())
    }

    fn payload_for_key(&self, key: &str) -> Option<Vec<u8>> {
        if key.is_empty() {
            return None;
        }
        let mut inner = self.inner.lock();
        inner.check_load_data();
        inner.dict.get(key).cloned()
    }

    // ------------------------------------------------------------------
    // enumeration
    // ------------------------------------------------------------------

    pub fn contains_key(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.check_load_data();
        inner.dict.contains_key(key)
    }

    pub fn count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.check_load_data();
        inner.dict.len()
    }

    pub fn all_keys(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        inner.check_load_data();
        inner.dict.keys().cloned().collect()
    }

    /// Size of the data file, free space included.
    pub fn total_size(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.check_load_data();
        inner.data_size()
    }

    /// Size of a stored value: the payload length, or the inner payload
    /// length when `actual` and the value carries a coherent length prefix.
    pub fn value_size(&self, key: &str, actual: bool) -> usize {
        if key.is_empty() {
            return 0;
        }
        let mut inner = self.inner.lock();
        inner.check_load_data();
        let Some(payload) = inner.dict.get(key) else {
            return 0;
        };
        if actual {
            if let Some(len) = values::inner_payload_len(payload) {
                return len;
            }
        }
        payload.len()
    }

    // ------------------------------------------------------------------
    // removal
    // ------------------------------------------------------------------

    /// Appends a tombstone for `key`; no-op when the key is absent.
    pub fn remove(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        let _guard = ProcessLock::exclusive(&inner.process_lock);
        inner.check_load_data();
        inner.remove_data(key);
    }

    /// Removes all of `keys` with one compaction instead of one tombstone
    /// per key.
    pub fn remove_many<S: AsRef<str>>(&self, keys: &[S]) {
        if keys.is_empty() {
            return;
        }
        if keys.len() == 1 {
            return self.remove(keys[0].as_ref());
        }
        let mut inner = self.inner.lock();
        let _guard = ProcessLock::exclusive(&inner.process_lock);
        inner.check_load_data();
        for key in keys {
            inner.dict.remove(key.as_ref());
        }
        inner.has_full_writeback = false;
        inner.full_writeback();
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    /// Drops every key, truncates the data file to one page, refreshes the
    /// IV, and bumps the sequence.
    pub fn clear_all(&self) {
        self.inner.lock().clear_all();
    }

    /// Drops the in-memory dictionary and unmaps the files; the next
    /// operation reloads from disk.
    pub fn clear_memory_state(&self) {
        self.inner.lock().clear_memory_state();
    }

    /// Compacts, then halves the file while more than half of it is free.
    pub fn trim(&self) {
        self.inner.lock().trim();
    }

    /// Flushes both mappings.
    pub fn sync(&self, mode: SyncMode) {
        self.inner.lock().sync(matches!(mode, SyncMode::Sync));
    }

    /// Changes the encryption configuration (enable, disable, or rotate the
    /// key) and rewrites the store under it. Returns whether the rewrite
    /// succeeded.
    ///
    /// Another process keeps decrypting under its old filter until its next
    /// operation observes the sequence bump; that window is inherent to the
    /// protocol.
    pub fn re_key(&self, key: Option<&[u8]>) -> bool {
        self.inner.lock().re_key(key)
    }

    /// The current encryption key, `None` when encryption is off.
    pub fn crypt_key(&self) -> Option<Vec<u8>> {
        self.inner.lock().crypt_key()
    }

    pub(crate) fn check_re_set_crypt_key(&self, key: Option<&[u8]>) {
        self.inner.lock().check_re_set_crypt_key(key)
    }

    /// Removes this store from the process registry and drops its
    /// in-memory state. Outstanding handles keep working and reload on
    /// their next operation.
    pub fn close(&self) {
        registry::close_store(&self.id);
        self.inner.lock().clear_memory_state();
    }

    // ------------------------------------------------------------------
    // offline check
    // ------------------------------------------------------------------

    /// Validates a store's files without opening it: recomputes the CRC
    /// over the record region and compares it against the meta file's
    /// digest. A store with no data file is vacuously valid; one with a
    /// data file but no meta file is not.
    pub fn check_file_valid(id: &str, directory: Option<&Path>) -> bool {
        let directory = match directory.or_else(|| registry::root_dir()) {
            Some(directory) => directory,
            None => return false,
        };
        let data_path = paths::data_file_path(directory, id);
        if !data_path.exists() {
            return true;
        }
        let meta_path = paths::meta_file_path(&data_path);
        let Ok(meta_bytes) = fs::read(&meta_path) else {
            return false;
        };
        if meta_bytes.len() < META_HEADER_SIZE {
            return false;
        }
        let meta = MetaInfo::read(&meta_bytes);

        let Ok(data_bytes) = fs::read(&data_path) else {
            return false;
        };
        if data_bytes.len() < DATA_HEADER_SIZE {
            return false;
        }
        let actual = u32::from_le_bytes([data_bytes[0], data_bytes[1], data_bytes[2], data_bytes[3]])
            as usize;
        if actual > data_bytes.len() - DATA_HEADER_SIZE {
            return false;
        }
        crc32fast::hash(&data_bytes[DATA_HEADER_SIZE..DATA_HEADER_SIZE + actual])
            == meta.crc_digest
    }
}
