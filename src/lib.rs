//! # pagekv - Embedded Memory-Mapped Key-Value Store
//!
//! pagekv is an embedded, persistent key-value store optimized for many
//! small writes and in-memory reads, safe to share between threads and
//! between processes on one host. This Rust implementation prioritizes:
//!
//! - **Append-only writes**: a `set` is one record appended to a mapped
//!   region plus an 8-byte header update, no write amplification
//! - **Crash safety**: CRC-validated loads with a last-confirmed rollback
//!   point committed before every compaction
//! - **Cheap cross-process sharing**: advisory locks plus sequence/CRC
//!   change detection over a shared mapping, no daemon and no IPC
//!
//! ## Quick Start
//!
//! ```ignore
//! use pagekv::Store;
//!
//! pagekv::initialize("/var/lib/myapp/kv");
//!
//! let store = Store::builder("user-settings").open()?;
//! store.set_i32("launch-count", 42);
//! store.set_string("locale", "en-US");
//!
//! assert_eq!(store.get_i32("launch-count", 0), 42);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │   Typed accessors (set_i32, ...)      │
//! ├───────────────────────────────────────┤
//! │   Store engine (dictionary, load/     │
//! │   recover/compact, change detection)  │
//! ├───────────────┬───────────────────────┤
//! │  AES-CFB      │  Advisory file lock   │
//! │  filter       │  (shared/exclusive)   │
//! ├───────────────┴───────────────────────┤
//! │   Memory-mapped file pair             │
//! │   (append log + one-page meta file)   │
//! └───────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! <root>/
//! ├── user-settings          # append log: 4-byte legacy length + records
//! ├── user-settings.crc      # one page: CRC, size, version, sequence, IV
//! └── specialCharacter/      # stores whose ids cannot be file names
//!     └── <md5(id)>
//! ```
//!
//! ## Module Overview
//!
//! - [`store`]: public surface, engine, registry, host hooks
//! - [`storage`]: mapped file pair, meta header, advisory lock, append cursor
//! - [`encoding`]: varints and typed value payloads
//! - [`crypt`]: AES-128-CFB stream filter
//! - [`config`]: on-disk layout constants

#[macro_use]
mod macros;

pub mod config;
pub mod crypt;
pub mod encoding;
pub mod storage;
pub mod store;

pub use config::DEFAULT_STORE_ID;
pub use store::{
    initialize, on_exit, set_content_change_handler, set_content_change_notify,
    set_crc_check_fail_handler, set_file_length_error_handler, Mode, RecoverStrategy, Store,
    StoreBuilder, SyncMode,
};
