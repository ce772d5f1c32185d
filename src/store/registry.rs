//! # Process Registry
//!
//! Process-wide state: the root directory and the canonical-identifier to
//! engine map. The registry guarantees at most one engine per canonical
//! identifier per process; re-opening an identifier returns the live
//! instance (reconciling the crypt key when the caller supplied a
//! different one).
//!
//! [`initialize`] is one-shot: the first call creates the root directory
//! and arms the registry, later calls return the established root.
//! [`on_exit`] flushes every live engine and drops its in-memory state;
//! engines stay registered and reload on their next use.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{error, info};

use super::{paths, Store, StoreBuilder};

struct Registry {
    root: PathBuf,
    instances: Mutex<HashMap<String, Arc<Store>>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Arms the registry and establishes the process root directory. Idempotent:
/// only the first call takes effect; the established root is returned.
pub fn initialize<P: AsRef<Path>>(root_dir: P) -> &'static Path {
    let registry = REGISTRY.get_or_init(|| {
        let root = root_dir.as_ref().to_path_buf();
        if let Err(e) = fs::create_dir_all(&root) {
            error!("failed to create root directory '{}': {}", root.display(), e);
        }
        info!("store root directory: {}", root.display());
        Registry {
            root,
            instances: Mutex::new(HashMap::new()),
        }
    });
    &registry.root
}

pub(crate) fn root_dir() -> Option<&'static Path> {
    REGISTRY.get().map(|registry| registry.root.as_path())
}

pub(crate) fn open_store(builder: StoreBuilder) -> Result<Arc<Store>> {
    ensure!(!builder.id().is_empty(), "store identifier must not be empty");
    let registry = REGISTRY
        .get()
        .ok_or_else(|| eyre::eyre!("initialize() must be called before opening stores"))?;

    let directory = builder
        .directory_override()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| registry.root.clone());
    let key = paths::store_key(
        builder.id(),
        builder.directory_override(),
        Some(&registry.root),
    );

    let mut instances = registry.instances.lock();
    if let Some(existing) = instances.get(&key) {
        existing.check_re_set_crypt_key(builder.crypt_key_bytes());
        return Ok(Arc::clone(existing));
    }

    fs::create_dir_all(&directory)
        .wrap_err_with(|| format!("failed to create store directory '{}'", directory.display()))?;

    let store = Store::open_standalone(
        key.clone(),
        &directory,
        builder.id(),
        builder.mode(),
        builder.crypt_key_bytes().map(|key| key.to_vec()),
    )?;
    let store = Arc::new(store);
    instances.insert(key, Arc::clone(&store));
    Ok(store)
}

/// Flushes every live engine durably and drops its in-memory state. Called
/// at process teardown; engines reload on their next use if any.
pub fn on_exit() {
    let Some(registry) = REGISTRY.get() else {
        return;
    };
    info!("flushing all stores");
    let instances = registry.instances.lock();
    for store in instances.values() {
        let mut inner = store.inner.lock();
        inner.sync(true);
        inner.clear_memory_state();
    }
}

pub(crate) fn close_store(key: &str) {
    if let Some(registry) = REGISTRY.get() {
        registry.instances.lock().remove(key);
    }
}
