//! # Inter-Process Advisory Lock
//!
//! Shared/exclusive advisory locks over the meta file descriptor, with
//! counted in-process re-entrancy. This is the coarse coordination layer of
//! the cross-process protocol; fine-grained coherence is the CRC/sequence
//! comparison that every operation performs.
//!
//! ## Re-entrancy Counting
//!
//! The OS lock is per file description, so nested acquisitions inside one
//! engine must not issue redundant (or worse, downgrading) syscalls. The
//! lock keeps shared and exclusive entry counters:
//!
//! - acquiring shared while any lock is held only bumps the counter;
//! - acquiring exclusive while only shared is held upgrades in place;
//! - releasing the last exclusive entry downgrades back to shared when
//!   shared entries remain, and unlocks otherwise;
//! - releasing the last shared entry unlocks only when no exclusive entry
//!   remains.
//!
//! The upgrade is not atomic (the OS may grant another process the lock in
//! between); the engine tolerates this because any interleaved write is
//! caught by the sequence/CRC check under the upgraded lock.
//!
//! ## Scoped Release
//!
//! Acquisition returns a guard; the matching release runs on drop, on every
//! exit path. Lock failures are logged and treated as acquired so a broken
//! lock file degrades to single-process behavior instead of wedging the
//! caller.
//!
//! ## Single-Process Mode
//!
//! A store opened in single-process mode carries a disabled lock: every
//! operation is a no-op and the per-engine mutex is the only serialization.

use std::fs::File;
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::Mutex;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct LockState {
    shared: u32,
    exclusive: u32,
}

#[derive(Debug)]
pub struct ProcessLock {
    file: Option<File>,
    enabled: bool,
    state: Mutex<LockState>,
}

impl ProcessLock {
    pub fn new(file: Option<File>, enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            file,
            enabled,
            state: Mutex::new(LockState::default()),
        })
    }

    /// A lock whose operations are all no-ops (single-process mode).
    pub fn disabled() -> Arc<Self> {
        Self::new(None, false)
    }

    fn active(&self) -> bool {
        self.enabled && self.file.is_some()
    }

    /// Blocks until the shared lock is granted (or is already covered by an
    /// entry this process holds) and returns its release guard.
    pub fn shared(lock: &Arc<ProcessLock>) -> SharedLockGuard {
        lock.acquire(LockKind::Shared);
        SharedLockGuard {
            lock: Arc::clone(lock),
        }
    }

    /// Blocks until the exclusive lock is granted, upgrading in place when
    /// shared is already held, and returns its release guard.
    pub fn exclusive(lock: &Arc<ProcessLock>) -> ExclusiveLockGuard {
        lock.acquire(LockKind::Exclusive);
        ExclusiveLockGuard {
            lock: Arc::clone(lock),
        }
    }

    fn acquire(&self, kind: LockKind) {
        if !self.active() {
            return;
        }
        let Some(file) = self.file.as_ref() else {
            return;
        };
        let mut state = self.state.lock();
        match kind {
            LockKind::Shared => {
                if state.shared == 0 && state.exclusive == 0 {
                    if let Err(e) = file.lock_shared() {
                        error!("failed to acquire shared file lock: {}", e);
                    }
                }
                state.shared += 1;
            }
            LockKind::Exclusive => {
                if state.exclusive == 0 {
                    // Upgrades in place when a shared entry is held.
                    if let Err(e) = file.lock_exclusive() {
                        error!("failed to acquire exclusive file lock: {}", e);
                    }
                }
                state.exclusive += 1;
            }
        }
    }

    fn release(&self, kind: LockKind) {
        if !self.active() {
            return;
        }
        let Some(file) = self.file.as_ref() else {
            return;
        };
        let mut state = self.state.lock();
        match kind {
            LockKind::Shared => {
                debug_assert!(state.shared > 0, "unbalanced shared unlock");
                state.shared = state.shared.saturating_sub(1);
                if state.shared == 0 && state.exclusive == 0 {
                    if let Err(e) = file.unlock() {
                        error!("failed to release shared file lock: {}", e);
                    }
                }
            }
            LockKind::Exclusive => {
                debug_assert!(state.exclusive > 0, "unbalanced exclusive unlock");
                state.exclusive = state.exclusive.saturating_sub(1);
                if state.exclusive == 0 {
                    if state.shared > 0 {
                        // Downgrade back to the outstanding shared entries.
                        if let Err(e) = file.lock_shared() {
                            error!("failed to downgrade file lock to shared: {}", e);
                        }
                    } else if let Err(e) = file.unlock() {
                        error!("failed to release exclusive file lock: {}", e);
                    }
                }
            }
        }
    }
}

pub struct SharedLockGuard {
    lock: Arc<ProcessLock>,
}

impl Drop for SharedLockGuard {
    fn drop(&mut self) {
        self.lock.release(LockKind::Shared);
    }
}

pub struct ExclusiveLockGuard {
    lock: Arc<ProcessLock>,
}

impl Drop for ExclusiveLockGuard {
    fn drop(&mut self) {
        self.lock.release(LockKind::Exclusive);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn lock_on_temp_file(enabled: bool) -> (tempfile::TempDir, Arc<ProcessLock>) {
        let dir = tempdir().unwrap();
        let file = File::create(dir.path().join("store.crc")).unwrap();
        (dir, ProcessLock::new(Some(file), enabled))
    }

    #[test]
    fn nested_shared_entries_balance() {
        let (_dir, lock) = lock_on_temp_file(true);

        let outer = ProcessLock::shared(&lock);
        let inner = ProcessLock::shared(&lock);
        drop(inner);
        drop(outer);

        assert_eq!(lock.state.lock().shared, 0);
    }

    #[test]
    fn exclusive_inside_shared_upgrades_and_downgrades() {
        let (_dir, lock) = lock_on_temp_file(true);

        let shared = ProcessLock::shared(&lock);
        {
            let _exclusive = ProcessLock::exclusive(&lock);
            let state = lock.state.lock();
            assert_eq!(state.shared, 1);
            assert_eq!(state.exclusive, 1);
        }
        let state = lock.state.lock();
        assert_eq!(state.exclusive, 0);
        assert_eq!(state.shared, 1);
        drop(state);
        drop(shared);
    }

    #[test]
    fn shared_inside_exclusive_is_counted_without_syscall() {
        let (_dir, lock) = lock_on_temp_file(true);

        let exclusive = ProcessLock::exclusive(&lock);
        let shared = ProcessLock::shared(&lock);
        drop(exclusive);
        drop(shared);

        let state = lock.state.lock();
        assert_eq!(state.shared, 0);
        assert_eq!(state.exclusive, 0);
    }

    #[test]
    fn disabled_lock_is_a_no_op() {
        let lock = ProcessLock::disabled();
        let _a = ProcessLock::shared(&lock);
        let _b = ProcessLock::exclusive(&lock);
        assert_eq!(lock.state.lock().shared, 0);
        assert_eq!(lock.state.lock().exclusive, 0);
    }

    #[test]
    fn blocked_writer_proceeds_after_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.crc");
        File::create(&path).unwrap();

        let a = ProcessLock::new(Some(File::open(&path).unwrap()), true);
        let b = ProcessLock::new(
            Some(File::options().read(true).open(&path).unwrap()),
            true,
        );

        let guard = ProcessLock::shared(&a);
        let handle = std::thread::spawn(move || {
            let _exclusive = ProcessLock::exclusive(&b);
        });
        std::thread::sleep(std::time::Duration::from_millis(50));
        drop(guard);
        handle.join().unwrap();
    }
}
