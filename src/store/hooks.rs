//! # Host Hooks
//!
//! Process-global callbacks the host supplies to steer recovery and observe
//! cross-process changes. The engine never makes the recovery decision
//! itself: when a load fails its CRC or length validation and the
//! last-confirmed rollback does not apply, it asks the matching hook and
//! either discards the store contents or accepts the current tail and
//! schedules a compaction.
//!
//! Both recovery hooks default to [`RecoverStrategy::Discard`]. The
//! content-changed callback fires only while notification is enabled.
//!
//! Handlers run while the engine holds its per-store mutex; a handler must
//! not call back into the store it is being asked about.

use parking_lot::RwLock;

/// What to do with a store whose on-disk state failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverStrategy {
    /// Drop the contents and start empty.
    Discard,
    /// Accept the readable prefix and schedule a full writeback.
    Recover,
}

type StrategyHandler = Box<dyn Fn(&str) -> RecoverStrategy + Send + Sync>;
type ChangeHandler = Box<dyn Fn(&str) + Send + Sync>;

struct Hooks {
    on_crc_check_fail: Option<StrategyHandler>,
    on_file_length_error: Option<StrategyHandler>,
    on_content_changed: Option<ChangeHandler>,
    notify_enabled: bool,
}

static HOOKS: RwLock<Hooks> = RwLock::new(Hooks {
    on_crc_check_fail: None,
    on_file_length_error: None,
    on_content_changed: None,
    notify_enabled: false,
});

/// Installs the handler consulted when a store's CRC validation fails.
pub fn set_crc_check_fail_handler<F>(handler: F)
where
    F: Fn(&str) -> RecoverStrategy + Send + Sync + 'static,
{
    HOOKS.write().on_crc_check_fail = Some(Box::new(handler));
}

/// Installs the handler consulted when a store's length validation fails.
pub fn set_file_length_error_handler<F>(handler: F)
where
    F: Fn(&str) -> RecoverStrategy + Send + Sync + 'static,
{
    HOOKS.write().on_file_length_error = Some(Box::new(handler));
}

/// Installs the callback invoked when another process's mutation of a store
/// is detected, and enables notification.
pub fn set_content_change_handler<F>(handler: F)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    let mut hooks = HOOKS.write();
    hooks.on_content_changed = Some(Box::new(handler));
    hooks.notify_enabled = true;
}

/// Turns content-change notification on or off without touching the handler.
pub fn set_content_change_notify(enabled: bool) {
    HOOKS.write().notify_enabled = enabled;
}

pub(crate) fn crc_check_fail_strategy(id: &str) -> RecoverStrategy {
    let hooks = HOOKS.read();
    match &hooks.on_crc_check_fail {
        Some(handler) => handler(id),
        None => RecoverStrategy::Discard,
    }
}

pub(crate) fn file_length_error_strategy(id: &str) -> RecoverStrategy {
    let hooks = HOOKS.read();
    match &hooks.on_file_length_error {
        Some(handler) => handler(id),
        None => RecoverStrategy::Discard,
    }
}

pub(crate) fn notify_content_changed(id: &str) {
    let hooks = HOOKS.read();
    if hooks.notify_enabled {
        if let Some(handler) = &hooks.on_content_changed {
            handler(id);
        }
    }
}
