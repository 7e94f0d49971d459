//! Process-wide allocation accounting hooks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, const_rwlock};

/// Callbacks fired for every block the engine allocates or releases.
///
/// `on_alloc` runs after each allocation and `on_free` before each release,
/// each with the block pointer and its size in bytes. A block that changes
/// size (in-place growth or resize) reports a free of the old size followed
/// by an allocation of the new one.
///
/// Hooks run on the allocating thread and must not panic.
pub trait AllocHooks: Send + Sync {
    /// A block of `size` bytes was allocated at `ptr`.
    fn on_alloc(&self, ptr: *const u8, size: usize);

    /// A block of `size` bytes at `ptr` is about to be released.
    fn on_free(&self, ptr: *const u8, size: usize);
}

static HOOKS: RwLock<Option<Arc<dyn AllocHooks>>> = const_rwlock(None);
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Installs process-wide allocation hooks, returning the previous ones.
pub fn install_alloc_hooks(hooks: Arc<dyn AllocHooks>) -> Option<Arc<dyn AllocHooks>> {
    let mut slot = HOOKS.write();
    let previous = slot.replace(hooks);
    INSTALLED.store(true, Ordering::Release);
    tracing::debug!(replaced = previous.is_some(), "allocation hooks installed");
    previous
}

/// Removes the process-wide allocation hooks, returning them.
pub fn clear_alloc_hooks() -> Option<Arc<dyn AllocHooks>> {
    let mut slot = HOOKS.write();
    INSTALLED.store(false, Ordering::Release);
    slot.take()
}

fn current() -> Option<Arc<dyn AllocHooks>> {
    if !INSTALLED.load(Ordering::Acquire) {
        return None;
    }
    HOOKS.read().clone()
}

pub(crate) fn notify_alloc(ptr: *const u8, size: usize) {
    if let Some(hooks) = current() {
        hooks.on_alloc(ptr, size);
    }
}

pub(crate) fn notify_free(ptr: *const u8, size: usize) {
    if let Some(hooks) = current() {
        hooks.on_free(ptr, size);
    }
}
