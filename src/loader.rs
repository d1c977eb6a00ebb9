//! Process-wide Vulkan loader state.
//!
//! Loading the Vulkan library is a once-per-process affair; this module wraps
//! it in an explicit initialize/terminate lifecycle. [`initialize`] is
//! idempotent and [`terminate`] is safe to call repeatedly (or never —
//! process exit unloads the library anyway).
//!
//! [`InstanceBuilder::new`](crate::instance::InstanceBuilder::new) calls
//! [`acquire`] on your behalf; direct use of this module is only needed to
//! control unload timing or to share the entry with other ash-based code.

use ash::LoadingError;
use std::sync::{Arc, Mutex};

static ENTRY: Mutex<Option<Arc<ash::Entry>>> = Mutex::new(None);

/// Loads the Vulkan library if it is not loaded yet. Subsequent calls are
/// no-ops.
pub fn initialize() -> Result<(), LoadingError> {
    acquire().map(|_| ())
}

/// Returns the process-wide entry, loading the Vulkan library first if
/// needed.
pub fn acquire() -> Result<Arc<ash::Entry>, LoadingError> {
    let mut slot = ENTRY.lock().unwrap();
    if let Some(entry) = slot.as_ref() {
        return Ok(entry.clone());
    }
    // Safety: `Entry::load` requires that the loaded library outlives every
    // call made through it. The entry is reference-counted and each Instance
    // retains a clone, so terminate() cannot unload it out from under them.
    let entry = Arc::new(unsafe { ash::Entry::load()? });
    *slot = Some(entry.clone());
    Ok(entry)
}

/// Releases the process-wide reference to the loader.
///
/// Outstanding [`Arc`] clones (held by live instances) keep the library
/// mapped until they drop. Safe to call repeatedly and before [`initialize`].
pub fn terminate() {
    let mut slot = ENTRY.lock().unwrap();
    if slot.take().is_some() {
        tracing::info!("vulkan loader released");
    }
}

pub fn is_initialized() -> bool {
    ENTRY.lock().unwrap().is_some()
}
