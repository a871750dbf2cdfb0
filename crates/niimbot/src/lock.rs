//! Busy registry: at most one session per physical printer.
//!
//! A second session against an address that is already in use fails fast
//! with `DeviceBusy` instead of queueing. Ordering across jobs belongs to the
//! caller.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use crate::{NiimbotError, Result};

static GLOBAL_LOCKS: LazyLock<DeviceLocks> = LazyLock::new(DeviceLocks::new);

/// Shared set of device addresses currently held by a session.
#[derive(Debug, Clone, Default)]
pub struct DeviceLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl DeviceLocks {
    /// Create an isolated registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by default.
    pub fn global() -> Self {
        GLOBAL_LOCKS.clone()
    }

    /// Claim `address`, or fail with `DeviceBusy` if another holder has it.
    pub fn try_acquire(&self, address: &str) -> Result<DeviceGuard> {
        let key = normalize_device_id(address);
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(key.clone()) {
            return Err(NiimbotError::DeviceBusy(address.to_string()));
        }
        Ok(DeviceGuard {
            held: Arc::clone(&self.held),
            key,
        })
    }

    pub fn is_held(&self, address: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&normalize_device_id(address))
    }
}

/// Releases its address when dropped.
#[derive(Debug)]
pub struct DeviceGuard {
    held: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Reduce an address to lowercase alphanumerics so `AA:BB:..` and `aabb..` match.
pub fn normalize_device_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
