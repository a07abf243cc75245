//! Process-wide connection-attempt lock
//!
//! The wireless driver tolerates only one in-flight connection attempt at a
//! time; concurrent handshakes starve each other at the radio. This lock
//! serializes attempts across all devices: it is acquired before connect and
//! released on reaching the subscribed state or on any aborting failure path.

use std::sync::{Arc, Mutex};

/// Singleton lock admitting at most one connecting device system-wide.
///
/// Acquisition is non-blocking; a caller finding the lock held retries later
/// instead of queuing. Cloning shares the same underlying slot.
#[derive(Debug, Clone, Default)]
pub struct ConnectionLock {
    holder: Arc<Mutex<Option<String>>>,
}

impl ConnectionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock for `address`.
    ///
    /// Returns `false` if another device holds it. Re-acquiring for the
    /// current holder succeeds (the caller rejects duplicate attempts on the
    /// same device before ever reaching the lock).
    pub fn try_acquire(&self, address: &str) -> bool {
        let mut holder = self.holder.lock().unwrap();
        match holder.as_deref() {
            None => {
                *holder = Some(address.to_string());
                true
            }
            Some(current) => current == address,
        }
    }

    /// Release the lock if `address` holds it.
    ///
    /// Returns `true` if this call released it. Releasing a lock held by a
    /// different device is a no-op, so a late failure path cannot steal a
    /// slot already granted to someone else.
    pub fn release(&self, address: &str) -> bool {
        let mut holder = self.holder.lock().unwrap();
        if holder.as_deref() == Some(address) {
            *holder = None;
            true
        } else {
            false
        }
    }

    /// Address currently holding the lock, if any
    pub fn holder(&self) -> Option<String> {
        self.holder.lock().unwrap().clone()
    }

    /// Whether `address` is the current holder
    pub fn is_held_by(&self, address: &str) -> bool {
        self.holder.lock().unwrap().as_deref() == Some(address)
    }
}
