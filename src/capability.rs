//! Reference-counted multicast-receive capability.
//!
//! Some platforms suppress multicast delivery unless a process-wide lock
//! is held (the original player wrapped the Wi-Fi multicast lock). The
//! manager guards a single underlying acquire/release behind an explicit
//! counter so concurrent pipelines share one platform permission.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::{IngestError, Result};

/// Platform multicast-lock collaborator.
pub trait MulticastLock: Send + Sync {
    fn acquire(&self) -> io::Result<()>;
    fn release(&self);
}

/// Default lock for hosts that deliver multicast unconditionally.
pub struct NullLock;

impl MulticastLock for NullLock {
    fn acquire(&self) -> io::Result<()> {
        Ok(())
    }

    fn release(&self) {}
}

struct Shared {
    lock: Box<dyn MulticastLock>,
    holders: Mutex<usize>,
}

impl Shared {
    fn holders(&self) -> std::sync::MutexGuard<'_, usize> {
        self.holders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide capability manager with explicit init (no implicit
/// singleton). Cheap to clone; clones share the counter.
#[derive(Clone)]
pub struct CapabilityManager {
    shared: Arc<Shared>,
}

impl CapabilityManager {
    pub fn new(lock: impl MulticastLock + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                lock: Box::new(lock),
                holders: Mutex::new(0),
            }),
        }
    }

    /// Obtain the capability. The underlying platform lock is acquired on
    /// the 0→1 transition only; further calls just bump the counter.
    pub fn acquire(&self) -> Result<CapabilityToken> {
        let mut holders = self.shared.holders();
        if *holders == 0 {
            self.shared
                .lock
                .acquire()
                .map_err(|e| IngestError::Capability(e.to_string()))?;
            debug!("platform multicast lock acquired");
        }
        *holders += 1;
        Ok(CapabilityToken {
            shared: Arc::clone(&self.shared),
            released: false,
        })
    }

    /// Number of live tokens. Diagnostic.
    pub fn held_count(&self) -> usize {
        *self.shared.holders()
    }
}

/// Opaque handle for one held reference to the capability. Release it
/// explicitly with [`CapabilityToken::release`]; dropping an unreleased
/// token performs the same decrement so no exit path leaks the lock.
pub struct CapabilityToken {
    shared: Arc<Shared>,
    released: bool,
}

impl CapabilityToken {
    pub fn release(mut self) {
        self.decrement();
    }

    fn decrement(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut holders = self.shared.holders();
        // releasing a fully-released manager is a no-op
        if *holders == 0 {
            return;
        }
        *holders -= 1;
        if *holders == 0 {
            self.shared.lock.release();
            debug!("platform multicast lock released");
        }
    }
}

impl Drop for CapabilityToken {
    fn drop(&mut self) {
        self.decrement();
    }
}
