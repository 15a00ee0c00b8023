//! Versioned validity tokens.
//!
//! An [`Assumption`] holds while nothing it covers has mutated. Invalidation is
//! a single release store; every thread's next `is_valid` acquire load observes
//! it without further coordination. There is no way back to valid.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

/// Returned by [`Assumption::check`] when the token has been invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidAssumption;

impl fmt::Display for InvalidAssumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("assumption invalidated")
    }
}

impl std::error::Error for InvalidAssumption {}

pub struct Assumption {
    name: Arc<str>,
    valid: AtomicBool,
}

impl Assumption {
    pub fn new(name: impl Into<Arc<str>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            valid: AtomicBool::new(true),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn check(&self) -> Result<(), InvalidAssumption> {
        if self.is_valid() { Ok(()) } else { Err(InvalidAssumption) }
    }

    /// Permanently invalidate. Returns `true` if this call performed the transition.
    pub fn invalidate(&self) -> bool {
        let was_valid = self.valid.swap(false, Ordering::AcqRel);
        if was_valid {
            trace!(target: "sendcache::method", assumption = %self.name, "assumption invalidated");
        }
        was_valid
    }
}

impl fmt::Debug for Assumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assumption")
            .field("name", &self.name)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Owner-side handle that hands out the *current* assumption and rolls it over
/// on every mutation.
pub struct CyclicAssumption {
    name: Arc<str>,
    current: Mutex<Arc<Assumption>>,
    version: AtomicU64,
}

impl CyclicAssumption {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        let name = name.into();
        Self {
            current: Mutex::new(Assumption::new(Arc::clone(&name))),
            name,
            version: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current(&self) -> Arc<Assumption> {
        let guard = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Number of times this assumption has been rolled over.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Publish a fresh token, then invalidate the one handed out so far.
    pub fn invalidate(&self, reason: &str) {
        let old = {
            let mut guard = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *guard, Assumption::new(Arc::clone(&self.name)))
        };
        self.version.fetch_add(1, Ordering::AcqRel);
        trace!(target: "sendcache::method", assumption = %self.name, reason, "cyclic assumption rolled over");
        old.invalidate();
    }
}

impl fmt::Debug for CyclicAssumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CyclicAssumption")
            .field("name", &self.name)
            .field("version", &self.version())
            .finish()
    }
}
