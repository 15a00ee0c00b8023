//! Invocation mechanism collaborator.
//!
//! Cache branches do not call method bodies themselves. They hold a
//! [`CallTarget`] produced once by [`Invoker::prepare`] and hand it back to
//! [`Invoker::invoke`] on every hit.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;

use crate::dispatch::Call;
use crate::method::Method;
use crate::val::Value;

#[derive(Clone)]
pub struct CallTarget {
    method: Arc<Method>,
    cloned: bool,
}

impl CallTarget {
    /// Target sharing the resolved method as-is.
    pub fn direct(method: Arc<Method>) -> Self {
        Self { method, cloned: false }
    }

    /// Target owning a private copy of the method for one call site.
    pub fn cloned(method: &Method) -> Self {
        Self {
            method: Arc::new(method.split()),
            cloned: true,
        }
    }

    #[inline]
    pub fn method(&self) -> &Arc<Method> {
        &self.method
    }

    #[inline]
    pub fn is_cloned(&self) -> bool {
        self.cloned
    }
}

impl fmt::Debug for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTarget")
            .field("method", &self.method)
            .field("cloned", &self.cloned)
            .finish()
    }
}

pub trait Invoker: Send + Sync {
    /// One-time setup when a cache branch is built. Running it twice for the
    /// same method yields equivalent targets.
    fn prepare(&self, method: &Arc<Method>) -> CallTarget;

    /// Perform the call. Failures are returned unchanged to the dispatcher.
    fn invoke(&self, target: &CallTarget, call: &Call<'_>) -> Result<Value>;
}

/// Calls method bodies directly and counts what it did.
#[derive(Debug)]
pub struct DirectInvoker {
    cloning_allowed: bool,
    invocations: AtomicU64,
    clones: AtomicU64,
}

impl Default for DirectInvoker {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DirectInvoker {
    pub fn new(cloning_allowed: bool) -> Self {
        Self {
            cloning_allowed,
            invocations: AtomicU64::new(0),
            clones: AtomicU64::new(0),
        }
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn clones(&self) -> u64 {
        self.clones.load(Ordering::Relaxed)
    }
}

impl Invoker for DirectInvoker {
    fn prepare(&self, method: &Arc<Method>) -> CallTarget {
        if self.cloning_allowed && method.should_always_clone() {
            self.clones.fetch_add(1, Ordering::Relaxed);
            CallTarget::cloned(method)
        } else {
            CallTarget::direct(Arc::clone(method))
        }
    }

    #[inline]
    fn invoke(&self, target: &CallTarget, call: &Call<'_>) -> Result<Value> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        target.method().call(call.receiver, call.args, call.block)
    }
}
