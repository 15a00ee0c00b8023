//! Per-call-site inline caches.
//!
//! A [`CallSite`] owns a chain of cache nodes ending in the generic stage:
//!
//! ```text
//! head -> Boolean(name) -> Single(name, Integer) -> ... -> Generic
//! ```
//!
//! Readers walk an immutable snapshot of the chain without locking. Generic
//! dispatch builds a replacement snapshot and publishes it with a single
//! pointer swap.

use std::sync::Arc;

use serde::Serialize;

use crate::config::DispatchConfig;
use crate::invoke::{DirectInvoker, Invoker};
use crate::method::MethodResolver;
use crate::val::Value;

mod chain;
mod generic;
mod guard;
mod node;
mod profile;
mod site;

#[cfg(test)]
mod concurrency_test;
#[cfg(test)]
mod test_support;

pub use chain::ChainState;
pub use profile::{BranchProfile, CallSiteStats, StatsSnapshot};
pub use site::{BranchReport, CallSite, ChainReport, NodeReport};

/// What a cache hit does. Fixed per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchAction {
    /// Perform the call and return its result.
    Invoke,
    /// Answer whether the method exists without calling it.
    CapabilityProbe,
}

/// What happens when lookup finds nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingBehavior {
    /// Invoke the receiver's `method_missing(name, *args)`.
    CallMethodMissing,
    /// Report [`Outcome::Missing`] to the caller.
    ReturnMissing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Returned(Value),
    Responds(bool),
    Missing,
}

impl Outcome {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Outcome::Returned(value) => Some(value),
            _ => None,
        }
    }
}

/// One activation of a call site.
#[derive(Clone, Copy)]
pub struct Call<'a> {
    pub name: &'a str,
    pub receiver: &'a Value,
    pub args: &'a [Value],
    pub block: Option<&'a Value>,
}

impl<'a> Call<'a> {
    pub fn new(name: &'a str, receiver: &'a Value, args: &'a [Value], block: Option<&'a Value>) -> Self {
        Self {
            name,
            receiver,
            args,
            block,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteOptions {
    pub action: DispatchAction,
    pub missing: MissingBehavior,
    /// Private methods are visible (self-calls, `send`).
    pub ignore_visibility: bool,
}

impl Default for SiteOptions {
    fn default() -> Self {
        Self {
            action: DispatchAction::Invoke,
            missing: MissingBehavior::CallMethodMissing,
            ignore_visibility: false,
        }
    }
}

impl SiteOptions {
    pub fn probe() -> Self {
        Self {
            action: DispatchAction::CapabilityProbe,
            missing: MissingBehavior::ReturnMissing,
            ignore_visibility: false,
        }
    }

    pub fn with_missing(mut self, missing: MissingBehavior) -> Self {
        self.missing = missing;
        self
    }

    pub fn with_ignore_visibility(mut self, ignore_visibility: bool) -> Self {
        self.ignore_visibility = ignore_visibility;
        self
    }
}

/// Collaborators shared by every call site of one runtime instance.
#[derive(Clone)]
pub struct DispatchContext {
    pub resolver: Arc<dyn MethodResolver>,
    pub invoker: Arc<dyn Invoker>,
    pub config: DispatchConfig,
}

impl DispatchContext {
    pub fn new(resolver: Arc<dyn MethodResolver>, invoker: Arc<dyn Invoker>, config: DispatchConfig) -> Self {
        Self {
            resolver,
            invoker,
            config,
        }
    }

    /// Context calling method bodies directly through a [`DirectInvoker`].
    pub fn direct(resolver: Arc<dyn MethodResolver>, config: DispatchConfig) -> Self {
        let invoker = Arc::new(DirectInvoker::new(config.allow_cloning));
        Self::new(resolver, invoker, config)
    }
}
