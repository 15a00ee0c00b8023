use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use crossbeam::epoch::{self, Atomic, Owned};
use serde::Serialize;
use tracing::debug;

use crate::invoke::CallTarget;
use crate::val::Value;

use super::chain::{ChainSnapshot, ChainState};
use super::generic::{GenericDispatch, Resolution};
use super::guard::ShapeGuard;
use super::node::{BranchTarget, CacheNode, CachedBranch, ChainStep};
use super::profile::{CallSiteStats, StatsSnapshot};
use super::{Call, DispatchContext, Outcome, SiteOptions};

/// The inline cache of one call site.
///
/// `call`/`send` may run concurrently from any number of threads. Cache hits
/// take no lock; the generic stage serializes chain rebuilds on a per-site
/// mutex and publishes each rebuilt chain with one atomic swap.
pub struct CallSite {
    name: Arc<str>,
    options: SiteOptions,
    chain: Atomic<ChainSnapshot>,
    writer: Mutex<()>,
    generic: GenericDispatch,
    stats: CallSiteStats,
}

impl CallSite {
    pub fn new(name: &str, ctx: &DispatchContext) -> Self {
        Self::with_options(name, SiteOptions::default(), ctx)
    }

    pub fn with_options(name: &str, options: SiteOptions, ctx: &DispatchContext) -> Self {
        Self {
            name: Arc::from(name),
            options,
            chain: Atomic::new(ChainSnapshot::empty()),
            writer: Mutex::new(()),
            generic: GenericDispatch::new(
                Arc::clone(&ctx.resolver),
                Arc::clone(&ctx.invoker),
                ctx.config.max_chain_length,
            ),
            stats: CallSiteStats::default(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn options(&self) -> SiteOptions {
        self.options
    }

    /// Send this site's message to `receiver`.
    #[inline]
    pub fn call(&self, receiver: &Value, args: &[Value]) -> Result<Outcome> {
        self.send(&self.name, receiver, args, None)
    }

    #[inline]
    pub fn call_with_block(&self, receiver: &Value, args: &[Value], block: Option<&Value>) -> Result<Outcome> {
        self.send(&self.name, receiver, args, block)
    }

    /// Send an arbitrary message through this site's cache (`send`-style sites).
    pub fn send(&self, name: &str, receiver: &Value, args: &[Value], block: Option<&Value>) -> Result<Outcome> {
        let call = Call::new(name, receiver, args, block);
        let guard = epoch::pin();
        let snapshot = Self::load(&self.chain, &guard);
        match snapshot.head.execute(&call, self.options.action, self.generic.invoker()) {
            ChainStep::Hit(result) => {
                self.stats.hit();
                result
            }
            ChainStep::Generic => {
                self.stats.miss();
                self.dispatch_generic(&call)
            }
            ChainStep::Repair => {
                self.stats.repair();
                debug!(
                    target: "sendcache::dispatch::repair",
                    method = name,
                    receiver = receiver.type_name(),
                    reason = "class modified",
                    "assumption failed, re-resolving"
                );
                self.dispatch_generic(&call)
            }
            ChainStep::Megamorphic => {
                self.stats.megamorphic_lookup();
                self.generic.dispatch_uncached(&call, &self.options)
            }
        }
    }

    fn load<'g>(chain: &Atomic<ChainSnapshot>, guard: &'g epoch::Guard) -> &'g ChainSnapshot {
        let shared = chain.load(Ordering::Acquire, guard);
        // SAFETY: the chain pointer is set non-null in `with_options` and only ever
        // replaced by another non-null snapshot. Replaced snapshots are destroyed
        // through the epoch collector, after every reader pinned at swap time has
        // unpinned, so the reference cannot outlive its allocation.
        unsafe { shared.deref() }
    }

    fn dispatch_generic(&self, call: &Call<'_>) -> Result<Outcome> {
        let resolution = self.generic.resolve(call, &self.options);
        self.publish(call, &resolution);
        self.generic.perform(call, &self.options, &resolution)
    }

    /// Build the successor chain from whatever is current and swap it in.
    fn publish(&self, call: &Call<'_>, resolution: &Resolution) {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let guard = epoch::pin();
        let current = Self::load(&self.chain, &guard);
        let Some(next) = self
            .generic
            .specialize(current, &self.name, call, &self.options, resolution, &self.stats)
        else {
            return;
        };
        let previous = self.chain.swap(Owned::new(next), Ordering::AcqRel, &guard);
        // SAFETY: `previous` is no longer reachable from `self.chain`; readers that
        // loaded it are pinned and keep it alive until they unpin.
        unsafe { guard.defer_destroy(previous) };
    }

    pub fn state(&self) -> ChainState {
        let guard = epoch::pin();
        Self::load(&self.chain, &guard).state()
    }

    /// Cache nodes currently linked in front of the terminal.
    pub fn node_count(&self) -> usize {
        let guard = epoch::pin();
        Self::load(&self.chain, &guard).len()
    }

    /// Nodes installed over the site's lifetime; bounded by `max_chain_length`.
    pub fn installed(&self) -> usize {
        let guard = epoch::pin();
        Self::load(&self.chain, &guard).installed()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn describe(&self) -> ChainReport {
        let guard = epoch::pin();
        let snapshot = Self::load(&self.chain, &guard);
        ChainReport {
            name: self.name.to_string(),
            state: snapshot.state(),
            installed: snapshot.installed(),
            max_chain_length: self.generic.max_chain_length(),
            nodes: snapshot.nodes().map(|node| self.report_node(node)).collect(),
            stats: self.stats.snapshot(),
        }
    }

    fn report_node(&self, node: &CacheNode) -> NodeReport {
        match node {
            CacheNode::Boolean(node) => NodeReport {
                kind: "boolean",
                method: node.guard.name().to_string(),
                branches: [false, true]
                    .into_iter()
                    .map(|value| self.report_branch(value.to_string(), node.branch(value)))
                    .collect(),
            },
            CacheNode::Single(node) => {
                let shape = match node.guard.shape() {
                    ShapeGuard::Exact(shape) => shape.to_string(),
                    ShapeGuard::Boolean => "bool".to_string(),
                };
                NodeReport {
                    kind: "single",
                    method: node.guard.name().to_string(),
                    branches: vec![self.report_branch(shape, node.branch.as_ref())],
                }
            }
        }
    }

    fn report_branch(&self, shape: String, branch: Option<&CachedBranch>) -> BranchReport {
        let Some(branch) = branch else {
            return BranchReport {
                shape,
                cached: false,
                valid: false,
                target: None,
                cloned: false,
                entered: 0,
            };
        };
        let resolver = self.generic.resolver();
        let describe = |target: &CallTarget| {
            let method = target.method();
            format!("{}#{}", resolver.class_name(method.owner()), method.name())
        };
        let (target, cloned) = match &branch.target {
            BranchTarget::Direct(target) => (Some(describe(target)), target.is_cloned()),
            BranchTarget::MethodMissing(target) => (Some(describe(target)), target.is_cloned()),
            BranchTarget::Probe => (None, false),
        };
        BranchReport {
            shape,
            cached: true,
            valid: branch.is_valid(),
            target,
            cloned,
            entered: branch.profile.entered(),
        }
    }
}

impl Drop for CallSite {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out concurrent readers of this site, so the
        // current snapshot can be reclaimed immediately.
        unsafe {
            let guard = epoch::unprotected();
            let current = self.chain.load(Ordering::Relaxed, guard);
            if !current.is_null() {
                drop(current.into_owned());
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub name: String,
    pub state: ChainState,
    pub installed: usize,
    pub max_chain_length: usize,
    pub nodes: Vec<NodeReport>,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub kind: &'static str,
    pub method: String,
    pub branches: Vec<BranchReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchReport {
    pub shape: String,
    pub cached: bool,
    pub valid: bool,
    pub target: Option<String>,
    pub cloned: bool,
    pub entered: u64,
}
