//! The generic (uncached) stage at the end of every chain.
//!
//! It resolves the call in full, decides what the chain should look like
//! afterwards, and then performs the current call itself, so a call never
//! depends on a cache entry having been installed.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::error::NoMethodError;
use crate::invoke::{CallTarget, Invoker};
use crate::method::{Lookup, METHOD_MISSING, MethodResolver};
use crate::val::Shape;

use super::chain::ChainSnapshot;
use super::guard::Guard;
use super::node::{BooleanNode, BranchTarget, CacheNode, CachedBranch, SingleNode, call_method_missing};
use super::profile::CallSiteStats;
use super::{Call, DispatchAction, MissingBehavior, Outcome, SiteOptions};

/// Everything full resolution learned about one call.
pub(crate) struct Resolution {
    pub(crate) shape: Shape,
    pub(crate) lookup: Lookup,
    /// Only looked up when the method itself is absent and the site would call it.
    pub(crate) method_missing: Option<Lookup>,
}

pub(crate) struct GenericDispatch {
    resolver: Arc<dyn MethodResolver>,
    invoker: Arc<dyn Invoker>,
    max_chain_length: usize,
}

impl GenericDispatch {
    pub(crate) fn new(resolver: Arc<dyn MethodResolver>, invoker: Arc<dyn Invoker>, max_chain_length: usize) -> Self {
        Self {
            resolver,
            invoker,
            max_chain_length,
        }
    }

    #[inline]
    pub(crate) fn invoker(&self) -> &dyn Invoker {
        &*self.invoker
    }

    #[inline]
    pub(crate) fn resolver(&self) -> &dyn MethodResolver {
        &*self.resolver
    }

    #[inline]
    pub(crate) fn max_chain_length(&self) -> usize {
        self.max_chain_length
    }

    pub(crate) fn resolve(&self, call: &Call<'_>, options: &SiteOptions) -> Resolution {
        let class = self.resolver.class_of(call.receiver);
        let lookup = self.resolver.resolve(class, call.name, options.ignore_visibility);
        let method_missing = (lookup.method.is_none()
            && options.action == DispatchAction::Invoke
            && options.missing == MissingBehavior::CallMethodMissing)
            .then(|| self.resolver.resolve(class, &METHOD_MISSING, true));
        Resolution {
            shape: call.receiver.shape(),
            lookup,
            method_missing,
        }
    }

    /// Full lookup plus dispatch, no cache involvement. Used by megamorphic sites.
    pub(crate) fn dispatch_uncached(&self, call: &Call<'_>, options: &SiteOptions) -> Result<Outcome> {
        let resolution = self.resolve(call, options);
        self.perform(call, options, &resolution)
    }

    /// Dispatch the current call from a resolution.
    pub(crate) fn perform(&self, call: &Call<'_>, options: &SiteOptions, resolution: &Resolution) -> Result<Outcome> {
        match options.action {
            DispatchAction::CapabilityProbe => Ok(Outcome::Responds(resolution.lookup.method.is_some())),
            DispatchAction::Invoke => match &resolution.lookup.method {
                Some(method) => self
                    .invoker
                    .invoke(&CallTarget::direct(Arc::clone(method)), call)
                    .map(Outcome::Returned),
                None => self.perform_missing(call, options, resolution),
            },
        }
    }

    fn perform_missing(&self, call: &Call<'_>, options: &SiteOptions, resolution: &Resolution) -> Result<Outcome> {
        if options.missing == MissingBehavior::ReturnMissing {
            return Ok(Outcome::Missing);
        }
        let handler = resolution
            .method_missing
            .as_ref()
            .and_then(|lookup| lookup.method.as_ref());
        match handler {
            Some(handler) => call_method_missing(&*self.invoker, &CallTarget::direct(Arc::clone(handler)), call)
                .map(Outcome::Returned),
            None => Err(anyhow::Error::new(NoMethodError {
                name: Arc::from(call.name),
                class: self.resolver.class_name(resolution.lookup.class),
            })),
        }
    }

    /// What a cache branch for this resolution would hold, or `None` when the
    /// result must not be cached and every such call goes through here.
    fn build_branch(&self, options: &SiteOptions, resolution: &Resolution) -> Option<CachedBranch> {
        let lookup = &resolution.lookup;
        if !lookup.cacheable {
            return None;
        }
        match (&lookup.method, options.action) {
            (Some(method), DispatchAction::Invoke) => Some(CachedBranch::new(
                vec![Arc::clone(&lookup.assumption)],
                BranchTarget::Direct(self.invoker.prepare(method)),
            )),
            (Some(_), DispatchAction::CapabilityProbe) => Some(CachedBranch::new(
                vec![Arc::clone(&lookup.assumption)],
                BranchTarget::Probe,
            )),
            (None, DispatchAction::Invoke) if options.missing == MissingBehavior::CallMethodMissing => {
                let handler = resolution.method_missing.as_ref()?;
                let method = handler.method.as_ref()?;
                if !handler.cacheable {
                    return None;
                }
                Some(CachedBranch::new(
                    vec![Arc::clone(&lookup.assumption), Arc::clone(&handler.assumption)],
                    BranchTarget::MethodMissing(self.invoker.prepare(method)),
                ))
            }
            _ => None,
        }
    }

    /// Decide the chain that should follow `current` after this call.
    ///
    /// Returns `None` when `current` already says everything worth saying,
    /// including when another thread installed the same specialization first.
    pub(crate) fn specialize(
        &self,
        current: &ChainSnapshot,
        site_name: &Arc<str>,
        call: &Call<'_>,
        options: &SiteOptions,
        resolution: &Resolution,
        stats: &CallSiteStats,
    ) -> Option<ChainSnapshot> {
        if current.is_megamorphic() {
            return None;
        }
        let shape = resolution.shape;

        if let Some(index) = current.position(call.name, shape) {
            return self.update_in_place(current, index, call, options, resolution, stats);
        }

        let branch = self.build_branch(options, resolution)?;
        if current.installed() >= self.max_chain_length {
            info!(
                target: "sendcache::dispatch::megamorphic",
                method = call.name,
                shape = %shape,
                installed = current.installed(),
                max = self.max_chain_length,
                "call site went megamorphic"
            );
            return Some(ChainSnapshot::megamorphic(current.installed()));
        }

        let name = if site_name.as_ref() == call.name {
            Arc::clone(site_name)
        } else {
            Arc::from(call.name)
        };
        let node = match shape {
            Shape::Bool(value) => CacheNode::Boolean(BooleanNode::with_branch(Guard::boolean(name), value, branch)),
            other => CacheNode::Single(SingleNode::new(Guard::exact(name, other), branch)),
        };
        let mut nodes = current.to_nodes();
        nodes.push(node);
        stats.install();
        debug!(
            target: "sendcache::dispatch::install",
            method = call.name,
            shape = %shape,
            nodes = nodes.len(),
            "installed cache node"
        );
        Some(ChainSnapshot::from_nodes(nodes, current.installed() + 1))
    }

    /// Merge into, repair, or refill the node already covering this shape.
    /// The installed count is left alone.
    fn update_in_place(
        &self,
        current: &ChainSnapshot,
        index: usize,
        call: &Call<'_>,
        options: &SiteOptions,
        resolution: &Resolution,
        stats: &CallSiteStats,
    ) -> Option<ChainSnapshot> {
        let shape = resolution.shape;
        let mut nodes = current.to_nodes();
        match &mut nodes[index] {
            CacheNode::Boolean(node) => {
                let Shape::Bool(value) = shape else {
                    return None;
                };
                let slot = node.branch_mut(value);
                match slot.as_ref().map(CachedBranch::is_valid) {
                    Some(true) => return None,
                    Some(false) => {
                        *slot = self.build_branch(options, resolution);
                        debug!(
                            target: "sendcache::dispatch::repair",
                            method = call.name,
                            branch = value,
                            cached = slot.is_some(),
                            "repaired boolean branch"
                        );
                    }
                    None => {
                        *slot = Some(self.build_branch(options, resolution)?);
                        stats.merge();
                        debug!(
                            target: "sendcache::dispatch::install",
                            method = call.name,
                            branch = value,
                            "merged branch into boolean node"
                        );
                    }
                }
            }
            CacheNode::Single(node) => match node.branch.as_ref().map(CachedBranch::is_valid) {
                Some(true) => return None,
                Some(false) => {
                    node.branch = self.build_branch(options, resolution);
                    debug!(
                        target: "sendcache::dispatch::repair",
                        method = call.name,
                        shape = %shape,
                        cached = node.branch.is_some(),
                        "repaired cache node"
                    );
                }
                None => {
                    node.branch = Some(self.build_branch(options, resolution)?);
                    debug!(
                        target: "sendcache::dispatch::install",
                        method = call.name,
                        shape = %shape,
                        "refilled open cache node"
                    );
                }
            },
        }
        Some(ChainSnapshot::from_nodes(nodes, current.installed()))
    }
}
