//! Cache node variants and the lock-free chain walk.
//!
//! Nodes are frozen once built. Repairs and installs produce new nodes inside
//! a new chain snapshot; nothing here is ever written after publication except
//! the relaxed profiling counters.

use std::sync::Arc;

use anyhow::Result;

use crate::assumption::Assumption;
use crate::invoke::{CallTarget, Invoker};
use crate::method::METHOD_MISSING;
use crate::val::{Shape, Value};

use super::guard::Guard;
use super::profile::BranchProfile;
use super::{Call, DispatchAction, Outcome};

#[cold]
#[track_caller]
fn malformed_chain(detail: &str) -> ! {
    panic!("malformed dispatch chain: {detail}")
}

#[derive(Clone)]
pub(crate) enum BranchTarget {
    Direct(CallTarget),
    /// Receiver lacks the method; call its `method_missing` instead.
    MethodMissing(CallTarget),
    /// Built for capability-probe sites; nothing to invoke.
    Probe,
}

/// One resolved receiver sub-case and the assumptions keeping it valid.
#[derive(Clone)]
pub(crate) struct CachedBranch {
    pub(crate) assumptions: Box<[Arc<Assumption>]>,
    pub(crate) target: BranchTarget,
    pub(crate) profile: Arc<BranchProfile>,
}

impl CachedBranch {
    pub(crate) fn new(assumptions: Vec<Arc<Assumption>>, target: BranchTarget) -> Self {
        Self {
            assumptions: assumptions.into_boxed_slice(),
            target,
            profile: Arc::new(BranchProfile::default()),
        }
    }

    #[inline(always)]
    pub(crate) fn is_valid(&self) -> bool {
        self.assumptions.iter().all(|assumption| assumption.is_valid())
    }

    #[inline]
    fn run(&self, call: &Call<'_>, action: DispatchAction, invoker: &dyn Invoker) -> NodeResult {
        self.profile.enter();
        if !self.is_valid() {
            return NodeResult::Invalid;
        }
        match (action, &self.target) {
            (DispatchAction::Invoke, BranchTarget::Direct(target)) => {
                NodeResult::Hit(invoker.invoke(target, call).map(Outcome::Returned))
            }
            (DispatchAction::Invoke, BranchTarget::MethodMissing(target)) => {
                NodeResult::Hit(call_method_missing(invoker, target, call).map(Outcome::Returned))
            }
            (DispatchAction::Invoke, BranchTarget::Probe) => malformed_chain("invoke reached a branch with no call target"),
            (DispatchAction::CapabilityProbe, BranchTarget::Direct(_) | BranchTarget::Probe) => {
                NodeResult::Hit(Ok(Outcome::Responds(true)))
            }
            (DispatchAction::CapabilityProbe, BranchTarget::MethodMissing(_)) => {
                malformed_chain("capability probe reached a method_missing branch")
            }
        }
    }
}

/// Invoke `target` as `method_missing(:name, *args)` for `call`.
pub(crate) fn call_method_missing(invoker: &dyn Invoker, target: &CallTarget, call: &Call<'_>) -> Result<Value> {
    let mut args = Vec::with_capacity(call.args.len() + 1);
    args.push(Value::symbol(call.name));
    args.extend_from_slice(call.args);
    let forwarded = Call::new(&METHOD_MISSING, call.receiver, &args, call.block);
    invoker.invoke(target, &forwarded)
}

/// Two-branch node for the closed boolean domain. Either branch may be open
/// (not cached yet, or repaired to "nothing cacheable").
#[derive(Clone)]
pub(crate) struct BooleanNode {
    pub(crate) guard: Guard,
    pub(crate) false_branch: Option<CachedBranch>,
    pub(crate) true_branch: Option<CachedBranch>,
}

impl BooleanNode {
    pub(crate) fn with_branch(guard: Guard, value: bool, branch: CachedBranch) -> Self {
        let mut node = Self {
            guard,
            false_branch: None,
            true_branch: None,
        };
        *node.branch_mut(value) = Some(branch);
        node
    }

    #[inline]
    pub(crate) fn branch(&self, value: bool) -> Option<&CachedBranch> {
        if value { self.true_branch.as_ref() } else { self.false_branch.as_ref() }
    }

    pub(crate) fn branch_mut(&mut self, value: bool) -> &mut Option<CachedBranch> {
        if value { &mut self.true_branch } else { &mut self.false_branch }
    }

    #[inline]
    fn try_dispatch(&self, call: &Call<'_>, action: DispatchAction, invoker: &dyn Invoker) -> NodeResult {
        if !self.guard.matches(call.name, call.receiver) {
            return NodeResult::Miss;
        }
        let branch = match call.receiver {
            Value::Bool(true) => &self.true_branch,
            _ => &self.false_branch,
        };
        match branch {
            Some(branch) => branch.run(call, action, invoker),
            None => NodeResult::Open,
        }
    }
}

/// Node for exactly one non-boolean receiver shape. The branch is open once a
/// repair found nothing cacheable; the node keeps its slot in the chain.
#[derive(Clone)]
pub(crate) struct SingleNode {
    pub(crate) guard: Guard,
    pub(crate) branch: Option<CachedBranch>,
}

impl SingleNode {
    pub(crate) fn new(guard: Guard, branch: CachedBranch) -> Self {
        Self {
            guard,
            branch: Some(branch),
        }
    }

    #[inline]
    fn try_dispatch(&self, call: &Call<'_>, action: DispatchAction, invoker: &dyn Invoker) -> NodeResult {
        if !self.guard.matches(call.name, call.receiver) {
            return NodeResult::Miss;
        }
        match &self.branch {
            Some(branch) => branch.run(call, action, invoker),
            None => NodeResult::Open,
        }
    }
}

#[derive(Clone)]
pub(crate) enum CacheNode {
    Boolean(BooleanNode),
    Single(SingleNode),
}

impl CacheNode {
    #[inline]
    pub(crate) fn guard(&self) -> &Guard {
        match self {
            CacheNode::Boolean(node) => &node.guard,
            CacheNode::Single(node) => &node.guard,
        }
    }

    #[inline]
    pub(crate) fn covers(&self, name: &str, shape: Shape) -> bool {
        self.guard().covers(name, shape)
    }

    #[inline]
    fn try_dispatch(&self, call: &Call<'_>, action: DispatchAction, invoker: &dyn Invoker) -> NodeResult {
        match self {
            CacheNode::Boolean(node) => node.try_dispatch(call, action, invoker),
            CacheNode::Single(node) => node.try_dispatch(call, action, invoker),
        }
    }
}

pub(crate) enum NodeResult {
    /// Guard failed; try the next link.
    Miss,
    Hit(Result<Outcome>),
    /// Guard matched a branch with nothing cached.
    Open,
    /// Guard matched but an assumption no longer holds.
    Invalid,
}

/// Outcome of walking a whole chain.
pub(crate) enum ChainStep {
    Hit(Result<Outcome>),
    Generic,
    Repair,
    Megamorphic,
}

pub(crate) struct CachedLink {
    pub(crate) node: CacheNode,
    pub(crate) next: DispatchNode,
}

/// A chain link. Each cached link exclusively owns the rest of the chain.
pub(crate) enum DispatchNode {
    Cached(Box<CachedLink>),
    /// Terminal: full lookup on every call, no further specialization.
    Megamorphic,
    /// Terminal: resolve, maybe specialize, then dispatch.
    Generic,
}

impl DispatchNode {
    pub(crate) fn link(node: CacheNode, next: DispatchNode) -> Self {
        DispatchNode::Cached(Box::new(CachedLink { node, next }))
    }

    #[inline]
    pub(crate) fn execute(&self, call: &Call<'_>, action: DispatchAction, invoker: &dyn Invoker) -> ChainStep {
        let mut cursor = self;
        loop {
            match cursor {
                DispatchNode::Cached(link) => match link.node.try_dispatch(call, action, invoker) {
                    NodeResult::Miss => cursor = &link.next,
                    NodeResult::Hit(result) => return ChainStep::Hit(result),
                    NodeResult::Open => return ChainStep::Generic,
                    NodeResult::Invalid => return ChainStep::Repair,
                },
                DispatchNode::Megamorphic => return ChainStep::Megamorphic,
                DispatchNode::Generic => return ChainStep::Generic,
            }
        }
    }
}
