pub mod assumption;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod invoke;
pub mod method;
pub mod val;

#[cfg(test)]
mod invoke_test;

pub use assumption::{Assumption, CyclicAssumption, InvalidAssumption};
pub use config::DispatchConfig;
pub use dispatch::{
    BranchReport, Call, CallSite, ChainReport, ChainState, DispatchAction, DispatchContext, MissingBehavior,
    NodeReport, Outcome, SiteOptions, StatsSnapshot,
};
pub use error::NoMethodError;
pub use invoke::{CallTarget, DirectInvoker, Invoker};
pub use method::{ClassRegistry, Method, MethodDef, MethodResolver, builtin};
pub use val::{ClassId, Shape, Value};
