use std::sync::Arc;

use anyhow::anyhow;

use crate::config::DispatchConfig;
use crate::invoke::DirectInvoker;
use crate::method::{ClassRegistry, MethodDef};
use crate::val::{ClassId, Value};

use super::DispatchContext;

pub(super) struct Runtime {
    pub(super) registry: Arc<ClassRegistry>,
    pub(super) invoker: Arc<DirectInvoker>,
    pub(super) ctx: DispatchContext,
}

pub(super) fn runtime(max_chain_length: usize) -> Runtime {
    let config = DispatchConfig::default().with_max_chain_length(max_chain_length);
    let registry = Arc::new(ClassRegistry::new());
    let invoker = Arc::new(DirectInvoker::new(config.allow_cloning));
    let ctx = DispatchContext::new(registry.clone(), invoker.clone(), config);
    Runtime { registry, invoker, ctx }
}

/// Method returning `tag` paired with its first argument, so tests can tell
/// targets apart and see that arguments arrive unchanged.
pub(super) fn tagged(name: &str, tag: &'static str) -> MethodDef {
    MethodDef::new(name, move |_, args, _| {
        Ok(match args.first() {
            Some(arg) => Value::str(format!("{tag}:{arg}")),
            None => Value::str(tag),
        })
    })
}

pub(super) fn failing(name: &str, message: &'static str) -> MethodDef {
    MethodDef::new(name, move |_, _, _| Err(anyhow!(message)))
}

/// `method_missing` echoing the missing name and argument count.
pub(super) fn echo_missing() -> MethodDef {
    MethodDef::new("method_missing", |_, args, _| {
        let name = args.first().cloned().unwrap_or_default();
        Ok(Value::str(format!("missing {name} with {}", args.len() - 1)))
    })
    .private()
}

pub(super) fn class(runtime: &Runtime, name: &str) -> ClassId {
    runtime.registry.define_class(name, None).expect("define class")
}
