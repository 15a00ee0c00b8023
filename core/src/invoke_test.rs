use std::sync::Arc;

use anyhow::{Result, anyhow};

use crate::dispatch::Call;
use crate::invoke::{DirectInvoker, Invoker};
use crate::method::{ClassRegistry, MethodDef, builtin};
use crate::val::Value;

#[test]
fn prepare_clones_only_when_requested_and_allowed() -> Result<()> {
    let registry = ClassRegistry::new();
    let plain = registry.define_method(builtin::INTEGER, MethodDef::constant("plain", Value::Int(1)))?;
    let hot = registry.define_method(builtin::INTEGER, MethodDef::constant("hot", Value::Int(2)).always_clone())?;

    let invoker = DirectInvoker::new(true);
    assert!(!invoker.prepare(&plain).is_cloned());
    let cloned = invoker.prepare(&hot);
    assert!(cloned.is_cloned());
    assert!(!Arc::ptr_eq(cloned.method(), &hot));
    assert_ne!(cloned.method().id(), hot.id());
    assert_eq!(invoker.clones(), 1);

    let no_clone = DirectInvoker::new(false);
    assert!(!no_clone.prepare(&hot).is_cloned());
    assert_eq!(no_clone.clones(), 0);
    Ok(())
}

#[test]
fn racing_clones_are_equivalent() -> Result<()> {
    let registry = ClassRegistry::new();
    let hot = registry.define_method(
        builtin::INTEGER,
        MethodDef::new("double", |recv, _, _| match recv {
            Value::Int(i) => Ok(Value::Int(i * 2)),
            other => Err(anyhow!("unexpected receiver {other}")),
        })
        .always_clone(),
    )?;
    let invoker = DirectInvoker::default();
    let first = invoker.prepare(&hot);
    let second = invoker.prepare(&hot);

    let receiver = Value::Int(21);
    let call = Call::new("double", &receiver, &[], None);
    assert_eq!(invoker.invoke(&first, &call)?, invoker.invoke(&second, &call)?);
    assert_eq!(invoker.invocations(), 2);
    Ok(())
}

#[test]
fn invoke_propagates_failures_verbatim() -> Result<()> {
    let registry = ClassRegistry::new();
    let failing = registry.define_method(
        builtin::NIL_CLASS,
        MethodDef::new("boom", |_, _, _| Err(anyhow!("kaboom"))),
    )?;
    let invoker = DirectInvoker::default();
    let receiver = Value::Nil;
    let err = invoker
        .invoke(&invoker.prepare(&failing), &Call::new("boom", &receiver, &[], None))
        .unwrap_err();
    assert_eq!(err.to_string(), "kaboom");
    Ok(())
}
