use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use sendcache_core::{CallSite, ClassRegistry, DispatchConfig, DispatchContext, MethodDef, Value, builtin};

fn context(max_chain_length: usize) -> (Arc<ClassRegistry>, DispatchContext) {
    let registry = Arc::new(ClassRegistry::new());
    let config = DispatchConfig::default().with_max_chain_length(max_chain_length);
    let ctx = DispatchContext::direct(registry.clone(), config);
    (registry, ctx)
}

fn dispatch_bench(c: &mut Criterion) {
    let (registry, ctx) = context(8);
    registry
        .define_method(builtin::INTEGER, MethodDef::new("succ", |recv, _, _| match recv {
            Value::Int(n) => Ok(Value::Int(n + 1)),
            _ => Ok(Value::Nil),
        }))
        .unwrap();
    let site = CallSite::new("succ", &ctx);
    let receiver = Value::Int(41);
    site.call(&receiver, &[]).unwrap();
    c.bench_function("monomorphic_hit", |b| {
        b.iter(|| black_box(site.call(black_box(&receiver), &[]).unwrap()))
    });

    registry
        .define_method(builtin::TRUE_CLASS, MethodDef::constant("flip", Value::Bool(false)))
        .unwrap();
    registry
        .define_method(builtin::FALSE_CLASS, MethodDef::constant("flip", Value::Bool(true)))
        .unwrap();
    let site = CallSite::new("flip", &ctx);
    let receivers = [Value::Bool(true), Value::Bool(false)];
    for receiver in &receivers {
        site.call(receiver, &[]).unwrap();
    }
    c.bench_function("boolean_node_alternating", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = i.wrapping_add(1);
            black_box(site.call(&receivers[i & 1], &[]).unwrap())
        })
    });

    // Four classes through a two-entry chain: every call after warmup is a full lookup.
    let (registry, ctx) = context(2);
    let receivers: Vec<Value> = (0..4)
        .map(|i| {
            let class = registry.define_class(&format!("Shape{i}"), None).unwrap();
            registry.define_method(class, MethodDef::constant("area", Value::Int(i))).unwrap();
            Value::object(class)
        })
        .collect();
    let site = CallSite::new("area", &ctx);
    for receiver in &receivers {
        site.call(receiver, &[]).unwrap();
    }
    c.bench_function("megamorphic_lookup", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = i.wrapping_add(1);
            black_box(site.call(&receivers[i & 3], &[]).unwrap())
        })
    });
}

criterion_group!(benches, dispatch_bench);
criterion_main!(benches);
