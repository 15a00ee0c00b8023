use std::sync::Barrier;
use std::thread;

use anyhow::Result;

use crate::method::builtin;
use crate::val::Value;

use super::test_support::{class, runtime, tagged};
use super::{CallSite, ChainState};

const THREADS: usize = 8;
const ROUNDS: usize = 500;

#[test]
fn racing_first_calls_install_one_node() -> Result<()> {
    let rt = runtime(8);
    rt.registry.define_method(builtin::INTEGER, tagged("succ", "int"))?;
    let site = CallSite::new("succ", &rt.ctx);
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                barrier.wait();
                let outcome = site.call(&Value::Int(3), &[]).expect("call succeeds");
                assert_eq!(outcome.into_value(), Some(Value::str("int")));
            });
        }
    });

    assert_eq!(site.node_count(), 1);
    assert_eq!(site.installed(), 1);
    assert_eq!(site.stats().installs, 1);
    Ok(())
}

#[test]
fn mixed_receivers_respect_the_bound() -> Result<()> {
    let rt = runtime(3);
    let classes: Vec<_> = (0..6).map(|i| class(&rt, &format!("Racer{i}"))).collect();
    for &id in &classes {
        rt.registry.define_method(id, tagged("run", "ok"))?;
    }
    rt.registry.define_method(builtin::TRUE_CLASS, tagged("run", "ok"))?;
    rt.registry.define_method(builtin::FALSE_CLASS, tagged("run", "ok"))?;
    let site = CallSite::new("run", &rt.ctx);
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
        for t in 0..THREADS {
            let (site, barrier, classes) = (&site, &barrier, &classes);
            scope.spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    let receiver = match (t + round) % 4 {
                        0 => Value::Bool(round % 2 == 0),
                        _ => Value::object(classes[(t * 7 + round) % classes.len()]),
                    };
                    let outcome = site.call(&receiver, &[]).expect("call succeeds");
                    assert_eq!(outcome.into_value(), Some(Value::str("ok")));
                }
            });
        }
    });

    assert!(site.installed() <= 3);
    assert_eq!(site.state(), ChainState::Megamorphic);
    Ok(())
}

#[test]
fn redefinition_while_calling_never_yields_a_stale_failure() -> Result<()> {
    let rt = runtime(8);
    let target = class(&rt, "Moving");
    rt.registry.define_method(target, tagged("pos", "v0"))?;
    let site = CallSite::new("pos", &rt.ctx);
    let receiver = Value::object(target);
    let barrier = Barrier::new(THREADS + 1);
    let versions: Vec<&'static str> = vec!["v0", "v1", "v2", "v3", "v4", "v5"];

    thread::scope(|scope| {
        for _ in 0..THREADS {
            let (site, barrier, receiver, versions) = (&site, &barrier, &receiver, &versions);
            scope.spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let value = site.call(receiver, &[]).expect("call succeeds").into_value();
                    assert!(
                        versions.iter().any(|v| value == Some(Value::str(v))),
                        "unexpected result {value:?}"
                    );
                }
            });
        }
        barrier.wait();
        for &version in &versions[1..] {
            rt.registry
                .define_method(target, tagged("pos", version))
                .expect("redefine");
            thread::yield_now();
        }
    });

    // Once writers are done, the next call sees the final definition and the
    // node is still the one repaired in place.
    let last = site.call(&receiver, &[])?.into_value();
    assert_eq!(last, Some(Value::str("v5")));
    assert_eq!(site.node_count(), 1);
    assert_eq!(site.installed(), 1);
    Ok(())
}

#[test]
fn sites_are_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<CallSite>();
}
