//! Scheduler behavior through the public API.

use std::sync::{Arc, Mutex};

use serde_json::json;

use conflux_flow::{
    DataBox, Filter, FilterContext, FilterInterface, FlowError, Reads, Registry, Workspace,
};
use conflux_foundation::{params, Params};

fn obj(v: serde_json::Value) -> Params {
    match v {
        serde_json::Value::Object(m) => m,
        _ => panic!("expected object"),
    }
}

struct SourceConst;

impl Filter for SourceConst {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("source_const").defaults(obj(json!({"value": 0})))
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> conflux_flow::Result<()> {
        ctx.set_output_value(params::require_i64(ctx.params(), "value")?);
        Ok(())
    }
}

struct Identity;

impl Filter for Identity {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("identity").ports(["in"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> conflux_flow::Result<()> {
        let v = *ctx.input_as::<i64>("in")?;
        ctx.set_output_value(v);
        Ok(())
    }
}

struct WantsFloat;

impl Filter for WantsFloat {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("wants_float").ports(["in"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> conflux_flow::Result<()> {
        let v = *ctx.input_as::<f64>("in")?;
        ctx.set_output_value(v);
        Ok(())
    }
}

fn workspace() -> Workspace {
    let mut w = Workspace::new();
    w.register_filter_type(|| Box::new(SourceConst)).unwrap();
    w.register_filter_type(|| Box::new(Identity)).unwrap();
    w.register_filter_type(|| Box::new(WantsFloat)).unwrap();
    w
}

#[test]
fn test_pass_through_registry_state() {
    let mut w = workspace();
    w.add_filter_with("source_const", Some("a"), obj(json!({"value": 42})))
        .unwrap();
    w.add_filter_named("identity", "b").unwrap();
    w.connect("a", "b", "in").unwrap();

    let report = w.execute().unwrap();
    assert_eq!(report.order, vec!["a", "b"]);
    assert!(!w.registry().has("a"), "consumed and released");
    assert_eq!(w.registry().reads("b"), Some(Reads::Count(0)), "drained orphan");
}

#[test]
fn test_one_producer_two_consumers() {
    let mut w = workspace();
    w.add_filter_with("source_const", Some("p"), obj(json!({"value": 1})))
        .unwrap();
    w.add_filter_named("identity", "c1").unwrap();
    w.add_filter_named("identity", "c2").unwrap();
    w.connect("p", "c1", "in").unwrap();
    w.connect("p", "c2", "in").unwrap();

    w.execute().unwrap();
    assert!(!w.registry().has("p"), "released after the second fetch");
}

#[test]
fn test_port_type_mismatch_surfaces_from_the_filter() {
    let mut w = workspace();
    w.add_filter_with("source_const", Some("ints"), obj(json!({"value": 3})))
        .unwrap();
    w.add_filter_named("wants_float", "f").unwrap();
    w.connect("ints", "f", "in").unwrap();

    match w.execute().unwrap_err() {
        FlowError::FilterFailed { filter, source, .. } => {
            assert_eq!(filter, "f");
            assert!(matches!(*source, FlowError::TypeMismatch { .. }));
        }
        other => panic!("expected filter failure, got {other}"),
    }
    assert!(!w.registry().has("ints"), "unwound on failure");
}

#[test]
fn test_construction_failures_per_contract() {
    let mut w = workspace();
    // duplicate type registration warns and keeps the first
    w.register_filter_type(|| Box::new(Identity)).unwrap();

    assert!(matches!(
        w.add_filter("missing").unwrap_err(),
        FlowError::UnknownFilterType(_)
    ));

    w.add_filter_named("source_const", "src").unwrap();
    w.add_filter_named("identity", "dst").unwrap();
    assert!(matches!(
        w.connect("src", "dst", "no_such_port").unwrap_err(),
        FlowError::PortNotFound { .. }
    ));
    // both sides untouched: the graph still executes once wired properly
    w.connect("src", "dst", "in").unwrap();
    w.execute().unwrap();
}

/// Registry drop order equals reverse insertion order of the final
/// shadowing entries, across a mixed add/fetch/shadow workout.
#[test]
fn test_registry_lifo_property() {
    struct Probe(u32, Arc<Mutex<Vec<u32>>>);
    impl Drop for Probe {
        fn drop(&mut self) {
            self.1.lock().unwrap().push(self.0);
        }
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let probe = |id: u32| DataBox::owned(Probe(id, log.clone()));

    let mut reg = Registry::new();
    reg.add("a", probe(0), Reads::Count(2));
    reg.add("b", probe(1), Reads::Count(1));
    reg.add("a", probe(2), Reads::Count(1)); // shadows entry 0
    reg.add("c", probe(3), Reads::Pinned);

    // fetch the shadowing "a" to exhaustion: it drops before any reset
    drop(reg.fetch("a").unwrap());
    assert_eq!(*log.lock().unwrap(), vec![2]);

    // reset drops the rest newest-first
    reg.reset();
    assert_eq!(*log.lock().unwrap(), vec![2, 3, 1, 0]);
}
