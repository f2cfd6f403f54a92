//! End-to-end tests across the whole workspace: publish a dataset,
//! evaluate expressions over it, paint derived fields, extract files.

use conflux_expr::Value;
use conflux_flow::{DataBox, Filter, FilterContext, FilterInterface, Reads, Workspace};
use conflux_foundation::Params;
use conflux_relay::RelaySave;
use conflux_tests::TestHarness;

/// `RUST_LOG=conflux_flow=trace cargo test` shows the scheduler at work.
fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The classic query flow: reduce, name the result, refer back to it.
#[test]
fn test_named_reduction_then_position() {
    trace_init();
    let mut h = TestHarness::braid(5);

    let max = h.evaluate_named("max(\"braid\")", "mx_b");
    assert_eq!(max.type_name(), "scalar");
    let max_pos = max.atts.position.expect("extremum carries its location");

    let pos = h.evaluate("position(mx_b)");
    assert_eq!(pos.value, Value::Vector(max_pos));

    // the cached value also composes into larger expressions
    let above = h.evaluate("mx_b > 0.0");
    assert_eq!(above.value, Value::Bool(max.value.as_f64().unwrap() > 0.0));
}

#[test]
fn test_histogram_over_braid() {
    trace_init();
    let mut h = TestHarness::braid(5);

    let hist = h.evaluate("histogram(\"braid\", 10)");
    match &hist.value {
        Value::Histogram(hist) => {
            assert_eq!(hist.bins.len(), 10);
            // auto-ranged histogram covers every vertex sample
            assert_eq!(hist.bins.iter().sum::<f64>(), 125.0);
        }
        other => panic!("expected histogram, got {other:?}"),
    }

    let entropy = h.evaluate("entropy(histogram(\"braid\", 10))");
    let e = entropy.value.as_f64().unwrap();
    assert!(e > 0.0 && e <= (10.0f64).ln(), "entropy bounded by ln(bins)");
}

#[test]
fn test_state_variables() {
    trace_init();
    let mut h = TestHarness::braid(3);
    assert_eq!(h.evaluate("cycle()").value, Value::Int(100));
    assert_eq!(h.evaluate("time()").value, Value::Double(1.0));
    assert_eq!(h.evaluate("cycle() % 50 == 0").value, Value::Bool(true));
}

#[test]
fn test_element_field_reductions() {
    trace_init();
    let mut h = TestHarness::braid(5);

    // radial is element-associated; the max sits in a corner element
    let max = h.evaluate("max(\"radial\")");
    let pos = max.atts.position.unwrap();
    let corner = 10.0 - 20.0 / 8.0; // element center next to the corner
    for axis in pos {
        assert!((axis.abs() - corner).abs() < 1e-9, "corner element center, got {pos:?}");
    }

    let avg = h.evaluate("avg(\"radial\")");
    let sum = h.evaluate_named("sum(\"radial\")", "s");
    let count = h.evaluate("s.count");
    assert_eq!(count.value, Value::Int(64));
    let expected_avg = sum.value.as_f64().unwrap() / 64.0;
    assert!((avg.value.as_f64().unwrap() - expected_avg).abs() < 1e-12);
}

#[test]
fn test_binning_paint_extract() {
    trace_init();
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("painted").display().to_string();

    let mut h = TestHarness::braid(5);

    // bin radial along x and paint the result back onto the mesh
    h.evaluate_named("binning(\"radial\", \"avg\", \"x\")", "b");
    let painted = h.evaluate("paint_binning(b)");
    assert_eq!(painted.value, Value::Str("radial_avg".to_string()));

    {
        let ds = h.dataset.read().unwrap();
        let field = &ds.domains[0].fields["radial_avg"];
        assert_eq!(field.values.len(), 64);
    }

    // extract the augmented dataset through a relay graph
    let mut w = Workspace::new();
    w.register_filter_type(|| Box::new(RelaySave)).unwrap();

    struct Published;
    impl Filter for Published {
        fn declare_interface(&self) -> FilterInterface {
            FilterInterface::new("published")
        }
        fn execute(&mut self, ctx: &mut FilterContext<'_>) -> conflux_flow::Result<()> {
            let handle = ctx.ambient::<std::sync::RwLock<conflux_mesh::Dataset>>("dataset")?;
            ctx.set_output(DataBox::borrowed(handle));
            Ok(())
        }
    }
    w.register_filter_type(|| Box::new(Published)).unwrap();

    w.publish("dataset", DataBox::borrowed(h.dataset.clone()));
    w.add_filter_named("published", "src").unwrap();
    let mut params = Params::new();
    params.insert("path".to_string(), serde_json::json!(base));
    w.add_filter_with("relay_save", Some("save"), params).unwrap();
    w.connect("src", "save", "in").unwrap();
    w.execute().unwrap();

    let dir = tmp.path().join("painted.cycle_000100");
    assert!(dir.join("domain_000000.json").is_file());

    let written: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.join("domain_000000.json")).unwrap(),
    )
    .unwrap();
    assert!(written["fields"].as_object().unwrap().contains_key("radial_avg"));
}

/// Custom filters and expression builtins share one workspace contract.
#[test]
fn test_custom_filters_alongside_builtins() {
    trace_init();
    struct Scale;
    impl Filter for Scale {
        fn declare_interface(&self) -> FilterInterface {
            FilterInterface::new("scale")
                .ports(["in"])
                .defaults({
                    let mut p = Params::new();
                    p.insert("factor".to_string(), serde_json::json!(2.0));
                    p
                })
        }
        fn execute(&mut self, ctx: &mut FilterContext<'_>) -> conflux_flow::Result<()> {
            let factor = conflux_foundation::params::require_f64(ctx.params(), "factor")?;
            let v = *ctx.input_as::<f64>("in")?;
            ctx.set_output_value(v * factor);
            Ok(())
        }
    }

    struct Publish42;
    impl Filter for Publish42 {
        fn declare_interface(&self) -> FilterInterface {
            FilterInterface::new("publish42")
        }
        fn execute(&mut self, ctx: &mut FilterContext<'_>) -> conflux_flow::Result<()> {
            ctx.set_output_value(42.0_f64);
            Ok(())
        }
    }

    let mut w = Workspace::new();
    w.register_filter_type(|| Box::new(Scale)).unwrap();
    w.register_filter_type(|| Box::new(Publish42)).unwrap();

    w.add_filter_named("publish42", "src").unwrap();
    w.add_filter_named("scale", "x2").unwrap();
    let mut params = Params::new();
    params.insert("factor".to_string(), serde_json::json!(10.0));
    w.add_filter_with("scale", Some("x10"), params).unwrap();
    w.connect("src", "x2", "in").unwrap();
    w.connect("x2", "x10", "in").unwrap();

    let report = w.execute().unwrap();
    assert_eq!(report.order, vec!["src", "x2", "x10"]);
    assert_eq!(
        *w.registry().peek("x10").unwrap().downcast_ref::<f64>().unwrap(),
        840.0
    );
    assert_eq!(w.registry().reads("x10"), Some(Reads::Count(0)));
}

/// Registry state after evaluation matches the read-count contract:
/// intermediate results are gone, only the pins and the root remain.
#[test]
fn test_evaluation_leaves_only_the_root() {
    trace_init();
    let mut h = TestHarness::braid(3);
    h.evaluate("(1 + 2) * (3 + 4)");

    // seven filters ran; every intermediate was consumed exactly once
    // and released, leaving the two pinned entries plus the root orphan
    let live: Vec<_> = h
        .eval
        .workspace()
        .registry()
        .live()
        .map(|(key, reads)| (key.to_string(), reads))
        .collect();
    assert_eq!(live.len(), 3);
    assert!(live.iter().any(|(k, r)| k == "dataset" && *r == Reads::Pinned));
    assert!(live.iter().any(|(k, r)| k == "cache" && *r == Reads::Pinned));
    assert!(live.iter().any(|(_, r)| *r == Reads::Count(0)));
}
