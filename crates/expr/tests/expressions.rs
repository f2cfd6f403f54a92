//! End-to-end expression evaluation against small datasets.

use indexmap::IndexMap;

use conflux_expr::{ExprError, ExpressionEval, Value, ValueKind};
use conflux_mesh::{
    examples, Association, Coordset, Dataset, DatasetHandle, Domain, Field, FieldValues, Topology,
    TopologyKind,
};

/// 1D uniform mesh with vertices at x = 0, 1, 2, ... and one vertex
/// field `f`.
fn line_dataset(values: Vec<f64>) -> DatasetHandle {
    let n = values.len();
    let mut coordsets = IndexMap::new();
    coordsets.insert(
        "coords".to_string(),
        Coordset::Uniform {
            dims: vec![n],
            origin: vec![0.0],
            spacing: vec![1.0],
        },
    );
    let mut topologies = IndexMap::new();
    topologies.insert(
        "mesh".to_string(),
        Topology {
            coordset: "coords".to_string(),
            kind: TopologyKind::Uniform,
        },
    );
    let mut fields = IndexMap::new();
    fields.insert(
        "f".to_string(),
        Field {
            association: Association::Vertex,
            topology: "mesh".to_string(),
            values: FieldValues::Float64(values),
        },
    );
    let mut dom = Domain {
        coordsets,
        topologies,
        fields,
        state: Default::default(),
    };
    dom.state.cycle = Some(100);
    dom.state.domain_id = Some(0);
    Dataset { domains: vec![dom] }.into_handle()
}

#[test]
fn test_field_max_with_attributes() {
    let mut eval = ExpressionEval::new(line_dataset(vec![1.0, 3.0, 2.0])).unwrap();
    let res = eval.evaluate("max(\"f\")").unwrap();

    assert_eq!(res.type_name(), "scalar");
    assert_eq!(res.value, Value::Double(3.0));
    assert_eq!(res.atts.position, Some([1.0, 0.0, 0.0]));
    assert_eq!(res.atts.domain_id, Some(0));
    assert_eq!(res.atts.rank, Some(0));
}

#[test]
fn test_double_arithmetic() {
    let mut eval = ExpressionEval::new(line_dataset(vec![0.0])).unwrap();
    let res = eval.evaluate("(2.0 + 1) / 0.5").unwrap();
    assert_eq!(res.value, Value::Double(6.0));
    assert_eq!(res.type_name(), "scalar");
}

#[test]
fn test_integer_division_preserved() {
    let mut eval = ExpressionEval::new(line_dataset(vec![0.0])).unwrap();
    let res = eval.evaluate("(2 + 1) / 2").unwrap();
    assert_eq!(res.value, Value::Int(1), "integer division until a double appears");
}

#[test]
fn test_integer_division_by_zero_fails() {
    let mut eval = ExpressionEval::new(line_dataset(vec![0.0])).unwrap();
    assert!(eval.evaluate("1 / 0").is_err());
}

#[test]
fn test_modulo_and_unary() {
    let mut eval = ExpressionEval::new(line_dataset(vec![0.0])).unwrap();
    assert_eq!(eval.evaluate("7 % 3").unwrap().value, Value::Int(1));
    assert_eq!(eval.evaluate("-(2 + 3)").unwrap().value, Value::Int(-5));
    assert_eq!(eval.evaluate("!(1 < 2)").unwrap().value, Value::Bool(false));
}

#[test]
fn test_comparisons_and_logic() {
    let mut eval = ExpressionEval::new(line_dataset(vec![0.0])).unwrap();
    assert_eq!(eval.evaluate("1 < 2").unwrap().value, Value::Bool(true));
    assert_eq!(
        eval.evaluate("1 < 2 and 3 <= 2").unwrap().value,
        Value::Bool(false)
    );
    assert_eq!(
        eval.evaluate("1 < 2 or 3 <= 2").unwrap().value,
        Value::Bool(true)
    );
    assert_eq!(eval.evaluate("2 == 2").unwrap().value, Value::Bool(true));
    assert_eq!(eval.evaluate("2 != 2").unwrap().value, Value::Bool(false));
}

#[test]
fn test_if_then_else() {
    let mut eval = ExpressionEval::new(line_dataset(vec![0.0])).unwrap();
    let res = eval.evaluate("if 1 < 2 then 10 else 20").unwrap();
    assert_eq!(res.value, Value::Int(10));
    let res = eval.evaluate("if 1 > 2 then 10 else 20").unwrap();
    assert_eq!(res.value, Value::Int(20));
}

#[test]
fn test_histogram_and_entropy() {
    let mut eval =
        ExpressionEval::new(line_dataset(vec![0.0, 0.0, 1.0, 1.0, 1.0, 2.0])).unwrap();

    let hist = eval
        .evaluate_named("histogram(\"f\", 0.0, 3.0, 3)", Some("h"))
        .unwrap();
    match &hist.value {
        Value::Histogram(h) => {
            assert_eq!(h.bins, vec![2.0, 3.0, 1.0]);
            assert_eq!(h.min_val, 0.0);
            assert_eq!(h.max_val, 3.0);
        }
        other => panic!("expected histogram, got {other:?}"),
    }

    let entropy = eval.evaluate("entropy(h)").unwrap();
    let expected = -((1.0 / 3.0f64) * (1.0 / 3.0f64).ln()
        + 0.5 * 0.5f64.ln()
        + (1.0 / 6.0f64) * (1.0 / 6.0f64).ln());
    match entropy.value {
        Value::Double(v) => assert!((v - expected).abs() < 1e-12),
        other => panic!("expected double, got {other:?}"),
    }
}

#[test]
fn test_histogram_auto_range_keeps_every_sample() {
    let mut eval = ExpressionEval::new(line_dataset(vec![0.0, 1.0, 2.0, 3.0])).unwrap();
    let res = eval.evaluate("histogram(\"f\", 4)").unwrap();
    match &res.value {
        Value::Histogram(h) => {
            assert_eq!(h.bins.iter().sum::<f64>(), 4.0, "max sample included");
        }
        other => panic!("expected histogram, got {other:?}"),
    }
}

#[test]
fn test_quantile_pipeline() {
    let mut eval = ExpressionEval::new(line_dataset(vec![0.5, 1.5, 2.5, 3.5])).unwrap();
    let res = eval
        .evaluate("quantile(cdf(histogram(\"f\", 0.0, 4.0, 4)), 0.5, \"midpoint\")")
        .unwrap();
    // cdf = [0.25, 0.5, 0.75, 1.0]; q=0.5 sits at bin 1, midpoint 1.5
    assert_eq!(res.value, Value::Double(1.5));
}

#[test]
fn test_named_results_cache_and_identifiers() {
    let dataset = examples::braid(5).into_handle();
    let mut eval = ExpressionEval::new(dataset).unwrap();

    let max = eval.evaluate_named("max(\"braid\")", Some("mx_b")).unwrap();
    let pos = eval.evaluate("position(mx_b)").unwrap();

    assert_eq!(pos.kind, ValueKind::Vector);
    assert_eq!(pos.value, Value::Vector(max.atts.position.unwrap()));

    // identifiers resolve to the most recent entry
    eval.evaluate_named("1", Some("mx_b")).unwrap();
    let shadowed = eval.evaluate("mx_b").unwrap();
    assert_eq!(shadowed.value, Value::Int(1));

    // the full history stays in the cache
    let cache = eval.cache();
    let cache = cache.read().unwrap();
    assert_eq!(cache.history("mx_b").unwrap().len(), 2);
}

#[test]
fn test_member_access() {
    let mut eval = ExpressionEval::new(line_dataset(vec![1.0, 5.0, 3.0])).unwrap();
    eval.evaluate_named("max(\"f\")", Some("mx")).unwrap();

    assert_eq!(
        eval.evaluate("mx.value").unwrap().value,
        Value::Double(5.0)
    );
    assert_eq!(
        eval.evaluate("mx.position").unwrap().value,
        Value::Vector([1.0, 0.0, 0.0])
    );
    assert_eq!(eval.evaluate("mx.domain_id").unwrap().value, Value::Int(0));
}

#[test]
fn test_sum_avg_counts() {
    let mut eval =
        ExpressionEval::new(line_dataset(vec![1.0, 2.0, 3.0, 4.0])).unwrap();

    let sum = eval.evaluate_named("sum(\"f\")", Some("s")).unwrap();
    assert_eq!(sum.value, Value::Double(10.0));
    assert_eq!(sum.atts.count, Some(4));

    assert_eq!(eval.evaluate("avg(\"f\")").unwrap().value, Value::Double(2.5));
    assert_eq!(eval.evaluate("s.count").unwrap().value, Value::Int(4));
}

#[test]
fn test_cycle() {
    let mut eval = ExpressionEval::new(line_dataset(vec![0.0])).unwrap();
    assert_eq!(eval.evaluate("cycle()").unwrap().value, Value::Int(100));
}

#[test]
fn test_nan_inf_counts() {
    let mut eval = ExpressionEval::new(line_dataset(vec![
        1.0,
        f64::NAN,
        f64::INFINITY,
    ]))
    .unwrap();
    assert_eq!(eval.evaluate("nan_count(\"f\")").unwrap().value, Value::Int(1));
    assert_eq!(eval.evaluate("inf_count(\"f\")").unwrap().value, Value::Int(1));
}

#[test]
fn test_vector_arithmetic_and_magnitude() {
    let mut eval = ExpressionEval::new(line_dataset(vec![0.0])).unwrap();

    let res = eval.evaluate("magnitude(vector(1, 1, 1) - vector(0, 0, 1))").unwrap();
    assert_eq!(res.value, Value::Double(2.0f64.sqrt()));

    let scaled = eval.evaluate("vector(1, 2, 3) * 2").unwrap();
    assert_eq!(scaled.value, Value::Vector([2.0, 4.0, 6.0]));

    let halved = eval.evaluate("vector(2, 4, 6) / 2").unwrap();
    assert_eq!(halved.value, Value::Vector([1.0, 2.0, 3.0]));

    // vectors do not compare
    assert!(matches!(
        eval.evaluate("vector(1, 1, 1) * vector(1, 1, 1)").unwrap_err(),
        ExprError::TypeError(_)
    ));
}

#[test]
fn test_scalar_math_builtins() {
    let mut eval = ExpressionEval::new(line_dataset(vec![0.0])).unwrap();

    assert_eq!(eval.evaluate("abs(-3)").unwrap().value, Value::Int(3));
    assert_eq!(eval.evaluate("abs(-3.5)").unwrap().value, Value::Double(3.5));
    assert_eq!(eval.evaluate("sqrt(9.0)").unwrap().value, Value::Double(3.0));
    assert_eq!(
        eval.evaluate("pow(2, 10)").unwrap().value,
        Value::Double(1024.0)
    );
    let e = eval.evaluate("log(exp(1.0))").unwrap();
    assert!((e.value.as_f64().unwrap() - 1.0).abs() < 1e-12);

    assert!(eval.evaluate("sqrt(-1.0)").is_err());
    assert!(eval.evaluate("log(0.0)").is_err());
}

#[test]
fn test_position_arithmetic() {
    // the max of f sits at x = 1; distance from the origin is 1
    let mut eval = ExpressionEval::new(line_dataset(vec![0.0, 9.0, 3.0])).unwrap();
    eval.evaluate_named("max(\"f\")", Some("mx")).unwrap();
    let res = eval.evaluate("magnitude(position(mx))").unwrap();
    assert_eq!(res.value, Value::Double(1.0));
}

#[test]
fn test_scalar_max_min_overloads() {
    let mut eval = ExpressionEval::new(line_dataset(vec![0.0])).unwrap();
    assert_eq!(eval.evaluate("max(1, 2)").unwrap().value, Value::Int(2));
    assert_eq!(
        eval.evaluate("min(1.5, 2)").unwrap().value,
        Value::Double(1.5)
    );
}

#[test]
fn test_binning_and_paint_round_trip() {
    let dataset = line_dataset(vec![1.0, 2.0, 3.0, 4.0]);
    let mut eval = ExpressionEval::new(dataset.clone()).unwrap();

    let b = eval
        .evaluate_named("binning(\"f\", \"sum\", \"x\")", Some("b"))
        .unwrap();
    let bins = match &b.value {
        Value::Binning(binning) => binning.bins.clone(),
        other => panic!("expected binning, got {other:?}"),
    };
    assert_eq!(bins.iter().sum::<f64>(), 10.0);

    let painted = eval.evaluate("paint_binning(b)").unwrap();
    assert_eq!(painted.value, Value::Str("f_sum".to_string()));

    // the derived field landed on the published dataset
    let ds = dataset.read().unwrap();
    assert!(ds.domains[0].fields.contains_key("f_sum"));
}

#[test]
fn test_error_kinds() {
    let mut eval = ExpressionEval::new(line_dataset(vec![0.0])).unwrap();

    assert!(matches!(
        eval.evaluate("max(1,").unwrap_err(),
        ExprError::Parse(_)
    ));
    assert!(matches!(
        eval.evaluate("banana").unwrap_err(),
        ExprError::UnknownIdentifier(_)
    ));
    assert!(matches!(
        eval.evaluate("banana(1)").unwrap_err(),
        ExprError::UnknownFunction(_)
    ));
    assert!(matches!(
        eval.evaluate("max(1, 2, 3)").unwrap_err(),
        ExprError::ArityMismatch { .. }
    ));
    assert!(matches!(
        eval.evaluate("max(1, \"f\")").unwrap_err(),
        ExprError::NoMatchingOverload { .. }
    ));
    assert!(matches!(
        eval.evaluate("1 + \"f\"").unwrap_err(),
        ExprError::TypeError(_)
    ));
    // missing field surfaces from the reduction
    assert!(eval.evaluate("max(\"missing\")").is_err());
}
