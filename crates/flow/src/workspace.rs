//! Workspace: graph + registry + filter-type table, and the scheduler.
//!
//! Execution is single-shot and single-threaded: the graph is ordered
//! topologically (Kahn, alphabetical tie-break so every rank of a
//! parallel job sees the same order), then each filter runs on the
//! calling thread. Outputs enter the registry with a read count equal to
//! the filter's downstream consumption and are released the moment the
//! last consumer fetches them.
//!
//! A filter failure unwinds: every registry entry produced by the
//! failed execution is released in reverse insertion order and the
//! error is re-raised. No partial results are retained.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use tracing::{debug, info, instrument, warn};

use conflux_foundation::Params;

use crate::data::DataBox;
use crate::error::{FlowError, Result};
use crate::filter::{FilterContext, FilterFactory, FilterTypeTable};
use crate::graph::{Graph, PortSource};
use crate::registry::{Reads, Registry};

/// What one execution did, for callers that need the order (tests,
/// cross-rank determinism checks).
#[derive(Debug, Clone, Default)]
pub struct ExecReport {
    /// Filters in the order they executed.
    pub order: Vec<String>,
}

/// Owns one graph, one registry, and the filter-type table.
#[derive(Default)]
pub struct Workspace {
    types: FilterTypeTable,
    graph: Graph,
    registry: Registry,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter type. Duplicates warn and keep the first
    /// registration.
    pub fn register_filter_type(&mut self, factory: FilterFactory) -> Result<()> {
        self.types.register(factory)
    }

    pub fn has_filter_type(&self, type_name: &str) -> bool {
        self.types.contains(type_name)
    }

    /// Add a filter with a generated name and default parameters.
    pub fn add_filter(&mut self, type_name: &str) -> Result<String> {
        self.graph.add_filter(&self.types, type_name, None, None)
    }

    /// Add a filter under an explicit name.
    pub fn add_filter_named(&mut self, type_name: &str, name: &str) -> Result<String> {
        self.graph
            .add_filter(&self.types, type_name, Some(name), None)
    }

    /// Add a filter with an explicit name and/or parameter overrides.
    pub fn add_filter_with(
        &mut self,
        type_name: &str,
        name: Option<&str>,
        params: Params,
    ) -> Result<String> {
        self.graph
            .add_filter(&self.types, type_name, name, Some(params))
    }

    pub fn connect(&mut self, src: &str, dst: &str, port: &str) -> Result<()> {
        self.graph.connect(src, dst, port)
    }

    pub fn connect_idx(&mut self, src: &str, dst: &str, idx: usize) -> Result<()> {
        self.graph.connect_idx(src, dst, idx)
    }

    pub fn mark_empty(&mut self, dst: &str, port: &str) -> Result<()> {
        self.graph.mark_empty(dst, port)
    }

    pub fn remove_filter(&mut self, name: &str) -> Result<()> {
        self.graph.remove_filter(name)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Deposit external data under a well-known key, pinned for the
    /// whole execution (never auto-freed).
    pub fn publish(&mut self, key: impl Into<String>, data: DataBox) {
        self.registry.add(key, data, Reads::Pinned);
    }

    /// Drop the graph and every registry entry.
    pub fn reset(&mut self) {
        self.graph.reset();
        self.registry.reset();
    }

    /// Human-readable dump: the graph plus the registry's live keys.
    pub fn info(&self) -> serde_json::Value {
        let registry: Vec<serde_json::Value> = self
            .registry
            .live()
            .map(|(key, reads)| {
                serde_json::json!({
                    "key": key,
                    "reads": match reads {
                        Reads::Pinned => -1,
                        Reads::Count(n) => n as i64,
                    },
                })
            })
            .collect();
        serde_json::json!({
            "graph": self.graph.info(),
            "registry": registry,
            "filter_types": self.types.names().collect::<Vec<_>>(),
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.info()).unwrap_or_default()
    }

    /// Execute the graph to completion.
    #[instrument(skip(self), fields(filters = self.graph.len()))]
    pub fn execute(&mut self) -> Result<ExecReport> {
        self.validate()?;
        let order = self.topological_order()?;
        let consumers = self.consumer_counts();

        debug!(?order, "execution order");

        let mark = self.registry.mark();
        let mut report = ExecReport::default();

        for name in &order {
            if let Err(err) = self.run_filter(name, &consumers) {
                let type_name = self
                    .graph
                    .interface(name)
                    .map(|i| i.type_name.clone())
                    .unwrap_or_default();
                warn!(filter = %name, %err, "filter failed, unwinding");
                self.registry.release_since(mark);
                return Err(FlowError::FilterFailed {
                    filter: name.clone(),
                    type_name,
                    source: Box::new(err),
                });
            }
            report.order.push(name.clone());
        }

        // drain: leftover positive-read entries are legal (the evaluator
        // extracts results by name) but worth a line in the log
        for (key, reads) in self.registry.live() {
            if let Reads::Count(n) = reads {
                if n > 0 {
                    info!(key, remaining = n, "orphaned registry entry after execution");
                }
            }
        }

        Ok(report)
    }

    /// Pre-flight checks: every port bound or explicitly empty, every
    /// producer still present and output-capable.
    fn validate(&self) -> Result<()> {
        for name in self.graph.filter_names() {
            let ports = self.graph.edges_in(name).expect("filter has a port table");
            for (port, source) in ports {
                match source {
                    PortSource::Unbound => {
                        return Err(FlowError::DisconnectedPort {
                            filter: name.to_string(),
                            port: port.clone(),
                        });
                    }
                    PortSource::Empty => {}
                    PortSource::Producer(producer) => {
                        let iface = self
                            .graph
                            .interface(producer)
                            .ok_or_else(|| FlowError::UnknownFilter(producer.clone()))?;
                        if !iface.output_port {
                            return Err(FlowError::NoOutputPort {
                                filter: producer.clone(),
                                type_name: iface.type_name.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm over the port edges. Ready filters are drained
    /// in alphabetical order so the total order is deterministic across
    /// processes given the same graph.
    fn topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree: IndexMap<&str, usize> = IndexMap::new();
        for name in self.graph.filter_names() {
            in_degree.insert(name, 0);
        }
        for name in self.graph.filter_names() {
            let ports = self.graph.edges_in(name).expect("filter has a port table");
            let degree = ports
                .values()
                .filter(|s| matches!(s, PortSource::Producer(_)))
                .count();
            in_degree[name] = degree;
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(&name) = ready.iter().next() {
            ready.remove(name);
            order.push(name.to_string());

            if let Some(consumers) = self.graph.edges_out(name) {
                // a consumer appearing twice loses one in-degree per edge
                for consumer in consumers {
                    let d = in_degree
                        .get_mut(consumer.as_str())
                        .expect("edge symmetry: consumer exists");
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(consumer.as_str());
                    }
                }
            }
        }

        if order.len() != in_degree.len() {
            let mut stuck: Vec<String> = in_degree
                .iter()
                .filter(|(_, &d)| d > 0)
                .map(|(&n, _)| n.to_string())
                .collect();
            stuck.sort();
            return Err(FlowError::CycleDetected(stuck));
        }
        Ok(order)
    }

    /// Downstream consumption per producer. A consumer reading the same
    /// producer through two ports consumes twice.
    fn consumer_counts(&self) -> IndexMap<String, u32> {
        let mut counts: IndexMap<String, u32> = IndexMap::new();
        for name in self.graph.filter_names() {
            counts.insert(name.to_string(), 0);
        }
        for name in self.graph.filter_names() {
            let ports = self.graph.edges_in(name).expect("filter has a port table");
            for source in ports.values() {
                if let PortSource::Producer(producer) = source {
                    *counts.entry(producer.clone()).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    fn run_filter(&mut self, name: &str, consumers: &IndexMap<String, u32>) -> Result<()> {
        // bind inputs: fetch each producer's output, decrementing its
        // remaining reads
        let mut inputs: IndexMap<String, DataBox> = IndexMap::new();
        let ports = self
            .graph
            .edges_in(name)
            .expect("scheduled filter exists")
            .clone();
        for (port, source) in ports {
            if let PortSource::Producer(producer) = source {
                let data = self.registry.fetch(&producer)?;
                inputs.insert(port, data);
            }
        }

        let mut output: Option<DataBox> = None;
        let registry = &self.registry;
        let node = self.graph.node_mut(name);
        let mut ctx = FilterContext::new(
            name,
            &node.interface.type_name,
            &node.params,
            &inputs,
            &mut output,
            registry,
        );
        node.filter.execute(&mut ctx)?;

        let declares_output = node.interface.output_port;
        match (declares_output, output) {
            (true, Some(data)) => {
                let reads = consumers.get(name).copied().unwrap_or(0);
                // zero-consumer outputs stay in the registry at count 0
                // so callers can extract them by name after execution
                self.registry.add(name, data, Reads::Count(reads));
            }
            (true, None) => {
                let reads = consumers.get(name).copied().unwrap_or(0);
                if reads > 0 {
                    return Err(FlowError::NoOutputProduced {
                        filter: name.to_string(),
                    });
                }
            }
            (false, Some(_)) => {
                warn!(filter = %name, "sink filter wrote an output; dropping");
            }
            (false, None) => {}
        }

        // inputs drop here: the filter holds no references past its turn
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, FilterInterface};
    use conflux_foundation::params;
    use serde_json::json;

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

        fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
            let v = params::require_i64(ctx.params(), "value")?;
            ctx.set_output_value(v);
            Ok(())
        }
    }

    struct Identity;

    impl Filter for Identity {
        fn declare_interface(&self) -> FilterInterface {
            FilterInterface::new("identity").ports(["in"])
        }

        fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
            let v = *ctx.input_as::<i64>("in")?;
            ctx.set_output_value(v);
            Ok(())
        }
    }

    struct Adder;

    impl Filter for Adder {
        fn declare_interface(&self) -> FilterInterface {
            FilterInterface::new("adder").ports(["lhs", "rhs"])
        }

        fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
            let lhs = *ctx.input_as::<i64>("lhs")?;
            let rhs = *ctx.input_as::<i64>("rhs")?;
            ctx.set_output_value(lhs + rhs);
            Ok(())
        }
    }

    struct Failing;

    impl Filter for Failing {
        fn declare_interface(&self) -> FilterInterface {
            FilterInterface::new("failing").ports(["in"])
        }

        fn execute(&mut self, _ctx: &mut FilterContext<'_>) -> Result<()> {
            Err(FlowError::execution("numerical breakdown"))
        }
    }

    fn workspace() -> Workspace {
        let mut w = Workspace::new();
        w.register_filter_type(|| Box::new(SourceConst)).unwrap();
        w.register_filter_type(|| Box::new(Identity)).unwrap();
        w.register_filter_type(|| Box::new(Adder)).unwrap();
        w.register_filter_type(|| Box::new(Failing)).unwrap();
        w
    }

    #[test]
    fn test_two_node_pass_through() {
        let mut w = workspace();
        w.add_filter_with("source_const", Some("a"), obj(json!({"value": 42})))
            .unwrap();
        w.add_filter_named("identity", "b").unwrap();
        w.connect("a", "b", "in").unwrap();

        let report = w.execute().unwrap();
        assert_eq!(report.order, vec!["a", "b"]);

        // a was consumed and released; b is a drained orphan at count 0
        assert!(!w.registry().has("a"));
        assert_eq!(w.registry().reads("b"), Some(Reads::Count(0)));
        assert_eq!(
            *w.registry().peek("b").unwrap().downcast_ref::<i64>().unwrap(),
            42
        );
    }

    #[test]
    fn test_two_consumers_fetch_twice() {
        let mut w = workspace();
        w.add_filter_with("source_const", Some("p"), obj(json!({"value": 7})))
            .unwrap();
        w.add_filter_named("identity", "c1").unwrap();
        w.add_filter_named("identity", "c2").unwrap();
        w.connect("p", "c1", "in").unwrap();
        w.connect("p", "c2", "in").unwrap();

        let report = w.execute().unwrap();
        assert_eq!(report.order, vec!["p", "c1", "c2"]);
        assert!(!w.registry().has("p"), "released after second fetch");
        assert_eq!(w.registry().reads("c1"), Some(Reads::Count(0)));
        assert_eq!(w.registry().reads("c2"), Some(Reads::Count(0)));
    }

    #[test]
    fn test_duplicate_port_consumption_counts_twice() {
        let mut w = workspace();
        w.add_filter_with("source_const", Some("p"), obj(json!({"value": 3})))
            .unwrap();
        w.add_filter_named("adder", "sum").unwrap();
        w.connect("p", "sum", "lhs").unwrap();
        w.connect("p", "sum", "rhs").unwrap();

        w.execute().unwrap();
        assert!(!w.registry().has("p"));
        assert_eq!(
            *w.registry()
                .peek("sum")
                .unwrap()
                .downcast_ref::<i64>()
                .unwrap(),
            6
        );
    }

    #[test]
    fn test_alphabetical_tie_break() {
        let mut w = workspace();
        for name in ["zeta", "alpha", "mid"] {
            w.add_filter_with("source_const", Some(name), obj(json!({"value": 1})))
                .unwrap();
        }
        let report = w.execute().unwrap();
        assert_eq!(report.order, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_topo_determinism() {
        let build = || {
            let mut w = workspace();
            w.add_filter_with("source_const", Some("src"), obj(json!({"value": 1})))
                .unwrap();
            for name in ["d", "b", "c"] {
                w.add_filter_named("identity", name).unwrap();
                w.connect("src", name, "in").unwrap();
            }
            w.add_filter_named("adder", "a_sum").unwrap();
            w.connect("b", "a_sum", "lhs").unwrap();
            w.connect("c", "a_sum", "rhs").unwrap();
            w.execute().unwrap().order
        };
        let first = build();
        for _ in 0..5 {
            assert_eq!(build(), first);
        }
    }

    #[test]
    fn test_disconnected_port_refuses_to_start() {
        let mut w = workspace();
        w.add_filter_named("identity", "b").unwrap();
        assert!(matches!(
            w.execute().unwrap_err(),
            FlowError::DisconnectedPort { .. }
        ));
    }

    #[test]
    fn test_empty_port_allowed() {
        let mut w = workspace();

        struct Optional;
        impl Filter for Optional {
            fn declare_interface(&self) -> FilterInterface {
                FilterInterface::new("optional").ports(["in"])
            }
            fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
                let v = if ctx.has_input("in") {
                    *ctx.input_as::<i64>("in")?
                } else {
                    -1
                };
                ctx.set_output_value(v);
                Ok(())
            }
        }
        w.register_filter_type(|| Box::new(Optional)).unwrap();
        w.add_filter_named("optional", "o").unwrap();
        w.mark_empty("o", "in").unwrap();

        w.execute().unwrap();
        assert_eq!(
            *w.registry().peek("o").unwrap().downcast_ref::<i64>().unwrap(),
            -1
        );
    }

    #[test]
    fn test_failure_unwinds_produced_entries() {
        let mut w = workspace();
        w.publish("published", DataBox::owned(0_u8));
        w.add_filter_with("source_const", Some("a"), obj(json!({"value": 1})))
            .unwrap();
        w.add_filter_named("identity", "b").unwrap();
        w.add_filter_named("failing", "z_fail").unwrap();
        w.connect("a", "b", "in").unwrap();
        w.connect("b", "z_fail", "in").unwrap();

        let err = w.execute().unwrap_err();
        assert!(matches!(err, FlowError::FilterFailed { ref filter, .. } if filter == "z_fail"));

        // no partial results; published inputs untouched
        assert!(!w.registry().has("a"));
        assert!(!w.registry().has("b"));
        assert!(w.registry().has("published"));
    }

    #[test]
    fn test_read_count_exactness() {
        // after success, every non-sink producer with consumers has been
        // fetched exactly consumer_count times and is gone
        let mut w = workspace();
        w.add_filter_with("source_const", Some("p"), obj(json!({"value": 2})))
            .unwrap();
        w.add_filter_named("identity", "c1").unwrap();
        w.add_filter_named("adder", "c2").unwrap();
        w.connect("p", "c1", "in").unwrap();
        w.connect("p", "c2", "lhs").unwrap();
        w.connect("c1", "c2", "rhs").unwrap();

        w.execute().unwrap();
        assert!(!w.registry().has("p"));
        assert!(!w.registry().has("c1"));
        assert_eq!(w.registry().reads("c2"), Some(Reads::Count(0)));
    }

    #[test]
    fn test_info_dump() {
        let mut w = workspace();
        w.publish("dataset", DataBox::owned(1_u8));
        w.add_filter_with("source_const", Some("a"), obj(json!({"value": 1})))
            .unwrap();

        let dump = w.to_json();
        assert!(dump.contains("\"a\""));
        assert!(dump.contains("source_const"));
        assert!(dump.contains("dataset"));
    }

    #[test]
    fn test_cycle_detected() {
        let mut w = workspace();
        w.add_filter_named("identity", "x").unwrap();
        w.add_filter_named("identity", "y").unwrap();
        w.connect("x", "y", "in").unwrap();
        w.connect("y", "x", "in").unwrap();

        match w.execute().unwrap_err() {
            FlowError::CycleDetected(stuck) => {
                assert_eq!(stuck, vec!["x", "y"]);
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }
}
