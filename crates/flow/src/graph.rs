//! Filter graph: instances plus typed edges.
//!
//! The graph owns its filter instances. Edges are kept in both
//! directions — `edges_in` maps each consumer port to its producer,
//! `edges_out` lists each producer's consumers in connect order — and
//! every mutator keeps the two symmetric.

use indexmap::IndexMap;
use serde_json::json;
use tracing::debug;

use conflux_foundation::{params, Params, VerifyInfo};

use crate::error::{FlowError, Result};
use crate::filter::{Filter, FilterInterface, FilterTypeTable};

/// Where a consumer port gets its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSource {
    /// Not connected yet. Execution refuses to start while any port is
    /// unbound.
    Unbound,
    /// Explicitly left empty; the filter sees no binding for the port.
    Empty,
    /// Fed by the named producer's output.
    Producer(String),
}

pub(crate) struct FilterNode {
    pub(crate) filter: Box<dyn Filter>,
    pub(crate) interface: FilterInterface,
    pub(crate) params: Params,
}

/// A DAG of filter instances.
#[derive(Default)]
pub struct Graph {
    filters: IndexMap<String, FilterNode>,
    edges_in: IndexMap<String, IndexMap<String, PortSource>>,
    edges_out: IndexMap<String, Vec<String>>,
    filter_count: usize,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate a filter type into the graph.
    ///
    /// `name` defaults to a generated `f_<n>`; `overrides` are merged
    /// onto the type's default parameters and the result is run through
    /// the type's `verify_params` before anything is added.
    pub fn add_filter(
        &mut self,
        types: &FilterTypeTable,
        type_name: &str,
        name: Option<&str>,
        overrides: Option<Params>,
    ) -> Result<String> {
        let name = match name {
            Some(n) => n.to_string(),
            None => format!("f_{}", self.filter_count),
        };
        if self.filters.contains_key(&name) {
            return Err(FlowError::DuplicateName(name));
        }

        let (filter, interface) = types.instantiate(type_name)?;

        let merged = match overrides {
            Some(over) => params::merge(&interface.default_params, &over),
            None => interface.default_params.clone(),
        };

        let mut info = VerifyInfo::new();
        let ok = filter.verify_params(&merged, &mut info);
        if !ok || !info.is_ok() {
            // a non-empty error list is a failure even when the hook
            // forgot to say so
            if info.is_ok() {
                info.error("verify_params returned false");
            }
            return Err(FlowError::InvalidParams {
                filter: name,
                type_name: type_name.to_string(),
                info,
            });
        }

        debug!(filter = %name, type_name, "add filter");

        let mut ports = IndexMap::new();
        for port in &interface.port_names {
            ports.insert(port.clone(), PortSource::Unbound);
        }
        self.edges_in.insert(name.clone(), ports);
        if interface.output_port {
            self.edges_out.insert(name.clone(), Vec::new());
        }
        self.filters.insert(
            name.clone(),
            FilterNode {
                filter,
                interface,
                params: merged,
            },
        );
        self.filter_count += 1;
        Ok(name)
    }

    /// Connect `src`'s output to `dst`'s named input port.
    ///
    /// Reconnecting an occupied port replaces the old edge; both
    /// directions are updated together. On any error neither side is
    /// touched.
    pub fn connect(&mut self, src: &str, dst: &str, port: &str) -> Result<()> {
        let src_node = self
            .filters
            .get(src)
            .ok_or_else(|| FlowError::UnknownFilter(src.to_string()))?;
        if !src_node.interface.output_port {
            return Err(FlowError::NoOutputPort {
                filter: src.to_string(),
                type_name: src_node.interface.type_name.clone(),
            });
        }
        let dst_node = self
            .filters
            .get(dst)
            .ok_or_else(|| FlowError::UnknownFilter(dst.to_string()))?;
        if !dst_node.interface.has_port(port) {
            return Err(FlowError::PortNotFound {
                filter: dst.to_string(),
                type_name: dst_node.interface.type_name.clone(),
                port: port.to_string(),
            });
        }

        let slot = self
            .edges_in
            .get_mut(dst)
            .and_then(|ports| ports.get_mut(port))
            .expect("ports seeded at add_filter");

        // drop the previous edge symmetrically before overwriting
        if let PortSource::Producer(old) = slot.clone() {
            Self::remove_one_out_edge(&mut self.edges_out, &old, dst);
        }
        *slot = PortSource::Producer(src.to_string());
        self.edges_out
            .get_mut(src)
            .expect("producer has an out-edge list")
            .push(dst.to_string());

        debug!(src, dst, port, "connect");
        Ok(())
    }

    /// Connect by port index (declaration order).
    pub fn connect_idx(&mut self, src: &str, dst: &str, idx: usize) -> Result<()> {
        let port = self
            .filters
            .get(dst)
            .ok_or_else(|| FlowError::UnknownFilter(dst.to_string()))?
            .interface
            .port_name(idx)
            .ok_or_else(|| FlowError::PortNotFound {
                filter: dst.to_string(),
                type_name: self.filters[dst].interface.type_name.clone(),
                port: format!("#{idx}"),
            })?
            .to_string();
        self.connect(src, dst, &port)
    }

    /// Explicitly leave a port unfed; execution will treat it as absent
    /// instead of refusing to start.
    pub fn mark_empty(&mut self, dst: &str, port: &str) -> Result<()> {
        let dst_node = self
            .filters
            .get(dst)
            .ok_or_else(|| FlowError::UnknownFilter(dst.to_string()))?;
        if !dst_node.interface.has_port(port) {
            return Err(FlowError::PortNotFound {
                filter: dst.to_string(),
                type_name: dst_node.interface.type_name.clone(),
                port: port.to_string(),
            });
        }
        let slot = self
            .edges_in
            .get_mut(dst)
            .and_then(|ports| ports.get_mut(port))
            .expect("ports seeded at add_filter");
        if let PortSource::Producer(old) = slot.clone() {
            Self::remove_one_out_edge(&mut self.edges_out, &old, dst);
        }
        *slot = PortSource::Empty;
        Ok(())
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Remove a filter and prune every edge touching it.
    pub fn remove_filter(&mut self, name: &str) -> Result<()> {
        if !self.filters.contains_key(name) {
            return Err(FlowError::UnknownFilter(name.to_string()));
        }
        self.filters.shift_remove(name);
        self.edges_in.shift_remove(name);
        self.edges_out.shift_remove(name);

        // unbind every port this filter fed
        for ports in self.edges_in.values_mut() {
            for source in ports.values_mut() {
                if matches!(source, PortSource::Producer(p) if p == name) {
                    *source = PortSource::Unbound;
                }
            }
        }
        // drop it from every producer's consumer list
        for consumers in self.edges_out.values_mut() {
            consumers.retain(|c| c != name);
        }
        debug!(filter = %name, "remove filter");
        Ok(())
    }

    /// Destroy all filters and clear every table.
    pub fn reset(&mut self) {
        self.filters.clear();
        self.edges_in.clear();
        self.edges_out.clear();
        self.filter_count = 0;
    }

    /// Instance names, in insertion order.
    pub fn filter_names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// A filter's declared interface.
    pub fn interface(&self, name: &str) -> Option<&FilterInterface> {
        self.filters.get(name).map(|node| &node.interface)
    }

    /// A filter's merged parameters.
    pub fn params(&self, name: &str) -> Option<&Params> {
        self.filters.get(name).map(|node| &node.params)
    }

    /// The producer feeding each of a consumer's ports.
    pub fn edges_in(&self, name: &str) -> Option<&IndexMap<String, PortSource>> {
        self.edges_in.get(name)
    }

    /// A producer's consumers, in connect order (duplicates preserved).
    pub fn edges_out(&self, name: &str) -> Option<&[String]> {
        self.edges_out.get(name).map(Vec::as_slice)
    }

    /// Human-readable dump of filters and edges.
    pub fn info(&self) -> serde_json::Value {
        let mut filters = serde_json::Map::new();
        for (name, node) in &self.filters {
            filters.insert(
                name.clone(),
                json!({
                    "type_name": node.interface.type_name,
                    "params": node.params,
                }),
            );
        }
        let mut edges_in = serde_json::Map::new();
        for (name, ports) in &self.edges_in {
            let mut port_map = serde_json::Map::new();
            for (port, source) in ports {
                let value = match source {
                    PortSource::Unbound => json!(null),
                    PortSource::Empty => json!(""),
                    PortSource::Producer(p) => json!(p),
                };
                port_map.insert(port.clone(), value);
            }
            edges_in.insert(name.clone(), serde_json::Value::Object(port_map));
        }
        json!({
            "filters": filters,
            "edges": {
                "in": edges_in,
                "out": self.edges_out,
            },
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.info()).unwrap_or_default()
    }

    /// Graphviz rendering of the wiring, one edge per connected port.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph {\n");
        for (name, node) in &self.filters {
            out.push_str(&format!(
                "  \"{name}\" [label=\"{name}({})\"];\n",
                node.interface.type_name
            ));
        }
        for (consumer, ports) in &self.edges_in {
            for (port, source) in ports {
                if let PortSource::Producer(producer) = source {
                    out.push_str(&format!(
                        "  \"{producer}\" -> \"{consumer}\" [label=\"{port}\"];\n"
                    ));
                }
            }
        }
        out.push_str("}\n");
        out
    }

    pub(crate) fn node_mut(&mut self, name: &str) -> &mut FilterNode {
        self.filters.get_mut(name).expect("scheduled filter exists")
    }

    pub(crate) fn nodes(&self) -> &IndexMap<String, FilterNode> {
        &self.filters
    }

    fn remove_one_out_edge(
        edges_out: &mut IndexMap<String, Vec<String>>,
        producer: &str,
        consumer: &str,
    ) {
        if let Some(consumers) = edges_out.get_mut(producer) {
            if let Some(pos) = consumers.iter().position(|c| c == consumer) {
                consumers.remove(pos);
            }
        }
    }
}
