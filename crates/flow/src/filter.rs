//! The filter contract.
//!
//! A filter type supplies three capabilities:
//!
//! - [`Filter::declare_interface`] — name, input ports, whether it
//!   produces output, default parameters
//! - [`Filter::verify_params`] — pure parameter check, run at
//!   `add_filter` time with the merged parameter tree
//! - [`Filter::execute`] — the work, reading inputs and writing at most
//!   one output through the [`FilterContext`]
//!
//! This is the only extension point: all computation enters the system
//! as a filter. Filters never touch the registry or the graph directly;
//! the context hands them exactly the state their turn is allowed to
//! see, and the scheduler clears it afterwards.

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::warn;

use conflux_foundation::{Params, VerifyInfo};

use crate::data::DataBox;
use crate::error::{FlowError, Result};
use crate::registry::Registry;

/// Static interface a filter type declares about itself.
#[derive(Debug, Clone)]
pub struct FilterInterface {
    /// Unique (per workspace) filter type name.
    pub type_name: String,
    /// Ordered input port names; empty for source filters.
    pub port_names: Vec<String>,
    /// Whether the filter produces an output.
    pub output_port: bool,
    /// Parameter template each instance is seeded with.
    pub default_params: Params,
}

impl FilterInterface {
    /// Start an interface declaration: no ports, output on, no defaults.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            port_names: Vec::new(),
            output_port: true,
            default_params: Params::new(),
        }
    }

    /// Declare the input ports, in order.
    pub fn ports<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.port_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Declare that this filter produces no output (pure sink).
    pub fn sink(mut self) -> Self {
        self.output_port = false;
        self
    }

    /// Set the default parameter tree.
    pub fn defaults(mut self, params: Params) -> Self {
        self.default_params = params;
        self
    }

    pub fn has_port(&self, name: &str) -> bool {
        self.port_names.iter().any(|p| p == name)
    }

    pub fn port_name(&self, idx: usize) -> Option<&str> {
        self.port_names.get(idx).map(String::as_str)
    }

    /// Sanity check run when a type is registered.
    pub fn verify(&self) -> std::result::Result<(), String> {
        if self.type_name.is_empty() {
            return Err("empty type_name".to_string());
        }
        if self.port_names.iter().any(String::is_empty) {
            return Err("port_names contains an empty string".to_string());
        }
        let mut seen = self.port_names.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.port_names.len() {
            return Err("port_names contains duplicates".to_string());
        }
        Ok(())
    }
}

/// Unit of computation. See the module docs for the contract.
pub trait Filter: Send {
    /// Declare the filter's interface. Called once per registration and
    /// once per instantiation; must be pure.
    fn declare_interface(&self) -> FilterInterface;

    /// Check the merged parameter tree. Append diagnostics to `info`;
    /// a non-empty error list fails the add regardless of the return
    /// value.
    fn verify_params(&self, _params: &Params, _info: &mut VerifyInfo) -> bool {
        true
    }

    /// Do the work for one execution.
    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()>;
}

/// Factory producing fresh filter instances.
pub type FilterFactory = fn() -> Box<dyn Filter>;

struct FilterType {
    factory: FilterFactory,
    interface: FilterInterface,
}

/// Name → factory table, one per workspace.
///
/// Registration instantiates the type once to read and verify its
/// interface. Duplicate names are a warning; the first registration
/// wins.
#[derive(Default)]
pub struct FilterTypeTable {
    types: IndexMap<String, FilterType>,
}

impl FilterTypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter type from its factory.
    pub fn register(&mut self, factory: FilterFactory) -> Result<()> {
        let probe = factory();
        let interface = probe.declare_interface();
        if let Err(reason) = interface.verify() {
            return Err(FlowError::BadInterface {
                type_name: interface.type_name,
                reason,
            });
        }
        if self.types.contains_key(&interface.type_name) {
            warn!(
                type_name = %interface.type_name,
                "filter type is already registered"
            );
            return Ok(());
        }
        self.types
            .insert(interface.type_name.clone(), FilterType { factory, interface });
        Ok(())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Instantiate a registered type.
    pub fn instantiate(&self, type_name: &str) -> Result<(Box<dyn Filter>, FilterInterface)> {
        let ty = self
            .types
            .get(type_name)
            .ok_or_else(|| FlowError::UnknownFilterType(type_name.to_string()))?;
        Ok(((ty.factory)(), ty.interface.clone()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

/// Per-turn execution surface handed to [`Filter::execute`].
///
/// Input bindings and the output slot live here, not on the filter, so
/// nothing survives past the filter's turn.
pub struct FilterContext<'a> {
    name: &'a str,
    type_name: &'a str,
    params: &'a Params,
    inputs: &'a IndexMap<String, DataBox>,
    output: &'a mut Option<DataBox>,
    registry: &'a Registry,
}

impl<'a> FilterContext<'a> {
    pub(crate) fn new(
        name: &'a str,
        type_name: &'a str,
        params: &'a Params,
        inputs: &'a IndexMap<String, DataBox>,
        output: &'a mut Option<DataBox>,
        registry: &'a Registry,
    ) -> Self {
        Self {
            name,
            type_name,
            params,
            inputs,
            output,
            registry,
        }
    }

    /// Instance name within the graph.
    pub fn name(&self) -> &str {
        self.name
    }

    /// `name(type)`, for diagnostics.
    pub fn detailed_name(&self) -> String {
        format!("{}({})", self.name, self.type_name)
    }

    /// The instance's merged parameter tree.
    pub fn params(&self) -> &Params {
        self.params
    }

    /// Whether a port was bound for this turn (false for ports marked
    /// empty).
    pub fn has_input(&self, port: &str) -> bool {
        self.inputs.contains_key(port)
    }

    /// Fetch a bound input by port name.
    pub fn input(&self, port: &str) -> Result<&DataBox> {
        self.inputs.get(port).ok_or_else(|| FlowError::MissingInput {
            filter: self.name.to_string(),
            port: port.to_string(),
        })
    }

    /// Fetch a bound input by port index (declaration order).
    pub fn input_idx(&self, idx: usize) -> Result<&DataBox> {
        self.inputs
            .get_index(idx)
            .map(|(_, data)| data)
            .ok_or_else(|| FlowError::MissingInput {
                filter: self.name.to_string(),
                port: format!("#{idx}"),
            })
    }

    /// Typed fetch of a bound input.
    pub fn input_as<T: Any>(&self, port: &str) -> Result<&T> {
        self.input(port)?.downcast_ref::<T>()
    }

    /// Write the output box for this turn.
    pub fn set_output(&mut self, data: DataBox) {
        *self.output = Some(data);
    }

    /// Convenience: box and write an owned output value.
    pub fn set_output_value<T: Any + Send + Sync>(&mut self, value: T) {
        self.set_output(DataBox::owned(value));
    }

    /// Borrow an ambient (pinned) registry entry: the published dataset,
    /// the expression cache, the function table. Non-consuming.
    pub fn ambient<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        self.registry
            .peek(key)
            .ok_or_else(|| FlowError::MissingEntry(key.to_string()))?
            .downcast_arc::<T>()
    }
}
