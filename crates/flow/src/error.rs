//! Dataflow errors.

use conflux_foundation::{ParamError, VerifyInfo};
use thiserror::Error;

/// Dataflow result type.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors raised by graph construction, the registry, and execution.
///
/// Construction errors surface synchronously at the mutating call;
/// execution errors unwind the scheduler, which releases produced
/// registry entries in reverse insertion order before re-raising.
#[derive(Debug, Error)]
pub enum FlowError {
    // construction
    #[error("unknown filter type: '{0}'")]
    UnknownFilterType(String),

    #[error("filter named '{0}' already exists in graph")]
    DuplicateName(String),

    #[error("invalid params for filter '{filter}' (type: {type_name}): {info}")]
    InvalidParams {
        filter: String,
        type_name: String,
        info: VerifyInfo,
    },

    #[error("filter '{filter}' (type: {type_name}) has no input port named '{port}'")]
    PortNotFound {
        filter: String,
        type_name: String,
        port: String,
    },

    #[error("no filter named '{0}' in graph")]
    UnknownFilter(String),

    #[error("filter '{filter}' (type: {type_name}) declares no output port")]
    NoOutputPort { filter: String, type_name: String },

    #[error("filter type '{type_name}' declares a bad interface: {reason}")]
    BadInterface { type_name: String, reason: String },

    // validation / scheduling
    #[error("input port '{port}' of filter '{filter}' is not connected")]
    DisconnectedPort { filter: String, port: String },

    #[error("cycle detected in filter graph, involving: {0:?}")]
    CycleDetected(Vec<String>),

    // registry
    #[error("type mismatch: requested {requested}, stored {stored}")]
    TypeMismatch {
        requested: &'static str,
        stored: &'static str,
    },

    #[error("no registry entry for key '{0}'")]
    MissingEntry(String),

    #[error("registry entry '{0}' has no remaining reads")]
    Exhausted(String),

    // execution
    #[error("input port '{port}' of filter '{filter}' has no bound data")]
    MissingInput { filter: String, port: String },

    #[error("filter '{filter}' declared an output port but produced no output")]
    NoOutputProduced { filter: String },

    #[error("filter '{filter}' (type: {type_name}) failed: {source}")]
    FilterFailed {
        filter: String,
        type_name: String,
        #[source]
        source: Box<FlowError>,
    },

    /// Domain-specific failure inside a filter body (reduction errors,
    /// I/O errors). Carried as a message so downstream crates can map
    /// their own error enums into the unwind path.
    #[error("{0}")]
    Execution(String),

    #[error(transparent)]
    Param(#[from] ParamError),
}

impl FlowError {
    /// Wrap any displayable filter-body failure for the unwind path.
    pub fn execution(err: impl std::fmt::Display) -> Self {
        FlowError::Execution(err.to_string())
    }
}
