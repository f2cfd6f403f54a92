//! Expression evaluator errors.

use thiserror::Error;

use conflux_flow::FlowError;
use conflux_mesh::MeshError;

use crate::parser::ParseError;
use crate::value::ValueKind;

pub type Result<T> = std::result::Result<T, ExprError>;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unknown expression identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' takes {expected:?} argument(s), got {got}")]
    ArityMismatch {
        name: String,
        expected: Vec<usize>,
        got: usize,
    },

    #[error(
        "no matching overload for {name}({got:?}); candidates: {candidates:?}"
    )]
    NoMatchingOverload {
        name: String,
        got: Vec<ValueKind>,
        candidates: Vec<String>,
    },

    #[error("unknown member '.{0}'")]
    UnknownMember(String),

    #[error("type error: {0}")]
    TypeError(String),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Mesh(#[from] MeshError),
}
