//! Mesh and reduction errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MeshError>;

/// Errors raised by the dataset model and the reduction layer.
#[derive(Debug, Clone, Error)]
pub enum MeshError {
    #[error("dataset does not contain field '{field}', known = {known:?}")]
    FieldMissing { field: String, known: Vec<String> },

    #[error("association mismatch: {0}")]
    AssociationMismatch(String),

    #[error("topology mismatch: {0}")]
    TopologyMismatch(String),

    #[error("no topology named '{0}'")]
    UnknownTopology(String),

    #[error("empty domain: {0}")]
    EmptyDomain(String),

    #[error("value out of range: {0}")]
    NumericOutOfRange(String),

    #[error("unable to retrieve state variable '{0}'")]
    MissingState(String),

    #[error("unknown binning reduction '{0}'")]
    UnknownReduction(String),

    #[error("unknown quantile interpolation '{0}'")]
    UnknownInterpolation(String),

    #[error("binning meshes support at most 3 axes, got {0}")]
    TooManyAxes(usize),

    #[error("bad bin axis: {0}")]
    InvalidAxis(String),
}
