//! Conflux mesh layer
//!
//! A typed model of the blueprint dataset contract (coordsets,
//! topologies, fields, state) and the reductions the expression builtins
//! consume: field extrema with locations, sums, histograms and their
//! derived statistics, and multi-axis binning with paint-back.
//!
//! Per-domain math happens here; cross-rank combination goes through the
//! foundation [`Communicator`](conflux_foundation::Communicator) seam.

pub mod binning;
pub mod dataset;
pub mod error;
pub mod examples;
pub mod location;
pub mod reduce;

pub use binning::{BinAxisSpec, Binning, Reduction};
pub use dataset::{
    Association, Coordset, Dataset, DatasetHandle, Domain, Field, FieldValues, State, Topology,
    TopologyKind,
};
pub use error::{MeshError, Result};
pub use reduce::Histogram;
