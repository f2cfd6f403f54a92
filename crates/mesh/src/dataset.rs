//! Typed blueprint dataset model.
//!
//! Published data arrives as a multi-domain tree conforming to the mesh
//! blueprint: `coordsets/{name}`, `topologies/{name}`,
//! `fields/{name}/{association,topology,values}`,
//! `state/{cycle,time,domain_id}`. Inside the core that tree is a typed
//! model — configuration and payload never share a representation.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use conflux_foundation::Communicator;

use crate::error::{MeshError, Result};

/// Shared handle to a published dataset.
///
/// The host keeps one reference; the registry holds a borrowed box with
/// another. Reductions take read locks; `paint` is the single writer.
pub type DatasetHandle = Arc<RwLock<Dataset>>;

/// A multi-domain dataset: this rank's slice of the global mesh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub domains: Vec<Domain>,
}

/// One mesh domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Domain {
    pub coordsets: IndexMap<String, Coordset>,
    pub topologies: IndexMap<String, Topology>,
    pub fields: IndexMap<String, Field>,
    #[serde(default)]
    pub state: State,
}

/// Coordinate set. Axis vectors are ordered x, y, z; 1D and 2D meshes
/// carry fewer entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Coordset {
    Uniform {
        /// Vertex counts per axis.
        dims: Vec<usize>,
        origin: Vec<f64>,
        spacing: Vec<f64>,
    },
    Rectilinear {
        /// Vertex coordinates per axis.
        values: Vec<Vec<f64>>,
    },
    Explicit {
        /// One coordinate array per axis, equal lengths.
        values: Vec<Vec<f64>>,
    },
}

impl Coordset {
    pub fn num_dims(&self) -> usize {
        match self {
            Coordset::Uniform { dims, .. } => dims.len(),
            Coordset::Rectilinear { values } => values.len(),
            Coordset::Explicit { values } => values.len(),
        }
    }

    /// Vertex counts per axis. Explicit coordsets are not logically
    /// gridded, so only the total is meaningful there.
    pub fn vertex_dims(&self) -> Option<Vec<usize>> {
        match self {
            Coordset::Uniform { dims, .. } => Some(dims.clone()),
            Coordset::Rectilinear { values } => Some(values.iter().map(Vec::len).collect()),
            Coordset::Explicit { .. } => None,
        }
    }

    /// Total vertex count.
    pub fn num_vertices(&self) -> usize {
        match self {
            Coordset::Uniform { dims, .. } => dims.iter().product(),
            Coordset::Rectilinear { values } => values.iter().map(Vec::len).product(),
            Coordset::Explicit { values } => values.first().map_or(0, Vec::len),
        }
    }
}

/// Element shape of an unstructured topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Point,
    Line,
    Tri,
    Quad,
    Tet,
    Hex,
}

impl Shape {
    /// Vertices per element for this shape.
    pub fn num_indices(&self) -> usize {
        match self {
            Shape::Point => 1,
            Shape::Line => 2,
            Shape::Tri => 3,
            Shape::Quad => 4,
            Shape::Tet => 4,
            Shape::Hex => 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TopologyKind {
    Uniform,
    Rectilinear,
    Structured { dims: Vec<usize> },
    Unstructured { shape: Shape, connectivity: Vec<usize> },
}

/// A topology over a named coordset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub coordset: String,
    #[serde(flatten)]
    pub kind: TopologyKind,
}

/// Whether field values live on vertices or elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Association {
    Vertex,
    Element,
}

impl Association {
    pub fn as_str(&self) -> &'static str {
        match self {
            Association::Vertex => "vertex",
            Association::Element => "element",
        }
    }
}

impl std::str::FromStr for Association {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vertex" => Ok(Association::Vertex),
            "element" => Ok(Association::Element),
            other => Err(MeshError::AssociationMismatch(format!(
                "unknown association '{other}'"
            ))),
        }
    }
}

/// Field sample arrays. Single-component scalars only; the precision
/// split mirrors what simulations actually publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldValues {
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            FieldValues::Float32(v) => v.len(),
            FieldValues::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> Option<f64> {
        match self {
            FieldValues::Float32(v) => v.get(idx).map(|&x| x as f64),
            FieldValues::Float64(v) => v.get(idx).copied(),
        }
    }

    /// Iterate values widened to f64.
    pub fn iter_f64(&self) -> Box<dyn Iterator<Item = f64> + '_> {
        match self {
            FieldValues::Float32(v) => Box::new(v.iter().map(|&x| x as f64)),
            FieldValues::Float64(v) => Box::new(v.iter().copied()),
        }
    }
}

/// A named field on a topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub association: Association,
    pub topology: String,
    pub values: FieldValues,
}

/// Simulation state carried with each domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    pub cycle: Option<u64>,
    pub time: Option<f64>,
    pub domain_id: Option<u32>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap into the shared publish handle.
    pub fn into_handle(self) -> DatasetHandle {
        Arc::new(RwLock::new(self))
    }

    /// Whether any local domain carries the field.
    pub fn has_field_local(&self, field: &str) -> bool {
        self.domains.iter().any(|d| d.fields.contains_key(field))
    }

    /// Whether any rank carries the field (collective).
    pub fn has_field(&self, field: &str, comm: &dyn Communicator) -> bool {
        let local = self.has_field_local(field) as i64;
        comm.max_i64(local) == 1
    }

    /// Field names seen in the first local domain, for diagnostics.
    pub fn known_fields(&self) -> Vec<String> {
        self.domains
            .first()
            .map(|d| d.fields.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Association of a field, from the first domain carrying it.
    pub fn field_association(&self, field: &str) -> Result<Association> {
        self.domains
            .iter()
            .find_map(|d| d.fields.get(field))
            .map(|f| f.association)
            .ok_or_else(|| MeshError::FieldMissing {
                field: field.to_string(),
                known: self.known_fields(),
            })
    }

    /// A state variable from the first domain that has it.
    pub fn state_cycle(&self) -> Result<u64> {
        self.domains
            .iter()
            .find_map(|d| d.state.cycle)
            .ok_or_else(|| MeshError::MissingState("cycle".to_string()))
    }

    pub fn state_time(&self) -> Result<f64> {
        self.domains
            .iter()
            .find_map(|d| d.state.time)
            .ok_or_else(|| MeshError::MissingState("time".to_string()))
    }
}

impl Domain {
    /// Vertex count of a named topology.
    pub fn num_vertices(&self, topo_name: &str) -> Result<usize> {
        let topo = self.topology(topo_name)?;
        let coords = self.coordset_of(topo)?;
        Ok(coords.num_vertices())
    }

    /// Element count of a named topology.
    pub fn num_elements(&self, topo_name: &str) -> Result<usize> {
        let topo = self.topology(topo_name)?;
        match &topo.kind {
            TopologyKind::Unstructured {
                shape,
                connectivity,
            } => Ok(connectivity.len() / shape.num_indices()),
            TopologyKind::Structured { dims } => {
                Ok(dims.iter().map(|&d| d.saturating_sub(1).max(1)).product())
            }
            TopologyKind::Uniform | TopologyKind::Rectilinear => {
                let coords = self.coordset_of(topo)?;
                let dims = coords
                    .vertex_dims()
                    .ok_or_else(|| MeshError::TopologyMismatch(
                        "gridded topology over explicit coordset".to_string(),
                    ))?;
                Ok(dims.iter().map(|&d| d.saturating_sub(1).max(1)).product())
            }
        }
    }

    /// Sample count on a topology for a given association.
    pub fn num_samples(&self, topo_name: &str, assoc: Association) -> Result<usize> {
        match assoc {
            Association::Vertex => self.num_vertices(topo_name),
            Association::Element => self.num_elements(topo_name),
        }
    }

    pub fn topology(&self, name: &str) -> Result<&Topology> {
        self.topologies
            .get(name)
            .ok_or_else(|| MeshError::UnknownTopology(name.to_string()))
    }

    pub fn coordset_of(&self, topo: &Topology) -> Result<&Coordset> {
        self.coordsets
            .get(&topo.coordset)
            .ok_or_else(|| MeshError::UnknownTopology(topo.coordset.clone()))
    }
}
