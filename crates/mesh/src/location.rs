//! Spatial locations of mesh samples.
//!
//! Reductions report *where* an extremum lives: the vertex position for
//! vertex-associated fields, the element center for element-associated
//! ones. Positions are always returned as xyz triples; missing axes
//! read as 0.

use crate::dataset::{Coordset, Domain, TopologyKind};
use crate::error::{MeshError, Result};

/// Decompose a flat index into per-axis logical indices, first axis
/// fastest.
fn logical_index(mut flat: usize, dims: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(dims.len());
    for &d in dims {
        out.push(flat % d);
        flat /= d;
    }
    out
}

/// Position of a vertex within a coordset.
fn coords_vertex(coords: &Coordset, index: usize) -> Result<[f64; 3]> {
    if index >= coords.num_vertices() {
        return Err(MeshError::NumericOutOfRange(format!(
            "vertex index {index} out of range ({} vertices)",
            coords.num_vertices()
        )));
    }
    let mut pos = [0.0; 3];
    match coords {
        Coordset::Uniform {
            dims,
            origin,
            spacing,
        } => {
            let logical = logical_index(index, dims);
            for axis in 0..dims.len() {
                pos[axis] = origin[axis] + logical[axis] as f64 * spacing[axis];
            }
        }
        Coordset::Rectilinear { values } => {
            let dims: Vec<usize> = values.iter().map(Vec::len).collect();
            let logical = logical_index(index, &dims);
            for axis in 0..values.len() {
                pos[axis] = values[axis][logical[axis]];
            }
        }
        Coordset::Explicit { values } => {
            for axis in 0..values.len() {
                pos[axis] = values[axis][index];
            }
        }
    }
    Ok(pos)
}

/// Position of a vertex of a named topology.
pub fn vertex_location(domain: &Domain, topo_name: &str, index: usize) -> Result<[f64; 3]> {
    let topo = domain.topology(topo_name)?;
    let coords = domain.coordset_of(topo)?;
    coords_vertex(coords, index)
}

/// Center of an element of a named topology.
pub fn element_location(domain: &Domain, topo_name: &str, index: usize) -> Result<[f64; 3]> {
    let topo = domain.topology(topo_name)?;
    let coords = domain.coordset_of(topo)?;

    match &topo.kind {
        TopologyKind::Unstructured {
            shape,
            connectivity,
        } => {
            let n = shape.num_indices();
            let verts = connectivity
                .get(index * n..(index + 1) * n)
                .ok_or_else(|| {
                    MeshError::NumericOutOfRange(format!("element index {index} out of range"))
                })?;
            centroid(coords, verts)
        }
        TopologyKind::Structured { dims } => grid_element_center(coords, dims, index),
        TopologyKind::Uniform | TopologyKind::Rectilinear => {
            let dims = coords.vertex_dims().ok_or_else(|| {
                MeshError::TopologyMismatch(
                    "gridded topology over explicit coordset".to_string(),
                )
            })?;
            grid_element_center(coords, &dims, index)
        }
    }
}

/// Average the positions of a set of vertices.
fn centroid(coords: &Coordset, vertices: &[usize]) -> Result<[f64; 3]> {
    let mut acc = [0.0; 3];
    for &v in vertices {
        let p = coords_vertex(coords, v)?;
        for axis in 0..3 {
            acc[axis] += p[axis];
        }
    }
    let n = vertices.len().max(1) as f64;
    Ok([acc[0] / n, acc[1] / n, acc[2] / n])
}

/// Center of a logically-gridded element: average of its 2^d corner
/// vertices.
fn grid_element_center(coords: &Coordset, vertex_dims: &[usize], index: usize) -> Result<[f64; 3]> {
    let elem_dims: Vec<usize> = vertex_dims
        .iter()
        .map(|&d| d.saturating_sub(1).max(1))
        .collect();
    let total: usize = elem_dims.iter().product();
    if index >= total {
        return Err(MeshError::NumericOutOfRange(format!(
            "element index {index} out of range ({total} elements)"
        )));
    }
    let logical = logical_index(index, &elem_dims);
    let ndims = vertex_dims.len();

    // walk the 2^d corners of the element
    let mut corners = Vec::with_capacity(1 << ndims);
    for corner in 0..(1usize << ndims) {
        let mut flat = 0;
        let mut stride = 1;
        for axis in 0..ndims {
            let offset = (corner >> axis) & 1;
            // degenerate axes (a single vertex plane) contribute no offset
            let vi = (logical[axis] + offset).min(vertex_dims[axis] - 1);
            flat += vi * stride;
            stride *= vertex_dims[axis];
        }
        corners.push(flat);
    }
    centroid(coords, &corners)
}
