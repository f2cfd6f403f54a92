//! Multi-axis field binning.
//!
//! Samples are dropped into a dense lattice of bins spanned by one or
//! more axes — explicit fields or the implicit coordinates `x`, `y`,
//! `z` — and a reduction collapses each bin's population to one number.
//! The result can be painted back onto the mesh as a derived field or
//! turned into a standalone bin-lattice mesh.

use serde::{Deserialize, Serialize};
use tracing::debug;

use conflux_foundation::{comm::broadcast_string, Communicator};

use crate::dataset::{
    Association, Coordset, Dataset, Domain, Field, FieldValues, Topology, TopologyKind,
};
use crate::error::{MeshError, Result};
use crate::location::{element_location, vertex_location};
use crate::reduce::{bin_index, field_max, field_min};

/// Caller-facing axis description; unset pieces are filled from the
/// dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BinAxisSpec {
    pub name: String,
    pub min_val: Option<f64>,
    pub max_val: Option<f64>,
    pub num_bins: Option<usize>,
}

impl BinAxisSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A fully-resolved bin axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinAxis {
    pub name: String,
    pub min_val: f64,
    pub max_val: f64,
    pub num_bins: usize,
}

/// Per-bin reduction functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    Sum,
    Min,
    Max,
    Avg,
    Count,
    Rms,
    Var,
    Std,
    Pdf,
}

impl Reduction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reduction::Sum => "sum",
            Reduction::Min => "min",
            Reduction::Max => "max",
            Reduction::Avg => "avg",
            Reduction::Count => "count",
            Reduction::Rms => "rms",
            Reduction::Var => "var",
            Reduction::Std => "std",
            Reduction::Pdf => "pdf",
        }
    }
}

impl std::str::FromStr for Reduction {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(Reduction::Sum),
            "min" => Ok(Reduction::Min),
            "max" => Ok(Reduction::Max),
            "avg" => Ok(Reduction::Avg),
            "count" => Ok(Reduction::Count),
            "rms" => Ok(Reduction::Rms),
            "var" => Ok(Reduction::Var),
            "std" => Ok(Reduction::Std),
            "pdf" => Ok(Reduction::Pdf),
            other => Err(MeshError::UnknownReduction(other.to_string())),
        }
    }
}

/// A dense multi-axis binning result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binning {
    /// Reduced value per bin, row-major over the axes.
    pub bins: Vec<f64>,
    pub axes: Vec<BinAxis>,
    pub association: Association,
    /// Topology the samples were drawn from.
    pub topology: String,
    pub reduction_var: String,
    pub reduction_func: Reduction,
}

impl Binning {
    /// Name of the derived field `paint` writes: `<var>_<func>`.
    pub fn field_name(&self) -> String {
        format!("{}_{}", self.reduction_var, self.reduction_func.as_str())
    }
}

/// Implicit coordinate axes.
pub fn is_coord_axis(name: &str) -> bool {
    matches!(name, "x" | "y" | "z")
}

fn coord_axis_num(name: &str) -> usize {
    (name.as_bytes()[0] - b'x') as usize
}

/// Find the topology and association shared by every named field, and
/// make all ranks agree on them.
///
/// Rank 0's strings are broadcast length-prefixed and compared on every
/// rank, so a disagreement surfaces as the same error everywhere instead
/// of a desync.
pub fn resolve_topology(
    dataset: &Dataset,
    var_names: &[String],
    comm: &dyn Communicator,
) -> Result<(String, Association)> {
    let mut assoc: Option<Association> = None;
    let mut topo: Option<String> = None;

    for dom in &dataset.domains {
        for var in var_names {
            if is_coord_axis(var) {
                continue;
            }
            let Some(field) = dom.fields.get(var) else {
                continue;
            };
            match assoc {
                None => assoc = Some(field.association),
                Some(a) if a != field.association => {
                    return Err(MeshError::AssociationMismatch(
                        "all binning fields must share one association".to_string(),
                    ));
                }
                _ => {}
            }
            match &topo {
                None => topo = Some(field.topology.clone()),
                Some(t) if *t != field.topology => {
                    return Err(MeshError::TopologyMismatch(
                        "all binning fields must share one topology".to_string(),
                    ));
                }
                _ => {}
            }
        }
    }

    let (Some(assoc), Some(topo)) = (assoc, topo) else {
        return Err(MeshError::InvalidAxis(
            "binning needs at least one field-valued axis or reduction variable".to_string(),
        ));
    };

    let agreed_assoc = broadcast_string(comm, 0, assoc.as_str());
    if agreed_assoc != assoc.as_str() {
        return Err(MeshError::AssociationMismatch(format!(
            "ranks disagree on association: '{}' vs '{}'",
            assoc.as_str(),
            agreed_assoc
        )));
    }
    let agreed_topo = broadcast_string(comm, 0, &topo);
    if agreed_topo != topo {
        return Err(MeshError::TopologyMismatch(format!(
            "ranks disagree on topology: '{topo}' vs '{agreed_topo}'"
        )));
    }

    Ok((topo, assoc))
}

/// Spatial bounds and logical dims of a topology, reduced across ranks.
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
    /// Vertex dims per axis; 0 where no domain reported one.
    pub dims: [usize; 3],
}

pub fn global_bounds(
    dataset: &Dataset,
    topo_name: &str,
    comm: &dyn Communicator,
) -> Result<Bounds> {
    let mut min = [f64::MAX; 3];
    let mut max = [f64::MIN; 3];
    let mut dims = [0i64; 3];

    for dom in &dataset.domains {
        let topo = dom.topology(topo_name)?;
        let coords = dom.coordset_of(topo)?;
        match coords {
            Coordset::Uniform {
                dims: d,
                origin,
                spacing,
            } => {
                for axis in 0..d.len() {
                    min[axis] = min[axis].min(origin[axis]);
                    max[axis] = max[axis].max(origin[axis] + (d[axis] as f64 - 1.0) * spacing[axis]);
                    dims[axis] = dims[axis].max(d[axis] as i64);
                }
            }
            Coordset::Rectilinear { values } | Coordset::Explicit { values } => {
                for (axis, vals) in values.iter().enumerate() {
                    for &v in vals {
                        min[axis] = min[axis].min(v);
                        max[axis] = max[axis].max(v);
                    }
                }
                if let Coordset::Rectilinear { values } = coords {
                    for (axis, vals) in values.iter().enumerate() {
                        dims[axis] = dims[axis].max(vals.len() as i64);
                    }
                }
            }
        }
    }

    comm.min_f64_array(&mut min);
    comm.max_f64_array(&mut max);
    comm.max_i64_array(&mut dims);

    Ok(Bounds {
        min,
        max,
        dims: [dims[0] as usize, dims[1] as usize, dims[2] as usize],
    })
}

/// Fill in missing axis pieces from the dataset.
fn resolve_axes(
    dataset: &Dataset,
    specs: &[BinAxisSpec],
    topo_name: &str,
    assoc: Association,
    comm: &dyn Communicator,
) -> Result<Vec<BinAxis>> {
    let bounds = global_bounds(dataset, topo_name, comm)?;
    let mut axes = Vec::with_capacity(specs.len());

    for spec in specs {
        let (min_val, max_val, default_bins) = if is_coord_axis(&spec.name) {
            let axis_num = coord_axis_num(&spec.name);
            if bounds.min[axis_num] == f64::MAX {
                return Err(MeshError::InvalidAxis(format!(
                    "no bounds for axis '{}'; it does not exist in topology '{topo_name}'",
                    spec.name
                )));
            }
            let min_val = spec.min_val.unwrap_or(bounds.min[axis_num]);
            // the top bin is right-open, so the default range must clear
            // the largest coordinate
            let max_val = spec.max_val.unwrap_or(bounds.max[axis_num] + 1.0);
            let dim = bounds.dims[axis_num];
            let default_bins = if dim == 0 {
                (max_val - min_val).floor() as usize
            } else {
                match assoc {
                    Association::Vertex => dim,
                    Association::Element => dim - 1,
                }
            };
            (min_val, max_val, default_bins)
        } else {
            if !dataset.has_field(&spec.name, comm) {
                return Err(MeshError::FieldMissing {
                    field: spec.name.clone(),
                    known: dataset.known_fields(),
                });
            }
            let min_val = match spec.min_val {
                Some(v) => v,
                None => field_min(dataset, &spec.name, comm)?.value,
            };
            let max_val = match spec.max_val {
                Some(v) => v,
                None => field_max(dataset, &spec.name, comm)?.value + 1.0,
            };
            let default_bins = (max_val - min_val).floor() as usize;
            (min_val, max_val, default_bins)
        };

        let num_bins = spec.num_bins.unwrap_or(default_bins.max(1));
        if num_bins == 0 {
            return Err(MeshError::InvalidAxis(format!(
                "axis '{}' has zero bins",
                spec.name
            )));
        }
        if !(min_val < max_val) {
            return Err(MeshError::InvalidAxis(format!(
                "axis '{}' has empty range [{min_val}, {max_val})",
                spec.name
            )));
        }
        axes.push(BinAxis {
            name: spec.name.clone(),
            min_val,
            max_val,
            num_bins,
        });
    }
    Ok(axes)
}

/// Row-major strides: the last axis varies fastest.
fn strides(axes: &[BinAxis]) -> Vec<usize> {
    let mut strides = vec![1; axes.len()];
    for i in (0..axes.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * axes[i + 1].num_bins;
    }
    strides
}

/// Value of a sample along one axis: field value or coordinate
/// component.
fn axis_value(
    domain: &Domain,
    axis_name: &str,
    topo_name: &str,
    assoc: Association,
    sample: usize,
) -> Result<f64> {
    if let Some(field) = domain.fields.get(axis_name) {
        return field.values.get(sample).ok_or_else(|| {
            MeshError::TopologyMismatch(format!(
                "field '{axis_name}' is shorter than its topology"
            ))
        });
    }
    if is_coord_axis(axis_name) {
        let pos = match assoc {
            Association::Vertex => vertex_location(domain, topo_name, sample)?,
            Association::Element => element_location(domain, topo_name, sample)?,
        };
        return Ok(pos[coord_axis_num(axis_name)]);
    }
    Err(MeshError::FieldMissing {
        field: axis_name.to_string(),
        known: domain.fields.keys().cloned().collect(),
    })
}

/// Home bin per sample of one domain; `None` for samples falling
/// outside the lattice on any axis (dropped, consistently with the
/// histogram policy).
fn bin_homes(
    domain: &Domain,
    axes: &[BinAxis],
    topo_name: &str,
    assoc: Association,
) -> Result<Vec<Option<usize>>> {
    let n = domain.num_samples(topo_name, assoc)?;
    let strides = strides(axes);
    let mut homes: Vec<Option<usize>> = vec![Some(0); n];

    for (axis, stride) in axes.iter().zip(&strides) {
        for (sample, home) in homes.iter_mut().enumerate() {
            if home.is_none() {
                continue;
            }
            let v = axis_value(domain, &axis.name, topo_name, assoc, sample)?;
            match bin_index(v, axis.min_val, axis.max_val, axis.num_bins) {
                Some(b) => *home = home.map(|h| h + b * stride),
                None => *home = None,
            }
        }
    }
    Ok(homes)
}

/// Bin a field (or coordinate) over the given axes and reduce each bin.
pub fn binning(
    dataset: &Dataset,
    specs: &[BinAxisSpec],
    reduction_var: &str,
    reduction_func: Reduction,
    comm: &dyn Communicator,
) -> Result<Binning> {
    let mut var_names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
    var_names.push(reduction_var.to_string());

    let (topo_name, assoc) = resolve_topology(dataset, &var_names, comm)?;
    let axes = resolve_axes(dataset, specs, &topo_name, assoc, comm)?;

    let total: usize = axes.iter().map(|a| a.num_bins).product();
    debug!(
        var = reduction_var,
        func = reduction_func.as_str(),
        bins = total,
        "binning"
    );

    // accumulate everything each reduction might need, then finalize
    let mut count = vec![0.0f64; total];
    let mut sum = vec![0.0f64; total];
    let mut sumsq = vec![0.0f64; total];
    let mut min = vec![f64::MAX; total];
    let mut max = vec![f64::MIN; total];

    for dom in &dataset.domains {
        let homes = bin_homes(dom, &axes, &topo_name, assoc)?;
        for (sample, home) in homes.iter().enumerate() {
            let Some(home) = home else { continue };
            let v = axis_value(dom, reduction_var, &topo_name, assoc, sample)?;
            count[*home] += 1.0;
            sum[*home] += v;
            sumsq[*home] += v * v;
            min[*home] = min[*home].min(v);
            max[*home] = max[*home].max(v);
        }
    }

    comm.sum_f64_array(&mut count);
    comm.sum_f64_array(&mut sum);
    comm.sum_f64_array(&mut sumsq);
    comm.min_f64_array(&mut min);
    comm.max_f64_array(&mut max);

    let total_count: f64 = count.iter().sum();
    if matches!(reduction_func, Reduction::Pdf) && total_count <= 0.0 {
        return Err(MeshError::EmptyDomain(
            "pdf binning with no in-range samples".to_string(),
        ));
    }

    let bins: Vec<f64> = (0..total)
        .map(|i| {
            if count[i] == 0.0 {
                return 0.0;
            }
            match reduction_func {
                Reduction::Sum => sum[i],
                Reduction::Min => min[i],
                Reduction::Max => max[i],
                Reduction::Avg => sum[i] / count[i],
                Reduction::Count => count[i],
                Reduction::Rms => (sumsq[i] / count[i]).sqrt(),
                Reduction::Var => (sumsq[i] / count[i] - (sum[i] / count[i]).powi(2)).max(0.0),
                Reduction::Std => (sumsq[i] / count[i] - (sum[i] / count[i]).powi(2))
                    .max(0.0)
                    .sqrt(),
                Reduction::Pdf => count[i] / total_count,
            }
        })
        .collect();

    Ok(Binning {
        bins,
        axes,
        association: assoc,
        topology: topo_name,
        reduction_var: reduction_var.to_string(),
        reduction_func,
    })
}

/// Paint a binning back onto the mesh: each sample reads the reduced
/// value of its home bin. Writes field `<var>_<func>`; dropped samples
/// read 0.
pub fn paint(binning: &Binning, dataset: &mut Dataset) -> Result<String> {
    let field_name = binning.field_name();

    for dom in &mut dataset.domains {
        // fall back to the domain's first topology when the binning was
        // built purely from coordinate axes on another rank's naming
        let topo_name = if dom.topologies.contains_key(&binning.topology) {
            binning.topology.clone()
        } else {
            dom.topologies
                .keys()
                .next()
                .cloned()
                .ok_or_else(|| MeshError::EmptyDomain("domain without topology".to_string()))?
        };

        let homes = bin_homes(dom, &binning.axes, &topo_name, binning.association)?;
        let values: Vec<f64> = homes
            .iter()
            .map(|home| home.map_or(0.0, |h| binning.bins[h]))
            .collect();

        dom.fields.insert(
            field_name.clone(),
            Field {
                association: binning.association,
                topology: topo_name,
                values: FieldValues::Float64(values),
            },
        );
    }
    Ok(field_name)
}

/// Build a standalone uniform mesh over the bin lattice, carrying the
/// reduced values as a field. Supports up to three axes.
pub fn bin_mesh(binning: &Binning) -> Result<Dataset> {
    if binning.axes.len() > 3 {
        return Err(MeshError::TooManyAxes(binning.axes.len()));
    }

    let mut dims = Vec::new();
    let mut origin = Vec::new();
    let mut spacing = Vec::new();
    for axis in &binning.axes {
        let dim = match binning.association {
            Association::Vertex => axis.num_bins,
            Association::Element => axis.num_bins + 1,
        };
        dims.push(dim);
        origin.push(axis.min_val);
        spacing.push((axis.max_val - axis.min_val) / axis.num_bins as f64);
    }

    let mut dom = Domain::default();
    dom.coordsets.insert(
        "coords".to_string(),
        Coordset::Uniform {
            dims,
            origin,
            spacing,
        },
    );
    dom.topologies.insert(
        "topo".to_string(),
        Topology {
            coordset: "coords".to_string(),
            kind: TopologyKind::Uniform,
        },
    );
    dom.fields.insert(
        binning.field_name(),
        Field {
            association: binning.association,
            topology: "topo".to_string(),
            values: FieldValues::Float64(binning.bins.clone()),
        },
    );
    dom.state.domain_id = Some(0);

    Ok(Dataset { domains: vec![dom] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_foundation::SelfComm;

    /// 1D uniform mesh, 5 vertices at x = 0..4, one vertex field.
    fn line_dataset(values: Vec<f64>) -> Dataset {
        let n = values.len();
        let mut dom = Domain::default();
        dom.coordsets.insert(
            "coords".to_string(),
            Coordset::Uniform {
                dims: vec![n],
                origin: vec![0.0],
                spacing: vec![1.0],
            },
        );
        dom.topologies.insert(
            "mesh".to_string(),
            Topology {
                coordset: "coords".to_string(),
                kind: TopologyKind::Uniform,
            },
        );
        dom.fields.insert(
            "e".to_string(),
            Field {
                association: Association::Vertex,
                topology: "mesh".to_string(),
                values: FieldValues::Float64(values),
            },
        );
        dom.state.domain_id = Some(0);
        Dataset { domains: vec![dom] }
    }

    #[test]
    fn test_reduction_parse() {
        assert_eq!("rms".parse::<Reduction>().unwrap(), Reduction::Rms);
        assert!(matches!(
            "median".parse::<Reduction>().unwrap_err(),
            MeshError::UnknownReduction(_)
        ));
    }

    #[test]
    fn test_strides_row_major() {
        let axes = vec![
            BinAxis {
                name: "a".into(),
                min_val: 0.0,
                max_val: 1.0,
                num_bins: 4,
            },
            BinAxis {
                name: "b".into(),
                min_val: 0.0,
                max_val: 1.0,
                num_bins: 3,
            },
            BinAxis {
                name: "c".into(),
                min_val: 0.0,
                max_val: 1.0,
                num_bins: 2,
            },
        ];
        assert_eq!(strides(&axes), vec![6, 2, 1]);
    }

    #[test]
    fn test_binning_sum_over_x() {
        let ds = line_dataset(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let specs = vec![BinAxisSpec {
            name: "x".to_string(),
            min_val: Some(0.0),
            max_val: Some(5.0),
            num_bins: Some(5),
        }];
        let b = binning(&ds, &specs, "e", Reduction::Sum, &SelfComm).unwrap();
        assert_eq!(b.bins, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(b.association, Association::Vertex);
        assert_eq!(b.field_name(), "e_sum");
    }

    #[test]
    fn test_binning_statistics() {
        // two samples per bin: (1,3) and (2,6)
        let ds = line_dataset(vec![1.0, 3.0, 2.0, 6.0]);
        let specs = vec![BinAxisSpec {
            name: "x".to_string(),
            min_val: Some(0.0),
            max_val: Some(4.0),
            num_bins: Some(2),
        }];

        let avg = binning(&ds, &specs, "e", Reduction::Avg, &SelfComm).unwrap();
        assert_eq!(avg.bins, vec![2.0, 4.0]);

        let count = binning(&ds, &specs, "e", Reduction::Count, &SelfComm).unwrap();
        assert_eq!(count.bins, vec![2.0, 2.0]);

        let var = binning(&ds, &specs, "e", Reduction::Var, &SelfComm).unwrap();
        assert_eq!(var.bins, vec![1.0, 4.0]);

        let std = binning(&ds, &specs, "e", Reduction::Std, &SelfComm).unwrap();
        assert_eq!(std.bins, vec![1.0, 2.0]);

        let pdf = binning(&ds, &specs, "e", Reduction::Pdf, &SelfComm).unwrap();
        assert_eq!(pdf.bins, vec![0.5, 0.5]);

        let rms = binning(&ds, &specs, "e", Reduction::Rms, &SelfComm).unwrap();
        // bin 0 holds 1 and 3: rms = sqrt((1 + 9) / 2)
        assert!((rms.bins[0] - 5.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_paint_round_trip() {
        let ds = line_dataset(vec![1.0, 2.0, 3.0, 4.0]);
        let specs = vec![BinAxisSpec {
            name: "e".to_string(),
            min_val: Some(0.0),
            max_val: Some(5.0),
            num_bins: Some(5),
        }];
        let b = binning(&ds, &specs, "e", Reduction::Sum, &SelfComm).unwrap();

        let mut painted = ds.clone();
        let name = paint(&b, &mut painted).unwrap();
        assert_eq!(name, "e_sum");

        // every sample reads back its home bin's value
        let field = &painted.domains[0].fields["e_sum"];
        let homes = bin_homes(
            &ds.domains[0],
            &b.axes,
            &b.topology,
            b.association,
        )
        .unwrap();
        for (i, home) in homes.iter().enumerate() {
            let expected = home.map_or(0.0, |h| b.bins[h]);
            assert_eq!(field.values.get(i).unwrap(), expected);
        }
    }

    #[test]
    fn test_out_of_range_samples_dropped() {
        let ds = line_dataset(vec![1.0, 2.0, 3.0, 100.0]);
        let specs = vec![BinAxisSpec {
            name: "e".to_string(),
            min_val: Some(0.0),
            max_val: Some(4.0),
            num_bins: Some(4),
        }];
        let b = binning(&ds, &specs, "e", Reduction::Count, &SelfComm).unwrap();
        assert_eq!(b.bins.iter().sum::<f64>(), 3.0);
    }

    #[test]
    fn test_bin_mesh_shape() {
        let ds = line_dataset(vec![1.0, 2.0, 3.0, 4.0]);
        let specs = vec![BinAxisSpec {
            name: "x".to_string(),
            min_val: Some(0.0),
            max_val: Some(4.0),
            num_bins: Some(4),
        }];
        let b = binning(&ds, &specs, "e", Reduction::Sum, &SelfComm).unwrap();
        let mesh = bin_mesh(&b).unwrap();

        let dom = &mesh.domains[0];
        match &dom.coordsets["coords"] {
            Coordset::Uniform { dims, origin, spacing } => {
                // vertex association: one lattice point per bin
                assert_eq!(dims, &vec![4]);
                assert_eq!(origin, &vec![0.0]);
                assert_eq!(spacing, &vec![1.0]);
            }
            other => panic!("expected uniform coordset, got {other:?}"),
        }
        assert_eq!(dom.fields["e_sum"].values.len(), 4);
    }

    #[test]
    fn test_all_coord_axes_needs_a_field() {
        // reduction var is also a coordinate: nothing pins the topology
        let ds = line_dataset(vec![1.0, 2.0]);
        let specs = vec![BinAxisSpec::named("x")];
        assert!(matches!(
            binning(&ds, &specs, "x", Reduction::Sum, &SelfComm).unwrap_err(),
            MeshError::InvalidAxis(_)
        ));
    }
}
