//! Field reductions.
//!
//! Per-domain kernels run locally (rayon carries the wide loops), then
//! results combine across ranks through the communicator: SUM for sums,
//! counts and histogram bins, MINLOC/MAXLOC for extrema with the
//! position broadcast from the winning rank.

use rayon::prelude::*;
use tracing::trace;

use conflux_foundation::Communicator;

use crate::dataset::{Association, Dataset, FieldValues};
use crate::error::{MeshError, Result};
use crate::location::{element_location, vertex_location};

/// Local array extremum: value plus the first index holding it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrayExtreme {
    pub value: f64,
    pub index: usize,
}

/// Minimum of an array with its first index. `None` on empty input.
pub fn array_min(values: &FieldValues) -> Option<ArrayExtreme> {
    let mut best: Option<ArrayExtreme> = None;
    for (index, value) in values.iter_f64().enumerate() {
        if best.map_or(true, |b| value < b.value) {
            best = Some(ArrayExtreme { value, index });
        }
    }
    best
}

/// Maximum of an array with its first index. `None` on empty input.
pub fn array_max(values: &FieldValues) -> Option<ArrayExtreme> {
    let mut best: Option<ArrayExtreme> = None;
    for (index, value) in values.iter_f64().enumerate() {
        if best.map_or(true, |b| value > b.value) {
            best = Some(ArrayExtreme { value, index });
        }
    }
    best
}

/// Sum and sample count of an array.
pub fn array_sum(values: &FieldValues) -> (f64, u64) {
    let sum = match values {
        FieldValues::Float32(v) => v.par_iter().map(|&x| x as f64).sum(),
        FieldValues::Float64(v) => v.par_iter().sum(),
    };
    (sum, values.len() as u64)
}

/// Count of NaN entries.
pub fn array_nan_count(values: &FieldValues) -> u64 {
    match values {
        FieldValues::Float32(v) => v.par_iter().filter(|x| x.is_nan()).count() as u64,
        FieldValues::Float64(v) => v.par_iter().filter(|x| x.is_nan()).count() as u64,
    }
}

/// Count of infinite entries.
pub fn array_inf_count(values: &FieldValues) -> u64 {
    match values {
        FieldValues::Float32(v) => v.par_iter().filter(|x| x.is_infinite()).count() as u64,
        FieldValues::Float64(v) => v.par_iter().filter(|x| x.is_infinite()).count() as u64,
    }
}

/// A field extremum with everything the caller wants to know about
/// where it lives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldExtreme {
    pub value: f64,
    /// Flat sample index within the winning domain.
    pub index: usize,
    pub domain_id: u32,
    /// Rank holding the extremum.
    pub rank: usize,
    /// Vertex position or element center, per the field's association.
    pub position: [f64; 3],
}

enum Extreme {
    Min,
    Max,
}

fn field_extreme(
    dataset: &Dataset,
    field: &str,
    comm: &dyn Communicator,
    which: Extreme,
) -> Result<FieldExtreme> {
    let mut best: Option<(f64, usize, usize)> = None; // value, domain idx, sample idx
    for (dom_idx, dom) in dataset.domains.iter().enumerate() {
        let Some(f) = dom.fields.get(field) else {
            continue;
        };
        let local = match which {
            Extreme::Min => array_min(&f.values),
            Extreme::Max => array_max(&f.values),
        };
        if let Some(ext) = local {
            let better = match (&best, &which) {
                (None, _) => true,
                (Some((v, _, _)), Extreme::Min) => ext.value < *v,
                (Some((v, _, _)), Extreme::Max) => ext.value > *v,
            };
            if better {
                best = Some((ext.value, dom_idx, ext.index));
            }
        }
    }

    // resolve the local winner's position before the cross-rank vote
    let (local_value, mut index, mut domain_id, mut position) = match best {
        Some((value, dom_idx, index)) => {
            let dom = &dataset.domains[dom_idx];
            let f = &dom.fields[field];
            let position = match f.association {
                Association::Vertex => vertex_location(dom, &f.topology, index)?,
                Association::Element => element_location(dom, &f.topology, index)?,
            };
            let domain_id = dom.state.domain_id.unwrap_or(dom_idx as u32);
            (value, index, domain_id, position)
        }
        None => {
            if comm.size() == 1 {
                return Err(MeshError::FieldMissing {
                    field: field.to_string(),
                    known: dataset.known_fields(),
                });
            }
            // this rank has no samples; lose the vote
            let sentinel = match which {
                Extreme::Min => f64::INFINITY,
                Extreme::Max => f64::NEG_INFINITY,
            };
            (sentinel, 0, 0, [0.0; 3])
        }
    };

    let (value, rank) = match which {
        Extreme::Min => comm.minloc(local_value),
        Extreme::Max => comm.maxloc(local_value),
    };

    // winner broadcasts the location data every other rank is missing
    let mut payload = Vec::with_capacity(3 * 8 + 4 + 8);
    if comm.rank() == rank {
        for p in position {
            payload.extend_from_slice(&p.to_le_bytes());
        }
        payload.extend_from_slice(&domain_id.to_le_bytes());
        payload.extend_from_slice(&(index as u64).to_le_bytes());
    }
    comm.broadcast_bytes(rank, &mut payload);
    if payload.len() == 3 * 8 + 4 + 8 {
        for (axis, chunk) in payload[..24].chunks_exact(8).enumerate() {
            position[axis] = f64::from_le_bytes(chunk.try_into().expect("8-byte chunk"));
        }
        domain_id = u32::from_le_bytes(payload[24..28].try_into().expect("4 bytes"));
        index = u64::from_le_bytes(payload[28..36].try_into().expect("8 bytes")) as usize;
    }

    trace!(field, value, rank, domain_id, "field extreme");
    Ok(FieldExtreme {
        value,
        index,
        domain_id,
        rank,
        position,
    })
}

/// Smallest field value across all domains and ranks, with its location.
pub fn field_min(dataset: &Dataset, field: &str, comm: &dyn Communicator) -> Result<FieldExtreme> {
    field_extreme(dataset, field, comm, Extreme::Min)
}

/// Largest field value across all domains and ranks, with its location.
pub fn field_max(dataset: &Dataset, field: &str, comm: &dyn Communicator) -> Result<FieldExtreme> {
    field_extreme(dataset, field, comm, Extreme::Max)
}

/// Global sum and sample count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldTotal {
    pub value: f64,
    pub count: u64,
}

pub fn field_sum(dataset: &Dataset, field: &str, comm: &dyn Communicator) -> Result<FieldTotal> {
    let mut sum = 0.0;
    let mut count: u64 = 0;
    for dom in &dataset.domains {
        if let Some(f) = dom.fields.get(field) {
            let (s, c) = array_sum(&f.values);
            sum += s;
            count += c;
        }
    }
    let value = comm.sum_f64(sum);
    let count = comm.sum_i64(count as i64) as u64;
    if count == 0 {
        return Err(MeshError::EmptyDomain(format!(
            "field '{field}' has no samples on any rank"
        )));
    }
    Ok(FieldTotal { value, count })
}

pub fn field_avg(dataset: &Dataset, field: &str, comm: &dyn Communicator) -> Result<f64> {
    let total = field_sum(dataset, field, comm)?;
    Ok(total.value / total.count as f64)
}

pub fn field_nan_count(dataset: &Dataset, field: &str, comm: &dyn Communicator) -> u64 {
    let local: u64 = dataset
        .domains
        .iter()
        .filter_map(|d| d.fields.get(field))
        .map(|f| array_nan_count(&f.values))
        .sum();
    comm.sum_i64(local as i64) as u64
}

pub fn field_inf_count(dataset: &Dataset, field: &str, comm: &dyn Communicator) -> u64 {
    let local: u64 = dataset
        .domains
        .iter()
        .filter_map(|d| d.fields.get(field))
        .map(|f| array_inf_count(&f.values))
        .sum();
    comm.sum_i64(local as i64) as u64
}

/// A histogram (or a pdf/cdf derived from one) over `[min_val, max_val)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub bins: Vec<f64>,
    pub min_val: f64,
    pub max_val: f64,
}

impl Histogram {
    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }
}

/// Bin index for a sample, or `None` when the sample lies outside
/// `[min_val, max_val)`.
///
/// Out-of-range samples are dropped — every reduction in this module
/// applies that policy consistently. In-range samples clamp to the top
/// bin to absorb floating-point edge effects.
pub(crate) fn bin_index(value: f64, min_val: f64, max_val: f64, num_bins: usize) -> Option<usize> {
    if value.is_nan() || value < min_val || value >= max_val {
        return None;
    }
    let idx = ((value - min_val) * num_bins as f64 / (max_val - min_val)) as usize;
    Some(idx.min(num_bins - 1))
}

/// Histogram of a field: per-domain binning, bins all-reduced with SUM.
pub fn field_histogram(
    dataset: &Dataset,
    field: &str,
    min_val: f64,
    max_val: f64,
    num_bins: usize,
    comm: &dyn Communicator,
) -> Result<Histogram> {
    if num_bins == 0 {
        return Err(MeshError::NumericOutOfRange(
            "histogram needs at least one bin".to_string(),
        ));
    }
    if !(min_val < max_val) {
        return Err(MeshError::NumericOutOfRange(format!(
            "histogram range is empty: [{min_val}, {max_val})"
        )));
    }

    let mut bins = vec![0.0; num_bins];
    for dom in &dataset.domains {
        if let Some(f) = dom.fields.get(field) {
            for value in f.values.iter_f64() {
                if let Some(idx) = bin_index(value, min_val, max_val, num_bins) {
                    bins[idx] += 1.0;
                }
            }
        }
    }
    comm.sum_f64_array(&mut bins);

    Ok(Histogram {
        bins,
        min_val,
        max_val,
    })
}

/// Shannon entropy of a histogram: `-Σ p_i ln p_i` over non-zero bins.
pub fn entropy(hist: &Histogram) -> Result<f64> {
    let total: f64 = hist.bins.iter().sum();
    if total <= 0.0 {
        return Err(MeshError::EmptyDomain(
            "entropy of an empty histogram".to_string(),
        ));
    }
    let mut h = 0.0;
    for &b in &hist.bins {
        if b != 0.0 {
            let p = b / total;
            h -= p * p.ln();
        }
    }
    Ok(h)
}

/// Normalize a histogram into a probability density.
pub fn pdf(hist: &Histogram) -> Result<Histogram> {
    let total: f64 = hist.bins.iter().sum();
    if total <= 0.0 {
        return Err(MeshError::EmptyDomain(
            "pdf of an empty histogram".to_string(),
        ));
    }
    Ok(Histogram {
        bins: hist.bins.iter().map(|b| b / total).collect(),
        min_val: hist.min_val,
        max_val: hist.max_val,
    })
}

/// Cumulative distribution of a histogram.
pub fn cdf(hist: &Histogram) -> Result<Histogram> {
    let total: f64 = hist.bins.iter().sum();
    if total <= 0.0 {
        return Err(MeshError::EmptyDomain(
            "cdf of an empty histogram".to_string(),
        ));
    }
    let mut rolling = 0.0;
    let bins = hist
        .bins
        .iter()
        .map(|b| {
            rolling += b / total;
            rolling
        })
        .collect();
    Ok(Histogram {
        bins,
        min_val: hist.min_val,
        max_val: hist.max_val,
    })
}

/// Quantile interpolation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Lower,
    Higher,
    Midpoint,
    Nearest,
}

impl std::str::FromStr for Interpolation {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Interpolation::Linear),
            "lower" => Ok(Interpolation::Lower),
            "higher" => Ok(Interpolation::Higher),
            "midpoint" => Ok(Interpolation::Midpoint),
            "nearest" => Ok(Interpolation::Nearest),
            other => Err(MeshError::UnknownInterpolation(other.to_string())),
        }
    }
}

/// Value at quantile `q` of a CDF (as produced by [`cdf`]).
pub fn quantile(cdf: &Histogram, q: f64, interpolation: Interpolation) -> Result<f64> {
    if !(0.0..=1.0).contains(&q) {
        return Err(MeshError::NumericOutOfRange(format!(
            "quantile {q} outside [0, 1]"
        )));
    }
    let num_bins = cdf.num_bins();
    if num_bins == 0 {
        return Err(MeshError::EmptyDomain("quantile of empty cdf".to_string()));
    }

    // first bin whose cumulative mass reaches q, backed off by one when
    // it overshoots (matching how the quantile sits between boundaries)
    let mut bin = cdf
        .bins
        .iter()
        .position(|&c| c >= q)
        .unwrap_or(num_bins - 1);
    if cdf.bins[bin] > q {
        bin = bin.saturating_sub(1);
    }

    let width = (cdf.max_val - cdf.min_val) / num_bins as f64;
    let lo = cdf.min_val + bin as f64 * width;
    let hi = lo + width;

    let value = match interpolation {
        Interpolation::Linear => {
            let c_lo = cdf.bins[bin];
            let c_hi = cdf.bins[(bin + 1).min(num_bins - 1)];
            if c_hi - c_lo == 0.0 {
                lo
            } else {
                lo + (hi - lo) * (q - c_lo) / (c_hi - c_lo)
            }
        }
        Interpolation::Lower => lo,
        Interpolation::Higher => hi,
        Interpolation::Midpoint => (lo + hi) / 2.0,
        Interpolation::Nearest => {
            if q - lo < hi - q {
                lo
            } else {
                hi
            }
        }
    };
    Ok(value)
}
