//! Histogram family: binning a field and the statistics derived from
//! the result.

use conflux_flow::{Filter, FilterContext, FilterInterface, FlowError, Result};
use conflux_foundation::comm;
use conflux_mesh::{reduce, MeshError};

use crate::filters::{
    dataset_handle, histogram_input, meshvar_name, node_input, read_dataset, scalar_count,
    scalar_f64,
};
use crate::value::ValueNode;

/// `field_histogram` — histogram of a field.
///
/// Two call shapes share this filter: `(field, min, max, bins)` with all
/// four ports bound, and `(field, bins)` with `arg3`/`arg4` left empty,
/// where the range comes from the field's global extrema (upper bound
/// nudged one ulp so the maximum sample still lands in the top bin).
pub struct FieldHistogram;

impl Filter for FieldHistogram {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("field_histogram").ports(["arg1", "arg2", "arg3", "arg4"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let field = meshvar_name(node_input(ctx, "arg1")?)?.to_string();
        let handle = dataset_handle(ctx)?;
        let dataset = read_dataset(&handle)?;
        let comm = comm::default();

        if !dataset.has_field(&field, comm.as_ref()) {
            return Err(FlowError::execution(MeshError::FieldMissing {
                field,
                known: dataset.known_fields(),
            }));
        }

        let full_form = ctx.has_input("arg3") || ctx.has_input("arg4");
        let (min_val, max_val, num_bins) = if full_form {
            (
                scalar_f64(node_input(ctx, "arg2")?)?,
                scalar_f64(node_input(ctx, "arg3")?)?,
                scalar_count(node_input(ctx, "arg4")?)?,
            )
        } else {
            let num_bins = scalar_count(node_input(ctx, "arg2")?)?;
            let lo = reduce::field_min(&dataset, &field, comm.as_ref())
                .map_err(FlowError::execution)?
                .value;
            let hi = reduce::field_max(&dataset, &field, comm.as_ref())
                .map_err(FlowError::execution)?
                .value;
            (lo, hi.next_up(), num_bins)
        };

        let hist =
            reduce::field_histogram(&dataset, &field, min_val, max_val, num_bins, comm.as_ref())
                .map_err(FlowError::execution)?;
        ctx.set_output_value(ValueNode::histogram(hist));
        Ok(())
    }
}

/// `field_entropy` — Shannon entropy of a histogram.
pub struct FieldEntropy;

impl Filter for FieldEntropy {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("field_entropy").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let hist = histogram_input(node_input(ctx, "arg1")?)?;
        let h = reduce::entropy(hist).map_err(FlowError::execution)?;
        ctx.set_output_value(ValueNode::scalar(h));
        Ok(())
    }
}

/// `field_pdf` — histogram normalized to a probability density.
pub struct FieldPdf;

impl Filter for FieldPdf {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("field_pdf").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let hist = histogram_input(node_input(ctx, "arg1")?)?;
        let pdf = reduce::pdf(hist).map_err(FlowError::execution)?;
        ctx.set_output_value(ValueNode::histogram(pdf));
        Ok(())
    }
}

/// `field_cdf` — cumulative distribution of a histogram.
pub struct FieldCdf;

impl Filter for FieldCdf {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("field_cdf").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let hist = histogram_input(node_input(ctx, "arg1")?)?;
        let cdf = reduce::cdf(hist).map_err(FlowError::execution)?;
        ctx.set_output_value(ValueNode::histogram(cdf));
        Ok(())
    }
}

/// `quantile` — value at a quantile of a CDF. The optional third port
/// names the interpolation (`linear` when left empty).
pub struct Quantile;

impl Filter for Quantile {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("quantile").ports(["arg1", "arg2", "arg3"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let cdf = histogram_input(node_input(ctx, "arg1")?)?;
        let q = scalar_f64(node_input(ctx, "arg2")?)?;
        let interp = if ctx.has_input("arg3") {
            meshvar_name(node_input(ctx, "arg3")?)?
                .parse::<reduce::Interpolation>()
                .map_err(FlowError::execution)?
        } else {
            reduce::Interpolation::Linear
        };

        let v = reduce::quantile(cdf, q, interp).map_err(FlowError::execution)?;
        ctx.set_output_value(ValueNode::scalar(v));
        Ok(())
    }
}
