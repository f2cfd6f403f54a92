//! Multi-axis binning filters.

use conflux_flow::{Filter, FilterContext, FilterInterface, FlowError, Result};
use conflux_foundation::comm;
use conflux_mesh::binning::{binning, paint, BinAxisSpec};
use conflux_mesh::Reduction;

use crate::filters::{dataset_handle, meshvar_name, node_input, read_dataset, write_dataset};
use crate::value::{Value, ValueNode};

/// `expr_binning` — `binning(reduction_var, reduction_func, axis...)`.
///
/// Axes are field names or the implicit coordinates `x`/`y`/`z`; up to
/// three axis ports, unused ones left empty by the lowering.
pub struct ExprBinning;

impl Filter for ExprBinning {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("expr_binning").ports(["arg1", "arg2", "arg3", "arg4", "arg5"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let reduction_var = meshvar_name(node_input(ctx, "arg1")?)?.to_string();
        let reduction_func = meshvar_name(node_input(ctx, "arg2")?)?
            .parse::<Reduction>()
            .map_err(FlowError::execution)?;

        let mut specs = Vec::new();
        for port in ["arg3", "arg4", "arg5"] {
            if ctx.has_input(port) {
                let axis = meshvar_name(node_input(ctx, port)?)?;
                specs.push(BinAxisSpec::named(axis));
            }
        }
        if specs.is_empty() {
            return Err(FlowError::execution("binning needs at least one axis"));
        }

        let handle = dataset_handle(ctx)?;
        let dataset = read_dataset(&handle)?;
        let comm = comm::default();

        let result = binning(&dataset, &specs, &reduction_var, reduction_func, comm.as_ref())
            .map_err(FlowError::execution)?;
        ctx.set_output_value(ValueNode::binning(result));
        Ok(())
    }
}

/// `paint_binning` — write a binning back onto the published dataset as
/// a derived field, returning the new field's name.
pub struct PaintBinning;

impl Filter for PaintBinning {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("paint_binning").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let input = node_input(ctx, "arg1")?;
        let Value::Binning(b) = &input.value else {
            return Err(FlowError::execution(format!(
                "expected a binning, got {}",
                input.type_name()
            )));
        };
        let b = b.clone();

        let handle = dataset_handle(ctx)?;
        let mut dataset = write_dataset(&handle)?;
        let field_name = paint(&b, &mut dataset).map_err(FlowError::execution)?;

        ctx.set_output_value(ValueNode::meshvar(field_name));
        Ok(())
    }
}
