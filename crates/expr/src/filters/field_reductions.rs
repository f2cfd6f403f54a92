//! Field reduction filters: collective operations over the published
//! dataset.
//!
//! Every one of these is a collective — all ranks reach it at the same
//! point in the deterministic execution order, so the communicator
//! calls inside the mesh layer line up.

use conflux_flow::{Filter, FilterContext, FilterInterface, FlowError, Result};
use conflux_foundation::comm;
use conflux_mesh::{reduce, MeshError};

use crate::filters::{dataset_handle, meshvar_name, node_input, read_dataset};
use crate::value::{Atts, ValueNode};

fn missing_field(field: &str, known: Vec<String>) -> FlowError {
    FlowError::execution(MeshError::FieldMissing {
        field: field.to_string(),
        known,
    })
}

/// `field_max` — largest value of a field, with its location.
pub struct FieldMax;

impl Filter for FieldMax {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("field_max").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let field = meshvar_name(node_input(ctx, "arg1")?)?.to_string();
        let handle = dataset_handle(ctx)?;
        let dataset = read_dataset(&handle)?;
        let comm = comm::default();

        if !dataset.has_field(&field, comm.as_ref()) {
            return Err(missing_field(&field, dataset.known_fields()));
        }
        let ext = reduce::field_max(&dataset, &field, comm.as_ref())
            .map_err(FlowError::execution)?;

        ctx.set_output_value(ValueNode::scalar(ext.value).with_atts(Atts {
            position: Some(ext.position),
            domain_id: Some(ext.domain_id),
            rank: Some(ext.rank),
            count: None,
        }));
        Ok(())
    }
}

/// `field_min` — smallest value of a field, with its location.
pub struct FieldMin;

impl Filter for FieldMin {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("field_min").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let field = meshvar_name(node_input(ctx, "arg1")?)?.to_string();
        let handle = dataset_handle(ctx)?;
        let dataset = read_dataset(&handle)?;
        let comm = comm::default();

        if !dataset.has_field(&field, comm.as_ref()) {
            return Err(missing_field(&field, dataset.known_fields()));
        }
        let ext = reduce::field_min(&dataset, &field, comm.as_ref())
            .map_err(FlowError::execution)?;

        ctx.set_output_value(ValueNode::scalar(ext.value).with_atts(Atts {
            position: Some(ext.position),
            domain_id: Some(ext.domain_id),
            rank: Some(ext.rank),
            count: None,
        }));
        Ok(())
    }
}

/// `field_avg` — mean of a field across all domains and ranks.
pub struct FieldAvg;

impl Filter for FieldAvg {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("field_avg").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let field = meshvar_name(node_input(ctx, "arg1")?)?.to_string();
        let handle = dataset_handle(ctx)?;
        let dataset = read_dataset(&handle)?;
        let comm = comm::default();

        if !dataset.has_field(&field, comm.as_ref()) {
            return Err(missing_field(&field, dataset.known_fields()));
        }
        let avg =
            reduce::field_avg(&dataset, &field, comm.as_ref()).map_err(FlowError::execution)?;
        ctx.set_output_value(ValueNode::scalar(avg));
        Ok(())
    }
}

/// `field_sum` — sum of a field; the sample count rides along as an
/// attribute.
pub struct FieldSum;

impl Filter for FieldSum {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("field_sum").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let field = meshvar_name(node_input(ctx, "arg1")?)?.to_string();
        let handle = dataset_handle(ctx)?;
        let dataset = read_dataset(&handle)?;
        let comm = comm::default();

        if !dataset.has_field(&field, comm.as_ref()) {
            return Err(missing_field(&field, dataset.known_fields()));
        }
        let total =
            reduce::field_sum(&dataset, &field, comm.as_ref()).map_err(FlowError::execution)?;

        ctx.set_output_value(ValueNode::scalar(total.value).with_atts(Atts {
            count: Some(total.count),
            ..Atts::default()
        }));
        Ok(())
    }
}

/// `field_nan_count` — NaN entries across the field.
pub struct FieldNanCount;

impl Filter for FieldNanCount {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("field_nan_count").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let field = meshvar_name(node_input(ctx, "arg1")?)?.to_string();
        let handle = dataset_handle(ctx)?;
        let dataset = read_dataset(&handle)?;
        let comm = comm::default();

        if !dataset.has_field(&field, comm.as_ref()) {
            return Err(missing_field(&field, dataset.known_fields()));
        }
        let count = reduce::field_nan_count(&dataset, &field, comm.as_ref());
        ctx.set_output_value(ValueNode::scalar_int(count as i64));
        Ok(())
    }
}

/// `field_inf_count` — infinite entries across the field.
pub struct FieldInfCount;

impl Filter for FieldInfCount {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("field_inf_count").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let field = meshvar_name(node_input(ctx, "arg1")?)?.to_string();
        let handle = dataset_handle(ctx)?;
        let dataset = read_dataset(&handle)?;
        let comm = comm::default();

        if !dataset.has_field(&field, comm.as_ref()) {
            return Err(missing_field(&field, dataset.known_fields()));
        }
        let count = reduce::field_inf_count(&dataset, &field, comm.as_ref());
        ctx.set_output_value(ValueNode::scalar_int(count as i64));
        Ok(())
    }
}
