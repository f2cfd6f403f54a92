//! Scalar and vector math builtins.

use conflux_flow::{Filter, FilterContext, FilterInterface, FlowError, Result};

use crate::filters::{dataset_handle, node_input, read_dataset, scalar_f64};
use crate::value::{Value, ValueNode};

/// `expr_vector` — build a 3-vector from three scalars.
pub struct ExprVector;

impl Filter for ExprVector {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("expr_vector").ports(["arg1", "arg2", "arg3"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let x = scalar_f64(node_input(ctx, "arg1")?)?;
        let y = scalar_f64(node_input(ctx, "arg2")?)?;
        let z = scalar_f64(node_input(ctx, "arg3")?)?;
        ctx.set_output_value(ValueNode::vector([x, y, z]));
        Ok(())
    }
}

/// `expr_magnitude` — Euclidean length of a vector.
pub struct Magnitude;

impl Filter for Magnitude {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("expr_magnitude").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let input = node_input(ctx, "arg1")?;
        let Value::Vector(v) = &input.value else {
            return Err(FlowError::execution(format!(
                "magnitude expects a vector, got {}",
                input.type_name()
            )));
        };
        ctx.set_output_value(ValueNode::scalar(
            (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt(),
        ));
        Ok(())
    }
}

/// `scalar_abs` — absolute value, integer-preserving.
pub struct ScalarAbs;

impl Filter for ScalarAbs {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("scalar_abs").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let input = node_input(ctx, "arg1")?;
        let out = match &input.value {
            Value::Int(v) => ValueNode::scalar_int(v.abs()),
            Value::Double(v) => ValueNode::scalar(v.abs()),
            _ => {
                return Err(FlowError::execution(format!(
                    "abs expects a scalar, got {}",
                    input.type_name()
                )));
            }
        };
        ctx.set_output_value(out);
        Ok(())
    }
}

/// `scalar_sqrt` — square root; always a double.
pub struct ScalarSqrt;

impl Filter for ScalarSqrt {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("scalar_sqrt").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let v = scalar_f64(node_input(ctx, "arg1")?)?;
        if v < 0.0 {
            return Err(FlowError::execution(format!("sqrt of negative value {v}")));
        }
        ctx.set_output_value(ValueNode::scalar(v.sqrt()));
        Ok(())
    }
}

/// `scalar_exp` — e^x.
pub struct ScalarExp;

impl Filter for ScalarExp {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("scalar_exp").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let v = scalar_f64(node_input(ctx, "arg1")?)?;
        ctx.set_output_value(ValueNode::scalar(v.exp()));
        Ok(())
    }
}

/// `scalar_log` — natural logarithm.
pub struct ScalarLog;

impl Filter for ScalarLog {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("scalar_log").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let v = scalar_f64(node_input(ctx, "arg1")?)?;
        if v <= 0.0 {
            return Err(FlowError::execution(format!("log of non-positive value {v}")));
        }
        ctx.set_output_value(ValueNode::scalar(v.ln()));
        Ok(())
    }
}

/// `scalar_pow` — x^y as doubles.
pub struct ScalarPow;

impl Filter for ScalarPow {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("scalar_pow").ports(["arg1", "arg2"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let base = scalar_f64(node_input(ctx, "arg1")?)?;
        let exponent = scalar_f64(node_input(ctx, "arg2")?)?;
        ctx.set_output_value(ValueNode::scalar(base.powf(exponent)));
        Ok(())
    }
}

/// `time` — the dataset's time state variable.
pub struct Time;

impl Filter for Time {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("time")
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let handle = dataset_handle(ctx)?;
        let dataset = read_dataset(&handle)?;
        let time = dataset.state_time().map_err(FlowError::execution)?;
        ctx.set_output_value(ValueNode::scalar(time));
        Ok(())
    }
}
