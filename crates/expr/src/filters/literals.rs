//! Literal and identifier filters: graph sources emitting one value.

use std::sync::RwLock;

use conflux_flow::{Filter, FilterContext, FilterInterface, FlowError, Result};
use conflux_foundation::{params, Params, VerifyInfo};

use crate::eval::ExprCache;
use crate::value::ValueNode;

/// `expr_integer` — integer literal. The integer tag is preserved; no
/// promotion happens here.
pub struct ExprInteger;

impl Filter for ExprInteger {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("expr_integer")
    }

    fn verify_params(&self, params: &Params, info: &mut VerifyInfo) -> bool {
        if params::get_i64(params, "value").is_none() {
            info.error("missing required integer parameter 'value'");
            return false;
        }
        true
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let value = params::require_i64(ctx.params(), "value")?;
        ctx.set_output_value(ValueNode::scalar_int(value));
        Ok(())
    }
}

/// `expr_double` — floating-point literal.
pub struct ExprDouble;

impl Filter for ExprDouble {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("expr_double")
    }

    fn verify_params(&self, params: &Params, info: &mut VerifyInfo) -> bool {
        if params::get_f64(params, "value").is_none() {
            info.error("missing required numeric parameter 'value'");
            return false;
        }
        true
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let value = params::require_f64(ctx.params(), "value")?;
        ctx.set_output_value(ValueNode::scalar(value));
        Ok(())
    }
}

/// `expr_boolean` — boolean literal.
pub struct ExprBoolean;

impl Filter for ExprBoolean {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("expr_boolean")
    }

    fn verify_params(&self, params: &Params, info: &mut VerifyInfo) -> bool {
        if params::get_bool(params, "value").is_none() {
            info.error("missing required boolean parameter 'value'");
            return false;
        }
        true
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let value = params::get_bool(ctx.params(), "value")
            .ok_or_else(|| FlowError::execution("missing boolean parameter 'value'"))?;
        ctx.set_output_value(ValueNode::boolean(value));
        Ok(())
    }
}

/// `expr_meshvar` — quoted string: a reference to a named mesh field.
pub struct ExprMeshVar;

impl Filter for ExprMeshVar {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("expr_meshvar")
    }

    fn verify_params(&self, params: &Params, info: &mut VerifyInfo) -> bool {
        if params::get_str(params, "value").is_none() {
            info.error("missing required string parameter 'value'");
            return false;
        }
        true
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let value = params::require_str(ctx.params(), "value")?;
        ctx.set_output_value(ValueNode::meshvar(value));
        Ok(())
    }
}

/// `expr_identifier` — reads the most recent cached result for a name.
pub struct ExprIdentifier;

impl Filter for ExprIdentifier {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("expr_identifier")
    }

    fn verify_params(&self, params: &Params, info: &mut VerifyInfo) -> bool {
        if params::get_str(params, "value").is_none() {
            info.error("missing required string parameter 'value'");
            return false;
        }
        true
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let name = params::require_str(ctx.params(), "value")?.to_string();
        let cache = ctx.ambient::<RwLock<ExprCache>>("cache")?;
        let cache = cache
            .read()
            .map_err(|_| FlowError::execution("expression cache lock poisoned"))?;

        let node = cache
            .latest(&name)
            .ok_or_else(|| {
                FlowError::execution(format!("unknown expression identifier: '{name}'"))
            })?
            .clone();
        ctx.set_output_value(node);
        Ok(())
    }
}
