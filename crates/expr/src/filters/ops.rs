//! Operator filters: arithmetic, comparison, selection, member access.

use conflux_flow::{Filter, FilterContext, FilterInterface, FlowError, Result};
use conflux_foundation::{params, Params, VerifyInfo};

use crate::ast::{BinaryOp, UnaryOp};
use crate::filters::{dataset_handle, node_input, read_dataset, scalar_f64};
use crate::value::{Atts, Value, ValueNode};

/// `expr_binary_op` — the one filter behind every infix operator.
///
/// Integers stay integers until a double appears on either side:
/// `(2 + 1) / 2` is integer division, `(2.0 + 1) / 0.5` is not.
pub struct ExprBinaryOp;

impl Filter for ExprBinaryOp {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("expr_binary_op").ports(["lhs", "rhs"])
    }

    fn verify_params(&self, params: &Params, info: &mut VerifyInfo) -> bool {
        if params::get_str(params, "op_string").is_none() {
            info.error("missing required string parameter 'op_string'");
            return false;
        }
        true
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let op_string = params::require_str(ctx.params(), "op_string")?;
        let op = BinaryOp::from_str(op_string)
            .ok_or_else(|| FlowError::execution(format!("unknown binary op '{op_string}'")))?;

        let lhs = node_input(ctx, "lhs")?;
        let rhs = node_input(ctx, "rhs")?;

        let out = if op.is_logical() {
            let l = lhs.value.as_bool().ok_or_else(|| non_boolean(op, lhs))?;
            let r = rhs.value.as_bool().ok_or_else(|| non_boolean(op, rhs))?;
            let v = match op {
                BinaryOp::And => l && r,
                BinaryOp::Or => l || r,
                _ => unreachable!("is_logical covers and/or"),
            };
            ValueNode::boolean(v)
        } else if op.is_comparison() {
            if let (Some(l), Some(r)) = (lhs.value.as_bool(), rhs.value.as_bool()) {
                match op {
                    BinaryOp::Eq => ValueNode::boolean(l == r),
                    BinaryOp::Ne => ValueNode::boolean(l != r),
                    _ => return Err(non_numeric(op, lhs)),
                }
            } else {
                let l = lhs.value.as_f64().ok_or_else(|| non_numeric(op, lhs))?;
                let r = rhs.value.as_f64().ok_or_else(|| non_numeric(op, rhs))?;
                let v = match op {
                    BinaryOp::Lt => l < r,
                    BinaryOp::Le => l <= r,
                    BinaryOp::Gt => l > r,
                    BinaryOp::Ge => l >= r,
                    BinaryOp::Eq => l == r,
                    BinaryOp::Ne => l != r,
                    _ => unreachable!("is_comparison covers the rest"),
                };
                ValueNode::boolean(v)
            }
        } else if matches!(lhs.value, Value::Vector(_)) || matches!(rhs.value, Value::Vector(_)) {
            vector_math(op, lhs, rhs)?
        } else {
            // arithmetic; promote to double only when a double appears
            let has_double = lhs.value.is_double() || rhs.value.is_double();
            if has_double {
                let l = lhs.value.as_f64().ok_or_else(|| non_numeric(op, lhs))?;
                let r = rhs.value.as_f64().ok_or_else(|| non_numeric(op, rhs))?;
                let v = match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    BinaryOp::Mod => l % r,
                    _ => unreachable!("remaining ops are math"),
                };
                ValueNode::scalar(v)
            } else {
                let l = lhs.value.as_int().ok_or_else(|| non_numeric(op, lhs))?;
                let r = rhs.value.as_int().ok_or_else(|| non_numeric(op, rhs))?;
                if r == 0 && matches!(op, BinaryOp::Div | BinaryOp::Mod) {
                    return Err(FlowError::execution("integer division by zero"));
                }
                let v = match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    BinaryOp::Mod => l % r,
                    _ => unreachable!("remaining ops are math"),
                };
                ValueNode::scalar_int(v)
            }
        };

        ctx.set_output_value(out);
        Ok(())
    }
}

/// Componentwise vector arithmetic: `v ± v`, `v * s`, `s * v`, `v / s`.
fn vector_math(op: BinaryOp, lhs: &ValueNode, rhs: &ValueNode) -> Result<ValueNode> {
    match (op, &lhs.value, &rhs.value) {
        (BinaryOp::Add, Value::Vector(l), Value::Vector(r)) => {
            Ok(ValueNode::vector([l[0] + r[0], l[1] + r[1], l[2] + r[2]]))
        }
        (BinaryOp::Sub, Value::Vector(l), Value::Vector(r)) => {
            Ok(ValueNode::vector([l[0] - r[0], l[1] - r[1], l[2] - r[2]]))
        }
        (BinaryOp::Mul, Value::Vector(l), r) => {
            let s = r.as_f64().ok_or_else(|| non_numeric(op, rhs))?;
            Ok(ValueNode::vector([l[0] * s, l[1] * s, l[2] * s]))
        }
        (BinaryOp::Mul, l, Value::Vector(r)) => {
            let s = l.as_f64().ok_or_else(|| non_numeric(op, lhs))?;
            Ok(ValueNode::vector([r[0] * s, r[1] * s, r[2] * s]))
        }
        (BinaryOp::Div, Value::Vector(l), r) => {
            let s = r.as_f64().ok_or_else(|| non_numeric(op, rhs))?;
            Ok(ValueNode::vector([l[0] / s, l[1] / s, l[2] / s]))
        }
        _ => Err(FlowError::execution(format!(
            "binary op '{}' on {} and {} not supported",
            op.as_str(),
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn non_numeric(op: BinaryOp, node: &ValueNode) -> FlowError {
    FlowError::execution(format!(
        "binary op '{}' on {} not supported",
        op.as_str(),
        node.type_name()
    ))
}

fn non_boolean(op: BinaryOp, node: &ValueNode) -> FlowError {
    FlowError::execution(format!(
        "'{}' expects booleans, got {}",
        op.as_str(),
        node.type_name()
    ))
}

/// `expr_unary_op` — negation and logical not.
pub struct ExprUnaryOp;

impl Filter for ExprUnaryOp {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("expr_unary_op").ports(["operand"])
    }

    fn verify_params(&self, params: &Params, info: &mut VerifyInfo) -> bool {
        if params::get_str(params, "op_string").is_none() {
            info.error("missing required string parameter 'op_string'");
            return false;
        }
        true
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let op_string = params::require_str(ctx.params(), "op_string")?;
        let op = UnaryOp::from_str(op_string)
            .ok_or_else(|| FlowError::execution(format!("unknown unary op '{op_string}'")))?;
        let operand = node_input(ctx, "operand")?;

        let out = match (op, &operand.value) {
            (UnaryOp::Neg, Value::Int(v)) => ValueNode::scalar_int(-v),
            (UnaryOp::Neg, Value::Double(v)) => ValueNode::scalar(-v),
            (UnaryOp::Not, Value::Bool(b)) => ValueNode::boolean(!b),
            _ => {
                return Err(FlowError::execution(format!(
                    "unary '{}' on {} not supported",
                    op.as_str(),
                    operand.type_name()
                )));
            }
        };
        ctx.set_output_value(out);
        Ok(())
    }
}

/// `expr_if` — strict two-way selection on a boolean condition. Both
/// branches have already executed by the time this filter runs; this is
/// value selection, not control flow.
pub struct ExprIf;

impl Filter for ExprIf {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("expr_if").ports(["condition", "then", "else"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let cond = node_input(ctx, "condition")?;
        let cond = cond
            .value
            .as_bool()
            .ok_or_else(|| FlowError::execution("if condition must be a boolean"))?;
        let chosen = if cond {
            node_input(ctx, "then")?
        } else {
            node_input(ctx, "else")?
        };
        ctx.set_output(conflux_flow::DataBox::owned(chosen.clone()));
        Ok(())
    }
}

/// `expr_dot` — member access into a result node.
pub struct ExprDot;

impl Filter for ExprDot {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("expr_dot").ports(["obj"])
    }

    fn verify_params(&self, params: &Params, info: &mut VerifyInfo) -> bool {
        if params::get_str(params, "field").is_none() {
            info.error("missing required string parameter 'field'");
            return false;
        }
        true
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let member = params::require_str(ctx.params(), "field")?;
        let obj = node_input(ctx, "obj")?;

        let out = match member {
            "value" => ValueNode {
                value: obj.value.clone(),
                kind: obj.kind,
                atts: Atts::default(),
            },
            "position" => {
                let pos = obj.atts.position.ok_or_else(|| {
                    FlowError::execution("input does not have a 'position' attribute")
                })?;
                ValueNode::vector(pos)
            }
            "domain_id" => {
                let id = obj.atts.domain_id.ok_or_else(|| {
                    FlowError::execution("input does not have a 'domain_id' attribute")
                })?;
                ValueNode::scalar_int(id as i64)
            }
            "rank" => {
                let rank = obj.atts.rank.ok_or_else(|| {
                    FlowError::execution("input does not have a 'rank' attribute")
                })?;
                ValueNode::scalar_int(rank as i64)
            }
            "count" => {
                let count = obj.atts.count.ok_or_else(|| {
                    FlowError::execution("input does not have a 'count' attribute")
                })?;
                ValueNode::scalar_int(count as i64)
            }
            "min_val" | "max_val" | "num_bins" => match &obj.value {
                Value::Histogram(hist) => match member {
                    "min_val" => ValueNode::scalar(hist.min_val),
                    "max_val" => ValueNode::scalar(hist.max_val),
                    _ => ValueNode::scalar_int(hist.num_bins() as i64),
                },
                _ => {
                    return Err(FlowError::execution(format!(
                        "member '.{member}' needs a histogram, got {}",
                        obj.type_name()
                    )));
                }
            },
            other => {
                return Err(FlowError::execution(format!("unknown member '.{other}'")));
            }
        };
        ctx.set_output_value(out);
        Ok(())
    }
}

/// `expr_position` — the spatial attribute of a reduction result.
pub struct ExprPosition;

impl Filter for ExprPosition {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("expr_position").ports(["arg1"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let input = node_input(ctx, "arg1")?;
        let pos = input
            .atts
            .position
            .ok_or_else(|| FlowError::execution("input does not have a 'position' attribute"))?;
        ctx.set_output_value(ValueNode::vector(pos));
        Ok(())
    }
}

/// `cycle` — the dataset's cycle state variable.
pub struct Cycle;

impl Filter for Cycle {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("cycle")
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let handle = dataset_handle(ctx)?;
        let dataset = read_dataset(&handle)?;
        let cycle = dataset.state_cycle().map_err(FlowError::execution)?;
        ctx.set_output_value(ValueNode::scalar_int(cycle as i64));
        Ok(())
    }
}

/// `scalar_max` — two-argument numeric max. Integer when both inputs
/// are integers.
pub struct ScalarMax;

impl Filter for ScalarMax {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("scalar_max").ports(["arg1", "arg2"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let arg1 = node_input(ctx, "arg1")?;
        let arg2 = node_input(ctx, "arg2")?;
        ctx.set_output_value(scalar_extreme(arg1, arg2, true)?);
        Ok(())
    }
}

/// `scalar_min` — two-argument numeric min.
pub struct ScalarMin;

impl Filter for ScalarMin {
    fn declare_interface(&self) -> FilterInterface {
        FilterInterface::new("scalar_min").ports(["arg1", "arg2"])
    }

    fn execute(&mut self, ctx: &mut FilterContext<'_>) -> Result<()> {
        let arg1 = node_input(ctx, "arg1")?;
        let arg2 = node_input(ctx, "arg2")?;
        ctx.set_output_value(scalar_extreme(arg1, arg2, false)?);
        Ok(())
    }
}

fn scalar_extreme(arg1: &ValueNode, arg2: &ValueNode, want_max: bool) -> Result<ValueNode> {
    if let (Some(l), Some(r)) = (arg1.value.as_int(), arg2.value.as_int()) {
        let v = if want_max { l.max(r) } else { l.min(r) };
        return Ok(ValueNode::scalar_int(v));
    }
    let l = scalar_f64(arg1)?;
    let r = scalar_f64(arg2)?;
    let v = if want_max { l.max(r) } else { l.min(r) };
    Ok(ValueNode::scalar(v))
}
