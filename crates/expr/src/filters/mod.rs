//! Builtin expression filters.
//!
//! One filter type per lowering target. All of them speak
//! [`ValueNode`](crate::value::ValueNode) on their ports; the ones that
//! touch the published dataset reach it through the pinned `dataset`
//! registry entry, and `expr_identifier` reads the pinned `cache`.

mod binning;
mod field_reductions;
mod histograms;
mod literals;
mod math;
mod ops;

pub use binning::{ExprBinning, PaintBinning};
pub use field_reductions::{
    FieldAvg, FieldInfCount, FieldMax, FieldMin, FieldNanCount, FieldSum,
};
pub use histograms::{FieldCdf, FieldEntropy, FieldHistogram, FieldPdf, Quantile};
pub use literals::{ExprBoolean, ExprDouble, ExprIdentifier, ExprInteger, ExprMeshVar};
pub use math::{
    ExprVector, Magnitude, ScalarAbs, ScalarExp, ScalarLog, ScalarPow, ScalarSqrt, Time,
};
pub use ops::{Cycle, ExprBinaryOp, ExprDot, ExprIf, ExprPosition, ExprUnaryOp, ScalarMax, ScalarMin};

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use conflux_flow::{FilterContext, FlowError};
use conflux_mesh::{Dataset, Histogram};

use crate::value::{Value, ValueKind, ValueNode};

/// The published dataset, from the pinned registry entry.
pub(crate) fn dataset_handle(ctx: &FilterContext<'_>) -> Result<Arc<RwLock<Dataset>>, FlowError> {
    ctx.ambient::<RwLock<Dataset>>("dataset")
        .map_err(|_| FlowError::execution("missing published dataset"))
}

pub(crate) fn read_dataset(
    handle: &RwLock<Dataset>,
) -> Result<RwLockReadGuard<'_, Dataset>, FlowError> {
    handle
        .read()
        .map_err(|_| FlowError::execution("dataset lock poisoned"))
}

pub(crate) fn write_dataset(
    handle: &RwLock<Dataset>,
) -> Result<RwLockWriteGuard<'_, Dataset>, FlowError> {
    handle
        .write()
        .map_err(|_| FlowError::execution("dataset lock poisoned"))
}

/// Typed input fetch: every expression port carries a ValueNode.
pub(crate) fn node_input<'a>(
    ctx: &'a FilterContext<'_>,
    port: &str,
) -> Result<&'a ValueNode, FlowError> {
    ctx.input_as::<ValueNode>(port)
}

pub(crate) fn meshvar_name(node: &ValueNode) -> Result<&str, FlowError> {
    match (&node.kind, &node.value) {
        (ValueKind::MeshVar, Value::Str(name)) => Ok(name),
        _ => Err(FlowError::execution(format!(
            "expected a field name, got {}",
            node.type_name()
        ))),
    }
}

pub(crate) fn scalar_f64(node: &ValueNode) -> Result<f64, FlowError> {
    node.value.as_f64().ok_or_else(|| {
        FlowError::execution(format!("expected a scalar, got {}", node.type_name()))
    })
}

/// Positive bin/sample counts arrive as scalars.
pub(crate) fn scalar_count(node: &ValueNode) -> Result<usize, FlowError> {
    let v = scalar_f64(node)?;
    if v < 1.0 || v.fract() != 0.0 {
        return Err(FlowError::execution(format!(
            "expected a positive whole number, got {v}"
        )));
    }
    Ok(v as usize)
}

pub(crate) fn histogram_input(node: &ValueNode) -> Result<&Histogram, FlowError> {
    match &node.value {
        Value::Histogram(hist) => Ok(hist),
        _ => Err(FlowError::execution(format!(
            "expected a histogram, got {}",
            node.type_name()
        ))),
    }
}
