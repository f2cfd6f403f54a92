//! The expression evaluator.
//!
//! `evaluate` lexes and parses the text, lowers the AST one node per
//! filter into a fresh graph inside an internal workspace, executes it,
//! and reads the root filter's result back out of the registry. Naming
//! an evaluation appends its result to the expression cache, where
//! later expressions can pick it up by identifier.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use tracing::{debug, instrument};

use conflux_flow::{DataBox, Workspace};
use conflux_foundation::Params;
use conflux_mesh::DatasetHandle;

use crate::ast::{Expr, ExprKind};
use crate::error::{ExprError, Result};
use crate::filters;
use crate::functions::FunctionTable;
use crate::parser;
use crate::value::{ValueKind, ValueNode};

/// Named-result history: every `evaluate(expr, name)` appends here, and
/// `expr_identifier` reads the newest entry for its name.
#[derive(Debug, Default)]
pub struct ExprCache {
    entries: IndexMap<String, Vec<ValueNode>>,
}

impl ExprCache {
    /// Most recent result stored under `name`.
    pub fn latest(&self, name: &str) -> Option<&ValueNode> {
        self.entries.get(name).and_then(|history| history.last())
    }

    /// Full history for `name`, oldest first.
    pub fn history(&self, name: &str) -> Option<&[ValueNode]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn push(&mut self, name: impl Into<String>, node: ValueNode) {
        self.entries.entry(name.into()).or_default().push(node);
    }
}

/// Register every builtin expression filter type with a workspace.
pub fn register_builtin(w: &mut Workspace) -> conflux_flow::Result<()> {
    w.register_filter_type(|| Box::new(filters::ExprInteger))?;
    w.register_filter_type(|| Box::new(filters::ExprDouble))?;
    w.register_filter_type(|| Box::new(filters::ExprBoolean))?;
    w.register_filter_type(|| Box::new(filters::ExprMeshVar))?;
    w.register_filter_type(|| Box::new(filters::ExprIdentifier))?;
    w.register_filter_type(|| Box::new(filters::ExprBinaryOp))?;
    w.register_filter_type(|| Box::new(filters::ExprUnaryOp))?;
    w.register_filter_type(|| Box::new(filters::ExprIf))?;
    w.register_filter_type(|| Box::new(filters::ExprDot))?;
    w.register_filter_type(|| Box::new(filters::ExprPosition))?;
    w.register_filter_type(|| Box::new(filters::Cycle))?;
    w.register_filter_type(|| Box::new(filters::ScalarMax))?;
    w.register_filter_type(|| Box::new(filters::ScalarMin))?;
    w.register_filter_type(|| Box::new(filters::FieldMax))?;
    w.register_filter_type(|| Box::new(filters::FieldMin))?;
    w.register_filter_type(|| Box::new(filters::FieldAvg))?;
    w.register_filter_type(|| Box::new(filters::FieldSum))?;
    w.register_filter_type(|| Box::new(filters::FieldNanCount))?;
    w.register_filter_type(|| Box::new(filters::FieldInfCount))?;
    w.register_filter_type(|| Box::new(filters::FieldHistogram))?;
    w.register_filter_type(|| Box::new(filters::FieldEntropy))?;
    w.register_filter_type(|| Box::new(filters::FieldPdf))?;
    w.register_filter_type(|| Box::new(filters::FieldCdf))?;
    w.register_filter_type(|| Box::new(filters::Quantile))?;
    w.register_filter_type(|| Box::new(filters::ExprBinning))?;
    w.register_filter_type(|| Box::new(filters::PaintBinning))?;
    w.register_filter_type(|| Box::new(filters::ExprVector))?;
    w.register_filter_type(|| Box::new(filters::Magnitude))?;
    w.register_filter_type(|| Box::new(filters::ScalarAbs))?;
    w.register_filter_type(|| Box::new(filters::ScalarSqrt))?;
    w.register_filter_type(|| Box::new(filters::ScalarExp))?;
    w.register_filter_type(|| Box::new(filters::ScalarLog))?;
    w.register_filter_type(|| Box::new(filters::ScalarPow))?;
    w.register_filter_type(|| Box::new(filters::Time))?;
    Ok(())
}

/// Evaluates expressions against one published dataset.
pub struct ExpressionEval {
    workspace: Workspace,
    dataset: DatasetHandle,
    table: FunctionTable,
    cache: Arc<RwLock<ExprCache>>,
    /// Lowering-time type tags of cached names.
    kinds: IndexMap<String, ValueKind>,
}

impl ExpressionEval {
    pub fn new(dataset: DatasetHandle) -> conflux_flow::Result<Self> {
        let mut workspace = Workspace::new();
        register_builtin(&mut workspace)?;
        Ok(Self {
            workspace,
            dataset,
            table: FunctionTable::builtin(),
            cache: Arc::new(RwLock::new(ExprCache::default())),
            kinds: IndexMap::new(),
        })
    }

    /// Evaluate an expression, discarding the name.
    pub fn evaluate(&mut self, source: &str) -> Result<ValueNode> {
        self.evaluate_named(source, None)
    }

    /// Evaluate an expression; with a name, the result is cached and
    /// later expressions can reference it by identifier.
    #[instrument(skip(self, source), fields(expr = source))]
    pub fn evaluate_named(&mut self, source: &str, name: Option<&str>) -> Result<ValueNode> {
        let ast = parser::parse(source)?;

        // fresh graph per evaluation; filter types survive the reset
        self.workspace.reset();
        self.workspace
            .publish("dataset", DataBox::borrowed(self.dataset.clone()));
        self.workspace
            .publish("cache", DataBox::borrowed(self.cache.clone()));

        let (root, kind) = {
            let mut lowering = Lowering {
                workspace: &mut self.workspace,
                table: &self.table,
                kinds: &self.kinds,
            };
            lowering.lower(&ast)?
        };
        debug!(root = %root, kind = %kind, "lowered expression");

        self.workspace.execute()?;

        let node = self
            .workspace
            .registry()
            .peek(&root)
            .ok_or_else(|| ExprError::UnknownIdentifier(root.clone()))?
            .downcast_ref::<ValueNode>()
            .map_err(ExprError::Flow)?
            .clone();

        if let Some(name) = name {
            let mut cache = self
                .cache
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            cache.push(name, node.clone());
            self.kinds.insert(name.to_string(), kind);
        }
        Ok(node)
    }

    /// The cached history of a named result.
    pub fn cache(&self) -> Arc<RwLock<ExprCache>> {
        self.cache.clone()
    }

    /// The internal workspace, for inspection after an evaluation.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn function_table(&self) -> &FunctionTable {
        &self.table
    }
}

/// Walks the AST, emitting one filter per node.
struct Lowering<'a> {
    workspace: &'a mut Workspace,
    table: &'a FunctionTable,
    kinds: &'a IndexMap<String, ValueKind>,
}

impl Lowering<'_> {
    /// Returns the emitted filter's instance name and the node's type
    /// tag.
    fn lower(&mut self, expr: &Expr) -> Result<(String, ValueKind)> {
        match &expr.kind {
            ExprKind::Integer(v) => {
                let name = self.emit("expr_integer", params_with("value", (*v).into()))?;
                Ok((name, ValueKind::Scalar))
            }
            ExprKind::Double(v) => {
                let name = self.emit("expr_double", params_with("value", (*v).into()))?;
                Ok((name, ValueKind::Scalar))
            }
            ExprKind::Boolean(v) => {
                let name = self.emit("expr_boolean", params_with("value", (*v).into()))?;
                Ok((name, ValueKind::Bool))
            }
            ExprKind::Str(s) => {
                let name = self.emit("expr_meshvar", params_with("value", s.clone().into()))?;
                Ok((name, ValueKind::MeshVar))
            }
            ExprKind::Identifier(ident) => {
                let kind = *self
                    .kinds
                    .get(ident)
                    .ok_or_else(|| ExprError::UnknownIdentifier(ident.clone()))?;
                let name =
                    self.emit("expr_identifier", params_with("value", ident.clone().into()))?;
                Ok((name, kind))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let (lhs_name, lhs_kind) = self.lower(lhs)?;
                let (rhs_name, rhs_kind) = self.lower(rhs)?;

                let kind = if op.is_logical() {
                    expect_kind(ValueKind::Bool, lhs_kind, op.as_str())?;
                    expect_kind(ValueKind::Bool, rhs_kind, op.as_str())?;
                    ValueKind::Bool
                } else if op.is_comparison() {
                    if lhs_kind != rhs_kind {
                        return Err(ExprError::TypeError(format!(
                            "'{}' compares {} with {}",
                            op.as_str(),
                            lhs_kind,
                            rhs_kind
                        )));
                    }
                    ValueKind::Bool
                } else {
                    use crate::ast::BinaryOp::{Add, Div, Mul, Sub};
                    match (lhs_kind, rhs_kind) {
                        (ValueKind::Scalar, ValueKind::Scalar) => ValueKind::Scalar,
                        (ValueKind::Vector, ValueKind::Vector) if matches!(op, Add | Sub) => {
                            ValueKind::Vector
                        }
                        (ValueKind::Vector, ValueKind::Scalar) if matches!(op, Mul | Div) => {
                            ValueKind::Vector
                        }
                        (ValueKind::Scalar, ValueKind::Vector) if matches!(op, Mul) => {
                            ValueKind::Vector
                        }
                        _ => {
                            return Err(ExprError::TypeError(format!(
                                "'{}' on {} and {} not supported",
                                op.as_str(),
                                lhs_kind,
                                rhs_kind
                            )));
                        }
                    }
                };

                let name = self.emit(
                    "expr_binary_op",
                    params_with("op_string", op.as_str().into()),
                )?;
                self.workspace.connect(&lhs_name, &name, "lhs")?;
                self.workspace.connect(&rhs_name, &name, "rhs")?;
                Ok((name, kind))
            }
            ExprKind::Unary { op, operand } => {
                let (operand_name, operand_kind) = self.lower(operand)?;
                let kind = match op {
                    crate::ast::UnaryOp::Neg => {
                        expect_kind(ValueKind::Scalar, operand_kind, op.as_str())?;
                        ValueKind::Scalar
                    }
                    crate::ast::UnaryOp::Not => {
                        expect_kind(ValueKind::Bool, operand_kind, op.as_str())?;
                        ValueKind::Bool
                    }
                };
                let name = self.emit(
                    "expr_unary_op",
                    params_with("op_string", op.as_str().into()),
                )?;
                self.workspace.connect(&operand_name, &name, "operand")?;
                Ok((name, kind))
            }
            ExprKind::Call { name, args } => {
                let mut arg_names = Vec::with_capacity(args.len());
                let mut arg_kinds = Vec::with_capacity(args.len());
                for arg in args {
                    let (arg_name, arg_kind) = self.lower(arg)?;
                    arg_names.push(arg_name);
                    arg_kinds.push(arg_kind);
                }

                let sig = self.table.resolve(name, &arg_kinds)?;
                let return_kind = sig.return_kind;
                let filter_type = sig.filter_type.clone();

                let instance = self.workspace.add_filter(&filter_type)?;
                for (idx, arg_name) in arg_names.iter().enumerate() {
                    self.workspace
                        .connect(arg_name, &instance, &format!("arg{}", idx + 1))?;
                }
                // variadic targets declare more ports than this overload
                // uses; the extras are explicitly empty
                let declared = self
                    .workspace
                    .graph()
                    .interface(&instance)
                    .map(|i| i.port_names.clone())
                    .unwrap_or_default();
                for port in declared.iter().skip(arg_names.len()) {
                    self.workspace.mark_empty(&instance, port)?;
                }
                Ok((instance, return_kind))
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                let (cond_name, cond_kind) = self.lower(cond)?;
                let (then_name, then_kind) = self.lower(then)?;
                let (else_name, else_kind) = self.lower(otherwise)?;

                expect_kind(ValueKind::Bool, cond_kind, "if condition")?;
                if then_kind != else_kind {
                    return Err(ExprError::TypeError(format!(
                        "if branches disagree: {then_kind} vs {else_kind}"
                    )));
                }

                let name = self.emit("expr_if", Params::new())?;
                self.workspace.connect(&cond_name, &name, "condition")?;
                self.workspace.connect(&then_name, &name, "then")?;
                self.workspace.connect(&else_name, &name, "else")?;
                Ok((name, then_kind))
            }
            ExprKind::Member { object, field } => {
                let (object_name, object_kind) = self.lower(object)?;
                let kind = member_kind(field, object_kind)?;
                let name = self.emit("expr_dot", params_with("field", field.clone().into()))?;
                self.workspace.connect(&object_name, &name, "obj")?;
                Ok((name, kind))
            }
        }
    }

    fn emit(&mut self, filter_type: &str, params: Params) -> Result<String> {
        Ok(self.workspace.add_filter_with(filter_type, None, params)?)
    }
}

fn params_with(key: &str, value: serde_json::Value) -> Params {
    let mut params = Params::new();
    params.insert(key.to_string(), value);
    params
}

fn expect_kind(expected: ValueKind, got: ValueKind, context: &str) -> Result<()> {
    if expected != got {
        return Err(ExprError::TypeError(format!(
            "'{context}' expects {expected}, got {got}"
        )));
    }
    Ok(())
}

/// Static type of a member access, used while lowering.
fn member_kind(field: &str, object_kind: ValueKind) -> Result<ValueKind> {
    match field {
        "value" => Ok(object_kind),
        "position" => Ok(ValueKind::Vector),
        "domain_id" | "rank" | "count" | "num_bins" => Ok(ValueKind::Scalar),
        "min_val" | "max_val" => Ok(ValueKind::Scalar),
        other => Err(ExprError::UnknownMember(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_mesh::examples;

    fn eval() -> ExpressionEval {
        ExpressionEval::new(examples::braid(5).into_handle()).unwrap()
    }

    #[test]
    fn test_lowering_emits_one_filter_per_node() {
        let mut e = eval();
        e.evaluate("1 + 2 * 3").unwrap();
        // 3 literals + 2 binary ops
        assert_eq!(e.workspace.graph().len(), 5);
    }

    #[test]
    fn test_unknown_identifier_is_a_lowering_error() {
        let mut e = eval();
        assert!(matches!(
            e.evaluate("banana").unwrap_err(),
            ExprError::UnknownIdentifier(_)
        ));
    }

    #[test]
    fn test_member_kind_table() {
        assert_eq!(
            member_kind("position", ValueKind::Scalar).unwrap(),
            ValueKind::Vector
        );
        assert_eq!(
            member_kind("value", ValueKind::Histogram).unwrap(),
            ValueKind::Histogram
        );
        assert!(matches!(
            member_kind("bogus", ValueKind::Scalar).unwrap_err(),
            ExprError::UnknownMember(_)
        ));
    }
}
