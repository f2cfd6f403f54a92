//! Test harness shared by the integration tests.

use conflux_expr::{ExpressionEval, ValueNode};
use conflux_mesh::{examples, DatasetHandle};

/// A published dataset plus an evaluator over it.
pub struct TestHarness {
    pub dataset: DatasetHandle,
    pub eval: ExpressionEval,
}

impl TestHarness {
    /// Harness over the braid example mesh.
    pub fn braid(side: usize) -> Self {
        let dataset = examples::braid(side).into_handle();
        let eval = ExpressionEval::new(dataset.clone()).expect("builtin registration");
        Self { dataset, eval }
    }

    /// Evaluate, panicking with the expression text on failure.
    pub fn evaluate(&mut self, expr: &str) -> ValueNode {
        self.eval
            .evaluate(expr)
            .unwrap_or_else(|err| panic!("evaluating `{expr}`: {err}"))
    }

    /// Evaluate and cache the result under `name`.
    pub fn evaluate_named(&mut self, expr: &str, name: &str) -> ValueNode {
        self.eval
            .evaluate_named(expr, Some(name))
            .unwrap_or_else(|err| panic!("evaluating `{expr}` as {name}: {err}"))
    }
}
