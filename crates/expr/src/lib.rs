//! Conflux expression evaluator
//!
//! A small language over published datasets: field reductions,
//! histograms, binning, scalar arithmetic, comparisons and function
//! calls. Text is lexed and parsed into an AST, the AST is lowered one
//! node per filter into a flow graph, and the graph runs through the
//! ordinary workspace scheduler. Named results are cached and can be
//! referenced by later expressions.
//!
//! ```no_run
//! # use conflux_expr::ExpressionEval;
//! # use conflux_mesh::examples;
//! let dataset = examples::braid(5).into_handle();
//! let mut eval = ExpressionEval::new(dataset).unwrap();
//! let max = eval.evaluate_named("max(\"braid\")", Some("mx_b")).unwrap();
//! let pos = eval.evaluate("position(mx_b)").unwrap();
//! ```

pub mod ast;
pub mod error;
pub mod eval;
pub mod filters;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod value;

pub use error::{ExprError, Result};
pub use eval::{register_builtin, ExpressionEval};
pub use functions::{FunctionTable, Signature};
pub use value::{Value, ValueKind, ValueNode};
