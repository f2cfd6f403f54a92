//! Function table and overload resolution.
//!
//! Each function name maps to a list of overload signatures in
//! declaration order. Resolution picks the first signature whose
//! argument tags match the lowered argument types pointwise — overloads
//! are declared most-specific first. The only coercion is
//! integer→scalar, which is inherent: both carry the `scalar` tag.

use indexmap::IndexMap;

use crate::error::{ExprError, Result};
use crate::value::ValueKind;

/// One overload: the filter it lowers to, its argument tags (bound to
/// ports `arg1..argN`) and its return tag.
#[derive(Debug, Clone)]
pub struct Signature {
    pub return_kind: ValueKind,
    pub filter_type: String,
    pub args: Vec<ValueKind>,
}

impl Signature {
    pub fn new(
        return_kind: ValueKind,
        filter_type: impl Into<String>,
        args: impl IntoIterator<Item = ValueKind>,
    ) -> Self {
        Self {
            return_kind,
            filter_type: filter_type.into(),
            args: args.into_iter().collect(),
        }
    }

    /// `name(tag, tag, ...) -> tag` rendering for diagnostics.
    pub fn describe(&self, name: &str) -> String {
        let args: Vec<&str> = self.args.iter().map(|a| a.as_str()).collect();
        format!("{name}({}) -> {}", args.join(", "), self.return_kind)
    }
}

/// Name → overload list.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    entries: IndexMap<String, Vec<Signature>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an overload. Order matters: first match wins.
    pub fn insert(&mut self, name: impl Into<String>, sig: Signature) {
        self.entries.entry(name.into()).or_default().push(sig);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Overloads of one function, in declaration order.
    pub fn overloads(&self, name: &str) -> Option<&[Signature]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// First-match overload resolution.
    pub fn resolve(&self, name: &str, arg_kinds: &[ValueKind]) -> Result<&Signature> {
        let overloads = self
            .entries
            .get(name)
            .ok_or_else(|| ExprError::UnknownFunction(name.to_string()))?;

        for sig in overloads {
            if sig.args.len() == arg_kinds.len()
                && sig.args.iter().zip(arg_kinds).all(|(a, b)| a == b)
            {
                return Ok(sig);
            }
        }

        // distinguish "wrong arity everywhere" from "tags don't match"
        if !overloads.iter().any(|s| s.args.len() == arg_kinds.len()) {
            let mut expected: Vec<usize> = overloads.iter().map(|s| s.args.len()).collect();
            expected.dedup();
            return Err(ExprError::ArityMismatch {
                name: name.to_string(),
                expected,
                got: arg_kinds.len(),
            });
        }

        Err(ExprError::NoMatchingOverload {
            name: name.to_string(),
            got: arg_kinds.to_vec(),
            candidates: overloads.iter().map(|s| s.describe(name)).collect(),
        })
    }

    /// The builtin table. Overloads are listed most-specific first; the
    /// two-port scalar forms of `max`/`min` precede the field forms so a
    /// two-argument call never falls through to a reduction.
    pub fn builtin() -> Self {
        use ValueKind::*;

        let mut table = FunctionTable::new();

        table.insert("max", Signature::new(Scalar, "scalar_max", [Scalar, Scalar]));
        table.insert("max", Signature::new(Scalar, "field_max", [MeshVar]));

        table.insert("min", Signature::new(Scalar, "scalar_min", [Scalar, Scalar]));
        table.insert("min", Signature::new(Scalar, "field_min", [MeshVar]));

        table.insert("sum", Signature::new(Scalar, "field_sum", [MeshVar]));
        table.insert("avg", Signature::new(Scalar, "field_avg", [MeshVar]));

        table.insert("cycle", Signature::new(Scalar, "cycle", []));
        table.insert("time", Signature::new(Scalar, "time", []));
        table.insert("position", Signature::new(Vector, "expr_position", [Scalar]));

        table.insert(
            "vector",
            Signature::new(Vector, "expr_vector", [Scalar, Scalar, Scalar]),
        );
        table.insert(
            "magnitude",
            Signature::new(Scalar, "expr_magnitude", [Vector]),
        );
        table.insert("abs", Signature::new(Scalar, "scalar_abs", [Scalar]));
        table.insert("sqrt", Signature::new(Scalar, "scalar_sqrt", [Scalar]));
        table.insert("exp", Signature::new(Scalar, "scalar_exp", [Scalar]));
        table.insert("log", Signature::new(Scalar, "scalar_log", [Scalar]));
        table.insert("pow", Signature::new(Scalar, "scalar_pow", [Scalar, Scalar]));

        table.insert(
            "histogram",
            Signature::new(
                Histogram,
                "field_histogram",
                [MeshVar, Scalar, Scalar, Scalar],
            ),
        );
        table.insert(
            "histogram",
            Signature::new(Histogram, "field_histogram", [MeshVar, Scalar]),
        );

        table.insert("entropy", Signature::new(Scalar, "field_entropy", [Histogram]));
        table.insert("pdf", Signature::new(Histogram, "field_pdf", [Histogram]));
        table.insert("cdf", Signature::new(Histogram, "field_cdf", [Histogram]));

        table.insert(
            "quantile",
            Signature::new(Scalar, "quantile", [Histogram, Scalar, MeshVar]),
        );
        table.insert(
            "quantile",
            Signature::new(Scalar, "quantile", [Histogram, Scalar]),
        );

        table.insert(
            "nan_count",
            Signature::new(Scalar, "field_nan_count", [MeshVar]),
        );
        table.insert(
            "inf_count",
            Signature::new(Scalar, "field_inf_count", [MeshVar]),
        );

        // binning(reduction_var, reduction_func, axis...)
        for axes in 1..=3 {
            let mut args = vec![MeshVar, MeshVar];
            args.extend(std::iter::repeat(MeshVar).take(axes));
            table.insert("binning", Signature::new(Binning, "expr_binning", args));
        }
        table.insert(
            "paint_binning",
            Signature::new(MeshVar, "paint_binning", [Binning]),
        );

        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ValueKind::*;

    #[test]
    fn test_first_match_wins() {
        let table = FunctionTable::builtin();

        let scalar = table.resolve("max", &[Scalar, Scalar]).unwrap();
        assert_eq!(scalar.filter_type, "scalar_max");

        let field = table.resolve("max", &[MeshVar]).unwrap();
        assert_eq!(field.filter_type, "field_max");
    }

    #[test]
    fn test_declaration_order_is_resolution_order() {
        let table = FunctionTable::builtin();
        for name in table.names() {
            let overloads = table.overloads(name).unwrap();
            for (i, sig) in overloads.iter().enumerate() {
                // resolving each overload's own tags must return the
                // first declared signature with those tags
                let resolved = table.resolve(name, &sig.args).unwrap();
                let first = overloads
                    .iter()
                    .position(|s| {
                        s.args.len() == sig.args.len()
                            && s.args.iter().zip(&sig.args).all(|(a, b)| a == b)
                    })
                    .unwrap();
                assert_eq!(
                    resolved.filter_type, overloads[first].filter_type,
                    "overload {i} of {name}"
                );
            }
        }
    }

    #[test]
    fn test_arity_mismatch() {
        let table = FunctionTable::builtin();
        assert!(matches!(
            table.resolve("max", &[Scalar, Scalar, Scalar]).unwrap_err(),
            ExprError::ArityMismatch { .. }
        ));
    }

    #[test]
    fn test_no_matching_overload_lists_candidates() {
        let table = FunctionTable::builtin();
        match table.resolve("max", &[Histogram]).unwrap_err() {
            ExprError::NoMatchingOverload { candidates, .. } => {
                assert_eq!(candidates.len(), 2);
                assert!(candidates[0].contains("scalar, scalar"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_function() {
        let table = FunctionTable::builtin();
        assert!(matches!(
            table.resolve("banana", &[]).unwrap_err(),
            ExprError::UnknownFunction(_)
        ));
    }
}
