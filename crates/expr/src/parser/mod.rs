//! Hand-written recursive descent parser for the expression grammar.
//!
//! ```text
//! expr     := or_expr
//! or_expr  := and_expr ( 'or'  and_expr )*
//! and_expr := cmp_expr ( 'and' cmp_expr )*
//! cmp_expr := add_expr ( ('<'|'<='|'>'|'>='|'=='|'!=') add_expr )?
//! add_expr := mul_expr ( ('+'|'-') mul_expr )*
//! mul_expr := unary    ( ('*'|'/'|'%') unary )*
//! unary    := '-' unary | '!' unary | postfix
//! postfix  := primary ( '.' IDENT | '(' args? ')' )*
//! primary  := INT | DOUBLE | STRING | IDENT | '(' expr ')'
//!           | 'if' expr 'then' expr 'else' expr
//! ```
//!
//! Comparisons are non-associative: `a < b < c` is a parse error, by
//! design.

mod grammar;
mod stream;

pub use stream::TokenStream;

use std::fmt;

use conflux_foundation::Span;

use crate::ast::Expr;
use crate::lexer::{self, Token};

/// Parse a complete expression.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    let tokens = lexer::lex(source)?;
    if tokens.is_empty() {
        return Err(ParseError::unexpected_eof("in empty expression", Span::zero()));
    }
    let mut stream = TokenStream::new(&tokens);
    let expr = grammar::parse_expr(&mut stream)?;
    if let Some(token) = stream.peek() {
        return Err(ParseError::unexpected_token(
            Some(token),
            "after end of expression",
            stream.current_span(),
        ));
    }
    Ok(expr)
}

/// Parse error with source location and context.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    UnexpectedToken,
    UnexpectedEof,
    InvalidSyntax,
}

impl ParseError {
    pub fn expected_token(expected: &str, found: Option<&Token>, span: Span) -> Self {
        let (kind, message) = match found {
            Some(token) => (
                ParseErrorKind::UnexpectedToken,
                format!("expected {expected}, found {}", token.describe()),
            ),
            None => (
                ParseErrorKind::UnexpectedEof,
                format!("expected {expected}, found end of input"),
            ),
        };
        Self { kind, span, message }
    }

    pub fn unexpected_token(found: Option<&Token>, context: &str, span: Span) -> Self {
        let (kind, message) = match found {
            Some(token) => (
                ParseErrorKind::UnexpectedToken,
                format!("unexpected {} {context}", token.describe()),
            ),
            None => (
                ParseErrorKind::UnexpectedEof,
                format!("unexpected end of input {context}"),
            ),
        };
        Self { kind, span, message }
    }

    pub fn unexpected_eof(context: &str, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::UnexpectedEof,
            span,
            message: format!("unexpected end of input {context}"),
        }
    }

    pub fn invalid_syntax(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::InvalidSyntax,
            span,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

impl std::error::Error for ParseError {}
