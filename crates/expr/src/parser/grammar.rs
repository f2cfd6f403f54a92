//! The layered expression grammar.

use super::{ParseError, TokenStream};
use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::lexer::Token;

pub(super) fn parse_expr(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    parse_or(stream)
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = lhs.span.merge(&rhs.span);
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    )
}

fn parse_or(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let mut left = parse_and(stream)?;
    while stream.eat(&Token::Or) {
        let right = parse_and(stream)?;
        left = binary(BinaryOp::Or, left, right);
    }
    Ok(left)
}

fn parse_and(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let mut left = parse_cmp(stream)?;
    while stream.eat(&Token::And) {
        let right = parse_cmp(stream)?;
        left = binary(BinaryOp::And, left, right);
    }
    Ok(left)
}

/// At most one comparison per level; `a < b < c` does not parse.
fn parse_cmp(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let left = parse_add(stream)?;
    let op = match stream.peek() {
        Some(Token::Lt) => BinaryOp::Lt,
        Some(Token::LtEq) => BinaryOp::Le,
        Some(Token::Gt) => BinaryOp::Gt,
        Some(Token::GtEq) => BinaryOp::Ge,
        Some(Token::EqEq) => BinaryOp::Eq,
        Some(Token::BangEq) => BinaryOp::Ne,
        _ => return Ok(left),
    };
    stream.advance();
    let right = parse_add(stream)?;
    Ok(binary(op, left, right))
}

fn parse_add(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let mut left = parse_mul(stream)?;
    loop {
        let op = match stream.peek() {
            Some(Token::Plus) => BinaryOp::Add,
            Some(Token::Minus) => BinaryOp::Sub,
            _ => break,
        };
        stream.advance();
        let right = parse_mul(stream)?;
        left = binary(op, left, right);
    }
    Ok(left)
}

fn parse_mul(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let mut left = parse_unary(stream)?;
    loop {
        let op = match stream.peek() {
            Some(Token::Star) => BinaryOp::Mul,
            Some(Token::Slash) => BinaryOp::Div,
            Some(Token::Percent) => BinaryOp::Mod,
            _ => break,
        };
        stream.advance();
        let right = parse_unary(stream)?;
        left = binary(op, left, right);
    }
    Ok(left)
}

fn parse_unary(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let op = match stream.peek() {
        Some(Token::Minus) => UnaryOp::Neg,
        Some(Token::Bang) => UnaryOp::Not,
        _ => return parse_postfix(stream),
    };
    stream.advance();
    let operand = parse_unary(stream)?;
    let span = stream.span_from(start);
    Ok(Expr::new(
        ExprKind::Unary {
            op,
            operand: Box::new(operand),
        },
        span,
    ))
}

/// Member access and function calls. A call requires a plain identifier
/// callee; computed callees are rejected.
fn parse_postfix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let mut expr = parse_primary(stream)?;

    loop {
        match stream.peek() {
            Some(Token::Dot) => {
                stream.advance();
                let span = stream.current_span();
                let field = match stream.advance() {
                    Some(Token::Ident(name)) => name.clone(),
                    other => {
                        return Err(ParseError::unexpected_token(other, "after '.'", span));
                    }
                };
                let span = expr.span.merge(&span);
                expr = Expr::new(
                    ExprKind::Member {
                        object: Box::new(expr),
                        field,
                    },
                    span,
                );
            }
            Some(Token::LParen) => {
                let name = match &expr.kind {
                    ExprKind::Identifier(name) => name.clone(),
                    _ => {
                        return Err(ParseError::invalid_syntax(
                            "only named functions can be called",
                            stream.current_span(),
                        ));
                    }
                };
                let args = parse_call_args(stream)?;
                let span = expr.span.merge(&stream.span_from(stream.current_pos() - 1));
                expr = Expr::new(ExprKind::Call { name, args }, span);
            }
            _ => break,
        }
    }
    Ok(expr)
}

fn parse_call_args(stream: &mut TokenStream) -> Result<Vec<Expr>, ParseError> {
    stream.expect(Token::LParen, "'('")?;
    let mut args = Vec::new();
    while stream.peek() != Some(&Token::RParen) {
        args.push(parse_expr(stream)?);
        if stream.peek() == Some(&Token::RParen) {
            break;
        }
        stream.expect(Token::Comma, "','")?;
    }
    stream.expect(Token::RParen, "')'")?;
    Ok(args)
}

fn parse_primary(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let span = stream.current_span();
    match stream.peek().cloned() {
        Some(Token::Int(v)) => {
            stream.advance();
            Ok(Expr::new(ExprKind::Integer(v), span))
        }
        Some(Token::Double(v)) => {
            stream.advance();
            Ok(Expr::new(ExprKind::Double(v), span))
        }
        Some(Token::Str(s)) => {
            stream.advance();
            Ok(Expr::new(ExprKind::Str(s), span))
        }
        Some(Token::True) => {
            stream.advance();
            Ok(Expr::new(ExprKind::Boolean(true), span))
        }
        Some(Token::False) => {
            stream.advance();
            Ok(Expr::new(ExprKind::Boolean(false), span))
        }
        Some(Token::Ident(name)) => {
            stream.advance();
            Ok(Expr::new(ExprKind::Identifier(name), span))
        }
        Some(Token::LParen) => {
            stream.advance();
            let expr = parse_expr(stream)?;
            stream.expect(Token::RParen, "')'")?;
            Ok(expr)
        }
        Some(Token::If) => {
            let start = stream.current_pos();
            stream.advance();
            let cond = parse_expr(stream)?;
            stream.expect(Token::Then, "'then'")?;
            let then = parse_expr(stream)?;
            stream.expect(Token::Else, "'else'")?;
            let otherwise = parse_expr(stream)?;
            Ok(Expr::new(
                ExprKind::If {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                },
                stream.span_from(start),
            ))
        }
        other => Err(ParseError::unexpected_token(
            other.as_ref(),
            "in expression",
            span,
        )),
    }
}
