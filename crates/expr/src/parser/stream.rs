//! Token stream wrapper for the hand-written parser.

use std::ops::Range;

use conflux_foundation::Span;

use crate::lexer::Token;

/// Token stream with lookahead and span tracking.
pub struct TokenStream<'src> {
    tokens: &'src [(Token, Range<usize>)],
    pos: usize,
}

impl<'src> TokenStream<'src> {
    pub fn new(tokens: &'src [(Token, Range<usize>)]) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Peek at the current token without consuming it.
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    /// Advance to the next token and return the one consumed.
    pub fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos).map(|(tok, _)| tok);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consume the current token if it matches.
    pub fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Require a specific token, advancing past it.
    pub fn expect(&mut self, expected: Token, describe: &str) -> Result<(), super::ParseError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(super::ParseError::expected_token(
                describe,
                self.peek(),
                self.current_span(),
            ))
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Position marker for [`TokenStream::span_from`].
    pub fn current_pos(&self) -> usize {
        self.pos
    }

    /// Span covering the tokens from `start` to the last consumed one.
    pub fn span_from(&self, start: usize) -> Span {
        let start_byte = self
            .tokens
            .get(start)
            .map(|(_, span)| span.start)
            .unwrap_or(0);
        let end_byte = if self.pos > 0 {
            self.tokens
                .get(self.pos - 1)
                .map(|(_, span)| span.end)
                .unwrap_or(start_byte)
        } else {
            start_byte
        };
        Span::new(start_byte as u32, end_byte as u32)
    }

    /// Span of the current token, or a zero-width span at EOF.
    pub fn current_span(&self) -> Span {
        if let Some((_, span)) = self.tokens.get(self.pos) {
            Span::new(span.start as u32, span.end as u32)
        } else if let Some((_, span)) = self.tokens.last() {
            Span::new(span.end as u32, span.end as u32)
        } else {
            Span::zero()
        }
    }
}
