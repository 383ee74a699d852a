//! Parser for the security-rules DSL
//!
//! A hand-written recursive descent parser producing the AST in
//! `rules::ast`. Two entry points:
//!
//! - [`Parser::parse`]: strict, fails on the first error
//! - [`Parser::parse_with_recovery`]: best-effort AST plus every error
//!   found, synchronizing on `;` and block boundaries
//!
//! Position (line, column, offset) is attached to every node.

use crate::rules::ast::RulesFile;
use crate::rules::lexer::{Lexer, RulesIssue, SourcePos, SpannedToken, Token};

mod declarations;
mod expressions;

//=============================================================================
// Parser
//=============================================================================

/// Rules parser
pub struct Parser {
    pub(super) tokens: Vec<SpannedToken>,
    pub(super) pos: usize,
    /// Errors accumulated in recovery mode
    pub(super) errors: Vec<RulesIssue>,
}

impl Parser {
    /// Parse a rules source string, failing on the first error
    pub fn parse(source: &str) -> Result<RulesFile, RulesIssue> {
        let tokens = Lexer::new(source).tokenize()?;
        let mut parser = Parser { tokens, pos: 0, errors: Vec::new() };
        parser.parse_file(false)
    }

    /// Parse with error recovery: a best-effort AST and all errors found
    pub fn parse_with_recovery(source: &str) -> (RulesFile, Vec<RulesIssue>) {
        let tokens = match Lexer::new(source).tokenize() {
            Ok(tokens) => tokens,
            Err(issue) => {
                let empty = RulesFile { version: "1".into(), services: Vec::new() };
                return (empty, vec![issue]);
            }
        };
        let mut parser = Parser { tokens, pos: 0, errors: Vec::new() };
        let file = match parser.parse_file(true) {
            Ok(file) => file,
            Err(issue) => {
                parser.errors.push(issue);
                RulesFile { version: "1".into(), services: Vec::new() }
            }
        };
        (file, parser.errors)
    }

    /// Parse a standalone expression, requiring all input to be consumed
    ///
    /// Used for `$(expr)` path interpolations and by tests.
    pub fn parse_expression_source(source: &str) -> Result<crate::rules::ast::Expr, RulesIssue> {
        let tokens = Lexer::new(source).tokenize()?;
        let mut parser = Parser { tokens, pos: 0, errors: Vec::new() };
        let expr = parser.parse_expression()?;
        if *parser.peek() != Token::Eof {
            return Err(parser.error("Trailing input after expression"));
        }
        Ok(expr)
    }

    pub(super) fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    pub(super) fn peek_pos(&self) -> SourcePos {
        self.tokens
            .get(self.pos)
            .map(|s| s.pos)
            .unwrap_or_else(SourcePos::start)
    }

    pub(super) fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    pub(super) fn error(&self, message: impl Into<String>) -> RulesIssue {
        RulesIssue::new(message, self.peek_pos())
    }

    pub(super) fn token_brief(token: &Token) -> String {
        match token {
            Token::Identifier(name) => format!("identifier '{}'", name),
            Token::Number(n) => format!("number '{}'", n),
            Token::StringLiteral(_) => "string literal".into(),
            Token::PathLiteral(p) => format!("path '{}'", p),
            Token::Eof => "end of input".into(),
            other => format!("{:?}", other),
        }
    }

    pub(super) fn expect(&mut self, expected: Token) -> Result<SourcePos, RulesIssue> {
        if *self.peek() == expected {
            let pos = self.peek_pos();
            self.advance();
            Ok(pos)
        } else {
            Err(self.error(format!(
                "Expected {}, found {}",
                Self::token_brief(&expected),
                Self::token_brief(self.peek())
            )))
        }
    }

    pub(super) fn consume_identifier(&mut self) -> Result<(String, SourcePos), RulesIssue> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                let pos = self.peek_pos();
                self.advance();
                Ok((name, pos))
            }
            other => Err(self.error(format!(
                "Expected identifier, found {}",
                Self::token_brief(&other)
            ))),
        }
    }

    /// Skip ahead to a statement or block boundary after an error
    ///
    /// Stops after a `;`, or before a `}` / declaration keyword, so the
    /// recovery loop can pick up parsing from a sane point.
    pub(super) fn synchronize(&mut self) {
        loop {
            match self.peek() {
                Token::Semicolon => {
                    self.advance();
                    return;
                }
                Token::RightBrace
                | Token::Match
                | Token::Allow
                | Token::Function
                | Token::Service
                | Token::Eof => return,
                _ => self.advance(),
            }
        }
    }
}
