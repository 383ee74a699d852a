//! Expression parsing with operator precedence
//!
//! Or < And < Eq (== != in is) < Rel (< > <= >=) < Add < Mul < Unary <
//! Postfix (member, index, call) < Primary. Path literals in expression
//! position become path templates whose `$(expr)` interpolations are parsed
//! with a nested lexer/parser pass.

use crate::rules::ast::{BinaryOp, Expr, Literal, PathPart, UnaryOp};
use crate::rules::lexer::{RulesIssue, SourcePos, Token};
use crate::rules::parser::Parser;

impl Parser {
    pub(super) fn parse_expression(&mut self) -> Result<Expr, RulesIssue> {
        self.parse_or_expression()
    }

    fn parse_or_expression(&mut self) -> Result<Expr, RulesIssue> {
        let mut left = self.parse_and_expression()?;
        while *self.peek() == Token::OrOr {
            let pos = self.peek_pos();
            self.advance();
            let right = self.parse_and_expression()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                pos,
            };
        }
        Ok(left)
    }

    fn parse_and_expression(&mut self) -> Result<Expr, RulesIssue> {
        let mut left = self.parse_equality()?;
        while *self.peek() == Token::AndAnd {
            let pos = self.peek_pos();
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
                pos,
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, RulesIssue> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::NotEq,
                Token::In => BinaryOp::In,
                Token::Is => BinaryOp::Is,
                _ => break,
            };
            let pos = self.peek_pos();
            self.advance();
            let right = self.parse_relational()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                pos,
            };
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, RulesIssue> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Less => BinaryOp::Less,
                Token::LessEq => BinaryOp::LessEq,
                Token::Greater => BinaryOp::Greater,
                Token::GreaterEq => BinaryOp::GreaterEq,
                _ => break,
            };
            let pos = self.peek_pos();
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                pos,
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, RulesIssue> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            let pos = self.peek_pos();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                pos,
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, RulesIssue> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            let pos = self.peek_pos();
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                pos,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, RulesIssue> {
        let op = match self.peek() {
            Token::Bang => Some(UnaryOp::Not),
            Token::Minus => Some(UnaryOp::Neg),
            _ => None,
        };
        if let Some(op) = op {
            let pos = self.peek_pos();
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary { op, operand: Box::new(operand), pos });
        }
        self.parse_postfix()
    }

    /// Postfix = Primary {"." Ident | "[" Expr "]" | "(" [Args] ")"}
    fn parse_postfix(&mut self) -> Result<Expr, RulesIssue> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    let pos = self.peek_pos();
                    self.advance();
                    let (property, _) = self.consume_identifier()?;
                    expr = Expr::Member { object: Box::new(expr), property, pos };
                }
                Token::LeftBracket => {
                    let pos = self.peek_pos();
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(Token::RightBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        pos,
                    };
                }
                Token::LeftParen => {
                    let pos = self.peek_pos();
                    self.advance();
                    let args = self.parse_call_args()?;
                    expr = Expr::Call { callee: Box::new(expr), args, pos };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, RulesIssue> {
        let mut args = Vec::new();
        if *self.peek() != Token::RightParen {
            loop {
                args.push(self.parse_expression()?);
                if *self.peek() != Token::Comma {
                    break;
                }
                self.advance();
            }
        }
        self.expect(Token::RightParen)?;
        Ok(args)
    }

    /// Primary = Literal | Ident | "(" Expr ")" | "[" [Args] "]" | Path
    fn parse_primary(&mut self) -> Result<Expr, RulesIssue> {
        let pos = self.peek_pos();
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                if n.contains('.') {
                    let f: f64 = n
                        .parse()
                        .map_err(|_| RulesIssue::new(format!("Invalid number: {}", n), pos))?;
                    Ok(Expr::Literal { value: Literal::Float(f), pos })
                } else {
                    let i: i64 = n
                        .parse()
                        .map_err(|_| RulesIssue::new(format!("Invalid number: {}", n), pos))?;
                    Ok(Expr::Literal { value: Literal::Int(i), pos })
                }
            }
            Token::StringLiteral(s) => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Str(s), pos })
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Bool(true), pos })
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Bool(false), pos })
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Null, pos })
            }
            Token::Identifier(name) => {
                self.advance();
                Ok(Expr::Ident { name, pos })
            }
            Token::LeftParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            Token::LeftBracket => {
                self.advance();
                let mut items = Vec::new();
                if *self.peek() != Token::RightBracket {
                    loop {
                        items.push(self.parse_expression()?);
                        if *self.peek() != Token::Comma {
                            break;
                        }
                        self.advance();
                    }
                }
                self.expect(Token::RightBracket)?;
                Ok(Expr::List { items, pos })
            }
            Token::PathLiteral(raw) => {
                self.advance();
                let parts = parse_path_template(&raw, pos)?;
                Ok(Expr::PathTemplate { parts, pos })
            }
            Token::Eof => Err(RulesIssue::new("Unexpected end of input in expression", pos)),
            other => Err(RulesIssue::new(
                format!("Unexpected token in expression: {}", Self::token_brief(&other)),
                pos,
            )),
        }
    }
}

/// Split a raw path literal into literal runs and `$(expr)` interpolations
///
/// Interpolation bodies are parsed with a fresh lexer and parser; their
/// positions are approximate (the enclosing path's position).
fn parse_path_template(raw: &str, pos: SourcePos) -> Result<Vec<PathPart>, RulesIssue> {
    let chars: Vec<char> = raw.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0usize;

    while i < chars.len() {
        if chars[i] == '$' && chars.get(i + 1) == Some(&'(') {
            if !literal.is_empty() {
                parts.push(PathPart::Literal(std::mem::take(&mut literal)));
            }
            // Find the balanced close
            let mut depth = 1usize;
            let mut j = i + 2;
            let mut inner = String::new();
            while j < chars.len() {
                match chars[j] {
                    '(' => {
                        depth += 1;
                        inner.push('(');
                    }
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                        inner.push(')');
                    }
                    c => inner.push(c),
                }
                j += 1;
            }
            if depth != 0 {
                return Err(RulesIssue::new("Unterminated path interpolation", pos));
            }
            let expr = parse_interpolation(&inner, pos)?;
            parts.push(PathPart::Interp(Box::new(expr)));
            i = j + 1;
        } else {
            literal.push(chars[i]);
            i += 1;
        }
    }

    if !literal.is_empty() {
        parts.push(PathPart::Literal(literal));
    }
    Ok(parts)
}

/// Parse an interpolation body as a standalone expression
fn parse_interpolation(source: &str, pos: SourcePos) -> Result<Expr, RulesIssue> {
    Parser::parse_expression_source(source)
        .map_err(|e| RulesIssue::new(format!("In path interpolation: {}", e.message), pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_expr(source: &str) -> Expr {
        Parser::parse_expression_source(source).unwrap()
    }

    #[test]
    fn test_precedence_or_and() {
        // a || b && c parses as a || (b && c)
        let expr = parse_expr("a || b && c");
        match expr {
            Expr::Binary { op: BinaryOp::Or, right, .. } => match *right {
                Expr::Binary { op: BinaryOp::And, .. } => {}
                other => panic!("expected And on the right, got {:?}", other),
            },
            other => panic!("expected Or at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_arithmetic() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let expr = parse_expr("1 + 2 * 3");
        match expr {
            Expr::Binary { op: BinaryOp::Add, right, .. } => match *right {
                Expr::Binary { op: BinaryOp::Mul, .. } => {}
                other => panic!("expected Mul on the right, got {:?}", other),
            },
            other => panic!("expected Add at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_comparison_binds_tighter_than_equality() {
        // a == b < c parses as a == (b < c)
        let expr = parse_expr("a == b < c");
        match expr {
            Expr::Binary { op: BinaryOp::Eq, right, .. } => match *right {
                Expr::Binary { op: BinaryOp::Less, .. } => {}
                other => panic!("expected Less on the right, got {:?}", other),
            },
            other => panic!("expected Eq at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_member_chain() {
        let expr = parse_expr("request.auth.uid");
        match expr {
            Expr::Member { property, object, .. } => {
                assert_eq!(property, "uid");
                match *object {
                    Expr::Member { property, .. } => assert_eq!(property, "auth"),
                    other => panic!("expected nested member, got {:?}", other),
                }
            }
            other => panic!("expected member, got {:?}", other),
        }
    }

    #[test]
    fn test_method_call_and_index() {
        let expr = parse_expr("resource.data.tags[0].matches('a.*')");
        match expr {
            Expr::Call { callee, args, .. } => {
                assert_eq!(args.len(), 1);
                match *callee {
                    Expr::Member { property, .. } => assert_eq!(property, "matches"),
                    other => panic!("expected member callee, got {:?}", other),
                }
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_list_literal() {
        let expr = parse_expr("['a', 'b'] ");
        match expr {
            Expr::List { items, .. } => assert_eq!(items.len(), 2),
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_in_and_is_operators() {
        let expr = parse_expr("x in [1, 2]");
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::In, .. }));

        let expr = parse_expr("x is string");
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Is, .. }));
    }

    #[test]
    fn test_unary_chains() {
        let expr = parse_expr("!!a");
        match expr {
            Expr::Unary { op: UnaryOp::Not, operand, .. } => {
                assert!(matches!(*operand, Expr::Unary { op: UnaryOp::Not, .. }));
            }
            other => panic!("expected unary, got {:?}", other),
        }

        let expr = parse_expr("-x + 1");
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn test_path_template_with_interpolation() {
        let expr = parse_expr("/databases/$(database)/documents/users/$(request.auth.uid)");
        match expr {
            Expr::PathTemplate { parts, .. } => {
                assert_eq!(parts.len(), 4);
                assert!(matches!(&parts[0], PathPart::Literal(s) if s == "/databases/"));
                assert!(matches!(&parts[1], PathPart::Interp(_)));
                assert!(matches!(&parts[2], PathPart::Literal(s) if s == "/documents/users/"));
                assert!(matches!(&parts[3], PathPart::Interp(_)));
            }
            other => panic!("expected path template, got {:?}", other),
        }
    }

    #[test]
    fn test_path_template_without_interpolation() {
        let expr = parse_expr("/databases/(default)/documents/u/1");
        match expr {
            Expr::PathTemplate { parts, .. } => {
                assert_eq!(parts.len(), 1);
                assert!(matches!(&parts[0], PathPart::Literal(s) if s == "/databases/(default)/documents/u/1"));
            }
            other => panic!("expected path template, got {:?}", other),
        }
    }

    #[test]
    fn test_division_still_parses() {
        let expr = parse_expr("a / 2");
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Div, .. }));
    }
}
