//! Declaration parsing: files, services, match blocks, allow statements,
//! and function declarations

use crate::rules::ast::{
    AllowOp, AllowStatement, FunctionDecl, MatchBlock, RulesFile, ServiceDecl,
};
use crate::rules::lexer::{RulesIssue, Token};
use crate::rules::matcher::PathPattern;
use crate::rules::parser::Parser;

/// Service names the production rules language accepts
const ACCEPTED_SERVICES: &[&str] = &["cloud.firestore", "firebase.storage"];

impl Parser {
    /// File = ["rules_version" "=" String ";"] {Service}
    pub(super) fn parse_file(&mut self, recover: bool) -> Result<RulesFile, RulesIssue> {
        let version = if *self.peek() == Token::RulesVersion {
            self.advance();
            self.expect(Token::Assign)?;
            let version = match self.peek().clone() {
                Token::StringLiteral(s) => {
                    self.advance();
                    s
                }
                other => {
                    return Err(self.error(format!(
                        "Expected version string, found {}",
                        Self::token_brief(&other)
                    )))
                }
            };
            self.expect(Token::Semicolon)?;
            version
        } else {
            "1".to_string()
        };

        let mut services = Vec::new();
        while *self.peek() != Token::Eof {
            match self.parse_service(recover) {
                Ok(service) => services.push(service),
                Err(issue) if recover => {
                    self.errors.push(issue);
                    self.synchronize();
                    // A stray token the synchronizer stopped before (e.g. a
                    // closing brace) would loop forever; step over it
                    if !matches!(self.peek(), Token::Service | Token::Eof) {
                        self.advance();
                    }
                }
                Err(issue) => return Err(issue),
            }
        }

        Ok(RulesFile { version, services })
    }

    /// Service = "service" QualifiedName "{" {MatchBlock} "}"
    fn parse_service(&mut self, recover: bool) -> Result<ServiceDecl, RulesIssue> {
        let pos = self.expect(Token::Service)?;

        let (first, name_pos) = self.consume_identifier()?;
        let mut name = first;
        while *self.peek() == Token::Dot {
            self.advance();
            let (part, _) = self.consume_identifier()?;
            name.push('.');
            name.push_str(&part);
        }
        if !ACCEPTED_SERVICES.contains(&name.as_str()) {
            return Err(RulesIssue::new(
                format!("Unknown service \"{}\"; expected cloud.firestore or firebase.storage", name),
                name_pos,
            ));
        }

        self.expect(Token::LeftBrace)?;
        let mut matches = Vec::new();
        loop {
            match self.peek() {
                Token::RightBrace => {
                    self.advance();
                    break;
                }
                Token::Match => match self.parse_match_block(recover) {
                    Ok(block) => matches.push(block),
                    Err(issue) if recover => {
                        self.errors.push(issue);
                        self.synchronize();
                    }
                    Err(issue) => return Err(issue),
                },
                Token::Eof => return Err(self.error("Unexpected end of input in service block")),
                other => {
                    let issue = self.error(format!(
                        "Expected match block, found {}",
                        Self::token_brief(other)
                    ));
                    if recover {
                        self.errors.push(issue);
                        self.advance();
                        self.synchronize();
                    } else {
                        return Err(issue);
                    }
                }
            }
        }

        Ok(ServiceDecl { name, matches, pos })
    }

    /// MatchBlock = "match" Path "{" {MatchBlock | AllowStmt | FunctionDecl} "}"
    fn parse_match_block(&mut self, recover: bool) -> Result<MatchBlock, RulesIssue> {
        let pos = self.expect(Token::Match)?;

        let pattern = match self.peek().clone() {
            Token::PathLiteral(raw) => {
                self.advance();
                PathPattern::parse(&raw)
            }
            other => {
                return Err(self.error(format!(
                    "Expected path after match, found {}",
                    Self::token_brief(&other)
                )))
            }
        };

        self.expect(Token::LeftBrace)?;

        let mut allows = Vec::new();
        let mut functions = Vec::new();
        let mut children = Vec::new();
        loop {
            match self.peek() {
                Token::RightBrace => {
                    self.advance();
                    break;
                }
                Token::Match => match self.parse_match_block(recover) {
                    Ok(block) => children.push(block),
                    Err(issue) if recover => {
                        self.errors.push(issue);
                        self.synchronize();
                    }
                    Err(issue) => return Err(issue),
                },
                Token::Allow => match self.parse_allow_statement() {
                    Ok(stmt) => allows.push(stmt),
                    Err(issue) if recover => {
                        self.errors.push(issue);
                        self.synchronize();
                    }
                    Err(issue) => return Err(issue),
                },
                Token::Function => match self.parse_function_decl() {
                    Ok(decl) => functions.push(decl),
                    Err(issue) if recover => {
                        self.errors.push(issue);
                        self.synchronize();
                    }
                    Err(issue) => return Err(issue),
                },
                Token::Eof => return Err(self.error("Unexpected end of input in match block")),
                other => {
                    let issue = self.error(format!(
                        "Expected match, allow, or function, found {}",
                        Self::token_brief(other)
                    ));
                    if recover {
                        self.errors.push(issue);
                        self.advance();
                        self.synchronize();
                    } else {
                        return Err(issue);
                    }
                }
            }
        }

        Ok(MatchBlock { pattern, allows, functions, children, pos })
    }

    /// AllowStmt = "allow" Op {"," Op} [":" "if" Expr] ";"
    fn parse_allow_statement(&mut self) -> Result<AllowStatement, RulesIssue> {
        let pos = self.expect(Token::Allow)?;

        let mut ops = Vec::new();
        loop {
            let (name, name_pos) = self.consume_identifier()?;
            let op = AllowOp::from_name(&name).ok_or_else(|| {
                RulesIssue::new(format!("Unknown operation \"{}\"", name), name_pos)
            })?;
            ops.push(op);
            if *self.peek() != Token::Comma {
                break;
            }
            self.advance();
        }

        let condition = if *self.peek() == Token::Colon {
            self.advance();
            self.expect(Token::If)?;
            Some(self.parse_expression()?)
        } else {
            None
        };

        self.expect(Token::Semicolon)?;
        Ok(AllowStatement { ops, condition, pos })
    }

    /// FunctionDecl = "function" Ident "(" [Params] ")" "{" "return" Expr ";" "}"
    fn parse_function_decl(&mut self) -> Result<FunctionDecl, RulesIssue> {
        let pos = self.expect(Token::Function)?;
        let (name, _) = self.consume_identifier()?;

        self.expect(Token::LeftParen)?;
        let mut params = Vec::new();
        if *self.peek() != Token::RightParen {
            loop {
                let (param, _) = self.consume_identifier()?;
                params.push(param);
                if *self.peek() != Token::Comma {
                    break;
                }
                self.advance();
            }
        }
        self.expect(Token::RightParen)?;

        self.expect(Token::LeftBrace)?;
        self.expect(Token::Return)?;
        let body = self.parse_expression()?;
        self.expect(Token::Semicolon)?;
        self.expect(Token::RightBrace)?;

        Ok(FunctionDecl { name, params, body, pos })
    }
}
