//! Security-rules engine
//!
//! Lexer, parser, path matcher, and evaluator for the rules DSL, plus the
//! `Ruleset` facade that decides whether a request may proceed.
//!
//! Evaluation walks the nested match blocks of every service, concatenating
//! path patterns. A block whose full pattern matches the document path gets
//! its allow statements evaluated with the accumulated wildcard bindings in
//! scope; any truthy allow for the requested operation grants access.
//! Evaluation errors never grant, never crash: they become diagnostics on
//! the (denied) decision.

pub mod ast;
pub mod context;
pub mod evaluator;
pub mod lexer;
pub mod matcher;
pub mod parser;
pub mod regex_guard;

use std::collections::HashMap;

use crate::error::{MiniStoreError, Result};
use crate::types::Value;

use ast::{AllowOp, FunctionDecl, MatchBlock, RulesFile};
use context::EvaluatorContext;
use evaluator::{truthy, Evaluator};
use lexer::RulesIssue;
use matcher::PatternSegment;
use parser::Parser;
use regex_guard::RegexGuard;

/// The outcome of a rules check
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Evaluation errors encountered along the way (each one denied its rule)
    pub diagnostics: Vec<String>,
}

impl Decision {
    fn deny() -> Self {
        Self { allowed: false, diagnostics: Vec::new() }
    }
}

/// A parsed rules file ready for evaluation
#[derive(Debug)]
pub struct Ruleset {
    pub file: RulesFile,
    guard: RegexGuard,
}

impl Ruleset {
    /// Parse a rules source strictly; the first syntax error fails the load
    pub fn parse(source: &str) -> Result<Ruleset> {
        let file = Parser::parse(source)
            .map_err(|issue| MiniStoreError::Rules(issue.to_string()))?;
        Ok(Ruleset { file, guard: RegexGuard::default() })
    }

    /// Parse with recovery: a best-effort ruleset plus all errors found
    pub fn parse_with_recovery(source: &str) -> (Ruleset, Vec<RulesIssue>) {
        let (file, issues) = Parser::parse_with_recovery(source);
        (Ruleset { file, guard: RegexGuard::default() }, issues)
    }

    /// Replace the regex guard (custom slow-evaluation threshold)
    pub fn with_guard(mut self, guard: RegexGuard) -> Ruleset {
        self.guard = guard;
        self
    }

    /// Decide whether `method` on `path` is allowed under `service`
    ///
    /// `path` is the rules-domain path, e.g.
    /// `/databases/(default)/documents/users/alice`; `method` is one of
    /// read, write, get, list, create, update, delete.
    pub fn check(
        &self,
        service: &str,
        method: &str,
        path: &str,
        ctx: &EvaluatorContext,
    ) -> Decision {
        let requested = match AllowOp::from_name(method) {
            Some(op) => op,
            None => {
                let mut decision = Decision::deny();
                decision.diagnostics.push(format!("unknown operation \"{}\"", method));
                return decision;
            }
        };

        let segments = matcher::normalize(path);
        let mut decision = Decision::deny();

        for decl in self.file.services.iter().filter(|s| s.name == service) {
            for block in &decl.matches {
                let mut chain: Vec<&[FunctionDecl]> = Vec::new();
                self.walk(
                    block,
                    &segments,
                    HashMap::new(),
                    &mut chain,
                    requested,
                    ctx,
                    &mut decision,
                );
                if decision.allowed {
                    return decision;
                }
            }
        }
        decision
    }

    #[allow(clippy::too_many_arguments)]
    fn walk<'a>(
        &self,
        block: &'a MatchBlock,
        segments: &[String],
        inherited: HashMap<String, Value>,
        chain: &mut Vec<&'a [FunctionDecl]>,
        requested: AllowOp,
        ctx: &EvaluatorContext,
        decision: &mut Decision,
    ) {
        let (bindings, consumed) = match block.pattern.match_prefix(segments) {
            Some(matched) => matched,
            None => return,
        };

        // Merge this block's wildcard bindings over the inherited scope.
        // Recursive wildcards bind as paths, singles as strings.
        let mut scope = inherited;
        for (name, value) in bindings {
            let is_recursive = block
                .pattern
                .segments
                .iter()
                .any(|s| matches!(s, PatternSegment::Recursive(n) if *n == name));
            let bound = if is_recursive {
                Value::Reference(value)
            } else {
                Value::String(value)
            };
            scope.insert(name, bound);
        }

        chain.push(&block.functions);

        if consumed == segments.len() {
            // Full match: this block's allow statements apply
            for allow in &block.allows {
                if !allow.ops.iter().any(|op| op.covers(requested)) {
                    continue;
                }
                match &allow.condition {
                    None => {
                        decision.allowed = true;
                    }
                    Some(condition) => {
                        let mut evaluator = Evaluator::new(ctx, &self.guard);
                        evaluator.push_scope(scope.clone());
                        for functions in chain.iter().copied() {
                            evaluator.push_functions(functions);
                        }
                        match evaluator.eval(condition) {
                            Ok(value) if truthy(&value) => decision.allowed = true,
                            Ok(_) => {}
                            Err(e) => decision.diagnostics.push(format!(
                                "rule at line {} denied: {}",
                                allow.pos.line, e
                            )),
                        }
                    }
                }
                if decision.allowed {
                    break;
                }
            }
        } else {
            // Partial match: descend with the remaining suffix
            for child in &block.children {
                self.walk(
                    child,
                    &segments[consumed..],
                    scope.clone(),
                    chain,
                    requested,
                    ctx,
                    decision,
                );
                if decision.allowed {
                    break;
                }
            }
        }

        chain.pop();
    }
}
