//! Safe-regex guard
//!
//! `matches()` in the rules DSL takes user-supplied patterns, so every
//! pattern is screened before it reaches the regex engine: size limits
//! plus structural checks for the classic catastrophic-backtracking
//! shapes. The underlying engine (the `regex` crate) is linear-time, but
//! the screen keeps rules files portable to engines that are not, and
//! bounds compile cost. Rejected patterns and oversized inputs produce a
//! "rejected for safety" outcome rather than an error; evaluation time is
//! measured and slow evaluations are logged.

use std::time::{Duration, Instant};

use log::warn;

/// Maximum accepted pattern length in characters
pub const MAX_PATTERN_LENGTH: usize = 1000;
/// Maximum number of quantifiers in a pattern
pub const MAX_QUANTIFIERS: usize = 100;
/// Maximum number of groups in a pattern
pub const MAX_GROUPS: usize = 20;
/// Maximum size of a character class in characters
pub const MAX_CLASS_SIZE: usize = 100;
/// Maximum input length matched against a pattern
pub const MAX_INPUT_LENGTH: usize = 10_000;

/// Default threshold above which a slow evaluation is logged
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(100);

/// Outcome of a guarded match
#[derive(Debug, Clone, PartialEq)]
pub enum RegexOutcome {
    /// The pattern ran; did it match?
    Match(bool),
    /// The pattern or input was rejected for safety; reason attached
    Rejected(String),
}

/// The guard: screening plus bounded execution
#[derive(Debug)]
pub struct RegexGuard {
    slow_threshold: Duration,
}

impl RegexGuard {
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }

    /// Screen a pattern without executing it
    pub fn screen(&self, pattern: &str) -> Result<(), String> {
        screen_pattern(pattern)
    }

    /// Full-string match of `input` against `pattern`, guarded
    pub fn is_match(&self, pattern: &str, input: &str) -> RegexOutcome {
        if input.len() > MAX_INPUT_LENGTH {
            return RegexOutcome::Rejected(format!(
                "input of {} characters rejected for safety (maximum {})",
                input.len(),
                MAX_INPUT_LENGTH
            ));
        }
        if let Err(reason) = screen_pattern(pattern) {
            return RegexOutcome::Rejected(reason);
        }

        // matches() is anchored in the rules language
        let anchored = format!("^(?:{})$", pattern);
        let compiled = match regex::Regex::new(&anchored) {
            Ok(re) => re,
            Err(e) => return RegexOutcome::Rejected(format!("pattern failed to compile: {}", e)),
        };

        let start = Instant::now();
        let matched = compiled.is_match(input);
        let elapsed = start.elapsed();
        if elapsed > self.slow_threshold {
            warn!(
                "slow regex evaluation: pattern {:?} took {:?} on {} chars of input",
                pattern,
                elapsed,
                input.len()
            );
        }
        RegexOutcome::Match(matched)
    }
}

impl Default for RegexGuard {
    fn default() -> Self {
        Self::new(DEFAULT_SLOW_THRESHOLD)
    }
}

/// Escape regex metacharacters so a literal string can be embedded in a pattern
pub fn escape_regex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(
            c,
            '.' | '*' | '+' | '?' | '^' | '$' | '{' | '}' | '(' | ')' | '|' | '[' | ']' | '\\'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

//=============================================================================
// Structural screening
//=============================================================================

/// One group's bookkeeping while scanning
struct GroupFrame {
    /// Any quantifier seen directly inside this group (or propagated up
    /// from a quantified inner group)
    contains_quantifier: bool,
    /// Top-level alternation inside this group
    has_alternation: bool,
    /// First character of each top-level alternation branch
    branch_heads: Vec<Option<char>>,
    /// Lookaround group: `(?=`, `(?!`, `(?<=`, `(?<!`
    is_lookaround: bool,
}

fn screen_pattern(pattern: &str) -> Result<(), String> {
    if pattern.len() > MAX_PATTERN_LENGTH {
        return Err(format!(
            "pattern of {} characters rejected for safety (maximum {})",
            pattern.len(),
            MAX_PATTERN_LENGTH
        ));
    }

    let chars: Vec<char> = pattern.chars().collect();
    let mut quantifiers = 0usize;
    let mut groups = 0usize;
    let mut stack: Vec<GroupFrame> = Vec::new();
    // Tracks the head character of the current top-level branch in the
    // innermost group; None until the branch sees its first atom
    let mut i = 0usize;

    // Adjacent wildcard quantifiers
    for pair in [".*.*", ".+.+", ".*.+", ".+.*"] {
        if pattern.contains(pair) {
            return Err(format!(
                "pattern rejected for safety: adjacent greedy wildcards {:?}",
                pair
            ));
        }
    }

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                // Escaped character: skip the escape target entirely
                note_atom(&mut stack, Some('\\'));
                i += 2;
                continue;
            }
            '[' => {
                // Character class: count its size, quantifiers inside do not count
                let mut j = i + 1;
                let mut size = 0usize;
                if chars.get(j) == Some(&'^') {
                    j += 1;
                }
                loop {
                    match chars.get(j) {
                        Some('\\') => {
                            size += 1;
                            j += 2;
                        }
                        Some(']') if size > 0 => break,
                        Some(_) => {
                            size += 1;
                            j += 1;
                        }
                        None => return Err("pattern rejected: unterminated character class".into()),
                    }
                }
                if size > MAX_CLASS_SIZE {
                    return Err(format!(
                        "pattern rejected for safety: character class of {} entries (maximum {})",
                        size, MAX_CLASS_SIZE
                    ));
                }
                note_atom(&mut stack, Some('['));
                i = j + 1;
                continue;
            }
            '(' => {
                groups += 1;
                if groups > MAX_GROUPS {
                    return Err(format!(
                        "pattern rejected for safety: more than {} groups",
                        MAX_GROUPS
                    ));
                }
                let rest: String = chars[i..].iter().take(4).collect();
                let is_lookaround = rest.starts_with("(?=")
                    || rest.starts_with("(?!")
                    || rest.starts_with("(?<=")
                    || rest.starts_with("(?<!");
                note_atom(&mut stack, Some('('));
                stack.push(GroupFrame {
                    contains_quantifier: false,
                    has_alternation: false,
                    branch_heads: vec![None],
                    is_lookaround,
                });
                // The '?' of a group modifier ("?:", "?=", "?<!") is not a
                // quantifier; step over it
                if chars.get(i + 1) == Some(&'?') {
                    i += 1;
                }
            }
            ')' => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| "pattern rejected: unbalanced parenthesis".to_string())?;
                if frame.is_lookaround && frame.contains_quantifier {
                    return Err(
                        "pattern rejected for safety: quantifier inside lookaround".into()
                    );
                }
                let quantified = matches!(chars.get(i + 1), Some('*') | Some('+') | Some('?') | Some('{'));
                if quantified {
                    if frame.contains_quantifier {
                        return Err(
                            "pattern rejected for safety: nested quantifiers".into()
                        );
                    }
                    if frame.has_alternation && branches_overlap(&frame.branch_heads) {
                        return Err(
                            "pattern rejected for safety: overlapping alternation under a quantifier"
                                .into(),
                        );
                    }
                    // A quantified group counts as a quantifier in its parent
                    if let Some(parent) = stack.last_mut() {
                        parent.contains_quantifier = true;
                    }
                }
            }
            '|' => {
                if let Some(frame) = stack.last_mut() {
                    frame.has_alternation = true;
                    frame.branch_heads.push(None);
                }
            }
            '*' | '+' | '?' => {
                quantifiers += 1;
                if quantifiers > MAX_QUANTIFIERS {
                    return Err(format!(
                        "pattern rejected for safety: more than {} quantifiers",
                        MAX_QUANTIFIERS
                    ));
                }
                if let Some(frame) = stack.last_mut() {
                    frame.contains_quantifier = true;
                }
            }
            '{' => {
                // Counted repetition {m}, {m,}, {m,n} is a quantifier;
                // a bare brace is a literal
                let mut j = i + 1;
                let mut is_repeat = false;
                while let Some(&d) = chars.get(j) {
                    if d == '}' {
                        is_repeat = j > i + 1;
                        break;
                    }
                    if !d.is_ascii_digit() && d != ',' {
                        break;
                    }
                    j += 1;
                }
                if is_repeat {
                    quantifiers += 1;
                    if quantifiers > MAX_QUANTIFIERS {
                        return Err(format!(
                            "pattern rejected for safety: more than {} quantifiers",
                            MAX_QUANTIFIERS
                        ));
                    }
                    if let Some(frame) = stack.last_mut() {
                        frame.contains_quantifier = true;
                    }
                    i = j + 1;
                    continue;
                }
                note_atom(&mut stack, Some('{'));
            }
            other => {
                note_atom(&mut stack, Some(other));
            }
        }
        i += 1;
    }

    if !stack.is_empty() {
        return Err("pattern rejected: unbalanced parenthesis".into());
    }
    Ok(())
}

/// Record the first atom of the current branch in the innermost group
fn note_atom(stack: &mut [GroupFrame], head: Option<char>) {
    if let Some(frame) = stack.last_mut() {
        if let Some(slot) = frame.branch_heads.last_mut() {
            if slot.is_none() {
                *slot = head;
            }
        }
    }
}

/// Whether two alternation branches could match the same first character
fn branches_overlap(heads: &[Option<char>]) -> bool {
    for (i, a) in heads.iter().enumerate() {
        for b in heads.iter().skip(i + 1) {
            match (a, b) {
                // '.' overlaps with anything
                (Some('.'), _) | (_, Some('.')) => return true,
                (Some(x), Some(y)) if x == y => return true,
                _ => {}
            }
        }
    }
    false
}
