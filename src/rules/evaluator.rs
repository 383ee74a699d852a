//! Expression evaluator for the security-rules DSL
//!
//! A tree walker over the parsed AST. Logical operators short-circuit on
//! truthiness and the unevaluated branch never runs, so `false && boom()`
//! succeeds even when `boom()` would raise. Every failure path is an
//! `EvalError`, never a panic; the ruleset layer turns errors into denials
//! with diagnostics.
//!
//! Runtime values are the document `Value` type: the rules language's
//! dynamic values mirror the document model, with `Reference` doubling as
//! the path type and resource records represented as maps.

use std::collections::HashMap;

use crate::rules::ast::{BinaryOp, Expr, FunctionDecl, Literal, PathPart, UnaryOp};
use crate::rules::context::EvaluatorContext;
use crate::rules::regex_guard::{RegexGuard, RegexOutcome};
use crate::types::Value;

/// Recursion cap for expression evaluation (and thus user functions)
pub const MAX_EVAL_DEPTH: usize = 100;

/// An evaluation failure; surfaces as a denial diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Truthiness: null is false, booleans are themselves, numbers are nonzero,
/// strings are nonempty, everything else is true
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Boolean(b) => *b,
        Value::Integer(i) => *i != 0,
        Value::Double(d) => *d != 0.0,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// The tree-walking evaluator
pub struct Evaluator<'a> {
    ctx: &'a EvaluatorContext,
    guard: &'a RegexGuard,
    /// Function declarations visible at the evaluation site, outermost
    /// block first; lookup runs innermost-first
    functions: Vec<&'a [FunctionDecl]>,
    /// Variable scopes: wildcard bindings at the bottom, one frame per
    /// active function call above
    scopes: Vec<HashMap<String, Value>>,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: &'a EvaluatorContext, guard: &'a RegexGuard) -> Self {
        Self {
            ctx,
            guard,
            functions: Vec::new(),
            scopes: Vec::new(),
            depth: 0,
        }
    }

    /// Add a scope of pre-bound variables (path wildcard bindings)
    pub fn push_scope(&mut self, bindings: HashMap<String, Value>) {
        self.scopes.push(bindings);
    }

    /// Add a layer of visible functions (an enclosing match block's)
    pub fn push_functions(&mut self, functions: &'a [FunctionDecl]) {
        self.functions.push(functions);
    }

    /// Evaluate an expression to a value
    pub fn eval(&mut self, expr: &Expr) -> EvalResult<Value> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(EvalError::new("evaluation depth limit exceeded"));
        }
        self.depth += 1;
        let result = self.eval_expr(expr);
        self.depth -= 1;
        result
    }

    fn eval_expr(&mut self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Literal { value, .. } => Ok(match value {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Boolean(*b),
                Literal::Int(i) => Value::Integer(*i),
                Literal::Float(f) => Value::Double(*f),
                Literal::Str(s) => Value::String(s.clone()),
            }),
            Expr::Ident { name, .. } => self.lookup(name),
            Expr::Binary { op, left, right, .. } => self.eval_binary(*op, left, right),
            Expr::Unary { op, operand, .. } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Boolean(!truthy(&value))),
                    UnaryOp::Neg => match value {
                        Value::Integer(i) => i
                            .checked_neg()
                            .map(Value::Integer)
                            .ok_or_else(|| EvalError::new("integer overflow in negation")),
                        Value::Double(d) => Ok(Value::Double(-d)),
                        other => Err(EvalError::new(format!(
                            "unary - requires a number, got {}",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expr::Member { object, property, .. } => {
                let object = self.eval(object)?;
                Ok(member_access(&object, property))
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                Ok(index_access(&object, &index))
            }
            Expr::Call { callee, args, .. } => self.eval_call(callee, args),
            Expr::List { items, .. } => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::Array(values))
            }
            Expr::PathTemplate { parts, .. } => self.eval_path_template(parts),
        }
    }

    /// Resolve an identifier: scopes innermost-first, then the context
    fn lookup(&self, name: &str) -> EvalResult<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Ok(value.clone());
            }
        }
        match name {
            "request" => Ok(self.ctx.request.clone()),
            "resource" => Ok(self.ctx.resource.clone()),
            "database" => Ok(Value::String(self.ctx.database.clone())),
            _ => Err(EvalError::new(format!("unknown identifier \"{}\"", name))),
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> EvalResult<Value> {
        match op {
            // Short-circuit: the unevaluated branch never runs
            BinaryOp::And => {
                let left = self.eval(left)?;
                if !truthy(&left) {
                    return Ok(Value::Boolean(false));
                }
                let right = self.eval(right)?;
                Ok(Value::Boolean(truthy(&right)))
            }
            BinaryOp::Or => {
                let left = self.eval(left)?;
                if truthy(&left) {
                    return Ok(Value::Boolean(true));
                }
                let right = self.eval(right)?;
                Ok(Value::Boolean(truthy(&right)))
            }
            BinaryOp::Eq => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(Value::Boolean(left == right))
            }
            BinaryOp::NotEq => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(Value::Boolean(left != right))
            }
            BinaryOp::In => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                match right {
                    Value::Array(items) => Ok(Value::Boolean(items.contains(&left))),
                    other => Err(EvalError::new(format!(
                        "right operand of in must be a list, got {}",
                        other.type_name()
                    ))),
                }
            }
            // The right operand of is a type name, not an evaluated expression
            BinaryOp::Is => {
                let left = self.eval(left)?;
                let type_name = match right {
                    Expr::Ident { name, .. } => name.as_str(),
                    Expr::Literal { value: Literal::Null, .. } => "null",
                    _ => {
                        return Err(EvalError::new(
                            "right operand of is must be a type name",
                        ))
                    }
                };
                type_test(&left, type_name).map(Value::Boolean)
            }
            BinaryOp::Less
            | BinaryOp::LessEq
            | BinaryOp::Greater
            | BinaryOp::GreaterEq => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                compare(op, &left, &right)
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                arithmetic(op, &left, &right)
            }
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> EvalResult<Value> {
        match callee {
            // Built-ins and user-defined functions
            Expr::Ident { name, .. } => match name.as_str() {
                "get" => {
                    let path = self.eval_single_path_arg("get", args)?;
                    self.ctx.reader.get_resource(&path).ok_or_else(|| {
                        EvalError::new(format!("get() of missing document: {}", path))
                    })
                }
                "exists" => {
                    let path = self.eval_single_path_arg("exists", args)?;
                    Ok(Value::Boolean(self.ctx.reader.exists(&path)))
                }
                _ => self.call_function(name, args),
            },
            // Method dispatch by receiver type
            Expr::Member { object, property, .. } => {
                let receiver = self.eval(object)?;
                self.call_method(&receiver, property, args)
            }
            _ => Err(EvalError::new("expression is not callable")),
        }
    }

    fn eval_single_path_arg(&mut self, name: &str, args: &[Expr]) -> EvalResult<String> {
        if args.len() != 1 {
            return Err(EvalError::new(format!(
                "{}() takes exactly one argument, got {}",
                name,
                args.len()
            )));
        }
        match self.eval(&args[0])? {
            Value::Reference(path) => Ok(path),
            Value::String(path) => Ok(path),
            other => Err(EvalError::new(format!(
                "{}() requires a path, got {}",
                name,
                other.type_name()
            ))),
        }
    }

    /// Call a user-defined function, innermost visible declaration first
    fn call_function(&mut self, name: &str, args: &[Expr]) -> EvalResult<Value> {
        let decl = self
            .functions
            .iter()
            .rev()
            .copied()
            .flat_map(|fns| fns.iter())
            .find(|f| f.name == name)
            .ok_or_else(|| EvalError::new(format!("unknown function \"{}\"", name)))?;

        if args.len() != decl.params.len() {
            return Err(EvalError::new(format!(
                "function {}() takes {} arguments, got {}",
                name,
                decl.params.len(),
                args.len()
            )));
        }

        // Arguments evaluate in the caller's scope, eagerly
        let mut frame = HashMap::new();
        for (param, arg) in decl.params.iter().zip(args) {
            frame.insert(param.clone(), self.eval(arg)?);
        }

        self.scopes.push(frame);
        let result = self.eval(&decl.body);
        self.scopes.pop();
        result
    }

    fn call_method(&mut self, receiver: &Value, method: &str, args: &[Expr]) -> EvalResult<Value> {
        match (receiver, method) {
            (Value::String(s), "matches") => {
                if args.len() != 1 {
                    return Err(EvalError::new("matches() takes exactly one argument"));
                }
                let pattern = match self.eval(&args[0])? {
                    Value::String(p) => p,
                    other => {
                        return Err(EvalError::new(format!(
                            "matches() requires a string pattern, got {}",
                            other.type_name()
                        )))
                    }
                };
                match self.guard.is_match(&pattern, s) {
                    RegexOutcome::Match(matched) => Ok(Value::Boolean(matched)),
                    RegexOutcome::Rejected(reason) => {
                        Err(EvalError::new(format!("regex rejected: {}", reason)))
                    }
                }
            }
            // size() counts code units, as the production language does
            (Value::String(s), "size") => {
                self.expect_no_args("size", args)?;
                Ok(Value::Integer(s.encode_utf16().count() as i64))
            }
            (Value::Array(items), "size") => {
                self.expect_no_args("size", args)?;
                Ok(Value::Integer(items.len() as i64))
            }
            (Value::Array(items), "hasAny") => {
                let probe = self.eval_single_list_arg("hasAny", args)?;
                Ok(Value::Boolean(probe.iter().any(|x| items.contains(x))))
            }
            (Value::Array(items), "hasAll") => {
                let probe = self.eval_single_list_arg("hasAll", args)?;
                Ok(Value::Boolean(probe.iter().all(|x| items.contains(x))))
            }
            (receiver, method) => Err(EvalError::new(format!(
                "{} has no method \"{}\"",
                receiver.type_name(),
                method
            ))),
        }
    }

    fn expect_no_args(&self, name: &str, args: &[Expr]) -> EvalResult<()> {
        if args.is_empty() {
            Ok(())
        } else {
            Err(EvalError::new(format!("{}() takes no arguments", name)))
        }
    }

    fn eval_single_list_arg(&mut self, name: &str, args: &[Expr]) -> EvalResult<Vec<Value>> {
        if args.len() != 1 {
            return Err(EvalError::new(format!(
                "{}() takes exactly one argument",
                name
            )));
        }
        match self.eval(&args[0])? {
            Value::Array(items) => Ok(items),
            other => Err(EvalError::new(format!(
                "{}() requires a list, got {}",
                name,
                other.type_name()
            ))),
        }
    }

    /// Resolve a path template to a path value, stringifying interpolations
    fn eval_path_template(&mut self, parts: &[PathPart]) -> EvalResult<Value> {
        let mut path = String::new();
        for part in parts {
            match part {
                PathPart::Literal(text) => path.push_str(text),
                PathPart::Interp(expr) => match self.eval(expr)? {
                    Value::String(s) => path.push_str(&s),
                    Value::Integer(i) => path.push_str(&i.to_string()),
                    Value::Reference(r) => path.push_str(&r),
                    other => {
                        return Err(EvalError::new(format!(
                            "cannot interpolate {} into a path",
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Ok(Value::Reference(path))
    }
}

/// Null-safe member access: missing properties and null receivers are null
fn member_access(object: &Value, property: &str) -> Value {
    match object {
        Value::Map(fields) => fields.get(property).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Null-safe computed access
fn index_access(object: &Value, index: &Value) -> Value {
    match (object, index) {
        (Value::Map(fields), Value::String(key)) => {
            fields.get(key).cloned().unwrap_or(Value::Null)
        }
        (Value::Array(items), Value::Integer(i)) => {
            if *i >= 0 {
                items.get(*i as usize).cloned().unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        }
        _ => Value::Null,
    }
}

/// `value is type_name`
fn type_test(value: &Value, type_name: &str) -> EvalResult<bool> {
    let matches = match type_name {
        "null" => value.is_null(),
        "bool" => matches!(value, Value::Boolean(_)),
        "int" => matches!(value, Value::Integer(_)),
        "float" => matches!(value, Value::Double(_)),
        "number" => matches!(value, Value::Integer(_) | Value::Double(_)),
        "string" => matches!(value, Value::String(_)),
        "list" => matches!(value, Value::Array(_)),
        "map" => matches!(value, Value::Map(_)),
        "timestamp" => matches!(value, Value::Timestamp(_)),
        "bytes" => matches!(value, Value::Bytes(_)),
        "path" => matches!(value, Value::Reference(_)),
        "latlng" => matches!(value, Value::GeoPoint { .. }),
        other => return Err(EvalError::new(format!("unknown type name \"{}\"", other))),
    };
    Ok(matches)
}

/// Numeric comparison; both operands must be numbers
fn compare(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    let (a, b) = match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => {
            let ordered = match op {
                BinaryOp::Less => a < b,
                BinaryOp::LessEq => a <= b,
                BinaryOp::Greater => a > b,
                BinaryOp::GreaterEq => a >= b,
                _ => unreachable!(),
            };
            return Ok(Value::Boolean(ordered));
        }
        (Value::Integer(a), Value::Double(b)) => (*a as f64, *b),
        (Value::Double(a), Value::Integer(b)) => (*a, *b as f64),
        (Value::Double(a), Value::Double(b)) => (*a, *b),
        (l, r) => {
            return Err(EvalError::new(format!(
                "comparison requires numbers, got {} and {}",
                l.type_name(),
                r.type_name()
            )))
        }
    };
    let ordered = match op {
        BinaryOp::Less => a < b,
        BinaryOp::LessEq => a <= b,
        BinaryOp::Greater => a > b,
        BinaryOp::GreaterEq => a >= b,
        _ => unreachable!(),
    };
    Ok(Value::Boolean(ordered))
}

/// Arithmetic; numbers only, plus string concatenation for `+`
fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    if let (Value::String(a), Value::String(b), BinaryOp::Add) = (left, right, op) {
        return Ok(Value::String(format!("{}{}", a, b)));
    }

    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(*b),
                BinaryOp::Sub => a.checked_sub(*b),
                BinaryOp::Mul => a.checked_mul(*b),
                BinaryOp::Div => {
                    if *b == 0 {
                        return Err(EvalError::new("division by zero"));
                    }
                    a.checked_div(*b)
                }
                BinaryOp::Mod => {
                    if *b == 0 {
                        return Err(EvalError::new("modulo by zero"));
                    }
                    a.checked_rem(*b)
                }
                _ => unreachable!(),
            };
            result
                .map(Value::Integer)
                .ok_or_else(|| EvalError::new("integer overflow"))
        }
        (Value::Integer(_), Value::Double(_))
        | (Value::Double(_), Value::Integer(_))
        | (Value::Double(_), Value::Double(_)) => {
            let a = to_f64(left);
            let b = to_f64(right);
            if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0.0 {
                return Err(EvalError::new("division by zero"));
            }
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                _ => unreachable!(),
            };
            Ok(Value::Double(result))
        }
        (l, r) => Err(EvalError::new(format!(
            "arithmetic requires numbers, got {} and {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn to_f64(value: &Value) -> f64 {
    match value {
        Value::Integer(i) => *i as f64,
        Value::Double(d) => *d,
        _ => 0.0,
    }
}
