//! AST for the security-rules DSL
//!
//! Every node carries the source position of its first token so evaluation
//! and parse diagnostics can point back into the rules file.

use crate::rules::lexer::SourcePos;
use crate::rules::matcher::PathPattern;

/// A parsed rules file
#[derive(Debug, Clone)]
pub struct RulesFile {
    /// From the optional `rules_version = '<v>';` statement; defaults to "1"
    pub version: String,
    pub services: Vec<ServiceDecl>,
}

/// `service cloud.firestore { ... }`
#[derive(Debug, Clone)]
pub struct ServiceDecl {
    /// Qualified name, e.g. `cloud.firestore`
    pub name: String,
    pub matches: Vec<MatchBlock>,
    pub pos: SourcePos,
}

/// `match /users/{uid} { ... }`
#[derive(Debug, Clone)]
pub struct MatchBlock {
    pub pattern: PathPattern,
    pub allows: Vec<AllowStatement>,
    pub functions: Vec<FunctionDecl>,
    pub children: Vec<MatchBlock>,
    pub pos: SourcePos,
}

/// `allow read, write: if <expr>;`
#[derive(Debug, Clone)]
pub struct AllowStatement {
    pub ops: Vec<AllowOp>,
    /// None means unconditionally allowed
    pub condition: Option<Expr>,
    pub pos: SourcePos,
}

/// The grantable operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowOp {
    Read,
    Write,
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl AllowOp {
    pub fn from_name(name: &str) -> Option<AllowOp> {
        match name {
            "read" => Some(AllowOp::Read),
            "write" => Some(AllowOp::Write),
            "get" => Some(AllowOp::Get),
            "list" => Some(AllowOp::List),
            "create" => Some(AllowOp::Create),
            "update" => Some(AllowOp::Update),
            "delete" => Some(AllowOp::Delete),
            _ => None,
        }
    }

    /// Whether a grant of `self` covers the requested operation
    ///
    /// `read` covers get and list; `write` covers create, update, delete.
    pub fn covers(&self, requested: AllowOp) -> bool {
        if *self == requested {
            return true;
        }
        match self {
            AllowOp::Read => matches!(requested, AllowOp::Get | AllowOp::List),
            AllowOp::Write => {
                matches!(requested, AllowOp::Create | AllowOp::Update | AllowOp::Delete)
            }
            _ => false,
        }
    }
}

/// `function isOwner(uid) { return <expr>; }`
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Expr,
    pub pos: SourcePos,
}

/// Binary operators in precedence order (lowest first in the grammar)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    In,
    Is,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Literal values appearing directly in source
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// One piece of a path literal in expression position
#[derive(Debug, Clone)]
pub enum PathPart {
    /// Literal text, slashes included as written
    Literal(String),
    /// `$(expr)` interpolation
    Interp(Box<Expr>),
}

/// Expression nodes
#[derive(Debug, Clone)]
pub enum Expr {
    Literal {
        value: Literal,
        pos: SourcePos,
    },
    Ident {
        name: String,
        pos: SourcePos,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        pos: SourcePos,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        pos: SourcePos,
    },
    /// `object.property`
    Member {
        object: Box<Expr>,
        property: String,
        pos: SourcePos,
    },
    /// `object[index]`
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        pos: SourcePos,
    },
    /// `callee(args...)`; callee is an identifier or member access
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        pos: SourcePos,
    },
    /// `[a, b, c]`
    List {
        items: Vec<Expr>,
        pos: SourcePos,
    },
    /// `/databases/$(database)/documents/...`
    PathTemplate {
        parts: Vec<PathPart>,
        pos: SourcePos,
    },
}

impl Expr {
    pub fn pos(&self) -> SourcePos {
        match self {
            Expr::Literal { pos, .. }
            | Expr::Ident { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Unary { pos, .. }
            | Expr::Member { pos, .. }
            | Expr::Index { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::List { pos, .. }
            | Expr::PathTemplate { pos, .. } => *pos,
        }
    }
}
