//! The input tree of the LifeSharp semantic core.
//!
//! A front end hands over one [`Module`] of function, sum type and active
//! pattern declarations. Functions may take several parameters; the core
//! curries them. Every node carries a [`Span`], and the core never sees
//! concrete syntax.

pub mod build;
pub mod ident;

use std::collections::BTreeSet;

use serde::Serialize;

pub use ident::{InvalidIdentifier, validate_identifier};

/// Identifies a source file in the compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FileId(pub u32);

/// A byte offset range within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Span {
    pub file: FileId,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file: FileId, start: u32, end: u32) -> Self {
        Self { file, start, end }
    }

    /// Create a span that covers both `self` and `other`.
    pub fn merge(self, other: Span) -> Span {
        debug_assert_eq!(
            self.file, other.file,
            "cannot merge spans from different files"
        );
        Span {
            file: self.file,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// A synthetic span for compiler-generated nodes.
    pub fn synthetic() -> Self {
        Self {
            file: FileId(u32::MAX),
            start: 0,
            end: 0,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.file == FileId(u32::MAX)
    }
}

/// A value paired with its source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            node: f(self.node),
            span: self.span,
        }
    }
}

// ---------------------------------------------------------------------------
// Literal values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Unit,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

pub type Expr = Spanned<ExprKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Literal value.
    Lit(Lit),

    /// Variable reference.
    Var(String),

    /// Application: `f a b` is sugar for `(f a) b`.
    Call { func: Box<Expr>, args: Vec<Expr> },

    /// Lambda: `fun x y -> body`, desugared to nested unary lambdas.
    Lambda { params: Vec<Param>, body: Box<Expr> },

    /// `let name = value in body`.
    Let {
        name: Spanned<String>,
        annotation: Option<Spanned<TypeAnnotation>>,
        value: Box<Expr>,
        body: Box<Expr>,
    },

    /// Statement sequence; the value is the last expression.
    Seq(Vec<Expr>),

    /// `if condition then a else b`.
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },

    /// `match scrutinee with arms`.
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },

    /// Tuple construction: `(a, b)`.
    Tuple(Vec<Expr>),

    /// Algebraic construction: `Some x`, `Point (1, 2)`.
    Construct { name: Spanned<String>, args: Vec<Expr> },

    /// Binary operator.
    Binary {
        op: Spanned<BinOp>,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Unary operator.
    Unary {
        op: Spanned<UnaryOp>,
        operand: Box<Expr>,
    },

    /// `&expr` or `&mut expr`.
    Borrow { unique: bool, expr: Box<Expr> },

    /// `*expr`.
    Deref(Box<Expr>),

    /// `target := value`. The target is a variable or a dereference.
    Assign { target: Box<Expr>, value: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "=",
            BinOp::Neq => "<>",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// A function or lambda parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Spanned<String>,
    pub annotation: Option<Spanned<TypeAnnotation>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Expr,
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

pub type Pattern = Spanned<PatternKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    /// Matches anything, binds nothing.
    Wildcard,

    /// Binds the matched value to a name.
    Var(String),

    /// Matches a literal value.
    Lit(Lit),

    /// Matches a tuple: `(a, b)`.
    Tuple(Vec<Pattern>),

    /// `Name args`: an algebraic variant of the scrutinee's type, or a case
    /// of an active pattern. Which one is decided by name resolution.
    Constructor { name: String, args: Vec<Pattern> },
}

// ---------------------------------------------------------------------------
// Type annotations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeAnnotation {
    /// A primitive, `String`, `Unit`, or a named algebraic type with arguments.
    Named(String, Vec<Spanned<TypeAnnotation>>),
    /// A type variable: `'a`.
    Var(String),
    Tuple(Vec<Spanned<TypeAnnotation>>),
    /// `&T` or `&mut T`.
    Ref {
        unique: bool,
        inner: Box<Spanned<TypeAnnotation>>,
    },
    /// `A -> B` or `A -[io | e]-> B`.
    Function {
        param: Box<Spanned<TypeAnnotation>>,
        ret: Box<Spanned<TypeAnnotation>>,
        effects: Option<EffectRowAnnotation>,
    },
}

/// A written effect row: `[io, mut]` or `[io | e]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectRowAnnotation {
    pub labels: Vec<Spanned<String>>,
    pub tail: Option<Spanned<String>>,
    pub span: Span,
}

// ---------------------------------------------------------------------------
// Top-level declarations
// ---------------------------------------------------------------------------

pub type Decl = Spanned<DeclKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    /// `let name params = body`. Zero parameters declares a value.
    Function(FnDecl),

    /// `type Option 'a = None | Some of 'a`.
    Type(TypeDef),

    /// `let (|Zero|Positive|Negative|) n = ...`.
    ActivePattern(ActivePatternDecl),
}

impl DeclKind {
    /// The name this declaration binds in the value namespace, if any.
    pub fn value_name(&self) -> Option<&Spanned<String>> {
        match self {
            DeclKind::Function(decl) => Some(&decl.name),
            DeclKind::ActivePattern(decl) => Some(&decl.name),
            DeclKind::Type(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub name: Spanned<String>,
    pub params: Vec<Param>,
    pub return_annotation: Option<Spanned<TypeAnnotation>>,
    /// Effects the innermost arrow may perform. `None` leaves them inferred.
    pub effect_annotation: Option<EffectRowAnnotation>,
    pub body: Expr,
    pub span: Span,
}

impl FnDecl {
    /// Convert this declaration to the equivalent lambda expression.
    ///
    /// Zero-parameter declarations are values and return their body.
    pub fn to_lambda(&self) -> Expr {
        if self.params.is_empty() {
            return self.body.clone();
        }
        Spanned::new(
            ExprKind::Lambda {
                params: self.params.clone(),
                body: Box::new(self.body.clone()),
            },
            self.span,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: Spanned<String>,
    pub params: Vec<Spanned<String>>,
    pub variants: Vec<TypeVariant>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeVariant {
    pub name: Spanned<String>,
    pub fields: Vec<Spanned<TypeAnnotation>>,
}

/// A user-defined classification usable inside patterns.
///
/// The declaration introduces a function `name : input -> name` and a
/// result type `name` whose variants are the declared cases. A partial
/// pattern additionally has an implicit no-match case that arms never name.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePatternDecl {
    pub name: Spanned<String>,
    pub cases: Vec<TypeVariant>,
    pub total: bool,
    pub param: Param,
    pub body: Expr,
    pub span: Span,
}

/// A complete source file / module.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub declarations: Vec<Decl>,
    pub span: Span,
}

// ---------------------------------------------------------------------------
// Free variable analysis
// ---------------------------------------------------------------------------

/// Compute the set of free variable names in an expression.
///
/// A variable is "free" if it is referenced (`Var`) but not bound by an
/// enclosing `Let`, `Lambda`, or pattern within the expression. Constructor
/// names in expressions and patterns are not variables.
pub fn free_vars(expr: &Expr) -> BTreeSet<String> {
    let mut free = BTreeSet::new();
    let mut bound = Vec::new();
    collect_free_vars(expr, &mut free, &mut bound);
    free
}

fn collect_free_vars(expr: &Expr, free: &mut BTreeSet<String>, bound: &mut Vec<String>) {
    match &expr.node {
        ExprKind::Lit(_) => {}
        ExprKind::Var(name) => {
            if !bound.iter().any(|b| b == name) {
                free.insert(name.clone());
            }
        }
        ExprKind::Call { func, args } => {
            collect_free_vars(func, free, bound);
            for arg in args {
                collect_free_vars(arg, free, bound);
            }
        }
        ExprKind::Lambda { params, body } => {
            let depth = bound.len();
            bound.extend(params.iter().map(|p| p.name.node.clone()));
            collect_free_vars(body, free, bound);
            bound.truncate(depth);
        }
        ExprKind::Let {
            name, value, body, ..
        } => {
            collect_free_vars(value, free, bound);
            bound.push(name.node.clone());
            collect_free_vars(body, free, bound);
            bound.pop();
        }
        ExprKind::Seq(exprs) | ExprKind::Tuple(exprs) => {
            for e in exprs {
                collect_free_vars(e, free, bound);
            }
        }
        ExprKind::Construct { args, .. } => {
            for e in args {
                collect_free_vars(e, free, bound);
            }
        }
        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            collect_free_vars(condition, free, bound);
            collect_free_vars(then_branch, free, bound);
            collect_free_vars(else_branch, free, bound);
        }
        ExprKind::Match { scrutinee, arms } => {
            collect_free_vars(scrutinee, free, bound);
            for arm in arms {
                let depth = bound.len();
                pattern_bindings(&arm.pattern, bound);
                if let Some(guard) = &arm.guard {
                    collect_free_vars(guard, free, bound);
                }
                collect_free_vars(&arm.body, free, bound);
                bound.truncate(depth);
            }
        }
        ExprKind::Binary { left, right, .. } => {
            collect_free_vars(left, free, bound);
            collect_free_vars(right, free, bound);
        }
        ExprKind::Unary { operand, .. } => collect_free_vars(operand, free, bound),
        ExprKind::Borrow { expr, .. } | ExprKind::Deref(expr) => {
            collect_free_vars(expr, free, bound)
        }
        ExprKind::Assign { target, value } => {
            collect_free_vars(target, free, bound);
            collect_free_vars(value, free, bound);
        }
    }
}

/// Push every name a pattern binds, left to right.
pub fn pattern_bindings(pattern: &Pattern, out: &mut Vec<String>) {
    match &pattern.node {
        PatternKind::Wildcard | PatternKind::Lit(_) => {}
        PatternKind::Var(name) => out.push(name.clone()),
        PatternKind::Tuple(items) => {
            for item in items {
                pattern_bindings(item, out);
            }
        }
        PatternKind::Constructor { args, .. } => {
            for arg in args {
                pattern_bindings(arg, out);
            }
        }
    }
}

/// Collect every constructor name a pattern mentions (including nested).
///
/// A capitalized `Var` may name a nullary case, so it is collected too.
pub fn pattern_constructors(pattern: &Pattern, out: &mut BTreeSet<String>) {
    match &pattern.node {
        PatternKind::Wildcard | PatternKind::Lit(_) => {}
        PatternKind::Var(name) => {
            if name.chars().next().is_some_and(char::is_uppercase) {
                out.insert(name.clone());
            }
        }
        PatternKind::Tuple(items) => {
            for item in items {
                pattern_constructors(item, out);
            }
        }
        PatternKind::Constructor { name, args } => {
            out.insert(name.clone());
            for arg in args {
                pattern_constructors(arg, out);
            }
        }
    }
}

/// Collect every constructor name used by patterns anywhere in `expr`.
///
/// Used by the dependency analysis: matching on an active pattern case
/// depends on the active pattern's declaration.
pub fn matched_constructors(expr: &Expr) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_matched_constructors(expr, &mut out);
    out
}

fn collect_matched_constructors(expr: &Expr, out: &mut BTreeSet<String>) {
    match &expr.node {
        ExprKind::Lit(_) | ExprKind::Var(_) => {}
        ExprKind::Call { func, args } => {
            collect_matched_constructors(func, out);
            for arg in args {
                collect_matched_constructors(arg, out);
            }
        }
        ExprKind::Lambda { body, .. } => collect_matched_constructors(body, out),
        ExprKind::Let { value, body, .. } => {
            collect_matched_constructors(value, out);
            collect_matched_constructors(body, out);
        }
        ExprKind::Seq(exprs) | ExprKind::Tuple(exprs) | ExprKind::Construct { args: exprs, .. } => {
            for e in exprs {
                collect_matched_constructors(e, out);
            }
        }
        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            collect_matched_constructors(condition, out);
            collect_matched_constructors(then_branch, out);
            collect_matched_constructors(else_branch, out);
        }
        ExprKind::Match { scrutinee, arms } => {
            collect_matched_constructors(scrutinee, out);
            for arm in arms {
                pattern_constructors(&arm.pattern, out);
                if let Some(guard) = &arm.guard {
                    collect_matched_constructors(guard, out);
                }
                collect_matched_constructors(&arm.body, out);
            }
        }
        ExprKind::Binary { left, right, .. } | ExprKind::Assign { target: left, value: right } => {
            collect_matched_constructors(left, out);
            collect_matched_constructors(right, out);
        }
        ExprKind::Unary { operand: inner, .. }
        | ExprKind::Borrow { expr: inner, .. }
        | ExprKind::Deref(inner) => collect_matched_constructors(inner, out),
    }
}
