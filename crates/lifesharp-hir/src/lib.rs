//! Checked LifeSharp declarations, ready for a code generator.
//!
//! Calls and lambdas are unary. Every node records its type and the effect
//! row of evaluating it. The ownership checker marks each node and binding
//! with its [`OwnershipMode`] and how its value is passed (copy, move or
//! reference). The pattern compiler attaches a [`DecisionTree`] to every
//! match, with active-pattern cases resolved to the pattern that classifies
//! them.

mod decision;

use lifesharp_ast::{BinOp, Lit, Span, UnaryOp};
use lifesharp_types::{
    ActivePatternDef, BorrowKind, EffectRow, OwnershipMode, SumTypeDef, Type,
};
use serde::Serialize;

pub use decision::{Constructor, DecisionTree, LitKey, Occurrence, Witness};

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum HirDecl {
    Function(HirFunction),
    /// An active pattern's classification function plus its registry entry.
    ActivePattern {
        function: HirFunction,
        def: ActivePatternDef,
    },
    Type(SumTypeDef),
}

impl HirDecl {
    pub fn name(&self) -> &str {
        match self {
            HirDecl::Function(function) | HirDecl::ActivePattern { function, .. } => {
                &function.name
            }
            HirDecl::Type(def) => &def.name,
        }
    }

    pub fn function(&self) -> Option<&HirFunction> {
        match self {
            HirDecl::Function(function) | HirDecl::ActivePattern { function, .. } => {
                Some(function)
            }
            HirDecl::Type(_) => None,
        }
    }

    pub fn function_mut(&mut self) -> Option<&mut HirFunction> {
        match self {
            HirDecl::Function(function) | HirDecl::ActivePattern { function, .. } => {
                Some(function)
            }
            HirDecl::Type(_) => None,
        }
    }
}

/// A checked top-level function or value.
///
/// `body` is the fully curried lambda chain; `ty` is the monomorphic type
/// of the body before generalization.
#[derive(Debug, Clone, PartialEq)]
pub struct HirFunction {
    pub name: String,
    pub body: HirExpr,
    pub ty: Type,
    pub effects: EffectRow,
    pub span: Span,
}

// ---------------------------------------------------------------------------
// Ownership annotations
// ---------------------------------------------------------------------------

/// How a code generator should pass a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassMode {
    Copy,
    Move,
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnershipAnnotation {
    pub mode: OwnershipMode,
    pub pass: PassMode,
}

/// A name introduced by a lambda parameter or a `let`.
#[derive(Debug, Clone, PartialEq)]
pub struct HirBinding {
    pub name: String,
    pub ty: Type,
    pub span: Span,
    pub ownership: Option<OwnershipMode>,
}

impl HirBinding {
    pub fn new(name: impl Into<String>, ty: Type, span: Span) -> Self {
        Self {
            name: name.into(),
            ty,
            span,
            ownership: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct HirExpr {
    pub kind: HirExprKind,
    pub ty: Type,
    /// Effects performed by evaluating this node (not by calling its value).
    pub effects: EffectRow,
    pub span: Span,
    pub ownership: Option<OwnershipAnnotation>,
}

impl HirExpr {
    pub fn new(kind: HirExprKind, ty: Type, effects: EffectRow, span: Span) -> Self {
        Self {
            kind,
            ty,
            effects,
            span,
            ownership: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HirExprKind {
    Lit(Lit),
    Var(String),
    /// Unary application.
    Call {
        func: Box<HirExpr>,
        arg: Box<HirExpr>,
    },
    /// Unary lambda.
    Lambda {
        param: HirBinding,
        body: Box<HirExpr>,
    },
    Let {
        binding: HirBinding,
        value: Box<HirExpr>,
        body: Box<HirExpr>,
    },
    Seq(Vec<HirExpr>),
    If {
        condition: Box<HirExpr>,
        then_branch: Box<HirExpr>,
        else_branch: Box<HirExpr>,
    },
    Match {
        scrutinee: Box<HirExpr>,
        arms: Vec<HirArm>,
        decision: Option<DecisionTree>,
    },
    Tuple(Vec<HirExpr>),
    Construct {
        type_name: String,
        variant: String,
        args: Vec<HirExpr>,
    },
    Binary {
        op: BinOp,
        left: Box<HirExpr>,
        right: Box<HirExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<HirExpr>,
    },
    Borrow {
        kind: BorrowKind,
        expr: Box<HirExpr>,
    },
    Deref(Box<HirExpr>),
    Assign {
        target: Box<HirExpr>,
        value: Box<HirExpr>,
    },
    /// Placeholder for a subtree whose checking failed.
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirArm {
    pub pattern: HirPattern,
    pub guard: Option<HirExpr>,
    pub body: HirExpr,
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct HirPattern {
    pub kind: HirPatternKind,
    pub ty: Type,
    pub span: Span,
}

/// A pattern with every constructor name resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum HirPatternKind {
    Wildcard,
    /// A name bound to the matched value. `ownership` is filled in once
    /// the value's type is known.
    Binding {
        name: String,
        ownership: Option<OwnershipMode>,
    },
    Lit(Lit),
    Tuple(Vec<HirPattern>),
    /// A variant of a declared algebraic type.
    Variant {
        type_name: String,
        variant: String,
        args: Vec<HirPattern>,
    },
    /// A case of an active pattern. `args` match the case's fields.
    Active {
        pattern: String,
        case: String,
        args: Vec<HirPattern>,
    },
}

impl HirPatternKind {
    pub fn binding(name: impl Into<String>) -> Self {
        HirPatternKind::Binding {
            name: name.into(),
            ownership: None,
        }
    }
}

impl HirPattern {
    /// Names bound by this pattern, left to right, with their types.
    pub fn bindings(&self) -> Vec<(&str, &Type, Span)> {
        let mut out = Vec::new();
        self.collect_bindings(&mut out);
        out
    }

    fn collect_bindings<'a>(&'a self, out: &mut Vec<(&'a str, &'a Type, Span)>) {
        match &self.kind {
            HirPatternKind::Wildcard | HirPatternKind::Lit(_) => {}
            HirPatternKind::Binding { name, .. } => out.push((name.as_str(), &self.ty, self.span)),
            HirPatternKind::Tuple(items)
            | HirPatternKind::Variant { args: items, .. }
            | HirPatternKind::Active { args: items, .. } => {
                for item in items {
                    item.collect_bindings(out);
                }
            }
        }
    }

    pub fn is_irrefutable(&self) -> bool {
        match &self.kind {
            HirPatternKind::Wildcard | HirPatternKind::Binding { .. } => true,
            HirPatternKind::Tuple(items) => items.iter().all(HirPattern::is_irrefutable),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

impl HirExpr {
    /// Visit this node and every descendant expression, parents first.
    ///
    /// Match guards and arm bodies are visited; patterns are not expressions.
    pub fn walk(&self, f: &mut impl FnMut(&HirExpr)) {
        f(self);
        self.for_each_child(|child| child.walk(f));
    }

    /// Mutable variant of [`HirExpr::walk`]. The callback runs before children.
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut HirExpr)) {
        f(self);
        self.for_each_child_mut(|child| child.walk_mut(f));
    }

    pub fn for_each_child<'a>(&'a self, mut f: impl FnMut(&'a HirExpr)) {
        match &self.kind {
            HirExprKind::Lit(_) | HirExprKind::Var(_) | HirExprKind::Error => {}
            HirExprKind::Call { func, arg } => {
                f(func);
                f(arg);
            }
            HirExprKind::Lambda { body, .. } => f(body),
            HirExprKind::Let { value, body, .. } => {
                f(value);
                f(body);
            }
            HirExprKind::Seq(items) | HirExprKind::Tuple(items) => items.iter().for_each(f),
            HirExprKind::Construct { args, .. } => args.iter().for_each(f),
            HirExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                f(condition);
                f(then_branch);
                f(else_branch);
            }
            HirExprKind::Match {
                scrutinee, arms, ..
            } => {
                f(scrutinee);
                for arm in arms {
                    if let Some(guard) = &arm.guard {
                        f(guard);
                    }
                    f(&arm.body);
                }
            }
            HirExprKind::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            HirExprKind::Unary { operand, .. } => f(operand),
            HirExprKind::Borrow { expr, .. } | HirExprKind::Deref(expr) => f(expr),
            HirExprKind::Assign { target, value } => {
                f(target);
                f(value);
            }
        }
    }

    pub fn for_each_child_mut(&mut self, mut f: impl FnMut(&mut HirExpr)) {
        match &mut self.kind {
            HirExprKind::Lit(_) | HirExprKind::Var(_) | HirExprKind::Error => {}
            HirExprKind::Call { func, arg } => {
                f(func);
                f(arg);
            }
            HirExprKind::Lambda { body, .. } => f(body),
            HirExprKind::Let { value, body, .. } => {
                f(value);
                f(body);
            }
            HirExprKind::Seq(items) | HirExprKind::Tuple(items) => items.iter_mut().for_each(f),
            HirExprKind::Construct { args, .. } => args.iter_mut().for_each(f),
            HirExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                f(condition);
                f(then_branch);
                f(else_branch);
            }
            HirExprKind::Match {
                scrutinee, arms, ..
            } => {
                f(scrutinee);
                for arm in arms {
                    if let Some(guard) = &mut arm.guard {
                        f(guard);
                    }
                    f(&mut arm.body);
                }
            }
            HirExprKind::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            HirExprKind::Unary { operand, .. } => f(operand),
            HirExprKind::Borrow { expr, .. } | HirExprKind::Deref(expr) => f(expr),
            HirExprKind::Assign { target, value } => {
                f(target);
                f(value);
            }
        }
    }

    /// Decision trees attached to matches in this subtree, in pre-order.
    pub fn decision_trees(&self) -> Vec<&DecisionTree> {
        let mut out = Vec::new();
        self.collect_decisions(&mut out);
        out
    }

    fn collect_decisions<'a>(&'a self, out: &mut Vec<&'a DecisionTree>) {
        if let HirExprKind::Match {
            decision: Some(tree),
            ..
        } = &self.kind
        {
            out.push(tree);
        }
        self.for_each_child(|child| child.collect_decisions(out));
    }
}
