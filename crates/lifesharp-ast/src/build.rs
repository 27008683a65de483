//! Convenience constructors for hand-built trees.
//!
//! Every node gets the span `0..0` in file 0 unless re-spanned with [`at`].
//! Tests and embedders without a parser use these to assemble modules.

use crate::*;

pub fn s() -> Span {
    Span::new(FileId(0), 0, 0)
}

pub fn sp<T>(node: T) -> Spanned<T> {
    Spanned::new(node, s())
}

/// Re-span a node to `start..end` in file 0.
pub fn at<T>(mut node: Spanned<T>, start: u32, end: u32) -> Spanned<T> {
    node.span = Span::new(FileId(0), start, end);
    node
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

pub fn int(n: i64) -> Expr {
    sp(ExprKind::Lit(Lit::Int(n)))
}

pub fn float(n: f64) -> Expr {
    sp(ExprKind::Lit(Lit::Float(n)))
}

pub fn boolean(b: bool) -> Expr {
    sp(ExprKind::Lit(Lit::Bool(b)))
}

pub fn string(text: &str) -> Expr {
    sp(ExprKind::Lit(Lit::String(text.to_string())))
}

pub fn unit() -> Expr {
    sp(ExprKind::Lit(Lit::Unit))
}

pub fn var(name: &str) -> Expr {
    sp(ExprKind::Var(name.to_string()))
}

pub fn call(func: Expr, args: Vec<Expr>) -> Expr {
    sp(ExprKind::Call {
        func: Box::new(func),
        args,
    })
}

pub fn param(name: &str) -> Param {
    Param {
        name: sp(name.to_string()),
        annotation: None,
    }
}

pub fn param_typed(name: &str, annotation: TypeAnnotation) -> Param {
    Param {
        name: sp(name.to_string()),
        annotation: Some(sp(annotation)),
    }
}

pub fn lambda(params: &[&str], body: Expr) -> Expr {
    sp(ExprKind::Lambda {
        params: params.iter().map(|p| param(p)).collect(),
        body: Box::new(body),
    })
}

pub fn let_in(name: &str, value: Expr, body: Expr) -> Expr {
    sp(ExprKind::Let {
        name: sp(name.to_string()),
        annotation: None,
        value: Box::new(value),
        body: Box::new(body),
    })
}

pub fn let_typed(name: &str, annotation: TypeAnnotation, value: Expr, body: Expr) -> Expr {
    sp(ExprKind::Let {
        name: sp(name.to_string()),
        annotation: Some(sp(annotation)),
        value: Box::new(value),
        body: Box::new(body),
    })
}

pub fn seq(exprs: Vec<Expr>) -> Expr {
    sp(ExprKind::Seq(exprs))
}

pub fn if_else(condition: Expr, then_branch: Expr, else_branch: Expr) -> Expr {
    sp(ExprKind::If {
        condition: Box::new(condition),
        then_branch: Box::new(then_branch),
        else_branch: Box::new(else_branch),
    })
}

pub fn match_expr(scrutinee: Expr, arms: Vec<MatchArm>) -> Expr {
    sp(ExprKind::Match {
        scrutinee: Box::new(scrutinee),
        arms,
    })
}

pub fn arm(pattern: Pattern, body: Expr) -> MatchArm {
    MatchArm {
        pattern,
        guard: None,
        body,
    }
}

pub fn arm_guarded(pattern: Pattern, guard: Expr, body: Expr) -> MatchArm {
    MatchArm {
        pattern,
        guard: Some(guard),
        body,
    }
}

pub fn tuple(items: Vec<Expr>) -> Expr {
    sp(ExprKind::Tuple(items))
}

pub fn construct(name: &str, args: Vec<Expr>) -> Expr {
    sp(ExprKind::Construct {
        name: sp(name.to_string()),
        args,
    })
}

pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    sp(ExprKind::Binary {
        op: sp(op),
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    sp(ExprKind::Unary {
        op: sp(op),
        operand: Box::new(operand),
    })
}

pub fn borrow(expr: Expr) -> Expr {
    sp(ExprKind::Borrow {
        unique: false,
        expr: Box::new(expr),
    })
}

pub fn borrow_mut(expr: Expr) -> Expr {
    sp(ExprKind::Borrow {
        unique: true,
        expr: Box::new(expr),
    })
}

pub fn deref(expr: Expr) -> Expr {
    sp(ExprKind::Deref(Box::new(expr)))
}

pub fn assign(target: Expr, value: Expr) -> Expr {
    sp(ExprKind::Assign {
        target: Box::new(target),
        value: Box::new(value),
    })
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

pub fn pwild() -> Pattern {
    sp(PatternKind::Wildcard)
}

pub fn pvar(name: &str) -> Pattern {
    sp(PatternKind::Var(name.to_string()))
}

pub fn pint(n: i64) -> Pattern {
    sp(PatternKind::Lit(Lit::Int(n)))
}

pub fn pbool(b: bool) -> Pattern {
    sp(PatternKind::Lit(Lit::Bool(b)))
}

pub fn ptuple(items: Vec<Pattern>) -> Pattern {
    sp(PatternKind::Tuple(items))
}

pub fn pctor(name: &str, args: Vec<Pattern>) -> Pattern {
    sp(PatternKind::Constructor {
        name: name.to_string(),
        args,
    })
}

// ---------------------------------------------------------------------------
// Type annotations
// ---------------------------------------------------------------------------

pub fn tname(name: &str) -> TypeAnnotation {
    TypeAnnotation::Named(name.to_string(), Vec::new())
}

pub fn tapp(name: &str, args: Vec<TypeAnnotation>) -> TypeAnnotation {
    TypeAnnotation::Named(name.to_string(), args.into_iter().map(sp).collect())
}

pub fn tvar(name: &str) -> TypeAnnotation {
    TypeAnnotation::Var(name.to_string())
}

pub fn tref(unique: bool, inner: TypeAnnotation) -> TypeAnnotation {
    TypeAnnotation::Ref {
        unique,
        inner: Box::new(sp(inner)),
    }
}

pub fn tfun(param: TypeAnnotation, ret: TypeAnnotation) -> TypeAnnotation {
    TypeAnnotation::Function {
        param: Box::new(sp(param)),
        ret: Box::new(sp(ret)),
        effects: None,
    }
}

pub fn tfun_eff(param: TypeAnnotation, ret: TypeAnnotation, effects: EffectRowAnnotation) -> TypeAnnotation {
    TypeAnnotation::Function {
        param: Box::new(sp(param)),
        ret: Box::new(sp(ret)),
        effects: Some(effects),
    }
}

pub fn effects(labels: &[&str], tail: Option<&str>) -> EffectRowAnnotation {
    EffectRowAnnotation {
        labels: labels.iter().map(|l| sp(l.to_string())).collect(),
        tail: tail.map(|t| sp(t.to_string())),
        span: s(),
    }
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

pub fn fn_decl(name: &str, params: &[&str], body: Expr) -> FnDecl {
    FnDecl {
        name: sp(name.to_string()),
        params: params.iter().map(|p| param(p)).collect(),
        return_annotation: None,
        effect_annotation: None,
        body,
        span: s(),
    }
}

pub fn function(name: &str, params: &[&str], body: Expr) -> Decl {
    sp(DeclKind::Function(fn_decl(name, params, body)))
}

pub fn variant(name: &str, fields: Vec<TypeAnnotation>) -> TypeVariant {
    TypeVariant {
        name: sp(name.to_string()),
        fields: fields.into_iter().map(sp).collect(),
    }
}

pub fn type_def(name: &str, params: &[&str], variants: Vec<TypeVariant>) -> Decl {
    sp(DeclKind::Type(TypeDef {
        name: sp(name.to_string()),
        params: params.iter().map(|p| sp(p.to_string())).collect(),
        variants,
        span: s(),
    }))
}

pub fn active_pattern(
    name: &str,
    cases: Vec<TypeVariant>,
    total: bool,
    param: Param,
    body: Expr,
) -> Decl {
    sp(DeclKind::ActivePattern(ActivePatternDecl {
        name: sp(name.to_string()),
        cases,
        total,
        param,
        body,
        span: s(),
    }))
}

pub fn module(declarations: Vec<Decl>) -> Module {
    Module {
        declarations,
        span: s(),
    }
}
