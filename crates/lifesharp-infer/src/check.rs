//! Expression checking: lowers the AST of a declaration group to typed HIR.
//!
//! One [`Checker`] owns the unifier of one group. Declarations in the group
//! are pre-bound to monomorphic variables, inferred in order, and
//! generalized together once every constraint is solved.

use lifesharp_ast::{
    ActivePatternDecl, BinOp, Decl, DeclKind, EffectRowAnnotation, Expr, ExprKind, FnDecl, Lit,
    Param, Pattern, PatternKind, Span, Spanned, TypeAnnotation, UnaryOp, validate_identifier,
};
use lifesharp_hir::{
    HirArm, HirBinding, HirDecl, HirExpr, HirExprKind, HirFunction, HirPattern, HirPatternKind,
};
use lifesharp_types::{
    ActivePatternDef, Bound, BorrowKind, EffectRow, Label, NO_MATCH_VARIANT, OwnershipMode,
    Registries, Substitution, Type, TypeScheme, sanitize_type_display,
};
use tracing::trace;

use crate::trace::{InferRule, InferStep, InferenceTrace};
use crate::typeck::{
    AnnotationScope, TypeEnv, canonicalize, generalize, instantiate, resolve_annotation,
    resolve_effect_annotation,
};
use crate::{Category, Diagnostic, DiagnosticError, Provenance, Reason, Unifier, span_to_location};

// ---------------------------------------------------------------------------
// Group checking
// ---------------------------------------------------------------------------

/// Everything produced by checking one declaration group.
#[derive(Debug, Clone)]
pub struct GroupResult {
    /// Typed HIR for each value declaration, in group order.
    pub decls: Vec<HirDecl>,
    /// Generalized scheme per declared name. A failed group binds every
    /// name to the error scheme.
    pub schemes: Vec<(String, TypeScheme)>,
    pub diagnostics: Vec<Diagnostic>,
    pub trace: Option<InferenceTrace>,
}

impl GroupResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Check a group of mutually dependent declarations against `env`.
///
/// Type declarations in `decls` are ignored; they are handled by
/// [`crate::registry::build_registries`].
pub fn check_group(
    decls: &[&Decl],
    env: &TypeEnv,
    registries: &Registries,
    trace_inference: bool,
) -> GroupResult {
    let mut checker = Checker::new(env.clone(), registries);
    if trace_inference {
        checker.unifier.enable_tracing();
    }

    // Recursive references see a monomorphic placeholder.
    checker.env.push_scope();
    let mut pending = Vec::new();
    for &decl in decls {
        let Some(name) = decl.node.value_name() else {
            continue;
        };
        let placeholder = checker.unifier.fresh_type();
        checker
            .env
            .bind(name.node.clone(), TypeScheme::mono(placeholder.clone()));
        pending.push((decl, name, placeholder));
    }

    let mut checked = Vec::new();
    for (decl, name, placeholder) in pending {
        checker.annotations = AnnotationScope::new();
        let (body, effects) = match &decl.node {
            DeclKind::Function(function) => checker.check_function(function),
            DeclKind::ActivePattern(pattern) => checker.check_active_pattern(pattern),
            DeclKind::Type(_) => continue,
        };
        checker.unifier.unify(
            &placeholder,
            &body.ty,
            &Provenance::new(decl.span, Reason::RecursiveUse).related_to(name.span),
        );
        trace!(name = %name.node, "inferred declaration body");
        checked.push((decl, name, body, effects));
    }
    checker.env.pop_scope();
    checker.unifier.finish();

    let diagnostics = checker.unifier.take_errors();
    let failed = diagnostics.iter().any(Diagnostic::is_error);

    let mut schemes = Vec::new();
    for (_, name, body, _) in &checked {
        let scheme = if failed {
            TypeScheme::error()
        } else {
            canonicalize(&generalize(&body.ty, &checker.env, &mut checker.unifier, true))
        };
        checker.record_generalize(name, &scheme);
        schemes.push((name.node.clone(), scheme));
    }

    let subst = &checker.unifier.substitution;
    let mut hir = Vec::new();
    for (decl, name, mut body, effects) in checked {
        zonk_expr(&mut body, subst);
        let function = HirFunction {
            name: name.node.clone(),
            ty: body.ty.clone(),
            effects: subst.apply_row(&effects),
            span: decl.span,
            body,
        };
        hir.push(match &decl.node {
            DeclKind::ActivePattern(pattern) => HirDecl::ActivePattern {
                def: registries
                    .active
                    .get(&pattern.name.node)
                    .cloned()
                    .unwrap_or_else(|| ActivePatternDef {
                        name: pattern.name.node.clone(),
                        cases: Vec::new(),
                        total: pattern.total,
                    }),
                function,
            },
            _ => HirDecl::Function(function),
        });
    }

    let trace = trace_inference.then(|| InferenceTrace {
        declarations: schemes.iter().map(|(name, _)| name.clone()).collect(),
        unify: checker.unifier.take_unify_trace(),
        infer: std::mem::take(&mut checker.steps),
    });

    trace!(
        decls = hir.len(),
        errors = diagnostics.len(),
        "group checked"
    );
    GroupResult {
        decls: hir,
        schemes,
        diagnostics,
        trace,
    }
}

/// Infer a standalone expression against `env`, returning its typed tree
/// and generalized type.
pub fn infer_expression(
    expr: &Expr,
    env: &TypeEnv,
    registries: &Registries,
) -> Result<(HirExpr, TypeScheme), DiagnosticError> {
    let mut checker = Checker::new(env.clone(), registries);
    let mut hir = checker.infer_expr(expr);
    checker.unifier.finish();
    if checker.unifier.has_errors() {
        return Err(DiagnosticError::multiple(checker.unifier.take_errors()));
    }
    let scheme = canonicalize(&generalize(&hir.ty, &checker.env, &mut checker.unifier, true));
    zonk_expr(&mut hir, &checker.unifier.substitution);
    Ok((hir, scheme))
}

// ---------------------------------------------------------------------------
// Checker
// ---------------------------------------------------------------------------

/// Inference state for one declaration group.
pub struct Checker<'r> {
    pub unifier: Unifier,
    env: TypeEnv,
    registries: &'r Registries,
    /// Effects performed by the innermost enclosing function body.
    ctx: EffectRow,
    annotations: AnnotationScope,
    /// The active pattern whose body is being checked.
    active: Option<&'r ActivePatternDef>,
    steps: Vec<InferStep>,
}

impl<'r> Checker<'r> {
    pub fn new(env: TypeEnv, registries: &'r Registries) -> Self {
        let mut unifier = Unifier::new();
        let ctx = unifier.fresh_row();
        Self {
            unifier,
            env,
            registries,
            ctx,
            annotations: AnnotationScope::new(),
            active: None,
            steps: Vec::new(),
        }
    }

    fn check_function(&mut self, decl: &FnDecl) -> (HirExpr, EffectRow) {
        let ret = decl.return_annotation.as_ref().map(|ann| {
            let ty = self.resolve(ann);
            (ty, Provenance::new(decl.body.span, Reason::ReturnType).related_to(ann.span))
        });
        let declared = decl
            .effect_annotation
            .as_ref()
            .map(|row| (row, decl.name.node.as_str()));

        if decl.params.is_empty() {
            let outer = std::mem::replace(&mut self.ctx, self.unifier.fresh_row());
            let body = self.infer_expr(&decl.body);
            if let Some((ty, provenance)) = ret {
                self.unifier.unify(&ty, &body.ty, &provenance);
            }
            let performed = std::mem::replace(&mut self.ctx, outer);
            let effects = self.constrain_declared(performed, declared, decl.body.span);
            return (body, effects);
        }
        self.infer_lambda(&decl.params, &decl.body, decl.span, ret, declared)
    }

    fn check_active_pattern(&mut self, decl: &ActivePatternDecl) -> (HirExpr, EffectRow) {
        let registries = self.registries;
        self.active = registries.active.get(&decl.name.node);
        let result = Type::named(decl.name.node.clone(), Vec::new());
        let ret = Some((
            result,
            Provenance::new(decl.body.span, Reason::ActivePatternResult).related_to(decl.name.span),
        ));
        let checked = self.infer_lambda(
            std::slice::from_ref(&decl.param),
            &decl.body,
            decl.span,
            ret,
            None,
        );
        self.active = None;
        checked
    }

    /// Infer `params -> body` as a chain of unary lambdas.
    ///
    /// Returns the outermost lambda and the effect row of the innermost
    /// arrow (the effects performed once every argument is supplied).
    fn infer_lambda(
        &mut self,
        params: &[Param],
        body: &Expr,
        span: Span,
        ret: Option<(Type, Provenance)>,
        declared: Option<(&EffectRowAnnotation, &str)>,
    ) -> (HirExpr, EffectRow) {
        self.env.push_scope();
        let mut bindings = Vec::new();
        for param in params {
            self.identifier(&param.name);
            let ty = match &param.annotation {
                Some(ann) => self.resolve(ann),
                None => self.unifier.fresh_type(),
            };
            self.env
                .bind(param.name.node.clone(), TypeScheme::mono(ty.clone()));
            bindings.push(HirBinding::new(param.name.node.clone(), ty, param.name.span));
        }
        if bindings.is_empty() {
            bindings.push(HirBinding::new("_", Type::Unit, span));
        }

        let outer = std::mem::replace(&mut self.ctx, self.unifier.fresh_row());
        let body = self.infer_expr(body);
        if let Some((ty, provenance)) = ret {
            self.unifier.unify(&ty, &body.ty, &provenance);
        }
        let performed = std::mem::replace(&mut self.ctx, outer);
        let effects = self.constrain_declared(performed, declared, body.span);
        self.env.pop_scope();

        let mut node = body;
        let mut row = effects.clone();
        for binding in bindings.into_iter().rev() {
            let ty = Type::arrow_with(binding.ty.clone(), node.ty.clone(), row);
            node = HirExpr::new(
                HirExprKind::Lambda {
                    param: binding,
                    body: Box::new(node),
                },
                ty,
                EffectRow::pure(),
                span,
            );
            row = EffectRow::pure();
        }
        (node, effects)
    }

    /// Check the performed row against a declared signature row, if any.
    /// Returns the row the signature exposes.
    fn constrain_declared(
        &mut self,
        performed: EffectRow,
        declared: Option<(&EffectRowAnnotation, &str)>,
        span: Span,
    ) -> EffectRow {
        let Some((annotation, function)) = declared else {
            return performed;
        };
        let declared = resolve_effect_annotation(annotation, &mut self.annotations, &mut self.unifier);
        self.unifier.include(
            &performed,
            &declared,
            &Provenance::new(span, Reason::DeclaredEffects {
                function: function.to_string(),
            })
            .related_to(annotation.span),
        );
        declared
    }

    // -- Expressions ---------------------------------------------------------

    pub fn infer_expr(&mut self, expr: &Expr) -> HirExpr {
        let span = expr.span;
        match &expr.node {
            ExprKind::Lit(lit) => {
                self.check_literal(lit, span);
                let ty = lit_type(lit);
                self.record(InferRule::Literal, expr, &ty, "");
                HirExpr::new(HirExprKind::Lit(lit.clone()), ty, EffectRow::pure(), span)
            }

            ExprKind::Var(name) => self.infer_var(expr, name),

            ExprKind::Call { func, args } => {
                let mut current = self.infer_expr(func);
                if args.is_empty() {
                    let unit = HirExpr::new(HirExprKind::Lit(Lit::Unit), Type::Unit, EffectRow::pure(), span);
                    current = self.apply(current, unit, func.span, span);
                }
                for arg in args {
                    let arg = self.infer_expr(arg);
                    current = self.apply(current, arg, func.span, span);
                }
                self.record(InferRule::Call, expr, &current.ty, format!("{} argument(s)", args.len()));
                current
            }

            ExprKind::Lambda { params, body } => {
                let (hir, _) = self.infer_lambda(params, body, span, None, None);
                self.record(InferRule::Lambda, expr, &hir.ty, "");
                hir
            }

            ExprKind::Let {
                name,
                annotation,
                value,
                body,
            } => {
                self.identifier(name);
                let value_hir = self.infer_expr(value);
                if let Some(ann) = annotation {
                    let declared = self.resolve(ann);
                    self.unifier.unify(
                        &declared,
                        &value_hir.ty,
                        &Provenance::new(value.span, Reason::LetAnnotation).related_to(ann.span),
                    );
                }
                let scheme = if is_syntactic_value(value) {
                    let scheme = generalize(&value_hir.ty, &self.env, &mut self.unifier, false);
                    self.record(InferRule::LetGen, expr, &scheme.ty, name.node.clone());
                    scheme
                } else {
                    TypeScheme::mono(value_hir.ty.clone())
                };
                self.env.push_scope();
                self.env.bind(name.node.clone(), scheme);
                let body_hir = self.infer_expr(body);
                self.env.pop_scope();
                self.record(InferRule::Let, expr, &body_hir.ty, name.node.clone());
                let binding = HirBinding::new(name.node.clone(), value_hir.ty.clone(), name.span);
                let ty = body_hir.ty.clone();
                HirExpr::new(
                    HirExprKind::Let {
                        binding,
                        value: Box::new(value_hir),
                        body: Box::new(body_hir),
                    },
                    ty,
                    EffectRow::pure(),
                    span,
                )
            }

            ExprKind::Seq(items) => {
                let items: Vec<HirExpr> = items.iter().map(|item| self.infer_expr(item)).collect();
                let ty = items.last().map_or(Type::Unit, |last| last.ty.clone());
                HirExpr::new(HirExprKind::Seq(items), ty, EffectRow::pure(), span)
            }

            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.infer_expr(condition);
                self.unifier.unify(
                    &Type::BOOL,
                    &condition.ty,
                    &Provenance::new(condition.span, Reason::Condition),
                );
                let then_branch = self.infer_expr(then_branch);
                let else_branch = self.infer_expr(else_branch);
                self.unifier.unify(
                    &then_branch.ty,
                    &else_branch.ty,
                    &Provenance::new(else_branch.span, Reason::IfBranches)
                        .related_to(then_branch.span),
                );
                let ty = then_branch.ty.clone();
                self.record(InferRule::If, expr, &ty, "");
                HirExpr::new(
                    HirExprKind::If {
                        condition: Box::new(condition),
                        then_branch: Box::new(then_branch),
                        else_branch: Box::new(else_branch),
                    },
                    ty,
                    EffectRow::pure(),
                    span,
                )
            }

            ExprKind::Match { scrutinee, arms } => {
                let scrutinee = self.infer_expr(scrutinee);
                let mut own = EffectRow::pure();
                let mut hir_arms: Vec<HirArm> = Vec::new();
                for arm in arms {
                    self.env.push_scope();
                    let pattern = self.infer_pattern(&arm.pattern, &scrutinee.ty, &mut own);
                    let guard = arm.guard.as_ref().map(|guard| {
                        let guard = self.infer_expr(guard);
                        self.unifier.unify(
                            &Type::BOOL,
                            &guard.ty,
                            &Provenance::new(guard.span, Reason::Condition),
                        );
                        guard
                    });
                    let body = self.infer_expr(&arm.body);
                    self.env.pop_scope();
                    if let Some(first) = hir_arms.first() {
                        self.unifier.unify(
                            &first.body.ty,
                            &body.ty,
                            &Provenance::new(body.span, Reason::MatchArms)
                                .related_to(first.body.span),
                        );
                    }
                    hir_arms.push(HirArm {
                        pattern,
                        guard,
                        body,
                    });
                }
                let ty = match hir_arms.first() {
                    Some(first) => first.body.ty.clone(),
                    None => self.unifier.fresh_type(),
                };
                self.record(InferRule::Match, expr, &ty, format!("{} arm(s)", arms.len()));
                HirExpr::new(
                    HirExprKind::Match {
                        scrutinee: Box::new(scrutinee),
                        arms: hir_arms,
                        decision: None,
                    },
                    ty,
                    own,
                    span,
                )
            }

            ExprKind::Tuple(items) => {
                let items: Vec<HirExpr> = items.iter().map(|item| self.infer_expr(item)).collect();
                let ty = Type::Tuple(items.iter().map(|item| item.ty.clone()).collect());
                self.record(InferRule::Tuple, expr, &ty, "");
                HirExpr::new(HirExprKind::Tuple(items), ty, EffectRow::pure(), span)
            }

            ExprKind::Construct { name, args } => {
                let hir = self.infer_construct(name, args, span);
                self.record(InferRule::Construct, expr, &hir.ty, name.node.clone());
                hir
            }

            ExprKind::Binary { op, left, right } => {
                let left = self.infer_expr(left);
                let right = self.infer_expr(right);
                let symbol = op.node.symbol();
                let ty = match op.node {
                    BinOp::And | BinOp::Or => {
                        for operand in [&left, &right] {
                            self.unifier.unify(
                                &Type::BOOL,
                                &operand.ty,
                                &Provenance::new(operand.span, Reason::BinaryOp(symbol)),
                            );
                        }
                        Type::BOOL
                    }
                    _ => {
                        self.unifier.unify(
                            &left.ty,
                            &right.ty,
                            &Provenance::new(right.span, Reason::BinaryOp(symbol))
                                .related_to(left.span),
                        );
                        match op.node {
                            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                                self.unifier.require_bound(
                                    &left.ty,
                                    Bound::Num,
                                    &Provenance::new(op.span, Reason::BinaryOp(symbol)),
                                );
                                left.ty.clone()
                            }
                            BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => {
                                self.unifier.require_bound(
                                    &left.ty,
                                    Bound::Num,
                                    &Provenance::new(op.span, Reason::BinaryOp(symbol)),
                                );
                                Type::BOOL
                            }
                            _ => Type::BOOL,
                        }
                    }
                };
                self.record(InferRule::BinaryOp, expr, &ty, symbol);
                HirExpr::new(
                    HirExprKind::Binary {
                        op: op.node,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    ty,
                    EffectRow::pure(),
                    span,
                )
            }

            ExprKind::Unary { op, operand } => {
                let operand = self.infer_expr(operand);
                let ty = match op.node {
                    UnaryOp::Neg => {
                        self.unifier.require_bound(
                            &operand.ty,
                            Bound::Num,
                            &Provenance::new(op.span, Reason::UnaryOp("-")),
                        );
                        operand.ty.clone()
                    }
                    UnaryOp::Not => {
                        self.unifier.unify(
                            &Type::BOOL,
                            &operand.ty,
                            &Provenance::new(operand.span, Reason::UnaryOp("not")),
                        );
                        Type::BOOL
                    }
                };
                HirExpr::new(
                    HirExprKind::Unary {
                        op: op.node,
                        operand: Box::new(operand),
                    },
                    ty,
                    EffectRow::pure(),
                    span,
                )
            }

            ExprKind::Borrow { unique, expr: inner } => {
                let inner = self.infer_expr(inner);
                let kind = if *unique {
                    BorrowKind::Unique
                } else {
                    BorrowKind::Shared
                };
                let ty = Type::reference(kind, inner.ty.clone());
                self.record(InferRule::Borrow, expr, &ty, "");
                HirExpr::new(
                    HirExprKind::Borrow {
                        kind,
                        expr: Box::new(inner),
                    },
                    ty,
                    EffectRow::pure(),
                    span,
                )
            }

            ExprKind::Deref(inner) => {
                let inner = self.infer_expr(inner);
                let ty = match self.unifier.substitution.find(&inner.ty) {
                    Type::Ref(_, target) => *target,
                    Type::Error => Type::Error,
                    _ => {
                        let target = self.unifier.fresh_type();
                        self.unifier.unify(
                            &Type::reference(BorrowKind::Shared, target.clone()),
                            &inner.ty,
                            &Provenance::new(inner.span, Reason::Deref),
                        );
                        target
                    }
                };
                HirExpr::new(HirExprKind::Deref(Box::new(inner)), ty, EffectRow::pure(), span)
            }

            ExprKind::Assign { target, value } => {
                if !matches!(target.node, ExprKind::Var(_) | ExprKind::Deref(_)) {
                    self.unifier.push_error(
                        Diagnostic::error(Category::TypeMismatch, "invalid assignment target")
                            .at(span_to_location(target.span))
                            .with_help("assign to a variable or through a `&mut` reference"),
                    );
                }
                let target = self.infer_expr(target);
                let value = self.infer_expr(value);
                self.unifier.unify(
                    &target.ty,
                    &value.ty,
                    &Provenance::new(value.span, Reason::Assign).related_to(target.span),
                );
                let own = EffectRow::single(Label::MUT);
                self.unifier
                    .include(&own, &self.ctx.clone(), &Provenance::new(span, Reason::PerformedEffect));
                self.record(InferRule::Assign, expr, &Type::Unit, "");
                HirExpr::new(
                    HirExprKind::Assign {
                        target: Box::new(target),
                        value: Box::new(value),
                    },
                    Type::Unit,
                    own,
                    span,
                )
            }
        }
    }

    fn infer_var(&mut self, expr: &Expr, name: &str) -> HirExpr {
        if let Some(scheme) = self.env.lookup(name) {
            let polymorphic = !scheme.is_mono();
            let ty = instantiate(scheme, &mut self.unifier, expr.span);
            self.record(
                InferRule::VarLookup,
                expr,
                &ty,
                if polymorphic { "instantiated" } else { "" },
            );
            return HirExpr::new(HirExprKind::Var(name.to_string()), ty, EffectRow::pure(), expr.span);
        }
        // A bare constructor name is a nullary construction.
        if self.registries.types.lookup_constructor(name).is_some() {
            return self.infer_construct(&Spanned::new(name.to_string(), expr.span), &[], expr.span);
        }
        self.unifier.push_error(
            Diagnostic::error(Category::UnboundName, format!("unbound variable `{name}`"))
                .at(span_to_location(expr.span)),
        );
        HirExpr::new(HirExprKind::Error, Type::Error, EffectRow::pure(), expr.span)
    }

    /// Apply `callee` to one argument.
    fn apply(&mut self, callee: HirExpr, arg: HirExpr, func_span: Span, span: Span) -> HirExpr {
        let function = match self.unifier.substitution.find(&callee.ty) {
            Type::Function(ft) => Some(ft),
            Type::Var(_) => {
                let ft = self.unifier.fresh_function();
                self.unifier.unify(
                    &Type::Function(ft.clone()),
                    &callee.ty,
                    &Provenance::new(span, Reason::Application).related_to(func_span),
                );
                Some(ft)
            }
            Type::Error => None,
            other => {
                let expected = Type::Function(self.unifier.fresh_function());
                self.unifier.unify(
                    &expected,
                    &other,
                    &Provenance::new(span, Reason::Application).related_to(func_span),
                );
                None
            }
        };
        let Some(ft) = function else {
            return HirExpr::new(
                HirExprKind::Call {
                    func: Box::new(callee),
                    arg: Box::new(arg),
                },
                Type::Error,
                EffectRow::pure(),
                span,
            );
        };
        self.unifier.unify(
            &ft.param,
            &arg.ty,
            &Provenance::new(arg.span, Reason::FunctionArg).related_to(func_span),
        );
        let ctx = self.ctx.clone();
        self.unifier
            .include(&ft.effects, &ctx, &Provenance::new(span, Reason::PerformedEffect));
        HirExpr::new(
            HirExprKind::Call {
                func: Box::new(callee),
                arg: Box::new(arg),
            },
            *ft.ret,
            ft.effects,
            span,
        )
    }

    fn infer_construct(&mut self, name: &Spanned<String>, args: &[Expr], span: Span) -> HirExpr {
        let args: Vec<HirExpr> = args.iter().map(|arg| self.infer_expr(arg)).collect();
        let error = |args: Vec<HirExpr>| {
            HirExpr::new(HirExprKind::Tuple(args), Type::Error, EffectRow::pure(), span)
        };

        if name.node == NO_MATCH_VARIANT {
            return match self.active {
                Some(def) if !def.total && args.is_empty() => HirExpr::new(
                    HirExprKind::Construct {
                        type_name: def.name.clone(),
                        variant: NO_MATCH_VARIANT.to_string(),
                        args,
                    },
                    Type::named(def.name.clone(), Vec::new()),
                    EffectRow::pure(),
                    span,
                ),
                _ => {
                    self.unifier.push_error(
                        Diagnostic::error(
                            Category::UnboundName,
                            format!(
                                "`{NO_MATCH_VARIANT}` can only be returned by a partial active pattern"
                            ),
                        )
                        .at(span_to_location(name.span)),
                    );
                    error(args)
                }
            };
        }

        let registries = self.registries;
        let Some((def, variant)) = registries.types.lookup_constructor(&name.node) else {
            self.unifier.push_error(
                Diagnostic::error(
                    Category::UnboundName,
                    format!("unknown constructor `{}`", name.node),
                )
                .at(span_to_location(name.span)),
            );
            return error(args);
        };
        if variant.fields.len() != args.len() {
            self.unifier.push_error(arity_mismatch(&name.node, variant.fields.len(), args.len(), span));
            return error(args);
        }

        let type_args: Vec<Type> = def.params.iter().map(|_| self.unifier.fresh_type()).collect();
        let fields = def.instantiate_fields(variant, &type_args);
        for (field, arg) in fields.iter().zip(&args) {
            self.unifier.unify(
                field,
                &arg.ty,
                &Provenance::new(arg.span, Reason::ConstructorField {
                    constructor: name.node.clone(),
                }),
            );
        }
        HirExpr::new(
            HirExprKind::Construct {
                type_name: def.name.clone(),
                variant: variant.name.clone(),
                args,
            },
            Type::named(def.name.clone(), type_args),
            EffectRow::pure(),
            span,
        )
    }

    // -- Patterns ------------------------------------------------------------

    /// Infer `pattern` against the scrutinee type `expected`, binding its
    /// names in the current scope. Effects of active patterns it applies
    /// are added to `own`.
    fn infer_pattern(&mut self, pattern: &Pattern, expected: &Type, own: &mut EffectRow) -> HirPattern {
        let span = pattern.span;
        let kind = match &pattern.node {
            PatternKind::Wildcard => HirPatternKind::Wildcard,
            PatternKind::Var(name) => {
                let capitalized = name.chars().next().is_some_and(char::is_uppercase);
                match capitalized.then(|| self.lookup_case(name, expected, span, own)).flatten() {
                    Some(target) if target.fields().is_empty() => target.into_kind(name, Vec::new()),
                    Some(target) => {
                        self.unifier
                            .push_error(arity_mismatch(name, target.fields().len(), 0, span));
                        HirPatternKind::Wildcard
                    }
                    None => {
                        self.identifier(&Spanned::new(name.clone(), span));
                        self.env.bind(name.clone(), TypeScheme::mono(expected.clone()));
                        HirPatternKind::binding(name.clone())
                    }
                }
            }
            PatternKind::Lit(lit) => {
                self.check_literal(lit, span);
                self.unifier.unify(
                    expected,
                    &lit_type(lit),
                    &Provenance::new(span, Reason::PatternMatch),
                );
                HirPatternKind::Lit(lit.clone())
            }
            PatternKind::Tuple(items) => {
                let item_types: Vec<Type> = items.iter().map(|_| self.unifier.fresh_type()).collect();
                self.unifier.unify(
                    expected,
                    &Type::Tuple(item_types.clone()),
                    &Provenance::new(span, Reason::PatternMatch),
                );
                HirPatternKind::Tuple(
                    items
                        .iter()
                        .zip(&item_types)
                        .map(|(item, ty)| self.infer_pattern(item, ty, own))
                        .collect(),
                )
            }
            PatternKind::Constructor { name, args } => {
                match self.lookup_case(name, expected, span, own) {
                    Some(target) if target.fields().len() == args.len() => {
                        let fields = target.fields().to_vec();
                        let args: Vec<HirPattern> = args
                            .iter()
                            .zip(&fields)
                            .map(|(arg, ty)| self.infer_pattern(arg, ty, own))
                            .collect();
                        target.into_kind(name, args)
                    }
                    found => {
                        match &found {
                            Some(target) => self.unifier.push_error(arity_mismatch(
                                name,
                                target.fields().len(),
                                args.len(),
                                span,
                            )),
                            None => self.unifier.push_error(
                                Diagnostic::error(
                                    Category::UnboundName,
                                    format!("unknown constructor or active pattern case `{name}`"),
                                )
                                .at(span_to_location(span)),
                            ),
                        }
                        // Still bind the names so the arm body checks.
                        for arg in args {
                            let ty = self.unifier.fresh_type();
                            self.infer_pattern(arg, &ty, own);
                        }
                        HirPatternKind::Wildcard
                    }
                }
            }
        };
        HirPattern {
            kind,
            ty: expected.clone(),
            span,
        }
    }

    /// Integer literals are `s32` and must fit it.
    fn check_literal(&mut self, lit: &Lit, span: Span) {
        if let Lit::Int(n) = lit
            && i32::try_from(*n).is_err()
        {
            self.unifier.push_error(
                Diagnostic::error(
                    Category::TypeMismatch,
                    format!("integer literal `{n}` is out of range for `s32`"),
                )
                .at(span_to_location(span))
                .with_help(format!("`s32` holds values from {} to {}", i32::MIN, i32::MAX)),
            );
        }
    }

    /// Resolve a constructor name used in a pattern.
    ///
    /// Tried in order: a variant of the scrutinee's known algebraic type, a
    /// case of a registered active pattern, any declared constructor.
    fn lookup_case(
        &mut self,
        name: &str,
        expected: &Type,
        span: Span,
        own: &mut EffectRow,
    ) -> Option<CaseTarget> {
        let registries = self.registries;

        if let Type::Named { name: type_name, args } = self.unifier.substitution.apply(expected)
            && let Some(def) = registries.types.get(&type_name)
            && let Some(variant) = def.variant(name)
        {
            return Some(CaseTarget::Variant {
                type_name,
                fields: def.instantiate_fields(variant, &args),
            });
        }

        if let Some(def) = registries.active.lookup_case(name) {
            let function = match self.env.lookup(&def.name) {
                Some(scheme) => instantiate(scheme, &mut self.unifier, span),
                None => Type::Error,
            };
            let ft = self.unifier.fresh_function();
            self.unifier.unify(
                &Type::Function(ft.clone()),
                &function,
                &Provenance::new(span, Reason::Application),
            );
            self.unifier.unify(
                &ft.param,
                expected,
                &Provenance::new(span, Reason::PatternMatch),
            );
            self.unifier.unify(
                &Type::named(def.name.clone(), Vec::new()),
                &ft.ret,
                &Provenance::new(span, Reason::ActivePatternResult),
            );
            let ctx = self.ctx.clone();
            self.unifier
                .include(&ft.effects, &ctx, &Provenance::new(span, Reason::PerformedEffect));
            *own = union_rows(own, &ft.effects);
            let fields = registries
                .types
                .get(&def.name)
                .and_then(|result| result.variant(name))
                .map(|variant| variant.fields.clone())
                .unwrap_or_default();
            return Some(CaseTarget::Active {
                pattern: def.name.clone(),
                fields,
            });
        }

        let (def, variant) = registries.types.lookup_constructor(name)?;
        let type_args: Vec<Type> = def.params.iter().map(|_| self.unifier.fresh_type()).collect();
        self.unifier.unify(
            expected,
            &Type::named(def.name.clone(), type_args.clone()),
            &Provenance::new(span, Reason::PatternMatch),
        );
        Some(CaseTarget::Variant {
            type_name: def.name.clone(),
            fields: def.instantiate_fields(variant, &type_args),
        })
    }

    // -- Helpers -------------------------------------------------------------

    fn resolve(&mut self, annotation: &Spanned<TypeAnnotation>) -> Type {
        resolve_annotation(
            annotation,
            &self.registries.types,
            &mut self.annotations,
            &mut self.unifier,
        )
    }

    fn identifier(&mut self, name: &Spanned<String>) {
        if name.node == "_" {
            return;
        }
        if let Err(err) = validate_identifier(&name.node) {
            self.unifier.push_error(
                Diagnostic::error(
                    Category::InvalidIdentifier,
                    format!("invalid identifier `{}`: {err}", name.node),
                )
                .at(span_to_location(name.span)),
            );
        }
    }

    fn record(&mut self, rule: InferRule, expr: &Expr, ty: &Type, detail: impl Into<String>) {
        if !self.unifier.is_tracing() {
            return;
        }
        let ty = self.unifier.substitution.apply(ty);
        self.steps.push(InferStep {
            expr: describe(&expr.node),
            ty: sanitize_type_display(&ty),
            rule,
            detail: detail.into(),
            span: Some((expr.span.start, expr.span.end)),
        });
    }

    fn record_generalize(&mut self, name: &Spanned<String>, scheme: &TypeScheme) {
        if !self.unifier.is_tracing() {
            return;
        }
        self.steps.push(InferStep {
            expr: name.node.clone(),
            ty: scheme.to_string(),
            rule: InferRule::Generalize,
            detail: format!(
                "{} type variable(s), {} row variable(s)",
                scheme.type_vars.len(),
                scheme.row_vars.len()
            ),
            span: Some((name.span.start, name.span.end)),
        });
    }
}

/// What a constructor name in a pattern resolved to.
enum CaseTarget {
    Variant { type_name: String, fields: Vec<Type> },
    Active { pattern: String, fields: Vec<Type> },
}

impl CaseTarget {
    fn fields(&self) -> &[Type] {
        match self {
            CaseTarget::Variant { fields, .. } | CaseTarget::Active { fields, .. } => fields,
        }
    }

    fn into_kind(self, name: &str, args: Vec<HirPattern>) -> HirPatternKind {
        match self {
            CaseTarget::Variant { type_name, .. } => HirPatternKind::Variant {
                type_name,
                variant: name.to_string(),
                args,
            },
            CaseTarget::Active { pattern, .. } => HirPatternKind::Active {
                pattern,
                case: name.to_string(),
                args,
            },
        }
    }
}

fn lit_type(lit: &Lit) -> Type {
    match lit {
        Lit::Int(_) => Type::S32,
        Lit::Float(_) => Type::F64,
        Lit::Bool(_) => Type::BOOL,
        Lit::String(_) => Type::String,
        Lit::Unit => Type::Unit,
    }
}

/// Values whose `let` may be generalized.
fn is_syntactic_value(expr: &Expr) -> bool {
    matches!(
        expr.node,
        ExprKind::Lambda { .. } | ExprKind::Var(_) | ExprKind::Lit(_)
    )
}

fn arity_mismatch(name: &str, expected: usize, got: usize, span: Span) -> Diagnostic {
    Diagnostic::error(
        Category::TypeMismatch,
        format!("`{name}` expects {expected} field(s), got {got}"),
    )
    .at(span_to_location(span))
}

fn describe(expr: &ExprKind) -> String {
    match expr {
        ExprKind::Lit(Lit::Int(n)) => n.to_string(),
        ExprKind::Lit(Lit::Float(x)) => x.to_string(),
        ExprKind::Lit(Lit::Bool(b)) => b.to_string(),
        ExprKind::Lit(Lit::String(s)) => format!("{s:?}"),
        ExprKind::Lit(Lit::Unit) => "()".into(),
        ExprKind::Var(name) => name.clone(),
        ExprKind::Call { func, .. } => format!("{} ...", describe(&func.node)),
        ExprKind::Lambda { .. } => "fun".into(),
        ExprKind::Let { name, .. } => format!("let {}", name.node),
        ExprKind::Seq(_) => "seq".into(),
        ExprKind::If { .. } => "if".into(),
        ExprKind::Match { .. } => "match".into(),
        ExprKind::Tuple(_) => "tuple".into(),
        ExprKind::Construct { name, .. } => name.node.clone(),
        ExprKind::Binary { op, .. } => op.node.symbol().into(),
        ExprKind::Unary { .. } => "unary".into(),
        ExprKind::Borrow { unique: true, .. } => "&mut".into(),
        ExprKind::Borrow { unique: false, .. } => "&".into(),
        ExprKind::Deref(_) => "*".into(),
        ExprKind::Assign { .. } => ":=".into(),
    }
}

/// Labels of both rows; the first open tail is kept.
fn union_rows(a: &EffectRow, b: &EffectRow) -> EffectRow {
    EffectRow {
        labels: a.labels.union(&b.labels).cloned().collect(),
        tail: a.tail.or(b.tail),
    }
}

// ---------------------------------------------------------------------------
// Zonking
// ---------------------------------------------------------------------------

/// Replace every solved variable in `expr` and compute each node's full
/// effect row: its own effects plus those of its children. A lambda
/// performs nothing when evaluated, so its body's effects stay inside it.
pub fn zonk_expr(expr: &mut HirExpr, subst: &Substitution) {
    expr.ty = subst.apply(&expr.ty);
    let mut effects = subst.apply_row(&expr.effects);

    match &mut expr.kind {
        HirExprKind::Lambda { param, .. } | HirExprKind::Let { binding: param, .. } => {
            zonk_binding(param, subst);
        }
        HirExprKind::Match { arms, .. } => {
            for arm in arms {
                zonk_pattern(&mut arm.pattern, subst);
            }
        }
        _ => {}
    }

    let is_lambda = matches!(expr.kind, HirExprKind::Lambda { .. });
    expr.for_each_child_mut(|child| {
        zonk_expr(child, subst);
        if !is_lambda {
            effects = union_rows(&effects, &child.effects);
        }
    });
    expr.effects = effects;
}

fn zonk_binding(binding: &mut HirBinding, subst: &Substitution) {
    binding.ty = subst.apply(&binding.ty);
    binding.ownership = Some(OwnershipMode::of_type(&binding.ty));
}

fn zonk_pattern(pattern: &mut HirPattern, subst: &Substitution) {
    pattern.ty = subst.apply(&pattern.ty);
    match &mut pattern.kind {
        HirPatternKind::Tuple(items)
        | HirPatternKind::Variant { args: items, .. }
        | HirPatternKind::Active { args: items, .. } => {
            for item in items {
                zonk_pattern(item, subst);
            }
        }
        HirPatternKind::Binding { ownership, .. } => {
            *ownership = Some(OwnershipMode::of_type(&pattern.ty));
        }
        HirPatternKind::Wildcard | HirPatternKind::Lit(_) => {}
    }
}
