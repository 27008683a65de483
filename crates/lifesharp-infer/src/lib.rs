//! HM type and effect inference for LifeSharp.
//!
//! This crate implements:
//! - Constraint-based Hindley-Milner type inference over curried arrows
//! - Effect-row unification and inclusion with open tails
//! - Let-generalization with `Num` bounds and effect-row closing
//! - Lowering of checked expressions to the typed HIR
//!
//! Constraints carry provenance so that when unification fails the error
//! points at both conflicting positions.

pub mod check;
pub mod registry;
pub mod trace;
pub mod typeck;

use std::collections::{BTreeMap, BTreeSet};

use lifesharp_ast::Span;
use lifesharp_types::{
    Bound, EffectRow, FunctionType, Label, RowVarId, Substitution, Type, TypeVarId,
    sanitize_type_display, sanitize_type_pair_display,
};

use crate::trace::{UnifyAction, UnifyStep};

// Re-export for convenience.
pub use lifesharp_diag::{Category, Diagnostic, DiagnosticError, SourceLocation};
pub use lifesharp_types::TypeScheme;

// ---------------------------------------------------------------------------
// Provenance: why a constraint exists
// ---------------------------------------------------------------------------

/// Tracks the origin of a constraint for error reporting.
///
/// `span` is where the constraint was generated; `related` is the other
/// position involved (the function being applied, the first branch, the
/// annotation), when there is one.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub span: Span,
    pub related: Option<Span>,
    pub reason: Reason,
}

impl Provenance {
    pub fn new(span: Span, reason: Reason) -> Self {
        Self {
            span,
            related: None,
            reason,
        }
    }

    pub fn related_to(mut self, span: Span) -> Self {
        self.related = Some(span);
        self
    }
}

/// Why a constraint was generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// Argument must match the parameter of the function applied to it.
    FunctionArg,
    /// The applied expression must be a function.
    Application,
    /// Parameter matches its annotation.
    ParamAnnotation,
    /// Body matches the declared return type.
    ReturnType,
    /// Let binding: value type matches annotation.
    LetAnnotation,
    /// Conditions and guards must be `bool`.
    Condition,
    /// If branches must have the same type.
    IfBranches,
    /// Match arms must have the same type.
    MatchArms,
    /// Pattern must match the scrutinee type.
    PatternMatch,
    /// Operands of a binary operator.
    BinaryOp(&'static str),
    /// Operand of a unary operator.
    UnaryOp(&'static str),
    /// Constructor argument must match the variant's field.
    ConstructorField { constructor: String },
    /// Only references can be dereferenced.
    Deref,
    /// Assigned value must match the target.
    Assign,
    /// A declaration's uses must agree with its definition.
    RecursiveUse,
    /// Active pattern bodies return one of their cases.
    ActivePatternResult,
    /// Effects performed here are performed by the enclosing function.
    PerformedEffect,
    /// A function performs only what its signature declares.
    DeclaredEffects { function: String },
}

impl Reason {
    fn help(&self) -> Option<String> {
        match self {
            Reason::FunctionArg => Some("check the argument against the function's parameter type".into()),
            Reason::Application => Some(
                "this expression is applied to more arguments than its type accepts".into(),
            ),
            Reason::IfBranches => Some("both branches of an `if` must have the same type".into()),
            Reason::MatchArms => Some("every match arm must produce the same type".into()),
            Reason::BinaryOp(op) => Some(format!("both operands of `{op}` must have the same type")),
            Reason::DeclaredEffects { function } => Some(format!(
                "add the missing effects to the signature of `{function}`"
            )),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Type constraints
// ---------------------------------------------------------------------------

/// A constraint generated during type inference.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Two types must be equal.
    TypeEqual {
        expected: Type,
        actual: Type,
        provenance: Provenance,
    },
    /// Every effect in `row` must be in `within`.
    EffectInclude {
        row: EffectRow,
        within: EffectRow,
        provenance: Provenance,
    },
    /// A type must satisfy a bound.
    Bound {
        ty: Type,
        bound: Bound,
        provenance: Provenance,
    },
}

/// Constraints deferred to the end of an inference pass.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Constraint> {
        std::mem::take(&mut self.constraints)
    }
}

// ---------------------------------------------------------------------------
// Unifier: solves constraints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum UnifyFailure {
    Mismatch,
    Occurs(TypeVarId, Type),
    MissingEffects(BTreeSet<Label>),
}

/// Solves type and effect constraints via unification.
///
/// Owns the substitution of exactly one inference pass. Type equality is
/// solved eagerly; effect inclusions propagate labels eagerly and leave
/// their open tails to [`Unifier::finish`].
#[derive(Debug, Clone, Default)]
pub struct Unifier {
    pub substitution: Substitution,
    /// `Num` and friends on unresolved variables.
    bounds: BTreeMap<TypeVarId, BTreeSet<Bound>>,
    bound_spans: BTreeMap<TypeVarId, Span>,
    /// Inclusions whose subset row still has an unbound tail.
    pending: ConstraintSet,
    errors: Vec<Diagnostic>,
    /// When true, unification steps are recorded for observability tools.
    tracing: bool,
    unify_trace: Vec<UnifyStep>,
}

impl Unifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_type_var(&mut self) -> TypeVarId {
        self.substitution.fresh_type_var()
    }

    pub fn fresh_type(&mut self) -> Type {
        Type::Var(self.fresh_type_var())
    }

    pub fn fresh_row_var(&mut self) -> RowVarId {
        self.substitution.fresh_row_var()
    }

    /// An open row with no labels yet.
    pub fn fresh_row(&mut self) -> EffectRow {
        EffectRow::var(self.fresh_row_var())
    }

    pub fn constrain(&mut self, constraint: Constraint) {
        match constraint {
            Constraint::TypeEqual {
                expected,
                actual,
                provenance,
            } => self.unify(&expected, &actual, &provenance),
            Constraint::EffectInclude {
                row,
                within,
                provenance,
            } => self.include(&row, &within, &provenance),
            Constraint::Bound {
                ty,
                bound,
                provenance,
            } => self.require_bound(&ty, bound, &provenance),
        }
    }

    /// Defer a constraint to [`Unifier::finish`].
    pub fn defer(&mut self, constraint: Constraint) {
        self.pending.push(constraint);
    }

    // -- Types ---------------------------------------------------------------

    pub fn unify(&mut self, expected: &Type, actual: &Type, provenance: &Provenance) {
        match self.unify_types(expected, actual) {
            Ok(()) => {}
            Err(UnifyFailure::Occurs(var, ty)) => {
                let ty = self.substitution.apply(&ty);
                self.push_step(
                    UnifyAction::OccursCheck,
                    &Type::Var(var),
                    &ty,
                    format!("t{} occurs in {}", var.0, sanitize_type_display(&ty)),
                );
                let diag = Diagnostic::error(
                    Category::OccursCheckFailure,
                    format!(
                        "infinite type: a type variable cannot equal `{}`, which contains it",
                        sanitize_type_display(&ty)
                    ),
                )
                .at(span_to_location(provenance.span));
                self.errors.push(with_related(diag, provenance));
            }
            Err(UnifyFailure::Mismatch) | Err(UnifyFailure::MissingEffects(_)) => {
                let expected = self.substitution.apply(expected);
                let actual = self.substitution.apply(actual);
                self.push_step(
                    UnifyAction::Error,
                    &expected,
                    &actual,
                    "type mismatch".into(),
                );
                let (expected_display, actual_display) =
                    sanitize_type_pair_display(&expected, &actual);
                let message = match &provenance.reason {
                    Reason::Application => {
                        format!("expected a function, got `{actual_display}`")
                    }
                    _ => format!("expected `{expected_display}`, got `{actual_display}`"),
                };
                let mut diag = Diagnostic::error(Category::TypeMismatch, message)
                    .at(span_to_location(provenance.span));
                diag = with_related(diag, provenance);
                if let Some(help) = provenance.reason.help() {
                    diag = diag.with_help(help);
                }
                self.errors.push(diag);
            }
        }
    }

    fn unify_types(&mut self, expected: &Type, actual: &Type) -> Result<(), UnifyFailure> {
        let expected = self.substitution.find(expected);
        let actual = self.substitution.find(actual);

        match (&expected, &actual) {
            (Type::Var(a), Type::Var(b)) if a == b => {
                self.push_step(UnifyAction::Identity, &expected, &actual, "same variable".into());
                Ok(())
            }
            (Type::Error, _) | (_, Type::Error) => {
                self.push_step(
                    UnifyAction::Identity,
                    &expected,
                    &actual,
                    "error sentinel unifies with any type".into(),
                );
                Ok(())
            }
            (Type::Var(v), other) | (other, Type::Var(v)) => self.bind_type_var(*v, other),
            (Type::Prim(a), Type::Prim(b)) if a == b => Ok(()),
            (Type::String, Type::String) | (Type::Unit, Type::Unit) => Ok(()),
            (Type::Function(f1), Type::Function(f2)) => {
                self.push_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    "A -[e]-> B ~ C -[f]-> D: unify A ~ C, B ~ D, e ~ f".into(),
                );
                self.unify_types(&f1.param, &f2.param)?;
                self.unify_types(&f1.ret, &f2.ret)?;
                self.unify_rows(&f1.effects, &f2.effects)
            }
            (Type::Tuple(a), Type::Tuple(b)) if a.len() == b.len() => {
                self.push_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    "tuple: unify element-wise".into(),
                );
                a.iter()
                    .zip(b.iter())
                    .try_for_each(|(x, y)| self.unify_types(x, y))
            }
            (
                Type::Named { name: n1, args: a1 },
                Type::Named { name: n2, args: a2 },
            ) if n1 == n2 && a1.len() == a2.len() => {
                self.push_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    format!("{n1}: unify arguments"),
                );
                a1.iter()
                    .zip(a2.iter())
                    .try_for_each(|(x, y)| self.unify_types(x, y))
            }
            (Type::Ref(k1, i1), Type::Ref(k2, i2)) if k1 == k2 => self.unify_types(i1, i2),
            _ => Err(UnifyFailure::Mismatch),
        }
    }

    fn bind_type_var(&mut self, var: TypeVarId, ty: &Type) -> Result<(), UnifyFailure> {
        let applied = self.substitution.apply(ty);
        if applied.mentions(var) {
            return Err(UnifyFailure::Occurs(var, applied));
        }
        self.push_step(
            UnifyAction::Bind,
            &Type::Var(var),
            &applied,
            format!("t{} := {}", var.0, sanitize_type_display(&applied)),
        );
        self.substitution.bind_type(var, ty.clone());

        // Bounds follow the variable to whatever it now stands for.
        if let Some(bounds) = self.bounds.remove(&var) {
            let span = self.bound_spans.remove(&var);
            for bound in bounds {
                let provenance = Provenance::new(
                    span.unwrap_or_else(Span::synthetic),
                    Reason::BinaryOp("Num"),
                );
                self.require_bound(ty, bound, &provenance);
            }
        }
        Ok(())
    }

    // -- Bounds --------------------------------------------------------------

    /// Require `ty` to satisfy `bound`, now or once it resolves.
    pub fn require_bound(&mut self, ty: &Type, bound: Bound, provenance: &Provenance) {
        match self.substitution.find(ty) {
            Type::Var(v) => {
                self.bounds.entry(v).or_default().insert(bound);
                self.bound_spans.entry(v).or_insert(provenance.span);
            }
            Type::Error => {}
            Type::Prim(p) if p.is_numeric() => {}
            other => {
                let other = self.substitution.apply(&other);
                self.errors.push(
                    Diagnostic::error(
                        Category::TypeMismatch,
                        format!(
                            "expected a numeric type, got `{}`",
                            sanitize_type_display(&other)
                        ),
                    )
                    .at(span_to_location(provenance.span))
                    .with_help(format!(
                        "`{bound}` is implemented by the integer and floating-point primitives"
                    )),
                );
            }
        }
    }

    /// Bounds recorded on an unresolved variable.
    pub fn bounds_of(&self, var: TypeVarId) -> Option<&BTreeSet<Bound>> {
        self.bounds.get(&var)
    }

    pub fn add_bound(&mut self, var: TypeVarId, bound: Bound, span: Span) {
        self.bounds.entry(var).or_default().insert(bound);
        self.bound_spans.entry(var).or_insert(span);
    }

    // -- Effect rows ---------------------------------------------------------

    fn unify_rows(&mut self, expected: &EffectRow, actual: &EffectRow) -> Result<(), UnifyFailure> {
        let r1 = self.substitution.find_row(expected);
        let r2 = self.substitution.find_row(actual);
        let only1: BTreeSet<Label> = r1.labels.difference(&r2.labels).cloned().collect();
        let only2: BTreeSet<Label> = r2.labels.difference(&r1.labels).cloned().collect();

        match (r1.tail, r2.tail) {
            (None, None) => {
                if only1.is_empty() && only2.is_empty() {
                    Ok(())
                } else {
                    Err(UnifyFailure::Mismatch)
                }
            }
            (Some(t1), None) => {
                if !only1.is_empty() {
                    return Err(UnifyFailure::Mismatch);
                }
                self.bind_row_var(t1, EffectRow::closed(only2));
                Ok(())
            }
            (None, Some(t2)) => {
                if !only2.is_empty() {
                    return Err(UnifyFailure::Mismatch);
                }
                self.bind_row_var(t2, EffectRow::closed(only1));
                Ok(())
            }
            (Some(t1), Some(t2)) if t1 == t2 => {
                if only1.is_empty() && only2.is_empty() {
                    Ok(())
                } else {
                    Err(UnifyFailure::Mismatch)
                }
            }
            (Some(t1), Some(t2)) => {
                let rest = self.fresh_row_var();
                self.push_step(
                    UnifyAction::RowDecompose,
                    &Type::Unit,
                    &Type::Unit,
                    format!("e{} ~ e{}: shared tail e{}", t1.0, t2.0, rest.0),
                );
                self.bind_row_var(t1, EffectRow::open(only2, rest));
                self.bind_row_var(t2, EffectRow::open(only1, rest));
                Ok(())
            }
        }
    }

    fn bind_row_var(&mut self, var: RowVarId, row: EffectRow) {
        if self.tracing {
            let detail = format!("e{} := {row}", var.0);
            self.push_step(UnifyAction::BindRowVar, &Type::Unit, &Type::Unit, detail);
        }
        self.substitution.bind_row(var, row);
    }

    /// Record that every effect of `row` is also an effect of `within`.
    ///
    /// Labels are added to `within` immediately (extending its tail, or
    /// failing with `EffectMismatch` when it is closed). If `row` still has
    /// an unbound tail, the inclusion is kept until [`Unifier::finish`].
    pub fn include(&mut self, row: &EffectRow, within: &EffectRow, provenance: &Provenance) {
        match self.include_labels(row, within) {
            Ok(()) => {}
            Err(UnifyFailure::MissingEffects(missing)) => {
                self.report_missing_effects(&missing, within, provenance);
                return;
            }
            Err(_) => return,
        }
        let resolved = self.substitution.find_row(row);
        if let Some(tail) = resolved.tail
            && self.substitution.find_row(within).tail != Some(tail)
        {
            self.pending.push(Constraint::EffectInclude {
                row: row.clone(),
                within: within.clone(),
                provenance: provenance.clone(),
            });
        }
    }

    fn include_labels(&mut self, row: &EffectRow, within: &EffectRow) -> Result<(), UnifyFailure> {
        let sub = self.substitution.find_row(row);
        let sup = self.substitution.find_row(within);
        let missing: BTreeSet<Label> = sub.labels.difference(&sup.labels).cloned().collect();
        if missing.is_empty() {
            return Ok(());
        }
        match sup.tail {
            Some(tail) => {
                let rest = self.fresh_row_var();
                self.bind_row_var(tail, EffectRow::open(missing, rest));
                Ok(())
            }
            None => Err(UnifyFailure::MissingEffects(missing)),
        }
    }

    fn report_missing_effects(
        &mut self,
        missing: &BTreeSet<Label>,
        within: &EffectRow,
        provenance: &Provenance,
    ) {
        let missing_list = missing
            .iter()
            .map(|l| format!("`{l}`"))
            .collect::<Vec<_>>()
            .join(", ");
        let declared = self.substitution.find_row(within);
        let message = match &provenance.reason {
            Reason::DeclaredEffects { function } => format!(
                "`{function}` performs {missing_list}, but its signature declares only {declared}"
            ),
            _ => format!("effects {missing_list} are not allowed here (allowed: {declared})"),
        };
        let mut diag =
            Diagnostic::error(Category::EffectMismatch, message).at(span_to_location(provenance.span));
        diag = with_related(diag, provenance);
        if let Some(help) = provenance.reason.help() {
            diag = diag.with_help(help);
        }
        self.errors.push(diag);
    }

    /// Resolve every deferred constraint. Call once, after the whole pass.
    ///
    /// Deferred inclusions are re-run until no more labels move; any subset
    /// row whose tail is still unbound is then identified with the residual
    /// tail of the row containing it (or closed, when that row is closed).
    pub fn finish(&mut self) {
        let mut includes = Vec::new();
        for constraint in self.pending.drain() {
            match constraint {
                Constraint::EffectInclude {
                    row,
                    within,
                    provenance,
                } => includes.push((row, within, provenance)),
                other => self.constrain(other),
            }
        }

        let mut failed = vec![false; includes.len()];
        loop {
            let before = self.substitution.row_var_count();
            let mut changed = false;
            for (i, (row, within, provenance)) in includes.iter().enumerate() {
                if failed[i] {
                    continue;
                }
                let sup_before = self.substitution.find_row(within);
                match self.include_labels(row, within) {
                    Ok(()) => {}
                    Err(UnifyFailure::MissingEffects(missing)) => {
                        failed[i] = true;
                        self.report_missing_effects(&missing, within, provenance);
                    }
                    Err(_) => failed[i] = true,
                }
                changed |= self.substitution.find_row(within) != sup_before;
            }
            if !changed && self.substitution.row_var_count() == before {
                break;
            }
        }

        for (i, (row, within, _)) in includes.iter().enumerate() {
            if failed[i] {
                continue;
            }
            let sub = self.substitution.find_row(row);
            let sup = self.substitution.find_row(within);
            if let Some(tail) = sub.tail
                && sup.tail != Some(tail)
            {
                let target = match sup.tail {
                    Some(rest) => EffectRow::var(rest),
                    None => EffectRow::pure(),
                };
                self.bind_row_var(tail, target);
            }
        }
    }

    // -- Diagnostics ---------------------------------------------------------

    pub fn push_error(&mut self, diag: Diagnostic) {
        self.errors.push(diag);
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.errors)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    // -- Tracing -------------------------------------------------------------

    pub fn enable_tracing(&mut self) {
        self.tracing = true;
    }

    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    pub fn unify_trace(&self) -> &[UnifyStep] {
        &self.unify_trace
    }

    pub fn take_unify_trace(&mut self) -> Vec<UnifyStep> {
        std::mem::take(&mut self.unify_trace)
    }

    fn push_step(&mut self, action: UnifyAction, left: &Type, right: &Type, detail: String) {
        if !self.tracing {
            return;
        }
        self.unify_trace.push(UnifyStep {
            step: self.unify_trace.len(),
            action,
            left: sanitize_type_display(left),
            right: sanitize_type_display(right),
            detail,
        });
    }

    /// A fresh function type `param -[e]-> ret` with unbound parts.
    pub fn fresh_function(&mut self) -> FunctionType {
        FunctionType {
            param: Box::new(self.fresh_type()),
            ret: Box::new(self.fresh_type()),
            effects: self.fresh_row(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn span_to_location(span: Span) -> SourceLocation {
    SourceLocation {
        file_id: span.file.0,
        start: span.start,
        end: span.end,
    }
}

fn with_related(diag: Diagnostic, provenance: &Provenance) -> Diagnostic {
    match provenance.related {
        Some(related) => diag.with_label(span_to_location(related), related_label(&provenance.reason)),
        None => diag,
    }
}

fn related_label(reason: &Reason) -> &'static str {
    match reason {
        Reason::FunctionArg | Reason::Application => "function applied here",
        Reason::ParamAnnotation | Reason::ReturnType | Reason::LetAnnotation => {
            "type declared here"
        }
        Reason::IfBranches | Reason::MatchArms => "first branch has this type",
        Reason::BinaryOp(_) => "other operand",
        Reason::RecursiveUse => "defined here",
        Reason::DeclaredEffects { .. } => "effects declared here",
        _ => "related to this",
    }
}


#[cfg(test)]
mod typeck_tests;
