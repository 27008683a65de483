//! HIR to [`Body`] lowering.
//!
//! Lowering walks a function in evaluation order, emitting one program
//! point per ownership-relevant event and threading loans through the
//! values that carry them. Checks that need only local structure (mutation
//! through shared references, moves out of borrows, borrows escaping their
//! region) are reported here; flow-sensitive checks run afterwards in
//! [`crate::dataflow`].

use std::collections::BTreeSet;

use lifesharp_ast::Span;
use lifesharp_diag::{Category, Diagnostic};
use lifesharp_hir::{HirBinding, HirExpr, HirExprKind, OwnershipAnnotation, PassMode};
use lifesharp_types::{BorrowKind, OwnershipMode, Type};

use crate::body::{Body, Carried, Event, Loan, LoanId, Local, LocalId, Region, RegionId, UseKind};
use crate::{Reporter, dataflow, location};

/// How the enclosing expression consumes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    /// The value is moved or copied into its destination.
    Value,
    /// The value is only inspected.
    Read,
}

/// Check a function activation: a chain of lambdas and the body below it.
pub(crate) fn check_body(reporter: &mut Reporter, expr: &mut HirExpr) {
    Lowerer::new(reporter).function(expr);
}

/// A local of the enclosing activation that a closure refers to.
struct Capture {
    name: String,
    ty: Type,
    span: Span,
}

/// Check a closure created inside another activation. Its captures are
/// locals of the closure's own activation, owned by the closure.
fn check_closure(
    reporter: &mut Reporter,
    captures: &[Capture],
    param: &mut HirBinding,
    body: &mut HirExpr,
) {
    let mut lowerer = Lowerer::new(reporter);
    for capture in captures {
        lowerer.declare(&capture.name, &capture.ty, capture.span, Carried::new());
    }
    lowerer.param(param);
    lowerer.function(body);
}

struct Lowerer<'r> {
    body: Body,
    scopes: Vec<(String, LocalId)>,
    region: RegionId,
    /// Points that flow into the next emitted point.
    frontier: Vec<usize>,
    reporter: &'r mut Reporter,
}

impl<'r> Lowerer<'r> {
    fn new(reporter: &'r mut Reporter) -> Self {
        Self {
            body: Body::new(),
            scopes: Vec::new(),
            region: RegionId(0),
            frontier: Vec::new(),
            reporter,
        }
    }

    fn function(mut self, expr: &mut HirExpr) {
        let mut current = expr;
        loop {
            match current.kind {
                HirExprKind::Lambda {
                    ref mut param,
                    ref mut body,
                } => {
                    current.ownership = Some(annotation(&current.ty, Ctx::Value));
                    self.param(param);
                    current = &mut **body;
                }
                _ => break,
            }
        }
        let result = self.lower(current, Ctx::Value);
        self.check_escape(&result, current.span);
        tracing::trace!(
            points = self.body.points.len(),
            loans = self.body.loans.len(),
            "lowered activation"
        );
        dataflow::analyze(&self.body, self.reporter);
    }

    fn param(&mut self, param: &mut HirBinding) {
        param.ownership = Some(OwnershipMode::of_type(&param.ty));
        self.declare(&param.name, &param.ty, param.span, Carried::new());
    }

    // -- Points, locals and regions -----------------------------------------

    fn push(&mut self, event: Event, span: Span) {
        let index = self.body.points.len();
        for &pred in &self.frontier {
            self.body.points[pred].succs.push(index);
        }
        self.body.points.push(crate::body::Point {
            event,
            span,
            succs: Vec::new(),
        });
        self.frontier = vec![index];
    }

    fn declare(&mut self, name: &str, ty: &Type, span: Span, holdings: Carried) -> LocalId {
        let id = LocalId(self.body.locals.len());
        self.body.locals.push(Local {
            name: name.to_string(),
            ty: ty.clone(),
            span,
            region: self.region,
        });
        self.body.holdings.push(holdings);
        self.scopes.push((name.to_string(), id));
        self.push(Event::Def(id), span);
        id
    }

    fn resolve(&self, name: &str) -> Option<LocalId> {
        self.scopes
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, id)| *id)
    }

    fn enter_region(&mut self) -> (RegionId, usize) {
        let saved = (self.region, self.scopes.len());
        self.region = RegionId(self.body.regions.len());
        self.body.regions.push(Region {
            parent: Some(saved.0),
        });
        saved
    }

    /// Leave the current region; `result` is the value flowing out of it.
    fn exit_region(&mut self, saved: (RegionId, usize), result: &Carried, escape: Span) {
        self.check_escape(result, escape);
        self.region = saved.0;
        self.scopes.truncate(saved.1);
    }

    /// Loans of locals declared in the current region may not leave it.
    fn check_escape(&mut self, result: &Carried, escape: Span) {
        for &loan in result {
            let storage = self.body.local(self.body.loan(loan).local);
            if storage.region == self.region {
                self.dangling(loan, escape, "the borrow escapes its scope here");
            }
        }
    }

    /// Storing `value` into a location that lives in `region`.
    fn check_outlives(&mut self, value: &Carried, region: RegionId, at: Span) {
        for &loan in value {
            let storage = self.body.local(self.body.loan(loan).local).region;
            if !self.body.outlives(storage, region) {
                self.dangling(loan, at, "the borrow is stored in a longer-lived location here");
            }
        }
    }

    fn dangling(&mut self, loan: LoanId, at: Span, note: &str) {
        let Loan { local, span, .. } = *self.body.loan(loan);
        let local = self.body.local(local);
        self.reporter.report(
            Diagnostic::error(
                Category::DanglingBorrow,
                format!("`{}` does not live long enough", local.name),
            )
            .at(location(span))
            .with_label(location(local.span), format!("`{}` is declared here", local.name))
            .with_label(location(at), note)
            .with_help("return or store an owned value instead of a borrow of a local"),
        );
    }

    // -- Expressions ---------------------------------------------------------

    fn lower(&mut self, expr: &mut HirExpr, ctx: Ctx) -> Carried {
        let span = expr.span;
        let ty = expr.ty.clone();
        expr.ownership = Some(annotation(&ty, ctx));
        match &mut expr.kind {
            HirExprKind::Lit(_) | HirExprKind::Error => Carried::new(),

            HirExprKind::Var(name) => self.use_var(name, &ty, span, ctx),

            HirExprKind::Call { func, arg } => {
                let mut carried = self.lower(func, Ctx::Read);
                carried.extend(self.lower(arg, Ctx::Value));
                if !carried.is_empty() {
                    self.push(Event::Consume(carried.clone()), span);
                }
                // Partial applications and reference-returning calls keep
                // their arguments' loans alive.
                if carries_loans(&ty) {
                    carried
                } else {
                    Carried::new()
                }
            }

            HirExprKind::Lambda { param, body } => self.closure(param, body, span),

            HirExprKind::Let {
                binding,
                value,
                body,
            } => {
                let carried = self.lower(value, Ctx::Value);
                let saved = self.enter_region();
                binding.ownership = Some(OwnershipMode::of_type(&binding.ty));
                self.declare(&binding.name, &binding.ty, binding.span, carried);
                let result = self.lower(body, ctx);
                self.exit_region(saved, &result, span);
                result
            }

            HirExprKind::Seq(items) => {
                let last = items.len().saturating_sub(1);
                let mut result = Carried::new();
                for (index, item) in items.iter_mut().enumerate() {
                    if index == last {
                        result = self.lower(item, ctx);
                    } else {
                        self.lower(item, Ctx::Read);
                    }
                }
                result
            }

            HirExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.lower(condition, Ctx::Read);
                let entry = self.frontier.clone();
                let mut carried = self.lower(then_branch, ctx);
                let then_exit = std::mem::replace(&mut self.frontier, entry);
                carried.extend(self.lower(else_branch, ctx));
                self.join(then_exit);
                carried
            }

            HirExprKind::Match {
                scrutinee, arms, ..
            } => {
                let moves = arms.iter().any(|arm| {
                    arm.pattern
                        .bindings()
                        .iter()
                        .any(|(_, ty, _)| !ty.is_copy())
                });
                let scrutinee_ctx = if moves { Ctx::Value } else { Ctx::Read };
                let scrutinee_loans = self.lower(scrutinee, scrutinee_ctx);
                let mut entry = self.frontier.clone();
                let mut exits = Vec::new();
                let mut carried = Carried::new();
                for arm in arms.iter_mut() {
                    self.frontier = entry.clone();
                    let saved = self.enter_region();
                    let bindings: Vec<(String, Type, Span)> = arm
                        .pattern
                        .bindings()
                        .into_iter()
                        .map(|(name, ty, span)| (name.to_string(), ty.clone(), span))
                        .collect();
                    for (name, ty, span) in &bindings {
                        self.declare(name, ty, *span, scrutinee_loans.clone());
                    }
                    if let Some(guard) = &mut arm.guard {
                        self.lower(guard, Ctx::Read);
                        // A failing guard falls through to the next arm.
                        entry.extend(self.frontier.iter().copied());
                    }
                    let result = self.lower(&mut arm.body, ctx);
                    self.exit_region(saved, &result, arm.body.span);
                    exits.append(&mut self.frontier);
                    carried.extend(result);
                }
                if arms.is_empty() {
                    self.frontier = entry;
                } else {
                    self.frontier.clear();
                    self.join(exits);
                }
                carried
            }

            HirExprKind::Tuple(items) | HirExprKind::Construct { args: items, .. } => {
                let mut carried = Carried::new();
                for item in items.iter_mut() {
                    carried.extend(self.lower(item, Ctx::Value));
                }
                carried
            }

            HirExprKind::Binary { left, right, .. } => {
                self.lower(left, Ctx::Read);
                self.lower(right, Ctx::Read);
                Carried::new()
            }

            HirExprKind::Unary { operand, .. } => {
                self.lower(operand, Ctx::Read);
                Carried::new()
            }

            HirExprKind::Borrow { kind, expr: inner } => self.borrow(*kind, inner, span),

            HirExprKind::Deref(reference) => {
                let carried = self.lower(reference, Ctx::Read);
                if ctx == Ctx::Value && !ty.is_copy() {
                    self.reporter.report(
                        Diagnostic::error(
                            Category::MoveOutOfBorrow,
                            format!("cannot move a value of type `{ty}` out of a reference"),
                        )
                        .at(location(span))
                        .with_label(location(reference.span), "this is a reference")
                        .with_help("borrow the value instead, or copy it out"),
                    );
                }
                if matches!(ty, Type::Ref(..)) {
                    carried
                } else {
                    Carried::new()
                }
            }

            HirExprKind::Assign { target, value } => {
                self.assign(target, value, span);
                Carried::new()
            }
        }
    }

    fn join(&mut self, other: Vec<usize>) {
        let mut points: BTreeSet<usize> = self.frontier.drain(..).collect();
        points.extend(other);
        self.frontier = points.into_iter().collect();
    }

    fn use_var(&mut self, name: &str, ty: &Type, span: Span, ctx: Ctx) -> Carried {
        let Some(local) = self.resolve(name) else {
            return Carried::new();
        };
        let kind = match ctx {
            Ctx::Read => UseKind::Read,
            Ctx::Value if ty.is_copy() => UseKind::Copy,
            Ctx::Value => UseKind::Move,
        };
        self.push(Event::Use(local, kind), span);
        self.body.holdings[local.0].clone()
    }

    fn borrow(&mut self, kind: BorrowKind, inner: &mut HirExpr, span: Span) -> Carried {
        match &mut inner.kind {
            HirExprKind::Var(name) => {
                inner.ownership = Some(annotation(&inner.ty, Ctx::Read));
                let Some(local) = self.resolve(name) else {
                    return Carried::new();
                };
                let loan = LoanId(self.body.loans.len());
                self.body.loans.push(Loan {
                    local,
                    kind,
                    span,
                    region: self.region,
                });
                self.push(Event::Borrow(loan), span);
                Carried::from([loan])
            }
            HirExprKind::Deref(reference) => {
                inner.ownership = Some(annotation(&inner.ty, Ctx::Read));
                let carried = self.lower(reference, Ctx::Read);
                if kind == BorrowKind::Unique
                    && matches!(reference.ty, Type::Ref(BorrowKind::Shared, _))
                {
                    self.aliased_mutation(span, reference.span, "borrow as unique");
                }
                carried
            }
            // A temporary: its storage belongs to the enclosing expression.
            _ => self.lower(inner, Ctx::Value),
        }
    }

    fn assign(&mut self, target: &mut HirExpr, value: &mut HirExpr, span: Span) {
        let value_loans = self.lower(value, Ctx::Value);
        let target_span = target.span;
        target.ownership = Some(annotation(&target.ty, Ctx::Read));
        match &mut target.kind {
            HirExprKind::Var(name) => {
                let Some(local) = self.resolve(name) else {
                    return;
                };
                let region = self.body.local(local).region;
                self.check_outlives(&value_loans, region, span);
                self.body.holdings[local.0].extend(value_loans);
                self.push(Event::Assign(local), target_span);
            }
            HirExprKind::Deref(reference) => {
                let held = self.lower(reference, Ctx::Read);
                if matches!(reference.ty, Type::Ref(BorrowKind::Shared, _)) {
                    self.aliased_mutation(span, reference.span, "assign");
                }
                for loan in held {
                    let storage = self.body.local(self.body.loan(loan).local).region;
                    self.check_outlives(&value_loans, storage, span);
                }
            }
            _ => {}
        }
    }

    fn aliased_mutation(&mut self, span: Span, reference: Span, action: &str) {
        self.reporter.report(
            Diagnostic::error(
                Category::AliasedMutation,
                format!("cannot {action} through a shared reference"),
            )
            .at(location(span))
            .with_label(location(reference), "this is a `&` reference")
            .with_help("take a unique borrow (`&mut`) to mutate"),
        );
    }

    /// A closure moves (or copies) every local it captures and carries
    /// their loans; its body is checked as its own activation, where the
    /// captures are ordinary locals.
    fn closure(&mut self, param: &mut HirBinding, body: &mut HirExpr, span: Span) -> Carried {
        let mut free = free_names(body);
        free.remove(&param.name);
        let mut carried = Carried::new();
        let mut captures = Vec::new();
        for name in free {
            let Some(local) = self.resolve(&name) else {
                continue;
            };
            let captured = self.body.local(local);
            let kind = if captured.ty.is_copy() {
                UseKind::Copy
            } else {
                UseKind::Move
            };
            captures.push(Capture {
                ty: captured.ty.clone(),
                span: captured.span,
                name,
            });
            self.push(Event::Use(local, kind), span);
            carried.extend(self.body.holdings[local.0].iter().copied());
        }
        check_closure(self.reporter, &captures, param, body);
        carried
    }
}

/// Values of these types can keep a borrow alive.
fn carries_loans(ty: &Type) -> bool {
    match ty {
        Type::Ref(..) | Type::Function(_) | Type::Var(_) => true,
        Type::Tuple(items) => items.iter().any(carries_loans),
        Type::Named { args, .. } => args.iter().any(carries_loans),
        Type::Prim(_) | Type::String | Type::Unit | Type::Error => false,
    }
}

fn annotation(ty: &Type, ctx: Ctx) -> OwnershipAnnotation {
    let pass = match ty {
        Type::Ref(..) => PassMode::Reference,
        _ if ty.is_copy() => PassMode::Copy,
        _ if ctx == Ctx::Read => PassMode::Reference,
        _ => PassMode::Move,
    };
    OwnershipAnnotation {
        mode: OwnershipMode::of_type(ty),
        pass,
    }
}

/// Names referenced by `expr` and not bound inside it.
fn free_names(expr: &HirExpr) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_free(expr, &mut Vec::new(), &mut out);
    out
}

fn collect_free(expr: &HirExpr, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
    match &expr.kind {
        HirExprKind::Var(name) => {
            if !bound.contains(name) {
                out.insert(name.clone());
            }
        }
        HirExprKind::Lambda { param, body } => {
            bound.push(param.name.clone());
            collect_free(body, bound, out);
            bound.pop();
        }
        HirExprKind::Let {
            binding,
            value,
            body,
        } => {
            collect_free(value, bound, out);
            bound.push(binding.name.clone());
            collect_free(body, bound, out);
            bound.pop();
        }
        HirExprKind::Match {
            scrutinee, arms, ..
        } => {
            collect_free(scrutinee, bound, out);
            for arm in arms {
                let mark = bound.len();
                bound.extend(
                    arm.pattern
                        .bindings()
                        .into_iter()
                        .map(|(name, _, _)| name.to_string()),
                );
                if let Some(guard) = &arm.guard {
                    collect_free(guard, bound, out);
                }
                collect_free(&arm.body, bound, out);
                bound.truncate(mark);
            }
        }
        _ => expr.for_each_child(|child| collect_free(child, bound, out)),
    }
}

#[cfg(test)]
pub(crate) fn lower_for_test(expr: &mut HirExpr) -> Body {
    let mut reporter = Reporter::default();
    let mut lowerer = Lowerer::new(&mut reporter);
    let mut current = expr;
    loop {
        match current.kind {
            HirExprKind::Lambda {
                ref mut param,
                ref mut body,
            } => {
                lowerer.param(param);
                current = &mut **body;
            }
            _ => break,
        }
    }
    lowerer.lower(current, Ctx::Value);
    lowerer.body
}
