//! Flow-sensitive checks over a lowered [`Body`].
//!
//! Moves are tracked forward (a local is maybe-moved at a point if a move
//! reaches it on some path). Loan liveness is computed backward: a loan is
//! live after a point if some later use of a value carrying it is reachable
//! without passing the loan's creation. Because every edge goes forward,
//! one pass in index order (or reverse index order) reaches the fixpoint.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use lifesharp_ast::Span;
use lifesharp_diag::{Category, Diagnostic};
use lifesharp_types::BorrowKind;

use crate::body::{Body, Carried, Event, LoanId, LocalId, UseKind};
use crate::{Reporter, location};

pub(crate) fn analyze(body: &Body, reporter: &mut Reporter) {
    check_moves(body, reporter);
    let uses = loan_uses(body);
    let live = live_loans(body, &uses);
    check_conflicts(body, &uses, &live, reporter);
}

// ---------------------------------------------------------------------------
// Moves
// ---------------------------------------------------------------------------

fn check_moves(body: &Body, reporter: &mut Reporter) {
    let preds = body.predecessors();
    let mut moved_out: Vec<BTreeMap<LocalId, Span>> = Vec::with_capacity(body.points.len());
    for (index, point) in body.points.iter().enumerate() {
        let mut moved = BTreeMap::new();
        for &pred in &preds[index] {
            for (local, span) in &moved_out[pred] {
                moved.entry(*local).or_insert(*span);
            }
        }
        match &point.event {
            Event::Def(local) | Event::Assign(local) => {
                moved.remove(local);
            }
            Event::Use(local, kind) => {
                if let Some(&moved_at) = moved.get(local) {
                    use_after_move(body, *local, point.span, moved_at, reporter);
                } else if *kind == UseKind::Move {
                    moved.insert(*local, point.span);
                }
            }
            Event::Borrow(loan) => {
                let local = body.loan(*loan).local;
                if let Some(&moved_at) = moved.get(&local) {
                    use_after_move(body, local, point.span, moved_at, reporter);
                }
            }
            Event::Consume(_) => {}
        }
        moved_out.push(moved);
    }
}

fn use_after_move(
    body: &Body,
    local: LocalId,
    used_at: Span,
    moved_at: Span,
    reporter: &mut Reporter,
) {
    let local = body.local(local);
    reporter.report(
        Diagnostic::error(
            Category::UseAfterMove,
            format!("use of moved value `{}`", local.name),
        )
        .at(location(used_at))
        .with_label(location(moved_at), "value moved here")
        .with_label(location(local.span), format!("`{}` is declared here", local.name))
        .with_help(format!(
            "`{}` has type `{}`, which is not copied; borrow it instead of moving it",
            local.name, local.ty
        )),
    );
}

// ---------------------------------------------------------------------------
// Loan liveness
// ---------------------------------------------------------------------------

/// Loans used at each point.
fn loan_uses(body: &Body) -> Vec<Carried> {
    body.points
        .iter()
        .map(|point| match &point.event {
            Event::Use(local, _) => body.holdings[local.0].clone(),
            Event::Consume(loans) => loans.clone(),
            Event::Def(_) | Event::Borrow(_) | Event::Assign(_) => Carried::new(),
        })
        .collect()
}

/// Loans live on exit from each point.
fn live_loans(body: &Body, uses: &[Carried]) -> Vec<Carried> {
    let count = body.points.len();
    let mut live_in = vec![Carried::new(); count];
    let mut live_out = vec![Carried::new(); count];
    for index in (0..count).rev() {
        let point = &body.points[index];
        let mut out = Carried::new();
        for &succ in &point.succs {
            out.extend(live_in[succ].iter().copied());
        }
        let mut inside = out.clone();
        if let Event::Borrow(loan) = point.event {
            inside.remove(&loan);
        }
        inside.extend(uses[index].iter().copied());
        live_in[index] = inside;
        live_out[index] = out;
    }
    live_out
}

/// The first point after `from` that uses `loan`.
fn next_use(body: &Body, uses: &[Carried], loan: LoanId, from: usize) -> Option<Span> {
    let mut queue: VecDeque<usize> = body.points[from].succs.iter().copied().collect();
    let mut seen = BTreeSet::new();
    while let Some(index) = queue.pop_front() {
        if !seen.insert(index) {
            continue;
        }
        if uses[index].contains(&loan) {
            return Some(body.points[index].span);
        }
        queue.extend(body.points[index].succs.iter().copied());
    }
    None
}

fn kind_name(kind: BorrowKind) -> &'static str {
    match kind {
        BorrowKind::Shared => "shared",
        BorrowKind::Unique => "unique",
    }
}

fn check_conflicts(body: &Body, uses: &[Carried], live: &[Carried], reporter: &mut Reporter) {
    for (index, point) in body.points.iter().enumerate() {
        let live_on = move |local: LocalId| {
            live[index]
                .iter()
                .copied()
                .filter(move |&loan| body.loan(loan).local == local)
        };
        let (local, conflict, message) = match &point.event {
            Event::Borrow(new) => {
                let loan = body.loan(*new);
                let conflict = live_on(loan.local).find(|&other| {
                    other != *new
                        && (loan.kind == BorrowKind::Unique
                            || body.loan(other).kind == BorrowKind::Unique)
                });
                let Some(other) = conflict else { continue };
                let name = &body.local(loan.local).name;
                let message = format!(
                    "cannot borrow `{name}` as {} because it is already borrowed as {}",
                    kind_name(loan.kind),
                    kind_name(body.loan(other).kind)
                );
                (loan.local, other, message)
            }
            Event::Use(local, kind) => {
                let name = &body.local(*local).name;
                let (conflict, message) = match kind {
                    UseKind::Move => (
                        live_on(*local).next(),
                        format!("cannot move out of `{name}` while it is borrowed"),
                    ),
                    UseKind::Copy | UseKind::Read => (
                        live_on(*local).find(|&loan| body.loan(loan).kind == BorrowKind::Unique),
                        format!("cannot use `{name}` while it is borrowed as unique"),
                    ),
                };
                let Some(other) = conflict else { continue };
                (*local, other, message)
            }
            Event::Assign(local) => {
                let Some(other) = live_on(*local).next() else {
                    continue;
                };
                let name = &body.local(*local).name;
                (
                    *local,
                    other,
                    format!("cannot assign to `{name}` while it is borrowed"),
                )
            }
            Event::Def(_) | Event::Consume(_) => continue,
        };
        let earlier = body.loan(conflict);
        let mut diag = Diagnostic::error(Category::ConflictingBorrow, message)
            .at(location(point.span))
            .with_label(
                location(earlier.span),
                format!(
                    "`{}` is borrowed as {} here",
                    body.local(local).name,
                    kind_name(earlier.kind)
                ),
            );
        if let Some(later) = next_use(body, uses, conflict, index) {
            diag = diag.with_label(location(later), "the borrow is used later here");
        }
        tracing::trace!(point = index, "conflicting access");
        reporter.report(diag);
    }
}
