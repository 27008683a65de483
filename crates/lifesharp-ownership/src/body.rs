//! Linearized control-flow representation of one function activation.
//!
//! Every program point holds exactly one event. Points are numbered in
//! evaluation order and every edge goes forward, so the graph is acyclic
//! and index order is a topological order.

use std::collections::BTreeSet;
use std::fmt;

use lifesharp_ast::Span;
use lifesharp_types::{BorrowKind, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoanId(pub usize);

/// Loans carried by a value.
pub type Carried = BTreeSet<LoanId>;

/// A binding introduced by a parameter, a `let`, or a pattern.
#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,
    pub ty: Type,
    pub span: Span,
    pub region: RegionId,
}

/// A lexical lifetime scope. The function activation is the root.
#[derive(Debug, Clone)]
pub struct Region {
    pub parent: Option<RegionId>,
}

/// A borrow of a local, created at `span` inside `region`.
#[derive(Debug, Clone)]
pub struct Loan {
    pub local: LocalId,
    pub kind: BorrowKind,
    pub span: Span,
    pub region: RegionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseKind {
    /// By-value use of a copy type.
    Copy,
    /// By-value use of an owned type; invalidates the local.
    Move,
    /// Inspection without taking ownership (operands, conditions, callees).
    Read,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Def(LocalId),
    Use(LocalId, UseKind),
    Borrow(LoanId),
    /// Direct reassignment; re-initializes a moved local.
    Assign(LocalId),
    /// A temporary carrying these loans is consumed (by a call).
    Consume(Carried),
}

#[derive(Debug, Clone)]
pub struct Point {
    pub event: Event,
    pub span: Span,
    pub succs: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Body {
    pub locals: Vec<Local>,
    pub regions: Vec<Region>,
    pub loans: Vec<Loan>,
    pub points: Vec<Point>,
    /// Loans each local may hold, over all of its definitions.
    pub holdings: Vec<Carried>,
}

impl Body {
    pub fn new() -> Self {
        Self {
            regions: vec![Region { parent: None }],
            ..Self::default()
        }
    }

    pub fn local(&self, id: LocalId) -> &Local {
        &self.locals[id.0]
    }

    pub fn loan(&self, id: LoanId) -> &Loan {
        &self.loans[id.0]
    }

    /// True when storage in `outer` lives at least as long as `inner`.
    pub fn outlives(&self, outer: RegionId, inner: RegionId) -> bool {
        let mut current = Some(inner);
        while let Some(region) = current {
            if region == outer {
                return true;
            }
            current = self.regions[region.0].parent;
        }
        false
    }

    pub fn predecessors(&self) -> Vec<Vec<usize>> {
        let mut preds = vec![Vec::new(); self.points.len()];
        for (index, point) in self.points.iter().enumerate() {
            for &succ in &point.succs {
                preds[succ].push(index);
            }
        }
        preds
    }

    fn describe_loan(&self, loan: LoanId) -> String {
        let loan = self.loan(loan);
        format!("{}{}", loan.kind.prefix(), self.local(loan.local).name)
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, point) in self.points.iter().enumerate() {
            write!(f, "{index}: ")?;
            match &point.event {
                Event::Def(local) => write!(f, "def {}", self.local(*local).name)?,
                Event::Use(local, kind) => {
                    let kind = match kind {
                        UseKind::Copy => "copy",
                        UseKind::Move => "move",
                        UseKind::Read => "read",
                    };
                    write!(f, "{kind} {}", self.local(*local).name)?
                }
                Event::Borrow(loan) => write!(f, "borrow {}", self.describe_loan(*loan))?,
                Event::Assign(local) => write!(f, "assign {}", self.local(*local).name)?,
                Event::Consume(loans) => {
                    let loans: Vec<String> =
                        loans.iter().map(|loan| self.describe_loan(*loan)).collect();
                    write!(f, "consume {}", loans.join(", "))?
                }
            }
            if point.succs != [index + 1] {
                let succs: Vec<String> = point.succs.iter().map(ToString::to_string).collect();
                write!(f, " -> [{}]", succs.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
