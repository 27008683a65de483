//! Ownership and region checking for LifeSharp.
//!
//! Runs over typed HIR, one function activation at a time:
//! - Moves are flow-sensitive: a moved binding is invalid only on paths
//!   through the move, until it is reassigned
//! - Borrows are live from creation to the last use of any value carrying
//!   them, not to the end of the enclosing scope
//! - Regions follow lexical nesting; a borrow may not leave the region of
//!   the binding it borrows
//!
//! Every binding and expression is annotated with an ownership mode and a
//! pass strategy for the code generator.

mod body;
mod dataflow;
mod lower;

use std::collections::BTreeSet;

use lifesharp_ast::Span;
use lifesharp_diag::{Diagnostic, SourceLocation};
use lifesharp_hir::{HirDecl, HirFunction};

pub use body::Body;

/// Check `function` and fill in its ownership annotations.
///
/// Returns every ownership diagnostic found; the annotations are complete
/// even when errors are reported.
pub fn check_function(function: &mut HirFunction) -> Vec<Diagnostic> {
    let mut reporter = Reporter::default();
    lower::check_body(&mut reporter, &mut function.body);
    let diagnostics = reporter.finish();
    if !diagnostics.is_empty() {
        tracing::trace!(
            function = %function.name,
            errors = diagnostics.len(),
            "ownership errors"
        );
    }
    diagnostics
}

/// Check a declaration. Type declarations have nothing to check.
pub fn check_decl(decl: &mut HirDecl) -> Vec<Diagnostic> {
    match decl.function_mut() {
        Some(function) => check_function(function),
        None => Vec::new(),
    }
}

/// Collects diagnostics, dropping exact repeats (a closure body is checked
/// once per activation that creates it).
#[derive(Default)]
pub(crate) struct Reporter {
    diagnostics: Vec<Diagnostic>,
    seen: BTreeSet<(String, String, Option<SourceLocation>)>,
}

impl Reporter {
    pub(crate) fn report(&mut self, diag: Diagnostic) {
        let key = (diag.code.clone(), diag.message.clone(), diag.location);
        if self.seen.insert(key) {
            self.diagnostics.push(diag);
        }
    }

    pub(crate) fn finish(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

pub(crate) fn location(span: Span) -> SourceLocation {
    SourceLocation {
        file_id: span.file.0,
        start: span.start,
        end: span.end,
    }
}

#[cfg(test)]
mod ownership_tests;
