//! Pattern-match compilation for LifeSharp.
//!
//! Every `match` in a checked declaration is compiled to a [`DecisionTree`]
//! that is attached to the HIR node. The tree drives both analyses:
//! - Exhaustiveness: a tree that can reach `Fail` is non-exhaustive, and the
//!   path to that `Fail` names an uncovered value
//! - Reachability: an arm that no leaf or guard selects is unreachable
//!
//! Active patterns are resolved by name against the registry built in the
//! declaration pre-pass. Applying one tests its result type's variants, so a
//! partial pattern leaves `NoMatch` to be covered by a later arm.

mod matrix;
mod witness;

use lifesharp_ast::Span;
use lifesharp_diag::{Category, Diagnostic, SourceLocation};
use lifesharp_hir::{DecisionTree, HirArm, HirDecl, HirExprKind, HirFunction, Witness};
use lifesharp_types::{Registries, Type};

use crate::matrix::Shapes;

/// The result of compiling one match.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMatch {
    pub tree: DecisionTree,
    /// Arms no value can select, in source order.
    pub unreachable: Vec<usize>,
    /// A value no arm covers, when the match is not exhaustive.
    pub uncovered: Option<Witness>,
}

/// Compile the arms of a match whose scrutinee has type `scrutinee`.
pub fn compile_match(scrutinee: &Type, arms: &[HirArm], registries: &Registries) -> CompiledMatch {
    let shapes = Shapes { registries };
    let tree = matrix::compile(shapes, scrutinee, arms);
    let reachable = tree.reachable_arms();
    let unreachable = (0..arms.len())
        .filter(|arm| !reachable.contains(arm))
        .collect();
    let uncovered = witness::uncovered(shapes, &tree, scrutinee);
    CompiledMatch {
        tree,
        unreachable,
        uncovered,
    }
}

/// Compile every match in `function`, attaching the decision trees.
///
/// Unreachable arms are warnings; a non-exhaustive match is an error.
pub fn compile_function(function: &mut HirFunction, registries: &Registries) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    function.body.walk_mut(&mut |expr| {
        let span = expr.span;
        let HirExprKind::Match {
            scrutinee,
            arms,
            decision,
        } = &mut expr.kind
        else {
            return;
        };
        if scrutinee.ty.contains_error() {
            return;
        }
        let compiled = compile_match(&scrutinee.ty, arms, registries);
        tracing::trace!(
            arms = arms.len(),
            unreachable = compiled.unreachable.len(),
            exhaustive = compiled.uncovered.is_none(),
            "compiled match"
        );
        for &arm in &compiled.unreachable {
            diagnostics.push(
                Diagnostic::warning(Category::UnreachableArm, "unreachable match arm")
                    .at(location(arms[arm].pattern.span))
                    .with_label(location(span), "in this match")
                    .with_help("earlier arms already match every value this pattern matches"),
            );
        }
        if let Some(witness) = &compiled.uncovered {
            diagnostics.push(non_exhaustive(witness, span, scrutinee.span));
        }
        *decision = Some(compiled.tree);
    });
    diagnostics
}

/// Compile the matches of a declaration. Type declarations have none.
pub fn compile_decl(decl: &mut HirDecl, registries: &Registries) -> Vec<Diagnostic> {
    match decl.function_mut() {
        Some(function) => compile_function(function, registries),
        None => Vec::new(),
    }
}

fn non_exhaustive(witness: &Witness, span: Span, scrutinee: Span) -> Diagnostic {
    let help = match witness::unmatched_pattern(witness) {
        Some(pattern) => format!(
            "`{pattern}` is a partial active pattern; add a fallback arm such as `_` for values it does not match"
        ),
        None => format!("add an arm for `{witness}`, or a wildcard arm `_`"),
    };
    Diagnostic::error(
        Category::NonExhaustiveMatch,
        format!("non-exhaustive match: `{witness}` is not covered"),
    )
    .at(location(span))
    .with_label(location(scrutinee), "the matched value")
    .with_help(help)
}

fn location(span: Span) -> SourceLocation {
    SourceLocation {
        file_id: span.file.0,
        start: span.start,
        end: span.end,
    }
}
