//! Ownership scenarios, checked end to end: each test builds an AST,
//! infers it, and runs the ownership checker over the typed HIR.

use std::collections::BTreeMap;
use std::sync::Arc;

use lifesharp_ast::build::*;
use lifesharp_ast::{BinOp, Decl, DeclKind, Param};
use lifesharp_diag::{Category, Diagnostic};
use lifesharp_hir::{HirDecl, HirExpr, HirExprKind, PassMode};
use lifesharp_infer::check::check_group;
use lifesharp_infer::registry::build_registries;
use lifesharp_infer::typeck::TypeEnv;
use lifesharp_types::{BorrowKind, OwnershipMode, Type, TypeScheme, TypeVarId};

use crate::lower::lower_for_test;
use crate::{Body, check_decl};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ambient() -> BTreeMap<String, TypeScheme> {
    let a = TypeVarId(0);
    let shared = Type::reference(BorrowKind::Shared, Type::String);
    let unique = Type::reference(BorrowKind::Unique, Type::String);
    BTreeMap::from([
        (
            "use".to_string(),
            TypeScheme {
                type_vars: vec![a],
                row_vars: vec![],
                bounds: BTreeMap::new(),
                ty: Type::arrow(Type::Var(a), Type::Unit),
            },
        ),
        (
            "consume".to_string(),
            TypeScheme::mono(Type::arrow(Type::String, Type::Unit)),
        ),
        (
            "both".to_string(),
            TypeScheme::mono(Type::arrow(unique, Type::arrow(Type::S32, Type::Unit))),
        ),
        (
            "len".to_string(),
            TypeScheme::mono(Type::arrow(shared, Type::S32)),
        ),
    ])
}

/// Infer `decl` and return its typed HIR. Inference must succeed.
fn typed(decl: Decl) -> HirDecl {
    let module = module(vec![decl]);
    let (registries, diagnostics) = build_registries(&module);
    assert!(diagnostics.is_empty(), "{diagnostics:?}");
    let env = TypeEnv::from_globals(Arc::new(ambient()));
    let result = check_group(&[&module.declarations[0]], &env, &registries, false);
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    result
        .decls
        .into_iter()
        .next()
        .expect("one declaration")
}

fn check(decl: Decl) -> Vec<Diagnostic> {
    check_decl(&mut typed(decl))
}

fn categories(diags: &[Diagnostic]) -> Vec<Category> {
    diags.iter().map(|d| d.category).collect()
}

fn main_fn(body: lifesharp_ast::Expr) -> Decl {
    function("main", &[], body)
}

fn typed_fn(name: &str, params: Vec<Param>, body: lifesharp_ast::Expr) -> Decl {
    let mut decl = fn_decl(name, &[], body);
    decl.params = params;
    sp(DeclKind::Function(decl))
}

fn call1(name: &str, arg: lifesharp_ast::Expr) -> lifesharp_ast::Expr {
    call(var(name), vec![arg])
}

fn lowered(decl: Decl) -> Body {
    let mut hir = typed(decl);
    let function = hir.function_mut().expect("a function");
    lower_for_test(&mut function.body)
}

// ---------------------------------------------------------------------------
// Borrow conflicts
// ---------------------------------------------------------------------------

#[test]
fn shared_borrow_while_unique_borrow_is_used_later() {
    // let x = "hi" in let r = &mut x in let s = &x in (use s; use r)
    let diags = check(main_fn(let_in(
        "x",
        string("hi"),
        let_in(
            "r",
            at(borrow_mut(var("x")), 20, 26),
            let_in(
                "s",
                at(borrow(var("x")), 40, 42),
                seq(vec![call1("use", var("s")), at(call1("use", var("r")), 60, 65)]),
            ),
        ),
    )));
    assert_eq!(categories(&diags), vec![Category::ConflictingBorrow]);
    let diag = &diags[0];
    assert_eq!(
        diag.message,
        "cannot borrow `x` as shared because it is already borrowed as unique"
    );
    let positions: Vec<(u32, u32)> = diag.positions().iter().map(|l| (l.start, l.end)).collect();
    assert_eq!(positions[0], (40, 42));
    assert!(positions.contains(&(20, 26)), "{positions:?}");
    assert_eq!(diag.labels[1].message, "the borrow is used later here");
}

#[test]
fn unused_unique_borrow_does_not_block_a_shared_borrow() {
    // `r` is never used after `s` is created, so the borrows do not overlap.
    let diags = check(main_fn(let_in(
        "x",
        string("hi"),
        let_in(
            "r",
            borrow_mut(var("x")),
            let_in("s", borrow(var("x")), call1("use", var("s"))),
        ),
    )));
    assert!(diags.is_empty(), "{diags:?}");
}

#[test]
fn two_shared_borrows_coexist() {
    let diags = check(main_fn(let_in(
        "x",
        string("hi"),
        let_in(
            "a",
            borrow(var("x")),
            let_in(
                "b",
                borrow(var("x")),
                seq(vec![call1("len", var("a")), call1("len", var("b"))]),
            ),
        ),
    )));
    assert!(diags.is_empty(), "{diags:?}");
}

#[test]
fn argument_borrows_overlap_within_one_call() {
    let diags = check(function(
        "f",
        &["s"],
        call(
            var("both"),
            vec![borrow_mut(var("s")), call1("len", borrow(var("s")))],
        ),
    ));
    assert_eq!(categories(&diags), vec![Category::ConflictingBorrow]);
}

// ---------------------------------------------------------------------------
// Moves
// ---------------------------------------------------------------------------

#[test]
fn double_consume_is_use_after_move() {
    let diags = check(function(
        "f",
        &["s"],
        seq(vec![
            at(call1("consume", var("s")), 10, 19),
            at(call1("consume", at(var("s"), 30, 31)), 21, 32),
        ]),
    ));
    assert_eq!(categories(&diags), vec![Category::UseAfterMove]);
    assert_eq!(diags[0].message, "use of moved value `s`");
    assert_eq!(diags[0].labels[0].message, "value moved here");
    assert_eq!(diags[0].location.map(|l| l.start), Some(30));
}

#[test]
fn move_on_one_branch_invalidates_later_use() {
    let diags = check(function(
        "f",
        &["s", "b"],
        seq(vec![
            if_else(var("b"), call1("consume", var("s")), unit()),
            call1("consume", var("s")),
        ]),
    ));
    assert_eq!(categories(&diags), vec![Category::UseAfterMove]);
}

#[test]
fn moves_on_disjoint_branches_are_fine() {
    let diags = check(function(
        "f",
        &["s", "b"],
        if_else(
            var("b"),
            call1("consume", var("s")),
            call1("consume", var("s")),
        ),
    ));
    assert!(diags.is_empty(), "{diags:?}");
}

#[test]
fn assignment_reinitializes_a_moved_binding() {
    let diags = check(main_fn(let_in(
        "s",
        string("a"),
        seq(vec![
            call1("consume", var("s")),
            assign(var("s"), string("b")),
            call1("consume", var("s")),
        ]),
    )));
    assert!(diags.is_empty(), "{diags:?}");
}

#[test]
fn copy_values_are_never_moved() {
    let diags = check(function(
        "f",
        &["n"],
        seq(vec![
            call1("use", var("n")),
            binary(BinOp::Add, var("n"), int(1)),
        ]),
    ));
    assert!(diags.is_empty(), "{diags:?}");
}

#[test]
fn move_while_borrowed_conflicts() {
    let diags = check(main_fn(let_in(
        "s",
        string("a"),
        let_in(
            "r",
            borrow(var("s")),
            seq(vec![call1("consume", var("s")), call1("len", var("r"))]),
        ),
    )));
    assert_eq!(categories(&diags), vec![Category::ConflictingBorrow]);
    assert_eq!(diags[0].message, "cannot move out of `s` while it is borrowed");
}

#[test]
fn move_after_last_use_of_borrow_is_fine() {
    let diags = check(main_fn(let_in(
        "s",
        string("a"),
        let_in(
            "r",
            borrow(var("s")),
            seq(vec![call1("len", var("r")), call1("consume", var("s"))]),
        ),
    )));
    assert!(diags.is_empty(), "{diags:?}");
}

#[test]
fn closure_capture_moves_the_binding() {
    let diags = check(main_fn(let_in(
        "s",
        string("a"),
        let_in(
            "f",
            lambda(&["u"], call1("consume", var("s"))),
            call1("consume", var("s")),
        ),
    )));
    assert_eq!(categories(&diags), vec![Category::UseAfterMove]);
}

#[test]
fn moves_inside_a_closure_body_are_tracked() {
    // let s = "a" in let f = fun u -> (consume s; consume s) in use f
    let diags = check(main_fn(let_in(
        "s",
        string("a"),
        let_in(
            "f",
            lambda(
                &["u"],
                seq(vec![
                    call1("consume", var("s")),
                    call1("consume", at(var("s"), 40, 41)),
                ]),
            ),
            call1("use", var("f")),
        ),
    )));
    assert_eq!(categories(&diags), vec![Category::UseAfterMove]);
    assert_eq!(diags[0].message, "use of moved value `s`");
    assert_eq!(diags[0].location.map(|l| l.start), Some(40));
}

#[test]
fn borrows_inside_a_closure_body_conflict() {
    let diags = check(main_fn(let_in(
        "x",
        string("hi"),
        let_in(
            "f",
            lambda(
                &["u"],
                let_in(
                    "r",
                    borrow_mut(var("x")),
                    let_in(
                        "s",
                        borrow(var("x")),
                        seq(vec![call1("use", var("s")), call1("use", var("r"))]),
                    ),
                ),
            ),
            call1("use", var("f")),
        ),
    )));
    assert_eq!(categories(&diags), vec![Category::ConflictingBorrow]);
    assert_eq!(
        diags[0].message,
        "cannot borrow `x` as shared because it is already borrowed as unique"
    );
}

#[test]
fn closure_reading_a_copy_capture_twice_is_fine() {
    let diags = check(typed_fn(
        "f",
        vec![param_typed("n", tname("s32"))],
        let_in(
            "g",
            lambda(&["u"], binary(BinOp::Add, var("n"), var("n"))),
            seq(vec![call1("use", var("g")), call1("use", var("n"))]),
        ),
    ));
    assert!(diags.is_empty(), "{diags:?}");
}

// ---------------------------------------------------------------------------
// Regions
// ---------------------------------------------------------------------------

#[test]
fn borrow_of_inner_binding_escapes_its_let() {
    let diags = check(main_fn(let_in(
        "r",
        let_in("y", string("a"), borrow(var("y"))),
        call1("len", var("r")),
    )));
    assert_eq!(categories(&diags), vec![Category::DanglingBorrow]);
    assert_eq!(diags[0].message, "`y` does not live long enough");
}

#[test]
fn returning_a_borrow_of_a_parameter_dangles() {
    let diags = check(function("f", &["s"], borrow(var("s"))));
    assert_eq!(categories(&diags), vec![Category::DanglingBorrow]);
}

#[test]
fn reference_parameters_pass_through() {
    let diags = check(typed_fn(
        "first",
        vec![param_typed("r", tref(false, tname("String")))],
        var("r"),
    ));
    assert!(diags.is_empty(), "{diags:?}");
}

#[test]
fn storing_a_shorter_borrow_in_an_outer_reference_dangles() {
    let diags = check(main_fn(let_in(
        "x",
        string("a"),
        let_in(
            "r",
            borrow(var("x")),
            let_in(
                "y",
                string("b"),
                seq(vec![
                    assign(var("r"), borrow(var("y"))),
                    call1("len", var("r")),
                ]),
            ),
        ),
    )));
    assert_eq!(categories(&diags), vec![Category::DanglingBorrow]);
    assert_eq!(diags[0].message, "`y` does not live long enough");
}

// ---------------------------------------------------------------------------
// Mutation and moves through references
// ---------------------------------------------------------------------------

#[test]
fn assignment_through_shared_reference_is_rejected() {
    let diags = check(typed_fn(
        "set",
        vec![param_typed("r", tref(false, tname("s32")))],
        assign(deref(var("r")), int(1)),
    ));
    assert_eq!(categories(&diags), vec![Category::AliasedMutation]);
    assert_eq!(diags[0].message, "cannot assign through a shared reference");
}

#[test]
fn assignment_through_unique_reference_is_allowed() {
    let diags = check(typed_fn(
        "set",
        vec![param_typed("r", tref(true, tname("s32")))],
        assign(deref(var("r")), int(1)),
    ));
    assert!(diags.is_empty(), "{diags:?}");
}

#[test]
fn moving_out_of_a_reference_is_rejected() {
    let diags = check(typed_fn(
        "take",
        vec![param_typed("r", tref(false, tname("String")))],
        call1("consume", deref(var("r"))),
    ));
    assert_eq!(categories(&diags), vec![Category::MoveOutOfBorrow]);
    assert_eq!(
        diags[0].message,
        "cannot move a value of type `String` out of a reference"
    );
}

#[test]
fn copying_out_of_a_reference_is_allowed() {
    let diags = check(typed_fn(
        "get",
        vec![param_typed("r", tref(false, tname("s32")))],
        deref(var("r")),
    ));
    assert!(diags.is_empty(), "{diags:?}");
}

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

fn find<'a>(expr: &'a HirExpr, pred: &dyn Fn(&HirExpr) -> bool) -> Option<&'a HirExpr> {
    if pred(expr) {
        return Some(expr);
    }
    let mut found = None;
    expr.for_each_child(|child| {
        if found.is_none() {
            found = find(child, pred);
        }
    });
    found
}

#[test]
fn annotations_record_how_values_are_passed() {
    let mut hir = typed(function(
        "f",
        &["s"],
        seq(vec![
            call1("len", borrow(var("s"))),
            call1("consume", var("s")),
        ]),
    ));
    assert!(check_decl(&mut hir).is_empty());
    let function = hir.function().expect("a function");
    let HirExprKind::Lambda { param, .. } = &function.body.kind else {
        panic!("expected a lambda, got {:?}", function.body.kind);
    };
    assert_eq!(param.ownership, Some(OwnershipMode::Owned));

    let borrow = find(&function.body, &|e| matches!(e.kind, HirExprKind::Borrow { .. }))
        .expect("a borrow");
    let annotation = borrow.ownership.expect("annotated");
    assert_eq!(annotation.pass, PassMode::Reference);
    assert_eq!(annotation.mode, OwnershipMode::BorrowedShared);

    let moved = find(&function.body, &|e| {
        matches!(&e.kind, HirExprKind::Var(name) if name == "s") && e.ownership.map(|a| a.pass)
            == Some(PassMode::Move)
    });
    assert!(moved.is_some(), "the consumed `s` is passed by move");

    let mut unannotated = 0;
    function.body.walk(&mut |e| {
        if e.ownership.is_none() {
            unannotated += 1;
        }
    });
    assert_eq!(unannotated, 0);
}

#[test]
fn lowering_follows_evaluation_order() {
    let body = lowered(function(
        "f",
        &["b"],
        let_in(
            "s",
            string("a"),
            if_else(
                var("b"),
                call1("consume", var("s")),
                call1("use", borrow(var("s"))),
            ),
        ),
    ));
    insta::assert_snapshot!(body.to_string().trim_end(), @r"
    0: def b
    1: def s
    2: read b -> [3, 4]
    3: move s -> []
    4: borrow &s
    5: consume &s -> []
    ");
}

#[test]
fn type_declarations_have_nothing_to_check() {
    let mut decl = HirDecl::Type(lifesharp_types::SumTypeDef {
        name: "Unit2".into(),
        params: vec![],
        variants: vec![],
    });
    assert!(check_decl(&mut decl).is_empty());
}
