//! Tests for declaration and expression inference.
//!
//! Each test builds an AST by hand, checks it, and inspects the inferred
//! scheme, the typed HIR, or the diagnostics.

use std::collections::BTreeMap;
use std::sync::Arc;

use lifesharp_ast::build::*;
use lifesharp_ast::{BinOp, Decl, DeclKind, Module};
use lifesharp_hir::{HirDecl, HirExprKind, HirPatternKind};
use lifesharp_types::{EffectRow, OwnershipMode, Type, TypeScheme, TypeVarId};

use crate::check::{GroupResult, check_group, infer_expression};
use crate::registry::build_registries;
use crate::typeck::TypeEnv;
use crate::{Category, Diagnostic};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ambient() -> BTreeMap<String, TypeScheme> {
    let a = TypeVarId(0);
    BTreeMap::from([
        (
            "print".to_string(),
            TypeScheme::mono(Type::arrow_with(
                Type::String,
                Type::Unit,
                EffectRow::single("io"),
            )),
        ),
        (
            "mk".to_string(),
            TypeScheme {
                type_vars: vec![a],
                row_vars: vec![],
                bounds: BTreeMap::new(),
                ty: Type::arrow(Type::Unit, Type::arrow(Type::Var(a), Type::Var(a))),
            },
        ),
    ])
}

struct Checked {
    schemes: BTreeMap<String, TypeScheme>,
    decls: Vec<HirDecl>,
    diagnostics: Vec<Diagnostic>,
}

impl Checked {
    fn scheme(&self, name: &str) -> String {
        self.schemes
            .get(name)
            .map(ToString::to_string)
            .unwrap_or_else(|| panic!("no scheme for `{name}`"))
    }

    fn decl(&self, name: &str) -> &HirDecl {
        self.decls
            .iter()
            .find(|d| d.name() == name)
            .unwrap_or_else(|| panic!("no declaration `{name}`"))
    }

    fn categories(&self) -> Vec<Category> {
        self.diagnostics.iter().map(|d| d.category).collect()
    }
}

/// Check each value declaration as its own group, in source order.
fn check_module(module: &Module) -> Checked {
    let (registries, mut diagnostics) = build_registries(module);
    let mut globals = ambient();
    let mut decls = Vec::new();
    for decl in &module.declarations {
        if decl.node.value_name().is_none() {
            continue;
        }
        let env = TypeEnv::from_globals(Arc::new(globals.clone()));
        let result = check_group(&[decl], &env, &registries, false);
        absorb(result, &mut globals, &mut decls, &mut diagnostics);
    }
    Checked {
        schemes: globals,
        decls,
        diagnostics,
    }
}

fn absorb(
    result: GroupResult,
    globals: &mut BTreeMap<String, TypeScheme>,
    decls: &mut Vec<HirDecl>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    globals.extend(result.schemes);
    decls.extend(result.decls);
    diagnostics.extend(result.diagnostics);
}

fn infer(expr: lifesharp_ast::Expr) -> Result<String, Vec<Diagnostic>> {
    let env = TypeEnv::from_globals(Arc::new(ambient()));
    infer_expression(&expr, &env, &Default::default())
        .map(|(_, scheme)| scheme.to_string())
        .map_err(|err| err.0)
}

fn with_effects(mut decl: Decl, labels: &[&str]) -> Decl {
    if let DeclKind::Function(function) = &mut decl.node {
        function.effect_annotation = Some(effects(labels, None));
    }
    decl
}

fn add_decl() -> Decl {
    function("add", &["x", "y"], binary(BinOp::Add, var("x"), var("y")))
}

fn sign_pattern() -> Decl {
    active_pattern(
        "Sign",
        vec![
            variant("Zero", vec![]),
            variant("Positive", vec![]),
            variant("Negative", vec![]),
        ],
        true,
        param("n"),
        if_else(
            binary(BinOp::Eq, var("n"), int(0)),
            construct("Zero", vec![]),
            if_else(
                binary(BinOp::Gt, var("n"), int(0)),
                construct("Positive", vec![]),
                construct("Negative", vec![]),
            ),
        ),
    )
}

fn list_type() -> Decl {
    type_def(
        "List",
        &["a"],
        vec![
            variant("Nil", vec![]),
            variant("Cons", vec![tvar("a"), tapp("List", vec![tvar("a")])]),
        ],
    )
}

// ---------------------------------------------------------------------------
// Currying and generalization
// ---------------------------------------------------------------------------

#[test]
fn add_is_generic_over_numbers() {
    let checked = check_module(&module(vec![add_decl()]));
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    assert_eq!(checked.scheme("add"), "a -> a -> a where a: Num");
}

#[test]
fn partial_application_drops_leading_parameters() {
    let checked = check_module(&module(vec![
        add_decl(),
        function("inc", &[], call(var("add"), vec![int(1)])),
        function("three", &[], call(var("add"), vec![int(1), int(2)])),
    ]));
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    assert_eq!(checked.scheme("inc"), "s32 -> s32");
    assert_eq!(checked.scheme("three"), "s32");
}

#[test]
fn adding_strings_violates_num() {
    let checked = check_module(&module(vec![
        add_decl(),
        function("bad", &[], call(var("add"), vec![string("a"), string("b")])),
    ]));
    assert_eq!(checked.categories(), vec![Category::TypeMismatch]);
    assert!(checked.diagnostics[0].message.contains("numeric"));
    assert_eq!(checked.scheme("bad"), "<error>");
}

#[test]
fn over_application_is_a_mismatch_against_a_non_function() {
    let err = infer(call(int(1), vec![int(2)])).unwrap_err();
    assert_eq!(err[0].category, Category::TypeMismatch);
    assert_eq!(err[0].message, "expected a function, got `s32`");
}

#[test]
fn let_bound_lambdas_are_polymorphic() {
    let expr = let_in(
        "id",
        lambda(&["x"], var("x")),
        tuple(vec![
            call(var("id"), vec![int(1)]),
            call(var("id"), vec![boolean(true)]),
        ]),
    );
    assert_eq!(infer(expr).unwrap(), "(s32, bool)");
}

#[test]
fn application_results_are_not_generalized() {
    let expr = let_in(
        "g",
        call(var("mk"), vec![unit()]),
        tuple(vec![
            call(var("g"), vec![int(1)]),
            call(var("g"), vec![boolean(true)]),
        ]),
    );
    let err = infer(expr).unwrap_err();
    assert_eq!(err[0].category, Category::TypeMismatch);
}

#[test]
fn mutually_recursive_group_checks_together() {
    let is_even = function(
        "isEven",
        &["n"],
        if_else(
            binary(BinOp::Eq, var("n"), int(0)),
            boolean(true),
            call(var("isOdd"), vec![binary(BinOp::Sub, var("n"), int(1))]),
        ),
    );
    let is_odd = function(
        "isOdd",
        &["n"],
        if_else(
            binary(BinOp::Eq, var("n"), int(0)),
            boolean(false),
            call(var("isEven"), vec![binary(BinOp::Sub, var("n"), int(1))]),
        ),
    );
    let m = module(vec![is_even, is_odd]);
    let (registries, _) = build_registries(&m);
    let decls: Vec<&Decl> = m.declarations.iter().collect();
    let result = check_group(&decls, &TypeEnv::new(), &registries, false);
    assert!(!result.has_errors(), "{:?}", result.diagnostics);
    let schemes: Vec<String> = result.schemes.iter().map(|(_, s)| s.to_string()).collect();
    assert_eq!(schemes, vec!["s32 -> bool", "s32 -> bool"]);
}

#[test]
fn recursive_functions_over_declared_types() {
    let len = function(
        "len",
        &["xs"],
        match_expr(
            var("xs"),
            vec![
                arm(pctor("Nil", vec![]), int(0)),
                arm(
                    pctor("Cons", vec![pwild(), pvar("rest")]),
                    binary(BinOp::Add, int(1), call(var("len"), vec![var("rest")])),
                ),
            ],
        ),
    );
    let checked = check_module(&module(vec![list_type(), len]));
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    assert_eq!(checked.scheme("len"), "List<a> -> s32");
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn branch_mismatch_reports_both_positions() {
    let expr = if_else(
        boolean(true),
        at(int(1), 10, 11),
        at(string("one"), 20, 25),
    );
    let err = infer(expr).unwrap_err();
    assert_eq!(err[0].message, "expected `s32`, got `String`");
    let positions: Vec<(u32, u32)> = err[0].positions().iter().map(|l| (l.start, l.end)).collect();
    assert_eq!(positions, vec![(20, 25), (10, 11)]);
}

#[test]
fn unbound_names_are_reported() {
    let err = infer(var("nope")).unwrap_err();
    assert_eq!(err[0].category, Category::UnboundName);
    assert_eq!(err[0].message, "unbound variable `nope`");
}

#[test]
fn self_application_fails_the_occurs_check() {
    let err = infer(lambda(&["x"], call(var("x"), vec![var("x")]))).unwrap_err();
    assert_eq!(err[0].category, Category::OccursCheckFailure);
}

#[test]
fn failing_declarations_do_not_block_siblings() {
    let checked = check_module(&module(vec![
        function("broken", &[], var("missing")),
        function("fine", &[], int(1)),
        function("user", &[], var("broken")),
    ]));
    assert_eq!(checked.categories(), vec![Category::UnboundName]);
    assert_eq!(checked.scheme("broken"), "<error>");
    assert_eq!(checked.scheme("fine"), "s32");
    // Uses of a failed declaration absorb the error silently.
    assert_eq!(checked.scheme("user"), "<error>");
}

#[test]
fn invalid_assignment_target() {
    let err = infer(assign(int(1), int(2))).unwrap_err();
    assert_eq!(err[0].message, "invalid assignment target");
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

#[test]
fn calling_an_effectful_function_performs_its_effects() {
    let checked = check_module(&module(vec![function(
        "greet",
        &["name"],
        call(var("print"), vec![var("name")]),
    )]));
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    assert_eq!(checked.scheme("greet"), "String -[io]-> Unit");

    let function = checked.decl("greet").function().expect("function");
    assert!(function.effects.contains("io"));
    assert!(function.body.effects.is_pure(), "creating a closure is pure");
    let HirExprKind::Lambda { param, body } = &function.body.kind else {
        panic!("expected a lambda");
    };
    assert_eq!(param.ownership, Some(OwnershipMode::Owned));
    assert!(body.effects.contains("io"));
}

#[test]
fn under_declared_effects_are_rejected() {
    let greet = with_effects(
        function("greet", &["name"], call(var("print"), vec![var("name")])),
        &[],
    );
    let checked = check_module(&module(vec![greet]));
    assert_eq!(checked.categories(), vec![Category::EffectMismatch]);
    assert_eq!(
        checked.diagnostics[0].message,
        "`greet` performs `io`, but its signature declares only []"
    );
}

#[test]
fn declared_effects_become_the_signature() {
    let greet = with_effects(
        function("greet", &["name"], call(var("print"), vec![var("name")])),
        &["io", "diverge"],
    );
    let checked = check_module(&module(vec![greet]));
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    assert_eq!(checked.scheme("greet"), "String -[diverge, io]-> Unit");
}

#[test]
fn effects_of_both_branches_are_unioned() {
    let body = if_else(
        var("flag"),
        call(var("print"), vec![string("yes")]),
        assign(var("count"), int(1)),
    );
    let decl = sp(DeclKind::Function(lifesharp_ast::FnDecl {
        params: vec![param("flag"), param_typed("count", tname("s32"))],
        ..fn_decl("either", &[], body)
    }));
    let checked = check_module(&module(vec![decl]));
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    assert_eq!(checked.scheme("either"), "bool -> s32 -[io, mut]-> Unit");
}

#[test]
fn higher_order_functions_are_effect_polymorphic() {
    let apply = function("apply", &["f", "x"], call(var("f"), vec![var("x")]));
    let run = function("run", &[], call(var("apply"), vec![var("print"), string("hi")]));
    let checked = check_module(&module(vec![apply, run]));
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    assert_eq!(checked.scheme("apply"), "(a -[e]-> b) -> a -[e]-> b");
    let run = checked.decl("run").function().expect("function");
    assert!(run.effects.contains("io"));
}

#[test]
fn assignment_through_unique_reference_performs_mut() {
    let set = sp(DeclKind::Function(lifesharp_ast::FnDecl {
        params: vec![param_typed("r", tref(true, tname("s32"))), param("v")],
        ..fn_decl("set", &[], assign(deref(var("r")), var("v")))
    }));
    let checked = check_module(&module(vec![set]));
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    assert_eq!(checked.scheme("set"), "&mut s32 -> s32 -[mut]-> Unit");
}

// ---------------------------------------------------------------------------
// Active patterns
// ---------------------------------------------------------------------------

#[test]
fn total_active_pattern_classifies_and_resolves_in_matches() {
    let describe = function(
        "describe",
        &["n"],
        match_expr(
            var("n"),
            vec![
                arm(pctor("Zero", vec![]), string("zero")),
                arm(pctor("Positive", vec![]), string("positive")),
                arm(pctor("Negative", vec![]), string("negative")),
            ],
        ),
    );
    let checked = check_module(&module(vec![sign_pattern(), describe]));
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    assert_eq!(checked.scheme("Sign"), "s32 -> Sign");
    assert_eq!(checked.scheme("describe"), "s32 -> String");

    let function = checked.decl("describe").function().expect("function");
    let HirExprKind::Lambda { body, .. } = &function.body.kind else {
        panic!("expected a lambda");
    };
    let HirExprKind::Match { arms, .. } = &body.kind else {
        panic!("expected a match");
    };
    assert!(matches!(
        &arms[0].pattern.kind,
        HirPatternKind::Active { pattern, case, .. } if pattern == "Sign" && case == "Zero"
    ));
}

#[test]
fn partial_active_patterns_may_return_no_match() {
    let even = active_pattern(
        "Even",
        vec![variant("Even", vec![])],
        false,
        param("n"),
        if_else(
            binary(BinOp::Eq, var("n"), int(0)),
            construct("Even", vec![]),
            construct("NoMatch", vec![]),
        ),
    );
    let checked = check_module(&module(vec![even]));
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    assert_eq!(checked.scheme("Even"), "s32 -> Even");
    assert!(matches!(checked.decl("Even"), HirDecl::ActivePattern { def, .. } if !def.total));
}

#[test]
fn no_match_outside_a_partial_pattern_is_unbound() {
    let checked = check_module(&module(vec![function(
        "f",
        &[],
        construct("NoMatch", vec![]),
    )]));
    assert_eq!(checked.categories(), vec![Category::UnboundName]);
}

#[test]
fn active_pattern_input_must_match_the_scrutinee() {
    let describe = function(
        "describe",
        &[],
        match_expr(
            string("text"),
            vec![arm(pctor("Zero", vec![]), int(0)), arm(pwild(), int(1))],
        ),
    );
    let checked = check_module(&module(vec![sign_pattern(), describe]));
    assert_eq!(checked.categories(), vec![Category::TypeMismatch]);
}

#[test]
fn constructor_patterns_check_their_arity() {
    let f = function(
        "f",
        &["xs"],
        match_expr(
            var("xs"),
            vec![arm(pctor("Cons", vec![pvar("only")]), int(0)), arm(pwild(), int(1))],
        ),
    );
    let checked = check_module(&module(vec![list_type(), f]));
    assert_eq!(checked.categories(), vec![Category::TypeMismatch]);
    assert!(checked.diagnostics[0].message.contains("expects 2 field(s), got 1"));
}

#[test]
fn bare_case_name_with_fields_is_an_arity_error() {
    let f = function(
        "f",
        &["xs"],
        match_expr(
            var("xs"),
            vec![arm(pvar("Cons"), int(0)), arm(pwild(), int(1))],
        ),
    );
    let checked = check_module(&module(vec![list_type(), f]));
    assert_eq!(checked.categories(), vec![Category::TypeMismatch]);
    assert_eq!(checked.diagnostics[0].message, "`Cons` expects 2 field(s), got 0");
}

fn match_arms(checked: &Checked, name: &str) -> Vec<lifesharp_hir::HirArm> {
    let function = checked.decl(name).function().expect("function");
    let HirExprKind::Lambda { body, .. } = &function.body.kind else {
        panic!("expected a lambda");
    };
    let HirExprKind::Match { arms, .. } = &body.kind else {
        panic!("expected a match");
    };
    arms.clone()
}

#[test]
fn pattern_bindings_record_their_ownership_mode() {
    let mut unwrap = fn_decl(
        "unwrap",
        &[],
        match_expr(
            var("o"),
            vec![
                arm(pctor("Some", vec![pvar("s")]), var("s")),
                arm(pctor("None", vec![]), string("")),
            ],
        ),
    );
    unwrap.params = vec![param_typed("o", tapp("Opt", vec![tname("String")]))];
    let mut peek = fn_decl("peek", &[], match_expr(var("r"), vec![arm(pvar("x"), var("x"))]));
    peek.params = vec![param_typed("r", tref(false, tname("String")))];
    let opt = type_def(
        "Opt",
        &["a"],
        vec![variant("Some", vec![tvar("a")]), variant("None", vec![])],
    );
    let checked = check_module(&module(vec![
        opt,
        sp(DeclKind::Function(unwrap)),
        sp(DeclKind::Function(peek)),
    ]));
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);

    let arms = match_arms(&checked, "unwrap");
    let HirPatternKind::Variant { args, .. } = &arms[0].pattern.kind else {
        panic!("expected a variant pattern, got {:?}", arms[0].pattern.kind);
    };
    assert_eq!(args[0].ty, Type::String);
    assert_eq!(
        args[0].kind,
        HirPatternKind::Binding {
            name: "s".into(),
            ownership: Some(OwnershipMode::Owned),
        }
    );

    let arms = match_arms(&checked, "peek");
    assert!(matches!(
        &arms[0].pattern.kind,
        HirPatternKind::Binding { ownership: Some(OwnershipMode::BorrowedShared), .. }
    ));
}

// ---------------------------------------------------------------------------
// Literals
// ---------------------------------------------------------------------------

#[test]
fn integer_literals_must_fit_s32() {
    assert_eq!(infer(int(2_147_483_647)).ok().as_deref(), Some("s32"));

    let diags = infer(int(3_000_000_000)).unwrap_err();
    let categories: Vec<Category> = diags.iter().map(|d| d.category).collect();
    assert_eq!(categories, vec![Category::TypeMismatch]);
    assert_eq!(
        diags[0].message,
        "integer literal `3000000000` is out of range for `s32`"
    );

    let f = function(
        "f",
        &["n"],
        match_expr(
            var("n"),
            vec![arm(pint(-2_147_483_649), int(0)), arm(pwild(), int(1))],
        ),
    );
    let checked = check_module(&module(vec![f]));
    assert_eq!(checked.categories(), vec![Category::TypeMismatch]);
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

#[test]
fn traces_are_recorded_only_on_request() {
    let m = module(vec![add_decl()]);
    let (registries, _) = build_registries(&m);
    let decls: Vec<&Decl> = m.declarations.iter().collect();

    let quiet = check_group(&decls, &TypeEnv::new(), &registries, false);
    assert!(quiet.trace.is_none());

    let traced = check_group(&decls, &TypeEnv::new(), &registries, true);
    let trace = traced.trace.expect("trace requested");
    assert_eq!(trace.declarations, vec!["add".to_string()]);
    assert!(!trace.unify.is_empty());
    assert!(
        trace
            .infer
            .iter()
            .any(|step| step.rule == crate::trace::InferRule::Generalize)
    );
}
