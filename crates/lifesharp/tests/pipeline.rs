//! Whole-module checks through the driver.

use std::collections::BTreeMap;

use lifesharp::{Category, CheckConfig, CheckOutput, Severity, TypeScheme, check_module, check_module_with};
use lifesharp_ast::build::*;
use lifesharp_ast::{BinOp, Decl, Expr, Module};
use lifesharp_hir::HirDecl;
use lifesharp_types::{Type, TypeVarId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ambient() -> BTreeMap<String, TypeScheme> {
    let a = TypeVarId(0);
    BTreeMap::from([(
        "use".to_string(),
        TypeScheme {
            type_vars: vec![a],
            row_vars: vec![],
            bounds: BTreeMap::new(),
            ty: Type::arrow(Type::Var(a), Type::Unit),
        },
    )])
}

fn check(decls: Vec<Decl>) -> CheckOutput {
    check_module_with(&module(decls), &ambient(), &CheckConfig::default())
}

fn scheme(output: &CheckOutput, name: &str) -> String {
    output
        .scheme(name)
        .map(ToString::to_string)
        .unwrap_or_else(|| panic!("no scheme for `{name}`"))
}

fn categories(output: &CheckOutput) -> Vec<Category> {
    output.diagnostics.iter().map(|d| d.category).collect()
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

fn countdown(name: &str, other: &str, base: bool) -> Decl {
    function(
        name,
        &["n"],
        if_else(
            binary(BinOp::Eq, var("n"), int(0)),
            boolean(base),
            call(var(other), vec![binary(BinOp::Sub, var("n"), int(1))]),
        ),
    )
}

fn unreachable_arm() -> Decl {
    function(
        "first",
        &["n"],
        match_expr(
            var("n"),
            vec![arm(pvar("m"), var("m")), arm(pint(1), int(1))],
        ),
    )
}

fn call1(name: &str, arg: Expr) -> Expr {
    call(var(name), vec![arg])
}

/// A module with several independent groups and some of every outcome.
fn mixed_module() -> Module {
    module(vec![
        add_decl(),
        function("inc", &[], call(var("add"), vec![int(1)])),
        countdown("is_even", "is_odd", true),
        countdown("is_odd", "is_even", false),
        sign_pattern(),
        function(
            "describe",
            &["n"],
            match_expr(
                var("n"),
                vec![
                    arm(pvar("Zero"), string("zero")),
                    arm(pvar("Positive"), string("positive")),
                ],
            ),
        ),
        unreachable_arm(),
        function("broken", &[], var("missing")),
    ])
}

// ---------------------------------------------------------------------------
// Inference through the driver
// ---------------------------------------------------------------------------

#[test]
fn curried_declarations_generalize_and_partially_apply() {
    let output = check(vec![
        function("inc", &[], call(var("add"), vec![int(1)])),
        add_decl(),
    ]);
    assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    assert_eq!(scheme(&output, "add"), "a -> a -> a where a: Num");
    assert_eq!(scheme(&output, "inc"), "s32 -> s32");
}

#[test]
fn mutually_recursive_declarations_are_checked_together() {
    let output = check(vec![
        countdown("is_even", "is_odd", true),
        countdown("is_odd", "is_even", false),
    ]);
    assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    assert_eq!(scheme(&output, "is_even"), "s32 -> bool");
    assert_eq!(scheme(&output, "is_odd"), "s32 -> bool");
}

#[test]
fn failures_do_not_cascade_or_block_unrelated_groups() {
    let output = check(vec![
        function("broken", &[], var("missing")),
        function("user", &[], var("broken")),
        function("fine", &[], int(1)),
    ]);
    assert_eq!(categories(&output), vec![Category::UnboundName]);
    assert_eq!(scheme(&output, "broken"), "<error>");
    assert_eq!(scheme(&output, "user"), "<error>");
    assert_eq!(scheme(&output, "fine"), "s32");
}

#[test]
fn ambient_bindings_are_visible() {
    let output = check(vec![function("f", &["x"], call1("use", var("x")))]);
    assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    assert_eq!(scheme(&output, "f"), "a -> Unit");
}

// ---------------------------------------------------------------------------
// Later stages
// ---------------------------------------------------------------------------

#[test]
fn ownership_errors_are_reported_per_declaration() {
    let conflict = function(
        "conflict",
        &[],
        let_in(
            "x",
            string("hi"),
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
    );
    let output = check(vec![conflict, function("fine", &[], int(1))]);
    assert_eq!(categories(&output), vec![Category::ConflictingBorrow]);
    assert_eq!(scheme(&output, "fine"), "s32");
}

#[test]
fn total_active_pattern_scenario() {
    let exhaustive = function(
        "describe",
        &["n"],
        match_expr(
            var("n"),
            vec![
                arm(pvar("Zero"), string("zero")),
                arm(pvar("Positive"), string("positive")),
                arm(pvar("Negative"), string("negative")),
            ],
        ),
    );
    let output = check(vec![exhaustive, sign_pattern()]);
    assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    let describe = output.declaration("describe").expect("describe");
    assert_eq!(describe.decision_trees().len(), 1);

    let output = check_module(&mixed_module(), &CheckConfig::default());
    let missing: Vec<&str> = output
        .diagnostics
        .iter()
        .filter(|d| d.category == Category::NonExhaustiveMatch)
        .map(|d| d.message.as_str())
        .collect();
    assert_eq!(missing, vec!["non-exhaustive match: `Negative` is not covered"]);
}

#[test]
fn warnings_are_errors_only_when_denied() {
    let output = check(vec![unreachable_arm()]);
    assert_eq!(categories(&output), vec![Category::UnreachableArm]);
    assert_eq!(output.diagnostics[0].severity, Severity::Warning);
    assert!(!output.has_errors());
    assert!(output.into_result().is_ok());

    let config = CheckConfig::default().with_deny_warnings(true);
    let output = check_module(&module(vec![unreachable_arm()]), &config);
    assert_eq!(output.diagnostics[0].severity, Severity::Error);
    let err = output.into_result().unwrap_err();
    assert_eq!(err.diagnostics().len(), 1);
}

// ---------------------------------------------------------------------------
// Output and scheduling
// ---------------------------------------------------------------------------

#[test]
fn declarations_come_back_in_source_order() {
    let output = check_module(&mixed_module(), &CheckConfig::default());
    let names: Vec<&str> = output.declarations.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["add", "inc", "is_even", "is_odd", "Sign", "describe", "first", "broken"]
    );
    let categories = categories(&output);
    insta::assert_snapshot!(format!("{categories:?}"), @"[NonExhaustiveMatch, UnreachableArm, UnboundName]");
}

#[test]
fn type_declarations_carry_their_definition() {
    let output = check(vec![type_def(
        "Opt",
        &["a"],
        vec![variant("Some", vec![tvar("a")]), variant("None", vec![])],
    )]);
    let opt = output.declaration("Opt").expect("Opt");
    assert!(opt.scheme.is_none());
    let HirDecl::Type(def) = &opt.hir else {
        panic!("expected a type declaration");
    };
    assert_eq!(def.variants.len(), 2);
}

#[test]
fn parallel_and_sequential_checks_agree() {
    let module = mixed_module();
    let sequential = check_module(&module, &CheckConfig::default().with_parallel(false));
    let parallel = check_module(&module, &CheckConfig::default().with_threads(2));
    assert_eq!(sequential.to_json().unwrap(), parallel.to_json().unwrap());
    assert_eq!(sequential.schemes, parallel.schemes);
}

#[test]
fn traces_are_recorded_per_group_when_enabled() {
    let module = module(vec![add_decl(), function("three", &[], call(var("add"), vec![int(1), int(2)]))]);
    let output = check_module(&module, &CheckConfig::default());
    assert!(output.traces.is_empty());

    let output = check_module(&module, &CheckConfig::default().with_trace_inference(true));
    assert_eq!(output.traces.len(), 2);
    assert!(output.traces.iter().all(|trace| !trace.unify.is_empty()));
}

#[test]
fn json_report_lists_schemes_trees_and_diagnostics() {
    let output = check_module(&mixed_module(), &CheckConfig::default());
    let json: serde_json::Value = serde_json::from_str(&output.to_json().unwrap()).unwrap();
    let declarations = json["declarations"].as_array().unwrap();
    assert_eq!(declarations[0]["name"], "add");
    assert_eq!(declarations[0]["scheme"], "a -> a -> a where a: Num");
    let describe = declarations
        .iter()
        .find(|decl| decl["name"] == "describe")
        .unwrap();
    assert_eq!(describe["decision_trees"].as_array().unwrap().len(), 1);
    assert_eq!(json["diagnostics"].as_array().unwrap().len(), 3);
    assert!(json.get("traces").is_none());
}
