//! Pre-pass over a module's declarations.
//!
//! Collects algebraic types and active patterns before any body is checked,
//! so that bodies can refer to constructors and cases declared anywhere in
//! the module.

use std::collections::{BTreeMap, BTreeSet};

use lifesharp_ast::{DeclKind, Module, Span, Spanned, TypeVariant, validate_identifier};
use lifesharp_types::{
    ActivePatternDef, NO_MATCH_VARIANT, Registries, SumTypeDef, Type, TypeRegistry, TypeVarId,
    VariantDef,
};

use crate::typeck::{AnnotationScope, resolve_annotation};
use crate::{Category, Diagnostic, Unifier, span_to_location};

/// Build the type and active-pattern registries for `module`.
///
/// Duplicate names, malformed identifiers and malformed active patterns are
/// reported; the offending entry is skipped and collection continues.
pub fn build_registries(module: &Module) -> (Registries, Vec<Diagnostic>) {
    let mut collector = Collector::default();

    // Names first, so field annotations may refer to types declared later
    // (or to the type being declared).
    let mut shells = TypeRegistry::new();
    let mut owners = BTreeSet::new();
    for (index, decl) in module.declarations.iter().enumerate() {
        match &decl.node {
            DeclKind::Type(def) => {
                collector.identifier(&def.name);
                for param in &def.params {
                    collector.identifier(param);
                }
                if collector.claim(Namespace::Types, &def.name) {
                    owners.insert(index);
                    shells.insert(SumTypeDef {
                        name: def.name.node.clone(),
                        params: (0..def.params.len() as u32).map(TypeVarId).collect(),
                        variants: Vec::new(),
                    });
                }
            }
            DeclKind::ActivePattern(pattern) => {
                collector.identifier(&pattern.name);
                collector.claim(Namespace::Values, &pattern.name);
                if collector.claim(Namespace::Types, &pattern.name) {
                    owners.insert(index);
                    shells.insert(SumTypeDef {
                        name: pattern.name.node.clone(),
                        params: Vec::new(),
                        variants: Vec::new(),
                    });
                }
            }
            DeclKind::Function(function) => {
                collector.identifier(&function.name);
                collector.claim(Namespace::Values, &function.name);
            }
        }
    }

    let mut registries = Registries::default();
    let mut unifier = Unifier::new();
    for (index, decl) in module.declarations.iter().enumerate() {
        if !owners.contains(&index) {
            continue;
        }
        match &decl.node {
            DeclKind::Type(def) => {
                let mut scope = AnnotationScope::with_params(
                    def.params
                        .iter()
                        .enumerate()
                        .map(|(i, p)| (p.node.clone(), Type::Var(TypeVarId(i as u32)))),
                );
                let variants = def
                    .variants
                    .iter()
                    .filter(|variant| collector.constructor(variant))
                    .map(|variant| resolve_variant(variant, &shells, &mut scope, &mut unifier))
                    .collect();
                registries.types.insert(SumTypeDef {
                    name: def.name.node.clone(),
                    params: (0..def.params.len() as u32).map(TypeVarId).collect(),
                    variants,
                });
            }
            DeclKind::ActivePattern(pattern) => {
                let Some(cases) = collector.active_cases(&pattern.name, &pattern.cases) else {
                    continue;
                };
                let mut scope = AnnotationScope::with_params([]);
                let mut variants: Vec<VariantDef> = cases
                    .iter()
                    .map(|case| resolve_variant(case, &shells, &mut scope, &mut unifier))
                    .collect();
                if !pattern.total {
                    variants.push(VariantDef {
                        name: NO_MATCH_VARIANT.to_string(),
                        fields: Vec::new(),
                    });
                }
                registries.types.insert(SumTypeDef {
                    name: pattern.name.node.clone(),
                    params: Vec::new(),
                    variants,
                });
                registries.active.insert(ActivePatternDef {
                    name: pattern.name.node.clone(),
                    cases: cases.iter().map(|case| case.name.node.clone()).collect(),
                    total: pattern.total,
                });
            }
            DeclKind::Function(_) => {}
        }
    }

    let mut diagnostics = collector.diagnostics;
    diagnostics.extend(unifier.take_errors());
    (registries, diagnostics)
}

fn resolve_variant(
    variant: &TypeVariant,
    types: &TypeRegistry,
    scope: &mut AnnotationScope,
    unifier: &mut Unifier,
) -> VariantDef {
    VariantDef {
        name: variant.name.node.clone(),
        fields: variant
            .fields
            .iter()
            .map(|field| resolve_annotation(field, types, scope, unifier))
            .collect(),
    }
}

enum Namespace {
    Values,
    Types,
}

#[derive(Default)]
struct Collector {
    values: BTreeMap<String, Span>,
    types: BTreeMap<String, Span>,
    /// Constructor and active-pattern case names share one namespace.
    constructors: BTreeMap<String, Span>,
    diagnostics: Vec<Diagnostic>,
}

impl Collector {
    fn identifier(&mut self, name: &Spanned<String>) {
        if let Err(err) = validate_identifier(&name.node) {
            self.diagnostics.push(
                Diagnostic::error(
                    Category::InvalidIdentifier,
                    format!("invalid identifier `{}`: {err}", name.node),
                )
                .at(span_to_location(name.span)),
            );
        }
    }

    /// Record `name` in `namespace`; false when it was already taken.
    fn claim(&mut self, namespace: Namespace, name: &Spanned<String>) -> bool {
        let (table, what) = match namespace {
            Namespace::Values => (&mut self.values, "value"),
            Namespace::Types => (&mut self.types, "type"),
        };
        match table.get(&name.node) {
            Some(first) => {
                let first = *first;
                self.duplicate(what, name, first);
                false
            }
            None => {
                table.insert(name.node.clone(), name.span);
                true
            }
        }
    }

    fn constructor(&mut self, variant: &TypeVariant) -> bool {
        self.identifier(&variant.name);
        if variant.name.node == NO_MATCH_VARIANT {
            self.diagnostics.push(
                Diagnostic::error(
                    Category::InvalidIdentifier,
                    format!("`{NO_MATCH_VARIANT}` is reserved for partial active patterns"),
                )
                .at(span_to_location(variant.name.span)),
            );
            return false;
        }
        match self.constructors.get(&variant.name.node) {
            Some(first) => {
                let first = *first;
                self.duplicate("constructor", &variant.name, first);
                false
            }
            None => {
                self.constructors
                    .insert(variant.name.node.clone(), variant.name.span);
                true
            }
        }
    }

    /// Validate an active pattern's cases, returning the usable ones.
    fn active_cases<'a>(
        &mut self,
        pattern: &Spanned<String>,
        cases: &'a [TypeVariant],
    ) -> Option<Vec<&'a TypeVariant>> {
        if cases.is_empty() {
            self.diagnostics.push(
                Diagnostic::error(
                    Category::InvalidActivePattern,
                    format!("active pattern `{}` declares no cases", pattern.node),
                )
                .at(span_to_location(pattern.span)),
            );
            return None;
        }
        let mut seen: BTreeMap<&str, Span> = BTreeMap::new();
        let mut usable = Vec::new();
        for case in cases {
            if case.name.node == NO_MATCH_VARIANT {
                self.diagnostics.push(
                    Diagnostic::error(
                        Category::InvalidActivePattern,
                        format!(
                            "active pattern `{}` cannot declare a case named `{NO_MATCH_VARIANT}`",
                            pattern.node
                        ),
                    )
                    .at(span_to_location(case.name.span))
                    .with_help("declare the pattern as partial instead"),
                );
                continue;
            }
            if let Some(first) = seen.get(case.name.node.as_str()) {
                self.diagnostics.push(
                    Diagnostic::error(
                        Category::InvalidActivePattern,
                        format!(
                            "active pattern `{}` declares case `{}` twice",
                            pattern.node, case.name.node
                        ),
                    )
                    .at(span_to_location(case.name.span))
                    .with_label(span_to_location(*first), "first declared here"),
                );
                continue;
            }
            seen.insert(&case.name.node, case.name.span);
            if self.constructor(case) {
                usable.push(case);
            }
        }
        if usable.is_empty() { None } else { Some(usable) }
    }

    fn duplicate(&mut self, what: &str, name: &Spanned<String>, first: Span) {
        self.diagnostics.push(
            Diagnostic::error(
                Category::DuplicateDefinition,
                format!("the {what} `{}` is defined more than once", name.node),
            )
            .at(span_to_location(name.span))
            .with_label(span_to_location(first), "first defined here"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifesharp_ast::build::{
        active_pattern, at, function, int, module, param, tapp, tname, tvar, type_def, variant,
        var,
    };

    fn list_type() -> lifesharp_ast::Decl {
        type_def(
            "List",
            &["a"],
            vec![
                variant("Nil", vec![]),
                variant("Cons", vec![tvar("a"), tapp("List", vec![tvar("a")])]),
            ],
        )
    }

    #[test]
    fn recursive_types_register_with_parameters() {
        let (registries, diags) = build_registries(&module(vec![list_type()]));
        assert!(diags.is_empty(), "{diags:?}");
        let (def, cons) = registries
            .types
            .lookup_constructor("Cons")
            .expect("Cons is registered");
        assert_eq!(def.name, "List");
        let fields = def.instantiate_fields(cons, &[Type::S32]);
        assert_eq!(fields[1].to_string(), "List<s32>");
    }

    #[test]
    fn types_may_refer_to_later_declarations() {
        let m = module(vec![
            type_def("Wrapper", &[], vec![variant("Wrap", vec![tname("Inner")])]),
            type_def("Inner", &[], vec![variant("Leaf", vec![])]),
        ]);
        let (_, diags) = build_registries(&m);
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn duplicates_are_reported_with_first_definition() {
        let m = module(vec![
            at(function("f", &[], int(1)), 0, 5),
            at(function("f", &[], int(2)), 10, 15),
            type_def("A", &[], vec![variant("Same", vec![])]),
            type_def("B", &[], vec![variant("Same", vec![])]),
        ]);
        let (_, diags) = build_registries(&m);
        let categories: Vec<_> = diags.iter().map(|d| d.category).collect();
        assert_eq!(
            categories,
            vec![Category::DuplicateDefinition, Category::DuplicateDefinition]
        );
        assert!(diags.iter().all(|d| d.labels.len() == 1));
    }

    #[test]
    fn partial_active_patterns_get_a_no_match_variant() {
        let m = module(vec![active_pattern(
            "Even",
            vec![variant("Even", vec![])],
            false,
            param("n"),
            var("n"),
        )]);
        let (registries, diags) = build_registries(&m);
        assert!(diags.is_empty(), "{diags:?}");
        let def = registries.types.get("Even").expect("result type");
        assert_eq!(def.variant_names().collect::<Vec<_>>(), vec!["Even", "NoMatch"]);
        assert!(registries.types.lookup_constructor(NO_MATCH_VARIANT).is_none());
        assert_eq!(
            registries.active.lookup_case("Even").map(|d| d.total),
            Some(false)
        );
    }

    #[test]
    fn malformed_active_patterns_are_rejected() {
        let m = module(vec![
            active_pattern("Empty", vec![], true, param("n"), var("n")),
            active_pattern(
                "Twice",
                vec![variant("A", vec![]), variant("A", vec![]), variant("NoMatch", vec![])],
                false,
                param("n"),
                var("n"),
            ),
        ]);
        let (registries, diags) = build_registries(&m);
        assert!(
            diags
                .iter()
                .all(|d| d.category == Category::InvalidActivePattern)
        );
        assert_eq!(diags.len(), 3);
        assert!(registries.active.get("Empty").is_none());
        assert_eq!(
            registries.active.get("Twice").map(|d| d.cases.clone()),
            Some(vec!["A".to_string()])
        );
    }

    #[test]
    fn invalid_identifiers_and_unknown_field_types() {
        let m = module(vec![type_def(
            "2Bad",
            &[],
            vec![variant("V", vec![tname("Missing")])],
        )]);
        let (_, diags) = build_registries(&m);
        let categories: Vec<_> = diags.iter().map(|d| d.category).collect();
        assert_eq!(
            categories,
            vec![Category::InvalidIdentifier, Category::UnboundName]
        );
    }
}
