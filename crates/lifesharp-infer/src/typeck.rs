//! Type environment, schemes, and annotation resolution.
//!
//! Expression inference lives in [`crate::check`]; this module holds the
//! pieces it shares with the pre-pass and the driver: the scoped
//! [`TypeEnv`], generalization and instantiation of [`TypeScheme`]s, and
//! resolution of written type annotations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use lifesharp_ast::{EffectRowAnnotation, Span, Spanned, TypeAnnotation};
use lifesharp_types::{
    BorrowKind, EffectRow, FunctionType, Label, Primitive, RowVarId, Substitution, Type,
    TypeRegistry, TypeScheme, TypeVarId, free_row_vars, free_type_vars, row_var_polarity,
};

use crate::{Category, Diagnostic, Unifier, span_to_location};

// ---------------------------------------------------------------------------
// Type environment
// ---------------------------------------------------------------------------

/// Maps variable names to their type schemes.
///
/// The global layer holds generalized schemes of already-checked
/// declarations and the ambient environment; it is shared read-only between
/// concurrently checked groups. Local scopes stack on top of it: inner
/// scopes shadow outer ones.
#[derive(Debug, Clone, Default)]
pub struct TypeEnv {
    globals: Arc<BTreeMap<String, TypeScheme>>,
    scopes: Vec<BTreeMap<String, TypeScheme>>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_globals(globals: Arc<BTreeMap<String, TypeScheme>>) -> Self {
        Self {
            globals,
            scopes: Vec::new(),
        }
    }

    pub fn globals(&self) -> &Arc<BTreeMap<String, TypeScheme>> {
        &self.globals
    }

    /// Bind `name` in the innermost scope.
    pub fn bind(&mut self, name: impl Into<String>, scheme: TypeScheme) {
        if self.scopes.is_empty() {
            self.scopes.push(BTreeMap::new());
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), scheme);
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(BTreeMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn lookup(&self, name: &str) -> Option<&TypeScheme> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
    }

    /// Free type and row variables of the local scopes under `subst`.
    ///
    /// Global schemes are closed and contribute nothing.
    pub fn free_vars(&self, subst: &Substitution) -> (BTreeSet<TypeVarId>, BTreeSet<RowVarId>) {
        let mut types = BTreeSet::new();
        let mut rows = BTreeSet::new();
        for scheme in self.scopes.iter().flat_map(|scope| scope.values()) {
            let ty = subst.apply(&scheme.ty);
            let quantified: BTreeSet<TypeVarId> = scheme.type_vars.iter().copied().collect();
            let quantified_rows: BTreeSet<RowVarId> = scheme.row_vars.iter().copied().collect();
            types.extend(free_type_vars(&ty).difference(&quantified));
            rows.extend(free_row_vars(&ty).difference(&quantified_rows));
        }
        (types, rows)
    }
}

// ---------------------------------------------------------------------------
// Generalization and instantiation
// ---------------------------------------------------------------------------

/// Close effect rows that carry no information.
///
/// A row variable not free in the environment that occurs exactly once, in
/// a positive position, can only ever be instantiated to "some more
/// effects nobody observes": bind it to the empty row.
pub fn close_effect_rows(ty: &Type, env_rows: &BTreeSet<RowVarId>, unifier: &mut Unifier) {
    let ty = unifier.substitution.apply(ty);
    for (var, (positive, negative)) in row_var_polarity(&ty) {
        if positive == 1 && negative == 0 && !env_rows.contains(&var) {
            unifier.substitution.bind_row(var, EffectRow::pure());
        }
    }
}

/// Quantify every variable of `ty` not free in `env`.
///
/// Bounds recorded on the unifier for quantified variables move into the
/// scheme. Only top-level schemes quantify row variables: inside a body,
/// effect inclusions into a row may still be pending until
/// [`Unifier::finish`], so local rows stay shared with their uses.
pub fn generalize(ty: &Type, env: &TypeEnv, unifier: &mut Unifier, top_level: bool) -> TypeScheme {
    let (env_types, env_rows) = env.free_vars(&unifier.substitution);
    if top_level {
        close_effect_rows(ty, &env_rows, unifier);
    }
    let ty = unifier.substitution.apply(ty);

    let type_vars: Vec<TypeVarId> = free_type_vars(&ty).difference(&env_types).copied().collect();
    let row_vars: Vec<RowVarId> = if top_level {
        free_row_vars(&ty).difference(&env_rows).copied().collect()
    } else {
        Vec::new()
    };
    let bounds = type_vars
        .iter()
        .filter_map(|var| Some((*var, unifier.bounds_of(*var)?.clone())))
        .filter(|(_, set)| !set.is_empty())
        .collect();

    TypeScheme {
        type_vars,
        row_vars,
        bounds,
        ty,
    }
}

/// Renumber a closed scheme's variables by order of first occurrence.
///
/// Only valid for schemes without free variables: the result no longer
/// refers to the arena of the pass that produced it.
pub fn canonicalize(scheme: &TypeScheme) -> TypeScheme {
    let mut type_order = Vec::new();
    let mut row_order = Vec::new();
    occurrence_order(&scheme.ty, &mut type_order, &mut row_order);

    let type_map: BTreeMap<TypeVarId, TypeVarId> = type_order
        .iter()
        .enumerate()
        .map(|(i, var)| (*var, TypeVarId(i as u32)))
        .collect();
    let row_map: BTreeMap<RowVarId, RowVarId> = row_order
        .iter()
        .enumerate()
        .map(|(i, var)| (*var, RowVarId(i as u32)))
        .collect();
    let type_subst = type_map.iter().map(|(k, v)| (*k, Type::Var(*v))).collect();

    TypeScheme {
        type_vars: (0..type_order.len() as u32).map(TypeVarId).collect(),
        row_vars: (0..row_order.len() as u32).map(RowVarId).collect(),
        bounds: scheme
            .bounds
            .iter()
            .filter_map(|(var, set)| Some((*type_map.get(var)?, set.clone())))
            .collect(),
        ty: substitute(&scheme.ty, &type_subst, &row_map),
    }
}

fn occurrence_order(ty: &Type, types: &mut Vec<TypeVarId>, rows: &mut Vec<RowVarId>) {
    match ty {
        Type::Var(v) => {
            if !types.contains(v) {
                types.push(*v);
            }
        }
        Type::Function(ft) => {
            occurrence_order(&ft.param, types, rows);
            if let Some(tail) = ft.effects.tail
                && !rows.contains(&tail)
            {
                rows.push(tail);
            }
            occurrence_order(&ft.ret, types, rows);
        }
        Type::Tuple(items) | Type::Named { args: items, .. } => {
            for item in items {
                occurrence_order(item, types, rows);
            }
        }
        Type::Ref(_, inner) => occurrence_order(inner, types, rows),
        Type::Prim(_) | Type::String | Type::Unit | Type::Error => {}
    }
}

/// Replace type and row variables. Unmapped variables are kept.
pub fn substitute(
    ty: &Type,
    types: &BTreeMap<TypeVarId, Type>,
    rows: &BTreeMap<RowVarId, RowVarId>,
) -> Type {
    match ty {
        Type::Var(v) => types.get(v).cloned().unwrap_or_else(|| ty.clone()),
        Type::Function(ft) => Type::Function(FunctionType {
            param: Box::new(substitute(&ft.param, types, rows)),
            ret: Box::new(substitute(&ft.ret, types, rows)),
            effects: EffectRow {
                labels: ft.effects.labels.clone(),
                tail: ft
                    .effects
                    .tail
                    .map(|tail| rows.get(&tail).copied().unwrap_or(tail)),
            },
        }),
        Type::Tuple(items) => Type::Tuple(items.iter().map(|t| substitute(t, types, rows)).collect()),
        Type::Named { name, args } => Type::Named {
            name: name.clone(),
            args: args.iter().map(|t| substitute(t, types, rows)).collect(),
        },
        Type::Ref(kind, inner) => Type::Ref(*kind, Box::new(substitute(inner, types, rows))),
        Type::Prim(_) | Type::String | Type::Unit | Type::Error => ty.clone(),
    }
}

/// Instantiate a scheme with fresh variables. Bounds transfer to the fresh
/// variables, attributed to `span`.
pub fn instantiate(scheme: &TypeScheme, unifier: &mut Unifier, span: Span) -> Type {
    if scheme.is_mono() {
        return scheme.ty.clone();
    }
    let mut types = BTreeMap::new();
    for &var in &scheme.type_vars {
        let fresh = unifier.fresh_type_var();
        if let Some(bounds) = scheme.bounds.get(&var) {
            for bound in bounds {
                unifier.add_bound(fresh, *bound, span);
            }
        }
        types.insert(var, Type::Var(fresh));
    }
    let rows = scheme
        .row_vars
        .iter()
        .map(|&var| (var, unifier.fresh_row_var()))
        .collect();
    substitute(&scheme.ty, &types, &rows)
}

// ---------------------------------------------------------------------------
// Annotation resolution
// ---------------------------------------------------------------------------

/// Names of type and row variables written in the annotations of one
/// declaration.
#[derive(Debug, Clone, Default)]
pub struct AnnotationScope {
    pub type_vars: BTreeMap<String, Type>,
    pub row_vars: BTreeMap<String, RowVarId>,
    /// Whether unknown type variables may be introduced (false inside type
    /// definitions, where only declared parameters are in scope).
    pub closed: bool,
}

impl AnnotationScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope admitting exactly the given type parameters.
    pub fn with_params(params: impl IntoIterator<Item = (String, Type)>) -> Self {
        Self {
            type_vars: params.into_iter().collect(),
            row_vars: BTreeMap::new(),
            closed: true,
        }
    }
}

/// Resolve a written type to a [`Type`], reporting unknown names on the
/// unifier and using [`Type::Error`] in their place.
pub fn resolve_annotation(
    annotation: &Spanned<TypeAnnotation>,
    types: &TypeRegistry,
    scope: &mut AnnotationScope,
    unifier: &mut Unifier,
) -> Type {
    let span = annotation.span;
    match &annotation.node {
        TypeAnnotation::Named(name, args) => {
            let resolved_args: Vec<Type> = args
                .iter()
                .map(|arg| resolve_annotation(arg, types, scope, unifier))
                .collect();
            let builtin = match name.as_str() {
                "String" => Some(Type::String),
                "Unit" => Some(Type::Unit),
                other => Primitive::from_name(other).map(Type::Prim),
            };
            if let Some(ty) = builtin {
                if !resolved_args.is_empty() {
                    unifier.push_error(arity_error(name, 0, resolved_args.len(), span));
                    return Type::Error;
                }
                return ty;
            }
            match types.get(name) {
                Some(def) if def.params.len() == resolved_args.len() => {
                    Type::named(name.clone(), resolved_args)
                }
                Some(def) => {
                    unifier.push_error(arity_error(name, def.params.len(), resolved_args.len(), span));
                    Type::Error
                }
                None => {
                    unifier.push_error(
                        Diagnostic::error(Category::UnboundName, format!("unknown type `{name}`"))
                            .at(span_to_location(span)),
                    );
                    Type::Error
                }
            }
        }
        TypeAnnotation::Var(name) => {
            if let Some(ty) = scope.type_vars.get(name) {
                return ty.clone();
            }
            if scope.closed {
                unifier.push_error(
                    Diagnostic::error(
                        Category::UnboundName,
                        format!("type variable `'{name}` is not a parameter of this type"),
                    )
                    .at(span_to_location(span)),
                );
                return Type::Error;
            }
            let fresh = unifier.fresh_type();
            scope.type_vars.insert(name.clone(), fresh.clone());
            fresh
        }
        TypeAnnotation::Tuple(items) => Type::Tuple(
            items
                .iter()
                .map(|item| resolve_annotation(item, types, scope, unifier))
                .collect(),
        ),
        TypeAnnotation::Ref { unique, inner } => {
            let kind = if *unique {
                BorrowKind::Unique
            } else {
                BorrowKind::Shared
            };
            Type::reference(kind, resolve_annotation(inner, types, scope, unifier))
        }
        TypeAnnotation::Function {
            param,
            ret,
            effects,
        } => {
            let param = resolve_annotation(param, types, scope, unifier);
            let ret = resolve_annotation(ret, types, scope, unifier);
            let effects = match effects {
                Some(row) => resolve_effect_annotation(row, scope, unifier),
                None => EffectRow::pure(),
            };
            Type::arrow_with(param, ret, effects)
        }
    }
}

/// Resolve a written effect row. A named tail is shared by every mention
/// of the same name within the declaration.
pub fn resolve_effect_annotation(
    row: &EffectRowAnnotation,
    scope: &mut AnnotationScope,
    unifier: &mut Unifier,
) -> EffectRow {
    let labels = row.labels.iter().map(|label| Label::new(label.node.clone()));
    match &row.tail {
        None => EffectRow::closed(labels),
        Some(tail) => {
            let var = match scope.row_vars.get(&tail.node) {
                Some(var) => *var,
                None if scope.closed => {
                    unifier.push_error(
                        Diagnostic::error(
                            Category::UnboundName,
                            format!("effect variable `{}` is not in scope here", tail.node),
                        )
                        .at(span_to_location(tail.span)),
                    );
                    return EffectRow::closed(labels);
                }
                None => {
                    let var = unifier.fresh_row_var();
                    scope.row_vars.insert(tail.node.clone(), var);
                    var
                }
            };
            EffectRow::open(labels, var)
        }
    }
}

fn arity_error(name: &str, expected: usize, got: usize, span: Span) -> Diagnostic {
    Diagnostic::error(
        Category::TypeMismatch,
        format!("type `{name}` expects {expected} type argument(s), got {got}"),
    )
    .at(span_to_location(span))
}
