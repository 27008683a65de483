//! The LifeSharp type language.
//!
//! Functions are curried: every arrow takes one argument and carries the
//! effect row performed when it is applied, so `s32 -> String -[io]-> Unit`
//! is two arrows and only the inner one does `io`. References are types of
//! their own, `&T` or `&mut T`, and [`OwnershipMode::of_type`] reads the mode
//! a binding of a type holds. An active pattern's result is a named sum of
//! its cases, registered alongside declared sum types in [`Registries`].
//!
//! Inference variables live in a [`Substitution`] arena indexed by variable
//! id and resolved with path compression.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for a type variable during inference.
///
/// Ids index the [`Substitution`] arena of the pass that created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeVarId(pub u32);

/// Unique identifier for an effect-row tail variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowVarId(pub u32);

/// An effect label such as `io` or `mut`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub String);

impl Label {
    /// Performed by every assignment.
    pub const MUT: &'static str = "mut";
    pub const IO: &'static str = "io";
    pub const DIVERGE: &'static str = "diverge";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Primitive {
    Bool,
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    S64,
    U64,
    SSize,
    USize,
    F32,
    F64,
}

impl Primitive {
    pub const ALL: [Primitive; 13] = [
        Primitive::Bool,
        Primitive::S8,
        Primitive::U8,
        Primitive::S16,
        Primitive::U16,
        Primitive::S32,
        Primitive::U32,
        Primitive::S64,
        Primitive::U64,
        Primitive::SSize,
        Primitive::USize,
        Primitive::F32,
        Primitive::F64,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::S8 => "s8",
            Primitive::U8 => "u8",
            Primitive::S16 => "s16",
            Primitive::U16 => "u16",
            Primitive::S32 => "s32",
            Primitive::U32 => "u32",
            Primitive::S64 => "s64",
            Primitive::U64 => "u64",
            Primitive::SSize => "ssize",
            Primitive::USize => "usize",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Everything except `bool` satisfies the `Num` bound.
    pub fn is_numeric(self) -> bool {
        self != Primitive::Bool
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, Primitive::Bool | Primitive::F32 | Primitive::F64)
    }

    /// Smallest and largest value of an integer type, clamped to `i64`.
    pub fn int_range(self) -> Option<(i64, i64)> {
        let range: (i64, i64) = match self {
            Primitive::S8 => (i8::MIN.into(), i8::MAX.into()),
            Primitive::U8 => (0, u8::MAX.into()),
            Primitive::S16 => (i16::MIN.into(), i16::MAX.into()),
            Primitive::U16 => (0, u16::MAX.into()),
            Primitive::S32 => (i32::MIN.into(), i32::MAX.into()),
            Primitive::U32 => (0, u32::MAX.into()),
            Primitive::S64 | Primitive::SSize => (i64::MIN, i64::MAX),
            Primitive::U64 | Primitive::USize => (0, i64::MAX),
            Primitive::Bool | Primitive::F32 | Primitive::F64 => return None,
        };
        Some(range)
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BorrowKind {
    Shared,
    Unique,
}

impl BorrowKind {
    pub fn prefix(self) -> &'static str {
        match self {
            BorrowKind::Shared => "&",
            BorrowKind::Unique => "&mut ",
        }
    }
}

/// How a binding or an expression result relates to its storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnershipMode {
    Owned,
    BorrowedShared,
    BorrowedUnique,
}

impl OwnershipMode {
    /// The mode of a value of type `ty`.
    pub fn of_type(ty: &Type) -> Self {
        match ty {
            Type::Ref(BorrowKind::Shared, _) => OwnershipMode::BorrowedShared,
            Type::Ref(BorrowKind::Unique, _) => OwnershipMode::BorrowedUnique,
            _ => OwnershipMode::Owned,
        }
    }
}

impl fmt::Display for OwnershipMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OwnershipMode::Owned => "owned",
            OwnershipMode::BorrowedShared => "shared",
            OwnershipMode::BorrowedUnique => "unique",
        })
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A LifeSharp type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Prim(Primitive),
    String,
    Unit,
    /// A unary arrow carrying the effects performed when it is applied.
    Function(FunctionType),
    Tuple(Vec<Type>),
    /// An algebraic type: `Option<s32>`. Variants live in the type registry.
    Named { name: String, args: Vec<Type> },
    Ref(BorrowKind, Box<Type>),
    Var(TypeVarId),
    /// Absorbing sentinel for expressions whose checking already failed.
    /// Unifies with everything and never produces further diagnostics.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub param: Box<Type>,
    pub ret: Box<Type>,
    pub effects: EffectRow,
}

impl Type {
    pub const BOOL: Type = Type::Prim(Primitive::Bool);
    pub const S32: Type = Type::Prim(Primitive::S32);
    pub const F64: Type = Type::Prim(Primitive::F64);

    /// A pure arrow `param -> ret`.
    pub fn arrow(param: Type, ret: Type) -> Type {
        Type::arrow_with(param, ret, EffectRow::pure())
    }

    pub fn arrow_with(param: Type, ret: Type, effects: EffectRow) -> Type {
        Type::Function(FunctionType {
            param: Box::new(param),
            ret: Box::new(ret),
            effects,
        })
    }

    /// Curried arrow over `params`, with `effects` on the innermost arrow.
    pub fn curried(params: Vec<Type>, ret: Type, effects: EffectRow) -> Type {
        let mut params = params.into_iter().rev();
        let Some(last) = params.next() else {
            return ret;
        };
        let innermost = Type::arrow_with(last, ret, effects);
        params.fold(innermost, |acc, param| Type::arrow(param, acc))
    }

    pub fn named(name: impl Into<String>, args: Vec<Type>) -> Type {
        Type::Named {
            name: name.into(),
            args,
        }
    }

    pub fn reference(kind: BorrowKind, inner: Type) -> Type {
        Type::Ref(kind, Box::new(inner))
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            Type::Function(ft) => Some(ft),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    /// Whether this type mentions the error sentinel anywhere.
    pub fn contains_error(&self) -> bool {
        match self {
            Type::Error => true,
            Type::Function(ft) => ft.param.contains_error() || ft.ret.contains_error(),
            Type::Tuple(items) => items.iter().any(Type::contains_error),
            Type::Named { args, .. } => args.iter().any(Type::contains_error),
            Type::Ref(_, inner) => inner.contains_error(),
            Type::Prim(_) | Type::String | Type::Unit | Type::Var(_) => false,
        }
    }

    /// Does `var` occur anywhere in this type? Used by the occurs check.
    pub fn mentions(&self, var: TypeVarId) -> bool {
        match self {
            Type::Var(v) => *v == var,
            Type::Function(ft) => ft.param.mentions(var) || ft.ret.mentions(var),
            Type::Tuple(items) => items.iter().any(|t| t.mentions(var)),
            Type::Named { args, .. } => args.iter().any(|t| t.mentions(var)),
            Type::Ref(_, inner) => inner.mentions(var),
            Type::Prim(_) | Type::String | Type::Unit | Type::Error => false,
        }
    }

    /// Whether a by-value use of this type copies instead of moving.
    ///
    /// Primitives, unit, shared references and tuples of copy types are
    /// copy. Unresolved variables are treated as owned.
    pub fn is_copy(&self) -> bool {
        match self {
            Type::Prim(_) | Type::Unit | Type::Error => true,
            Type::Ref(BorrowKind::Shared, _) => true,
            Type::Tuple(items) => items.iter().all(Type::is_copy),
            Type::Ref(BorrowKind::Unique, _)
            | Type::String
            | Type::Function(_)
            | Type::Named { .. }
            | Type::Var(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Effect rows
// ---------------------------------------------------------------------------

/// A set of effect labels with an optional open tail.
///
/// `[io, mut]` is closed; `[io | e0]` may still grow by unifying `e0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct EffectRow {
    pub labels: BTreeSet<Label>,
    pub tail: Option<RowVarId>,
}

impl EffectRow {
    /// Closed empty effect row (`[]`).
    pub fn pure() -> Self {
        Self::default()
    }

    pub fn closed(labels: impl IntoIterator<Item = Label>) -> Self {
        Self {
            labels: labels.into_iter().collect(),
            tail: None,
        }
    }

    pub fn open(labels: impl IntoIterator<Item = Label>, tail: RowVarId) -> Self {
        Self {
            labels: labels.into_iter().collect(),
            tail: Some(tail),
        }
    }

    pub fn var(tail: RowVarId) -> Self {
        Self::open([], tail)
    }

    pub fn single(label: &str) -> Self {
        Self::closed([Label::new(label)])
    }

    pub fn is_pure(&self) -> bool {
        self.labels.is_empty() && self.tail.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.tail.is_none()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.as_str() == label)
    }
}

impl fmt::Display for EffectRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_row(f, self, &VarNames::default())
    }
}

// ---------------------------------------------------------------------------
// Type schemes (forall-quantified types)
// ---------------------------------------------------------------------------

/// A constraint on a quantified type variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bound {
    /// Supports arithmetic and ordering.
    Num,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Num => f.write_str("Num"),
        }
    }
}

/// A type scheme: `forall a e. T where a: Num`.
///
/// Type schemes arise from let-generalization. A polymorphic binding like
/// `let id x = x` gets the scheme `forall a. a -> a`. Each use of `id`
/// instantiates the scheme with fresh variables; bounds transfer to the
/// fresh variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeScheme {
    pub type_vars: Vec<TypeVarId>,
    pub row_vars: Vec<RowVarId>,
    pub bounds: BTreeMap<TypeVarId, BTreeSet<Bound>>,
    pub ty: Type,
}

impl TypeScheme {
    /// Create a monomorphic scheme (no quantified variables).
    pub fn mono(ty: Type) -> Self {
        Self {
            type_vars: Vec::new(),
            row_vars: Vec::new(),
            bounds: BTreeMap::new(),
            ty,
        }
    }

    /// The scheme bound to names whose declaration failed to check.
    pub fn error() -> Self {
        Self::mono(Type::Error)
    }

    pub fn is_mono(&self) -> bool {
        self.type_vars.is_empty() && self.row_vars.is_empty()
    }
}

impl fmt::Display for TypeScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = VarNames::for_types([&self.ty]);
        write_type(f, &self.ty, &names, false)?;
        let mut first = true;
        for (var, bounds) in &self.bounds {
            for bound in bounds {
                f.write_str(if first { " where " } else { ", " })?;
                first = false;
                write!(f, "{}: {bound}", names.type_var(*var))?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Algebraic type and active pattern definitions
// ---------------------------------------------------------------------------

/// The implicit case of a partial active pattern's result type.
pub const NO_MATCH_VARIANT: &str = "NoMatch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDef {
    pub name: String,
    pub fields: Vec<Type>,
}

/// A declared algebraic type. Field types mention `params`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SumTypeDef {
    pub name: String,
    pub params: Vec<TypeVarId>,
    pub variants: Vec<VariantDef>,
}

impl SumTypeDef {
    pub fn variant(&self, name: &str) -> Option<&VariantDef> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn variant_names(&self) -> impl Iterator<Item = &str> {
        self.variants.iter().map(|v| v.name.as_str())
    }

    /// Field types of `variant` with the type parameters replaced by `args`.
    pub fn instantiate_fields(&self, variant: &VariantDef, args: &[Type]) -> Vec<Type> {
        let mapping: BTreeMap<TypeVarId, Type> = self
            .params
            .iter()
            .copied()
            .zip(args.iter().cloned())
            .collect();
        variant
            .fields
            .iter()
            .map(|field| replace_vars(field, &mapping))
            .collect()
    }
}

/// A registered active pattern.
///
/// Its classification function has type `input -> result_type`; the result
/// type is an algebraic type registered under the same name whose variants
/// are `cases` (plus [`NO_MATCH_VARIANT`] when the pattern is partial).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePatternDef {
    pub name: String,
    pub cases: Vec<String>,
    pub total: bool,
}

impl ActivePatternDef {
    pub fn result_type(&self) -> &str {
        &self.name
    }
}

/// Declared algebraic types, indexed by type name and by constructor name.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    defs: BTreeMap<String, SumTypeDef>,
    constructors: BTreeMap<String, String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `def`. Constructors already owned by another type keep their
    /// first owner; callers report the duplicate.
    pub fn insert(&mut self, def: SumTypeDef) {
        for variant in &def.variants {
            if variant.name == NO_MATCH_VARIANT {
                continue;
            }
            self.constructors
                .entry(variant.name.clone())
                .or_insert_with(|| def.name.clone());
        }
        self.defs.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&SumTypeDef> {
        self.defs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// The type owning constructor `name`, and the variant itself.
    pub fn lookup_constructor(&self, name: &str) -> Option<(&SumTypeDef, &VariantDef)> {
        let owner = self.constructors.get(name)?;
        let def = self.defs.get(owner)?;
        Some((def, def.variant(name)?))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SumTypeDef> {
        self.defs.values()
    }
}

/// Declared active patterns, indexed by pattern name and by case name.
#[derive(Debug, Clone, Default)]
pub struct ActivePatternRegistry {
    patterns: BTreeMap<String, ActivePatternDef>,
    cases: BTreeMap<String, String>,
}

impl ActivePatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: ActivePatternDef) {
        for case in &def.cases {
            self.cases
                .entry(case.clone())
                .or_insert_with(|| def.name.clone());
        }
        self.patterns.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&ActivePatternDef> {
        self.patterns.get(name)
    }

    /// The active pattern declaring case `case`.
    pub fn lookup_case(&self, case: &str) -> Option<&ActivePatternDef> {
        self.patterns.get(self.cases.get(case)?)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivePatternDef> {
        self.patterns.values()
    }
}

/// Everything the pre-pass learns before any body is checked.
#[derive(Debug, Clone, Default)]
pub struct Registries {
    pub types: TypeRegistry,
    pub active: ActivePatternRegistry,
}

/// Substitute type variables according to `mapping`, leaving others alone.
pub fn replace_vars(ty: &Type, mapping: &BTreeMap<TypeVarId, Type>) -> Type {
    match ty {
        Type::Var(v) => mapping.get(v).cloned().unwrap_or_else(|| ty.clone()),
        Type::Function(ft) => Type::Function(FunctionType {
            param: Box::new(replace_vars(&ft.param, mapping)),
            ret: Box::new(replace_vars(&ft.ret, mapping)),
            effects: ft.effects.clone(),
        }),
        Type::Tuple(items) => Type::Tuple(items.iter().map(|t| replace_vars(t, mapping)).collect()),
        Type::Named { name, args } => Type::Named {
            name: name.clone(),
            args: args.iter().map(|t| replace_vars(t, mapping)).collect(),
        },
        Type::Ref(kind, inner) => Type::Ref(*kind, Box::new(replace_vars(inner, mapping))),
        Type::Prim(_) | Type::String | Type::Unit | Type::Error => ty.clone(),
    }
}

// ---------------------------------------------------------------------------
// Free variable computation
// ---------------------------------------------------------------------------

/// Collect all free type variables in a type.
pub fn free_type_vars(ty: &Type) -> BTreeSet<TypeVarId> {
    let mut out = BTreeSet::new();
    collect_type_vars(ty, &mut out);
    out
}

fn collect_type_vars(ty: &Type, out: &mut BTreeSet<TypeVarId>) {
    match ty {
        Type::Var(v) => {
            out.insert(*v);
        }
        Type::Function(ft) => {
            collect_type_vars(&ft.param, out);
            collect_type_vars(&ft.ret, out);
        }
        Type::Tuple(items) | Type::Named { args: items, .. } => {
            for item in items {
                collect_type_vars(item, out);
            }
        }
        Type::Ref(_, inner) => collect_type_vars(inner, out),
        Type::Prim(_) | Type::String | Type::Unit | Type::Error => {}
    }
}

/// Collect all free row variables in a type.
pub fn free_row_vars(ty: &Type) -> BTreeSet<RowVarId> {
    let mut out = BTreeSet::new();
    collect_row_vars(ty, &mut out);
    out
}

fn collect_row_vars(ty: &Type, out: &mut BTreeSet<RowVarId>) {
    match ty {
        Type::Function(ft) => {
            collect_row_vars(&ft.param, out);
            collect_row_vars(&ft.ret, out);
            out.extend(ft.effects.tail);
        }
        Type::Tuple(items) | Type::Named { args: items, .. } => {
            for item in items {
                collect_row_vars(item, out);
            }
        }
        Type::Ref(_, inner) => collect_row_vars(inner, out),
        Type::Prim(_) | Type::String | Type::Unit | Type::Var(_) | Type::Error => {}
    }
}

/// Count row-variable occurrences, split by polarity.
///
/// Returns `(positive, negative)` occurrence counts per variable. A row in a
/// function's parameter flips polarity.
pub fn row_var_polarity(ty: &Type) -> BTreeMap<RowVarId, (usize, usize)> {
    let mut out = BTreeMap::new();
    collect_row_polarity(ty, true, &mut out);
    out
}

fn collect_row_polarity(ty: &Type, positive: bool, out: &mut BTreeMap<RowVarId, (usize, usize)>) {
    match ty {
        Type::Function(ft) => {
            collect_row_polarity(&ft.param, !positive, out);
            collect_row_polarity(&ft.ret, positive, out);
            if let Some(tail) = ft.effects.tail {
                let entry = out.entry(tail).or_insert((0, 0));
                if positive {
                    entry.0 += 1;
                } else {
                    entry.1 += 1;
                }
            }
        }
        Type::Tuple(items) | Type::Named { args: items, .. } => {
            for item in items {
                collect_row_polarity(item, positive, out);
            }
        }
        Type::Ref(_, inner) => collect_row_polarity(inner, positive, out),
        Type::Prim(_) | Type::String | Type::Unit | Type::Var(_) | Type::Error => {}
    }
}

// ---------------------------------------------------------------------------
// Type display helpers
// ---------------------------------------------------------------------------

/// Names used when printing variables. Unmapped variables print as `t3` / `e3`.
#[derive(Debug, Clone, Default)]
pub struct VarNames {
    types: BTreeMap<TypeVarId, String>,
    rows: BTreeMap<RowVarId, String>,
}

impl VarNames {
    /// Alphabetic names for every variable in `types`, in order of first id.
    pub fn for_types<'a>(types: impl IntoIterator<Item = &'a Type>) -> Self {
        let mut type_vars = BTreeSet::new();
        let mut row_vars = BTreeSet::new();
        for ty in types {
            type_vars.extend(free_type_vars(ty));
            row_vars.extend(free_row_vars(ty));
        }
        Self {
            types: type_vars
                .into_iter()
                .enumerate()
                .map(|(i, var)| (var, alphabetic_var_name(i)))
                .collect(),
            rows: row_vars
                .into_iter()
                .enumerate()
                .map(|(i, var)| (var, row_var_name(i)))
                .collect(),
        }
    }

    pub fn type_var(&self, var: TypeVarId) -> String {
        self.types
            .get(&var)
            .cloned()
            .unwrap_or_else(|| format!("t{}", var.0))
    }

    pub fn row_var(&self, var: RowVarId) -> String {
        self.rows
            .get(&var)
            .cloned()
            .unwrap_or_else(|| format!("e{}", var.0))
    }
}

fn alphabetic_var_name(index: usize) -> String {
    let letter = (b'a' + (index % 26) as u8) as char;
    let suffix = index / 26;
    if suffix == 0 {
        letter.to_string()
    } else {
        format!("{letter}{suffix}")
    }
}

fn row_var_name(index: usize) -> String {
    if index == 0 {
        "e".to_string()
    } else {
        format!("e{index}")
    }
}

/// Display a type with alphabetic names for type variables instead of `t0`, `t1`.
pub fn sanitize_type_display(ty: &Type) -> String {
    let names = VarNames::for_types([ty]);
    DisplayWith { ty, names: &names }.to_string()
}

/// Display two types with one shared variable namespace.
///
/// This keeps mismatch messages consistent: the same source variable appears
/// with the same sanitized name on both sides.
pub fn sanitize_type_pair_display(left: &Type, right: &Type) -> (String, String) {
    let names = VarNames::for_types([left, right]);
    (
        DisplayWith { ty: left, names: &names }.to_string(),
        DisplayWith { ty: right, names: &names }.to_string(),
    )
}

/// A type paired with the variable names to print it with.
pub struct DisplayWith<'a> {
    pub ty: &'a Type,
    pub names: &'a VarNames,
}

impl fmt::Display for DisplayWith<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_type(f, self.ty, self.names, false)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_type(f, self, &VarNames::default(), false)
    }
}

fn write_type(
    f: &mut fmt::Formatter<'_>,
    ty: &Type,
    names: &VarNames,
    in_arrow_param: bool,
) -> fmt::Result {
    match ty {
        Type::Prim(p) => write!(f, "{p}"),
        Type::String => f.write_str("String"),
        Type::Unit => f.write_str("Unit"),
        Type::Error => f.write_str("<error>"),
        Type::Var(v) => f.write_str(&names.type_var(*v)),
        Type::Function(ft) => {
            if in_arrow_param {
                f.write_str("(")?;
            }
            write_type(f, &ft.param, names, true)?;
            if ft.effects.is_pure() {
                f.write_str(" -> ")?;
            } else {
                f.write_str(" -")?;
                write_row(f, &ft.effects, names)?;
                f.write_str("-> ")?;
            }
            write_type(f, &ft.ret, names, false)?;
            if in_arrow_param {
                f.write_str(")")?;
            }
            Ok(())
        }
        Type::Tuple(items) => {
            f.write_str("(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_type(f, item, names, false)?;
            }
            f.write_str(")")
        }
        Type::Named { name, args } => {
            f.write_str(name)?;
            if !args.is_empty() {
                f.write_str("<")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_type(f, arg, names, false)?;
                }
                f.write_str(">")?;
            }
            Ok(())
        }
        Type::Ref(kind, inner) => {
            f.write_str(kind.prefix())?;
            write_type(f, inner, names, true)
        }
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, row: &EffectRow, names: &VarNames) -> fmt::Result {
    f.write_str("[")?;
    for (i, label) in row.labels.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{label}")?;
    }
    if let Some(tail) = row.tail {
        if !row.labels.is_empty() {
            f.write_str(" | ")?;
        }
        f.write_str(&names.row_var(tail))?;
    }
    f.write_str("]")
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// Maps type variables and row variables to their resolved types/rows.
///
/// Both maps are arenas indexed by variable id: the pass that owns the
/// substitution allocates ids densely from zero with [`Substitution::fresh_type_var`]
/// and [`Substitution::fresh_row_var`]. Chains of variable-to-variable
/// bindings are compressed on [`Substitution::find`].
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    types: Vec<Option<Type>>,
    rows: Vec<Option<EffectRow>>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_type_var(&mut self) -> TypeVarId {
        let id = TypeVarId(self.types.len() as u32);
        self.types.push(None);
        id
    }

    pub fn fresh_row_var(&mut self) -> RowVarId {
        let id = RowVarId(self.rows.len() as u32);
        self.rows.push(None);
        id
    }

    pub fn type_var_count(&self) -> usize {
        self.types.len()
    }

    pub fn row_var_count(&self) -> usize {
        self.rows.len()
    }

    pub fn bind_type(&mut self, var: TypeVarId, ty: Type) {
        let index = var.0 as usize;
        if index >= self.types.len() {
            self.types.resize(index + 1, None);
        }
        self.types[index] = Some(ty);
    }

    pub fn bind_row(&mut self, var: RowVarId, row: EffectRow) {
        let index = var.0 as usize;
        if index >= self.rows.len() {
            self.rows.resize(index + 1, None);
        }
        self.rows[index] = Some(row);
    }

    pub fn lookup_type(&self, var: TypeVarId) -> Option<&Type> {
        self.types.get(var.0 as usize).and_then(Option::as_ref)
    }

    pub fn lookup_row(&self, var: RowVarId) -> Option<&EffectRow> {
        self.rows.get(var.0 as usize).and_then(Option::as_ref)
    }

    /// Resolve the head of `ty` through variable chains, compressing paths.
    ///
    /// The result is either an unbound variable or a non-variable type whose
    /// children may still mention bound variables.
    pub fn find(&mut self, ty: &Type) -> Type {
        let Type::Var(start) = ty else {
            return ty.clone();
        };
        let mut chain = Vec::new();
        let mut current = *start;
        let resolved = loop {
            match self.lookup_type(current) {
                Some(Type::Var(next)) => {
                    chain.push(current);
                    current = *next;
                }
                Some(other) => {
                    chain.push(current);
                    break other.clone();
                }
                None => break Type::Var(current),
            }
        };
        // Every variable on the chain now points directly at the end.
        for var in chain {
            self.types[var.0 as usize] = Some(resolved.clone());
        }
        resolved
    }

    /// Resolve a row's tail through bound row variables, merging labels.
    pub fn find_row(&self, row: &EffectRow) -> EffectRow {
        let mut labels = row.labels.clone();
        let mut tail = row.tail;
        while let Some(var) = tail {
            match self.lookup_row(var) {
                Some(bound) => {
                    labels.extend(bound.labels.iter().cloned());
                    tail = bound.tail;
                }
                None => break,
            }
        }
        EffectRow { labels, tail }
    }

    /// Apply this substitution to a type, replacing all bound variables.
    pub fn apply(&self, ty: &Type) -> Type {
        match ty {
            Type::Var(v) => match self.lookup_type(*v) {
                Some(resolved) => self.apply(resolved),
                None => ty.clone(),
            },
            Type::Function(ft) => Type::Function(FunctionType {
                param: Box::new(self.apply(&ft.param)),
                ret: Box::new(self.apply(&ft.ret)),
                effects: self.find_row(&ft.effects),
            }),
            Type::Tuple(items) => Type::Tuple(items.iter().map(|t| self.apply(t)).collect()),
            Type::Named { name, args } => Type::Named {
                name: name.clone(),
                args: args.iter().map(|t| self.apply(t)).collect(),
            },
            Type::Ref(kind, inner) => Type::Ref(*kind, Box::new(self.apply(inner))),
            Type::Prim(_) | Type::String | Type::Unit | Type::Error => ty.clone(),
        }
    }

    pub fn apply_row(&self, row: &EffectRow) -> EffectRow {
        self.find_row(row)
    }

    pub fn apply_scheme(&self, scheme: &TypeScheme) -> TypeScheme {
        TypeScheme {
            type_vars: scheme.type_vars.clone(),
            row_vars: scheme.row_vars.clone(),
            bounds: scheme.bounds.clone(),
            ty: self.apply(&scheme.ty),
        }
    }
}
