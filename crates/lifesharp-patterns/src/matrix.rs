//! Clause-matrix compilation of a match to a decision tree.
//!
//! Each row is an arm; each column is a value reachable from the scrutinee
//! (its occurrence). Compilation repeatedly picks the first column in which
//! the first row tests something, then either expands an active pattern in
//! that column into a new column holding its result, or switches on the
//! column's constructors and specializes the matrix for each.

use lifesharp_hir::{Constructor, DecisionTree, HirArm, HirPattern, HirPatternKind, LitKey, Occurrence};
use lifesharp_types::{Primitive, Registries, Type};

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Pat {
    /// Matches anything, binding it when named.
    Wild(Option<String>),
    Ctor(Constructor, Vec<Pat>),
    Active {
        pattern: String,
        case: String,
        args: Vec<Pat>,
    },
}

impl Pat {
    pub(crate) fn from_hir(pattern: &HirPattern) -> Pat {
        match &pattern.kind {
            HirPatternKind::Wildcard => Pat::Wild(None),
            HirPatternKind::Binding { name, .. } => Pat::Wild(Some(name.clone())),
            HirPatternKind::Lit(lit) => Pat::Ctor(
                Constructor::Literal {
                    value: LitKey::from_lit(lit),
                },
                Vec::new(),
            ),
            HirPatternKind::Tuple(items) => Pat::Ctor(
                Constructor::Tuple { arity: items.len() },
                items.iter().map(Pat::from_hir).collect(),
            ),
            HirPatternKind::Variant {
                type_name,
                variant,
                args,
            } => Pat::Ctor(
                Constructor::Variant {
                    type_name: type_name.clone(),
                    name: variant.clone(),
                    arity: args.len(),
                },
                args.iter().map(Pat::from_hir).collect(),
            ),
            HirPatternKind::Active {
                pattern,
                case,
                args,
            } => Pat::Active {
                pattern: pattern.clone(),
                case: case.clone(),
                args: args.iter().map(Pat::from_hir).collect(),
            },
        }
    }

    fn is_wild(&self) -> bool {
        matches!(self, Pat::Wild(_))
    }
}

// ---------------------------------------------------------------------------
// Type shapes
// ---------------------------------------------------------------------------

/// Constructor sets and field types, resolved against the registries.
#[derive(Clone, Copy)]
pub(crate) struct Shapes<'r> {
    pub(crate) registries: &'r Registries,
}

impl Shapes<'_> {
    /// Every constructor of `ty`, in declaration order, when the set is
    /// finite. `None` for integers, strings, functions and the like.
    pub(crate) fn signature(&self, ty: &Type) -> Option<Vec<Constructor>> {
        match ty {
            Type::Prim(Primitive::Bool) => Some(vec![
                Constructor::Literal {
                    value: LitKey::Bool(true),
                },
                Constructor::Literal {
                    value: LitKey::Bool(false),
                },
            ]),
            Type::Unit => Some(vec![Constructor::Literal {
                value: LitKey::Unit,
            }]),
            Type::Tuple(items) => Some(vec![Constructor::Tuple { arity: items.len() }]),
            Type::Named { name, .. } => {
                let def = self.registries.types.get(name)?;
                Some(
                    def.variants
                        .iter()
                        .map(|variant| Constructor::Variant {
                            type_name: def.name.clone(),
                            name: variant.name.clone(),
                            arity: variant.fields.len(),
                        })
                        .collect(),
                )
            }
            _ => None,
        }
    }

    /// Types of the fields `ctor` exposes on a value of type `ty`.
    pub(crate) fn field_types(&self, ty: &Type, ctor: &Constructor) -> Vec<Type> {
        match ctor {
            Constructor::Literal { .. } => Vec::new(),
            Constructor::Tuple { arity } => match ty {
                Type::Tuple(items) if items.len() == *arity => items.clone(),
                _ => vec![Type::Error; *arity],
            },
            Constructor::Variant {
                type_name,
                name,
                arity,
            } => {
                let Some(def) = self.registries.types.get(type_name) else {
                    return vec![Type::Error; *arity];
                };
                let Some(variant) = def.variant(name) else {
                    return vec![Type::Error; *arity];
                };
                let args = match ty {
                    Type::Named { name, args } if name == type_name => args.clone(),
                    _ => vec![Type::Error; def.params.len()],
                };
                def.instantiate_fields(variant, &args)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Column {
    occurrence: Occurrence,
    ty: Type,
}

#[derive(Debug, Clone)]
struct Row {
    pats: Vec<Pat>,
    arm: usize,
    guarded: bool,
    bindings: Vec<(String, Occurrence)>,
}

#[derive(Debug, Clone)]
struct Matrix {
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl Matrix {
    /// Move names bound by wildcard cells into their rows' bindings.
    fn bind_names(&mut self) {
        for row in &mut self.rows {
            for (pat, column) in row.pats.iter_mut().zip(&self.columns) {
                if let Pat::Wild(name) = pat
                    && let Some(name) = name.take()
                {
                    row.bindings.push((name, column.occurrence.clone()));
                }
            }
        }
    }

    /// The first active pattern applied in column `col`, in row order.
    fn active_in(&self, col: usize) -> Option<String> {
        self.rows.iter().find_map(|row| match &row.pats[col] {
            Pat::Active { pattern, .. } => Some(pattern.clone()),
            _ => None,
        })
    }

    /// Constructors tested in column `col`, in order of first appearance.
    fn heads(&self, col: usize) -> Vec<Constructor> {
        let mut heads: Vec<Constructor> = Vec::new();
        for row in &self.rows {
            if let Pat::Ctor(ctor, _) = &row.pats[col]
                && !heads.contains(ctor)
            {
                heads.push(ctor.clone());
            }
        }
        heads
    }

    /// Rows that match constructor `ctor` in column `col`, with the column
    /// replaced by the constructor's fields.
    fn specialize(&self, col: usize, ctor: &Constructor, fields: Vec<Type>) -> Matrix {
        let arity = fields.len();
        let parent = &self.columns[col].occurrence;
        let replacement: Vec<Column> = fields
            .into_iter()
            .enumerate()
            .map(|(index, ty)| Column {
                occurrence: parent.field(index),
                ty,
            })
            .collect();
        let rows = self
            .rows
            .iter()
            .filter_map(|row| {
                let cells = match &row.pats[col] {
                    Pat::Ctor(head, args) if head == ctor => args.clone(),
                    Pat::Ctor(..) => return None,
                    Pat::Wild(_) => vec![Pat::Wild(None); arity],
                    // Active patterns are expanded before a column is switched on.
                    Pat::Active { .. } => return None,
                };
                Some(Row {
                    pats: splice(&row.pats, col, cells),
                    ..row.clone()
                })
            })
            .collect();
        Matrix {
            columns: splice(&self.columns, col, replacement),
            rows,
        }
    }

    /// Rows that match any constructor not listed in a switch on `col`.
    fn default(&self, col: usize) -> Matrix {
        let rows = self
            .rows
            .iter()
            .filter(|row| row.pats[col].is_wild())
            .map(|row| Row {
                pats: splice(&row.pats, col, Vec::new()),
                ..row.clone()
            })
            .collect();
        Matrix {
            columns: splice(&self.columns, col, Vec::new()),
            rows,
        }
    }

    /// Add a column holding the result of `pattern` applied to column
    /// `col`; every application of `pattern` in `col` moves there.
    fn expand_active(mut self, col: usize, pattern: &str) -> Matrix {
        let column = Column {
            occurrence: self.columns[col].occurrence.active(pattern),
            ty: Type::named(pattern, Vec::new()),
        };
        self.columns.insert(col + 1, column);
        for row in &mut self.rows {
            let cell = match &mut row.pats[col] {
                Pat::Active {
                    pattern: applied,
                    case,
                    args,
                } if applied.as_str() == pattern => {
                    let cell = Pat::Ctor(
                        Constructor::Variant {
                            type_name: pattern.to_string(),
                            name: case.clone(),
                            arity: args.len(),
                        },
                        std::mem::take(args),
                    );
                    row.pats[col] = Pat::Wild(None);
                    cell
                }
                _ => Pat::Wild(None),
            };
            row.pats.insert(col + 1, cell);
        }
        self
    }
}

fn splice<T: Clone>(items: &[T], at: usize, with: Vec<T>) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len() + with.len());
    out.extend_from_slice(&items[..at]);
    out.extend(with);
    out.extend_from_slice(&items[at + 1..]);
    out
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile the arms of a match over a value of type `scrutinee`.
///
/// Arms are tried in source order and the first match wins.
pub(crate) fn compile(shapes: Shapes<'_>, scrutinee: &Type, arms: &[HirArm]) -> DecisionTree {
    let matrix = Matrix {
        columns: vec![Column {
            occurrence: Occurrence::Root,
            ty: scrutinee.clone(),
        }],
        rows: arms
            .iter()
            .enumerate()
            .map(|(arm, hir)| Row {
                pats: vec![Pat::from_hir(&hir.pattern)],
                arm,
                guarded: hir.guard.is_some(),
                bindings: Vec::new(),
            })
            .collect(),
    };
    compile_matrix(shapes, matrix)
}

fn compile_matrix(shapes: Shapes<'_>, mut matrix: Matrix) -> DecisionTree {
    matrix.bind_names();
    let Some(first) = matrix.rows.first() else {
        return DecisionTree::Fail;
    };

    let Some(col) = first.pats.iter().position(|pat| !pat.is_wild()) else {
        let row = matrix.rows.remove(0);
        if !row.guarded {
            return DecisionTree::Leaf {
                arm: row.arm,
                bindings: row.bindings,
            };
        }
        return DecisionTree::Guard {
            arm: row.arm,
            bindings: row.bindings,
            otherwise: Box::new(compile_matrix(shapes, matrix)),
        };
    };

    if let Some(pattern) = matrix.active_in(col) {
        return compile_matrix(shapes, matrix.expand_active(col, &pattern));
    }

    let column = matrix.columns[col].clone();
    let heads = matrix.heads(col);

    // A tuple test always succeeds: decompose without a switch.
    if let [ctor @ Constructor::Tuple { .. }] = heads.as_slice() {
        let fields = shapes.field_types(&column.ty, ctor);
        return compile_matrix(shapes, matrix.specialize(col, ctor, fields));
    }

    let (listed, complete) = match shapes.signature(&column.ty) {
        Some(all) => {
            let complete = all.iter().all(|ctor| heads.contains(ctor));
            let listed = all.into_iter().filter(|ctor| heads.contains(ctor)).collect();
            (listed, complete)
        }
        None => (heads, false),
    };

    let cases = listed
        .into_iter()
        .map(|ctor| {
            let fields = shapes.field_types(&column.ty, &ctor);
            let subtree = compile_matrix(shapes, matrix.specialize(col, &ctor, fields));
            (ctor, subtree)
        })
        .collect();
    let default = (!complete).then(|| Box::new(compile_matrix(shapes, matrix.default(col))));

    DecisionTree::Switch {
        occurrence: column.occurrence,
        cases,
        default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifesharp_ast::{FileId, Lit, Span};
    use lifesharp_hir::{HirExpr, HirExprKind};
    use lifesharp_types::{EffectRow, SumTypeDef, TypeVarId, VariantDef};

    fn span() -> Span {
        Span::new(FileId(0), 0, 0)
    }

    fn pat(kind: HirPatternKind, ty: Type) -> HirPattern {
        HirPattern {
            kind,
            ty,
            span: span(),
        }
    }

    fn arm(pattern: HirPattern) -> HirArm {
        HirArm {
            pattern,
            guard: None,
            body: HirExpr::new(HirExprKind::Lit(Lit::Unit), Type::Unit, EffectRow::pure(), span()),
        }
    }

    fn option_registries() -> Registries {
        let mut registries = Registries::default();
        registries.types.insert(SumTypeDef {
            name: "Option".into(),
            params: vec![TypeVarId(0)],
            variants: vec![
                VariantDef {
                    name: "Some".into(),
                    fields: vec![Type::Var(TypeVarId(0))],
                },
                VariantDef {
                    name: "None".into(),
                    fields: vec![],
                },
            ],
        });
        registries
    }

    fn some(inner: HirPattern, ty: &Type) -> HirPattern {
        pat(
            HirPatternKind::Variant {
                type_name: "Option".into(),
                variant: "Some".into(),
                args: vec![inner],
            },
            ty.clone(),
        )
    }

    #[test]
    fn later_literal_duplicates_never_reach_a_leaf() {
        let registries = Registries::default();
        let one = || pat(HirPatternKind::Lit(Lit::Int(1)), Type::S32);
        let arms = vec![
            arm(one()),
            arm(pat(HirPatternKind::binding("n"), Type::S32)),
            arm(one()),
        ];
        let tree = compile(Shapes { registries: &registries }, &Type::S32, &arms);
        insta::assert_snapshot!(tree.to_string().trim_end(), @r"
        switch $
          case 1:
            arm 0
          default:
            arm 1 (n = $)
        ");
        assert!(!tree.can_fail());
    }

    #[test]
    fn nested_variants_bind_field_occurrences() {
        let registries = option_registries();
        let ty = Type::named("Option", vec![Type::S32]);
        let arms = vec![
            arm(some(pat(HirPatternKind::binding("x"), Type::S32), &ty)),
            arm(pat(HirPatternKind::Wildcard, ty.clone())),
        ];
        let tree = compile(Shapes { registries: &registries }, &ty, &arms);
        insta::assert_snapshot!(tree.to_string().trim_end(), @r"
        switch $
          case Some:
            arm 0 (x = $.0)
          default:
            arm 1
        ");
    }

    #[test]
    fn guarded_rows_fall_through() {
        let registries = Registries::default();
        let mut guarded = arm(pat(HirPatternKind::binding("n"), Type::S32));
        guarded.guard = Some(HirExpr::new(
            HirExprKind::Lit(Lit::Bool(true)),
            Type::BOOL,
            EffectRow::pure(),
            span(),
        ));
        let arms = vec![guarded, arm(pat(HirPatternKind::Wildcard, Type::S32))];
        let tree = compile(Shapes { registries: &registries }, &Type::S32, &arms);
        insta::assert_snapshot!(tree.to_string().trim_end(), @r"
        guard arm 0 (n = $)
        else:
          arm 1
        ");
    }
}
