//! Counter-examples for non-exhaustive matches.
//!
//! A witness is read off a path through the decision tree that ends in
//! `Fail`: each switch on the way fixes the constructor at one occurrence,
//! and every occurrence the path leaves open is a wildcard.

use lifesharp_hir::{Constructor, DecisionTree, LitKey, Occurrence, Witness};
use lifesharp_types::{NO_MATCH_VARIANT, Type};

use crate::matrix::Shapes;

type Path = Vec<(Occurrence, Constructor)>;

/// A value no arm covers, if the tree can fail.
pub(crate) fn uncovered(shapes: Shapes<'_>, tree: &DecisionTree, scrutinee: &Type) -> Option<Witness> {
    let finder = Finder { shapes, scrutinee };
    let path = finder.fail_path(tree, &mut Vec::new())?;
    Some(finder.build(&Occurrence::Root, scrutinee, &path))
}

/// The partial active pattern whose `NoMatch` case `witness` relies on.
pub(crate) fn unmatched_pattern(witness: &Witness) -> Option<&str> {
    match witness {
        Witness::Active { pattern, case, .. } if case == NO_MATCH_VARIANT => Some(pattern.as_str()),
        Witness::Active { args, .. } | Witness::Variant { args, .. } => {
            args.iter().find_map(unmatched_pattern)
        }
        Witness::Tuple { items } => items.iter().find_map(unmatched_pattern),
        Witness::Wildcard | Witness::Literal { .. } => None,
    }
}

struct Finder<'a> {
    shapes: Shapes<'a>,
    scrutinee: &'a Type,
}

impl Finder<'_> {
    fn fail_path(&self, tree: &DecisionTree, path: &mut Path) -> Option<Path> {
        match tree {
            DecisionTree::Fail => Some(path.clone()),
            DecisionTree::Leaf { .. } => None,
            DecisionTree::Guard { otherwise, .. } => self.fail_path(otherwise, path),
            DecisionTree::Switch {
                occurrence,
                cases,
                default,
            } => {
                for (ctor, subtree) in cases {
                    path.push((occurrence.clone(), ctor.clone()));
                    let found = self.fail_path(subtree, path);
                    path.pop();
                    if found.is_some() {
                        return found;
                    }
                }
                let subtree = default.as_deref()?;
                let ty = self.type_at(occurrence, path);
                let listed: Vec<&Constructor> = cases.iter().map(|(ctor, _)| ctor).collect();
                let missing = self.missing(&ty, &listed);
                if let Some(ctor) = &missing {
                    path.push((occurrence.clone(), ctor.clone()));
                }
                let found = self.fail_path(subtree, path);
                if missing.is_some() {
                    path.pop();
                }
                found
            }
        }
    }

    /// A constructor of `ty` that no listed case tests for.
    fn missing(&self, ty: &Type, listed: &[&Constructor]) -> Option<Constructor> {
        if let Some(all) = self.shapes.signature(ty) {
            return all.into_iter().find(|ctor| !listed.contains(&ctor));
        }
        // Non-negative values first, then negative ones nearest zero.
        let (min, max) = match ty {
            Type::Prim(prim) => prim.int_range()?,
            _ => return None,
        };
        (0..=max)
            .chain((min..0).rev())
            .map(|n| Constructor::Literal {
                value: LitKey::Int(n),
            })
            .find(|ctor| !listed.contains(&ctor))
    }

    fn type_at(&self, occurrence: &Occurrence, path: &Path) -> Type {
        match occurrence {
            Occurrence::Root => self.scrutinee.clone(),
            Occurrence::Active { pattern, .. } => Type::named(pattern.clone(), Vec::new()),
            Occurrence::Field { parent, index } => {
                let parent_ty = self.type_at(parent, path);
                let ctor = match &parent_ty {
                    Type::Tuple(items) => Constructor::Tuple { arity: items.len() },
                    _ => match lookup(path, parent) {
                        Some(ctor) => ctor.clone(),
                        None => return Type::Error,
                    },
                };
                self.shapes
                    .field_types(&parent_ty, &ctor)
                    .get(*index)
                    .cloned()
                    .unwrap_or(Type::Error)
            }
        }
    }

    fn build(&self, occurrence: &Occurrence, ty: &Type, path: &Path) -> Witness {
        let ctor = match lookup(path, occurrence) {
            Some(ctor) => ctor.clone(),
            None => match ty {
                Type::Tuple(items) => Constructor::Tuple { arity: items.len() },
                _ => return self.classified(occurrence, path),
            },
        };
        let fields = self.shapes.field_types(ty, &ctor);
        let args: Vec<Witness> = fields
            .iter()
            .enumerate()
            .map(|(index, field)| self.build(&occurrence.field(index), field, path))
            .collect();
        match ctor {
            Constructor::Literal { value } => Witness::Literal { value },
            Constructor::Tuple { .. } => Witness::Tuple { items: args },
            Constructor::Variant { name, .. } => match occurrence {
                Occurrence::Active { pattern, .. } => Witness::Active {
                    pattern: pattern.clone(),
                    case: name,
                    args,
                },
                _ => Witness::Variant { name, args },
            },
        }
    }

    /// A value only constrained by how an active pattern classifies it.
    fn classified(&self, occurrence: &Occurrence, path: &Path) -> Witness {
        let applied = path.iter().find_map(|(occ, _)| match occ {
            Occurrence::Active { parent, pattern } if **parent == *occurrence => {
                Some((occ, pattern))
            }
            _ => None,
        });
        match applied {
            Some((occ, pattern)) => self.build(occ, &Type::named(pattern.clone(), Vec::new()), path),
            None => Witness::Wildcard,
        }
    }
}

fn lookup<'p>(path: &'p Path, occurrence: &Occurrence) -> Option<&'p Constructor> {
    path.iter()
        .rev()
        .find(|(occ, _)| occ == occurrence)
        .map(|(_, ctor)| ctor)
}
