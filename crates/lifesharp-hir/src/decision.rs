//! Decision trees produced by the pattern compiler.

use std::collections::BTreeSet;
use std::fmt;

use lifesharp_ast::Lit;
use lifesharp_types::NO_MATCH_VARIANT;
use serde::Serialize;

/// A path from the scrutinee to the value a switch inspects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Occurrence {
    Root,
    /// Field `index` of a tuple or of the variant matched at `parent`.
    Field { parent: Box<Occurrence>, index: usize },
    /// The result of applying active pattern `pattern` to `parent`.
    Active {
        parent: Box<Occurrence>,
        pattern: String,
    },
}

impl Occurrence {
    pub fn field(&self, index: usize) -> Occurrence {
        Occurrence::Field {
            parent: Box::new(self.clone()),
            index,
        }
    }

    pub fn active(&self, pattern: &str) -> Occurrence {
        Occurrence::Active {
            parent: Box::new(self.clone()),
            pattern: pattern.to_string(),
        }
    }
}

impl fmt::Display for Occurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Occurrence::Root => f.write_str("$"),
            Occurrence::Field { parent, index } => write!(f, "{parent}.{index}"),
            Occurrence::Active { parent, pattern } => write!(f, "{pattern}({parent})"),
        }
    }
}

/// A literal usable as a switch key.
///
/// Floats are keyed by their printed form so keys stay totally ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LitKey {
    Unit,
    Bool(bool),
    Int(i64),
    Float(String),
    String(String),
}

impl LitKey {
    pub fn from_lit(lit: &Lit) -> LitKey {
        match lit {
            Lit::Unit => LitKey::Unit,
            Lit::Bool(b) => LitKey::Bool(*b),
            Lit::Int(n) => LitKey::Int(*n),
            Lit::Float(x) => LitKey::Float(x.to_string()),
            Lit::String(s) => LitKey::String(s.clone()),
        }
    }
}

impl fmt::Display for LitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LitKey::Unit => f.write_str("()"),
            LitKey::Bool(b) => write!(f, "{b}"),
            LitKey::Int(n) => write!(f, "{n}"),
            LitKey::Float(x) => f.write_str(x),
            LitKey::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// What a switch case tests for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constructor {
    /// A variant of `type_name`. Active pattern cases are variants of the
    /// pattern's result type.
    Variant {
        type_name: String,
        name: String,
        arity: usize,
    },
    Tuple { arity: usize },
    Literal { value: LitKey },
}

impl Constructor {
    pub fn arity(&self) -> usize {
        match self {
            Constructor::Variant { arity, .. } | Constructor::Tuple { arity } => *arity,
            Constructor::Literal { .. } => 0,
        }
    }
}

impl fmt::Display for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constructor::Variant { name, .. } => f.write_str(name),
            Constructor::Tuple { arity } => write!(f, "tuple/{arity}"),
            Constructor::Literal { value } => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum DecisionTree {
    /// Arm `arm` matches; bind each name to the value at its occurrence.
    Leaf {
        arm: usize,
        bindings: Vec<(String, Occurrence)>,
    },
    /// Bind, evaluate arm `arm`'s guard, and continue with `otherwise` if false.
    Guard {
        arm: usize,
        bindings: Vec<(String, Occurrence)>,
        otherwise: Box<DecisionTree>,
    },
    /// Inspect the value at `occurrence`. Cases are tried in order; `default`
    /// covers every constructor not listed.
    Switch {
        occurrence: Occurrence,
        cases: Vec<(Constructor, DecisionTree)>,
        default: Option<Box<DecisionTree>>,
    },
    /// No arm matches.
    Fail,
}

impl DecisionTree {
    /// Arms that some path through the tree selects or guards on.
    pub fn reachable_arms(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        self.collect_arms(&mut out);
        out
    }

    fn collect_arms(&self, out: &mut BTreeSet<usize>) {
        match self {
            DecisionTree::Leaf { arm, .. } => {
                out.insert(*arm);
            }
            DecisionTree::Guard { arm, otherwise, .. } => {
                out.insert(*arm);
                otherwise.collect_arms(out);
            }
            DecisionTree::Switch { cases, default, .. } => {
                for (_, tree) in cases {
                    tree.collect_arms(out);
                }
                if let Some(tree) = default {
                    tree.collect_arms(out);
                }
            }
            DecisionTree::Fail => {}
        }
    }

    pub fn can_fail(&self) -> bool {
        match self {
            DecisionTree::Fail => true,
            DecisionTree::Leaf { .. } => false,
            DecisionTree::Guard { otherwise, .. } => otherwise.can_fail(),
            DecisionTree::Switch { cases, default, .. } => {
                cases.iter().any(|(_, tree)| tree.can_fail())
                    || default.as_ref().is_some_and(|tree| tree.can_fail())
            }
        }
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = " ".repeat(indent);
        match self {
            DecisionTree::Leaf { arm, bindings } => {
                write!(f, "{pad}arm {arm}")?;
                write_bindings(f, bindings)?;
                writeln!(f)
            }
            DecisionTree::Guard {
                arm,
                bindings,
                otherwise,
            } => {
                write!(f, "{pad}guard arm {arm}")?;
                write_bindings(f, bindings)?;
                writeln!(f)?;
                writeln!(f, "{pad}else:")?;
                otherwise.write_indented(f, indent + 2)
            }
            DecisionTree::Switch {
                occurrence,
                cases,
                default,
            } => {
                writeln!(f, "{pad}switch {occurrence}")?;
                for (ctor, tree) in cases {
                    writeln!(f, "{pad}  case {ctor}:")?;
                    tree.write_indented(f, indent + 4)?;
                }
                if let Some(tree) = default {
                    writeln!(f, "{pad}  default:")?;
                    tree.write_indented(f, indent + 4)?;
                }
                Ok(())
            }
            DecisionTree::Fail => writeln!(f, "{pad}fail"),
        }
    }
}

fn write_bindings(f: &mut fmt::Formatter<'_>, bindings: &[(String, Occurrence)]) -> fmt::Result {
    if bindings.is_empty() {
        return Ok(());
    }
    f.write_str(" (")?;
    for (i, (name, occurrence)) in bindings.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{name} = {occurrence}")?;
    }
    f.write_str(")")
}

impl fmt::Display for DecisionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// A value no arm of a match covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Witness {
    Wildcard,
    Literal { value: LitKey },
    Tuple { items: Vec<Witness> },
    Variant { name: String, args: Vec<Witness> },
    /// A value that active pattern `pattern` classifies as `case`.
    Active {
        pattern: String,
        case: String,
        args: Vec<Witness>,
    },
}

impl Witness {
    fn is_atomic(&self) -> bool {
        match self {
            Witness::Variant { args, .. } | Witness::Active { args, .. } => args.is_empty(),
            _ => true,
        }
    }

    fn write_arg(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_atomic() {
            write!(f, " {self}")
        } else {
            write!(f, " ({self})")
        }
    }
}

impl fmt::Display for Witness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Witness::Wildcard => f.write_str("_"),
            Witness::Literal { value } => write!(f, "{value}"),
            Witness::Tuple { items } => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Witness::Variant { name, args } => {
                f.write_str(name)?;
                args.iter().try_for_each(|arg| arg.write_arg(f))
            }
            Witness::Active { pattern, case, .. } if case == NO_MATCH_VARIANT => {
                write!(f, "_ (not matched by {pattern})")
            }
            Witness::Active { case, args, .. } => {
                f.write_str(case)?;
                args.iter().try_for_each(|arg| arg.write_arg(f))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_case(name: &str, arm: usize) -> (Constructor, DecisionTree) {
        (
            Constructor::Variant {
                type_name: "Sign".into(),
                name: name.into(),
                arity: 0,
            },
            DecisionTree::Leaf {
                arm,
                bindings: vec![],
            },
        )
    }

    #[test]
    fn tree_display() {
        let tree = DecisionTree::Switch {
            occurrence: Occurrence::Root.active("Sign"),
            cases: vec![sign_case("Zero", 0), sign_case("Positive", 1)],
            default: Some(Box::new(DecisionTree::Guard {
                arm: 2,
                bindings: vec![("n".into(), Occurrence::Root)],
                otherwise: Box::new(DecisionTree::Fail),
            })),
        };
        insta::assert_snapshot!(tree.to_string().trim_end(), @r"
        switch Sign($)
          case Zero:
            arm 0
          case Positive:
            arm 1
          default:
            guard arm 2 (n = $)
            else:
              fail
        ");
        assert!(tree.can_fail());
        assert_eq!(tree.reachable_arms(), BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn witness_display() {
        let witness = Witness::Tuple {
            items: vec![
                Witness::Variant {
                    name: "Some".into(),
                    args: vec![Witness::Variant {
                        name: "Cons".into(),
                        args: vec![Witness::Wildcard, Witness::Wildcard],
                    }],
                },
                Witness::Literal {
                    value: LitKey::Int(3),
                },
            ],
        };
        assert_eq!(witness.to_string(), "(Some (Cons _ _), 3)");
        let negative = Witness::Active {
            pattern: "Sign".into(),
            case: "Negative".into(),
            args: vec![],
        };
        assert_eq!(negative.to_string(), "Negative");
        let unmatched = Witness::Active {
            pattern: "Even".into(),
            case: NO_MATCH_VARIANT.into(),
            args: vec![],
        };
        assert_eq!(unmatched.to_string(), "_ (not matched by Even)");
    }

    #[test]
    fn occurrence_paths() {
        let occ = Occurrence::Root.field(1).active("Parity").field(0);
        assert_eq!(occ.to_string(), "Parity($.1).0");
    }

    #[test]
    fn float_keys_normalize() {
        assert_eq!(
            LitKey::from_lit(&Lit::Float(1.0)),
            LitKey::from_lit(&Lit::Float(1.00))
        );
    }
}
