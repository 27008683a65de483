//! The LifeSharp diagnostics taxonomy.
//!
//! Each [`Category`] has a stable code and belongs to one stage: inference
//! (mismatches, unbound names, occurs check, effect rows), ownership (moves,
//! dangling and conflicting borrows, aliased mutation), patterns
//! (exhaustiveness and reachability) or the declaration pre-pass. A
//! [`Diagnostic`] points at a primary span and labels the other positions
//! involved, such as where a value was moved or where a borrow is used later.
//!
//! Every stage returns diagnostics as data. Types in messages are printed
//! after substitution, with variables renamed to `a`, `b`, ...

use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Diagnostic severity and categories
// ---------------------------------------------------------------------------

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Which stage of the semantic core a category belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Declaration,
    Type,
    Effect,
    Ownership,
    Pattern,
}

/// Broad category for diagnostics. Used for filtering and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Two types that must be equal have different shapes.
    TypeMismatch,
    /// A referenced name is not bound in scope.
    UnboundName,
    /// Unification would build an infinite type.
    OccursCheckFailure,
    /// A declared effect row does not cover the effects of the body.
    EffectMismatch,
    /// An owned binding is used after it was moved.
    UseAfterMove,
    /// A borrow outlives the storage it points into.
    DanglingBorrow,
    /// Mutation through a shared borrow.
    AliasedMutation,
    /// Two borrows (or a borrow and a use) of one binding overlap.
    ConflictingBorrow,
    /// A non-copy value is moved out from behind a reference.
    MoveOutOfBorrow,
    /// Some value of the scrutinee type is matched by no arm.
    NonExhaustiveMatch,
    /// An arm can never be selected.
    UnreachableArm,
    /// A name is declared more than once in one module.
    DuplicateDefinition,
    /// A declared name is not a valid identifier.
    InvalidIdentifier,
    /// An active pattern declaration is malformed.
    InvalidActivePattern,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::TypeMismatch,
        Category::UnboundName,
        Category::OccursCheckFailure,
        Category::EffectMismatch,
        Category::UseAfterMove,
        Category::DanglingBorrow,
        Category::AliasedMutation,
        Category::ConflictingBorrow,
        Category::MoveOutOfBorrow,
        Category::NonExhaustiveMatch,
        Category::UnreachableArm,
        Category::DuplicateDefinition,
        Category::InvalidIdentifier,
        Category::InvalidActivePattern,
    ];

    pub fn all() -> &'static [Category] {
        &Self::ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::TypeMismatch => "type_mismatch",
            Category::UnboundName => "unbound_name",
            Category::OccursCheckFailure => "occurs_check_failure",
            Category::EffectMismatch => "effect_mismatch",
            Category::UseAfterMove => "use_after_move",
            Category::DanglingBorrow => "dangling_borrow",
            Category::AliasedMutation => "aliased_mutation",
            Category::ConflictingBorrow => "conflicting_borrow",
            Category::MoveOutOfBorrow => "move_out_of_borrow",
            Category::NonExhaustiveMatch => "non_exhaustive_match",
            Category::UnreachableArm => "unreachable_arm",
            Category::DuplicateDefinition => "duplicate_definition",
            Category::InvalidIdentifier => "invalid_identifier",
            Category::InvalidActivePattern => "invalid_active_pattern",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Category::TypeMismatch => "E0101",
            Category::UnboundName => "E0102",
            Category::OccursCheckFailure => "E0103",
            Category::EffectMismatch => "E0201",
            Category::UseAfterMove => "E0301",
            Category::DanglingBorrow => "E0302",
            Category::AliasedMutation => "E0303",
            Category::ConflictingBorrow => "E0304",
            Category::MoveOutOfBorrow => "E0305",
            Category::NonExhaustiveMatch => "E0401",
            Category::UnreachableArm => "W0402",
            Category::DuplicateDefinition => "E0001",
            Category::InvalidIdentifier => "E0002",
            Category::InvalidActivePattern => "E0003",
        }
    }

    pub fn stage(self) -> Stage {
        match self {
            Category::TypeMismatch | Category::UnboundName | Category::OccursCheckFailure => {
                Stage::Type
            }
            Category::EffectMismatch => Stage::Effect,
            Category::UseAfterMove
            | Category::DanglingBorrow
            | Category::AliasedMutation
            | Category::ConflictingBorrow
            | Category::MoveOutOfBorrow => Stage::Ownership,
            Category::NonExhaustiveMatch | Category::UnreachableArm => Stage::Pattern,
            Category::DuplicateDefinition
            | Category::InvalidIdentifier
            | Category::InvalidActivePattern => Stage::Declaration,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::TypeMismatch => "Two types required to be equal have different shapes.",
            Category::UnboundName => "A referenced variable, function, or constructor is undefined.",
            Category::OccursCheckFailure => "A type would have to contain itself.",
            Category::EffectMismatch => {
                "A function performs an effect missing from its declared effect row."
            }
            Category::UseAfterMove => "An owned value is used after it has been moved.",
            Category::DanglingBorrow => "A borrow outlives the storage it points into.",
            Category::AliasedMutation => "A value is mutated through a shared borrow.",
            Category::ConflictingBorrow => {
                "A borrow overlaps with a unique borrow, a move, or a mutation of the same binding."
            }
            Category::MoveOutOfBorrow => "A non-copy value is moved out from behind a reference.",
            Category::NonExhaustiveMatch => "Pattern matching is missing one or more cases.",
            Category::UnreachableArm => "A match arm is fully covered by earlier arms.",
            Category::DuplicateDefinition => "A name is declared more than once.",
            Category::InvalidIdentifier => "A declared name is not a valid identifier.",
            Category::InvalidActivePattern => "An active pattern declaration is malformed.",
        }
    }

    pub fn example_fix(self) -> &'static str {
        match self {
            Category::TypeMismatch => "Adjust the expression or annotation so both types agree.",
            Category::UnboundName => "Define or import the missing name, or fix the spelling.",
            Category::OccursCheckFailure => {
                "Break the self-reference, usually by introducing an algebraic type."
            }
            Category::EffectMismatch => "Add the missing effect label to the declared row.",
            Category::UseAfterMove => "Borrow the value instead of moving it, or clone it first.",
            Category::DanglingBorrow => {
                "Return or store an owned value instead of a borrow of a local."
            }
            Category::AliasedMutation => "Take a unique borrow (`&mut`) to mutate.",
            Category::ConflictingBorrow => {
                "End the earlier borrow before taking the new one, or restructure the uses."
            }
            Category::MoveOutOfBorrow => "Copy or clone the value instead of moving it.",
            Category::NonExhaustiveMatch => "Add a wildcard or the missing pattern arms.",
            Category::UnreachableArm => "Remove the arm or reorder it before the covering arm.",
            Category::DuplicateDefinition => "Rename or remove one of the declarations.",
            Category::InvalidIdentifier => "Use letters, digits and `_`, not starting with a digit.",
            Category::InvalidActivePattern => "Declare at least one uniquely named case.",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Source locations (independent of lifesharp-ast's Span)
// ---------------------------------------------------------------------------

/// A source location for diagnostics.
///
/// Uses byte offsets. Callers convert from `lifesharp-ast` spans to this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceLocation {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Stable diagnostic code (e.g. E0101).
    pub code: String,
    pub severity: Severity,
    pub category: Category,
    /// Primary message: what went wrong.
    pub message: String,
    /// Where it went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Additional labeled spans (e.g., "value moved here").
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<DiagLabel>,
    /// Suggested fix, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

/// A labeled source span within a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagLabel {
    pub location: SourceLocation,
    pub message: String,
}

impl Diagnostic {
    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, message)
    }

    pub fn warning(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, message)
    }

    fn new(severity: Severity, category: Category, message: impl Into<String>) -> Self {
        Self {
            code: category.code().to_string(),
            severity,
            category,
            message: message.into(),
            location: None,
            labels: Vec::new(),
            help: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_label(mut self, location: SourceLocation, message: impl Into<String>) -> Self {
        self.labels.push(DiagLabel {
            location,
            message: message.into(),
        });
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Promote a warning to an error (used by `deny_warnings`).
    pub fn into_error(mut self) -> Self {
        self.severity = Severity::Error;
        self
    }

    /// Every location this diagnostic refers to, primary first.
    pub fn positions(&self) -> Vec<SourceLocation> {
        self.location
            .into_iter()
            .chain(self.labels.iter().map(|label| label.location))
            .collect()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        write!(f, "{prefix}[{}]: {}", self.code, self.message)?;
        for label in &self.labels {
            write!(
                f,
                "\n  note: {} ({}..{})",
                label.message, label.location.start, label.location.end
            )?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

/// Order diagnostics by primary position, keeping insertion order for ties.
pub fn sort_by_position(diags: &mut [Diagnostic]) {
    diags.sort_by_key(|d| d.location.map(|loc| (loc.file_id, loc.start, loc.end)));
}

// ---------------------------------------------------------------------------
// Error type for crates that produce diagnostics
// ---------------------------------------------------------------------------

/// Error type wrapping one or more diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", .0.first().map(|d| d.to_string()).unwrap_or_default())]
pub struct DiagnosticError(pub Vec<Diagnostic>);

impl DiagnosticError {
    pub fn single(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }

    pub fn multiple(diags: Vec<Diagnostic>) -> Self {
        Self(diags)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(start: u32, end: u32) -> SourceLocation {
        SourceLocation {
            file_id: 0,
            start,
            end,
        }
    }

    #[test]
    fn diagnostic_builder() {
        let diag = Diagnostic::error(Category::UseAfterMove, "use of moved value `xs`")
            .at(loc(30, 32))
            .with_label(loc(10, 12), "value moved here")
            .with_help("borrow `xs` instead");

        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.code, "E0301");
        assert_eq!(diag.category, Category::UseAfterMove);
        assert_eq!(diag.positions(), vec![loc(30, 32), loc(10, 12)]);
        assert!(diag.help.unwrap().contains("borrow"));
    }

    #[test]
    fn diagnostic_display() {
        let diag = Diagnostic::error(Category::TypeMismatch, "expected `s32`, got `bool`");
        insta::assert_snapshot!(diag.to_string(), @"error[E0101]: expected `s32`, got `bool`");
    }

    #[test]
    fn unreachable_arm_is_a_warning_category() {
        let diag = Diagnostic::warning(Category::UnreachableArm, "arm 2 is unreachable");
        assert!(!diag.is_error());
        assert!(diag.clone().into_error().is_error());
        assert_eq!(Category::UnreachableArm.stage(), Stage::Pattern);
    }

    #[test]
    fn category_metadata_is_stable_and_unique() {
        let mut codes = std::collections::BTreeSet::new();
        for cat in Category::all() {
            assert!(!cat.as_str().is_empty());
            assert!(!cat.description().is_empty());
            assert!(!cat.example_fix().is_empty());
            assert!(
                codes.insert(cat.code()),
                "duplicate diagnostic code detected: {}",
                cat.code()
            );
        }
    }

    #[test]
    fn diagnostics_serialize_without_empty_fields() {
        let diag = Diagnostic::error(Category::UnboundName, "unbound name `y`").at(loc(3, 4));
        let json = serde_json::to_value(&diag).expect("diagnostic serializes");
        assert_eq!(json["category"], "unbound_name");
        assert_eq!(json["location"]["start"], 3);
        assert!(json.get("labels").is_none());
        assert!(json.get("help").is_none());
    }

    #[test]
    fn sort_by_position_orders_primary_locations() {
        let mut diags = vec![
            Diagnostic::error(Category::TypeMismatch, "second").at(loc(20, 21)),
            Diagnostic::error(Category::TypeMismatch, "first").at(loc(5, 6)),
        ];
        sort_by_position(&mut diags);
        assert_eq!(diags[0].message, "first");
    }
}
