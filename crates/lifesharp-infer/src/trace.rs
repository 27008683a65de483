//! Tracing types for compiler observability.
//!
//! These types capture step-by-step traces of unification and type inference
//! so that tooling can show how a type was reached. All tracing is opt-in via
//! `Unifier::enable_tracing()`; nothing is recorded when disabled.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Unification trace
// ---------------------------------------------------------------------------

/// A single step in a unification trace.
#[derive(Debug, Clone, Serialize)]
pub struct UnifyStep {
    pub step: usize,
    pub action: UnifyAction,
    pub left: String,
    pub right: String,
    pub detail: String,
}

/// What action was taken during a unification step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifyAction {
    /// Types are already identical; no-op.
    Identity,
    /// Structural recursion into compound types (e.g. `(A, B) ~ (C, D)`).
    Decompose,
    /// Type variable bound to a type (e.g. `t0 := s32`).
    Bind,
    /// Row variable bound to more labels (e.g. `e0 := [io | e1]`).
    BindRowVar,
    /// Both rows open: a fresh shared tail was created.
    RowDecompose,
    /// Occurs check fired; infinite type prevented.
    OccursCheck,
    /// Unification failed.
    Error,
}

// ---------------------------------------------------------------------------
// Inference trace
// ---------------------------------------------------------------------------

/// A single step in an inference trace.
#[derive(Debug, Clone, Serialize)]
pub struct InferStep {
    pub expr: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub rule: InferRule,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<(u32, u32)>,
}

/// Which inference rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InferRule {
    Literal,
    VarLookup,
    Lambda,
    Call,
    Let,
    LetGen,
    If,
    Match,
    BinaryOp,
    Tuple,
    Construct,
    Borrow,
    Assign,
    Generalize,
}

/// Everything recorded for one declaration group.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InferenceTrace {
    pub declarations: Vec<String>,
    pub unify: Vec<UnifyStep>,
    pub infer: Vec<InferStep>,
}
