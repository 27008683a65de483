//! LifeSharp semantic core driver.
//!
//! Takes a parsed [`Module`](lifesharp_ast::Module) and runs the whole
//! semantic pipeline over it: registry pre-pass, dependency analysis,
//! type and effect inference, ownership checking and match compilation.
//! Declarations are checked in groups of mutually recursive bindings, and
//! independent groups are checked concurrently.
//!
//! Failures are collected rather than short-circuited: a group that fails
//! binds its names to the error type so dependents do not cascade, and
//! unrelated groups are checked as usual.

pub mod config;
pub mod graph;
mod session;

pub use config::CheckConfig;
pub use session::{CheckOutput, CheckedDecl, check_module, check_module_with};

pub use lifesharp_diag::{Category, Diagnostic, DiagnosticError, Severity};
pub use lifesharp_types::TypeScheme;
