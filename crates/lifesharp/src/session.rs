//! The per-module pipeline.
//!
//! 1. Pre-pass: type and active-pattern registries.
//! 2. Dependency graph, strongly connected components, levels.
//! 3. Level by level, each group is inferred against an immutable snapshot
//!    of the schemes of earlier levels, then ownership-checked and its
//!    matches compiled. Groups of one level run concurrently.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use lifesharp_ast::{Decl, DeclKind, Module};
use lifesharp_diag::{Diagnostic, DiagnosticError};
use lifesharp_hir::{DecisionTree, HirDecl};
use lifesharp_infer::check::check_group;
use lifesharp_infer::registry::build_registries;
use lifesharp_infer::trace::InferenceTrace;
use lifesharp_infer::typeck::TypeEnv;
use lifesharp_types::{Registries, TypeScheme};

use crate::config::CheckConfig;
use crate::graph::{DeclGraph, Group};

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One checked declaration.
#[derive(Debug, Clone)]
pub struct CheckedDecl {
    pub name: String,
    /// Typed, effect- and ownership-annotated tree, with decision trees on
    /// every match.
    pub hir: HirDecl,
    /// `None` for type declarations.
    pub scheme: Option<TypeScheme>,
}

impl CheckedDecl {
    pub fn decision_trees(&self) -> Vec<&DecisionTree> {
        self.hir
            .function()
            .map(|function| function.body.decision_trees())
            .unwrap_or_default()
    }
}

/// Everything a module check produces. Declarations are in source order;
/// diagnostics are the registry pre-pass's, then each group's in source
/// order of the group.
#[derive(Debug, Clone, Default)]
pub struct CheckOutput {
    pub declarations: Vec<CheckedDecl>,
    pub schemes: BTreeMap<String, TypeScheme>,
    pub diagnostics: Vec<Diagnostic>,
    /// Present when inference tracing is enabled, one per group.
    pub traces: Vec<InferenceTrace>,
}

impl CheckOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn declaration(&self, name: &str) -> Option<&CheckedDecl> {
        self.declarations.iter().find(|decl| decl.name == name)
    }

    pub fn scheme(&self, name: &str) -> Option<&TypeScheme> {
        self.schemes.get(name)
    }

    /// The output if no diagnostic is an error, otherwise every diagnostic.
    pub fn into_result(self) -> Result<CheckOutput, DiagnosticError> {
        if self.has_errors() {
            return Err(DiagnosticError::multiple(self.diagnostics));
        }
        Ok(self)
    }

    /// A JSON report of schemes, decision trees, diagnostics and traces.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let report = Report {
            declarations: self
                .declarations
                .iter()
                .map(|decl| DeclReport {
                    name: &decl.name,
                    scheme: decl.scheme.as_ref().map(ToString::to_string),
                    decision_trees: decl.decision_trees(),
                })
                .collect(),
            diagnostics: &self.diagnostics,
            traces: &self.traces,
        };
        serde_json::to_string_pretty(&report)
    }
}

#[derive(Serialize)]
struct Report<'a> {
    declarations: Vec<DeclReport<'a>>,
    diagnostics: &'a [Diagnostic],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    traces: &'a [InferenceTrace],
}

#[derive(Serialize)]
struct DeclReport<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheme: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    decision_trees: Vec<&'a DecisionTree>,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Check `module` with no ambient bindings.
pub fn check_module(module: &Module, config: &CheckConfig) -> CheckOutput {
    check_module_with(module, &BTreeMap::new(), config)
}

/// Check `module` against `ambient`, the schemes of externally visible
/// bindings supplied by module resolution.
pub fn check_module_with(
    module: &Module,
    ambient: &BTreeMap<String, TypeScheme>,
    config: &CheckConfig,
) -> CheckOutput {
    let (registries, mut diagnostics) = build_registries(module);
    let levels = DeclGraph::build(module, &registries).levels();
    tracing::debug!(
        declarations = module.declarations.len(),
        levels = levels.len(),
        registry_errors = diagnostics.len(),
        "module prepared"
    );

    let session = Session {
        module,
        registries: &registries,
        config,
    };
    let run = || session.run(&levels, ambient.clone());
    let mut groups = match worker_pool(config) {
        Some(pool) => pool.install(run),
        None => run(),
    };
    groups.sort_by_key(|group| group.first);

    let mut output = CheckOutput::default();
    let mut declarations: Vec<(usize, CheckedDecl)> = type_declarations(module, &registries);
    for group in groups {
        declarations.extend(group.decls);
        output.schemes.extend(group.schemes);
        diagnostics.extend(group.diagnostics);
        output.traces.extend(group.trace);
    }
    declarations.sort_by_key(|(index, _)| *index);
    output.declarations = declarations.into_iter().map(|(_, decl)| decl).collect();
    output.diagnostics = diagnostics;
    output
}

fn worker_pool(config: &CheckConfig) -> Option<rayon::ThreadPool> {
    let threads = config.threads.filter(|_| config.parallel)?;
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => Some(pool),
        Err(err) => {
            tracing::warn!(%err, threads, "could not build a worker pool; using the global pool");
            None
        }
    }
}

/// Type declarations with their registered definitions, first
/// declaration of each name only.
fn type_declarations(module: &Module, registries: &Registries) -> Vec<(usize, CheckedDecl)> {
    let mut seen = BTreeSet::new();
    module
        .declarations
        .iter()
        .enumerate()
        .filter_map(|(index, decl)| {
            let DeclKind::Type(def) = &decl.node else {
                return None;
            };
            let name = def.name.node.as_str();
            if !seen.insert(name) {
                return None;
            }
            let def = registries.types.get(name)?;
            Some((
                index,
                CheckedDecl {
                    name: name.to_string(),
                    hir: HirDecl::Type(def.clone()),
                    scheme: None,
                },
            ))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

struct Session<'a> {
    module: &'a Module,
    registries: &'a Registries,
    config: &'a CheckConfig,
}

/// What one declaration group contributes to the output.
struct GroupOutput {
    /// Smallest declaration index in the group.
    first: usize,
    decls: Vec<(usize, CheckedDecl)>,
    schemes: Vec<(String, TypeScheme)>,
    diagnostics: Vec<Diagnostic>,
    trace: Option<InferenceTrace>,
}

impl Session<'_> {
    /// Check every level in order. Each level sees the schemes of all
    /// earlier levels; its groups are checked concurrently when enabled.
    fn run(&self, levels: &[Vec<Group>], mut globals: BTreeMap<String, TypeScheme>) -> Vec<GroupOutput> {
        let mut outputs = Vec::new();
        for (depth, level) in levels.iter().enumerate() {
            let env = TypeEnv::from_globals(Arc::new(globals.clone()));
            tracing::debug!(depth, groups = level.len(), "checking level");
            let checked: Vec<GroupOutput> = if self.config.parallel && level.len() > 1 {
                level.par_iter().map(|group| self.check(group, &env)).collect()
            } else {
                level.iter().map(|group| self.check(group, &env)).collect()
            };
            for group in &checked {
                globals.extend(group.schemes.iter().cloned());
            }
            outputs.extend(checked);
        }
        outputs
    }

    /// Infer one group, then check ownership and compile matches for each
    /// of its declarations. A group that fails inference binds its names
    /// to the error scheme and skips the later stages.
    fn check(&self, group: &[usize], env: &TypeEnv) -> GroupOutput {
        let decls: Vec<&Decl> = group
            .iter()
            .map(|&index| &self.module.declarations[index])
            .collect();
        let names: Vec<&str> = decls
            .iter()
            .filter_map(|decl| decl.node.value_name())
            .map(|name| name.node.as_str())
            .collect();
        let span = tracing::debug_span!("group", names = ?names);
        let _entered = span.enter();

        let result = check_group(&decls, env, self.registries, self.config.trace_inference);
        let mut diagnostics = result.diagnostics;
        let mut hir = result.decls;
        let inference_errors = diagnostics.iter().filter(|d| d.is_error()).count();
        if inference_errors == 0 {
            tracing::debug!("inferred");
            for decl in &mut hir {
                diagnostics.extend(lifesharp_ownership::check_decl(decl));
                diagnostics.extend(lifesharp_patterns::compile_decl(decl, self.registries));
            }
        } else {
            tracing::debug!(errors = inference_errors, "inference failed");
        }

        if self.config.deny_warnings {
            diagnostics = diagnostics.into_iter().map(Diagnostic::into_error).collect();
        }
        let errors = diagnostics.iter().filter(|d| d.is_error()).count();
        if errors > 0 {
            tracing::debug!(errors, "group rejected");
        }

        let schemes: BTreeMap<&str, &TypeScheme> = result
            .schemes
            .iter()
            .map(|(name, scheme)| (name.as_str(), scheme))
            .collect();
        let decls = group
            .iter()
            .copied()
            .zip(hir)
            .map(|(index, hir)| {
                let name = hir.name().to_string();
                let scheme = schemes.get(name.as_str()).map(|scheme| (*scheme).clone());
                (index, CheckedDecl { name, hir, scheme })
            })
            .collect();

        GroupOutput {
            first: group.first().copied().unwrap_or_default(),
            decls,
            schemes: result.schemes,
            diagnostics,
            trace: result.trace,
        }
    }
}
