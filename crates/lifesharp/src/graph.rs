//! Declaration dependency graph.
//!
//! Value declarations are the nodes. `a` depends on `b` when the body of `a`
//! refers to `b` by name or matches on one of `b`'s active pattern cases.
//! Mutually recursive declarations form a strongly connected component and
//! are checked together as one group.

use std::collections::{BTreeMap, BTreeSet};

use lifesharp_ast::{DeclKind, Module, free_vars, matched_constructors};
use lifesharp_types::Registries;

/// Indices into `Module::declarations`, ascending.
pub type Group = Vec<usize>;

#[derive(Debug, Clone, Default)]
pub struct DeclGraph {
    /// Declaration index of each node.
    nodes: Vec<usize>,
    /// Successors of each node, as node positions.
    edges: Vec<Vec<usize>>,
}

impl DeclGraph {
    /// Build the graph for the value declarations of `module`.
    ///
    /// When a name is declared twice only the first declaration is a node;
    /// the duplicate is reported by the registry pre-pass.
    pub fn build(module: &Module, registries: &Registries) -> DeclGraph {
        let mut by_name: BTreeMap<&str, usize> = BTreeMap::new();
        let mut nodes = Vec::new();
        for (index, decl) in module.declarations.iter().enumerate() {
            let Some(name) = decl.node.value_name() else {
                continue;
            };
            if by_name.contains_key(name.node.as_str()) {
                continue;
            }
            by_name.insert(name.node.as_str(), nodes.len());
            nodes.push(index);
        }

        let edges = nodes
            .iter()
            .map(|&index| {
                references(&module.declarations[index].node, registries)
                    .iter()
                    .filter_map(|name| by_name.get(name.as_str()).copied())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .collect();

        DeclGraph { nodes, edges }
    }

    /// Strongly connected components, every component after the
    /// components it depends on.
    pub fn components(&self) -> Vec<Group> {
        let mut tarjan = Tarjan::new(self);
        for node in 0..self.nodes.len() {
            if tarjan.index[node].is_none() {
                tarjan.visit(node);
            }
        }
        tarjan.components
    }

    /// Components grouped into levels. A component's dependencies all sit
    /// in earlier levels, so the components of one level are independent.
    pub fn levels(&self) -> Vec<Vec<Group>> {
        let components = self.components();
        let mut component_of = vec![0; self.nodes.len()];
        for (c, members) in components.iter().enumerate() {
            for &node in members {
                component_of[node] = c;
            }
        }

        let mut depth = vec![0usize; components.len()];
        for (c, members) in components.iter().enumerate() {
            let below = members
                .iter()
                .flat_map(|&node| &self.edges[node])
                .map(|&succ| component_of[succ])
                .filter(|&other| other != c)
                .map(|other| depth[other] + 1)
                .max()
                .unwrap_or(0);
            depth[c] = below;
        }

        let height = depth.iter().max().map_or(0, |max| max + 1);
        let mut levels: Vec<Vec<Group>> = vec![Vec::new(); height];
        for (c, members) in components.into_iter().enumerate() {
            let mut group: Group = members.into_iter().map(|node| self.nodes[node]).collect();
            group.sort_unstable();
            levels[depth[c]].push(group);
        }
        for level in &mut levels {
            level.sort();
        }
        levels
    }
}

/// Names a declaration body refers to: free variables and the active
/// patterns whose cases it matches on.
fn references(decl: &DeclKind, registries: &Registries) -> BTreeSet<String> {
    let (mut names, cases) = match decl {
        DeclKind::Function(function) => (
            free_vars(&function.to_lambda()),
            matched_constructors(&function.body),
        ),
        DeclKind::ActivePattern(pattern) => {
            let mut free = free_vars(&pattern.body);
            free.remove(&pattern.param.name.node);
            (free, matched_constructors(&pattern.body))
        }
        DeclKind::Type(_) => return BTreeSet::new(),
    };
    names.extend(
        cases
            .iter()
            .filter_map(|case| registries.active.lookup_case(case))
            .map(|def| def.name.clone()),
    );
    names
}

// ---------------------------------------------------------------------------
// Tarjan's algorithm
// ---------------------------------------------------------------------------

struct Tarjan<'g> {
    graph: &'g DeclGraph,
    next: usize,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    components: Vec<Vec<usize>>,
}

impl<'g> Tarjan<'g> {
    fn new(graph: &'g DeclGraph) -> Self {
        let n = graph.nodes.len();
        Self {
            graph,
            next: 0,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            components: Vec::new(),
        }
    }

    fn visit(&mut self, node: usize) {
        self.index[node] = Some(self.next);
        self.lowlink[node] = self.next;
        self.next += 1;
        self.stack.push(node);
        self.on_stack[node] = true;

        let graph = self.graph;
        for &succ in &graph.edges[node] {
            match self.index[succ] {
                None => {
                    self.visit(succ);
                    self.lowlink[node] = self.lowlink[node].min(self.lowlink[succ]);
                }
                Some(index) if self.on_stack[succ] => {
                    self.lowlink[node] = self.lowlink[node].min(index);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlink[node]) == self.index[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack[member] = false;
                component.push(member);
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}
