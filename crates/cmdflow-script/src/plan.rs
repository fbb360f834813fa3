//! Linear execution order for a workflow graph
//!
//! # Algorithm
//!
//! ```text
//! edges ──► dependency lists (target ← source)      plain edges
//!       └─► branch roots (owner, handle) → targets  edges on a declared handle
//!
//! branch roots ──► reachable nodes via plain edges ──► claimed by owner
//! unclaimed nodes ──► DFS post-order ──► top-level order
//! claimed nodes   ──► DFS post-order ──► per-branch order
//! ```
//!
//! DFS seeds follow node declaration order and dependencies follow edge
//! declaration order, so the result is deterministic. A node reached again
//! while still on the DFS stack is a cycle; the error names every node in
//! its strongly connected component.

use crate::error::{AssemblyError, AssemblyResult};
use crate::graph::{Node, WorkflowGraph};
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// Nodes rendered inside one output handle of their owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    /// Output handle name
    pub handle: String,
    /// Node positions in render order
    pub order: Vec<usize>,
}

/// Render order for a graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    order: Vec<usize>,
    branches: HashMap<usize, Vec<Branch>>,
}

impl ExecutionPlan {
    /// Plan with no branch handles: every edge is a dependency
    pub fn linear(graph: &WorkflowGraph) -> AssemblyResult<Self> {
        Self::build(graph, |_| &[])
    }

    /// Plan a graph.
    ///
    /// `handles_of` returns the declared output handles of a node; edges
    /// leaving a node through one of them are branch edges.
    pub fn build<'h, F>(graph: &WorkflowGraph, handles_of: F) -> AssemblyResult<Self>
    where
        F: Fn(&Node) -> &'h [String],
    {
        let node_count = graph.nodes.len();
        let mut positions: HashMap<&str, usize> = HashMap::with_capacity(node_count);
        for (pos, node) in graph.nodes.iter().enumerate() {
            if positions.contains_key(node.id.as_str()) {
                tracing::warn!(node = %node.id, "duplicate node id, later node unreachable by edges");
            } else {
                positions.insert(node.id.as_str(), pos);
            }
        }

        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); node_count];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); node_count];
        let mut roots: HashMap<(usize, &str), Vec<usize>> = HashMap::new();

        for edge in &graph.edges {
            let (Some(&source), Some(&target)) = (
                positions.get(edge.source.as_str()),
                positions.get(edge.target.as_str()),
            ) else {
                tracing::warn!(
                    source = %edge.source,
                    target = %edge.target,
                    "edge names an unknown node, ignored"
                );
                continue;
            };
            let handle = edge
                .source_handle
                .as_deref()
                .filter(|h| handles_of(&graph.nodes[source]).iter().any(|d| d == h));
            match handle {
                Some(handle) => roots.entry((source, handle)).or_default().push(target),
                None => {
                    deps[target].push(source);
                    successors[source].push(target);
                }
            }
        }

        // Branch ownership, first claim wins.
        let mut owner_of: HashMap<usize, usize> = HashMap::new();
        let mut claims: Vec<(usize, String, Vec<usize>)> = Vec::new();
        for (owner, node) in graph.nodes.iter().enumerate() {
            for handle in handles_of(node) {
                let Some(targets) = roots.get(&(owner, handle.as_str())) else {
                    claims.push((owner, handle.clone(), Vec::new()));
                    continue;
                };
                let mut members = Vec::new();
                let mut queue: VecDeque<usize> = targets.iter().copied().collect();
                while let Some(next) = queue.pop_front() {
                    if next == owner || owner_of.contains_key(&next) {
                        continue;
                    }
                    owner_of.insert(next, owner);
                    members.push(next);
                    queue.extend(successors[next].iter().copied());
                }
                claims.push((owner, handle.clone(), members));
            }
        }

        let top_level: Vec<usize> = (0..node_count)
            .filter(|pos| !owner_of.contains_key(pos))
            .collect();
        let order = linearize(graph, &deps, &top_level, &owner_of)?;

        let mut branches: HashMap<usize, Vec<Branch>> = HashMap::new();
        for (owner, handle, members) in claims {
            let mut members = members;
            members.sort_unstable();
            let order = linearize(graph, &deps, &members, &HashMap::new())?;
            branches.entry(owner).or_default().push(Branch { handle, order });
        }

        tracing::debug!(
            nodes = node_count,
            top_level = order.len(),
            branched = owner_of.len(),
            "planned workflow"
        );
        Ok(Self { order, branches })
    }

    /// Top-level node positions in render order
    #[inline]
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Branches owned by the node at `pos`, in handle declaration order
    #[must_use]
    pub fn branches_of(&self, pos: usize) -> &[Branch] {
        self.branches.get(&pos).map_or(&[], Vec::as_slice)
    }

    /// Top-level node ids in render order
    #[must_use]
    pub fn ordered_ids<'g>(&self, graph: &'g WorkflowGraph) -> Vec<&'g str> {
        self.order
            .iter()
            .map(|&pos| graph.nodes[pos].id.as_str())
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// DFS post-order over `members`.
///
/// Dependencies outside `members` are redirected to their top-most owner
/// when that owner is a member, otherwise dropped.
fn linearize(
    graph: &WorkflowGraph,
    deps: &[Vec<usize>],
    members: &[usize],
    owner_of: &HashMap<usize, usize>,
) -> AssemblyResult<Vec<usize>> {
    let in_set: HashSet<usize> = members.iter().copied().collect();
    let local_deps = |node: usize| -> Vec<usize> {
        let mut out = Vec::new();
        for &dep in &deps[node] {
            let mut dep = dep;
            while let Some(&owner) = owner_of.get(&dep) {
                dep = owner;
            }
            if dep != node && in_set.contains(&dep) && !out.contains(&dep) {
                out.push(dep);
            }
            // A self-edge is still a cycle.
            if dep == node && deps[node].contains(&node) && !out.contains(&dep) {
                out.push(dep);
            }
        }
        out
    };

    let mut marks = vec![Mark::Unvisited; graph.nodes.len()];
    let mut order = Vec::with_capacity(members.len());
    let mut stack: Vec<(usize, Vec<usize>, usize)> = Vec::new();

    for &seed in members {
        if marks[seed] != Mark::Unvisited {
            continue;
        }
        marks[seed] = Mark::InProgress;
        stack.push((seed, local_deps(seed), 0));

        while let Some((node, node_deps, next)) = stack.last_mut() {
            if let Some(&dep) = node_deps.get(*next) {
                *next += 1;
                match marks[dep] {
                    Mark::Unvisited => {
                        marks[dep] = Mark::InProgress;
                        let dep_deps = local_deps(dep);
                        stack.push((dep, dep_deps, 0));
                    }
                    Mark::InProgress => return Err(cycle_error(graph, deps, dep)),
                    Mark::Done => {}
                }
            } else {
                let node = *node;
                marks[node] = Mark::Done;
                order.push(node);
                stack.pop();
            }
        }
    }
    Ok(order)
}

fn cycle_error(graph: &WorkflowGraph, deps: &[Vec<usize>], on_cycle: usize) -> AssemblyError {
    let mut dependency_graph: DiGraphMap<usize, ()> = DiGraphMap::new();
    for (target, sources) in deps.iter().enumerate() {
        dependency_graph.add_node(target);
        for &source in sources {
            dependency_graph.add_edge(source, target, ());
        }
    }
    let mut nodes = tarjan_scc(&dependency_graph)
        .into_iter()
        .find(|component| component.contains(&on_cycle))
        .unwrap_or_else(|| vec![on_cycle]);
    nodes.sort_unstable();
    let nodes: Vec<String> = nodes.into_iter().map(|pos| graph.nodes[pos].id.clone()).collect();
    tracing::warn!(nodes = ?nodes, "workflow graph contains a cycle");
    AssemblyError::CycleDetected { nodes }
}
