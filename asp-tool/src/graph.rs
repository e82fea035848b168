// SPDX-License-Identifier: MIT

//! `G_allow` and `G_transition` (spec §3): multigraphs over SELinux types
//! and attributes, built directly from the consumed policy's AV and
//! type-transition rules (`original_source/se/sepolicygraph.py:
//! build_graph`). `G_dataflow` itself is built by [`crate::dataflow`] since
//! its nodes are materialized objects, not bare type names; this module
//! only defines the node-naming convention it shares with the dataflow
//! graph and process tree (spec §9 "Tagged variants over class hierarchy").

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::policy::SePolicy;

/// Which materialized kind a dataflow/report node represents. Spec §9
/// asks for a tagged union rather than subtyping; this is the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeKind {
    Subject,
    SubjectGroup,
    File,
    Ipc,
    Process,
}

pub fn subject_node_name(ty: &str) -> String {
    format!("subject:{ty}")
}

pub fn subject_group_node_name(attr: &str) -> String {
    format!("subject_group:{attr}")
}

pub fn file_node_name(ty: &str) -> String {
    format!("file:{ty}")
}

pub fn ipc_node_name(ipc_type: &str, ty: &str) -> String {
    format!("ipc:{ipc_type}:{ty}")
}

pub fn process_node_name(pid: u32) -> String {
    format!("process:{pid}")
}

#[derive(Debug, Clone)]
pub struct AllowEdge {
    pub teclass: String,
    pub perms: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TransitionEdge {
    pub teclass: String,
    pub through: String,
    /// Present only for filename type_transition rules (spec §3).
    pub filename: Option<String>,
}

/// A named-node multigraph: repeated `add_edge` calls between the same pair
/// create parallel edges, the idiomatic `petgraph` equivalent of
/// `networkx.MultiDiGraph` (DESIGN.md).
pub struct NamedMultiGraph<E> {
    pub graph: DiGraph<String, E>,
    index: HashMap<String, NodeIndex>,
}

impl<E> NamedMultiGraph<E> {
    fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    pub fn get_index(&self, name: &str) -> Option<NodeIndex> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Edges whose source is `name`, as `(target name, edge weight)`.
    pub fn edges_from<'a>(&'a self, name: &str) -> Vec<(&'a str, &'a E)> {
        let Some(idx) = self.get_index(name) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (self.graph[e.target()].as_str(), e.weight()))
            .collect()
    }

    /// Edges whose target is `name`, as `(source name, edge weight)`.
    pub fn edges_to<'a>(&'a self, name: &str) -> Vec<(&'a str, &'a E)> {
        let Some(idx) = self.get_index(name) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (self.graph[e.source()].as_str(), e.weight()))
            .collect()
    }
}

pub type AllowGraph = NamedMultiGraph<AllowEdge>;
pub type TransitionGraph = NamedMultiGraph<TransitionEdge>;

impl AllowGraph {
    pub fn add_allow(&mut self, source: &str, target: &str, teclass: &str, perms: Vec<String>) {
        let u = self.node(source);
        let v = self.node(target);
        self.graph.add_edge(
            u,
            v,
            AllowEdge {
                teclass: teclass.to_string(),
                perms,
            },
        );
    }
}

impl TransitionGraph {
    pub fn add_transition(
        &mut self,
        source: &str,
        default: &str,
        teclass: &str,
        through: &str,
        filename: Option<String>,
    ) {
        let u = self.node(source);
        let v = self.node(default);
        self.graph.add_edge(
            u,
            v,
            TransitionEdge {
                teclass: teclass.to_string(),
                through: through.to_string(),
                filename,
            },
        );
    }
}

/// Build `G_allow` from the policy's AV rules (spec §3, invariant 2: alias
/// names never appear as nodes, so every endpoint is canonicalized first).
pub fn build_allow_graph(policy: &SePolicy) -> AllowGraph {
    let mut g = AllowGraph::new();
    for rule in &policy.av_rules {
        let source = policy.canonical(&rule.source);
        let target = policy.canonical(&rule.target);
        g.add_allow(source, target, &rule.class, rule.perms.clone());
    }
    g
}

/// Build `G_transition` from the policy's type_transition rules.
pub fn build_transition_graph(policy: &SePolicy) -> TransitionGraph {
    let mut g = TransitionGraph::new();
    for rule in &policy.type_transitions {
        let source = policy.canonical(&rule.source);
        let default = policy.canonical(&rule.default);
        let through = policy.canonical(&rule.target);
        g.add_transition(source, default, &rule.class, through, rule.filename.clone());
    }
    g
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataflowEdgeKind {
    Read,
    Write,
}

#[derive(Debug, Clone)]
pub struct DataflowNode {
    pub name: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone)]
pub struct DataflowEdge {
    pub ty: DataflowEdgeKind,
}

/// `G_dataflow` (spec §3): a multigraph over subject/subject-group/object
/// node *names*, built by [`crate::dataflow`] as each MAC allow edge is
/// classified and wired to its materialized object.
#[derive(Debug, Default)]
pub struct DataflowGraph {
    pub graph: DiGraph<DataflowNode, DataflowEdge>,
    index: HashMap<String, NodeIndex>,
}

impl DataflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&mut self, name: &str, kind: NodeKind) -> NodeIndex {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(DataflowNode {
            name: name.to_string(),
            kind,
        });
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Add a `from -> to` edge of kind `ty`, skipping it if an identical
    /// `(from, to, ty)` edge is already present (spec §4.6 point 5: "do not
    /// duplicate an existing write edge", applied symmetrically to read).
    pub fn add_edge_dedup(&mut self, from: &str, from_kind: NodeKind, to: &str, to_kind: NodeKind, ty: DataflowEdgeKind) {
        let u = self.node(from, from_kind);
        let v = self.node(to, to_kind);

        let exists = self
            .graph
            .edges_connecting(u, v)
            .any(|e| e.weight().ty == ty);
        if !exists {
            self.graph.add_edge(u, v, DataflowEdge { ty });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{AvRule, TypeTransitionRule};

    fn sample_policy() -> SePolicy {
        let mut policy = SePolicy::new();
        policy.aliases.insert("old_init".to_string(), "init".to_string());
        policy.av_rules.push(AvRule {
            source: "old_init".to_string(),
            target: "proc".to_string(),
            class: "file".to_string(),
            perms: vec!["read".to_string()],
        });
        policy.type_transitions.push(TypeTransitionRule {
            source: "init".to_string(),
            target: "zygote_exec".to_string(),
            class: "process".to_string(),
            default: "zygote".to_string(),
            filename: None,
        });
        policy
    }

    #[test]
    fn allow_graph_canonicalizes_aliases() {
        let policy = sample_policy();
        let g = build_allow_graph(&policy);
        assert!(g.contains("init"));
        assert!(!g.contains("old_init"));
    }

    #[test]
    fn allow_graph_supports_parallel_edges() {
        let mut policy = sample_policy();
        policy.av_rules.push(AvRule {
            source: "init".to_string(),
            target: "proc".to_string(),
            class: "file".to_string(),
            perms: vec!["write".to_string()],
        });
        let g = build_allow_graph(&policy);
        assert_eq!(g.edges_from("init").len(), 2);
    }

    #[test]
    fn transition_graph_records_through_type() {
        let policy = sample_policy();
        let g = build_transition_graph(&policy);
        let edges = g.edges_from("init");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].0, "zygote");
        assert_eq!(edges[0].1.through, "zygote_exec");
    }
}
