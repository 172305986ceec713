//! The dependency graph.
//!
//! An edge `a -> b` records that producing `a` read `b`. Edges are recorded
//! as reads happen and never edited after the fact; recomputing a node
//! replaces its whole dependency set at once. The graph is kept acyclic: an
//! edge that would close a cycle is rejected with [`GraphError::Cycle`].

use std::collections::BTreeSet;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use petgraph::Direction;

use kiln_common::NodeId;

use crate::error::GraphError;

/// Directed acyclic graph of "was read while producing" edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraphMap<NodeId, ()>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a graph from a persisted node list and edge list.
    ///
    /// Rejects edge lists that contain a cycle.
    pub fn from_edges(
        nodes: impl IntoIterator<Item = NodeId>,
        edges: &[(NodeId, NodeId)],
    ) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node);
        }
        for &(from, to) in edges {
            graph.record_edge(from, to)?;
        }
        Ok(graph)
    }

    /// Adds `node` if it is not already present.
    pub fn add_node(&mut self, node: NodeId) {
        self.graph.add_node(node);
    }

    /// Returns `true` if `node` is in the graph.
    pub fn contains(&self, node: NodeId) -> bool {
        self.graph.contains_node(node)
    }

    /// Records that computing `from` read `to`.
    ///
    /// Both nodes are created if missing. Fails without modifying the graph
    /// if the edge would close a cycle (including a self-read).
    pub fn record_edge(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        if from == to || self.reaches(to, from) {
            return Err(GraphError::Cycle { from, to });
        }
        self.graph.add_edge(from, to, ());
        Ok(())
    }

    /// Replaces the dependency set of `from` with `deps`.
    ///
    /// On a cycle the previous dependency set is restored before the error
    /// is returned.
    pub fn set_dependencies(
        &mut self,
        from: NodeId,
        deps: impl IntoIterator<Item = NodeId>,
    ) -> Result<(), GraphError> {
        let previous = self.dependencies_of(from);
        for &dep in &previous {
            self.graph.remove_edge(from, dep);
        }
        self.graph.add_node(from);

        let mut added = Vec::new();
        for dep in deps {
            if let Err(e) = self.record_edge(from, dep) {
                for &undo in &added {
                    self.graph.remove_edge(from, undo);
                }
                for &dep in &previous {
                    self.graph.add_edge(from, dep, ());
                }
                return Err(e);
            }
            added.push(dep);
        }
        Ok(())
    }

    /// Returns the direct dependencies of `node`.
    pub fn dependencies_of(&self, node: NodeId) -> BTreeSet<NodeId> {
        self.graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect()
    }

    /// Returns the nodes that directly read `node`.
    pub fn dependents_of(&self, node: NodeId) -> BTreeSet<NodeId> {
        self.graph
            .neighbors_directed(node, Direction::Incoming)
            .collect()
    }

    /// Returns every node reachable from `node`, excluding `node` itself.
    pub fn transitive_closure(&self, node: NodeId) -> BTreeSet<NodeId> {
        let mut closure = BTreeSet::new();
        if !self.contains(node) {
            return closure;
        }
        let mut dfs = Dfs::new(&self.graph, node);
        while let Some(next) = dfs.next(&self.graph) {
            if next != node {
                closure.insert(next);
            }
        }
        closure
    }

    /// Returns every node reachable from any of `roots`, roots included.
    pub fn reachable_from(&self, roots: impl IntoIterator<Item = NodeId>) -> BTreeSet<NodeId> {
        let mut live = BTreeSet::new();
        for root in roots {
            if live.insert(root) {
                live.extend(self.transitive_closure(root));
            }
        }
        live
    }

    /// Returns all nodes ordered so that every node follows its dependencies.
    pub fn dependency_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut order = toposort(&self.graph, None)
            .map_err(|cycle| GraphError::CycleThrough {
                node: cycle.node_id(),
            })?;
        // toposort places dependents before what they read.
        order.reverse();
        Ok(order)
    }

    /// Checks that every edge endpoint satisfies `is_known`.
    pub fn validate(&self, is_known: impl Fn(NodeId) -> bool) -> Result<(), GraphError> {
        for (from, to, _) in self.graph.all_edges() {
            if !is_known(from) || !is_known(to) {
                return Err(GraphError::DanglingEdge { from, to });
            }
        }
        Ok(())
    }

    /// Removes `node` together with all of its incoming and outgoing edges.
    pub fn remove_node(&mut self, node: NodeId) {
        self.graph.remove_node(node);
    }

    /// Returns all nodes in ascending id order.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.graph.nodes().collect();
        nodes.sort();
        nodes
    }

    /// Returns all edges sorted, for deterministic persistence.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges: Vec<(NodeId, NodeId)> =
            self.graph.all_edges().map(|(a, b, _)| (a, b)).collect();
        edges.sort();
        edges
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        self.contains(from) && self.contains(to) && has_path_connecting(&self.graph, from, to, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(i: u32) -> NodeId {
        NodeId::from_raw(i)
    }

    #[test]
    fn record_and_query_edges() {
        let mut g = DependencyGraph::new();
        g.record_edge(n(1), n(2)).unwrap();
        g.record_edge(n(1), n(3)).unwrap();
        assert_eq!(g.dependencies_of(n(1)), BTreeSet::from([n(2), n(3)]));
        assert_eq!(g.dependents_of(n(2)), BTreeSet::from([n(1)]));
        assert!(g.dependencies_of(n(9)).is_empty());
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let mut g = DependencyGraph::new();
        let err = g.record_edge(n(1), n(1)).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn closing_edge_is_rejected() {
        let mut g = DependencyGraph::new();
        g.record_edge(n(1), n(2)).unwrap();
        g.record_edge(n(2), n(3)).unwrap();
        assert!(g.record_edge(n(3), n(1)).is_err());
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn transitive_closure_follows_reads() {
        let mut g = DependencyGraph::new();
        g.record_edge(n(5), n(4)).unwrap();
        g.record_edge(n(4), n(1)).unwrap();
        g.record_edge(n(4), n(2)).unwrap();
        g.add_node(n(3));
        assert_eq!(
            g.transitive_closure(n(5)),
            BTreeSet::from([n(1), n(2), n(4)])
        );
        assert!(g.transitive_closure(n(3)).is_empty());
        assert!(g.transitive_closure(n(99)).is_empty());
    }

    #[test]
    fn dependency_order_puts_dependencies_first() {
        let mut g = DependencyGraph::new();
        g.record_edge(n(5), n(4)).unwrap();
        g.record_edge(n(4), n(2)).unwrap();
        g.record_edge(n(5), n(1)).unwrap();
        let order = g.dependency_order().unwrap();
        let pos = |x: NodeId| order.iter().position(|&o| o == x).unwrap();
        assert!(pos(n(2)) < pos(n(4)));
        assert!(pos(n(4)) < pos(n(5)));
        assert!(pos(n(1)) < pos(n(5)));
    }

    #[test]
    fn set_dependencies_replaces() {
        let mut g = DependencyGraph::new();
        g.set_dependencies(n(1), [n(2), n(3)]).unwrap();
        g.set_dependencies(n(1), [n(4)]).unwrap();
        assert_eq!(g.dependencies_of(n(1)), BTreeSet::from([n(4)]));
        assert!(g.contains(n(2)));
    }

    #[test]
    fn set_dependencies_restores_on_cycle() {
        let mut g = DependencyGraph::new();
        g.record_edge(n(2), n(1)).unwrap();
        g.set_dependencies(n(1), [n(3)]).unwrap();
        assert!(g.set_dependencies(n(1), [n(4), n(2)]).is_err());
        assert_eq!(g.dependencies_of(n(1)), BTreeSet::from([n(3)]));
    }

    #[test]
    fn remove_node_drops_edges() {
        let mut g = DependencyGraph::new();
        g.record_edge(n(1), n(2)).unwrap();
        g.record_edge(n(2), n(3)).unwrap();
        g.remove_node(n(2));
        assert!(!g.contains(n(2)));
        assert_eq!(g.edge_count(), 0);
        assert!(g.contains(n(1)));
    }

    #[test]
    fn from_edges_rejects_cycles() {
        let edges = [(n(1), n(2)), (n(2), n(1))];
        assert!(DependencyGraph::from_edges([], &edges).is_err());
    }

    #[test]
    fn validate_finds_dangling_edges() {
        let mut g = DependencyGraph::new();
        g.record_edge(n(1), n(7)).unwrap();
        assert!(g.validate(|id| id.as_raw() < 10).is_ok());
        let err = g.validate(|id| id.as_raw() < 5).unwrap_err();
        assert!(matches!(err, GraphError::DanglingEdge { .. }));
    }

    #[test]
    fn edges_are_sorted() {
        let mut g = DependencyGraph::new();
        g.record_edge(n(3), n(1)).unwrap();
        g.record_edge(n(2), n(1)).unwrap();
        assert_eq!(g.edges(), vec![(n(2), n(1)), (n(3), n(1))]);
        assert_eq!(g.nodes(), vec![n(1), n(2), n(3)]);
    }

    #[test]
    fn reachable_from_includes_roots() {
        let mut g = DependencyGraph::new();
        g.record_edge(n(1), n(2)).unwrap();
        g.add_node(n(3));
        assert_eq!(g.reachable_from([n(1)]), BTreeSet::from([n(1), n(2)]));
    }
}
