//! Resource dependency DAG.
//!
//! Edges point from a resource to the resources it needs. The graph is
//! built from explicit `DependsOn` entries and from references found in
//! resource properties, and gives the order in which the provisioning
//! engine may create resources.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::Direction;
use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{PlanError, PlanResult};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    nodes: BTreeMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&index) = self.nodes.get(id) {
            return index;
        }
        let index = self.graph.add_node(id.to_string());
        self.nodes.insert(id.to_string(), index);
        index
    }

    /// Record that `from` must be created after `to`.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let to = self.add_node(to);
        let from = self.add_node(from);
        self.graph.update_edge(from, to, ());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn neighbors(&self, index: NodeIndex, direction: Direction) -> BTreeSet<&str> {
        self.graph
            .neighbors_directed(index, direction)
            .map(|n| self.graph[n].as_str())
            .collect()
    }

    /// Direct dependencies of `id`, in lexical order.
    pub fn dependencies_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.nodes
            .get(id)
            .map(|&index| self.neighbors(index, Direction::Outgoing))
            .unwrap_or_default()
            .into_iter()
    }

    /// Whether `from` reaches `to` by following dependency edges.
    pub fn depends_on_transitively(&self, from: &str, to: &str) -> bool {
        let (Some(&from), Some(&to)) = (self.nodes.get(from), self.nodes.get(to)) else {
            return false;
        };
        self.graph
            .neighbors_directed(from, Direction::Outgoing)
            .any(|next| algo::has_path_connecting(&self.graph, next, to, None))
    }

    /// Resources on a cycle, sorted. Empty when the graph is acyclic.
    fn cycle_members(&self) -> Vec<String> {
        let mut members: Vec<String> = algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || scc.iter().any(|&n| self.graph.contains_edge(n, n)))
            .flatten()
            .map(|n| self.graph[n].clone())
            .collect();
        members.sort();
        members
    }

    /// Creation order: every resource appears after all of its dependencies.
    ///
    /// Kahn's algorithm with lexical tie-breaking, so the order is the same
    /// for the same graph regardless of insertion order. A cycle yields
    /// `DependencyCycle` naming the resources on it.
    pub fn topological_order(&self) -> PlanResult<Vec<String>> {
        if algo::toposort(&self.graph, None).is_err() {
            return Err(PlanError::DependencyCycle(self.cycle_members()));
        }

        let mut remaining: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(id, &index)| (id.as_str(), self.graph.neighbors_directed(index, Direction::Outgoing).count()))
            .collect();
        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            remaining.remove(id);
            order.push(id.to_string());
            let Some(&index) = self.nodes.get(id) else { continue };
            for dependent in self.neighbors(index, Direction::Incoming) {
                if let Some(n) = remaining.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn orders_dependencies_first() {
        let mut g = DependencyGraph::new();
        g.add_edge("Nodes", "Db");
        g.add_edge("Nodes", "Secret");
        g.add_edge("Db", "Secret");
        g.add_edge("Db", "Vpc");

        let order = g.topological_order().unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "Secret") < position(&order, "Db"));
        assert!(position(&order, "Vpc") < position(&order, "Db"));
        assert!(position(&order, "Db") < position(&order, "Nodes"));
    }

    #[test]
    fn order_is_deterministic() {
        let mut g = DependencyGraph::new();
        g.add_node("b");
        g.add_node("a");
        g.add_node("c");
        assert_eq!(g.topological_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn detects_cycle() {
        let mut g = DependencyGraph::new();
        g.add_edge("a", "b");
        g.add_edge("b", "c");
        g.add_edge("c", "a");
        g.add_node("d");
        match g.topological_order() {
            Err(PlanError::DependencyCycle(ids)) => {
                assert_eq!(ids, vec!["a", "b", "c"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut g = DependencyGraph::new();
        g.add_edge("a", "a");
        g.add_edge("b", "a");
        assert!(matches!(g.topological_order(), Err(PlanError::DependencyCycle(ids)) if ids == vec!["a"]));
    }

    #[test]
    fn duplicate_edges_count_once() {
        let mut g = DependencyGraph::new();
        g.add_edge("Nodes", "Db");
        g.add_edge("Nodes", "Db");
        assert_eq!(g.dependencies_of("Nodes").collect::<Vec<_>>(), vec!["Db"]);
        assert_eq!(g.topological_order().unwrap(), vec!["Db", "Nodes"]);
    }

    #[test]
    fn transitive_dependency() {
        let mut g = DependencyGraph::new();
        g.add_edge("Nodes", "Db");
        g.add_edge("Db", "Key");
        assert!(g.depends_on_transitively("Nodes", "Key"));
        assert!(!g.depends_on_transitively("Key", "Nodes"));
        assert!(!g.depends_on_transitively("Key", "Key"));
        assert!(!g.depends_on_transitively("Nodes", "Missing"));
    }
}
