//! Dependency graph (DAG) construction and traversal
//!
//! A generic directed acyclic graph over any ordered node identity. Edges point
//! from a parent (producer) to a child (consumer). The graph never stores a
//! cycle: `add_edge` rejects any edge that would close one.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Debug;

/// DAG error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DagError {
    #[error("Adding edge {parent} -> {child} would create a cycle")]
    Cycle { parent: String, child: String },

    #[error("Node not found: {0}")]
    MissingNode(String),
}

/// Directed acyclic graph with forward and reverse adjacency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dag<N: Ord> {
    /// node -> nodes it depends on
    parents: BTreeMap<N, BTreeSet<N>>,

    /// node -> nodes that depend on it
    children: BTreeMap<N, BTreeSet<N>>,
}

impl<N: Ord> Default for Dag<N> {
    fn default() -> Self {
        Self {
            parents: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }
}

impl<N: Ord + Clone + Debug> Dag<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from an edge list
    pub fn from_edges(edges: impl IntoIterator<Item = (N, N)>) -> Result<Self, DagError> {
        let mut dag = Self::new();
        for (parent, child) in edges {
            dag.add_edge(parent, child)?;
        }
        Ok(dag)
    }

    /// Add a node if it is not already present
    pub fn add_node(&mut self, node: N) {
        self.parents.entry(node.clone()).or_default();
        self.children.entry(node).or_default();
    }

    /// Add an edge `parent -> child`, creating both nodes as needed
    ///
    /// Fails with [`DagError::Cycle`] when `child` already reaches `parent`
    /// (self-loops included). The graph is left unchanged on failure.
    pub fn add_edge(&mut self, parent: N, child: N) -> Result<(), DagError> {
        if parent == child || self.has_path(&child, &parent) {
            return Err(DagError::Cycle {
                parent: format!("{:?}", parent),
                child: format!("{:?}", child),
            });
        }

        self.add_node(parent.clone());
        self.add_node(child.clone());
        if let Some(parents) = self.parents.get_mut(&child) {
            parents.insert(parent.clone());
        }
        if let Some(children) = self.children.get_mut(&parent) {
            children.insert(child);
        }
        Ok(())
    }

    pub fn contains(&self, node: &N) -> bool {
        self.parents.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// All nodes in sorted order
    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.parents.keys()
    }

    /// All edges as `(parent, child)` pairs in sorted order
    pub fn edges(&self) -> Vec<(N, N)> {
        self.children
            .iter()
            .flat_map(|(parent, children)| {
                children.iter().map(move |child| (parent.clone(), child.clone()))
            })
            .collect()
    }

    /// Get immediate parents (dependencies) of a node
    pub fn parents(&self, node: &N) -> Vec<&N> {
        self.parents
            .get(node)
            .map(|p| p.iter().collect())
            .unwrap_or_default()
    }

    /// Get immediate children (dependents) of a node
    pub fn children(&self, node: &N) -> Vec<&N> {
        self.children
            .get(node)
            .map(|c| c.iter().collect())
            .unwrap_or_default()
    }

    /// Check if there's a path from source to target
    pub fn has_path(&self, source: &N, target: &N) -> bool {
        if source == target {
            return self.contains(source);
        }
        self.get_relatives([source.clone()], false, None).contains(target)
    }

    /// Nodes reachable from `ids` by BFS, excluding the seeds themselves
    ///
    /// `reverse = false` walks towards children (descendants), `reverse = true`
    /// towards parents (ancestors). `depth` bounds the number of hops.
    pub fn get_relatives(
        &self,
        ids: impl IntoIterator<Item = N>,
        reverse: bool,
        depth: Option<usize>,
    ) -> BTreeSet<N> {
        let adjacency = if reverse { &self.parents } else { &self.children };
        let seeds: BTreeSet<N> = ids.into_iter().filter(|n| self.contains(n)).collect();

        let mut visited: BTreeSet<N> = seeds.clone();
        let mut queue: VecDeque<(N, usize)> = seeds.iter().map(|n| (n.clone(), 0)).collect();
        let mut result = BTreeSet::new();

        while let Some((current, dist)) = queue.pop_front() {
            if depth.is_some_and(|d| dist >= d) {
                continue;
            }

            for next in adjacency.get(&current).into_iter().flatten() {
                if visited.insert(next.clone()) {
                    result.insert(next.clone());
                    queue.push_back((next.clone(), dist + 1));
                }
            }
        }

        result
    }

    /// Seeds plus their bounded ancestors and descendants
    pub fn get_ancestors_and_descendants(
        &self,
        ids: impl IntoIterator<Item = N>,
        predecessor_depth: Option<usize>,
        successor_depth: Option<usize>,
    ) -> BTreeSet<N> {
        let seeds: BTreeSet<N> = ids.into_iter().filter(|n| self.contains(n)).collect();
        let mut result = seeds.clone();
        result.extend(self.get_relatives(seeds.iter().cloned(), true, predecessor_depth));
        result.extend(self.get_relatives(seeds.iter().cloned(), false, successor_depth));
        result
    }

    /// Kahn's algorithm, breaking ties by node order
    ///
    /// Deterministic for a given graph. Infallible because the graph is
    /// acyclic by construction.
    pub fn topological_sort(&self) -> Vec<N> {
        self.topological_generations().into_iter().flatten().collect()
    }

    /// Layers of nodes whose parents all sit in earlier layers
    pub fn topological_generations(&self) -> Vec<Vec<N>> {
        let mut in_degree: BTreeMap<&N, usize> = self
            .parents
            .iter()
            .map(|(node, parents)| (node, parents.len()))
            .collect();

        let mut current: Vec<&N> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(node, _)| *node)
            .collect();

        let mut generations = Vec::new();
        while !current.is_empty() {
            let mut next = BTreeSet::new();
            for node in &current {
                for child in self.children.get(*node).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(child);
                        }
                    }
                }
            }
            generations.push(current.into_iter().cloned().collect());
            current = next.into_iter().collect();
        }

        generations
    }

    /// Nodes without parents
    pub fn roots(&self) -> Vec<&N> {
        self.parents
            .iter()
            .filter(|(_, p)| p.is_empty())
            .map(|(n, _)| n)
            .collect()
    }

    /// Induced subgraph over `nodes`
    pub fn subgraph<'a>(&self, nodes: impl IntoIterator<Item = &'a N>) -> Self
    where
        N: 'a,
    {
        let keep: BTreeSet<&N> = nodes.into_iter().filter(|n| self.contains(n)).collect();

        let mut sub = Self::new();
        for node in &keep {
            sub.add_node((*node).clone());
        }
        for node in &keep {
            for child in self.children.get(*node).into_iter().flatten() {
                if keep.contains(child) {
                    // Edges of an acyclic graph stay acyclic
                    if let Some(p) = sub.parents.get_mut(child) {
                        p.insert((*node).clone());
                    }
                    if let Some(c) = sub.children.get_mut(*node) {
                        c.insert(child.clone());
                    }
                }
            }
        }
        sub
    }

    /// Remove nodes, connecting each one's parents to its children
    ///
    /// Reachability between the remaining nodes is preserved.
    pub fn remove_nodes_and_reconnect<'a>(&mut self, nodes: impl IntoIterator<Item = &'a N>)
    where
        N: 'a,
    {
        for node in nodes {
            let Some(parents) = self.parents.remove(node) else {
                continue;
            };
            let children = self.children.remove(node).unwrap_or_default();

            for parent in &parents {
                if let Some(c) = self.children.get_mut(parent) {
                    c.remove(node);
                    c.extend(children.iter().cloned());
                }
            }
            for child in &children {
                if let Some(p) = self.parents.get_mut(child) {
                    p.remove(node);
                    p.extend(parents.iter().cloned());
                }
            }
        }
    }

    /// Copy of the graph with every node renamed by `f`
    ///
    /// Fails if the renaming merges nodes into a cycle.
    pub fn relabel<M, F>(&self, f: F) -> Result<Dag<M>, DagError>
    where
        M: Ord + Clone + Debug,
        F: Fn(&N) -> M,
    {
        let mut out = Dag::new();
        for node in self.nodes() {
            out.add_node(f(node));
        }
        for (parent, child) in self.edges() {
            out.add_edge(f(&parent), f(&child))?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chain() -> Dag<&'static str> {
        Dag::from_edges([("a", "b"), ("b", "c"), ("c", "d"), ("x", "c")]).unwrap()
    }

    #[test]
    fn add_edge_rejects_cycles() {
        let mut dag = chain();
        let err = dag.add_edge("d", "a").unwrap_err();
        assert!(matches!(err, DagError::Cycle { .. }));
        assert!(dag.add_edge("a", "a").is_err());

        // Unchanged after rejection
        assert_eq!(dag.children(&"d"), Vec::<&&str>::new());
        assert_eq!(dag.topological_sort().len(), 5);
    }

    #[test]
    fn topological_sort_is_deterministic() {
        let dag = chain();
        assert_eq!(dag.topological_sort(), vec!["a", "x", "b", "c", "d"]);
        assert_eq!(
            dag.topological_generations(),
            vec![vec!["a", "x"], vec!["b"], vec!["c"], vec!["d"]]
        );
    }

    #[test]
    fn relatives_respect_depth() {
        let dag = chain();
        let down: Vec<_> = dag.get_relatives(["a"], false, Some(2)).into_iter().collect();
        assert_eq!(down, vec!["b", "c"]);

        let up: Vec<_> = dag.get_relatives(["d"], true, None).into_iter().collect();
        assert_eq!(up, vec!["a", "b", "c", "x"]);

        let around: Vec<_> = dag
            .get_ancestors_and_descendants(["c"], Some(1), Some(0))
            .into_iter()
            .collect();
        assert_eq!(around, vec!["b", "c", "x"]);
    }

    #[test]
    fn remove_and_reconnect_preserves_reachability() {
        let mut dag = chain();
        dag.remove_nodes_and_reconnect([&"b", &"c"]);

        assert!(!dag.contains(&"b"));
        assert!(dag.has_path(&"a", &"d"));
        assert!(dag.has_path(&"x", &"d"));
        assert_eq!(dag.edges(), vec![("a", "d"), ("x", "d")]);
    }

    #[test]
    fn subgraph_keeps_internal_edges() {
        let dag = chain();
        let sub = dag.subgraph([&"a", &"b", &"d"]);
        assert_eq!(sub.len(), 3);
        assert_eq!(sub.edges(), vec![("a", "b")]);
    }

    #[test]
    fn relabel_renames_nodes() {
        let dag = chain();
        let upper = dag.relabel(|n| n.to_uppercase()).unwrap();
        assert!(upper.has_path(&"A".to_string(), &"D".to_string()));

        // Merging b and d closes a cycle b -> c -> b
        let merged = dag.relabel(|n| if *n == "d" { "b" } else { *n });
        assert!(merged.is_err());
    }
}
