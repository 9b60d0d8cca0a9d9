//! Identity graph structure
//!
//! Manages the node table and the inbound/outbound edge sets of every node.
//! All mutation happens under one exclusive lock so the two sides of an edge
//! are never observed half-written.

use parking_lot::Mutex;
use rolewalk_core::error::{Result, RolewalkError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Values stored in the graph
pub trait GraphValue: Send + Sync + 'static {
    /// Wire form written by [`IdentityGraph::serialize`]
    type Persisted: Serialize + DeserializeOwned;

    /// Canonical ID used as the node key
    fn id(&self) -> String;

    /// Snapshot of the value for persistence
    fn persist(&self) -> Self::Persisted;
}

pub(crate) struct Entry<T> {
    pub(crate) value: Arc<T>,
    pub(crate) outbound: BTreeSet<String>,
    pub(crate) inbound: BTreeSet<String>,
}

impl<T> Entry<T> {
    pub(crate) fn new(value: Arc<T>) -> Self {
        Self {
            value,
            outbound: BTreeSet::new(),
            inbound: BTreeSet::new(),
        }
    }

    fn snapshot(&self, id: &str) -> Node<T> {
        Node {
            id: id.to_string(),
            value: self.value.clone(),
            outbound: self.outbound.iter().cloned().collect(),
            inbound: self.inbound.iter().cloned().collect(),
        }
    }
}

/// Point-in-time view of a node and its edges
#[derive(Debug)]
pub struct Node<T> {
    id: String,
    value: Arc<T>,
    outbound: Vec<String>,
    inbound: Vec<String>,
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            value: self.value.clone(),
            outbound: self.outbound.clone(),
            inbound: self.inbound.clone(),
        }
    }
}

impl<T> Node<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    /// IDs of the nodes this node can assume, sorted
    pub fn outbound(&self) -> &[String] {
        &self.outbound
    }

    /// IDs of the nodes that can assume this node, sorted
    pub fn inbound(&self) -> &[String] {
        &self.inbound
    }
}

/// One step of a depth-first traversal
pub struct TraversalStep<'a, T> {
    pub node: &'a Node<T>,
    /// IDs from the traversal root down to and including `node`
    pub path: &'a [String],
    /// `node` was already visited; the walk reports the edge but stops here
    pub closing: bool,
}

impl<T> TraversalStep<'_, T> {
    /// Number of hops from the root
    pub fn depth(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

/// Directed graph of identities keyed by canonical ID
pub struct IdentityGraph<T> {
    pub(crate) nodes: Mutex<HashMap<String, Entry<T>>>,
}

impl<T: GraphValue> IdentityGraph<T> {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Insert `value` if no node with its ID exists
    ///
    /// Returns the new node, or `None` if the ID was already present. The
    /// existing value is kept in that case.
    pub fn add_node(&self, value: Arc<T>) -> Option<Node<T>> {
        let id = value.id();
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(&id) {
            return None;
        }
        let entry = Entry::new(value);
        let node = entry.snapshot(&id);
        nodes.insert(id, entry);
        Some(node)
    }

    /// Record that `from` can assume `to`
    ///
    /// Missing endpoints are created. Self-edges are ignored. Returns whether
    /// the edge was new.
    pub fn add_edge(&self, from: Arc<T>, to: Arc<T>) -> bool {
        let from_id = from.id();
        let to_id = to.id();
        if from_id == to_id {
            debug!("ignoring self edge on {}", from_id);
            return false;
        }

        let mut nodes = self.nodes.lock();
        nodes.entry(from_id.clone()).or_insert_with(|| Entry::new(from));
        nodes.entry(to_id.clone()).or_insert_with(|| Entry::new(to));

        let added = nodes
            .get_mut(&from_id)
            .map(|entry| entry.outbound.insert(to_id.clone()))
            .unwrap_or(false);
        if let Some(entry) = nodes.get_mut(&to_id) {
            entry.inbound.insert(from_id);
        }
        added
    }

    /// Look up a node by canonical ID
    pub fn get_node(&self, id: &str) -> Result<Node<T>> {
        self.nodes
            .lock()
            .get(id)
            .map(|entry| entry.snapshot(id))
            .ok_or_else(|| RolewalkError::node_not_found(id))
    }

    /// Value stored under `id`, if any
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.nodes.lock().get(id).map(|entry| entry.value.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.lock().contains_key(id)
    }

    /// Values of every node with an edge into `id`
    pub fn parents(&self, id: &str) -> Result<Vec<Arc<T>>> {
        let nodes = self.nodes.lock();
        let entry = nodes.get(id).ok_or_else(|| RolewalkError::node_not_found(id))?;
        Ok(entry
            .inbound
            .iter()
            .filter_map(|parent| nodes.get(parent).map(|p| p.value.clone()))
            .collect())
    }

    /// Snapshot of every node, sorted by ID
    pub fn nodes(&self) -> Vec<Node<T>> {
        let nodes = self.nodes.lock();
        let mut all: Vec<Node<T>> = nodes.iter().map(|(id, entry)| entry.snapshot(id)).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.nodes.lock().values().map(|entry| entry.outbound.len()).sum()
    }

    /// Depth-first walk along outbound edges starting at `start`
    ///
    /// Every reachable node is expanded once. Reaching an already visited
    /// node invokes `visit` with `closing` set and does not expand it, which
    /// keeps cycles finite while still reporting the closing edge. `cancel`
    /// is checked before each expansion; steps already delivered stay valid.
    pub fn traverse<F>(&self, start: &str, cancel: &CancellationToken, mut visit: F) -> Result<()>
    where
        F: FnMut(TraversalStep<'_, T>),
    {
        let root = self.get_node(start)?;
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        self.traverse_from(root, false, cancel, &mut visited, &mut path, &mut visit);
        Ok(())
    }

    fn traverse_from<F>(
        &self,
        node: Node<T>,
        closing: bool,
        cancel: &CancellationToken,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
        visit: &mut F,
    ) where
        F: FnMut(TraversalStep<'_, T>),
    {
        path.push(node.id.clone());
        visited.insert(node.id.clone());
        visit(TraversalStep {
            node: &node,
            path: path.as_slice(),
            closing,
        });

        if !closing {
            for child_id in node.outbound() {
                if cancel.is_cancelled() {
                    break;
                }
                // Edges may point at nodes concurrently replaced by a load.
                let child = match self.get_node(child_id) {
                    Ok(child) => child,
                    Err(_) => continue,
                };
                let seen = visited.contains(child_id);
                self.traverse_from(child, seen, cancel, visited, path, visit);
            }
        }
        path.pop();
    }
}

impl<T: GraphValue> Default for IdentityGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    pub(crate) struct Named(pub String);

    impl GraphValue for Named {
        type Persisted = String;

        fn id(&self) -> String {
            self.0.clone()
        }

        fn persist(&self) -> String {
            self.0.clone()
        }
    }

    pub(crate) fn named(id: &str) -> Arc<Named> {
        Arc::new(Named(id.to_string()))
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let graph = IdentityGraph::new();
        assert!(graph.add_node(named("a")).is_some());
        assert!(graph.add_node(named("a")).is_none());
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_add_edge_creates_endpoints_and_both_sides() {
        let graph = IdentityGraph::new();
        assert!(graph.add_edge(named("a"), named("b")));
        assert!(!graph.add_edge(named("a"), named("b")));

        let a = graph.get_node("a").unwrap();
        let b = graph.get_node("b").unwrap();
        assert_eq!(a.outbound(), ["b".to_string()]);
        assert!(a.inbound().is_empty());
        assert_eq!(b.inbound(), ["a".to_string()]);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_add_edge_keeps_existing_value() {
        let graph = IdentityGraph::new();
        let first = named("b");
        graph.add_node(first.clone());
        graph.add_edge(named("a"), named("b"));
        assert!(Arc::ptr_eq(&graph.get("b").unwrap(), &first));
    }

    #[test]
    fn test_self_edge_rejected() {
        let graph = IdentityGraph::new();
        assert!(!graph.add_edge(named("a"), named("a")));
        assert_eq!(graph.len(), 0);
    }

    #[test]
    fn test_get_node_not_found() {
        let graph: IdentityGraph<Named> = IdentityGraph::new();
        assert!(matches!(graph.get_node("missing"), Err(RolewalkError::NodeNotFound(_))));
        assert!(graph.parents("missing").is_err());
    }

    #[test]
    fn test_parents() {
        let graph = IdentityGraph::new();
        graph.add_edge(named("p1"), named("t"));
        graph.add_edge(named("p2"), named("t"));
        let parents: Vec<String> = graph.parents("t").unwrap().iter().map(|p| p.0.clone()).collect();
        assert_eq!(parents, vec!["p1".to_string(), "p2".to_string()]);
    }

    #[test]
    fn test_traverse_terminates_on_cycle_and_reports_closing_edge() {
        let graph = IdentityGraph::new();
        graph.add_edge(named("a"), named("b"));
        graph.add_edge(named("b"), named("c"));
        graph.add_edge(named("c"), named("a"));

        let mut steps = Vec::new();
        graph
            .traverse("a", &CancellationToken::new(), |step| {
                steps.push((step.node.id().to_string(), step.depth(), step.closing));
            })
            .unwrap();

        assert_eq!(
            steps,
            vec![
                ("a".to_string(), 0, false),
                ("b".to_string(), 1, false),
                ("c".to_string(), 2, false),
                ("a".to_string(), 3, true),
            ]
        );
    }

    #[test]
    fn test_traverse_diamond_visits_shared_node_once_expanded() {
        let graph = IdentityGraph::new();
        graph.add_edge(named("root"), named("l"));
        graph.add_edge(named("root"), named("r"));
        graph.add_edge(named("l"), named("shared"));
        graph.add_edge(named("r"), named("shared"));
        graph.add_edge(named("shared"), named("leaf"));

        let mut expanded = Vec::new();
        let mut closing = Vec::new();
        graph
            .traverse("root", &CancellationToken::new(), |step| {
                if step.closing {
                    closing.push(step.node.id().to_string());
                } else {
                    expanded.push(step.node.id().to_string());
                }
            })
            .unwrap();

        assert_eq!(expanded, vec!["root", "l", "shared", "leaf", "r"]);
        assert_eq!(closing, vec!["shared"]);
    }

    #[test]
    fn test_traverse_stops_when_cancelled() {
        let graph = IdentityGraph::new();
        graph.add_edge(named("a"), named("b"));
        graph.add_edge(named("b"), named("c"));

        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        graph
            .traverse("a", &cancel, |step| {
                seen.push(step.node.id().to_string());
                cancel.cancel();
            })
            .unwrap();
        assert_eq!(seen, vec!["a"]);
    }

    #[test]
    fn test_traverse_unknown_start() {
        let graph: IdentityGraph<Named> = IdentityGraph::new();
        let result = graph.traverse("nope", &CancellationToken::new(), |_| {});
        assert!(matches!(result, Err(RolewalkError::NodeNotFound(_))));
    }

    #[test]
    fn test_concurrent_edges_keep_both_sides_consistent() {
        let graph = Arc::new(IdentityGraph::new());
        std::thread::scope(|s| {
            for t in 0..8 {
                let graph = graph.clone();
                s.spawn(move || {
                    for i in 0..100 {
                        graph.add_edge(named(&format!("n{}", (t + i) % 20)), named(&format!("n{}", i % 20)));
                    }
                });
            }
        });

        for node in graph.nodes() {
            for out in node.outbound() {
                assert!(graph.get_node(out).unwrap().inbound().contains(&node.id().to_string()));
            }
            for inb in node.inbound() {
                assert!(graph.get_node(inb).unwrap().outbound().contains(&node.id().to_string()));
            }
        }
    }
    mod properties {
        use super::{named, IdentityGraph};
        use proptest::prelude::*;
        use tokio_util::sync::CancellationToken;
        use std::collections::HashSet;

        proptest! {
            #[test]
            fn prop_edges_symmetric_and_traversal_finite(edges in prop::collection::vec((0u8..12, 0u8..12), 0..60)) {
                let graph = IdentityGraph::new();
                graph.add_node(named("n0"));
                for (a, b) in &edges {
                    graph.add_edge(named(&format!("n{}", a)), named(&format!("n{}", b)));
                }

                let distinct: HashSet<(u8, u8)> = edges.iter().copied().filter(|(a, b)| a != b).collect();
                prop_assert_eq!(graph.edge_count(), distinct.len());
                for node in graph.nodes() {
                    for out in node.outbound() {
                        prop_assert!(graph.get_node(out).unwrap().inbound().contains(&node.id().to_string()));
                    }
                }

                let mut expanded = Vec::new();
                graph
                    .traverse("n0", &CancellationToken::new(), |step| {
                        if !step.closing {
                            expanded.push(step.node.id().to_string());
                        }
                    })
                    .unwrap();
                let unique: HashSet<&String> = expanded.iter().collect();
                prop_assert_eq!(unique.len(), expanded.len());
            }
        }
    }
}
