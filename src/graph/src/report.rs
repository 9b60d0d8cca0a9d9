//! Text and Graphviz renderings of an identity graph

use crate::graph::{GraphValue, IdentityGraph, TraversalStep};
use rolewalk_core::account_of;
use rolewalk_core::error::Result;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write;
use tokio_util::sync::CancellationToken;

const PALETTE: &[&str] = &[
    "#8dd3c7", "#ffffb3", "#bebada", "#fb8072", "#80b1d3", "#fdb462", "#b3de69", "#fccde5",
];

/// Roots to render from
///
/// Requested roots are used as given. Otherwise the nodes nobody assumes come
/// first, followed by every other node in ID order, so components made only
/// of cycles are reached too.
fn default_roots<T: GraphValue>(graph: &IdentityGraph<T>, roots: &[String]) -> Vec<String> {
    if !roots.is_empty() {
        return roots.to_vec();
    }
    let mut ids: Vec<(bool, String)> = graph
        .nodes()
        .iter()
        .map(|node| (!node.inbound().is_empty(), node.id().to_string()))
        .collect();
    ids.sort();
    ids.into_iter().map(|(_, id)| id).collect()
}

/// Traverse from every root in turn
///
/// Implicit roots already reached from an earlier root are skipped, so each
/// node is expanded once across the whole rendering.
fn walk_roots<T, F>(graph: &IdentityGraph<T>, roots: &[String], cancel: &CancellationToken, mut visit: F) -> Result<()>
where
    T: GraphValue,
    F: FnMut(TraversalStep<'_, T>),
{
    let explicit = !roots.is_empty();
    let mut visited = HashSet::new();
    let mut started = HashSet::new();
    for root in default_roots(graph, roots) {
        if cancel.is_cancelled() {
            break;
        }
        if !started.insert(root.clone()) || (!explicit && visited.contains(&root)) {
            continue;
        }
        graph.traverse(&root, cancel, |step| {
            visited.insert(step.node.id().to_string());
            visit(step);
        })?;
    }
    Ok(())
}

/// Indented access listing
///
/// ```text
///  * arn:aws:iam::111111111111:user/alice
/// 	-> arn:aws:iam::111111111111:role/a
/// 		-> arn:aws:iam::222222222222:role/b
/// ```
///
/// Roots default to the nodes without inbound edges, then to any node those
/// do not reach.
pub fn render_tree<T: GraphValue>(
    graph: &IdentityGraph<T>,
    roots: &[String],
    cancel: &CancellationToken,
) -> Result<String> {
    let mut out = String::new();
    walk_roots(graph, roots, cancel, |step| {
        let id = step.node.id();
        let _ = if step.depth() == 0 {
            writeln!(out, " * {}", id)
        } else {
            writeln!(out, "{}-> {}", "\t".repeat(step.depth()), id)
        };
    })?;
    Ok(out)
}

/// Graphviz digraph with one node per identity, colored by account
pub fn render_dot<T: GraphValue>(
    graph: &IdentityGraph<T>,
    roots: &[String],
    cancel: &CancellationToken,
) -> Result<String> {
    let mut vertices = BTreeSet::new();
    let mut edges = BTreeSet::new();
    walk_roots(graph, roots, cancel, |step| {
        vertices.insert(step.node.id().to_string());
        if let [.., parent, child] = step.path {
            edges.insert((parent.clone(), child.clone()));
        }
    })?;

    let mut colors: BTreeMap<String, &str> = BTreeMap::new();
    let mut out = String::from("digraph rolewalk {\n\trankdir=LR;\n\tnode [shape=box, style=filled];\n");
    for id in &vertices {
        let account = account_of(id).unwrap_or("unknown").to_string();
        let next = colors.len();
        let color = *colors.entry(account).or_insert(PALETTE[next % PALETTE.len()]);
        let _ = writeln!(out, "\t\"{}\" [label=\"{}\", fillcolor=\"{}\"];", id, label(id), color);
    }
    for (from, to) in &edges {
        let _ = writeln!(out, "\t\"{}\" -> \"{}\";", from, to);
    }
    out.push_str("}\n");
    Ok(out)
}

fn label(id: &str) -> String {
    let name = id.rsplit('/').next().unwrap_or(id);
    match account_of(id) {
        Ok(account) => format!("{}\\n{}", name, account),
        Err(_) => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::named;

    const USER: &str = "arn:aws:iam::111111111111:user/alice";
    const ROLE_A: &str = "arn:aws:iam::111111111111:role/a";
    const ROLE_B: &str = "arn:aws:iam::222222222222:role/b";

    fn sample() -> IdentityGraph<crate::graph::tests::Named> {
        let graph = IdentityGraph::new();
        graph.add_edge(named(USER), named(ROLE_A));
        graph.add_edge(named(ROLE_A), named(ROLE_B));
        graph.add_edge(named(ROLE_B), named(ROLE_A));
        graph
    }

    #[test]
    fn test_render_tree_from_entry_points() {
        let tree = render_tree(&sample(), &[], &CancellationToken::new()).unwrap();
        let expected = format!(" * {}\n\t-> {}\n\t\t-> {}\n\t\t\t-> {}\n", USER, ROLE_A, ROLE_B, ROLE_A);
        assert_eq!(tree, expected);
    }

    #[test]
    fn test_render_tree_explicit_root() {
        let tree = render_tree(&sample(), &[ROLE_B.to_string()], &CancellationToken::new()).unwrap();
        assert!(tree.starts_with(&format!(" * {}\n", ROLE_B)));
        assert!(!tree.contains(USER));
    }

    #[test]
    fn test_render_tree_unknown_root() {
        assert!(render_tree(&sample(), &["missing".to_string()], &CancellationToken::new()).is_err());
    }

    #[test]
    fn test_render_dot_edges_and_colors() {
        let dot = render_dot(&sample(), &[], &CancellationToken::new()).unwrap();
        assert!(dot.starts_with("digraph rolewalk {"));
        assert!(dot.contains("rankdir=LR"));
        assert!(dot.contains(&format!("\"{}\" -> \"{}\";", USER, ROLE_A)));
        assert!(dot.contains(&format!("\"{}\" -> \"{}\";", ROLE_A, ROLE_B)));
        assert!(dot.contains(&format!("\"{}\" -> \"{}\";", ROLE_B, ROLE_A)));
        assert_eq!(dot.matches(" -> ").count(), 3);
        // two accounts, two colors
        assert!(dot.contains(PALETTE[0]));
        assert!(dot.contains(PALETTE[1]));
    }

    #[test]
    fn test_render_cycle_only_graph() {
        let graph = IdentityGraph::new();
        graph.add_edge(named(ROLE_A), named(ROLE_B));
        graph.add_edge(named(ROLE_B), named(ROLE_A));
        let dot = render_dot(&graph, &[], &CancellationToken::new()).unwrap();
        assert_eq!(dot.matches(" -> ").count(), 2);
    }

    #[test]
    fn test_disconnected_cycle_is_rendered() {
        const ROLE_C: &str = "arn:aws:iam::333333333333:role/c";
        const ROLE_D: &str = "arn:aws:iam::333333333333:role/d";
        let graph = IdentityGraph::new();
        graph.add_edge(named(USER), named(ROLE_A));
        graph.add_edge(named(ROLE_C), named(ROLE_D));
        graph.add_edge(named(ROLE_D), named(ROLE_C));

        let dot = render_dot(&graph, &[], &CancellationToken::new()).unwrap();
        assert_eq!(dot.matches(" -> ").count(), graph.edge_count());
        assert!(dot.contains(&format!("\"{}\" -> \"{}\";", ROLE_C, ROLE_D)));
        assert!(dot.contains(&format!("\"{}\" -> \"{}\";", ROLE_D, ROLE_C)));

        let tree = render_tree(&graph, &[], &CancellationToken::new()).unwrap();
        let expected = format!(
            " * {}\n\t-> {}\n * {}\n\t-> {}\n\t\t-> {}\n",
            USER, ROLE_A, ROLE_C, ROLE_D, ROLE_C
        );
        assert_eq!(tree, expected);
    }
}
