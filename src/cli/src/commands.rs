//! Subcommand implementations

use anyhow::{Context, Result};
use rolewalk_creds::{load_graph, OfflineService, SessionSettings};
use rolewalk_graph::{render_dot, render_tree};
use rolewalk_scan::ScanConfig;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Load a saved graph without network access and render it as a tree
///
/// When `dot` is set the DOT rendering is written there as well.
pub fn report(graph_path: &Path, roots: &[String], dot: Option<&Path>, cancel: &CancellationToken) -> Result<String> {
    let graph = load_graph(graph_path, Arc::new(OfflineService), &SessionSettings::default())
        .with_context(|| format!("Failed to load graph from {}", graph_path.display()))?;
    info!(
        "Loaded {} identities and {} access paths from {:?}",
        graph.len(),
        graph.edge_count(),
        graph_path
    );

    if graph.is_empty() {
        warn!("graph {:?} is empty", graph_path);
        return Ok(String::new());
    }

    let tree = render_tree(&graph, roots, cancel).context("Failed to render tree")?;

    if let Some(out) = dot {
        let rendered = render_dot(&graph, roots, cancel).context("Failed to render DOT")?;
        std::fs::write(out, rendered).with_context(|| format!("Failed to write {}", out.display()))?;
        info!("Wrote DOT graph to {:?}", out);
    }

    Ok(tree)
}

/// Load and validate a scan configuration, returning a short summary
pub fn check_config(path: &Path) -> Result<String> {
    let config = ScanConfig::load(path)?;
    config.validate()?;

    let scope = if config.scope.is_empty() {
        "unscoped".to_string()
    } else {
        config.scope.join(",")
    };
    Ok(format!(
        "{}: ok (region {}, scope {}, max depth {}, {} workers)",
        path.display(),
        config.region,
        scope,
        config.max_depth,
        config.workers
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolewalk_creds::mocks::MockIdentityService;
    use rolewalk_creds::{start_identity, ContextGraph};
    use tempfile::TempDir;

    const ALICE: &str = "arn:aws:iam::111111111111:user/alice";
    const ADMIN: &str = "arn:aws:iam::222222222222:role/admin";

    async fn saved_graph(dir: &TempDir) -> std::path::PathBuf {
        let mock = Arc::new(MockIdentityService::new());
        mock.allow(ALICE, ADMIN);
        let graph = Arc::new(ContextGraph::new());
        let creds = mock.add_profile("AKIAALICE", ALICE);
        let start = start_identity(mock, "default", creds, SessionSettings::default(), &graph)
            .await
            .unwrap();
        start.assume(ADMIN, None).await.unwrap();

        let path = dir.path().join("graph.json");
        graph.save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn test_report_tree_and_dot() {
        let dir = TempDir::new().unwrap();
        let path = saved_graph(&dir).await;
        let dot = dir.path().join("graph.dot");

        let tree = report(&path, &[], Some(&dot), &CancellationToken::new()).unwrap();
        assert_eq!(tree, format!(" * {}\n\t-> {}\n", ALICE, ADMIN));

        let rendered = std::fs::read_to_string(&dot).unwrap();
        assert!(rendered.contains(&format!("\"{}\" -> \"{}\";", ALICE, ADMIN)));
    }

    #[tokio::test]
    async fn test_report_unknown_root() {
        let dir = TempDir::new().unwrap();
        let path = saved_graph(&dir).await;
        let roots = vec!["arn:aws:iam::333333333333:role/missing".to_string()];
        assert!(report(&path, &roots, None, &CancellationToken::new()).is_err());
    }

    #[test]
    fn test_report_missing_file() {
        let err = report(Path::new("/nonexistent/graph.json"), &[], None, &CancellationToken::new()).unwrap_err();
        assert!(err.to_string().contains("Failed to load graph"));
    }

    #[test]
    fn test_check_config() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.toml");
        std::fs::write(&good, "scope = [\"111111111111\"]\nworkers = 2\n").unwrap();
        let summary = check_config(&good).unwrap();
        assert!(summary.contains("scope 111111111111"));
        assert!(summary.contains("2 workers"));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "max_depth = 0\n").unwrap();
        assert!(check_config(&bad).is_err());
    }
}
