//! Starting identities, scope and graph loading

use crate::context::{ContextGraph, CredentialContext, SessionSettings};
use rolewalk_core::{Credentials, Identity, IdentityKind, IdentityService, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Register a starting profile in `graph`
///
/// Resolves the principal behind `credentials` with GetCallerIdentity and
/// stores a context backed by those credentials. If the principal is already
/// in the graph its existing context is returned.
pub async fn start_identity(
    service: Arc<dyn IdentityService>,
    name: &str,
    credentials: Credentials,
    settings: SessionSettings,
    graph: &Arc<ContextGraph>,
) -> Result<Arc<CredentialContext>> {
    let arn = service.get_caller_identity(&credentials).await?;
    let identity = Identity::new(IdentityKind::Profile, name, arn)?;
    let credentials = credentials.with_source(name);
    let context = Arc::new(CredentialContext::new_static(identity, credentials, service, settings, graph)?);

    match graph.add_node(context.clone()) {
        Some(_) => {
            info!("starting identity {} is {}", name, context.arn());
            Ok(context)
        }
        None => {
            debug!("starting identity {} already registered as {}", name, context.id());
            Ok(graph.get(context.id()).unwrap_or(context))
        }
    }
}

/// Accounts discovery is limited to
///
/// Entries may hold comma-separated lists. The accounts of the starting
/// identities are always included. Blank entries and duplicates are dropped,
/// first occurrence wins.
pub fn parse_scope(configured: &[String], starting: &[Arc<CredentialContext>]) -> Vec<String> {
    let from_config = configured.iter().flat_map(|entry| entry.split(','));
    let from_profiles = starting.iter().filter_map(|ctx| ctx.account().ok());

    let mut seen = HashSet::new();
    from_config
        .chain(from_profiles)
        .map(str::trim)
        .filter(|account| !account.is_empty())
        .filter(|account| seen.insert(account.to_string()))
        .map(str::to_string)
        .collect()
}

/// Load a persisted graph, binding every context to the new graph and `service`
pub fn load_graph<P: AsRef<Path>>(
    path: P,
    service: Arc<dyn IdentityService>,
    settings: &SessionSettings,
) -> Result<Arc<ContextGraph>> {
    let graph = Arc::new(ContextGraph::new());
    graph.load(path, |persisted| {
        CredentialContext::restore(persisted, service.clone(), settings, &graph)
    })?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockIdentityService;

    const ALICE: &str = "arn:aws:iam::111111111111:user/alice";

    #[tokio::test]
    async fn test_start_identity_registers_static_context() {
        let mock = Arc::new(MockIdentityService::new());
        let creds = mock.add_profile("AKIAALICE", ALICE);
        let graph = Arc::new(ContextGraph::new());

        let ctx = start_identity(mock.clone(), "default", creds, SessionSettings::default(), &graph)
            .await
            .unwrap();
        assert_eq!(ctx.id(), ALICE);
        assert_eq!(ctx.identity().kind, IdentityKind::Profile);
        assert_eq!(ctx.identity().name, "default");
        assert_eq!(ctx.source_kind(), "static");
        assert!(graph.contains(ALICE));

        let again = start_identity(
            mock.clone(),
            "other",
            mock.add_profile("AKIAALICE", ALICE),
            SessionSettings::default(),
            &graph,
        )
        .await
        .unwrap();
        assert!(Arc::ptr_eq(&ctx, &again));
    }

    #[tokio::test]
    async fn test_start_identity_unknown_key() {
        let mock = Arc::new(MockIdentityService::new());
        let graph = Arc::new(ContextGraph::new());
        let result = start_identity(
            mock,
            "default",
            Credentials::new_static("AKIANOPE", "s", "default"),
            SessionSettings::default(),
            &graph,
        )
        .await;
        assert!(result.is_err());
        assert!(graph.is_empty());
    }

    #[tokio::test]
    async fn test_parse_scope_merges_and_dedupes() {
        let mock = Arc::new(MockIdentityService::new());
        let graph = Arc::new(ContextGraph::new());
        let ctx = start_identity(
            mock.clone(),
            "default",
            mock.add_profile("AKIAALICE", ALICE),
            SessionSettings::default(),
            &graph,
        )
        .await
        .unwrap();

        let configured = vec![
            "222222222222, 333333333333".to_string(),
            "".to_string(),
            "222222222222".to_string(),
        ];
        assert_eq!(
            parse_scope(&configured, &[ctx]),
            vec!["222222222222", "333333333333", "111111111111"]
        );
        assert!(parse_scope(&[], &[]).is_empty());
    }
}
