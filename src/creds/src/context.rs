//! Per-identity credential state
//!
//! A [`CredentialContext`] is the value stored in every graph node. It knows
//! how to obtain credentials for its identity and how to assume other roles
//! as that identity.

use crate::lazy::LazyAssumeProvider;
use crate::provider::{
    CredentialProvider, CredentialsCache, ResolveChain, StaticProvider, DEFAULT_EXPIRY_WINDOW_SECS,
    DEFAULT_JITTER_FRACTION,
};
use chrono::Duration;
use rolewalk_core::{
    canonical_id, AssumeRoleRequest, Credentials, Identity, IdentityKind, IdentityService, Result, RolewalkError,
};
use rolewalk_graph::{GraphValue, IdentityGraph};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Graph of credential contexts
pub type ContextGraph = IdentityGraph<CredentialContext>;

/// Lifecycle of a context's credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ContextState {
    Active = 0,
    Refreshing = 1,
    Failed = 2,
}

impl ContextState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ContextState::Refreshing,
            2 => ContextState::Failed,
            _ => ContextState::Active,
        }
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContextState::Active => "active",
            ContextState::Refreshing => "refreshing",
            ContextState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Settings shared by a starting identity and everything derived from it
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub region: String,
    pub session_name: String,
    pub expiry_window: Duration,
    pub jitter_fraction: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            session_name: "rolewalk".to_string(),
            expiry_window: Duration::seconds(DEFAULT_EXPIRY_WINDOW_SECS),
            jitter_fraction: DEFAULT_JITTER_FRACTION,
        }
    }
}

/// Result of a successful [`CredentialContext::assume`]
#[derive(Debug, Clone)]
pub struct AssumeOutcome {
    /// Context stored in the graph for the target
    pub context: Arc<CredentialContext>,
    /// Whether the target's node was created by this call
    pub is_new: bool,
}

/// Persisted form of a context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PersistedContext {
    pub arn: String,
    pub state: ContextState,
    pub region: String,
    pub credentials: Option<Credentials>,
    pub identity: Identity,
    /// External ID presented when re-deriving through a parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// Live or derivable credentials for one identity
pub struct CredentialContext {
    id: String,
    identity: Identity,
    external_id: Option<String>,
    settings: SessionSettings,
    cache: CredentialsCache,
    state: AtomicU8,
    graph: Weak<ContextGraph>,
    service: Arc<dyn IdentityService>,
}

impl CredentialContext {
    fn build(
        identity: Identity,
        external_id: Option<String>,
        provider: Arc<dyn CredentialProvider>,
        service: Arc<dyn IdentityService>,
        settings: SessionSettings,
        graph: Weak<ContextGraph>,
    ) -> Result<Self> {
        identity.validate()?;
        let id = identity.id()?;
        let cache = CredentialsCache::new(provider)
            .with_expiry_window(settings.expiry_window)
            .with_jitter_fraction(settings.jitter_fraction);
        Ok(Self {
            id,
            identity,
            external_id,
            settings,
            cache,
            state: AtomicU8::new(ContextState::Active as u8),
            graph,
            service,
        })
    }

    /// Context backed by fixed credentials, as used for starting profiles
    pub fn new_static(
        identity: Identity,
        credentials: Credentials,
        service: Arc<dyn IdentityService>,
        settings: SessionSettings,
        graph: &Arc<ContextGraph>,
    ) -> Result<Self> {
        let provider = Arc::new(StaticProvider::new(credentials));
        Self::build(identity, None, provider, service, settings, Arc::downgrade(graph))
    }

    /// Context whose credentials are derived through its inbound parents
    pub fn new_lazy(
        identity: Identity,
        external_id: Option<String>,
        service: Arc<dyn IdentityService>,
        settings: SessionSettings,
        graph: &Arc<ContextGraph>,
    ) -> Result<Self> {
        let id = identity.id()?;
        let provider = Arc::new(LazyAssumeProvider::new(Arc::downgrade(graph), id, external_id.clone()));
        Self::build(identity, external_id, provider, service, settings, Arc::downgrade(graph))
    }

    /// Rebuild a context from its persisted form
    ///
    /// Profiles keep their snapshot as a static source. Every other node is
    /// re-derived through the graph with its saved external ID, the snapshot
    /// seeding the cache when one was saved.
    pub fn restore(
        persisted: PersistedContext,
        service: Arc<dyn IdentityService>,
        settings: &SessionSettings,
        graph: &Arc<ContextGraph>,
    ) -> Result<Self> {
        let settings = SessionSettings {
            region: persisted.region,
            ..settings.clone()
        };
        let context = match (persisted.identity.kind, persisted.credentials) {
            (IdentityKind::Profile, Some(credentials)) => {
                Self::new_static(persisted.identity, credentials, service, settings, graph)?
            }
            (_, snapshot) => {
                let context = Self::new_lazy(persisted.identity, persisted.external_id, service, settings, graph)?;
                if let Some(credentials) = snapshot {
                    context.cache.seed(credentials);
                }
                context
            }
        };
        if canonical_id(&persisted.arn)? != context.id {
            return Err(RolewalkError::serialization(format!(
                "persisted arn {} does not match identity {}",
                persisted.arn, context.id
            )));
        }
        context.set_state(persisted.state);
        Ok(context)
    }

    /// Assume `target_arn` as this identity
    ///
    /// On success the target is registered in the graph together with the
    /// edge from this identity. When the target was already known its
    /// existing context is returned and only the edge is added. Failures
    /// leave the graph untouched.
    pub async fn assume(self: &Arc<Self>, target_arn: &str, external_id: Option<String>) -> Result<AssumeOutcome> {
        let target_id = canonical_id(target_arn)?;
        if target_id == self.id {
            return Err(RolewalkError::AssumeRoleFailed {
                caller: self.id.clone(),
                target: target_id,
                reason: "an identity cannot assume itself".to_string(),
            });
        }

        // Proves the assumption works; the session itself is re-derived on demand.
        self.assume_credentials(&target_id, external_id.clone(), &ResolveChain::new())
            .await?;

        let graph = self.graph()?;
        let identity = Identity::assumed_from(&self.identity, target_id.clone())?;
        let candidate = Arc::new(Self::new_lazy(
            identity,
            external_id,
            self.service.clone(),
            self.settings.clone(),
            &graph,
        )?);

        let is_new = graph.add_node(candidate.clone()).is_some();
        graph.add_edge(self.clone(), candidate.clone());
        let context = graph.get(&target_id).unwrap_or(candidate);
        Ok(AssumeOutcome { context, is_new })
    }

    /// Discard cached credentials and derive new ones
    ///
    /// Leaves the context `Active` on success and `Failed` when no source
    /// works. A failed context stays failed until refreshed again.
    pub async fn refresh(&self) -> Result<Credentials> {
        self.set_state(ContextState::Refreshing);
        self.cache.invalidate();
        match self.resolve(&ResolveChain::new()).await {
            Ok(credentials) => {
                self.set_state(ContextState::Active);
                info!("refreshed {} via {}", self.id, credentials.source);
                Ok(credentials)
            }
            Err(e) => {
                self.set_state(ContextState::Failed);
                warn!("refresh of {} failed: {}", self.id, e);
                Err(e)
            }
        }
    }

    /// Current credentials, re-derived when stale
    pub async fn credentials(&self) -> Result<Credentials> {
        self.resolve(&ResolveChain::new()).await
    }

    async fn resolve(&self, chain: &ResolveChain) -> Result<Credentials> {
        self.cache.get(&chain.extended(&self.id)).await
    }

    /// Assume `target_arn` as this identity without touching the graph
    ///
    /// `chain` lists the identities already waiting on this resolution.
    pub(crate) async fn assume_credentials(
        &self,
        target_arn: &str,
        external_id: Option<String>,
        chain: &ResolveChain,
    ) -> Result<Credentials> {
        let caller_credentials = self.resolve(chain).await?;
        let request = AssumeRoleRequest {
            caller_arn: self.id.clone(),
            caller_credentials,
            role_arn: target_arn.to_string(),
            session_name: self.settings.session_name.clone(),
            external_id,
        };
        match self.service.assume_role(request).await {
            Ok(credentials) => Ok(credentials.with_source(self.identity.arn.clone())),
            Err(e) => {
                debug!("AssumeRole {} -> {} failed: {}", self.id, target_arn, e);
                Err(RolewalkError::AssumeRoleFailed {
                    caller: self.id.clone(),
                    target: target_arn.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Canonical ID of this identity
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn arn(&self) -> &str {
        &self.identity.arn
    }

    /// Role or user name without its path
    pub fn name(&self) -> &str {
        self.identity.short_name()
    }

    pub fn account(&self) -> Result<&str> {
        self.identity.account()
    }

    pub fn region(&self) -> &str {
        &self.settings.region
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn service(&self) -> &Arc<dyn IdentityService> {
        &self.service
    }

    /// Diagnostic only; the value may change concurrently
    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: ContextState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Last resolved credentials without triggering a resolution
    pub fn cached_credentials(&self) -> Option<Credentials> {
        self.cache.cached()
    }

    /// Kind of the credential source (`static` or `assume`)
    pub fn source_kind(&self) -> &'static str {
        self.cache.provider().kind()
    }

    /// The graph this context is registered in
    pub fn graph(&self) -> Result<Arc<ContextGraph>> {
        self.graph.upgrade().ok_or(RolewalkError::GraphDropped)
    }
}

impl fmt::Debug for CredentialContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialContext")
            .field("id", &self.id)
            .field("region", &self.settings.region)
            .field("state", &self.state())
            .field("source", &self.source_kind())
            .finish_non_exhaustive()
    }
}

impl GraphValue for CredentialContext {
    type Persisted = PersistedContext;

    fn id(&self) -> String {
        self.id.clone()
    }

    fn persist(&self) -> PersistedContext {
        PersistedContext {
            arn: self.identity.arn.clone(),
            state: self.state(),
            region: self.settings.region.clone(),
            credentials: self.cache.cached(),
            identity: self.identity.clone(),
            external_id: self.external_id.clone(),
        }
    }
}
