//! Depth-bounded concurrent discovery and assumption
//!
//! Every identity that becomes accessible is published to the `access`
//! worklist, where discovery plugins pick it up and publish candidate roles
//! to `found_roles`. Each accessible identity also subscribes to
//! `found_roles` and tries every candidate, past and future, on the worker
//! pool. A successful assumption of a new identity registers it as
//! accessible in turn.

use crate::config::ScanConfig;
use crate::plugins::Plugin;
use crate::pool::WorkerPool;
use parking_lot::Mutex;
use rolewalk_core::{arn_in_scope, canonical_id, Identifiable, PubSubWorklist, Result, Role, RolewalkError};
use rolewalk_creds::{ContextGraph, CredentialContext};
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// An identity the scan holds credentials for
#[derive(Clone)]
pub struct Accessible(pub Arc<CredentialContext>);

impl Identifiable for Accessible {
    fn id(&self) -> String {
        self.0.id().to_string()
    }
}

/// State shared between the scheduler, its tasks and the plugins
pub struct Discovery {
    config: ScanConfig,
    scope: Vec<String>,
    graph: Arc<ContextGraph>,
    pool: WorkerPool,
    background: TaskTracker,
    access: PubSubWorklist<Accessible>,
    found_roles: PubSubWorklist<Role>,
    cancel: CancellationToken,
    fatal: Mutex<Option<RolewalkError>>,
}

impl Discovery {
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Accounts candidates must belong to; empty means unscoped
    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    pub fn in_scope(&self, arn: &str) -> bool {
        arn_in_scope(&self.scope, arn)
    }

    pub fn graph(&self) -> &Arc<ContextGraph> {
        &self.graph
    }

    pub fn access(&self) -> &PubSubWorklist<Accessible> {
        &self.access
    }

    pub fn found_roles(&self) -> &PubSubWorklist<Role> {
        &self.found_roles
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Publish a candidate role
    pub fn add_role(&self, role: Role) -> bool {
        self.found_roles.add(role)
    }

    /// Run `task` on the worker pool unless the scan was cancelled
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.pool.submit(task)
    }

    /// Run a long-lived task outside the pool; it should stop on cancellation
    pub fn spawn_background<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.background.spawn(task);
    }

    /// Record an error that stops the scan
    pub fn fail(&self, err: RolewalkError) {
        error!("stopping scan: {}", err);
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(err);
            }
        }
        self.cancel.cancel();
    }

    /// Register `context` in the graph and start expanding it
    pub fn register(self: &Arc<Self>, context: Arc<CredentialContext>) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.graph.add_node(context.clone());
        self.access.add(Accessible(context.clone()));

        let identity = context.identity();
        let depth = identity.depth();
        if depth >= self.config.max_depth {
            info!("max depth of {} reached when enumerating {}", self.config.max_depth, context.id());
            return;
        }
        if identity.is_recursive() {
            debug!("not expanding recursive identity {}", identity);
            return;
        }
        if self.config.no_assume {
            return;
        }

        debug!("running scan on {}", identity);
        let weak: Weak<Self> = Arc::downgrade(self);
        self.found_roles.walk(move |role: Role| {
            if let Some(discovery) = weak.upgrade() {
                let task = discovery.clone().assume_task(context.clone(), role);
                discovery.submit(task);
            }
        });
    }

    async fn assume_task(self: Arc<Self>, context: Arc<CredentialContext>, role: Role) {
        if self.cancel.is_cancelled() {
            return;
        }

        let target = match canonical_id(&role.arn) {
            Ok(target) => target,
            Err(e) => {
                debug!("skipping candidate {}: {}", role.arn, e);
                return;
            }
        };
        if target == context.id() {
            return;
        }
        if !self.in_scope(&target) {
            self.fail(RolewalkError::ScopeViolation { arn: target });
            return;
        }

        let external_id = role.external_id_for(context.id());
        match context.assume(&target, external_id).await {
            Ok(outcome) => {
                info!("{} -> {}", context.identity(), target);
                if outcome.is_new {
                    self.register(outcome.context);
                }
            }
            Err(e) => debug!("{}", e),
        }
    }
}

/// Drives a scan from a set of starting identities
pub struct DiscoveryScheduler {
    discovery: Arc<Discovery>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl DiscoveryScheduler {
    /// Create a scheduler; must be called inside a tokio runtime
    ///
    /// `scope` is the already merged account list (see
    /// [`rolewalk_creds::parse_scope`]). Disabled plugins are dropped here.
    pub fn new(
        config: ScanConfig,
        scope: Vec<String>,
        graph: Arc<ContextGraph>,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Self {
        let plugins = plugins
            .into_iter()
            .filter(|plugin| {
                let (enabled, reason) = plugin.enabled();
                if enabled {
                    info!("plugin {} enabled: {}", plugin.name(), reason);
                } else {
                    debug!("plugin {} disabled: {}", plugin.name(), reason);
                }
                enabled
            })
            .collect();

        let discovery = Arc::new(Discovery {
            pool: WorkerPool::new(config.workers),
            config,
            scope,
            graph,
            background: TaskTracker::new(),
            access: PubSubWorklist::new(),
            found_roles: PubSubWorklist::new(),
            cancel: CancellationToken::new(),
            fatal: Mutex::new(None),
        });

        Self { discovery, plugins }
    }

    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    pub fn graph(&self) -> &Arc<ContextGraph> {
        self.discovery.graph()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.discovery.cancel.clone()
    }

    /// Publish a candidate role before or during a scan
    pub fn add_role(&self, role: Role) -> bool {
        self.discovery.add_role(role)
    }

    /// Expand the graph from `starting` until no work is left
    ///
    /// Returns the error that stopped the scan, if any. Background plugins
    /// keep running until [`shutdown`](Self::shutdown).
    pub async fn run(&self, starting: Vec<Arc<CredentialContext>>) -> Result<()> {
        for plugin in &self.plugins {
            plugin.clone().start(&self.discovery);

            let plugin = plugin.clone();
            let weak = Arc::downgrade(&self.discovery);
            self.discovery.access.walk(move |accessible: Accessible| {
                if let Some(discovery) = weak.upgrade() {
                    plugin.clone().run(&discovery, accessible.0);
                }
            });
        }

        for context in starting {
            info!("starting from {}", context.arn());
            self.discovery.register(context);
        }

        self.wait().await
    }

    /// Wait for queued work to drain
    pub async fn wait(&self) -> Result<()> {
        self.discovery.pool.wait_idle().await;
        match self.discovery.fatal.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Cancel the scan and wait for background plugins to stop
    pub async fn shutdown(&self) {
        self.discovery.cancel.cancel();
        self.discovery.pool.close();
        self.discovery.background.close();
        self.discovery.background.wait().await;
    }
}

impl Drop for DiscoveryScheduler {
    fn drop(&mut self) {
        self.discovery.cancel.cancel();
    }
}
