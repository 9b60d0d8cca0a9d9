use super::Plugin;
use crate::scheduler::Discovery;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rolewalk_creds::CredentialContext;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Lists the roles of every account an accessible identity belongs to
pub struct ListPlugin {
    covered: DashMap<String, String>,
}

impl ListPlugin {
    pub fn new() -> Self {
        Self {
            covered: DashMap::new(),
        }
    }

    /// Claim `account` for `arn`; false when another identity already has
    fn claim(&self, account: &str, arn: &str) -> bool {
        match self.covered.entry(account.to_string()) {
            Entry::Occupied(by) => {
                debug!("already listed roles in {} with {}", account, by.get());
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(arn.to_string());
                true
            }
        }
    }

    pub fn is_covered(&self, account: &str) -> bool {
        self.covered.contains_key(account)
    }

    async fn list(&self, discovery: &Discovery, context: &CredentialContext, account: &str) {
        if discovery.is_cancelled() {
            return;
        }
        let result = match context.credentials().await {
            Ok(credentials) => context.service().list_roles(&credentials, account).await,
            Err(e) => Err(e),
        };

        let roles = match result {
            Ok(roles) => roles,
            Err(e) => {
                error!("error listing roles in {} as {}: {}", account, context.id(), e);
                self.covered.remove(account);
                return;
            }
        };

        let mut added = 0;
        for role in roles {
            if !discovery.in_scope(&role.arn) {
                debug!("not in scope, skipping: {}", role.arn);
                continue;
            }
            let arn = role.arn.clone();
            if discovery.add_role(role) {
                debug!("list roles: found: {}", arn);
                added += 1;
            }
        }
        info!("listed {} new roles in {}", added, account);
    }
}

impl Default for ListPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for ListPlugin {
    fn name(&self) -> &'static str {
        "list"
    }

    fn enabled(&self) -> (bool, String) {
        (true, "will call iam:ListRoles to discover roles".to_string())
    }

    fn run(self: Arc<Self>, discovery: &Arc<Discovery>, context: Arc<CredentialContext>) {
        let account = match context.account() {
            Ok(account) => account.to_string(),
            Err(e) => {
                debug!("not listing roles for {}: {}", context.id(), e);
                return;
            }
        };
        if !self.claim(&account, context.id()) {
            return;
        }

        let task_discovery = discovery.clone();
        let submitted = discovery.submit(async move {
            self.list(&task_discovery, &context, &account).await;
        });
        if !submitted {
            debug!("scan stopped before roles could be listed");
        }
    }
}
