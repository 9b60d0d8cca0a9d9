//! In-memory service implementations for tests
//!
//! Enabled with the `test-utils` feature.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rolewalk_core::{
    account_of, canonical_id, AccessLogSearch, AssumeRoleRequest, Credentials, IdentityService, MessageQueue,
    QueueMessage, Result, Role, RolewalkError,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type AssumeHook = Arc<dyn Fn(&AssumeRoleRequest) + Send + Sync>;

/// Identity service with a programmable trust table
///
/// AssumeRole succeeds when the caller signs with credentials the mock has
/// issued (or registered as a profile) and the trust table allows the caller
/// on the target. Every AssumeRole request is recorded.
pub struct MockIdentityService {
    trust: Mutex<HashMap<String, HashSet<String>>>,
    open_roles: Mutex<HashSet<String>>,
    allow_all: Mutex<bool>,
    keys: Mutex<HashMap<String, String>>,
    revoked: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<String, String>>,
    roles: Mutex<HashMap<String, Vec<Role>>>,
    list_failures: Mutex<HashSet<String>>,
    calls: Mutex<Vec<AssumeRoleRequest>>,
    hook: Mutex<Option<AssumeHook>>,
    issued: AtomicUsize,
    session_lifetime: Duration,
}

impl MockIdentityService {
    pub fn new() -> Self {
        Self {
            trust: Mutex::new(HashMap::new()),
            open_roles: Mutex::new(HashSet::new()),
            allow_all: Mutex::new(false),
            keys: Mutex::new(HashMap::new()),
            revoked: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
            roles: Mutex::new(HashMap::new()),
            list_failures: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
            issued: AtomicUsize::new(0),
            session_lifetime: Duration::hours(1),
        }
    }

    /// Lifetime of issued sessions
    pub fn with_session_lifetime(mut self, lifetime: Duration) -> Self {
        self.session_lifetime = lifetime;
        self
    }

    /// Register long-lived credentials belonging to `arn`
    pub fn add_profile(&self, access_key_id: &str, arn: &str) -> Credentials {
        self.keys.lock().insert(access_key_id.to_string(), arn.to_string());
        Credentials::new_static(access_key_id, "secret", "profile")
    }

    /// Let `caller` assume `target`
    pub fn allow(&self, caller: &str, target: &str) {
        self.trust
            .lock()
            .entry(target.to_string())
            .or_default()
            .insert(caller.to_string());
    }

    /// Let any known caller assume `target`
    pub fn allow_any(&self, target: &str) {
        self.open_roles.lock().insert(target.to_string());
    }

    /// Let any known caller assume any role
    pub fn allow_everything(&self) {
        *self.allow_all.lock() = true;
    }

    /// Make every AssumeRole into `target` fail with `reason`
    pub fn fail_assume(&self, target: &str, reason: &str) {
        self.failures.lock().insert(target.to_string(), reason.to_string());
    }

    pub fn clear_failure(&self, target: &str) {
        self.failures.lock().remove(target);
    }

    /// Invalidate every session issued so far for `role`
    pub fn revoke_sessions(&self, role: &str) {
        let keys = self.keys.lock();
        let mut revoked = self.revoked.lock();
        for (key, arn) in keys.iter() {
            if canonical_id(arn).map(|id| id == role).unwrap_or(false) && key.starts_with("ASIA") {
                revoked.insert(key.clone());
            }
        }
    }

    /// Make a role visible to `list_roles` in its account
    pub fn add_role(&self, role: Role) {
        let account = account_of(&role.arn).unwrap_or_default().to_string();
        self.roles.lock().entry(account).or_default().push(role);
    }

    pub fn fail_list(&self, account: &str) {
        self.list_failures.lock().insert(account.to_string());
    }

    /// Run `hook` at the start of every AssumeRole call
    pub fn set_hook<F>(&self, hook: F)
    where
        F: Fn(&AssumeRoleRequest) + Send + Sync + 'static,
    {
        *self.hook.lock() = Some(Arc::new(hook));
    }

    /// Every AssumeRole request received so far
    pub fn calls(&self) -> Vec<AssumeRoleRequest> {
        self.calls.lock().clone()
    }

    /// `(caller, target)` pairs of every AssumeRole request received so far
    pub fn call_pairs(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .iter()
            .map(|c| (c.caller_arn.clone(), c.role_arn.clone()))
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn principal_for(&self, credentials: &Credentials) -> Result<String> {
        if self.revoked.lock().contains(&credentials.access_key_id) {
            return Err(RolewalkError::service("ExpiredToken: the security token has been revoked"));
        }
        self.keys
            .lock()
            .get(&credentials.access_key_id)
            .cloned()
            .ok_or_else(|| RolewalkError::service("InvalidClientTokenId: unknown access key"))
    }

    fn trusts(&self, caller: &str, target: &str) -> bool {
        *self.allow_all.lock()
            || self.open_roles.lock().contains(target)
            || self
                .trust
                .lock()
                .get(target)
                .map(|callers| callers.contains(caller))
                .unwrap_or(false)
    }
}

impl Default for MockIdentityService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityService for MockIdentityService {
    async fn assume_role(&self, request: AssumeRoleRequest) -> Result<Credentials> {
        self.calls.lock().push(request.clone());
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook(&request);
        }

        let signer = self.principal_for(&request.caller_credentials)?;
        let caller = canonical_id(&signer)?;
        if caller != request.caller_arn {
            return Err(RolewalkError::service(format!(
                "request for {} signed by {}",
                request.caller_arn, caller
            )));
        }
        if let Some(reason) = self.failures.lock().get(&request.role_arn) {
            return Err(RolewalkError::service(reason.clone()));
        }
        if !self.trusts(&caller, &request.role_arn) {
            return Err(RolewalkError::service(format!(
                "AccessDenied: {} is not authorized to perform sts:AssumeRole on {}",
                caller, request.role_arn
            )));
        }

        let account = account_of(&request.role_arn)?;
        let name = request.role_arn.rsplit('/').next().unwrap_or_default();
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let key = format!("ASIA{:08}", n);
        self.keys.lock().insert(
            key.clone(),
            format!("arn:aws:sts::{}:assumed-role/{}/{}", account, name, request.session_name),
        );
        Ok(Credentials::new_session(
            key,
            "secret",
            format!("token-{}", n),
            Utc::now() + self.session_lifetime,
        ))
    }

    async fn get_caller_identity(&self, credentials: &Credentials) -> Result<String> {
        self.principal_for(credentials)
    }

    async fn list_roles(&self, credentials: &Credentials, account: &str) -> Result<Vec<Role>> {
        self.principal_for(credentials)?;
        if self.list_failures.lock().contains(account) {
            return Err(RolewalkError::service(format!("AccessDenied: iam:ListRoles in {}", account)));
        }
        Ok(self.roles.lock().get(account).cloned().unwrap_or_default())
    }
}

/// Access-log search returning canned events
#[derive(Default)]
pub struct MockAccessLog {
    events: Mutex<Vec<(DateTime<Utc>, String)>>,
    fail: Mutex<bool>,
    searches: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl MockAccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event at `at` carrying `raw` JSON
    pub fn add_event(&self, at: DateTime<Utc>, raw: impl Into<String>) {
        self.events.lock().push((at, raw.into()));
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Time ranges searched so far
    pub fn searches(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.searches.lock().clone()
    }
}

#[async_trait]
impl AccessLogSearch for MockAccessLog {
    async fn lookup_assume_role_events(
        &self,
        _credentials: &Credentials,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        self.searches.lock().push((start, end));
        if *self.fail.lock() {
            return Err(RolewalkError::service("AccessDenied: cloudtrail:LookupEvents"));
        }
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|(at, _)| *at >= start && *at < end)
            .map(|(_, raw)| raw.clone())
            .collect())
    }
}

/// Message queue holding pushed messages until deleted
#[derive(Default)]
pub struct MockMessageQueue {
    pending: Mutex<VecDeque<QueueMessage>>,
    deleted: Mutex<Vec<String>>,
    next: AtomicUsize,
}

impl MockMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, body: impl Into<String>) {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().push_back(QueueMessage {
            body: body.into(),
            receipt_handle: format!("receipt-{}", n),
        });
    }

    /// Receipt handles deleted so far
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl MessageQueue for MockMessageQueue {
    async fn receive(
        &self,
        _queue: &str,
        max_messages: u32,
        wait_seconds: u32,
        _visibility_timeout: u32,
    ) -> Result<Vec<QueueMessage>> {
        let batch: Vec<QueueMessage> = {
            let mut pending = self.pending.lock();
            let n = pending.len().min(max_messages as usize);
            pending.drain(..n).collect()
        };
        if batch.is_empty() {
            // stand-in for the long poll, kept short for tests
            tokio::time::sleep(std::time::Duration::from_millis(10 * u64::from(wait_seconds.min(1)))).await;
        }
        Ok(batch)
    }

    async fn delete(&self, _queue: &str, receipt_handle: &str) -> Result<()> {
        self.deleted.lock().push(receipt_handle.to_string());
        Ok(())
    }
}
