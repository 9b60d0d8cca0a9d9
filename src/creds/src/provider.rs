//! Credential sources and the expiring cache in front of them

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use rolewalk_core::{Credentials, Result};
use std::sync::Arc;

/// Default time before expiry at which cached credentials count as stale
pub const DEFAULT_EXPIRY_WINDOW_SECS: i64 = 300;

/// Default share of the expiry window removed at random per stored value
pub const DEFAULT_JITTER_FRACTION: f64 = 0.7;

/// IDs of the identities whose credentials are currently being resolved
///
/// Threaded through nested resolutions so a parent that is itself waiting on
/// the caller is skipped instead of recursed into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveChain(Vec<String>);

impl ResolveChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|entry| entry == id)
    }

    /// Copy of this chain with `id` appended
    pub fn extended(&self, id: &str) -> Self {
        let mut ids = self.0.clone();
        ids.push(id.to_string());
        Self(ids)
    }

    pub fn ids(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Source of fresh credentials for one identity
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Produce new credentials, bypassing any cache
    async fn retrieve(&self, chain: &ResolveChain) -> Result<Credentials>;

    /// Short label used in logs
    fn kind(&self) -> &'static str;
}

/// Fixed credentials loaded from a starting profile
pub struct StaticProvider {
    credentials: Credentials,
}

impl StaticProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticProvider {
    async fn retrieve(&self, _chain: &ResolveChain) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }

    fn kind(&self) -> &'static str {
        "static"
    }
}

struct CachedValue {
    credentials: Credentials,
    stale_at: Option<DateTime<Utc>>,
}

/// Caches the last value of a provider until it falls inside its expiry window
///
/// The window is shrunk by a random fraction each time a value is stored, so
/// consumers sharing an identity do not all re-resolve at the same instant.
/// Failures are never cached.
pub struct CredentialsCache {
    provider: Arc<dyn CredentialProvider>,
    value: Mutex<Option<CachedValue>>,
    expiry_window: Duration,
    jitter_fraction: f64,
}

impl CredentialsCache {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            value: Mutex::new(None),
            expiry_window: Duration::seconds(DEFAULT_EXPIRY_WINDOW_SECS),
            jitter_fraction: DEFAULT_JITTER_FRACTION,
        }
    }

    pub fn with_expiry_window(mut self, window: Duration) -> Self {
        self.expiry_window = window.max(Duration::zero());
        self
    }

    /// Jitter is clamped to `0.0..=1.0`
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn provider(&self) -> &Arc<dyn CredentialProvider> {
        &self.provider
    }

    /// Cached credentials if still fresh, otherwise a new value from the provider
    pub async fn get(&self, chain: &ResolveChain) -> Result<Credentials> {
        if let Some(credentials) = self.fresh_at(Utc::now()) {
            return Ok(credentials);
        }
        let credentials = self.provider.retrieve(chain).await?;
        self.store(credentials.clone());
        Ok(credentials)
    }

    /// Drop the cached value so the next `get` goes to the provider
    pub fn invalidate(&self) {
        *self.value.lock() = None;
    }

    /// Install a value obtained elsewhere, such as a persisted snapshot
    pub fn seed(&self, credentials: Credentials) {
        self.store(credentials);
    }

    /// Last stored value, fresh or not
    pub fn cached(&self) -> Option<Credentials> {
        self.value.lock().as_ref().map(|v| v.credentials.clone())
    }

    /// Instant after which the stored value is re-resolved, `None` if it never expires
    pub fn stale_at(&self) -> Option<DateTime<Utc>> {
        self.value.lock().as_ref().and_then(|v| v.stale_at)
    }

    fn fresh_at(&self, now: DateTime<Utc>) -> Option<Credentials> {
        let value = self.value.lock();
        let cached = value.as_ref()?;
        match cached.stale_at {
            Some(stale_at) if now >= stale_at => None,
            _ => Some(cached.credentials.clone()),
        }
    }

    fn store(&self, credentials: Credentials) {
        let stale_at = match (credentials.can_expire, credentials.expires) {
            (true, Some(expires)) => Some(expires - self.jittered_window()),
            _ => None,
        };
        *self.value.lock() = Some(CachedValue { credentials, stale_at });
    }

    fn jittered_window(&self) -> Duration {
        let window_ms = self.expiry_window.num_milliseconds() as f64;
        let jitter: f64 = rand::thread_rng().gen::<f64>() * self.jitter_fraction;
        Duration::milliseconds((window_ms * (1.0 - jitter)) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        lifetime: Duration,
        fail: bool,
    }

    #[async_trait]
    impl CredentialProvider for Counting {
        async fn retrieve(&self, _chain: &ResolveChain) -> Result<Credentials> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(rolewalk_core::RolewalkError::service("unavailable"));
            }
            Ok(Credentials::new_session(format!("ASIA{}", n), "secret", "token", Utc::now() + self.lifetime))
        }

        fn kind(&self) -> &'static str {
            "counting"
        }
    }

    fn counting(lifetime: Duration, fail: bool) -> Arc<Counting> {
        Arc::new(Counting { calls: AtomicUsize::new(0), lifetime, fail })
    }

    #[test]
    fn test_resolve_chain() {
        let chain = ResolveChain::new().extended("a").extended("b");
        assert!(chain.contains("a"));
        assert!(!chain.contains("c"));
        assert_eq!(chain.ids(), ["a".to_string(), "b".to_string()]);
        assert!(ResolveChain::new().is_empty());
    }

    #[tokio::test]
    async fn test_static_provider_never_goes_stale() {
        let cache = CredentialsCache::new(Arc::new(StaticProvider::new(Credentials::new_static("AKIA", "s", "default"))));
        let creds = cache.get(&ResolveChain::new()).await.unwrap();
        assert_eq!(creds.access_key_id, "AKIA");
        assert!(cache.stale_at().is_none());
        assert_eq!(cache.provider().kind(), "static");
    }

    #[tokio::test]
    async fn test_fresh_value_is_reused_until_invalidated() {
        let provider = counting(Duration::hours(1), false);
        let cache = CredentialsCache::new(provider.clone());

        let first = cache.get(&ResolveChain::new()).await.unwrap();
        let second = cache.get(&ResolveChain::new()).await.unwrap();
        assert_eq!(first.access_key_id, second.access_key_id);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        cache.invalidate();
        assert!(cache.cached().is_none());
        let third = cache.get(&ResolveChain::new()).await.unwrap();
        assert_ne!(first.access_key_id, third.access_key_id);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_value_inside_expiry_window_is_refetched() {
        // expires in 2 minutes, window is 5 minutes: always stale
        let provider = counting(Duration::minutes(2), false);
        let cache = CredentialsCache::new(provider.clone()).with_jitter_fraction(0.0);
        cache.get(&ResolveChain::new()).await.unwrap();
        cache.get(&ResolveChain::new()).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let provider = counting(Duration::hours(1), true);
        let cache = CredentialsCache::new(provider.clone());
        assert!(cache.get(&ResolveChain::new()).await.is_err());
        assert!(cache.get(&ResolveChain::new()).await.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(cache.cached().is_none());
    }

    #[test]
    fn test_jittered_window_bounds() {
        let expires = Utc::now() + Duration::minutes(30);
        let cache = CredentialsCache::new(counting(Duration::hours(1), false))
            .with_expiry_window(Duration::minutes(10))
            .with_jitter_fraction(0.7);

        for _ in 0..200 {
            cache.seed(Credentials::new_session("ASIA", "s", "t", expires));
            let stale_at = cache.stale_at().unwrap();
            // window shrinks to somewhere between 3 and 10 minutes
            assert!(stale_at >= expires - Duration::minutes(10));
            assert!(stale_at <= expires - Duration::minutes(3));
        }
    }

    #[test]
    fn test_jitter_fraction_is_clamped() {
        let expires = Utc::now() + Duration::minutes(30);
        let cache = CredentialsCache::new(counting(Duration::hours(1), false))
            .with_expiry_window(Duration::minutes(10))
            .with_jitter_fraction(5.0);
        cache.seed(Credentials::new_session("ASIA", "s", "t", expires));
        assert!(cache.stale_at().unwrap() <= expires);
    }
}
