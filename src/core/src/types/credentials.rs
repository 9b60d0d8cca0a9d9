//! Temporary or long-lived credential values

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A set of credentials for one identity
///
/// `source` records the ARN of the principal whose AssumeRole call produced
/// these credentials, or the profile name for static credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Credentials {
    #[serde(rename = "AccessKeyID")]
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub can_expire: bool,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Long-lived credentials that never expire
    pub fn new_static(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            source: source.into(),
            ..Default::default()
        }
    }

    /// Session credentials valid until `expires`
    pub fn new_session(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
        expires: DateTime<Utc>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: session_token.into(),
            can_expire: true,
            expires: Some(expires),
            ..Default::default()
        }
    }

    /// Tag these credentials with the principal that derived them
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Whether the credentials are expired at `now`, treating `window` before
    /// expiry as already expired
    pub fn is_expired_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match (self.can_expire, self.expires) {
            (true, Some(expires)) => now + window >= expires,
            _ => false,
        }
    }

    /// Whether the credentials are expired right now
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now(), Duration::zero())
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("source", &self.source)
            .field("can_expire", &self.can_expire)
            .field("expires", &self.expires)
            .finish_non_exhaustive()
    }
}
