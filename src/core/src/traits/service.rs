//! Identity/access service abstractions
//!
//! The wire clients for the cloud control plane live outside this workspace.
//! The core only consumes the typed results these traits return.

use crate::error::Result;
use crate::types::{Credentials, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Parameters for a single AssumeRole call
#[derive(Debug, Clone)]
pub struct AssumeRoleRequest {
    /// Canonical ID of the principal making the call
    pub caller_arn: String,
    /// Credentials the call is signed with
    pub caller_credentials: Credentials,
    /// Role being assumed
    pub role_arn: String,
    /// Session name recorded by the service
    pub session_name: String,
    /// External ID required by the role's trust policy, if any
    pub external_id: Option<String>,
}

/// Identity service (STS/IAM) client
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Exchange the caller's credentials for credentials of `request.role_arn`
    async fn assume_role(&self, request: AssumeRoleRequest) -> Result<Credentials>;

    /// ARN of the principal owning `credentials`
    async fn get_caller_identity(&self, credentials: &Credentials) -> Result<String>;

    /// Every role visible in `account`, with paging already flattened
    async fn list_roles(&self, credentials: &Credentials, account: &str) -> Result<Vec<Role>>;
}

/// Historical access-log search (CloudTrail LookupEvents)
#[async_trait]
pub trait AccessLogSearch: Send + Sync {
    /// Raw JSON of every AssumeRole event between `start` and `end`
    async fn lookup_assume_role_events(
        &self,
        credentials: &Credentials,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>>;
}

/// A message received from a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

/// Message queue (SQS) client
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Long-poll for up to `max_messages` messages
    async fn receive(
        &self,
        queue: &str,
        max_messages: u32,
        wait_seconds: u32,
        visibility_timeout: u32,
    ) -> Result<Vec<QueueMessage>>;

    /// Remove a received message from the queue
    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<()>;
}
