//! Traits implemented by the external service clients

pub mod service;

// Re-export commonly used traits
pub use service::{AccessLogSearch, AssumeRoleRequest, IdentityService, MessageQueue, QueueMessage};
