//! # rolewalk core
//!
//! Shared identity types, external service traits, the error taxonomy and the
//! publish/subscribe worklist used by the graph, credential and scan crates.

pub mod error;
pub mod traits;
pub mod types;
pub mod worklist;

// Re-export commonly used types
pub use error::{ParentFailure, Result, RolewalkError};
pub use traits::{AccessLogSearch, AssumeRoleRequest, IdentityService, MessageQueue, QueueMessage};
pub use types::{account_of, arn_in_scope, canonical_id, Credentials, Identity, IdentityKind, Role};
pub use worklist::{Identifiable, PubSubWorklist};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
